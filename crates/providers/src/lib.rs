//! LLM vendor transports for typewire.
//!
//! All vendors implement the `typewire_core::Provider` trait and send every
//! request through the payment-aware `PaidHttpClient`. `vendor::build_provider`
//! picks the implementation once, from configuration.

pub mod anthropic;
pub mod gemini;
pub mod openai_compat;
pub mod sse;
pub mod vendor;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use vendor::{Vendor, build_provider};

use typewire_core::{CallContext, Result, TransportError};

/// Read a successful reply body as JSON.
///
/// A body that is not JSON is reported the same way as one missing its
/// text field, with the raw text attached.
pub(crate) async fn read_reply(
    response: reqwest::Response,
    ctx: &CallContext,
    vendor: &str,
) -> Result<serde_json::Value> {
    let raw = ctx
        .guard(async {
            response
                .text()
                .await
                .map_err(typewire_payment::map_reqwest_error)
        })
        .await?;
    serde_json::from_str(&raw).map_err(|_| TransportError::missing_reply(vendor, &raw).into())
}

/// Report a reply whose text field is absent, dumping the parsed body.
pub(crate) fn missing_field(vendor: &str, reply: &serde_json::Value) -> typewire_core::Error {
    TransportError::missing_reply(vendor, &reply.to_string()).into()
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::Router;

    /// Serve `app` on an ephemeral local port, returning its base URL.
    pub async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }
}

//! HTTP client with the one-shot 402 payment retry.
//!
//! `send → (402? → pay → confirm → resend) → (ok | fail)`. The retry budget
//! belongs to a single `send` call, so every call site gets its own.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::{debug, info, warn};
use typewire_core::event::{ProgressEvent, ProgressStage};
use typewire_core::{CallContext, Error, PaymentError, Result, TransportError};

use crate::wallet::{PaymentDemand, Wallet};

/// Outbound HTTP client shared by the model vendors and capability servers.
#[derive(Clone)]
pub struct PaidHttpClient {
    http: reqwest::Client,
    wallet: Option<Arc<dyn Wallet>>,
}

impl PaidHttpClient {
    /// Build a client whose every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { http, wallet: None })
    }

    pub fn with_wallet(mut self, wallet: Arc<dyn Wallet>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    /// The underlying client, for building requests.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn has_wallet(&self) -> bool {
        self.wallet.is_some()
    }

    /// Send `request`, settling at most one payment demand.
    ///
    /// Any status other than 402 is handed back untouched; callers decide
    /// what a non-success status means for them.
    pub async fn send(&self, request: RequestBuilder, ctx: &CallContext) -> Result<Response> {
        let replay = request.try_clone();
        let response = self.dispatch(request, ctx).await?;

        if response.status() != StatusCode::PAYMENT_REQUIRED {
            return Ok(response);
        }

        let body = read_body(response, ctx).await?;
        let Some(wallet) = &self.wallet else {
            warn!("Payment required but no wallet configured");
            return Err(PaymentError::NoWallet { body }.into());
        };

        let demand = PaymentDemand::parse(&body)?;
        let replay = replay.ok_or(PaymentError::NotReplayable)?;
        let lamports = demand.lamports();

        info!(recipient = %demand.recipient, lamports, "Settling payment demand");
        ctx.emit(
            ProgressEvent::new(
                ProgressStage::Payment,
                format!("Paying {} to {}", demand.amount, demand.recipient),
            )
            .with_data(serde_json::json!({
                "amount": demand.amount,
                "lamports": lamports,
                "recipient": demand.recipient,
                "payer": wallet.address(),
            })),
        );

        let signature = ctx
            .guard(async {
                wallet
                    .transfer(&demand.recipient, lamports)
                    .await
                    .map_err(Error::from)
            })
            .await?;
        ctx.guard(async { wallet.confirm(&signature).await.map_err(Error::from) })
            .await?;

        ctx.emit(
            ProgressEvent::new(ProgressStage::Payment, "Payment confirmed, retrying request")
                .with_data(serde_json::json!({ "signature": signature })),
        );

        let response = self.dispatch(replay, ctx).await?;
        if response.status() == StatusCode::PAYMENT_REQUIRED {
            let body = read_body(response, ctx).await?;
            warn!("Payment still required after settling once");
            return Err(PaymentError::StillRequired { body }.into());
        }

        Ok(response)
    }

    async fn dispatch(&self, request: RequestBuilder, ctx: &CallContext) -> Result<Response> {
        ctx.check()?;
        let response = ctx
            .guard(async { request.send().await.map_err(map_reqwest_error) })
            .await?;
        debug!(status = response.status().as_u16(), url = %response.url(), "HTTP response");
        Ok(response)
    }
}

impl std::fmt::Debug for PaidHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaidHttpClient")
            .field("wallet", &self.wallet.as_ref().map(|w| w.address()))
            .finish()
    }
}

async fn read_body(response: Response, ctx: &CallContext) -> Result<String> {
    ctx.guard(async { response.text().await.map_err(map_reqwest_error) })
        .await
}

/// Classify a reqwest failure as a timeout or a generic network error.
pub fn map_reqwest_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string()).into()
    } else {
        TransportError::Network(err.to_string()).into()
    }
}

/// Turn a non-success response into a transport error carrying its body.
pub async fn check_status(response: Response, ctx: &CallContext) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = match read_body(response, ctx).await {
        Ok(body) => body,
        Err(e @ (Error::Cancelled | Error::Transport(TransportError::Timeout(_)))) => return Err(e),
        Err(e) => {
            debug!(error = %e, "Could not read error body");
            String::new()
        }
    };
    warn!(status = status.as_u16(), body = %body, "Request failed");

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(TransportError::AuthenticationFailed(body).into());
    }

    Err(TransportError::ApiError {
        status_code: status.as_u16(),
        message: body,
    }
    .into())
}

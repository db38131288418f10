//! The structured agent pipeline.
//!
//! A run turns a schema-described input into a schema-typed output:
//!
//! 1. **Validate** the input and resolve tool-backed fields
//! 2. **Orchestrate** tools: select servers, discover, select tools, invoke
//! 3. **Generate** the response from a prompt built from the output schema
//! 4. **Stream** field updates through the tag demultiplexer, if asked
//! 5. **Extract** the reply into the output shape and validate it
//!
//! Every intermediate model step has a fallback; only configuration,
//! validation, transport, payment and cancellation errors fail a run.

pub mod input;
pub mod orchestration;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod resolve;
pub mod stream_parser;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use input::{InputSchema, ResolvedInput, ToolBackedField};
pub use orchestration::ToolOrchestrator;
pub use pipeline::{RunOptions, StructuredAgent, paid_http_client};
pub use stream_parser::TagDemux;

//! # typewire Core
//!
//! Domain types, traits, and error definitions for typewire, the structured
//! I/O wrapper around LLM vendors. This crate has **no network code**; it
//! defines the model every other crate implements against.
//!
//! ## Contents
//!
//! - `markup`: the tag-delimited text codec used in every prompt and reply
//! - `schema`: output schemas and the prompt artifacts derived from them
//! - `provider` / `tool`: traits at the vendor and capability-server seams
//! - `event` / `context`: progress reporting and cancellation for a run

pub mod context;
pub mod error;
pub mod event;
pub mod markup;
pub mod message;
pub mod provider;
pub mod schema;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use context::CallContext;
pub use error::{Error, PaymentError, Result, ToolError, TransportError};
pub use event::{ProgressEvent, ProgressSink, ProgressStage, StreamingSink, StreamingUpdate};
pub use message::{Message, Role};
pub use provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
pub use schema::{FieldConstraint, FieldDecl, OutputSchema, SchemaNode};
pub use tool::{CapabilityClient, CapabilityServer, CapabilityTool, ToolResults};

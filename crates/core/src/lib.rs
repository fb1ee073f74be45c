//! # AgentRelay Core
//!
//! Domain types, traits, and error definitions for the AgentRelay reasoning
//! runtime. This crate carries no framework dependencies; it defines the
//! model every other crate implements against.
//!
//! ## Seams
//!
//! - [`Provider`]: the language model, called synchronously or as a stream
//! - [`Tool`] / [`ToolRegistry`]: the explicit registration table of backend tools
//! - [`ToolInvoker`]: how a resolved tool definition is actually executed
//! - [`EventBus`]: fire-and-forget domain events for observers

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, MessageToolCall, Role, SessionId, ToolArguments, ToolCallRequest};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition};
pub use tool::{
    ArgSlot, InvocationContext, Tool, ToolArgs, ToolInvoker, ToolRegistry, ToolResult,
    ToolSummary,
};

//! # cr-invoker
//!
//! The Model Invoker boundary: one async capability that executes a single
//! call against a model-serving endpoint. Crucible's core depends only on
//! this contract; provider-specific protocols live behind it.

mod gate;
mod invoker;
mod mock;

pub use gate::ProviderGate;
pub use invoker::{
    ChatMessage, InvocationInput, InvocationOutcome, InvokerResult, ModelInvoker, ToolCall,
    ToolSpec, Usage,
};
pub use mock::{MockInvoker, MockInvokerConfig};

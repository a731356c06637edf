//! Model providers and their streaming event format.

pub mod provider;
pub mod rig_provider;
#[cfg(test)]
pub(crate) mod scripted;
pub mod stream;

pub use provider::{ChatMessage, ModelProvider, ModelRequest, ProviderFuture, ProviderStream, Role};
pub use rig_provider::RigProvider;
pub use stream::StreamEvent;

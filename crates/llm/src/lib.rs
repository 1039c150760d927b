//! Backend abstraction and elastic dispatch for murmur.

pub mod dispatch;
pub mod http;
pub mod provider;

pub use dispatch::{Dispatched, ElasticDispatcher};
pub use provider::{GenerateRequest, LlmError, LlmProvider, ProviderRegistry};

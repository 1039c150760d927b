//! Engagement core for a multi-party chat agent: decides, per conversation,
//! whether to speak, and keeps the affect and social state that drives it.

pub mod affect;
pub mod cache;
pub mod commands;
pub mod config;
pub mod engagement;
pub mod error;
pub mod io;
pub mod maintenance;
pub mod persistence;
pub mod prompt;
pub mod respond;
pub mod runtime;
pub mod scoring;
pub mod types;

pub use config::EngageCfg;
pub use engagement::EngagementMachine;
pub use error::EngageError;
pub use runtime::Runtime;
pub use types::{InboundMessage, Outcome};

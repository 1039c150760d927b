pub mod dynamics;
pub mod social;
mod store;

pub use store::{AffectStore, EngineHandle, MaintenanceHandle};

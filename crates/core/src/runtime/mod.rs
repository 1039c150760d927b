mod gate;
mod scheduler;
mod shutdown;

pub use gate::KeyedGate;
pub use scheduler::Runtime;
pub use shutdown::ShutdownGuard;

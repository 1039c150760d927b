use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Entries kept before idle gates are pruned.
const PRUNE_THRESHOLD: usize = 1024;

/// One async lock per key: tasks for the same conversation run one at a
/// time, different conversations run freely.
#[derive(Debug, Default)]
pub struct KeyedGate {
    gates: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let gate = {
            let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
            if gates.len() >= PRUNE_THRESHOLD {
                gates.retain(|_, g| Arc::strong_count(g) > 1);
            }
            Arc::clone(gates.entry(key.to_owned()).or_default())
        };
        gate.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.gates.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

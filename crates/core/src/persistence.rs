use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::EngageError;
use crate::types::{ConversationState, UserProfile};

/// Full content of the affect store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub conversations: HashMap<String, ConversationState>,
    #[serde(default)]
    pub users: HashMap<String, UserProfile>,
}

/// Persistence collaborator: hands out the startup snapshot and receives
/// full snapshots on request.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self) -> Result<Option<StoreSnapshot>, EngageError>;
    async fn save(&self, snapshot: &StoreSnapshot) -> Result<(), EngageError>;
}

/// Single JSONB row in `engage_snapshot`.
#[derive(Debug, Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn load(&self) -> Result<Option<StoreSnapshot>, EngageError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT body FROM engage_snapshot WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((body,)) => Ok(Some(serde_json::from_value(body)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, snapshot: &StoreSnapshot) -> Result<(), EngageError> {
        let body = serde_json::to_value(snapshot)?;
        sqlx::query(
            "INSERT INTO engage_snapshot (id, body, saved_at) VALUES (1, $1, now()) \
             ON CONFLICT (id) DO UPDATE SET body = EXCLUDED.body, saved_at = now()",
        )
        .bind(body)
        .execute(&self.pool)
        .await?;
        tracing::debug!(
            conversations = snapshot.conversations.len(),
            users = snapshot.users.len(),
            "snapshot saved"
        );
        Ok(())
    }
}

/// Ephemeral store for runs without a database. Keeps the snapshot as JSON
/// so both backends go through the same encoding.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    slot: Mutex<Option<String>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self) -> Result<Option<StoreSnapshot>, EngageError> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match slot {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, snapshot: &StoreSnapshot) -> Result<(), EngageError> {
        let json = serde_json::to_string(snapshot)?;
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(json);
        Ok(())
    }
}

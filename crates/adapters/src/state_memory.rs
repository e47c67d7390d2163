//! In-memory interaction ledger store for testing and offline mode

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use threadline_domain::{InteractionRepo, InteractionState, StoreError, UserId};

/// In-memory ledger store implementation
pub struct InMemoryInteractionRepo {
    ledgers: RwLock<HashMap<UserId, InteractionState>>,
}

impl InMemoryInteractionRepo {
    pub fn new() -> Self {
        Self {
            ledgers: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryInteractionRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InteractionRepo for InMemoryInteractionRepo {
    async fn load(&self, user_id: &UserId) -> Result<InteractionState, StoreError> {
        let ledgers = self
            .ledgers
            .read()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(ledgers.get(user_id).cloned().unwrap_or_default())
    }

    async fn save(&self, user_id: &UserId, state: &InteractionState) -> Result<(), StoreError> {
        let mut ledgers = self
            .ledgers
            .write()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        ledgers.insert(user_id.clone(), state.clone());
        Ok(())
    }
}

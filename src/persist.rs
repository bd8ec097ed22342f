//! Persistence collaborator interface
//!
//! The core never touches disk itself. A host supplies this trait; all
//! operations are async and idempotent. The in-memory implementation
//! backs tests and ephemeral embedding.

use std::collections::HashMap;

use async_trait::async_trait;
use eyre::Result;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::domain::Session;
use crate::tools::ApprovalRule;

/// Host-provided persistence
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn load_settings(&self) -> Result<Option<Config>>;
    async fn save_settings(&self, config: &Config) -> Result<()>;

    async fn load_rules(&self) -> Result<Vec<ApprovalRule>>;
    async fn save_rules(&self, rules: &[ApprovalRule]) -> Result<()>;

    async fn load_session(&self, id: &str) -> Result<Option<Session>>;
    async fn save_session(&self, session: &Session) -> Result<()>;
}

#[derive(Default)]
struct MemoryStore {
    settings: Option<Config>,
    rules: Vec<ApprovalRule>,
    sessions: HashMap<String, Session>,
}

/// In-memory persistence for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryPersistence {
    store: Mutex<MemoryStore>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn load_settings(&self) -> Result<Option<Config>> {
        Ok(self.store.lock().await.settings.clone())
    }

    async fn save_settings(&self, config: &Config) -> Result<()> {
        self.store.lock().await.settings = Some(config.clone());
        Ok(())
    }

    async fn load_rules(&self) -> Result<Vec<ApprovalRule>> {
        Ok(self.store.lock().await.rules.clone())
    }

    async fn save_rules(&self, rules: &[ApprovalRule]) -> Result<()> {
        self.store.lock().await.rules = rules.to_vec();
        Ok(())
    }

    async fn load_session(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.store.lock().await.sessions.get(id).cloned())
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        self.store
            .lock()
            .await
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(())
    }
}

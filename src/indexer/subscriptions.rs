//! Address → template routing table.

use crate::db::{EntityStore, StoreError};
use crate::domain::{Address, TemplateKind};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

/// Which handler set applies to events from a given contract.
///
/// Append-only: an address keeps the template it was first registered with.
/// Entries are added after the change set that discovered them commits, so
/// the table never routes to a contract the store does not know.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    templates: RwLock<HashMap<Address, TemplateKind>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted subscriptions.
    pub async fn load(store: &dyn EntityStore) -> Result<Self, StoreError> {
        let registry = Self::new();
        let rows = store.subscriptions().await?;
        let count = rows.len();
        {
            let mut templates = registry.templates.write().await;
            for (address, template) in rows {
                templates.entry(address).or_insert(template);
            }
        }
        info!(count, "subscriptions loaded");
        Ok(registry)
    }

    pub async fn template_of(&self, address: &Address) -> Option<TemplateKind> {
        self.templates.read().await.get(address).copied()
    }

    /// Returns false when the address was already watched.
    pub async fn register(&self, address: Address, template: TemplateKind) -> bool {
        let mut templates = self.templates.write().await;
        if templates.contains_key(&address) {
            return false;
        }
        templates.insert(address, template);
        true
    }

    pub async fn len(&self) -> usize {
        self.templates.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

//! Dedup, dispatch and commit for one event at a time.

use super::handlers::{HandlerError, Handled, Handlers};
use super::{ApplyOutcome, ChangeSet, EntityResolver, IndexError, SkipReason, SubscriptionRegistry};
use crate::chain::ContractReader;
use crate::db::{CommitOutcome, EntityStore};
use crate::domain::{counter, EntityId, EventEnvelope, U256};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Applies events to the store. Callers must feed one stream's events through
/// one router call at a time, in emission order.
pub struct EventRouter {
    store: Arc<dyn EntityStore>,
    handlers: Handlers,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl EventRouter {
    pub fn new(
        store: Arc<dyn EntityStore>,
        reader: Arc<dyn ContractReader>,
        subscriptions: Arc<SubscriptionRegistry>,
    ) -> Self {
        let resolver = Arc::new(EntityResolver::new(store.clone(), reader));
        EventRouter {
            store,
            handlers: Handlers::new(resolver),
            subscriptions,
        }
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }

    /// Apply one event.
    ///
    /// A redelivered event reports `Duplicate` and touches nothing. Unwatched
    /// contracts, unmapped event names and malformed parameters are skipped,
    /// but still recorded so a redelivery is recognized. Store, chain and
    /// arithmetic failures are returned and must stop the stream.
    pub async fn apply(&self, event: &EventEnvelope) -> Result<ApplyOutcome, IndexError> {
        let key = event.key();
        if self.store.is_processed(&key).await? {
            debug!(tx_hash = %key.tx_hash, log_index = key.log_index, "duplicate event");
            return Ok(ApplyOutcome::Duplicate);
        }

        let mut cs = ChangeSet::new(key, event.block_timestamp);
        if !event.block_timestamp.is_bucketable() {
            warn!(
                event = %event.event_name,
                tx_hash = %key.tx_hash,
                log_index = key.log_index,
                block_timestamp = %event.block_timestamp,
                "event with out-of-range timestamp skipped"
            );
            if self.store.commit(&cs).await? == CommitOutcome::Duplicate {
                return Ok(ApplyOutcome::Duplicate);
            }
            return Ok(ApplyOutcome::Skipped(SkipReason::Malformed(format!(
                "block timestamp {} is out of range",
                event.block_timestamp
            ))));
        }

        let outcome = match self.subscriptions.template_of(&event.contract_address).await {
            None => {
                debug!(
                    contract = %event.contract_address,
                    event = %event.event_name,
                    "event from unwatched contract"
                );
                ApplyOutcome::Skipped(SkipReason::Unsubscribed)
            }
            Some(template) => match self.handlers.dispatch(&mut cs, template, event).await {
                Ok(Handled::Applied) => {
                    cs.bump(
                        &EntityId::from_address(event.contract_address),
                        counter::EVENTS_COUNT,
                        U256::from(1u8),
                    );
                    ApplyOutcome::Applied
                }
                Ok(Handled::Unmapped) => {
                    warn!(
                        template = template.as_str(),
                        event = %event.event_name,
                        tx_hash = %key.tx_hash,
                        log_index = key.log_index,
                        "unmapped event ignored"
                    );
                    ApplyOutcome::Skipped(SkipReason::Unmapped)
                }
                Err(HandlerError::Param(err)) => {
                    warn!(
                        event = %event.event_name,
                        tx_hash = %key.tx_hash,
                        log_index = key.log_index,
                        error = %err,
                        "malformed event skipped"
                    );
                    cs = ChangeSet::new(key, event.block_timestamp);
                    ApplyOutcome::Skipped(SkipReason::Malformed(err.to_string()))
                }
                Err(HandlerError::Index(err)) => return Err(err),
            },
        };

        if self.store.commit(&cs).await? == CommitOutcome::Duplicate {
            return Ok(ApplyOutcome::Duplicate);
        }

        for (address, template) in cs.subscriptions() {
            if self.subscriptions.register(*address, *template).await {
                info!(contract = %address, template = template.as_str(), "watching contract");
            }
        }
        Ok(outcome)
    }
}

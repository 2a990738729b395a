use crate::domain::EventEnvelope;
use crate::indexer::{ApplyOutcome, EventRouter, IndexError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("stream {0} is halted after a fatal error")]
    Halted(String),
}

struct Job {
    event: EventEnvelope,
    reply: oneshot::Sender<Result<ApplyOutcome, IngestError>>,
}

/// Outcome counts for one ordered batch, plus the per-event outcomes in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub applied: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub outcomes: Vec<ApplyOutcome>,
}

impl BatchResult {
    fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied => self.applied += 1,
            ApplyOutcome::Duplicate => self.duplicates += 1,
            ApplyOutcome::Skipped(_) => self.skipped += 1,
        }
        self.outcomes.push(outcome);
    }
}

/// Routes events to one worker task per stream.
///
/// Each worker drains its channel in order and is the only writer for its
/// stream. A fatal error stops the worker; later submissions to that stream
/// fail with [`IngestError::Halted`].
pub struct Ingestor {
    router: Arc<EventRouter>,
    queue_depth: usize,
    workers: Mutex<HashMap<String, mpsc::Sender<Job>>>,
}

impl Ingestor {
    pub fn new(router: Arc<EventRouter>, queue_depth: usize) -> Self {
        Self {
            router,
            queue_depth: queue_depth.max(1),
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    /// Apply one event on `stream` and wait for its outcome.
    pub async fn submit(
        &self,
        stream: &str,
        event: EventEnvelope,
    ) -> Result<ApplyOutcome, IngestError> {
        let reply = self.enqueue(stream, event).await?;
        reply
            .await
            .map_err(|_| IngestError::Halted(stream.to_string()))?
    }

    /// Apply `events` in order. Stops at the first fatal error; events after it are not applied.
    pub async fn submit_batch(
        &self,
        stream: &str,
        events: Vec<EventEnvelope>,
    ) -> Result<BatchResult, IngestError> {
        let mut pending = Vec::with_capacity(events.len());
        for event in events {
            pending.push(self.enqueue(stream, event).await?);
        }

        let mut result = BatchResult::default();
        for reply in pending {
            let outcome = reply
                .await
                .map_err(|_| IngestError::Halted(stream.to_string()))??;
            result.record(outcome);
        }
        Ok(result)
    }

    /// Streams whose worker has stopped.
    pub async fn halted_streams(&self) -> Vec<String> {
        let workers = self.workers.lock().await;
        let mut halted: Vec<String> = workers
            .iter()
            .filter(|(_, tx)| tx.is_closed())
            .map(|(stream, _)| stream.clone())
            .collect();
        halted.sort();
        halted
    }

    async fn enqueue(
        &self,
        stream: &str,
        event: EventEnvelope,
    ) -> Result<oneshot::Receiver<Result<ApplyOutcome, IngestError>>, IngestError> {
        let sender = self.sender(stream).await;
        let (reply, rx) = oneshot::channel();
        sender
            .send(Job { event, reply })
            .await
            .map_err(|_| IngestError::Halted(stream.to_string()))?;
        Ok(rx)
    }

    async fn sender(&self, stream: &str) -> mpsc::Sender<Job> {
        let mut workers = self.workers.lock().await;
        if let Some(tx) = workers.get(stream) {
            return tx.clone();
        }
        let (tx, rx) = mpsc::channel(self.queue_depth);
        tokio::spawn(run_worker(stream.to_string(), self.router.clone(), rx));
        workers.insert(stream.to_string(), tx.clone());
        tx
    }
}

async fn run_worker(stream: String, router: Arc<EventRouter>, mut rx: mpsc::Receiver<Job>) {
    info!(stream = %stream, "ingest worker started");
    while let Some(Job { event, reply }) = rx.recv().await {
        match router.apply(&event).await {
            Ok(outcome) => {
                let _ = reply.send(Ok(outcome));
            }
            Err(err) => {
                error!(
                    stream = %stream,
                    tx_hash = %event.tx_hash,
                    log_index = event.log_index,
                    error = %err,
                    "fatal indexing error, stream halted"
                );
                let _ = reply.send(Err(err.into()));
                break;
            }
        }
    }
    // Dropping the receiver fails every queued job with `Halted`.
    rx.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ContractReader, MockContractReader};
    use crate::db::{init_db, EntityStore, Repository};
    use crate::domain::{Address, BlockTime, Entity, EntityId, TemplateKind, B256, U256};
    use crate::indexer::{SkipReason, SubscriptionRegistry};
    use serde_json::json;
    use tempfile::TempDir;

    async fn setup(reader: MockContractReader) -> (Ingestor, Arc<Repository>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let repo = Arc::new(Repository::new(pool));
        let store: Arc<dyn EntityStore> = repo.clone();
        let reader: Arc<dyn ContractReader> = Arc::new(reader);
        let router = EventRouter::new(store, reader, Arc::new(SubscriptionRegistry::new()));
        (Ingestor::new(Arc::new(router), 16), repo, temp_dir)
    }

    fn transfer(token: Address, from: Address, to: Address, value: u64, log_index: u32) -> EventEnvelope {
        EventEnvelope {
            contract_address: token,
            event_name: "Transfer".to_string(),
            block_timestamp: BlockTime::new(3_600),
            log_index,
            tx_hash: B256::repeat_byte(9),
            decoded_params: json!({
                "from": from.to_string(),
                "to": to.to_string(),
                "value": value.to_string(),
            }),
        }
    }

    #[tokio::test]
    async fn test_unwatched_then_duplicate() {
        let (ingestor, _repo, _dir) = setup(MockContractReader::new()).await;
        let event = transfer(Address::repeat_byte(1), Address::ZERO, Address::repeat_byte(2), 5, 0);

        let first = ingestor.submit("1", event.clone()).await.unwrap();
        assert_eq!(first, ApplyOutcome::Skipped(SkipReason::Unsubscribed));
        let second = ingestor.submit("1", event).await.unwrap();
        assert_eq!(second, ApplyOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_batch_applies_in_order() {
        let token = Address::repeat_byte(1);
        let alice = Address::repeat_byte(2);
        let bob = Address::repeat_byte(3);
        let reader = MockContractReader::new().with_token(token, "Bond", "BND", 0, U256::ZERO);
        let (ingestor, repo, _dir) = setup(reader).await;
        ingestor
            .router()
            .subscriptions()
            .register(token, TemplateKind::Token)
            .await;

        let result = ingestor
            .submit_batch(
                "1",
                vec![
                    transfer(token, Address::ZERO, alice, 500, 0),
                    transfer(token, alice, bob, 100, 1),
                    transfer(token, alice, bob, 100, 1),
                ],
            )
            .await
            .unwrap();
        assert_eq!(result.applied, 2);
        assert_eq!(result.duplicates, 1);
        assert_eq!(result.outcomes.len(), 3);

        match repo.get_entity(&EntityId::from_address(token)).await.unwrap() {
            Some(Entity::Token(t)) => {
                assert_eq!(t.total_supply.exact(), U256::from(500u32));
                assert_eq!(t.holders_count, 2);
            }
            other => panic!("expected token, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fatal_error_halts_stream_only() {
        let token = Address::repeat_byte(1);
        let reader = MockContractReader::new().with_unreachable(token);
        let (ingestor, _repo, _dir) = setup(reader).await;
        ingestor
            .router()
            .subscriptions()
            .register(token, TemplateKind::Token)
            .await;

        let err = ingestor
            .submit("1", transfer(token, Address::ZERO, Address::repeat_byte(2), 5, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Index(IndexError::Chain(_))));

        let err = ingestor
            .submit("1", transfer(Address::repeat_byte(7), Address::ZERO, Address::repeat_byte(2), 5, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Halted(ref s) if s == "1"));
        assert_eq!(ingestor.halted_streams().await, vec!["1".to_string()]);

        let other = ingestor
            .submit("2", transfer(Address::repeat_byte(7), Address::ZERO, Address::repeat_byte(2), 5, 2))
            .await
            .unwrap();
        assert_eq!(other, ApplyOutcome::Skipped(SkipReason::Unsubscribed));
    }
}

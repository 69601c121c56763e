//! Audit writer: append-only trail of every engine operation.
//!
//! Records are enqueued onto a bounded channel and written by a background
//! task, decoupling audit latency from request latency. Enqueueing fails
//! closed: when the queue is full the originating operation surfaces
//! `RateLimited` rather than silently losing its record. Write failures are
//! retried a bounded number of times and then surfaced to operational
//! monitoring only; they never roll back the originating operation.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use crate::config::AuditConfig;
use crate::domain::AuditRecord;
use crate::errors::{Result, VaultryError};
use crate::observability::metrics;
use crate::storage::AuditLogRepository;

const WRITE_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

enum Command {
    Record(Box<AuditRecord>),
    Flush(oneshot::Sender<()>),
}

/// Handle to the audit writer task. Cheap to clone; all clones feed the
/// same queue.
#[derive(Clone)]
pub struct AuditWriter {
    tx: mpsc::Sender<Command>,
    repository: AuditLogRepository,
}

impl AuditWriter {
    /// Spawn the background writer and return its handle.
    pub fn spawn(repository: AuditLogRepository, config: &AuditConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        tokio::spawn(run_writer(rx, repository.clone()));
        Self { tx, repository }
    }

    /// Enqueue one record. Fails closed with `RateLimited` when the queue
    /// is full so core-critical actions are never silently unaudited.
    pub fn try_record(&self, record: AuditRecord) -> Result<()> {
        match self.tx.try_send(Command::Record(Box::new(record))) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::record_audit_dropped();
                Err(VaultryError::rate_limited("Audit queue is full"))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(VaultryError::internal("Audit writer task has stopped"))
            }
        }
    }

    /// Wait until every record enqueued before this call has been written
    /// (or given up on). Used at shutdown and by tests.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(tx))
            .await
            .map_err(|_| VaultryError::internal("Audit writer task has stopped"))?;
        rx.await.map_err(|_| VaultryError::internal("Audit writer task has stopped"))
    }

    /// Retention sweep: bulk-delete records older than the configured
    /// horizon. Returns the number of purged records.
    pub async fn purge_expired(&self, retention_days: i64) -> Result<u64> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days);
        self.repository.purge_older_than(cutoff).await
    }
}

impl std::fmt::Debug for AuditWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditWriter").field("queue_closed", &self.tx.is_closed()).finish()
    }
}

async fn run_writer(mut rx: mpsc::Receiver<Command>, repository: AuditLogRepository) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Record(record) => {
                write_with_retry(&repository, &record).await;
            }
            Command::Flush(reply) => {
                // Commands are processed in order, so reaching the flush
                // marker means everything before it has been handled.
                let _ = reply.send(());
            }
        }
    }
}

async fn write_with_retry(repository: &AuditLogRepository, record: &AuditRecord) {
    for attempt in 1..=WRITE_RETRIES {
        match repository.insert(record).await {
            Ok(()) => {
                metrics::record_audit_written();
                return;
            }
            Err(e) if attempt < WRITE_RETRIES => {
                warn!(
                    error = %e,
                    attempt,
                    action = %record.action,
                    resource = %record.resource,
                    "Audit write failed, retrying"
                );
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }
            Err(e) => {
                metrics::record_audit_dropped();
                error!(
                    error = %e,
                    action = %record.action,
                    resource = %record.resource,
                    correlation_id = %record.correlation_id,
                    "Audit write failed permanently, record dropped"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AuditAction, AuditResource, WorkspaceId};
    use crate::storage::test_helpers::TestDatabase;

    fn record_for(workspace_id: WorkspaceId, correlation: &str) -> AuditRecord {
        AuditRecord::success(
            workspace_id,
            AuditAction::Read,
            AuditResource::Secret,
            "db/password",
            correlation,
        )
    }

    async fn seeded_workspace(pool: &crate::storage::DbPool) -> WorkspaceId {
        let id = WorkspaceId::new();
        let now = chrono::Utc::now();
        sqlx::query(
            "INSERT INTO workspaces (id, slug, display_name, master_key_fingerprint, settings, created_at, updated_at) \
             VALUES ($1, 'audit-test', 'Audit Test', 'fp', '{}', $2, $3)",
        )
        .bind(&id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn records_are_written_after_flush() {
        let db = TestDatabase::new("audit_writer").await;
        let repository = AuditLogRepository::new(db.pool.clone());
        let writer = AuditWriter::spawn(repository.clone(), &AuditConfig::default());

        let workspace_id = seeded_workspace(&db.pool).await;
        for i in 0..5 {
            writer
                .try_record(record_for(workspace_id.clone(), &format!("corr-{}", i)))
                .unwrap();
        }
        writer.flush().await.unwrap();

        let binding = crate::domain::WorkspaceBinding::new(workspace_id);
        assert_eq!(repository.count(&binding).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn full_queue_fails_closed() {
        let db = TestDatabase::new("audit_full").await;
        let repository = AuditLogRepository::new(db.pool.clone());

        // A zero-capacity channel is not allowed; use the minimum and stall
        // the writer by never yielding to it.
        let (tx, _rx) = mpsc::channel(1);
        let writer = AuditWriter { tx, repository };

        let workspace_id = WorkspaceId::new();
        assert!(writer.try_record(record_for(workspace_id.clone(), "a")).is_ok());
        let err = writer.try_record(record_for(workspace_id, "b")).unwrap_err();
        assert!(matches!(err, VaultryError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn purge_removes_only_old_records() {
        let db = TestDatabase::new("audit_purge").await;
        let repository = AuditLogRepository::new(db.pool.clone());
        let writer = AuditWriter::spawn(repository.clone(), &AuditConfig::default());

        let workspace_id = seeded_workspace(&db.pool).await;

        let mut old = record_for(workspace_id.clone(), "old");
        old.created_at = chrono::Utc::now() - chrono::Duration::days(120);
        repository.insert(&old).await.unwrap();

        writer.try_record(record_for(workspace_id.clone(), "fresh")).unwrap();
        writer.flush().await.unwrap();

        let purged = writer.purge_expired(90).await.unwrap();
        assert_eq!(purged, 1);

        let binding = crate::domain::WorkspaceBinding::new(workspace_id);
        let remaining = repository.list(&binding, 10, 0).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].correlation_id, "fresh");
    }
}

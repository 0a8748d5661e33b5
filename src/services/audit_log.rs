//! Audit log writer.
//!
//! Entries are written after the state change they describe has committed.
//! A failed write never undoes that change: it is logged and retried in the
//! background with exponential backoff while the error stays retryable;
//! anything else is dropped after one logged attempt. Each entry is a
//! single-row insert keyed by its id, so a retry can never produce a partial
//! or duplicate entry.

use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AuditConfig, AuditEntityType, AuditFilter, AuditLogEntry};
use crate::domain::ports::AuditRepository;

/// Writes audit entries, retrying failed writes asynchronously.
#[derive(Clone)]
pub struct AuditLogWriter {
    repository: Arc<dyn AuditRepository>,
    policy: AuditConfig,
}

impl AuditLogWriter {
    pub fn new(repository: Arc<dyn AuditRepository>, policy: AuditConfig) -> Self {
        Self { repository, policy }
    }

    pub fn with_defaults(repository: Arc<dyn AuditRepository>) -> Self {
        Self::new(repository, AuditConfig::default())
    }

    /// Write an entry. Failures are retried in the background; this call
    /// itself never fails.
    pub async fn record(&self, entry: AuditLogEntry) {
        match self.repository.append(&entry).await {
            Ok(()) => {}
            Err(e) => {
                tracing::warn!(
                    entry_id = %entry.id,
                    entity_type = entry.entity_type.as_str(),
                    entity_id = %entry.entity_id,
                    action = entry.action.as_str(),
                    error = %e,
                    "audit write failed, retrying in background"
                );
                self.spawn_retry(entry);
            }
        }
    }

    /// Write entries in order.
    pub async fn record_all(&self, entries: Vec<AuditLogEntry>) {
        for entry in entries {
            self.record(entry).await;
        }
    }

    fn spawn_retry(&self, entry: AuditLogEntry) {
        let repository = Arc::clone(&self.repository);
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.policy.initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.policy.max_backoff_ms))
            .with_max_elapsed_time(Some(Duration::from_secs(self.policy.max_elapsed_secs)))
            .build();

        tokio::spawn(async move {
            let (repo, pending) = (&repository, &entry);
            let result = backoff::future::retry(backoff, || async move {
                repo.append(pending).await.map_err(|e| {
                    if e.is_retryable() {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            })
            .await;

            match result {
                Ok(()) => tracing::info!(entry_id = %entry.id, "audit entry written after retry"),
                Err(e) => tracing::error!(
                    entry_id = %entry.id,
                    entity_id = %entry.entity_id,
                    action = entry.action.as_str(),
                    error = %e,
                    "audit entry dropped after retries were exhausted"
                ),
            }
        });
    }

    /// History of one entity, oldest first.
    pub async fn trail(
        &self,
        entity_type: AuditEntityType,
        entity_id: &str,
    ) -> DomainResult<Vec<AuditLogEntry>> {
        self.repository.trail(entity_type, entity_id).await
    }

    pub async fn query(&self, filter: AuditFilter) -> DomainResult<Vec<AuditLogEntry>> {
        self.repository.list(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::DomainError;
    use crate::domain::models::AuditAction;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// Fails the first `failures` appends, then stores.
    struct FlakyRepository {
        failures: AtomicUsize,
        stored: Mutex<Vec<AuditLogEntry>>,
    }

    #[async_trait]
    impl AuditRepository for FlakyRepository {
        async fn append(&self, entry: &AuditLogEntry) -> DomainResult<()> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(DomainError::DatabaseError("database is locked".to_string()));
            }
            let mut stored = self.stored.lock().await;
            if !stored.iter().any(|e| e.id == entry.id) {
                stored.push(entry.clone());
            }
            Ok(())
        }

        async fn list(&self, filter: AuditFilter) -> DomainResult<Vec<AuditLogEntry>> {
            let stored = self.stored.lock().await;
            Ok(stored.iter().filter(|e| filter.matches(e)).cloned().collect())
        }
    }

    /// Rejects every append with an error no retry can cure.
    struct RejectingRepository {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl AuditRepository for RejectingRepository {
        async fn append(&self, _entry: &AuditLogEntry) -> DomainResult<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(DomainError::SerializationError("bad details payload".to_string()))
        }

        async fn list(&self, _filter: AuditFilter) -> DomainResult<Vec<AuditLogEntry>> {
            Ok(Vec::new())
        }
    }

    fn entry() -> AuditLogEntry {
        AuditLogEntry::new(AuditEntityType::Activity, "a-1", AuditAction::ActivityCompleted, "t1")
    }

    #[tokio::test]
    async fn test_record_writes_through() {
        let repo = Arc::new(FlakyRepository {
            failures: AtomicUsize::new(0),
            stored: Mutex::new(Vec::new()),
        });
        let writer = AuditLogWriter::with_defaults(repo.clone());
        writer.record(entry()).await;
        assert_eq!(writer.trail(AuditEntityType::Activity, "a-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_is_retried() {
        let repo = Arc::new(FlakyRepository {
            failures: AtomicUsize::new(2),
            stored: Mutex::new(Vec::new()),
        });
        let policy = AuditConfig {
            initial_backoff_ms: 5,
            max_backoff_ms: 20,
            max_elapsed_secs: 5,
        };
        let writer = AuditLogWriter::new(repo.clone(), policy);
        writer.record(entry()).await;

        for _ in 0..100 {
            if !repo.stored.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(repo.stored.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let repo = Arc::new(RejectingRepository {
            attempts: AtomicUsize::new(0),
        });
        let policy = AuditConfig {
            initial_backoff_ms: 5,
            max_backoff_ms: 20,
            max_elapsed_secs: 5,
        };
        let writer = AuditLogWriter::new(repo.clone(), policy);
        writer.record(entry()).await;

        for _ in 0..100 {
            if repo.attempts.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        // One inline write plus a single background attempt.
        assert_eq!(repo.attempts.load(Ordering::SeqCst), 2);
    }
}

//! Async front for the blocking SQLite store.
//!
//! Every call runs on the blocking pool under a deadline. Reads get one
//! retry after a short backoff when the database reports lock contention;
//! writes are never retried and surface contention as `Unavailable`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};
use weldiwin_db::{Database, is_foreign_key_violation, is_transient, is_unique_violation};
use weldiwin_types::{ServiceError, ServiceResult};

const READ_RETRY_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
    timeout: Duration,
}

impl Store {
    pub fn new(db: Arc<Database>, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub async fn read<T, F>(&self, op: &'static str, f: F) -> ServiceResult<T>
    where
        T: Send + 'static,
        F: Fn(&Database) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let f = Arc::new(f);

        let first = {
            let f = Arc::clone(&f);
            self.run(op, move |db| f(db)).await?
        };
        match first {
            Ok(value) => Ok(value),
            Err(e) if is_transient(&e) => {
                warn!(op, "store busy, retrying read: {}", e);
                tokio::time::sleep(READ_RETRY_BACKOFF).await;
                match self.run(op, move |db| f(db)).await? {
                    Ok(value) => Ok(value),
                    Err(e) => Err(map_error(op, e)),
                }
            }
            Err(e) => Err(map_error(op, e)),
        }
    }

    pub async fn write<T, F>(&self, op: &'static str, f: F) -> ServiceResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    {
        self.run(op, f).await?.map_err(|e| map_error(op, e))
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> ServiceResult<anyhow::Result<T>>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let task = tokio::task::spawn_blocking(move || f(&db));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                error!(op, "spawn_blocking join error: {}", e);
                Err(ServiceError::Internal(format!("{op}: worker failed")))
            }
            Err(_) => {
                warn!(op, timeout_ms = self.timeout.as_millis() as u64, "store call timed out");
                Err(ServiceError::Timeout(format!("{op} timed out")))
            }
        }
    }
}

fn map_error(op: &'static str, err: anyhow::Error) -> ServiceError {
    if is_unique_violation(&err) {
        return ServiceError::Conflict(format!("{op}: record already exists"));
    }
    if is_foreign_key_violation(&err) {
        return ServiceError::Conflict(format!("{op}: record is still referenced"));
    }
    if is_transient(&err) {
        warn!(op, "store unavailable: {}", err);
        return ServiceError::Unavailable(format!("{op}: store is busy, try again"));
    }
    error!(op, "store error: {:#}", err);
    ServiceError::Internal(format!("{op}: {err}"))
}

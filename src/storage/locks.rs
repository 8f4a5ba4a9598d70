use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::app::{error::GatewayError, settings::LockPolicy};

/// Advisory, per-path exclusion for storage directories.
///
/// Guards are not reentrant: a request that already holds a path and asks
/// for it again waits on itself (or is rejected under [`LockPolicy::Reject`]).
/// Only requests inside this process are coordinated.
pub struct PathLocks {
    policy: LockPolicy,
    entries: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

pub struct PathGuard {
    path: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

impl PathGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PathLocks {
    pub fn new(policy: LockPolicy) -> Self {
        Self {
            policy,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn acquire(&self, path: &Path) -> Result<PathGuard, GatewayError> {
        let lock = self.entry(path);
        let guard = match self.policy {
            LockPolicy::Wait => lock.lock_owned().await,
            LockPolicy::Reject => lock
                .try_lock_owned()
                .map_err(|_| GatewayError::Busy(path.display().to_string()))?,
        };
        tracing::debug!("acquired storage lock on {}", path.display());
        Ok(PathGuard {
            path: path.to_path_buf(),
            _guard: guard,
        })
    }

    fn entry(&self, path: &Path) -> Arc<AsyncMutex<()>> {
        let mut entries = self.entries.lock();
        entries
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn reject_policy_reports_busy_while_held() {
        let locks = PathLocks::new(LockPolicy::Reject);
        let path = Path::new("/data/datasets");

        let held = locks.acquire(path).await.unwrap();
        let err = locks.acquire(path).await.err().unwrap();
        assert_eq!(err, GatewayError::Busy("/data/datasets".into()));

        drop(held);
        assert!(locks.acquire(path).await.is_ok());
    }

    #[tokio::test]
    async fn distinct_paths_do_not_contend() {
        let locks = PathLocks::new(LockPolicy::Reject);
        let _weights = locks.acquire(Path::new("/data/weights")).await.unwrap();
        assert!(locks.acquire(Path::new("/data/datasets")).await.is_ok());
    }

    #[tokio::test]
    async fn wait_policy_queues_behind_the_holder() {
        let locks = Arc::new(PathLocks::new(LockPolicy::Wait));
        let path = PathBuf::from("/data/weights");
        let held = locks.acquire(&path).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            let path = path.clone();
            tokio::spawn(async move {
                locks
                    .acquire(&path)
                    .await
                    .map(|guard| guard.path().to_path_buf())
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        let acquired = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(acquired, path);
    }
}

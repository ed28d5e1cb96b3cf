//! 按文件名加锁：串行化同一存储键上的上传、删除与修改。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{self, error::Elapsed};

use crate::config::DEFAULT_LOCK_WAIT_TIMEOUT_SECS;
use crate::error::ApiError;

/// Manages asynchronous mutexes keyed by image filename.
#[derive(Debug)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    wait: Duration,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_LOCK_WAIT_TIMEOUT_SECS))
    }
}

impl LockManager {
    /// `wait` 为 [`lock_file`](Self::lock_file) 的最长等待时间。
    pub fn with_timeout(wait: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            wait,
        }
    }

    /// 在给定超时时间内获取文件锁。
    pub async fn lock_with_timeout(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<OwnedMutexGuard<()>, Elapsed> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        time::timeout(timeout, lock.lock_owned()).await
    }

    /// 使用配置的等待时间加锁，超时视为文件忙。
    pub async fn lock_file(&self, key: &str) -> Result<OwnedMutexGuard<()>, ApiError> {
        self.lock_with_timeout(key, self.wait)
            .await
            .map_err(|_| ApiError::Conflict(format!("The image \"{key}\" is busy")))
    }

    /// 清理无人持有的锁条目。
    pub async fn prune_idle(&self) {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_lock_times_out_while_held() {
        let manager = LockManager::default();
        let _guard = manager
            .lock_with_timeout("a.png", Duration::from_millis(50))
            .await
            .expect("first lock");
        let second = manager
            .lock_with_timeout("a.png", Duration::from_millis(50))
            .await;
        assert!(second.is_err());

        let other = manager
            .lock_with_timeout("b.png", Duration::from_millis(50))
            .await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn lock_file_reports_busy_image() {
        let manager = LockManager::with_timeout(Duration::from_millis(20));
        let _guard = manager.lock_file("a.png").await.expect("first lock");
        let err = manager.lock_file("a.png").await.expect_err("busy");
        assert_eq!(err.message(), "The image \"a.png\" is busy");
    }

    #[tokio::test]
    async fn prune_drops_released_entries() {
        let manager = LockManager::default();
        {
            let _guard = manager.lock_file("a.png").await.expect("lock");
        }
        manager.prune_idle().await;
        assert!(manager.locks.lock().await.is_empty());
    }
}

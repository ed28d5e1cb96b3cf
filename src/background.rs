//! 后台清理任务：过期会话、登录失败记录与空闲文件锁。

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::SESSION_PRUNE_INTERVAL_SECS;
use crate::locking::LockManager;
use crate::session_auth::SessionStore;
use crate::throttle::LoginThrottle;

/// 启动周期清理任务；令牌模式没有会话表，传 `None`。
pub fn spawn_background_tasks(
    sessions: Option<Arc<SessionStore>>,
    throttle: Arc<LoginThrottle>,
    locks: Arc<LockManager>,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SESSION_PRUNE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            if let Some(sessions) = &sessions {
                sessions.prune_expired().await;
            }
            throttle.prune().await;
            locks.prune_idle().await;
            debug!("background prune finished");
        }
    });
}

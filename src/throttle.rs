//! 按客户端 IP 的登录失败限流，两种认证模式共用。

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::ApiError;

#[derive(Debug)]
pub struct LoginThrottle {
    attempts: Mutex<HashMap<IpAddr, LoginAttempt>>,
    window: Duration,
    max_attempts: u32,
    lockout: Duration,
}

#[derive(Debug)]
struct LoginAttempt {
    window_start: Instant,
    failures: u32,
    locked_until: Option<Instant>,
}

impl LoginAttempt {
    fn fresh(now: Instant) -> Self {
        Self {
            window_start: now,
            failures: 0,
            locked_until: None,
        }
    }
}

impl LoginThrottle {
    /// `max_attempts` 为 0 时关闭限流。
    pub fn new(max_attempts: u32, window: Duration, lockout: Duration) -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
            window,
            max_attempts,
            lockout,
        }
    }

    /// 登录前检查：处于锁定期时返回 429 及剩余秒数。
    pub async fn check(&self, ip: IpAddr) -> Result<(), ApiError> {
        if self.max_attempts == 0 {
            return Ok(());
        }

        let mut attempts = self.attempts.lock().await;
        let now = Instant::now();
        let entry = attempts.entry(ip).or_insert_with(|| LoginAttempt::fresh(now));

        if let Some(locked_until) = entry.locked_until {
            if now < locked_until {
                let remaining = locked_until.saturating_duration_since(now).as_secs();
                return Err(ApiError::TooManyRequests(remaining.max(1)));
            }
            *entry = LoginAttempt::fresh(now);
        }

        if now.duration_since(entry.window_start) > self.window {
            *entry = LoginAttempt::fresh(now);
        }

        Ok(())
    }

    pub async fn register_failure(&self, ip: IpAddr) {
        if self.max_attempts == 0 {
            return;
        }

        let mut attempts = self.attempts.lock().await;
        let now = Instant::now();
        let entry = attempts.entry(ip).or_insert_with(|| LoginAttempt::fresh(now));

        if now.duration_since(entry.window_start) > self.window {
            *entry = LoginAttempt::fresh(now);
        }

        entry.failures = entry.failures.saturating_add(1);
        if entry.failures >= self.max_attempts {
            entry.locked_until = Some(now + self.lockout);
            warn!(client_ip = %ip, "login locked out");
        }
    }

    pub async fn clear(&self, ip: IpAddr) {
        self.attempts.lock().await.remove(&ip);
    }

    /// 清理过期的失败记录。
    pub async fn prune(&self) {
        let mut attempts = self.attempts.lock().await;
        let now = Instant::now();
        attempts.retain(|_, entry| match entry.locked_until {
            Some(locked_until) => locked_until > now,
            None => now.duration_since(entry.window_start) <= self.window,
        });
    }
}

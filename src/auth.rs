//! 认证策略抽象与认证中间件。
//!
//! 路由只有一套；启动时按 `--auth-mode` 选择 [`AuthPolicy`] 实现：
//! 令牌模式返回 JSON，会话模式返回重定向与 flash 提示。

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::http::{HeaderMap, Request};
use axum::middleware;
use axum::response::Response;
use std::sync::Arc;
use tracing::debug;

use crate::config::AuthMode;
use crate::error::ApiError;

/// 通过认证的调用方。
#[derive(Clone, Debug)]
pub struct Identity {
    pub username: String,
    /// 会话模式下的会话 ID，用于挂载 flash 提示。
    pub session_id: Option<String>,
}

#[async_trait]
pub trait AuthPolicy: Send + Sync {
    fn mode(&self) -> AuthMode;

    /// 从请求头识别调用方，失败返回 `None`。
    async fn authenticate(&self, headers: &HeaderMap) -> Option<Identity>;

    /// 未认证请求的响应。
    fn reject(&self) -> Response;

    /// 将处理结果转换为该模式下的响应。
    async fn reply(&self, identity: &Identity, result: Result<String, ApiError>) -> Response;

    /// 图片列表的响应。
    async fn listing(&self, identity: &Identity, result: Result<Vec<String>, ApiError>)
    -> Response;
}

pub type SharedPolicy = Arc<dyn AuthPolicy>;

/// 认证中间件：公开路径直接放行，其余路径要求通过当前策略认证。
pub async fn auth_middleware(
    Extension(policy): Extension<SharedPolicy>,
    mut req: Request<AxumBody>,
    next: middleware::Next,
) -> Response {
    if is_public_path(policy.mode(), req.uri().path()) {
        return next.run(req).await;
    }

    match policy.authenticate(req.headers()).await {
        Some(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        None => {
            debug!(path = req.uri().path(), "unauthenticated request rejected");
            policy.reject()
        }
    }
}

fn is_public_path(mode: AuthMode, path: &str) -> bool {
    match path {
        "/login" | "/api/version" => true,
        "/sign-up" | "/logout" => mode == AuthMode::Session,
        _ => false,
    }
}

//! 路由组装：一套图片路由，加上所选认证模式的登录路由。

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{delete, get, post};
use axum::{Router, middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info_span};

use crate::auth::{self, SharedPolicy};
use crate::http;
use crate::images;
use crate::locking::LockManager;
use crate::session_auth::{self, SessionPolicy};
use crate::storage::ImageStore;
use crate::throttle::LoginThrottle;
use crate::token_auth::{self, TokenPolicy};
use crate::version;

/// 启动时选定的认证实现。
pub enum AuthSetup {
    Token(Arc<TokenPolicy>),
    Session(Arc<SessionPolicy>),
}

/// 路由依赖的共享组件。
pub struct AppParts {
    pub store: Arc<ImageStore>,
    pub locks: Arc<LockManager>,
    pub throttle: Arc<LoginThrottle>,
    pub auth: AuthSetup,
    pub upload_max_bytes: usize,
}

pub fn build_router(parts: AppParts) -> Router {
    let app = Router::new()
        .route(
            "/upload-image",
            post(images::upload_image).layer(DefaultBodyLimit::max(parts.upload_max_bytes)),
        )
        .route("/list-images", get(images::list_images))
        .route(
            "/delete-image/{filename}",
            delete(images::delete_image).post(images::delete_image),
        )
        .route("/download-image/{filename}", get(images::download_image))
        .route("/modify-image/{filename}", post(images::modify_image))
        .route("/api/version", get(version::get_version_info));

    let (app, policy): (Router, SharedPolicy) = match parts.auth {
        AuthSetup::Token(policy) => {
            let shared: SharedPolicy = policy.clone();
            (
                app.route("/login", post(token_auth::token_login))
                    .route("/protected", get(token_auth::protected))
                    .layer(Extension(policy)),
                shared,
            )
        }
        AuthSetup::Session(policy) => {
            let shared: SharedPolicy = policy.clone();
            (
                app.route("/", get(session_auth::home))
                    .route(
                        "/login",
                        get(session_auth::login_page).post(session_auth::session_login),
                    )
                    .route(
                        "/sign-up",
                        get(session_auth::sign_up_page).post(session_auth::sign_up),
                    )
                    .route("/logout", get(session_auth::logout))
                    .layer(Extension(policy)),
                shared,
            )
        }
    };

    app.layer(middleware::from_fn(auth::auth_middleware))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let forwarded_ip = request
                        .headers()
                        .get("x-forwarded-for")
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.split(',').next().unwrap_or("").trim().to_string());
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.to_string());
                    let client_ip = forwarded_ip
                        .or(connect_ip)
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(Extension(parts.store))
        .layer(Extension(parts.locks))
        .layer(Extension(parts.throttle))
        .layer(Extension(policy))
}

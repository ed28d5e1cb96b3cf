//! PixelDrive server binary.
//!
//! 需要登录的图片上传、列表、下载、删除与修改服务。认证方式在启动时
//! 选择：令牌模式提供 JSON API，会话模式提供 HTML 页面。

mod atomic;
mod auth;
mod background;
mod config;
mod error;
mod http;
mod images;
mod imaging;
mod locking;
mod logging;
mod modify;
mod pages;
mod router;
mod session_auth;
mod storage;
mod throttle;
mod tls;
mod token_auth;
mod users;
mod version;

use axum::extract::Extension;
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

use crate::background::spawn_background_tasks;
use crate::config::{Args, AuthMode};
use crate::http::{RequestScheme, build_cors_layer};
use crate::locking::LockManager;
use crate::router::{AppParts, AuthSetup, build_router};
use crate::session_auth::{SessionPolicy, SessionStore};
use crate::storage::ImageStore;
use crate::throttle::LoginThrottle;
use crate::token_auth::{TokenPolicy, TokenSigner};
use crate::users::UserStore;

shadow!(build);

/// Starts the PixelDrive server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let args = Args::parse();
    logging::init_logging(&args.log_level);

    let store = Arc::new(ImageStore::new(PathBuf::from(&args.upload_dir)));
    store.ensure_root().await?;
    info!(upload_dir = %store.root_path().display(), "upload folder ready");
    let locks = Arc::new(LockManager::with_timeout(Duration::from_secs(
        args.lock_wait_secs,
    )));
    let throttle = Arc::new(LoginThrottle::new(
        args.login_max_attempts,
        Duration::from_secs(args.login_window_secs),
        Duration::from_secs(args.login_lockout_secs),
    ));

    let mut sessions_for_tasks = None;
    let auth = match args.auth_mode {
        AuthMode::Token => {
            let secret = match &args.secret_key {
                Some(secret) if !secret.is_empty() => secret.clone(),
                _ => {
                    warn!("no secret key configured, tokens will not survive a restart");
                    format!(
                        "{}{}",
                        uuid::Uuid::new_v4().simple(),
                        uuid::Uuid::new_v4().simple()
                    )
                }
            };
            let signer = TokenSigner::new(secret, Duration::from_secs(args.token_ttl_secs));
            let policy = TokenPolicy::new(signer, &args.demo_user, &args.demo_pass)
                .map_err(|err| std::io::Error::other(err.to_string()))?;
            info!(user = %args.demo_user, "token authentication enabled");
            AuthSetup::Token(Arc::new(policy))
        }
        AuthMode::Session => {
            let users = UserStore::open(PathBuf::from(&args.users_file))
                .await
                .map_err(|err| std::io::Error::other(err.to_string()))?;
            let sessions = Arc::new(SessionStore::new(Duration::from_secs(
                args.session_ttl_secs,
            )));
            sessions_for_tasks = Some(sessions.clone());
            info!(users_file = %args.users_file, "session authentication enabled");
            AuthSetup::Session(Arc::new(SessionPolicy::new(sessions, Arc::new(users))))
        }
    };

    let mut app = build_router(AppParts {
        store,
        locks: locks.clone(),
        throttle: throttle.clone(),
        auth,
        upload_max_bytes: args.upload_max_bytes,
    });

    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let http_addr = SocketAddr::new(host, args.http_port);
    let https_addr = SocketAddr::new(host, args.https_port);
    let tls_config = tls::load_rustls_config(&args).await?;
    let handle = Handle::new();

    info!("🚀 Starting HTTP server at {}", http_addr);

    let http_app = app.clone().layer(Extension(RequestScheme::Http));
    let http_server = axum_server::bind(http_addr)
        .handle(handle.clone())
        .serve(http_app.into_make_service_with_connect_info::<SocketAddr>());

    let https_server = async {
        match tls_config {
            Some(tls_config) => {
                info!("🔒 Starting HTTPS server at {}", https_addr);
                let https_app = app.layer(Extension(RequestScheme::Https));
                axum_server::bind_rustls(https_addr, tls_config)
                    .handle(handle.clone())
                    .serve(https_app.into_make_service_with_connect_info::<SocketAddr>())
                    .await
            }
            None => std::future::pending().await,
        }
    };

    spawn_background_tasks(sessions_for_tasks, throttle, locks);
    tokio::select! {
        result = http_server => result?,
        result = https_server => result?,
        _ = shutdown_signal(handle.clone()) => {}
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}

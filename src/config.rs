//! CLI 参数、环境变量与服务默认配置。

use clap::{Parser, ValueEnum};
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const ALLOWED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];
pub const MAX_RESIZE_WIDTH: u32 = 1920;
pub const MAX_RESIZE_HEIGHT: u32 = 1080;
pub const MAX_ROTATE_ANGLE: u32 = 359;
pub const MAX_CONTRAST_FACTOR: f32 = 10.0;
pub const DEFAULT_LOCK_WAIT_TIMEOUT_SECS: u64 = 10;
pub const ATOMIC_TEMP_PREFIX: &str = ".pixel-tmp.";
pub const AUTH_COOKIE_NAME: &str = "PIXEL_SESSION";
pub const DEFAULT_DEMO_USER: &str = "test";
pub const DEFAULT_DEMO_PASS: &str = "test";
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 8 * 60 * 60;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_LOGIN_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_LOGIN_WINDOW_SECS: u64 = 5 * 60;
pub const DEFAULT_LOGIN_LOCKOUT_SECS: u64 = 10 * 60;
pub const DEFAULT_UPLOAD_MAX_BYTES: usize = 16 * 1024 * 1024;
pub const SESSION_PRUNE_INTERVAL_SECS: u64 = 300;

/// 认证模式：API 令牌或页面会话。
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum AuthMode {
    Token,
    Session,
}

/// 服务的 CLI 参数与环境变量配置。
#[derive(Parser, Debug)]
#[command(name = "pixel-drive", version = VERSION_INFO, about = "PixelDrive image server")]
pub struct Args {
    #[arg(
        short = 'u',
        long,
        env = "PIXEL_UPLOAD_DIR",
        default_value = "uploads",
        help = "Upload folder for images"
    )]
    pub upload_dir: String,
    #[arg(
        short = 'm',
        long,
        value_enum,
        env = "PIXEL_AUTH_MODE",
        default_value_t = AuthMode::Token,
        help = "Authentication mode: bearer tokens (API) or sessions (pages)"
    )]
    pub auth_mode: AuthMode,
    #[arg(
        long,
        env = "PIXEL_SECRET_KEY",
        help = "Secret used to sign access tokens (random when unset)"
    )]
    pub secret_key: Option<String>,
    #[arg(
        long,
        env = "PIXEL_DEMO_USER",
        default_value = DEFAULT_DEMO_USER,
        help = "Username of the token-mode demo account"
    )]
    pub demo_user: String,
    #[arg(
        long,
        env = "PIXEL_DEMO_PASS",
        default_value = DEFAULT_DEMO_PASS,
        help = "Password of the token-mode demo account"
    )]
    pub demo_pass: String,
    #[arg(
        long,
        env = "PIXEL_USERS_FILE",
        default_value = "users.json",
        help = "User records for session mode"
    )]
    pub users_file: String,
    #[arg(
        short = 'b',
        long,
        env = "PIXEL_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP/HTTPS"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "PIXEL_HTTP_PORT",
        default_value_t = 5000,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(
        short = 'P',
        long,
        env = "PIXEL_HTTPS_PORT",
        default_value_t = 5443,
        help = "HTTPS port (only used with --tls-cert and --tls-key)"
    )]
    pub https_port: u16,
    #[arg(short = 'c', long, env = "PIXEL_TLS_CERT", help = "TLS cert path")]
    pub tls_cert: Option<String>,
    #[arg(short = 'k', long, env = "PIXEL_TLS_KEY", help = "TLS key path")]
    pub tls_key: Option<String>,
    #[arg(long, env = "PIXEL_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "PIXEL_LOG_LEVEL",
        default_value = "info",
        help = "Default log filter when RUST_LOG is unset"
    )]
    pub log_level: String,
    #[arg(
        long,
        env = "PIXEL_UPLOAD_MAX_BYTES",
        default_value_t = DEFAULT_UPLOAD_MAX_BYTES,
        help = "Max request body size for uploads in bytes"
    )]
    pub upload_max_bytes: usize,
    #[arg(
        long,
        env = "PIXEL_TOKEN_TTL_SECS",
        default_value_t = DEFAULT_TOKEN_TTL_SECS,
        help = "Access token lifetime in seconds"
    )]
    pub token_ttl_secs: u64,
    #[arg(
        long,
        env = "PIXEL_SESSION_TTL_SECS",
        default_value_t = DEFAULT_SESSION_TTL_SECS,
        help = "Session expiration in seconds"
    )]
    pub session_ttl_secs: u64,
    #[arg(
        long,
        env = "PIXEL_LOGIN_MAX_ATTEMPTS",
        default_value_t = DEFAULT_LOGIN_MAX_ATTEMPTS,
        help = "Max login attempts before lockout (0 to disable)"
    )]
    pub login_max_attempts: u32,
    #[arg(
        long,
        env = "PIXEL_LOGIN_WINDOW_SECS",
        default_value_t = DEFAULT_LOGIN_WINDOW_SECS,
        help = "Login attempt window in seconds"
    )]
    pub login_window_secs: u64,
    #[arg(
        long,
        env = "PIXEL_LOGIN_LOCKOUT_SECS",
        default_value_t = DEFAULT_LOGIN_LOCKOUT_SECS,
        help = "Login lockout time after max attempts"
    )]
    pub login_lockout_secs: u64,
    #[arg(
        long,
        env = "PIXEL_LOCK_WAIT_SECS",
        default_value_t = DEFAULT_LOCK_WAIT_TIMEOUT_SECS,
        help = "How long a request waits for an image that is being changed"
    )]
    pub lock_wait_secs: u64,
}

//! 会话模式：Cookie 会话、注册登录页面、flash 提示与重定向。

use async_trait::async_trait;
use axum::Form;
use axum::extract::Extension;
use axum::extract::rejection::FormRejection;
use axum::http::{Extensions, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use cookie::time::Duration as CookieDuration;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::{AuthPolicy, Identity};
use crate::config::{AUTH_COOKIE_NAME, AuthMode};
use crate::error::ApiError;
use crate::http::{RequestScheme, client_ip, is_https_request};
use crate::pages;
use crate::storage::ImageStore;
use crate::throttle::LoginThrottle;
use crate::users::UserStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlashCategory {
    Success,
    Error,
}

/// 一次性提示，下一次渲染页面时取出并清空。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Flash {
    pub category: FlashCategory,
    pub message: String,
}

impl Flash {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            category: FlashCategory::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            category: FlashCategory::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug)]
struct SessionEntry {
    username: String,
    expires_at: Instant,
    flashes: Vec<Flash>,
}

/// 内存会话表。
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn create(&self, username: &str) -> String {
        let token = Uuid::new_v4().to_string();
        let entry = SessionEntry {
            username: username.to_string(),
            expires_at: Instant::now() + self.ttl,
            flashes: Vec::new(),
        };
        self.sessions.lock().await.insert(token.clone(), entry);
        token
    }

    /// 查询会话对应的用户名，过期会话顺便删除。
    pub async fn lookup(&self, token: &str) -> Option<String> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(token) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.username.clone()),
            Some(_) => {
                sessions.remove(token);
                None
            }
            None => None,
        }
    }

    pub async fn remove(&self, token: &str) {
        self.sessions.lock().await.remove(token);
    }

    pub async fn push_flash(&self, token: &str, flash: Flash) {
        if let Some(entry) = self.sessions.lock().await.get_mut(token) {
            entry.flashes.push(flash);
        }
    }

    pub async fn take_flashes(&self, token: &str) -> Vec<Flash> {
        self.sessions
            .lock()
            .await
            .get_mut(token)
            .map(|entry| std::mem::take(&mut entry.flashes))
            .unwrap_or_default()
    }

    /// 清理过期会话。
    pub async fn prune_expired(&self) {
        let now = Instant::now();
        self.sessions
            .lock()
            .await
            .retain(|_, entry| entry.expires_at > now);
    }
}

/// 会话模式的认证策略。
pub struct SessionPolicy {
    pub sessions: Arc<SessionStore>,
    pub users: Arc<UserStore>,
}

impl SessionPolicy {
    pub fn new(sessions: Arc<SessionStore>, users: Arc<UserStore>) -> Self {
        Self { sessions, users }
    }

    async fn flash_and_redirect(&self, identity: &Identity, flash: Flash, to: &str) -> Response {
        if let Some(session_id) = &identity.session_id {
            self.sessions.push_flash(session_id, flash).await;
        }
        Redirect::to(to).into_response()
    }
}

fn error_flash(err: &ApiError) -> Flash {
    if let ApiError::Internal(detail) = err {
        error!(error = %detail, "internal error");
    }
    Flash::error(err.message())
}

#[async_trait]
impl AuthPolicy for SessionPolicy {
    fn mode(&self) -> AuthMode {
        AuthMode::Session
    }

    async fn authenticate(&self, headers: &HeaderMap) -> Option<Identity> {
        let jar = CookieJar::from_headers(headers);
        let session_id = jar.get(AUTH_COOKIE_NAME)?.value().to_string();
        let username = self.sessions.lookup(&session_id).await?;
        Some(Identity {
            username,
            session_id: Some(session_id),
        })
    }

    fn reject(&self) -> Response {
        Redirect::to("/login").into_response()
    }

    async fn reply(&self, identity: &Identity, result: Result<String, ApiError>) -> Response {
        let flash = match result {
            Ok(message) => Flash::success(message),
            Err(err) => error_flash(&err),
        };
        self.flash_and_redirect(identity, flash, "/").await
    }

    async fn listing(
        &self,
        identity: &Identity,
        result: Result<Vec<String>, ApiError>,
    ) -> Response {
        match result {
            Ok(_) => Redirect::to("/").into_response(),
            Err(err) => {
                self.flash_and_redirect(identity, error_flash(&err), "/")
                    .await
            }
        }
    }
}

fn session_cookie(token: String, ttl: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build((AUTH_COOKIE_NAME, token))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .max_age(CookieDuration::seconds(ttl.as_secs() as i64))
        .build()
}

/// 首页：图片列表与操作表单，同时取出待显示的 flash。
pub async fn home(
    Extension(policy): Extension<Arc<SessionPolicy>>,
    Extension(store): Extension<Arc<ImageStore>>,
    Extension(identity): Extension<Identity>,
) -> Html<String> {
    let mut flashes = match &identity.session_id {
        Some(session_id) => policy.sessions.take_flashes(session_id).await,
        None => Vec::new(),
    };
    let images = match store.list().await {
        Ok(images) => images,
        Err(err) => {
            flashes.push(error_flash(&ApiError::from(err)));
            Vec::new()
        }
    };
    pages::home(&identity.username, &images, &flashes)
}

pub async fn login_page() -> Html<String> {
    pages::login(None, "")
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub(crate) struct LoginForm {
    username: String,
    password: String,
}

/// 表单登录：成功写入会话 Cookie 并跳转首页，失败重新渲染登录页。
pub async fn session_login(
    Extension(policy): Extension<Arc<SessionPolicy>>,
    Extension(throttle): Extension<Arc<LoginThrottle>>,
    Extension(scheme): Extension<RequestScheme>,
    headers: HeaderMap,
    extensions: Extensions,
    jar: CookieJar,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Response {
    let Ok(Form(form)) = form else {
        return (
            StatusCode::BAD_REQUEST,
            pages::login(Some("Invalid login form"), ""),
        )
            .into_response();
    };
    let username = form.username.trim();
    if username.is_empty() || form.password.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            pages::login(Some("Username or password not provided"), username),
        )
            .into_response();
    }

    let ip = client_ip(&headers, &extensions);
    if let Err(err) = throttle.check(ip).await {
        return (err.status(), pages::login(Some(&err.message()), username)).into_response();
    }

    if policy
        .users
        .authenticate(username, &form.password)
        .await
        .is_none()
    {
        throttle.register_failure(ip).await;
        return (
            StatusCode::UNAUTHORIZED,
            pages::login(Some("Invalid credentials"), username),
        )
            .into_response();
    }
    throttle.clear(ip).await;

    let token = policy.sessions.create(username).await;
    policy
        .sessions
        .push_flash(&token, Flash::success("Logged in successfully!"))
        .await;
    info!(username, "session login");
    let cookie = session_cookie(
        token,
        policy.sessions.ttl(),
        is_https_request(&headers, scheme),
    );
    (jar.add(cookie), Redirect::to("/")).into_response()
}

pub async fn sign_up_page() -> Html<String> {
    pages::sign_up(None, "", "")
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub(crate) struct SignUpForm {
    email: String,
    username: String,
    password1: String,
    password2: String,
}

fn validate_sign_up(form: &SignUpForm) -> Result<(), &'static str> {
    let email = form.email.trim();
    if email.len() < 4 || !email.contains('@') {
        return Err("Email must be valid and at least 4 characters");
    }
    if form.username.trim().chars().count() < 2 {
        return Err("Username must be at least 2 characters");
    }
    if form.password1 != form.password2 {
        return Err("Passwords don't match");
    }
    if form.password1.chars().count() < 7 {
        return Err("Password must be at least 7 characters");
    }
    Ok(())
}

/// 注册：校验表单、保存用户并直接登录。
pub async fn sign_up(
    Extension(policy): Extension<Arc<SessionPolicy>>,
    Extension(scheme): Extension<RequestScheme>,
    headers: HeaderMap,
    jar: CookieJar,
    form: Result<Form<SignUpForm>, FormRejection>,
) -> Response {
    let Ok(Form(form)) = form else {
        return (
            StatusCode::BAD_REQUEST,
            pages::sign_up(Some("Invalid sign-up form"), "", ""),
        )
            .into_response();
    };
    let email = form.email.trim();
    let username = form.username.trim();
    if let Err(message) = validate_sign_up(&form) {
        return (
            StatusCode::BAD_REQUEST,
            pages::sign_up(Some(message), email, username),
        )
            .into_response();
    }

    if let Err(err) = policy.users.create(username, email, &form.password1).await {
        let err = ApiError::from(err);
        if let ApiError::Internal(detail) = &err {
            error!(error = %detail, "sign up failed");
        }
        return (err.status(), pages::sign_up(Some(&err.message()), email, username))
            .into_response();
    }

    let token = policy.sessions.create(username).await;
    policy
        .sessions
        .push_flash(&token, Flash::success("Account created!"))
        .await;
    let cookie = session_cookie(
        token,
        policy.sessions.ttl(),
        is_https_request(&headers, scheme),
    );
    (jar.add(cookie), Redirect::to("/")).into_response()
}

/// 登出：删除会话与 Cookie。
pub async fn logout(
    Extension(policy): Extension<Arc<SessionPolicy>>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(AUTH_COOKIE_NAME) {
        policy.sessions.remove(cookie.value()).await;
    }
    (
        jar.remove(Cookie::build(AUTH_COOKIE_NAME).path("/").build()),
        Redirect::to("/login"),
    )
}

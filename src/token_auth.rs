//! 令牌模式：HMAC-SHA256 签名的访问令牌与 JSON 响应。
//!
//! 令牌格式为 `{username}.{exp}.{hex(signature)}`，签名覆盖 `{username}.{exp}`，
//! 校验使用常量时间比较。

use async_trait::async_trait;
use axum::Json;
use axum::extract::{Extension, rejection::JsonRejection};
use axum::http::{Extensions, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::auth::{AuthPolicy, Identity};
use crate::config::AuthMode;
use crate::error::{ApiError, MessageBody};
use crate::http::client_ip;
use crate::throttle::LoginThrottle;
use crate::users::{UserStoreError, hash_password, verify_password};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token expired at {0}")]
    Expired(u64),
}

/// 访问令牌签发与校验。
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: impl AsRef<[u8]>, ttl: Duration) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            ttl,
        }
    }

    pub fn issue(&self, username: &str) -> String {
        self.issue_at(username, unix_now())
    }

    fn issue_at(&self, username: &str, now: u64) -> String {
        let exp = now.saturating_add(self.ttl.as_secs());
        let payload = format!("{username}.{exp}");
        let signature = hex::encode(self.mac(&payload));
        format!("{payload}.{signature}")
    }

    /// 校验令牌并返回用户名。
    pub fn verify(&self, token: &str) -> Result<String, TokenError> {
        self.verify_at(token, unix_now())
    }

    fn verify_at(&self, token: &str, now: u64) -> Result<String, TokenError> {
        let mut parts = token.rsplitn(3, '.');
        let (Some(signature), Some(exp), Some(username)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };
        if username.is_empty() {
            return Err(TokenError::Malformed);
        }
        let exp: u64 = exp.parse().map_err(|_| TokenError::Malformed)?;
        let provided = hex::decode(signature).map_err(|_| TokenError::Malformed)?;
        let expected = self.mac(&format!("{username}.{exp}"));
        if !bool::from(expected.as_slice().ct_eq(&provided)) {
            return Err(TokenError::InvalidSignature);
        }
        if now >= exp {
            return Err(TokenError::Expired(exp));
        }
        Ok(username.to_string())
    }

    fn mac(&self, payload: &str) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// 令牌模式的认证策略，内置一个演示账号。
pub struct TokenPolicy {
    signer: TokenSigner,
    demo_user: String,
    demo_password_hash: String,
}

impl TokenPolicy {
    pub fn new(
        signer: TokenSigner,
        demo_user: &str,
        demo_password: &str,
    ) -> Result<Self, UserStoreError> {
        Ok(Self {
            signer,
            demo_user: demo_user.to_string(),
            demo_password_hash: hash_password(demo_password)?,
        })
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    async fn check_credentials(&self, username: &str, password: &str) -> bool {
        if username != self.demo_user {
            return false;
        }
        let hash = self.demo_password_hash.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || verify_password(&hash, &password))
            .await
            .unwrap_or(false)
    }
}

#[derive(Serialize)]
struct ImageList {
    images: Vec<String>,
}

#[async_trait]
impl AuthPolicy for TokenPolicy {
    fn mode(&self) -> AuthMode {
        AuthMode::Token
    }

    async fn authenticate(&self, headers: &HeaderMap) -> Option<Identity> {
        let Authorization(bearer) = headers.typed_get::<Authorization<Bearer>>()?;
        match self.signer.verify(bearer.token()) {
            Ok(username) => Some(Identity {
                username,
                session_id: None,
            }),
            Err(TokenError::InvalidSignature) => {
                warn!("bearer token with invalid signature");
                None
            }
            Err(err) => {
                debug!(error = %err, "bearer token rejected");
                None
            }
        }
    }

    fn reject(&self) -> Response {
        ApiError::Unauthorized("Missing or invalid access token".into()).into_response()
    }

    async fn reply(&self, _identity: &Identity, result: Result<String, ApiError>) -> Response {
        match result {
            Ok(message) => (StatusCode::OK, Json(MessageBody { message })).into_response(),
            Err(err) => err.into_response(),
        }
    }

    async fn listing(
        &self,
        _identity: &Identity,
        result: Result<Vec<String>, ApiError>,
    ) -> Response {
        match result {
            Ok(images) => Json(ImageList { images }).into_response(),
            Err(err) => err.into_response(),
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct TokenLoginRequest {
    username: Option<String>,
    password: Option<String>,
}

/// 登录接口：校验演示账号并签发访问令牌。
pub async fn token_login(
    Extension(policy): Extension<Arc<TokenPolicy>>,
    Extension(throttle): Extension<Arc<LoginThrottle>>,
    headers: HeaderMap,
    extensions: Extensions,
    payload: Result<Json<TokenLoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Ok(Json(payload)) = payload else {
        return Err(ApiError::BadRequest("No input data provided".into()));
    };
    let (Some(username), Some(password)) = (
        payload.username.filter(|value| !value.is_empty()),
        payload.password.filter(|value| !value.is_empty()),
    ) else {
        return Err(ApiError::BadRequest(
            "Username or password not provided".into(),
        ));
    };

    let ip = client_ip(&headers, &extensions);
    throttle.check(ip).await?;

    if !policy.check_credentials(&username, &password).await {
        throttle.register_failure(ip).await;
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    }
    throttle.clear(ip).await;

    info!(username, "access token issued");
    let access_token = policy.signer().issue(&username);
    Ok((StatusCode::OK, Json(json!({ "access_token": access_token }))).into_response())
}

/// 用于验证令牌是否有效的受保护接口。
pub async fn protected(Extension(identity): Extension<Identity>) -> Json<MessageBody> {
    debug!(username = identity.username, "protected endpoint hit");
    Json(MessageBody {
        message: "You are authenticated!".into(),
    })
}

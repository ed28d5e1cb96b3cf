//! 版本信息接口。

use axum::extract::Extension;
use axum::response::Json as JsonResponse;
use serde::Serialize;

use crate::auth::SharedPolicy;
use crate::config::AuthMode;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    name: &'static str,
    version: &'static str,
    commit: &'static str,
    build_time: &'static str,
    build_env: String,
    auth_mode: &'static str,
}

/// 返回当前版本与认证模式，无需登录。
pub async fn get_version_info(
    Extension(policy): Extension<SharedPolicy>,
) -> JsonResponse<VersionInfo> {
    JsonResponse(VersionInfo {
        name: crate::build::PROJECT_NAME,
        version: crate::build::PKG_VERSION,
        commit: crate::build::SHORT_COMMIT,
        build_time: crate::build::BUILD_TIME,
        build_env: format!(
            "{},{}",
            crate::build::RUST_VERSION,
            crate::build::RUST_CHANNEL
        ),
        auth_mode: match policy.mode() {
            AuthMode::Token => "token",
            AuthMode::Session => "session",
        },
    })
}

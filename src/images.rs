//! 图片路由处理器：上传、列表、删除、下载与修改。
//!
//! 处理结果统一交给当前 [`AuthPolicy`](crate::auth::AuthPolicy) 转换为响应。

use axum::Form;
use axum::body::Body as AxumBody;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Extension, FromRequest, Json, Multipart, Path, Request};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use httpdate::fmt_http_date;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::auth::{Identity, SharedPolicy};
use crate::error::ApiError;
use crate::locking::LockManager;
use crate::modify::{ModifyJson, ModifyPlan, RawModifyFields};
use crate::storage::ImageStore;

/// 上传图片（multipart 字段 `image`）。
pub async fn upload_image(
    Extension(store): Extension<Arc<ImageStore>>,
    Extension(locks): Extension<Arc<LockManager>>,
    Extension(policy): Extension<SharedPolicy>,
    Extension(identity): Extension<Identity>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let result = receive_upload(&store, &locks, multipart).await;
    policy.reply(&identity, result).await
}

async fn receive_upload(
    store: &ImageStore,
    locks: &LockManager,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<String, ApiError> {
    let mut multipart =
        multipart.map_err(|_| ApiError::BadRequest("No file uploaded or received".into()))?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(err.body_text()))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|err| ApiError::BadRequest(err.body_text()))?;
        upload = Some((filename, data));
        break;
    }

    let Some((filename, data)) = upload else {
        return Err(ApiError::BadRequest("No file uploaded or received".into()));
    };
    if filename.is_empty() {
        return Err(ApiError::BadRequest("No selected file".into()));
    }

    let name = store.upload_name(&filename)?;
    let _guard = locks.lock_file(&name).await?;
    let name = store.upload(&name, data.to_vec()).await?;
    info!(name, bytes = data.len(), "image uploaded");
    Ok(format!("File {name} successfully uploaded"))
}

pub async fn list_images(
    Extension(store): Extension<Arc<ImageStore>>,
    Extension(policy): Extension<SharedPolicy>,
    Extension(identity): Extension<Identity>,
) -> Response {
    let result = store.list().await.map_err(ApiError::from);
    if let Ok(images) = &result {
        debug!(count = images.len(), "list images");
    }
    policy.listing(&identity, result).await
}

/// 删除图片，DELETE 与 POST 均可。
pub async fn delete_image(
    Path(filename): Path<String>,
    Extension(store): Extension<Arc<ImageStore>>,
    Extension(locks): Extension<Arc<LockManager>>,
    Extension(policy): Extension<SharedPolicy>,
    Extension(identity): Extension<Identity>,
) -> Response {
    let result: Result<String, ApiError> = async {
        let _guard = locks.lock_file(&filename).await?;
        store.delete(&filename).await?;
        info!(filename, "image deleted");
        Ok(format!("Image {filename} deleted successfully"))
    }
    .await;
    policy.reply(&identity, result).await
}

/// 以附件形式下载图片。
pub async fn download_image(
    Path(filename): Path<String>,
    Extension(store): Extension<Arc<ImageStore>>,
    Extension(policy): Extension<SharedPolicy>,
    Extension(identity): Extension<Identity>,
) -> Response {
    match attachment_response(&store, &filename).await {
        Ok(response) => response,
        Err(err) => policy.reply(&identity, Err(err)).await,
    }
}

async fn attachment_response(store: &ImageStore, filename: &str) -> Result<Response, ApiError> {
    let (file, metadata) = store.open(filename).await?;
    let mime = mime_guess::from_path(filename).first_or_octet_stream();

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("invalid mime type".into()))?,
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
            .map_err(|_| ApiError::BadRequest("Invalid filename".into()))?,
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    if let Ok(modified) = metadata.modified()
        && let Ok(value) = HeaderValue::from_str(&fmt_http_date(modified))
    {
        headers.insert(header::LAST_MODIFIED, value);
    }

    info!(filename, size = metadata.len(), "image download");
    let stream = ReaderStream::new(file);
    Ok((StatusCode::OK, headers, AxumBody::from_stream(stream)).into_response())
}

/// 修改图片：JSON（嵌套结构）或表单（扁平字段）。
pub async fn modify_image(
    Path(filename): Path<String>,
    Extension(store): Extension<Arc<ImageStore>>,
    Extension(locks): Extension<Arc<LockManager>>,
    Extension(policy): Extension<SharedPolicy>,
    Extension(identity): Extension<Identity>,
    req: Request,
) -> Response {
    let result = apply_modification(&store, &locks, &filename, req).await;
    policy.reply(&identity, result).await
}

async fn apply_modification(
    store: &ImageStore,
    locks: &LockManager,
    filename: &str,
    req: Request,
) -> Result<String, ApiError> {
    store.resolve_existing(filename).await?;
    let raw = read_modify_fields(req).await?;
    let plan = ModifyPlan::parse(&raw)?;
    debug!(filename, ?plan, "modify plan accepted");

    let _guard = locks.lock_file(filename).await?;
    let original = store.read(filename).await?;
    let name = filename.to_string();
    let modified = tokio::task::spawn_blocking(move || plan.run(&original, &name))
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))??;
    store.replace(filename, &modified).await?;

    info!(filename, bytes = modified.len(), "image modified");
    Ok(format!("Image {filename} modified successfully"))
}

async fn read_modify_fields(req: Request) -> Result<RawModifyFields, ApiError> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("application/json") {
        let Json(body) = Json::<ModifyJson>::from_request(req, &())
            .await
            .map_err(|err| {
                ApiError::BadRequest(format!("Invalid JSON body: {}", err.body_text()))
            })?;
        Ok(body.into())
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(fields) = Form::<RawModifyFields>::from_request(req, &())
            .await
            .map_err(|err| {
                ApiError::BadRequest(format!("Invalid form body: {}", err.body_text()))
            })?;
        Ok(fields)
    } else {
        Err(ApiError::BadRequest("Modify request must be JSON or form encoded".into()))
    }
}

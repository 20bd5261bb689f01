//! Receipt upload handler

use crate::flash::Flash;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, Multipart, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use receiptflow_common::{
    errors::{AppError, Result},
    metrics::RequestMetrics,
};
use tracing::{debug, error, info, instrument, warn};
use unicode_normalization::UnicodeNormalization;

/// Name of the multipart field carrying the document
const FILE_FIELD: &str = "file";

/// Reduce a client-supplied filename to a safe ASCII name.
///
/// Accents are folded by NFKD decomposition, path separators and whitespace
/// become `_`, anything outside `[A-Za-z0-9._-]` is dropped, and
/// leading/trailing `.`/`_` are stripped.
/// The result may be empty.
pub fn secure_filename(name: &str) -> String {
    let spaced: String = name
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");

    joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect::<String>()
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}

/// Whether the extension of `filename` is in `allowed` (case-insensitive)
pub fn allowed_file(filename: &str, allowed: &[String]) -> bool {
    let Some((_, extension)) = filename.rsplit_once('.') else {
        return false;
    };
    let extension = format!(".{}", extension.to_ascii_lowercase());
    allowed
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(&extension))
}

fn redirect_home(notice: Option<Flash>) -> Response {
    match notice {
        Some(notice) => {
            debug!(notice = notice.code(), "Redirecting with notice");
            (
                [(header::SET_COOKIE, notice.set_cookie())],
                Redirect::to("/"),
            )
                .into_response()
        }
        None => Redirect::to("/").into_response(),
    }
}

fn multipart_error(error: MultipartError, headers: &HeaderMap, limit: usize) -> AppError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        let size = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(limit);
        return AppError::PayloadTooLarge { size, limit };
    }
    AppError::Validation {
        message: error.body_text(),
    }
}

/// First `file` part as (client filename, bytes); filename is empty when absent
async fn read_file_field(multipart: &mut Multipart) -> std::result::Result<Option<(String, Bytes)>, MultipartError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await?;
        return Ok(Some((filename, bytes)));
    }
    Ok(None)
}

/// `POST /upload`
pub async fn upload(State(state): State<AppState>, headers: HeaderMap, multipart: Multipart) -> Response {
    let request_metrics = RequestMetrics::start("POST", "/upload");

    let response = match process_upload(&state, &headers, multipart).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    };

    request_metrics.finish(response.status().as_u16());
    response
}

#[instrument(skip_all)]
async fn process_upload(state: &AppState, headers: &HeaderMap, mut multipart: Multipart) -> Result<Response> {
    let limit = state.config.upload.max_bytes;
    let upload = read_file_field(&mut multipart)
        .await
        .map_err(|e| multipart_error(e, headers, limit))?;

    let Some((raw_name, bytes)) = upload.filter(|(name, _)| !name.is_empty()) else {
        debug!(reason = %AppError::MissingFile, "Nothing to process, redirecting");
        return Ok(redirect_home(None));
    };

    let filename = secure_filename(&raw_name);
    if filename.is_empty() || !allowed_file(&filename, &state.config.upload.allowed_extensions) {
        let rejection = AppError::UnsupportedFileType { filename: raw_name };
        warn!(error = %rejection, "Upload refused");
        return Ok(redirect_home(Some(Flash::UnsupportedFile)));
    }

    match state.pipeline.process(&bytes, &filename).await {
        Ok(outcome) => {
            info!(
                filename = %filename,
                page_id = %outcome.page.id,
                object_id = %outcome.stored.object_id,
                "Receipt uploaded"
            );
            Ok(redirect_home(Some(Flash::Processed)))
        }
        Err(e) => {
            error!(filename = %filename, error = %e, code = e.code().as_code(), "Receipt processing failed");
            Ok(redirect_home(Some(Flash::ProcessingFailed)))
        }
    }
}

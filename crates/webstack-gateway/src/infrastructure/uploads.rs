//! `POST /upload`: stores one multipart file under the uploads directory.
//!
//! Only the field named `file` is used.  The client-supplied file name is
//! reduced to its last path component before it touches the file system, so
//! an upload can never land outside the uploads directory.  An existing file
//! with the same name is overwritten.

use std::path::Path;

use axum::extract::{Multipart, State};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use webstack_core::SessionId;

use crate::infrastructure::http_server::{resolve, AppState, GatewayError};

/// Name of the multipart field carrying the file.
pub const FILE_FIELD: &str = "file";

pub async fn upload_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    multipart: Multipart,
) -> Result<Response, GatewayError> {
    let (jar, session_id) = resolve(&state, jar).await?;
    let outcome = store_upload(&state.config.uploads_dir, multipart, &session_id).await;
    if let Err(e) = &outcome {
        warn!("upload from session {session_id} failed: {e}");
    }
    Ok((jar, outcome).into_response())
}

async fn store_upload(
    dir: &Path,
    mut multipart: Multipart,
    session_id: &SessionId,
) -> Result<String, GatewayError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::Upload(e.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let name = sanitize_file_name(field.file_name().unwrap_or_default())?;
        fs::create_dir_all(dir).await?;
        let path = dir.join(&name);
        let mut out = File::create(&path).await?;

        let mut written = 0usize;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| GatewayError::Upload(e.body_text()))?
        {
            out.write_all(&chunk).await?;
            written += chunk.len();
        }
        out.flush().await?;

        info!(
            "stored upload '{name}' ({written} bytes) from session {session_id} at {}",
            path.display()
        );
        return Ok(format!("File uploaded successfully : {name}"));
    }

    Err(GatewayError::Upload(format!(
        "missing multipart field '{FILE_FIELD}'"
    )))
}

/// Reduces a client-supplied file name to a safe single path component.
///
/// Both `/` and `\` count as separators.  Names that are empty, `.` or `..`
/// after reduction are rejected.
pub fn sanitize_file_name(raw: &str) -> Result<String, GatewayError> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or("").trim();

    if name.is_empty() || name == "." || name == ".." || name.contains('\0') {
        return Err(GatewayError::Upload(format!("invalid file name '{raw}'")));
    }
    Ok(name.to_string())
}

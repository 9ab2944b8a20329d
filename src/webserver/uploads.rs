//! The upload endpoint: validate, spool to disk, enqueue a conversion.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::application::application::Application;
use crate::lsif::reader;
use crate::queue::jobs::JobPayload;

use super::types::{json, ApiResponse, HttpError, Result};

#[derive(Deserialize)]
pub(crate) struct UploadParams {
    pub(crate) repository: String,
    pub(crate) commit: String,
    #[serde(default)]
    pub(crate) root: Option<String>,
    #[serde(rename = "skipValidation", default)]
    pub(crate) skip_validation: bool,
}

#[derive(Serialize)]
pub(crate) struct UploadResponse {
    id: i64,
}

impl ApiResponse for UploadResponse {}

pub(super) fn valid_commit(commit: &str) -> bool {
    commit.len() == 40 && commit.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Roots arrive in whatever shape the client produced; normalize to either
/// the empty string or a `dir/` prefix.
fn normalize_root(root: Option<String>) -> String {
    let trimmed = root
        .unwrap_or_default()
        .trim_matches('/')
        .trim_start_matches("./")
        .to_owned();
    if trimmed.is_empty() {
        trimmed
    } else {
        format!("{}/", trimmed)
    }
}

pub(super) async fn upload(
    State(app): State<Application>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<impl IntoResponse> {
    if params.repository.is_empty() {
        return Err(HttpError::bad_request("repository must be non-empty"));
    }
    if !valid_commit(&params.commit) {
        return Err(HttpError::bad_request(
            "commit must be a 40-character hex string",
        ));
    }
    let root = normalize_root(params.root);

    if !params.skip_validation {
        let payload = body.clone();
        tokio::task::spawn_blocking(move || reader::validate(&payload[..]))
            .await
            .map_err(|err| HttpError::internal(err.into()))?
            .map_err(|err| HttpError::invalid_payload(err.to_string()))?;
    }

    let filename = app.storage.new_upload_path();
    tokio::fs::write(&filename, &body)
        .await
        .map_err(|err| HttpError::internal(err.into()))?;

    // best effort: a missing commit graph only degrades nearest-dump
    // selection, it should not fail the upload
    if let Err(err) = app
        .xrepo
        .discover_and_update_commit(&params.repository, &params.commit, app.git.as_ref())
        .await
    {
        warn!(?err, repository = params.repository, "commit discovery failed");
    }

    let id = app
        .jobs
        .enqueue(
            &JobPayload::Convert {
                repository: params.repository.clone(),
                commit: params.commit.clone(),
                root,
                filename,
            },
            app.config.job_max_attempts,
        )
        .await?;

    info!(
        repository = params.repository,
        commit = params.commit,
        job_id = id,
        bytes = body.len(),
        "upload accepted"
    );
    Ok(json(UploadResponse { id }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_validation_requires_forty_hex_chars() {
        assert!(valid_commit("0123456789abcdef0123456789abcdef01234567"));
        assert!(!valid_commit("0123456789abcdef0123456789abcdef0123456"));
        assert!(!valid_commit("zzzz456789abcdef0123456789abcdef01234567"));
        assert!(!valid_commit(""));
    }

    #[test]
    fn roots_normalize_to_a_directory_prefix() {
        assert_eq!(normalize_root(None), "");
        assert_eq!(normalize_root(Some("".into())), "");
        assert_eq!(normalize_root(Some("/".into())), "");
        assert_eq!(normalize_root(Some("sub/dir".into())), "sub/dir/");
        assert_eq!(normalize_root(Some("/sub/dir/".into())), "sub/dir/");
        assert_eq!(normalize_root(Some("./sub".into())), "sub/");
    }
}

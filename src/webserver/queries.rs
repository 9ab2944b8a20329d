//! The query endpoints: `/exists` and the method-dispatching `/request`.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::application::application::Application;
use crate::backend::QualifiedLocation;
use crate::query::{Hover, Position};

use super::types::{json, ApiResponse, HttpError, Result};
use super::uploads::valid_commit;

#[derive(Deserialize)]
pub(crate) struct RepositoryParams {
    pub(crate) repository: String,
    pub(crate) commit: String,
}

#[derive(Deserialize)]
pub(crate) struct ExistsParams {
    pub(crate) repository: String,
    pub(crate) commit: String,
    pub(crate) file: String,
}

#[derive(Deserialize)]
pub(crate) struct RequestBody {
    pub(crate) path: String,
    pub(crate) position: Position,
    pub(crate) method: String,
}

#[derive(Serialize)]
#[serde(untagged)]
pub(crate) enum RequestResponse {
    Locations(Vec<QualifiedLocation>),
    Hover(Option<Hover>),
}

impl ApiResponse for RequestResponse {}

fn check_repository_params(repository: &str, commit: &str) -> Result<()> {
    if repository.is_empty() {
        return Err(HttpError::bad_request("repository must be non-empty"));
    }
    if !valid_commit(commit) {
        return Err(HttpError::bad_request(
            "commit must be a 40-character hex string",
        ));
    }
    Ok(())
}

pub(super) async fn exists(
    State(app): State<Application>,
    Query(params): Query<ExistsParams>,
) -> Result<Json<bool>> {
    check_repository_params(&params.repository, &params.commit)?;

    let found = app
        .backend()
        .exists(&params.repository, &params.commit, &params.file)
        .await?;
    Ok(Json(found))
}

pub(super) async fn request(
    State(app): State<Application>,
    Query(params): Query<RepositoryParams>,
    Json(body): Json<RequestBody>,
) -> Result<impl IntoResponse> {
    check_repository_params(&params.repository, &params.commit)?;

    let backend = app.backend();
    let deadline = app.config.request_timeout();
    let repository = &params.repository;
    let commit = &params.commit;

    let response = match body.method.as_str() {
        "definitions" => {
            let locations = tokio::time::timeout(
                deadline,
                backend.definitions(repository, commit, &body.path, body.position),
            )
            .await
            .map_err(|_| HttpError::internal(anyhow::anyhow!("request timed out")))??;
            RequestResponse::Locations(locations.unwrap_or_default())
        }
        "references" => {
            let locations = tokio::time::timeout(
                deadline,
                backend.references(repository, commit, &body.path, body.position),
            )
            .await
            .map_err(|_| HttpError::internal(anyhow::anyhow!("request timed out")))??;
            RequestResponse::Locations(locations.unwrap_or_default())
        }
        "hover" => {
            let hover = tokio::time::timeout(
                deadline,
                backend.hover(repository, commit, &body.path, body.position),
            )
            .await
            .map_err(|_| HttpError::internal(anyhow::anyhow!("request timed out")))??;
            RequestResponse::Hover(hover.flatten())
        }
        other => {
            return Err(HttpError::invalid_payload(format!(
                "unsupported method {:?}",
                other
            )))
        }
    };

    Ok(json(response))
}

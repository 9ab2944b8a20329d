use std::borrow::Cow;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::Json;

pub(crate) trait ApiResponse: erased_serde::Serialize {}
erased_serde::serialize_trait_object!(ApiResponse);

/// Every endpoint exposes a Response type
#[derive(serde::Serialize)]
#[serde(untagged)]
#[non_exhaustive]
pub(crate) enum Response<'a> {
    Ok(Box<dyn erased_serde::Serialize + Send + Sync + 'static>),
    Error(EndpointError<'a>),
}

impl<T: ApiResponse + Send + Sync + 'static> From<T> for Response<'static> {
    fn from(value: T) -> Self {
        Self::Ok(Box::new(value))
    }
}

/// The response upon encountering an error
#[derive(serde::Serialize, PartialEq, Eq, Debug)]
pub(crate) struct EndpointError<'a> {
    /// The kind of this error
    kind: ErrorKind,

    /// A context aware message describing the error
    message: Cow<'a, str>,
}

/// The kind of an error
#[derive(serde::Serialize, PartialEq, Eq, Debug, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ErrorKind {
    User,
    InvalidPayload,
    Internal,
}

pub(crate) fn json<'a, T>(val: T) -> Json<Response<'a>>
where
    Response<'a>: From<T>,
{
    Json(Response::from(val))
}

/// Handler-level error carrying the HTTP status it maps to. Full details
/// are logged where the error arises; the client sees a short message.
#[derive(Debug)]
pub(crate) struct HttpError {
    status: StatusCode,
    kind: ErrorKind,
    message: String,
}

impl HttpError {
    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        HttpError {
            status: StatusCode::BAD_REQUEST,
            kind: ErrorKind::User,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_payload(message: impl Into<String>) -> Self {
        HttpError {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            kind: ErrorKind::InvalidPayload,
            message: message.into(),
        }
    }

    pub(crate) fn internal(err: anyhow::Error) -> Self {
        tracing::error!(?err, "request failed");
        HttpError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: ErrorKind::Internal,
            message: "internal error".into(),
        }
    }
}

impl From<anyhow::Error> for HttpError {
    fn from(err: anyhow::Error) -> Self {
        HttpError::internal(err)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> AxumResponse {
        let body = Json(Response::Error(EndpointError {
            kind: self.kind,
            message: Cow::Owned(self.message),
        }));
        (self.status, body).into_response()
    }
}

pub(crate) type Result<T> = std::result::Result<T, HttpError>;

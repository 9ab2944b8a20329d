//! HTTP surface of the service: uploads, code-intelligence queries, health
//! and metrics.

pub mod health;
pub mod queries;
pub mod types;
pub mod uploads;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::application::application::Application;

pub type Router<S = Application> = axum::Router<S>;

pub fn router(app: Application) -> axum::Router {
    Router::new()
        .route("/upload", post(uploads::upload))
        .route("/exists", post(queries::exists))
        .route("/request", post(queries::request))
        .route("/healthz", get(health::healthz))
        .route("/ping", get(health::ping))
        .route("/metrics", get(health::metrics))
        .with_state(app)
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::new())
}

/// Health and metrics only; the worker serves this on its metrics port.
pub fn ops_router(app: Application) -> axum::Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/ping", get(health::ping))
        .route("/metrics", get(health::metrics))
        .with_state(app)
}

pub async fn start_ops(app: Application, port: u16) -> Result<()> {
    let bind = SocketAddr::new(
        app.config.host.parse().context("parsing bind host")?,
        port,
    );
    info!(%bind, "ops server listening");

    axum::Server::bind(&bind)
        .serve(ops_router(app).into_make_service())
        .await?;

    Ok(())
}

pub async fn start(app: Application) -> Result<()> {
    let bind = SocketAddr::new(
        app.config.host.parse().context("parsing bind host")?,
        app.config.http_port,
    );
    info!(%bind, "http server listening");

    axum::Server::bind(&bind)
        .serve(router(app).into_make_service())
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::application::config::configuration::Configuration;
    use crate::lsif::testing::{gzip_lines, interface_scenario};
    use crate::queue::worker::Worker;
    use crate::xrepo::git::StaticGitHost;

    const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

    async fn app(dir: &tempfile::TempDir) -> Application {
        let config = Configuration::for_tests(dir.path().join("storage"));
        Application::initialize_with_git_host(config, Arc::new(StaticGitHost::default()))
            .await
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn upload_request(commit: &str, bytes: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/upload?repository=test&commit={}", commit))
            .body(Body::from(bytes))
            .unwrap()
    }

    fn query_request(path: &str, method: &str, line: u32, character: u32) -> Request<Body> {
        let body = serde_json::json!({
            "path": path,
            "position": { "line": line, "character": character },
            "method": method,
        });
        Request::builder()
            .method("POST")
            .uri(format!("/request?repository=test&commit={}", COMMIT))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoints_answer_ok() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(app(&dir).await);

        for path in ["/healthz", "/ping"] {
            let response = router
                .clone()
                .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn uploads_with_bad_parameters_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(app(&dir).await);

        let response = router
            .clone()
            .oneshot(upload_request("not-a-commit", interface_scenario()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/upload?repository=&commit={}", COMMIT))
                    .body(Body::from(interface_scenario()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_uploads_get_422_and_leave_no_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let application = app(&dir).await;
        let router = router(application.clone());

        let bad = gzip_lines(&[r#"{"id":1,"type":"vertex","label":"document","uri":"file:///r/a.ts"}"#]);
        let response = router.oneshot(upload_request(COMMIT, bad)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        assert_eq!(application.jobs.queued_count().await.unwrap(), 0);
        assert!(std::fs::read_dir(application.storage.uploads_dir())
            .unwrap()
            .next()
            .is_none());
    }

    #[tokio::test]
    async fn unsupported_methods_get_422() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(app(&dir).await);

        let response = router
            .oneshot(query_request("src/index.ts", "implementations", 0, 0))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn upload_then_query_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let application = app(&dir).await;
        let router = router(application.clone());

        // accept the upload
        let response = router
            .clone()
            .oneshot(upload_request(COMMIT, interface_scenario()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(application.jobs.queued_count().await.unwrap(), 1);

        // convert it
        let worker = Worker::new(application.clone());
        let job = application.jobs.claim().await.unwrap().unwrap();
        worker.execute_for_tests(job).await;

        // exists: positive and negative
        for (file, expected) in [("src/index.ts", true), ("src/missing.ts", false)] {
            let response = router
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri(format!(
                            "/exists?repository=test&commit={}&file={}",
                            COMMIT, file
                        ))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_json(response).await, Value::Bool(expected));
        }

        // references from every occurrence return all five locations
        for (line, character) in [(1, 5), (5, 5), (9, 5), (13, 3), (16, 3)] {
            let response = router
                .clone()
                .oneshot(query_request("src/index.ts", "references", line, character))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let locations = body_json(response).await;
            assert_eq!(locations.as_array().unwrap().len(), 5);
        }

        // hover carries the signature
        let response = router
            .clone()
            .oneshot(query_request("src/index.ts", "hover", 1, 5))
            .await
            .unwrap();
        let hover = body_json(response).await;
        assert!(hover["contents"].as_str().unwrap().contains("foo(): void"));

        // a commit without dumps is simply not indexed
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!(
                        "/request?repository=unknown&commit={}",
                        "ffffffffffffffffffffffffffffffffffffffff"
                    ))
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "path": "src/index.ts",
                            "position": { "line": 1, "character": 5 },
                            "method": "references",
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }
}

use axum::extract::State;

use crate::application::application::Application;

pub(super) async fn healthz() -> &'static str {
    "ok"
}

pub(super) async fn ping() -> &'static str {
    "ok"
}

pub(super) async fn metrics(State(app): State<Application>) -> String {
    app.metrics.export()
}

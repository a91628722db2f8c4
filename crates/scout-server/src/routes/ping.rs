use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};

// Liveness probe for the hosting runtime
async fn ping() -> Json<Value> {
    Json(json!({ "status": "Healthy" }))
}

pub fn routes() -> Router {
    Router::new().route("/ping", get(ping))
}

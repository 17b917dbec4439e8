#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Method, Request, Response},
};
use council_storage::{
    db, routes,
    services::credentials::StaticCredentialProvider,
    state::{AppState, StateOptions},
};
use http_body_util::BodyExt;
use std::{path::PathBuf, sync::Arc};
use tempfile::TempDir;
use tower::ServiceExt;

pub const BUCKET: &str = "council-test";
pub const BASE_URL: &str = "http://localhost:3000";

pub struct TestEnv {
    pub state: AppState,
    pub app: Router,
    pub uploads_dir: PathBuf,
    _dir: TempDir,
}

pub async fn setup() -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let uploads_dir = dir.path().join("uploads");
    std::fs::create_dir_all(&uploads_dir).unwrap();
    let pool = db::connect_in_memory().await.unwrap();
    let state = AppState::new(
        Arc::new(pool),
        Arc::new(StaticCredentialProvider::new("test-signing-secret")),
        StateOptions {
            bucket: BUCKET.into(),
            storage_dir: dir.path().join("objects"),
            uploads_dir: uploads_dir.clone(),
            public_base_url: BASE_URL.into(),
            upload_ttl_secs: 900,
        },
    );
    let app = routes::routes::routes().with_state(state.clone());
    TestEnv {
        state,
        app,
        uploads_dir,
        _dir: dir,
    }
}

impl TestEnv {
    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(req).await.unwrap()
    }

    pub async fn json(&self, req: Request<Body>) -> (u16, serde_json::Value) {
        let resp = self.send(req).await;
        let status = resp.status().as_u16();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}

pub fn request(method: Method, uri: &str) -> axum::http::request::Builder {
    Request::builder().method(method).uri(uri)
}

pub fn json_body(value: serde_json::Value) -> Body {
    Body::from(serde_json::to_vec(&value).unwrap())
}

/// Path and query of an absolute URL issued against [`BASE_URL`].
pub fn local_uri(url: &str) -> &str {
    url.strip_prefix(BASE_URL).unwrap()
}

pub async fn body_bytes(resp: Response<Body>) -> bytes::Bytes {
    resp.into_body().collect().await.unwrap().to_bytes()
}

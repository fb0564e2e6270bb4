//! Test helper utilities for API testing

#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use bulk_jobs::app_state::AppState;
use bulk_jobs::models::api::JobStatusView;
use bulk_jobs::models::job::JobStatus;
use bulk_jobs::routes;
use bulk_jobs::services::step::HttpStepExecutor;
use bulk_jobs::services::store::MemoryJobStore;

/// Requests seen by the fake downstream API, e.g. `POST members a@x.com`.
pub type Calls = Arc<Mutex<Vec<String>>>;

/// A running server plus the fake downstream API it talks to.
pub struct TestApp {
    pub base_url: String,
    pub client: reqwest::Client,
    pub calls: Calls,
    pub state: AppState,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub async fn post_json(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .expect("Request failed")
    }

    pub async fn post_empty(&self, path: &str) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .send()
            .await
            .expect("Request failed")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("Request failed")
    }

    pub async fn delete(&self, path: &str) -> reqwest::Response {
        self.client
            .delete(self.url(path))
            .send()
            .await
            .expect("Request failed")
    }

    pub async fn status(&self, path: &str) -> JobStatusView {
        read_json(self.get(path).await, StatusCode::OK).await
    }

    /// Poll a job until it reaches one of `wanted` (with timeout)
    pub async fn wait_for_status(&self, path: &str, wanted: &[JobStatus]) -> JobStatusView {
        for _ in 0..100 {
            let view = self.status(path).await;
            if wanted.contains(&view.status) {
                return view;
            }
            sleep(Duration::from_millis(50)).await;
        }
        panic!("Job at {path} never reached {wanted:?}");
    }
}

/// Assert the status code and decode the body.
pub async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
    expected: StatusCode,
) -> T {
    let status = response.status();
    let body = response.text().await.expect("Failed to read body");
    assert_eq!(status.as_u16(), expected.as_u16(), "Unexpected status, body: {body}");
    serde_json::from_str(&body).unwrap_or_else(|e| panic!("Bad JSON ({e}): {body}"))
}

/// Assert an `{error, message}` body with the given status and code.
pub async fn assert_error(response: reqwest::Response, expected: StatusCode, code: &str) {
    let body: serde_json::Value = read_json(response, expected).await;
    assert_eq!(body["error"], code, "Unexpected error body: {body}");
    assert!(body["message"].is_string());
}

/// Start the fake downstream API and the service under test on loopback ports.
pub async fn spawn_app() -> TestApp {
    let (api_base, calls) = spawn_downstream().await;
    let executor = HttpStepExecutor::new(&api_base, "test-key", Duration::from_secs(2))
        .expect("Failed to build executor");

    let state = AppState::new(Arc::new(MemoryJobStore::new()), Arc::new(executor), 0);
    let app = routes::router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        base_url: format!("http://{addr}"),
        client: reqwest::Client::new(),
        calls,
        state,
    }
}

/// Member/contact API stand-in. Emails starting with `dup` are already
/// registered; emails starting with `bad` are rejected.
async fn spawn_downstream() -> (String, Calls) {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/v1/members", post(register))
        .route("/v1/members/{id}", delete(delete_member))
        .route("/v1/contacts/{id}", delete(delete_contact))
        .with_state(calls.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/v1/"), calls)
}

async fn register(State(calls): State<Calls>, Json(body): Json<serde_json::Value>) -> StatusCode {
    let email = body["email"].as_str().unwrap_or_default().to_string();
    calls.lock().unwrap().push(format!("POST members {email}"));
    if email.starts_with("dup") {
        StatusCode::CONFLICT
    } else if email.starts_with("bad") {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::CREATED
    }
}

async fn delete_member(State(calls): State<Calls>, Path(id): Path<String>) -> StatusCode {
    calls.lock().unwrap().push(format!("DELETE members {id}"));
    if id.starts_with("gone") {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::NO_CONTENT
    }
}

async fn delete_contact(State(calls): State<Calls>, Path(id): Path<String>) -> StatusCode {
    calls.lock().unwrap().push(format!("DELETE contacts {id}"));
    StatusCode::NO_CONTENT
}

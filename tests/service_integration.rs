//! HTTP API tests against an in-memory router. Network access is replaced by a
//! fake web client so crawls run offline.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use boost_harness::config::{Config, EnvOverrides};
use boost_harness::errors::AcquireError;
use boost_harness::gbdt::GbdtTrainer;
use boost_harness::server::router;
use boost_harness::service::ModelService;
use boost_harness::store::ModelStore;
use boost_harness::train::InProcessExecutor;
use boost_harness::web::WebClient;

struct FakeSite {
    pages: HashMap<String, String>,
}

impl FakeSite {
    fn docs() -> Self {
        let mut pages = HashMap::new();
        pages.insert(
            "https://docs.example.com/".to_string(),
            r#"<h1>Boosted trees</h1><p>Gradient boosting builds shallow trees.</p>
               <a href="/install">install</a> <a href="/tuning">tuning</a>
               <a href="https://elsewhere.org/">elsewhere</a>"#
                .to_string(),
        );
        pages.insert(
            "https://docs.example.com/install".to_string(),
            "<p>Install the binary and write a projects file.</p>".to_string(),
        );
        pages.insert(
            "https://docs.example.com/tuning".to_string(),
            "<p>Tuning depth and learning rate changes model quality.</p>".to_string(),
        );
        Self { pages }
    }
}

impl WebClient for FakeSite {
    fn fetch_page(&self, url: &str) -> Result<String, AcquireError> {
        self.pages.get(url).cloned().ok_or_else(|| AcquireError::Status {
            url: url.to_string(),
            status: 404,
        })
    }

    fn download(&self, url: &str, _dest: &Path) -> Result<u64, AcquireError> {
        Err(AcquireError::Status {
            url: url.to_string(),
            status: 404,
        })
    }

    fn html_to_text(&self, markup: &str) -> Result<String, AcquireError> {
        let mut text = String::new();
        let mut in_tag = false;
        for c in markup.chars() {
            match c {
                '<' => in_tag = true,
                '>' => {
                    in_tag = false;
                    text.push(' ');
                }
                c if !in_tag => text.push(c),
                _ => {}
            }
        }
        Ok(text)
    }
}

const PROJECTS: &str = r#"
default_project = "default"

[projects.default]
description = "Default project"
model_name = "cancer"
data_source = "fixed-sample"

[projects.docs]
description = "Documentation crawl"
model_name = "docs"
data_source = "crawl"
source_url = "https://docs.example.com/"

[projects.docs.parameters]
max_pages = 10
max_features = 50
"#;

fn setup() -> (TempDir, axum::Router) {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::minimal();
    config.registry.path = tmp.path().join("projects.toml");
    config.store.root = tmp.path().join("models");
    std::fs::write(&config.registry.path, PROJECTS).unwrap();

    let executor = InProcessExecutor::new(
        Arc::new(FakeSite::docs()),
        config.acquire.clone(),
        Arc::new(GbdtTrainer),
        ModelStore::new(&config.store.root),
        4,
    );
    let service =
        ModelService::new(&config, &EnvOverrides::default(), Box::new(executor)).unwrap();
    (tmp, router(service, Duration::from_secs(30)))
}

async fn call(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_version() {
    let (_tmp, app) = setup();
    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn lists_projects_and_current_bundle() {
    let (_tmp, app) = setup();

    let (status, body) = call(&app, "GET", "/projects", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["default", "docs"]);
    assert_eq!(body[0]["is_current"], true);

    let (status, body) = call(&app, "GET", "/projects/current", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "default");
    assert_eq!(body["data_source"], "fixed-sample");
}

#[tokio::test]
async fn predict_without_model_is_unavailable() {
    let (_tmp, app) = setup();

    let (status, body) = call(&app, "GET", "/models/current", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model_tag"], "cancer:latest");
    assert_eq!(body["loaded"], false);

    let (status, body) = call(&app, "POST", "/predict", Some(json!({ "data": [[1.0, 2.0, 3.0, 4.0]] }))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "model_unavailable");
}

#[tokio::test]
async fn train_on_sample_then_predict() {
    let (_tmp, app) = setup();

    let (status, body) = call(&app, "POST", "/train", Some(json!({ "max_depth": 2 }))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["model_tag"], "cancer:latest");
    assert_eq!(body["model"]["n_features"], 4);

    let (status, body) = call(
        &app,
        "POST",
        "/predict",
        Some(json!({ "data": [[1.0, 2.0, 3.0, 4.0], [30.0, 30.0, 30.0, 30.0]] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let predictions = body["predictions"].as_array().unwrap();
    assert_eq!(predictions.len(), 2);
    for p in predictions {
        let sum = p[0].as_f64().unwrap() + p[1].as_f64().unwrap();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    let (status, body) = call(&app, "POST", "/predict", Some(json!({ "data": [[1.0, 2.0, 3.0, 4.0, 5.0]] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = call(&app, "GET", "/models", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["name"], "cancer");
}

#[tokio::test]
async fn train_crawl_project_and_save_settings() {
    let (tmp, app) = setup();

    let (status, body) = call(
        &app,
        "POST",
        "/train",
        Some(json!({ "project_name": "docs", "max_depth": 2, "save_to_config": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["project"], "docs");
    assert_eq!(body["model_tag"], "docs:latest");

    let (_, body) = call(&app, "GET", "/models/current", None).await;
    assert_eq!(body["model_name"], "docs");
    assert_eq!(body["loaded"], true);

    let saved = std::fs::read_to_string(tmp.path().join("projects.toml")).unwrap();
    assert!(saved.contains("max_depth = 2"));
    assert!(saved.contains("max_features = 50"));
}

#[tokio::test]
async fn invalid_training_request_is_rejected() {
    let (tmp, app) = setup();

    let (status, body) = call(
        &app,
        "POST",
        "/train",
        Some(json!({ "data_source": "crawl", "source_url": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("URL is required"));
    assert!(!tmp.path().join("models").exists());

    let (status, body) = call(&app, "POST", "/train", Some(json!({ "project_name": "ghost" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("Project not found: ghost"));
}

#[tokio::test]
async fn failed_acquisition_is_a_server_error() {
    let (_tmp, app) = setup();

    let (status, body) = call(
        &app,
        "POST",
        "/train",
        Some(json!({ "data_source": "web-page", "source_url": "https://docs.example.com/missing" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn switching_projects_and_models() {
    let (_tmp, app) = setup();

    let (status, _) = call(&app, "POST", "/train", Some(json!({ "model_name": "first" }))).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&app, "POST", "/projects/switch", Some(json!({ "project_name": "nope" }))).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["project"], "default");

    // The docs project has no trained model yet.
    let (_, body) = call(&app, "POST", "/projects/switch", Some(json!({ "project_name": "docs" }))).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["model_tag"], "first:latest");

    let (_, body) = call(&app, "POST", "/models/switch", Some(json!({ "model_tag": "bad tag!" }))).await;
    assert_eq!(body["success"], false);

    let (_, body) = call(&app, "POST", "/models/switch", Some(json!({ "model_tag": "first" }))).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["model_tag"], "first:latest");
}

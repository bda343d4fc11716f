mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use common::{curation_harness, Harness};
use holdingpen::{create_router, runtime::lock::ObjectLocks, service::Collaborators};
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

async fn app() -> (Router, Harness) {
    let h = curation_harness(Collaborators::offline()).await;
    (create_router(h.holdingpen.clone()), h)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| json!(String::from_utf8_lossy(&bytes)))
    };
    (status, value)
}

fn article() -> Value {
    json!({
        "workflow_kind": "article",
        "data": {
            "titles": [{ "title": "Search for dark photons" }],
            "document_type": ["article"],
        }
    })
}

#[tokio::test]
async fn health_check_answers_ok() {
    let (app, _h) = app().await;

    let (status, body) = send(&app, "GET", "/healthz", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("ok"));
}

#[tokio::test]
async fn submit_render_and_resolve_over_http() {
    let (app, h) = app().await;

    let (status, body) = send(&app, "POST", "/api/objects?dispatch=inline", Some(article())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["continuation"]["outcome"], "ran");
    assert_eq!(body["continuation"]["status"], "HALTED");
    let id = body["object"]["id"].as_i64().unwrap();

    let (status, body) = send(&app, "GET", &format!("/api/objects/{}/action", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action"], "hep_approval");
    assert_eq!(body["view_model"]["title"], "Search for dark photons");

    let stale = json!({
        "action": "merge_approval",
        "user_id": "curator@example.org",
        "decision_value": "merge",
    });
    let (status, body) = send(&app, "POST", &format!("/api/objects/{}/resolve", id), Some(stale)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().starts_with("stale action"));

    let resolve = json!({
        "action": "hep_approval",
        "user_id": "curator@example.org",
        "decision_value": "reject",
        "reason": "not HEP",
    });
    let (status, body) = send(&app, "POST", &format!("/api/objects/{}/resolve", id), Some(resolve)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["continuation"]["outcome"], "queued");

    let _workers = h.holdingpen.scheduler.start();
    h.idle().await;

    let (status, body) = send(&app, "GET", &format!("/api/objects/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "COMPLETED");

    let (status, body) = send(&app, "GET", &format!("/api/objects/{}/audit", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entries"][0]["human_action"], "reject");
}

#[tokio::test]
async fn lists_objects_by_status() {
    let (app, _h) = app().await;
    send(&app, "POST", "/api/objects?dispatch=inline", Some(article())).await;
    send(
        &app,
        "POST",
        "/api/objects?dispatch=inline",
        Some(json!({ "workflow_kind": "article", "data": {} })),
    )
    .await;

    let (status, body) = send(&app, "GET", "/api/objects?status=error", None).await;
    assert_eq!(status, StatusCode::OK);
    let objects = body["objects"].as_array().unwrap();
    assert_eq!(objects.len(), 1);
    assert!(objects[0]["extra_data"]["error_message"]
        .as_str()
        .unwrap()
        .starts_with("validation failed"));

    let (status, body) = send(&app, "GET", "/api/objects", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["objects"].as_array().unwrap().len(), 2);

    let (status, _) = send(&app, "GET", "/api/objects?status=PAUSED", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn error_responses_map_to_status_codes() {
    let (app, _h) = app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/objects",
        Some(json!({ "workflow_kind": "thesis", "data": {} })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unknown workflow kind 'thesis'");

    let (status, _) = send(&app, "GET", "/api/objects/42", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/api/objects/42/action", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", "/api/objects/42/restart", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        "POST",
        "/callback/workflows/upload",
        Some(json!({ "nonce": 42, "results": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn restart_defaults_to_the_current_task() {
    let (app, _h) = app().await;
    let (_, body) = send(&app, "POST", "/api/objects?dispatch=inline", Some(article())).await;
    let id = body["object"]["id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/objects/{}/restart", id),
        Some(json!({ "dispatch": "inline" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "HALTED");
    assert_eq!(body["steps_executed"], json!(["halt_for_approval"]));

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/objects/{}/restart", id),
        Some(json!({ "restart": "from_beginning", "dispatch": "inline" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["steps_executed"],
        json!([
            "normalize_record",
            "classify_relevance",
            "check_blocking_duplicates",
            "halt_for_approval"
        ])
    );
}

#[tokio::test]
async fn collector_reports_unknown_records() {
    let (app, _h) = app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/callback/workflows/collector",
        Some(json!({ "record_ids": [5, 6] })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resumed"], json!([]));
    assert_eq!(body["recorded"], json!([]));
    assert_eq!(body["deferred"], json!([]));
    assert_eq!(body["unknown"], json!([5, 6]));
}

#[tokio::test]
async fn upload_callback_answers_conflict_or_accepted() {
    let (app, h) = app().await;
    let (_, body) = send(&app, "POST", "/api/objects?dispatch=inline", Some(article())).await;
    let id = body["object"]["id"].as_i64().unwrap();
    let upload = json!({ "nonce": id, "results": [{ "success": true, "recid": 1234 }] });

    let (status, body) = send(&app, "POST", "/callback/workflows/upload", Some(upload.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().starts_with("stale callback"));

    let locks = ObjectLocks::new(h.pool.clone(), Duration::from_secs(60));
    let guard = locks.try_acquire(id).await.unwrap().unwrap();
    let (status, body) = send(&app, "POST", "/callback/workflows/upload", Some(upload)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, json!({ "outcome": "deferred", "object_id": id }));

    locks.release(guard).await.unwrap();
    h.idle().await;
    assert_eq!(h.object(id).await.extra_data.recid, None);
}

#[tokio::test]
async fn diagnostics_lists_blocking_chains() {
    let (app, _h) = app().await;
    let duplicate = json!({
        "workflow_kind": "article",
        "data": {
            "titles": [{ "title": "Search for dark photons" }],
            "document_type": ["article"],
            "arxiv_eprints": [{ "value": "2101.00009" }],
        }
    });
    let (_, first) = send(&app, "POST", "/api/objects?dispatch=inline", Some(duplicate.clone())).await;
    let (_, second) = send(&app, "POST", "/api/objects?dispatch=inline", Some(duplicate)).await;

    let (status, body) = send(&app, "GET", "/api/diagnostics/error-chains", None).await;

    assert_eq!(status, StatusCode::OK);
    let chains = body["chains"].as_array().unwrap();
    assert_eq!(chains.len(), 1);
    assert_eq!(
        chains[0]["chain"],
        json!([second["object"]["id"], first["object"]["id"]])
    );
    assert_eq!(chains[0]["root"]["kind"], "object");
    assert_eq!(chains[0]["root"]["status"], "HALTED");
}

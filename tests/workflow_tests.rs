mod common;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use serde_json::{json, Value};

use atlas_api::middleware::auth::Role;
use atlas_api::usage::SCAN_REQUESTS_STREAM;
use atlas_api::ApiConfig;
use common::{eventually, tenant, RequestExt, TestApp};

fn proposal_body() -> Value {
    json!({
        "graph_id": "g-1",
        "plan_id": "plan-42",
        "title": "Parallelize test jobs",
        "author": "atlas-bot",
        "suggestion_count": 3
    })
}

#[tokio::test]
async fn test_proposal_lifecycle() {
    let app = TestApp::new();
    let auditor = app.auth(Role::Auditor);
    let admin = app.auth(Role::Admin);

    let res = app
        .server
        .post("/api/v1/proposals")
        .with(auditor.clone())
        .json(&proposal_body())
        .await;
    res.assert_status(StatusCode::CREATED);
    let created: Value = res.json();
    assert_eq!(created["data"]["status"], "draft");
    assert_eq!(created["data"]["comments"], json!([]));
    let id = created["data"]["id"].as_str().unwrap().to_string();
    let path = format!("/api/v1/proposals/{id}");

    // draft -> approved is not a valid step
    let res = app
        .server
        .patch(&path)
        .with(admin.clone())
        .json(&json!({"status": "approved"}))
        .await;
    res.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = res.json();
    assert_eq!(body["error"]["message"], "Cannot transition from 'draft' to 'approved'");

    app.server
        .patch(&path)
        .with(auditor.clone())
        .json(&json!({"status": "pending", "comment": "Ready for review"}))
        .await
        .assert_status_ok();

    // Auditors submit but cannot decide
    app.server
        .patch(&path)
        .with(auditor.clone())
        .json(&json!({"status": "approved"}))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let body: Value = app
        .server
        .patch(&path)
        .with(admin.clone())
        .json(&json!({"status": "approved", "reviewer": "maya", "comment": "Ship it"}))
        .await
        .json();
    let proposal = &body["data"];
    assert_eq!(proposal["status"], "approved");
    assert_eq!(proposal["comments"][0]["author"], "system");
    assert_eq!(proposal["comments"][1]["author"], "maya");
    assert_ne!(proposal["updated_at"], proposal["created_at"]);

    let body: Value = app.server.get(&path).with(app.auth(Role::Viewer)).await.json();
    assert_eq!(body["data"]["status"], "approved");
}

#[tokio::test]
async fn test_proposal_listing_and_lookup() {
    let app = TestApp::new();
    let auditor = app.auth(Role::Auditor);

    let mut ids = Vec::new();
    for _ in 0..3 {
        let body: Value = app
            .server
            .post("/api/v1/proposals")
            .with(auditor.clone())
            .json(&proposal_body())
            .await
            .json();
        ids.push(body["data"]["id"].as_str().unwrap().to_string());
    }
    app.server
        .patch(&format!("/api/v1/proposals/{}", ids[1]))
        .with(auditor.clone())
        .json(&json!({"status": "pending"}))
        .await
        .assert_status_ok();

    let body: Value = app.server.get("/api/v1/proposals").with(auditor.clone()).await.json();
    let all = body["data"].as_array().unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0]["id"], ids[0].as_str());

    let body: Value = app
        .server
        .get("/api/v1/proposals")
        .add_query_param("status", "pending")
        .with(auditor.clone())
        .await
        .json();
    let pending = body["data"].as_array().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["id"], ids[1].as_str());

    let body: Value = app
        .server
        .get("/api/v1/proposals")
        .add_query_param("status", "merged")
        .with(auditor.clone())
        .await
        .json();
    assert_eq!(body["data"], json!([]));

    let res = app
        .server
        .get(&format!("/api/v1/proposals/{}", uuid::Uuid::new_v4()))
        .with(auditor.clone())
        .await;
    res.assert_status(StatusCode::NOT_FOUND);
    let body: Value = res.json();
    assert_eq!(body["error"]["message"], "Proposal not found");

    // Viewers read but cannot create
    app.server
        .post("/api/v1/proposals")
        .with(app.auth(Role::Viewer))
        .json(&proposal_body())
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let app = TestApp::new();
    let admin = app.auth(Role::Admin);

    let res = app.server.get("/api/v1/proposals/does-not-exist").with(admin.clone()).await;
    res.assert_status(StatusCode::NOT_FOUND);
    let body: Value = res.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["message"], "Proposal not found");

    app.server
        .patch("/api/v1/proposals/does-not-exist")
        .with(admin.clone())
        .json(&json!({"status": "pending"}))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let res = app.server.delete("/api/v1/notifications/rule-7").with(admin.clone()).await;
    res.assert_status(StatusCode::NOT_FOUND);
    let body: Value = res.json();
    assert_eq!(body["error"]["message"], "Notification rule not found");

    app.server
        .delete("/api/v1/api-keys/key-7")
        .with(admin)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_requests_use_envelope() {
    let app = TestApp::new();
    let auditor = app.auth(Role::Auditor);

    let res = app
        .server
        .post("/api/v1/proposals")
        .with(auditor.clone())
        .json(&json!({"graph_id": "g"}))
        .await;
    res.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = res.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "validation_error");
    assert!(body["error"]["message"].as_str().unwrap().contains("plan_id"));

    let res = app
        .server
        .post("/api/v1/proposals")
        .with(auditor.clone())
        .text("{not json")
        .content_type("application/json")
        .await;
    res.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = res.json();
    assert_eq!(body["error"]["code"], "bad_request");

    let res = app
        .server
        .get("/api/v1/webhooks/events")
        .add_query_param("limit", "lots")
        .with(app.auth(Role::Admin))
        .await;
    res.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = res.json();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_trends() {
    let app = TestApp::new();
    let auditor = app.auth(Role::Auditor);

    let res = app.server.get("/api/v1/trends/backend-ci").with(auditor.clone()).await;
    res.assert_status(StatusCode::NOT_FOUND);
    let body: Value = res.json();
    assert_eq!(body["error"]["message"], "No snapshots for 'backend-ci'");

    let snapshots = [(60.0, 40.0, 50.0), (55.0, 45.0, 62.5)];
    for (complexity, fragility, maturity) in snapshots {
        app.server
            .post("/api/v1/snapshots")
            .with(auditor.clone())
            .json(&json!({
                "graph_name": "backend-ci",
                "complexity_score": complexity,
                "fragility_score": fragility,
                "maturity_score": maturity,
                "finding_count": 4
            }))
            .await
            .assert_status(StatusCode::CREATED);
    }

    let body: Value = app
        .server
        .get("/api/v1/trends/backend-ci")
        .with(app.auth(Role::Viewer))
        .await
        .json();
    let report = &body["data"];
    assert_eq!(report["total_snapshots"], 2);
    assert_eq!(report["snapshots"].as_array().unwrap().len(), 2);

    let trends = report["trends"].as_array().unwrap();
    assert_eq!(trends[0]["metric"], "complexity");
    assert_eq!(trends[0]["delta"], -5.0);
    assert_eq!(trends[0]["direction"], "improved");
    assert_eq!(trends[1]["direction"], "regressed");
    assert_eq!(trends[2]["metric"], "maturity");
    assert_eq!(trends[2]["delta"], 12.5);
    assert_eq!(trends[2]["direction"], "improved");
}

#[tokio::test]
async fn test_snapshot_triggers_notification_rule() {
    let app = TestApp::new();
    let admin = app.auth(Role::Admin);

    let res = app
        .server
        .post("/api/v1/notifications")
        .with(admin.clone())
        .json(&json!({
            "graph_name": "backend-ci",
            "target": "https://hooks.example.com/atlas",
            "thresholds": {"fragility_max": 50.0},
            "secret": "s3cret"
        }))
        .await;
    res.assert_status(StatusCode::CREATED);
    let rule: Value = res.json();
    assert_eq!(rule["data"]["enabled"], true);
    assert!(rule["data"].get("secret").is_none());
    let rule_id = rule["data"]["id"].as_str().unwrap().to_string();

    for fragility in [20.0, 80.0] {
        app.server
            .post("/api/v1/snapshots")
            .with(admin.clone())
            .json(&json!({"graph_name": "backend-ci", "fragility_score": fragility}))
            .await
            .assert_status(StatusCode::CREATED);
    }
    assert_eq!(app.state.notifications.pending(), 1);

    let body: Value = app.server.get("/api/v1/notifications").with(admin.clone()).await.json();
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    app.server
        .delete(&format!("/api/v1/notifications/{rule_id}"))
        .with(admin.clone())
        .await
        .assert_status_ok();
    app.server
        .delete(&format!("/api/v1/notifications/{rule_id}"))
        .with(admin.clone())
        .await
        .assert_status(StatusCode::NOT_FOUND);

    app.server
        .post("/api/v1/notifications")
        .with(admin)
        .json(&json!({"graph_name": "backend-ci", "target": "ftp://example.com"}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_github_webhook_recorded() {
    let mut app = TestApp::new();

    let res = app
        .server
        .post("/api/v1/webhooks/github")
        .add_header(HeaderName::from_static("x-github-event"), HeaderValue::from_static("push"))
        .with(tenant("acme"))
        .json(&json!({
            "ref": "refs/heads/main",
            "repository": {"full_name": "acme/backend"},
            "sender": {"login": "octocat"}
        }))
        .await;
    res.assert_status(StatusCode::ACCEPTED);
    let body: Value = res.json();
    assert_eq!(body["data"]["status"], "accepted");
    assert_eq!(body["data"]["message"], "GitHub push event received for acme/backend");

    let queued = app.next_usage_message().unwrap();
    assert_eq!(queued.stream, SCAN_REQUESTS_STREAM);
    assert_eq!(queued.payload["tenant_id"], "acme");

    app.server
        .post("/api/v1/webhooks/gitlab")
        .json(&json!({
            "object_kind": "merge_request",
            "project": {"path_with_namespace": "acme/frontend"},
            "user_name": "jane"
        }))
        .await
        .assert_status(StatusCode::ACCEPTED);
    assert_eq!(app.next_usage_message().unwrap().payload["tenant_id"], "default");

    let body: Value = app
        .server
        .get("/api/v1/webhooks/events")
        .with(app.auth(Role::Viewer))
        .await
        .json();
    let events = body["data"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["platform"], "github");
    assert_eq!(events[0]["ref"], "refs/heads/main");
    assert_eq!(events[1]["event_type"], "merge_request");

    let body: Value = app
        .server
        .get("/api/v1/webhooks/events")
        .add_query_param("limit", 1)
        .with(app.auth(Role::Viewer))
        .await
        .json();
    assert_eq!(body["data"][0]["repository"], "acme/frontend");

    app.server
        .post("/api/v1/webhooks/github")
        .text("{broken")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_secrets_enforced() {
    let mut config = ApiConfig::development();
    config.github_webhook_secret = Some("gh-secret".into());
    config.gitlab_webhook_token = Some("gl-token".into());
    let app = TestApp::with_config(config);

    let payload = json!({"repository": {"full_name": "acme/backend"}}).to_string();

    app.server
        .post("/api/v1/webhooks/github")
        .text(payload.clone())
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let signature = format!("sha256={}", atlas_api::signing::sign("gh-secret", payload.as_bytes()));
    app.server
        .post("/api/v1/webhooks/github")
        .add_header(
            HeaderName::from_static("x-hub-signature-256"),
            HeaderValue::from_str(&signature).unwrap(),
        )
        .text(payload)
        .await
        .assert_status(StatusCode::ACCEPTED);

    app.server
        .post("/api/v1/webhooks/gitlab")
        .add_header(HeaderName::from_static("x-gitlab-token"), HeaderValue::from_static("wrong"))
        .json(&json!({"object_kind": "push"}))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    app.server
        .post("/api/v1/webhooks/gitlab")
        .add_header(HeaderName::from_static("x-gitlab-token"), HeaderValue::from_static("gl-token"))
        .json(&json!({"object_kind": "push"}))
        .await
        .assert_status(StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_usage_events_reach_billing_status() {
    let mut app = TestApp::new();
    let _worker = app.start_usage_worker();
    let auditor = app.auth(Role::Auditor);

    app.server
        .post("/api/v1/usage/events")
        .with(auditor.clone())
        .json(&json!({
            "stream": "atlas.ai.usage",
            "payload": {"metadata": {"tenant_id": "acme"}, "tokens_used": 1500}
        }))
        .await
        .assert_status(StatusCode::ACCEPTED);

    app.server
        .post("/api/v1/webhooks/github")
        .add_header(HeaderName::from_static("x-github-event"), HeaderValue::from_static("push"))
        .with(tenant("acme"))
        .json(&json!({"repository": {"full_name": "acme/backend"}}))
        .await
        .assert_status(StatusCode::ACCEPTED);

    let memory = app.memory.clone();
    assert!(
        eventually(|| {
            memory
                .usage_for("acme")
                .is_some_and(|u| u.token_count == 1500 && u.scans_count == 1)
        })
        .await
    );

    let body: Value = app
        .server
        .get("/api/v1/billing/status")
        .with(tenant("acme"))
        .with(app.auth(Role::Viewer))
        .await
        .json();
    assert_eq!(body["data"], json!({"plan_tier": "free", "scans_count": 1, "token_count": 1500}));

    // Viewers cannot publish usage
    app.server
        .post("/api/v1/usage/events")
        .with(app.auth(Role::Viewer))
        .json(&json!({"stream": "atlas.ai.usage", "payload": {}}))
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

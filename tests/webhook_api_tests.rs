//! Webhook 端到端测试
//!
//! 用内存存储和脚本化代理驱动真实路由，
//! 覆盖认证、限流、分发、审计的完整流水线

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt;

use common::{build_test_app, create_test_config, ScriptedBroker, TestApp, WEBHOOK_SECRET};
use sylo_gateway::{routes, security};

fn asana_broker() -> Arc<ScriptedBroker> {
    Arc::new(ScriptedBroker::new(vec![
        (
            "/api/1.0/users/me",
            json!({"data": {"gid": "user-gid", "name": "Me"}}),
        ),
        (
            "/api/1.0/tasks?assignee=",
            json!({"data": [{"gid": "t1", "name": "taskA", "completed": false}]}),
        ),
    ]))
}

fn signed_request(body: &str, timestamp: Option<String>, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/webhook/command")
        .header("content-type", "application/json")
        .header("x-user-id", "u1");

    if let Some(signature) = signature {
        builder = builder.header("x-signature", signature);
    }
    if let Some(timestamp) = timestamp {
        builder = builder.header("x-timestamp", timestamp);
    }

    builder.body(Body::from(body.to_string())).unwrap()
}

fn valid_request(body: &str) -> Request<Body> {
    signed_request(
        body,
        Some(Utc::now().timestamp().to_string()),
        Some(security::sign(body.as_bytes(), WEBHOOK_SECRET)),
    )
}

async fn response_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_missing_timestamp_rejected_before_any_side_effect() {
    let app = build_test_app(create_test_config(), asana_broker());
    let router = routes::create_router(app.state.clone());

    let body = r#"{"userId":"u1","action":"get_tasks","service":"asana","parameters":{}}"#;
    let request = signed_request(
        body,
        None,
        Some(security::sign(body.as_bytes(), WEBHOOK_SECRET)),
    );

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = response_json(response).await;
    assert_eq!(json["error"], "Missing signature or timestamp");

    // 零审计记录、零上游调用
    assert_eq!(app.audit_store.count().await, 0);
    assert_eq!(app.broker.call_count().await, 0);
}

#[tokio::test]
async fn test_invalid_signature_rejected() {
    let app = build_test_app(create_test_config(), asana_broker());
    let router = routes::create_router(app.state.clone());

    let body = r#"{"userId":"u1","action":"get_tasks","service":"asana","parameters":{}}"#;
    let request = signed_request(
        body,
        Some(Utc::now().timestamp().to_string()),
        Some(security::sign(b"different body", WEBHOOK_SECRET)),
    );

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = response_json(response).await;
    assert_eq!(json["error"], "Invalid signature");
    assert_eq!(app.audit_store.count().await, 0);
}

#[tokio::test]
async fn test_stale_timestamp_rejected() {
    let app = build_test_app(create_test_config(), asana_broker());
    let router = routes::create_router(app.state.clone());

    let body = r#"{"userId":"u1","action":"get_tasks","service":"asana","parameters":{}}"#;
    let stale = (Utc::now().timestamp() - 9999).to_string();
    let request = signed_request(
        body,
        Some(stale),
        Some(security::sign(body.as_bytes(), WEBHOOK_SECRET)),
    );

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = response_json(response).await;
    assert_eq!(json["error"], "Request too old or invalid timestamp");
}

#[tokio::test]
async fn test_valid_command_executes_and_audits() {
    let app = build_test_app(create_test_config(), asana_broker());
    let router = routes::create_router(app.state.clone());

    let body = r#"{"userId":"u1","action":"get_tasks","service":"asana","parameters":{}}"#;
    let response = router.oneshot(valid_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-ratelimit-limit"));
    assert!(response.headers().contains_key("x-ratelimit-remaining"));
    assert!(response.headers().contains_key("x-ratelimit-reset"));

    let json = response_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["status"], "success");
    assert_eq!(json["result"]["count"], 1);
    assert_eq!(json["result"]["tasks"][0]["name"], "taskA");
    assert!(json["commandId"].as_str().unwrap().len() > 10);

    // 恰好一条审计记录，状态 success
    let logs = app.audit_store.all().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, "success");
    assert_eq!(logs[0].user_id, "u1");
    assert_eq!(logs[0].service, "asana");
    assert_eq!(logs[0].action, "get_tasks");
    assert!(logs[0].execution_time_ms.is_some());
    assert_eq!(logs[0].request_id.as_deref(), json["commandId"].as_str());
}

#[tokio::test]
async fn test_unsupported_service_is_http_200_with_error_result() {
    let app = build_test_app(create_test_config(), asana_broker());
    let router = routes::create_router(app.state.clone());

    let body =
        r#"{"userId":"u1","action":"get_tasks","service":"unsupported_service","parameters":{}}"#;
    let response = router.oneshot(valid_request(body)).await.unwrap();

    // 信封合法：HTTP 层仍是 200
    assert_eq!(response.status(), StatusCode::OK);

    let json = response_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["status"], "error");
    assert!(json["error"]
        .as_str()
        .unwrap()
        .contains("Unsupported service"));

    let logs = app.audit_store.all().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, "error");
    assert_eq!(logs[0].error_code.as_deref(), Some("EXECUTION_ERROR"));
}

#[tokio::test]
async fn test_unsupported_action_message_names_the_service() {
    let app = build_test_app(create_test_config(), asana_broker());
    let router = routes::create_router(app.state.clone());

    let body = r#"{"userId":"u1","action":"teleport","service":"asana","parameters":{}}"#;
    let response = router.oneshot(valid_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "Unsupported Asana action: teleport");
}

#[tokio::test]
async fn test_send_email_missing_parameters() {
    let app = build_test_app(create_test_config(), asana_broker());
    let router = routes::create_router(app.state.clone());

    let body =
        r#"{"userId":"u1","action":"send_email","service":"gmail","parameters":{"to":"a@b.c"}}"#;
    let response = router.oneshot(valid_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(
        json["error"],
        "Missing required parameters: to, subject, body"
    );
}

#[tokio::test]
async fn test_send_email_upstream_rejection_is_error_result() {
    // 代理上没有发送端点的脚本：发送失败但不抛错
    let app = build_test_app(create_test_config(), Arc::new(ScriptedBroker::failing()));
    let router = routes::create_router(app.state.clone());

    let body = r#"{"userId":"u1","action":"send_email","service":"gmail","parameters":{"to":"a@b.c","subject":"s","body":"b"}}"#;
    let response = router.oneshot(valid_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["status"], "error");
    assert_eq!(json["error"], "Failed to send email");
    assert_eq!(json["result"]["sent"], false);

    // 上游拒绝与执行抛错在审计里可区分
    let logs = app.audit_store.all().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].error_code.as_deref(), Some("UPSTREAM_REJECTED"));
}

#[tokio::test]
async fn test_invalid_command_structure_is_400() {
    let app = build_test_app(create_test_config(), asana_broker());
    let router = routes::create_router(app.state.clone());

    let body = r#"{"userId":"u1","action":"","service":"asana","parameters":{}}"#;
    let response = router.oneshot(valid_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = response_json(response).await;
    assert_eq!(json["error"], "Invalid command structure");

    // 带了可用 userId：结构拒绝也落审计
    let logs = app.audit_store.all().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].error_code.as_deref(), Some("VALIDATION_ERROR"));
    // 没有上游调用
    assert_eq!(app.broker.call_count().await, 0);
}

#[tokio::test]
async fn test_missing_parameters_field_is_400() {
    let app = build_test_app(create_test_config(), asana_broker());
    let router = routes::create_router(app.state.clone());

    // 缺 parameters 字段：结构非法，不是解析失败
    let body = r#"{"userId":"u1","action":"get_tasks","service":"asana"}"#;
    let response = router.oneshot(valid_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = response_json(response).await;
    assert_eq!(json["error"], "Invalid command structure");
}

#[tokio::test]
async fn test_malformed_json_is_500() {
    let app = build_test_app(create_test_config(), asana_broker());
    let router = routes::create_router(app.state.clone());

    let body = "{not json";
    let response = router.oneshot(valid_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = response_json(response).await;
    assert_eq!(json["error"], "COMMAND_EXECUTION_FAILED");
    assert!(json["message"].as_str().is_some());
}

#[tokio::test]
async fn test_rate_limit_enforced_with_headers() {
    let mut config = create_test_config();
    config.rate_limits.webhook.requests = 2;

    let app = build_test_app(config, asana_broker());
    let router = routes::create_router(app.state.clone());

    let body = r#"{"userId":"u1","action":"get_tasks","service":"asana","parameters":{}}"#;

    for _ in 0..2 {
        let response = router.clone().oneshot(valid_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // 第 N+1 个请求被拒
    let response = router.oneshot(valid_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers().get("x-ratelimit-remaining").unwrap(), "0");

    let json = response_json(response).await;
    assert_eq!(json["error"], "Rate limit exceeded");
    assert!(json["message"]
        .as_str()
        .unwrap()
        .starts_with("Too many requests. Please retry after "));

    // 被限流的请求不会到达分发，也不落审计
    assert_eq!(app.audit_store.count().await, 2);
}

#[tokio::test]
async fn test_audit_failure_does_not_change_response() {
    let audit_store = Arc::new(common::InMemoryAuditStore::new());
    let connection_store = Arc::new(common::InMemoryConnectionStore::new());
    let app: TestApp = common::build_test_app_with_stores(
        create_test_config(),
        asana_broker(),
        audit_store,
        connection_store,
    );

    // 换成坏掉的审计存储重建服务
    let broken_state = {
        let mut state = (*app.state).clone();
        state.audit_service = Arc::new(sylo_gateway::services::AuditService::new(Arc::new(
            common::BrokenAuditStore,
        )));
        Arc::new(state)
    };
    let router = routes::create_router(broken_state);

    let body = r#"{"userId":"u1","action":"get_tasks","service":"asana","parameters":{}}"#;
    let response = router.oneshot(valid_request(body)).await.unwrap();

    // 审计写入失败被吞掉，响应不变
    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["success"], true);
}

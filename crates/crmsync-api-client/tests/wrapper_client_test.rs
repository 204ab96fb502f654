use std::io::Write;
use std::time::Duration;

use crmsync_api_client::{WrapperApi, WrapperClient};
use crmsync_core::{AppError, SyncErrorKind};
use mockito::Matcher;
use serde_json::json;

fn client(base_url: &str, page_size: u32) -> WrapperClient {
    WrapperClient::new(base_url, Duration::from_secs(5), page_size).unwrap()
}

fn page_query(page: u32, limit: u32) -> Matcher {
    Matcher::AllOf(vec![
        Matcher::UrlEncoded("page".into(), page.to_string()),
        Matcher::UrlEncoded("limit".into(), limit.to_string()),
    ])
}

#[tokio::test]
async fn test_fetch_roles_follows_pagination() {
    let mut server = mockito::Server::new_async().await;
    let path = "/api/wrapper/tenants/t1/roles";

    let first = server
        .mock("GET", path)
        .match_query(page_query(1, 2))
        .match_header("authorization", "Bearer tok")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "success": true,
                "data": [
                    {"roleId": "r1", "roleName": "Admin"},
                    {"roleId": "r2", "roleName": "Agent"}
                ],
                "pagination": {"page": 1, "limit": 2, "total": 3, "totalPages": 2}
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let second = server
        .mock("GET", path)
        .match_query(page_query(2, 2))
        .match_header("authorization", "Bearer tok")
        .with_status(200)
        .with_body(
            json!({
                "success": true,
                "data": [{"roleId": "r3", "roleName": "Viewer"}],
                "pagination": {"page": 2, "limit": 2, "total": 3, "totalPages": 2}
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let roles = client(&server.url(), 2).fetch_roles("t1", "tok").await.unwrap();

    let ids: Vec<_> = roles.iter().map(|r| r.role_id.as_str()).collect();
    assert_eq!(ids, vec!["r1", "r2", "r3"]);
    first.assert_async().await;
    second.assert_async().await;
}

#[tokio::test]
async fn test_fetch_tenant_sends_bearer_token() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/wrapper/tenants/t1")
        .match_header("authorization", "Bearer secret-token")
        .with_status(200)
        .with_body(
            json!({
                "success": true,
                "data": {"tenantId": "t1", "tenantName": "Acme", "status": "active"}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let tenant = client(&server.url(), 50)
        .fetch_tenant("t1", "secret-token")
        .await
        .unwrap();

    assert_eq!(tenant.tenant_id, "t1");
    assert_eq!(tenant.tenant_name, "Acme");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_unauthorized_maps_to_auth_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/wrapper/tenants/t1")
        .with_status(401)
        .with_body("token expired")
        .create_async()
        .await;

    let err = client(&server.url(), 50)
        .fetch_tenant("t1", "stale")
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::UpstreamStatus { status: 401, .. }));
    assert_eq!(err.kind(), SyncErrorKind::Auth);
}

#[tokio::test]
async fn test_server_error_is_retryable_network_failure() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/wrapper/tenants/t1/users")
        .match_query(Matcher::Any)
        .with_status(503)
        .create_async()
        .await;

    let err = client(&server.url(), 50)
        .fetch_users("t1", "tok")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), SyncErrorKind::Network);
}

#[tokio::test]
async fn test_success_false_aborts_collection() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/wrapper/tenants/t1/credit-configs")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({"success": false, "error": "upstream store offline"}).to_string())
        .create_async()
        .await;

    let err = client(&server.url(), 50)
        .fetch_credit_configs("t1", "tok")
        .await
        .unwrap_err();

    match err {
        AppError::UpstreamRejected { resource, message } => {
            assert_eq!(resource, "credit-configs");
            assert_eq!(message, "upstream store offline");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_body_is_validation_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/wrapper/tenants/t1/organizations")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("<html>gateway</html>")
        .create_async()
        .await;

    let err = client(&server.url(), 50)
        .fetch_organizations("t1", "tok")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), SyncErrorKind::Validation);
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{}", addr), 50)
        .fetch_roles("t1", "tok")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), SyncErrorKind::Network);
    match err {
        AppError::Network { code, .. } => assert_eq!(code.as_deref(), Some("ECONNREFUSED")),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_page_without_pagination_stops() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/wrapper/tenants/t1/entity-credits")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({"success": true, "data": []}).to_string())
        .expect(1)
        .create_async()
        .await;

    let credits = client(&server.url(), 50)
        .fetch_entity_credits("t1", "tok")
        .await
        .unwrap();

    assert!(credits.is_empty());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_slow_upstream_times_out_as_network_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/wrapper/tenants/t1/users")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(Duration::from_millis(1500));
            w.write_all(br#"{"success": true, "data": []}"#)
        })
        .create_async()
        .await;

    let client = WrapperClient::new(&server.url(), Duration::from_millis(100), 50).unwrap();
    let err = client.fetch_users("t1", "tok").await.unwrap_err();

    assert_eq!(err.kind(), SyncErrorKind::Network);
    match err {
        AppError::Network { code, .. } => assert_eq!(code.as_deref(), Some("ETIMEDOUT")),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_bad_credit_config_row_is_skipped() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/wrapper/tenants/t1/credit-configs")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "success": true,
                "data": [
                    {"configId": "c-1", "creditCost": 2.5},
                    {"configId": "c-2", "creditCost": "3"}
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let configs = client(&server.url(), 50)
        .fetch_credit_configs("t1", "tok")
        .await
        .unwrap();

    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].config_id, "c-1");
    assert_eq!(configs[0].credit_cost, 2.5);
}

#[tokio::test]
async fn test_bad_entity_credit_row_does_not_drop_the_page() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/wrapper/tenants/t1/entity-credits")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "success": true,
                "data": [
                    {"entityId": "ROOT", "allocatedCredits": 10, "expiresAt": "soon"},
                    {"entityId": "SALES", "allocatedCredits": 100, "usedCredits": 30}
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let credits = client(&server.url(), 50)
        .fetch_entity_credits("t1", "tok")
        .await
        .unwrap();

    assert_eq!(credits.len(), 1);
    assert_eq!(credits[0].entity_id.as_deref(), Some("SALES"));
    assert_eq!(credits[0].allocated_credits, Some(json!(100)));
    assert_eq!(credits[0].used_credits, Some(json!(30)));
}

#[tokio::test]
async fn test_bad_user_row_still_fails_essential_fetch() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/wrapper/tenants/t1/users")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "success": true,
                "data": [{"userId": "u-1", "email": "a@x.io"}, {"email": 7}]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let err = client(&server.url(), 50)
        .fetch_users("t1", "tok")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), SyncErrorKind::Validation);
}

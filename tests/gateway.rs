//! End-to-end tests through the HTTP server.

use std::time::Duration;

use edge_gateway::config::BackendConfig;
use serde_json::{json, Value};

mod common;
use common::MockResponse;

#[tokio::test]
async fn test_routes_strip_prefix_and_relay_response() {
    let users = common::start_mock_backend(MockResponse::ok(r#"{"id":42}"#)).await;
    let mut config = common::test_config();
    common::add_service(&mut config, BackendConfig::new("users", users.url()));
    let (addr, shutdown) = common::start_gateway(config).await;

    let res = common::client()
        .get(format!("http://{addr}/users/42?fields=name"))
        .header("x-request-id", "req-123")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-request-id"], "req-123");
    assert_eq!(res.text().await.unwrap(), r#"{"id":42}"#);

    let seen = users.last_request().unwrap();
    assert!(seen.starts_with("GET /42?fields=name HTTP/1.1\r\n"), "{seen}");
    assert!(seen.to_ascii_lowercase().contains("x-request-id: req-123"));

    shutdown.trigger();
}

#[tokio::test]
async fn test_generates_request_id() {
    let users = common::start_mock_backend(MockResponse::ok("ok")).await;
    let mut config = common::test_config();
    common::add_service(&mut config, BackendConfig::new("users", users.url()));
    let (addr, shutdown) = common::start_gateway(config).await;

    let res = common::client().get(format!("http://{addr}/users")).send().await.unwrap();
    let id = res.headers()["x-request-id"].to_str().unwrap().to_string();

    assert!(uuid::Uuid::parse_str(&id).is_ok());
    assert!(users.last_request().unwrap().contains(&id));

    shutdown.trigger();
}

#[tokio::test]
async fn test_unmatched_path_is_not_found() {
    let (addr, shutdown) = common::start_gateway(common::test_config()).await;

    let res = common::client().get(format!("http://{addr}/nowhere")).send().await.unwrap();

    assert_eq!(res.status(), 404);
    assert_eq!(res.json::<Value>().await.unwrap(), json!({ "error": "No matching route" }));

    shutdown.trigger();
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway() {
    let mut config = common::test_config();
    common::add_service(&mut config, BackendConfig::new("orders", common::unreachable_url()));
    let (addr, shutdown) = common::start_gateway(config).await;

    let res = common::client().get(format!("http://{addr}/orders/1")).send().await.unwrap();

    assert_eq!(res.status(), 502);
    assert_eq!(
        res.json::<Value>().await.unwrap(),
        json!({ "error": "Bad gateway", "service": "orders" })
    );

    shutdown.trigger();
}

#[tokio::test]
async fn test_open_breaker_returns_service_unavailable() {
    let mock = common::start_mock_backend(MockResponse::status(503, "overloaded")).await;
    let mut backend = BackendConfig::new("payments", mock.url());
    backend.circuit_breaker.max_failures = 3;
    backend.circuit_breaker.trip_on_server_error = true;
    let mut config = common::test_config();
    common::add_service(&mut config, backend);
    let (addr, shutdown) = common::start_gateway(config).await;
    let client = common::client();

    for _ in 0..3 {
        let res = client.post(format!("http://{addr}/payments")).send().await.unwrap();
        assert_eq!(res.status(), 503);
        assert_eq!(res.text().await.unwrap(), "overloaded");
    }

    let res = client.post(format!("http://{addr}/payments")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    assert_eq!(
        res.json::<Value>().await.unwrap(),
        json!({ "error": "Service temporarily unavailable", "service": "payments" })
    );
    assert_eq!(mock.hits(), 3);

    let health: Value = client
        .get(format!("http://{addr}/health/payments"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["circuit_breaker"]["state"], "OPEN");

    shutdown.trigger();
}

#[tokio::test]
async fn test_health_endpoints() {
    let up = common::start_mock_backend(MockResponse::ok("ok")).await;
    let down = common::start_mock_backend(MockResponse::status(500, "disk full")).await;
    let mut config = common::test_config();
    common::add_service(&mut config, BackendConfig::new("users", up.url()).with_health_path("/health"));
    common::add_service(&mut config, BackendConfig::new("orders", down.url()).with_health_path("/health"));
    let (addr, shutdown) = common::start_gateway(config).await;
    let client = common::client();

    let res = client.get(format!("http://{addr}/health")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    let report: Value = res.json().await.unwrap();
    assert_eq!(report["healthy"], false);
    assert_eq!(report["services"]["users"]["healthy"], true);
    assert_eq!(report["services"]["users"]["circuit_breaker"]["state"], "CLOSED");
    assert_eq!(
        report["services"]["orders"]["details"],
        "Health check failed with status 500: disk full"
    );
    assert!(report["timestamp"].as_u64().unwrap() > 0);

    let res = client.get(format!("http://{addr}/health/users")).send().await.unwrap();
    assert_eq!(res.status(), 200);

    let res = client.get(format!("http://{addr}/health/orders")).send().await.unwrap();
    assert_eq!(res.status(), 503);

    let res = client.get(format!("http://{addr}/health/ghost")).send().await.unwrap();
    assert_eq!(res.status(), 404);
    assert_eq!(
        res.json::<Value>().await.unwrap(),
        json!({ "error": "Service not found", "service": "ghost" })
    );

    shutdown.trigger();
}

#[tokio::test]
async fn test_all_healthy_is_ok() {
    let up = common::start_mock_backend(MockResponse::ok("ok")).await;
    let mut config = common::test_config();
    common::add_service(&mut config, BackendConfig::new("users", up.url()).with_health_path("/health"));
    common::add_service(&mut config, BackendConfig::new("events", common::unreachable_url()));
    let (addr, shutdown) = common::start_gateway(config).await;

    let res = common::client().get(format!("http://{addr}/health")).send().await.unwrap();

    assert_eq!(res.status(), 200);
    let report: Value = res.json().await.unwrap();
    assert_eq!(report["healthy"], true);
    assert_eq!(report["services"]["events"]["details"], "No health check configured");

    shutdown.trigger();
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let (addr, shutdown) = common::start_gateway(common::test_config()).await;
    let client = common::client();

    let res = client.get(format!("http://{addr}/health")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    drop(res);

    shutdown.trigger();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(client.get(format!("http://{addr}/health")).send().await.is_err());
}

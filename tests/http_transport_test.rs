use resilient_http::resilience::Constant;
use resilient_http::transport::HttpClientConfig;
use resilient_http::{
    BreakerRegistry, CircuitState, Error, FailurePolicy, PrometheusTelemetry, ReqwestTransport,
    ResilientCaller, TransportError,
};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport() -> Arc<ReqwestTransport> {
    let config = HttpClientConfig {
        timeout_secs: 5,
        connect_timeout_secs: 1,
        ..Default::default()
    };
    Arc::new(ReqwestTransport::new(&config).unwrap())
}

fn fast_backoff() -> Constant {
    Constant {
        delay: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn test_get_against_real_server() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/example"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": "test"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let registry = BreakerRegistry::new();
    let caller = ResilientCaller::builder("mock-api")
        .transport(transport())
        .telemetry(Arc::new(PrometheusTelemetry::new().with_target("mock-api")))
        .build(&registry)
        .await
        .unwrap();

    let response = caller
        .get(&format!("{}/api/example", mock_server.uri()))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["data"], "test");
}

#[tokio::test]
async fn test_post_sends_json_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/example"))
        .and(body_json(serde_json::json!({"key": "value"})))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(serde_json::json!({"success": true})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let registry = BreakerRegistry::new();
    let caller = ResilientCaller::builder("mock-api")
        .transport(transport())
        .build(&registry)
        .await
        .unwrap();

    let response = caller
        .post(
            &format!("{}/api/example", mock_server.uri()),
            &serde_json::json!({"key": "value"}),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 201);
}

#[tokio::test]
async fn test_server_error_is_not_retried_by_default() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&mock_server)
        .await;

    let registry = BreakerRegistry::new();
    let caller = ResilientCaller::builder("five-hundred")
        .backoff(fast_backoff())
        .transport(transport())
        .build(&registry)
        .await
        .unwrap();

    let response = caller.get(&mock_server.uri()).await.unwrap();
    assert_eq!(response.status, 500);
}

#[tokio::test]
async fn test_server_errors_retried_under_strict_policy() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let registry = BreakerRegistry::new();
    let caller = ResilientCaller::builder("strict")
        .failure_policy(FailurePolicy::TransportAndServerErrors)
        .failure_threshold(5)
        .backoff(fast_backoff())
        .transport(transport())
        .build(&registry)
        .await
        .unwrap();

    let response = caller.get(&mock_server.uri()).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(caller.breaker().state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_unreachable_host_exhausts_retries_then_trips() {
    // Bind then drop a listener so nothing accepts on the port
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let url = format!("http://127.0.0.1:{port}/");

    let registry = BreakerRegistry::new();
    let caller = ResilientCaller::builder("unreachable")
        .failure_threshold(4)
        .max_retries(3)
        .backoff(fast_backoff())
        .transport(transport())
        .build(&registry)
        .await
        .unwrap();

    let result = caller.get(&url).await;
    match result {
        Err(Error::Transport { attempts, source, .. }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(source, TransportError::Connect(_)));
        }
        other => panic!("expected transport error, got {other:?}"),
    }

    // The fourth consecutive failure opens the breaker on the next call
    let result = caller.get(&url).await;
    assert!(matches!(result, Err(Error::CircuitOpen { .. })));
    assert_eq!(caller.breaker().snapshot().total_failures, 4);

    let result = caller.get(&url).await;
    assert!(matches!(result, Err(Error::CircuitOpen { .. })));
    assert_eq!(caller.breaker().snapshot().total_rejections, 1);
}

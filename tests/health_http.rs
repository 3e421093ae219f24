//! Health verification over real HTTP against a wiremock server

use hostrig::health::{smoke_checks, HealthPolicy, HealthVerifier};
use hostrig::{HealthProbe, HealthTarget, HttpHealthProbe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_policy() -> HealthPolicy {
    HealthPolicy {
        timeout: Duration::from_secs(5),
        interval: Duration::from_millis(50),
    }
}

fn no_cancel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    std::mem::forget(tx);
    rx
}

fn probe() -> Arc<HttpHealthProbe> {
    Arc::new(HttpHealthProbe::with_request_timeout(Duration::from_secs(2)).unwrap())
}

#[tokio::test]
async fn healthy_on_first_2xx() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let target = HealthTarget::new(format!("{}/health", server.uri()));
    let state = HealthVerifier::new(probe())
        .verify(&target, fast_policy(), no_cancel())
        .await;

    assert!(state.healthy);
    assert!(state.terminal);
    assert_eq!(state.attempts, 0);
    assert_eq!(state.last_error, None);
}

#[tokio::test]
async fn retries_until_service_recovers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let target = HealthTarget::new(format!("{}/health", server.uri()));
    let state = HealthVerifier::new(probe())
        .verify(&target, fast_policy(), no_cancel())
        .await;

    assert!(state.healthy);
    assert_eq!(state.attempts, 2);
}

#[tokio::test]
async fn sends_host_header_for_name_based_routing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .and(header("host", "example.com"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let base = HealthTarget::new(format!("{}/health", server.uri()));
    let probe = probe();

    assert!(probe.probe(&base).await.is_err());
    let routed = base.with_host_header("example.com");
    assert!(probe.probe(&routed).await.is_ok());
}

#[tokio::test]
async fn reports_last_error_when_never_healthy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let target = HealthTarget::new(format!("{}/health", server.uri()));
    let policy = HealthPolicy {
        timeout: Duration::from_millis(300),
        interval: Duration::from_millis(100),
    };
    let state = HealthVerifier::new(probe())
        .verify(&target, policy, no_cancel())
        .await;

    assert!(!state.healthy);
    assert!(state.terminal);
    assert!(state.attempts >= 2);
    assert!(state.last_error.unwrap().contains("500"));
}

#[tokio::test]
async fn redirects_are_not_followed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/login"))
        .mount(&server)
        .await;

    let target = HealthTarget::new(format!("{}/health", server.uri()));
    let err = probe().probe(&target).await.unwrap_err();
    assert!(err.to_string().contains("302"));
}

#[tokio::test]
async fn smoke_checks_hit_each_path_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let base = HealthTarget::new(format!("{}/health", server.uri()));
    let probe = probe();
    let checks = smoke_checks(
        &*probe,
        &base,
        &["/".to_string(), "/api/status".to_string()],
    )
    .await;

    assert_eq!(checks.len(), 2);
    assert!(checks[0].ok);
    assert!(!checks[1].ok);
    assert!(checks[1].error.as_deref().unwrap().contains("500"));
}

#[tokio::test]
async fn connection_refused_is_an_error() {
    let target = HealthTarget::new("http://127.0.0.1:1/health");
    assert!(probe().probe(&target).await.is_err());
}

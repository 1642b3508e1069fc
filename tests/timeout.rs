use reqwest::Client;
use scenario_mock::{FeatureDefinition, MockEngine, MockServer, RhaiEvaluator, Scenario};
use std::time::{Duration, Instant};

async fn delayed_server(delay_in_ms: u64) -> MockServer {
    let evaluator = RhaiEvaluator::new();
    let feature = FeatureDefinition::builder()
        .background(format!("configure responseDelay = {}", delay_in_ms))
        .scenario(
            Scenario::given(r#"pathMatches("/slow")"#).then(r#"def response = "finally""#),
        )
        .scenario(
            Scenario::given(r#"pathMatches("/fast")"#)
                .then("def responseDelay = ()")
                .then(r#"def response = "now""#),
        )
        .build(&evaluator)
        .unwrap();
    MockServer::start(MockEngine::new(feature, evaluator)).await
}

async fn test_body() {
    // Arrange
    let mock_server = delayed_server(60_000).await;

    // Act
    let outcome = Client::builder()
        .timeout(Duration::from_secs(1))
        .build()
        .unwrap()
        .get(format!("{}/slow", &mock_server.uri()))
        .send()
        .await;

    // Assert
    assert!(outcome.is_err());
}

#[actix_rt::test]
async fn request_times_out_if_the_server_takes_too_long_with_actix() {
    test_body().await
}

#[tokio::test]
async fn request_times_out_if_the_server_takes_too_long_with_tokio() {
    test_body().await
}

#[tokio::test]
async fn a_delayed_response_does_not_hold_up_other_requests() {
    // Arrange
    let mock_server = delayed_server(60_000).await;
    let client = Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let slow = client.get(format!("{}/slow", &mock_server.uri())).send();
    let slow = tokio::spawn(slow);

    // Act
    let start = Instant::now();
    let fast = client
        .get(format!("{}/fast", &mock_server.uri()))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(fast.text().await.unwrap(), "now");
    assert!(start.elapsed() < Duration::from_secs(5));
    slow.abort();
}

#[tokio::test]
async fn the_configured_delay_is_applied() {
    // Arrange
    let mock_server = delayed_server(300).await;

    // Act
    let start = Instant::now();
    let response = reqwest::get(format!("{}/slow", &mock_server.uri()))
        .await
        .unwrap();

    // Assert
    assert!(start.elapsed() >= Duration::from_millis(300));
    assert_eq!(response.text().await.unwrap(), "finally");
}

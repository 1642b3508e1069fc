use futures::future::join_all;
use reqwest::StatusCode;
use scenario_mock::http::Method;
use scenario_mock::{
    FeatureBuilder, FeatureDefinition, HostBindings, MockEngine, MockServer, RhaiEvaluator,
    Scenario, Value,
};
use std::net::TcpStream;

async fn start(feature: FeatureBuilder) -> MockServer {
    start_with(feature, RhaiEvaluator::new()).await
}

async fn start_with(feature: FeatureBuilder, evaluator: RhaiEvaluator) -> MockServer {
    let feature = feature.build(&evaluator).expect("Invalid feature");
    MockServer::start(MockEngine::new(feature, evaluator)).await
}

#[async_std::test]
async fn new_starts_the_server() {
    // Act
    let mock_server = start(FeatureDefinition::builder()).await;

    // Assert
    assert!(TcpStream::connect(mock_server.address()).is_ok())
}

#[async_std::test]
async fn returns_404_if_nothing_matches() {
    // Arrange - no scenarios
    let mock_server = start(FeatureDefinition::builder()).await;

    // Act
    let response = reqwest::get(&mock_server.uri()).await.unwrap();

    // Assert
    assert_eq!(response.status(), 404);
    assert!(response.bytes().await.unwrap().is_empty());
}

#[async_std::test]
async fn simple_get() {
    // Arrange
    let mock_server = start(FeatureDefinition::builder().scenario(
        Scenario::given(r#"pathMatches("/hello") && methodIs("get")"#)
            .then(r#"def response = "hello world""#),
    ))
    .await;

    // Act
    let response = reqwest::get(format!("{}/hello", &mock_server.uri()))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "hello world");
}

#[async_std::test]
async fn raw_path_segments_are_bound_without_decoding() {
    // Arrange
    let mock_server = start(FeatureDefinition::builder().scenario(
        Scenario::given(r#"pathMatches("/hello/{raw}")"#).then("def response = raw"),
    ))
    .await;

    // Act
    let response = reqwest::get(format!(
        "{}/hello/%Ill~Formed@RequiredString!",
        &mock_server.uri()
    ))
    .await
    .unwrap();

    // Assert
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.text().await.unwrap(),
        "%Ill~Formed@RequiredString!"
    );
}

#[async_std::test]
async fn host_values_are_served_byte_for_byte() {
    // Arrange
    let test_bytes: Vec<u8> = vec![0, 159, 146, 150, 255];
    let host = HostBindings::new().register_value(
        "MockUtils",
        Value::Map(
            [("testBytes".to_string(), Value::Bytes(test_bytes.clone()))]
                .into_iter()
                .collect(),
        ),
    );
    let mock_server = start_with(
        FeatureDefinition::builder()
            .background(r#"def MockUtils = hostType("MockUtils")"#)
            .scenario(
                Scenario::given(r#"pathMatches("/bytes")"#)
                    .then("def response = MockUtils.testBytes"),
            ),
        RhaiEvaluator::new().with_host(host),
    )
    .await;

    // Act
    let response = reqwest::get(format!("{}/bytes", &mock_server.uri()))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "application/octet-stream"
    );
    assert_eq!(response.bytes().await.unwrap().as_ref(), test_bytes.as_slice());
}

#[async_std::test]
async fn a_null_response_is_an_empty_body() {
    // Arrange
    let mock_server = start(FeatureDefinition::builder().scenario(
        Scenario::given(r#"pathMatches("/hello")"#).then("def response = null"),
    ))
    .await;

    // Act
    let response = reqwest::get(format!("{}/hello", &mock_server.uri()))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), 200);
    assert!(response.headers().get("content-type").is_none());
    assert!(response.bytes().await.unwrap().is_empty());
}

#[async_std::test]
async fn configured_response_headers_are_served() {
    // Arrange
    let mock_server = start(
        FeatureDefinition::builder()
            .background(r#"configure responseHeaders = #{ "Content-Type": "text/html" }"#)
            .scenario(
                Scenario::given(r#"pathMatches("/hello")"#)
                    .then(r#"def response = "<h1>hello</h1>""#),
            ),
    )
    .await;

    // Act
    let response = reqwest::get(format!("{}/hello", &mock_server.uri()))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "text/html");
    assert_eq!(response.text().await.unwrap(), "<h1>hello</h1>");
}

#[async_std::test]
async fn cookies_reach_the_scenario() {
    // Arrange
    let mock_server = start(FeatureDefinition::builder().scenario(
        Scenario::given(r#"pathMatches("/cookies")"#)
            .then(r#"def response = #{ header: requestHeaders.cookie[0], flavour: requestCookies.flavour }"#),
    ))
    .await;

    // Act
    let response = reqwest::Client::new()
        .get(format!("{}/cookies", &mock_server.uri()))
        .header("Cookie", "flavour=chocolate; size=large")
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(
        body,
        serde_json::json!({
            "header": "flavour=chocolate; size=large",
            "flavour": "chocolate"
        })
    );
}

#[async_std::test]
async fn request_bodies_round_trip_byte_for_byte() {
    // Arrange
    let mock_server = start(FeatureDefinition::builder().scenario(
        Scenario::given(r#"pathMatches("/echo") && methodIs("post")"#)
            .then("def response = requestBytes"),
    ))
    .await;
    let body: Vec<u8> = (0..=255).collect();

    // Act
    let response = reqwest::Client::new()
        .post(format!("{}/echo", &mock_server.uri()))
        .body(body.clone())
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), 200);
    assert_eq!(response.bytes().await.unwrap().to_vec(), body);
}

#[async_std::test]
async fn json_request_bodies_are_structured_values() {
    // Arrange
    let mock_server = start(FeatureDefinition::builder().scenario(
        Scenario::given(r#"pathMatches("/greet") && typeContains("json")"#)
            .then(r#"def response = #{ greeting: "hello " + request.name }"#)
            .then("def responseStatus = 201"),
    ))
    .await;

    // Act
    let response = reqwest::Client::new()
        .post(format!("{}/greet", &mock_server.uri()))
        .json(&serde_json::json!({ "name": "world" }))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["content-type"], "application/json");
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "greeting": "hello world" }));
}

#[async_std::test]
async fn concurrent_requests_do_not_observe_each_other_bindings() {
    // Arrange
    let mock_server = start(FeatureDefinition::builder().scenario(
        Scenario::given(r#"pathMatches("/users/{id}")"#)
            .then("def responseDelay = 20")
            .then("def response = id"),
    ))
    .await;
    let client = reqwest::Client::new();

    // Act
    let responses = join_all((0..32).map(|i| {
        let request = client.get(format!("{}/users/{}", &mock_server.uri(), i));
        async move { request.send().await.unwrap().text().await.unwrap() }
    }))
    .await;

    // Assert
    for (i, body) in responses.into_iter().enumerate() {
        assert_eq!(body, i.to_string());
    }
}

#[async_std::test]
async fn evaluation_failures_are_500s_naming_the_statement() {
    // Arrange
    let mock_server = start(
        FeatureDefinition::builder().scenario(
            Scenario::given(r#"pathMatches("/broken")"#)
                .named("broken")
                .then(r#"def response = "fine""#)
                .then("def response = undefinedVariable + 1"),
        ),
    )
    .await;

    // Act
    let response = reqwest::get(format!("{}/broken", &mock_server.uri()))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), 500);
    let diagnostic = response.text().await.unwrap();
    assert!(diagnostic.contains("Scenario #0 (broken)"), "{}", diagnostic);
    assert!(diagnostic.contains("statement #1"), "{}", diagnostic);

    // The server keeps serving.
    let status = reqwest::get(&mock_server.uri()).await.unwrap().status();
    assert_eq!(status, 404);
}

#[async_std::test]
async fn received_requests_are_recorded() {
    // Arrange
    let mock_server = start(FeatureDefinition::builder()).await;

    // Act
    reqwest::Client::new()
        .post(format!("{}/recorded?page=2", &mock_server.uri()))
        .body("payload")
        .send()
        .await
        .unwrap();

    // Assert
    let received_requests = mock_server.received_requests().await.unwrap();
    assert_eq!(received_requests.len(), 1);

    let received_request = &received_requests[0];
    assert_eq!(received_request.method(), Method::POST);
    assert_eq!(received_request.path(), "/recorded");
    assert_eq!(received_request.query_param("page"), Some("2"));
    assert_eq!(received_request.body(), b"payload");
}

#[async_std::test]
async fn request_recording_can_be_disabled() {
    // Arrange
    let evaluator = RhaiEvaluator::new();
    let feature = FeatureDefinition::builder().build(&evaluator).unwrap();
    let mock_server = MockServer::builder()
        .disable_request_recording()
        .start(MockEngine::new(feature, evaluator))
        .await;

    // Act
    reqwest::get(&mock_server.uri()).await.unwrap();

    // Assert
    assert!(mock_server.received_requests().await.is_none());
}

#[async_std::test]
async fn cors_preflight_requests_are_answered() {
    // Arrange
    let mock_server = start(
        FeatureDefinition::builder()
            .background("configure cors = true")
            .scenario(Scenario::given(r#"pathMatches("/api")"#).then("def response = #{}")),
    )
    .await;
    let client = reqwest::Client::new();

    // Act
    let preflight = client
        .request(reqwest::Method::OPTIONS, format!("{}/api", &mock_server.uri()))
        .header("Access-Control-Request-Headers", "x-custom")
        .send()
        .await
        .unwrap();
    let response = client
        .get(format!("{}/api", &mock_server.uri()))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(preflight.status(), 200);
    assert_eq!(preflight.headers()["access-control-allow-origin"], "*");
    assert_eq!(preflight.headers()["access-control-allow-headers"], "x-custom");
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert_eq!(response.text().await.unwrap(), "{}");
}

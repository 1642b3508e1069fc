use reqwest::Client;
use scenario_mock::{FeatureDefinition, MockEngine, MockServer, RhaiEvaluator, Scenario};

// The server runs on its own thread and runtime: it must work regardless of the runtime
// driving the test.

async fn hello_server() -> MockServer {
    let evaluator = RhaiEvaluator::new();
    let feature = FeatureDefinition::builder()
        .scenario(
            Scenario::given(r#"pathMatches("/") && methodIs("get")"#)
                .then(r#"def response = "hello""#),
        )
        .build(&evaluator)
        .unwrap();
    MockServer::start(MockEngine::new(feature, evaluator)).await
}

#[tokio::test]
async fn hello_reqwest() {
    let mock_server = hello_server().await;

    let resp = Client::new().get(&mock_server.uri()).send().await.unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "hello");
}

#[actix_rt::test]
async fn hello_reqwest_actix() {
    let mock_server = hello_server().await;

    let resp = Client::new().get(&mock_server.uri()).send().await.unwrap();

    assert_eq!(resp.status(), 200);
}

#[async_std::test]
async fn hello_reqwest_async_std() {
    let mock_server = hello_server().await;

    let resp = Client::new().get(&mock_server.uri()).send().await.unwrap();

    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn hello_reqwest_http2() {
    let mock_server = hello_server().await;

    let resp = Client::builder()
        .http2_prior_knowledge()
        .build()
        .expect("http client")
        .get(&mock_server.uri())
        .send()
        .await
        .expect("response");

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.version(), reqwest::Version::HTTP_2);
}

#[tokio::test(flavor = "multi_thread")]
async fn many_servers_can_run_side_by_side() {
    let first = hello_server().await;
    let second = hello_server().await;

    assert_ne!(first.address(), second.address());

    let client = Client::new();
    let (a, b) = tokio::join!(
        client.get(&first.uri()).send(),
        client.get(&second.uri()).send()
    );
    assert_eq!(a.unwrap().status(), 200);
    assert_eq!(b.unwrap().status(), 200);
}

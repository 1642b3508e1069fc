use scenario_mock::http::{header, HeaderValue, Method, StatusCode};
use scenario_mock::{
    FeatureDefinition, FeatureError, MockEngine, PatternError, Request, Response,
    ResponseTransform, RhaiEvaluator, Scenario, StatementError, Value,
};
use std::time::Duration;

#[test]
fn malformed_path_templates_fail_the_build() {
    // Arrange
    let evaluator = RhaiEvaluator::new();

    // Act
    let error = FeatureDefinition::builder()
        .scenario(Scenario::given(r#"pathMatches("/ok")"#))
        .scenario(Scenario::given(r#"pathMatches("/users/{id}/{id}")"#))
        .build(&evaluator)
        .unwrap_err();

    // Assert
    assert!(matches!(
        error,
        FeatureError::Pattern {
            scenario: 1,
            source: PatternError::DuplicatePlaceholder { .. }
        }
    ));
}

#[test]
fn literal_path_templates_are_precompiled() {
    // Arrange
    let evaluator = RhaiEvaluator::new();

    // Act
    let feature = FeatureDefinition::builder()
        .scenario(Scenario::given(r#"pathMatches("/a/{x}") || pathMatches( "/b" )"#))
        .scenario(Scenario::given(r#"pathMatches("/a/{x}")"#))
        .build(&evaluator)
        .unwrap();

    // Assert
    assert_eq!(feature.patterns().len(), 2);
}

#[test]
fn unknown_options_fail_the_build() {
    // Arrange
    let evaluator = RhaiEvaluator::new();

    // Act
    let error = FeatureDefinition::builder()
        .background("configure retries = 3")
        .build(&evaluator)
        .unwrap_err();

    // Assert
    assert!(matches!(error, FeatureError::UnknownOption(option) if option == "retries"));
}

#[test]
fn invalid_option_values_fail_the_build() {
    // Arrange
    let evaluator = RhaiEvaluator::new();

    // Act
    let headers = FeatureDefinition::builder()
        .background("configure responseHeaders = 42")
        .build(&evaluator)
        .unwrap_err();
    let delay = FeatureDefinition::builder()
        .background("configure responseDelay = -1")
        .build(&evaluator)
        .unwrap_err();

    // Assert
    assert!(matches!(headers, FeatureError::InvalidOption { option, .. } if option == "responseHeaders"));
    assert!(matches!(delay, FeatureError::InvalidOption { option, .. } if option == "responseDelay"));
}

#[test]
fn configure_is_only_allowed_in_the_background() {
    // Arrange
    let evaluator = RhaiEvaluator::new();

    // Act
    let error = FeatureDefinition::builder()
        .scenario(Scenario::given("true").then("configure cors = true"))
        .build(&evaluator)
        .unwrap_err();

    // Assert
    assert!(matches!(
        error,
        FeatureError::ConfigureOutsideBackground { scenario: 0, .. }
    ));
}

#[test]
fn reserved_slots_cannot_be_defined_in_the_background() {
    // Arrange
    let evaluator = RhaiEvaluator::new();

    // Act
    let error = FeatureDefinition::builder()
        .background(r#"def response = "global""#)
        .build(&evaluator)
        .unwrap_err();

    // Assert
    assert!(matches!(error, FeatureError::ReservedName(name) if name == "response"));
}

#[test]
fn malformed_statements_fail_the_build() {
    // Arrange
    let evaluator = RhaiEvaluator::new();

    // Act
    let missing_assignment = FeatureDefinition::builder()
        .scenario(Scenario::given("true").then("def response"))
        .build(&evaluator)
        .unwrap_err();
    let invalid_name = FeatureDefinition::builder()
        .background("def 1st = 1")
        .build(&evaluator)
        .unwrap_err();

    // Assert
    assert!(matches!(
        missing_assignment,
        FeatureError::Syntax {
            source: StatementError::MissingAssignment(_),
            ..
        }
    ));
    assert!(matches!(
        invalid_name,
        FeatureError::Syntax {
            source: StatementError::InvalidName { .. },
            ..
        }
    ));
}

#[test]
fn failing_background_statements_fail_the_build() {
    // Arrange
    let evaluator = RhaiEvaluator::new();

    // Act
    let error = FeatureDefinition::builder()
        .background("def ok = 1")
        .background("def broken = missing.field")
        .build(&evaluator)
        .unwrap_err();

    // Assert
    assert!(matches!(error, FeatureError::Background { line: 1, .. }));
}

#[test]
fn background_configuration_is_exposed() {
    // Arrange
    let evaluator = RhaiEvaluator::new();

    // Act
    let feature = FeatureDefinition::builder()
        .background(r#"* configure responseHeaders = #{ "X-Multi": ["a", "b"] }"#)
        .background("* configure responseDelay = 25")
        .background("* configure cors = true")
        .build(&evaluator)
        .unwrap();

    // Assert
    let configuration = feature.configuration();
    let values: Vec<_> = configuration
        .response_headers()
        .get_all("x-multi")
        .iter()
        .collect();
    assert_eq!(values, vec!["a", "b"]);
    assert_eq!(configuration.response_delay(), Some(Duration::from_millis(25)));
    assert_eq!(configuration.option("cors"), Some(&Value::Bool(true)));
}

#[test]
fn cors_answers_preflight_requests_without_evaluating_scenarios() {
    // Arrange
    let evaluator = RhaiEvaluator::new();
    let feature = FeatureDefinition::builder()
        .background(r#"configure cors = "https://example.com""#)
        .scenario(Scenario::given(r#"pathMatches("/api")"#).then(r#"def response = "ok""#))
        .build(&evaluator)
        .unwrap();
    let engine = MockEngine::new(feature, evaluator);

    // Act
    let preflight = engine.handle(Request::new(Method::OPTIONS, "/anything"));
    let response = engine.handle(Request::new(Method::GET, "/api"));
    let missing = engine.handle(Request::new(Method::GET, "/missing"));

    // Assert
    assert_eq!(preflight.status(), StatusCode::OK);
    assert_eq!(
        preflight.header("access-control-allow-origin"),
        Some("https://example.com")
    );
    assert_eq!(preflight.header("access-control-allow-headers"), Some("*"));
    assert_eq!(
        response.header("access-control-allow-origin"),
        Some("https://example.com")
    );
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        missing.header("access-control-allow-origin"),
        Some("https://example.com")
    );
}

struct ServerHeader;

impl ResponseTransform for ServerHeader {
    fn transform(&self, value: &Value, _request: &Request, response: &mut Response) {
        if let Some(Ok(server)) = value.as_str().map(HeaderValue::from_str) {
            response.insert_header_if_absent(header::SERVER, server);
        }
    }
}

#[test]
fn custom_options_apply_their_transform() {
    // Arrange
    let evaluator = RhaiEvaluator::new();
    let feature = FeatureDefinition::builder()
        .option("server", ServerHeader)
        .background(r#"configure server = "scenario-mock""#)
        .scenario(Scenario::given(r#"pathMatches("/default")"#))
        .scenario(
            Scenario::given(r#"pathMatches("/custom")"#)
                .then(r#"def responseHeaders = #{ Server: "custom" }"#),
        )
        .build(&evaluator)
        .unwrap();
    let engine = MockEngine::new(feature, evaluator);

    // Act
    let default = engine.handle(Request::new(Method::GET, "/default"));
    let custom = engine.handle(Request::new(Method::GET, "/custom"));

    // Assert
    assert_eq!(default.header("server"), Some("scenario-mock"));
    assert_eq!(custom.header("server"), Some("custom"));
}

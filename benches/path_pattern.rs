use criterion::{criterion_group, criterion_main, Criterion};
use scenario_mock::http::Method;
use scenario_mock::{FeatureDefinition, MockEngine, PathPattern, Request, RhaiEvaluator, Scenario};
use std::hint::black_box;

pub fn path_pattern_matches(c: &mut Criterion) {
    let pattern = PathPattern::compile("/users/{id}/posts/{post}").unwrap();
    c.bench_function("PathPattern::matches", |b| {
        b.iter(|| pattern.matches(black_box("/users/42/posts/%Ill~Formed@RequiredString!")))
    });
}

pub fn engine_first_match(c: &mut Criterion) {
    let evaluator = RhaiEvaluator::new();
    let mut builder = FeatureDefinition::builder();
    for i in 0..10 {
        builder = builder.scenario(
            Scenario::given(format!(r#"pathMatches("/resource{}/{{id}}")"#, i))
                .then("def response = id"),
        );
    }
    let engine = MockEngine::new(builder.build(&evaluator).unwrap(), evaluator);

    c.bench_function("MockEngine::handle (tenth scenario)", |b| {
        b.iter(|| engine.handle(black_box(Request::new(Method::GET, "/resource9/42"))))
    });
}

criterion_group!(benches, path_pattern_matches, engine_first_match);
criterion_main!(benches);

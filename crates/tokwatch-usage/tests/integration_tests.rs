//! End-to-end ingestion tests over synthetic log corpora.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tempfile::tempdir;
use tokwatch_usage::{
    AggregateStore, Aggregator, EventParser, HttpPricingSource, IngestRequest, IngestionPipeline,
    LogScanner, PricingResolver, SqliteStore,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PRICE_LIST: &str = r#"{
    "claude-sonnet-4-20250514": {"input_cost_per_token": 3e-6, "output_cost_per_token": 15e-6, "cache_read_input_token_cost": 3e-7},
    "gpt-4o": {"input_cost_per_token": 5e-6, "output_cost_per_token": 15e-6}
}"#;

/// Two sonnet calls on 2026-01-24 totalling 15000 / 500 / 0 / 12000 tokens.
const SESSION_LOG: &str = r#"{"type":"user","timestamp":"2026-01-24T09:59:00Z","sessionId":"sess-a","message":{"role":"user","content":"hi"}}
{"type":"assistant","timestamp":"2026-01-24T10:00:00.000Z","sessionId":"sess-a","cwd":"/home/dev/api","message":{"model":"claude-sonnet-4-20250514","usage":{"input_tokens":10000,"output_tokens":300,"cache_creation_input_tokens":0,"cache_read_input_tokens":8000}}}
{"type":"assistant","timestamp":"2026-01-24T11:30:00.000Z","sessionId":"sess-a","cwd":"/home/dev/api","message":{"model":"claude-sonnet-4-20250514","usage":{"input_tokens":5000,"output_tokens":200,"cache_read_input_tokens":4000}}}
"#;

fn target() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 24).unwrap()
}

async fn price_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prices.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PRICE_LIST))
        .mount(&server)
        .await;
    server
}

fn resolver(server: &MockServer, cache: &Path) -> Arc<PricingResolver> {
    let source = HttpPricingSource::new(
        format!("{}/prices.json", server.uri()),
        Duration::from_secs(5),
    )
    .unwrap();
    Arc::new(PricingResolver::new(source, cache))
}

fn write_corpus(root: &Path) {
    let project = root.join("-home-dev-api");
    std::fs::create_dir_all(&project).unwrap();
    std::fs::write(project.join("sess-a.jsonl"), SESSION_LOG).unwrap();
}

fn utc_pipeline(root: &Path, pricing: Arc<PricingResolver>) -> IngestionPipeline<Utc> {
    IngestionPipeline::new(LogScanner::new(root), pricing, Aggregator::new(Utc))
}

#[test]
fn test_one_good_line_among_malformed() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("mixed.jsonl");
    let content = [
        r#"{"type":"assistant","timestamp":"2026-01-24T10:00:00Z","message":{"model":"claude-sonn"#,
        "this is not json",
        r#"{"type":"assistant","timestamp":"2026-01-24T10:00:00Z","message":{"model":"claude-sonnet-4-20250514"}}"#,
        r#"{"type":"user","timestamp":"2026-01-24T09:59:00Z","message":{"role":"user","content":"hi","usage":{"input_tokens":7}}}"#,
        "",
        r#"{"type":"assistant","timestamp":"2026-01-24T10:00:00Z","message":{"model":"claude-sonnet-4-20250514","usage":{"input_tokens":42}}}"#,
    ]
    .join("\n");
    std::fs::write(&file, content).unwrap();

    let events = EventParser::new().parse_file(&file).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].tokens.input, 42);
}

#[tokio::test]
async fn test_end_to_end_cost() {
    let dir = tempdir().unwrap();
    let logs = dir.path().join("projects");
    write_corpus(&logs);

    let server = price_server().await;
    let pipeline = utc_pipeline(&logs, resolver(&server, &dir.path().join("pricing.json")));

    let snapshot = pipeline
        .run(IngestRequest::for_date(target()))
        .await
        .unwrap()
        .expect("no concurrent pass");

    assert_eq!(snapshot.daily.len(), 1);
    let day = &snapshot.daily[0];
    assert_eq!(day.date, target());
    assert_eq!(day.call_count, 2);
    assert_eq!(day.tokens.input, 15_000);
    assert_eq!(day.tokens.output, 500);
    assert_eq!(day.tokens.cache_creation, 0);
    assert_eq!(day.tokens.cache_read, 12_000);
    assert!((day.total_cost_usd - 0.0561).abs() < 1e-9);

    let hourly_cost: f64 = snapshot.hourly.iter().map(|h| h.cost_usd).sum();
    assert!((hourly_cost - 0.0561).abs() < 1e-9);
    assert_eq!(snapshot.hourly[10].call_count, 1);
    assert_eq!(snapshot.hourly[11].call_count, 1);

    assert_eq!(snapshot.sessions.len(), 1);
    let session = &snapshot.sessions[0];
    assert_eq!(session.session_id, "sess-a");
    assert_eq!(session.display_name, "api");
    assert!((session.cost_usd - 0.0561).abs() < 1e-9);

    // Only Claude entries survive the filter
    assert_eq!(snapshot.pricing.len(), 1);
    assert!(snapshot.pricing.contains_key("claude-sonnet-4-20250514"));
}

#[tokio::test]
async fn test_repeated_passes_are_identical() {
    let dir = tempdir().unwrap();
    let logs = dir.path().join("projects");
    write_corpus(&logs);
    std::fs::write(
        logs.join("-home-dev-api").join("other.jsonl"),
        r#"{"type":"assistant","timestamp":"2026-01-23T22:00:00Z","sessionId":"sess-b","message":{"model":"claude-opus-4-20250514","usage":{"input_tokens":7,"output_tokens":3}}}"#,
    )
    .unwrap();

    let server = price_server().await;
    let cache = dir.path().join("pricing.json");
    let request = IngestRequest::for_date(target());

    let first = utc_pipeline(&logs, resolver(&server, &cache))
        .run(request)
        .await
        .unwrap()
        .unwrap();

    // A new pipeline reads the pricing cache written by the first one
    let second_pipeline = utc_pipeline(&logs, resolver(&server, &cache));
    let second = second_pipeline.run(request).await.unwrap().unwrap();
    let third = second_pipeline.run(request).await.unwrap().unwrap();

    let first_json = serde_json::to_string(&first).unwrap();
    assert_eq!(first_json, serde_json::to_string(&second).unwrap());
    assert_eq!(first_json, serde_json::to_string(&third).unwrap());
    assert_eq!(first.daily.len(), 2);
}

#[tokio::test]
async fn test_concurrent_trigger_is_a_no_op() {
    tokwatch_core::logging::init_test_logging();

    let dir = tempdir().unwrap();
    let logs = dir.path().join("projects");
    write_corpus(&logs);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prices.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(PRICE_LIST)
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let pipeline = utc_pipeline(&logs, resolver(&server, &dir.path().join("pricing.json")));
    let request = IngestRequest::for_date(target());

    let (first, second) = tokio::join!(pipeline.run(request), pipeline.run(request));
    assert!(first.unwrap().is_some());
    assert!(second.unwrap().is_none());

    // The guard is released once the pass completes
    assert!(pipeline.run(request).await.unwrap().is_some());
}

#[tokio::test]
async fn test_pass_publishes_to_sqlite() {
    let dir = tempdir().unwrap();
    let logs = dir.path().join("projects");
    write_corpus(&logs);

    let server = price_server().await;
    let store = Arc::new(SqliteStore::open(dir.path().join("usage.db")).unwrap());
    let pipeline = utc_pipeline(&logs, resolver(&server, &dir.path().join("pricing.json")))
        .with_store(Arc::clone(&store) as Arc<dyn AggregateStore>);

    let snapshot = pipeline
        .run(IngestRequest::for_date(target()))
        .await
        .unwrap()
        .unwrap();

    let stored = store.daily(target()).unwrap().unwrap();
    assert_eq!(stored, snapshot.daily[0]);

    let cached = store.cached_sessions(target()).unwrap().unwrap();
    assert_eq!(cached.len(), snapshot.sessions.len());
    assert_eq!(cached[0].session_id, snapshot.sessions[0].session_id);
    assert_eq!(cached[0].tokens, snapshot.sessions[0].tokens);
    assert!((cached[0].cost_usd - snapshot.sessions[0].cost_usd).abs() < 1e-12);
}

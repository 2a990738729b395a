use assetindex::pagination::{
    fetch_all, fetch_all_many, FetchError, OffsetLimitPager, PageCountPager, RetryPolicy,
    SubgraphPager, VecPager,
};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const RECORDS: u64 = 25;

fn quick_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        timeout: Duration::from_secs(5),
        initial_backoff: Duration::from_millis(1),
    }
}

#[tokio::test]
async fn test_every_page_size_and_strategy_returns_all_records() {
    for size in [0u64, 1, 10, 999, 10_000, 25_001] {
        let records: Vec<u64> = (0..size).collect();
        for page_size in [1u64, 10, 999, 10_000] {
            let sentinel = VecPager::sentinel(records.clone());
            let counted = VecPager::count_first(records.clone());
            assert_eq!(
                fetch_all(&sentinel, page_size, &quick_policy()).await.unwrap(),
                records,
                "sentinel size={} page_size={}",
                size,
                page_size
            );
            assert_eq!(
                fetch_all(&counted, page_size, &quick_policy()).await.unwrap(),
                records,
                "count-first size={} page_size={}",
                size,
                page_size
            );
            assert_eq!(sentinel.requests().len() as u64, size / page_size + 1);
            assert_eq!(
                counted.requests().len() as u64,
                size.div_ceil(page_size).max(1)
            );
        }
    }
}

#[tokio::test]
async fn test_exact_multiple_costs_one_extra_sentinel_request() {
    let pager = VecPager::sentinel((0..20u32).collect());
    let all = fetch_all(&pager, 10, &quick_policy()).await.unwrap();
    assert_eq!(all.len(), 20);
    assert_eq!(pager.requests(), vec![(0, 11), (10, 11)]);

    let counted = VecPager::count_first((0..20u32).collect());
    fetch_all(&counted, 10, &quick_policy()).await.unwrap();
    assert_eq!(counted.requests(), vec![(0, 10), (10, 10)]);
}

#[tokio::test]
async fn test_fan_out_preserves_input_order() {
    let pagers: Vec<VecPager<u32>> = (0..6u32)
        .map(|i| VecPager::sentinel((i * 100..i * 100 + i + 1).collect()))
        .collect();
    let results = fetch_all_many(pagers, 2, &quick_policy(), 3)
        .await
        .unwrap();
    assert_eq!(results.len(), 6);
    for (i, batch) in results.iter().enumerate() {
        let i = i as u32;
        assert_eq!(batch, &(i * 100..i * 100 + i + 1).collect::<Vec<_>>());
    }
}

#[derive(Clone, Default)]
struct Upstream {
    flaky_calls: Arc<AtomicUsize>,
}

#[derive(Deserialize)]
struct GraphqlBody {
    variables: HashMap<String, Value>,
}

fn slice(offset: u64, limit: u64) -> Vec<Value> {
    (offset..RECORDS.min(offset.saturating_add(limit)))
        .map(|i| json!({ "id": i }))
        .collect()
}

async fn graphql(Json(body): Json<GraphqlBody>) -> Json<Value> {
    let first = body.variables.get("first").and_then(Value::as_u64).unwrap_or(0);
    let skip = body.variables.get("skip").and_then(Value::as_u64).unwrap_or(0);
    Json(json!({ "data": { "items": slice(skip, first) } }))
}

async fn offset_limit(Query(q): Query<HashMap<String, u64>>) -> Json<Value> {
    Json(Value::Array(slice(q["offset"], q["limit"])))
}

async fn page_count(Query(q): Query<HashMap<String, u64>>) -> Json<Value> {
    let size = q["pageSize"];
    Json(json!({ "count": RECORDS, "records": slice(q["page"] * size, size) }))
}

async fn flaky(
    State(state): State<Upstream>,
    Query(q): Query<HashMap<String, u64>>,
) -> Result<Json<Value>, StatusCode> {
    if state.flaky_calls.fetch_add(1, Ordering::SeqCst) < 2 {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(Value::Array(slice(q["offset"], q["limit"]))))
}

async fn spawn_upstream() -> (String, Upstream) {
    let state = Upstream::default();
    let app = Router::new()
        .route("/graphql", post(graphql))
        .route("/items", get(offset_limit))
        .route("/paged", get(page_count))
        .route("/flaky", get(flaky))
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

#[derive(Debug, Deserialize, PartialEq)]
struct Item {
    id: u64,
}

fn expected() -> Vec<Item> {
    (0..RECORDS).map(|id| Item { id }).collect()
}

#[tokio::test]
async fn test_http_adapters_fetch_everything() {
    let (base, _) = spawn_upstream().await;
    let client = reqwest::Client::new();

    let subgraph: SubgraphPager<Item> = SubgraphPager::new(
        client.clone(),
        format!("{}/graphql", base),
        "query($first: Int!, $skip: Int!) { items(first: $first, skip: $skip) { id } }".to_string(),
        "items".to_string(),
    );
    assert_eq!(fetch_all(&subgraph, 10, &quick_policy()).await.unwrap(), expected());

    let rest: OffsetLimitPager<Item> = OffsetLimitPager::new(client.clone(), format!("{}/items", base));
    assert_eq!(fetch_all(&rest, 5, &quick_policy()).await.unwrap(), expected());

    let paged: PageCountPager<Item> = PageCountPager::new(client, format!("{}/paged", base));
    assert_eq!(fetch_all(&paged, 4, &quick_policy()).await.unwrap(), expected());
}

#[tokio::test]
async fn test_http_transient_failures_are_retried() {
    let (base, upstream) = spawn_upstream().await;
    let pager: OffsetLimitPager<Item> =
        OffsetLimitPager::new(reqwest::Client::new(), format!("{}/flaky", base));
    assert_eq!(fetch_all(&pager, 100, &quick_policy()).await.unwrap(), expected());
    assert_eq!(upstream.flaky_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_http_client_errors_fail_without_retry() {
    let (base, _) = spawn_upstream().await;
    let pager: OffsetLimitPager<Item> =
        OffsetLimitPager::new(reqwest::Client::new(), format!("{}/missing", base));
    match fetch_all(&pager, 10, &quick_policy()).await {
        Err(FetchError::Backend { offset, attempts, .. }) => {
            assert_eq!(offset, 0);
            assert_eq!(attempts, 1);
        }
        other => panic!("expected backend error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_http_retry_budget_exhaustion_is_typed() {
    let (base, _) = spawn_upstream().await;
    let policy = RetryPolicy {
        max_attempts: 2,
        ..quick_policy()
    };
    let pager: OffsetLimitPager<Item> =
        OffsetLimitPager::new(reqwest::Client::new(), format!("{}/flaky", base));
    match fetch_all(&pager, 10, &policy).await {
        Err(FetchError::Backend { attempts, message, .. }) => {
            assert_eq!(attempts, 2);
            assert!(message.contains("503"), "{}", message);
        }
        other => panic!("expected backend error, got {:?}", other),
    }
}

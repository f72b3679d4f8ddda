//! HTTP-level tests for ApifyClient against a local mock server.

use apify_client::{
    ApifyClient, ApifyError, InstagramReelScraperInput, RunStatus, TikTokProfileScraperInput,
    TIKTOK_SCRAPER,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn run_payload(id: &str, status: &str) -> serde_json::Value {
    json!({
        "data": {
            "id": id,
            "status": status,
            "defaultDatasetId": format!("ds-{id}"),
            "startedAt": "2024-05-01T10:00:00.000Z",
            "finishedAt": null
        }
    })
}

#[tokio::test]
async fn start_tiktok_scrape_posts_profile_input() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/acts/{TIKTOK_SCRAPER}/runs")))
        .and(header("authorization", "Bearer tok"))
        .and(body_partial_json(json!({"profiles": ["nick"], "resultsPerPage": 10})))
        .respond_with(ResponseTemplate::new(201).set_body_json(run_payload("r1", "READY")))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApifyClient::with_base_url("tok".into(), &server.uri());
    let input = TikTokProfileScraperInput::new("nick", 10);
    let run = client.start_run(TIKTOK_SCRAPER, &input).await.unwrap();

    assert_eq!(run.id, "r1");
    assert_eq!(run.default_dataset_id, "ds-r1");
    assert_eq!(run.run_status(), RunStatus::Ready);
}

#[tokio::test]
async fn start_run_targets_the_given_actor() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/acts/my-reel-actor/runs"))
        .and(body_partial_json(json!({"username": ["natgeo"], "resultsLimit": 25})))
        .respond_with(ResponseTemplate::new(201).set_body_json(run_payload("r2", "RUNNING")))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApifyClient::with_base_url("tok".into(), &server.uri());
    let input = InstagramReelScraperInput {
        username: vec!["natgeo".into()],
        results_limit: 25,
    };
    let run = client.start_run("my-reel-actor", &input).await.unwrap();

    assert_eq!(run.id, "r2");
    assert_eq!(run.run_status(), RunStatus::Running);
}

#[tokio::test]
async fn get_run_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/actor-runs/r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(run_payload("r1", "ABORTED")))
        .mount(&server)
        .await;

    let client = ApifyClient::with_base_url("tok".into(), &server.uri());
    let run = client.get_run("r1").await.unwrap();

    assert!(run.run_status().is_failed());
}

#[tokio::test]
async fn non_success_status_is_an_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/actor-runs/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("run not found"))
        .mount(&server)
        .await;

    let client = ApifyClient::with_base_url("tok".into(), &server.uri());
    let err = client.get_run("missing").await.unwrap_err();

    match err {
        ApifyError::Api { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "run not found");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn rejected_token_is_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/acts/{TIKTOK_SCRAPER}/runs")))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": {"type": "token-not-valid"}})))
        .mount(&server)
        .await;

    let client = ApifyClient::with_base_url("bad".into(), &server.uri());
    let err = client
        .start_run(TIKTOK_SCRAPER, &TikTokProfileScraperInput::new("nick", 10))
        .await
        .unwrap_err();

    assert!(matches!(err, ApifyError::Unauthorized { status: 401 }), "got {err:?}");
    assert_eq!(err.status(), Some(401));
}

#[tokio::test]
async fn dataset_items_pass_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/datasets/ds1/items"))
        .and(query_param("limit", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"id": "a"}, {"id": "b"}])),
        )
        .mount(&server)
        .await;

    let client = ApifyClient::with_base_url("tok".into(), &server.uri());
    let items: Vec<serde_json::Value> = client.get_dataset_items("ds1", Some(2)).await.unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[1]["id"], "b");
}

#[tokio::test]
async fn malformed_body_is_a_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/datasets/ds1/items"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let client = ApifyClient::with_base_url("tok".into(), &server.uri());
    let err = client
        .get_dataset_items::<serde_json::Value>("ds1", None)
        .await
        .unwrap_err();

    assert!(matches!(err, ApifyError::Parse(_)), "got {err:?}");
}

#[tokio::test]
async fn abort_run_hits_abort_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/actor-runs/r9/abort"))
        .respond_with(ResponseTemplate::new(200).set_body_json(run_payload("r9", "ABORTING")))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApifyClient::with_base_url("tok".into(), &format!("{}/", server.uri()));
    let run = client.abort_run("r9").await.unwrap();

    assert_eq!(run.run_status(), RunStatus::Aborting);
}

//! End-to-end ingestion against a mock HTTP server: fetch, split, embed,
//! persist, sync, query.

use std::sync::Arc;

use httpmock::prelude::*;
use tempfile::{TempDir, tempdir};

use salmon_search::{
    DocumentFetcher, EmbeddingProvider, IngestOutcome, IngestionCoordinator, MockEmbeddingProvider,
    OpenAiEmbeddingProvider, Retriever, SalmonError, SalmonStore, TextSplitter,
};

fn article(title: &str, body: &str) -> String {
    format!("<html><head><title>{title}</title></head><body><p>{body}</p></body></html>")
}

async fn coordinator_for(store: SalmonStore) -> IngestionCoordinator {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbeddingProvider::new());
    IngestionCoordinator::with_parts(
        store,
        embedder,
        DocumentFetcher::with_client(reqwest::Client::new()),
        TextSplitter::default(),
    )
    .unwrap()
}

async fn new_store() -> (TempDir, SalmonStore) {
    let dir = tempdir().unwrap();
    let store = SalmonStore::create(dir.path().join("salmon.db"), 384)
        .await
        .unwrap();
    (dir, store)
}

#[tokio::test]
async fn ingested_page_is_searchable_after_the_batch() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/salmon");
            then.status(200)
                .header("content-type", "text/html")
                .body(article(
                    "Salmon",
                    "Salmon live in rivers and migrate to the ocean to feed.",
                ));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/compilers");
            then.status(200)
                .header("content-type", "text/html")
                .body(article(
                    "Compilers",
                    "Compilers translate source programs into machine code.",
                ));
        })
        .await;

    let (_dir, store) = new_store().await;
    let coordinator = coordinator_for(store.clone()).await;

    let urls = vec![server.url("/salmon"), server.url("/compilers")];
    let reports = coordinator.ingest_batch(&urls).await.unwrap();
    assert!(reports
        .iter()
        .all(|r| matches!(r.outcome, IngestOutcome::Indexed(_))));

    // The trailing sync makes the whole batch visible to queries.
    assert_eq!(
        store.high_water_mark().await.unwrap(),
        store.max_chunk_id().await.unwrap()
    );

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbeddingProvider::new());
    let retriever = Retriever::new(store, embedder).unwrap();
    let matches = retriever
        .top_resources("Where do salmon live?", 1)
        .await
        .unwrap();

    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].resource_title, "Salmon");
    assert!(matches[0].chunk_text.contains("Salmon live in rivers"));
}

#[tokio::test]
async fn re_ingesting_a_url_is_a_soft_skip() {
    let server = MockServer::start_async().await;
    let page = server
        .mock_async(|when, then| {
            when.method(GET).path("/salmon");
            then.status(200)
                .header("content-type", "text/html")
                .body(article("Salmon", "Salmon swim upstream to spawn."));
        })
        .await;

    let (_dir, store) = new_store().await;
    let coordinator = coordinator_for(store).await;
    let url = server.url("/salmon");

    let first = coordinator.ingest_url(&url).await.unwrap();
    assert!(first.is_some());

    let second = coordinator.ingest_url(&url).await.unwrap();
    assert!(second.is_none(), "duplicate URL is skipped, not re-fetched");
    assert_eq!(page.hits_async().await, 1);
}

#[tokio::test]
async fn batch_continues_past_failing_urls() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/missing");
            then.status(404);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/good");
            then.status(200)
                .header("content-type", "text/html")
                .body(article("Good", "This page exists and gets indexed."));
        })
        .await;

    let (_dir, store) = new_store().await;
    let coordinator = coordinator_for(store.clone()).await;

    let urls = vec![
        "not a url".to_string(),
        server.url("/missing"),
        server.url("/good"),
    ];
    let reports = coordinator.ingest_batch(&urls).await.unwrap();

    assert_eq!(reports.len(), 3);
    assert!(matches!(reports[0].outcome, IngestOutcome::Failed(_)));
    assert!(matches!(reports[1].outcome, IngestOutcome::Failed(_)));
    let IngestOutcome::Indexed(ref resource) = reports[2].outcome else {
        panic!("the good URL must still be indexed");
    };
    assert_eq!(resource.title, "Good");

    assert!(store
        .resource_exists_by_url(&server.url("/good"))
        .await
        .unwrap());
    assert!(!store
        .resource_exists_by_url(&server.url("/missing"))
        .await
        .unwrap());
}

#[tokio::test]
async fn malformed_url_fails_before_any_network_call() {
    let (_dir, store) = new_store().await;
    let coordinator = coordinator_for(store).await;

    let err = coordinator.ingest_url("::not-a-url::").await.unwrap_err();
    assert!(matches!(err, SalmonError::InvalidInput(_)));
}

#[tokio::test]
async fn openai_provider_orders_and_validates_vectors() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(200).json_body(serde_json::json!({
                "object": "list",
                "model": "test-model",
                "data": [
                    {"object": "embedding", "index": 1, "embedding": [0.0, 1.0, 0.0]},
                    {"object": "embedding", "index": 0, "embedding": [1.0, 0.0, 0.0]},
                ],
            }));
        })
        .await;

    let provider =
        OpenAiEmbeddingProvider::new(&server.base_url(), "test-model", 3, None).unwrap();
    let vectors = provider
        .embed_batch(&["first".to_string(), "second".to_string()])
        .await
        .unwrap();

    // Responses come back keyed by index, not in request order.
    assert_eq!(vectors[0], vec![1.0, 0.0, 0.0]);
    assert_eq!(vectors[1], vec![0.0, 1.0, 0.0]);
}

#[tokio::test]
async fn openai_provider_rejects_wrong_dimension() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(200).json_body(serde_json::json!({
                "object": "list",
                "model": "test-model",
                "data": [
                    {"object": "embedding", "index": 0, "embedding": [1.0, 0.0]},
                ],
            }));
        })
        .await;

    let provider =
        OpenAiEmbeddingProvider::new(&server.base_url(), "test-model", 3, None).unwrap();
    let err = provider.embed("anything").await.unwrap_err();
    assert!(matches!(err, SalmonError::Upstream(_)));
}

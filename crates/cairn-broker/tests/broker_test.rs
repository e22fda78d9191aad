use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cairn_broker::{BrokerRepositories, FileBroker, RetentionConfig, RetentionSweeper};
use cairn_core::models::{
    FileRecord, FileTransferRequest, FileType, PageRequest, TransferSource, TransferState,
};
use cairn_core::{AppError, BearerToken, ClusterRole, RequestContext, SchedulingStrategy, Worker};
use cairn_db::{BindingRepository, FileRepository, MemoryStore, TransferRepository};
use cairn_proxy::{UploadPayload, WorkerClientConfig};
use futures::TryStreamExt;
use mockito::{Matcher, Mock, Server, ServerGuard};
use tokio::net::TcpListener;
use uuid::Uuid;

fn repositories(store: &MemoryStore) -> BrokerRepositories {
    BrokerRepositories {
        workers: Arc::new(store.clone()),
        files: Arc::new(store.clone()),
        bindings: Arc::new(store.clone()),
        transfers: Arc::new(store.clone()),
    }
}

fn broker(store: &MemoryStore) -> FileBroker {
    broker_with(store, WorkerClientConfig::default())
}

fn broker_with(store: &MemoryStore, client_config: WorkerClientConfig) -> FileBroker {
    FileBroker::from_parts(
        ClusterRole::Master.coordinator().unwrap(),
        SchedulingStrategy::Static,
        client_config,
        repositories(store),
    )
    .unwrap()
}

fn worker_at(server: &ServerGuard, id: i64, available_space: i64) -> Worker {
    let addr = server.socket_address();
    Worker::new(id, addr.ip().to_string(), addr.port(), available_space)
}

/// A worker that refuses connections.
fn dead_worker(id: i64, available_space: i64) -> Worker {
    Worker::new(id, "127.0.0.1", 1, available_space)
}

/// A worker that accepts connections and never answers.
async fn silent_worker(id: i64, available_space: i64) -> Worker {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    Worker::new(id, addr.ip().to_string(), addr.port(), available_space)
}

fn short_timeout() -> WorkerClientConfig {
    WorkerClientConfig {
        request_timeout: Duration::from_millis(200),
        ..WorkerClientConfig::default()
    }
}

fn user(token: &str) -> (Uuid, RequestContext) {
    let id = Uuid::new_v4();
    (id, RequestContext::authenticated(id, BearerToken::new(token)))
}

async fn seed_file(store: &MemoryStore, id: i64, owner: Option<Uuid>, worker_id: i64) -> FileRecord {
    let record = FileRecord::new(id, FileType::HeapDump, format!("heap-{}.hprof", id), owner, Some(10));
    store.create_with_binding(&record, worker_id).await.unwrap();
    record
}

/// Background worker deletes are fire-and-forget; give them a moment.
async fn wait_until_matched(mock: &Mock) {
    for _ in 0..100 {
        if mock.matched_async().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_upload_lands_on_worker_with_most_space() {
    let mut server = Server::new_async().await;
    let upload = server
        .mock("POST", "/jifa-api/files/upload")
        .match_header("authorization", "Bearer tok")
        .match_body(Matcher::Regex(r#"name="type"\r\n\r\nHEAP_DUMP"#.to_string()))
        .with_status(200)
        .with_body("42")
        .expect(1)
        .create_async()
        .await;

    let store = MemoryStore::new();
    store.upsert_worker(dead_worker(1, 100)).await;
    store.upsert_worker(worker_at(&server, 2, 500)).await;
    let broker = broker(&store);
    let (owner, ctx) = user("tok");

    let id = broker
        .handle_upload_request(
            &ctx,
            FileType::HeapDump,
            UploadPayload::from_bytes("heap.hprof", Bytes::from_static(b"0123456789")),
        )
        .await
        .unwrap();

    assert_eq!(id, 42);
    upload.assert_async().await;

    let record = FileRepository::get_by_id(&store, 42).await.unwrap().unwrap();
    assert_eq!(record.owner_id, Some(owner));
    assert_eq!(record.size, Some(10));
    assert_eq!(record.original_name, "heap.hprof");
    assert_eq!(broker.resolver().resolve_worker_for_file(42).await.unwrap().id, 2);
}

#[tokio::test]
async fn test_empty_registry_fails_before_any_call() {
    let mut server = Server::new_async().await;
    let upload = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let store = MemoryStore::new();
    let err = broker(&store)
        .handle_upload_request(
            &RequestContext::anonymous(),
            FileType::HeapDump,
            UploadPayload::from_bytes("heap.hprof", vec![0u8; 10]),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::WorkerUnavailable(_)));
    upload.assert_async().await;
}

#[tokio::test]
async fn test_rejected_upload_leaves_no_record() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/jifa-api/files/upload")
        .with_status(500)
        .with_body("worker exploded")
        .create_async()
        .await;

    let store = MemoryStore::new();
    store.upsert_worker(worker_at(&server, 1, 10)).await;

    let err = broker(&store)
        .handle_upload_request(
            &RequestContext::anonymous(),
            FileType::GcLog,
            UploadPayload::from_bytes("gc.log", vec![1u8; 3]),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::WorkerRequestFailed { status: Some(500), .. }
    ));
    assert_eq!(store.file_count().await, 0);
    assert_eq!(store.binding_count().await, 0);
}

#[tokio::test]
async fn test_upload_timeout_leaves_no_record() {
    let store = MemoryStore::new();
    store.upsert_worker(silent_worker(1, 100).await).await;

    let err = broker_with(&store, short_timeout())
        .handle_upload_request(
            &RequestContext::anonymous(),
            FileType::HeapDump,
            UploadPayload::from_bytes("heap.hprof", vec![0u8; 16]),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::WorkerRequestFailed { status: None, .. }
    ));
    assert_eq!(store.file_count().await, 0);
    assert_eq!(store.binding_count().await, 0);
}

#[tokio::test]
async fn test_transfer_timeout_is_a_worker_failure() {
    let store = MemoryStore::new();
    store.upsert_worker(silent_worker(1, 100).await).await;

    let err = broker_with(&store, short_timeout())
        .handle_transfer_request(&RequestContext::anonymous(), url_transfer())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::WorkerRequestFailed { status: None, .. }
    ));
    assert_eq!(store.file_count().await, 0);
    assert_eq!(store.binding_count().await, 0);
}

#[tokio::test]
async fn test_failed_commit_removes_the_worker_copy() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/jifa-api/files/upload")
        .with_status(200)
        .with_body("42")
        .create_async()
        .await;
    let cleanup = server
        .mock("DELETE", "/jifa-api/files/42")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let store = MemoryStore::new();
    store.upsert_worker(worker_at(&server, 2, 500)).await;
    // an existing file already holds id 42, so the commit must fail
    seed_file(&store, 42, None, 2).await;

    let err = broker(&store)
        .handle_upload_request(
            &RequestContext::anonymous(),
            FileType::HeapDump,
            UploadPayload::from_bytes("again.hprof", vec![0u8; 4]),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Internal(_)));
    wait_until_matched(&cleanup).await;
    cleanup.assert_async().await;
}

#[tokio::test]
async fn test_download_is_resolved_lazily_through_the_binding() {
    let mut server = Server::new_async().await;
    let download = server
        .mock("GET", "/jifa-api/files/42/download")
        .match_header("authorization", "Bearer tok")
        .with_status(200)
        .with_body("heap bytes")
        .expect(1)
        .create_async()
        .await;

    let store = MemoryStore::new();
    store.upsert_worker(worker_at(&server, 2, 500)).await;
    let (owner, ctx) = user("tok");
    seed_file(&store, 42, Some(owner), 2).await;

    let named = broker(&store)
        .handle_download_request(&ctx, 42)
        .await
        .unwrap();
    assert_eq!(named.name, "heap-42.hprof");
    assert_eq!(named.file_type, FileType::HeapDump);
    assert!(!download.matched_async().await);

    let body: Vec<Bytes> = named.resource.open().await.unwrap().try_collect().await.unwrap();
    assert_eq!(body.concat(), b"heap bytes");
    download.assert_async().await;
}

#[tokio::test]
async fn test_download_of_someone_elses_file_is_forbidden() {
    let store = MemoryStore::new();
    store.upsert_worker(dead_worker(1, 1)).await;
    let (owner, _) = user("a");
    seed_file(&store, 5, Some(owner), 1).await;

    let (_, stranger) = user("b");
    let err = broker(&store)
        .handle_download_request(&stranger, 5)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[tokio::test]
async fn test_download_without_binding_is_internal() {
    let store = MemoryStore::new();
    store.upsert_worker(dead_worker(1, 1)).await;
    seed_file(&store, 8, None, 1).await;
    assert!(store.detach_binding(8).await);

    let err = broker(&store)
        .handle_download_request(&RequestContext::anonymous(), 8)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Internal(_)));

    let missing = broker(&store)
        .handle_download_request(&RequestContext::anonymous(), 9)
        .await
        .unwrap_err();
    assert!(matches!(missing, AppError::NotFound(_)));
}

fn url_transfer() -> FileTransferRequest {
    FileTransferRequest {
        source: TransferSource::Url {
            url: "https://dumps.example.com/app.jfr".to_string(),
        },
        file_type: FileType::JfrFile,
        file_name: None,
    }
}

#[tokio::test]
async fn test_successful_transfer_is_committed_once() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/jifa-api/files/transfer")
        .with_status(200)
        .with_body("77")
        .create_async()
        .await;
    let progress = server
        .mock("GET", "/jifa-api/files/transfer/77/progress")
        .with_status(200)
        .with_body(r#"{"state":"succeeded","transferred_size":2048,"total_size":2048}"#)
        .expect(1)
        .create_async()
        .await;

    let store = MemoryStore::new();
    store.upsert_worker(worker_at(&server, 4, 900)).await;
    let broker = broker(&store);
    let (owner, ctx) = user("tok");

    let id = broker.handle_transfer_request(&ctx, url_transfer()).await.unwrap();
    assert_eq!(id, 77);
    assert_eq!(store.file_count().await, 0);

    for _ in 0..3 {
        let report = broker.get_transfer_progress(&ctx, id).await.unwrap();
        assert_eq!(report.state, TransferState::Succeeded);
    }

    progress.assert_async().await;
    assert_eq!(store.file_count().await, 1);
    let file = FileRepository::get_by_id(&store, 77).await.unwrap().unwrap();
    assert_eq!(file.original_name, "app.jfr");
    assert_eq!(file.owner_id, Some(owner));
    assert_eq!(file.size, Some(2048));
    assert_eq!(broker.resolver().resolve_worker_for_file(77).await.unwrap().id, 4);
}

#[tokio::test]
async fn test_failed_transfer_leaves_no_binding() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/jifa-api/files/transfer")
        .with_status(200)
        .with_body("78")
        .create_async()
        .await;
    let progress = server
        .mock("GET", "/jifa-api/files/transfer/78/progress")
        .with_status(200)
        .with_body(r#"{"state":"failed","transferred_size":0,"message":"403 from origin"}"#)
        .expect(1)
        .create_async()
        .await;

    let store = MemoryStore::new();
    store.upsert_worker(worker_at(&server, 4, 900)).await;
    let broker = broker(&store);
    let ctx = RequestContext::anonymous();

    let id = broker.handle_transfer_request(&ctx, url_transfer()).await.unwrap();
    let first = broker.get_transfer_progress(&ctx, id).await.unwrap();
    let second = broker.get_transfer_progress(&ctx, id).await.unwrap();

    assert_eq!(first.state, TransferState::Failed);
    assert_eq!(second.message.as_deref(), Some("403 from origin"));
    progress.assert_async().await;
    assert_eq!(store.binding_count().await, 0);
}

#[tokio::test]
async fn test_running_transfer_progress_is_stored() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/jifa-api/files/transfer")
        .with_status(200)
        .with_body("79")
        .create_async()
        .await;
    server
        .mock("GET", "/jifa-api/files/transfer/79/progress")
        .with_status(200)
        .with_body(r#"{"state":"in_progress","transferred_size":100,"total_size":400}"#)
        .create_async()
        .await;

    let store = MemoryStore::new();
    store.upsert_worker(worker_at(&server, 4, 900)).await;
    let broker = broker(&store);
    let ctx = RequestContext::anonymous();

    let id = broker.handle_transfer_request(&ctx, url_transfer()).await.unwrap();
    let report = broker.get_transfer_progress(&ctx, id).await.unwrap();
    assert_eq!(report.transferred_size, 100);

    let stored = store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.progress.state, TransferState::InProgress);
    assert_eq!(stored.progress.total_size, Some(400));
}

#[tokio::test]
async fn test_invalid_transfer_is_rejected_before_selection() {
    let mut server = Server::new_async().await;
    let any = server.mock("POST", Matcher::Any).expect(0).create_async().await;

    let store = MemoryStore::new();
    store.upsert_worker(worker_at(&server, 1, 1)).await;
    let request = FileTransferRequest {
        source: TransferSource::Url {
            url: "file:///etc/passwd".to_string(),
        },
        file_type: FileType::GcLog,
        file_name: None,
    };

    let err = broker(&store)
        .handle_transfer_request(&RequestContext::anonymous(), request)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
    any.assert_async().await;
}

#[tokio::test]
async fn test_owner_deletes_and_worker_copy_is_removed() {
    let mut server = Server::new_async().await;
    let remove = server
        .mock("DELETE", "/jifa-api/files/42")
        .match_header("authorization", "Bearer owner-token")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let store = MemoryStore::new();
    store.upsert_worker(worker_at(&server, 2, 500)).await;
    let (owner, ctx) = user("owner-token");
    seed_file(&store, 42, Some(owner), 2).await;
    let broker = broker(&store);

    let (_, stranger) = user("other");
    let err = broker.delete_by_id(&stranger, 42).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    broker.delete_by_id(&ctx, 42).await.unwrap();
    assert!(FileRepository::get_by_id(&store, 42).await.unwrap().is_none());
    assert!(store.find_by_file_id(42).await.unwrap().is_none());

    wait_until_matched(&remove).await;
    remove.assert_async().await;

    let missing = broker.delete_by_id(&ctx, 42).await.unwrap_err();
    assert!(matches!(missing, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_listing_requires_authentication_and_pages() {
    let store = MemoryStore::new();
    store.upsert_worker(dead_worker(1, 1)).await;
    let (owner, ctx) = user("tok");
    for id in 1..=3 {
        seed_file(&store, id, Some(owner), 1).await;
    }
    seed_file(&store, 50, None, 1).await;
    let broker = broker(&store);

    let err = broker
        .get_user_file_views(&RequestContext::anonymous(), None, PageRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));

    let page = broker
        .get_user_file_views(&ctx, None, PageRequest::new(1, 2).unwrap())
        .await
        .unwrap();
    assert_eq!(page.total_size, 3);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.data.len(), 2);
}

#[tokio::test]
async fn test_lookup_by_unique_name_checks_type_and_access() {
    let store = MemoryStore::new();
    store.upsert_worker(dead_worker(1, 1)).await;
    let (owner, ctx) = user("tok");
    let record = seed_file(&store, 3, Some(owner), 1).await;
    let broker = broker(&store);

    let view = broker
        .get_file_view_by_unique_name(&ctx, &record.unique_name)
        .await
        .unwrap();
    assert_eq!(view.id, 3);

    let found = broker
        .get_file_by_unique_name(&ctx, &record.unique_name, FileType::HeapDump)
        .await
        .unwrap();
    assert_eq!(found.id, 3);

    let mismatch = broker
        .get_file_by_unique_name(&ctx, &record.unique_name, FileType::GcLog)
        .await
        .unwrap_err();
    assert!(matches!(mismatch, AppError::InvalidInput(_)));

    let anonymous = broker
        .get_file_view_by_id(&RequestContext::anonymous(), 3)
        .await
        .unwrap_err();
    assert!(matches!(anonymous, AppError::Forbidden(_)));

    let admin = RequestContext::authenticated(Uuid::new_v4(), BearerToken::new("adm")).with_admin(true);
    assert!(broker.get_file_view_by_id(&admin, 3).await.is_ok());
}

#[tokio::test]
async fn test_delete_oldest_file_removes_least_recent() {
    let mut server = Server::new_async().await;
    let first = server
        .mock("DELETE", "/jifa-api/files/11")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    // already gone on the worker; the record still goes
    let second = server
        .mock("DELETE", "/jifa-api/files/12")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;

    let store = MemoryStore::new();
    store.upsert_worker(worker_at(&server, 1, 1)).await;
    let mut old = FileRecord::new(11, FileType::GcLog, "old.log", None, None);
    old.created_at -= chrono::Duration::hours(2);
    store.create_with_binding(&old, 1).await.unwrap();
    seed_file(&store, 12, None, 1).await;
    let broker = broker(&store);

    assert_eq!(broker.delete_oldest_file().await.unwrap(), Some(11));
    first.assert_async().await;
    assert_eq!(broker.delete_oldest_file().await.unwrap(), Some(12));
    second.assert_async().await;
    assert_eq!(broker.delete_oldest_file().await.unwrap(), None);
    assert_eq!(store.binding_count().await, 0);
}

#[tokio::test]
async fn test_refused_worker_delete_keeps_the_oldest_record() {
    let mut server = Server::new_async().await;
    let refused = server
        .mock("DELETE", "/jifa-api/files/1")
        .match_header("authorization", Matcher::Missing)
        .with_status(401)
        .with_body("missing credentials")
        .expect(2)
        .create_async()
        .await;

    let store = MemoryStore::new();
    store.upsert_worker(worker_at(&server, 1, 5)).await;
    let (owner, _) = user("owner");
    let mut oldest = FileRecord::new(1, FileType::HeapDump, "heap-1.hprof", Some(owner), Some(10));
    oldest.created_at -= chrono::Duration::hours(1);
    store.create_with_binding(&oldest, 1).await.unwrap();
    seed_file(&store, 2, Some(owner), 1).await;
    let sweeper = RetentionSweeper::new(
        Arc::new(broker(&store)),
        Arc::new(store.clone()),
        RetentionConfig {
            interval: Duration::from_secs(60),
            min_available_space: 100,
        },
    );

    let err = sweeper.sweep_once().await.unwrap_err();
    assert!(matches!(
        err,
        AppError::WorkerRequestFailed { status: Some(401), .. }
    ));
    // the next tick retries the same file instead of moving on
    assert!(sweeper.sweep_once().await.is_err());

    assert_eq!(store.file_count().await, 2);
    assert_eq!(store.binding_count().await, 2);
    assert!(FileRepository::get_by_id(&store, 1).await.unwrap().is_some());
    refused.assert_async().await;
}

#[tokio::test]
async fn test_retention_sweeps_only_when_space_is_low() {
    let mut server = Server::new_async().await;
    let delete = server
        .mock("DELETE", "/jifa-api/files/1")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let store = MemoryStore::new();
    store.upsert_worker(worker_at(&server, 1, 500)).await;
    seed_file(&store, 1, None, 1).await;
    let broker = Arc::new(broker(&store));
    let sweeper = RetentionSweeper::new(
        broker,
        Arc::new(store.clone()),
        RetentionConfig {
            interval: Duration::from_secs(60),
            min_available_space: 400,
        },
    );

    assert_eq!(sweeper.sweep_once().await.unwrap(), None);
    assert_eq!(store.file_count().await, 1);

    store.upsert_worker(worker_at(&server, 1, 300)).await;
    assert_eq!(sweeper.sweep_once().await.unwrap(), Some(1));
    assert_eq!(store.file_count().await, 0);
    delete.assert_async().await;
}

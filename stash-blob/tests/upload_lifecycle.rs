use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use stash_blob::{
    classify, BlobClient, BlobError, BlobResult, BlobStore, ByteStream, CancellationToken, CopyOptions,
    DeleteOutcome, DeleteTarget, FileSource, ListOptions, ListPage, MemoryBlobStore, PolicyTokenIssuer,
    PutRequest, StoredObjectDescriptor, TokenIssuer, TokenRequest, TransferPhase, TransferTracker,
    UploadAuthorization, UploadCompletion, UploadOptions, Uploader,
};

const BASE: &str = "https://blob.test";

/// Issuer that counts how often it is asked for a token.
#[derive(Default)]
struct CountingIssuer {
    inner: PolicyTokenIssuer,
    issued: AtomicUsize,
    completed: AtomicUsize,
}

#[async_trait]
impl TokenIssuer for CountingIssuer {
    async fn issue(&self, request: TokenRequest) -> BlobResult<UploadAuthorization> {
        self.issued.fetch_add(1, Ordering::SeqCst);
        self.inner.issue(request).await
    }

    async fn notify_completed(&self, completion: UploadCompletion) -> BlobResult<()> {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.inner.notify_completed(completion).await
    }
}

/// Store whose metadata lookups never answer.
struct StalledHead(MemoryBlobStore);

#[async_trait]
impl BlobStore for StalledHead {
    async fn put(&self, request: PutRequest, body: ByteStream) -> BlobResult<StoredObjectDescriptor> {
        self.0.put(request, body).await
    }

    async fn copy(&self, from_url: &str, to_pathname: &str, options: &CopyOptions) -> BlobResult<StoredObjectDescriptor> {
        self.0.copy(from_url, to_pathname, options).await
    }

    async fn delete(&self, urls: &[String]) -> BlobResult<()> {
        self.0.delete(urls).await
    }

    async fn list(&self, options: &ListOptions) -> BlobResult<ListPage> {
        self.0.list(options).await
    }

    async fn head(&self, _url: &str) -> BlobResult<StoredObjectDescriptor> {
        futures::future::pending().await
    }

    fn public_base_url(&self) -> &str {
        self.0.public_base_url()
    }
}

/// Store that reads the tracker each time it pulls a body chunk.
struct ProgressRecorder {
    inner: MemoryBlobStore,
    tracker: TransferTracker,
    seen: std::sync::Mutex<Vec<f64>>,
}

#[async_trait]
impl BlobStore for ProgressRecorder {
    async fn put(&self, request: PutRequest, mut body: ByteStream) -> BlobResult<StoredObjectDescriptor> {
        let mut chunks = Vec::new();
        while let Some(chunk) = body.next().await {
            let percentage = self.tracker.snapshot().progress.map_or(0.0, |p| p.percentage);
            self.seen.lock().unwrap().push(percentage);
            chunks.push(chunk);
        }
        self.inner.put(request, Box::pin(futures::stream::iter(chunks))).await
    }

    async fn copy(&self, from_url: &str, to_pathname: &str, options: &CopyOptions) -> BlobResult<StoredObjectDescriptor> {
        self.inner.copy(from_url, to_pathname, options).await
    }

    async fn delete(&self, urls: &[String]) -> BlobResult<()> {
        self.inner.delete(urls).await
    }

    async fn list(&self, options: &ListOptions) -> BlobResult<ListPage> {
        self.inner.list(options).await
    }

    async fn head(&self, url: &str) -> BlobResult<StoredObjectDescriptor> {
        self.inner.head(url).await
    }

    fn public_base_url(&self) -> &str {
        self.inner.public_base_url()
    }
}

fn setup() -> (Arc<MemoryBlobStore>, Arc<CountingIssuer>, Uploader) {
    let store = Arc::new(MemoryBlobStore::new(BASE));
    let issuer = Arc::new(CountingIssuer::default());
    let uploader = Uploader::new(store.clone(), issuer.clone());
    (store, issuer, uploader)
}

fn exact_names() -> UploadOptions {
    UploadOptions::new().with_random_suffix(false)
}

fn text_file(name: &str, body: &'static str) -> FileSource {
    FileSource::from_bytes(name, "text/plain", body)
}

#[tokio::test]
async fn oversized_file_fails_without_network_calls() {
    let (store, issuer, uploader) = setup();
    let tracker = TransferTracker::new();
    let file = FileSource::from_bytes("big.txt", "text/plain", vec![0u8; 2048]);

    let err = uploader
        .upload(file, &exact_names().with_max_size(1024), &tracker, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, BlobError::FileTooLarge { size: 2048, limit: 1024 }));
    assert_eq!(issuer.issued.load(Ordering::SeqCst), 0);
    assert!(store.is_empty());

    let state = tracker.snapshot();
    assert_eq!(state.phase, TransferPhase::Failed);
    assert_eq!(state.last_error.map(|e| e.status), Some(413));
}

#[tokio::test]
async fn successful_upload_reports_full_progress_and_notifies() {
    let (store, issuer, uploader) = setup();
    let tracker = TransferTracker::new();

    let blob = uploader
        .upload(text_file("notes/a.txt", "hello world"), &exact_names(), &tracker, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(blob.pathname, "notes/a.txt");
    assert_eq!(blob.url, format!("{BASE}/notes/a.txt"));
    assert_eq!(store.bytes("notes/a.txt").as_deref(), Some(&b"hello world"[..]));
    assert_eq!(issuer.issued.load(Ordering::SeqCst), 1);
    assert_eq!(issuer.completed.load(Ordering::SeqCst), 1);

    let state = tracker.snapshot();
    assert_eq!(state.phase, TransferPhase::Succeeded);
    assert_eq!(state.progress.map(|p| p.percentage), Some(100.0));
}

#[tokio::test]
async fn chunked_body_reports_rising_percentages() {
    let tracker = TransferTracker::new();
    let store = Arc::new(ProgressRecorder {
        inner: MemoryBlobStore::new(BASE),
        tracker: tracker.clone(),
        seen: Default::default(),
    });
    let uploader = Uploader::new(store.clone(), Arc::new(PolicyTokenIssuer::default()));

    let chunks = [10usize, 20, 30]
        .map(|len| Ok::<_, std::io::Error>(Bytes::from(vec![b'x'; len])));
    let body: ByteStream = Box::pin(futures::stream::iter(chunks));
    let file = FileSource::new("sixty.bin", 60, "application/octet-stream", body);

    uploader
        .upload(file, &exact_names(), &tracker, &CancellationToken::new())
        .await
        .unwrap();

    let seen = store.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![16.67, 50.0, 100.0]);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(tracker.snapshot().phase, TransferPhase::Succeeded);
    assert_eq!(store.inner.bytes("sixty.bin").map(|b| b.len()), Some(60));
}

#[tokio::test]
async fn cancelling_mid_transfer_settles_as_cancelled() {
    let (store, _issuer, uploader) = setup();
    let tracker = TransferTracker::new();
    let cancel = CancellationToken::new();

    let first = futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"0123456789"))]);
    let body: ByteStream = Box::pin(first.chain(futures::stream::pending()));
    let file = FileSource::new("slow.txt", 20, "text/plain", body);

    let task = {
        let (tracker, cancel) = (tracker.clone(), cancel.clone());
        tokio::spawn(async move { uploader.upload(file, &exact_names(), &tracker, &cancel).await })
    };

    let mut rx = tracker.subscribe();
    rx.wait_for(|s| s.progress.as_ref().is_some_and(|p| p.bytes_loaded == 10))
        .await
        .unwrap();
    cancel.cancel();

    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert!(!err.is_retriable());
    assert_eq!(classify(&err).status, 499);
    assert_eq!(tracker.snapshot().phase, TransferPhase::Cancelled);
    assert!(store.is_empty());
}

#[tokio::test]
async fn failing_file_in_a_batch_is_reported_once() {
    let (store, _issuer, uploader) = setup();
    let tracker = TransferTracker::new();
    let files = vec![
        text_file("one.txt", "1"),
        FileSource::from_bytes("two.txt", "text/plain", vec![0u8; 64]),
        text_file("three.txt", "3"),
    ];

    let mut seen = Vec::new();
    let err = uploader
        .upload_many(files, &exact_names().with_max_size(16), &tracker, &CancellationToken::new(), |blob| {
            seen.push(blob.pathname.clone())
        })
        .await
        .unwrap_err();

    assert_eq!(seen, vec!["one.txt".to_string(), "three.txt".to_string()]);
    assert_eq!(store.len(), 2);
    let state = tracker.snapshot();
    assert_eq!(state.phase, TransferPhase::Failed);
    assert!(state.progress.is_none());
    let last_error = state.last_error.unwrap();
    assert!(last_error.message.starts_with("Some uploads failed:"));
    assert!(last_error.message.contains("two.txt: File size"));

    let message = err.to_string();
    let lines: Vec<_> = message.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with("two.txt: File size"));
    match err {
        BlobError::Aggregate { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].file_name, "two.txt");
            assert!(failures[0].reason.contains("exceeds maximum allowed size"));
        }
        other => panic!("expected aggregate error, got {other:?}"),
    }
}

#[tokio::test]
async fn paginated_listing_matches_one_large_page() {
    let (store, _issuer, uploader) = setup();
    let tracker = TransferTracker::new();
    for name in ["a.txt", "b.txt", "c/d.txt", "c/e.txt", "f.txt", "g.txt", "h.txt"] {
        uploader
            .upload(text_file(name, "x"), &exact_names(), &tracker, &CancellationToken::new())
            .await
            .unwrap();
    }

    let client = BlobClient::new(store);
    let cancel = CancellationToken::new();
    let everything = client.list(&ListOptions::new().with_limit(100), &cancel).await.unwrap();
    assert_eq!(everything.blobs.len(), 7);
    assert!(!everything.has_more);

    let mut paged = Vec::new();
    let mut options = ListOptions::new().with_limit(3);
    loop {
        let page = client.list(&options, &cancel).await.unwrap();
        assert!(page.blobs.len() <= 3);
        paged.extend(page.blobs);
        match page.cursor {
            Some(cursor) if page.has_more => options = options.with_cursor(cursor),
            _ => break,
        }
    }
    assert_eq!(paged, everything.blobs);

    let all = client.list_all(ListOptions::new().with_limit(2), &cancel).await.unwrap();
    assert_eq!(all.blobs, everything.blobs);
}

#[tokio::test]
async fn bulk_delete_then_metadata_is_not_found() {
    let (store, _issuer, uploader) = setup();
    let tracker = TransferTracker::new();
    let cancel = CancellationToken::new();
    let a = uploader.upload(text_file("a.txt", "a"), &exact_names(), &tracker, &cancel).await.unwrap();
    let b = uploader.upload(text_file("b.txt", "b"), &exact_names(), &tracker, &cancel).await.unwrap();

    let client = BlobClient::new(store.clone());
    let raw = serde_json::to_string(&[&a.url, &b.url]).unwrap();
    let target = DeleteTarget::from_params(None, Some(&raw)).unwrap();
    let outcome = client.delete(target, &cancel).await.unwrap();
    assert!(matches!(outcome, DeleteOutcome::Bulk { deleted_count: 2, .. }));
    assert!(store.is_empty());

    let err = client.head(&a.url, &cancel).await.unwrap_err();
    assert!(matches!(err, BlobError::NotFound { .. }));
    assert_eq!(classify(&err).status, 404);
}

#[tokio::test]
async fn copy_keeps_source_and_refuses_to_clobber() {
    let (store, _issuer, uploader) = setup();
    let cancel = CancellationToken::new();
    let src = uploader
        .upload(text_file("src.txt", "copy me"), &exact_names(), &TransferTracker::new(), &cancel)
        .await
        .unwrap();

    let client = BlobClient::new(store.clone());
    let copied = client.copy(&src.url, "dst.txt", &CopyOptions::new(), &cancel).await.unwrap();
    assert_eq!(copied.content_type, "text/plain");
    assert_eq!(store.bytes("dst.txt").as_deref(), Some(&b"copy me"[..]));
    assert_eq!(store.len(), 2);

    let err = client.copy(&src.url, "dst.txt", &CopyOptions::new(), &cancel).await.unwrap_err();
    assert_eq!(classify(&err).status, 409);
}

#[tokio::test(start_paused = true)]
async fn management_deadline_reports_cancelled() {
    let store = Arc::new(StalledHead(MemoryBlobStore::new(BASE)));
    let client = BlobClient::new(store).with_timeout(Duration::from_secs(30));

    let err = client
        .head(&format!("{BASE}/a.txt"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(err.to_string(), "Metadata operation was cancelled");
}

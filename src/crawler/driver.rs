//! Pipeline driver
//!
//! Workers share one frontier, fetcher, registry and sink. Each worker loops:
//! claim a URL, fetch it, extract, upsert, enqueue discovered links, settle
//! the URL's frontier state. Only this module decides between retrying a URL
//! and failing it.

use crate::config::CrawlerConfig;
use crate::crawler::failure::CrawlFailure;
use crate::crawler::fetcher::Fetcher;
use crate::crawler::metadata::{RunCounters, RunMetadata};
use crate::extract::{ExtractorRegistry, Page, SiteEntry};
use crate::frontier::{Frontier, FrontierCounts, FrontierError};
use crate::storage::{FrontierStore, Sink, StorageResult, UpsertOutcome};
use crate::DredgeError;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use url::Url;

/// The collaborators a run works with
#[derive(Clone)]
pub struct Pipeline {
    pub frontier: Arc<Frontier>,
    pub fetcher: Arc<Fetcher>,
    pub registry: Arc<ExtractorRegistry>,
    pub sink: Arc<dyn Sink>,
    /// Where frontier checkpoints go; None keeps the frontier in memory only
    pub checkpoints: Option<Arc<dyn FrontierStore>>,
}

impl Pipeline {
    pub fn new(
        frontier: Arc<Frontier>,
        fetcher: Arc<Fetcher>,
        registry: Arc<ExtractorRegistry>,
        sink: Arc<dyn Sink>,
    ) -> Self {
        Self {
            frontier,
            fetcher,
            registry,
            sink,
            checkpoints: None,
        }
    }

    pub fn with_checkpoints(mut self, store: Arc<dyn FrontierStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Persists a snapshot of the frontier
    pub fn checkpoint(&self) -> StorageResult<()> {
        if let Some(store) = &self.checkpoints {
            let snapshot = self.frontier.snapshot();
            store.save_frontier(&snapshot)?;
            debug!("Checkpointed {} frontier entries", snapshot.len());
        }
        Ok(())
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("frontier", &self.frontier.counts())
            .field("sites", &self.registry.len())
            .field("checkpoints", &self.checkpoints.is_some())
            .finish()
    }
}

/// Run limits and retry policy
#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub workers: usize,
    /// Retries allowed after the first attempt
    pub retry_limit: u32,
    pub max_pages: Option<u64>,
    pub max_duration: Option<Duration>,
    pub request_timeout: Duration,
    /// Checkpoint the frontier every this many fetched pages
    pub checkpoint_interval: u64,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self::from_config(&CrawlerConfig::default())
    }
}

impl DriverOptions {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            workers: config.workers.max(1) as usize,
            retry_limit: config.retry_limit,
            max_pages: config.max_pages,
            max_duration: config.max_duration(),
            request_timeout: config.request_timeout(),
            checkpoint_interval: config.checkpoint_interval,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    PageBudget,
    TimeBudget,
    Stopped,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::PageBudget => write!(f, "page budget reached"),
            AbortReason::TimeBudget => write!(f, "time budget reached"),
            AbortReason::Stopped => write!(f, "stopped"),
        }
    }
}

/// Driver lifecycle: `Idle -> Running -> {Completed, Aborted}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Running,
    /// The frontier ran out of work
    Completed,
    Aborted(AbortReason),
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverState::Idle => write!(f, "idle"),
            DriverState::Running => write!(f, "running"),
            DriverState::Completed => write!(f, "completed"),
            DriverState::Aborted(reason) => write!(f, "aborted ({})", reason),
        }
    }
}

/// External stop signal
///
/// Workers stop claiming URLs once it fires; pages already in flight finish
/// first.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!("Stop requested, finishing in-flight pages");
        }
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Resolves once `stop` has been called
    pub async fn stopped(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

/// Outcome of one run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: DriverState,
    pub metadata: RunMetadata,
    pub frontier: FrontierCounts,
}

#[derive(Debug)]
pub struct Driver {
    pipeline: Pipeline,
    options: DriverOptions,
    state: DriverState,
    stop: StopHandle,
    counters: Arc<RunCounters>,
}

impl Driver {
    pub fn new(pipeline: Pipeline, options: DriverOptions) -> Self {
        Self {
            pipeline,
            options,
            state: DriverState::Idle,
            stop: StopHandle::new(),
            counters: Arc::new(RunCounters::new()),
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Handle for stopping the run from another task
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Counters of the current (or finished) run
    pub fn metadata(&self) -> RunMetadata {
        self.counters.snapshot()
    }

    /// Runs until the frontier is exhausted, a budget is hit, or a stop is requested
    ///
    /// The frontier is checkpointed and the sink flushed before returning.
    pub async fn run(&mut self) -> crate::Result<RunReport> {
        if self.state != DriverState::Idle {
            return Err(DredgeError::Driver(format!(
                "cannot start a driver that is {}",
                self.state
            )));
        }
        self.state = DriverState::Running;

        let shared = Arc::new(Shared {
            pipeline: self.pipeline.clone(),
            options: self.options.clone(),
            counters: Arc::clone(&self.counters),
            stop: self.stop.clone(),
            abort: Mutex::new(None),
            claimed: AtomicU64::new(0),
            deadline: self.options.max_duration.map(|d| Instant::now() + d),
        });

        let counts = self.pipeline.frontier.counts();
        info!(
            "Starting crawl: {} pending, {} done, {} failed, {} workers",
            counts.pending, counts.done, counts.failed, self.options.workers
        );

        let mut workers = JoinSet::new();
        for id in 0..self.options.workers {
            workers.spawn(worker(Arc::clone(&shared), id));
        }

        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            let result = joined
                .unwrap_or_else(|e| Err(DredgeError::Driver(format!("worker failed: {}", e))));
            if let Err(e) = result {
                shared.stop.stop();
                failure.get_or_insert(e);
            }
        }

        let checkpointed = self.pipeline.checkpoint();
        let flushed = self.pipeline.sink.flush();

        if let Some(e) = failure {
            self.state = DriverState::Aborted(AbortReason::Stopped);
            return Err(e);
        }
        checkpointed?;
        flushed?;

        let frontier = self.pipeline.frontier.counts();
        self.state = match shared.abort_reason() {
            Some(reason) if !self.pipeline.frontier.is_exhausted() => {
                DriverState::Aborted(reason)
            }
            _ => DriverState::Completed,
        };

        let metadata = self.counters.snapshot();
        info!(
            "Crawl {}: {} pages, {} records written, {} unchanged, {} skipped, {} failures",
            self.state,
            metadata.pages_fetched,
            metadata.records_written,
            metadata.records_unchanged,
            metadata.records_skipped,
            metadata.failures
        );

        Ok(RunReport {
            state: self.state,
            metadata,
            frontier,
        })
    }
}

/// State shared by the workers of one run
struct Shared {
    pipeline: Pipeline,
    options: DriverOptions,
    counters: Arc<RunCounters>,
    stop: StopHandle,
    abort: Mutex<Option<AbortReason>>,
    /// Claims counted against `max_pages`
    claimed: AtomicU64,
    deadline: Option<Instant>,
}

async fn worker(shared: Arc<Shared>, id: usize) -> crate::Result<()> {
    let result = shared.work(id).await;
    if let Err(e) = &result {
        error!("Worker {} failed: {}", id, e);
        shared.stop.stop();
    }
    result
}

async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl Shared {
    async fn work(&self, id: usize) -> crate::Result<()> {
        loop {
            if self.stop.is_stopped() {
                self.abort_with(AbortReason::Stopped);
                break;
            }
            if self.deadline.is_some_and(|at| Instant::now() >= at) {
                self.abort_with(AbortReason::TimeBudget);
                break;
            }
            if !self.reserve_page() {
                self.abort_with(AbortReason::PageBudget);
                break;
            }

            let next = tokio::select! {
                next = self.pipeline.frontier.next_ready() => next,
                _ = self.stop.stopped() => {
                    self.release_page();
                    self.abort_with(AbortReason::Stopped);
                    break;
                }
                _ = deadline_reached(self.deadline) => {
                    self.release_page();
                    self.abort_with(AbortReason::TimeBudget);
                    break;
                }
            };

            let Some(url) = next else {
                self.release_page();
                break;
            };

            trace!("Worker {} claimed {}", id, url);
            self.process(&url).await?;
        }

        trace!("Worker {} finished", id);
        Ok(())
    }

    async fn process(&self, url: &str) -> crate::Result<()> {
        let frontier = &self.pipeline.frontier;
        let parsed = Url::parse(url)?;

        let Some(site) = self.pipeline.registry.resolve(&parsed) else {
            self.release_page();
            warn!("No extractor registered for {}", url);
            let failure = CrawlFailure::PermanentHttp("no extractor for host".to_string());
            frontier.mark_failed(url, &failure.to_string())?;
            self.counters.failure();
            return Ok(());
        };

        debug!("Fetching {} [{}]", url, site.name);
        let result = self
            .pipeline
            .fetcher
            .fetch(&parsed, &site.headers, self.options.request_timeout)
            .await;

        let fetched = self.counters.page_fetched();
        if fetched % 10 == 0 {
            let counts = frontier.counts();
            info!(
                "Progress: {} pages fetched, {} pending, {} done, {} failed",
                fetched, counts.pending, counts.done, counts.failed
            );
        }

        let outcome = CrawlFailure::classify(result.status)
            .and_then(|(body, http_status)| self.handle_page(site, &parsed, &body, http_status));

        match outcome {
            Ok(()) => frontier.mark_done(url)?,
            Err(failure) => self.settle_failure(url, failure)?,
        }

        let interval = self.options.checkpoint_interval;
        if interval > 0 && fetched % interval == 0 {
            if let Err(e) = self.pipeline.checkpoint() {
                warn!("Frontier checkpoint failed: {}", e);
            }
        }

        Ok(())
    }

    fn handle_page(
        &self,
        site: &SiteEntry,
        url: &Url,
        body: &str,
        http_status: u16,
    ) -> Result<(), CrawlFailure> {
        let page = Page {
            url,
            body,
            http_status,
        };
        let extraction = site.extractor.extract(&page);

        for skipped in &extraction.skipped {
            warn!("Skipped item on {}: {}", url, skipped);
        }
        self.counters.records_skipped(extraction.skipped.len());

        for record in &extraction.records {
            match self.pipeline.sink.upsert(record) {
                Ok(UpsertOutcome::Written) => self.counters.record_written(),
                Ok(UpsertOutcome::Unchanged) => self.counters.record_unchanged(),
                Err(e) => return Err(CrawlFailure::Persistence(e.to_string())),
            }
        }

        let mut discovered = 0;
        for link in &extraction.next_urls {
            if !self.pipeline.registry.covers(link) {
                trace!("Out of scope: {}", link);
                continue;
            }
            match self.pipeline.frontier.enqueue(link.as_str()) {
                Ok(true) => discovered += 1,
                Ok(false) => {}
                Err(e) => debug!("Not enqueueing {}: {}", link, e),
            }
        }

        debug!(
            "{}: {} records, {} skipped, {} new links",
            url,
            extraction.records.len(),
            extraction.skipped.len(),
            discovered
        );
        Ok(())
    }

    fn settle_failure(&self, url: &str, failure: CrawlFailure) -> Result<(), FrontierError> {
        let frontier = &self.pipeline.frontier;
        let retries = frontier.entry(url).map(|entry| entry.retries()).unwrap_or(0);
        let reason = failure.to_string();

        if failure.is_retryable() && retries < self.options.retry_limit {
            info!(
                "Retrying {} after {} (retry {} of {})",
                url,
                reason,
                retries + 1,
                self.options.retry_limit
            );
            frontier.requeue(url, &reason)?;
            self.counters.retry();
        } else {
            warn!("Failed {}: {}", url, reason);
            frontier.mark_failed(url, &reason)?;
            self.counters.failure();
        }
        Ok(())
    }

    fn reserve_page(&self) -> bool {
        match self.options.max_pages {
            Some(max) => self
                .claimed
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < max).then_some(n + 1)
                })
                .is_ok(),
            None => true,
        }
    }

    fn release_page(&self) {
        if self.options.max_pages.is_some() {
            self.claimed.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Records why the run is ending; the first reason wins
    fn abort_with(&self, reason: AbortReason) {
        let mut abort = self.abort.lock().unwrap_or_else(PoisonError::into_inner);
        if abort.is_none() {
            debug!("Run ending: {}", reason);
            *abort = Some(reason);
        }
    }

    fn abort_reason(&self) -> Option<AbortReason> {
        *self.abort.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinksConfig;
    use crate::crawler::politeness::Politeness;
    use crate::extract::LinksExtractor;
    use crate::record::Record;
    use crate::state::EntryState;
    use crate::storage::{MemorySink, SqliteStore, StorageError, StoredRecord};
    use std::sync::atomic::AtomicUsize;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn html(links: &[&str]) -> String {
        let anchors: String = links
            .iter()
            .map(|href| format!("<a href=\"{}\">link</a>", href))
            .collect();
        format!(
            "<html><head><title>Page</title></head><body>{}</body></html>",
            anchors
        )
    }

    fn registry(pattern: &str) -> ExtractorRegistry {
        let extractor = LinksExtractor::new("site", &LinksConfig::default()).unwrap();
        let mut registry = ExtractorRegistry::new();
        registry.register(SiteEntry::new("site", pattern, Arc::new(extractor)));
        registry
    }

    fn pipeline(frontier: &Arc<Frontier>, sink: Arc<dyn Sink>, pattern: &str) -> Pipeline {
        let politeness = Politeness::new(
            Duration::ZERO,
            Duration::from_millis(10),
            Duration::from_millis(50),
        );
        let fetcher = Fetcher::with_client(reqwest::Client::new(), politeness, None);
        Pipeline::new(
            Arc::clone(frontier),
            Arc::new(fetcher),
            Arc::new(registry(pattern)),
            sink,
        )
    }

    fn options() -> DriverOptions {
        DriverOptions {
            workers: 1,
            retry_limit: 3,
            max_pages: None,
            max_duration: None,
            request_timeout: Duration::from_secs(5),
            checkpoint_interval: 25,
        }
    }

    fn seed(frontier: &Frontier, server: &MockServer, route: &str) -> String {
        let url = format!("{}{}", server.uri(), route);
        frontier.enqueue(&url).unwrap();
        Frontier::key_for(&url).unwrap()
    }

    /// Fails the first `failures` upserts, then delegates to a MemorySink
    #[derive(Debug, Default)]
    struct FlakySink {
        inner: MemorySink,
        failures: AtomicUsize,
    }

    impl Sink for FlakySink {
        fn upsert(&self, record: &Record) -> StorageResult<UpsertOutcome> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(StorageError::Unavailable("database is locked".into()));
            }
            self.inner.upsert(record)
        }

        fn exists(&self, collection: &str, key: &str) -> StorageResult<bool> {
            self.inner.exists(collection, key)
        }

        fn get(&self, collection: &str, key: &str) -> StorageResult<Option<StoredRecord>> {
            self.inner.get(collection, key)
        }

        fn records(&self, collection: &str) -> StorageResult<Vec<StoredRecord>> {
            self.inner.records(collection)
        }

        fn count(&self, collection: Option<&str>) -> StorageResult<u64> {
            self.inner.count(collection)
        }

        fn collections(&self) -> StorageResult<Vec<String>> {
            self.inner.collections()
        }
    }

    #[tokio::test]
    async fn test_follows_links_until_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html(&[
                "/a",
                "/b",
                "https://elsewhere.example.org/x",
            ])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html(&["/", "/b"])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html(&[])))
            .expect(1)
            .mount(&server)
            .await;

        let frontier = Arc::new(Frontier::new());
        seed(&frontier, &server, "/");
        let sink = Arc::new(MemorySink::new());

        let mut driver = Driver::new(pipeline(&frontier, sink.clone(), "127.0.0.1"), options());
        assert_eq!(driver.state(), DriverState::Idle);

        let report = driver.run().await.unwrap();

        assert_eq!(report.state, DriverState::Completed);
        assert_eq!(driver.state(), DriverState::Completed);
        assert_eq!(report.frontier.done, 3);
        assert_eq!(report.frontier.failed, 0);
        assert_eq!(report.metadata.pages_fetched, 3);
        assert_eq!(report.metadata.records_written, 3);
        assert_eq!(sink.count(Some("site")).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let frontier = Arc::new(Frontier::new());
        let key = seed(&frontier, &server, "/missing");

        let mut driver = Driver::new(
            pipeline(&frontier, Arc::new(MemorySink::new()), "127.0.0.1"),
            options(),
        );
        let report = driver.run().await.unwrap();

        assert_eq!(report.state, DriverState::Completed);
        assert_eq!(frontier.state_of(&key), Some(EntryState::Failed));
        assert_eq!(frontier.attempts(&key), Some(1));
        assert_eq!(report.metadata.retries, 0);
        assert_eq!(report.metadata.failures, 1);

        let entry = frontier.entry(&key).unwrap();
        assert_eq!(
            entry.last_error.as_deref(),
            Some("permanent failure: HTTP 404 Not Found")
        );
    }

    #[tokio::test]
    async fn test_transient_error_retries_up_to_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let frontier = Arc::new(Frontier::new());
        let key = seed(&frontier, &server, "/flaky");

        let mut driver = Driver::new(
            pipeline(&frontier, Arc::new(MemorySink::new()), "127.0.0.1"),
            DriverOptions {
                retry_limit: 2,
                ..options()
            },
        );
        let report = driver.run().await.unwrap();

        assert_eq!(frontier.state_of(&key), Some(EntryState::Failed));
        assert_eq!(frontier.attempts(&key), Some(3));
        assert_eq!(report.metadata.retries, 2);
        assert_eq!(report.metadata.failures, 1);
        assert_eq!(report.metadata.pages_fetched, 3);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html(&[])))
            .expect(2)
            .mount(&server)
            .await;

        let frontier = Arc::new(Frontier::new());
        let key = seed(&frontier, &server, "/item");
        let sink = Arc::new(FlakySink {
            inner: MemorySink::new(),
            failures: AtomicUsize::new(1),
        });

        let mut driver = Driver::new(pipeline(&frontier, sink.clone(), "127.0.0.1"), options());
        let report = driver.run().await.unwrap();

        assert_eq!(frontier.state_of(&key), Some(EntryState::Done));
        assert_eq!(report.metadata.retries, 1);
        assert_eq!(sink.count(None).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_page_budget_aborts_with_pending_left() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html(&[])))
            .expect(5)
            .mount(&server)
            .await;

        let frontier = Arc::new(Frontier::new());
        for i in 0..10 {
            seed(&frontier, &server, &format!("/page-{}", i));
        }

        let mut driver = Driver::new(
            pipeline(&frontier, Arc::new(MemorySink::new()), "127.0.0.1"),
            DriverOptions {
                max_pages: Some(5),
                ..options()
            },
        );
        let report = driver.run().await.unwrap();

        assert_eq!(report.state, DriverState::Aborted(AbortReason::PageBudget));
        assert_eq!(report.frontier.done, 5);
        assert_eq!(report.frontier.pending, 5);
        assert_eq!(report.frontier.in_flight, 0);
    }

    #[tokio::test]
    async fn test_budget_not_reached_when_frontier_runs_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html(&[])))
            .mount(&server)
            .await;

        let frontier = Arc::new(Frontier::new());
        for i in 0..3 {
            seed(&frontier, &server, &format!("/page-{}", i));
        }

        let mut driver = Driver::new(
            pipeline(&frontier, Arc::new(MemorySink::new()), "127.0.0.1"),
            DriverOptions {
                max_pages: Some(3),
                ..options()
            },
        );
        let report = driver.run().await.unwrap();

        assert_eq!(report.state, DriverState::Completed);
        assert_eq!(report.frontier.done, 3);
    }

    #[tokio::test]
    async fn test_time_budget_aborts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let frontier = Arc::new(Frontier::new());
        seed(&frontier, &server, "/");

        let mut driver = Driver::new(
            pipeline(&frontier, Arc::new(MemorySink::new()), "127.0.0.1"),
            DriverOptions {
                max_duration: Some(Duration::ZERO),
                ..options()
            },
        );
        let report = driver.run().await.unwrap();

        assert_eq!(report.state, DriverState::Aborted(AbortReason::TimeBudget));
        assert_eq!(report.frontier.pending, 1);
    }

    #[tokio::test]
    async fn test_stop_before_run_keeps_frontier() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let frontier = Arc::new(Frontier::new());
        let key = seed(&frontier, &server, "/");

        let mut driver = Driver::new(
            pipeline(&frontier, Arc::new(MemorySink::new()), "127.0.0.1"),
            options(),
        );
        driver.stop_handle().stop();
        let report = driver.run().await.unwrap();

        assert_eq!(report.state, DriverState::Aborted(AbortReason::Stopped));
        assert_eq!(frontier.state_of(&key), Some(EntryState::Pending));
        assert_eq!(report.metadata.pages_fetched, 0);
    }

    #[tokio::test]
    async fn test_stop_mid_fetch_finishes_page_then_resumes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(html(&["/a", "/b"]))
                    .set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&server)
            .await;
        for route in ["/a", "/b"] {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(200).set_body_string(html(&[])))
                .expect(1)
                .mount(&server)
                .await;
        }

        let frontier = Arc::new(Frontier::new());
        let slow = seed(&frontier, &server, "/slow");
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let sink = Arc::new(MemorySink::new());

        let first_run =
            pipeline(&frontier, sink.clone(), "127.0.0.1").with_checkpoints(store.clone());
        let mut driver = Driver::new(first_run, options());
        let stop = driver.stop_handle();
        let stop_when_in_flight = async {
            while frontier.state_of(&slow) != Some(EntryState::InFlight) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            stop.stop();
        };

        let (report, ()) = tokio::join!(driver.run(), stop_when_in_flight);
        let report = report.unwrap();

        assert_eq!(report.state, DriverState::Aborted(AbortReason::Stopped));
        assert_eq!(frontier.state_of(&slow), Some(EntryState::Done));
        assert_eq!(report.frontier.done, 1);
        assert_eq!(report.frontier.pending, 2);
        assert_eq!(report.metadata.pages_fetched, 1);
        assert_eq!(sink.count(Some("site")).unwrap(), 1);

        let resumed = Arc::new(Frontier::new());
        resumed.restore(store.load_frontier().unwrap());
        assert_eq!(resumed.state_of(&slow), Some(EntryState::Done));

        let mut driver = Driver::new(pipeline(&resumed, sink.clone(), "127.0.0.1"), options());
        let report = driver.run().await.unwrap();

        assert_eq!(report.state, DriverState::Completed);
        assert_eq!(report.frontier.done, 3);
        assert_eq!(report.metadata.pages_fetched, 2);
        assert_eq!(sink.count(Some("site")).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_url_without_extractor_fails_unfetched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let frontier = Arc::new(Frontier::new());
        let key = seed(&frontier, &server, "/");

        let mut driver = Driver::new(
            pipeline(&frontier, Arc::new(MemorySink::new()), "example.org"),
            options(),
        );
        let report = driver.run().await.unwrap();

        assert_eq!(report.state, DriverState::Completed);
        assert_eq!(frontier.state_of(&key), Some(EntryState::Failed));
        assert_eq!(report.metadata.failures, 1);
    }

    #[tokio::test]
    async fn test_workers_never_fetch_a_url_twice() {
        let server = MockServer::start().await;
        let routes: Vec<String> = (0..8).map(|i| format!("/item-{}", i)).collect();
        let hrefs: Vec<&str> = routes.iter().map(String::as_str).collect();

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html(&hrefs)))
            .expect(1)
            .mount(&server)
            .await;
        for route in &routes {
            Mock::given(method("GET"))
                .and(path(route.as_str()))
                .respond_with(ResponseTemplate::new(200).set_body_string(html(&hrefs)))
                .expect(1)
                .mount(&server)
                .await;
        }

        let frontier = Arc::new(Frontier::new());
        seed(&frontier, &server, "/");

        let mut driver = Driver::new(
            pipeline(&frontier, Arc::new(MemorySink::new()), "127.0.0.1"),
            DriverOptions {
                workers: 4,
                ..options()
            },
        );
        let report = driver.run().await.unwrap();

        assert_eq!(report.state, DriverState::Completed);
        assert_eq!(report.frontier.done, 9);
        assert_eq!(report.metadata.pages_fetched, 9);
    }

    #[tokio::test]
    async fn test_final_checkpoint_is_saved() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html(&["/next"])))
            .mount(&server)
            .await;

        let frontier = Arc::new(Frontier::new());
        seed(&frontier, &server, "/");
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());

        let pipeline = pipeline(&frontier, Arc::new(MemorySink::new()), "127.0.0.1")
            .with_checkpoints(store.clone());
        let mut driver = Driver::new(pipeline, options());
        driver.run().await.unwrap();

        let saved = store.load_frontier().unwrap();
        assert_eq!(saved.len(), 2);
        assert!(saved.iter().all(|entry| entry.state == EntryState::Done));
    }

    #[tokio::test]
    async fn test_driver_runs_once() {
        let frontier = Arc::new(Frontier::new());
        let mut driver = Driver::new(
            pipeline(&frontier, Arc::new(MemorySink::new()), "127.0.0.1"),
            options(),
        );

        let report = driver.run().await.unwrap();
        assert_eq!(report.state, DriverState::Completed);
        assert!(matches!(driver.run().await, Err(DredgeError::Driver(_))));
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Batch runner — recognises every page of every source on a bounded pool of
// blocking workers.
//
// Pages are independent. Each one is rendered and recognised inside
// `spawn_blocking` under a per-page timeout; a timeout or panic fails only
// that page. Cancelling the token stops dispatch: pages already running
// finish and are reported, pages never started are listed as not processed.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use markwerk_core::config::BatchConfig;
use markwerk_core::types::{FailureKind, PageFailure, PageRef, PageResult, PageStage};
use image::DynamicImage;
use markwerk_core::error::Result;
use markwerk_document::source::{PageSource, open_source_named, source_names};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::page::PageRecognizer;

/// Execution limits for one batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchOptions {
    pub workers: usize,
    pub page_timeout: Duration,
    pub dpi: u32,
}

impl From<&BatchConfig> for BatchOptions {
    fn from(config: &BatchConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            page_timeout: Duration::from_secs(config.page_timeout_secs.max(1)),
            dpi: config.render_dpi,
        }
    }
}

/// Outcome of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    /// One terminal result per dispatched page, sorted by (source, page).
    pub pages: Vec<PageResult>,
    /// Pages never started because the batch was cancelled.
    pub not_processed: Vec<PageRef>,
    pub aborted: bool,
}

impl BatchReport {
    pub fn failed_count(&self) -> usize {
        self.pages.iter().filter(|p| !p.is_finalized()).count()
    }

    /// Every page finalized and nothing left undone.
    pub fn is_clean(&self) -> bool {
        !self.aborted && self.not_processed.is_empty() && self.failed_count() == 0
    }
}

/// Open every input path. Sources that cannot be opened come back as failed
/// first pages so they still show up in the report.
///
/// Inputs sharing a file name are named by their full path so each page has
/// one identity.
#[instrument(skip_all, fields(count = paths.len()))]
pub async fn open_sources(paths: Vec<PathBuf>) -> (Vec<Arc<dyn PageSource>>, Vec<PageResult>) {
    let names = source_names(&paths);
    let mut sources = Vec::new();
    let mut failures = Vec::new();
    for (path, name) in paths.into_iter().zip(names) {
        let task_name = name.clone();
        let opened = tokio::task::spawn_blocking(move || open_source_named(&path, task_name)).await;
        match opened {
            Ok(Ok(source)) => sources.push(Arc::from(source)),
            Ok(Err(err)) => {
                warn!(source = %name, error = %err, "Source could not be opened");
                failures.push(PageResult::failed(
                    PageRef::new(name, 0),
                    "",
                    PageStage::Loaded,
                    PageFailure::new(FailureKind::Rasterization, err.to_string()),
                ));
            }
            Err(join_err) => {
                error!(source = %name, error = %join_err, "Source loader panicked");
                failures.push(PageResult::failed(
                    PageRef::new(name, 0),
                    "",
                    PageStage::Loaded,
                    PageFailure::new(FailureKind::Internal, join_err.to_string()),
                ));
            }
        }
    }
    (sources, failures)
}

/// A source reported under a different name.
struct Renamed {
    inner: Arc<dyn PageSource>,
    name: String,
}

impl PageSource for Renamed {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_hash(&self) -> &str {
        self.inner.source_hash()
    }

    fn page_count(&self) -> usize {
        self.inner.page_count()
    }

    fn render_page(&self, index: usize, dpi: u32) -> Result<DynamicImage> {
        self.inner.render_page(index, dpi)
    }
}

/// Give repeated source names a `#n` suffix; the first keeps its name.
pub fn with_unique_names(sources: Vec<Arc<dyn PageSource>>) -> Vec<Arc<dyn PageSource>> {
    let mut seen: HashSet<String> = sources.iter().map(|s| s.name().to_string()).collect();
    let mut first_use: HashSet<String> = HashSet::new();
    sources
        .into_iter()
        .map(|source| {
            if first_use.insert(source.name().to_string()) {
                return source;
            }
            let base = source.name().to_string();
            let name = (2..)
                .map(|n| format!("{base}#{n}"))
                .find(|candidate| !seen.contains(candidate))
                .unwrap_or_else(|| format!("{base}#{}", seen.len() + 1));
            seen.insert(name.clone());
            warn!(source = %base, renamed = %name, "Duplicate source name");
            Arc::new(Renamed { inner: source, name }) as Arc<dyn PageSource>
        })
        .collect()
}

/// Runs page recognition over many sources.
pub struct BatchRunner {
    recognizer: Arc<PageRecognizer>,
    options: BatchOptions,
}

impl BatchRunner {
    pub fn new(recognizer: Arc<PageRecognizer>, options: BatchOptions) -> Self {
        Self {
            recognizer,
            options,
        }
    }

    #[instrument(skip_all, fields(sources = sources.len(), workers = self.options.workers))]
    pub async fn run(&self, sources: Vec<Arc<dyn PageSource>>, cancel: CancellationToken) -> BatchReport {
        let sources = with_unique_names(sources);
        let work: Vec<(Arc<dyn PageSource>, usize)> = sources
            .iter()
            .flat_map(|source| (0..source.page_count()).map(move |index| (Arc::clone(source), index)))
            .collect();
        info!(pages = work.len(), "Starting batch");

        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let mut join_set = JoinSet::new();
        let mut in_flight: BTreeSet<PageRef> = BTreeSet::new();
        let mut report = BatchReport::default();

        let mut queue = work.into_iter();
        while let Some((source, index)) = queue.next() {
            let page = PageRef::new(source.name(), index);
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                report.not_processed.push(page);
                report
                    .not_processed
                    .extend(queue.by_ref().map(|(s, i)| PageRef::new(s.name(), i)));
                break;
            };

            in_flight.insert(page.clone());
            let recognizer = Arc::clone(&self.recognizer);
            let options = self.options;
            join_set.spawn(async move {
                let hash = source.source_hash().to_string();
                let task_page = page.clone();
                // The permit lives as long as the blocking work, even past a timeout.
                let work = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    recognizer.process(source.as_ref(), index, options.dpi)
                });
                match tokio::time::timeout(options.page_timeout, work).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(join_err)) => {
                        error!(page = %task_page, error = %join_err, "Page worker panicked");
                        PageResult::failed(
                            task_page,
                            hash,
                            PageStage::Loaded,
                            PageFailure::new(FailureKind::Internal, format!("page worker panicked: {join_err}")),
                        )
                    }
                    Err(_) => {
                        warn!(page = %task_page, timeout = ?options.page_timeout, "Page timed out");
                        PageResult::failed(
                            task_page,
                            hash,
                            PageStage::Loaded,
                            PageFailure::new(
                                FailureKind::Timeout,
                                format!("page not finished within {}s", options.page_timeout.as_secs()),
                            ),
                        )
                    }
                }
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => {
                    in_flight.remove(&result.page);
                    report.pages.push(result);
                }
                Err(join_err) => error!(error = %join_err, "Page task failed"),
            }
        }
        // Tasks lost to a join error still get a terminal result.
        for page in in_flight {
            report.pages.push(PageResult::failed(
                page,
                "",
                PageStage::Loaded,
                PageFailure::new(FailureKind::Internal, "page task ended without a result"),
            ));
        }

        report.pages.sort_by(|a, b| a.page.cmp(&b.page));
        report.aborted = cancel.is_cancelled();
        info!(
            finished = report.pages.len(),
            failed = report.failed_count(),
            not_processed = report.not_processed.len(),
            aborted = report.aborted,
            "Batch complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::tests::{filled_sheet, recognizer};
    use image::{DynamicImage, Rgb, RgbImage};
    use markwerk_core::error::Result;
    use markwerk_document::ImageFileSource;
    use markwerk_document::scan::DisabledRecognizer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn runner(workers: usize, timeout: Duration) -> BatchRunner {
        BatchRunner::new(
            Arc::new(recognizer(Arc::new(DisabledRecognizer))),
            BatchOptions {
                workers,
                page_timeout: timeout,
                dpi: 72,
            },
        )
    }

    fn image_source(name: &str, image: DynamicImage) -> Arc<dyn PageSource> {
        Arc::new(ImageFileSource::from_dynamic(name, image))
    }

    /// Source whose pages take longer to render than any sane timeout.
    struct SlowSource;

    impl PageSource for SlowSource {
        fn name(&self) -> &str {
            "slow.pdf"
        }

        fn source_hash(&self) -> &str {
            "slow"
        }

        fn page_count(&self) -> usize {
            1
        }

        fn render_page(&self, _index: usize, _dpi: u32) -> Result<DynamicImage> {
            std::thread::sleep(Duration::from_secs(4));
            Ok(filled_sheet(&[]))
        }
    }

    #[tokio::test]
    async fn blank_page_fails_and_batch_continues() {
        let blank = DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 400, Rgb([245, 245, 245])));
        let sources = vec![
            image_source("c.png", filled_sheet(&[(1, 0)])),
            image_source("a.png", blank),
            image_source("b.png", filled_sheet(&[(1, 2), (2, 3)])),
        ];
        let report = runner(2, Duration::from_secs(30))
            .run(sources, CancellationToken::new())
            .await;

        let names: Vec<&str> = report.pages.iter().map(|p| p.page.source.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.png", "c.png"]);
        assert!(!report.pages[0].is_finalized());
        assert_eq!(report.pages[0].failure().unwrap().kind, FailureKind::Alignment);
        assert!(report.pages[1].is_finalized());
        assert!(report.pages[2].is_finalized());
        assert_eq!(report.failed_count(), 1);
        assert!(!report.aborted);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn cancelled_batch_reports_undispatched_pages() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sources = vec![
            image_source("a.png", filled_sheet(&[(1, 0)])),
            image_source("b.png", filled_sheet(&[(1, 1)])),
        ];
        let report = runner(1, Duration::from_secs(30)).run(sources, cancel).await;
        assert!(report.aborted);
        assert!(report.pages.is_empty());
        assert_eq!(
            report.not_processed,
            vec![PageRef::new("a.png", 0), PageRef::new("b.png", 0)]
        );
    }

    #[tokio::test]
    async fn slow_page_times_out_alone() {
        let sources: Vec<Arc<dyn PageSource>> = vec![
            Arc::new(SlowSource),
            image_source("fast.png", filled_sheet(&[(2, 1)])),
        ];
        let report = runner(2, Duration::from_millis(1500))
            .run(sources, CancellationToken::new())
            .await;
        assert_eq!(report.pages.len(), 2);
        let fast = report.pages.iter().find(|p| p.page.source == "fast.png").unwrap();
        let slow = report.pages.iter().find(|p| p.page.source == "slow.pdf").unwrap();
        assert!(fast.is_finalized());
        assert_eq!(slow.failure().unwrap().kind, FailureKind::Timeout);
        assert_eq!(slow.source_hash, "slow");
    }

    #[tokio::test]
    async fn completion_order_does_not_change_results() {
        let make = || {
            vec![
                image_source("x.png", filled_sheet(&[(1, 3)])),
                image_source("y.png", filled_sheet(&[(2, 2)])),
                image_source("z.png", filled_sheet(&[(1, 1), (2, 0)])),
            ]
        };
        let serial = runner(1, Duration::from_secs(30)).run(make(), CancellationToken::new()).await;
        let parallel = runner(3, Duration::from_secs(30)).run(make(), CancellationToken::new()).await;
        assert_eq!(
            serde_json::to_string(&serial).unwrap(),
            serde_json::to_string(&parallel).unwrap()
        );
    }

    #[tokio::test]
    async fn unreadable_paths_become_failed_pages() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("broken.png");
        std::fs::write(&bogus, b"not an image").unwrap();
        let (sources, failures) = open_sources(vec![bogus]).await;
        assert!(sources.is_empty());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].page, PageRef::new("broken.png", 0));
        assert_eq!(failures[0].failure().unwrap().kind, FailureKind::Rasterization);
    }

    #[tokio::test]
    async fn shared_source_names_stay_distinct_pages() {
        let sources = vec![
            image_source("scan.png", filled_sheet(&[(1, 0), (2, 1)])),
            image_source("scan.png", filled_sheet(&[(1, 2), (2, 3)])),
        ];
        let report = runner(2, Duration::from_secs(30))
            .run(sources, CancellationToken::new())
            .await;
        let refs: Vec<&PageRef> = report.pages.iter().map(|p| &p.page).collect();
        assert_eq!(refs, vec![&PageRef::new("scan.png", 0), &PageRef::new("scan.png#2", 0)]);

        let store = crate::store::ResultStore::open_in_memory().unwrap();
        store.save_pages(&report.pages).unwrap();
        assert_eq!(store.load_all().unwrap().len(), 2);

        let key = markwerk_core::key::AnswerKey::new([(1, "A".to_string()), (2, "B".to_string())]).unwrap();
        let options = markwerk_core::config::ScoringOptions {
            exclude_key_page: Some(PageRef::new("scan.png", 0)),
            ..Default::default()
        };
        let scored = crate::scoring::score(&report.pages, &key, &options);
        assert_eq!(scored.summary.scored_pages, 1);
        assert_eq!(scored.pages[0].page.source, "scan.png#2");
    }

    /// Source that records how many renders run at once.
    struct CountedSource {
        name: String,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl PageSource for CountedSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn source_hash(&self) -> &str {
            "counted"
        }

        fn page_count(&self) -> usize {
            1
        }

        fn render_page(&self, _index: usize, _dpi: u32) -> Result<DynamicImage> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(filled_sheet(&[]))
        }
    }

    #[tokio::test]
    async fn timed_out_pages_hold_their_worker() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let sources: Vec<Arc<dyn PageSource>> = (0..3)
            .map(|i| {
                Arc::new(CountedSource {
                    name: format!("stuck-{i}.pdf"),
                    active: Arc::clone(&active),
                    peak: Arc::clone(&peak),
                    delay: Duration::from_millis(500),
                }) as Arc<dyn PageSource>
            })
            .collect();
        let report = runner(1, Duration::from_millis(100))
            .run(sources, CancellationToken::new())
            .await;
        assert_eq!(report.pages.len(), 3);
        assert!(report
            .pages
            .iter()
            .all(|p| p.failure().map(|f| f.kind) == Some(FailureKind::Timeout)));
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    /// Source whose render cancels the batch, as a Ctrl-C mid-page would.
    struct InterruptingSource {
        cancel: CancellationToken,
    }

    impl PageSource for InterruptingSource {
        fn name(&self) -> &str {
            "a.png"
        }

        fn source_hash(&self) -> &str {
            "interrupting"
        }

        fn page_count(&self) -> usize {
            1
        }

        fn render_page(&self, _index: usize, _dpi: u32) -> Result<DynamicImage> {
            self.cancel.cancel();
            std::thread::sleep(Duration::from_millis(300));
            Ok(filled_sheet(&[(1, 1)]))
        }
    }

    #[tokio::test]
    async fn cancel_mid_run_finishes_in_flight_page() {
        let cancel = CancellationToken::new();
        let sources: Vec<Arc<dyn PageSource>> = vec![
            Arc::new(InterruptingSource { cancel: cancel.clone() }),
            image_source("b.png", filled_sheet(&[(1, 0)])),
            image_source("c.png", filled_sheet(&[(2, 3)])),
        ];
        let report = runner(1, Duration::from_secs(30)).run(sources, cancel).await;

        assert!(report.aborted);
        assert_eq!(report.pages.len(), 1);
        assert_eq!(report.pages[0].page, PageRef::new("a.png", 0));
        assert!(report.pages[0].is_finalized());
        assert_eq!(
            report.not_processed,
            vec![PageRef::new("b.png", 0), PageRef::new("c.png", 0)]
        );
    }
}

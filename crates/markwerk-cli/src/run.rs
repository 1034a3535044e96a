// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// One grading run: configure, recognise every page, persist, score, report.

use std::path::Path;
use std::sync::Arc;

use markwerk_core::config::AppConfig;
use markwerk_core::error::{MarkwerkError, Result};
use markwerk_core::key::{AnswerKey, TopicMap};
use markwerk_core::template::Template;
use markwerk_core::types::PageRef;
use markwerk_document::scan::build_recognizer;
use markwerk_document::source::source_names;
use markwerk_omr::{
    BatchOptions, BatchReport, BatchRunner, OverrideEvent, PageRecognizer, ResultStore, ReviewLedger,
    ScoreReport, Scorer, key_from_sheet, open_sources, with_unique_names, write_annotations,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::args::{Args, OverrideArg};
use crate::data_dir;

pub const EXIT_CLEAN: u8 = 0;
pub const EXIT_FATAL: u8 = 1;
pub const EXIT_PAGES_FAILED: u8 = 2;
pub const EXIT_ABORTED: u8 = 130;

const OVERRIDE_REASON: &str = "command line";

/// Everything a run produces; serialised as the report file.
#[derive(Debug, Serialize)]
pub struct RunOutcome {
    pub batch: BatchReport,
    /// Absent when no answer key was given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<ScoreReport>,
}

impl RunOutcome {
    pub fn exit_code(&self) -> u8 {
        if self.batch.aborted {
            EXIT_ABORTED
        } else if self.batch.is_clean() {
            EXIT_CLEAN
        } else {
            EXIT_PAGES_FAILED
        }
    }
}

enum KeySource {
    File(AnswerKey),
    Sheet(PageRef),
    Missing,
}

/// Resolve the effective configuration: saved file, then command line flags.
pub fn effective_config(args: &Args) -> Result<AppConfig> {
    let mut config = data_dir::load_config(args.config.as_deref())?;
    args.apply_to(&mut config);
    if args.save_config {
        let path = args.config.clone().unwrap_or_else(data_dir::default_config_path);
        data_dir::persist_config(&path, &config)?;
    }
    Ok(config)
}

#[instrument(skip_all, fields(inputs = args.inputs.len()))]
pub async fn run(args: &Args, cancel: CancellationToken) -> Result<RunOutcome> {
    let mut config = effective_config(args)?;
    let template = Arc::new(Template::load(&args.template)?);
    let topics = match &args.topics {
        Some(path) => Some(TopicMap::load(path)?),
        None => None,
    };
    let key_source = match (&args.answer_key, args.key_page) {
        (Some(path), _) => KeySource::File(AnswerKey::load(path)?),
        (None, true) => {
            let first = source_names(&args.inputs)
                .into_iter()
                .next()
                .ok_or_else(|| MarkwerkError::InvalidAnswerKey("no input holds the key sheet".into()))?;
            let sheet = PageRef::new(first, 0);
            config.scoring.exclude_key_page = Some(sheet.clone());
            KeySource::Sheet(sheet)
        }
        (None, false) => KeySource::Missing,
    };

    let ocr = build_recognizer(&config.ocr)?;
    info!(
        template = %template.name,
        ocr = ocr.name(),
        workers = config.batch.workers,
        "Grading run configured"
    );
    let recognizer = Arc::new(PageRecognizer::new(Arc::clone(&template), config.recognition.clone(), ocr));

    let (sources, open_failures) = open_sources(args.inputs.clone()).await;
    let sources = with_unique_names(sources);
    let runner = BatchRunner::new(recognizer, BatchOptions::from(&config.batch));
    let mut batch = runner.run(sources.clone(), cancel).await;
    if !open_failures.is_empty() {
        batch.pages.extend(open_failures);
        batch.pages.sort_by(|a, b| a.page.cmp(&b.page));
    }

    let corrections = bind_corrections(&args.overrides, &batch);
    let ledger = match &args.db {
        Some(path) => persist(path, &batch, corrections).await?,
        None => {
            let mut ledger = ReviewLedger::new();
            for (correction, source_hash) in &corrections {
                record(&mut ledger, correction, source_hash);
            }
            ledger
        }
    };

    let key = match key_source {
        KeySource::File(key) => Some(key),
        KeySource::Sheet(sheet) => match key_from_sheet(&batch.pages, &sheet) {
            Ok(key) => Some(key),
            Err(err) if batch.aborted => {
                warn!(error = %err, "Key sheet unavailable after abort, skipping scoring");
                None
            }
            Err(err) => return Err(err),
        },
        KeySource::Missing => None,
    };

    let score = key.as_ref().map(|key| {
        let mut scorer = Scorer::new(&key, &config.scoring).with_overrides(&ledger);
        if let Some(topics) = &topics {
            scorer = scorer.with_topics(topics);
        }
        scorer.score(&batch.pages)
    });

    if let Some(dir) = &args.annotate {
        let dir = dir.clone();
        let pages = batch.pages.clone();
        let dpi = config.batch.render_dpi;
        tokio::task::spawn_blocking(move || {
            write_annotations(&dir, &sources, &pages, &template, key.as_ref(), dpi)
        })
        .await
        .map_err(|e| MarkwerkError::ImageError(format!("annotation task failed: {e}")))??;
    }

    Ok(RunOutcome { batch, score })
}

/// Pair each correction with the hash of the scan it names. Corrections for
/// pages this run did not see are dropped with a warning.
fn bind_corrections(corrections: &[OverrideArg], batch: &BatchReport) -> Vec<(OverrideArg, String)> {
    corrections
        .iter()
        .filter_map(|correction| {
            match batch.pages.iter().find(|p| p.page == correction.page) {
                Some(page) => Some((correction.clone(), page.source_hash.clone())),
                None => {
                    warn!(page = %correction.page, "Override names a page outside this run, ignored");
                    None
                }
            }
        })
        .collect()
}

fn record(ledger: &mut ReviewLedger, correction: &OverrideArg, source_hash: &str) -> OverrideEvent {
    ledger
        .record(
            correction.page.clone(),
            source_hash,
            correction.group_id,
            correction.corrected.as_deref(),
            OVERRIDE_REASON,
        )
        .clone()
}

/// Save this run's pages and new corrections, then load every stored
/// correction.
async fn persist(
    path: &Path,
    batch: &BatchReport,
    corrections: Vec<(OverrideArg, String)>,
) -> Result<ReviewLedger> {
    let path = path.to_path_buf();
    let pages = batch.pages.clone();
    tokio::task::spawn_blocking(move || {
        let store = ResultStore::open(&path)?;
        store.save_pages(&pages)?;
        let mut ledger = store.load_ledger()?;
        for (correction, source_hash) in &corrections {
            let event = record(&mut ledger, correction, source_hash);
            store.record_override(&event)?;
        }
        Ok(ledger)
    })
    .await
    .map_err(|e| MarkwerkError::Database(format!("result store task failed: {e}")))?
}

/// Write the report as pretty JSON to `output`, or stdout.
pub fn write_report(outcome: &RunOutcome, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(outcome)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            info!(path = %path.display(), "Report written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

pub fn log_summary(outcome: &RunOutcome) {
    let batch = &outcome.batch;
    info!(
        pages = batch.pages.len(),
        failed = batch.failed_count(),
        not_processed = batch.not_processed.len(),
        aborted = batch.aborted,
        "Recognition finished"
    );
    if let Some(score) = &outcome.score {
        info!(
            scored = score.summary.scored_pages,
            mean_percent = score.summary.mean_percent,
            needs_review = score.review.len(),
            "Scoring finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use image::{DynamicImage, Rgb, RgbImage};
    use markwerk_core::geometry::BoundingBox;
    use markwerk_core::template::{PageGeometry, Region};
    use std::path::PathBuf;

    const PAPER: Rgb<u8> = Rgb([245, 245, 245]);
    const INK: Rgb<u8> = Rgb([15, 15, 15]);

    fn block(img: &mut RgbImage, x: u32, y: u32) {
        for yy in y..y + 20 {
            for xx in x..x + 20 {
                img.put_pixel(xx, yy, INK);
            }
        }
    }

    /// Writes a three-question template and returns its path.
    fn write_template(dir: &Path) -> PathBuf {
        let mut regions = vec![Region::alignment_reference(
            "mark",
            BoundingBox::new(20.0, 20.0, 20.0, 20.0),
        )];
        for question in 1..=3u32 {
            let y = 60.0 + question as f64 * 50.0;
            regions.extend(
                Region::option_strip(&format!("q{question}"), BoundingBox::new(60.0, y, 80.0, 20.0), question, 4)
                    .unwrap(),
            );
        }
        let page = PageGeometry {
            width: 300.0,
            height: 400.0,
            dpi: 72,
            content_box: None,
        };
        let path = dir.join("template.json");
        Template::new("quiz", page, regions).unwrap().save(&path).unwrap();
        path
    }

    /// Writes a sheet scan with `answers[q]` = option index for question q+1.
    fn write_sheet(dir: &Path, name: &str, answers: &[u32]) -> PathBuf {
        let mut img = RgbImage::from_pixel(300, 400, PAPER);
        block(&mut img, 20, 20);
        for (index, &option) in answers.iter().enumerate() {
            block(&mut img, 60 + option * 20, 110 + index as u32 * 50);
        }
        let path = dir.join(name);
        DynamicImage::ImageRgb8(img).save(&path).unwrap();
        path
    }

    fn args_for(dir: &Path, inputs: &[PathBuf], extra: &[&str]) -> Args {
        let template = write_template(dir);
        let config = dir.join("config.json");
        data_dir::persist_config(&config, &AppConfig::default()).unwrap();
        let mut argv: Vec<String> = vec!["markwerk".into()];
        argv.extend(inputs.iter().map(|p| p.display().to_string()));
        argv.extend([
            "--template".into(),
            template.display().to_string(),
            "--config".into(),
            config.display().to_string(),
            "--no-deskew".into(),
            "--ocr-backend".into(),
            "none".into(),
        ]);
        argv.extend(extra.iter().map(|s| s.to_string()));
        Args::try_parse_from(argv).unwrap()
    }

    #[tokio::test]
    async fn key_page_run_scores_remaining_sheets() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = vec![
            write_sheet(dir.path(), "0-key.png", &[0, 1, 2]),
            write_sheet(dir.path(), "1-ada.png", &[0, 1, 2]),
            write_sheet(dir.path(), "2-bob.png", &[0, 3, 3]),
        ];
        let db = dir.path().join("results.db");
        let args = args_for(
            dir.path(),
            &inputs,
            &["--key-page", "--db", db.to_str().unwrap()],
        );

        let outcome = run(&args, CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.exit_code(), EXIT_CLEAN);
        let score = outcome.score.as_ref().unwrap();
        assert_eq!(score.summary.scored_pages, 2);
        let correct: Vec<usize> = score.pages.iter().map(|p| p.correct).collect();
        assert_eq!(correct, vec![3, 1]);

        let stored = ResultStore::open(&db).unwrap().load_all().unwrap();
        assert_eq!(stored.len(), 3);
    }

    #[tokio::test]
    async fn stored_overrides_apply_to_later_runs() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("key.json");
        std::fs::write(&key, r#"{"1": "A", "2": "B", "3": "C"}"#).unwrap();
        let inputs = vec![write_sheet(dir.path(), "sheet.png", &[0, 0, 0])];
        let db = dir.path().join("results.db");
        let key_arg = key.display().to_string();
        let db_arg = db.display().to_string();

        let first = args_for(
            dir.path(),
            &inputs,
            &["--answer-key", &key_arg, "--db", &db_arg, "--override", "sheet.png:1:2=b"],
        );
        let outcome = run(&first, CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.score.unwrap().pages[0].correct, 2);

        let second = args_for(dir.path(), &inputs, &["--answer-key", &key_arg, "--db", &db_arg]);
        let outcome = run(&second, CancellationToken::new()).await.unwrap();
        let score = outcome.score.unwrap();
        let page = &score.pages[0];
        assert_eq!(page.correct, 2);
        assert_eq!(page.overridden, vec![2]);
    }

    #[tokio::test]
    async fn same_file_name_in_two_folders_is_two_pages() {
        let dir = tempfile::tempdir().unwrap();
        let class1 = dir.path().join("class1");
        let class2 = dir.path().join("class2");
        std::fs::create_dir_all(&class1).unwrap();
        std::fs::create_dir_all(&class2).unwrap();
        let inputs = vec![
            write_sheet(&class1, "scan.png", &[0, 1, 2]),
            write_sheet(&class2, "scan.png", &[0, 3, 3]),
        ];
        let db = dir.path().join("results.db");
        let args = args_for(dir.path(), &inputs, &["--key-page", "--db", db.to_str().unwrap()]);

        let outcome = run(&args, CancellationToken::new()).await.unwrap();
        let score = outcome.score.as_ref().unwrap();
        assert_eq!(score.summary.scored_pages, 1);
        assert_eq!(score.pages[0].page.source, inputs[1].display().to_string());
        assert_eq!(score.pages[0].correct, 1);
        assert_eq!(ResultStore::open(&db).unwrap().load_all().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stored_override_skips_a_rescanned_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("key.json");
        std::fs::write(&key, r#"{"1": "A", "2": "B", "3": "C"}"#).unwrap();
        let db = dir.path().join("results.db");
        let key_arg = key.display().to_string();
        let db_arg = db.display().to_string();

        let inputs = vec![write_sheet(dir.path(), "sheet.png", &[0, 0, 0])];
        let first = args_for(
            dir.path(),
            &inputs,
            &["--answer-key", &key_arg, "--db", &db_arg, "--override", "sheet.png:1:2=b"],
        );
        run(&first, CancellationToken::new()).await.unwrap();

        // A different sheet saved under the same name.
        let inputs = vec![write_sheet(dir.path(), "sheet.png", &[1, 1, 1])];
        let second = args_for(dir.path(), &inputs, &["--answer-key", &key_arg, "--db", &db_arg]);
        let outcome = run(&second, CancellationToken::new()).await.unwrap();
        let score = outcome.score.unwrap();
        assert!(score.pages[0].overridden.is_empty());
        assert_eq!(score.pages[0].correct, 1);
    }

    #[tokio::test]
    async fn annotated_pages_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = vec![
            write_sheet(dir.path(), "0-key.png", &[0, 1, 2]),
            write_sheet(dir.path(), "1-ada.png", &[0, 3, 2]),
        ];
        let overlays = dir.path().join("overlays");
        let args = args_for(
            dir.path(),
            &inputs,
            &["--key-page", "--annotate", overlays.to_str().unwrap()],
        );

        run(&args, CancellationToken::new()).await.unwrap();
        for name in ["0-key.png-p001.png", "1-ada.png-p001.png"] {
            let overlay = image::open(overlays.join(name)).unwrap();
            assert_eq!((overlay.width(), overlay.height()), (300, 400));
        }
    }

    #[tokio::test]
    async fn blank_sheet_gives_failed_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let blank = dir.path().join("blank.png");
        DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 400, PAPER))
            .save(&blank)
            .unwrap();
        let inputs = vec![write_sheet(dir.path(), "sheet.png", &[1, 1, 1]), blank];
        let args = args_for(dir.path(), &inputs, &[]);

        let outcome = run(&args, CancellationToken::new()).await.unwrap();
        assert!(outcome.score.is_none());
        assert_eq!(outcome.batch.failed_count(), 1);
        assert_eq!(outcome.exit_code(), EXIT_PAGES_FAILED);

        let report = dir.path().join("report.json");
        write_report(&outcome, Some(report.as_path())).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
        assert_eq!(json["batch"]["pages"].as_array().unwrap().len(), 2);
        assert!(json.get("score").is_none());
    }

    #[tokio::test]
    async fn cancelled_run_exits_as_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = vec![write_sheet(dir.path(), "sheet.png", &[0, 0, 0])];
        let args = args_for(dir.path(), &inputs, &["--key-page"]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = run(&args, cancel).await.unwrap();
        assert!(outcome.score.is_none());
        assert_eq!(outcome.batch.not_processed.len(), 1);
        assert_eq!(outcome.exit_code(), EXIT_ABORTED);
    }

    #[tokio::test]
    async fn missing_template_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args_for(dir.path(), &[dir.path().join("x.png")], &[]);
        args.template = dir.path().join("nope.json");
        assert!(run(&args, CancellationToken::new()).await.is_err());
    }
}

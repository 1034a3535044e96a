// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// markwerk-omr — Page recognition, batch execution, scoring and review for
// Markwerk.
//
// `page` drives one page through alignment, sampling, classification and
// OCR; `batch` runs many pages on a bounded worker pool; `scoring` turns page
// results into statistics; `review` and `store` keep corrections and results;
// `annotate` draws the outcome back onto the scan.

pub mod annotate;
pub mod batch;
pub mod page;
pub mod review;
pub mod scoring;
pub mod store;

pub use annotate::{annotate_page, write_annotations};
pub use batch::{BatchOptions, BatchReport, BatchRunner, open_sources, with_unique_names};
pub use page::PageRecognizer;
pub use review::{OverrideEvent, ReviewLedger};
pub use scoring::{ScoreReport, Scorer, key_from_sheet, score};
pub use store::ResultStore;

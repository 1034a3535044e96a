// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command line arguments and how they override the saved configuration.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use markwerk_core::config::{AppConfig, OcrBackendKind};
use markwerk_core::template::GroupId;
use markwerk_core::types::PageRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OcrBackendArg {
    Ocrs,
    Tesseract,
    None,
}

impl From<OcrBackendArg> for OcrBackendKind {
    fn from(arg: OcrBackendArg) -> Self {
        match arg {
            OcrBackendArg::Ocrs => OcrBackendKind::Ocrs,
            OcrBackendArg::Tesseract => OcrBackendKind::Tesseract,
            OcrBackendArg::None => OcrBackendKind::None,
        }
    }
}

/// Grade scanned multiple-choice answer sheets.
#[derive(Parser, Debug)]
#[command(name = "markwerk", version, about = "Grade scanned multiple-choice answer sheets")]
pub struct Args {
    /// Scanned PDFs or images, one sheet per page.
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Template JSON describing the answer-sheet layout.
    #[arg(short, long)]
    pub template: PathBuf,

    /// Answer key JSON (question number to option label).
    #[arg(short = 'k', long, conflicts_with = "key_page")]
    pub answer_key: Option<PathBuf>,

    /// Use the first page of the first input as the answer key.
    #[arg(long)]
    pub key_page: bool,

    /// Topic map JSON (topic name to question numbers).
    #[arg(long)]
    pub topics: Option<PathBuf>,

    /// Config file. Defaults to config.json in the data directory.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Write the effective configuration back to the config file.
    #[arg(long)]
    pub save_config: bool,

    #[arg(long)]
    pub no_deskew: bool,

    #[arg(long)]
    pub no_align_ref: bool,

    /// Combined mark score above which a bubble counts as filled.
    #[arg(long, value_parser = parse_threshold)]
    pub threshold: Option<f64>,

    #[arg(long, value_enum)]
    pub ocr_backend: Option<OcrBackendArg>,

    /// Pages recognised concurrently.
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..=256))]
    pub workers: Option<u64>,

    /// Report destination. Printed to stdout when omitted.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Save a PNG of every recognised page with its decisions drawn on it.
    #[arg(long, value_name = "DIR")]
    pub annotate: Option<PathBuf>,

    /// SQLite results database; stored overrides are applied when scoring.
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Manual correction `SOURCE:PAGE:QUESTION=LABEL` (page numbers start at 1,
    /// an empty label clears the answer). Saved to `--db` when given.
    #[arg(long = "override", value_name = "CORRECTION", value_parser = parse_override)]
    pub overrides: Vec<OverrideArg>,
}

/// One correction given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideArg {
    pub page: PageRef,
    pub group_id: GroupId,
    pub corrected: Option<String>,
}

fn parse_override(raw: &str) -> Result<OverrideArg, String> {
    let usage = || format!("`{raw}` is not SOURCE:PAGE:QUESTION=LABEL");
    let (target, label) = raw.rsplit_once('=').ok_or_else(usage)?;
    let mut parts = target.rsplitn(3, ':');
    let group = parts.next().ok_or_else(usage)?;
    let page = parts.next().ok_or_else(usage)?;
    let source = parts.next().filter(|s| !s.is_empty()).ok_or_else(usage)?;

    let group_id: GroupId = group.trim().parse().map_err(|_| usage())?;
    let page_number: usize = page.trim().parse().map_err(|_| usage())?;
    if page_number == 0 {
        return Err(format!("page numbers start at 1 in `{raw}`"));
    }
    let label = label.trim();
    Ok(OverrideArg {
        page: PageRef::new(source, page_number - 1),
        group_id,
        corrected: (!label.is_empty()).then(|| label.to_string()),
    })
}

fn parse_threshold(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|_| format!("`{raw}` is not a number"))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(format!("threshold must be positive, got {value}"));
    }
    Ok(value)
}

impl Args {
    /// Layer the command line flags over a loaded configuration.
    pub fn apply_to(&self, config: &mut AppConfig) {
        if self.no_deskew {
            config.recognition.enable_deskew = false;
        }
        if self.no_align_ref {
            config.recognition.enable_align_ref = false;
        }
        if let Some(threshold) = self.threshold {
            config.recognition.darkness_threshold = threshold;
        }
        if let Some(backend) = self.ocr_backend {
            config.ocr.backend = backend.into();
        }
        if let Some(workers) = self.workers {
            config.batch.workers = workers as usize;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Result<Args, clap::Error> {
        let mut argv = vec!["markwerk", "scans.pdf", "--template", "sheet.json"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv)
    }

    #[test]
    fn flags_override_config() {
        let args = parse(&[
            "--no-deskew",
            "--threshold",
            "0.5",
            "--ocr-backend",
            "none",
            "--workers",
            "2",
        ])
        .unwrap();
        let mut config = AppConfig::default();
        args.apply_to(&mut config);
        assert!(!config.recognition.enable_deskew);
        assert!(config.recognition.enable_align_ref);
        assert_eq!(config.recognition.darkness_threshold, 0.5);
        assert_eq!(config.ocr.backend, OcrBackendKind::None);
        assert_eq!(config.batch.workers, 2);
    }

    #[test]
    fn absent_flags_keep_config() {
        let args = parse(&[]).unwrap();
        let mut config = AppConfig::default();
        config.recognition.darkness_threshold = 0.6;
        args.apply_to(&mut config);
        assert_eq!(config.recognition.darkness_threshold, 0.6);
        assert!(config.recognition.enable_deskew);
    }

    #[test]
    fn key_sources_are_exclusive() {
        assert!(parse(&["--answer-key", "key.json", "--key-page"]).is_err());
        assert!(parse(&["--key-page"]).unwrap().key_page);
    }

    #[test]
    fn overrides_parse_with_one_based_pages() {
        let args = parse(&["--override", "class:a.pdf:3:12=b", "--override", "scan.png:1:4="]).unwrap();
        assert_eq!(
            args.overrides,
            vec![
                OverrideArg {
                    page: PageRef::new("class:a.pdf", 2),
                    group_id: 12,
                    corrected: Some("b".into()),
                },
                OverrideArg {
                    page: PageRef::new("scan.png", 0),
                    group_id: 4,
                    corrected: None,
                },
            ]
        );
        assert!(parse(&["--override", "scan.png:0:4=A"]).is_err());
        assert!(parse(&["--override", "scan.png:4=A"]).is_err());
        assert!(parse(&["--override", "scan.png:1:x=A"]).is_err());
    }

    #[test]
    fn annotate_takes_a_directory() {
        assert_eq!(parse(&[]).unwrap().annotate, None);
        let args = parse(&["--annotate", "overlays"]).unwrap();
        assert_eq!(args.annotate, Some(PathBuf::from("overlays")));
        assert!(parse(&["--annotate"]).is_err());
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(parse(&["--threshold", "-1"]).is_err());
        assert!(parse(&["--threshold", "dark"]).is_err());
        assert!(parse(&["--workers", "0"]).is_err());
        assert!(Args::try_parse_from(["markwerk", "--template", "t.json"]).is_err());
    }
}

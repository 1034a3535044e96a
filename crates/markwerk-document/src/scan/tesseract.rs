// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Text recognition through an external `tesseract` executable.
//
// The crop is written to a temporary PNG and tesseract writes TSV output next
// to it. Each invocation is bounded by the configured timeout; a process that
// overruns is killed.

use std::fs::File;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use image::DynamicImage;
use markwerk_core::config::OcrSettings;
use markwerk_core::error::{MarkwerkError, Result};
use tracing::{debug, instrument};

use crate::scan::ocr::{RecognizedText, TextRecognizer};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Tesseract page segmentation mode: one uniform block of text.
const PAGE_SEGMENTATION_MODE: &str = "6";

pub struct TesseractRecognizer {
    executable: PathBuf,
    languages: String,
    timeout: Duration,
}

impl TesseractRecognizer {
    pub fn new(settings: &OcrSettings) -> Self {
        Self {
            executable: settings.tesseract_path.clone(),
            languages: settings.tesseract_lang.clone(),
            timeout: Duration::from_secs(settings.timeout_secs.max(1)),
        }
    }

    fn run(&self, image: &DynamicImage) -> Result<String> {
        let workdir = tempfile::tempdir()?;
        let input = workdir.path().join("crop.png");
        let output_base = workdir.path().join("out");
        let stderr_path = workdir.path().join("stderr.txt");

        image
            .to_luma8()
            .save(&input)
            .map_err(|err| MarkwerkError::OcrFailure(format!("failed to write crop: {err}")))?;

        let mut child = Command::new(&self.executable)
            .arg(&input)
            .arg(&output_base)
            .arg("-l")
            .arg(&self.languages)
            .arg("--psm")
            .arg(PAGE_SEGMENTATION_MODE)
            .arg("tsv")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(File::create(&stderr_path)?))
            .spawn()
            .map_err(|err| {
                MarkwerkError::OcrFailure(format!(
                    "failed to start {} (is tesseract installed?): {err}",
                    self.executable.display()
                ))
            })?;

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                // The process may exit between try_wait and kill.
                let _ = child.kill();
                let _ = child.wait();
                return Err(MarkwerkError::OcrFailure(format!(
                    "tesseract timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            let stderr = std::fs::read_to_string(&stderr_path).unwrap_or_default();
            return Err(MarkwerkError::OcrFailure(format!(
                "tesseract exited with {status}: {}",
                stderr.trim()
            )));
        }

        Ok(std::fs::read_to_string(output_base.with_extension("tsv"))?)
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        "tesseract"
    }

    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    fn recognize_text(&self, image: &DynamicImage) -> Result<RecognizedText> {
        let tsv = self.run(image)?;
        let found = parse_tsv(&tsv);
        debug!(chars = found.text.len(), confidence = found.confidence, "Tesseract finished");
        Ok(found)
    }
}

/// Join the recognised words and average their confidences.
///
/// TSV columns: level, page_num, block_num, par_num, line_num, word_num,
/// left, top, width, height, conf, text. Level 5 rows are words; a negative
/// confidence marks a row without a recognised word.
pub fn parse_tsv(tsv: &str) -> RecognizedText {
    let mut words = Vec::new();
    let mut confidence_sum = 0.0f64;

    for row in tsv.lines().skip(1) {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < 12 || fields[0] != "5" {
            continue;
        }
        let Ok(conf) = fields[10].trim().parse::<f64>() else {
            continue;
        };
        let text = fields[11].trim();
        if conf < 0.0 || text.is_empty() {
            continue;
        }
        words.push(text);
        confidence_sum += conf;
    }

    if words.is_empty() {
        return RecognizedText::default();
    }
    RecognizedText {
        confidence: (confidence_sum / words.len() as f64 / 100.0).clamp(0.0, 1.0),
        text: words.join(" "),
    }
}

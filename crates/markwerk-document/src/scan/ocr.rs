// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Text recognition for template text regions (student name, class, ...).
//
// Backends sit behind the `TextRecognizer` trait:
//
// - `OcrsRecognizer`: neural engine from the `ocrs` crate, models executed via
//   `rten`. Only compiled with the `ocr` feature.
// - `TesseractRecognizer` (see `scan::tesseract`): external `tesseract` binary.
// - `DisabledRecognizer`: always returns empty text.
//
// Recogniser failures are never fatal for a page: `recognize_soft` turns them
// into an empty, zero-confidence `TextResult` carrying the failure message.

use std::path::PathBuf;
use std::sync::Arc;

use image::DynamicImage;
use markwerk_core::config::{OcrBackendKind, OcrSettings};
use markwerk_core::error::{MarkwerkError, Result};
use markwerk_core::template::Region;
use markwerk_core::types::TextResult;
use tracing::{debug, warn};

use crate::scan::tesseract::TesseractRecognizer;

/// Text read from one crop.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecognizedText {
    pub text: String,
    /// Backend confidence in [0, 1].
    pub confidence: f64,
}

/// A text recogniser. Shared between page workers, so it must be thread-safe.
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &str;

    fn recognize_text(&self, image: &DynamicImage) -> Result<RecognizedText>;
}

/// Backend used when OCR is switched off.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledRecognizer;

impl TextRecognizer for DisabledRecognizer {
    fn name(&self) -> &str {
        "none"
    }

    fn recognize_text(&self, _image: &DynamicImage) -> Result<RecognizedText> {
        Ok(RecognizedText::default())
    }
}

/// Run `recognizer` on the crop of `region`, never failing.
///
/// Empty output gets confidence 0. Errors produce an empty result whose
/// `failure` holds the message.
pub fn recognize_soft(
    recognizer: &dyn TextRecognizer,
    region: &Region,
    crop: &DynamicImage,
) -> TextResult {
    let label = region.display_name();
    match recognizer.recognize_text(crop) {
        Ok(found) => {
            let text = found.text.trim().to_string();
            let confidence = if text.is_empty() {
                0.0
            } else {
                found.confidence.clamp(0.0, 1.0)
            };
            debug!(region = %region.id, backend = recognizer.name(), chars = text.len(), confidence, "Text region read");
            TextResult {
                region_id: region.id.clone(),
                label,
                text,
                confidence,
                failure: None,
            }
        }
        Err(err) => {
            warn!(region = %region.id, backend = recognizer.name(), error = %err, "Text recognition failed");
            TextResult {
                region_id: region.id.clone(),
                label,
                text: String::new(),
                confidence: 0.0,
                failure: Some(err.to_string()),
            }
        }
    }
}

/// Build the configured backend.
pub fn build_recognizer(settings: &OcrSettings) -> Result<Arc<dyn TextRecognizer>> {
    match settings.backend {
        OcrBackendKind::None => Ok(Arc::new(DisabledRecognizer)),
        OcrBackendKind::Tesseract => Ok(Arc::new(TesseractRecognizer::new(settings))),
        OcrBackendKind::Ocrs => build_ocrs(settings),
    }
}

#[cfg(feature = "ocr")]
fn build_ocrs(settings: &OcrSettings) -> Result<Arc<dyn TextRecognizer>> {
    let config = match &settings.model_dir {
        Some(dir) => OcrModelPaths::from_dir(dir),
        None => OcrModelPaths::default(),
    };
    Ok(Arc::new(neural::OcrsRecognizer::new(config)?))
}

#[cfg(not(feature = "ocr"))]
fn build_ocrs(_settings: &OcrSettings) -> Result<Arc<dyn TextRecognizer>> {
    Err(MarkwerkError::OcrFailure(
        "the ocrs backend needs markwerk built with the `ocr` feature".into(),
    ))
}

// -- Neural model location -------------------------------------------------

const DETECTION_MODEL_FILENAME: &str = "text-detection.rten";
const RECOGNITION_MODEL_FILENAME: &str = "text-recognition.rten";

/// `$XDG_CACHE_HOME/ocrs`, else `~/.cache/ocrs`, which is where `ocrs-cli`
/// downloads its models.
fn default_model_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg).join("ocrs")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".cache").join("ocrs")
    } else {
        PathBuf::from("ocrs-models")
    }
}

/// Detection and recognition model files for the neural backend.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrModelPaths {
    pub detection: PathBuf,
    pub recognition: PathBuf,
}

impl Default for OcrModelPaths {
    fn default() -> Self {
        Self::from_dir(default_model_dir())
    }
}

impl OcrModelPaths {
    pub fn from_dir(dir: impl AsRef<std::path::Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            detection: dir.join(DETECTION_MODEL_FILENAME),
            recognition: dir.join(RECOGNITION_MODEL_FILENAME),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (kind, path) in [("detection", &self.detection), ("recognition", &self.recognition)] {
            if !path.exists() {
                return Err(MarkwerkError::OcrFailure(format!(
                    "{kind} model not found at {}; run `ocrs-cli` once to download models",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(feature = "ocr")]
pub use neural::OcrsRecognizer;

#[cfg(feature = "ocr")]
mod neural {
    use image::DynamicImage;
    use markwerk_core::error::{MarkwerkError, Result};
    use ocrs::{ImageSource, OcrEngine, OcrEngineParams};
    use rten::Model;
    use tracing::{info, instrument};

    use super::{OcrModelPaths, RecognizedText, TextRecognizer};

    /// `ocrs` reports no per-line probability; readable text gets this score.
    const NEURAL_TEXT_CONFIDENCE: f64 = 0.9;

    /// Neural text recogniser. Loading the models is the expensive step, so
    /// build one and share it across pages.
    pub struct OcrsRecognizer {
        engine: OcrEngine,
    }

    impl OcrsRecognizer {
        #[instrument(skip_all, fields(detection = %paths.detection.display()))]
        pub fn new(paths: OcrModelPaths) -> Result<Self> {
            paths.validate()?;

            let load = |path: &std::path::Path| {
                Model::load_file(path).map_err(|err| {
                    MarkwerkError::OcrFailure(format!(
                        "failed to load model from {}: {err}",
                        path.display()
                    ))
                })
            };
            let engine = OcrEngine::new(OcrEngineParams {
                detection_model: Some(load(&paths.detection)?),
                recognition_model: Some(load(&paths.recognition)?),
                ..Default::default()
            })
            .map_err(|err| MarkwerkError::OcrFailure(format!("failed to initialise OCR engine: {err}")))?;

            info!("Neural OCR engine ready");
            Ok(Self { engine })
        }
    }

    impl TextRecognizer for OcrsRecognizer {
        fn name(&self) -> &str {
            "ocrs"
        }

        fn recognize_text(&self, image: &DynamicImage) -> Result<RecognizedText> {
            let rgb = image.to_rgb8();
            let (width, height) = rgb.dimensions();
            let source = ImageSource::from_bytes(rgb.as_raw(), (width, height)).map_err(|err| {
                MarkwerkError::OcrFailure(format!("bad image source ({width}x{height}): {err}"))
            })?;
            let input = self
                .engine
                .prepare_input(source)
                .map_err(|err| MarkwerkError::OcrFailure(format!("preprocessing failed: {err}")))?;
            let text = self
                .engine
                .get_text(&input)
                .map_err(|err| MarkwerkError::OcrFailure(format!("recognition failed: {err}")))?;

            let text = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect::<Vec<_>>().join(" ");
            let confidence = if text.is_empty() { 0.0 } else { NEURAL_TEXT_CONFIDENCE };
            Ok(RecognizedText { text, confidence })
        }
    }
}

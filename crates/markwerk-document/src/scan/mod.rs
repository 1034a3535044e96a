// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Recognition pipeline stages: page alignment, region sampling, mark
// classification and text recognition.

pub mod align;
pub mod classify;
pub mod ocr;
pub mod sampler;
pub mod tesseract;

pub use align::{AlignmentEstimator, AlignmentOutcome};
pub use classify::{MarkClassifier, OptionCandidate};
pub use ocr::{DisabledRecognizer, RecognizedText, TextRecognizer, build_recognizer, recognize_soft};
pub use sampler::{RegionSample, RegionSampler};
pub use tesseract::TesseractRecognizer;

#[cfg(feature = "ocr")]
pub use ocr::OcrsRecognizer;

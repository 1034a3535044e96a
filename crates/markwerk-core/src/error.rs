// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Markwerk.

use thiserror::Error;

/// Top-level error type for all Markwerk operations.
///
/// Region-level variants (`SamplingOutOfBounds`, `OcrFailure`) never abort a
/// page; the orchestrator turns them into page issues. Page-level variants
/// (`AlignmentFailure`, `Rasterization`, `Timeout`) never abort a batch.
#[derive(Debug, Error)]
pub enum MarkwerkError {
    // -- Template / answer key --
    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    #[error("invalid answer key: {0}")]
    InvalidAnswerKey(String),

    // -- Page sources --
    #[error("PDF operation failed: {0}")]
    PdfError(String),

    #[error("image processing failed: {0}")]
    ImageError(String),

    #[error("page rasterization failed: {0}")]
    Rasterization(String),

    // -- Recognition --
    #[error("page alignment failed: {0}")]
    AlignmentFailure(String),

    #[error("region {region_id} is outside the scanned page")]
    SamplingOutOfBounds { region_id: String },

    #[error("OCR failed: {0}")]
    OcrFailure(String),

    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    // -- Batch --
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("batch aborted by user")]
    BatchAborted,

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, MarkwerkError>;

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for recognition results: per-region decisions, per-page
// results and the structured failures attached to them.
//
// Nothing in here carries a timestamp. Two runs over the same page with the
// same configuration must serialise to the same bytes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::MarkwerkError;
use crate::geometry::Transform;
use crate::template::GroupId;

/// Identifies one page of one source document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageRef {
    /// Source name (usually the file name of the PDF).
    pub source: String,
    /// Zero-based page index within the source.
    pub page_index: usize,
}

impl PageRef {
    pub fn new(source: impl Into<String>, page_index: usize) -> Self {
        Self {
            source: source.into(),
            page_index,
        }
    }
}

impl fmt::Display for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} p{}", self.source, self.page_index + 1)
    }
}

/// How the page transform was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentMethod {
    /// Alignment disabled; scan coordinates are template coordinates.
    Identity,
    /// Located the template's alignment-reference fiducial.
    Reference,
    /// Matched the scan's content extent against the template content box.
    ContentBounds,
    /// Scaled page size to page size.
    PageSize,
}

/// Serializable summary of the transform used for a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentSummary {
    pub method: AlignmentMethod,
    pub scale: f64,
    pub rotation_degrees: f64,
    pub translation: (f64, f64),
    pub confidence: f64,
    /// Best-effort transform; sampling tolerance was widened.
    pub low_confidence: bool,
}

impl AlignmentSummary {
    /// Rebuild the scan → template similarity this summary was taken from.
    pub fn transform(&self) -> Transform {
        let (sin, cos) = self.rotation_degrees.to_radians().sin_cos();
        Transform {
            a: self.scale * cos,
            b: -self.scale * sin,
            c: self.scale * sin,
            d: self.scale * cos,
            e: self.translation.0,
            f: self.translation.1,
        }
    }
}

/// Quality of a sampled region patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleQuality {
    Ok,
    /// Part of the region fell outside the page.
    Clipped,
    /// Degenerate or mostly outside the page; no usable patch.
    OutOfBounds,
}

/// Raw signals extracted from a bubble patch, each normalised to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MarkSignals {
    pub darkness: f64,
    pub saturation: f64,
    pub blue: f64,
    /// `darkness * 1.0 + saturation * 0.5 + blue * 0.3`.
    pub combined: f64,
}

/// Fill decision for one option region on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkDecision {
    pub region_id: String,
    pub group_id: GroupId,
    pub option_label: String,
    /// Combined score exceeded the threshold.
    pub filled: bool,
    /// Margin-based confidence of the group decision, in [0, 1].
    pub confidence: f64,
    /// More than one option in the group exceeded the threshold.
    pub ambiguous: bool,
    pub quality: SampleQuality,
    pub signals: MarkSignals,
}

/// The discrete answer for one question on one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Answer {
    Answered {
        label: String,
    },
    /// No option exceeded the threshold.
    Blank,
    /// Several options exceeded the threshold. `chosen` is the highest
    /// scoring one, or `None` when an exact tie was left unresolved.
    Ambiguous {
        chosen: Option<String>,
        candidates: Vec<String>,
    },
}

impl Answer {
    /// Label that counts for scoring, if any.
    pub fn winning_label(&self) -> Option<&str> {
        match self {
            Answer::Answered { label } => Some(label),
            Answer::Ambiguous { chosen, .. } => chosen.as_deref(),
            Answer::Blank => None,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Answer::Ambiguous { .. })
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Answer::Answered { label } => f.write_str(label),
            Answer::Blank => Ok(()),
            Answer::Ambiguous { candidates, .. } => f.write_str(&candidates.concat()),
        }
    }
}

/// Answer for one question plus the confidence of the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupAnswer {
    pub group_id: GroupId,
    pub answer: Answer,
    pub confidence: f64,
}

/// OCR output for one text region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextResult {
    pub region_id: String,
    pub label: String,
    pub text: String,
    pub confidence: f64,
    /// Present when OCR failed for this region (soft failure).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Region-level problem recorded on an otherwise successful page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageIssue {
    SamplingOutOfBounds { region_id: String },
    OcrFailure { region_id: String, message: String },
}

/// Processing stages of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStage {
    Loaded,
    Aligned,
    Sampled,
    Classified,
    Finalized,
}

/// Category of a page-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Alignment,
    Rasterization,
    AllRegionsOutOfBounds,
    Timeout,
    Internal,
}

/// Structured page-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl PageFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&MarkwerkError> for PageFailure {
    fn from(err: &MarkwerkError) -> Self {
        let kind = match err {
            MarkwerkError::AlignmentFailure(_) => FailureKind::Alignment,
            MarkwerkError::Rasterization(_)
            | MarkwerkError::PdfError(_)
            | MarkwerkError::ImageError(_)
            | MarkwerkError::Io(_) => FailureKind::Rasterization,
            MarkwerkError::SamplingOutOfBounds { .. } => FailureKind::AllRegionsOutOfBounds,
            MarkwerkError::Timeout(_) => FailureKind::Timeout,
            _ => FailureKind::Internal,
        };
        Self::new(kind, err.to_string())
    }
}

/// Terminal state of a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PageStatus {
    Finalized,
    Failed {
        /// Last stage reached before the failure.
        stage: PageStage,
        failure: PageFailure,
    },
}

/// Everything recognised on one scanned page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub page: PageRef,
    /// SHA-256 of the source document.
    pub source_hash: String,
    pub status: PageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<AlignmentSummary>,
    /// One decision per option region, in template order.
    pub decisions: Vec<MarkDecision>,
    pub answers: BTreeMap<GroupId, GroupAnswer>,
    /// One entry per text region, in template order.
    pub texts: Vec<TextResult>,
    pub issues: Vec<PageIssue>,
}

impl PageResult {
    /// A page that never got past `stage`.
    pub fn failed(
        page: PageRef,
        source_hash: impl Into<String>,
        stage: PageStage,
        failure: PageFailure,
    ) -> Self {
        Self {
            page,
            source_hash: source_hash.into(),
            status: PageStatus::Failed { stage, failure },
            alignment: None,
            decisions: Vec::new(),
            answers: BTreeMap::new(),
            texts: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self.status, PageStatus::Finalized)
    }

    pub fn failure(&self) -> Option<&PageFailure> {
        match &self.status {
            PageStatus::Failed { failure, .. } => Some(failure),
            PageStatus::Finalized => None,
        }
    }

    /// Question numbers whose answer is ambiguous.
    pub fn ambiguous_groups(&self) -> Vec<GroupId> {
        self.answers
            .values()
            .filter(|a| a.answer.is_ambiguous())
            .map(|a| a.group_id)
            .collect()
    }

    pub fn low_alignment_confidence(&self) -> bool {
        self.alignment.as_ref().is_some_and(|a| a.low_confidence)
    }
}

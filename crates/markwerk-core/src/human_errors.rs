// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for the people reviewing a marking run
// (graders and exam officers, not developers).
//
// Every technical error is mapped to plain English with a clear suggestion.
// Severity drives how the CLI reports it and whether a re-run is worthwhile.

use crate::error::MarkwerkError;

/// Severity of an error from the reviewer's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Slow machine, busy OCR engine. Running again may work.
    Transient,
    /// The reviewer must do something (rescan, fix the template, install a tool).
    ActionRequired,
    /// Retrying with the same input will fail the same way.
    Permanent,
}

/// A human-readable error with plain English message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain English summary (shown as a heading).
    pub message: String,
    /// What the reviewer should try.
    pub suggestion: String,
    /// Whether a re-run may succeed without changes.
    pub retriable: bool,
    pub severity: Severity,
}

/// Convert a `MarkwerkError` into a `HumanError`.
pub fn humanize_error(err: &MarkwerkError) -> HumanError {
    match err {
        // -- Template / answer key --
        MarkwerkError::InvalidTemplate(detail) => HumanError {
            message: "The answer-sheet template has a problem.".into(),
            suggestion: format!("Open the template and fix the highlighted regions, then run again. ({detail})"),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        MarkwerkError::InvalidAnswerKey(detail) => HumanError {
            message: "The answer key couldn't be used.".into(),
            suggestion: format!("Check that every question in the key has exactly one answer letter. ({detail})"),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        // -- Page sources --
        MarkwerkError::PdfError(_) => HumanError {
            message: "There's a problem with this PDF file.".into(),
            suggestion: "The file may be damaged. Try exporting the scans from the scanner again.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },

        MarkwerkError::ImageError(_) => HumanError {
            message: "A scanned image couldn't be read.".into(),
            suggestion: "The image may be damaged or in an unusual format. Try saving it as a JPEG or PNG first.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },

        MarkwerkError::Rasterization(detail) => humanize_rasterization_error(detail),

        // -- Recognition --
        MarkwerkError::AlignmentFailure(detail) => {
            if detail.contains("blank") || detail.contains("no ink") {
                HumanError {
                    message: "This page looks blank.".into(),
                    suggestion: "Check the page was scanned face-up and that it isn't an empty separator sheet.".into(),
                    retriable: false,
                    severity: Severity::ActionRequired,
                }
            } else {
                HumanError {
                    message: "We couldn't line this page up with the template.".into(),
                    suggestion: "The page may be badly rotated, cropped or from a different form. Rescan it straight, or mark it by hand.".into(),
                    retriable: false,
                    severity: Severity::ActionRequired,
                }
            }
        }

        MarkwerkError::SamplingOutOfBounds { region_id } => HumanError {
            message: "Part of the answer sheet is missing from the scan.".into(),
            suggestion: format!("Region {region_id} falls outside the scanned page. Rescan with the whole sheet visible."),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        MarkwerkError::OcrFailure(detail) => humanize_ocr_error(detail),

        // -- Batch --
        MarkwerkError::Timeout(_) => HumanError {
            message: "A page took too long to process.".into(),
            suggestion: "Try again with fewer workers or a longer page timeout.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        MarkwerkError::BatchAborted => HumanError {
            message: "Marking was stopped before every page was done.".into(),
            suggestion: "Pages that finished are kept. Run again to mark the rest.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        // -- Storage --
        MarkwerkError::Database(_) => HumanError {
            message: "The results database had a problem.".into(),
            suggestion: "Check the disk isn't full and that no other program has the database open, then try again.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        MarkwerkError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::NotFound {
                HumanError {
                    message: "The file couldn't be found.".into(),
                    suggestion: "It may have been moved or deleted. Check the path and try again.".into(),
                    retriable: false,
                    severity: Severity::ActionRequired,
                }
            } else if io_err.kind() == std::io::ErrorKind::PermissionDenied {
                HumanError {
                    message: "We don't have permission to use that file.".into(),
                    suggestion: "Check the file permissions, or copy the file somewhere you own first.".into(),
                    retriable: false,
                    severity: Severity::ActionRequired,
                }
            } else {
                HumanError {
                    message: "There was a problem reading or writing a file.".into(),
                    suggestion: "Try again. If this keeps happening, the disk may be full.".into(),
                    retriable: true,
                    severity: Severity::Transient,
                }
            }
        }

        MarkwerkError::IntegrityMismatch { .. } => HumanError {
            message: "Stored results don't match what was recorded.".into(),
            suggestion: "The results database may have been edited by hand. Mark the affected scans again.".into(),
            retriable: false,
            severity: Severity::Permanent,
        },

        MarkwerkError::Serialization(_) => HumanError {
            message: "A settings or data file couldn't be understood.".into(),
            suggestion: "Check the JSON file for typos, or delete it to go back to the defaults.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        },
    }
}

fn humanize_rasterization_error(detail: &str) -> HumanError {
    let lower = detail.to_ascii_lowercase();
    if lower.contains("no image") || lower.contains("no embedded") {
        HumanError {
            message: "This PDF page has no scanned image on it.".into(),
            suggestion: "Make sure the PDF came from a scanner rather than a word processor.".into(),
            retriable: false,
            severity: Severity::Permanent,
        }
    } else if lower.contains("out of range") {
        HumanError {
            message: "That page doesn't exist in the document.".into(),
            suggestion: "The document may have fewer pages than expected.".into(),
            retriable: false,
            severity: Severity::Permanent,
        }
    } else {
        HumanError {
            message: "A page couldn't be turned into an image.".into(),
            suggestion: format!("Try re-exporting the scans. (Detail: {detail})"),
            retriable: false,
            severity: Severity::Permanent,
        }
    }
}

fn humanize_ocr_error(detail: &str) -> HumanError {
    let lower = detail.to_ascii_lowercase();
    if lower.contains("not found") || lower.contains("failed to start") {
        HumanError {
            message: "The text reader isn't installed.".into(),
            suggestion: "Install Tesseract, or run with --ocr-backend none to skip name fields.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        }
    } else if lower.contains("timed out") {
        HumanError {
            message: "Reading a name field took too long.".into(),
            suggestion: "Try again, or raise the OCR timeout in the settings.".into(),
            retriable: true,
            severity: Severity::Transient,
        }
    } else {
        HumanError {
            message: "Text recognition didn't work on this field.".into(),
            suggestion: "Check the field by hand. A clearer scan usually helps.".into(),
            retriable: true,
            severity: Severity::Transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_page_asks_for_a_check() {
        let human = humanize_error(&MarkwerkError::AlignmentFailure("page is blank (no ink)".into()));
        assert_eq!(human.severity, Severity::ActionRequired);
        assert!(human.message.contains("blank"));
    }

    #[test]
    fn timeout_is_transient() {
        let human = humanize_error(&MarkwerkError::Timeout("page 4 after 120s".into()));
        assert_eq!(human.severity, Severity::Transient);
        assert!(human.retriable);
    }

    #[test]
    fn missing_tesseract_is_action_required() {
        let err = MarkwerkError::OcrFailure("tesseract failed to start: not found".into());
        let human = humanize_error(&err);
        assert_eq!(human.severity, Severity::ActionRequired);
        assert!(!human.retriable);
    }

    #[test]
    fn page_without_image_is_permanent() {
        let err = MarkwerkError::Rasterization("page 2 has no embedded image".into());
        assert_eq!(humanize_error(&err).severity, Severity::Permanent);
    }

    #[test]
    fn missing_file_is_action_required() {
        let err = MarkwerkError::Io(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(humanize_error(&err).severity, Severity::ActionRequired);
    }
}

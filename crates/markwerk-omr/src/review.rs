// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Review ledger — manual answer corrections recorded as events.
//
// Recognised decisions are never edited. A reviewer's correction is an
// `OverrideEvent` appended to the ledger; the latest event for a
// (page, question) pair is the effective answer, and the full history stays
// available for audit. Events carry the source hash of the scan they were
// made against, so a different document under the same name is unaffected.

use chrono::{DateTime, Utc};
use markwerk_core::key::normalize_label;
use markwerk_core::template::GroupId;
use markwerk_core::types::PageRef;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// One manual correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideEvent {
    pub id: Uuid,
    pub page: PageRef,
    /// SHA-256 of the scanned document the correction applies to.
    pub source_hash: String,
    pub group_id: GroupId,
    /// Corrected option label; `None` marks the question as unanswered.
    pub corrected: Option<String>,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

impl OverrideEvent {
    fn applies_to(&self, page: &PageRef, source_hash: &str, group_id: GroupId) -> bool {
        self.group_id == group_id && self.source_hash == source_hash && &self.page == page
    }
}

/// Append-only list of override events, in recording order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewLedger {
    events: Vec<OverrideEvent>,
}

impl ReviewLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from stored events, oldest first.
    pub fn from_events(events: Vec<OverrideEvent>) -> Self {
        Self { events }
    }

    /// Append a correction and return it.
    pub fn record(
        &mut self,
        page: PageRef,
        source_hash: impl Into<String>,
        group_id: GroupId,
        corrected: Option<&str>,
        reason: impl Into<String>,
    ) -> &OverrideEvent {
        let corrected = corrected.map(normalize_label).filter(|label| !label.is_empty());
        let event = OverrideEvent {
            id: Uuid::new_v4(),
            page,
            source_hash: source_hash.into(),
            group_id,
            corrected,
            reason: reason.into(),
            recorded_at: Utc::now(),
        };
        info!(
            page = %event.page,
            group = group_id,
            corrected = ?event.corrected,
            "Answer override recorded"
        );
        self.events.push(event);
        &self.events[self.events.len() - 1]
    }

    /// Latest correction for a question, if any.
    pub fn effective_answer(
        &self,
        page: &PageRef,
        source_hash: &str,
        group_id: GroupId,
    ) -> Option<&OverrideEvent> {
        self.events
            .iter()
            .rev()
            .find(|e| e.applies_to(page, source_hash, group_id))
    }

    /// Every correction for a question, oldest first.
    pub fn history(&self, page: &PageRef, source_hash: &str, group_id: GroupId) -> Vec<&OverrideEvent> {
        self.events
            .iter()
            .filter(|e| e.applies_to(page, source_hash, group_id))
            .collect()
    }

    pub fn events(&self) -> &[OverrideEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_override_wins() {
        let page = PageRef::new("scan.pdf", 2);
        let mut ledger = ReviewLedger::new();
        ledger.record(page.clone(), "h1", 7, Some("b"), "smudge on A");
        ledger.record(page.clone(), "h1", 7, Some(" c "), "second look");
        ledger.record(PageRef::new("scan.pdf", 3), "h1", 7, Some("D"), "other page");

        let effective = ledger.effective_answer(&page, "h1", 7).unwrap();
        assert_eq!(effective.corrected.as_deref(), Some("C"));
        assert_eq!(effective.reason, "second look");

        let history = ledger.history(&page, "h1", 7);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].corrected.as_deref(), Some("B"));
        assert!(ledger.effective_answer(&page, "h1", 8).is_none());
    }

    #[test]
    fn blank_correction_clears_answer() {
        let page = PageRef::new("scan.pdf", 0);
        let mut ledger = ReviewLedger::new();
        let event = ledger.record(page.clone(), "h1", 1, Some("  "), "stray mark");
        assert_eq!(event.corrected, None);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn corrections_stay_with_their_scan() {
        let page = PageRef::new("scan.pdf", 0);
        let mut ledger = ReviewLedger::new();
        ledger.record(page.clone(), "first-scan", 2, Some("A"), "checked");
        assert!(ledger.effective_answer(&page, "first-scan", 2).is_some());
        assert!(ledger.effective_answer(&page, "rescanned", 2).is_none());
        assert!(ledger.history(&page, "rescanned", 2).is_empty());
    }

    #[test]
    fn ledger_serializes_as_event_list() {
        let mut ledger = ReviewLedger::new();
        ledger.record(PageRef::new("a.pdf", 0), "h1", 3, Some("A"), "checked");
        let json = serde_json::to_value(&ledger).unwrap();
        assert!(json.is_array());
        let back: ReviewLedger = serde_json::from_value(json).unwrap();
        assert_eq!(back, ledger);
    }
}

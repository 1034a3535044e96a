// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scoring — compares recognised answers with the answer key and aggregates
// per-question, per-page and per-topic statistics.
//
// Scoring is a pure function of its inputs: running it twice over the same
// pages, key, overrides and options yields the same report.

use std::collections::BTreeMap;

use markwerk_core::config::{Denominator, ScoringOptions};
use markwerk_core::error::{MarkwerkError, Result};
use markwerk_core::key::{AnswerKey, TopicMap};
use markwerk_core::template::GroupId;
use markwerk_core::types::{PageFailure, PageRef, PageResult};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::review::ReviewLedger;

/// Statistics for one keyed question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionStats {
    pub group_id: GroupId,
    pub key: String,
    pub correct: usize,
    /// Pages with a winning answer for this question.
    pub answered: usize,
    pub denominator: usize,
    /// 0..=100; 0 when the denominator is 0.
    pub percent_correct: f64,
    /// How often each label was the winning answer.
    pub answer_counts: BTreeMap<String, usize>,
}

/// Score of one answer sheet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageScore {
    pub page: PageRef,
    pub correct: usize,
    pub keyed_questions: usize,
    pub percent: f64,
    /// Effective answer per keyed question (`None` = blank or unresolved).
    pub answers: BTreeMap<GroupId, Option<String>>,
    /// Questions whose answer came from a review override.
    pub overridden: Vec<GroupId>,
}

/// Ratio recomputed over the questions of one topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicStats {
    pub topic: String,
    pub groups: Vec<GroupId>,
    pub correct: usize,
    pub denominator: usize,
    pub percent_correct: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoreSummary {
    pub scored_pages: usize,
    pub mean_correct: f64,
    pub median_correct: f64,
    /// Mean of the per-page percentages.
    pub mean_percent: f64,
    /// Mean of the per-question "% correct" values.
    pub mean_question_percent: f64,
}

/// Why a page needs a human look.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ReviewReason {
    Failed { failure: PageFailure },
    Ambiguous { groups: Vec<GroupId> },
    LowAlignmentConfidence { confidence: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewItem {
    pub page: PageRef,
    #[serde(flatten)]
    pub reason: ReviewReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreReport {
    pub questions: Vec<QuestionStats>,
    pub pages: Vec<PageScore>,
    pub topics: Vec<TopicStats>,
    pub summary: ScoreSummary,
    /// Failed pages, unresolved ambiguous answers and low-confidence pages.
    pub review: Vec<ReviewItem>,
}

/// Score `pages` against `key` without topics or overrides.
pub fn score(pages: &[PageResult], key: &AnswerKey, options: &ScoringOptions) -> ScoreReport {
    Scorer::new(key, options).score(pages)
}

/// Read the answer key off a marked key sheet among `pages`.
pub fn key_from_sheet(pages: &[PageResult], sheet: &PageRef) -> Result<AnswerKey> {
    let page = pages.iter().find(|p| &p.page == sheet).ok_or_else(|| {
        MarkwerkError::InvalidAnswerKey(format!("key sheet {sheet} was not processed"))
    })?;
    let key = AnswerKey::from_page_result(page)?;
    if key.is_empty() {
        return Err(MarkwerkError::InvalidAnswerKey(format!(
            "key sheet {sheet} has no clearly marked answers"
        )));
    }
    Ok(key)
}

/// Scoring inputs that stay fixed across calls.
pub struct Scorer<'a> {
    key: &'a AnswerKey,
    options: &'a ScoringOptions,
    topics: Option<&'a TopicMap>,
    overrides: Option<&'a ReviewLedger>,
}

impl<'a> Scorer<'a> {
    pub fn new(key: &'a AnswerKey, options: &'a ScoringOptions) -> Self {
        Self {
            key,
            options,
            topics: None,
            overrides: None,
        }
    }

    pub fn with_topics(mut self, topics: &'a TopicMap) -> Self {
        self.topics = Some(topics);
        self
    }

    pub fn with_overrides(mut self, ledger: &'a ReviewLedger) -> Self {
        self.overrides = Some(ledger);
        self
    }

    #[instrument(skip_all, fields(pages = pages.len(), questions = self.key.len()))]
    pub fn score(&self, pages: &[PageResult]) -> ScoreReport {
        let mut ordered: Vec<&PageResult> = pages
            .iter()
            .filter(|p| self.options.exclude_key_page.as_ref() != Some(&p.page))
            .collect();
        ordered.sort_by(|a, b| a.page.cmp(&b.page));

        let review = self.review_items(&ordered);
        let scored: Vec<&PageResult> = ordered.into_iter().filter(|p| p.is_finalized()).collect();
        let page_scores: Vec<PageScore> = scored.iter().map(|page| self.score_page(page)).collect();

        let questions: Vec<QuestionStats> = self
            .key
            .groups()
            .map(|group| self.question_stats(group, &page_scores))
            .collect();
        let topics = self.topic_stats(&questions);
        let summary = summarize(&page_scores, &questions);

        debug!(
            scored = summary.scored_pages,
            mean_correct = summary.mean_correct,
            review = review.len(),
            "Scoring complete"
        );
        ScoreReport {
            questions,
            pages: page_scores,
            topics,
            summary,
            review,
        }
    }

    fn score_page(&self, page: &PageResult) -> PageScore {
        let mut answers = BTreeMap::new();
        let mut overridden = Vec::new();
        let mut correct = 0;

        for group in self.key.groups() {
            let corrected = self
                .overrides
                .and_then(|ledger| ledger.effective_answer(&page.page, &page.source_hash, group));
            let label = match corrected {
                Some(event) => {
                    overridden.push(group);
                    event.corrected.clone()
                }
                None => page
                    .answers
                    .get(&group)
                    .and_then(|a| a.answer.winning_label())
                    .map(str::to_string),
            };
            if label.as_deref().is_some_and(|l| self.key.is_correct(group, l)) {
                correct += 1;
            }
            answers.insert(group, label);
        }

        let keyed_questions = self.key.len();
        PageScore {
            page: page.page.clone(),
            correct,
            keyed_questions,
            percent: percent(correct, keyed_questions),
            answers,
            overridden,
        }
    }

    fn question_stats(&self, group: GroupId, pages: &[PageScore]) -> QuestionStats {
        let mut answer_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut correct = 0;
        for label in pages.iter().filter_map(|p| p.answers.get(&group)?.as_deref()) {
            *answer_counts.entry(label.to_string()).or_default() += 1;
            if self.key.is_correct(group, label) {
                correct += 1;
            }
        }
        let answered = answer_counts.values().sum();
        let denominator = match self.options.denominator {
            Denominator::Answered => answered,
            Denominator::AllPages => pages.len(),
        };
        QuestionStats {
            group_id: group,
            key: self.key.get(group).unwrap_or_default().to_string(),
            correct,
            answered,
            denominator,
            percent_correct: percent(correct, denominator),
            answer_counts,
        }
    }

    fn topic_stats(&self, questions: &[QuestionStats]) -> Vec<TopicStats> {
        let Some(topics) = self.topics else {
            return Vec::new();
        };
        topics
            .iter()
            .map(|(topic, groups)| {
                let members: Vec<&QuestionStats> = questions
                    .iter()
                    .filter(|q| groups.contains(&q.group_id))
                    .collect();
                let correct = members.iter().map(|q| q.correct).sum();
                let denominator = members.iter().map(|q| q.denominator).sum();
                TopicStats {
                    topic: topic.to_string(),
                    groups: members.iter().map(|q| q.group_id).collect(),
                    correct,
                    denominator,
                    percent_correct: percent(correct, denominator),
                }
            })
            .collect()
    }

    fn review_items(&self, pages: &[&PageResult]) -> Vec<ReviewItem> {
        let mut items = Vec::new();
        for page in pages {
            if let Some(failure) = page.failure() {
                items.push(ReviewItem {
                    page: page.page.clone(),
                    reason: ReviewReason::Failed {
                        failure: failure.clone(),
                    },
                });
                continue;
            }

            let unresolved: Vec<GroupId> = page
                .ambiguous_groups()
                .into_iter()
                .filter(|&group| {
                    self.overrides
                        .and_then(|ledger| ledger.effective_answer(&page.page, &page.source_hash, group))
                        .is_none()
                })
                .collect();
            if !unresolved.is_empty() {
                items.push(ReviewItem {
                    page: page.page.clone(),
                    reason: ReviewReason::Ambiguous { groups: unresolved },
                });
            }

            if let Some(alignment) = page.alignment.as_ref().filter(|a| a.low_confidence) {
                items.push(ReviewItem {
                    page: page.page.clone(),
                    reason: ReviewReason::LowAlignmentConfidence {
                        confidence: alignment.confidence,
                    },
                });
            }
        }
        items
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    values.sum::<f64>() / n as f64
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn summarize(pages: &[PageScore], questions: &[QuestionStats]) -> ScoreSummary {
    ScoreSummary {
        scored_pages: pages.len(),
        mean_correct: mean(pages.iter().map(|p| p.correct as f64)),
        median_correct: median(pages.iter().map(|p| p.correct as f64).collect()),
        mean_percent: mean(pages.iter().map(|p| p.percent)),
        mean_question_percent: mean(questions.iter().map(|q| q.percent_correct)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use markwerk_core::types::{
        AlignmentMethod, AlignmentSummary, Answer, FailureKind, GroupAnswer, PageStage, PageStatus,
    };

    fn answered(label: &str) -> Answer {
        Answer::Answered { label: label.into() }
    }

    fn page(name: &str, answers: Vec<(GroupId, Answer)>) -> PageResult {
        PageResult {
            page: PageRef::new(name, 0),
            source_hash: "hash".into(),
            status: PageStatus::Finalized,
            alignment: None,
            decisions: Vec::new(),
            answers: answers
                .into_iter()
                .map(|(group_id, answer)| {
                    (
                        group_id,
                        GroupAnswer {
                            group_id,
                            answer,
                            confidence: 0.8,
                        },
                    )
                })
                .collect(),
            texts: Vec::new(),
            issues: Vec::new(),
        }
    }

    fn key() -> AnswerKey {
        AnswerKey::new([(1, "A".to_string()), (2, "B".to_string()), (3, "C".to_string())]).unwrap()
    }

    fn class() -> Vec<PageResult> {
        vec![
            page("s1.pdf", vec![(1, answered("A")), (2, answered("B")), (3, answered("C"))]),
            page("s2.pdf", vec![(1, answered("A")), (2, answered("D")), (3, Answer::Blank)]),
            page(
                "s3.pdf",
                vec![
                    (1, answered("B")),
                    (
                        2,
                        Answer::Ambiguous {
                            chosen: Some("B".into()),
                            candidates: vec!["A".into(), "B".into()],
                        },
                    ),
                    (3, answered("C")),
                ],
            ),
        ]
    }

    #[test]
    fn per_question_and_per_page_counts() {
        let report = score(&class(), &key(), &ScoringOptions::default());

        let q1 = &report.questions[0];
        assert_eq!((q1.correct, q1.answered, q1.denominator), (2, 3, 3));
        let q2 = &report.questions[1];
        assert_eq!((q2.correct, q2.answered), (2, 3));
        assert_eq!(q2.answer_counts.get("D"), Some(&1));
        // Blank on s2 is left out of the Answered denominator.
        let q3 = &report.questions[2];
        assert_eq!((q3.correct, q3.denominator), (2, 2));
        assert!((q3.percent_correct - 100.0).abs() < 1e-9);

        let correct: Vec<usize> = report.pages.iter().map(|p| p.correct).collect();
        assert_eq!(correct, vec![3, 1, 2]);
        assert!((report.pages[0].percent - 100.0).abs() < 1e-9);
        assert_eq!(report.summary.scored_pages, 3);
        assert!((report.summary.mean_correct - 2.0).abs() < 1e-9);
        assert!((report.summary.median_correct - 2.0).abs() < 1e-9);
    }

    #[test]
    fn all_pages_denominator_counts_blanks() {
        let options = ScoringOptions {
            denominator: Denominator::AllPages,
            ..ScoringOptions::default()
        };
        let report = score(&class(), &key(), &options);
        let q3 = &report.questions[2];
        assert_eq!(q3.denominator, 3);
        assert!((q3.percent_correct - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn failed_pages_go_to_review_not_statistics() {
        let mut pages = class();
        pages.push(PageResult::failed(
            PageRef::new("s0.pdf", 0),
            "hash",
            PageStage::Loaded,
            PageFailure::new(FailureKind::Alignment, "blank page"),
        ));
        let report = score(&pages, &key(), &ScoringOptions::default());
        assert_eq!(report.summary.scored_pages, 3);
        assert!(matches!(
            &report.review[0],
            ReviewItem { page, reason: ReviewReason::Failed { .. } } if page.source == "s0.pdf"
        ));
        assert!(report.review.iter().any(|item| matches!(
            &item.reason,
            ReviewReason::Ambiguous { groups } if groups == &vec![2]
        )));
    }

    #[test]
    fn low_alignment_pages_are_flagged() {
        let mut pages = class();
        pages[1].alignment = Some(AlignmentSummary {
            method: AlignmentMethod::PageSize,
            scale: 1.0,
            rotation_degrees: 0.0,
            translation: (0.0, 0.0),
            confidence: 0.4,
            low_confidence: true,
        });
        let report = score(&pages, &key(), &ScoringOptions::default());
        assert!(report.review.iter().any(|item| item.page.source == "s2.pdf"
            && matches!(item.reason, ReviewReason::LowAlignmentConfidence { confidence } if confidence == 0.4)));
    }

    #[test]
    fn overrides_replace_detected_answers() {
        let mut ledger = ReviewLedger::new();
        ledger.record(PageRef::new("s2.pdf", 0), "hash", 2, Some("B"), "faint mark on B");
        ledger.record(PageRef::new("s3.pdf", 0), "hash", 2, Some("A"), "erased B");
        ledger.record(PageRef::new("s1.pdf", 0), "older-scan", 1, Some("D"), "different document");
        let key = key();
        let options = ScoringOptions::default();
        let report = Scorer::new(&key, &options).with_overrides(&ledger).score(&class());

        assert_eq!(report.pages[1].correct, 2);
        assert_eq!(report.pages[1].overridden, vec![2]);
        // A correction made against another scan of s1.pdf does not apply.
        assert!(report.pages[0].overridden.is_empty());
        assert_eq!(report.pages[0].correct, 3);
        assert_eq!(report.pages[2].answers[&2].as_deref(), Some("A"));
        // The override settles the ambiguity.
        assert!(!report.review.iter().any(|item| matches!(item.reason, ReviewReason::Ambiguous { .. })));
        // Originals are untouched.
        assert_eq!(class()[1].answers[&2].answer, answered("D"));
    }

    #[test]
    fn key_page_can_be_excluded() {
        let mut pages = class();
        pages.push(page("key.pdf", vec![(1, answered("A")), (2, answered("B")), (3, answered("C"))]));
        let options = ScoringOptions {
            exclude_key_page: Some(PageRef::new("key.pdf", 0)),
            ..ScoringOptions::default()
        };
        let report = score(&pages, &key(), &options);
        assert_eq!(report.summary.scored_pages, 3);
        assert!(report.pages.iter().all(|p| p.page.source != "key.pdf"));
    }

    #[test]
    fn topics_recompute_ratio() {
        let topics = TopicMap::new([
            ("algebra".to_string(), vec![1, 2]),
            ("geometry".to_string(), vec![3, 99]),
        ]);
        let key = key();
        let options = ScoringOptions::default();
        let report = Scorer::new(&key, &options).with_topics(&topics).score(&class());

        let algebra = &report.topics[0];
        assert_eq!(algebra.topic, "algebra");
        assert_eq!((algebra.correct, algebra.denominator), (4, 6));
        let geometry = &report.topics[1];
        assert_eq!(geometry.groups, vec![3]);
        assert_eq!((geometry.correct, geometry.denominator), (2, 2));
    }

    #[test]
    fn scoring_is_idempotent() {
        let pages = class();
        let first = score(&pages, &key(), &ScoringOptions::default());
        let second = score(&pages, &key(), &ScoringOptions::default());
        assert_eq!(first, second);
    }

    #[test]
    fn empty_input_scores_zero() {
        let report = score(&[], &key(), &ScoringOptions::default());
        assert_eq!(report.summary, ScoreSummary::default());
        assert!(report.questions.iter().all(|q| q.percent_correct == 0.0));
    }

    #[test]
    fn key_sheet_supplies_the_key() {
        let pages = class();
        let key = key_from_sheet(&pages, &PageRef::new("s1.pdf", 0)).unwrap();
        assert_eq!(key.get(3), Some("C"));
        assert!(key_from_sheet(&pages, &PageRef::new("missing.pdf", 0)).is_err());
        // Blank questions on the sheet are left out of the key.
        let partial = key_from_sheet(&pages, &PageRef::new("s2.pdf", 0)).unwrap();
        assert_eq!(partial.len(), 2);
    }

    #[test]
    fn median_of_even_count_averages_middle() {
        assert_eq!(median(vec![4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(vec![]), 0.0);
    }
}

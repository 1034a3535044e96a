// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Answer keys and topic maps. Both are read-only inputs to scoring.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::{MarkwerkError, Result};
use crate::template::GroupId;
use crate::types::PageResult;

/// Normalise a label for comparison: drop all whitespace, upper-case.
pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<String>()
        .to_uppercase()
}

/// Correct option label per question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerKey {
    answers: BTreeMap<GroupId, String>,
}

impl AnswerKey {
    /// Build a key; labels are normalised and empty labels rejected.
    pub fn new(answers: impl IntoIterator<Item = (GroupId, String)>) -> Result<Self> {
        let mut normalized = BTreeMap::new();
        for (group, label) in answers {
            let label = normalize_label(&label);
            if label.is_empty() {
                return Err(MarkwerkError::InvalidAnswerKey(format!(
                    "question {group} has an empty answer"
                )));
            }
            normalized.insert(group, label);
        }
        Ok(Self {
            answers: normalized,
        })
    }

    /// Use a marked key sheet as the answer key.
    ///
    /// Only unambiguous answers are taken; blank or ambiguous questions on the
    /// key sheet are left out of the key and logged.
    pub fn from_page_result(page: &PageResult) -> Result<Self> {
        if !page.is_finalized() {
            return Err(MarkwerkError::InvalidAnswerKey(format!(
                "key sheet {} was not recognised",
                page.page
            )));
        }
        let mut answers = Vec::new();
        for answer in page.answers.values() {
            match &answer.answer {
                crate::types::Answer::Answered { label } => {
                    answers.push((answer.group_id, label.clone()))
                }
                other => warn!(
                    group = answer.group_id,
                    answer = %other,
                    "Key sheet question is not answered unambiguously; skipped"
                ),
            }
        }
        Self::new(answers)
    }

    pub fn get(&self, group: GroupId) -> Option<&str> {
        self.answers.get(&group).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    pub fn groups(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.answers.keys().copied()
    }

    /// Whether `label` matches the key for `group`.
    pub fn is_correct(&self, group: GroupId, label: &str) -> bool {
        self.get(group)
            .is_some_and(|expected| expected == normalize_label(label))
    }

    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let raw: BTreeMap<GroupId, String> = serde_json::from_str(&data)?;
        let key = Self::new(raw)?;
        info!(questions = key.len(), "Answer key loaded");
        Ok(key)
    }
}

/// Topic name → questions belonging to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicMap {
    topics: BTreeMap<String, Vec<GroupId>>,
}

impl TopicMap {
    pub fn new(topics: impl IntoIterator<Item = (String, Vec<GroupId>)>) -> Self {
        Self {
            topics: topics.into_iter().collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[GroupId])> {
        self.topics.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&data)?)
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Mark classification: turns bubble patches into filled/unfilled decisions
// and one answer per question.
//
// Each patch yields three signals normalised to [0, 1]:
//
// - darkness:   how much darker than the local paper the patch is
// - saturation: mean chroma, so coloured pens register even when light
// - blue:       mean excess of blue over red (blue/black ballpoint)
//
// combined = darkness * 1.0 + saturation * 0.5 + blue * 0.3, and an option
// is filled when combined is strictly above the threshold.

use image::RgbImage;
use markwerk_core::config::{RecognitionConfig, TieBreak};
use markwerk_core::template::{GroupId, Region};
use markwerk_core::types::{Answer, GroupAnswer, MarkDecision, MarkSignals, SampleQuality};
use tracing::debug;

use crate::image::pixels::luma;
use crate::scan::sampler::RegionSample;

pub const DARKNESS_WEIGHT: f64 = 1.0;
pub const SATURATION_WEIGHT: f64 = 0.5;
pub const BLUE_WEIGHT: f64 = 0.3;

/// Build the signal set, computing the weighted combination.
pub fn mark_signals(darkness: f64, saturation: f64, blue: f64) -> MarkSignals {
    MarkSignals {
        darkness,
        saturation,
        blue,
        combined: darkness * DARKNESS_WEIGHT + saturation * SATURATION_WEIGHT + blue * BLUE_WEIGHT,
    }
}

/// Measure a patch against its local background luma (0..=255).
pub fn extract_signals(patch: &RgbImage, background_luma: f64) -> MarkSignals {
    let pixels = u64::from(patch.width()) * u64::from(patch.height());
    if pixels == 0 {
        return MarkSignals::default();
    }

    let (mut luma_sum, mut chroma_sum, mut blue_sum) = (0.0f64, 0.0f64, 0.0f64);
    for px in patch.pixels() {
        let [r, g, b] = px.0;
        luma_sum += luma(px);
        chroma_sum += f64::from(r.max(g).max(b) - r.min(g).min(b));
        blue_sum += f64::from(b.saturating_sub(r));
    }
    let n = pixels as f64;
    let mean_luma = luma_sum / n;

    let darkness = if background_luma > 0.0 {
        ((background_luma - mean_luma) / background_luma).clamp(0.0, 1.0)
    } else {
        0.0
    };
    mark_signals(darkness, chroma_sum / n / 255.0, blue_sum / n / 255.0)
}

/// One option of a question, ready to be decided.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionCandidate {
    pub region_id: String,
    pub option_label: String,
    pub signals: MarkSignals,
    pub quality: SampleQuality,
}

impl OptionCandidate {
    /// Score a sampled option region. Out-of-bounds samples get zero signals.
    pub fn from_sample(region: &Region, sample: &RegionSample) -> Self {
        let signals = if sample.is_usable() {
            extract_signals(&sample.patch, sample.background_luma)
        } else {
            MarkSignals::default()
        };
        Self {
            region_id: region.id.clone(),
            option_label: region.option_label.clone().unwrap_or_default(),
            signals,
            quality: sample.quality,
        }
    }

    fn is_usable(&self) -> bool {
        self.quality != SampleQuality::OutOfBounds
    }
}

/// Decides questions from their option candidates.
#[derive(Debug, Clone, Copy)]
pub struct MarkClassifier {
    threshold: f64,
    tie_break: TieBreak,
}

impl MarkClassifier {
    pub fn new(config: &RecognitionConfig) -> Self {
        Self::with_threshold(config.darkness_threshold, config.tie_break)
    }

    pub fn with_threshold(threshold: f64, tie_break: TieBreak) -> Self {
        Self {
            threshold,
            tie_break,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Decide one question. `candidates` must be in template order; that
    /// order breaks exact ties under [`TieBreak::TemplateOrder`].
    pub fn classify_group(
        &self,
        group_id: GroupId,
        candidates: &[OptionCandidate],
    ) -> (Vec<MarkDecision>, GroupAnswer) {
        let filled: Vec<bool> = candidates
            .iter()
            .map(|c| c.is_usable() && c.signals.combined > self.threshold)
            .collect();

        // Scores of usable options, best first (stable, so template order
        // survives among equals).
        let mut ranked: Vec<(usize, f64)> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_usable())
            .map(|(i, c)| (i, c.signals.combined))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let winners: Vec<usize> = (0..candidates.len()).filter(|&i| filled[i]).collect();
        let best = ranked.first().map_or(0.0, |&(_, score)| score);
        let runner_up = ranked.get(1).map(|&(_, score)| score);

        let (answer, confidence) = match winners.as_slice() {
            [] => (Answer::Blank, self.blank_confidence(best)),
            [only] => (
                Answer::Answered {
                    label: candidates[*only].option_label.clone(),
                },
                self.margin_confidence(best, runner_up),
            ),
            several => {
                let tied: Vec<usize> = several
                    .iter()
                    .copied()
                    .filter(|&i| candidates[i].signals.combined == best)
                    .collect();
                let chosen = match (tied.as_slice(), self.tie_break) {
                    ([single], _) => Some(candidates[*single].option_label.clone()),
                    ([first, ..], TieBreak::TemplateOrder) => {
                        Some(candidates[*first].option_label.clone())
                    }
                    _ => None,
                };
                debug!(
                    group = group_id,
                    filled = several.len(),
                    tied = tied.len(),
                    chosen = ?chosen,
                    "Ambiguous question"
                );
                (
                    Answer::Ambiguous {
                        chosen,
                        candidates: several
                            .iter()
                            .map(|&i| candidates[i].option_label.clone())
                            .collect(),
                    },
                    self.margin_confidence(best, runner_up),
                )
            }
        };

        let ambiguous = answer.is_ambiguous();
        let decisions = candidates
            .iter()
            .zip(&filled)
            .map(|(c, &is_filled)| MarkDecision {
                region_id: c.region_id.clone(),
                group_id,
                option_label: c.option_label.clone(),
                filled: is_filled,
                confidence: if c.is_usable() { confidence } else { 0.0 },
                ambiguous,
                quality: c.quality,
                signals: c.signals,
            })
            .collect();

        (
            decisions,
            GroupAnswer {
                group_id,
                answer,
                confidence,
            },
        )
    }

    /// `(winner - runner_up) / winner`, or `(winner - threshold) / winner`
    /// when the question has a single usable option.
    fn margin_confidence(&self, winner: f64, runner_up: Option<f64>) -> f64 {
        if winner <= 0.0 {
            return 0.0;
        }
        let reference = runner_up.unwrap_or(self.threshold);
        ((winner - reference) / winner).clamp(0.0, 1.0)
    }

    /// How clearly the best option stayed below the threshold.
    fn blank_confidence(&self, best: f64) -> f64 {
        if self.threshold <= 0.0 {
            return 0.0;
        }
        ((self.threshold - best) / self.threshold).clamp(0.0, 1.0)
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page recognition — drives one page through
// Loaded → Aligned → Sampled → Classified → Finalized.
//
// Every call produces exactly one terminal `PageResult`. Page-level problems
// (blank page, render failure, every region off the page) end in
// `PageStatus::Failed`; region-level problems become `PageIssue`s on an
// otherwise finalized page.

use std::collections::BTreeMap;
use std::sync::Arc;

use image::DynamicImage;
use markwerk_core::config::RecognitionConfig;
use markwerk_core::error::MarkwerkError;
use markwerk_core::template::Template;
use markwerk_core::types::{
    FailureKind, PageFailure, PageIssue, PageRef, PageResult, PageStage, PageStatus, TextResult,
};
use markwerk_document::image::pixels::page_background;
use markwerk_document::scan::{
    AlignmentEstimator, MarkClassifier, OptionCandidate, RegionSample, RegionSampler,
    TextRecognizer, recognize_soft,
};
use markwerk_document::source::PageSource;
use tracing::{debug, info, instrument, warn};

/// Recognises pages against one template. Cheap to share between workers.
pub struct PageRecognizer {
    template: Arc<Template>,
    config: RecognitionConfig,
    estimator: AlignmentEstimator,
    classifier: MarkClassifier,
    ocr: Arc<dyn TextRecognizer>,
}

impl PageRecognizer {
    pub fn new(template: Arc<Template>, config: RecognitionConfig, ocr: Arc<dyn TextRecognizer>) -> Self {
        Self {
            estimator: AlignmentEstimator::new(&config),
            classifier: MarkClassifier::new(&config),
            template,
            config,
            ocr,
        }
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    /// Render page `index` of `source` at `dpi` and recognise it.
    #[instrument(skip_all, fields(source = source.name(), page = index))]
    pub fn process(&self, source: &dyn PageSource, index: usize, dpi: u32) -> PageResult {
        let page = PageRef::new(source.name(), index);
        match source.render_page(index, dpi) {
            Ok(image) => self.recognize(page, source.source_hash(), &image),
            Err(err) => {
                warn!(page = %page, error = %err, "Page could not be rendered");
                let failure = PageFailure::new(FailureKind::Rasterization, err.to_string());
                PageResult::failed(page, source.source_hash(), PageStage::Loaded, failure)
            }
        }
    }

    /// Recognise an already rendered page.
    #[instrument(skip_all, fields(page = %page))]
    pub fn recognize(&self, page: PageRef, source_hash: &str, image: &DynamicImage) -> PageResult {
        let template = self.template.as_ref();

        // Loaded → Aligned
        let alignment = match self.estimator.estimate(image, template) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(page = %page, error = %err, "Alignment failed");
                return PageResult::failed(page, source_hash, PageStage::Loaded, PageFailure::from(&err));
            }
        };

        let padding = if alignment.low_confidence {
            self.config.sampling_padding * self.config.low_confidence_padding_factor
        } else {
            self.config.sampling_padding
        };
        let sampler = match RegionSampler::new(
            image,
            &alignment.transform,
            padding,
            self.config.background_ring,
            page_background(&image.to_luma8()),
        ) {
            Ok(sampler) => sampler,
            Err(err) => {
                return PageResult::failed(page, source_hash, PageStage::Loaded, PageFailure::from(&err));
            }
        };

        // Aligned → Sampled
        let groups = template.option_groups();
        let mut samples: BTreeMap<&str, RegionSample> = groups
            .values()
            .flatten()
            .copied()
            .chain(template.text_regions())
            .map(|region| (region.id.as_str(), sampler.sample(region)))
            .collect();

        let out_of_bounds: Vec<&str> = template
            .regions
            .iter()
            .map(|region| region.id.as_str())
            .filter(|id| samples.get(id).is_some_and(|sample| !sample.is_usable()))
            .collect();
        let mut issues: Vec<PageIssue> = out_of_bounds
            .iter()
            .map(|id| PageIssue::SamplingOutOfBounds {
                region_id: (*id).to_string(),
            })
            .collect();

        if !samples.is_empty() && out_of_bounds.len() == samples.len() {
            let err = MarkwerkError::SamplingOutOfBounds {
                region_id: format!("all {} regions", samples.len()),
            };
            warn!(page = %page, "Every region fell outside the page");
            let mut failed =
                PageResult::failed(page, source_hash, PageStage::Sampled, PageFailure::from(&err));
            failed.alignment = Some(alignment.summary());
            failed.issues = issues;
            return failed;
        }
        debug!(page = %page, regions = samples.len(), out_of_bounds = out_of_bounds.len(), "Regions sampled");

        // Sampled → Classified
        let mut decisions = Vec::new();
        let mut answers = BTreeMap::new();
        for (group_id, regions) in &groups {
            let candidates: Vec<OptionCandidate> = regions
                .iter()
                .filter_map(|region| {
                    samples
                        .get(region.id.as_str())
                        .map(|sample| OptionCandidate::from_sample(region, sample))
                })
                .collect();
            let (group_decisions, answer) = self.classifier.classify_group(*group_id, &candidates);
            decisions.extend(group_decisions);
            answers.insert(*group_id, answer);
        }

        let mut texts = Vec::new();
        for region in template.text_regions() {
            let Some(sample) = samples.remove(region.id.as_str()) else {
                continue;
            };
            if !sample.is_usable() {
                texts.push(TextResult {
                    region_id: region.id.clone(),
                    label: region.display_name(),
                    text: String::new(),
                    confidence: 0.0,
                    failure: Some("region is outside the scanned page".into()),
                });
                continue;
            }
            let text = recognize_soft(self.ocr.as_ref(), region, &DynamicImage::ImageRgb8(sample.patch));
            if let Some(message) = &text.failure {
                issues.push(PageIssue::OcrFailure {
                    region_id: region.id.clone(),
                    message: message.clone(),
                });
            }
            texts.push(text);
        }

        info!(
            page = %page,
            questions = answers.len(),
            ambiguous = answers.values().filter(|a| a.answer.is_ambiguous()).count(),
            issues = issues.len(),
            "Page finalized"
        );

        // Classified → Finalized
        PageResult {
            page,
            source_hash: source_hash.to_string(),
            status: PageStatus::Finalized,
            alignment: Some(alignment.summary()),
            decisions,
            answers,
            texts,
            issues,
        }
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Region model and template persistence.
//
// A template is authored once on a canonical page and then handed to the
// recognition pipeline as an immutable value. The JSON form round-trips
// losslessly (serde_json is built with `float_roundtrip`).

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{MarkwerkError, Result};
use crate::geometry::BoundingBox;

/// Question number shared by the option regions of one answer group.
pub type GroupId = u32;

/// Labels handed out by [`Region::option_strip`].
const OPTION_LABELS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// What a region on the template is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    /// One selectable answer bubble.
    Option,
    /// Free-text field handed to OCR (student name, ID, ...).
    Text,
    /// Fiducial mark used to estimate the page transform.
    AlignmentReference,
}

/// A markable area on the template page, in template pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub kind: RegionKind,
    pub bbox: BoundingBox,
    /// Question number (Option regions only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    /// "A", "B", ... (Option regions only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_label: Option<String>,
    /// Display name of a text field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Region {
    pub fn option(
        id: impl Into<String>,
        bbox: BoundingBox,
        group_id: GroupId,
        option_label: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: RegionKind::Option,
            bbox,
            group_id: Some(group_id),
            option_label: Some(option_label.into()),
            label: None,
        }
    }

    pub fn text(id: impl Into<String>, bbox: BoundingBox, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: RegionKind::Text,
            bbox,
            group_id: None,
            option_label: None,
            label: Some(label.into()),
        }
    }

    pub fn alignment_reference(id: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            id: id.into(),
            kind: RegionKind::AlignmentReference,
            bbox,
            group_id: None,
            option_label: None,
            label: None,
        }
    }

    /// Split one rectangle covering a row of `count` bubbles into `count`
    /// option regions labelled A, B, C, ...
    ///
    /// Cells get an integer width of `floor(width / count)`; the last cell
    /// absorbs the remainder. Region ids are `"{prefix}-{label}"`.
    pub fn option_strip(
        prefix: &str,
        bbox: BoundingBox,
        group_id: GroupId,
        count: usize,
    ) -> Result<Vec<Region>> {
        if !(2..=OPTION_LABELS.len()).contains(&count) {
            return Err(MarkwerkError::InvalidTemplate(format!(
                "option strip {prefix} needs between 2 and {} options, got {count}",
                OPTION_LABELS.len()
            )));
        }
        let cell_width = (bbox.width / count as f64).floor();
        if cell_width < 1.0 {
            return Err(MarkwerkError::InvalidTemplate(format!(
                "option strip {prefix} is too narrow for {count} options"
            )));
        }

        let regions = OPTION_LABELS
            .chars()
            .take(count)
            .enumerate()
            .map(|(i, label)| {
                let left = bbox.x + i as f64 * cell_width;
                let width = if i + 1 == count {
                    bbox.right() - left
                } else {
                    cell_width
                };
                Region::option(
                    format!("{prefix}-{label}"),
                    BoundingBox::new(left, bbox.y, width, bbox.height),
                    group_id,
                    label.to_string(),
                )
            })
            .collect();
        Ok(regions)
    }

    /// Name used for text results: the label, or `"Field {id}"`.
    pub fn display_name(&self) -> String {
        match &self.label {
            Some(label) if !label.trim().is_empty() => label.clone(),
            _ => format!("Field {}", self.id),
        }
    }
}

/// Page-size metadata of the canonical template page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    /// Page width in template pixels.
    pub width: f64,
    /// Page height in template pixels.
    pub height: f64,
    /// Resolution the template page was rendered at.
    pub dpi: u32,
    /// Extent of the printed content on the template page, when known. Lets
    /// the fallback alignment match content extents instead of page edges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_box: Option<BoundingBox>,
}

/// An immutable set of regions on a canonical page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub page: PageGeometry,
    pub regions: Vec<Region>,
}

impl Template {
    /// Build a template and validate it.
    pub fn new(name: impl Into<String>, page: PageGeometry, regions: Vec<Region>) -> Result<Self> {
        let template = Self {
            name: name.into(),
            page,
            regions,
        };
        template.validate()?;
        Ok(template)
    }

    /// Check the structural rules every consumer relies on.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(MarkwerkError::InvalidTemplate(msg));

        if !(self.page.width > 0.0 && self.page.height > 0.0) {
            return invalid(format!(
                "page size must be positive, got {}x{}",
                self.page.width, self.page.height
            ));
        }
        if self.page.dpi == 0 {
            return invalid("page dpi must be positive".into());
        }

        let mut ids = HashSet::new();
        let mut labels_per_group: BTreeMap<GroupId, HashSet<&str>> = BTreeMap::new();
        let mut references = 0usize;

        for region in &self.regions {
            if region.id.trim().is_empty() {
                return invalid("region id must not be empty".into());
            }
            if !ids.insert(region.id.as_str()) {
                return invalid(format!("duplicate region id {}", region.id));
            }
            let b = &region.bbox;
            if !(b.x.is_finite() && b.y.is_finite()) || b.is_degenerate() {
                return invalid(format!("region {} has degenerate geometry", region.id));
            }

            match region.kind {
                RegionKind::Option => {
                    let (Some(group), Some(label)) = (region.group_id, &region.option_label) else {
                        return invalid(format!(
                            "option region {} needs a group id and an option label",
                            region.id
                        ));
                    };
                    if label.trim().is_empty() {
                        return invalid(format!("option region {} has an empty label", region.id));
                    }
                    if !labels_per_group
                        .entry(group)
                        .or_default()
                        .insert(label.as_str())
                    {
                        return invalid(format!(
                            "label {label} appears twice in question {group}"
                        ));
                    }
                }
                RegionKind::AlignmentReference => references += 1,
                RegionKind::Text => {}
            }
        }

        if references > 1 {
            return invalid(format!(
                "at most one alignment reference is allowed, found {references}"
            ));
        }
        Ok(())
    }

    /// Option regions grouped by question, each group in template order.
    pub fn option_groups(&self) -> BTreeMap<GroupId, Vec<&Region>> {
        let mut groups: BTreeMap<GroupId, Vec<&Region>> = BTreeMap::new();
        for region in &self.regions {
            if let (RegionKind::Option, Some(group)) = (region.kind, region.group_id) {
                groups.entry(group).or_default().push(region);
            }
        }
        groups
    }

    pub fn text_regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter().filter(|r| r.kind == RegionKind::Text)
    }

    pub fn alignment_reference(&self) -> Option<&Region> {
        self.regions
            .iter()
            .find(|r| r.kind == RegionKind::AlignmentReference)
    }

    pub fn region(&self, id: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }

    // -- Persistence ----------------------------------------------------------

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and validate a template.
    pub fn from_json(json: &str) -> Result<Self> {
        let template: Template = serde_json::from_str(json)?;
        template.validate()?;
        Ok(template)
    }

    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let template = Self::from_json(&data)?;
        info!(
            name = %template.name,
            regions = template.regions.len(),
            "Template loaded"
        );
        Ok(template)
    }

    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.validate()?;
        std::fs::write(path.as_ref(), self.to_json()?)?;
        debug!(regions = self.regions.len(), "Template saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> PageGeometry {
        PageGeometry {
            width: 1240.0,
            height: 1754.0,
            dpi: 150,
            content_box: Some(BoundingBox::new(60.5, 80.25, 1100.0, 1600.125)),
        }
    }

    fn sample_template() -> Template {
        let mut regions = vec![
            Region::alignment_reference("ref", BoundingBox::new(40.0, 40.0, 30.0, 30.0)),
            Region::text("name", BoundingBox::new(100.0, 100.0, 400.0, 40.0), "Name"),
        ];
        regions.extend(
            Region::option_strip("q1", BoundingBox::new(100.0, 300.0, 203.0, 30.0), 1, 4).unwrap(),
        );
        regions.push(Region::option(
            "q2-A",
            BoundingBox::new(100.1, 350.7, 33.333333333333336, 30.0),
            2,
            "A",
        ));
        Template::new("midterm", page(), regions).unwrap()
    }

    #[test]
    fn option_strip_splits_evenly_with_remainder_in_last_cell() {
        let cells =
            Region::option_strip("q", BoundingBox::new(10.0, 0.0, 203.0, 20.0), 7, 4).unwrap();
        let labels: Vec<_> = cells
            .iter()
            .map(|c| c.option_label.clone().unwrap())
            .collect();
        assert_eq!(labels, ["A", "B", "C", "D"]);
        assert_eq!(cells[0].bbox.width, 50.0);
        assert_eq!(cells[3].bbox.x, 160.0);
        assert_eq!(cells[3].bbox.width, 53.0);
        assert!(cells.iter().all(|c| c.group_id == Some(7)));
        assert_eq!(cells[2].id, "q-C");
    }

    #[test]
    fn option_strip_rejects_bad_counts() {
        let bbox = BoundingBox::new(0.0, 0.0, 100.0, 10.0);
        assert!(Region::option_strip("q", bbox, 1, 1).is_err());
        assert!(Region::option_strip("q", bbox, 1, 27).is_err());
    }

    #[test]
    fn json_round_trip_is_lossless() {
        let template = sample_template();
        let json = template.to_json().unwrap();
        let loaded = Template::from_json(&json).unwrap();
        assert_eq!(loaded, template);
        assert_eq!(loaded.to_json().unwrap(), json);
    }

    #[test]
    fn file_round_trip_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.json");
        let second = dir.path().join("b.json");

        let template = sample_template();
        template.save(&first).unwrap();
        Template::load(&first).unwrap().save(&second).unwrap();

        assert_eq!(
            std::fs::read(&first).unwrap(),
            std::fs::read(&second).unwrap()
        );
    }

    #[test]
    fn groups_keep_template_order() {
        let template = sample_template();
        let groups = template.option_groups();
        assert_eq!(groups.len(), 2);
        let q1: Vec<_> = groups[&1].iter().map(|r| r.id.as_str()).collect();
        assert_eq!(q1, ["q1-A", "q1-B", "q1-C", "q1-D"]);
        assert_eq!(template.alignment_reference().unwrap().id, "ref");
        assert_eq!(template.text_regions().count(), 1);
    }

    #[test]
    fn validation_catches_structural_errors() {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);

        let dup = vec![Region::text("a", bbox, "x"), Region::text("a", bbox, "y")];
        assert!(Template::new("t", page(), dup).is_err());

        let same_label = vec![
            Region::option("a", bbox, 1, "A"),
            Region::option("b", bbox, 1, "A"),
        ];
        assert!(Template::new("t", page(), same_label).is_err());

        let two_refs = vec![
            Region::alignment_reference("r1", bbox),
            Region::alignment_reference("r2", bbox),
        ];
        assert!(Template::new("t", page(), two_refs).is_err());

        let degenerate = vec![Region::text("a", BoundingBox::new(0.0, 0.0, 0.0, 3.0), "x")];
        assert!(Template::new("t", page(), degenerate).is_err());

        let mut unlabeled = Region::option("a", bbox, 1, "A");
        unlabeled.option_label = None;
        assert!(Template::new("t", page(), vec![unlabeled]).is_err());
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(Region::text("n", bbox, "Name").display_name(), "Name");
        assert_eq!(Region::text("n", bbox, " ").display_name(), "Field n");
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Markwerk — Core types, templates and error definitions shared across all crates.

pub mod config;
pub mod error;
pub mod geometry;
pub mod human_errors;
pub mod key;
pub mod template;
pub mod types;

pub use config::{AppConfig, RecognitionConfig};
pub use error::{MarkwerkError, Result};
pub use geometry::{BoundingBox, Point, Transform};
pub use key::{AnswerKey, TopicMap};
pub use template::{GroupId, PageGeometry, Region, RegionKind, Template};
pub use types::*;

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image module — loose scan files as page sources, and the pixel statistics
// the alignment and classification stages share.

pub mod file_source;
pub mod pixels;

pub use file_source::ImageFileSource;

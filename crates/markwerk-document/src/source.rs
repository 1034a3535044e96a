// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page sources — anything that can hand the recogniser one raster image per
// page (scanned PDFs, loose image files).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use markwerk_core::error::{MarkwerkError, Result};

use crate::image::file_source::ImageFileSource;
use crate::pdf::reader::PdfPageSource;

/// A document whose pages can be rasterised independently.
///
/// Implementations must be cheap to share across worker threads: the batch
/// runner renders pages of one source concurrently.
pub trait PageSource: Send + Sync {
    /// Display name used in `PageRef::source` (usually the file name).
    fn name(&self) -> &str;

    /// SHA-256 of the source bytes, lowercase hex.
    fn source_hash(&self) -> &str;

    fn page_count(&self) -> usize;

    /// Rasterise page `index` (zero-based) at roughly `dpi` dots per inch.
    fn render_page(&self, index: usize, dpi: u32) -> Result<DynamicImage>;
}

/// Open a scan file, choosing the source type from the extension.
pub fn open_source(path: impl AsRef<Path>) -> Result<Box<dyn PageSource>> {
    let path = path.as_ref();
    open_source_named(path, display_name(path))
}

/// Like [`open_source`], with the name its pages are reported under.
pub fn open_source_named(path: &Path, name: impl Into<String>) -> Result<Box<dyn PageSource>> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("pdf") => Ok(Box::new(PdfPageSource::open_named(path, name)?)),
        Some("png" | "jpg" | "jpeg" | "tif" | "tiff" | "bmp" | "webp") => {
            Ok(Box::new(ImageFileSource::open_named(path, name)?))
        }
        other => Err(MarkwerkError::Rasterization(format!(
            "unsupported scan file type {:?} for {}",
            other.unwrap_or(""),
            path.display()
        ))),
    }
}

/// Names for a set of inputs: the file name, or the whole path for inputs
/// whose file name is shared with another input.
pub fn source_names(paths: &[PathBuf]) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for path in paths {
        *counts.entry(display_name(path)).or_default() += 1;
    }
    paths
        .iter()
        .map(|path| {
            let name = display_name(path);
            if counts.get(&name).copied().unwrap_or(0) > 1 {
                path.display().to_string()
            } else {
                name
            }
        })
        .collect()
}

/// Display name for a path: its file name, or the whole path if it has none.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

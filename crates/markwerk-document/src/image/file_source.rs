// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Single scanned image (PNG, JPEG, TIFF...) exposed as a one-page source.

use std::path::Path;

use image::DynamicImage;
use markwerk_core::error::{MarkwerkError, Result};
use tracing::{debug, info, instrument};

use crate::integrity::hash_bytes;
use crate::source::{PageSource, display_name};

/// One image file = one page. The image is used at its native resolution;
/// the requested dpi is ignored because the file carries no physical size.
pub struct ImageFileSource {
    name: String,
    source_hash: String,
    image: DynamicImage,
}

impl ImageFileSource {
    /// Load a scan image from a file path.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        Self::open_named(path_ref, display_name(path_ref))
    }

    /// Load a scan image, reporting it under `name`.
    pub fn open_named(path: &Path, name: impl Into<String>) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(name, &data)
    }

    /// Decode a scan image from raw encoded bytes.
    #[instrument(skip_all, fields(data_len = data.len()))]
    pub fn from_bytes(name: impl Into<String>, data: &[u8]) -> Result<Self> {
        let name = name.into();
        let image = image::load_from_memory(data).map_err(|err| {
            MarkwerkError::ImageError(format!("failed to decode {}: {}", name, err))
        })?;
        info!(
            name = %name,
            width = image.width(),
            height = image.height(),
            "Scan image loaded"
        );
        Ok(Self {
            name,
            source_hash: hash_bytes(data),
            image,
        })
    }

    /// Wrap an already-decoded image; the hash covers its raw pixel buffer.
    pub fn from_dynamic(name: impl Into<String>, image: DynamicImage) -> Self {
        let source_hash = hash_bytes(image.as_bytes());
        Self {
            name: name.into(),
            source_hash,
            image,
        }
    }
}

impl PageSource for ImageFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_hash(&self) -> &str {
        &self.source_hash
    }

    fn page_count(&self) -> usize {
        1
    }

    fn render_page(&self, index: usize, _dpi: u32) -> Result<DynamicImage> {
        if index != 0 {
            return Err(MarkwerkError::Rasterization(format!(
                "page {} out of range ({} is a single image)",
                index + 1,
                self.name
            )));
        }
        debug!(source = %self.name, "Image page handed out");
        Ok(self.image.clone())
    }
}

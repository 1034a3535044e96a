// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF page source — pulls the scanned raster out of each page of a scanner
// PDF using the `lopdf` crate.
//
// Scanner PDFs carry one full-page image per page. The reader does not render
// vector content: it takes the largest image XObject reachable from the page
// resources, decodes it and resamples it to the requested resolution using the
// page MediaBox.

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, Stream};
use markwerk_core::error::{MarkwerkError, Result};
use tracing::{debug, info, instrument, warn};

use crate::integrity::hash_bytes;
use crate::source::{PageSource, display_name};

/// PostScript points per inch.
const POINTS_PER_INCH: f64 = 72.0;

/// Form XObjects nested deeper than this are not searched for images.
const MAX_FORM_DEPTH: usize = 3;

/// Scanned PDF exposed as a sequence of raster pages.
pub struct PdfPageSource {
    name: String,
    source_hash: String,
    pages: Vec<PdfPage>,
}

/// What the reader needs from one page, detached from the `lopdf` document.
struct PdfPage {
    /// MediaBox width and height in points.
    media_size: (f64, f64),
    /// Page `/Rotate`, normalised to 0, 90, 180 or 270.
    rotation: i64,
    /// The page image, or why none could be used.
    image: std::result::Result<EmbeddedImage, String>,
}

/// Undecoded image XObject.
struct EmbeddedImage {
    width: u32,
    height: u32,
    components: u8,
    bits_per_component: u8,
    filters: Vec<Vec<u8>>,
    stream: Stream,
}

impl PdfPageSource {
    // -- Construction ---------------------------------------------------------

    /// Open a scanned PDF from the filesystem.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        Self::open_named(path_ref, display_name(path_ref))
    }

    /// Open a scanned PDF, reporting its pages under `name`.
    pub fn open_named(path: &Path, name: impl Into<String>) -> Result<Self> {
        let data = std::fs::read(path).map_err(|err| {
            MarkwerkError::PdfError(format!("failed to read {}: {}", path.display(), err))
        })?;
        Self::from_bytes(name, &data)
    }

    /// Parse a scanned PDF already in memory.
    #[instrument(skip_all, fields(bytes_len = data.len()))]
    pub fn from_bytes(name: impl Into<String>, data: &[u8]) -> Result<Self> {
        let name = name.into();
        let document = Document::load_mem(data).map_err(|err| {
            MarkwerkError::PdfError(format!("failed to load PDF {}: {}", name, err))
        })?;

        let mut pages = Vec::new();
        for (page_number, page_id) in document.get_pages() {
            let page = document
                .get_object(page_id)
                .and_then(Object::as_dict)
                .map_err(|err| {
                    MarkwerkError::PdfError(format!(
                        "page {} of {} is unreadable: {}",
                        page_number, name, err
                    ))
                })?;
            pages.push(read_page(&document, page, page_number));
        }

        info!(name = %name, pages = pages.len(), "Scanned PDF opened");

        Ok(Self {
            name,
            source_hash: hash_bytes(data),
            pages,
        })
    }
}

impl PageSource for PdfPageSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_hash(&self) -> &str {
        &self.source_hash
    }

    fn page_count(&self) -> usize {
        self.pages.len()
    }

    #[instrument(skip(self), fields(source = %self.name))]
    fn render_page(&self, index: usize, dpi: u32) -> Result<DynamicImage> {
        let page = self.pages.get(index).ok_or_else(|| {
            MarkwerkError::Rasterization(format!(
                "page {} out of range ({} has {} pages)",
                index + 1,
                self.name,
                self.pages.len()
            ))
        })?;
        let embedded = page.image.as_ref().map_err(|reason| {
            MarkwerkError::Rasterization(format!("page {}: {}", index + 1, reason))
        })?;

        let decoded = embedded.decode()?;

        // Resample so the page width matches the MediaBox at the requested dpi.
        let target_width = (page.media_size.0 / POINTS_PER_INCH * f64::from(dpi)).round();
        let factor = target_width / f64::from(decoded.width());
        let resampled = if factor.is_finite() && factor > 0.0 && (factor - 1.0).abs() > 0.01 {
            let width = (f64::from(decoded.width()) * factor).round().max(1.0) as u32;
            let height = (f64::from(decoded.height()) * factor).round().max(1.0) as u32;
            decoded.resize_exact(width, height, FilterType::Triangle)
        } else {
            decoded
        };

        let rendered = match page.rotation {
            90 => resampled.rotate90(),
            180 => resampled.rotate180(),
            270 => resampled.rotate270(),
            _ => resampled,
        };

        debug!(
            page = index + 1,
            width = rendered.width(),
            height = rendered.height(),
            "Page rasterised"
        );
        Ok(rendered)
    }
}

impl EmbeddedImage {
    fn decode(&self) -> Result<DynamicImage> {
        match self.filters.as_slice() {
            [filter] if filter.as_slice() == b"DCTDecode" => {
                image::load_from_memory_with_format(&self.stream.content, ImageFormat::Jpeg)
                    .map_err(|err| {
                        MarkwerkError::Rasterization(format!("JPEG page image: {}", err))
                    })
            }
            [] => self.raw_to_image(&self.stream.content),
            [filter] if filter.as_slice() == b"FlateDecode" || filter.as_slice() == b"LZWDecode" => {
                let raw = self.stream.decompressed_content().map_err(|err| {
                    MarkwerkError::Rasterization(format!("failed to inflate page image: {}", err))
                })?;
                self.raw_to_image(&raw)
            }
            other => Err(MarkwerkError::Rasterization(format!(
                "unsupported image filter chain {:?}",
                other
                    .iter()
                    .map(|f| String::from_utf8_lossy(f).into_owned())
                    .collect::<Vec<_>>()
            ))),
        }
    }

    fn raw_to_image(&self, raw: &[u8]) -> Result<DynamicImage> {
        let (w, h) = (self.width as usize, self.height as usize);
        let too_short = |expected: usize| {
            MarkwerkError::Rasterization(format!(
                "page image data too short: {} bytes, expected {}",
                raw.len(),
                expected
            ))
        };

        match (self.components, self.bits_per_component) {
            (1, 8) => {
                let expected = w * h;
                let data = raw.get(..expected).ok_or_else(|| too_short(expected))?;
                GrayImage::from_raw(self.width, self.height, data.to_vec())
                    .map(DynamicImage::ImageLuma8)
                    .ok_or_else(|| too_short(expected))
            }
            (3, 8) => {
                let expected = w * h * 3;
                let data = raw.get(..expected).ok_or_else(|| too_short(expected))?;
                RgbImage::from_raw(self.width, self.height, data.to_vec())
                    .map(DynamicImage::ImageRgb8)
                    .ok_or_else(|| too_short(expected))
            }
            (4, 8) => {
                let expected = w * h * 4;
                let data = raw.get(..expected).ok_or_else(|| too_short(expected))?;
                let rgb: Vec<u8> = data.chunks_exact(4).flat_map(cmyk_to_rgb).collect();
                RgbImage::from_raw(self.width, self.height, rgb)
                    .map(DynamicImage::ImageRgb8)
                    .ok_or_else(|| too_short(expected))
            }
            (1, 1) => {
                // Bilevel scans: one bit per pixel, rows padded to whole bytes, 1 = white.
                let row_bytes = w.div_ceil(8);
                let expected = row_bytes * h;
                let data = raw.get(..expected).ok_or_else(|| too_short(expected))?;
                let mut gray = GrayImage::new(self.width, self.height);
                for (y, row) in data.chunks_exact(row_bytes).enumerate() {
                    for x in 0..w {
                        let bit = (row[x / 8] >> (7 - (x % 8))) & 1;
                        gray.put_pixel(x as u32, y as u32, image::Luma([bit * 255]));
                    }
                }
                Ok(DynamicImage::ImageLuma8(gray))
            }
            (components, bits) => Err(MarkwerkError::Rasterization(format!(
                "unsupported page image format: {components} components at {bits} bits"
            ))),
        }
    }
}

fn cmyk_to_rgb(px: &[u8]) -> [u8; 3] {
    let k = 255 - u16::from(px[3]);
    let channel = |c: u8| ((255 - u16::from(c)) * k / 255) as u8;
    [channel(px[0]), channel(px[1]), channel(px[2])]
}

// -- Page tree helpers --------------------------------------------------------

fn read_page(document: &Document, page: &Dictionary, page_number: u32) -> PdfPage {
    let media_size = inherited(document, page, b"MediaBox")
        .and_then(|obj| obj.as_array().ok())
        .and_then(|values| {
            let nums: Vec<f64> = values
                .iter()
                .filter_map(|v| resolve(document, v).and_then(as_number))
                .collect();
            match nums.as_slice() {
                [x0, y0, x1, y1] => Some(((x1 - x0).abs(), (y1 - y0).abs())),
                _ => None,
            }
        })
        .unwrap_or_else(|| {
            warn!(page_number, "Page has no usable MediaBox; assuming A4");
            (595.0, 842.0)
        });

    let rotation = inherited(document, page, b"Rotate")
        .and_then(as_number)
        .map(|deg| (deg as i64).rem_euclid(360))
        .unwrap_or(0);

    let image = largest_image(document, page).and_then(|stream| embedded_image(document, stream));
    if let Err(reason) = &image {
        warn!(page_number, reason = %reason, "No usable scan image on page");
    }

    PdfPage {
        media_size,
        rotation,
        image,
    }
}

/// Look up `key` on the page, walking up the `/Parent` chain for inheritable
/// attributes.
fn inherited<'a>(document: &'a Document, page: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    let mut current = page;
    for _ in 0..32 {
        if let Ok(value) = current.get(key) {
            return resolve(document, value);
        }
        current = current
            .get(b"Parent")
            .ok()
            .and_then(|parent| resolve(document, parent))
            .and_then(|parent| parent.as_dict().ok())?;
    }
    None
}

fn largest_image<'a>(
    document: &'a Document,
    page: &'a Dictionary,
) -> std::result::Result<&'a Stream, String> {
    let resources = inherited(document, page, b"Resources")
        .and_then(|obj| obj.as_dict().ok())
        .ok_or_else(|| "page has no resources (no embedded image)".to_string())?;

    let mut images = Vec::new();
    collect_images(document, resources, 0, &mut images);

    images
        .into_iter()
        .max_by_key(|stream| {
            let width = stream.dict.get(b"Width").ok().and_then(as_number).unwrap_or(0.0);
            let height = stream.dict.get(b"Height").ok().and_then(as_number).unwrap_or(0.0);
            (width * height) as u64
        })
        .ok_or_else(|| "page has no embedded image".to_string())
}

fn collect_images<'a>(
    document: &'a Document,
    resources: &'a Dictionary,
    depth: usize,
    out: &mut Vec<&'a Stream>,
) {
    let Some(xobjects) = resources
        .get(b"XObject")
        .ok()
        .and_then(|obj| resolve(document, obj))
        .and_then(|obj| obj.as_dict().ok())
    else {
        return;
    };

    for (_, value) in xobjects.iter() {
        let Some(stream) = resolve(document, value).and_then(|obj| obj.as_stream().ok()) else {
            continue;
        };
        match stream.dict.get(b"Subtype").ok().and_then(|s| s.as_name().ok()) {
            Some(b"Image") => out.push(stream),
            Some(b"Form") if depth < MAX_FORM_DEPTH => {
                if let Some(inner) = stream
                    .dict
                    .get(b"Resources")
                    .ok()
                    .and_then(|obj| resolve(document, obj))
                    .and_then(|obj| obj.as_dict().ok())
                {
                    collect_images(document, inner, depth + 1, out);
                }
            }
            _ => {}
        }
    }
}

fn embedded_image(document: &Document, stream: &Stream) -> std::result::Result<EmbeddedImage, String> {
    let dict = &stream.dict;
    let dimension = |key: &[u8]| {
        dict.get(key)
            .ok()
            .and_then(|obj| resolve(document, obj))
            .and_then(as_number)
            .filter(|v| *v >= 1.0)
            .map(|v| v as u32)
    };
    let width = dimension(b"Width").ok_or("image has no width")?;
    let height = dimension(b"Height").ok_or("image has no height")?;

    let image_mask = matches!(dict.get(b"ImageMask"), Ok(Object::Boolean(true)));
    let bits_per_component = if image_mask {
        1
    } else {
        dict.get(b"BitsPerComponent")
            .ok()
            .and_then(|obj| resolve(document, obj))
            .and_then(as_number)
            .map(|v| v as u8)
            .unwrap_or(8)
    };

    let filters = match dict.get(b"Filter").ok().and_then(|obj| resolve(document, obj)) {
        Some(Object::Name(name)) => vec![name.clone()],
        Some(Object::Array(names)) => names
            .iter()
            .filter_map(|n| n.as_name().ok().map(<[u8]>::to_vec))
            .collect(),
        _ => Vec::new(),
    };

    // JPEG data carries its own colour model.
    let is_jpeg = filters.iter().any(|f| f.as_slice() == b"DCTDecode");
    let components = if image_mask || is_jpeg {
        1
    } else {
        let space = dict
            .get(b"ColorSpace")
            .ok()
            .and_then(|obj| resolve(document, obj))
            .ok_or("image has no colour space")?;
        colour_components(document, space)?
    };

    Ok(EmbeddedImage {
        width,
        height,
        components,
        bits_per_component,
        filters,
        stream: stream.clone(),
    })
}

fn colour_components(document: &Document, space: &Object) -> std::result::Result<u8, String> {
    match space {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" | b"G" => Ok(1),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Ok(3),
            b"DeviceCMYK" | b"CMYK" => Ok(4),
            other => Err(format!(
                "unsupported colour space {}",
                String::from_utf8_lossy(other)
            )),
        },
        Object::Array(parts) => match parts.first().and_then(|p| p.as_name().ok()) {
            Some(b"ICCBased") => parts
                .get(1)
                .and_then(|profile| resolve(document, profile))
                .and_then(|profile| profile.as_stream().ok())
                .and_then(|profile| profile.dict.get(b"N").ok().and_then(as_number))
                .map(|n| n as u8)
                .ok_or_else(|| "ICC profile without component count".to_string()),
            Some(b"CalGray") => Ok(1),
            Some(b"CalRGB") => Ok(3),
            Some(other) => Err(format!(
                "unsupported colour space {}",
                String::from_utf8_lossy(other)
            )),
            None => Err("empty colour space array".into()),
        },
        _ => Err("malformed colour space".into()),
    }
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => document.get_object(*id).ok(),
        other => Some(other),
    }
}

fn as_number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(value) => Some(*value as f64),
        Object::Real(value) => Some(f64::from(*value)),
        _ => None,
    }
}

//! Native converter that pulls the scanned raster out of each PDF page.
//!
//! Scanned slips are usually one full-page image per page. JPEG streams are
//! forwarded untouched; uncompressed or Flate-compressed 8-bit RGB/Gray
//! rasters are re-encoded as PNG. Pages carrying only vector content (text
//! exports, born-digital forms) have no raster to extract; those are rendered
//! by the fallback converter when one is configured.

use super::{digest, FileDescriptor, ImageConverter, UploadedFile};
use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, GrayImage, ImageOutputFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, info};

/// Image pulled out of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRaster {
    pub mime_type: &'static str,
    pub data: Vec<u8>,
}

pub struct EmbeddedImageConverter {
    fallback: Option<Arc<dyn ImageConverter>>,
}

impl EmbeddedImageConverter {
    /// `fallback` renders whole PDFs when some page has no embedded scan.
    pub fn new(fallback: Option<Arc<dyn ImageConverter>>) -> Self {
        Self { fallback }
    }
}

#[async_trait::async_trait]
impl ImageConverter for EmbeddedImageConverter {
    fn name(&self) -> &str {
        "embedded"
    }

    async fn convert_pdf(&self, file: &UploadedFile) -> Result<Vec<FileDescriptor>> {
        let data = file.data.clone();
        let rasters = tokio::task::spawn_blocking(move || extract_page_rasters(&data))
            .await
            .context("PDF extraction task panicked")??;

        let missing: Vec<usize> = rasters
            .iter()
            .enumerate()
            .filter(|(_, raster)| raster.is_none())
            .map(|(i, _)| i + 1)
            .collect();

        if missing.is_empty() {
            return Ok(rasters
                .into_iter()
                .flatten()
                .enumerate()
                .map(|(i, raster)| page_descriptor(&file.name, i + 1, raster.mime_type, raster.data))
                .collect());
        }

        let Some(fallback) = &self.fallback else {
            anyhow::bail!(
                "Page {} of file {} has no embedded scan image and no fallback converter is configured",
                missing[0],
                digest(&file.data)
            );
        };

        info!(
            "EmbeddedImageConverter: {} of {} page(s) have no scan image; rendering via {}",
            missing.len(),
            rasters.len(),
            fallback.name()
        );

        let rendered = fallback.convert_pdf(file).await?;
        if rendered.len() != rasters.len() {
            anyhow::bail!(
                "{} converter returned {} page(s) for a {}-page PDF",
                fallback.name(),
                rendered.len(),
                rasters.len()
            );
        }

        Ok(rasters
            .into_iter()
            .zip(rendered)
            .enumerate()
            .map(|(i, (raster, page))| match raster {
                Some(raster) => page_descriptor(&file.name, i + 1, raster.mime_type, raster.data),
                None => page_descriptor(&file.name, i + 1, &page.mime_type, page.image_data),
            })
            .collect())
    }
}

fn page_descriptor(name: &str, page_num: usize, mime_type: &str, image_data: Vec<u8>) -> FileDescriptor {
    FileDescriptor {
        name: format!("{} (Page {})", name, page_num),
        mime_type: mime_type.to_string(),
        image_data,
    }
}

/// Extract the scan image of every page, in page order. `None` marks a page
/// without a usable raster.
pub fn extract_page_rasters(data: &[u8]) -> Result<Vec<Option<PageRaster>>> {
    let doc = Document::load_mem(data).map_err(|e| anyhow!("Failed to load PDF: {}", e))?;

    let pages = doc.get_pages();
    if pages.is_empty() {
        anyhow::bail!("PDF {} has no pages", digest(data));
    }

    info!("EmbeddedImageConverter: {} page(s)", pages.len());

    let mut rasters = Vec::with_capacity(pages.len());
    for (page_num, page_id) in pages {
        let raster = page_raster(&doc, page_id)?.map(|(mime_type, data)| PageRaster { mime_type, data });
        match &raster {
            Some(r) => debug!("Page {}: {} ({} bytes)", page_num, r.mime_type, r.data.len()),
            None => debug!("Page {}: no embedded raster", page_num),
        }
        rasters.push(raster);
    }

    Ok(rasters)
}

/// Pick the largest usable raster on the page.
fn page_raster(doc: &Document, page_id: ObjectId) -> Result<Option<(&'static str, Vec<u8>)>> {
    let (resources, resource_ids) = doc.get_page_resources(page_id);

    let mut dicts: Vec<&Dictionary> = resources.into_iter().collect();
    dicts.extend(resource_ids.into_iter().filter_map(|id| doc.get_dictionary(id).ok()));

    let mut best: Option<(i64, &Stream)> = None;
    for res in dicts {
        let Ok(xobjects) = res.get(b"XObject").map(|o| resolve(doc, o)).and_then(Object::as_dict) else {
            continue;
        };

        for (_, value) in xobjects.iter() {
            let Ok(stream) = resolve(doc, value).as_stream() else {
                continue;
            };
            if !is_image(&stream.dict) {
                continue;
            }
            let area = int(&stream.dict, b"Width").saturating_mul(int(&stream.dict, b"Height"));
            if best.map_or(true, |(a, _)| area > a) {
                best = Some((area, stream));
            }
        }
    }

    match best {
        Some((_, stream)) => encode_raster(stream),
        None => Ok(None),
    }
}

fn encode_raster(stream: &Stream) -> Result<Option<(&'static str, Vec<u8>)>> {
    let filters = filters(&stream.dict);

    match filters.as_slice() {
        [f] if f.as_slice() == b"DCTDecode" => Ok(Some(("image/jpeg", stream.content.clone()))),
        [] => raw_to_png(&stream.dict, &stream.content),
        [f] if f.as_slice() == b"FlateDecode" => {
            let raw = stream
                .decompressed_content()
                .map_err(|e| anyhow!("Failed to inflate page image: {}", e))?;
            raw_to_png(&stream.dict, &raw)
        }
        other => {
            debug!(
                "Skipping image with unsupported filters: {:?}",
                other.iter().map(|f| String::from_utf8_lossy(f)).collect::<Vec<_>>()
            );
            Ok(None)
        }
    }
}

fn raw_to_png(dict: &Dictionary, raw: &[u8]) -> Result<Option<(&'static str, Vec<u8>)>> {
    if int(dict, b"BitsPerComponent") != 8 {
        return Ok(None);
    }

    let width = u32::try_from(int(dict, b"Width")).context("Invalid image width")?;
    let height = u32::try_from(int(dict, b"Height")).context("Invalid image height")?;
    let color_space = dict.get(b"ColorSpace").and_then(Object::as_name).unwrap_or_default();

    let image = match color_space {
        b"DeviceRGB" => RgbImage::from_raw(width, height, raw.to_vec()).map(DynamicImage::ImageRgb8),
        b"DeviceGray" => GrayImage::from_raw(width, height, raw.to_vec()).map(DynamicImage::ImageLuma8),
        _ => return Ok(None),
    };

    let Some(image) = image else {
        anyhow::bail!("Image data does not match its declared {}x{} size", width, height);
    };

    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageOutputFormat::Png)
        .context("Failed to encode page image as PNG")?;

    Ok(Some(("image/png", png)))
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj.as_reference() {
        Ok(id) => doc.get_object(id).unwrap_or(obj),
        Err(_) => obj,
    }
}

fn is_image(dict: &Dictionary) -> bool {
    matches!(dict.get(b"Subtype").and_then(Object::as_name), Ok(b"Image"))
}

fn int(dict: &Dictionary, key: &[u8]) -> i64 {
    dict.get(key).and_then(Object::as_i64).unwrap_or(0)
}

fn filters(dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|o| o.as_name().ok().map(<[u8]>::to_vec))
            .collect(),
        _ => Vec::new(),
    }
}

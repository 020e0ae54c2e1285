use image::{DynamicImage, ImageOutputFormat, RgbaImage};
use image::imageops::FilterType;
use serde::{Serialize, Deserialize};
use std::io::Cursor;
use base64::{Engine as _, engine::general_purpose};
use crate::error::{EngineError, EngineResult};

pub const DEFAULT_DPI: f64 = 96.0;
pub const PROXY_MAX_SIDE: u32 = 2048;
pub const LOW_RES_PROXY_MAX_SIDE: u32 = 1000;

/// Result of decoding a user-supplied file.
#[derive(Clone, Debug)]
pub struct DecodedImage {
    pub dpi: f64,
    pub original_width: u32,
    pub original_height: u32,
    pub image: RgbaImage,
    pub proxy: Option<RgbaImage>,
    pub low_res_proxy: Option<RgbaImage>,
}

/// Decodes PNG or JPEG bytes into a full-resolution surface plus preview
/// proxies.
pub fn decode_image(bytes: &[u8]) -> EngineResult<DecodedImage> {
    let image = image::load_from_memory(bytes)?.to_rgba8();
    if image.width() == 0 || image.height() == 0 {
        return Err(EngineError::EmptyImage);
    }
    let dpi = read_dpi(bytes).unwrap_or(DEFAULT_DPI);
    let (proxy, low_res_proxy) = build_proxies(&image);
    log::debug!("decoded {}x{} image at {} dpi", image.width(), image.height(), dpi);
    Ok(DecodedImage {
        dpi,
        original_width: image.width(),
        original_height: image.height(),
        image,
        proxy,
        low_res_proxy,
    })
}

/// Physical density from a PNG `pHYs` chunk or a JPEG JFIF header.
pub fn read_dpi(bytes: &[u8]) -> Option<f64> {
    const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    if bytes.starts_with(&PNG_SIGNATURE) {
        return png_dpi(&bytes[8..]);
    }
    if bytes.starts_with(&[0xFF, 0xD8]) {
        return jfif_dpi(&bytes[2..]);
    }
    None
}

fn png_dpi(mut chunks: &[u8]) -> Option<f64> {
    while chunks.len() >= 12 {
        let len = u32::from_be_bytes([chunks[0], chunks[1], chunks[2], chunks[3]]) as usize;
        let kind = &chunks[4..8];
        let data_end = len.checked_add(8)?;
        let data = chunks.get(8..data_end)?;
        match kind {
            b"pHYs" if len >= 9 => {
                let ppu = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                // Unit 1 is pixels per meter; unit 0 only gives an aspect ratio.
                if data[8] == 1 && ppu > 0 {
                    return Some((ppu as f64 * 0.0254).round());
                }
                return None;
            }
            b"IDAT" | b"IEND" => return None,
            _ => {}
        }
        chunks = chunks.get(data_end.checked_add(4)?..)?;
    }
    None
}

fn jfif_dpi(segments: &[u8]) -> Option<f64> {
    // APP0 must be the first segment.
    if segments.len() < 16 || segments[0] != 0xFF || segments[1] != 0xE0 || &segments[4..9] != b"JFIF\0" {
        return None;
    }
    let units = segments[11];
    let density = u16::from_be_bytes([segments[12], segments[13]]) as f64;
    match units {
        1 if density > 0.0 => Some(density),
        2 if density > 0.0 => Some((density * 2.54).round()),
        _ => None,
    }
}

fn downscale(image: &RgbaImage, max_side: u32) -> Option<RgbaImage> {
    let (w, h) = image.dimensions();
    let longest = w.max(h);
    if longest <= max_side {
        return None;
    }
    let ratio = max_side as f64 / longest as f64;
    let nw = ((w as f64 * ratio).round() as u32).max(1);
    let nh = ((h as f64 * ratio).round() as u32).max(1);
    Some(image::imageops::resize(image, nw, nh, FilterType::Triangle))
}

/// Preview (longest side 2048) and low-res (longest side 1000) proxies,
/// absent when the image already fits.
pub fn build_proxies(image: &RgbaImage) -> (Option<RgbaImage>, Option<RgbaImage>) {
    (downscale(image, PROXY_MAX_SIDE), downscale(image, LOW_RES_PROXY_MAX_SIDE))
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum ExportFormat {
    Png,
    Jpeg {
        #[serde(default = "default_jpeg_quality")]
        quality: u8,
    },
}

fn default_jpeg_quality() -> u8 {
    95
}

impl ExportFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Png => "image/png",
            ExportFormat::Jpeg { .. } => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg { .. } => "jpeg",
        }
    }
}

pub fn encode(image: &RgbaImage, format: ExportFormat) -> EngineResult<Vec<u8>> {
    let mut bytes: Vec<u8> = Vec::new();
    let result = match format {
        ExportFormat::Png => DynamicImage::ImageRgba8(image.clone())
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png),
        ExportFormat::Jpeg { quality } => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(image.clone()).to_rgb8())
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Jpeg(quality.clamp(1, 100))),
    };
    result.map_err(EngineError::Encode)?;
    Ok(bytes)
}

pub fn bytes_data_url(bytes: &[u8], format: ExportFormat) -> String {
    format!("data:{};base64,{}", format.mime_type(), general_purpose::STANDARD.encode(bytes))
}

pub fn data_url(image: &RgbaImage, format: ExportFormat) -> EngineResult<String> {
    Ok(bytes_data_url(&encode(image, format)?, format))
}

pub fn png_data_url(image: &RgbaImage) -> EngineResult<String> {
    data_url(image, ExportFormat::Png)
}

/// Payload bytes of a base64 `data:` URL.
pub fn decode_data_url(url: &str) -> EngineResult<Vec<u8>> {
    let (header, payload) = url.split_once(',').ok_or(EngineError::InvalidDataUrl)?;
    if !header.starts_with("data:") || !header.ends_with(";base64") {
        return Err(EngineError::InvalidDataUrl);
    }
    general_purpose::STANDARD.decode(payload.trim()).map_err(|_| EngineError::InvalidDataUrl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn png_with_phys(ppm: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255]));
        let png = encode(&img, ExportFormat::Png).unwrap();
        // Splice a pHYs chunk right after IHDR (8 signature + 25 IHDR bytes).
        let mut data = ppm.to_be_bytes().to_vec();
        data.extend_from_slice(&ppm.to_be_bytes());
        data.push(1);
        let mut chunk = (data.len() as u32).to_be_bytes().to_vec();
        chunk.extend_from_slice(b"pHYs");
        chunk.extend_from_slice(&data);
        chunk.extend_from_slice(&[0, 0, 0, 0]);
        let mut out = png[..33].to_vec();
        out.extend_from_slice(&chunk);
        out.extend_from_slice(&png[33..]);
        out
    }

    #[test]
    fn png_phys_density() {
        assert_eq!(read_dpi(&png_with_phys(11811)), Some(300.0));
    }

    #[test]
    fn png_oversized_chunk_length() {
        let mut chunks = u32::MAX.to_be_bytes().to_vec();
        chunks.extend_from_slice(b"tEXt");
        chunks.extend_from_slice(&[0; 8]);
        assert_eq!(png_dpi(&chunks), None);
    }

    #[test]
    fn png_without_phys_defaults() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        let decoded = decode_image(&encode(&img, ExportFormat::Png).unwrap()).unwrap();
        assert_eq!(decoded.dpi, DEFAULT_DPI);
        assert_eq!((decoded.original_width, decoded.original_height), (4, 4));
        assert!(decoded.proxy.is_none() && decoded.low_res_proxy.is_none());
    }

    #[test]
    fn jfif_density() {
        let mut header = vec![0xFF, 0xE0, 0x00, 0x10];
        header.extend_from_slice(b"JFIF\0");
        header.extend_from_slice(&[1, 1, 1, 0x00, 0x48, 0x00, 0x48, 0, 0]);
        assert_eq!(jfif_dpi(&header), Some(72.0));
        header[11] = 2;
        header[12] = 0;
        header[13] = 118;
        assert_eq!(jfif_dpi(&header), Some(300.0));
    }

    #[test]
    fn proxies_respect_longest_side() {
        let img = RgbaImage::new(3000, 1500);
        let (proxy, low) = build_proxies(&img);
        assert_eq!(proxy.unwrap().dimensions(), (2048, 1024));
        assert_eq!(low.unwrap().dimensions(), (1000, 500));
        let (proxy, low) = build_proxies(&RgbaImage::new(1500, 200));
        assert!(proxy.is_none());
        assert_eq!(low.unwrap().dimensions(), (1000, 133));
    }

    #[test]
    fn data_url_round_trip() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 40]));
        let url = png_data_url(&img).unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        let decoded = decode_image(&decode_data_url(&url).unwrap()).unwrap();
        assert_eq!(decoded.image, img);
        assert!(decode_data_url("not a url").is_err());
    }

    #[test]
    fn jpeg_encodes_without_alpha() {
        let img = RgbaImage::from_pixel(8, 8, Rgba([200, 10, 10, 255]));
        let bytes = encode(&img, ExportFormat::Jpeg { quality: 90 }).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(decode_image(&bytes).unwrap().original_width, 8);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(matches!(decode_image(b"definitely not an image"), Err(EngineError::Decode(_))));
    }
}

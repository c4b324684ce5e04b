use image::codecs::png::PngEncoder;
use image::{DynamicImage, GrayImage, ImageEncoder, RgbImage};

use crate::container::RawImage;
use crate::error::AvatarError;

/// Colour model of raw image samples.
#[derive(Debug, Clone, PartialEq)]
pub enum ColorModel {
    /// One sample per pixel.
    Gray,
    /// Three samples per pixel.
    Rgb,
    /// Four samples per pixel, subtractive.
    Cmyk,
    /// One palette index per pixel; `palette` holds `components` bytes per entry
    /// (1 = gray, 3 = RGB, 4 = CMYK).
    Indexed {
        /// Bytes per palette entry.
        components: u8,
        /// Packed palette entries.
        palette: Vec<u8>,
    },
    /// Anything else (Lab, DeviceN, unknown filters). Decoded through the
    /// generic codec, if at all.
    Unsupported(String),
}

impl ColorModel {
    fn samples_per_pixel(&self) -> usize {
        match self {
            ColorModel::Gray | ColorModel::Indexed { .. } => 1,
            ColorModel::Rgb => 3,
            ColorModel::Cmyk => 4,
            ColorModel::Unsupported(_) => 0,
        }
    }
}

/// Geometry and encoding of raw (unfiltered) image samples.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleLayout {
    /// Pixels per row.
    pub width: u32,
    /// Number of rows.
    pub height: u32,
    /// Bits per sample: 1, 2, 4, 8 or 16.
    pub bits_per_component: u8,
    /// How samples map to colour.
    pub color: ColorModel,
}

/// Result of decoding one embedded image.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// Grayscale pixels for face detection.
    pub gray: GrayImage,
    /// PNG re-encoding of raw samples, so they can be handed out as a file.
    /// `None` when the input already was an image file.
    pub reencoded_png: Option<Vec<u8>>,
}

impl DecodedImage {
    /// Width of the decoded image.
    pub fn width(&self) -> u32 {
        self.gray.width()
    }

    /// Height of the decoded image.
    pub fn height(&self) -> u32 {
        self.gray.height()
    }
}

/// Decode an embedded image into a grayscale buffer.
///
/// Raw samples with a supported layout are unpacked directly. Everything else
/// goes through the generic `image` codec.
pub fn decode(raw: &RawImage) -> Result<DecodedImage, AvatarError> {
    match &raw.layout {
        Some(layout) if !matches!(layout.color, ColorModel::Unsupported(_)) => {
            let image = decode_samples(&raw.data, layout)?;
            let reencoded_png = encode_png(&image)?;
            Ok(DecodedImage {
                gray: image::imageops::grayscale(&image),
                reencoded_png: Some(reencoded_png),
            })
        }
        _ => {
            let image = decode_file(&raw.data)?;
            Ok(DecodedImage {
                gray: image::imageops::grayscale(&image),
                reencoded_png: None,
            })
        }
    }
}

/// Decode a standalone image file (JPEG, PNG, GIF, BMP, TIFF, WebP).
pub(crate) fn decode_file(data: &[u8]) -> Result<DynamicImage, AvatarError> {
    let image = image::load_from_memory(data).map_err(|e| AvatarError::decode("image file", e))?;
    if image.width() == 0 || image.height() == 0 {
        return Err(AvatarError::DecodeError("image dimensions are zero".to_string()));
    }
    Ok(image)
}

/// Build an image from raw samples according to `layout`.
pub(crate) fn decode_samples(data: &[u8], layout: &SampleLayout) -> Result<DynamicImage, AvatarError> {
    let (width, height) = (layout.width, layout.height);
    if width == 0 || height == 0 {
        return Err(AvatarError::DecodeError("image dimensions are zero".to_string()));
    }
    let indexed = matches!(layout.color, ColorModel::Indexed { .. });
    let samples = unpack_samples(data, layout, !indexed)?;

    match &layout.color {
        ColorModel::Gray => GrayImage::from_raw(width, height, samples)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(|| AvatarError::DecodeError("gray buffer size mismatch".to_string())),
        ColorModel::Rgb => RgbImage::from_raw(width, height, samples)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| AvatarError::DecodeError("RGB buffer size mismatch".to_string())),
        ColorModel::Cmyk => {
            let rgb = samples.chunks_exact(4).flat_map(cmyk_to_rgb).collect();
            RgbImage::from_raw(width, height, rgb)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| AvatarError::DecodeError("CMYK buffer size mismatch".to_string()))
        }
        ColorModel::Indexed {
            components,
            palette,
        } => {
            let components = *components as usize;
            if !matches!(components, 1 | 3 | 4) || palette.len() < components {
                return Err(AvatarError::DecodeError(format!(
                    "invalid palette: {} bytes, {components} per entry",
                    palette.len()
                )));
            }
            let entries = palette.len() / components;
            let mut rgb = Vec::with_capacity(samples.len() * 3);
            for index in samples {
                // Out-of-range indices clamp to the last entry.
                let entry = (index as usize).min(entries - 1) * components;
                let color = &palette[entry..entry + components];
                match components {
                    1 => rgb.extend_from_slice(&[color[0]; 3]),
                    3 => rgb.extend_from_slice(color),
                    _ => rgb.extend_from_slice(&cmyk_to_rgb(color)),
                }
            }
            RgbImage::from_raw(width, height, rgb)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| AvatarError::DecodeError("indexed buffer size mismatch".to_string()))
        }
        ColorModel::Unsupported(name) => Err(AvatarError::DecodeError(format!(
            "unsupported colour space {name}"
        ))),
    }
}

/// Unpack row-padded samples into one byte per sample.
///
/// 8-bit samples are copied row by row, 16-bit samples keep their high byte,
/// and 1/2/4-bit samples are unpacked from each byte. With `scale` set,
/// sub-byte samples are stretched to 0..=255; palette indices are not.
fn unpack_samples(data: &[u8], layout: &SampleLayout, scale: bool) -> Result<Vec<u8>, AvatarError> {
    let per_row = layout.width as usize * layout.color.samples_per_pixel();
    let bpc = layout.bits_per_component as usize;
    if per_row == 0 || !matches!(bpc, 1 | 2 | 4 | 8 | 16) {
        return Err(AvatarError::DecodeError(format!(
            "unsupported sample layout: {bpc} bits, {:?}",
            layout.color
        )));
    }

    let rows = layout.height as usize;
    let (stride, needed) = per_row
        .checked_mul(bpc)
        .map(|bits| bits.div_ceil(8))
        .and_then(|stride| Some((stride, stride.checked_mul(rows)?)))
        .ok_or_else(|| AvatarError::DecodeError("sample layout size overflows".to_string()))?;
    if data.len() < needed {
        return Err(AvatarError::DecodeError(format!(
            "sample data holds {} bytes, expected {needed}",
            data.len()
        )));
    }

    let mut samples = Vec::with_capacity(per_row * rows);
    for row in data.chunks_exact(stride).take(rows) {
        match bpc {
            8 => samples.extend_from_slice(&row[..per_row]),
            16 => samples.extend(row.chunks_exact(2).take(per_row).map(|pair| pair[0])),
            _ => {
                let max = (1u16 << bpc) - 1;
                let per_byte = 8 / bpc;
                for i in 0..per_row {
                    let byte = row[i / per_byte];
                    let shift = 8 - bpc * (i % per_byte + 1);
                    let value = (byte >> shift) as u16 & max;
                    samples.push(if scale { (value * 255 / max) as u8 } else { value as u8 });
                }
            }
        }
    }
    Ok(samples)
}

fn cmyk_to_rgb(cmyk: &[u8]) -> [u8; 3] {
    let k = 255 - cmyk[3] as u16;
    let channel = |c: u8| ((255 - c as u16) * k / 255) as u8;
    [channel(cmyk[0]), channel(cmyk[1]), channel(cmyk[2])]
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, AvatarError> {
    let rgb = image.to_rgb8();
    let mut buffer = Vec::new();
    PngEncoder::new(&mut buffer)
        .write_image(rgb.as_raw(), rgb.width(), rgb.height(), image::ExtendedColorType::Rgb8)
        .map_err(|e| AvatarError::decode("png re-encode", e))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_png(width: u32, height: u32) -> Vec<u8> {
        let mut img = RgbImage::new(width, height);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = image::Rgb([
                (x * 255 / width.max(1)) as u8,
                (y * 255 / height.max(1)) as u8,
                128,
            ]);
        }
        let mut buffer = Vec::new();
        PngEncoder::new(&mut buffer)
            .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
            .unwrap();
        buffer
    }

    fn raw(data: Vec<u8>, layout: SampleLayout) -> RawImage {
        RawImage {
            declared_width: layout.width,
            declared_height: layout.height,
            layout: Some(layout),
            ..RawImage::encoded(data, "raw")
        }
    }

    #[test]
    fn decodes_png_file() {
        let decoded = decode(&RawImage::encoded(make_test_png(120, 90), "png")).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (120, 90));
        assert!(decoded.reencoded_png.is_none());
    }

    #[test]
    fn garbage_file_is_decode_error() {
        let result = decode(&RawImage::encoded(vec![0xFF, 0xD8, 0xFF, 0x00, 0x01], "jpg"));
        assert!(matches!(result, Err(AvatarError::DecodeError(_))));
    }

    #[test]
    fn byte_samples_rgb() {
        let layout = SampleLayout {
            width: 2,
            height: 1,
            bits_per_component: 8,
            color: ColorModel::Rgb,
        };
        let decoded = decode(&raw(vec![255, 255, 255, 0, 0, 0], layout)).unwrap();
        assert_eq!(decoded.gray.get_pixel(0, 0).0[0], 255);
        assert_eq!(decoded.gray.get_pixel(1, 0).0[0], 0);
        let png = decoded.reencoded_png.unwrap();
        assert_eq!(image::guess_format(&png).unwrap(), image::ImageFormat::Png);
    }

    #[test]
    fn packed_one_bit_gray_with_row_padding() {
        // 3 pixels per row, 1 bpc: each row padded to a full byte.
        let layout = SampleLayout {
            width: 3,
            height: 2,
            bits_per_component: 1,
            color: ColorModel::Gray,
        };
        let image = decode_samples(&[0b1010_0000, 0b0100_0000], &layout).unwrap();
        let gray = image.to_luma8();
        assert_eq!(gray.as_raw(), &vec![255, 0, 255, 0, 255, 0]);
    }

    #[test]
    fn four_bit_gray_scales_to_full_range() {
        let layout = SampleLayout {
            width: 2,
            height: 1,
            bits_per_component: 4,
            color: ColorModel::Gray,
        };
        let image = decode_samples(&[0xF0], &layout).unwrap();
        assert_eq!(image.to_luma8().as_raw(), &vec![255, 0]);
    }

    #[test]
    fn indexed_palette_lookup() {
        let layout = SampleLayout {
            width: 3,
            height: 1,
            bits_per_component: 8,
            color: ColorModel::Indexed {
                components: 3,
                palette: vec![255, 0, 0, 0, 0, 255],
            },
        };
        // Index 7 is out of range and clamps to the last entry.
        let image = decode_samples(&[0, 1, 7], &layout).unwrap().to_rgb8();
        assert_eq!(image.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(image.get_pixel(1, 0).0, [0, 0, 255]);
        assert_eq!(image.get_pixel(2, 0).0, [0, 0, 255]);
    }

    #[test]
    fn cmyk_converts_to_rgb() {
        assert_eq!(cmyk_to_rgb(&[0, 0, 0, 0]), [255, 255, 255]);
        assert_eq!(cmyk_to_rgb(&[0, 0, 0, 255]), [0, 0, 0]);
        assert_eq!(cmyk_to_rgb(&[255, 0, 0, 0]), [0, 255, 255]);
    }

    #[test]
    fn sixteen_bit_keeps_high_byte() {
        let layout = SampleLayout {
            width: 2,
            height: 1,
            bits_per_component: 16,
            color: ColorModel::Gray,
        };
        let image = decode_samples(&[0xAB, 0xCD, 0x12, 0x34], &layout).unwrap();
        assert_eq!(image.to_luma8().as_raw(), &vec![0xAB, 0x12]);
    }

    #[test]
    fn short_sample_data_is_decode_error() {
        let layout = SampleLayout {
            width: 10,
            height: 10,
            bits_per_component: 8,
            color: ColorModel::Gray,
        };
        let result = decode(&raw(vec![0; 50], layout));
        assert!(matches!(result, Err(AvatarError::DecodeError(_))));
    }

    #[test]
    fn unsupported_layout_falls_back_to_codec() {
        let layout = SampleLayout {
            width: 40,
            height: 30,
            bits_per_component: 8,
            color: ColorModel::Unsupported("Lab".to_string()),
        };
        let decoded = decode(&raw(make_test_png(40, 30), layout)).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }
}

use std::io::Read;

use flate2::read::ZlibDecoder;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, warn};

use super::RawImage;
use crate::decode::{ColorModel, SampleLayout};
use crate::error::AvatarError;

/// Guard against cyclic `Parent` chains.
const MAX_INHERITANCE_DEPTH: usize = 32;

/// Upper bounds for `DecodeParms` of a predicted stream.
const MAX_PREDICTOR_COLORS: usize = 32;
const MAX_PREDICTOR_COLUMNS: usize = 1 << 20;

/// A parsed PDF document.
pub struct PdfSource {
    doc: Document,
}

/// Payload of an image stream once its filters have been applied.
enum StreamPayload {
    /// A complete image file (JPEG, JPEG 2000).
    File { data: Vec<u8>, format: &'static str },
    /// Raw samples, described by the image dictionary.
    Samples(Vec<u8>),
    /// Encoded with a filter we do not undo; kept as-is.
    Opaque { data: Vec<u8>, format: String },
}

impl PdfSource {
    pub(crate) fn open(bytes: &[u8]) -> Result<Self, AvatarError> {
        let doc = Document::load_mem(bytes).map_err(|e| AvatarError::format("pdf", e))?;
        Ok(Self { doc })
    }

    /// Images of every page, page order first, then resource order.
    pub(crate) fn enumerate_images(&self) -> Vec<RawImage> {
        let mut images = Vec::new();
        for (page_number, page_id) in self.doc.get_pages() {
            let page_height = self.page_height(page_id);
            let found_before = images.len();
            for (name, stream) in self.page_image_streams(page_id) {
                match self.raw_image(stream) {
                    Ok(mut raw) => {
                        raw.page = Some(page_number);
                        raw.page_height = page_height;
                        images.push(raw);
                    }
                    Err(err) => {
                        warn!(page = page_number, xobject = %name, error = %err, "skipping malformed image");
                    }
                }
            }
            debug!(
                page = page_number,
                page_height,
                images = images.len() - found_before,
                "scanned page"
            );
        }
        images
    }

    fn resolve<'a>(&'a self, obj: &'a Object) -> Option<&'a Object> {
        match obj {
            Object::Reference(id) => self.doc.get_object(*id).ok(),
            other => Some(other),
        }
    }

    /// Look up an inheritable page attribute, walking `Parent` links.
    fn inherited(&self, page_id: ObjectId, key: &[u8]) -> Option<&Object> {
        let mut dict = self.doc.get_dictionary(page_id).ok()?;
        for _ in 0..MAX_INHERITANCE_DEPTH {
            if let Ok(value) = dict.get(key) {
                return self.resolve(value);
            }
            let parent = dict.get(b"Parent").ok()?.as_reference().ok()?;
            dict = self.doc.get_dictionary(parent).ok()?;
        }
        None
    }

    fn page_height(&self, page_id: ObjectId) -> f32 {
        let Some(Object::Array(media_box)) = self.inherited(page_id, b"MediaBox") else {
            return 0.0;
        };
        let coords: Vec<f32> = media_box
            .iter()
            .filter_map(|o| self.resolve(o).and_then(number))
            .collect();
        match coords.as_slice() {
            [_, lly, _, ury] => (ury - lly).abs(),
            _ => 0.0,
        }
    }

    /// Image XObjects named in the page's resource dictionary.
    fn page_image_streams(&self, page_id: ObjectId) -> Vec<(String, &Stream)> {
        let Some(Object::Dictionary(resources)) = self.inherited(page_id, b"Resources") else {
            return Vec::new();
        };
        let Some(Object::Dictionary(xobjects)) =
            resources.get(b"XObject").ok().and_then(|o| self.resolve(o))
        else {
            return Vec::new();
        };

        let mut streams = Vec::new();
        for (name, obj) in xobjects.iter() {
            let name = String::from_utf8_lossy(name).into_owned();
            match self.resolve(obj) {
                Some(Object::Stream(stream)) => {
                    if name_of(&stream.dict, b"Subtype") == Some(b"Image".as_slice()) {
                        streams.push((name, stream));
                    }
                }
                _ => warn!(xobject = %name, "unresolvable XObject reference"),
            }
        }
        streams
    }

    fn raw_image(&self, stream: &Stream) -> Result<RawImage, AvatarError> {
        let dict = &stream.dict;
        let width = self.dict_u32(dict, b"Width");
        let height = self.dict_u32(dict, b"Height");
        let image_mask = dict
            .get(b"ImageMask")
            .ok()
            .and_then(|o| o.as_bool().ok())
            .unwrap_or(false);

        let mut raw = match self.apply_filters(stream)? {
            StreamPayload::File { data, format } => RawImage::encoded(data, format),
            StreamPayload::Samples(data) => {
                let (bits_per_component, color) = if image_mask {
                    (1, ColorModel::Gray)
                } else {
                    let bpc = self.dict_u32(dict, b"BitsPerComponent");
                    let color = dict
                        .get(b"ColorSpace")
                        .map(|cs| self.color_model(cs, 0))
                        .unwrap_or_else(|_| ColorModel::Unsupported("missing".to_string()));
                    (if bpc == 0 { 8 } else { u8::try_from(bpc).unwrap_or(0) }, color)
                };
                RawImage {
                    layout: Some(SampleLayout {
                        width,
                        height,
                        bits_per_component,
                        color,
                    }),
                    ..RawImage::encoded(data, "raw")
                }
            }
            StreamPayload::Opaque { data, format } => RawImage {
                layout: Some(SampleLayout {
                    width,
                    height,
                    bits_per_component: 1,
                    color: ColorModel::Unsupported(format.clone()),
                }),
                ..RawImage::encoded(data, format)
            },
        };
        raw.declared_width = width;
        raw.declared_height = height;
        Ok(raw)
    }

    fn dict_u32(&self, dict: &Dictionary, key: &[u8]) -> u32 {
        dict.get(key)
            .ok()
            .and_then(|o| self.resolve(o))
            .and_then(|o| o.as_i64().ok())
            .map_or(0, |v| v.clamp(0, u32::MAX as i64) as u32)
    }

    /// Undo stream filters up to the first one that yields an image file.
    fn apply_filters(&self, stream: &Stream) -> Result<StreamPayload, AvatarError> {
        let filters = self.names_of(stream.dict.get(b"Filter").ok());
        let params: Vec<Option<&Dictionary>> = match stream
            .dict
            .get(b"DecodeParms")
            .ok()
            .and_then(|o| self.resolve(o))
        {
            Some(Object::Array(items)) => items
                .iter()
                .map(|o| self.resolve(o).and_then(|o| o.as_dict().ok()))
                .collect(),
            Some(Object::Dictionary(dict)) => vec![Some(dict)],
            _ => Vec::new(),
        };

        let mut data = stream.content.clone();
        for (i, filter) in filters.iter().enumerate() {
            match filter.as_slice() {
                b"FlateDecode" | b"Fl" => {
                    data = inflate(&data)?;
                    if let Some(parms) = params.get(i).copied().flatten() {
                        data = self.unpredict(data, parms)?;
                    }
                }
                b"DCTDecode" | b"DCT" => return Ok(StreamPayload::File { data, format: "jpg" }),
                b"JPXDecode" => return Ok(StreamPayload::File { data, format: "jp2" }),
                other => {
                    let format = match other {
                        b"CCITTFaxDecode" | b"CCF" => "tiff".to_string(),
                        b"JBIG2Decode" => "jb2".to_string(),
                        _ => String::from_utf8_lossy(other).to_lowercase(),
                    };
                    return Ok(StreamPayload::Opaque { data, format });
                }
            }
        }
        Ok(StreamPayload::Samples(data))
    }

    fn unpredict(&self, data: Vec<u8>, parms: &Dictionary) -> Result<Vec<u8>, AvatarError> {
        let get = |key: &[u8], default: u32| match self.dict_u32(parms, key) {
            0 => default,
            v => v,
        };
        let predictor = get(b"Predictor", 1);
        if predictor == 1 {
            return Ok(data);
        }
        let colors = get(b"Colors", 1) as usize;
        let bpc = get(b"BitsPerComponent", 8) as usize;
        let columns = get(b"Columns", 1) as usize;
        if colors > MAX_PREDICTOR_COLORS
            || !matches!(bpc, 1 | 2 | 4 | 8 | 16)
            || columns > MAX_PREDICTOR_COLUMNS
        {
            return Err(AvatarError::DecodeError(format!(
                "predictor parameters out of range: Colors {colors}, BitsPerComponent {bpc}, Columns {columns}"
            )));
        }
        match predictor {
            2 if bpc == 8 => undo_tiff_predictor(data, colors, columns),
            2 => Err(AvatarError::DecodeError(format!(
                "TIFF predictor with {bpc} bits per component"
            ))),
            _ => undo_png_predictor(&data, colors, bpc, columns),
        }
    }

    fn names_of(&self, obj: Option<&Object>) -> Vec<Vec<u8>> {
        match obj.and_then(|o| self.resolve(o)) {
            Some(Object::Name(name)) => vec![name.clone()],
            Some(Object::Array(items)) => items
                .iter()
                .filter_map(|o| self.resolve(o))
                .filter_map(|o| o.as_name().ok())
                .map(<[u8]>::to_vec)
                .collect(),
            _ => Vec::new(),
        }
    }

    fn color_model(&self, obj: &Object, depth: usize) -> ColorModel {
        let Some(obj) = self.resolve(obj) else {
            return ColorModel::Unsupported("unresolvable".to_string());
        };
        match obj {
            Object::Name(name) => device_color_model(name),
            Object::Array(items) => {
                let Some(family) = items.first().and_then(|o| self.resolve(o)).and_then(|o| o.as_name().ok()) else {
                    return ColorModel::Unsupported("malformed".to_string());
                };
                match family {
                    b"ICCBased" => self.icc_color_model(items.get(1)),
                    b"CalGray" => ColorModel::Gray,
                    b"CalRGB" => ColorModel::Rgb,
                    b"Separation" => ColorModel::Gray,
                    b"Indexed" | b"I" if depth == 0 => self.indexed_color_model(items),
                    other => device_color_model(other),
                }
            }
            _ => ColorModel::Unsupported("malformed".to_string()),
        }
    }

    fn icc_color_model(&self, profile: Option<&Object>) -> ColorModel {
        let Some(Object::Stream(stream)) = profile.and_then(|o| self.resolve(o)) else {
            return ColorModel::Unsupported("ICCBased".to_string());
        };
        match self.dict_u32(&stream.dict, b"N") {
            1 => ColorModel::Gray,
            3 => ColorModel::Rgb,
            4 => ColorModel::Cmyk,
            _ => match stream.dict.get(b"Alternate") {
                Ok(alternate) => self.color_model(alternate, 1),
                Err(_) => ColorModel::Unsupported("ICCBased".to_string()),
            },
        }
    }

    /// `[/Indexed base hival lookup]`
    fn indexed_color_model(&self, items: &[Object]) -> ColorModel {
        let (Some(base), Some(lookup)) = (items.get(1), items.get(3)) else {
            return ColorModel::Unsupported("Indexed".to_string());
        };
        let components = match self.color_model(base, 1) {
            ColorModel::Gray => 1,
            ColorModel::Rgb => 3,
            ColorModel::Cmyk => 4,
            _ => return ColorModel::Unsupported("Indexed".to_string()),
        };
        let palette = match self.resolve(lookup) {
            Some(Object::String(bytes, _)) => bytes.clone(),
            Some(Object::Stream(stream)) => match self.apply_filters(stream) {
                Ok(StreamPayload::Samples(bytes)) => bytes,
                _ => return ColorModel::Unsupported("Indexed".to_string()),
            },
            _ => return ColorModel::Unsupported("Indexed".to_string()),
        };
        ColorModel::Indexed {
            components,
            palette,
        }
    }
}

fn device_color_model(name: &[u8]) -> ColorModel {
    match name {
        b"DeviceGray" | b"G" | b"CalGray" => ColorModel::Gray,
        b"DeviceRGB" | b"RGB" | b"CalRGB" => ColorModel::Rgb,
        b"DeviceCMYK" | b"CMYK" => ColorModel::Cmyk,
        other => ColorModel::Unsupported(String::from_utf8_lossy(other).into_owned()),
    }
}

fn name_of<'a>(dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
    dict.get(key).ok().and_then(|o| o.as_name().ok())
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, AvatarError> {
    let mut decoded = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut decoded)
        .map_err(|e| AvatarError::decode("FlateDecode", e))?;
    Ok(decoded)
}

fn undo_tiff_predictor(mut data: Vec<u8>, colors: usize, columns: usize) -> Result<Vec<u8>, AvatarError> {
    let stride = colors.checked_mul(columns).ok_or_else(predictor_overflow)?;
    if stride == 0 {
        return Ok(data);
    }
    for row in data.chunks_mut(stride) {
        for i in colors..row.len() {
            row[i] = row[i].wrapping_add(row[i - colors]);
        }
    }
    Ok(data)
}

/// Reverse PNG row filters (predictors 10-15): every row starts with its own
/// filter-type byte.
fn undo_png_predictor(
    data: &[u8],
    colors: usize,
    bpc: usize,
    columns: usize,
) -> Result<Vec<u8>, AvatarError> {
    let bits_per_pixel = colors.checked_mul(bpc).ok_or_else(predictor_overflow)?;
    let bpp = bits_per_pixel.div_ceil(8).max(1);
    let row_len = bits_per_pixel
        .checked_mul(columns)
        .ok_or_else(predictor_overflow)?
        .div_ceil(8);
    if row_len == 0 {
        return Err(AvatarError::DecodeError("empty predictor row".to_string()));
    }

    let mut out = Vec::with_capacity(data.len());
    let mut prev = vec![0u8; row_len];
    for chunk in data.chunks(row_len + 1) {
        if chunk.len() < row_len + 1 {
            break;
        }
        let (kind, filtered) = (chunk[0], &chunk[1..]);
        let mut row = filtered.to_vec();
        for i in 0..row_len {
            let left = if i >= bpp { row[i - bpp] } else { 0 };
            let up = prev[i];
            let up_left = if i >= bpp { prev[i - bpp] } else { 0 };
            let predicted = match kind {
                0 => 0,
                1 => left,
                2 => up,
                3 => ((left as u16 + up as u16) / 2) as u8,
                4 => paeth(left, up, up_left),
                other => {
                    return Err(AvatarError::DecodeError(format!(
                        "unknown PNG row filter {other}"
                    )))
                }
            };
            row[i] = row[i].wrapping_add(predicted);
        }
        out.extend_from_slice(&row);
        prev = row;
    }
    Ok(out)
}

fn predictor_overflow() -> AvatarError {
    AvatarError::DecodeError("predictor row size overflows".to_string())
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let (pa, pb, pc) = ((p - a as i16).abs(), (p - b as i16).abs(), (p - c as i16).abs());
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

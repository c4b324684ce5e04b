//! Word 97-2003 documents.
//!
//! Pictures live in the `Data` stream as PICF records: a 0x44-byte header
//! (`lcb`, `cbHeader`, metafile info, goal size and scaling) followed by the
//! picture payload, usually an OfficeArt BLIP wrapping a plain image file.
//!
//! Floating pictures are not in `Data`. Their BLIPs sit in the OfficeArt
//! blip store (`DggInfo` in the table stream), embedded in each FBSE record
//! or stored in `WordDocument` at the FBSE's `foDelay`.

use std::io::{Cursor, Read};

use tracing::{debug, info, warn};

use super::{find_embedded_image, RawImage};
use crate::error::AvatarError;

/// `wIdent` of the File Information Block.
const WORD_FIB_IDENT: u16 = 0xA5EC;

/// Size of a PICF header; also the only valid `cbHeader` value.
const PICF_HEADER_LEN: usize = 0x44;

/// `mfp.mm` value marking a shape-file picture with a trailing name.
const MM_SHAPEFILE: u16 = 0x66;

const TWIPS_PER_PIXEL: i64 = 15;

/// Size of `FibBase`, after which the variable-length FIB parts start.
const FIB_BASE_LEN: usize = 32;
/// `fWhichTblStm` in the `FibBase` flags: the table stream is `1Table`.
const FIB_FLAG_WHICH_TABLE: u16 = 0x0200;
const FIB_FLAGS_OFFSET: usize = 0x0A;
/// Position of the `fcDggInfo`/`lcbDggInfo` pair in `FibRgFcLcb97`.
const DGG_INFO_PAIR: usize = 50;

const OFFICE_ART_HEADER_LEN: usize = 8;
const RT_DGG_CONTAINER: u16 = 0xF000;
const RT_BSTORE_CONTAINER: u16 = 0xF001;
const RT_FBSE: u16 = 0xF007;
const RT_BLIP_FIRST: u16 = 0xF018;
const RT_BLIP_LAST: u16 = 0xF117;
/// Fixed part of an FBSE body, before the optional name and embedded BLIP.
const FBSE_FIXED_LEN: usize = 36;

/// An opened OLE2 Word document.
pub struct LegacyWordSource<'a> {
    compound: cfb::CompoundFile<Cursor<&'a [u8]>>,
    word_document: Vec<u8>,
}

impl<'a> LegacyWordSource<'a> {
    pub(crate) fn open(bytes: &'a [u8]) -> Result<Self, AvatarError> {
        let mut compound = cfb::CompoundFile::open(Cursor::new(bytes))
            .map_err(|e| AvatarError::format("ole2 compound file", e))?;

        let fib = read_stream(&mut compound, "WordDocument")
            .map_err(|e| AvatarError::format("WordDocument stream", e))?;
        let ident = fib.get(..2).map(|b| u16::from_le_bytes([b[0], b[1]]));
        if ident != Some(WORD_FIB_IDENT) {
            return Err(AvatarError::FormatError(format!(
                "WordDocument stream has wIdent {ident:#06x?}, expected {WORD_FIB_IDENT:#06x}"
            )));
        }
        Ok(Self {
            compound,
            word_document: fib,
        })
    }

    /// Inline pictures in `Data` stream order, then floating pictures in
    /// blip store order.
    pub(crate) fn enumerate_images(&mut self) -> Result<Vec<RawImage>, AvatarError> {
        let mut images = if self.compound.is_stream("Data") {
            let data = read_stream(&mut self.compound, "Data")
                .map_err(|e| AvatarError::format("Data stream", e))?;
            parse_pictures(&data)
        } else {
            debug!("legacy Word document has no Data stream");
            Vec::new()
        };

        match self.blip_store_pictures() {
            Ok(floating) => {
                for image in floating {
                    if images.iter().any(|known| known.data == image.data) {
                        debug!(format = %image.format, "blip already found inline");
                        continue;
                    }
                    images.push(image);
                }
            }
            Err(err) => warn!(error = %err, "unreadable blip store, floating pictures skipped"),
        }

        info!(count = images.len(), "pictures found in legacy Word document");
        Ok(images)
    }

    fn blip_store_pictures(&mut self) -> Result<Vec<RawImage>, AvatarError> {
        let Some((fc, lcb)) = dgg_info_location(&self.word_document) else {
            debug!("no drawing group in FIB, no floating pictures");
            return Ok(Vec::new());
        };
        let flags = read_u16(&self.word_document, FIB_FLAGS_OFFSET).unwrap_or(0);
        let table_name = if flags & FIB_FLAG_WHICH_TABLE != 0 {
            "1Table"
        } else {
            "0Table"
        };
        let table = read_stream(&mut self.compound, table_name)
            .map_err(|e| AvatarError::format(table_name, e))?;
        let dgg_info = fc
            .checked_add(lcb)
            .and_then(|end| table.get(fc..end))
            .ok_or_else(|| {
                AvatarError::FormatError(format!(
                    "DggInfo at {fc}+{lcb} lies outside {table_name} ({} bytes)",
                    table.len()
                ))
            })?;
        Ok(blip_store_images(dgg_info, &self.word_document))
    }
}

fn read_stream(
    compound: &mut cfb::CompoundFile<Cursor<&[u8]>>,
    path: &str,
) -> std::io::Result<Vec<u8>> {
    let mut stream = compound.open_stream(path)?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf)?;
    Ok(buf)
}

fn u16_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let b = bytes.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let b = bytes.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// `fcDggInfo`/`lcbDggInfo`, located by walking the FIB's counted parts.
fn dgg_info_location(fib: &[u8]) -> Option<(usize, usize)> {
    let mut offset = FIB_BASE_LEN;
    let csw = read_u16(fib, offset)? as usize;
    offset += 2 + csw * 2;
    let cslw = read_u16(fib, offset)? as usize;
    offset += 2 + cslw * 4;
    let pairs = read_u16(fib, offset)? as usize;
    if pairs <= DGG_INFO_PAIR {
        return None;
    }
    let pair = offset + 2 + DGG_INFO_PAIR * 8;
    let fc = read_u32(fib, pair)? as usize;
    let lcb = read_u32(fib, pair + 4)? as usize;
    (lcb > 0).then_some((fc, lcb))
}

/// OfficeArt records directly inside `body`: record type and record body.
/// A truncated trailing record ends the walk.
fn office_art_records(body: &[u8]) -> Vec<(u16, &[u8])> {
    let mut records = Vec::new();
    let mut offset = 0;
    while let (Some(rec_type), Some(len)) = (read_u16(body, offset + 2), read_u32(body, offset + 4)) {
        let start = offset + OFFICE_ART_HEADER_LEN;
        let Some(content) = start
            .checked_add(len as usize)
            .and_then(|end| body.get(start..end))
        else {
            break;
        };
        records.push((rec_type, content));
        offset = start + content.len();
    }
    records
}

/// Images held by the `OfficeArtBStoreContainer` of a drawing group.
fn blip_store_images(dgg_info: &[u8], delay_stream: &[u8]) -> Vec<RawImage> {
    let Some(&(RT_DGG_CONTAINER, dgg)) = office_art_records(dgg_info).first() else {
        warn!("DggInfo does not start with a drawing group container");
        return Vec::new();
    };
    let Some((_, bstore)) = office_art_records(dgg)
        .into_iter()
        .find(|(rec_type, _)| *rec_type == RT_BSTORE_CONTAINER)
    else {
        debug!("drawing group has no blip store");
        return Vec::new();
    };

    let mut images = Vec::new();
    for (entry, (rec_type, body)) in office_art_records(bstore).into_iter().enumerate() {
        let blip = match rec_type {
            RT_FBSE => fbse_blip(body, delay_stream),
            RT_BLIP_FIRST..=RT_BLIP_LAST => Some(body),
            _ => None,
        };
        match blip.and_then(|b| find_embedded_image(b).map(|(pos, format)| (&b[pos..], format))) {
            Some((data, format)) => {
                debug!(entry, format, size = data.len(), "blip store picture");
                images.push(RawImage::encoded(data.to_vec(), format));
            }
            None => warn!(entry, rec_type, "blip store entry without a recognizable image, skipping"),
        }
    }
    images
}

/// The BLIP of an FBSE: embedded after the name, or in the delay stream.
fn fbse_blip<'a>(body: &'a [u8], delay_stream: &'a [u8]) -> Option<&'a [u8]> {
    let name_len = *body.get(33)? as usize;
    let embedded = body.get(FBSE_FIXED_LEN + name_len..)?;
    if !embedded.is_empty() {
        return Some(embedded);
    }
    let size = read_u32(body, 20)? as usize;
    let fo_delay = read_u32(body, 28)? as usize;
    if size == 0 {
        return None;
    }
    delay_stream.get(fo_delay..fo_delay.checked_add(size)?)
}

/// Mapping modes a genuine PICF carries in `mfp.mm`.
fn plausible_mapping_mode(mm: u16) -> bool {
    matches!(mm, 1..=8 | 0x64 | MM_SHAPEFILE)
}

/// Walk the `Data` stream. Bytes that do not start a plausible PICF are
/// skipped one at a time, since the stream may hold other structures too.
fn parse_pictures(data: &[u8]) -> Vec<RawImage> {
    let mut images = Vec::new();
    let mut offset = 0;
    while offset + PICF_HEADER_LEN <= data.len() {
        let lcb = u32_at(data, offset) as usize;
        let cb_header = u16_at(data, offset + 4) as usize;
        let mm = u16_at(data, offset + 6);
        let fits = lcb >= PICF_HEADER_LEN && lcb <= data.len() - offset;
        if cb_header != PICF_HEADER_LEN || !fits || !plausible_mapping_mode(mm) {
            offset += 1;
            continue;
        }

        let record = &data[offset..offset + lcb];
        match picture_from_record(record) {
            Some(image) => {
                debug!(
                    offset,
                    format = %image.format,
                    width = image.declared_width,
                    height = image.declared_height,
                    "picture record"
                );
                images.push(image);
            }
            None => warn!(offset, lcb, "picture record without a recognizable image, skipping"),
        }
        offset += lcb;
    }
    images
}

fn picture_from_record(record: &[u8]) -> Option<RawImage> {
    let mut start = PICF_HEADER_LEN;
    if u16_at(record, 6) == MM_SHAPEFILE {
        let name_len = *record.get(start)? as usize;
        start += 1 + name_len;
    }
    let payload = record.get(start..)?;
    let (pos, format) = find_embedded_image(payload)?;

    let dxa_goal = u16_at(record, 0x1C) as i16;
    let dya_goal = u16_at(record, 0x1E) as i16;
    let mx = u16_at(record, 0x20);
    let my = u16_at(record, 0x22);

    let mut image = RawImage::encoded(payload[pos..].to_vec(), format);
    image.declared_width = twips_to_pixels(dxa_goal, mx);
    image.declared_height = twips_to_pixels(dya_goal, my);
    Some(image)
}

/// Goal size in twips scaled by a per-mille factor (0 meaning unscaled).
fn twips_to_pixels(goal: i16, scale_per_mille: u16) -> u32 {
    let scale = if scale_per_mille == 0 {
        1000
    } else {
        scale_per_mille as i64
    };
    (goal as i64 * scale / 1000 / TWIPS_PER_PIXEL).max(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    const JPEG_STUB: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

    fn picf(goal: (i16, i16), scale: (u16, u16), mm: u16, payload: &[u8]) -> Vec<u8> {
        let mut record = vec![0u8; PICF_HEADER_LEN];
        let lcb = (PICF_HEADER_LEN + payload.len()) as u32;
        record[0..4].copy_from_slice(&lcb.to_le_bytes());
        record[4..6].copy_from_slice(&(PICF_HEADER_LEN as u16).to_le_bytes());
        record[6..8].copy_from_slice(&mm.to_le_bytes());
        record[0x1C..0x1E].copy_from_slice(&goal.0.to_le_bytes());
        record[0x1E..0x20].copy_from_slice(&goal.1.to_le_bytes());
        record[0x20..0x22].copy_from_slice(&scale.0.to_le_bytes());
        record[0x22..0x24].copy_from_slice(&scale.1.to_le_bytes());
        record.extend_from_slice(payload);
        record
    }

    fn blip(image: &[u8]) -> Vec<u8> {
        // OfficeArt record header + UID + tag byte, then the image file.
        let mut payload = vec![0x0F, 0x00, 0x04, 0xF0, 0, 0, 0, 0];
        payload.extend_from_slice(&[0x11; 17]);
        payload.extend_from_slice(image);
        payload
    }

    #[test]
    fn parses_consecutive_pictures() {
        let mut data = picf((3000, 1500), (1000, 1000), 0x64, &blip(JPEG_STUB));
        data.extend(picf((1500, 1500), (500, 2000), 0x64, &blip(b"GIF89a\x01\x00")));
        let images = parse_pictures(&data);
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].format, "jpg");
        assert_eq!(images[0].data, JPEG_STUB);
        assert_eq!((images[0].declared_width, images[0].declared_height), (200, 100));
        assert_eq!(images[1].format, "gif");
        assert_eq!((images[1].declared_width, images[1].declared_height), (50, 200));
    }

    #[test]
    fn skips_leading_garbage_and_names() {
        let mut payload = vec![4, b'p', b'i', b'c', b'1'];
        payload.extend(blip(JPEG_STUB));
        let mut data = vec![0xAA; 7];
        data.extend(picf((1500, 1500), (0, 0), MM_SHAPEFILE, &payload));
        let images = parse_pictures(&data);
        assert_eq!(images.len(), 1);
        assert_eq!((images[0].declared_width, images[0].declared_height), (100, 100));
    }

    #[test]
    fn record_without_image_is_skipped() {
        let mut data = picf((1500, 1500), (1000, 1000), 0x64, &[0u8; 32]);
        data.extend(picf((1500, 1500), (1000, 1000), 0x64, &blip(JPEG_STUB)));
        let images = parse_pictures(&data);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].format, "jpg");
    }

    fn office_art(ver_instance: u16, rec_type: u16, body: &[u8]) -> Vec<u8> {
        let mut record = ver_instance.to_le_bytes().to_vec();
        record.extend_from_slice(&rec_type.to_le_bytes());
        record.extend_from_slice(&(body.len() as u32).to_le_bytes());
        record.extend_from_slice(body);
        record
    }

    /// FBSE body; `embedded` is either a BLIP record or empty for a delayed one.
    fn fbse(size: u32, fo_delay: u32, embedded: &[u8]) -> Vec<u8> {
        let mut body = vec![0u8; FBSE_FIXED_LEN];
        body[20..24].copy_from_slice(&size.to_le_bytes());
        body[24..28].copy_from_slice(&1u32.to_le_bytes());
        body[28..32].copy_from_slice(&fo_delay.to_le_bytes());
        body.extend_from_slice(embedded);
        office_art(0x0002, RT_FBSE, &body)
    }

    fn jpeg_blip() -> Vec<u8> {
        let mut body = vec![0x22; 17];
        body.extend_from_slice(JPEG_STUB);
        office_art(0x46A0, 0xF01D, &body)
    }

    fn dgg_info(bstore_entries: &[Vec<u8>]) -> Vec<u8> {
        let fdgg = office_art(0, 0xF006, &[0u8; 16]);
        let bstore = office_art(0x000F, RT_BSTORE_CONTAINER, &bstore_entries.concat());
        office_art(0x000F, RT_DGG_CONTAINER, &[fdgg, bstore].concat())
    }

    #[test]
    fn blip_store_embedded_and_delayed_pictures() {
        let delayed = jpeg_blip();
        let mut delay_stream = vec![0u8; 40];
        delay_stream.extend_from_slice(&delayed);

        let info = dgg_info(&[
            fbse(0, 0, &jpeg_blip()),
            fbse(delayed.len() as u32, 40, &[]),
            fbse(0, 0, &[]),
        ]);
        let images = blip_store_images(&info, &delay_stream);
        assert_eq!(images.len(), 2);
        assert!(images.iter().all(|i| i.format == "jpg" && i.data == JPEG_STUB));
        assert_eq!((images[0].declared_width, images[0].declared_height), (0, 0));
    }

    #[test]
    fn delayed_blip_outside_stream_is_skipped() {
        let info = dgg_info(&[fbse(500, 10_000, &[])]);
        assert!(blip_store_images(&info, &[0u8; 64]).is_empty());
    }

    #[test]
    fn truncated_office_art_record_ends_walk() {
        let mut bytes = office_art(0, 0xF006, &[1, 2]);
        bytes.extend_from_slice(&office_art(0, 0xF006, &[0u8; 8])[..10]);
        let records = office_art_records(&bytes);
        assert_eq!(records, vec![(0xF006, &[1u8, 2][..])]);
    }

    #[test]
    fn locates_dgg_info_in_fib() {
        let mut fib = vec![0u8; FIB_BASE_LEN];
        fib.extend_from_slice(&14u16.to_le_bytes());
        fib.extend_from_slice(&[0u8; 28]);
        fib.extend_from_slice(&22u16.to_le_bytes());
        fib.extend_from_slice(&[0u8; 88]);
        fib.extend_from_slice(&93u16.to_le_bytes());
        let mut pairs = vec![0u8; 93 * 8];
        pairs[DGG_INFO_PAIR * 8..DGG_INFO_PAIR * 8 + 4].copy_from_slice(&0x400u32.to_le_bytes());
        pairs[DGG_INFO_PAIR * 8 + 4..DGG_INFO_PAIR * 8 + 8].copy_from_slice(&0x80u32.to_le_bytes());
        fib.extend_from_slice(&pairs);
        // fcDggInfo of a standard Word 97 FIB sits at 0x22A.
        assert_eq!(u32_at(&fib, 0x22A), 0x400);
        assert_eq!(dgg_info_location(&fib), Some((0x400, 0x80)));
        assert_eq!(dgg_info_location(&fib[..100]), None);
    }

    #[test]
    fn negative_goal_clamps_to_zero() {
        assert_eq!(twips_to_pixels(-300, 1000), 0);
        assert_eq!(twips_to_pixels(1500, 0), 100);
    }
}

//! Document containers and the embedded images they hold.
//!
//! A document is routed by its leading bytes to exactly one [`DocumentSource`]
//! variant, which enumerates raw images in document traversal order.

mod legacy_word;
mod ooxml;
mod pdf;

use tracing::info;

use crate::decode::SampleLayout;
use crate::error::AvatarError;

/// OLE2 compound-file signature (first two bytes of the full 8-byte magic).
const OLE2_SIGNATURE: [u8; 2] = [0xD0, 0xCF];

/// How far into the file a `%PDF-` header is searched for.
const PDF_HEADER_WINDOW: usize = 1024;

/// Container family a document was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// Portable Document Format.
    Pdf,
    /// Word 97-2003 binary document inside an OLE2 compound file.
    LegacyWord,
    /// Word 2007+ OOXML package (ZIP).
    OoxmlWord,
}

impl ContainerKind {
    /// Detect the container kind from the leading bytes of a document.
    pub fn sniff(bytes: &[u8]) -> Self {
        let window = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
        if bytes.starts_with(&OLE2_SIGNATURE) {
            ContainerKind::LegacyWord
        } else if window.windows(5).any(|w| w == b"%PDF-") {
            ContainerKind::Pdf
        } else {
            ContainerKind::OoxmlWord
        }
    }
}

/// One image as found inside a container, before decoding.
#[derive(Debug, Clone)]
pub struct RawImage {
    /// Embedded bytes: an image file, or raw PDF samples when `layout` is set.
    pub data: Vec<u8>,
    /// Suggested file extension.
    pub format: String,
    /// Width declared by the container, 0 when not declared.
    pub declared_width: u32,
    /// Height declared by the container, 0 when not declared.
    pub declared_height: u32,
    /// Sample layout for raw PDF image data.
    pub layout: Option<SampleLayout>,
    /// Vertical position on the page. Never derived from layout, always 0.
    pub position_y: f32,
    /// Page height in points, 0 for containers without pages.
    pub page_height: f32,
    /// 1-based page number for PDF images.
    pub page: Option<u32>,
}

impl RawImage {
    pub(crate) fn encoded(data: Vec<u8>, format: impl Into<String>) -> Self {
        Self {
            data,
            format: format.into(),
            declared_width: 0,
            declared_height: 0,
            layout: None,
            position_y: 0.0,
            page_height: 0.0,
            page: None,
        }
    }
}

/// A parsed document, one variant per supported container.
pub enum DocumentSource<'a> {
    /// PDF document.
    Pdf(pdf::PdfSource),
    /// Legacy OLE2 Word document.
    LegacyWord(legacy_word::LegacyWordSource<'a>),
    /// OOXML Word package.
    OoxmlWord(ooxml::OoxmlWordSource<'a>),
}

impl<'a> DocumentSource<'a> {
    /// Sniff the container kind and open the document.
    ///
    /// Fails with [`AvatarError::FormatError`] when the document cannot be
    /// opened as the detected container.
    pub fn open(bytes: &'a [u8]) -> Result<Self, AvatarError> {
        let kind = ContainerKind::sniff(bytes);
        info!(?kind, size = bytes.len(), "opening document");
        match kind {
            ContainerKind::Pdf => pdf::PdfSource::open(bytes).map(DocumentSource::Pdf),
            ContainerKind::LegacyWord => {
                legacy_word::LegacyWordSource::open(bytes).map(DocumentSource::LegacyWord)
            }
            ContainerKind::OoxmlWord => {
                ooxml::OoxmlWordSource::open(bytes).map(DocumentSource::OoxmlWord)
            }
        }
    }

    /// The container family of this document.
    pub fn kind(&self) -> ContainerKind {
        match self {
            DocumentSource::Pdf(_) => ContainerKind::Pdf,
            DocumentSource::LegacyWord(_) => ContainerKind::LegacyWord,
            DocumentSource::OoxmlWord(_) => ContainerKind::OoxmlWord,
        }
    }

    /// Every embedded image in traversal order. Malformed images are skipped
    /// with a warning.
    pub fn enumerate_images(&mut self) -> Result<Vec<RawImage>, AvatarError> {
        match self {
            DocumentSource::Pdf(source) => Ok(source.enumerate_images()),
            DocumentSource::LegacyWord(source) => source.enumerate_images(),
            DocumentSource::OoxmlWord(source) => source.enumerate_images(),
        }
    }
}

const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Signatures that can be located anywhere inside a picture record.
const EMBEDDED_SIGNATURES: &[(&[u8], &str)] = &[
    (PNG_SIGNATURE, "png"),
    (&[0xFF, 0xD8, 0xFF], "jpg"),
    (b"GIF87a", "gif"),
    (b"GIF89a", "gif"),
    (b"II*\0", "tiff"),
    (b"MM\0*", "tiff"),
    (&[0xD7, 0xCD, 0xC6, 0x9A], "wmf"),
];

/// Suggest a file extension from the first bytes of an image file.
pub(crate) fn sniff_extension(bytes: &[u8]) -> Option<&'static str> {
    if let Ok(format) = image::guess_format(bytes) {
        if let Some(ext) = format.extensions_str().first() {
            return Some(*ext);
        }
    }
    if is_emf_at(bytes, 0) {
        return Some("emf");
    }
    EMBEDDED_SIGNATURES
        .iter()
        .find(|(sig, _)| bytes.starts_with(sig))
        .map(|(_, ext)| *ext)
}

/// Locate the earliest recognizable image file inside `payload`.
pub(crate) fn find_embedded_image(payload: &[u8]) -> Option<(usize, &'static str)> {
    let mut best: Option<(usize, &'static str)> = None;
    for (sig, ext) in EMBEDDED_SIGNATURES {
        if let Some(pos) = payload.windows(sig.len()).position(|w| w == *sig) {
            if best.map_or(true, |(b, _)| pos < b) {
                best = Some((pos, ext));
            }
        }
    }
    // EMF has no leading magic: record type 1 and " EMF" at byte 40.
    if let Some(pos) = payload.windows(4).position(|w| w == b" EMF") {
        if pos >= 40 && is_emf_at(payload, pos - 40) && best.map_or(true, |(b, _)| pos - 40 < b) {
            best = Some((pos - 40, "emf"));
        }
    }
    best
}

fn is_emf_at(bytes: &[u8], offset: usize) -> bool {
    bytes.len() >= offset + 44
        && bytes[offset..offset + 4] == [1, 0, 0, 0]
        && &bytes[offset + 40..offset + 44] == b" EMF"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ole2_signature_routes_to_legacy_word() {
        let bytes = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
        assert_eq!(ContainerKind::sniff(&bytes), ContainerKind::LegacyWord);
        // Only the first two bytes matter.
        assert_eq!(ContainerKind::sniff(&[0xD0, 0xCF]), ContainerKind::LegacyWord);
    }

    #[test]
    fn ole2_signature_wins_over_embedded_pdf_header() {
        let mut bytes = vec![0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
        bytes.extend_from_slice(&[0u8; 504]);
        bytes.extend_from_slice(b"%PDF-1.4");
        assert_eq!(ContainerKind::sniff(&bytes), ContainerKind::LegacyWord);
    }

    #[test]
    fn other_bytes_route_to_ooxml() {
        assert_eq!(ContainerKind::sniff(b"PK\x03\x04"), ContainerKind::OoxmlWord);
        assert_eq!(ContainerKind::sniff(&[0xD0]), ContainerKind::OoxmlWord);
        assert_eq!(ContainerKind::sniff(&[]), ContainerKind::OoxmlWord);
    }

    #[test]
    fn pdf_header_routes_to_pdf() {
        assert_eq!(ContainerKind::sniff(b"%PDF-1.7\n"), ContainerKind::Pdf);
        assert_eq!(ContainerKind::sniff(b"\n\n%PDF-1.4\n"), ContainerKind::Pdf);
    }

    #[test]
    fn ole2_signature_with_garbage_is_format_error() {
        let mut bytes = vec![0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
        bytes.extend_from_slice(&[0x42; 600]);
        let result = DocumentSource::open(&bytes);
        assert!(matches!(result, Err(AvatarError::FormatError(_))));
    }

    #[test]
    fn unknown_bytes_are_format_error() {
        let result = DocumentSource::open(b"just some text, not a document");
        assert!(matches!(result, Err(AvatarError::FormatError(_))));
    }

    #[test]
    fn sniff_common_formats() {
        assert_eq!(sniff_extension(PNG_SIGNATURE), Some("png"));
        assert_eq!(sniff_extension(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10]), Some("jpg"));
        assert_eq!(sniff_extension(b"GIF89a...."), Some("gif"));
        assert_eq!(sniff_extension(&[0xD7, 0xCD, 0xC6, 0x9A, 0, 0]), Some("wmf"));
        assert_eq!(sniff_extension(b"nothing"), None);
    }

    #[test]
    fn finds_image_after_record_header() {
        let mut payload = vec![0u8; 37];
        payload.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0]);
        payload.extend_from_slice(PNG_SIGNATURE);
        assert_eq!(find_embedded_image(&payload), Some((37, "jpg")));
        assert_eq!(find_embedded_image(&[0u8; 64]), None);
    }

    #[test]
    fn finds_emf_by_description_marker() {
        let mut payload = vec![0xAB; 5];
        let mut emf = vec![0u8; 48];
        emf[0] = 1;
        emf[40..44].copy_from_slice(b" EMF");
        payload.extend_from_slice(&emf);
        assert_eq!(find_embedded_image(&payload), Some((5, "emf")));
    }
}

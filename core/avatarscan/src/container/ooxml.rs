use std::io::{Cursor, Read};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use super::{sniff_extension, RawImage};
use crate::error::AvatarError;

const MAIN_PART: &str = "word/document.xml";
const MAIN_RELS_PART: &str = "word/_rels/document.xml.rels";
const MEDIA_PREFIX: &str = "word/media/";
/// Declared entry sizes are untrusted; larger parts grow while reading.
const MAX_CAPACITY_HINT: u64 = 16 * 1024 * 1024;

/// An opened Word 2007+ package.
pub struct OoxmlWordSource<'a> {
    archive: ZipArchive<Cursor<&'a [u8]>>,
}

impl<'a> OoxmlWordSource<'a> {
    pub(crate) fn open(bytes: &'a [u8]) -> Result<Self, AvatarError> {
        let mut archive =
            ZipArchive::new(Cursor::new(bytes)).map_err(|e| AvatarError::format("ooxml package", e))?;
        if archive.by_name(MAIN_PART).is_err() {
            return Err(AvatarError::FormatError(format!(
                "package has no {MAIN_PART}, not a Word document"
            )));
        }
        Ok(Self { archive })
    }

    /// Picture parts in relationship order, or `word/media/` entries in
    /// archive order when the document has no relationships part.
    pub(crate) fn enumerate_images(&mut self) -> Result<Vec<RawImage>, AvatarError> {
        let parts = match self.read_part(MAIN_RELS_PART) {
            Ok(xml) => image_targets(&String::from_utf8_lossy(&xml))?,
            Err(_) => {
                debug!("no document relationships, falling back to media entries");
                (0..self.archive.len())
                    .filter_map(|i| self.archive.by_index_raw(i).ok().map(|f| f.name().to_string()))
                    .filter(|name| name.starts_with(MEDIA_PREFIX) && !name.ends_with('/'))
                    .collect()
            }
        };

        let mut images = Vec::with_capacity(parts.len());
        for part in parts {
            match self.read_part(&part) {
                Ok(data) => {
                    let format = part_extension(&part)
                        .or_else(|| sniff_extension(&data).map(str::to_string))
                        .unwrap_or_else(|| "bin".to_string());
                    debug!(part = %part, format = %format, size = data.len(), "picture part");
                    images.push(RawImage::encoded(data, format));
                }
                Err(err) => warn!(part = %part, error = %err, "unreadable picture part, skipping"),
            }
        }
        info!(count = images.len(), "pictures found in Word package");
        Ok(images)
    }

    fn read_part(&mut self, name: &str) -> std::io::Result<Vec<u8>> {
        let mut file = self.archive.by_name(name)?;
        let mut data = Vec::with_capacity(capacity_hint(file.size()));
        file.read_to_end(&mut data)?;
        Ok(data)
    }
}

/// Resolve the internal image relationships of the main document part,
/// de-duplicated, in document order.
fn image_targets(xml: &str) -> Result<Vec<String>, AvatarError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut targets: Vec<String> = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e) | Event::Start(e)) if e.local_name().as_ref() == b"Relationship" => {
                let mut rel_type = None;
                let mut target = None;
                let mut external = false;
                for attr in e.attributes().flatten() {
                    let value = String::from_utf8_lossy(&attr.value).into_owned();
                    match attr.key.as_ref() {
                        b"Type" => rel_type = Some(value),
                        b"Target" => target = Some(value),
                        b"TargetMode" => external = value.eq_ignore_ascii_case("External"),
                        _ => {}
                    }
                }
                if let (Some(rel_type), Some(target)) = (rel_type, target) {
                    if rel_type.ends_with("/image") && !external {
                        let part = resolve_part_name("word", &target);
                        if !targets.contains(&part) {
                            targets.push(part);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(AvatarError::format("document relationships", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(targets)
}

/// Resolve a relationship target against the source part's directory.
fn resolve_part_name(base_dir: &str, target: &str) -> String {
    let mut segments: Vec<&str> = if target.starts_with('/') {
        Vec::new()
    } else {
        base_dir.split('/').filter(|s| !s.is_empty()).collect()
    };
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

fn capacity_hint(declared_size: u64) -> usize {
    declared_size.min(MAX_CAPACITY_HINT) as usize
}

fn part_extension(part: &str) -> Option<String> {
    Path::new(part)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| match e.to_ascii_lowercase().as_str() {
            "jpeg" => "jpg".to_string(),
            other => other.to_string(),
        })
}

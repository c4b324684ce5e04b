use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, info, warn};

use crate::container::{DocumentSource, RawImage};
use crate::debug_sink::DebugSink;
use crate::decode::{self, DecodedImage};
use crate::error::AvatarError;
use crate::face_detector::FaceClassifier;
use crate::score::{self, ScoreInput};
use crate::{ImageDescriptor, ScanReport};

/// Full scan: enumerate → decode → detect faces → score, in traversal order.
///
/// Only a document that cannot be opened fails; per-image problems degrade
/// that image and the scan moves on.
pub(crate) fn scan_document(
    bytes: &[u8],
    file_name: &str,
    classifier: &FaceClassifier,
    sink: Option<&DebugSink>,
) -> Result<ScanReport, AvatarError> {
    let mut source = DocumentSource::open(bytes)?;
    let kind = source.kind();
    let raw_images = source.enumerate_images()?;
    info!(file = file_name, ?kind, count = raw_images.len(), "scanning embedded images");

    if let FaceClassifier::Unavailable(reason) = classifier {
        warn!(reason = %reason, "face classifier unavailable, face signal disabled");
    }

    let images: Vec<ImageDescriptor> = raw_images
        .into_iter()
        .enumerate()
        .map(|(index, raw)| classify_image(index, raw, file_name, classifier, sink))
        .collect();

    let report = ScanReport {
        kind,
        file_name: file_name.to_string(),
        images,
    };
    info!(
        file = file_name,
        images = report.images.len(),
        candidates = report.candidates().count(),
        "scan complete"
    );
    Ok(report)
}

fn classify_image(
    index: usize,
    raw: RawImage,
    file_name: &str,
    classifier: &FaceClassifier,
    sink: Option<&DebugSink>,
) -> ImageDescriptor {
    if let Some(sink) = sink {
        sink.save_raw(file_name, index, &raw.format, &raw.data);
    }

    let (width, height, faces, data, format, decoded) = match decode_guarded(&raw) {
        Ok(image) => {
            if let Some(sink) = sink {
                sink.save_decoded(file_name, index, &image.gray);
            }
            let (width, height) = (image.width(), image.height());
            let faces = classifier.count_faces(image.gray.as_raw(), width, height);
            match image.reencoded_png {
                Some(png) => (width, height, faces, png, "png".to_string(), true),
                None => (width, height, faces, raw.data, raw.format, true),
            }
        }
        Err(err) => {
            warn!(index, format = %raw.format, error = %err, "no usable pixel data");
            let (w, h) = (raw.declared_width, raw.declared_height);
            (w, h, 0, raw.data, raw.format, false)
        }
    };

    let assessment = score::assess(&ScoreInput {
        width,
        height,
        position_y: raw.position_y,
        page_height: raw.page_height,
        file_name,
        faces,
    });
    let tag = assessment.tag();

    if assessment.is_avatar() {
        info!(index, tag = ?tag, width, height, format = %format, score = assessment.score, "possible avatar");
    } else {
        debug!(index, width, height, format = %format, score = assessment.score, "not an avatar");
    }

    ImageDescriptor {
        index,
        data,
        width,
        height,
        format,
        file_name: file_name.to_string(),
        position_y: raw.position_y,
        page_height: raw.page_height,
        page: raw.page,
        decoded,
        score: assessment.score,
        signals: assessment.signals,
        tag,
    }
}

/// Decoders for untrusted data may panic; treat that as a decode failure.
fn decode_guarded(raw: &RawImage) -> Result<DecodedImage, AvatarError> {
    catch_unwind(AssertUnwindSafe(|| decode::decode(raw)))
        .unwrap_or_else(|_| Err(AvatarError::DecodeError("decoder panicked".to_string())))
}

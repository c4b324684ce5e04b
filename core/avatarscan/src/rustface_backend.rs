use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use crate::error::AvatarError;
use crate::face_detector::{FaceBounds, FaceDetector};

/// Face detector backed by the `rustface` crate (SeetaFace engine).
///
/// The model is parsed once at construction and shared read-only. Each
/// [`FaceDetector::detect`] call builds its own detector from the shared model,
/// so concurrent scans never touch the same mutable detector state.
pub struct RustfaceDetector {
    model: Arc<rustface::Model>,
}

impl RustfaceDetector {
    /// Load a SeetaFace model (e.g. `seeta_fd_frontal_v1.0.bin`) from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AvatarError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            AvatarError::ClassifierUnavailable(format!("{}: {e}", path.display()))
        })?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Load a SeetaFace model from any reader.
    pub fn from_reader(reader: impl Read) -> Result<Self, AvatarError> {
        let model = rustface::read_model(reader)
            .map_err(|e| AvatarError::ClassifierUnavailable(e.to_string()))?;
        Ok(Self {
            model: Arc::new(model),
        })
    }
}

impl FaceDetector for RustfaceDetector {
    fn detect(&self, gray: &[u8], width: u32, height: u32) -> Vec<FaceBounds> {
        let mut detector = rustface::create_detector_with_model((*self.model).clone());
        detector.set_min_face_size(20);
        detector.set_score_thresh(2.0);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);

        let faces = detector.detect(&rustface::ImageData::new(gray, width, height));

        faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                FaceBounds {
                    x: bbox.x() as f64,
                    y: bbox.y() as f64,
                    width: bbox.width() as f64,
                    height: bbox.height() as f64,
                    confidence: face.score(),
                }
            })
            .collect()
    }
}

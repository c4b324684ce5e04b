use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::error::AvatarError;

/// Bounding box of a detected face within an image.
#[derive(Debug, Clone)]
pub struct FaceBounds {
    /// X coordinate of the top-left corner (pixels).
    pub x: f64,
    /// Y coordinate of the top-left corner (pixels).
    pub y: f64,
    /// Width of the bounding box (pixels).
    pub width: f64,
    /// Height of the bounding box (pixels).
    pub height: f64,
    /// Detection confidence score.
    pub confidence: f64,
}

/// Pluggable face detection backend.
///
/// Implement this trait to provide a custom face detector (ONNX, dlib, etc.)
/// and pass it to [`crate::AvatarExtractor::face_detector`].
pub trait FaceDetector: Send + Sync {
    /// Detect faces in a row-major grayscale buffer of `width` × `height` bytes.
    fn detect(&self, gray: &[u8], width: u32, height: u32) -> Vec<FaceBounds>;
}

/// Face signal source used by the extraction pipeline.
///
/// Wraps a shared, read-only [`FaceDetector`]. Every failure inside a single
/// classification (invalid buffer, detector panic) is reported as zero faces.
/// When no model could be loaded the classifier is `Unavailable` and every
/// image scores without the face signal.
#[derive(Clone)]
pub enum FaceClassifier {
    /// A loaded detector, shared across scans.
    Ready(Arc<dyn FaceDetector>),
    /// No usable detector; carries the reason for diagnostics.
    Unavailable(String),
}

impl FaceClassifier {
    /// Wrap an already constructed detector.
    pub fn new(detector: Arc<dyn FaceDetector>) -> Self {
        FaceClassifier::Ready(detector)
    }

    /// Load the built-in SeetaFace detector from a model file.
    ///
    /// A missing or corrupt model does not fail: it is logged and the
    /// classifier degrades to [`FaceClassifier::Unavailable`].
    #[cfg(feature = "rustface")]
    pub fn from_model_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match crate::rustface_backend::RustfaceDetector::from_path(path) {
            Ok(detector) => FaceClassifier::Ready(Arc::new(detector)),
            Err(err) => {
                error!(model = %path.display(), error = %err, "face model could not be loaded");
                FaceClassifier::Unavailable(err.to_string())
            }
        }
    }

    /// Without the `rustface` feature there is no built-in model format.
    #[cfg(not(feature = "rustface"))]
    pub fn from_model_path(path: impl AsRef<Path>) -> Self {
        let err = AvatarError::ClassifierUnavailable(format!(
            "built without the rustface feature, cannot load {}",
            path.as_ref().display()
        ));
        error!(error = %err, "face model could not be loaded");
        FaceClassifier::Unavailable(err.to_string())
    }

    /// Whether a detector is loaded.
    pub fn is_available(&self) -> bool {
        matches!(self, FaceClassifier::Ready(_))
    }

    /// Count faces in a grayscale buffer. Never fails; problems count as 0.
    pub fn count_faces(&self, gray: &[u8], width: u32, height: u32) -> usize {
        match self.try_count_faces(gray, width, height) {
            Ok(count) => {
                if count > 0 {
                    debug!(count, width, height, "faces detected");
                }
                count
            }
            // Unavailability is reported once per scan by the pipeline.
            Err(err) if !self.is_available() => {
                debug!(error = %err, "face detection skipped");
                0
            }
            Err(err) => {
                warn!(error = %err, "face detection failed, counting no faces");
                0
            }
        }
    }

    fn try_count_faces(&self, gray: &[u8], width: u32, height: u32) -> Result<usize, AvatarError> {
        let detector = match self {
            FaceClassifier::Ready(detector) => detector,
            FaceClassifier::Unavailable(reason) => {
                return Err(AvatarError::ClassifierUnavailable(reason.clone()))
            }
        };

        if width == 0 || height == 0 {
            return Err(AvatarError::DecodeError("empty pixel buffer".to_string()));
        }
        let expected = width as usize * height as usize;
        if gray.len() != expected {
            return Err(AvatarError::DecodeError(format!(
                "grayscale buffer holds {} bytes, expected {expected}",
                gray.len()
            )));
        }

        catch_unwind(AssertUnwindSafe(|| detector.detect(gray, width, height).len()))
            .map_err(|_| AvatarError::ClassifierUnavailable("detector panicked".to_string()))
    }
}

impl Default for FaceClassifier {
    fn default() -> Self {
        FaceClassifier::Unavailable("no face detector configured".to_string())
    }
}

impl std::fmt::Debug for FaceClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaceClassifier::Ready(_) => f.write_str("FaceClassifier::Ready"),
            FaceClassifier::Unavailable(reason) => {
                f.debug_tuple("FaceClassifier::Unavailable").field(reason).finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDetector(usize);

    impl FaceDetector for FixedDetector {
        fn detect(&self, _gray: &[u8], _width: u32, _height: u32) -> Vec<FaceBounds> {
            (0..self.0)
                .map(|i| FaceBounds {
                    x: i as f64,
                    y: 0.0,
                    width: 10.0,
                    height: 10.0,
                    confidence: 3.0,
                })
                .collect()
        }
    }

    struct PanickingDetector;

    impl FaceDetector for PanickingDetector {
        fn detect(&self, _gray: &[u8], _width: u32, _height: u32) -> Vec<FaceBounds> {
            panic!("native detector blew up");
        }
    }

    #[test]
    fn counts_detected_faces() {
        let classifier = FaceClassifier::new(Arc::new(FixedDetector(2)));
        assert_eq!(classifier.count_faces(&[0u8; 16], 4, 4), 2);
    }

    #[test]
    fn unavailable_reports_zero() {
        let classifier = FaceClassifier::default();
        assert!(!classifier.is_available());
        assert_eq!(classifier.count_faces(&[0u8; 16], 4, 4), 0);
    }

    #[test]
    fn mismatched_buffer_reports_zero() {
        let classifier = FaceClassifier::new(Arc::new(FixedDetector(1)));
        assert_eq!(classifier.count_faces(&[0u8; 10], 4, 4), 0);
        assert_eq!(classifier.count_faces(&[], 0, 0), 0);
    }

    #[test]
    fn detector_panic_is_absorbed() {
        let classifier = FaceClassifier::new(Arc::new(PanickingDetector));
        assert_eq!(classifier.count_faces(&[0u8; 16], 4, 4), 0);
        // Still usable afterwards.
        assert_eq!(classifier.count_faces(&[0u8; 16], 4, 4), 0);
    }

    #[test]
    fn missing_model_degrades_to_unavailable() {
        let classifier = FaceClassifier::from_model_path("/nonexistent/seeta_fd_frontal_v1.0.bin");
        assert!(!classifier.is_available());
    }
}

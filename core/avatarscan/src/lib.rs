//! Avatar photo detection for PDF and Word documents.
//!
//! Every embedded image of a document is extracted, decoded, run through a
//! face detector and scored by a small set of heuristics. Images that reach
//! the threshold are reported as avatar candidates.
//!
//! # Example
//!
//! ```no_run
//! use avatarscan::{AvatarExtractor, FaceClassifier};
//!
//! let extractor = AvatarExtractor::new()
//!     .face_classifier(FaceClassifier::from_model_path("model/seeta_fd_frontal_v1.0.bin"));
//! for avatar in extractor.extract_avatars("resume.pdf").unwrap() {
//!     println!("{} {}x{} {:?}", avatar.index, avatar.width, avatar.height, avatar.tag);
//! }
//! ```
#![warn(missing_docs)]

mod container;
mod debug_sink;
mod decode;
mod error;
/// Face detection traits and data types.
pub mod face_detector;
mod pipeline;
#[cfg(feature = "rustface")]
/// Built-in SeetaFace-based face detector backend.
pub mod rustface_backend;
/// Heuristic scoring of extracted images.
pub mod score;

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Container family a document was routed to.
pub use container::ContainerKind;
/// Error type returned by avatarscan operations.
pub use error::AvatarError;
/// Face detection trait, face bounding-box type and the pipeline's face signal.
pub use face_detector::{FaceBounds, FaceClassifier, FaceDetector};
#[cfg(feature = "rustface")]
/// Built-in detector backed by a SeetaFace model file.
pub use rustface_backend::RustfaceDetector;
/// Individual scoring signals.
pub use score::Signal;

use debug_sink::DebugSink;

/// One embedded image after decoding and scoring.
#[derive(Debug, Clone)]
pub struct ImageDescriptor {
    /// Position in document traversal order, starting at 0.
    pub index: usize,

    /// Image bytes: the embedded file, or a PNG when the container stored
    /// raw samples.
    pub data: Vec<u8>,

    /// Width in pixels, 0 when unknown.
    pub width: u32,

    /// Height in pixels, 0 when unknown.
    pub height: u32,

    /// File extension describing `data` (`png`, `jpg`, `emf`, ...).
    pub format: String,

    /// Name of the source document.
    pub file_name: String,

    /// Vertical position on the page. Currently always 0.
    pub position_y: f32,

    /// Page height in points, 0 for Word documents.
    pub page_height: f32,

    /// 1-based page number for PDF images.
    pub page: Option<u32>,

    /// Whether pixel data could be decoded. When `false` the face signal did
    /// not fire and the dimensions are whatever the container declared.
    pub decoded: bool,

    /// Heuristic score.
    pub score: u32,

    /// Signals that fired, in evaluation order.
    pub signals: Vec<Signal>,

    /// Diagnostic tag, present only on avatar candidates.
    pub tag: Option<String>,
}

impl ImageDescriptor {
    /// Whether this image reached the avatar threshold.
    pub fn is_avatar(&self) -> bool {
        self.tag.is_some()
    }
}

/// Every image of one document, in traversal order.
#[derive(Debug, Clone)]
pub struct ScanReport {
    /// The container the document was routed to.
    pub kind: ContainerKind,

    /// Name of the scanned document.
    pub file_name: String,

    /// All extracted images, candidates or not.
    pub images: Vec<ImageDescriptor>,
}

impl ScanReport {
    /// Avatar candidates, in traversal order.
    pub fn candidates(&self) -> impl Iterator<Item = &ImageDescriptor> {
        self.images.iter().filter(|image| image.is_avatar())
    }

    /// Consume the report, keeping only avatar candidates.
    pub fn into_candidates(self) -> Vec<ImageDescriptor> {
        self.images.into_iter().filter(ImageDescriptor::is_avatar).collect()
    }
}

/// Builder for scanning documents for avatar photos.
///
/// Configuration is immutable once scanning starts; one extractor can scan
/// any number of documents, also from several threads.
#[derive(Debug, Default)]
pub struct AvatarExtractor {
    classifier: FaceClassifier,
    debug_sink: Option<DebugSink>,
}

impl AvatarExtractor {
    /// Create an extractor without a face detector and without debug output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom face detector implementation.
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use avatarscan::{AvatarExtractor, FaceBounds, FaceDetector};
    ///
    /// struct MyDetector;
    /// impl FaceDetector for MyDetector {
    ///     fn detect(&self, gray: &[u8], width: u32, height: u32) -> Vec<FaceBounds> {
    ///         vec![]
    ///     }
    /// }
    ///
    /// let report = AvatarExtractor::new()
    ///     .face_detector(Arc::new(MyDetector))
    ///     .scan_path("resume.docx")
    ///     .unwrap();
    /// ```
    pub fn face_detector(mut self, detector: Arc<dyn FaceDetector>) -> Self {
        self.classifier = FaceClassifier::new(detector);
        self
    }

    /// Set the face signal source, e.g. [`FaceClassifier::from_model_path`].
    pub fn face_classifier(mut self, classifier: FaceClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Write every extracted image, and the grayscale buffer used for face
    /// detection, into `dir`. Write failures are logged and ignored.
    pub fn debug_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_sink = Some(DebugSink::new(dir));
        self
    }

    /// Whether the face signal can fire.
    pub fn has_face_detector(&self) -> bool {
        self.classifier.is_available()
    }

    /// Read and scan a document from disk.
    pub fn scan_path(&self, path: impl AsRef<Path>) -> Result<ScanReport, AvatarError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        self.scan_bytes(&bytes, &path.to_string_lossy())
    }

    /// Scan an in-memory document. `file_name` feeds the name signal and the
    /// debug output names.
    pub fn scan_bytes(&self, bytes: &[u8], file_name: &str) -> Result<ScanReport, AvatarError> {
        pipeline::scan_document(bytes, file_name, &self.classifier, self.debug_sink.as_ref())
    }

    /// Only the avatar candidates of a document on disk.
    pub fn extract_avatars(&self, path: impl AsRef<Path>) -> Result<Vec<ImageDescriptor>, AvatarError> {
        self.scan_path(path).map(ScanReport::into_candidates)
    }
}

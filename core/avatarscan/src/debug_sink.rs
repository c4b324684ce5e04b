use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use image::GrayImage;
use tracing::{debug, warn};

/// Writes extracted images to a directory for inspection.
///
/// The directory is created on first write. Failures are logged and never
/// reach the caller.
#[derive(Debug)]
pub(crate) struct DebugSink {
    dir: PathBuf,
    ready: OnceLock<bool>,
}

impl DebugSink {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ready: OnceLock::new(),
        }
    }

    fn ensure_dir(&self) -> bool {
        *self.ready.get_or_init(|| match std::fs::create_dir_all(&self.dir) {
            Ok(()) => true,
            Err(err) => {
                warn!(dir = %self.dir.display(), error = %err, "cannot create debug output directory");
                false
            }
        })
    }

    /// Save the embedded bytes as `<stem>_img_<index>.<ext>`.
    pub(crate) fn save_raw(&self, source: &str, index: usize, format: &str, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let name = format!("{}_img_{index}.{format}", source_stem(source));
        self.write(&name, |path| std::fs::write(path, data).map_err(|e| e.to_string()));
    }

    /// Save the grayscale buffer used for face detection as PNG.
    pub(crate) fn save_decoded(&self, source: &str, index: usize, gray: &GrayImage) {
        let name = format!("decoded_{}_img_{index}.png", source_stem(source));
        self.write(&name, |path| gray.save(path).map_err(|e| e.to_string()));
    }

    fn write(&self, name: &str, save: impl FnOnce(&Path) -> Result<(), String>) {
        if !self.ensure_dir() {
            return;
        }
        let path = self.dir.join(name);
        match save(&path) {
            Ok(()) => debug!(path = %path.display(), "wrote debug image"),
            Err(err) => warn!(path = %path.display(), error = %err, "failed to write debug image"),
        }
    }
}

fn source_stem(source: &str) -> String {
    Path::new(source)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown_source")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_directory_lazily() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("img");
        let sink = DebugSink::new(&dir);
        assert!(!dir.exists());

        sink.save_raw("/docs/cv_demo.pdf", 2, "jpg", &[1, 2, 3]);
        assert_eq!(std::fs::read(dir.join("cv_demo_img_2.jpg")).unwrap(), vec![1, 2, 3]);

        sink.save_decoded("/docs/cv_demo.pdf", 2, &GrayImage::new(4, 4));
        assert!(dir.join("decoded_cv_demo_img_2.png").exists());
    }

    #[test]
    fn unwritable_directory_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        // A regular file where the directory should be.
        let sink = DebugSink::new(blocker.join("img"));
        sink.save_raw("cv.pdf", 0, "png", &[1]);
        assert!(!blocker.join("img").exists());
    }

    #[test]
    fn stem_fallback() {
        assert_eq!(source_stem("resume.final.docx"), "resume.final");
        assert_eq!(source_stem(""), "unknown_source");
    }
}

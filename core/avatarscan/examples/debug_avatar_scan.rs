//! Scan one document and print every embedded image with its score.
//!
//! Extracted images are written to `./img` for inspection.
//!
//! Usage:
//!   RUST_LOG=avatarscan=debug cargo run --example debug_avatar_scan -- resume.pdf [model.bin]

use avatarscan::{AvatarExtractor, FaceClassifier};
use tracing_subscriber::EnvFilter;

const DEFAULT_MODEL: &str = concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../../model/seeta_fd_frontal_v1.0.bin"
);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let Some(document) = args.next() else {
        eprintln!("usage: debug_avatar_scan <document> [model]");
        std::process::exit(2);
    };
    let model = args.next().unwrap_or_else(|| DEFAULT_MODEL.to_string());

    let extractor = AvatarExtractor::new()
        .face_classifier(FaceClassifier::from_model_path(&model))
        .debug_output_dir("img");

    let report = match extractor.scan_path(&document) {
        Ok(report) => report,
        Err(err) => {
            eprintln!("{document}: {err}");
            std::process::exit(1);
        }
    };

    println!("=== {document} ({:?}, {} images) ===", report.kind, report.images.len());
    for image in &report.images {
        let page = image.page.map(|p| format!("page {p}")).unwrap_or_default();
        println!(
            "  #{:<3} {:>4}x{:<4} {:<4} score={:<3} {} {}",
            image.index,
            image.width,
            image.height,
            image.format,
            image.score,
            page,
            image.tag.as_deref().unwrap_or("-"),
        );
    }
    println!("  {} avatar candidate(s)", report.candidates().count());
}

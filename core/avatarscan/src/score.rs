//! Heuristic avatar scoring.
//!
//! Five independent signals each add a fixed weight; an image whose total
//! reaches [`AVATAR_THRESHOLD`] is an avatar candidate.

/// Added when both sides are within [`MIN_SIDE`]..=[`MAX_SIDE`].
pub const SIZE_WEIGHT: u32 = 30;
/// Added when width/height is strictly between [`MIN_RATIO`] and [`MAX_RATIO`].
pub const RATIO_WEIGHT: u32 = 20;
/// Added when the image sits below [`POSITION_FRACTION`] of the page height.
pub const POSITION_WEIGHT: u32 = 20;
/// Added when the source name contains one of [`NAME_HINTS`].
pub const NAME_WEIGHT: u32 = 15;
/// Added when at least one face is detected.
pub const FACE_WEIGHT: u32 = 60;
/// Inclusive pass mark.
pub const AVATAR_THRESHOLD: u32 = 60;

/// Smallest accepted side length in pixels.
pub const MIN_SIDE: u32 = 80;
/// Largest accepted side length in pixels.
pub const MAX_SIDE: u32 = 500;
/// Exclusive lower bound of the aspect ratio.
pub const MIN_RATIO: f32 = 0.8;
/// Exclusive upper bound of the aspect ratio.
pub const MAX_RATIO: f32 = 1.2;
/// Fraction of the page height the image must lie beyond.
pub const POSITION_FRACTION: f32 = 0.7;
/// Case-insensitive substrings of the source name.
pub const NAME_HINTS: [&str; 2] = ["avatar", "photo"];

/// One heuristic condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Side lengths within the portrait-photo range.
    Size,
    /// Roughly square.
    Ratio,
    /// Low on the page.
    Position,
    /// Source name suggests a photo.
    Name,
    /// A face was detected.
    Face,
}

impl Signal {
    /// All signals, in evaluation order.
    pub const ALL: [Signal; 5] = [
        Signal::Size,
        Signal::Ratio,
        Signal::Position,
        Signal::Name,
        Signal::Face,
    ];

    /// Score contribution when the signal fires.
    pub fn weight(self) -> u32 {
        match self {
            Signal::Size => SIZE_WEIGHT,
            Signal::Ratio => RATIO_WEIGHT,
            Signal::Position => POSITION_WEIGHT,
            Signal::Name => NAME_WEIGHT,
            Signal::Face => FACE_WEIGHT,
        }
    }

    /// Label used in diagnostic tags.
    pub fn tag(self) -> &'static str {
        match self {
            Signal::Size => "size_ok",
            Signal::Ratio => "ratio_ok",
            Signal::Position => "pos_ok",
            Signal::Name => "name_ok",
            Signal::Face => "face_ok",
        }
    }
}

/// Everything the scorer looks at for one image.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInput<'a> {
    /// Image width in pixels, 0 if unknown.
    pub width: u32,
    /// Image height in pixels, 0 if unknown.
    pub height: u32,
    /// Vertical position on the page.
    pub position_y: f32,
    /// Page height, 0 if the container has no pages.
    pub page_height: f32,
    /// Source document name.
    pub file_name: &'a str,
    /// Faces reported by the detector.
    pub faces: usize,
}

/// Outcome of scoring one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    /// Sum of fired signal weights.
    pub score: u32,
    /// Fired signals, in evaluation order.
    pub signals: Vec<Signal>,
}

impl Assessment {
    /// Whether the score reaches the threshold.
    pub fn is_avatar(&self) -> bool {
        self.score >= AVATAR_THRESHOLD
    }

    /// Diagnostic tag for positive assessments, e.g.
    /// `size_ok_ratio_ok_face_ok_score_110`.
    pub fn tag(&self) -> Option<String> {
        if !self.is_avatar() {
            return None;
        }
        let mut parts: Vec<String> = self.signals.iter().map(|s| s.tag().to_string()).collect();
        parts.push(format!("score_{}", self.score));
        Some(parts.join("_"))
    }
}

/// Evaluate every signal and sum the weights.
pub fn assess(input: &ScoreInput<'_>) -> Assessment {
    let signals: Vec<Signal> = Signal::ALL
        .into_iter()
        .filter(|signal| fires(*signal, input))
        .collect();
    let score = signals.iter().map(|s| s.weight()).sum();
    Assessment { score, signals }
}

fn fires(signal: Signal, input: &ScoreInput<'_>) -> bool {
    match signal {
        Signal::Size => {
            (MIN_SIDE..=MAX_SIDE).contains(&input.width) && (MIN_SIDE..=MAX_SIDE).contains(&input.height)
        }
        Signal::Ratio => {
            if input.height == 0 {
                return false;
            }
            let ratio = input.width as f32 / input.height as f32;
            ratio > MIN_RATIO && ratio < MAX_RATIO
        }
        Signal::Position => input.position_y > input.page_height * POSITION_FRACTION,
        Signal::Name => {
            let name = input.file_name.to_lowercase();
            NAME_HINTS.iter().any(|hint| name.contains(hint))
        }
        Signal::Face => input.faces > 0,
    }
}

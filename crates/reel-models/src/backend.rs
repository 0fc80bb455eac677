//! Generation backend identifiers and their capability tables.
//!
//! Capability tables are static data. Every consumer reads the same table
//! through [`CapabilityTable::for_backend`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::generation::GenerationSpec;
use crate::sub_resource::SubResourceKind;

/// Tolerance used when comparing durations in seconds.
const DURATION_EPSILON: f64 = 1e-6;

/// Closed set of generation provider families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BackendId {
    /// Talking-presenter / avatar videos with built-in speech.
    Presenter,
    /// Text/image-to-video cinematic shots.
    Cinematic,
    /// Short clip-based generation.
    Clip,
}

impl BackendId {
    pub const ALL: [BackendId; 3] = [BackendId::Presenter, BackendId::Cinematic, BackendId::Clip];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendId::Presenter => "presenter",
            BackendId::Cinematic => "cinematic",
            BackendId::Clip => "clip",
        }
    }

    /// Capability table for this backend.
    pub fn capabilities(&self) -> &'static CapabilityTable {
        CapabilityTable::for_backend(*self)
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BackendId {
    type Err = BackendParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "presenter" | "avatar" => Ok(BackendId::Presenter),
            "cinematic" => Ok(BackendId::Cinematic),
            "clip" => Ok(BackendId::Clip),
            _ => Err(BackendParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown backend: {0}")]
pub struct BackendParseError(String);

/// Aspect ratio specification. Serialized as `"W:H"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "String", into = "String")]
#[schemars(with = "String")]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

impl AspectRatio {
    pub const LANDSCAPE: AspectRatio = AspectRatio::new(16, 9);
    pub const PORTRAIT: AspectRatio = AspectRatio::new(9, 16);
    pub const SQUARE: AspectRatio = AspectRatio::new(1, 1);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self::LANDSCAPE
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

impl FromStr for AspectRatio {
    type Err = AspectRatioParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(':')
            .ok_or_else(|| AspectRatioParseError::InvalidFormat(s.to_string()))?;
        let width: u32 = w
            .trim()
            .parse()
            .map_err(|_| AspectRatioParseError::InvalidNumber(w.to_string()))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|_| AspectRatioParseError::InvalidNumber(h.to_string()))?;
        if width == 0 || height == 0 {
            return Err(AspectRatioParseError::ZeroValue);
        }
        Ok(AspectRatio { width, height })
    }
}

impl TryFrom<String> for AspectRatio {
    type Error = AspectRatioParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AspectRatio> for String {
    fn from(value: AspectRatio) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Error)]
pub enum AspectRatioParseError {
    #[error("Invalid aspect ratio format: {0}, expected 'W:H'")]
    InvalidFormat(String),
    #[error("Invalid number in aspect ratio: {0}")]
    InvalidNumber(String),
    #[error("Aspect ratio cannot have zero values")]
    ZeroValue,
}

/// Durations (seconds) a backend accepts for a video.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DurationDomain {
    /// Only these exact values, ascending.
    Set { values: &'static [f64] },
    /// Any value in `[min, max]`.
    Range { min: f64, max: f64 },
}

impl DurationDomain {
    pub fn contains(&self, secs: f64) -> bool {
        match self {
            DurationDomain::Set { values } => values
                .iter()
                .any(|v| (v - secs).abs() < DURATION_EPSILON),
            DurationDomain::Range { min, max } => {
                secs >= min - DURATION_EPSILON && secs <= max + DURATION_EPSILON
            }
        }
    }

    /// Nearest valid duration. Ties resolve to the lower value.
    pub fn nearest(&self, secs: f64) -> f64 {
        match self {
            DurationDomain::Set { values } => {
                let mut best = values[0];
                for &v in values.iter().skip(1) {
                    if (v - secs).abs() + DURATION_EPSILON < (best - secs).abs() {
                        best = v;
                    }
                }
                best
            }
            DurationDomain::Range { min, max } => secs.clamp(*min, *max),
        }
    }

    /// Check a requested duration, snapping it when the nearest valid value
    /// lies within `threshold` seconds.
    pub fn check(&self, secs: f64, threshold: f64) -> DurationCheck {
        if self.contains(secs) {
            return DurationCheck::Valid(secs);
        }
        let nearest = self.nearest(secs);
        if (nearest - secs).abs() <= threshold + DURATION_EPSILON {
            DurationCheck::Corrected {
                requested: secs,
                corrected: nearest,
            }
        } else {
            DurationCheck::NeedsReview {
                requested: secs,
                nearest,
            }
        }
    }
}

impl fmt::Display for DurationDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DurationDomain::Set { values } => {
                let parts: Vec<String> = values.iter().map(|v| format!("{}s", v)).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            DurationDomain::Range { min, max } => write!(f, "[{}s, {}s]", min, max),
        }
    }
}

/// Outcome of checking a duration against a [`DurationDomain`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DurationCheck {
    Valid(f64),
    Corrected { requested: f64, corrected: f64 },
    NeedsReview { requested: f64, nearest: f64 },
}

impl DurationCheck {
    /// Duration to store on the scene.
    pub fn duration(&self) -> f64 {
        match self {
            DurationCheck::Valid(d) => *d,
            DurationCheck::Corrected { corrected, .. } => *corrected,
            DurationCheck::NeedsReview { requested, .. } => *requested,
        }
    }
}

/// Credits charged per completed sub-resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CreditCosts {
    pub preview: u32,
    pub video: u32,
    pub audio: u32,
}

/// Declared capabilities of one backend family.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityTable {
    pub backend: BackendId,
    pub durations: DurationDomain,
    pub aspect_ratios: &'static [AspectRatio],
    pub reference_image_slots: usize,
    /// Can produce a standalone narration track.
    pub supports_audio: bool,
    /// Video output already carries the spoken narration.
    pub native_speech: bool,
    pub kinds: &'static [SubResourceKind],
    pub costs: CreditCosts,
}

static PRESENTER: CapabilityTable = CapabilityTable {
    backend: BackendId::Presenter,
    durations: DurationDomain::Range { min: 2.0, max: 60.0 },
    aspect_ratios: &[AspectRatio::LANDSCAPE, AspectRatio::PORTRAIT, AspectRatio::SQUARE],
    reference_image_slots: 1,
    supports_audio: true,
    native_speech: true,
    kinds: &[SubResourceKind::Video, SubResourceKind::Audio],
    costs: CreditCosts { preview: 0, video: 20, audio: 2 },
};

static CINEMATIC: CapabilityTable = CapabilityTable {
    backend: BackendId::Cinematic,
    durations: DurationDomain::Set { values: &[4.0, 8.0, 12.0] },
    aspect_ratios: &[AspectRatio::LANDSCAPE, AspectRatio::PORTRAIT, AspectRatio::SQUARE],
    reference_image_slots: 2,
    supports_audio: false,
    native_speech: false,
    kinds: &[SubResourceKind::Preview, SubResourceKind::Video],
    costs: CreditCosts { preview: 1, video: 30, audio: 0 },
};

static CLIP: CapabilityTable = CapabilityTable {
    backend: BackendId::Clip,
    durations: DurationDomain::Set { values: &[5.0, 10.0] },
    aspect_ratios: &[AspectRatio::LANDSCAPE, AspectRatio::PORTRAIT],
    reference_image_slots: 0,
    supports_audio: false,
    native_speech: false,
    kinds: &[SubResourceKind::Preview, SubResourceKind::Video],
    costs: CreditCosts { preview: 1, video: 10, audio: 0 },
};

impl CapabilityTable {
    pub fn for_backend(backend: BackendId) -> &'static CapabilityTable {
        match backend {
            BackendId::Presenter => &PRESENTER,
            BackendId::Cinematic => &CINEMATIC,
            BackendId::Clip => &CLIP,
        }
    }

    pub fn supports_kind(&self, kind: SubResourceKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Credits charged when a sub-resource of `kind` completes.
    pub fn cost(&self, kind: SubResourceKind) -> u32 {
        match kind {
            SubResourceKind::Preview => self.costs.preview,
            SubResourceKind::Video => self.costs.video,
            SubResourceKind::Audio => self.costs.audio,
            SubResourceKind::Final => 0,
        }
    }

    /// Validate a spec before any remote call.
    pub fn validate(&self, spec: &GenerationSpec) -> Result<(), CapabilityViolation> {
        if !self.supports_kind(spec.kind) {
            return Err(CapabilityViolation::UnsupportedKind {
                backend: self.backend,
                kind: spec.kind,
            });
        }

        if spec.kind == SubResourceKind::Video && !self.durations.contains(spec.duration_secs) {
            return Err(CapabilityViolation::DurationOutOfDomain {
                backend: self.backend,
                duration: spec.duration_secs,
                domain: self.durations.to_string(),
            });
        }

        if spec.kind != SubResourceKind::Audio && !self.aspect_ratios.contains(&spec.aspect_ratio) {
            return Err(CapabilityViolation::UnsupportedAspectRatio {
                backend: self.backend,
                aspect_ratio: spec.aspect_ratio,
            });
        }

        if spec.reference_images.len() > self.reference_image_slots {
            return Err(CapabilityViolation::TooManyReferenceImages {
                backend: self.backend,
                given: spec.reference_images.len(),
                max: self.reference_image_slots,
            });
        }

        let wants_audio = spec.kind == SubResourceKind::Audio || spec.with_audio;
        let has_audio = match spec.kind {
            SubResourceKind::Audio => self.supports_audio,
            _ => self.native_speech,
        };
        if wants_audio && !has_audio {
            return Err(CapabilityViolation::AudioUnsupported {
                backend: self.backend,
            });
        }

        Ok(())
    }
}

/// A spec that falls outside a backend's declared capabilities.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CapabilityViolation {
    #[error("{backend} cannot generate {kind}")]
    UnsupportedKind { backend: BackendId, kind: SubResourceKind },

    #[error("{backend} does not accept a {duration}s video (allowed: {domain})")]
    DurationOutOfDomain {
        backend: BackendId,
        duration: f64,
        domain: String,
    },

    #[error("{backend} does not support aspect ratio {aspect_ratio}")]
    UnsupportedAspectRatio {
        backend: BackendId,
        aspect_ratio: AspectRatio,
    },

    #[error("{backend} accepts at most {max} reference images, got {given}")]
    TooManyReferenceImages {
        backend: BackendId,
        given: usize,
        max: usize,
    },

    #[error("{backend} cannot produce audio")]
    AudioUnsupported { backend: BackendId },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_spec(duration: f64) -> GenerationSpec {
        GenerationSpec {
            kind: SubResourceKind::Video,
            prompt: "a lighthouse at dusk".to_string(),
            narration: None,
            duration_secs: duration,
            aspect_ratio: AspectRatio::LANDSCAPE,
            reference_images: vec![],
            voice: None,
            with_audio: false,
            extra: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("cinematic".parse::<BackendId>().unwrap(), BackendId::Cinematic);
        assert_eq!("Avatar".parse::<BackendId>().unwrap(), BackendId::Presenter);
        assert!("sora".parse::<BackendId>().is_err());
    }

    #[test]
    fn test_aspect_ratio_serde() {
        let json = serde_json::to_string(&AspectRatio::PORTRAIT).unwrap();
        assert_eq!(json, "\"9:16\"");
        let parsed: AspectRatio = serde_json::from_str("\"1:1\"").unwrap();
        assert_eq!(parsed, AspectRatio::SQUARE);
        assert!(serde_json::from_str::<AspectRatio>("\"0:1\"").is_err());
    }

    #[test]
    fn test_set_domain_snaps_tie_to_lower() {
        let domain = DurationDomain::Set { values: &[4.0, 8.0, 12.0] };
        assert_eq!(domain.nearest(6.0), 4.0);
        assert_eq!(domain.nearest(7.0), 8.0);
        assert_eq!(domain.nearest(100.0), 12.0);
    }

    #[test]
    fn test_domain_check() {
        let domain = DurationDomain::Set { values: &[4.0, 8.0, 12.0] };
        assert_eq!(domain.check(8.0, 2.0), DurationCheck::Valid(8.0));
        assert_eq!(
            domain.check(6.0, 2.0),
            DurationCheck::Corrected { requested: 6.0, corrected: 4.0 }
        );
        assert_eq!(
            domain.check(20.0, 2.0),
            DurationCheck::NeedsReview { requested: 20.0, nearest: 12.0 }
        );
    }

    #[test]
    fn test_range_domain() {
        let domain = DurationDomain::Range { min: 2.0, max: 60.0 };
        assert!(domain.contains(2.0));
        assert!(domain.contains(33.3));
        assert!(!domain.contains(61.0));
        assert_eq!(domain.nearest(1.0), 2.0);
    }

    #[test]
    fn test_validate_accepts_supported_spec() {
        let table = BackendId::Cinematic.capabilities();
        assert!(table.validate(&video_spec(8.0)).is_ok());
    }

    #[test]
    fn test_validate_rejects_duration() {
        let table = BackendId::Cinematic.capabilities();
        let err = table.validate(&video_spec(6.0)).unwrap_err();
        assert!(matches!(err, CapabilityViolation::DurationOutOfDomain { .. }));
    }

    #[test]
    fn test_validate_rejects_kind_and_audio() {
        let clip = BackendId::Clip.capabilities();
        let mut spec = video_spec(5.0);
        spec.kind = SubResourceKind::Audio;
        assert!(matches!(
            clip.validate(&spec),
            Err(CapabilityViolation::UnsupportedKind { .. })
        ));

        let mut spec = video_spec(5.0);
        spec.with_audio = true;
        assert!(matches!(
            clip.validate(&spec),
            Err(CapabilityViolation::AudioUnsupported { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_reference_images() {
        let clip = BackendId::Clip.capabilities();
        let mut spec = video_spec(5.0);
        spec.reference_images = vec!["https://example.com/a.png".to_string()];
        assert!(matches!(
            clip.validate(&spec),
            Err(CapabilityViolation::TooManyReferenceImages { given: 1, max: 0, .. })
        ));
    }

    #[test]
    fn test_preview_ignores_duration_domain() {
        let table = BackendId::Cinematic.capabilities();
        let mut spec = video_spec(6.0);
        spec.kind = SubResourceKind::Preview;
        assert!(table.validate(&spec).is_ok());
    }
}

use crate::detection::{DetectionCandidate, ScoreBreakdown, ScoredDetection};

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

const NEUTRAL: f32 = 0.5;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ScorerConfig {
    pub template_weight: f32,
    pub motion_weight: f32,
    pub brightness_weight: f32,
    pub prediction_weight: f32,
    pub size_weight: f32,
    pub min_confidence: f32,
    pub radius_smoothing: f32,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            template_weight: 0.25,
            motion_weight: 0.20,
            brightness_weight: 0.15,
            prediction_weight: 0.25,
            size_weight: 0.15,
            min_confidence: 0.4,
            radius_smoothing: 0.7,
        }
    }
}

pub fn brightness_score(brightness: f32) -> f32 {
    let b = brightness.max(0.0);

    let score = if b < 100.0 {
        0.3 * b / 100.0
    } else if b < 150.0 {
        0.3 + 0.2 * (b - 100.0) / 50.0
    } else if b < 200.0 {
        0.5 + 0.5 * (b - 150.0) / 50.0
    } else {
        1.0
    };

    score.clamp(0.0, 1.0)
}

pub fn prediction_score(distance: f32, uncertainty: f32) -> f32 {
    let u = if uncertainty > 0.0 { uncertainty } else { 1.0 };

    let score = if distance <= u {
        1.0 - 0.3 * (distance / u)
    } else {
        0.7 - (distance - u) / (2.0 * u)
    };

    score.clamp(0.0, 1.0)
}

pub fn size_score(radius: f32, expected: Option<f32>) -> f32 {
    let expected = match expected {
        Some(e) if e > 0.0 => e,
        _ => return NEUTRAL,
    };

    let rel = (1.0 - radius / expected).abs();

    let score = if rel <= 0.3 {
        1.0 - rel
    } else {
        0.7 - 2.0 * (rel - 0.3)
    };

    score.clamp(0.0, 1.0)
}

/// Agreement between the step `from -> to` and the current velocity,
/// `(cos + 1) / 2`. Neutral `1.0` while either vector is too short to
/// have a direction.
pub fn direction_score(velocity: na::Vector2<f32>, from: na::Point2<f32>, to: na::Point2<f32>) -> f32 {
    let step = to - from;
    let (vn, sn) = (velocity.norm(), step.norm());

    if vn < 1e-3 || sn < 1e-3 {
        return 1.0;
    }

    ((velocity.dot(&step) / (vn * sn) + 1.0) * 0.5).clamp(0.0, 1.0)
}

pub struct DetectionScorer {
    config: ScorerConfig,
    expected_radius: Option<f32>,
}

impl DetectionScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self {
            config,
            expected_radius: None,
        }
    }

    pub fn with_expected_radius(mut self, radius: f32) -> Self {
        self.expected_radius = Some(radius);
        self
    }

    #[inline]
    pub fn expected_radius(&self) -> Option<f32> {
        self.expected_radius
    }

    pub fn min_confidence(&self) -> f32 {
        self.config.min_confidence
    }

    pub fn score(
        &self,
        candidates: &[DetectionCandidate],
        predicted: Option<na::Point2<f32>>,
        uncertainty: f32,
        expected_radius: Option<f32>,
    ) -> Vec<ScoredDetection> {
        let expected_radius = expected_radius.or(self.expected_radius);
        let cfg = &self.config;

        let mut scored: Vec<ScoredDetection> = candidates
            .iter()
            .map(|c| {
                let prediction = match predicted {
                    Some(p) => prediction_score(na::distance(&p, &c.position()), uncertainty),
                    None => NEUTRAL,
                };

                let breakdown = ScoreBreakdown {
                    template: c.appearance_score.clamp(0.0, 1.0),
                    motion: c.motion_score.clamp(0.0, 1.0),
                    brightness: brightness_score(c.brightness),
                    prediction,
                    size: size_score(c.radius, expected_radius),
                };

                let confidence = cfg.template_weight * breakdown.template
                    + cfg.motion_weight * breakdown.motion
                    + cfg.brightness_weight * breakdown.brightness
                    + cfg.prediction_weight * breakdown.prediction
                    + cfg.size_weight * breakdown.size;

                ScoredDetection {
                    candidate: *c,
                    confidence: confidence.clamp(0.0, 1.0),
                    breakdown,
                    selected: false,
                }
            })
            .collect();

        scored.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        scored
    }

    pub fn select_best(&self, scored: &[ScoredDetection]) -> Option<ScoredDetection> {
        let best = scored
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))?;

        if best.confidence >= self.config.min_confidence {
            let mut best = *best;
            best.selected = true;
            Some(best)
        } else {
            None
        }
    }

    pub fn update_tracking_state(&mut self, selected: &ScoredDetection) {
        let r = selected.radius();
        if !(r > 0.0) {
            return;
        }

        let keep = self.config.radius_smoothing;

        self.expected_radius = Some(match self.expected_radius {
            Some(prev) => keep * prev + (1.0 - keep) * r,
            None => r,
        });
    }
}

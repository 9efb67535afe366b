use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CandidateSource {
    Template,
    Motion,
    Blob,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct DetectionCandidate {
    pub x: f32,
    pub y: f32,
    #[serde(rename = "r")]
    pub radius: f32,
    pub brightness: f32,
    #[serde(rename = "appearance")]
    pub appearance_score: f32,
    #[serde(rename = "motion")]
    pub motion_score: f32,
    #[serde(rename = "color")]
    pub color_score: Option<f32>,
    pub source: CandidateSource,
}

impl DetectionCandidate {
    #[inline(always)]
    pub fn position(&self) -> na::Point2<f32> {
        na::Point2::new(self.x, self.y)
    }

    pub fn distance(&self, other: &DetectionCandidate) -> f32 {
        na::distance(&self.position(), &other.position())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct ScoreBreakdown {
    pub template: f32,
    pub motion: f32,
    pub brightness: f32,
    pub prediction: f32,
    pub size: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct ScoredDetection {
    pub candidate: DetectionCandidate,
    pub confidence: f32,
    pub breakdown: ScoreBreakdown,
    pub selected: bool,
}

impl ScoredDetection {
    #[inline(always)]
    pub fn x(&self) -> f32 {
        self.candidate.x
    }

    #[inline(always)]
    pub fn y(&self) -> f32 {
        self.candidate.y
    }

    #[inline(always)]
    pub fn radius(&self) -> f32 {
        self.candidate.radius
    }

    #[inline(always)]
    pub fn position(&self) -> na::Point2<f32> {
        self.candidate.position()
    }
}

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TemplateFailure {
    RegionTooSmall,
    BoundaryClipped,
    NotEnoughSamples,
    FlatTemplate,
}

impl TemplateFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateFailure::RegionTooSmall => "region too small",
            TemplateFailure::BoundaryClipped => "region clipped by frame boundary",
            TemplateFailure::NotEnoughSamples => "not enough pixel samples",
            TemplateFailure::FlatTemplate => "template has no texture",
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("insufficient data: {found} points, {required} required")]
    InsufficientData { found: usize, required: usize },

    #[error("template unavailable: {}", .0.as_str())]
    TemplateUnavailable(TemplateFailure),

    #[error("search region is empty")]
    InvalidRegion,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

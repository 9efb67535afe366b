use crate::candidates::CandidateConfig;
use crate::error::Error;
use crate::estimator::EstimatorConfig;
use crate::flow::FlowConfig;
use crate::generator::GeneratorConfig;
use crate::matcher::MatcherConfig;
use crate::scorer::ScorerConfig;
use crate::search::SearchConfig;
use crate::trajectory::AssemblerConfig;

use serde_derive::{Deserialize, Serialize};

/// Settings for one shot-tracking session. Every field has a default, so a
/// partial JSON document only overrides what it names.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TrackerConfig {
    pub fps: f32,
    pub initial_radius: f32,
    pub max_track_secs: f32,
    pub max_consecutive_misses: usize,
    pub template_padding: f32,

    pub matcher: MatcherConfig,
    pub flow: FlowConfig,
    pub estimator: EstimatorConfig,
    pub scorer: ScorerConfig,
    pub search: SearchConfig,
    pub candidates: CandidateConfig,
    pub assembler: AssemblerConfig,
    pub generator: GeneratorConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            fps: 30.0,
            initial_radius: 8.0,
            max_track_secs: 6.0,
            max_consecutive_misses: 10,
            template_padding: 1.5,
            matcher: Default::default(),
            flow: Default::default(),
            estimator: Default::default(),
            scorer: Default::default(),
            search: Default::default(),
            candidates: Default::default(),
            assembler: Default::default(),
            generator: Default::default(),
        }
    }
}

impl TrackerConfig {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;

        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !(self.fps > 0.0) {
            return Err(Error::InvalidInput(format!("fps must be positive, got {}", self.fps)));
        }

        if !(self.initial_radius > 0.0) {
            return Err(Error::InvalidInput("initial_radius must be positive".into()));
        }

        if self.matcher.min_scale > self.matcher.max_scale {
            return Err(Error::InvalidInput("matcher.min_scale exceeds matcher.max_scale".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = TrackerConfig::from_json(r#"{"fps": 60, "scorer": {"min_confidence": 0.5}}"#).unwrap();

        assert_eq!(config.fps, 60.0);
        assert_eq!(config.scorer.min_confidence, 0.5);
        assert_eq!(config.scorer.template_weight, 0.25);
        assert_eq!(config.assembler.min_points, 6);
        assert_eq!(config.matcher.num_scales, 13);
    }

    #[test]
    fn round_trips_through_json() {
        let json = TrackerConfig::default().to_json().unwrap();
        let back = TrackerConfig::from_json(&json).unwrap();

        assert_eq!(back.max_consecutive_misses, 10);
        assert_eq!(back.search.path_window_end, 80.0);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(TrackerConfig::from_json("{"), Err(Error::Config(_))));
        assert!(matches!(
            TrackerConfig::from_json(r#"{"fps": 0}"#),
            Err(Error::InvalidInput(_))
        ));
    }
}

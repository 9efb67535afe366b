use serde_derive::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShotShape {
    Hook,
    Draw,
    #[default]
    Straight,
    Fade,
    Slice,
}

impl ShotShape {
    pub fn curve_factor(&self) -> f32 {
        match self {
            ShotShape::Hook => -1.0,
            ShotShape::Draw => -0.5,
            ShotShape::Straight => 0.0,
            ShotShape::Fade => 0.5,
            ShotShape::Slice => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShotShape::Hook => "hook",
            ShotShape::Draw => "draw",
            ShotShape::Straight => "straight",
            ShotShape::Fade => "fade",
            ShotShape::Slice => "slice",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShotHeight {
    Low,
    #[default]
    Medium,
    High,
}

impl ShotHeight {
    /// Flight time in seconds.
    pub fn flight_duration(&self) -> f32 {
        match self {
            ShotHeight::Low => 3.0,
            ShotHeight::Medium => 4.5,
            ShotHeight::High => 6.0,
        }
    }

    pub fn apex_rise(&self) -> f32 {
        match self {
            ShotHeight::Low => 0.15,
            ShotHeight::Medium => 0.25,
            ShotHeight::High => 0.35,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShotHeight::Low => "low",
            ShotHeight::Medium => "medium",
            ShotHeight::High => "high",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StartingLine {
    Left,
    #[default]
    Center,
    Right,
}

impl StartingLine {
    pub fn direction(&self) -> f32 {
        match self {
            StartingLine::Left => -1.0,
            StartingLine::Center => 0.0,
            StartingLine::Right => 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_follow_height() {
        assert_eq!(ShotHeight::Low.flight_duration(), 3.0);
        assert_eq!(ShotHeight::Medium.flight_duration(), 4.5);
        assert_eq!(ShotHeight::High.flight_duration(), 6.0);
    }

    #[test]
    fn shapes_deserialize_lowercase() {
        let shape: ShotShape = serde_json::from_str("\"slice\"").unwrap();
        assert_eq!(shape, ShotShape::Slice);
        assert!(ShotShape::Hook.curve_factor() < ShotShape::Draw.curve_factor());
    }
}

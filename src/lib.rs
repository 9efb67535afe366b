pub mod candidates;
pub mod color;
pub mod config;
pub mod detection;
pub mod error;
pub mod estimator;
pub mod events;
pub mod flow;
pub mod frame;
pub mod generator;
pub mod math;
pub mod matcher;
pub mod region;
pub mod scorer;
pub mod search;
pub mod session;
pub mod shot;
pub mod trajectory;

pub use config::TrackerConfig;
pub use detection::{DetectionCandidate, ScoredDetection};
pub use error::Error;
pub use events::{ChannelObserver, Notifier, TrackingEvent, TrackingObserver, WarningCode};
pub use frame::Frame;
pub use generator::{GenerationRequest, TrajectoryGenerator};
pub use region::Region;
pub use session::{track_shot, ShotInput, ShotResult, ShotTracker};
pub use shot::{ShotHeight, ShotShape, StartingLine};
pub use trajectory::{Trajectory, TrajectoryAssembler, TrajectoryMethod, TrajectoryPoint};

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;

use serde_derive::{Deserialize, Serialize};
use tracing::warn;

pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    EarlyBallDetectionFailed,
    TemplateUnavailable,
    SearchExhausted,
    InsufficientDetections,
    TrackingLost,
}

impl WarningCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningCode::EarlyBallDetectionFailed => "early_ball_detection_failed",
            WarningCode::TemplateUnavailable => "template_unavailable",
            WarningCode::SearchExhausted => "search_exhausted",
            WarningCode::InsufficientDetections => "insufficient_detections",
            WarningCode::TrackingLost => "tracking_lost",
        }
    }
}

impl std::fmt::Display for WarningCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackingEvent {
    Progress { percent: f32, message: String },
    Warning { code: WarningCode, message: String },
}

pub trait TrackingObserver {
    fn on_progress(&self, _percent: f32, _message: &str) -> Result<(), ObserverError> {
        Ok(())
    }

    fn on_warning(&self, _code: WarningCode, _message: &str) -> Result<(), ObserverError> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TrackingObserver for NoopObserver {}

/// Forwards events over a channel. A dropped receiver surfaces as an
/// observer error, which the notifier logs and ignores.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::Sender<TrackingEvent>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::Sender<TrackingEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::Receiver<TrackingEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl TrackingObserver for ChannelObserver {
    fn on_progress(&self, percent: f32, message: &str) -> Result<(), ObserverError> {
        self.tx.send(TrackingEvent::Progress {
            percent,
            message: message.to_owned(),
        })?;

        Ok(())
    }

    fn on_warning(&self, code: WarningCode, message: &str) -> Result<(), ObserverError> {
        self.tx.send(TrackingEvent::Warning {
            code,
            message: message.to_owned(),
        })?;

        Ok(())
    }
}

#[derive(Clone, Copy)]
pub struct Notifier<'a> {
    observer: &'a dyn TrackingObserver,
}

impl<'a> Notifier<'a> {
    pub fn new(observer: &'a dyn TrackingObserver) -> Self {
        Self { observer }
    }

    pub fn progress(&self, percent: f32, message: &str) {
        let percent = percent.clamp(0.0, 100.0);
        let observer = self.observer;

        match panic::catch_unwind(AssertUnwindSafe(|| observer.on_progress(percent, message))) {
            Ok(Ok(())) => (),
            Ok(Err(err)) => warn!(%err, "progress observer failed"),
            Err(_) => warn!("progress observer panicked"),
        }
    }

    pub fn warning(&self, code: WarningCode, message: &str) {
        let observer = self.observer;

        match panic::catch_unwind(AssertUnwindSafe(|| observer.on_warning(code, message))) {
            Ok(Ok(())) => (),
            Ok(Err(err)) => warn!(%err, code = code.as_str(), "warning observer failed"),
            Err(_) => warn!(code = code.as_str(), "warning observer panicked"),
        }
    }
}

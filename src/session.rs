use crate::candidates::{CandidateGenerator, Cues, FrameView};
use crate::color::ColorTemplate;
use crate::config::TrackerConfig;
use crate::error::{Error, TemplateFailure};
use crate::estimator::{EstimatorConfig, MotionEstimator};
use crate::events::{Notifier, TrackingObserver, WarningCode};
use crate::flow::OpticalFlowTracker;
use crate::frame::Frame;
use crate::generator::{GenerationRequest, TrajectoryGenerator};
use crate::matcher::MultiScaleMatcher;
use crate::region::Region;
use crate::scorer::{self, DetectionScorer};
use crate::search::{PathConstraints, SearchExpansion, SearchState};
use crate::shot::{ShotHeight, ShotShape, StartingLine};
use crate::trajectory::{self, Trajectory, TrajectoryAssembler};

use image::{imageops, GrayImage};
use nalgebra as na;
use tracing::{debug, info, info_span, warn};

/// Everything the surrounding system knows about a shot. Points are in
/// pixels, or normalized when both coordinates are at most 1.
pub struct ShotInput<'a> {
    pub frames: &'a [Frame],
    pub strike_time: f32,
    pub origin: na::Point2<f32>,
    pub landing: Option<na::Point2<f32>>,
    pub apex: Option<na::Point2<f32>>,
    pub shape: ShotShape,
    pub height: ShotHeight,
    pub starting_line: StartingLine,
    pub frame_width: u32,
    pub frame_height: u32,
    pub skip_tracking: bool,
}

impl<'a> ShotInput<'a> {
    pub fn new(frames: &'a [Frame], strike_time: f32, origin: na::Point2<f32>, frame_width: u32, frame_height: u32) -> Self {
        Self {
            frames,
            strike_time,
            origin,
            landing: None,
            apex: None,
            shape: ShotShape::default(),
            height: ShotHeight::default(),
            starting_line: StartingLine::default(),
            frame_width,
            frame_height,
            skip_tracking: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShotResult {
    pub trajectory: Trajectory,
    pub frames_processed: usize,
    pub detections: usize,
    pub gaps: usize,
    pub fallback: bool,
    pub warnings: Vec<WarningCode>,
}

fn to_pixels(p: na::Point2<f32>, frame_width: u32, frame_height: u32) -> na::Point2<f32> {
    if trajectory::is_normalized(p.x, p.y) {
        na::Point2::new(p.x * frame_width as f32, p.y * frame_height as f32)
    } else {
        p
    }
}

fn to_normalized(p: na::Point2<f32>, frame_width: u32, frame_height: u32) -> na::Point2<f32> {
    na::Point2::new(
        (p.x / frame_width as f32).clamp(0.0, 1.0),
        (p.y / frame_height as f32).clamp(0.0, 1.0),
    )
}

enum FrameOutcome {
    Accepted { x: f32, y: f32, radius: f32, confidence: f32 },
    Rejected,
    Exhausted,
}

pub struct ShotTracker<'o> {
    config: TrackerConfig,
    notifier: Notifier<'o>,
    matcher: MultiScaleMatcher,
    flow: OpticalFlowTracker,
    estimator: MotionEstimator,
    scorer: DetectionScorer,
    candidates: CandidateGenerator,
    generator: TrajectoryGenerator,
    color: Option<ColorTemplate>,
    warnings: Vec<WarningCode>,
}

impl<'o> ShotTracker<'o> {
    pub fn new(config: TrackerConfig, observer: &'o dyn TrackingObserver) -> Self {
        let estimator = MotionEstimator::new(EstimatorConfig {
            fps: config.fps,
            ..config.estimator.clone()
        });

        Self {
            notifier: Notifier::new(observer),
            matcher: MultiScaleMatcher::new(config.matcher.clone()),
            flow: OpticalFlowTracker::new(config.flow.clone()),
            scorer: DetectionScorer::new(config.scorer.clone()).with_expected_radius(config.initial_radius),
            candidates: CandidateGenerator::new(config.candidates.clone()),
            generator: TrajectoryGenerator::new(config.generator.clone()),
            color: None,
            warnings: Vec::new(),
            estimator,
            config,
        }
    }

    fn warn(&mut self, code: WarningCode, message: &str) {
        if !self.warnings.contains(&code) {
            self.warnings.push(code);
        }

        self.notifier.warning(code, message);
    }

    fn learn_ball(&mut self, frame: &Frame, gray: &GrayImage, origin: na::Point2<f32>) -> bool {
        let radius = self.config.initial_radius;

        match ColorTemplate::extract(&frame.image, origin, radius) {
            Ok(t) => {
                debug!(family = t.family.as_str(), hue = t.hue, value = t.value, "color template");
                self.color = Some(t);
            }
            Err(err) => {
                warn!(%err, "color template unavailable");
                self.warn(WarningCode::TemplateUnavailable, &err.to_string());
            }
        }

        match self.appearance_patch(gray, origin) {
            Ok(patch) => {
                let levels = self.matcher.prepare(&patch);
                self.matcher.set_base_radius(radius);

                if levels == 0 {
                    let err = Error::TemplateUnavailable(TemplateFailure::FlatTemplate);
                    warn!(%err, "appearance template unavailable");
                    self.warn(WarningCode::TemplateUnavailable, &err.to_string());
                }
            }
            Err(err) => {
                warn!(%err, "appearance template unavailable");
                self.warn(WarningCode::TemplateUnavailable, &err.to_string());
            }
        }

        if !self.flow.initialize(gray, origin, radius) {
            debug!("optical flow has nothing to follow at the origin");
        }

        self.color.is_some() || self.matcher.is_prepared()
    }

    fn appearance_patch(&self, gray: &GrayImage, origin: na::Point2<f32>) -> Result<GrayImage, Error> {
        let side = (2.0 * self.config.initial_radius * self.config.template_padding).round();
        if side < 3.0 {
            return Err(Error::TemplateUnavailable(TemplateFailure::RegionTooSmall));
        }

        let patch = Region::from_center(origin.x, origin.y, side, side);
        let (w, h) = gray.dimensions();

        if patch.left() < 0.0 || patch.top() < 0.0 || patch.right() > w as f32 || patch.bottom() > h as f32 {
            return Err(Error::TemplateUnavailable(TemplateFailure::BoundaryClipped));
        }

        let (x0, y0, _, _) = patch.pixel_bounds();
        let side = side as u32;

        Ok(imageops::crop_imm(gray, x0, y0, side.min(w - x0), side.min(h - y0)).to_image())
    }

    /// Runs the shot. Falls back to a generated path when tracking is
    /// skipped or yields too few points.
    pub fn track(mut self, input: &ShotInput<'_>) -> Result<ShotResult, Error> {
        let (fw, fh) = (input.frame_width, input.frame_height);
        if fw == 0 || fh == 0 {
            return Err(Error::InvalidInput("frame dimensions must be non-zero".into()));
        }

        let span = info_span!("track_shot", frames = input.frames.len(), strike_time = input.strike_time);
        let _enter = span.enter();

        let origin = to_pixels(input.origin, fw, fh);
        let constraints = PathConstraints {
            origin,
            apex: input.apex.map(|p| to_pixels(p, fw, fh)),
            landing: input.landing.map(|p| to_pixels(p, fw, fh)),
            shape: input.shape,
            height: input.height,
            starting_line: input.starting_line,
        };

        self.notifier.progress(0.0, "starting shot");

        if input.skip_tracking {
            info!("tracking skipped, generating trajectory");
            return self.fallback(input, &constraints, false, 0, 0, 0);
        }

        let pre_strike = input
            .frames
            .iter()
            .filter(|f| f.timestamp <= input.strike_time && f.dims() == (fw, fh))
            .last();

        let mut previous = None;
        let ball_seen = match pre_strike {
            Some(frame) => {
                let gray = frame.gray();
                let seen = self.learn_ball(frame, &gray, origin);
                previous = Some(gray);
                seen
            }
            None => {
                warn!("no frame before the strike to learn the ball from");
                self.warn(WarningCode::TemplateUnavailable, "no frame before the strike");
                false
            }
        };

        // the tracker works in pixels, the assembler is fed normalized points
        let mut assembler = TrajectoryAssembler::new(self.config.assembler.clone(), fw, fh);
        let anchor = to_normalized(origin, fw, fh);
        assembler.anchor(input.strike_time, anchor.x, anchor.y);
        self.estimator.initialize(origin.x, origin.y, None);

        let expansion = SearchExpansion::new(self.config.search.clone(), origin, fw, fh);

        let window_end = input.strike_time + self.config.max_track_secs;
        let flight: Vec<&Frame> = input
            .frames
            .iter()
            .filter(|f| f.timestamp > input.strike_time && f.timestamp <= window_end)
            .collect();

        let mut last_pos = origin;
        let mut accepted = 0usize;
        let mut misses = 0usize;
        let mut processed = 0usize;

        for (i, frame) in flight.iter().enumerate() {
            if frame.dims() != (fw, fh) {
                warn!(index = frame.index, "frame size differs from shot, skipped");
                continue;
            }

            let elapsed = frame.timestamp - input.strike_time;
            let gray = frame.gray();

            let outcome = self.search_frame(
                frame,
                &gray,
                previous.as_ref(),
                elapsed,
                &expansion,
                &constraints,
                last_pos,
                accepted > 0,
            );
            processed += 1;

            match outcome {
                FrameOutcome::Accepted {
                    x,
                    y,
                    radius,
                    confidence,
                } => {
                    let p = to_normalized(na::Point2::new(x, y), fw, fh);
                    assembler.push_detection(frame.index, frame.timestamp, p.x, p.y, confidence);
                    last_pos = na::Point2::new(x, y);
                    accepted += 1;
                    misses = 0;

                    self.flow.initialize(&gray, last_pos, radius);
                }
                FrameOutcome::Rejected => {
                    debug!(index = frame.index, elapsed, "no plausible detection");

                    self.estimator.update_no_measurement();
                    assembler.push_gap(frame.index, frame.timestamp);
                    misses += 1;
                }
                FrameOutcome::Exhausted => {
                    warn!(index = frame.index, elapsed, "search exhausted at every level");

                    if !self.warnings.contains(&WarningCode::SearchExhausted) {
                        self.warn(
                            WarningCode::SearchExhausted,
                            &format!("no ball candidates from frame {}", frame.index),
                        );
                    }

                    self.estimator.update_no_measurement();
                    assembler.push_gap(frame.index, frame.timestamp);
                    misses += 1;
                }
            }

            self.notifier.progress(
                5.0 + 85.0 * (i + 1) as f32 / flight.len() as f32,
                &format!("tracked frame {}/{}", i + 1, flight.len()),
            );

            previous = Some(gray);

            if misses >= self.config.max_consecutive_misses {
                warn!(misses, "ball lost, tracking stopped");
                self.warn(
                    WarningCode::TrackingLost,
                    &format!("ball lost after {} missed frames", misses),
                );
                break;
            }
        }

        info!(processed, accepted, gaps = assembler.gaps(), "tracking finished");

        match assembler.assemble() {
            Some(trajectory) => {
                self.notifier.progress(100.0, "trajectory assembled");

                Ok(ShotResult {
                    trajectory,
                    frames_processed: processed,
                    detections: accepted,
                    gaps: assembler.gaps(),
                    fallback: false,
                    warnings: self.warnings,
                })
            }
            None => {
                let err = Error::InsufficientData {
                    found: assembler.detections(),
                    required: self.config.assembler.min_points,
                };
                warn!(%err, "falling back to generated trajectory");
                self.warn(WarningCode::InsufficientDetections, &err.to_string());

                self.fallback(input, &constraints, !ball_seen, processed, accepted, assembler.gaps())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn search_frame(
        &mut self,
        frame: &Frame,
        gray: &GrayImage,
        previous: Option<&GrayImage>,
        elapsed: f32,
        expansion: &SearchExpansion,
        constraints: &PathConstraints,
        last_pos: na::Point2<f32>,
        moving: bool,
    ) -> FrameOutcome {
        let predicted = self.estimator.predict();
        let prediction = na::Point2::new(predicted.x, predicted.y);
        let velocity = na::Vector2::new(predicted.vx, predicted.vy);

        // until the ball has been seen in flight the marked path is the better guess
        let base = if moving {
            let side = 2.0 * self.estimator.gate_radius();
            Region::from_center(prediction.x, prediction.y, side, side)
        } else {
            expansion.expected_path_window(constraints, elapsed)
        };

        let motion = if self.flow.is_active() {
            self.flow.track(gray)
        } else {
            None
        };

        let expected_radius = self.scorer.expected_radius();
        let cues = Cues {
            matcher: Some(&self.matcher),
            template: self.color.as_ref(),
            motion,
            expected_radius,
            expected_scale: expected_radius.map(|r| r / self.config.initial_radius),
        };
        let view = FrameView {
            image: &frame.image,
            gray,
            previous,
            elapsed,
        };

        let mut seen_any = false;
        let mut state = SearchState::start();

        while let SearchState::Searching(level) = state {
            let region = expansion.region_for_level(level, &base);

            // the gate grows with the window; the maximum window is bounded on its own
            let gate = level.multiplier();
            let candidates: Vec<_> = self
                .candidates
                .generate(&view, &region, &cues)
                .into_iter()
                .filter(|c| gate.map_or(true, |m| self.estimator.is_within_gate(c.x, c.y, m)))
                .collect();

            seen_any |= !candidates.is_empty();

            let scored = self
                .scorer
                .score(&candidates, Some(prediction), predicted.uncertainty, None);
            let thresholds = expansion.thresholds(level);

            let best = self.scorer.select_best(&scored).filter(|best| {
                let direction = if moving {
                    scorer::direction_score(velocity, last_pos, best.position())
                } else {
                    1.0
                };

                thresholds.accepts(best.candidate.color_score, best.candidate.motion_score, direction)
            });

            state = state.advance(best.is_some());

            if let (SearchState::Accepted(level), Some(best)) = (state, best) {
                debug!(
                    index = frame.index,
                    level = level.name(),
                    x = best.x(),
                    y = best.y(),
                    confidence = best.confidence,
                    source = ?best.candidate.source,
                    "detection accepted"
                );

                self.estimator.update(best.x(), best.y());
                self.scorer.update_tracking_state(&best);

                return FrameOutcome::Accepted {
                    x: best.x(),
                    y: best.y(),
                    radius: best.radius(),
                    confidence: best.confidence,
                };
            }
        }

        if seen_any {
            FrameOutcome::Rejected
        } else {
            FrameOutcome::Exhausted
        }
    }

    fn fallback(
        mut self,
        input: &ShotInput<'_>,
        constraints: &PathConstraints,
        early_detection_failed: bool,
        processed: usize,
        detections: usize,
        gaps: usize,
    ) -> Result<ShotResult, Error> {
        let (fw, fh) = (input.frame_width, input.frame_height);

        let mut request = GenerationRequest::new(to_normalized(constraints.origin, fw, fh), fw, fh);
        request.landing = constraints.landing.map(|p| to_normalized(p, fw, fh));
        request.apex = constraints.apex.map(|p| to_normalized(p, fw, fh));
        request.shape = input.shape;
        request.height = input.height;
        request.starting_line = input.starting_line;
        request.start_time = input.strike_time;
        request.early_detection_failed = early_detection_failed;

        let trajectory = self.generator.generate(&request, &self.notifier)?;

        if early_detection_failed {
            self.warnings.push(WarningCode::EarlyBallDetectionFailed);
        }

        info!(
            method = trajectory.method.as_str(),
            points = trajectory.len(),
            "generated fallback trajectory"
        );

        Ok(ShotResult {
            trajectory,
            frames_processed: processed,
            detections,
            gaps,
            fallback: true,
            warnings: self.warnings,
        })
    }
}

pub fn track_shot(
    input: &ShotInput<'_>,
    config: TrackerConfig,
    observer: &dyn TrackingObserver,
) -> Result<ShotResult, Error> {
    ShotTracker::new(config, observer).track(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopObserver;
    use crate::trajectory::TrajectoryMethod;
    use approx::assert_abs_diff_eq;
    use image::{Rgb, RgbImage};

    #[test]
    fn normalized_points_are_scaled() {
        let p = to_pixels(na::Point2::new(0.5, 0.25), 640, 360);
        assert_abs_diff_eq!(p.x, 320.0);
        assert_abs_diff_eq!(p.y, 90.0);

        let q = to_pixels(na::Point2::new(100.0, 0.5), 640, 360);
        assert_abs_diff_eq!(q.x, 100.0);
    }

    #[test]
    fn skip_tracking_generates() {
        let frames = [Frame::new(0, 0.0, RgbImage::from_pixel(64, 48, Rgb([0, 120, 0])))];
        let mut input = ShotInput::new(&frames, 0.0, na::Point2::new(0.5, 0.9), 64, 48);
        input.skip_tracking = true;
        input.landing = Some(na::Point2::new(0.7, 0.8));

        let result = track_shot(&input, TrackerConfig::default(), &NoopObserver).unwrap();

        assert!(result.fallback);
        assert_eq!(result.frames_processed, 0);
        assert_eq!(result.trajectory.method, TrajectoryMethod::Physics);
        assert_abs_diff_eq!(result.trajectory.points[0].x, 0.5, epsilon = 1e-5);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn zero_sized_frames_are_rejected() {
        let input = ShotInput::new(&[], 0.0, na::Point2::new(0.5, 0.9), 0, 48);

        assert!(matches!(
            track_shot(&input, TrackerConfig::default(), &NoopObserver),
            Err(Error::InvalidInput(_))
        ));
    }
}

// src/ptz.rs

//! PTZ (pan-tilt-zoom) control, abstracted behind a `PtzClient` trait rather
//! than a concrete ONVIF dependency (SPEC_FULL.md §4.4's resolution of
//! spec.md §9's open PTZ-vendor question). Grounded on
//! `original_source/services/source-camera/camera/ptz.py`'s direction table
//! and continuous-move-then-stop sequencing.

use async_trait::async_trait;

/// A velocity triple in ONVIF's `(pan, tilt, zoom)` convention, already
/// scaled by the camera's configured step sizes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PtzVelocity {
    pub pan: f64,
    pub tilt: f64,
    pub zoom: f64,
}

/// One of the six directions `ptz_move` accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtzDirection {
    Up,
    Down,
    Left,
    Right,
    ZoomIn,
    ZoomOut,
}

impl PtzDirection {
    pub fn parse(direction: &str) -> Option<Self> {
        match direction {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            "zoomin" => Some(Self::ZoomIn),
            "zoomout" => Some(Self::ZoomOut),
            _ => None,
        }
    }

    /// The unit `(pan, tilt, zoom)` direction this direction moves in,
    /// before scaling by `ptz_step`/`ptz_zoom_step`.
    fn unit_vector(self) -> (f64, f64, f64) {
        match self {
            Self::Up => (0.0, 1.0, 0.0),
            Self::Down => (0.0, -1.0, 0.0),
            Self::Left => (-1.0, 0.0, 0.0),
            Self::Right => (1.0, 0.0, 0.0),
            Self::ZoomIn => (0.0, 0.0, 1.0),
            Self::ZoomOut => (0.0, 0.0, -1.0),
        }
    }

    /// Scales this direction's unit vector by `pan_tilt_step`/`zoom_step`,
    /// `step_override` replacing both when given.
    pub fn velocity(self, pan_tilt_step: f64, zoom_step: f64, step_override: Option<f64>) -> PtzVelocity {
        let (pan_tilt, zoom) = match step_override {
            Some(step) => (step, step),
            None => (pan_tilt_step, zoom_step),
        };
        let (pan_dir, tilt_dir, zoom_dir) = self.unit_vector();
        PtzVelocity {
            pan: pan_dir * pan_tilt,
            tilt: tilt_dir * pan_tilt,
            zoom: zoom_dir * zoom,
        }
    }
}

/// An ONVIF PTZ service, abstracted so the workspace need not depend on a
/// concrete SOAP/ONVIF crate. A production implementation talks to the
/// camera's PTZ service; `NullPtzClient` always reports uninitialized.
#[async_trait]
pub trait PtzClient: Send + Sync {
    async fn initialize(&self) -> anyhow::Result<bool>;

    fn is_initialized(&self) -> bool;

    /// A short continuous move at `velocity`, held briefly, then stopped
    /// with an explicit zero-velocity move — mirrors the ONVIF
    /// `ContinuousMove` + stop pair the original controller issues.
    async fn continuous_move(&self, velocity: PtzVelocity) -> anyhow::Result<()>;
}

/// The PTZ stand-in used whenever a camera has no PTZ capability configured,
/// or no ONVIF client is wired in. `ptz_move` against it always resolves to
/// the spec's `"PTZ not enabled"`-class error.
pub struct NullPtzClient;

#[async_trait]
impl PtzClient for NullPtzClient {
    async fn initialize(&self) -> anyhow::Result<bool> {
        Ok(false)
    }

    fn is_initialized(&self) -> bool {
        false
    }

    async fn continuous_move(&self, _velocity: PtzVelocity) -> anyhow::Result<()> {
        anyhow::bail!("PTZ not enabled")
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use tokio::sync::Mutex;

    /// Records every move it is asked to perform, for command-handler tests.
    #[derive(Default)]
    pub struct RecordingPtzClient {
        pub moves: Mutex<Vec<PtzVelocity>>,
    }

    #[async_trait]
    impl PtzClient for RecordingPtzClient {
        async fn initialize(&self) -> anyhow::Result<bool> {
            Ok(true)
        }

        fn is_initialized(&self) -> bool {
            true
        }

        async fn continuous_move(&self, velocity: PtzVelocity) -> anyhow::Result<()> {
            self.moves.lock().await.push(velocity);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_velocities_match_unit_table() {
        let step = (0.05, 0.1);
        assert_eq!(
            PtzDirection::Up.velocity(step.0, step.1, None),
            PtzVelocity { pan: 0.0, tilt: 0.05, zoom: 0.0 }
        );
        assert_eq!(
            PtzDirection::Left.velocity(step.0, step.1, None),
            PtzVelocity { pan: -0.05, tilt: 0.0, zoom: 0.0 }
        );
        assert_eq!(
            PtzDirection::ZoomIn.velocity(step.0, step.1, None),
            PtzVelocity { pan: 0.0, tilt: 0.0, zoom: 0.1 }
        );
    }

    #[test]
    fn step_override_replaces_both_pan_tilt_and_zoom_step() {
        let v = PtzDirection::ZoomOut.velocity(0.05, 0.1, Some(0.5));
        assert_eq!(v, PtzVelocity { pan: 0.0, tilt: 0.0, zoom: -0.5 });
    }

    #[test]
    fn parse_rejects_unknown_direction() {
        assert!(PtzDirection::parse("diagonal").is_none());
    }

    #[tokio::test]
    async fn null_client_always_reports_uninitialized_and_errors_on_move() {
        let client = NullPtzClient;
        assert!(!client.is_initialized());
        assert!(client.continuous_move(PtzVelocity { pan: 0.0, tilt: 0.0, zoom: 0.0 }).await.is_err());
    }
}

use serde::{Deserialize, Serialize};

/// Readiness of inertial data, in the only order it can progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CalibrationState {
    /// Nothing started yet
    NotInitialized,
    /// Stationary warm-up running
    Initializing,
    /// Warm-up done, waiting for the vehicle to move
    Initialized,
    /// Inertial data drives prediction (terminal)
    Active,
    /// Gate could not be constructed (terminal)
    Error,
}

impl CalibrationState {
    pub fn label(self) -> &'static str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::Initializing => "INITIALIZING",
            Self::Initialized => "INITIALIZED",
            Self::Active => "ACTIVE",
            Self::Error => "ERROR",
        }
    }
}

/// Stationary calibration gate.
///
/// One instance decides when inertial data is trustworthy; both the
/// estimator and any driver layer read readiness from it.
#[derive(Debug, Clone)]
pub struct CalibrationGate {
    duration_secs: f64,
    movement_threshold: f64,
    state: CalibrationState,

    /// Time `start()` was accepted.
    start_time: Option<f64>,
}

impl CalibrationGate {
    pub fn new(duration_secs: f64, movement_threshold: f64) -> Self {
        let valid = duration_secs.is_finite()
            && duration_secs >= 0.0
            && movement_threshold.is_finite()
            && movement_threshold >= 0.0;
        let state = if valid {
            CalibrationState::NotInitialized
        } else {
            log::error!(
                "Calibration gate rejected duration={} threshold={}",
                duration_secs,
                movement_threshold
            );
            CalibrationState::Error
        };

        Self {
            duration_secs,
            movement_threshold,
            state,
            start_time: None,
        }
    }

    /// Begin the stationary warm-up. Returns true if a transition happened.
    pub fn start(&mut self, now: f64) -> bool {
        if self.state != CalibrationState::NotInitialized {
            return false;
        }
        self.start_time = Some(now);
        self.transition_to(CalibrationState::Initializing);
        true
    }

    /// Complete the warm-up once the configured duration has elapsed.
    pub fn advance(&mut self, now: f64) -> CalibrationState {
        if self.state == CalibrationState::Initializing {
            if let Some(elapsed) = self.elapsed(now) {
                if elapsed >= self.duration_secs {
                    self.transition_to(CalibrationState::Initialized);
                }
            }
        }
        self.state
    }

    /// Report linear acceleration magnitude; only counts once initialized.
    pub fn observe_motion(&mut self, accel_magnitude: f64) -> CalibrationState {
        if self.state == CalibrationState::Initialized && accel_magnitude > self.movement_threshold {
            self.transition_to(CalibrationState::Active);
        }
        self.state
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == CalibrationState::Active
    }

    /// Seconds since `start()`, `None` if never started.
    pub fn elapsed(&self, now: f64) -> Option<f64> {
        self.start_time.map(|t| (now - t).max(0.0))
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    pub fn movement_threshold(&self) -> f64 {
        self.movement_threshold
    }

    fn transition_to(&mut self, next: CalibrationState) {
        log::info!(
            "Calibration gate {} -> {}",
            self.state.label(),
            next.label()
        );
        self.state = next;
    }
}

use std::time::Duration;

use crate::device::{NmeaMask, PowerMode, ReceiverConfig, UseCase};

/// How the receiver is operated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingMode {
    /// Continuous 1 Hz tracking
    Continuous,

    /// Periodic fixes
    Periodic {
        /// Time between fix attempts
        interval: Duration,
        /// Give-up time per attempt
        timeout: Duration,
    },

    /// Repeating time-to-first-fix benchmark
    TtffBench,
}

/// Assistance data flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistancePolicy {
    /// No assistance at all
    Disabled,

    /// SUPL-class source: full assistance, no satellite integrity
    Supl,

    /// Factory almanac plus coarse time/position only
    Minimal,
}

impl AssistancePolicy {
    pub fn enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// TTFF benchmark tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtffSettings {
    /// Rest time between benchmark cycles
    pub interval: Duration,

    /// Purge stored navigation data before each cycle
    pub cold_start: bool,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: TrackingMode,
    pub assistance: AssistancePolicy,
    pub ttff: TtffSettings,
    pub power_mode: PowerMode,
    pub nmea_mask: NmeaMask,

    /// Render NMEA sentences only, no solution display
    pub nmea_only: bool,

    /// Accept low accuracy fixes
    pub low_accuracy: bool,

    /// Frame queue depth
    pub frame_queue_capacity: usize,

    /// Render JSON lines instead of the console display
    pub json: bool,
}

impl Settings {
    /// Derives the [ReceiverConfig] applied before the receiver starts
    pub fn receiver_config(&self) -> ReceiverConfig {
        let mut use_case = UseCase::MULTIPLE_HOT_START;

        if matches!(self.mode, TrackingMode::Periodic { .. }) && self.assistance.enabled() {
            // assistance replaces receiver-scheduled downloads
            use_case |= UseCase::SCHED_DOWNLOAD_DISABLE;
        }

        if self.low_accuracy {
            use_case |= UseCase::LOW_ACCURACY;
        }

        let (fix_interval_s, fix_retry_s) = match self.mode {
            TrackingMode::Continuous => (1, 0),
            TrackingMode::Periodic { interval, timeout } => {
                (interval.as_secs() as u16, timeout.as_secs() as u16)
            },
            // single fix per benchmark cycle
            TrackingMode::TtffBench => (0, 0),
        };

        ReceiverConfig {
            use_case,
            power_mode: self.power_mode,
            nmea_mask: self.nmea_mask,
            fix_interval_s,
            fix_retry_s,
        }
    }
}

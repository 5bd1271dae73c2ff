use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU32, Ordering},
};
use std::time::{Duration, Instant};

use log::{error, info};

use crate::{
    assistance::AgnssRequest,
    device::{DeleteMask, DeviceError, GnssReceiver},
    settings::{AssistancePolicy, TtffSettings},
    worker::{Task, WorkSubmitter},
};

/// Benchmark cycle phases
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TtffState {
    #[default]
    Idle,
    Preparing,
    Starting,
    AwaitingFix,
    Reporting,
}

/// Cycle bookkeeping crossing context boundaries. The start timestamp is
/// written by the start task; the blocked-sample counter belongs to the
/// render loop while a fix is awaited and to the report task afterwards,
/// with [TtffShared::fix_obtained] acting as the handoff.
#[derive(Default)]
pub struct TtffShared {
    started_at: Mutex<Option<Instant>>,
    awaiting: AtomicBool,
    blocked_samples: AtomicU32,
}

impl TtffShared {
    pub fn new() -> Self {
        Default::default()
    }

    /// Marks the beginning of a measurement: records the start timestamp and
    /// resets the blocked-sample counter.
    pub fn cycle_started(&self) {
        *self.started_at.lock().unwrap() = Some(Instant::now());
        self.blocked_samples.store(0, Ordering::Relaxed);
        self.awaiting.store(true, Ordering::Release);
    }

    /// Called from the fix milestone. Ends the measurement and returns the
    /// elapsed acquisition time; None when no measurement was running.
    pub fn fix_obtained(&self) -> Option<Duration> {
        if !self.awaiting.swap(false, Ordering::AcqRel) {
            return None;
        }

        self.started_at
            .lock()
            .unwrap()
            .map(|started| started.elapsed())
    }

    /// True between cycle start and the fix milestone
    pub fn awaiting_fix(&self) -> bool {
        self.awaiting.load(Ordering::Acquire)
    }

    pub fn count_blocked_sample(&self) {
        self.blocked_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn take_blocked_samples(&self) -> u32 {
        self.blocked_samples.swap(0, Ordering::Relaxed)
    }
}

/// Handle given to the event dispatcher in benchmark mode
#[derive(Clone)]
pub struct BenchHandle {
    pub shared: Arc<TtffShared>,

    /// Rest time before the next cycle's prepare task
    pub interval: Duration,
}

/// The benchmark sequencer. All methods run on the background worker, one
/// task at a time: prepare → start → (fix milestone) → report → prepare → …
pub struct TtffRunner {
    receiver: Arc<dyn GnssReceiver>,
    shared: Arc<TtffShared>,
    submitter: WorkSubmitter,
    settings: TtffSettings,
    policy: AssistancePolicy,
    state: TtffState,
}

impl TtffRunner {
    pub fn new(
        receiver: Arc<dyn GnssReceiver>,
        shared: Arc<TtffShared>,
        submitter: WorkSubmitter,
        settings: TtffSettings,
        policy: AssistancePolicy,
    ) -> Self {
        Self {
            receiver,
            shared,
            submitter,
            settings,
            policy,
            state: TtffState::Idle,
        }
    }

    pub fn state(&self) -> TtffState {
        self.state
    }

    /// Brings the receiver into a known stopped state, optionally forces a
    /// cold acquisition, arranges assistance, then queues the start task.
    /// Any failure aborts this cycle: no start task is submitted.
    pub fn prepare(&mut self) {
        self.state = TtffState::Preparing;

        // the receiver may or may not be running at this point
        let _ = self.receiver.stop();

        if self.settings.cold_start {
            if let Err(e) = self.force_cold_start() {
                error!("failed to purge navigation data: {}", e);
                self.state = TtffState::Idle;
                return;
            }
        }

        if self.policy.enabled() {
            if self.settings.cold_start {
                // everything is requested up front, before the receiver runs
                self.submitter
                    .submit(Task::FetchAssistance(AgnssRequest::full()));
            } else {
                // start/stop nudge: the receiver raises a fresh assistance
                // request if it actually needs data
                let _ = self.receiver.start();
                let _ = self.receiver.stop();
            }
        }

        self.submitter.submit(Task::TtffStart);
    }

    fn force_cold_start(&self) -> Result<(), DeviceError> {
        let mut mask = DeleteMask::EPHEMERIDES
            | DeleteMask::ALMANACS
            | DeleteMask::IONO_CORRECTION
            | DeleteMask::LAST_GOOD_FIX
            | DeleteMask::GPS_TOW
            | DeleteMask::GPS_WEEK
            | DeleteMask::UTC_DATA
            | DeleteMask::TOW_PRECISION;

        // with minimal assistance the factory almanac must survive
        if self.policy == AssistancePolicy::Minimal {
            mask.remove(DeleteMask::ALMANACS);
        }

        info!("purging stored navigation data");
        self.receiver.delete_nav_data(mask)
    }

    /// Starts the receiver and opens the measurement window
    pub fn start(&mut self) {
        self.state = TtffState::Starting;

        info!("starting GNSS");
        if let Err(e) = self.receiver.start() {
            error!("failed to start GNSS: {}", e);
            self.state = TtffState::Idle;
            return;
        }

        self.shared.cycle_started();
        self.state = TtffState::AwaitingFix;
    }

    /// Logs the just-completed cycle. The next prepare task is already
    /// queued with the configured rest interval.
    pub fn report(&mut self, time_to_fix: Duration) {
        self.state = TtffState::Reporting;

        info!("time to fix: {:.1} s", time_to_fix.as_secs_f64());

        let blocked = self.shared.take_blocked_samples();
        if blocked > 0 {
            info!("{} solutions were flagged blocked during acquisition", blocked);
        }

        info!(
            "sleeping for {} s before next cycle",
            self.settings.interval.as_secs()
        );
    }
}

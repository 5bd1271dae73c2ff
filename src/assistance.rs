use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use bitflags::bitflags;
use log::{error, info};
use thiserror::Error;

use crate::settings::AssistancePolicy;

bitflags! {
    /// Assistance data categories beyond per-satellite masks
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct AgnssFlags: u8 {
        /// UTC parameters
        const UTC = 0x01;
        /// Klobuchar ionospheric correction parameters
        const KLOBUCHAR = 0x02;
        /// System time and satellite time of week
        const SYS_TIME_AND_TOW = 0x04;
        /// Coarse receiver position
        const POSITION = 0x08;
        /// Satellite real time integrity
        const INTEGRITY = 0x10;
    }
}

/// Assistance data categories requested by the receiver. Written once per
/// request event and carried inside the submitted fetch task: the writer
/// never touches it after submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgnssRequest {
    /// Satellites for which ephemerides are needed
    pub sv_mask_ephe: u32,

    /// Satellites for which almanacs are needed
    pub sv_mask_alm: u32,

    /// Requested [AgnssFlags]
    pub flags: AgnssFlags,
}

impl AgnssRequest {
    /// Request for all assistance data, issued before a cold start
    pub fn full() -> Self {
        Self {
            sv_mask_ephe: 0xffffffff,
            sv_mask_alm: 0xffffffff,
            flags: AgnssFlags::all(),
        }
    }

    /// True when the request only demands satellite integrity data
    pub fn integrity_only(&self) -> bool {
        self.sv_mask_ephe == 0 && self.sv_mask_alm == 0 && self.flags == AgnssFlags::INTEGRITY
    }

    /// True when system time or coarse position is requested
    pub fn wants_time_or_position(&self) -> bool {
        self.flags
            .intersects(AgnssFlags::SYS_TIME_AND_TOW | AgnssFlags::POSITION)
    }
}

#[derive(Debug, Error)]
pub enum AssistanceError {
    #[error("assistance transfer failed: {0}")]
    Transfer(String),

    #[error("assistance source unavailable")]
    Unavailable,
}

/// External provider of assistance data. Invoked only from the background
/// worker, one fetch at a time.
pub trait AssistanceSource: Send {
    fn fetch(&mut self, request: &AgnssRequest) -> Result<(), AssistanceError>;
}

/// Assistance fetching, hosted on the background worker
pub struct Assistance {
    policy: AssistancePolicy,
    source: Box<dyn AssistanceSource>,
    in_progress: Arc<AtomicBool>,
}

impl Assistance {
    pub fn new(
        policy: AssistancePolicy,
        source: Box<dyn AssistanceSource>,
        in_progress: Arc<AtomicBool>,
    ) -> Self {
        Self {
            policy,
            source,
            in_progress,
        }
    }

    /// Serves one request event: applies the policy filter, then performs the
    /// fetch. Failures are logged, never retried from here; the receiver
    /// re-requests if it still needs the data.
    pub fn serve(&mut self, request: &AgnssRequest) {
        match self.policy {
            AssistancePolicy::Supl if request.integrity_only() => {
                // SUPL does not usually provide satellite real time integrity
                info!("ignoring assistance request for satellite integrity only");
                return;
            },
            AssistancePolicy::Minimal if !request.wants_time_or_position() => {
                info!("ignoring assistance request: neither time nor position needed");
                return;
            },
            _ => {},
        }

        self.in_progress.store(true, Ordering::Relaxed);

        info!(
            "assistance data needed, ephe 0x{:08x}, alm 0x{:08x}, flags {:?}",
            request.sv_mask_ephe, request.sv_mask_alm, request.flags
        );

        if let Err(e) = self.source.fetch(request) {
            error!("failed to fetch assistance data: {}", e);
        }

        self.in_progress.store(false, Ordering::Relaxed);
    }
}

/// Stand-in source for running without a network backend: pretends to
/// transfer the requested categories, taking a configurable amount of time.
pub struct SimulatedSource {
    transfer_time: Duration,
}

impl SimulatedSource {
    pub fn new(transfer_time: Duration) -> Self {
        Self { transfer_time }
    }
}

impl AssistanceSource for SimulatedSource {
    fn fetch(&mut self, request: &AgnssRequest) -> Result<(), AssistanceError> {
        info!(
            "downloading assistance data for {} ephemerides, {} almanacs",
            request.sv_mask_ephe.count_ones(),
            request.sv_mask_alm.count_ones()
        );

        std::thread::sleep(self.transfer_time);

        info!("assistance data injected");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{AgnssFlags, AgnssRequest, Assistance, AssistanceError, AssistanceSource};
    use crate::settings::AssistancePolicy;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder {
        fetched: Arc<Mutex<Vec<AgnssRequest>>>,
    }

    impl AssistanceSource for Recorder {
        fn fetch(&mut self, request: &AgnssRequest) -> Result<(), AssistanceError> {
            self.fetched.lock().unwrap().push(*request);
            Ok(())
        }
    }

    fn assistance(policy: AssistancePolicy, recorder: Recorder) -> Assistance {
        Assistance::new(
            policy,
            Box::new(recorder),
            Arc::new(AtomicBool::new(false)),
        )
    }

    fn integrity_only() -> AgnssRequest {
        AgnssRequest {
            sv_mask_ephe: 0,
            sv_mask_alm: 0,
            flags: AgnssFlags::INTEGRITY,
        }
    }

    #[test]
    fn supl_ignores_integrity_only_request() {
        let recorder = Recorder::default();
        let mut assistance = assistance(AssistancePolicy::Supl, recorder.clone());

        assistance.serve(&integrity_only());
        assert!(recorder.fetched.lock().unwrap().is_empty());

        // anything more than integrity goes through
        assistance.serve(&AgnssRequest {
            sv_mask_ephe: 0x7,
            sv_mask_alm: 0,
            flags: AgnssFlags::INTEGRITY,
        });
        assert_eq!(recorder.fetched.lock().unwrap().len(), 1);
    }

    #[test]
    fn minimal_requires_time_or_position() {
        let recorder = Recorder::default();
        let mut assistance = assistance(AssistancePolicy::Minimal, recorder.clone());

        assistance.serve(&AgnssRequest {
            sv_mask_ephe: 0xffff,
            sv_mask_alm: 0xffff,
            flags: AgnssFlags::KLOBUCHAR,
        });
        assert!(recorder.fetched.lock().unwrap().is_empty());

        assistance.serve(&AgnssRequest {
            sv_mask_ephe: 0,
            sv_mask_alm: 0,
            flags: AgnssFlags::POSITION,
        });
        assert_eq!(recorder.fetched.lock().unwrap().len(), 1);
    }

    #[test]
    fn each_request_fetched_once() {
        let recorder = Recorder::default();
        let mut assistance = assistance(AssistancePolicy::Supl, recorder.clone());

        assistance.serve(&AgnssRequest::full());
        assistance.serve(&AgnssRequest {
            sv_mask_ephe: 0x1,
            sv_mask_alm: 0,
            flags: AgnssFlags::SYS_TIME_AND_TOW,
        });

        let fetched = recorder.fetched.lock().unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0], AgnssRequest::full());
    }

    #[test]
    fn in_progress_cleared_after_fetch() {
        struct Failing;

        impl AssistanceSource for Failing {
            fn fetch(&mut self, _: &AgnssRequest) -> Result<(), AssistanceError> {
                Err(AssistanceError::Unavailable)
            }
        }

        let flag = Arc::new(AtomicBool::new(false));
        let mut assistance =
            Assistance::new(AssistancePolicy::Supl, Box::new(Failing), flag.clone());

        assistance.serve(&AgnssRequest::full());
        assert!(!flag.load(Ordering::Relaxed));
    }
}

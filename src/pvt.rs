use std::sync::{Arc, Mutex};

use bitflags::bitflags;
use gnss::prelude::SV;
use hifitime::Epoch;
use tokio::sync::Notify;

bitflags! {
    /// Quality flags attached to every PVT solution
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct PvtFlags: u32 {
        /// Solution is a valid fix
        const FIX_VALID = 0x01;
        /// The receiver missed its processing deadline for this solution
        const DEADLINE_MISSED = 0x02;
        /// Not enough time windows granted to the GNSS engine
        const NOT_ENOUGH_WINDOW_TIME = 0x04;
        /// The receiver slept between PVT notifications
        const SLEEP_BETWEEN_PVT = 0x08;
    }
}

bitflags! {
    /// Per-satellite tracking flags
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct SvFlags: u8 {
        const USED_IN_FIX = 0x01;
        const UNHEALTHY = 0x02;
    }
}

/// One tracked satellite
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SvInfo {
    /// Satellite identity
    pub sv: SV,

    /// Carrier to noise density ratio [dB-Hz]
    pub cn0: f64,

    /// Tracking flags
    pub flags: SvFlags,
}

/// Complete position/velocity/time solution
#[derive(Debug, Clone, PartialEq)]
pub struct PvtSnapshot {
    /// Latitude [°]
    pub latitude: f64,

    /// Longitude [°]
    pub longitude: f64,

    /// Altitude above mean sea level [m]
    pub altitude: f64,

    /// Horizontal position accuracy estimate [m]
    pub accuracy: f64,

    /// Ground speed [m/s]
    pub speed: f64,

    /// Ground speed accuracy estimate [m/s]
    pub speed_accuracy: f64,

    /// Heading of motion [°]
    pub heading: f64,

    /// Solution datetime as [Epoch]
    pub datetime: Epoch,

    pub pdop: f64,
    pub hdop: f64,
    pub vdop: f64,
    pub tdop: f64,

    /// Tracked satellites
    pub sv: Vec<SvInfo>,

    /// Quality flags
    pub flags: PvtFlags,
}

impl PvtSnapshot {
    pub fn has_fix(&self) -> bool {
        self.flags.contains(PvtFlags::FIX_VALID)
    }

    /// Returns (tracked, used in fix, unhealthy) satellite counts
    pub fn sv_stats(&self) -> (usize, usize, usize) {
        let used = self
            .sv
            .iter()
            .filter(|sv| sv.flags.contains(SvFlags::USED_IN_FIX))
            .count();

        let unhealthy = self
            .sv
            .iter()
            .filter(|sv| sv.flags.contains(SvFlags::UNHEALTHY))
            .count();

        (self.sv.len(), used, unhealthy)
    }
}

struct Shared {
    slot: Mutex<Option<PvtSnapshot>>,
    notify: Notify,
}

/// Producer half of the coalescing fix slot. Only the newest solution is
/// retained: publishing over an unread solution silently replaces it.
#[derive(Clone)]
pub struct FixSlot {
    shared: Arc<Shared>,
}

/// Consumer half of the coalescing fix slot
pub struct FixReader {
    shared: Arc<Shared>,
}

/// Builds a connected [FixSlot]/[FixReader] pair
pub fn fix_slot() -> (FixSlot, FixReader) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(None),
        notify: Notify::new(),
    });

    (
        FixSlot {
            shared: shared.clone(),
        },
        FixReader { shared },
    )
}

impl FixSlot {
    /// Latches the newest solution. Never blocks, overwrites any unread
    /// solution still in the slot.
    pub fn publish(&self, snapshot: PvtSnapshot) {
        *self.shared.slot.lock().unwrap() = Some(snapshot);
        self.shared.notify.notify_one();
    }
}

impl FixReader {
    /// Takes the pending solution, if any
    pub fn try_consume(&self) -> Option<PvtSnapshot> {
        self.shared.slot.lock().unwrap().take()
    }

    /// Suspends until a solution is pending
    pub async fn ready(&self) {
        loop {
            let notified = self.shared.notify.notified();

            if self.shared.slot.lock().unwrap().is_some() {
                return;
            }

            notified.await;
        }
    }
}

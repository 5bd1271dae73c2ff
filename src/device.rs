use std::sync::Arc;

use bitflags::bitflags;
use thiserror::Error;

use crate::{assistance::AgnssRequest, nmea::NmeaFrame, pvt::PvtSnapshot};

pub mod sim;

/// Discrete notifications delivered from the receiver's own execution
/// context. Payloads are not carried by the event itself: the handler reads
/// them back through the matching `read_*` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GnssEvent {
    /// A new periodic PVT solution is available
    Pvt,

    /// A valid fix was just acquired
    Fix,

    /// A complete NMEA sentence is available
    Nmea,

    /// The receiver needs assistance data
    AgnssRequest,
}

/// Upcall invoked by the receiver for every event. Must never block.
pub type EventHandler = Arc<dyn Fn(GnssEvent) + Send + Sync>;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("receiver is not running")]
    NotRunning,

    #[error("receiver is running, stop it first")]
    Running,

    #[error("no payload pending for {0:?} event")]
    NoPayload(GnssEvent),

    #[error("receiver rejected configuration: {0}")]
    Configuration(String),

    #[error("receiver i/o: {0}")]
    Io(String),
}

bitflags! {
    /// Receiver use case tuning
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct UseCase: u8 {
        /// Optimize for multiple hot starts (always set)
        const MULTIPLE_HOT_START = 0x01;
        /// Disable receiver-scheduled assistance downloads
        const SCHED_DOWNLOAD_DISABLE = 0x02;
        /// Accept low accuracy fixes
        const LOW_ACCURACY = 0x04;
    }
}

bitflags! {
    /// NMEA sentence selection
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct NmeaMask: u16 {
        const GGA = 0x01;
        const GLL = 0x02;
        const GSA = 0x04;
        const GSV = 0x08;
        const RMC = 0x10;
    }
}

bitflags! {
    /// Stored navigation data categories that can be purged. The clock-offset
    /// calibration has no bit here on purpose: it survives every purge.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct DeleteMask: u16 {
        const EPHEMERIDES = 0x001;
        const ALMANACS = 0x002;
        const IONO_CORRECTION = 0x004;
        const LAST_GOOD_FIX = 0x008;
        const GPS_TOW = 0x010;
        const GPS_WEEK = 0x020;
        const UTC_DATA = 0x040;
        const TOW_PRECISION = 0x080;
    }
}

/// Duty cycling trade-off while tracking
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    /// No power saving
    #[default]
    Disabled,

    /// Duty cycling favoring performance
    DutyCyclingPerformance,

    /// Duty cycling favoring power
    DutyCyclingPower,
}

/// Complete receiver configuration, applied before start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverConfig {
    pub use_case: UseCase,
    pub power_mode: PowerMode,
    pub nmea_mask: NmeaMask,

    /// Seconds between fix attempts. 1 = continuous tracking, 0 = single fix.
    pub fix_interval_s: u16,

    /// Seconds to keep trying per attempt, 0 = no limit
    pub fix_retry_s: u16,
}

/// The positioning receiver seam. All operations are synchronous and
/// non-blocking from the caller's perspective; events flow back through the
/// registered [EventHandler] on the receiver's own context.
pub trait GnssReceiver: Send + Sync {
    /// Registers the event upcall
    fn set_handler(&self, handler: EventHandler);

    fn configure(&self, config: &ReceiverConfig) -> Result<(), DeviceError>;

    fn start(&self) -> Result<(), DeviceError>;

    fn stop(&self) -> Result<(), DeviceError>;

    /// Reads the latest PVT solution
    fn read_pvt(&self) -> Result<PvtSnapshot, DeviceError>;

    /// Reads the next pending NMEA sentence
    fn read_nmea(&self) -> Result<NmeaFrame, DeviceError>;

    /// Reads the pending assistance request
    fn read_agnss_request(&self) -> Result<AgnssRequest, DeviceError>;

    /// Purges stored navigation data. Only legal while stopped.
    fn delete_nav_data(&self, mask: DeleteMask) -> Result<(), DeviceError>;
}

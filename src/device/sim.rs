use std::collections::VecDeque;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use std::thread;
use std::time::Duration;

use gnss::prelude::{Constellation, SV};
use hifitime::Epoch;
use log::debug;

use crate::{
    assistance::{AgnssFlags, AgnssRequest},
    device::{
        DeleteMask, DeviceError, EventHandler, GnssEvent, GnssReceiver, NmeaMask, ReceiverConfig,
    },
    nmea::NmeaFrame,
    pvt::{PvtFlags, PvtSnapshot, SvFlags, SvInfo},
};

/// PRNs walked through as acquisition progresses
const SV_PRNS: [u8; 9] = [2, 5, 7, 9, 13, 15, 18, 21, 26];

/// Deterministic receiver double: produces the full notification flow
/// (assistance request, PVT solutions, fix milestone, NMEA sentences) from
/// its own thread, without hardware. A warm acquisition converges after
/// `fix_delay`; purging navigation data doubles the next acquisition.
pub struct SimulatedReceiver {
    inner: Arc<Inner>,
}

struct Inner {
    tick: Duration,
    warm_ticks: u32,
    base: Epoch,
    running: AtomicBool,
    generation: AtomicU64,
    handler: Mutex<Option<EventHandler>>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    config: Option<ReceiverConfig>,

    /// Ticks since the last start
    ticks: u32,

    /// Ticks since construction, drives the solution datetime
    uptime_ticks: u64,

    had_fix: bool,
    nav_data_valid: bool,
    agnss_raised: bool,

    pvt: Option<PvtSnapshot>,
    nmea: VecDeque<NmeaFrame>,
    agnss: Option<AgnssRequest>,
}

impl SimulatedReceiver {
    /// Receiver converging `fix_delay` after a warm start, ticking at 1 Hz
    pub fn new(fix_delay: Duration) -> Self {
        Self::with_tick(fix_delay, Duration::from_secs(1))
    }

    pub fn with_tick(fix_delay: Duration, tick: Duration) -> Self {
        let warm_ticks = (fix_delay.as_secs_f64() / tick.as_secs_f64()).ceil() as u32;

        let base = Epoch::now()
            .unwrap_or_else(|e| panic!("failed to determine system time: {}", e));

        Self {
            inner: Arc::new(Inner {
                tick,
                warm_ticks: warm_ticks.max(1),
                base,
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                handler: Mutex::new(None),
                state: Mutex::new(State::default()),
            }),
        }
    }
}

impl GnssReceiver for SimulatedReceiver {
    fn set_handler(&self, handler: EventHandler) {
        *self.inner.handler.lock().unwrap() = Some(handler);
    }

    fn configure(&self, config: &ReceiverConfig) -> Result<(), DeviceError> {
        if self.inner.running.load(Ordering::SeqCst) {
            return Err(DeviceError::Running);
        }

        debug!("configured: {:?}", config);
        self.inner.state.lock().unwrap().config = Some(*config);
        Ok(())
    }

    fn start(&self) -> Result<(), DeviceError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            // already tracking
            return Ok(());
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut state = self.inner.state.lock().unwrap();
            state.ticks = 0;
            state.had_fix = false;
        }

        let inner = self.inner.clone();

        thread::Builder::new()
            .name("gnss-sim".to_string())
            .spawn(move || inner.run(generation))
            .map_err(|e| DeviceError::Io(e.to_string()))?;

        Ok(())
    }

    fn stop(&self) -> Result<(), DeviceError> {
        self.inner.running.store(false, Ordering::SeqCst);
        // orphans the producer thread at its next wakeup
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_pvt(&self) -> Result<PvtSnapshot, DeviceError> {
        self.inner
            .state
            .lock()
            .unwrap()
            .pvt
            .clone()
            .ok_or(DeviceError::NoPayload(GnssEvent::Pvt))
    }

    fn read_nmea(&self) -> Result<NmeaFrame, DeviceError> {
        self.inner
            .state
            .lock()
            .unwrap()
            .nmea
            .pop_front()
            .ok_or(DeviceError::NoPayload(GnssEvent::Nmea))
    }

    fn read_agnss_request(&self) -> Result<AgnssRequest, DeviceError> {
        self.inner
            .state
            .lock()
            .unwrap()
            .agnss
            .take()
            .ok_or(DeviceError::NoPayload(GnssEvent::AgnssRequest))
    }

    fn delete_nav_data(&self, mask: DeleteMask) -> Result<(), DeviceError> {
        if self.inner.running.load(Ordering::SeqCst) {
            return Err(DeviceError::Running);
        }

        debug!("purging {:?}", mask);

        let mut state = self.inner.state.lock().unwrap();
        if !mask.is_empty() {
            state.nav_data_valid = false;
            state.agnss_raised = false;
        }

        Ok(())
    }
}

impl Inner {
    fn run(&self, generation: u64) {
        while self.alive(generation) {
            thread::sleep(self.tick);

            if !self.alive(generation) {
                return;
            }

            self.step();
        }
    }

    fn alive(&self, generation: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    /// One acquisition tick: refresh payloads, then upcall the handler.
    /// Payloads are written before the lock is released so the handler's
    /// read-back sees them.
    fn step(&self) {
        let mut events = Vec::new();

        {
            let mut state = self.state.lock().unwrap();
            state.ticks += 1;
            state.uptime_ticks += 1;

            // a receiver without stored data asks for everything once
            if !state.agnss_raised {
                state.agnss = Some(if state.nav_data_valid {
                    AgnssRequest {
                        sv_mask_ephe: 0x7f,
                        sv_mask_alm: 0,
                        flags: AgnssFlags::SYS_TIME_AND_TOW,
                    }
                } else {
                    AgnssRequest::full()
                });
                state.agnss_raised = true;
                events.push(GnssEvent::AgnssRequest);
            }

            let acquisition_ticks = if state.nav_data_valid {
                self.warm_ticks
            } else {
                self.warm_ticks * 2
            };

            let fix = state.ticks >= acquisition_ticks;
            let first_fix = fix && !state.had_fix;

            if first_fix {
                state.had_fix = true;
                state.nav_data_valid = true;
            }

            let snapshot = self.snapshot(&state, fix);
            let mask = state
                .config
                .map(|config| config.nmea_mask)
                .unwrap_or(NmeaMask::all());

            events.push(GnssEvent::Pvt);
            if first_fix {
                events.push(GnssEvent::Fix);
            }

            if mask.contains(NmeaMask::GSV) {
                state
                    .nmea
                    .push_back(sentence(format!("GPGSV,1,1,{:02}", snapshot.sv.len())));
                events.push(GnssEvent::Nmea);
            }

            if fix {
                if mask.contains(NmeaMask::GGA) {
                    state.nmea.push_back(gga(&snapshot));
                    events.push(GnssEvent::Nmea);
                }
                if mask.contains(NmeaMask::RMC) {
                    state.nmea.push_back(rmc(&snapshot));
                    events.push(GnssEvent::Nmea);
                }
            }

            state.pvt = Some(snapshot);
        }

        let handler = self.handler.lock().unwrap().clone();

        if let Some(handler) = handler {
            for event in events {
                handler(event);
            }
        }
    }

    fn snapshot(&self, state: &State, fix: bool) -> PvtSnapshot {
        let tracked = (state.ticks as usize).min(SV_PRNS.len());

        let sv = SV_PRNS[..tracked]
            .iter()
            .enumerate()
            .map(|(i, prn)| SvInfo {
                sv: SV::new(Constellation::GPS, *prn),
                cn0: 30.0 + (i % 12) as f64,
                flags: if fix && i < 6 {
                    SvFlags::USED_IN_FIX
                } else {
                    SvFlags::empty()
                },
            })
            .collect();

        let datetime = self.base
            + hifitime::Duration::from_seconds(state.uptime_ticks as f64 * self.tick.as_secs_f64());

        // slow deterministic wander around the reference point
        let wander = state.uptime_ticks as f64 * 1e-6;

        PvtSnapshot {
            latitude: 47.2056 + wander,
            longitude: -1.5546 + wander,
            altitude: 18.0,
            accuracy: if fix { 4.2 } else { 0.0 },
            speed: 0.3,
            speed_accuracy: 0.5,
            heading: 275.0,
            datetime,
            pdop: 2.1,
            hdop: 1.2,
            vdop: 1.7,
            tdop: 1.1,
            sv,
            flags: if fix {
                PvtFlags::FIX_VALID
            } else {
                PvtFlags::empty()
            },
        }
    }
}

/// Frames a sentence body with the `$...*hh` NMEA checksum
fn sentence(body: String) -> NmeaFrame {
    let checksum = body.bytes().fold(0u8, |acc, byte| acc ^ byte);
    NmeaFrame::new(format!("${}*{:02X}", body, checksum))
}

/// Converts decimal degrees to the NMEA ddmm.mmmm convention
fn to_nmea_angle(degrees: f64) -> f64 {
    let absolute = degrees.abs();
    let whole = absolute.trunc();
    whole * 100.0 + (absolute - whole) * 60.0
}

fn gga(snapshot: &PvtSnapshot) -> NmeaFrame {
    let (_, _, _, hh, mm, ss, _) = snapshot.datetime.to_gregorian_utc();
    let (_, used, _) = snapshot.sv_stats();

    sentence(format!(
        "GPGGA,{:02}{:02}{:02}.00,{:09.4},{},{:010.4},{},1,{:02},{:.1},{:.1},M,,",
        hh,
        mm,
        ss,
        to_nmea_angle(snapshot.latitude),
        if snapshot.latitude >= 0.0 { 'N' } else { 'S' },
        to_nmea_angle(snapshot.longitude),
        if snapshot.longitude >= 0.0 { 'E' } else { 'W' },
        used,
        snapshot.hdop,
        snapshot.altitude,
    ))
}

fn rmc(snapshot: &PvtSnapshot) -> NmeaFrame {
    let (year, month, day, hh, mm, ss, _) = snapshot.datetime.to_gregorian_utc();
    let knots = snapshot.speed * 3600.0 / 1852.0;

    sentence(format!(
        "GPRMC,{:02}{:02}{:02}.00,A,{:09.4},{},{:010.4},{},{:.1},{:.1},{:02}{:02}{:02},,",
        hh,
        mm,
        ss,
        to_nmea_angle(snapshot.latitude),
        if snapshot.latitude >= 0.0 { 'N' } else { 'S' },
        to_nmea_angle(snapshot.longitude),
        if snapshot.longitude >= 0.0 { 'E' } else { 'W' },
        knots,
        snapshot.heading,
        day,
        month,
        year % 100,
    ))
}

use std::time::Duration;

use itertools::Itertools;
use log::error;
use serde::Serialize;

use crate::{
    nmea::NmeaFrame,
    pvt::{PvtFlags, PvtSnapshot, SvFlags},
};

/// Display sink consumed by the render loop. Purely one-way: nothing here
/// feeds back into the tracking core.
pub trait Render {
    fn render_pvt(&mut self, snapshot: &PvtSnapshot, since_fix: Duration);

    fn render_frame(&mut self, frame: &NmeaFrame);
}

const UPDATE_INDICATOR: [char; 4] = ['\\', '|', '/', '-'];

/// Full-screen console display: satellite statistics plus either the fix
/// data or a searching indicator, then the NMEA stream.
#[derive(Default)]
pub struct ConsoleRender {
    spinner: usize,
}

impl ConsoleRender {
    pub fn new() -> Self {
        Default::default()
    }

    fn print_fix(&self, snapshot: &PvtSnapshot) {
        let (y, m, d, hh, mm, ss, ns) = snapshot.datetime.to_gregorian_utc();

        println!("Latitude:       {:.06}", snapshot.latitude);
        println!("Longitude:      {:.06}", snapshot.longitude);
        println!("Altitude:       {:.01} m", snapshot.altitude);
        println!("Accuracy:       {:.01} m", snapshot.accuracy);
        println!("Speed:          {:.01} m/s", snapshot.speed);
        println!("Speed accuracy: {:.01} m/s", snapshot.speed_accuracy);
        println!("Heading:        {:.01} deg", snapshot.heading);
        println!("Date:           {:04}-{:02}-{:02}", y, m, d);
        println!(
            "Time (UTC):     {:02}:{:02}:{:02}.{:03}",
            hh,
            mm,
            ss,
            ns / 1_000_000
        );
        println!("PDOP:           {:.01}", snapshot.pdop);
        println!("HDOP:           {:.01}", snapshot.hdop);
        println!("VDOP:           {:.01}", snapshot.vdop);
        println!("TDOP:           {:.01}", snapshot.tdop);

        let used = snapshot
            .sv
            .iter()
            .filter(|sv| sv.flags.contains(SvFlags::USED_IN_FIX))
            .map(|sv| sv.sv.to_string())
            .sorted()
            .join(", ");

        if !used.is_empty() {
            println!("Satellites:     {}", used);
        }
    }
}

impl Render for ConsoleRender {
    fn render_pvt(&mut self, snapshot: &PvtSnapshot, since_fix: Duration) {
        // home cursor, wipe previous frame
        print!("\x1B[1;1H\x1B[2J");

        let (tracked, used, unhealthy) = snapshot.sv_stats();
        println!("Tracking: {:2} Using: {:2} Unhealthy: {}", tracked, used, unhealthy);

        if snapshot.flags.contains(PvtFlags::DEADLINE_MISSED) {
            println!("GNSS operation blocked, deadline missed");
        }
        if snapshot.flags.contains(PvtFlags::NOT_ENOUGH_WINDOW_TIME) {
            println!("Insufficient GNSS time windows");
        }
        if snapshot.flags.contains(PvtFlags::SLEEP_BETWEEN_PVT) {
            println!("Sleep period(s) between PVT notifications");
        }
        println!("-----------------------------------");

        if snapshot.has_fix() {
            self.print_fix(snapshot);
        } else {
            println!("Seconds since last fix: {}", since_fix.as_secs());
            self.spinner = (self.spinner + 1) % UPDATE_INDICATOR.len();
            println!("Searching [{}]", UPDATE_INDICATOR[self.spinner]);
        }

        println!();
        println!("NMEA strings:");
        println!();
    }

    fn render_frame(&mut self, frame: &NmeaFrame) {
        println!("{}", frame);
    }
}

#[derive(Serialize)]
struct PvtRecord {
    time: String,
    fix_valid: bool,
    latitude: f64,
    longitude: f64,
    altitude: f64,
    accuracy: f64,
    speed: f64,
    heading: f64,
    pdop: f64,
    hdop: f64,
    tracked: usize,
    used: usize,
    unhealthy: usize,
    since_fix_s: u64,
}

#[derive(Serialize)]
struct FrameRecord<'a> {
    nmea: &'a str,
}

/// Machine readable alternative: one JSON object per line
#[derive(Default)]
pub struct JsonRender;

impl JsonRender {
    pub fn new() -> Self {
        Self
    }

    fn emit<T: Serialize>(record: &T) {
        match serde_json::to_string(record) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("failed to serialize record: {}", e),
        }
    }
}

impl Render for JsonRender {
    fn render_pvt(&mut self, snapshot: &PvtSnapshot, since_fix: Duration) {
        let (tracked, used, unhealthy) = snapshot.sv_stats();

        Self::emit(&PvtRecord {
            time: format!("{}", snapshot.datetime),
            fix_valid: snapshot.has_fix(),
            latitude: snapshot.latitude,
            longitude: snapshot.longitude,
            altitude: snapshot.altitude,
            accuracy: snapshot.accuracy,
            speed: snapshot.speed,
            heading: snapshot.heading,
            pdop: snapshot.pdop,
            hdop: snapshot.hdop,
            tracked,
            used,
            unhealthy,
            since_fix_s: since_fix.as_secs(),
        });
    }

    fn render_frame(&mut self, frame: &NmeaFrame) {
        Self::emit(&FrameRecord {
            nmea: frame.as_str(),
        });
    }
}

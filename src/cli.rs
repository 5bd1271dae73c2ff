use std::time::Duration;

use clap::{Arg, ArgAction, ArgMatches, ColorChoice, Command};

use crate::{
    device::{NmeaMask, PowerMode},
    nmea::DEFAULT_QUEUE_CAPACITY,
    settings::{AssistancePolicy, Settings, TrackingMode, TtffSettings},
};

pub struct Cli {
    /// Arguments passed by user
    matches: ArgMatches,
}

impl Cli {
    /// Build new command line interface
    pub fn new() -> Self {
        Self {
            matches: {
                Command::new("gnss-monitor")
                    .version(env!("CARGO_PKG_VERSION"))
                    .about("GNSS fix tracking, NMEA monitoring and TTFF benchmarking")
                    .color(ColorChoice::Always)
                    .next_help_heading("Tracking mode")
                    .arg(
                        Arg::new("mode")
                            .short('m')
                            .long("mode")
                            .value_name("MODE")
                            .help("Tracking mode: \"continuous\" (default), \"periodic\" or \"ttff\""),
                    )
                    .arg(
                        Arg::new("periodic-interval")
                            .long("periodic-interval")
                            .value_name("SECONDS")
                            .help("Time between periodic fix attempts. Default is 120 s"),
                    )
                    .arg(
                        Arg::new("periodic-timeout")
                            .long("periodic-timeout")
                            .value_name("SECONDS")
                            .help("Give-up time per periodic fix attempt. Default is 120 s"),
                    )
                    .arg(
                        Arg::new("low-accuracy")
                            .long("low-accuracy")
                            .action(ArgAction::SetTrue)
                            .help("Accept low accuracy fixes"),
                    )
                    .arg(
                        Arg::new("power-save")
                            .long("power-save")
                            .value_name("MODE")
                            .help("Duty cycling: \"off\" (default), \"performance\" or \"power\""),
                    )
                    .next_help_heading("TTFF benchmark")
                    .arg(
                        Arg::new("ttff-interval")
                            .long("ttff-interval")
                            .value_name("SECONDS")
                            .help("Rest time between benchmark cycles. Default is 120 s"),
                    )
                    .arg(
                        Arg::new("cold-start")
                            .long("cold-start")
                            .action(ArgAction::SetTrue)
                            .help("Purge stored navigation data before each benchmark cycle, keeping the clock-offset calibration"),
                    )
                    .next_help_heading("Assistance")
                    .arg(
                        Arg::new("assistance")
                            .short('a')
                            .long("assistance")
                            .value_name("SOURCE")
                            .help("Assistance data source: \"none\" (default), \"supl\" or \"minimal\""),
                    )
                    .next_help_heading("Display")
                    .arg(
                        Arg::new("nmea")
                            .long("nmea")
                            .value_name("SENTENCES")
                            .help("Comma separated NMEA sentence selection among gga, gll, gsa, gsv, rmc. All enabled by default"),
                    )
                    .arg(
                        Arg::new("nmea-only")
                            .long("nmea-only")
                            .action(ArgAction::SetTrue)
                            .help("Render the NMEA stream only, no solution display"),
                    )
                    .arg(
                        Arg::new("json")
                            .long("json")
                            .action(ArgAction::SetTrue)
                            .help("Render one JSON object per line instead of the console display"),
                    )
                    .arg(
                        Arg::new("queue-capacity")
                            .long("queue-capacity")
                            .value_name("FRAMES")
                            .help("NMEA frame queue depth. Default is 10; overflowing sentences are dropped"),
                    )
                    .next_help_heading("Simulated receiver")
                    .arg(
                        Arg::new("fix-delay")
                            .long("fix-delay")
                            .value_name("SECONDS")
                            .help("Warm acquisition time of the simulated receiver. Default is 10 s"),
                    )
                    .get_matches()
            },
        }
    }

    fn seconds(&self, id: &str, default: u64) -> Duration {
        let secs = match self.matches.get_one::<String>(id) {
            Some(value) => value
                .parse::<u64>()
                .unwrap_or_else(|e| panic!("invalid --{} value: {}", id, e)),
            None => default,
        };

        Duration::from_secs(secs)
    }

    fn mode(&self) -> TrackingMode {
        match self
            .matches
            .get_one::<String>("mode")
            .map(|s| s.as_str())
            .unwrap_or("continuous")
        {
            "continuous" => TrackingMode::Continuous,
            "periodic" => TrackingMode::Periodic {
                interval: self.seconds("periodic-interval", 120),
                timeout: self.seconds("periodic-timeout", 120),
            },
            "ttff" => TrackingMode::TtffBench,
            unknown => panic!("unknown tracking mode \"{}\"", unknown),
        }
    }

    fn assistance(&self) -> AssistancePolicy {
        match self
            .matches
            .get_one::<String>("assistance")
            .map(|s| s.as_str())
            .unwrap_or("none")
        {
            "none" => AssistancePolicy::Disabled,
            "supl" => AssistancePolicy::Supl,
            "minimal" => AssistancePolicy::Minimal,
            unknown => panic!("unknown assistance source \"{}\"", unknown),
        }
    }

    fn power_mode(&self) -> PowerMode {
        match self
            .matches
            .get_one::<String>("power-save")
            .map(|s| s.as_str())
            .unwrap_or("off")
        {
            "off" => PowerMode::Disabled,
            "performance" => PowerMode::DutyCyclingPerformance,
            "power" => PowerMode::DutyCyclingPower,
            unknown => panic!("unknown power saving mode \"{}\"", unknown),
        }
    }

    fn nmea_mask(&self) -> NmeaMask {
        let Some(selection) = self.matches.get_one::<String>("nmea") else {
            return NmeaMask::all();
        };

        let mut mask = NmeaMask::empty();

        for sentence in selection.split(',') {
            mask |= match sentence.trim() {
                "gga" => NmeaMask::GGA,
                "gll" => NmeaMask::GLL,
                "gsa" => NmeaMask::GSA,
                "gsv" => NmeaMask::GSV,
                "rmc" => NmeaMask::RMC,
                unknown => panic!("unknown NMEA sentence \"{}\"", unknown),
            };
        }

        mask
    }

    /// Warm acquisition time of the simulated receiver
    pub fn fix_delay(&self) -> Duration {
        self.seconds("fix-delay", 10)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            mode: self.mode(),
            assistance: self.assistance(),
            ttff: TtffSettings {
                interval: self.seconds("ttff-interval", 120),
                cold_start: self.matches.get_flag("cold-start"),
            },
            power_mode: self.power_mode(),
            nmea_mask: self.nmea_mask(),
            nmea_only: self.matches.get_flag("nmea-only"),
            low_accuracy: self.matches.get_flag("low-accuracy"),
            frame_queue_capacity: match self.matches.get_one::<String>("queue-capacity") {
                Some(value) => value
                    .parse::<usize>()
                    .unwrap_or_else(|e| panic!("invalid --queue-capacity value: {}", e)),
                None => DEFAULT_QUEUE_CAPACITY,
            },
            json: self.matches.get_flag("json"),
        }
    }
}

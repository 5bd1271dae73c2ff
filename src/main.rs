#![doc = include_str!("../README.md")]

extern crate gnss_rs as gnss;

use std::process;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

use env_logger::{Builder, Target};
use log::{error, info};

mod assistance;
mod cli;
mod device;
mod dispatcher;
mod nmea;
mod pvt;
mod render;
mod settings;
mod ttff;
mod worker;

use crate::{
    assistance::{Assistance, SimulatedSource},
    cli::Cli,
    device::{GnssReceiver, sim::SimulatedReceiver},
    dispatcher::EventDispatcher,
    nmea::{NmeaReader, nmea_queue},
    pvt::{FixReader, PvtFlags, fix_slot},
    render::{ConsoleRender, JsonRender, Render},
    settings::{Settings, TrackingMode},
    ttff::{BenchHandle, TtffRunner, TtffShared},
    worker::{Task, Worker, work_channel},
};

/// Simulated assistance transfer time
const ASSISTANCE_TRANSFER_TIME: Duration = Duration::from_secs(2);

#[tokio::main]
pub async fn main() {
    let mut builder = Builder::from_default_env();

    builder
        .target(Target::Stdout)
        .format_timestamp_secs()
        .format_module_path(false)
        .init();

    let cli = Cli::new();
    let settings = cli.settings();

    let benchmark = matches!(settings.mode, TrackingMode::TtffBench);

    info!("starting GNSS monitor");

    let receiver: Arc<dyn GnssReceiver> = Arc::new(SimulatedReceiver::new(cli.fix_delay()));

    // cross-context plumbing: coalescing fix slot, bounded frame queue,
    // background work queue
    let (slot, fix_reader) = fix_slot();
    let (frames, frame_reader) = nmea_queue(settings.frame_queue_capacity);
    let (submitter, tasks) = work_channel();

    let assistance_active = Arc::new(AtomicBool::new(false));
    let ttff_shared = Arc::new(TtffShared::new());

    let assistance = settings.assistance.enabled().then(|| {
        Assistance::new(
            settings.assistance,
            Box::new(SimulatedSource::new(ASSISTANCE_TRANSFER_TIME)),
            assistance_active.clone(),
        )
    });

    let ttff = benchmark.then(|| {
        TtffRunner::new(
            receiver.clone(),
            ttff_shared.clone(),
            submitter.clone(),
            settings.ttff,
            settings.assistance,
        )
    });

    let needs_worker = assistance.is_some() || ttff.is_some();

    if needs_worker {
        tokio::spawn(Worker::new(tasks, assistance, ttff).run());
    }

    let bench_handle = benchmark.then(|| BenchHandle {
        shared: ttff_shared.clone(),
        interval: settings.ttff.interval,
    });

    let dispatcher = EventDispatcher::new(
        receiver.clone(),
        slot,
        frames,
        needs_worker.then(|| submitter.clone()),
        bench_handle,
        settings.assistance.enabled(),
    );

    receiver.set_handler(dispatcher.into_handler());

    receiver
        .configure(&settings.receiver_config())
        .unwrap_or_else(|e| {
            error!("failed to configure GNSS: {}", e);
            process::exit(1);
        });

    if benchmark {
        // first cycle starts immediately, the rest are self-scheduling
        submitter.submit(Task::TtffPrepare);
        info!("TTFF benchmark deployed");
    } else {
        receiver.start().unwrap_or_else(|e| {
            error!("failed to start GNSS: {}", e);
            process::exit(1);
        });
        info!("GNSS tracking deployed");
    }

    let render: Box<dyn Render> = if settings.json {
        Box::new(JsonRender::new())
    } else {
        Box::new(ConsoleRender::new())
    };

    poll_loop(
        fix_reader,
        frame_reader,
        render,
        settings,
        assistance_active,
        ttff_shared,
    )
    .await;
}

/// The single consumer context: waits on "solution pending" or "frame
/// queued", drains whichever is ready, renders, repeats forever.
async fn poll_loop(
    fix: FixReader,
    mut frames: NmeaReader,
    mut render: Box<dyn Render>,
    settings: Settings,
    assistance_active: Arc<AtomicBool>,
    ttff: Arc<TtffShared>,
) {
    let benchmark = matches!(settings.mode, TrackingMode::TtffBench);
    let mut last_fix = Instant::now();

    loop {
        tokio::select! {
            _ = fix.ready() => {
                let Some(snapshot) = fix.try_consume() else {
                    continue;
                };

                if benchmark {
                    // the blocked-sample counter is this loop's to write
                    // until the fix milestone hands it to the report task
                    if ttff.awaiting_fix() && snapshot.flags.contains(PvtFlags::DEADLINE_MISSED) {
                        ttff.count_blocked_sample();
                    }
                    continue;
                }

                // display-only check, a stale read at worst delays one frame
                if settings.nmea_only || assistance_active.load(Ordering::Relaxed) {
                    continue;
                }

                if snapshot.has_fix() {
                    last_fix = Instant::now();
                }

                render.render_pvt(&snapshot, last_fix.elapsed());
            },

            frame = frames.dequeue() => {
                // None only when every producer is gone
                let Some(frame) = frame else {
                    return;
                };

                if !assistance_active.load(Ordering::Relaxed) {
                    render.render_frame(&frame);
                }

                // drain whatever else arrived in the meantime
                while let Some(frame) = frames.try_dequeue() {
                    if !assistance_active.load(Ordering::Relaxed) {
                        render.render_frame(&frame);
                    }
                }
            },
        }
    }
}

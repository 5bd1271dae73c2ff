use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};

use crate::{
    device::{EventHandler, GnssEvent, GnssReceiver},
    nmea::NmeaQueue,
    pvt::FixSlot,
    ttff::BenchHandle,
    worker::{Task, WorkSubmitter},
};

/// Reports are held back briefly so they do not interleave with the NMEA
/// sentences surrounding the fix.
const REPORT_DELAY: Duration = Duration::from_millis(100);

/// Classifies receiver events and routes their payloads. Runs entirely on
/// the receiver's notification context: nothing in here may suspend, and
/// every hand-off is a non-blocking publish, enqueue or task submission.
pub struct EventDispatcher {
    receiver: Arc<dyn GnssReceiver>,
    slot: FixSlot,
    frames: NmeaQueue,
    work: Option<WorkSubmitter>,
    bench: Option<BenchHandle>,
    assistance_enabled: bool,
}

impl EventDispatcher {
    pub fn new(
        receiver: Arc<dyn GnssReceiver>,
        slot: FixSlot,
        frames: NmeaQueue,
        work: Option<WorkSubmitter>,
        bench: Option<BenchHandle>,
        assistance_enabled: bool,
    ) -> Self {
        Self {
            receiver,
            slot,
            frames,
            work,
            bench,
            assistance_enabled,
        }
    }

    pub fn handle(&self, event: GnssEvent) {
        match event {
            GnssEvent::Pvt => match self.receiver.read_pvt() {
                // overwrites any unread solution: only the newest one matters
                Ok(snapshot) => self.slot.publish(snapshot),
                Err(e) => error!("failed to read PVT solution: {}", e),
            },

            GnssEvent::Fix => {
                let (Some(bench), Some(work)) = (&self.bench, &self.work) else {
                    return;
                };

                // the milestone ends the measurement and transfers the
                // blocked-sample counter to the report task
                let Some(time_to_fix) = bench.shared.fix_obtained() else {
                    debug!("fix milestone outside a benchmark cycle, ignored");
                    return;
                };

                work.submit_after(Task::TtffReport { time_to_fix }, REPORT_DELAY);
                work.submit_after(Task::TtffPrepare, bench.interval);
            },

            GnssEvent::Nmea => match self.receiver.read_nmea() {
                Ok(frame) => {
                    if !self.frames.try_enqueue(frame) {
                        // expected under bursty output, not an error
                        warn!("NMEA queue full, sentence dropped");
                    }
                },
                Err(e) => error!("failed to read NMEA sentence: {}", e),
            },

            GnssEvent::AgnssRequest => {
                if !self.assistance_enabled {
                    return;
                }

                let Some(work) = &self.work else {
                    return;
                };

                match self.receiver.read_agnss_request() {
                    // the request travels inside the task: nobody writes it
                    // after this point, nobody reads it before the task runs
                    Ok(request) => work.submit(Task::FetchAssistance(request)),
                    Err(e) => error!("failed to read assistance request: {}", e),
                }
            },
        }
    }

    /// Wraps the dispatcher into the upcall registered on the receiver
    pub fn into_handler(self) -> EventHandler {
        Arc::new(move |event| self.handle(event))
    }
}

#[cfg(test)]
mod test {
    use super::EventDispatcher;
    use crate::assistance::{AgnssFlags, AgnssRequest};
    use crate::device::{
        DeleteMask, DeviceError, EventHandler, GnssEvent, GnssReceiver, ReceiverConfig,
    };
    use crate::nmea::{NmeaFrame, nmea_queue};
    use crate::pvt::{PvtFlags, PvtSnapshot, fix_slot};
    use crate::ttff::{BenchHandle, TtffShared};
    use crate::worker::{Task, work_channel};
    use hifitime::Epoch;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Receiver double with scripted payloads
    #[derive(Default)]
    struct Stub {
        pvt: Mutex<Option<PvtSnapshot>>,
        nmea: Mutex<VecDeque<NmeaFrame>>,
        agnss: Mutex<Option<AgnssRequest>>,
    }

    impl GnssReceiver for Stub {
        fn set_handler(&self, _: EventHandler) {}

        fn configure(&self, _: &ReceiverConfig) -> Result<(), DeviceError> {
            Ok(())
        }

        fn start(&self) -> Result<(), DeviceError> {
            Ok(())
        }

        fn stop(&self) -> Result<(), DeviceError> {
            Ok(())
        }

        fn read_pvt(&self) -> Result<PvtSnapshot, DeviceError> {
            self.pvt
                .lock()
                .unwrap()
                .take()
                .ok_or(DeviceError::NoPayload(GnssEvent::Pvt))
        }

        fn read_nmea(&self) -> Result<NmeaFrame, DeviceError> {
            self.nmea
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(DeviceError::NoPayload(GnssEvent::Nmea))
        }

        fn read_agnss_request(&self) -> Result<AgnssRequest, DeviceError> {
            self.agnss
                .lock()
                .unwrap()
                .take()
                .ok_or(DeviceError::NoPayload(GnssEvent::AgnssRequest))
        }

        fn delete_nav_data(&self, _: DeleteMask) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    fn snapshot() -> PvtSnapshot {
        PvtSnapshot {
            latitude: 47.2,
            longitude: -1.55,
            altitude: 12.0,
            accuracy: 4.2,
            speed: 0.0,
            speed_accuracy: 0.5,
            heading: 0.0,
            datetime: Epoch::from_gregorian_utc(2025, 6, 1, 12, 0, 0, 0),
            pdop: 2.1,
            hdop: 1.2,
            vdop: 1.7,
            tdop: 1.1,
            sv: Default::default(),
            flags: PvtFlags::FIX_VALID,
        }
    }

    #[test]
    fn pvt_event_publishes_to_slot() {
        let stub = Arc::new(Stub::default());
        let (slot, reader) = fix_slot();
        let (frames, _frame_reader) = nmea_queue(4);

        *stub.pvt.lock().unwrap() = Some(snapshot());

        let dispatcher = EventDispatcher::new(stub.clone(), slot, frames, None, None, false);

        dispatcher.handle(GnssEvent::Pvt);
        assert_eq!(reader.try_consume().unwrap().latitude, 47.2);

        // failed read drops the event, slot stays empty
        dispatcher.handle(GnssEvent::Pvt);
        assert!(reader.try_consume().is_none());
    }

    #[test]
    fn nmea_events_enqueue_until_full() {
        let stub = Arc::new(Stub::default());
        let (slot, _fix_reader) = fix_slot();
        let (frames, mut reader) = nmea_queue(2);

        {
            let mut nmea = stub.nmea.lock().unwrap();
            for text in ["$A*00", "$B*00", "$C*00"] {
                nmea.push_back(NmeaFrame::new(text.to_string()));
            }
        }

        let dispatcher = EventDispatcher::new(stub, slot, frames, None, None, false);

        // third sentence hits a full queue and is dropped
        dispatcher.handle(GnssEvent::Nmea);
        dispatcher.handle(GnssEvent::Nmea);
        dispatcher.handle(GnssEvent::Nmea);

        assert_eq!(reader.try_dequeue().unwrap().as_str(), "$A*00");
        assert_eq!(reader.try_dequeue().unwrap().as_str(), "$B*00");
        assert!(reader.try_dequeue().is_none());
    }

    #[test]
    fn assistance_request_submits_fetch_task() {
        let stub = Arc::new(Stub::default());
        let (slot, _fix_reader) = fix_slot();
        let (frames, _frame_reader) = nmea_queue(4);
        let (submitter, mut queue) = work_channel();

        let request = AgnssRequest {
            sv_mask_ephe: 0xff,
            sv_mask_alm: 0,
            flags: AgnssFlags::SYS_TIME_AND_TOW,
        };
        *stub.agnss.lock().unwrap() = Some(request);

        let dispatcher =
            EventDispatcher::new(stub.clone(), slot, frames, Some(submitter), None, true);

        dispatcher.handle(GnssEvent::AgnssRequest);
        assert_eq!(queue.drain(), vec![Task::FetchAssistance(request)]);

        // nothing pending anymore: the event is dropped, no task submitted
        dispatcher.handle(GnssEvent::AgnssRequest);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn assistance_request_ignored_when_disabled() {
        let stub = Arc::new(Stub::default());
        let (slot, _fix_reader) = fix_slot();
        let (frames, _frame_reader) = nmea_queue(4);
        let (submitter, mut queue) = work_channel();

        *stub.agnss.lock().unwrap() = Some(AgnssRequest::full());

        let dispatcher =
            EventDispatcher::new(stub, slot, frames, Some(submitter), None, false);

        dispatcher.handle(GnssEvent::AgnssRequest);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn fix_milestone_schedules_report_and_next_cycle() {
        let stub = Arc::new(Stub::default());
        let (slot, _fix_reader) = fix_slot();
        let (frames, _frame_reader) = nmea_queue(4);
        let (submitter, mut queue) = work_channel();

        let shared = Arc::new(TtffShared::new());
        shared.cycle_started();

        let bench = BenchHandle {
            shared: shared.clone(),
            interval: Duration::from_secs(120),
        };

        let dispatcher =
            EventDispatcher::new(stub, slot, frames, Some(submitter), Some(bench), false);

        dispatcher.handle(GnssEvent::Fix);

        let tasks = queue.drain();
        assert_eq!(tasks.len(), 2);
        assert!(matches!(tasks[0], Task::TtffReport { .. }));
        assert_eq!(tasks[1], Task::TtffPrepare);

        // second milestone without a new cycle start is ignored
        dispatcher.handle(GnssEvent::Fix);
        assert!(queue.drain().is_empty());
    }
}

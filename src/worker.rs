use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::time::sleep_until;

use crate::{
    assistance::{AgnssRequest, Assistance},
    ttff::TtffRunner,
};

/// Work items executed by the background worker, one at a time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Fetch assistance data for the carried request
    FetchAssistance(AgnssRequest),

    /// Bring the receiver into a clean state for the next benchmark cycle
    TtffPrepare,

    /// Start the receiver and open the measurement window
    TtffStart,

    /// Log the completed benchmark cycle
    TtffReport {
        /// Acquisition time measured at the fix milestone
        time_to_fix: Duration,
    },
}

struct Scheduled {
    /// Submission order, ties between simultaneously-eligible items
    seq: u64,

    /// None = eligible immediately
    eligible_at: Option<Instant>,

    task: Task,
}

/// Submission handle, cloneable across contexts. Submitting never blocks.
#[derive(Clone)]
pub struct WorkSubmitter {
    tx: mpsc::UnboundedSender<Scheduled>,
    seq: Arc<AtomicU64>,
}

/// Receiving end owned by the [Worker]
pub struct TaskQueue {
    rx: mpsc::UnboundedReceiver<Scheduled>,
}

/// Builds a connected [WorkSubmitter]/[TaskQueue] pair
pub fn work_channel() -> (WorkSubmitter, TaskQueue) {
    let (tx, rx) = mpsc::unbounded_channel();

    (
        WorkSubmitter {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        },
        TaskQueue { rx },
    )
}

impl WorkSubmitter {
    /// Queues a task, eligible immediately
    pub fn submit(&self, task: Task) {
        self.send(task, None);
    }

    /// Queues a task that becomes eligible once `delay` has elapsed,
    /// counted from now. An earlier task still running can push execution
    /// further out, the delay itself never shrinks.
    pub fn submit_after(&self, task: Task, delay: Duration) {
        self.send(task, Some(Instant::now() + delay));
    }

    fn send(&self, task: Task, eligible_at: Option<Instant>) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);

        let scheduled = Scheduled {
            seq,
            eligible_at,
            task,
        };

        if self.tx.send(scheduled).is_err() {
            warn!("background worker is gone, task dropped");
        }
    }
}

impl TaskQueue {
    #[cfg(test)]
    pub(crate) fn drain(&mut self) -> Vec<Task> {
        let mut tasks = Vec::new();
        while let Ok(scheduled) = self.rx.try_recv() {
            tasks.push(scheduled.task);
        }
        tasks
    }
}

/// Single background context draining submitted tasks. Undelayed tasks run
/// in submission order; delayed tasks join the eligible set once their
/// deadline passes and are then ordered by submission sequence as well.
pub struct Worker {
    tasks: TaskQueue,
    queued: Vec<Scheduled>,
    assistance: Option<Assistance>,
    ttff: Option<TtffRunner>,
    closed: bool,
}

impl Worker {
    pub fn new(tasks: TaskQueue, assistance: Option<Assistance>, ttff: Option<TtffRunner>) -> Self {
        Self {
            tasks,
            queued: Vec::new(),
            assistance,
            ttff,
            closed: false,
        }
    }

    pub async fn run(mut self) {
        loop {
            while let Some(index) = self.next_eligible(Instant::now()) {
                let scheduled = self.queued.swap_remove(index);
                self.execute(scheduled.task);
            }

            if self.closed && self.queued.is_empty() {
                return;
            }

            // everything left is delayed: earliest deadline wakes us up
            let wakeup = self.queued.iter().filter_map(|s| s.eligible_at).min();

            if self.closed {
                match wakeup {
                    Some(deadline) => sleep_until(deadline.into()).await,
                    None => return,
                }
                continue;
            }

            tokio::select! {
                received = self.tasks.rx.recv() => match received {
                    Some(scheduled) => self.queued.push(scheduled),
                    None => self.closed = true,
                },
                _ = sleep_until(wakeup.unwrap_or_else(Instant::now).into()), if wakeup.is_some() => {},
            }
        }
    }

    /// Lowest submission sequence among currently-eligible items
    fn next_eligible(&self, now: Instant) -> Option<usize> {
        self.queued
            .iter()
            .enumerate()
            .filter(|(_, s)| s.eligible_at.is_none_or(|at| at <= now))
            .min_by_key(|(_, s)| s.seq)
            .map(|(index, _)| index)
    }

    fn execute(&mut self, task: Task) {
        debug!("executing {:?}", task);

        match task {
            Task::FetchAssistance(request) => match self.assistance.as_mut() {
                Some(assistance) => assistance.serve(&request),
                None => debug!("assistance disabled, request ignored"),
            },
            Task::TtffPrepare => {
                if let Some(ttff) = self.ttff.as_mut() {
                    ttff.prepare();
                }
            },
            Task::TtffStart => {
                if let Some(ttff) = self.ttff.as_mut() {
                    ttff.start();
                }
            },
            Task::TtffReport { time_to_fix } => {
                if let Some(ttff) = self.ttff.as_mut() {
                    ttff.report(time_to_fix);
                }
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Task, Worker, work_channel};
    use crate::assistance::{
        AgnssFlags, AgnssRequest, Assistance, AssistanceError, AssistanceSource,
    };
    use crate::settings::AssistancePolicy;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Recorder {
        fetched: Arc<Mutex<Vec<u32>>>,
    }

    impl AssistanceSource for Recorder {
        fn fetch(&mut self, request: &AgnssRequest) -> Result<(), AssistanceError> {
            self.fetched.lock().unwrap().push(request.sv_mask_ephe);
            Ok(())
        }
    }

    fn tagged(tag: u32) -> Task {
        Task::FetchAssistance(AgnssRequest {
            sv_mask_ephe: tag,
            sv_mask_alm: 0,
            flags: AgnssFlags::SYS_TIME_AND_TOW,
        })
    }

    fn worker_with_recorder() -> (super::WorkSubmitter, Worker, Recorder) {
        let recorder = Recorder::default();
        let (submitter, queue) = work_channel();

        let assistance = Assistance::new(
            AssistancePolicy::Supl,
            Box::new(recorder.clone()),
            Arc::new(AtomicBool::new(false)),
        );

        (submitter, Worker::new(queue, Some(assistance), None), recorder)
    }

    #[tokio::test]
    async fn tasks_run_in_submission_order() {
        let (submitter, worker, recorder) = worker_with_recorder();

        for tag in 1..=4 {
            submitter.submit(tagged(tag));
        }
        drop(submitter);

        worker.run().await;
        assert_eq!(*recorder.fetched.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn delayed_task_waits_for_its_deadline() {
        let (submitter, worker, recorder) = worker_with_recorder();

        let begin = std::time::Instant::now();
        submitter.submit_after(tagged(1), Duration::from_millis(50));
        drop(submitter);

        worker.run().await;

        assert!(begin.elapsed() >= Duration::from_millis(50));
        assert_eq!(*recorder.fetched.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn immediate_task_overtakes_delayed_one() {
        let (submitter, worker, recorder) = worker_with_recorder();

        submitter.submit_after(tagged(1), Duration::from_millis(60));
        submitter.submit(tagged(2));
        drop(submitter);

        worker.run().await;
        assert_eq!(*recorder.fetched.lock().unwrap(), vec![2, 1]);
    }

    #[tokio::test]
    async fn eligible_delayed_tasks_keep_submission_order() {
        let (submitter, worker, recorder) = worker_with_recorder();

        // both become eligible at essentially the same deadline; submission
        // order must break the tie
        submitter.submit_after(tagged(1), Duration::from_millis(30));
        submitter.submit_after(tagged(2), Duration::from_millis(30));
        submitter.submit_after(tagged(3), Duration::from_millis(30));
        drop(submitter);

        worker.run().await;
        assert_eq!(*recorder.fetched.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn submission_from_running_task_is_served() {
        // a prepare-style task queued behind a fetch still runs after it
        let (submitter, worker, recorder) = worker_with_recorder();

        submitter.submit(tagged(1));

        let late = submitter.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            late.submit(tagged(2));
            drop(late);
        });
        drop(submitter);

        tokio::time::timeout(Duration::from_millis(500), worker.run())
            .await
            .unwrap();

        assert_eq!(*recorder.fetched.lock().unwrap(), vec![1, 2]);
    }
}

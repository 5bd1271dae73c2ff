use std::fmt;

use tokio::sync::mpsc;

/// Default frame queue depth
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// One complete NMEA sentence, owned end to end: created by the event
/// dispatcher, moved through the queue, released by the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NmeaFrame {
    line: String,
}

impl NmeaFrame {
    pub fn new(line: String) -> Self {
        Self { line }
    }

    pub fn as_str(&self) -> &str {
        &self.line
    }
}

impl fmt::Display for NmeaFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.line)
    }
}

/// Producer half of the bounded frame queue
pub struct NmeaQueue {
    tx: mpsc::Sender<NmeaFrame>,
}

/// Consumer half of the bounded frame queue
pub struct NmeaReader {
    rx: mpsc::Receiver<NmeaFrame>,
}

/// Builds a connected [NmeaQueue]/[NmeaReader] pair holding at most
/// `capacity` frames.
pub fn nmea_queue(capacity: usize) -> (NmeaQueue, NmeaReader) {
    let (tx, rx) = mpsc::channel(capacity);
    (NmeaQueue { tx }, NmeaReader { rx })
}

impl NmeaQueue {
    /// Never blocks. Returns false when the queue is full (or the consumer is
    /// gone), in which case the frame is dropped here.
    pub fn try_enqueue(&self, frame: NmeaFrame) -> bool {
        self.tx.try_send(frame).is_ok()
    }
}

impl NmeaReader {
    /// Suspends until a frame is available. None once all producers are gone.
    pub async fn dequeue(&mut self) -> Option<NmeaFrame> {
        self.rx.recv().await
    }

    /// Takes the next frame without suspending
    pub fn try_dequeue(&mut self) -> Option<NmeaFrame> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod test {
    use super::{NmeaFrame, nmea_queue};

    fn frame(text: &str) -> NmeaFrame {
        NmeaFrame::new(text.to_string())
    }

    #[test]
    fn full_queue_rejects_and_keeps_order() {
        let (queue, mut reader) = nmea_queue(3);

        assert!(queue.try_enqueue(frame("A")));
        assert!(queue.try_enqueue(frame("B")));
        assert!(queue.try_enqueue(frame("C")));

        // fourth frame is refused, queue left unchanged
        assert!(!queue.try_enqueue(frame("D")));

        assert_eq!(reader.try_dequeue().unwrap().as_str(), "A");
        assert_eq!(reader.try_dequeue().unwrap().as_str(), "B");
        assert_eq!(reader.try_dequeue().unwrap().as_str(), "C");
        assert!(reader.try_dequeue().is_none());
    }

    #[test]
    fn burst_drops_everything_past_capacity() {
        let (queue, mut reader) = nmea_queue(5);

        let mut dropped = 0;
        for i in 0..12 {
            if !queue.try_enqueue(frame(&format!("S{}", i))) {
                dropped += 1;
            }
        }

        assert_eq!(dropped, 7);

        // exactly the first 5 survive, in arrival order
        for i in 0..5 {
            assert_eq!(reader.try_dequeue().unwrap().as_str(), format!("S{}", i));
        }
        assert!(reader.try_dequeue().is_none());
    }

    #[tokio::test]
    async fn dequeue_waits_for_producer() {
        let (queue, mut reader) = nmea_queue(2);

        let producer = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            queue.try_enqueue(frame("$GPGGA,000000.00*66"));
        });

        let received = reader.dequeue().await.unwrap();
        assert_eq!(received.as_str(), "$GPGGA,000000.00*66");

        producer.await.unwrap();
    }

    #[test]
    fn consumption_frees_capacity() {
        let (queue, mut reader) = nmea_queue(2);

        assert!(queue.try_enqueue(frame("A")));
        assert!(queue.try_enqueue(frame("B")));
        assert!(!queue.try_enqueue(frame("C")));

        assert_eq!(reader.try_dequeue().unwrap().as_str(), "A");

        assert!(queue.try_enqueue(frame("D")));
        assert_eq!(reader.try_dequeue().unwrap().as_str(), "B");
        assert_eq!(reader.try_dequeue().unwrap().as_str(), "D");
    }
}

//! Latest-wins hand-off of [`DisplayRecord`]s to the presentation side.
//!
//! A capacity-one channel. The publisher keeps its own receiver end and
//! evicts an unread record before sending, so the reader only ever sees the
//! newest value and the analysis thread never blocks.

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};

use crate::DisplayRecord;

/// Creates a connected publisher/reader pair.
pub fn display_slot() -> (DisplayPublisher, DisplayReader) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (
        DisplayPublisher {
            tx,
            evict: rx.clone(),
        },
        DisplayReader { rx },
    )
}

#[derive(Debug, Clone)]
pub struct DisplayPublisher {
    tx: Sender<DisplayRecord>,
    evict: Receiver<DisplayRecord>,
}

impl DisplayPublisher {
    /// Replaces any unread record with `record`.
    pub fn publish(&self, record: DisplayRecord) {
        let mut record = record;
        loop {
            match self.tx.try_send(record) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(back)) => {
                    let _ = self.evict.try_recv();
                    record = back;
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DisplayReader {
    rx: Receiver<DisplayRecord>,
}

impl DisplayReader {
    /// The newest unread record, if any.
    pub fn latest(&self) -> Option<DisplayRecord> {
        match self.rx.try_recv() {
            Ok(record) => Some(record),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Blocks until a record arrives or the timeout expires.
    pub fn wait(&self, timeout: std::time::Duration) -> Option<DisplayRecord> {
        self.rx.recv_timeout(timeout).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hz: f64) -> DisplayRecord {
        DisplayRecord {
            ratio_text: "1/1".into(),
            cents: 0.0,
            hz,
            confidence: 1.0,
            lower_text: "15/8".into(),
            higher_text: "16/15".into(),
        }
    }

    #[test]
    fn reader_sees_only_the_newest() {
        let (publisher, reader) = display_slot();
        publisher.publish(record(1.0));
        publisher.publish(record(2.0));
        publisher.publish(record(3.0));
        assert_eq!(reader.latest().map(|r| r.hz), Some(3.0));
        assert_eq!(reader.latest(), None);
    }

    #[test]
    fn publish_never_blocks_across_threads() {
        let (publisher, reader) = display_slot();
        let handle = std::thread::spawn(move || {
            for i in 0..1000 {
                publisher.publish(record(i as f64));
            }
        });
        handle.join().unwrap();
        assert_eq!(reader.latest().map(|r| r.hz), Some(999.0));
    }
}

use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread;

use crate::record::DecodedMessage;
use crate::sink::{FieldValue, Point, PointSink};

/// Default number of records that triggers a flush hand-off.
pub const DEFAULT_BATCH_SIZE: usize = 2;

/// Default bound on batches waiting for the sink writer.
pub const DEFAULT_FLUSH_QUEUE_DEPTH: usize = 8;

/// Owns the pending batch; `accumulate` is its only mutator. When the
/// threshold is reached the whole batch is moved into the flush channel and
/// a fresh empty one takes its place, so the writer never shares backing
/// storage with the next accumulation cycle.
pub struct BatchDispatcher {
    pending: Vec<DecodedMessage>,
    threshold: usize,
    flush_tx: SyncSender<Vec<DecodedMessage>>,
}

impl BatchDispatcher {
    pub fn new(threshold: usize, flush_tx: SyncSender<Vec<DecodedMessage>>) -> Self {
        Self {
            pending: Vec::with_capacity(threshold),
            threshold: threshold.max(1),
            flush_tx,
        }
    }

    /// Append one decoded message; hands the batch off once the threshold
    /// is reached. A full flush queue blocks here, bounding in-flight
    /// batches when the sink is slow.
    pub fn accumulate(&mut self, message: DecodedMessage) {
        self.pending.push(message);
        if self.pending.len() >= self.threshold {
            let batch = std::mem::take(&mut self.pending);
            log::debug!("Handing off batch of {} records to sink writer", batch.len());
            if self.flush_tx.send(batch).is_err() {
                log::error!("Sink writer exited, batch dropped");
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Bounded hand-off channel between the dispatcher and the sink writer.
pub fn flush_channel(
    depth: usize,
) -> (SyncSender<Vec<DecodedMessage>>, Receiver<Vec<DecodedMessage>>) {
    mpsc::sync_channel(depth.max(1))
}

/// Writer thread: consumes handed-off batches and appends them to the sink.
/// Exits when the dispatcher side hangs up.
pub fn spawn_sink_writer<S>(
    batch_rx: Receiver<Vec<DecodedMessage>>,
    mut sink: S,
) -> thread::JoinHandle<()>
where
    S: PointSink + Send + 'static,
{
    thread::spawn(move || {
        while let Ok(batch) = batch_rx.recv() {
            write_batch(&mut sink, &batch);
        }
    })
}

/// Append every point of a batch; a failed point is logged and skipped, the
/// rest of the batch still goes out.
pub fn write_batch(sink: &mut dyn PointSink, batch: &[DecodedMessage]) {
    for message in batch {
        for point in points_for_message(message) {
            if let Err(err) = sink.write_point(&point) {
                log::warn!(
                    "Point write failed for node {}: {}",
                    message.header.id,
                    err
                );
            }
        }
    }
}

/// Map one decoded message to sink points: one `sensor` point, then one
/// `BLE` point per occupied scan slot. Node and device ids are shifted by
/// one so id 0 stays distinguishable from "unset" downstream.
pub fn points_for_message(message: &DecodedMessage) -> Vec<Point> {
    let header = &message.header;
    let record = &message.record;
    let timestamp_ns =
        Point::timestamp_from_parts(header.timestamp_secs, header.timestamp_micros);
    let node_id = (u16::from(header.id) + 1).to_string();

    let mut points = Vec::with_capacity(1 + record.ble.len());
    points.push(Point {
        measurement: "sensor",
        tags: vec![("id", node_id.clone())],
        fields: vec![
            ("avgDb", FieldValue::UInt(record.microphone.avg_db.into())),
            (
                "peakFrequency",
                FieldValue::UInt(record.microphone.peak_frequency.into()),
            ),
            (
                "zeroCrossingCount",
                FieldValue::UInt(record.microphone.zero_crossings.into()),
            ),
            ("roll", FieldValue::Float(record.orientation.roll.into())),
            ("pitch", FieldValue::Float(record.orientation.pitch.into())),
            ("yaw", FieldValue::Float(record.orientation.yaw.into())),
        ],
        timestamp_ns,
    });

    for sighting in record.ble.iter().filter(|sighting| !sighting.is_empty()) {
        points.push(Point {
            measurement: "BLE",
            tags: vec![
                ("id", node_id.clone()),
                ("device", (u16::from(sighting.device_name) + 1).to_string()),
            ],
            fields: vec![("rssi", FieldValue::UInt(sighting.rssi.into()))],
            timestamp_ns,
        });
    }

    points
}

use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use crate::dispatch::BatchDispatcher;
use crate::link::{LinkError, NodeLink};
use crate::proto::{parse_frame, FrameOutcome};
use crate::record::decode_records;

/// What one poll cycle did with the node's response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Node had nothing queued.
    Idle,
    /// Frame shorter than its declared length; dropped, no resend. The node
    /// re-sends on its own once the next poll comes around.
    Dropped,
    /// Checksum failed, resend requested.
    ResendRequested,
    /// Frame verified and acknowledged.
    Accepted { records: usize },
}

/// One full request/verify/decode/dispatch cycle.
pub fn poll_cycle<P: Read + Write>(
    link: &mut NodeLink<P>,
    dispatcher: &mut BatchDispatcher,
) -> Result<CycleOutcome, LinkError> {
    let buffer = link.request_frame()?;
    let outcome = match parse_frame(&buffer) {
        FrameOutcome::NoData => {
            log::info!("No response from node");
            CycleOutcome::Idle
        }
        FrameOutcome::Incomplete => {
            log::warn!(
                "Incomplete frame ({} bytes received), dropping until next poll",
                buffer.len()
            );
            CycleOutcome::Dropped
        }
        FrameOutcome::ChecksumMismatch { expected, actual } => {
            log::error!(
                "Checksum mismatch: expected 0x{:04X}, got 0x{:04X}",
                expected,
                actual
            );
            // The node decides on retransmission by itself if this byte is
            // lost, so a failed write is not fatal to the cycle.
            if let Err(err) = link.request_resend() {
                log::warn!("Failed to send resend byte: {}", err);
            }
            CycleOutcome::ResendRequested
        }
        FrameOutcome::Verified(payload) => {
            if let Err(err) = link.acknowledge() {
                log::warn!("Failed to send ack byte: {}", err);
            }
            let mut records = 0;
            for message in decode_records(&payload) {
                log::debug!(
                    "Decoded record from node {} at {}.{:06}",
                    message.header.id,
                    message.header.timestamp_secs,
                    message.header.timestamp_micros
                );
                dispatcher.accumulate(message);
                records += 1;
            }
            CycleOutcome::Accepted { records }
        }
    };

    if let Err(err) = link.flush_input() {
        log::warn!("Failed to flush link input: {}", err);
    }
    Ok(outcome)
}

/// Drive poll cycles forever. A transport failure abandons the cycle and
/// the loop carries on; nothing here is fatal.
pub fn run_poll_loop<P: Read + Write>(
    mut link: NodeLink<P>,
    mut dispatcher: BatchDispatcher,
    poll_interval: Duration,
) -> ! {
    loop {
        match poll_cycle(&mut link, &mut dispatcher) {
            Ok(CycleOutcome::Accepted { records }) => {
                log::info!(
                    "Accepted frame with {} records ({} pending)",
                    records,
                    dispatcher.pending_len()
                );
            }
            Ok(_) => {}
            Err(err) => {
                log::error!("Transport failure, skipping cycle: {}", err);
            }
        }
        thread::sleep(poll_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::flush_channel;
    use crate::link::test_support::FakePort;
    use crate::proto::{encode_frame, CMD_ACK, CMD_REQUEST_FRAME, CMD_RESEND};
    use crate::record::test_support::{encode_window, sample_message};

    fn dispatcher_with_capacity(
        threshold: usize,
    ) -> (BatchDispatcher, std::sync::mpsc::Receiver<Vec<crate::record::DecodedMessage>>) {
        let (tx, rx) = flush_channel(4);
        (BatchDispatcher::new(threshold, tx), rx)
    }

    fn single_record_frame() -> Vec<u8> {
        let message = sample_message(4, 1_700_000_000);
        encode_frame(&encode_window(&message.header, &message.record))
    }

    #[test]
    fn verified_frame_is_decoded_and_acknowledged() {
        let frame = single_record_frame();
        assert_eq!(frame[0], 0x38); // one 56-byte stride declared
        let mut link = NodeLink::new(FakePort::new(vec![frame]));
        let (mut dispatcher, _rx) = dispatcher_with_capacity(10);

        let outcome = poll_cycle(&mut link, &mut dispatcher).unwrap();
        assert_eq!(outcome, CycleOutcome::Accepted { records: 1 });
        assert_eq!(dispatcher.pending_len(), 1);
        assert_eq!(link.port().written, vec![CMD_REQUEST_FRAME, CMD_ACK]);
    }

    #[test]
    fn corrupted_frame_requests_resend() {
        let mut frame = single_record_frame();
        frame[10] ^= 0xFF;
        let mut link = NodeLink::new(FakePort::new(vec![frame]));
        let (mut dispatcher, _rx) = dispatcher_with_capacity(10);

        let outcome = poll_cycle(&mut link, &mut dispatcher).unwrap();
        assert_eq!(outcome, CycleOutcome::ResendRequested);
        assert_eq!(dispatcher.pending_len(), 0);
        assert_eq!(link.port().written, vec![CMD_REQUEST_FRAME, CMD_RESEND]);
    }

    #[test]
    fn empty_response_is_idle() {
        let mut link = NodeLink::new(FakePort::new(vec![]));
        let (mut dispatcher, _rx) = dispatcher_with_capacity(10);
        let outcome = poll_cycle(&mut link, &mut dispatcher).unwrap();
        assert_eq!(outcome, CycleOutcome::Idle);
        assert_eq!(link.port().written, vec![CMD_REQUEST_FRAME]);
    }

    #[test]
    fn incomplete_frame_is_dropped_without_resend() {
        let mut frame = single_record_frame();
        frame.truncate(frame.len() - 5);
        let mut link = NodeLink::new(FakePort::new(vec![frame]));
        let (mut dispatcher, _rx) = dispatcher_with_capacity(10);

        let outcome = poll_cycle(&mut link, &mut dispatcher).unwrap();
        assert_eq!(outcome, CycleOutcome::Dropped);
        // Only the trigger byte, no ack and no resend.
        assert_eq!(link.port().written, vec![CMD_REQUEST_FRAME]);
    }

    #[test]
    fn transport_failure_propagates() {
        let mut port = FakePort::new(vec![]);
        port.fail_reads = true;
        let mut link = NodeLink::new(port);
        let (mut dispatcher, _rx) = dispatcher_with_capacity(10);
        assert!(poll_cycle(&mut link, &mut dispatcher).is_err());
    }
}

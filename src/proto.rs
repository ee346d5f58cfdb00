/// Serial control bytes understood by the sensor node.
pub const CMD_REQUEST_FRAME: u8 = 0x25;
pub const CMD_RESEND: u8 = 0x19;
pub const CMD_ACK: u8 = 0x07;
pub const CMD_TIME_SYNC: u8 = 0x11;

/// CRC-16/CCITT-FALSE polynomial, shared with the node firmware.
const POLYNOMIAL: u16 = 0x1021;

/// Frame wire format: `[length:u16 LE][checksum:u16 LE][payload:length bytes]`.
const FRAME_OVERHEAD: usize = 4;

/// Result of parsing one raw response buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Empty response, node had nothing to send.
    NoData,
    /// Fewer bytes than the declared frame needs; dropped without resend.
    Incomplete,
    /// Payload checksum did not match, caller should request a resend.
    ChecksumMismatch { expected: u16, actual: u16 },
    /// Verified payload, caller should acknowledge.
    Verified(Vec<u8>),
}

/// CRC-16/CCITT-FALSE over the payload (init 0xFFFF, MSB-first, no final XOR).
/// Must stay bit-identical to `checksumCalculator` in the node firmware.
pub fn checksum16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ POLYNOMIAL;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Parse one response buffer into a frame outcome. Pure; the resend/ack
/// side effects are the caller's.
pub fn parse_frame(buffer: &[u8]) -> FrameOutcome {
    if buffer.is_empty() {
        return FrameOutcome::NoData;
    }
    if buffer.len() < 2 {
        return FrameOutcome::Incomplete;
    }
    let length = u16::from_le_bytes([buffer[0], buffer[1]]) as usize;
    if buffer.len() < length + FRAME_OVERHEAD {
        return FrameOutcome::Incomplete;
    }
    let expected = u16::from_le_bytes([buffer[2], buffer[3]]);
    let payload = &buffer[FRAME_OVERHEAD..FRAME_OVERHEAD + length];
    let actual = checksum16(payload);
    if actual != expected {
        FrameOutcome::ChecksumMismatch { expected, actual }
    } else {
        FrameOutcome::Verified(payload.to_vec())
    }
}

/// Build a frame buffer around a payload, mirroring what the node firmware
/// sends. Drives the parser with well-formed frames in tests.
#[cfg(test)]
pub(crate) fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(&checksum16(payload).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

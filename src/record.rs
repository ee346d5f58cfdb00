pub const HEADER_LEN: usize = 16;
pub const RECORD_LEN: usize = 40;
/// One header + record pair per window; record boundaries are inferred
/// purely from this stride, so it must mirror the node's struct layout.
pub const RECORD_STRIDE: usize = HEADER_LEN + RECORD_LEN;

pub const BLE_SLOTS: usize = 10;

/// Nodes with an un-synced clock report epoch-near timestamps; anything
/// below this is discarded.
const MIN_PLAUSIBLE_TIMESTAMP: u32 = 1000;

/// Fixed-width header preceding every telemetry record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub message_type: u32,
    pub id: u8,
    pub timestamp_secs: u32,
    pub timestamp_micros: u32,
}

/// Microphone summary for one sampling window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MicrophoneSample {
    pub avg_db: u16,
    pub peak_frequency: u16,
    pub zero_crossings: u16,
}

/// Accelerometer-derived orientation, degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Orientation {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

/// One BLE scan slot; `device_name == 0` marks an empty slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BleSighting {
    pub device_name: u8,
    pub rssi: u8,
}

impl BleSighting {
    pub fn is_empty(&self) -> bool {
        self.device_name == 0
    }
}

/// Decoded telemetry for one sampling window.
#[derive(Clone, Debug, PartialEq)]
pub struct TelemetryRecord {
    pub microphone: MicrophoneSample,
    pub orientation: Orientation,
    pub ble: [BleSighting; BLE_SLOTS],
}

/// One decoded header + record pair, owned exclusively by whichever stage
/// currently holds it.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedMessage {
    pub header: RecordHeader,
    pub record: Box<TelemetryRecord>,
}

impl RecordHeader {
    /// Decode from the 16-byte wire layout. Offsets 5..8 are reserved
    /// padding on the node and carry no meaning.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            message_type: read_u32(data, 0)?,
            id: data[4],
            timestamp_secs: read_u32(data, 8)?,
            timestamp_micros: read_u32(data, 12)?,
        })
    }
}

impl TelemetryRecord {
    /// Decode from the 40-byte wire layout. Offsets 6..8 are a reserved
    /// alignment field.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < RECORD_LEN {
            return None;
        }
        let microphone = MicrophoneSample {
            avg_db: read_u16(data, 0)?,
            peak_frequency: read_u16(data, 2)?,
            zero_crossings: read_u16(data, 4)?,
        };
        let orientation = Orientation {
            roll: read_f32(data, 8)?,
            pitch: read_f32(data, 12)?,
            yaw: read_f32(data, 16)?,
        };
        let mut ble = [BleSighting {
            device_name: 0,
            rssi: 0,
        }; BLE_SLOTS];
        for (slot, sighting) in ble.iter_mut().enumerate() {
            let offset = 20 + slot * 2;
            sighting.device_name = data[offset];
            sighting.rssi = data[offset + 1];
        }
        Some(Self {
            microphone,
            orientation,
            ble,
        })
    }
}

/// Walk a verified payload in non-overlapping stride windows and decode
/// each into a message. A trailing partial window is dropped; windows that
/// fail to decode or carry an implausible timestamp are skipped.
pub fn decode_records(payload: &[u8]) -> impl Iterator<Item = DecodedMessage> + '_ {
    payload
        .chunks_exact(RECORD_STRIDE)
        .filter_map(|window| match decode_window(window) {
            Some(message) => {
                if message.header.timestamp_secs < MIN_PLAUSIBLE_TIMESTAMP {
                    log::warn!(
                        "Skipping record from node {}: timestamp {} predates time sync",
                        message.header.id,
                        message.header.timestamp_secs
                    );
                    None
                } else {
                    Some(message)
                }
            }
            None => {
                log::error!("Failed to decode {}-byte record window", window.len());
                None
            }
        })
}

/// Decode one full stride window into header + record.
fn decode_window(window: &[u8]) -> Option<DecodedMessage> {
    let header = RecordHeader::from_bytes(&window[..HEADER_LEN])?;
    let record = TelemetryRecord::from_bytes(&window[HEADER_LEN..])?;
    Some(DecodedMessage {
        header,
        record: Box::new(record),
    })
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_f32(data: &[u8], offset: usize) -> Option<f32> {
    read_u32(data, offset).map(f32::from_bits)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Encode a header + record pair into its 56-byte wire layout.
    pub fn encode_window(header: &RecordHeader, record: &TelemetryRecord) -> Vec<u8> {
        let mut out = Vec::with_capacity(RECORD_STRIDE);
        out.extend_from_slice(&header.message_type.to_le_bytes());
        out.push(header.id);
        out.extend_from_slice(&[0u8; 3]);
        out.extend_from_slice(&header.timestamp_secs.to_le_bytes());
        out.extend_from_slice(&header.timestamp_micros.to_le_bytes());
        out.extend_from_slice(&record.microphone.avg_db.to_le_bytes());
        out.extend_from_slice(&record.microphone.peak_frequency.to_le_bytes());
        out.extend_from_slice(&record.microphone.zero_crossings.to_le_bytes());
        out.extend_from_slice(&[0u8; 2]);
        out.extend_from_slice(&record.orientation.roll.to_le_bytes());
        out.extend_from_slice(&record.orientation.pitch.to_le_bytes());
        out.extend_from_slice(&record.orientation.yaw.to_le_bytes());
        for sighting in &record.ble {
            out.push(sighting.device_name);
            out.push(sighting.rssi);
        }
        assert_eq!(out.len(), RECORD_STRIDE);
        out
    }

    /// A representative message for tests.
    pub fn sample_message(id: u8, timestamp_secs: u32) -> DecodedMessage {
        let mut ble = [BleSighting {
            device_name: 0,
            rssi: 0,
        }; BLE_SLOTS];
        ble[0] = BleSighting {
            device_name: 5,
            rssi: 200,
        };
        DecodedMessage {
            header: RecordHeader {
                message_type: 3,
                id,
                timestamp_secs,
                timestamp_micros: 250_000,
            },
            record: Box::new(TelemetryRecord {
                microphone: MicrophoneSample {
                    avg_db: 62,
                    peak_frequency: 440,
                    zero_crossings: 120,
                },
                orientation: Orientation {
                    roll: 1.5,
                    pitch: -0.25,
                    yaw: 10.0,
                },
                ble,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{encode_window, sample_message};
    use super::*;

    #[test]
    fn decodes_one_window_roundtrip() {
        let message = sample_message(4, 1_700_000_000);
        let bytes = encode_window(&message.header, &message.record);
        let decoded: Vec<_> = decode_records(&bytes).collect();
        assert_eq!(decoded, vec![message]);
    }

    #[test]
    fn drops_trailing_partial_window() {
        let message = sample_message(1, 2000);
        let mut bytes = encode_window(&message.header, &message.record);
        bytes.extend_from_slice(&encode_window(&message.header, &message.record)[..17]);
        let decoded: Vec<_> = decode_records(&bytes).collect();
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn filters_implausible_timestamps() {
        let early = sample_message(1, 999);
        let synced = sample_message(1, 1000);
        let mut bytes = encode_window(&early.header, &early.record);
        bytes.extend_from_slice(&encode_window(&synced.header, &synced.record));
        let decoded: Vec<_> = decode_records(&bytes).collect();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].header.timestamp_secs, 1000);
    }

    #[test]
    fn empty_payload_decodes_to_nothing() {
        assert_eq!(decode_records(&[]).count(), 0);
    }

    #[test]
    fn header_field_offsets_match_wire_layout() {
        let message = sample_message(7, 5000);
        let bytes = encode_window(&message.header, &message.record);
        let header = RecordHeader::from_bytes(&bytes[..HEADER_LEN]).unwrap();
        assert_eq!(header.message_type, 3);
        assert_eq!(header.id, 7);
        assert_eq!(header.timestamp_secs, 5000);
        assert_eq!(header.timestamp_micros, 250_000);
    }

    #[test]
    fn record_field_offsets_match_wire_layout() {
        let message = sample_message(7, 5000);
        let bytes = encode_window(&message.header, &message.record);
        let record = TelemetryRecord::from_bytes(&bytes[HEADER_LEN..]).unwrap();
        assert_eq!(record.microphone.avg_db, 62);
        assert_eq!(record.microphone.peak_frequency, 440);
        assert_eq!(record.microphone.zero_crossings, 120);
        assert_eq!(record.orientation.roll, 1.5);
        assert_eq!(record.ble[0].device_name, 5);
        assert_eq!(record.ble[0].rssi, 200);
        assert!(record.ble[1].is_empty());
    }

    #[test]
    fn short_window_fails_cleanly() {
        assert!(RecordHeader::from_bytes(&[0u8; HEADER_LEN - 1]).is_none());
        assert!(TelemetryRecord::from_bytes(&[0u8; RECORD_LEN - 1]).is_none());
    }
}

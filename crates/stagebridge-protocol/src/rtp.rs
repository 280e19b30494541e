use std::time::{SystemTime, UNIX_EPOCH};

// -- RTP-MIDI framing --
// One MIDI event per packet, no journal, no coalescing.

/// RTP version 2, no padding, no extension, no CSRC
pub const RTP_HEADER_BYTE0: u8 = 0x80;
/// Dynamic payload type 97, marker bit clear
pub const RTP_PAYLOAD_TYPE: u8 = 0x61;
/// RTP header (12) + MIDI command section delta-time byte (1)
pub const HEADER_SIZE: usize = 13;

/// Milliseconds since UNIX epoch, truncated to 32 bits
pub fn now_ms_u32() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u32
}

/// Frames MIDI events as RTP-MIDI packets for a single outbound stream.
#[derive(Debug)]
pub struct RtpMidiEncoder {
    sequence: u16,
    ssrc: u32,
}

impl RtpMidiEncoder {
    pub fn new(ssrc: u32, initial_sequence: u16) -> Self {
        Self {
            sequence: initial_sequence,
            ssrc,
        }
    }

    /// SSRC and starting sequence number both derived from the start time.
    pub fn from_clock() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let ssrc = nanos as u32;
        Self::new(ssrc, (ssrc >> 16) as u16 ^ ssrc as u16)
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Sequence number the next packet will carry.
    pub fn next_sequence(&self) -> u16 {
        self.sequence
    }

    /// Encode one event stamped with the current time.
    pub fn encode(&mut self, midi_event: &[u8]) -> Vec<u8> {
        self.encode_at(midi_event, now_ms_u32())
    }

    pub fn encode_at(&mut self, midi_event: &[u8], timestamp_ms: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + midi_event.len());
        buf.push(RTP_HEADER_BYTE0);
        buf.push(RTP_PAYLOAD_TYPE);
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&timestamp_ms.to_be_bytes());
        buf.extend_from_slice(&self.ssrc.to_be_bytes());
        buf.push(0x00);
        buf.extend_from_slice(midi_event);

        self.sequence = self.sequence.wrapping_add(1);
        buf
    }
}

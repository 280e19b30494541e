/// MIDI wire messages produced by mapped actions, plus splitting of the raw
/// byte stream read from a physical input port into individual events.

use crate::error::BridgeError;

/// A range-checked channel message ready to be written to a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    ProgramChange { channel: u8, program: u8 },
    ControlChange { channel: u8, control: u8, value: u8 },
}

impl MidiMessage {
    pub fn program_change(channel: i64, program: i64) -> Result<Self, BridgeError> {
        Ok(Self::ProgramChange {
            channel: check_range("channel", channel, 15)?,
            program: check_range("program", program, 127)?,
        })
    }

    pub fn control_change(channel: i64, control: i64, value: i64) -> Result<Self, BridgeError> {
        Ok(Self::ControlChange {
            channel: check_range("channel", channel, 15)?,
            control: check_range("control", control, 127)?,
            value: check_range("value", value, 127)?,
        })
    }

    /// Raw MIDI 1.0 encoding (status byte first).
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            Self::ProgramChange { channel, program } => vec![0xC0 | channel, program],
            Self::ControlChange {
                channel,
                control,
                value,
            } => vec![0xB0 | channel, control, value],
        }
    }
}

fn check_range(field: &'static str, value: i64, max: u8) -> Result<u8, BridgeError> {
    if (0..=max as i64).contains(&value) {
        Ok(value as u8)
    } else {
        Err(BridgeError::InvalidMidiValue { field, value, max })
    }
}

/// Longest SysEx message kept; longer ones are dropped whole.
pub const MAX_SYSEX_LEN: usize = 1024;

/// Total length of a message starting with `status`, status byte included.
/// 0 for SysEx, which runs until the terminating 0xF7.
pub fn status_length(status: u8) -> usize {
    match status {
        0xF0 => 0,
        0xF1 | 0xF3 => 2,
        0xF2 => 3,
        0xF4..=0xFF => 1,
        s => match s & 0xF0 {
            0x80 | 0x90 | 0xA0 | 0xB0 | 0xE0 => 3,
            0xC0 | 0xD0 => 2,
            _ => 1,
        },
    }
}

/// Incremental splitter for the byte stream of a physical input port.
///
/// State survives between reads, so a message cut across two reads is
/// completed by the second one. Data bytes following a complete channel
/// message reuse its status (running status) and come out as full messages
/// with the status byte restored. Realtime bytes are emitted as soon as they
/// arrive, even in the middle of another message.
#[derive(Debug, Default)]
pub struct MidiParser {
    pending: Vec<u8>,
    expected: usize,
    running_status: Option<u8>,
}

impl MidiParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read's worth of bytes. Returns the messages it completed.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut messages = Vec::new();
        for &byte in data {
            if let Some(message) = self.feed(byte) {
                messages.push(message);
            }
        }
        messages
    }

    /// Bytes held back waiting for the rest of a message.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    fn in_sysex(&self) -> bool {
        self.pending.first() == Some(&0xF0)
    }

    fn feed(&mut self, byte: u8) -> Option<Vec<u8>> {
        // System realtime
        if byte >= 0xF8 {
            return Some(vec![byte]);
        }

        if self.in_sysex() {
            if byte == 0xF7 {
                self.pending.push(byte);
                return Some(std::mem::take(&mut self.pending));
            }
            if byte < 0x80 {
                if self.pending.len() < MAX_SYSEX_LEN {
                    self.pending.push(byte);
                } else {
                    self.pending.clear();
                }
                return None;
            }
            // Any other status byte aborts the SysEx
        }

        if byte >= 0x80 {
            self.pending.clear();
            match byte {
                0xF0 => {
                    self.running_status = None;
                    self.pending.push(byte);
                }
                // End of exclusive with no SysEx open
                0xF7 => self.running_status = None,
                0xF1..=0xF6 => {
                    self.running_status = None;
                    return self.start(byte);
                }
                _ => {
                    self.running_status = Some(byte);
                    return self.start(byte);
                }
            }
            return None;
        }

        if self.pending.is_empty() {
            // Stray data byte unless running status applies
            let status = self.running_status?;
            self.pending.push(status);
            self.expected = status_length(status);
        }
        self.pending.push(byte);
        if self.pending.len() >= self.expected {
            return Some(std::mem::take(&mut self.pending));
        }
        None
    }

    fn start(&mut self, status: u8) -> Option<Vec<u8>> {
        self.expected = status_length(status);
        if self.expected <= 1 {
            return Some(vec![status]);
        }
        self.pending.push(status);
        None
    }
}

/// Split one self-contained chunk into complete messages.
/// Stray data bytes and a trailing incomplete message are dropped.
pub fn split_messages(data: &[u8]) -> Vec<Vec<u8>> {
    MidiParser::new().push(data)
}

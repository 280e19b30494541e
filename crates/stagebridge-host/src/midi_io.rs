/// Physical MIDI port access.
///
/// Output ports receive the wire messages produced by mapped actions; input
/// ports are polled by the RTP-MIDI sender. Device enumeration and selection
/// stay outside the bridge: ports are opened by the names in the config.
///
/// Linux uses ALSA rawmidi (`hw:1,0,0` style names). Other platforms get a
/// stub that refuses to open, which the bridge treats as "port not open".

use std::path::Path;

use serde::Serialize;

/// A port the bridge could open, as listed by the admin API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MidiPortInfo {
    /// Value for `midi_input_name` / `midi_output_name`
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MidiPorts {
    pub inputs: Vec<MidiPortInfo>,
    pub outputs: Vec<MidiPortInfo>,
}

/// Rawmidi ports present on this machine. Empty where ALSA is unavailable.
pub fn list_ports() -> MidiPorts {
    #[cfg(target_os = "linux")]
    {
        scan_asound(Path::new("/proc/asound"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        MidiPorts::default()
    }
}

/// Walk an ALSA proc tree: `cards` for card numbers and names, then each
/// card's `midiN` files for their substreams.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub fn scan_asound(root: &Path) -> MidiPorts {
    let mut ports = MidiPorts::default();

    // " 1 [UMONE          ]: USB-Audio - UM-ONE"
    let Ok(cards) = std::fs::read_to_string(root.join("cards")) else {
        return ports;
    };

    for line in cards.lines() {
        let trimmed = line.trim();
        if !trimmed.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        let Some(card) = trimmed.split_whitespace().next().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let card_name = match trimmed.find(" - ") {
            Some(pos) => trimmed[pos + 3..].trim().to_string(),
            None => format!("Card {}", card),
        };

        for device in 0u32.. {
            let path = root.join(format!("card{}", card)).join(format!("midi{}", device));
            let Ok(contents) = std::fs::read_to_string(&path) else {
                break;
            };
            add_substreams(&contents, card, device, &card_name, &mut ports);
        }
    }

    ports
}

/// "Output N" lines are playback substreams, "Input N" capture ones.
fn add_substreams(contents: &str, card: u32, device: u32, card_name: &str, ports: &mut MidiPorts) {
    for line in contents.lines() {
        let (list, sub) = if let Some(rest) = line.strip_prefix("Output ") {
            (&mut ports.outputs, rest)
        } else if let Some(rest) = line.strip_prefix("Input ") {
            (&mut ports.inputs, rest)
        } else {
            continue;
        };
        let Ok(sub) = sub.trim().parse::<u32>() else {
            continue;
        };
        list.push(MidiPortInfo {
            id: format!("hw:{},{},{}", card, device, sub),
            name: card_name.to_string(),
        });
    }
}

/// A writable MIDI port. Shared between concurrent dispatches.
pub trait MidiOutput: Send + Sync {
    fn name(&self) -> &str;

    /// Write one complete MIDI message.
    fn send(&self, data: &[u8]) -> anyhow::Result<()>;
}

/// A readable MIDI port, owned by a single poller.
pub trait MidiInput: Send {
    fn name(&self) -> &str;

    /// Complete messages received since the last poll. Empty when idle.
    fn poll_pending(&mut self) -> anyhow::Result<Vec<Vec<u8>>>;
}

#[cfg(target_os = "linux")]
pub mod platform {
    use std::ffi::CString;
    use std::io::{ErrorKind, Read, Write};
    use std::sync::Mutex;

    use alsa::rawmidi::Rawmidi;
    use alsa::Direction;
    use tracing::{debug, info};

    use stagebridge_protocol::midi::MidiParser;

    use super::{MidiInput, MidiOutput};

    struct AlsaOutput {
        name: String,
        rawmidi: Mutex<Rawmidi>,
    }

    struct AlsaInput {
        name: String,
        rawmidi: Rawmidi,
        buf: [u8; 256],
        parser: MidiParser,
    }

    // SAFETY: ALSA rawmidi handles are file-descriptor based and safe to send
    // across threads. The alsa crate doesn't impl Send because the raw pointer
    // isn't automatically Send; writes are serialized by the Mutex.
    unsafe impl Send for AlsaOutput {}
    unsafe impl Sync for AlsaOutput {}
    unsafe impl Send for AlsaInput {}

    pub fn open_output(name: &str) -> anyhow::Result<Box<dyn MidiOutput>> {
        let cstr = CString::new(name)
            .map_err(|e| anyhow::anyhow!("Invalid device name '{}': {}", name, e))?;
        let rawmidi = Rawmidi::open(&cstr, Direction::Playback, false)
            .map_err(|e| anyhow::anyhow!("Failed to open MIDI output '{}': {}", name, e))?;
        info!(device = %name, "MIDI output device opened");
        Ok(Box::new(AlsaOutput {
            name: name.to_string(),
            rawmidi: Mutex::new(rawmidi),
        }))
    }

    pub fn open_input(name: &str) -> anyhow::Result<Box<dyn MidiInput>> {
        let cstr = CString::new(name)
            .map_err(|e| anyhow::anyhow!("Invalid device name '{}': {}", name, e))?;
        let rawmidi = Rawmidi::open(&cstr, Direction::Capture, true)
            .map_err(|e| anyhow::anyhow!("Failed to open MIDI input '{}': {}", name, e))?;
        info!(device = %name, "MIDI input device opened");
        Ok(Box::new(AlsaInput {
            name: name.to_string(),
            rawmidi,
            buf: [0u8; 256],
            parser: MidiParser::new(),
        }))
    }

    impl MidiOutput for AlsaOutput {
        fn name(&self) -> &str {
            &self.name
        }

        fn send(&self, data: &[u8]) -> anyhow::Result<()> {
            let rawmidi = self
                .rawmidi
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            rawmidi.io().write_all(data)?;
            debug!(device = %self.name, bytes = data.len(), "Wrote MIDI");
            Ok(())
        }
    }

    impl MidiInput for AlsaInput {
        fn name(&self) -> &str {
            &self.name
        }

        fn poll_pending(&mut self) -> anyhow::Result<Vec<Vec<u8>>> {
            match self.rawmidi.io().read(&mut self.buf) {
                Ok(0) => Ok(Vec::new()),
                Ok(n) => Ok(self.parser.push(&self.buf[..n])),
                Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(Vec::new()),
                Err(e) => Err(anyhow::anyhow!("MIDI read error on '{}': {}", self.name, e)),
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub mod platform {
    use super::{MidiInput, MidiOutput};

    pub fn open_output(name: &str) -> anyhow::Result<Box<dyn MidiOutput>> {
        anyhow::bail!("MIDI output '{}' not supported on this platform (Linux only)", name)
    }

    pub fn open_input(name: &str) -> anyhow::Result<Box<dyn MidiInput>> {
        anyhow::bail!("MIDI input '{}' not supported on this platform (Linux only)", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_asound_lists_substreams() {
        let root = std::env::temp_dir().join(format!("stagebridge-asound-{}", std::process::id()));
        std::fs::create_dir_all(root.join("card0")).unwrap();
        std::fs::create_dir_all(root.join("card1")).unwrap();
        std::fs::write(
            root.join("cards"),
            concat!(
                " 0 [PCH            ]: HDA-Intel - HDA Intel PCH\n",
                "                      HDA Intel PCH at 0xf7f10000 irq 33\n",
                " 1 [UMONE          ]: USB-Audio - UM-ONE\n",
                "                      Roland UM-ONE at usb-0000:00:14.0-2, full speed\n",
            ),
        )
        .unwrap();
        std::fs::write(
            root.join("card1").join("midi0"),
            "UM-ONE\n\nOutput 0\n  Tx bytes     : 0\nInput 0\n  Rx bytes     : 12\n",
        )
        .unwrap();

        let ports = scan_asound(&root);
        let _ = std::fs::remove_dir_all(&root);

        let port = |id: &str| MidiPortInfo { id: id.to_string(), name: "UM-ONE".to_string() };
        assert_eq!(ports.outputs, vec![port("hw:1,0,0")]);
        assert_eq!(ports.inputs, vec![port("hw:1,0,0")]);
    }

    #[test]
    fn test_scan_asound_without_proc_tree() {
        let missing = std::env::temp_dir().join("stagebridge-no-such-asound");
        assert_eq!(scan_asound(&missing), MidiPorts::default());
    }
}

/// MIDI input → RTP-MIDI forwarding.
///
/// The whole poll loop runs inside one `spawn_blocking` call: the input port
/// is owned by a single thread and polled with a short sleep when idle. Send
/// failures are logged and the packet is dropped; there is no retransmission.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use stagebridge_protocol::rtp::RtpMidiEncoder;

use crate::midi_io::MidiInput;
use crate::relay::DatagramSink;

const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Poll the input once and forward every complete message.
/// Returns the number of packets handed to the socket.
pub fn pump_once(
    input: &mut dyn MidiInput,
    encoder: &mut RtpMidiEncoder,
    sink: &dyn DatagramSink,
    target: SocketAddr,
) -> anyhow::Result<usize> {
    let mut sent = 0;
    for event in input.poll_pending()? {
        let packet = encoder.encode(&event);
        match sink.send_to(&packet, target) {
            Ok(_) => {
                debug!(target = %target, bytes = packet.len(), "Sent RTP-MIDI packet");
                sent += 1;
            }
            Err(e) => warn!(target = %target, error = %e, "RTP-MIDI send failed"),
        }
    }
    Ok(sent)
}

pub async fn run(
    mut input: Box<dyn MidiInput>,
    sink: Arc<dyn DatagramSink>,
    target: SocketAddr,
) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut encoder = RtpMidiEncoder::from_clock();
        info!(
            input = %input.name(),
            target = %target,
            ssrc = encoder.ssrc(),
            "Forwarding MIDI input as RTP-MIDI"
        );

        loop {
            match pump_once(input.as_mut(), &mut encoder, sink.as_ref(), target) {
                Ok(0) => std::thread::sleep(IDLE_SLEEP),
                Ok(_) => {}
                Err(e) => {
                    warn!(input = %input.name(), error = %e, "MIDI input read failed");
                    std::thread::sleep(IDLE_SLEEP);
                }
            }
        }
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedInput(VecDeque<Vec<Vec<u8>>>);

    impl MidiInput for ScriptedInput {
        fn name(&self) -> &str {
            "scripted"
        }

        fn poll_pending(&mut self) -> anyhow::Result<Vec<Vec<u8>>> {
            Ok(self.0.pop_front().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct Captured(Mutex<Vec<Vec<u8>>>);

    impl DatagramSink for Captured {
        fn send_to(&self, buf: &[u8], _target: SocketAddr) -> std::io::Result<usize> {
            self.0.lock().unwrap().push(buf.to_vec());
            Ok(buf.len())
        }
    }

    #[test]
    fn test_each_event_becomes_one_packet() {
        let mut input = ScriptedInput(VecDeque::from(vec![
            vec![vec![0x90, 60, 100], vec![0x80, 60, 0]],
            vec![],
        ]));
        let mut encoder = RtpMidiEncoder::new(0xDEADBEEF, 10);
        let sink = Captured::default();
        let target: SocketAddr = "192.168.1.80:5004".parse().unwrap();

        assert_eq!(pump_once(&mut input, &mut encoder, &sink, target).unwrap(), 2);
        assert_eq!(pump_once(&mut input, &mut encoder, &sink, target).unwrap(), 0);

        let packets = sink.0.lock().unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(&packets[0][2..4], &10u16.to_be_bytes());
        assert_eq!(&packets[1][2..4], &11u16.to_be_bytes());
        assert_eq!(&packets[0][13..], &[0x90, 60, 100]);
        assert_eq!(packets[1][12], 0x00);
    }
}

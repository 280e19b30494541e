use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use stagebridge_protocol::error::BridgeError;
use stagebridge_protocol::mapping::MidiStep;

use crate::midi_io::MidiOutput;

/// Outcome of one mapped MIDI action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
}

/// Executes MIDI actions against the local output port.
///
/// Steps go out strictly in order with a fixed gap between them, since some
/// hardware drops back-to-back messages. A failing step is logged and the
/// rest of the sequence still runs.
pub struct MidiDispatcher {
    output: Option<Arc<dyn MidiOutput>>,
    step_delay: Duration,
}

impl MidiDispatcher {
    pub fn new(output: Option<Arc<dyn MidiOutput>>, step_delay: Duration) -> Self {
        Self { output, step_delay }
    }

    pub fn output_name(&self) -> Option<&str> {
        self.output.as_deref().map(|o| o.name())
    }

    /// Run `steps` for the mapping at `address`.
    /// With no output port open this is a no-op returning `ConfigurationMissing`.
    pub async fn send(&self, address: &str, steps: &[MidiStep]) -> Result<DispatchReport, BridgeError> {
        let Some(output) = self.output.as_deref() else {
            warn!(address = %address, "MIDI output port not configured or open, dropping mapped action");
            return Err(BridgeError::ConfigurationMissing("MIDI output port"));
        };

        let mut report = DispatchReport::default();

        for (i, step) in steps.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.step_delay).await;
            }

            let message = match step.to_message() {
                Ok(m) => m,
                Err(e) => {
                    error!(address = %address, step = i, error = %e, "Skipping MIDI step");
                    report.failed += 1;
                    continue;
                }
            };

            match output.send(&message.to_bytes()) {
                Ok(()) => {
                    debug!(address = %address, step = i, message = ?message, "Sent MIDI");
                    report.sent += 1;
                }
                Err(e) => {
                    error!(address = %address, step = i, error = %e, "MIDI output write failed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

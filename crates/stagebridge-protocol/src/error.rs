use thiserror::Error;

/// Failure taxonomy shared by the bridge components.
///
/// None of these are fatal to the process: each is logged and recovered at
/// the level of a single message, step or destination.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A required resource (e.g. the MIDI output port) is not configured.
    #[error("{0} not configured")]
    ConfigurationMissing(&'static str),

    /// A channel, program, controller or value outside its MIDI range.
    #[error("invalid MIDI {field}: {value} (expected 0..={max})")]
    InvalidMidiValue {
        field: &'static str,
        value: i64,
        max: u8,
    },

    /// A send to a destination failed at the socket level.
    #[error("network unreachable ({target}): {source}")]
    NetworkUnreachable {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// A network operation exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A persisted mapping is missing a required field or carries an unknown tag.
    #[error("malformed mapping: {0}")]
    MalformedMapping(String),

    /// An API request body is missing a field or carries an unusable value.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

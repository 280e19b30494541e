pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod mapping;
pub mod midi;
pub mod rtp;

/// Protocol version advertised in the discovery TXT record
pub const PROTOCOL_VERSION: &str = "1.0";

/// mDNS service type for StageBridge discovery
pub const MDNS_SERVICE_TYPE: &str = "_stagebridge-api._tcp.local.";

/// Default ports
pub const DEFAULT_OSC_PORT: u16 = 9000;
pub const DEFAULT_API_PORT: u16 = 3001;
pub const DEFAULT_FLEET_PORT: u16 = 3002;
pub const DEFAULT_RTP_MIDI_PORT: u16 = 5004;

/// Gap between consecutive steps of a mapped action sequence (ms)
pub const STEP_DELAY_MS: u64 = 10;

/// Window during which a message fingerprint counts as already seen (ms)
pub const DEDUP_TTL_MS: u64 = 500;

/// OSC address → action mappings.
///
/// Two layers: `MappingRecord` is the persisted, lenient form (every field
/// optional, as written by the admin API, bulk uploads or by hand), and
/// `Mapping` is the validated form the relay engine executes. Conversion
/// rejects records with missing fields or unknown tags.

use std::fmt;

use rosc::{OscMessage, OscType};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::error::BridgeError;
use crate::midi::MidiMessage;

// -- Persisted form --

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osc_address: Option<String>,
    /// "midi" (default when absent) or "osc"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub midi_sequence: Vec<MidiStepRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub osc_sequence: Vec<OscStepRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MidiStepRecord {
    /// "program_change" or "control_change"
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient_int", skip_serializing_if = "Option::is_none")]
    pub channel: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int", skip_serializing_if = "Option::is_none")]
    pub program: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int", skip_serializing_if = "Option::is_none")]
    pub control: Option<i64>,
    #[serde(default, deserialize_with = "lenient_int", skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
}

/// MIDI numbers written by hand or by other tools: integers, integral
/// floats (`64.0`) and numeric strings (`"1"`) are all accepted.
#[derive(Deserialize)]
#[serde(untagged)]
enum LooseInt {
    Int(i64),
    Float(f64),
    Str(String),
}

fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() <= i64::MAX as f64).then_some(f as i64)
}

fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<LooseInt>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let parsed = match &raw {
        LooseInt::Int(i) => Some(*i),
        LooseInt::Float(f) => integral(*f),
        LooseInt::Str(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
    };
    match parsed {
        Some(v) => Ok(Some(v)),
        None => Err(serde::de::Error::custom(match raw {
            LooseInt::Str(s) => format!("'{}' is not an integer", s),
            LooseInt::Float(f) => format!("{} is not an integer", f),
            LooseInt::Int(i) => format!("{} is not an integer", i),
        })),
    }
}

/// Decode stored records one at a time. Entries that do not have the
/// record shape are logged and dropped. Returns the records and the number dropped.
pub fn parse_records(values: Vec<serde_json::Value>) -> (Vec<MappingRecord>, usize) {
    let mut records = Vec::with_capacity(values.len());
    let mut dropped = 0;
    for (idx, value) in values.into_iter().enumerate() {
        let address = value.get("osc_address").and_then(|a| a.as_str()).map(str::to_string);
        match serde_json::from_value::<MappingRecord>(value) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(index = idx, address = ?address, error = %e, "Skipping unreadable mapping");
                dropped += 1;
            }
        }
    }
    (records, dropped)
}

/// `deserialize_with` hook for a list of mappings: one bad entry never
/// rejects the whole list.
pub fn deserialize_records<'de, D>(deserializer: D) -> Result<Vec<MappingRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(parse_records(values).0)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OscStepRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default)]
    pub args: Vec<OscArg>,
}

/// Scalar OSC argument as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OscArg {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<&OscArg> for OscType {
    fn from(arg: &OscArg) -> Self {
        match arg {
            OscArg::Bool(b) => OscType::Bool(*b),
            OscArg::Int(i) => match i32::try_from(*i) {
                Ok(v) => OscType::Int(v),
                Err(_) => OscType::Long(*i),
            },
            OscArg::Float(f) => OscType::Float(*f as f32),
            OscArg::Str(s) => OscType::String(s.clone()),
        }
    }
}

// -- Validated form --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingType {
    Midi,
    Osc,
}

impl MappingType {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "midi" => Some(Self::Midi),
            "osc" => Some(Self::Osc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Midi => "midi",
            Self::Osc => "osc",
        }
    }
}

impl fmt::Display for MappingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a MIDI action. Values are kept as configured; range checks
/// happen when the wire message is built so a bad step fails on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiStep {
    ProgramChange { channel: i64, program: i64 },
    ControlChange { channel: i64, control: i64, value: i64 },
}

impl MidiStep {
    pub fn to_message(&self) -> Result<MidiMessage, BridgeError> {
        match *self {
            Self::ProgramChange { channel, program } => {
                MidiMessage::program_change(channel, program)
            }
            Self::ControlChange {
                channel,
                control,
                value,
            } => MidiMessage::control_change(channel, control, value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OscStep {
    pub address: String,
    pub args: Vec<OscArg>,
}

impl OscStep {
    pub fn to_message(&self) -> OscMessage {
        OscMessage {
            addr: self.address.clone(),
            args: self.args.iter().map(OscType::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Midi(Vec<MidiStep>),
    Osc(Vec<OscStep>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    pub id: String,
    pub osc_address: String,
    pub action: Action,
}

impl Mapping {
    pub fn mapping_type(&self) -> MappingType {
        match self.action {
            Action::Midi(_) => MappingType::Midi,
            Action::Osc(_) => MappingType::Osc,
        }
    }
}

impl TryFrom<&MappingRecord> for Mapping {
    type Error = BridgeError;

    fn try_from(record: &MappingRecord) -> Result<Self, Self::Error> {
        let id = record
            .id
            .clone()
            .ok_or_else(|| malformed("missing id", record))?;
        let osc_address = record
            .osc_address
            .clone()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| malformed("missing osc_address", record))?;

        let mapping_type = match record.mapping_type.as_deref() {
            None => MappingType::Midi,
            Some(tag) => MappingType::parse(tag)
                .ok_or_else(|| malformed(&format!("unknown mapping_type '{}'", tag), record))?,
        };

        let action = match mapping_type {
            MappingType::Midi => Action::Midi(
                record
                    .midi_sequence
                    .iter()
                    .map(|step| midi_step(step).map_err(|e| malformed(&e, record)))
                    .collect::<Result<_, _>>()?,
            ),
            MappingType::Osc => Action::Osc(
                record
                    .osc_sequence
                    .iter()
                    .map(|step| {
                        let address = step
                            .address
                            .clone()
                            .filter(|a| !a.is_empty())
                            .ok_or_else(|| malformed("OSC step missing address", record))?;
                        Ok(OscStep {
                            address,
                            args: step.args.clone(),
                        })
                    })
                    .collect::<Result<_, BridgeError>>()?,
            ),
        };

        Ok(Self {
            id,
            osc_address,
            action,
        })
    }
}

fn midi_step(step: &MidiStepRecord) -> Result<MidiStep, String> {
    let field = |name: &str, v: Option<i64>| v.ok_or_else(|| format!("MIDI step missing {}", name));
    match step.kind.as_deref() {
        Some("program_change") => Ok(MidiStep::ProgramChange {
            channel: field("channel", step.channel)?,
            program: field("program", step.program)?,
        }),
        Some("control_change") => Ok(MidiStep::ControlChange {
            channel: field("channel", step.channel)?,
            control: field("control", step.control)?,
            value: field("value", step.value)?,
        }),
        Some(other) => Err(format!("unknown MIDI step type '{}'", other)),
        None => Err("MIDI step missing type".to_string()),
    }
}

fn malformed(reason: &str, record: &MappingRecord) -> BridgeError {
    BridgeError::MalformedMapping(format!(
        "{} (id={:?}, address={:?})",
        reason, record.id, record.osc_address
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cc(channel: i64, control: i64, value: i64) -> MidiStepRecord {
        MidiStepRecord {
            kind: Some("control_change".into()),
            channel: Some(channel),
            control: Some(control),
            value: Some(value),
            ..Default::default()
        }
    }

    #[test]
    fn test_midi_record_converts() {
        let record = MappingRecord {
            id: Some("a1".into()),
            osc_address: Some("/patch/song/1".into()),
            midi_sequence: vec![cc(1, 0, 0)],
            ..Default::default()
        };
        let mapping = Mapping::try_from(&record).unwrap();
        assert_eq!(mapping.mapping_type(), MappingType::Midi);
        assert_eq!(
            mapping.action,
            Action::Midi(vec![MidiStep::ControlChange { channel: 1, control: 0, value: 0 }])
        );
    }

    #[test]
    fn test_unknown_tags_rejected() {
        let record = MappingRecord {
            id: Some("a1".into()),
            osc_address: Some("/x".into()),
            mapping_type: Some("dmx".into()),
            ..Default::default()
        };
        assert!(matches!(
            Mapping::try_from(&record),
            Err(BridgeError::MalformedMapping(_))
        ));

        let record = MappingRecord {
            id: Some("a2".into()),
            osc_address: Some("/x".into()),
            midi_sequence: vec![MidiStepRecord {
                kind: Some("note_on".into()),
                channel: Some(0),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(Mapping::try_from(&record).is_err());
    }

    #[test]
    fn test_missing_fields_rejected() {
        let no_address = MappingRecord {
            id: Some("a1".into()),
            ..Default::default()
        };
        assert!(Mapping::try_from(&no_address).is_err());

        let no_value = MappingRecord {
            id: Some("a1".into()),
            osc_address: Some("/x".into()),
            midi_sequence: vec![MidiStepRecord {
                kind: Some("control_change".into()),
                channel: Some(0),
                control: Some(7),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(Mapping::try_from(&no_value).is_err());
    }

    #[test]
    fn test_out_of_range_kept_until_dispatch() {
        let record = MappingRecord {
            id: Some("a1".into()),
            osc_address: Some("/x".into()),
            midi_sequence: vec![cc(0, 200, 0)],
            ..Default::default()
        };
        let mapping = Mapping::try_from(&record).unwrap();
        let Action::Midi(steps) = mapping.action else {
            panic!("expected MIDI action");
        };
        assert!(matches!(
            steps[0].to_message(),
            Err(BridgeError::InvalidMidiValue { field: "control", .. })
        ));
    }

    #[test]
    fn test_midi_numbers_accept_strings_and_integral_floats() {
        let step: MidiStepRecord = serde_json::from_str(
            r#"{"type":"control_change","channel":"1","control":" 7 ","value":64.0}"#,
        )
        .unwrap();
        assert_eq!(step.channel, Some(1));
        assert_eq!(step.control, Some(7));
        assert_eq!(step.value, Some(64));

        assert!(serde_json::from_str::<MidiStepRecord>(r#"{"channel":"one"}"#).is_err());
        assert!(serde_json::from_str::<MidiStepRecord>(r#"{"value":64.5}"#).is_err());
        assert!(serde_json::from_str::<MidiStepRecord>(r#"{"value":null}"#).unwrap().value.is_none());
    }

    #[test]
    fn test_parse_records_drops_only_bad_entries() {
        let values = vec![
            serde_json::json!({ "id": "a", "osc_address": "/a" }),
            serde_json::json!({ "id": "b", "osc_address": "/b",
                "midi_sequence": [{ "type": "program_change", "channel": "loud", "program": 1 }] }),
            serde_json::json!("not a mapping"),
            serde_json::json!({ "id": "c", "osc_address": "/c",
                "midi_sequence": [{ "type": "program_change", "channel": "2", "program": 3.0 }] }),
        ];

        let (records, dropped) = parse_records(values);

        assert_eq!(dropped, 2);
        let ids: Vec<_> = records.iter().map(|r| r.id.as_deref().unwrap()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(
            Mapping::try_from(&records[1]).unwrap().action,
            Action::Midi(vec![MidiStep::ProgramChange { channel: 2, program: 3 }])
        );
    }

    #[test]
    fn test_osc_args_from_json() {
        let record: MappingRecord = serde_json::from_str(
            r#"{"id":"o1","osc_address":"/go","mapping_type":"osc",
                "osc_sequence":[{"address":"/cue","args":[1, 0.5, "intro", true]}]}"#,
        )
        .unwrap();
        let mapping = Mapping::try_from(&record).unwrap();
        let Action::Osc(steps) = mapping.action else {
            panic!("expected OSC action");
        };
        let msg = steps[0].to_message();
        assert_eq!(msg.addr, "/cue");
        assert_eq!(
            msg.args,
            vec![
                OscType::Int(1),
                OscType::Float(0.5),
                OscType::String("intro".into()),
                OscType::Bool(true),
            ]
        );
    }
}

//! Fit-test protocol definitions
//!
//! A protocol is an ordered list of stages (one per exercise, plus any
//! ambient-only stages). Definitions come in as JSON, are checked by the
//! [`validator`] and turned into a timeline of [`Segment`]s by the
//! [`compiler`].
//!
//! ```json
//! {
//!   "OSHA Fast": [
//!     { "instructions": "Bend over", "ambient_purge": 4, "ambient_sample": 5,
//!       "mask_purge": 4, "mask_sample": 30 }
//!   ]
//! }
//! ```

pub mod compiler;
mod error;
pub mod validator;

pub use compiler::{compile, protocol_duration, stage_duration};
pub use error::{ProtocolError, SchemaValidationError, SchemaViolation};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::instrument::{ConcentrationEvent, SampleSource};

/// One protocol step, durations in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Text shown to the test subject
    pub instructions: String,
    #[serde(default)]
    pub ambient_purge: u32,
    #[serde(default)]
    pub ambient_sample: u32,
    #[serde(default)]
    pub mask_purge: u32,
    #[serde(default)]
    pub mask_sample: u32,
}

impl StageDefinition {
    /// Total length in seconds
    pub fn duration_seconds(&self) -> u32 {
        stage_duration(self)
    }
}

/// Whether readings in a segment are discarded or measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Flushing the sample line
    Purge,
    /// Measuring
    Sample,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Purge => write!(f, "purge"),
            Phase::Sample => write!(f, "sample"),
        }
    }
}

/// One (source, phase) slot of the compiled timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Position in the whole timeline
    pub index: usize,
    /// Stage this segment came from
    pub stage_index: usize,
    /// Exercise number shared by the stage's segments, if it samples the mask
    pub exercise_number: Option<u32>,
    pub source: SampleSource,
    pub phase: Phase,
    /// Copied from the stage
    pub instructions: String,
    pub protocol_offset_seconds: u32,
    pub stage_offset_seconds: u32,
    pub duration_seconds: u32,
    /// Readings received while this segment was active
    pub recorded_data: Vec<ConcentrationEvent>,
    /// Window average captured when a sample segment ends
    pub average: Option<f64>,
}

impl Segment {
    /// Protocol offset at which this segment ends
    pub fn end_offset_seconds(&self) -> u32 {
        self.protocol_offset_seconds + self.duration_seconds
    }

    /// True for purge segments
    pub fn is_purge(&self) -> bool {
        self.phase == Phase::Purge
    }
}

/// Named protocol definitions, kept as raw JSON until they are used
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtocolLibrary {
    protocols: BTreeMap<String, Vec<Value>>,
}

impl ProtocolLibrary {
    /// Empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object mapping protocol names to stage arrays.
    ///
    /// Only the outer shape is checked here; stages are validated when a
    /// protocol is resolved or by [`validate_all`](Self::validate_all).
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        let root: Value = serde_json::from_str(json)?;
        let Value::Object(entries) = root else {
            return Err(SchemaValidationError {
                violations: vec![SchemaViolation::new(
                    "",
                    "must be an object mapping protocol names to stage arrays",
                )],
            }
            .into());
        };

        let mut protocols = BTreeMap::new();
        let mut violations = Vec::new();
        for (name, stages) in entries {
            match stages {
                Value::Array(stages) => {
                    protocols.insert(name, stages);
                }
                _ => violations.push(SchemaViolation::new(
                    format!("/{}", validator::escape_pointer(&name)),
                    "must be an array of stages",
                )),
            }
        }

        if !violations.is_empty() {
            return Err(SchemaValidationError { violations }.into());
        }
        Ok(Self { protocols })
    }

    /// Load definitions from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ProtocolError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Add or replace a protocol from typed stages
    pub fn insert(&mut self, name: impl Into<String>, stages: &[StageDefinition]) {
        let values = stages
            .iter()
            .filter_map(|stage| serde_json::to_value(stage).ok())
            .collect();
        self.protocols.insert(name.into(), values);
    }

    /// Protocol names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.protocols.keys().map(String::as_str)
    }

    /// True if `name` is defined
    pub fn contains(&self, name: &str) -> bool {
        self.protocols.contains_key(name)
    }

    /// Number of protocols
    pub fn len(&self) -> usize {
        self.protocols.len()
    }

    /// True when no protocol is defined
    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }

    /// Validated stages of `name`
    pub fn stages(&self, name: &str) -> Result<Vec<StageDefinition>, ProtocolError> {
        let raw = self
            .protocols
            .get(name)
            .ok_or_else(|| ProtocolError::NotFound(name.to_string()))?;
        let base = format!("/{}", validator::escape_pointer(name));
        Ok(validator::parse_stages(raw, &base)?)
    }

    /// Validated and compiled timeline of `name`
    pub fn compile(&self, name: &str) -> Result<Vec<Segment>, ProtocolError> {
        Ok(compile(&self.stages(name)?))
    }

    /// Schema violations across every protocol
    pub fn validate_all(&self) -> Vec<SchemaViolation> {
        self.protocols
            .iter()
            .flat_map(|(name, stages)| {
                validator::validate_stages(stages, &format!("/{}", validator::escape_pointer(name)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIBRARY: &str = r#"{
        "Quick": [
            { "instructions": "Normal breathing", "ambient_purge": 4, "ambient_sample": 5,
              "mask_purge": 4, "mask_sample": 30 }
        ],
        "Broken": [ { "instructions": "Too long", "mask_sample": 601 } ]
    }"#;

    #[test]
    fn test_library_resolves_and_compiles() {
        let library = ProtocolLibrary::from_json_str(LIBRARY).unwrap();
        assert_eq!(library.names().collect::<Vec<_>>(), vec!["Broken", "Quick"]);

        let segments = library.compile("Quick").unwrap();
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[3].end_offset_seconds(), 43);
    }

    #[test]
    fn test_unknown_protocol() {
        let library = ProtocolLibrary::from_json_str(LIBRARY).unwrap();
        assert!(matches!(
            library.stages("missing"),
            Err(ProtocolError::NotFound(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_invalid_protocol_reports_path() {
        let library = ProtocolLibrary::from_json_str(LIBRARY).unwrap();
        match library.stages("Broken") {
            Err(ProtocolError::Schema(err)) => {
                assert_eq!(err.violations.len(), 1);
                assert_eq!(err.violations[0].path, "/Broken/0/mask_sample");
            }
            other => panic!("expected schema error, got {:?}", other),
        }
        assert_eq!(library.validate_all().len(), 1);
    }

    #[test]
    fn test_outer_shape_checked() {
        assert!(matches!(
            ProtocolLibrary::from_json_str("[]"),
            Err(ProtocolError::Schema(_))
        ));
        assert!(matches!(
            ProtocolLibrary::from_json_str(r#"{ "A": 3 }"#),
            Err(ProtocolError::Schema(_))
        ));
        assert!(matches!(
            ProtocolLibrary::from_json_str("{"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_insert_typed_stages() {
        let mut library = ProtocolLibrary::new();
        library.insert(
            "Ambient check",
            &[StageDefinition {
                instructions: "Hold still".into(),
                ambient_purge: 0,
                ambient_sample: 10,
                mask_purge: 0,
                mask_sample: 0,
            }],
        );
        assert!(library.contains("Ambient check"));
        assert_eq!(library.stages("Ambient check").unwrap()[0].ambient_sample, 10);
    }
}

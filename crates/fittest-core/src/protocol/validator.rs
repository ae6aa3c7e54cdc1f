//! Stage definition schema check
//!
//! Runs over raw JSON so every problem can be reported with its path before
//! anything is deserialized or compiled.

use serde_json::{Map, Value};

use super::error::{SchemaValidationError, SchemaViolation};
use super::StageDefinition;

/// Upper bound for either purge, in seconds
pub const MAX_PURGE_SECONDS: u64 = 10;
/// Upper bound for the ambient sample, in seconds
pub const MAX_AMBIENT_SAMPLE_SECONDS: u64 = 60;
/// Upper bound for the mask sample, in seconds
pub const MAX_MASK_SAMPLE_SECONDS: u64 = 600;

const INSTRUCTIONS: &str = "instructions";

/// Duration fields and their bounds, in timeline order
const DURATION_FIELDS: [(&str, u64); 4] = [
    ("ambient_purge", MAX_PURGE_SECONDS),
    ("ambient_sample", MAX_AMBIENT_SAMPLE_SECONDS),
    ("mask_purge", MAX_PURGE_SECONDS),
    ("mask_sample", MAX_MASK_SAMPLE_SECONDS),
];

/// Check a list of stage objects; `base` is the JSON pointer of the list.
pub fn validate_stages(stages: &[Value], base: &str) -> Vec<SchemaViolation> {
    let mut violations = Vec::new();
    for (index, stage) in stages.iter().enumerate() {
        validate_stage(stage, &format!("{}/{}", base, index), &mut violations);
    }
    violations
}

/// Check one stage object, appending any violations to `out`
pub fn validate_stage(stage: &Value, path: &str, out: &mut Vec<SchemaViolation>) {
    let Some(object) = stage.as_object() else {
        out.push(SchemaViolation::new(path, "must be an object"));
        return;
    };

    match object.get(INSTRUCTIONS) {
        None => out.push(SchemaViolation::new(
            format!("{}/{}", path, INSTRUCTIONS),
            "is required",
        )),
        Some(Value::String(_)) => {}
        Some(_) => out.push(SchemaViolation::new(
            format!("{}/{}", path, INSTRUCTIONS),
            "must be a string",
        )),
    }

    for (field, max) in DURATION_FIELDS {
        if let Some(value) = object.get(field) {
            check_duration(value, &format!("{}/{}", path, field), max, out);
        }
    }

    check_unknown_fields(object, path, out);
}

fn check_duration(value: &Value, path: &str, max: u64, out: &mut Vec<SchemaViolation>) {
    match value.as_u64() {
        Some(seconds) if seconds > max => out.push(SchemaViolation::new(
            path,
            format!("must be at most {} seconds (got {})", max, seconds),
        )),
        Some(_) => {}
        None => out.push(SchemaViolation::new(
            path,
            "must be a non-negative integer number of seconds",
        )),
    }
}

fn check_unknown_fields(object: &Map<String, Value>, path: &str, out: &mut Vec<SchemaViolation>) {
    for key in object.keys() {
        let known = key == INSTRUCTIONS || DURATION_FIELDS.iter().any(|(name, _)| name == key);
        if !known {
            out.push(SchemaViolation::new(
                format!("{}/{}", path, escape_pointer(key)),
                "is not a recognised stage field",
            ));
        }
    }
}

/// Validate then deserialize a list of stage objects
pub fn parse_stages(stages: &[Value], base: &str) -> Result<Vec<StageDefinition>, SchemaValidationError> {
    let violations = validate_stages(stages, base);
    if !violations.is_empty() {
        return Err(SchemaValidationError { violations });
    }

    stages
        .iter()
        .enumerate()
        .map(|(index, stage)| {
            serde_json::from_value(stage.clone()).map_err(|e| SchemaValidationError {
                violations: vec![SchemaViolation::new(
                    format!("{}/{}", base, index),
                    e.to_string(),
                )],
            })
        })
        .collect()
}

/// Escape a key for use as a JSON pointer segment
pub(crate) fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_valid_stage_passes() {
        let stages = vec![json!({
            "instructions": "Normal breathing",
            "ambient_purge": 4,
            "ambient_sample": 20,
            "mask_purge": 4,
            "mask_sample": 40
        })];
        assert!(validate_stages(&stages, "").is_empty());
    }

    #[test]
    fn test_every_violation_reported() {
        let stages = vec![
            json!({ "ambient_purge": 11, "mask_sample": -1 }),
            json!("not a stage"),
            json!({ "instructions": 3, "mask_sampel": 30 }),
        ];

        let violations = validate_stages(&stages, "/OSHA");
        let paths: Vec<&str> = violations.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/OSHA/0/instructions",
                "/OSHA/0/ambient_purge",
                "/OSHA/0/mask_sample",
                "/OSHA/1",
                "/OSHA/2/instructions",
                "/OSHA/2/mask_sampel",
            ]
        );
    }

    #[test]
    fn test_missing_durations_default_to_zero() {
        let stages = vec![json!({ "instructions": "Talk", "mask_sample": 60 })];
        let parsed = parse_stages(&stages, "").unwrap();
        assert_eq!(parsed[0].ambient_purge, 0);
        assert_eq!(parsed[0].mask_sample, 60);
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let stages = vec![json!({
            "instructions": "Limits",
            "ambient_purge": 10,
            "ambient_sample": 60,
            "mask_purge": 10,
            "mask_sample": 600
        })];
        assert!(parse_stages(&stages, "").is_ok());
    }

    #[test]
    fn test_pointer_escaping() {
        assert_eq!(escape_pointer("a/b~c"), "a~1b~0c");
    }
}

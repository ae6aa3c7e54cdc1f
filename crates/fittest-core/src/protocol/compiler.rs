//! Stage list to segment timeline
//!
//! Each stage expands into up to four segments, always in the order
//! ambient purge, ambient sample, mask purge, mask sample. Zero-length
//! segments are left out.

use super::{Phase, Segment, StageDefinition};
use crate::instrument::SampleSource;

/// Total length of one stage in seconds
pub fn stage_duration(stage: &StageDefinition) -> u32 {
    stage.ambient_purge + stage.ambient_sample + stage.mask_purge + stage.mask_sample
}

/// Total length of a protocol in seconds
pub fn protocol_duration(stages: &[StageDefinition]) -> u32 {
    stages.iter().map(stage_duration).sum()
}

/// Compile stages into the global segment timeline.
///
/// Pure and deterministic. Stages with a mask sample get the next exercise
/// number (from 1), shared by all of that stage's segments.
pub fn compile(stages: &[StageDefinition]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut protocol_offset = 0u32;
    let mut exercises = 0u32;

    for (stage_index, stage) in stages.iter().enumerate() {
        let exercise_number = if stage.mask_sample > 0 {
            exercises += 1;
            Some(exercises)
        } else {
            None
        };

        let parts = [
            (SampleSource::Ambient, Phase::Purge, stage.ambient_purge),
            (SampleSource::Ambient, Phase::Sample, stage.ambient_sample),
            (SampleSource::Mask, Phase::Purge, stage.mask_purge),
            (SampleSource::Mask, Phase::Sample, stage.mask_sample),
        ];

        let mut stage_offset = 0u32;
        for (source, phase, duration) in parts {
            if duration == 0 {
                continue;
            }
            segments.push(Segment {
                index: segments.len(),
                stage_index,
                exercise_number,
                source,
                phase,
                instructions: stage.instructions.clone(),
                protocol_offset_seconds: protocol_offset,
                stage_offset_seconds: stage_offset,
                duration_seconds: duration,
                recorded_data: Vec::new(),
                average: None,
            });
            protocol_offset += duration;
            stage_offset += duration;
        }
    }

    segments
}

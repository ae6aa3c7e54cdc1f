//! Fit factor results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of one exercise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseResult {
    pub exercise_number: u32,
    pub stage_index: usize,
    /// Most recent ambient sample average before the mask sample
    pub ambient_average: Option<f64>,
    pub mask_average: Option<f64>,
    /// Ambient over mask concentration
    pub fit_factor: Option<f64>,
}

impl ExerciseResult {
    /// Build a result, deriving the fit factor from the two averages
    pub fn new(
        exercise_number: u32,
        stage_index: usize,
        ambient_average: Option<f64>,
        mask_average: Option<f64>,
    ) -> Self {
        Self {
            exercise_number,
            stage_index,
            ambient_average,
            mask_average,
            fit_factor: fit_factor(ambient_average, mask_average),
        }
    }
}

/// Summary delivered when a run completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub protocol: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub exercises: Vec<ExerciseResult>,
    /// Harmonic mean of the exercise fit factors
    pub overall_fit_factor: Option<f64>,
}

/// Ambient / mask, if both are usable and the mask reading is positive
pub fn fit_factor(ambient: Option<f64>, mask: Option<f64>) -> Option<f64> {
    match (ambient, mask) {
        (Some(ambient), Some(mask)) if ambient.is_finite() && mask.is_finite() && mask > 0.0 => {
            Some(ambient / mask)
        }
        _ => None,
    }
}

/// n / Σ(1/FFᵢ). `None` when there are no exercises or any lacks a fit factor.
pub fn overall_fit_factor(exercises: &[ExerciseResult]) -> Option<f64> {
    if exercises.is_empty() {
        return None;
    }
    let mut reciprocal_sum = 0.0;
    for exercise in exercises {
        let ff = exercise.fit_factor?;
        if ff <= 0.0 {
            return None;
        }
        reciprocal_sum += 1.0 / ff;
    }
    Some(exercises.len() as f64 / reciprocal_sum)
}

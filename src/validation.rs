//! Input checks applied at the API boundary
//!
//! The stores trust their callers; everything user-supplied passes through
//! here first.

use crate::error::TrackerError;
use crate::Result;

pub const MAX_GOAL_NAME_CHARS: usize = 50;
pub const MIN_GOAL_TARGET: i64 = 1;
pub const MAX_GOAL_TARGET: i64 = 10_000;
pub const MIN_TRAIL_DAYS: i64 = 7;
pub const MIN_TRAIL_AMOUNT: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ValidGoal {
    pub name: String,
    pub target: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidTrail {
    pub name: String,
    pub target_amount: f64,
    pub days: u32,
}

/// Trimmed name, 1..=50 characters, target in 1..=10000
pub fn validate_goal(name: &str, target: i64) -> Result<ValidGoal> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TrackerError::Validation("goal name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_GOAL_NAME_CHARS {
        return Err(TrackerError::Validation(format!(
            "goal name must be at most {} characters",
            MAX_GOAL_NAME_CHARS
        )));
    }
    if !(MIN_GOAL_TARGET..=MAX_GOAL_TARGET).contains(&target) {
        return Err(TrackerError::Validation(format!(
            "goal target must be between {} and {}",
            MIN_GOAL_TARGET, MAX_GOAL_TARGET
        )));
    }

    Ok(ValidGoal {
        name: name.to_string(),
        target: target as u32,
    })
}

/// Trimmed name, amount of at least 1, at least seven days
pub fn validate_trail(name: &str, target_amount: f64, days: i64) -> Result<ValidTrail> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TrackerError::Validation("trail name must not be empty".to_string()));
    }
    if !target_amount.is_finite() || target_amount < MIN_TRAIL_AMOUNT {
        return Err(TrackerError::Validation(format!(
            "target amount must be at least {}",
            MIN_TRAIL_AMOUNT
        )));
    }
    if days < MIN_TRAIL_DAYS || days > i64::from(u32::MAX) {
        return Err(TrackerError::Validation(format!(
            "a trail needs at least {} days",
            MIN_TRAIL_DAYS
        )));
    }

    Ok(ValidTrail {
        name: name.to_string(),
        target_amount,
        days: days as u32,
    })
}

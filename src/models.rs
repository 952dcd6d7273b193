//! Core data models for the goal and finance trackers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Goal =================
//

/// A user-defined numeric target with incremental progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: String,
    pub name: String,
    pub target: u32,
    pub current: u32,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

impl Goal {
    pub fn new(name: String, target: u32, emoji: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            target,
            current: 0,
            emoji,
            created_at: Utc::now(),
        }
    }

    /// Shift progress by `delta`, clamped to `[0, target]`.
    pub fn apply_delta(&mut self, delta: i64) {
        let next = i64::from(self.current).saturating_add(delta);
        self.current = next.clamp(0, i64::from(self.target)) as u32;
    }

    pub fn is_completed(&self) -> bool {
        self.current >= self.target
    }

    /// Percentage towards the target, capped at 100.
    pub fn progress_percent(&self) -> f64 {
        if self.target == 0 {
            return 0.0;
        }
        (f64::from(self.current) / f64::from(self.target) * 100.0).min(100.0)
    }
}

/// Aggregate view over all goals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalStats {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub not_started: usize,
    pub average_progress: f64,
}

impl GoalStats {
    pub fn from_goals(goals: &[Goal]) -> Self {
        let completed = goals.iter().filter(|g| g.is_completed()).count();
        let in_progress = goals
            .iter()
            .filter(|g| g.current > 0 && g.current < g.target)
            .count();
        let not_started = goals.iter().filter(|g| g.current == 0).count();

        let average_progress = if goals.is_empty() {
            0.0
        } else {
            goals.iter().map(Goal::progress_percent).sum::<f64>() / goals.len() as f64
        };

        Self {
            total: goals.len(),
            completed,
            in_progress,
            not_started,
            average_progress,
        }
    }
}

//
// ================= Savings =================
//

/// One installment of a savings trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySaving {
    pub id: String,
    pub day: u32,
    pub amount: f64,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A fixed-duration savings plan split into equal daily installments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingsTrail {
    pub id: String,
    pub name: String,
    pub target_amount: f64,
    pub daily_goal: f64,
    pub days_total: u32,
    pub savings: Vec<DailySaving>,
    pub created_at: DateTime<Utc>,
}

impl SavingsTrail {
    pub fn new(name: String, target_amount: f64, days: u32) -> Self {
        let daily_goal = (target_amount / f64::from(days)).ceil();

        let savings = (1..=days)
            .map(|day| DailySaving {
                id: Uuid::new_v4().to_string(),
                day,
                amount: daily_goal,
                completed: false,
                completed_at: None,
            })
            .collect();

        Self {
            id: Uuid::new_v4().to_string(),
            name,
            target_amount,
            daily_goal,
            days_total: days,
            savings,
            created_at: Utc::now(),
        }
    }

    pub fn total_saved(&self) -> f64 {
        self.savings
            .iter()
            .filter(|s| s.completed)
            .map(|s| s.amount)
            .sum()
    }

    /// Uncapped percentage of the target already saved.
    pub fn progress(&self) -> f64 {
        self.total_saved() / self.target_amount * 100.0
    }

    pub fn completed_days(&self) -> usize {
        self.savings.iter().filter(|s| s.completed).count()
    }
}

//
// ================= Chat =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        write!(f, "{}", s)
    }
}

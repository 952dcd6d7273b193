//! Goal store
//!
//! Holds the goal collection in memory and mirrors it to storage after every
//! mutation. Inputs are validated at the boundary, not here.

use crate::models::{Goal, GoalStats};
use crate::storage::{self, KeyValueStorage, GOALS_KEY};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

pub struct GoalStore {
    storage: Arc<dyn KeyValueStorage>,
    goals: Mutex<Vec<Goal>>,
}

impl GoalStore {
    /// Load the persisted collection, starting empty if it is missing or malformed
    pub fn load(storage: Arc<dyn KeyValueStorage>) -> Self {
        let goals: Vec<Goal> = storage::load_json(storage.as_ref(), GOALS_KEY).unwrap_or_default();
        debug!(count = goals.len(), "Loaded goals");

        Self {
            storage,
            goals: Mutex::new(goals),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Goal>> {
        self.goals.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, goals: &[Goal]) {
        storage::save_json(self.storage.as_ref(), GOALS_KEY, goals);
    }

    pub fn goals(&self) -> Vec<Goal> {
        self.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<Goal> {
        self.lock().iter().find(|g| g.id == id).cloned()
    }

    pub fn add_goal(&self, name: impl Into<String>, target: u32, emoji: impl Into<String>) -> Goal {
        let goal = Goal::new(name.into(), target, emoji.into());
        info!(goal_id = %goal.id, name = %goal.name, target, "Adding goal");

        let mut goals = self.lock();
        goals.push(goal.clone());
        self.persist(&goals);
        goal
    }

    /// Shift a goal's progress by `delta`. Unknown ids are ignored.
    pub fn update_progress(&self, id: &str, delta: i64) -> Option<Goal> {
        let mut goals = self.lock();
        let updated = goals.iter_mut().find(|g| g.id == id).map(|goal| {
            goal.apply_delta(delta);
            goal.clone()
        });

        if updated.is_none() {
            debug!(goal_id = id, "Progress update for unknown goal ignored");
        }
        self.persist(&goals);
        updated
    }

    /// Remove a goal. Returns whether anything was removed.
    pub fn delete_goal(&self, id: &str) -> bool {
        let mut goals = self.lock();
        let before = goals.len();
        goals.retain(|g| g.id != id);
        let removed = goals.len() != before;

        if removed {
            info!(goal_id = id, "Deleted goal");
        }
        self.persist(&goals);
        removed
    }

    pub fn stats(&self) -> GoalStats {
        GoalStats::from_goals(&self.lock())
    }
}

//! Savings trail store
//!
//! At most one trail exists. Creating a trail replaces the previous one;
//! resetting deletes it outright.

use crate::models::{DailySaving, SavingsTrail};
use crate::storage::{self, KeyValueStorage, SAVINGS_TRAIL_KEY};
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

pub struct SavingsTrailStore {
    storage: Arc<dyn KeyValueStorage>,
    trail: Mutex<Option<SavingsTrail>>,
}

impl SavingsTrailStore {
    pub fn load(storage: Arc<dyn KeyValueStorage>) -> Self {
        let trail: Option<SavingsTrail> = storage::load_json(storage.as_ref(), SAVINGS_TRAIL_KEY);
        debug!(present = trail.is_some(), "Loaded savings trail");

        Self {
            storage,
            trail: Mutex::new(trail),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<SavingsTrail>> {
        self.trail.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn trail(&self) -> Option<SavingsTrail> {
        self.lock().clone()
    }

    /// Build a fresh trail of `days` installments of `ceil(target_amount / days)`.
    pub fn create_trail(&self, name: impl Into<String>, target_amount: f64, days: u32) -> SavingsTrail {
        let trail = SavingsTrail::new(name.into(), target_amount, days);
        info!(
            trail_id = %trail.id,
            target_amount,
            days,
            daily_goal = trail.daily_goal,
            "Creating savings trail"
        );

        let mut current = self.lock();
        *current = Some(trail.clone());
        storage::save_json(self.storage.as_ref(), SAVINGS_TRAIL_KEY, &trail);
        trail
    }

    /// Flip completion of one day. No trail or unknown id is a no-op.
    pub fn toggle_day(&self, day_id: &str) -> Option<DailySaving> {
        let mut current = self.lock();
        let trail = current.as_mut()?;

        let saving = trail.savings.iter_mut().find(|s| s.id == day_id)?;
        saving.completed = !saving.completed;
        saving.completed_at = saving.completed.then(Utc::now);
        let toggled = saving.clone();

        debug!(day = toggled.day, completed = toggled.completed, "Toggled savings day");
        storage::save_json(self.storage.as_ref(), SAVINGS_TRAIL_KEY, &*trail);
        Some(toggled)
    }

    pub fn reset_trail(&self) {
        let mut current = self.lock();
        *current = None;
        storage::remove_key(self.storage.as_ref(), SAVINGS_TRAIL_KEY);
        info!("Savings trail reset");
    }

    pub fn total_saved(&self) -> f64 {
        self.lock().as_ref().map(SavingsTrail::total_saved).unwrap_or(0.0)
    }

    /// Uncapped progress percentage, 0 without a trail
    pub fn progress(&self) -> f64 {
        self.lock().as_ref().map(SavingsTrail::progress).unwrap_or(0.0)
    }

    /// Progress capped at 100 for display
    pub fn display_progress(&self) -> f64 {
        self.progress().min(100.0)
    }
}

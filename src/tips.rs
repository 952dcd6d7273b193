//! AI tips for goals and savings plans
//!
//! Tips are fetched once and cached; asking again returns the cache.
//! Until something is cached, each request carries the caller's latest
//! goal or plan figures.

use crate::error::TrackerError;
use crate::models::{Goal, SavingsTrail};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info};

/// User-visible message when tip generation fails
pub const TIPS_ERROR_MESSAGE: &str = "Não foi possível gerar as dicas. Tente novamente.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FinanceTipKind {
    Savings,
    Investments,
}

impl FinanceTipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinanceTipKind::Savings => "savings",
            FinanceTipKind::Investments => "investments",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinanceContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_goal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

impl FinanceContext {
    /// Plan figures for `kind`; investment tips only get the target and progress.
    pub fn from_trail(trail: &SavingsTrail, kind: FinanceTipKind) -> Self {
        let daily_goal = match kind {
            FinanceTipKind::Savings => Some(trail.daily_goal),
            FinanceTipKind::Investments => None,
        };

        Self {
            target_amount: Some(trail.target_amount),
            daily_goal,
            progress: Some(trail.progress()),
        }
    }
}

/// Body sent to one of the tip-generation functions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TipRequest {
    #[serde(rename_all = "camelCase")]
    Goal {
        goal_name: String,
        goal_emoji: String,
        goal_target: u32,
        goal_current: u32,
    },
    Finance {
        #[serde(rename = "type")]
        kind: FinanceTipKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<FinanceContext>,
    },
}

impl TipRequest {
    pub fn for_goal(goal: &Goal) -> Self {
        TipRequest::Goal {
            goal_name: goal.name.clone(),
            goal_emoji: goal.emoji.clone(),
            goal_target: goal.target,
            goal_current: goal.current,
        }
    }

    pub fn for_finance(kind: FinanceTipKind, context: Option<FinanceContext>) -> Self {
        TipRequest::Finance { kind, context }
    }

    /// Name of the serverless function that answers this request
    pub fn function_name(&self) -> &'static str {
        match self {
            TipRequest::Goal { .. } => "generate-goal-tips",
            TipRequest::Finance { .. } => "generate-finance-tips",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TipsResponse {
    pub tips: Vec<String>,
}

#[async_trait]
pub trait TipsSource: Send + Sync {
    async fn generate_tips(&self, request: &TipRequest) -> Result<serde_json::Value>;
}

#[derive(Debug, Clone, Default)]
pub struct TipsSnapshot {
    pub tips: Vec<String>,
    pub is_loading: bool,
    pub error: Option<String>,
}

pub struct TipsFetcher {
    request: Mutex<TipRequest>,
    source: Arc<dyn TipsSource>,
    state: Mutex<TipsSnapshot>,
}

impl TipsFetcher {
    pub fn new(request: TipRequest, source: Arc<dyn TipsSource>) -> Self {
        Self {
            request: Mutex::new(request),
            source,
            state: Mutex::new(TipsSnapshot::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TipsSnapshot> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> TipsSnapshot {
        self.lock().clone()
    }

    pub fn request(&self) -> TipRequest {
        self.request.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Swap in a newer request body; ignored once tips are cached.
    pub fn refresh_request(&self, request: TipRequest) {
        let state = self.lock();
        if state.tips.is_empty() {
            *self.request.lock().unwrap_or_else(|e| e.into_inner()) = request;
        }
    }

    /// Return cached tips, or fetch them on first use.
    pub async fn generate(&self) -> std::result::Result<Vec<String>, String> {
        {
            let mut state = self.lock();
            if !state.tips.is_empty() {
                return Ok(state.tips.clone());
            }
            state.is_loading = true;
            state.error = None;
        }

        let request = self.request();
        info!(function = request.function_name(), "Generating tips");
        let outcome = self.request_tips(&request).await;

        let mut state = self.lock();
        state.is_loading = false;
        match outcome {
            Ok(tips) => {
                state.tips = tips.clone();
                Ok(tips)
            }
            Err(e) => {
                error!(function = request.function_name(), error = %e, "Error generating tips");
                state.error = Some(TIPS_ERROR_MESSAGE.to_string());
                Err(TIPS_ERROR_MESSAGE.to_string())
            }
        }
    }

    async fn request_tips(&self, request: &TipRequest) -> Result<Vec<String>> {
        let value = self.source.generate_tips(request).await?;
        let response: TipsResponse = serde_json::from_value(value)
            .map_err(|e| TrackerError::MalformedResponse(format!("tips: {}", e)))?;
        Ok(response.tips)
    }
}

/// One fetcher per panel key, so each panel keeps its own cached tips
pub struct TipsCache {
    source: Arc<dyn TipsSource>,
    fetchers: Mutex<HashMap<String, Arc<TipsFetcher>>>,
}

impl TipsCache {
    pub fn new(source: Arc<dyn TipsSource>) -> Self {
        Self {
            source,
            fetchers: Mutex::new(HashMap::new()),
        }
    }

    /// Fetcher for `key`. An existing fetcher with nothing cached adopts `request`.
    pub fn fetcher(&self, key: &str, request: TipRequest) -> Arc<TipsFetcher> {
        let mut fetchers = self.fetchers.lock().unwrap_or_else(|e| e.into_inner());
        match fetchers.get(key) {
            Some(fetcher) => {
                fetcher.refresh_request(request);
                fetcher.clone()
            }
            None => {
                let fetcher = Arc::new(TipsFetcher::new(request, self.source.clone()));
                fetchers.insert(key.to_string(), fetcher.clone());
                fetcher
            }
        }
    }

    pub fn forget(&self, key: &str) {
        let mut fetchers = self.fetchers.lock().unwrap_or_else(|e| e.into_inner());
        fetchers.remove(key);
    }

    /// Drop every fetcher whose key starts with `prefix`
    pub fn forget_prefix(&self, prefix: &str) {
        let mut fetchers = self.fetchers.lock().unwrap_or_else(|e| e.into_inner());
        fetchers.retain(|key, _| !key.starts_with(prefix));
    }
}

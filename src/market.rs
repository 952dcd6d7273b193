//! Market information panels
//!
//! One fetcher per category. Each fetch replaces the cached data wholesale;
//! failures leave the last good data in place and set an error string.

use crate::error::TrackerError;
use crate::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info};

/// User-visible message when a market fetch fails
pub const MARKET_ERROR_MESSAGE: &str = "Não foi possível carregar os dados. Tente novamente.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MarketCategory {
    Stocks,
    Treasury,
    Fiis,
}

impl MarketCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketCategory::Stocks => "stocks",
            MarketCategory::Treasury => "treasury",
            MarketCategory::Fiis => "fiis",
        }
    }
}

impl fmt::Display for MarketCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MarketCategory {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "stocks" => Ok(MarketCategory::Stocks),
            "treasury" => Ok(MarketCategory::Treasury),
            "fiis" => Ok(MarketCategory::Fiis),
            other => Err(TrackerError::UnknownCategory(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockItem {
    pub ticker: String,
    pub company: String,
    pub sector: String,
    pub analysis: String,
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreasuryItem {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "yield")]
    pub yield_rate: String,
    pub maturity: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiiItem {
    pub ticker: String,
    pub name: String,
    pub segment: String,
    pub dividend_yield: String,
    pub analysis: String,
}

/// Summarized market view for one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketData<T> {
    #[serde(default)]
    pub summary: String,
    pub items: Vec<T>,
    #[serde(default)]
    pub tip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_trend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selic_rate: Option<String>,
}

/// Anything that can answer a market-info request
#[async_trait]
pub trait MarketInfoSource: Send + Sync {
    async fn market_info(&self, category: MarketCategory) -> Result<serde_json::Value>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot<T> {
    pub data: Option<MarketData<T>>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl<T> Default for MarketSnapshot<T> {
    fn default() -> Self {
        Self {
            data: None,
            is_loading: false,
            error: None,
        }
    }
}

pub struct MarketDataFetcher<T> {
    category: MarketCategory,
    source: Arc<dyn MarketInfoSource>,
    state: Mutex<MarketSnapshot<T>>,
}

pub type StocksFetcher = MarketDataFetcher<StockItem>;
pub type TreasuryFetcher = MarketDataFetcher<TreasuryItem>;
pub type FiisFetcher = MarketDataFetcher<FiiItem>;

impl<T> MarketDataFetcher<T>
where
    T: DeserializeOwned + Clone + Send,
{
    pub fn new(category: MarketCategory, source: Arc<dyn MarketInfoSource>) -> Self {
        Self {
            category,
            source,
            state: Mutex::new(MarketSnapshot::default()),
        }
    }

    pub fn category(&self) -> MarketCategory {
        self.category
    }

    fn lock(&self) -> MutexGuard<'_, MarketSnapshot<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> MarketSnapshot<T> {
        self.lock().clone()
    }

    pub fn data(&self) -> Option<MarketData<T>> {
        self.lock().data.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().is_loading
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    /// Request fresh data for this category.
    ///
    /// Returns the error that was recorded, if any. The fetcher state is
    /// always usable afterwards.
    pub async fn fetch_data(&self) -> std::result::Result<(), String> {
        {
            let mut state = self.lock();
            state.is_loading = true;
            state.error = None;
        }

        info!(category = %self.category, "Fetching market data");
        let outcome = self.request().await;

        let mut state = self.lock();
        state.is_loading = false;
        match outcome {
            Ok(data) => {
                info!(category = %self.category, items = data.items.len(), "Market data updated");
                state.data = Some(data);
                Ok(())
            }
            Err(e) => {
                error!(category = %self.category, error = %e, "Error fetching market data");
                state.error = Some(MARKET_ERROR_MESSAGE.to_string());
                Err(MARKET_ERROR_MESSAGE.to_string())
            }
        }
    }

    async fn request(&self) -> Result<MarketData<T>> {
        let value = self.source.market_info(self.category).await?;
        serde_json::from_value(value)
            .map_err(|e| TrackerError::MalformedResponse(format!("market data: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;

    /// Replays queued responses in order
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<serde_json::Value>>>,
        seen: Mutex<Vec<MarketCategory>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<serde_json::Value>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl MarketInfoSource for ScriptedSource {
        async fn market_info(&self, category: MarketCategory) -> Result<serde_json::Value> {
            self.seen.lock().unwrap().push(category);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TrackerError::Remote("no scripted response".into())))
        }
    }

    fn stocks_payload(ticker: &str) -> serde_json::Value {
        json!({
            "summary": "Ibovespa em alta",
            "indexTrend": "up",
            "items": [{
                "ticker": ticker,
                "company": "Petrobras",
                "sector": "Energia",
                "analysis": "Boa geração de caixa",
                "trend": "up"
            }],
            "tip": "Diversifique"
        })
    }

    #[tokio::test]
    async fn test_fetch_replaces_data() {
        let source = ScriptedSource::new(vec![Ok(stocks_payload("PETR4")), Ok(stocks_payload("VALE3"))]);
        let fetcher = StocksFetcher::new(MarketCategory::Stocks, source.clone());

        fetcher.fetch_data().await.unwrap();
        assert_eq!(fetcher.data().unwrap().items[0].ticker, "PETR4");

        fetcher.fetch_data().await.unwrap();
        let data = fetcher.data().unwrap();
        assert_eq!(data.items.len(), 1);
        assert_eq!(data.items[0].ticker, "VALE3");
        assert_eq!(data.index_trend.as_deref(), Some("up"));
        assert!(!fetcher.is_loading());
        assert_eq!(*source.seen.lock().unwrap(), vec![MarketCategory::Stocks; 2]);
    }

    #[tokio::test]
    async fn test_failure_keeps_prior_data() {
        let source = ScriptedSource::new(vec![
            Ok(stocks_payload("PETR4")),
            Err(TrackerError::Remote("gateway down".into())),
        ]);
        let fetcher = StocksFetcher::new(MarketCategory::Stocks, source);

        fetcher.fetch_data().await.unwrap();
        assert!(fetcher.fetch_data().await.is_err());

        let snapshot = fetcher.snapshot();
        assert_eq!(snapshot.error.as_deref(), Some(MARKET_ERROR_MESSAGE));
        assert_eq!(snapshot.data.unwrap().items[0].ticker, "PETR4");
        assert!(!snapshot.is_loading);
    }

    #[test]
    fn test_missing_items_is_an_error() {
        let source = ScriptedSource::new(vec![Ok(json!({ "error": "Invalid category" }))]);
        let fetcher = TreasuryFetcher::new(MarketCategory::Treasury, source);

        tokio_test::assert_err!(tokio_test::block_on(fetcher.fetch_data()));
        assert!(fetcher.data().is_none());
        assert_eq!(fetcher.error().as_deref(), Some(MARKET_ERROR_MESSAGE));
    }

    #[tokio::test]
    async fn test_retry_clears_error() {
        let payload = json!({
            "summary": "FIIs estáveis",
            "items": [{
                "ticker": "HGLG11",
                "name": "CSHG Logística",
                "segment": "Logística",
                "dividendYield": "8,5%",
                "analysis": "Portfólio sólido"
            }],
            "tip": "Reinvista os dividendos"
        });
        let source = ScriptedSource::new(vec![Err(TrackerError::Remote("timeout".into())), Ok(payload)]);
        let fetcher = FiisFetcher::new(MarketCategory::Fiis, source);

        assert!(fetcher.fetch_data().await.is_err());
        fetcher.fetch_data().await.unwrap();

        assert!(fetcher.error().is_none());
        assert_eq!(fetcher.data().unwrap().items[0].dividend_yield, "8,5%");
    }

    #[test]
    fn test_treasury_item_field_names() {
        let item: TreasuryItem = serde_json::from_value(json!({
            "name": "Tesouro Selic 2029",
            "type": "Selic",
            "yield": "Selic + 0,1%",
            "maturity": "2029",
            "recommendation": "Reserva de emergência"
        }))
        .unwrap();
        assert_eq!(item.kind, "Selic");
        assert_eq!(item.yield_rate, "Selic + 0,1%");
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("FIIS".parse::<MarketCategory>().unwrap(), MarketCategory::Fiis);
        assert!("crypto".parse::<MarketCategory>().is_err());
    }
}

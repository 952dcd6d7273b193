//! REST API Server for the goal and finance trackers
//!
//! Exposes the stores via HTTP endpoints for the frontend.
//! User input is validated here, before it reaches a store.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::chat::{ChatSession, ChatTransport};
use crate::error::TrackerError;
use crate::goals::GoalStore;
use crate::market::{
    FiisFetcher, MarketCategory, MarketDataFetcher, MarketInfoSource, StocksFetcher, TreasuryFetcher,
};
use crate::models::SavingsTrail;
use crate::remote::FunctionsClient;
use crate::savings::SavingsTrailStore;
use crate::storage::KeyValueStorage;
use crate::tips::{FinanceContext, FinanceTipKind, TipRequest, TipsCache, TipsSource};
use crate::validation::{validate_goal, validate_trail};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct CreateGoalRequest {
    pub name: String,
    pub target: i64,
    #[serde(default = "default_emoji")]
    pub emoji: String,
}

fn default_emoji() -> String {
    "🎯".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub delta: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTrailRequest {
    pub name: String,
    pub target_amount: f64,
    pub days: i64,
}

#[derive(Debug, Deserialize)]
pub struct FinanceTipsRequest {
    #[serde(rename = "type")]
    pub kind: FinanceTipKind,
    pub context: Option<FinanceContext>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn respond<T: Serialize>(status: StatusCode, data: T) -> ApiResult {
    (status, Json(ApiResponse::success(data)))
}

fn reject(status: StatusCode, message: impl Into<String>) -> ApiResult {
    (status, Json(ApiResponse::error(message.into())))
}

fn reject_error(e: &TrackerError) -> ApiResult {
    let status = match e {
        TrackerError::Validation(_) => StatusCode::BAD_REQUEST,
        TrackerError::UnknownCategory(_) => StatusCode::NOT_FOUND,
        TrackerError::ChatBusy => StatusCode::CONFLICT,
        TrackerError::Remote(_) | TrackerError::MalformedResponse(_) | TrackerError::HttpError(_) => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    reject(status, e.to_string())
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub goals: Arc<GoalStore>,
    pub savings: Arc<SavingsTrailStore>,
    pub chat: Arc<ChatSession>,
    pub stocks: Arc<StocksFetcher>,
    pub treasury: Arc<TreasuryFetcher>,
    pub fiis: Arc<FiisFetcher>,
    pub tips: Arc<TipsCache>,
}

impl ApiState {
    pub fn new(
        storage: Arc<dyn KeyValueStorage>,
        chat_transport: Arc<dyn ChatTransport>,
        market: Arc<dyn MarketInfoSource>,
        tips: Arc<dyn TipsSource>,
    ) -> Self {
        Self {
            goals: Arc::new(GoalStore::load(storage.clone())),
            savings: Arc::new(SavingsTrailStore::load(storage.clone())),
            chat: Arc::new(ChatSession::load(storage, chat_transport)),
            stocks: Arc::new(StocksFetcher::new(MarketCategory::Stocks, market.clone())),
            treasury: Arc::new(TreasuryFetcher::new(MarketCategory::Treasury, market.clone())),
            fiis: Arc::new(FiisFetcher::new(MarketCategory::Fiis, market)),
            tips: Arc::new(TipsCache::new(tips)),
        }
    }

    /// Every remote concern served by one functions client
    pub fn with_client(storage: Arc<dyn KeyValueStorage>, client: FunctionsClient) -> Self {
        let client = Arc::new(client);
        Self::new(storage, client.clone(), client.clone(), client)
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Goal Endpoints
/// =============================

fn goal_tips_key(goal_id: &str) -> String {
    format!("goal:{}", goal_id)
}

async fn list_goals(State(state): State<ApiState>) -> ApiResult {
    respond(StatusCode::OK, state.goals.goals())
}

async fn create_goal(State(state): State<ApiState>, Json(req): Json<CreateGoalRequest>) -> ApiResult {
    match validate_goal(&req.name, req.target) {
        Ok(valid) => {
            let goal = state.goals.add_goal(valid.name, valid.target, req.emoji);
            respond(StatusCode::CREATED, goal)
        }
        Err(e) => reject_error(&e),
    }
}

async fn update_progress(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<ProgressRequest>,
) -> ApiResult {
    match state.goals.update_progress(&id, req.delta) {
        Some(goal) => respond(StatusCode::OK, goal),
        None => reject(StatusCode::NOT_FOUND, format!("Goal not found: {}", id)),
    }
}

async fn delete_goal(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    let deleted = state.goals.delete_goal(&id);
    state.tips.forget(&goal_tips_key(&id));
    respond(StatusCode::OK, serde_json::json!({ "deleted": deleted }))
}

async fn goal_stats(State(state): State<ApiState>) -> ApiResult {
    respond(StatusCode::OK, state.goals.stats())
}

async fn goal_tips(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    let Some(goal) = state.goals.get(&id) else {
        return reject(StatusCode::NOT_FOUND, format!("Goal not found: {}", id));
    };

    let fetcher = state.tips.fetcher(&goal_tips_key(&id), TipRequest::for_goal(&goal));
    match fetcher.generate().await {
        Ok(tips) => respond(StatusCode::OK, serde_json::json!({ "tips": tips })),
        Err(message) => reject(StatusCode::BAD_GATEWAY, message),
    }
}

/// =============================
/// Savings Trail Endpoints
/// =============================

const FINANCE_TIPS_PREFIX: &str = "finance:";

fn finance_tips_key(kind: FinanceTipKind) -> String {
    format!("{}{}", FINANCE_TIPS_PREFIX, kind.as_str())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TrailView {
    trail: Option<SavingsTrail>,
    total_saved: f64,
    progress: f64,
    display_progress: f64,
}

impl TrailView {
    fn of(store: &SavingsTrailStore) -> Self {
        let trail = store.trail();
        let total_saved = trail.as_ref().map(SavingsTrail::total_saved).unwrap_or(0.0);
        let progress = trail.as_ref().map(SavingsTrail::progress).unwrap_or(0.0);

        Self {
            trail,
            total_saved,
            progress,
            display_progress: progress.min(100.0),
        }
    }
}

async fn get_trail(State(state): State<ApiState>) -> ApiResult {
    respond(StatusCode::OK, TrailView::of(&state.savings))
}

async fn create_trail(State(state): State<ApiState>, Json(req): Json<CreateTrailRequest>) -> ApiResult {
    match validate_trail(&req.name, req.target_amount, req.days) {
        Ok(valid) => {
            state
                .savings
                .create_trail(valid.name, valid.target_amount, valid.days);
            state.tips.forget_prefix(FINANCE_TIPS_PREFIX);
            respond(StatusCode::CREATED, TrailView::of(&state.savings))
        }
        Err(e) => reject_error(&e),
    }
}

async fn toggle_day(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    state.savings.toggle_day(&id);
    respond(StatusCode::OK, TrailView::of(&state.savings))
}

async fn reset_trail(State(state): State<ApiState>) -> ApiResult {
    state.savings.reset_trail();
    state.tips.forget_prefix(FINANCE_TIPS_PREFIX);
    respond(StatusCode::OK, TrailView::of(&state.savings))
}

async fn finance_tips(State(state): State<ApiState>, Json(req): Json<FinanceTipsRequest>) -> ApiResult {
    let context = req
        .context
        .or_else(|| state.savings.trail().map(|trail| FinanceContext::from_trail(&trail, req.kind)));

    let fetcher = state.tips.fetcher(&finance_tips_key(req.kind), TipRequest::for_finance(req.kind, context));
    match fetcher.generate().await {
        Ok(tips) => respond(StatusCode::OK, serde_json::json!({ "tips": tips })),
        Err(message) => reject(StatusCode::BAD_GATEWAY, message),
    }
}

/// =============================
/// Market Endpoints
/// =============================

async fn market_view<T>(fetcher: &MarketDataFetcher<T>, fetch: bool) -> ApiResult
where
    T: DeserializeOwned + Serialize + Clone + Send,
{
    if fetch {
        if let Err(message) = fetcher.fetch_data().await {
            return reject(StatusCode::BAD_GATEWAY, message);
        }
    }
    respond(StatusCode::OK, fetcher.snapshot())
}

async fn market(state: ApiState, category: String, fetch: bool) -> ApiResult {
    let category: MarketCategory = match category.parse() {
        Ok(category) => category,
        Err(e) => return reject_error(&e),
    };

    match category {
        MarketCategory::Stocks => market_view(&*state.stocks, fetch).await,
        MarketCategory::Treasury => market_view(&*state.treasury, fetch).await,
        MarketCategory::Fiis => market_view(&*state.fiis, fetch).await,
    }
}

async fn market_snapshot(State(state): State<ApiState>, Path(category): Path<String>) -> ApiResult {
    market(state, category, false).await
}

async fn fetch_market(State(state): State<ApiState>, Path(category): Path<String>) -> ApiResult {
    market(state, category, true).await
}

/// =============================
/// Chat Endpoints
/// =============================

fn chat_view(chat: &ChatSession) -> serde_json::Value {
    serde_json::json!({
        "messages": chat.messages(),
        "isLoading": chat.is_loading(),
    })
}

async fn get_chat(State(state): State<ApiState>) -> ApiResult {
    respond(StatusCode::OK, chat_view(&state.chat))
}

async fn send_chat(State(state): State<ApiState>, Json(req): Json<SendMessageRequest>) -> ApiResult {
    let message = req.message.trim().to_string();
    if message.is_empty() {
        return reject(StatusCode::BAD_REQUEST, "Message must not be empty");
    }

    info!(chars = message.chars().count(), "Received chat message");

    // The turn runs on its own task so a dropped connection does not abort it
    let chat = state.chat.clone();
    let turn = tokio::spawn(async move { chat.send_message(&message).await });

    match turn.await {
        Ok(Ok(())) => respond(StatusCode::OK, chat_view(&state.chat)),
        Ok(Err(e)) => reject_error(&e),
        Err(e) => {
            error!("Chat task failed: {}", e);
            reject(StatusCode::INTERNAL_SERVER_ERROR, "Chat task failed")
        }
    }
}

async fn clear_chat(State(state): State<ApiState>) -> ApiResult {
    state.chat.clear_chat();
    respond(StatusCode::OK, chat_view(&state.chat))
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/goals", get(list_goals).post(create_goal))
        .route("/api/goals/stats", get(goal_stats))
        .route("/api/goals/:id", axum::routing::delete(delete_goal))
        .route("/api/goals/:id/progress", post(update_progress))
        .route("/api/goals/:id/tips", post(goal_tips))
        .route("/api/trail", get(get_trail).post(create_trail).delete(reset_trail))
        .route("/api/trail/days/:id/toggle", post(toggle_day))
        .route("/api/tips/finance", post(finance_tips))
        .route("/api/market/:category", get(market_snapshot).post(fetch_market))
        .route("/api/chat", get(get_chat).post(send_chat).delete(clear_chat))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ByteStream;
    use crate::storage::InMemoryStorage;
    use crate::Result;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use futures::StreamExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    /// Answers every function with a canned response; fiis always fail
    #[derive(Default)]
    struct FakeFunctions {
        tip_requests: std::sync::Mutex<Vec<TipRequest>>,
    }

    #[async_trait]
    impl ChatTransport for FakeFunctions {
        async fn open_stream(&self, _messages: &[crate::models::ChatMessage]) -> Result<ByteStream> {
            let body = concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"Oi! \"}}]}\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"Como posso ajudar?\"}}]}\n",
                "data: [DONE]\n"
            );
            Ok(futures::stream::iter(vec![Ok(body.as_bytes().to_vec())]).boxed())
        }
    }

    #[async_trait]
    impl MarketInfoSource for FakeFunctions {
        async fn market_info(&self, category: MarketCategory) -> Result<Value> {
            match category {
                MarketCategory::Stocks => Ok(json!({
                    "summary": "Mercado lateral",
                    "indexTrend": "neutral",
                    "items": [{
                        "ticker": "ITUB4",
                        "company": "Itaú Unibanco",
                        "sector": "Financeiro",
                        "analysis": "Rentabilidade consistente",
                        "trend": "up"
                    }],
                    "tip": "Pense no longo prazo"
                })),
                _ => Err(TrackerError::Remote("Limite de requisições excedido".into())),
            }
        }
    }

    #[async_trait]
    impl TipsSource for FakeFunctions {
        async fn generate_tips(&self, request: &TipRequest) -> Result<Value> {
            self.tip_requests.lock().unwrap().push(request.clone());
            Ok(json!({ "tips": ["Defina um horário fixo", "Comece pequeno"] }))
        }
    }

    fn router() -> Router {
        router_with(Arc::new(FakeFunctions::default()))
    }

    fn router_with(fake: Arc<FakeFunctions>) -> Router {
        let state = ApiState::new(Arc::new(InMemoryStorage::new()), fake.clone(), fake.clone(), fake);
        create_router(state)
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(&router(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_goal_lifecycle() {
        let router = router();

        let (status, body) = call(
            &router,
            "POST",
            "/api/goals",
            Some(json!({ "name": "  Beber água ", "target": 3, "emoji": "💧" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["name"], "Beber água");
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (_, body) = call(
            &router,
            "POST",
            &format!("/api/goals/{}/progress", id),
            Some(json!({ "delta": 5 })),
        )
        .await;
        assert_eq!(body["data"]["current"], 3);

        let (_, body) = call(&router, "GET", "/api/goals/stats", None).await;
        assert_eq!(body["data"]["completed"], 1);
        assert_eq!(body["data"]["total"], 1);

        let (_, body) = call(&router, "DELETE", &format!("/api/goals/{}", id), None).await;
        assert_eq!(body["data"]["deleted"], true);

        let (status, body) = call(
            &router,
            "POST",
            &format!("/api/goals/{}/progress", id),
            Some(json!({ "delta": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let (_, body) = call(&router, "GET", "/api/goals", None).await;
        assert_eq!(body["data"], json!([]));
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected_at_the_boundary() {
        let router = router();

        let (status, body) = call(&router, "POST", "/api/goals", Some(json!({ "name": "   ", "target": 5 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, _) = call(&router, "POST", "/api/goals", Some(json!({ "name": "Ler", "target": 10001 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &router,
            "POST",
            "/api/trail",
            Some(json!({ "name": "Viagem", "targetAmount": 1000, "days": 6 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = call(&router, "GET", "/api/goals", None).await;
        assert_eq!(body["data"], json!([]));
    }

    #[tokio::test]
    async fn test_trail_lifecycle() {
        let router = router();

        let (status, body) = call(
            &router,
            "POST",
            "/api/trail",
            Some(json!({ "name": "Viagem", "targetAmount": 1000, "days": 30 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["trail"]["dailyGoal"], 34.0);

        let days: Vec<String> = body["data"]["trail"]["savings"]
            .as_array()
            .unwrap()
            .iter()
            .take(2)
            .map(|d| d["id"].as_str().unwrap().to_string())
            .collect();

        for day in &days {
            call(&router, "POST", &format!("/api/trail/days/{}/toggle", day), None).await;
        }

        let (_, body) = call(&router, "GET", "/api/trail", None).await;
        assert_eq!(body["data"]["totalSaved"], 68.0);
        assert!((body["data"]["progress"].as_f64().unwrap() - 6.8).abs() < 1e-9);

        let (_, body) = call(&router, "DELETE", "/api/trail", None).await;
        assert!(body["data"]["trail"].is_null());
        assert_eq!(body["data"]["progress"], 0.0);
    }

    #[tokio::test]
    async fn test_market_endpoints() {
        let router = router();

        let (status, body) = call(&router, "POST", "/api/market/stocks", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["data"]["items"][0]["ticker"], "ITUB4");
        assert_eq!(body["data"]["isLoading"], false);

        let (status, _) = call(&router, "POST", "/api/market/crypto", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&router, "POST", "/api/market/fiis", None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], crate::market::MARKET_ERROR_MESSAGE);

        let (_, body) = call(&router, "GET", "/api/market/fiis", None).await;
        assert!(body["data"]["data"].is_null());
        assert_eq!(body["data"]["error"], crate::market::MARKET_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn test_tips_endpoints() {
        let router = router();

        let (status, _) = call(&router, "POST", "/api/goals/missing/tips", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = call(&router, "POST", "/api/goals", Some(json!({ "name": "Meditar", "target": 21 }))).await;
        assert_eq!(body["data"]["emoji"], "🎯");
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = call(&router, "POST", &format!("/api/goals/{}/tips", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["tips"][1], "Comece pequeno");

        let (status, body) = call(&router, "POST", "/api/tips/finance", Some(json!({ "type": "savings" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["tips"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_finance_tips_follow_the_current_trail() {
        let fake = Arc::new(FakeFunctions::default());
        let router = router_with(fake.clone());

        let plan = |amount: u32| Some(json!({ "name": "Reserva", "targetAmount": amount, "days": 30 }));
        call(&router, "POST", "/api/trail", plan(1000)).await;
        call(&router, "POST", "/api/tips/finance", Some(json!({ "type": "savings" }))).await;
        call(&router, "POST", "/api/tips/finance", Some(json!({ "type": "investments" }))).await;

        call(&router, "DELETE", "/api/trail", None).await;
        call(&router, "POST", "/api/trail", plan(2000)).await;
        call(&router, "POST", "/api/tips/finance", Some(json!({ "type": "savings" }))).await;

        let sent: Vec<Value> = fake
            .tip_requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| serde_json::to_value(r).unwrap())
            .collect();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0]["context"]["dailyGoal"], 34.0);
        assert_eq!(sent[1]["type"], "investments");
        assert!(sent[1]["context"].get("dailyGoal").is_none());
        assert_eq!(sent[1]["context"]["targetAmount"], 1000.0);
        assert_eq!(sent[2]["context"]["targetAmount"], 2000.0);
        assert_eq!(sent[2]["context"]["dailyGoal"], 67.0);
    }

    #[tokio::test]
    async fn test_chat_endpoints() {
        let router = router();

        let (status, _) = call(&router, "POST", "/api/chat", Some(json!({ "message": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&router, "POST", "/api/chat", Some(json!({ "message": "Oi" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["data"]["messages"],
            json!([
                { "role": "user", "content": "Oi" },
                { "role": "assistant", "content": "Oi! Como posso ajudar?" }
            ])
        );
        assert_eq!(body["data"]["isLoading"], false);

        let (_, body) = call(&router, "DELETE", "/api/chat", None).await;
        assert_eq!(body["data"]["messages"], json!([]));
    }
}

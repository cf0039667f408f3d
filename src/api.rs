// 🌐 REST API with Axum
// Policy rule CRUD + transaction submission/listing.

use crate::converter::CurrencyConverter;
use crate::db;
use crate::error::ValidationError;
use crate::evaluator::TransactionEvaluator;
use crate::rule::{NewRule, Rule, RulePatch};
use crate::transaction::{Transaction, TransactionCandidate, TransactionFilter};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<Connection>>,
    evaluator: TransactionEvaluator,
}

impl AppState {
    pub fn new(conn: Connection, converter: Arc<dyn CurrencyConverter>) -> Self {
        Self::with_shared_db(Arc::new(Mutex::new(conn)), converter)
    }

    pub fn with_shared_db(db: Arc<Mutex<Connection>>, converter: Arc<dyn CurrencyConverter>) -> Self {
        AppState {
            db,
            evaluator: TransactionEvaluator::new(converter),
        }
    }

    fn lock_db(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.db
            .lock()
            .map_err(|_| ApiError::Internal(anyhow::anyhow!("database lock poisoned")))
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Body, path or query string could not be parsed
    #[error("{0}")]
    BadRequest(String),

    #[error("Not found.")]
    NotFound,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

type RuleId = Result<Path<i64>, PathRejection>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(e) => {
                error!("Internal error: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match &self {
            ApiError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// POLICY RULE HANDLERS
// ============================================================================

/// POST /policy_rule/
async fn create_rule(
    State(state): State<AppState>,
    payload: Result<Json<NewRule>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Rule>)> {
    let Json(new_rule) = payload?;
    new_rule.validate()?;

    let mut conn = state.lock_db()?;
    let rule = db::insert_rule(&mut conn, new_rule)?;

    Ok((StatusCode::CREATED, Json(rule)))
}

/// GET /policy_rule/
async fn list_rules(State(state): State<AppState>) -> ApiResult<Json<Vec<Rule>>> {
    let conn = state.lock_db()?;
    Ok(Json(db::get_all_rules(&conn)?))
}

/// GET /policy_rule/:id/
async fn get_rule(State(state): State<AppState>, id: RuleId) -> ApiResult<Json<Rule>> {
    let Path(id) = id?;
    let conn = state.lock_db()?;
    db::get_rule(&conn, id)?.map(Json).ok_or(ApiError::NotFound)
}

/// PATCH /policy_rule/:id/
async fn patch_rule(
    State(state): State<AppState>,
    id: RuleId,
    payload: Result<Json<RulePatch>, JsonRejection>,
) -> ApiResult<Json<Rule>> {
    let Path(id) = id?;
    let Json(patch) = payload?;
    patch.validate()?;

    let mut conn = state.lock_db()?;
    db::update_rule(&mut conn, id, &patch)?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

/// PUT /policy_rule/:id/ - full replacement, omitted fields fall back to defaults
async fn put_rule(
    State(state): State<AppState>,
    id: RuleId,
    payload: Result<Json<NewRule>, JsonRejection>,
) -> ApiResult<Json<Rule>> {
    let Path(id) = id?;
    let Json(replacement) = payload?;
    replacement.validate()?;

    let patch = RulePatch {
        amount: Some(replacement.amount),
        currency: Some(replacement.currency),
        destinations: Some(replacement.destinations),
    };

    let mut conn = state.lock_db()?;
    db::update_rule(&mut conn, id, &patch)?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

/// DELETE /policy_rule/:id/
async fn delete_rule(State(state): State<AppState>, id: RuleId) -> ApiResult<StatusCode> {
    let Path(id) = id?;
    let mut conn = state.lock_db()?;

    if db::delete_rule(&mut conn, id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

// ============================================================================
// TRANSACTION HANDLERS
// ============================================================================

/// POST /transactions/
async fn create_transaction(
    State(state): State<AppState>,
    payload: Result<Json<TransactionCandidate>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Transaction>)> {
    let Json(candidate) = payload?;
    candidate.validate()?;

    // Snapshot the rules; the lock is not held during price lookups
    let rules = {
        let conn = state.lock_db()?;
        db::get_all_rules(&conn)?
    };

    let status = state.evaluator.evaluate(&rules, &candidate).await;

    let mut conn = state.lock_db()?;
    let transaction = db::insert_transaction(&mut conn, &candidate, status)?;

    Ok((StatusCode::CREATED, Json(transaction)))
}

/// GET /transactions/?filter=all|outgoing|rejected
async fn list_transactions(
    State(state): State<AppState>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> ApiResult<Json<Vec<Transaction>>> {
    let Query(pairs) = query?;
    let filter = TransactionFilter::from_query(&pairs);

    let conn = state.lock_db()?;
    Ok(Json(db::get_transactions(&conn, filter)?))
}

/// GET /health
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn router(state: AppState) -> Router {
    let rule_collection = get(list_rules).post(create_rule);
    let rule_item = get(get_rule)
        .patch(patch_rule)
        .put(put_rule)
        .delete(delete_rule);
    let transactions = get(list_transactions).post(create_transaction);

    Router::new()
        .route("/health", get(health_check))
        .route("/policy_rule/", rule_collection.clone())
        .route("/policy_rule", rule_collection)
        .route("/policy_rule/:id/", rule_item.clone())
        .route("/policy_rule/:id", rule_item)
        .route("/transactions/", transactions.clone())
        .route("/transactions", transactions)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::FixedRateConverter;
    use crate::transaction::TransactionStatus;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct TestApp {
        db: Arc<Mutex<Connection>>,
        router: Router,
    }

    impl TestApp {
        fn new() -> Self {
            let conn = Connection::open_in_memory().unwrap();
            db::setup_database(&conn).unwrap();
            let db = Arc::new(Mutex::new(conn));

            let converter = Arc::new(FixedRateConverter::new().with_rate("USD", 100).with_rate("CAD", 100));
            let router = router(AppState::with_shared_db(db.clone(), converter));

            TestApp { db, router }
        }

        async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let builder = Request::builder().method(method).uri(uri);
            let request = match body {
                Some(json) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(json.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };

            (status, value)
        }

        fn seed_rule(&self, amount: i64, currency: &str, destinations: &[&str]) -> Rule {
            let mut conn = self.db.lock().unwrap();
            db::insert_rule(&mut conn, NewRule::new(amount, currency, destinations)).unwrap()
        }

        fn rule_count(&self) -> usize {
            db::get_all_rules(&self.db.lock().unwrap()).unwrap().len()
        }

        fn destination_count(&self) -> i64 {
            db::count_destinations(&self.db.lock().unwrap()).unwrap()
        }

        fn stored_status(&self, id: i64) -> TransactionStatus {
            db::get_transaction(&self.db.lock().unwrap(), id)
                .unwrap()
                .unwrap()
                .status
        }
    }

    #[tokio::test]
    async fn test_create_currency_rule() {
        let app = TestApp::new();
        app.seed_rule(100, "USD", &["home"]);

        let (status, body) = app
            .send("POST", "/policy_rule/", Some(json!({"amount": 10, "destinations": ["c"], "currency": "USD"})))
            .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["amount"], 10);
        assert_eq!(body["currency"], "USD");
        assert_eq!(body["destinations"], json!(["c"]));
        assert!(body.get("created_at").is_none());
        assert_eq!(app.rule_count(), 2);
        assert_eq!(app.destination_count(), 2);
    }

    #[tokio::test]
    async fn test_create_no_currency_rule() {
        let app = TestApp::new();
        app.seed_rule(100, "USD", &["home"]);

        let (status, body) = app
            .send("POST", "/policy_rule/", Some(json!({"amount": 1000, "destinations": ["a", "b"]})))
            .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["currency"], "satoshi");
        assert_eq!(app.rule_count(), 2);
        assert_eq!(app.destination_count(), 3);
    }

    #[tokio::test]
    async fn test_create_rule_validation() {
        let app = TestApp::new();

        let (missing, _) = app.send("POST", "/policy_rule/", Some(json!({"amount": 10}))).await;
        let (wrong_type, _) = app
            .send("POST", "/policy_rule/", Some(json!({"amount": "ten", "destinations": []})))
            .await;
        let (bad_threshold, body) = app
            .send("POST", "/policy_rule/", Some(json!({"amount": -5, "destinations": []})))
            .await;

        assert_eq!(missing, StatusCode::BAD_REQUEST);
        assert_eq!(wrong_type, StatusCode::BAD_REQUEST);
        assert_eq!(bad_threshold, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("amount:"));
        assert_eq!(app.rule_count(), 0);
    }

    #[tokio::test]
    async fn test_get_and_list_rules() {
        let app = TestApp::new();
        let rule = app.seed_rule(100, "USD", &["home"]);

        let (status, body) = app.send("GET", &format!("/policy_rule/{}/", rule.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rule_id"], rule.id);
        assert_eq!(body["destinations"], json!(["home"]));

        let (status, list) = app.send("GET", "/policy_rule/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (missing, _) = app.send("GET", "/policy_rule/999/", None).await;
        assert_eq!(missing, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_rule() {
        let app = TestApp::new();
        let rule = app.seed_rule(100, "USD", &["home"]);

        let (status, _) = app.send("DELETE", &format!("/policy_rule/{}/", rule.id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(app.rule_count(), 0);
        assert_eq!(app.destination_count(), 0);

        let (again, _) = app.send("DELETE", &format!("/policy_rule/{}/", rule.id), None).await;
        assert_eq!(again, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_rule() {
        let app = TestApp::new();
        let rule = app.seed_rule(100, "USD", &["home"]);
        let uri = format!("/policy_rule/{}/", rule.id);

        let (status, body) = app
            .send("PATCH", &uri, Some(json!({"amount": 200, "currency": "CAD"})))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["amount"], 200);
        assert_eq!(body["currency"], "CAD");
        assert_eq!(body["destinations"], json!(["home"]));

        let (_, replaced) = app
            .send("PATCH", &uri, Some(json!({"destinations": ["work", "gym"]})))
            .await;
        assert_eq!(replaced["destinations"], json!(["work", "gym"]));
        assert_eq!(replaced["amount"], 200);
        assert_eq!(app.destination_count(), 2);

        let (put_status, put_body) = app
            .send("PUT", &uri, Some(json!({"destinations": []})))
            .await;
        assert_eq!(put_status, StatusCode::OK);
        assert_eq!(put_body["amount"], -1);
        assert_eq!(put_body["currency"], "satoshi");
        assert_eq!(app.destination_count(), 0);

        let (missing, _) = app.send("PATCH", "/policy_rule/999/", Some(json!({"amount": 1}))).await;
        assert_eq!(missing, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_transaction_on_currency_rule() {
        let app = TestApp::new();
        app.seed_rule(200, "USD", &["home"]);

        let (status, body) = app
            .send("POST", "/transactions/", Some(json!({"amount": 1, "destination": "home"})))
            .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, json!({"amount": 1, "destination": "home", "status": "outgoing"}));
        assert_eq!(app.stored_status(1), TransactionStatus::Outgoing);
    }

    #[tokio::test]
    async fn test_transaction_on_satoshi_rule() {
        let app = TestApp::new();
        app.seed_rule(10_000, "satoshi", &["work"]);

        app.send("POST", "/transactions/", Some(json!({"amount": 20000, "destination": "work"})))
            .await;

        assert_eq!(app.stored_status(1), TransactionStatus::Rejected);
    }

    #[tokio::test]
    async fn test_bad_currency_rule_transaction() {
        let app = TestApp::new();
        app.seed_rule(100, "bad_crncy", &["home"]);

        let (status, body) = app
            .send("POST", "/transactions/", Some(json!({"amount": 50, "destination": "home"})))
            .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "rejected");
        assert_eq!(app.stored_status(1), TransactionStatus::Rejected);
    }

    #[tokio::test]
    async fn test_any_amount_rule_transaction() {
        let app = TestApp::new();
        app.seed_rule(-1, "satoshi", &["my_pocket"]);

        app.send("POST", "/transactions/", Some(json!({"amount": 6000, "destination": "my_pocket"})))
            .await;

        assert_eq!(app.stored_status(1), TransactionStatus::Outgoing);
    }

    #[tokio::test]
    async fn test_any_destination_rule_transaction() {
        let app = TestApp::new();
        app.seed_rule(10, "satoshi", &[]);

        app.send("POST", "/transactions/", Some(json!({"amount": 10, "destination": "shady_place"})))
            .await;
        app.send("POST", "/transactions/", Some(json!({"amount": 100, "destination": "shady_place"})))
            .await;

        assert_eq!(app.stored_status(1), TransactionStatus::Outgoing);
        assert_eq!(app.stored_status(2), TransactionStatus::Rejected);
    }

    #[tokio::test]
    async fn test_transaction_validation() {
        let app = TestApp::new();

        let (missing_destination, _) =
            app.send("POST", "/transactions/", Some(json!({"amount": 10}))).await;
        let (missing_amount, _) =
            app.send("POST", "/transactions/", Some(json!({"destination": "home"}))).await;
        let (wrong_type, _) = app
            .send("POST", "/transactions/", Some(json!({"amount": "lots", "destination": "home"})))
            .await;
        let (blank, _) = app
            .send("POST", "/transactions/", Some(json!({"amount": 1, "destination": ""})))
            .await;

        assert_eq!(missing_destination, StatusCode::BAD_REQUEST);
        assert_eq!(missing_amount, StatusCode::BAD_REQUEST);
        assert_eq!(wrong_type, StatusCode::BAD_REQUEST);
        assert_eq!(blank, StatusCode::BAD_REQUEST);

        let (_, list) = app.send("GET", "/transactions/", None).await;
        assert!(list.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_transactions_filter() {
        let app = TestApp::new();
        app.seed_rule(10, "satoshi", &[]);

        for amount in [5, 50, 10] {
            app.send("POST", "/transactions/", Some(json!({"amount": amount, "destination": "x"})))
                .await;
        }

        let count = |value: &Value| value.as_array().unwrap().len();

        let (_, all) = app.send("GET", "/transactions/", None).await;
        let (_, explicit_all) = app.send("GET", "/transactions/?filter=all", None).await;
        let (_, outgoing) = app.send("GET", "/transactions/?filter=outgoing", None).await;
        let (_, rejected) = app.send("GET", "/transactions/?filter=rejected", None).await;
        let (status, unknown) = app.send("GET", "/transactions/?filter=pending", None).await;

        assert_eq!(count(&all), 3);
        assert_eq!(count(&explicit_all), 3);
        assert_eq!(count(&outgoing), 2);
        assert_eq!(count(&rejected), 1);
        assert_eq!(rejected[0]["amount"], 50);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(count(&unknown), 0);

        let (status, last_wins) = app
            .send("GET", "/transactions/?filter=all&filter=rejected", None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(count(&last_wins), 1);
        assert_eq!(last_wins[0]["amount"], 50);
    }

    #[tokio::test]
    async fn test_malformed_rule_id_is_json_bad_request() {
        let app = TestApp::new();

        for method in ["GET", "DELETE"] {
            let (status, body) = app.send(method, "/policy_rule/abc/", None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body["error"].as_str().unwrap().contains("abc"));
        }

        let (status, body) = app
            .send("PATCH", "/policy_rule/abc/", Some(json!({"amount": 1})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_patch_null_destinations_rejected() {
        let app = TestApp::new();
        let rule = app.seed_rule(100, "USD", &["home"]);
        let uri = format!("/policy_rule/{}/", rule.id);

        let (status, body) = app.send("PATCH", &uri, Some(json!({"destinations": null}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
        assert_eq!(app.destination_count(), 1);
    }

    #[tokio::test]
    async fn test_health() {
        let app = TestApp::new();
        let (status, body) = app.send("GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok"}));
    }
}

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use core::models::{CheckpointType, CronRun};
use core::orchestrator::{IngestSummary, PipelineOutcome, Trigger};
use core::scheduling::{
    self, CandidateSet, Decision as ManagerDecision, ManagerDecisionInput, Outcome,
    RescheduleHistoryEntry,
};
use core::weather::classifier::{self, ClassificationResult};
use serde::Deserialize;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/weather/poll", post(weather_poll))
        .route("/api/flights/classify", post(classify_flights))
        .route("/api/flights/auto-reschedule", post(auto_reschedule))
        .route(
            "/api/flights/:flight_id/candidates",
            get(generate_candidate_slots),
        )
        .route(
            "/api/flights/:flight_id/recommendations",
            get(generate_reschedule_recommendations),
        )
        .route("/api/reschedule-decisions", post(record_manager_decision))
        .route(
            "/api/flights/:flight_id/reschedule-history",
            get(flight_reschedule_history),
        )
        .route(
            "/api/flights/:flight_id/weather-snapshots",
            get(weather_snapshots),
        )
        .route("/api/cron-runs", get(cron_runs))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightScope {
    pub flight_ids: Option<Vec<String>>,
}

/// Ingest forecasts for every checkpoint of the given flights, or the
/// default scope (scheduled, departing within the search window) when none
/// are named (spec §6 "weatherPoll").
async fn weather_poll(
    State(state): State<AppState>,
    Json(body): Json<FlightScope>,
) -> ApiResult<Json<Vec<IngestSummary>>> {
    let now = Utc::now();
    let correlation_id = format!("rpc-poll-{}", now.timestamp_millis());
    let flights = classifier::load_target_flights(
        &state.pool,
        body.flight_ids.as_deref(),
        now,
        &state.config,
    )
    .await;

    let mut summaries = Vec::with_capacity(flights.len());
    for flight in &flights {
        summaries.push(core::orchestrator::ingest_flight(&state.gateway, &state.store, flight, &correlation_id).await);
    }

    Ok(Json(summaries))
}

/// Re-evaluate weather classification for the given flights, or the default
/// scope (spec §6 "classifyFlights").
async fn classify_flights(
    State(state): State<AppState>,
    Json(body): Json<FlightScope>,
) -> ApiResult<Json<Vec<ClassificationResult>>> {
    let results = classifier::classify(
        &state.pool,
        &state.store,
        &state.config,
        body.flight_ids.as_deref(),
        Utc::now(),
    )
    .await;
    Ok(Json(results))
}

/// Run the full ingest -> classify -> candidate -> rank -> decide pipeline
/// for the given flights, or the default scope (spec §6 "autoReschedule").
async fn auto_reschedule(
    State(state): State<AppState>,
    Json(body): Json<FlightScope>,
) -> ApiResult<Json<PipelineOutcome>> {
    let outcome = state
        .orchestrator
        .run(Trigger::Rpc, body.flight_ids.as_deref())
        .await;
    Ok(Json(outcome))
}

/// Generate reschedule candidate slots for one flight, without ranking them
/// (spec §6 "generateCandidateSlots").
async fn generate_candidate_slots(
    State(state): State<AppState>,
    Path(flight_id): Path<String>,
) -> ApiResult<Json<CandidateSet>> {
    let candidate_set = scheduling::generate(&state.pool, &state.config, &flight_id, Utc::now()).await;
    if let Some(reason) = &candidate_set.error_reason {
        return Err(ApiError::not_found(reason.clone()));
    }
    Ok(Json(candidate_set))
}

/// Generate and rank reschedule recommendations for one flight (spec §6
/// "generateRescheduleRecommendations").
async fn generate_reschedule_recommendations(
    State(state): State<AppState>,
    Path(flight_id): Path<String>,
) -> ApiResult<Json<scheduling::RankingResult>> {
    let flight = sqlx::query_as::<_, core::models::Flight>("SELECT * FROM flights WHERE id = ?")
        .bind(&flight_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("flight {flight_id}")))?;

    let candidate_set = scheduling::generate(&state.pool, &state.config, &flight_id, Utc::now()).await;
    let ranking = scheduling::rank(&state.ranker, &flight, &candidate_set).await;
    Ok(Json(ranking))
}

/// Apply a manager's accept/reject decision on a flagged flight (spec §6
/// "recordManagerDecision").
async fn record_manager_decision(
    State(state): State<AppState>,
    Json(body): Json<ManagerDecisionInput>,
) -> ApiResult<Json<Outcome>> {
    if !matches!(body.decision, ManagerDecision::Accept | ManagerDecision::Reject) {
        return Err(ApiError::bad_request("decision must be ACCEPT or REJECT"));
    }
    let outcome = scheduling::record_manager_decision(&state.pool, body, Utc::now()).await?;
    Ok(Json(outcome))
}

/// Full audit history of reschedule actions for one flight (spec §6
/// "getFlightRescheduleHistory").
async fn flight_reschedule_history(
    State(state): State<AppState>,
    Path(flight_id): Path<String>,
) -> ApiResult<Json<Vec<RescheduleHistoryEntry>>> {
    let history = scheduling::history(&state.pool, &flight_id).await?;
    Ok(Json(history))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherSnapshotQuery {
    pub checkpoint_type: Option<CheckpointType>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

const WEATHER_SNAPSHOT_QUERY_CAP: i64 = 500;

/// Past weather snapshots for one flight, newest first (spec §6
/// "getWeatherSnapshots"). Not the append path: snapshots only ever enter
/// through ingestion.
async fn weather_snapshots(
    State(state): State<AppState>,
    Path(flight_id): Path<String>,
    Query(query): Query<WeatherSnapshotQuery>,
) -> ApiResult<Json<Vec<core::models::WeatherSnapshot>>> {
    let snapshots = state
        .store
        .query(
            &flight_id,
            query.checkpoint_type,
            query.created_after,
            query.created_before,
            query.limit.unwrap_or(50),
            WEATHER_SNAPSHOT_QUERY_CAP,
        )
        .await;
    Ok(Json(snapshots))
}

#[derive(Debug, Deserialize)]
pub struct CronRunQuery {
    pub limit: Option<i64>,
}

const CRON_RUN_QUERY_CAP: i64 = 50;

/// Recent pipeline run records, newest first (spec §6 "getCronRuns").
async fn cron_runs(
    State(state): State<AppState>,
    Query(query): Query<CronRunQuery>,
) -> ApiResult<Json<Vec<CronRun>>> {
    let limit = query.limit.unwrap_or(20).clamp(1, CRON_RUN_QUERY_CAP);
    let runs = sqlx::query_as::<_, CronRun>(
        "SELECT * FROM cron_runs ORDER BY started_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(runs))
}

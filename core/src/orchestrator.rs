use crate::config::PipelineConfig;
use crate::models::{CheckpointType, CronRun, RunStatus, WeatherSnapshot, WeatherStatus};
use crate::scheduling::{self, ranker::Ranker};
use crate::weather::classifier::{self, ClassificationResult};
use crate::weather::gateway::{ForecastGateway, ForecastOutcome};
use crate::weather::store::SnapshotStore;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// What set a pipeline run in motion, tagged onto its correlation id
/// (spec §4.7, component C7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Cron,
    Rpc,
}

impl Trigger {
    fn prefix(self) -> &'static str {
        match self {
            Trigger::Cron => "cron",
            Trigger::Rpc => "rpc",
        }
    }
}

fn new_correlation_id(trigger: Trigger, now: DateTime<Utc>) -> String {
    format!(
        "{}-run-{}-{}",
        trigger.prefix(),
        now.timestamp_millis(),
        Uuid::new_v4()
    )
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineOutcome {
    pub correlation_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub snapshots_created: i64,
    pub flights_analyzed: i64,
    pub conflicts_found: i64,
    pub rescheduled: i64,
    pub pending_review: i64,
    pub skipped: i64,
    pub errors: i64,
    pub error_details: Vec<String>,
}

/// Sequences forecast ingestion, classification, and auto-rescheduling for a
/// set of flights, tagging every step with one correlation id and recording
/// the run in `cron_runs` (spec §4.7, component C7).
pub struct Orchestrator {
    pool: SqlitePool,
    gateway: ForecastGateway,
    store: SnapshotStore,
    ranker: Ranker,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(
        pool: SqlitePool,
        gateway: ForecastGateway,
        store: SnapshotStore,
        ranker: Ranker,
        config: PipelineConfig,
    ) -> Self {
        Self {
            pool,
            gateway,
            store,
            ranker,
            config,
        }
    }

    pub async fn run(&self, trigger: Trigger, flight_ids: Option<&[String]>) -> PipelineOutcome {
        let started_at = Utc::now();
        let correlation_id = new_correlation_id(trigger, started_at);
        tracing::info!(correlation_id = %correlation_id, "pipeline run starting");

        let mut errors: i64 = 0;
        let mut error_details: Vec<String> = Vec::new();

        let flights = classifier::load_target_flights(&self.pool, flight_ids, started_at, &self.config).await;

        let ingest_summaries = self
            .ingest_all(&flights, &correlation_id)
            .await;
        let snapshots_created: i64 = ingest_summaries.iter().map(|s| s.snapshots_created).sum();
        for summary in &ingest_summaries {
            if summary.any_checkpoint_unavailable {
                errors += 1;
                error_details.push(format!(
                    "weather: flight {}: one or more checkpoints unavailable",
                    summary.flight_id
                ));
            }
        }

        let classifications = classifier::classify(
            &self.pool,
            &self.store,
            &self.config,
            flight_ids,
            started_at,
        )
        .await;

        let flights_analyzed = classifications.len() as i64;
        let conflicts_found = classifications
            .iter()
            .filter(|c| matches!(c.status, WeatherStatus::Advisory | WeatherStatus::AutoReschedule))
            .count() as i64;
        let skipped_unknown = classifications
            .iter()
            .filter(|c| matches!(c.status, WeatherStatus::Unknown))
            .count() as i64;

        for advisory in classifications
            .iter()
            .filter(|c| matches!(c.status, WeatherStatus::Advisory))
        {
            self.notify_advisory(advisory, started_at).await;
        }

        let auto_reschedule_targets: Vec<ClassificationResult> = classifications
            .into_iter()
            .filter(|c| matches!(c.status, WeatherStatus::AutoReschedule))
            .collect();

        let stage_c = self.reschedule_all(&auto_reschedule_targets).await;

        let mut rescheduled = 0i64;
        let mut pending_review = 0i64;
        let mut skipped = skipped_unknown;

        for outcome in stage_c {
            match outcome {
                Ok(RescheduleOutcome::Rescheduled) => rescheduled += 1,
                Ok(RescheduleOutcome::PendingReview) => pending_review += 1,
                Ok(RescheduleOutcome::NoCandidates) => skipped += 1,
                Err(message) => {
                    errors += 1;
                    error_details.push(format!("reschedule: {message}"));
                }
            }
        }

        let ended_at = Utc::now();
        let duration_ms = (ended_at - started_at).num_milliseconds();
        let status = classify_run_status(errors, snapshots_created, rescheduled, pending_review);

        let outcome = PipelineOutcome {
            correlation_id,
            status,
            started_at,
            ended_at,
            duration_ms,
            snapshots_created,
            flights_analyzed,
            conflicts_found,
            rescheduled,
            pending_review,
            skipped,
            errors,
            error_details,
        };

        self.persist_run(&outcome).await;

        if outcome.status != RunStatus::Success {
            self.notify_run_failure(&outcome).await;
        }

        tracing::info!(
            correlation_id = %outcome.correlation_id,
            status = outcome.status.as_str(),
            flights_analyzed = outcome.flights_analyzed,
            rescheduled = outcome.rescheduled,
            errors = outcome.errors,
            "pipeline run finished"
        );

        outcome
    }

    async fn ingest_all(
        &self,
        flights: &[crate::models::Flight],
        correlation_id: &str,
    ) -> Vec<IngestSummary> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_flights.max(1)));
        let mut handles = Vec::with_capacity(flights.len());

        for flight in flights {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
            let gateway = self.gateway.clone();
            let store = self.store.clone();
            let flight = flight.clone();
            let correlation_id = correlation_id.to_string();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                ingest_flight(&gateway, &store, &flight, &correlation_id).await
            }));
        }

        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(summary) => summaries.push(summary),
                Err(join_err) => {
                    tracing::error!(error = %join_err, "forecast ingestion task panicked");
                }
            }
        }
        summaries
    }

    async fn reschedule_all(
        &self,
        targets: &[ClassificationResult],
    ) -> Vec<Result<RescheduleOutcome, String>> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_flights.max(1)));
        let mut handles = Vec::with_capacity(targets.len());

        for target in targets {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
            let pool = self.pool.clone();
            let ranker = self.ranker.clone();
            let config = self.config.clone();
            let flight_id = target.flight_id.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                reschedule_one(&pool, &ranker, &flight_id, None, &config).await
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(join_err) => outcomes.push(Err(format!("reschedule task panicked: {join_err}"))),
            }
        }
        outcomes
    }

    async fn notify_advisory(&self, result: &ClassificationResult, now: DateTime<Utc>) {
        let id = Uuid::new_v4().to_string();
        let _ = sqlx::query(
            "INSERT INTO notifications (id, flight_id, notification_type, severity, message, read, created_at)
             VALUES (?, ?, 'advisory', 'warning', ?, 0, ?)",
        )
        .bind(id)
        .bind(&result.flight_id)
        .bind(format!(
            "Flight {} has a weather advisory outside the reschedule horizon: {}",
            result.flight_id, result.reason
        ))
        .bind(now)
        .execute(&self.pool)
        .await;
    }

    async fn persist_run(&self, outcome: &PipelineOutcome) {
        let run = CronRun {
            id: Uuid::new_v4().to_string(),
            correlation_id: outcome.correlation_id.clone(),
            status: outcome.status,
            started_at: outcome.started_at,
            ended_at: outcome.ended_at,
            duration_ms: outcome.duration_ms,
            snapshots_created: outcome.snapshots_created,
            flights_analyzed: outcome.flights_analyzed,
            conflicts_found: outcome.conflicts_found,
            rescheduled: outcome.rescheduled,
            pending_review: outcome.pending_review,
            skipped: outcome.skipped,
            errors: outcome.errors,
            error_details: outcome.error_details.clone(),
        };

        let result = sqlx::query(
            "INSERT INTO cron_runs
                (id, correlation_id, status, started_at, ended_at, duration_ms,
                 snapshots_created, flights_analyzed, conflicts_found, rescheduled,
                 pending_review, skipped, errors, error_details)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.id)
        .bind(&run.correlation_id)
        .bind(run.status.as_str())
        .bind(run.started_at)
        .bind(run.ended_at)
        .bind(run.duration_ms)
        .bind(run.snapshots_created)
        .bind(run.flights_analyzed)
        .bind(run.conflicts_found)
        .bind(run.rescheduled)
        .bind(run.pending_review)
        .bind(run.skipped)
        .bind(run.errors)
        .bind(serde_json::to_string(&run.error_details).unwrap_or_default())
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            tracing::error!(error = %err, "failed to persist cron run record");
        }
    }

    /// Surface a non-success run as a notification, typed by which stages
    /// recorded an error (spec §4.7 step 7).
    async fn notify_run_failure(&self, outcome: &PipelineOutcome) {
        let failure_types = classify_failure_types(&outcome.error_details);
        let message = if failure_types.len() > 1 {
            format!(
                "Pipeline run {} hit a pipeline failure ({} errors)",
                outcome.correlation_id, outcome.errors
            )
        } else {
            format!(
                "Pipeline run {} hit a {} failure ({} errors)",
                outcome.correlation_id, failure_types[0], outcome.errors
            )
        };

        let id = Uuid::new_v4().to_string();
        let _ = sqlx::query(
            "INSERT INTO notifications (id, flight_id, notification_type, severity, message, read, created_at)
             VALUES (?, NULL, 'pipeline_failure', 'error', ?, 0, ?)",
        )
        .bind(id)
        .bind(message)
        .bind(outcome.ended_at)
        .execute(&self.pool)
        .await;
    }
}

/// Which stage types contributed an error to this run, derived from the
/// `"<stage>: ..."` prefix each stage tags its error details with. Falls
/// back to `"generic"` for untagged errors.
fn classify_failure_types(error_details: &[String]) -> Vec<&'static str> {
    let mut types = Vec::new();
    let has_prefix = |prefix: &str| error_details.iter().any(|d| d.starts_with(prefix));

    if has_prefix("weather: ") {
        types.push("weather");
    }
    if has_prefix("classification: ") {
        types.push("classification");
    }
    if has_prefix("reschedule: ") {
        types.push("reschedule");
    }
    if types.is_empty() {
        types.push("generic");
    }
    types
}

/// Per-flight summary of a forecast ingestion pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestSummary {
    pub flight_id: String,
    pub snapshots_created: i64,
    pub any_checkpoint_unavailable: bool,
}

/// Fetch and persist forecasts for every checkpoint of one flight (spec §4.1,
/// component C1). Exposed standalone so callers that need a single flight
/// (rather than the full pipeline run) don't have to go through [`Orchestrator::run`].
pub async fn ingest_flight(
    gateway: &ForecastGateway,
    store: &SnapshotStore,
    flight: &crate::models::Flight,
    correlation_id: &str,
) -> IngestSummary {
    let mut snapshots_created = 0i64;
    let mut any_checkpoint_unavailable = false;

    for checkpoint in CheckpointType::all() {
        match gateway.fetch_checkpoint(flight, checkpoint, store).await {
            ForecastOutcome::Fresh(forecast) => {
                let snapshot = WeatherSnapshot {
                    id: Uuid::new_v4().to_string(),
                    flight_id: flight.id.clone(),
                    checkpoint_type: checkpoint,
                    location_code: forecast.location_code,
                    forecast_instant: forecast.forecast_instant,
                    wind_speed_kt: forecast.wind_speed_kt,
                    visibility_sm: forecast.visibility_sm,
                    ceiling_ft: forecast.ceiling_ft,
                    conditions: forecast.conditions,
                    confidence_horizon_hours: forecast.confidence_horizon_hours,
                    correlation_id: correlation_id.to_string(),
                    created_at: Utc::now(),
                    revalidation_token: forecast.revalidation_token,
                };
                if store.append(&snapshot).await.is_ok() {
                    snapshots_created += 1;
                }
            }
            ForecastOutcome::Reused(_) => {}
            ForecastOutcome::Unavailable => any_checkpoint_unavailable = true,
        }
    }

    IngestSummary {
        flight_id: flight.id.clone(),
        snapshots_created,
        any_checkpoint_unavailable,
    }
}

/// Outcome of attempting to reschedule one flight flagged for auto-reschedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RescheduleOutcome {
    Rescheduled,
    PendingReview,
    NoCandidates,
}

/// Generate, rank, and apply (or queue for review) a reschedule for one
/// flight (spec §4.4-§4.6, components C4-C6). Exposed standalone for callers
/// operating on a single flight outside a full pipeline run.
pub async fn reschedule_one(
    pool: &SqlitePool,
    ranker: &Ranker,
    flight_id: &str,
    weather_snapshot_id: Option<&str>,
    config: &PipelineConfig,
) -> Result<RescheduleOutcome, String> {
    let flight = sqlx::query_as::<_, crate::models::Flight>("SELECT * FROM flights WHERE id = ?")
        .bind(flight_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| format!("flight {flight_id}: {e}"))?
        .ok_or_else(|| format!("flight {flight_id}: not found for rescheduling"))?;

    let candidate_set = scheduling::generate(pool, config, flight_id, Utc::now()).await;
    if let Some(reason) = &candidate_set.error_reason {
        return Err(format!("flight {flight_id}: {reason}"));
    }
    if candidate_set.candidates.is_empty() {
        return Ok(RescheduleOutcome::NoCandidates);
    }

    let ranking = scheduling::rank(ranker, &flight, &candidate_set).await;
    let Some(top_confidence) = ranking.recommendations.first().map(|r| r.confidence) else {
        return Ok(RescheduleOutcome::NoCandidates);
    };

    if top_confidence >= config.auto_accept_confidence_threshold {
        scheduling::record_auto_reschedule_decision(
            pool,
            &flight,
            &ranking.recommendations,
            weather_snapshot_id,
            config,
            Utc::now(),
        )
        .await
        .map(|_| RescheduleOutcome::Rescheduled)
        .map_err(|e| format!("flight {flight_id}: {e}"))
    } else {
        Ok(RescheduleOutcome::PendingReview)
    }
}

fn classify_run_status(
    errors: i64,
    snapshots_created: i64,
    rescheduled: i64,
    pending_review: i64,
) -> RunStatus {
    if errors == 0 {
        RunStatus::Success
    } else if snapshots_created > 0 || rescheduled > 0 || pending_review > 0 {
        RunStatus::Partial
    } else {
        RunStatus::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_id_carries_trigger_prefix() {
        let now = Utc::now();
        let cron_id = new_correlation_id(Trigger::Cron, now);
        let rpc_id = new_correlation_id(Trigger::Rpc, now);
        assert!(cron_id.starts_with("cron-run-"));
        assert!(rpc_id.starts_with("rpc-run-"));
    }

    #[test]
    fn run_status_escalates_with_errors() {
        assert_eq!(classify_run_status(0, 5, 1, 0), RunStatus::Success);
        assert_eq!(classify_run_status(2, 5, 1, 0), RunStatus::Partial);
        assert_eq!(classify_run_status(2, 0, 0, 0), RunStatus::Error);
    }

    #[test]
    fn failure_type_classification_names_the_failing_stage() {
        assert_eq!(
            classify_failure_types(&["weather: flight f1: unavailable".to_string()]),
            vec!["weather"]
        );
        assert_eq!(
            classify_failure_types(&["reschedule: flight f1: boom".to_string()]),
            vec!["reschedule"]
        );
        assert_eq!(
            classify_failure_types(&["something unprefixed".to_string()]),
            vec!["generic"]
        );
        assert_eq!(
            classify_failure_types(&[
                "weather: flight f1: unavailable".to_string(),
                "reschedule: flight f2: boom".to_string(),
            ]),
            vec!["weather", "reschedule"]
        );
    }
}

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    ActionStatus, ActionType, DecisionSource, Flight, RescheduleAction, WeatherSnapshot,
};
use crate::scheduling::ranker::RankedRecommendation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Accept,
    Reject,
}

/// One ranked candidate as carried in the audit rationale blob, and as the
/// shape a manager's accept/reject request echoes back to us (spec §4.5
/// step 5, §4.6 step 4).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopRecommendation {
    pub rank: i32,
    pub candidate_index: usize,
    pub instructor_id: String,
    pub aircraft_id: String,
    pub departure_time: DateTime<Utc>,
    pub confidence: i32,
    pub rationale: String,
}

/// Stable top-level shape of the serialized `ai_rationale` document (spec
/// §9). Unknown keys are tolerated on read; this struct only names the
/// fields we write and rely on.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct RationaleBlob {
    top_recommendations: Vec<TopRecommendation>,
    selected_index: Option<usize>,
    decision: String,
    notes: Option<String>,
}

fn build_rationale(
    top_recommendations: &[TopRecommendation],
    selected_index: Option<usize>,
    decision: &str,
    notes: Option<&str>,
) -> String {
    let blob = RationaleBlob {
        top_recommendations: top_recommendations.to_vec(),
        selected_index,
        decision: decision.to_string(),
        notes: notes.map(|s| s.to_string()),
    };
    serde_json::to_string(&blob).unwrap_or_default()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerDecisionInput {
    pub flight_id: String,
    pub recommended_slot_index: Option<usize>,
    pub decision: Decision,
    pub manager_name: String,
    pub notes: Option<String>,
    #[serde(default)]
    pub top_recommendations: Vec<TopRecommendation>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Accepted {
        new_flight_id: String,
        action_id: String,
    },
    Rejected {
        action_id: String,
    },
}

/// Apply a manager's decision on a flagged flight (spec §4.6, component C6).
pub async fn record_manager_decision(
    pool: &SqlitePool,
    input: ManagerDecisionInput,
    now: DateTime<Utc>,
) -> PipelineResult<Outcome> {
    if input.flight_id.trim().is_empty() {
        return Err(PipelineError::PreconditionViolated(
            "flightId must be non-empty".to_string(),
        ));
    }
    if input.manager_name.trim().is_empty() {
        return Err(PipelineError::PreconditionViolated(
            "managerName must be non-empty".to_string(),
        ));
    }

    let original = sqlx::query_as::<_, Flight>("SELECT * FROM flights WHERE id = ?")
        .bind(&input.flight_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| {
            PipelineError::MissingReference(format!("flight {} not found", input.flight_id))
        })?;

    let weather_snapshot_id = latest_weather_snapshot_id(pool, &original.id).await;

    match input.decision {
        Decision::Reject => {
            let action_id = Uuid::new_v4().to_string();
            let notes = input
                .notes
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "No reason provided".to_string());
            let rationale = build_rationale(&input.top_recommendations, None, "reject", Some(&notes));
            insert_action(
                pool,
                &action_id,
                &original.id,
                None,
                ActionType::ManualReject,
                DecisionSource::Manager,
                &input.manager_name,
                now,
                &rationale,
                weather_snapshot_id.as_deref(),
                Some(&notes),
                ActionStatus::Rejected,
            )
            .await?;
            Ok(Outcome::Rejected { action_id })
        }
        Decision::Accept => {
            if input.top_recommendations.is_empty() {
                return Err(PipelineError::PreconditionViolated(
                    "accept requires a non-empty topRecommendations".to_string(),
                ));
            }
            let selected_index = input.recommended_slot_index.ok_or_else(|| {
                PipelineError::PreconditionViolated(
                    "accept requires recommendedSlotIndex".to_string(),
                )
            })?;
            let selected = input
                .top_recommendations
                .get(selected_index)
                .ok_or_else(|| {
                    PipelineError::PreconditionViolated(format!(
                        "recommendedSlotIndex {selected_index} does not resolve to a recommendation"
                    ))
                })?;

            let duration = original.arrival_time - original.departure_time;
            let slot = ChosenSlot {
                instructor_id: selected.instructor_id.clone(),
                aircraft_id: selected.aircraft_id.clone(),
                departure_time: selected.departure_time,
                arrival_time: selected.departure_time + duration,
            };

            let rationale = build_rationale(
                &input.top_recommendations,
                Some(selected_index),
                "accept",
                input.notes.as_deref(),
            );

            let (new_flight_id, action_id) = accept_into_new_flight(
                pool,
                &original,
                &slot,
                ActionType::ManualAccept,
                DecisionSource::Manager,
                &input.manager_name,
                now,
                &rationale,
                weather_snapshot_id.as_deref(),
                input.notes.as_deref(),
                ActionStatus::Accepted,
            )
            .await?;
            Ok(Outcome::Accepted {
                new_flight_id,
                action_id,
            })
        }
    }
}

/// Apply the auto-accept gate to a flight's ranked recommendations. Fails its
/// precondition if the top recommendation's confidence is below the
/// configured threshold; callers route sub-threshold recommendations to a
/// plain pending-review count instead (spec §4.7 Stage C).
pub async fn record_auto_reschedule_decision(
    pool: &SqlitePool,
    flight: &Flight,
    recommendations: &[RankedRecommendation],
    weather_snapshot_id: Option<&str>,
    config: &PipelineConfig,
    now: DateTime<Utc>,
) -> PipelineResult<Outcome> {
    let top = recommendations.first().ok_or_else(|| {
        PipelineError::PreconditionViolated("no recommendations to auto-accept".to_string())
    })?;

    if top.confidence < config.auto_accept_confidence_threshold {
        return Err(PipelineError::PreconditionViolated(format!(
            "confidence {} below auto-accept threshold {}",
            top.confidence, config.auto_accept_confidence_threshold
        )));
    }

    let slot = ChosenSlot {
        instructor_id: top.instructor_id.clone(),
        aircraft_id: top.aircraft_id.clone(),
        departure_time: top.departure_time,
        arrival_time: top.arrival_time,
    };

    let top_recommendations: Vec<TopRecommendation> = recommendations
        .iter()
        .enumerate()
        .map(|(i, rec)| TopRecommendation {
            rank: i as i32 + 1,
            candidate_index: rec.slot_index,
            instructor_id: rec.instructor_id.clone(),
            aircraft_id: rec.aircraft_id.clone(),
            departure_time: rec.departure_time,
            confidence: rec.confidence,
            rationale: rec.rationale.clone(),
        })
        .collect();

    let rationale = build_rationale(&top_recommendations, Some(0), "accept", None);

    let (new_flight_id, action_id) = accept_into_new_flight(
        pool,
        flight,
        &slot,
        ActionType::AutoAccept,
        DecisionSource::System,
        "auto-reschedule",
        now,
        &rationale,
        weather_snapshot_id,
        None,
        // Auto-accepted actions start pending: the mutation lands immediately,
        // but no human has confirmed it yet.
        ActionStatus::Pending,
    )
    .await?;

    insert_notification(
        pool,
        Some(&flight.id),
        "auto_reschedule",
        "info",
        &format!(
            "Flight {} auto-rescheduled to {}",
            flight.id,
            top.departure_time.format("%Y-%m-%d %H:%M UTC")
        ),
        now,
    )
    .await;

    Ok(Outcome::Accepted {
        new_flight_id,
        action_id,
    })
}

/// One reschedule action as surfaced to audit consumers: the raw action row
/// joined with both flights' departure instants, the weather snapshot it was
/// decided against, and the selected recommendation's confidence parsed out
/// of the rationale blob (spec §4.6 "history").
#[derive(Debug, Clone, Serialize)]
pub struct RescheduleHistoryEntry {
    pub id: String,
    pub original_flight_id: String,
    pub original_departure_time: DateTime<Utc>,
    pub new_flight_id: Option<String>,
    pub new_departure_time: Option<DateTime<Utc>>,
    pub action_type: ActionType,
    pub decision_source: DecisionSource,
    pub deciding_principal: String,
    pub decision_instant: DateTime<Utc>,
    pub status: ActionStatus,
    pub notes: Option<String>,
    pub weather_snapshot: Option<WeatherSnapshot>,
    pub selected_confidence: Option<i32>,
}

/// Read-only history of reschedule actions for a flight, newest first (spec
/// §4.6 "history"). A rationale blob that fails to parse never fails the
/// whole query — it just loses its `selected_confidence`.
pub async fn history(
    pool: &SqlitePool,
    flight_id: &str,
) -> PipelineResult<Vec<RescheduleHistoryEntry>> {
    let actions = sqlx::query_as::<_, RescheduleAction>(
        "SELECT * FROM reschedule_actions
         WHERE original_flight_id = ?
         ORDER BY decision_instant DESC",
    )
    .bind(flight_id)
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::with_capacity(actions.len());
    for action in actions {
        let original_departure_time = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT departure_time FROM flights WHERE id = ?",
        )
        .bind(&action.original_flight_id)
        .fetch_optional(pool)
        .await?
        .unwrap_or(action.decision_instant);

        let new_departure_time = match &action.new_flight_id {
            Some(id) => {
                sqlx::query_scalar::<_, DateTime<Utc>>("SELECT departure_time FROM flights WHERE id = ?")
                    .bind(id)
                    .fetch_optional(pool)
                    .await?
            }
            None => None,
        };

        let weather_snapshot = match &action.weather_snapshot_id {
            Some(id) => {
                sqlx::query_as::<_, WeatherSnapshot>("SELECT * FROM weather_snapshots WHERE id = ?")
                    .bind(id)
                    .fetch_optional(pool)
                    .await?
            }
            None => None,
        };

        let selected_confidence = parse_selected_confidence(&action.ai_rationale);

        entries.push(RescheduleHistoryEntry {
            id: action.id,
            original_flight_id: action.original_flight_id,
            original_departure_time,
            new_flight_id: action.new_flight_id,
            new_departure_time,
            action_type: action.action_type,
            decision_source: action.decision_source,
            deciding_principal: action.deciding_principal,
            decision_instant: action.decision_instant,
            status: action.status,
            notes: action.notes,
            weather_snapshot,
            selected_confidence,
        });
    }

    Ok(entries)
}

fn parse_selected_confidence(ai_rationale: &str) -> Option<i32> {
    match serde_json::from_str::<RationaleBlob>(ai_rationale) {
        Ok(blob) => blob
            .selected_index
            .and_then(|i| blob.top_recommendations.get(i))
            .map(|r| r.confidence),
        Err(err) => {
            tracing::warn!(error = %err, "failed to parse reschedule rationale blob");
            None
        }
    }
}

async fn latest_weather_snapshot_id(pool: &SqlitePool, flight_id: &str) -> Option<String> {
    sqlx::query_scalar::<_, String>(
        "SELECT id FROM weather_snapshots WHERE flight_id = ? ORDER BY created_at DESC LIMIT 1",
    )
    .bind(flight_id)
    .fetch_optional(pool)
    .await
    .ok()
    .flatten()
}

struct ChosenSlot {
    instructor_id: String,
    aircraft_id: String,
    departure_time: DateTime<Utc>,
    arrival_time: DateTime<Utc>,
}

#[allow(clippy::too_many_arguments)]
async fn accept_into_new_flight(
    pool: &SqlitePool,
    original: &Flight,
    slot: &ChosenSlot,
    action_type: ActionType,
    decision_source: DecisionSource,
    deciding_principal: &str,
    now: DateTime<Utc>,
    ai_rationale: &str,
    weather_snapshot_id: Option<&str>,
    notes: Option<&str>,
    status: ActionStatus,
) -> PipelineResult<(String, String)> {
    let new_flight_id = Uuid::new_v4().to_string();

    sqlx::query(
        "INSERT INTO flights
            (id, student_id, instructor_id, aircraft_id, departure_time, arrival_time,
             origin, destination, status, weather_status)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'SCHEDULED', 'UNKNOWN')",
    )
    .bind(&new_flight_id)
    .bind(&original.student_id)
    .bind(&slot.instructor_id)
    .bind(&slot.aircraft_id)
    .bind(slot.departure_time)
    .bind(slot.arrival_time)
    .bind(&original.origin)
    .bind(&original.destination)
    .execute(pool)
    .await?;

    sqlx::query("UPDATE flights SET status = 'RESCHEDULED' WHERE id = ?")
        .bind(&original.id)
        .execute(pool)
        .await?;

    let action_id = Uuid::new_v4().to_string();
    insert_action(
        pool,
        &action_id,
        &original.id,
        Some(&new_flight_id),
        action_type,
        decision_source,
        deciding_principal,
        now,
        ai_rationale,
        weather_snapshot_id,
        notes,
        status,
    )
    .await?;

    Ok((new_flight_id, action_id))
}

#[allow(clippy::too_many_arguments)]
async fn insert_action(
    pool: &SqlitePool,
    id: &str,
    original_flight_id: &str,
    new_flight_id: Option<&str>,
    action_type: ActionType,
    decision_source: DecisionSource,
    deciding_principal: &str,
    decision_instant: DateTime<Utc>,
    ai_rationale: &str,
    weather_snapshot_id: Option<&str>,
    notes: Option<&str>,
    status: ActionStatus,
) -> PipelineResult<()> {
    sqlx::query(
        "INSERT INTO reschedule_actions
            (id, original_flight_id, new_flight_id, action_type, decision_source,
             deciding_principal, decision_instant, ai_rationale, weather_snapshot_id,
             notes, status)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(original_flight_id)
    .bind(new_flight_id)
    .bind(action_type.as_str())
    .bind(decision_source.as_str())
    .bind(deciding_principal)
    .bind(decision_instant)
    .bind(ai_rationale)
    .bind(weather_snapshot_id)
    .bind(notes)
    .bind(status.as_str())
    .execute(pool)
    .await?;

    Ok(())
}

async fn insert_notification(
    pool: &SqlitePool,
    flight_id: Option<&str>,
    notification_type: &str,
    severity: &str,
    message: &str,
    created_at: DateTime<Utc>,
) {
    let id = Uuid::new_v4().to_string();
    let _ = sqlx::query(
        "INSERT INTO notifications (id, flight_id, notification_type, severity, message, read, created_at)
         VALUES (?, ?, ?, ?, ?, 0, ?)",
    )
    .bind(id)
    .bind(flight_id)
    .bind(notification_type)
    .bind(severity)
    .bind(message)
    .bind(created_at)
    .execute(pool)
    .await;
}

use crate::config::PipelineConfig;
use crate::models::{CheckpointType, Flight, Student, TrainingThreshold, WeatherStatus};
use crate::weather::store::SnapshotStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

/// Per-checkpoint breach detail, echoed back for UI display (spec §4.3 step 7).
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointBreach {
    pub checkpoint_type: CheckpointType,
    pub conditions: String,
    pub wind_speed_kt: f64,
    pub visibility_sm: f64,
    pub ceiling_ft: Option<f64>,
    pub wind_breach: bool,
    pub visibility_breach: bool,
    pub ceiling_breach: bool,
    pub max_wind_speed_kt: f64,
    pub min_visibility_sm: f64,
    pub min_ceiling_ft: Option<f64>,
}

impl CheckpointBreach {
    pub fn fails(&self) -> bool {
        self.wind_breach || self.visibility_breach || self.ceiling_breach
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassificationResult {
    pub flight_id: String,
    pub status: WeatherStatus,
    pub reason: String,
    pub breaches: Vec<CheckpointBreach>,
    pub hours_until_departure: f64,
}

/// Evaluate every required flight against its training-level thresholds
/// (spec §4.3, component C3). Writes `weather_status` back to each flight
/// row. With `flight_ids = None`, evaluates every flight with
/// `status = scheduled` departing within the next 7 days.
pub async fn classify(
    pool: &SqlitePool,
    store: &SnapshotStore,
    config: &PipelineConfig,
    flight_ids: Option<&[String]>,
    now: DateTime<Utc>,
) -> Vec<ClassificationResult> {
    let flights = load_target_flights(pool, flight_ids, now, config).await;
    let mut results = Vec::with_capacity(flights.len());

    for flight in flights {
        let hours_until_departure =
            (flight.departure_time - now).num_seconds() as f64 / 3600.0;

        let result = classify_one(pool, store, config, &flight, now, hours_until_departure).await;

        let _ = sqlx::query("UPDATE flights SET weather_status = ? WHERE id = ?")
            .bind(result.status.as_str())
            .bind(&flight.id)
            .execute(pool)
            .await;

        results.push(result);
    }

    results
}

/// Resolve a pipeline's flight scope: the given ids if non-empty, otherwise
/// every scheduled flight departing within the configured search window.
pub async fn load_target_flights(
    pool: &SqlitePool,
    flight_ids: Option<&[String]>,
    now: DateTime<Utc>,
    config: &PipelineConfig,
) -> Vec<Flight> {
    match flight_ids {
        Some(ids) if !ids.is_empty() => {
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                if let Ok(Some(flight)) = sqlx::query_as::<_, Flight>(
                    "SELECT * FROM flights WHERE id = ?",
                )
                .bind(id)
                .fetch_optional(pool)
                .await
                {
                    out.push(flight);
                }
            }
            out
        }
        _ => {
            let horizon = now + chrono::Duration::days(config.search_window_days);
            sqlx::query_as::<_, Flight>(
                "SELECT * FROM flights
                 WHERE status = 'SCHEDULED' AND departure_time BETWEEN ?1 AND ?2
                 ORDER BY departure_time",
            )
            .bind(now)
            .bind(horizon)
            .fetch_all(pool)
            .await
            .unwrap_or_default()
        }
    }
}

async fn classify_one(
    pool: &SqlitePool,
    store: &SnapshotStore,
    config: &PipelineConfig,
    flight: &Flight,
    _now: DateTime<Utc>,
    hours_until_departure: f64,
) -> ClassificationResult {
    let student = sqlx::query_as::<_, Student>("SELECT * FROM students WHERE id = ?")
        .bind(&flight.student_id)
        .fetch_optional(pool)
        .await
        .ok()
        .flatten();

    let Some(student) = student else {
        return ClassificationResult {
            flight_id: flight.id.clone(),
            status: WeatherStatus::Unknown,
            reason: "missing-reference: student not found".to_string(),
            breaches: vec![],
            hours_until_departure,
        };
    };

    let threshold = sqlx::query_as::<_, TrainingThreshold>(
        "SELECT * FROM training_thresholds WHERE training_level = ?",
    )
    .bind(student.training_level.as_str())
    .fetch_optional(pool)
    .await
    .ok()
    .flatten();

    let Some(threshold) = threshold else {
        return ClassificationResult {
            flight_id: flight.id.clone(),
            status: WeatherStatus::Unknown,
            reason: "threshold-not-found".to_string(),
            breaches: vec![],
            hours_until_departure,
        };
    };

    let snapshots = store.latest_per_checkpoint_for_flight(&flight.id).await;
    let required = CheckpointType::all();
    let missing: Vec<&str> = required
        .iter()
        .filter(|c| !snapshots.iter().any(|s| s.checkpoint_type == **c))
        .map(|c| c.as_str())
        .collect();

    if !missing.is_empty() {
        return ClassificationResult {
            flight_id: flight.id.clone(),
            status: WeatherStatus::Unknown,
            reason: format!("missing checkpoints: {}", missing.join(", ")),
            breaches: vec![],
            hours_until_departure,
        };
    }

    let breaches: Vec<CheckpointBreach> = snapshots
        .iter()
        .map(|snapshot| {
            let wind_breach = snapshot.wind_speed_kt > threshold.max_wind_speed_kt;
            let visibility_breach = snapshot.visibility_sm < threshold.min_visibility_sm;
            let ceiling_breach = match (snapshot.ceiling_ft, threshold.min_ceiling_ft) {
                (Some(ceiling), Some(min_ceiling)) => ceiling < min_ceiling,
                _ => false,
            };

            CheckpointBreach {
                checkpoint_type: snapshot.checkpoint_type,
                conditions: snapshot.conditions.clone(),
                wind_speed_kt: snapshot.wind_speed_kt,
                visibility_sm: snapshot.visibility_sm,
                ceiling_ft: snapshot.ceiling_ft,
                wind_breach,
                visibility_breach,
                ceiling_breach,
                max_wind_speed_kt: threshold.max_wind_speed_kt,
                min_visibility_sm: threshold.min_visibility_sm,
                min_ceiling_ft: threshold.min_ceiling_ft,
            }
        })
        .collect();

    let any_fail = breaches.iter().any(CheckpointBreach::fails);
    let inside_horizon = hours_until_departure < config.reschedule_horizon_hours as f64;

    let status = if !any_fail {
        WeatherStatus::Clear
    } else if inside_horizon {
        WeatherStatus::AutoReschedule
    } else {
        WeatherStatus::Advisory
    };

    let reason = if !any_fail {
        "all checkpoints within thresholds".to_string()
    } else {
        describe_breaches(&breaches)
    };

    ClassificationResult {
        flight_id: flight.id.clone(),
        status,
        reason,
        breaches,
        hours_until_departure,
    }
}

fn describe_breaches(breaches: &[CheckpointBreach]) -> String {
    let mut parts = Vec::new();
    for breach in breaches.iter().filter(|b| b.fails()) {
        let mut channels = Vec::new();
        if breach.wind_breach {
            channels.push(format!(
                "wind {:.0}kt > max {:.0}kt",
                breach.wind_speed_kt, breach.max_wind_speed_kt
            ));
        }
        if breach.visibility_breach {
            channels.push(format!(
                "visibility {:.1}mi < min {:.1}mi",
                breach.visibility_sm, breach.min_visibility_sm
            ));
        }
        if breach.ceiling_breach {
            channels.push(format!(
                "ceiling {:.0}ft < min {:.0}ft",
                breach.ceiling_ft.unwrap_or_default(),
                breach.min_ceiling_ft.unwrap_or_default()
            ));
        }
        parts.push(format!("{}: {}", breach.checkpoint_type.as_str(), channels.join(", ")));
    }
    parts.join("; ")
}

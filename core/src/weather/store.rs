use crate::models::{CheckpointType, WeatherSnapshot};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// Append-only persistence of forecasts, plus staleness queries (spec §4.2,
/// component C2).
#[derive(Clone)]
pub struct SnapshotStore {
    pool: SqlitePool,
}

impl SnapshotStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, snapshot: &WeatherSnapshot) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO weather_snapshots
                (id, flight_id, checkpoint_type, location_code, forecast_instant,
                 wind_speed_kt, visibility_sm, ceiling_ft, conditions,
                 confidence_horizon_hours, correlation_id, created_at, revalidation_token)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&snapshot.id)
        .bind(&snapshot.flight_id)
        .bind(snapshot.checkpoint_type.as_str())
        .bind(&snapshot.location_code)
        .bind(snapshot.forecast_instant)
        .bind(snapshot.wind_speed_kt)
        .bind(snapshot.visibility_sm)
        .bind(snapshot.ceiling_ft)
        .bind(&snapshot.conditions)
        .bind(snapshot.confidence_horizon_hours)
        .bind(&snapshot.correlation_id)
        .bind(snapshot.created_at)
        .bind(&snapshot.revalidation_token)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn latest_for_flight_checkpoint(
        &self,
        flight_id: &str,
        checkpoint_type: CheckpointType,
    ) -> Option<WeatherSnapshot> {
        sqlx::query_as::<_, WeatherSnapshot>(
            "SELECT * FROM weather_snapshots
             WHERE flight_id = ? AND checkpoint_type = ?
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(flight_id)
        .bind(checkpoint_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .ok()
        .flatten()
    }

    pub async fn latest_for_location_forecast(
        &self,
        location_code: &str,
        forecast_instant: DateTime<Utc>,
    ) -> Option<WeatherSnapshot> {
        sqlx::query_as::<_, WeatherSnapshot>(
            "SELECT * FROM weather_snapshots
             WHERE location_code = ? AND forecast_instant = ?
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(location_code)
        .bind(forecast_instant)
        .fetch_optional(&self.pool)
        .await
        .ok()
        .flatten()
    }

    /// Up to three snapshots, one per checkpoint type, for the classifier (C3).
    pub async fn latest_per_checkpoint_for_flight(
        &self,
        flight_id: &str,
    ) -> Vec<WeatherSnapshot> {
        let mut out = Vec::new();
        for checkpoint in CheckpointType::all() {
            if let Some(snapshot) = self.latest_for_flight_checkpoint(flight_id, checkpoint).await {
                out.push(snapshot);
            }
        }
        out
    }

    /// History query, for views over past snapshots. `cap` bounds `limit`
    /// defensively regardless of what the caller passes.
    pub async fn query(
        &self,
        flight_id: &str,
        checkpoint_type: Option<CheckpointType>,
        created_after: Option<DateTime<Utc>>,
        created_before: Option<DateTime<Utc>>,
        limit: i64,
        cap: i64,
    ) -> Vec<WeatherSnapshot> {
        let bounded_limit = limit.clamp(1, cap);

        let checkpoint_filter = checkpoint_type.map(|c| c.as_str().to_string());

        sqlx::query_as::<_, WeatherSnapshot>(
            "SELECT * FROM weather_snapshots
             WHERE flight_id = ?1
               AND (?2 IS NULL OR checkpoint_type = ?2)
               AND (?3 IS NULL OR created_at >= ?3)
               AND (?4 IS NULL OR created_at <= ?4)
             ORDER BY created_at DESC
             LIMIT ?5",
        )
        .bind(flight_id)
        .bind(checkpoint_filter)
        .bind(created_after)
        .bind(created_before)
        .bind(bounded_limit)
        .fetch_all(&self.pool)
        .await
        .unwrap_or_default()
    }
}

/// Derived staleness of a snapshot relative to now.
pub fn staleness_hours(snapshot: &WeatherSnapshot, now: DateTime<Utc>) -> f64 {
    (now - snapshot.created_at).num_seconds() as f64 / 3600.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StalenessBucket;

    #[test]
    fn staleness_hours_is_nonnegative_for_recent_snapshot() {
        let snapshot = WeatherSnapshot {
            id: "s1".into(),
            flight_id: "f1".into(),
            checkpoint_type: CheckpointType::Departure,
            location_code: "KPAO".into(),
            forecast_instant: Utc::now(),
            wind_speed_kt: 9.0,
            visibility_sm: 10.0,
            ceiling_ft: None,
            conditions: "Clear".into(),
            confidence_horizon_hours: 24,
            correlation_id: "run-1".into(),
            created_at: Utc::now() - chrono::Duration::minutes(30),
            revalidation_token: None,
        };

        let age = staleness_hours(&snapshot, Utc::now());
        assert!(age >= 0.0 && age < 1.0);
        assert_eq!(StalenessBucket::classify(age), StalenessBucket::Fresh);
    }
}

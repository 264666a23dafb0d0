use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Training level of a student pilot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrainingLevel {
    Student,
    Private,
    Instrument,
}

impl TrainingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingLevel::Student => "STUDENT",
            TrainingLevel::Private => "PRIVATE",
            TrainingLevel::Instrument => "INSTRUMENT",
        }
    }
}

/// Lifecycle status of a flight. Mutated only by the Decision & Audit component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightStatus {
    Scheduled,
    Rescheduled,
    Completed,
    Cancelled,
}

impl FlightStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlightStatus::Scheduled => "SCHEDULED",
            FlightStatus::Rescheduled => "RESCHEDULED",
            FlightStatus::Completed => "COMPLETED",
            FlightStatus::Cancelled => "CANCELLED",
        }
    }
}

/// Weather classification conclusion, written back by the Classifier (C3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WeatherStatus {
    Unknown,
    Clear,
    Advisory,
    AutoReschedule,
}

impl WeatherStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeatherStatus::Unknown => "UNKNOWN",
            WeatherStatus::Clear => "CLEAR",
            WeatherStatus::Advisory => "ADVISORY",
            WeatherStatus::AutoReschedule => "AUTO_RESCHEDULE",
        }
    }
}

/// One of the three geographic checkpoints evaluated per flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointType {
    Departure,
    Arrival,
    Corridor,
}

impl CheckpointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointType::Departure => "DEPARTURE",
            CheckpointType::Arrival => "ARRIVAL",
            CheckpointType::Corridor => "CORRIDOR",
        }
    }

    pub fn all() -> [CheckpointType; 3] {
        [
            CheckpointType::Departure,
            CheckpointType::Arrival,
            CheckpointType::Corridor,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    AutoAccept,
    ManualAccept,
    ManualReject,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::AutoAccept => "AUTO_ACCEPT",
            ActionType::ManualAccept => "MANUAL_ACCEPT",
            ActionType::ManualReject => "MANUAL_REJECT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionSource {
    System,
    Manager,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionSource::System => "SYSTEM",
            DecisionSource::Manager => "MANAGER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Pending,
    Accepted,
    Rejected,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "PENDING",
            ActionStatus::Accepted => "ACCEPTED",
            ActionStatus::Rejected => "REJECTED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Partial,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "SUCCESS",
            RunStatus::Partial => "PARTIAL",
            RunStatus::Error => "ERROR",
        }
    }
}

/// A scheduled training flight. Created externally; mutated only by the
/// Decision & Audit component (C6); never deleted by the core.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Flight {
    pub id: String,
    pub student_id: String,
    pub instructor_id: String,
    pub aircraft_id: String,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    pub origin: String,
    pub destination: String,
    #[sqlx(try_from = "String")]
    pub status: FlightStatus,
    #[sqlx(try_from = "String")]
    pub weather_status: WeatherStatus,
}

/// Read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Student {
    pub id: String,
    #[sqlx(try_from = "String")]
    pub training_level: TrainingLevel,
}

/// Read-only to the core. Certifications are stored as a JSON-encoded list.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Instructor {
    pub id: String,
    #[sqlx(json)]
    pub certifications: Vec<String>,
}

/// Read-only to the core.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Aircraft {
    pub id: String,
    pub category: String,
    pub available: bool,
}

/// Read-only reference data, unique per training level.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TrainingThreshold {
    #[sqlx(try_from = "String")]
    pub training_level: TrainingLevel,
    pub max_wind_speed_kt: f64,
    pub min_visibility_sm: f64,
    pub min_ceiling_ft: Option<f64>,
}

/// Append-only; never mutated once written.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WeatherSnapshot {
    pub id: String,
    pub flight_id: String,
    #[sqlx(try_from = "String")]
    pub checkpoint_type: CheckpointType,
    pub location_code: String,
    pub forecast_instant: DateTime<Utc>,
    pub wind_speed_kt: f64,
    pub visibility_sm: f64,
    pub ceiling_ft: Option<f64>,
    pub conditions: String,
    pub confidence_horizon_hours: i64,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub revalidation_token: Option<String>,
}

/// Append-only audit trail of a rescheduling decision.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RescheduleAction {
    pub id: String,
    pub original_flight_id: String,
    pub new_flight_id: Option<String>,
    #[sqlx(try_from = "String")]
    pub action_type: ActionType,
    #[sqlx(try_from = "String")]
    pub decision_source: DecisionSource,
    pub deciding_principal: String,
    pub decision_instant: DateTime<Utc>,
    pub ai_rationale: String,
    pub weather_snapshot_id: Option<String>,
    pub notes: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: ActionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: String,
    pub flight_id: Option<String>,
    pub notification_type: String,
    pub severity: String,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// One hourly (or manually triggered) pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CronRun {
    pub id: String,
    pub correlation_id: String,
    #[sqlx(try_from = "String")]
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
    #[sqlx(json)]
    pub error_details: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum StalenessBucket {
    Fresh,
    Acceptable,
    Stale,
    VeryStale,
}

impl StalenessBucket {
    /// Buckets: fresh <1h, acceptable <6h, stale <24h, very-stale >=24h.
    pub fn classify(age_hours: f64) -> Self {
        if age_hours < 1.0 {
            StalenessBucket::Fresh
        } else if age_hours < 6.0 {
            StalenessBucket::Acceptable
        } else if age_hours < 24.0 {
            StalenessBucket::Stale
        } else {
            StalenessBucket::VeryStale
        }
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, StalenessBucket::Stale | StalenessBucket::VeryStale)
    }
}

use chrono::{Duration, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use weather_core::config::PipelineConfig;
use weather_core::models::{CheckpointType, WeatherStatus};
use weather_core::orchestrator::{Orchestrator, Trigger};
use weather_core::scheduling::{self, Decision, ManagerDecisionInput, Ranker, TopRecommendation};
use weather_core::weather::classifier;
use weather_core::weather::gateway::ForecastGateway;
use weather_core::weather::store::SnapshotStore;

async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to create test database");

    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    pool
}

async fn seed_flight(
    pool: &SqlitePool,
    flight_id: &str,
    departure_time: chrono::DateTime<Utc>,
    duration: Duration,
) {
    sqlx::query("INSERT OR IGNORE INTO students (id, training_level) VALUES ('s1', 'STUDENT')")
        .execute(pool)
        .await
        .unwrap();
    sqlx::query("INSERT OR IGNORE INTO instructors (id, certifications) VALUES ('i1', '[]')")
        .execute(pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT OR IGNORE INTO aircraft (id, category, available) VALUES ('a1', 'single-engine', 1)",
    )
    .execute(pool)
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO flights
            (id, student_id, instructor_id, aircraft_id, departure_time, arrival_time, origin, destination)
         VALUES (?, 's1', 'i1', 'a1', ?, ?, 'KPAO', 'KSQL')",
    )
    .bind(flight_id)
    .bind(departure_time)
    .bind(departure_time + duration)
    .execute(pool)
    .await
    .unwrap();
}

async fn insert_breaching_snapshot(pool: &SqlitePool, flight_id: &str, checkpoint: CheckpointType) {
    sqlx::query(
        "INSERT INTO weather_snapshots
            (id, flight_id, checkpoint_type, location_code, forecast_instant, wind_speed_kt,
             visibility_sm, ceiling_ft, conditions, confidence_horizon_hours, correlation_id, created_at)
         VALUES (?, ?, ?, 'KPAO', ?, 35.0, 1.0, 400.0, 'Thunderstorms', 24, 'test-run', ?)",
    )
    .bind(format!("snap-{flight_id}-{}", checkpoint.as_str()))
    .bind(flight_id)
    .bind(checkpoint.as_str())
    .bind(Utc::now())
    .bind(Utc::now())
    .execute(pool)
    .await
    .unwrap();
}

async fn insert_clear_snapshot(pool: &SqlitePool, flight_id: &str, checkpoint: CheckpointType) {
    sqlx::query(
        "INSERT INTO weather_snapshots
            (id, flight_id, checkpoint_type, location_code, forecast_instant, wind_speed_kt,
             visibility_sm, ceiling_ft, conditions, confidence_horizon_hours, correlation_id, created_at)
         VALUES (?, ?, ?, 'KPAO', ?, 9.0, 9.0, 6000.0, 'Clear', 24, 'test-run', ?)",
    )
    .bind(format!("snap-{flight_id}-{}", checkpoint.as_str()))
    .bind(flight_id)
    .bind(checkpoint.as_str())
    .bind(Utc::now())
    .bind(Utc::now())
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn classify_routes_breach_by_horizon() {
    let pool = setup_test_db().await;
    let config = PipelineConfig::default();
    let store = SnapshotStore::new(pool.clone());

    let inside_horizon = Utc::now() + Duration::hours(2);
    seed_flight(&pool, "f-inside", inside_horizon, Duration::hours(1)).await;
    for cp in CheckpointType::all() {
        insert_breaching_snapshot(&pool, "f-inside", cp).await;
    }

    let outside_horizon = Utc::now() + Duration::days(10);
    seed_flight(&pool, "f-outside", outside_horizon, Duration::hours(1)).await;
    for cp in CheckpointType::all() {
        insert_breaching_snapshot(&pool, "f-outside", cp).await;
    }

    let ids = vec!["f-inside".to_string(), "f-outside".to_string()];
    let results = classifier::classify(&pool, &store, &config, Some(&ids), Utc::now()).await;

    let inside = results.iter().find(|r| r.flight_id == "f-inside").unwrap();
    let outside = results.iter().find(|r| r.flight_id == "f-outside").unwrap();

    assert_eq!(inside.status, WeatherStatus::AutoReschedule);
    assert_eq!(outside.status, WeatherStatus::Advisory);
    assert!(!inside.breaches.is_empty());
}

#[tokio::test]
async fn classify_marks_clear_when_all_checkpoints_within_thresholds() {
    let pool = setup_test_db().await;
    let config = PipelineConfig::default();
    let store = SnapshotStore::new(pool.clone());

    let departure = Utc::now() + Duration::hours(5);
    seed_flight(&pool, "f-clear", departure, Duration::hours(1)).await;
    for cp in CheckpointType::all() {
        insert_clear_snapshot(&pool, "f-clear", cp).await;
    }

    let ids = vec!["f-clear".to_string()];
    let results = classifier::classify(&pool, &store, &config, Some(&ids), Utc::now()).await;

    assert_eq!(results[0].status, WeatherStatus::Clear);

    let flight_status: String = sqlx::query_scalar("SELECT weather_status FROM flights WHERE id = 'f-clear'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(flight_status, "CLEAR");
}

#[tokio::test]
async fn generate_and_rank_fall_back_without_a_configured_model() {
    let pool = setup_test_db().await;
    let config = PipelineConfig::default();

    let departure = Utc::now() + Duration::hours(5);
    seed_flight(&pool, "f1", departure, Duration::hours(1)).await;
    sqlx::query(
        "INSERT INTO instructors (id, certifications) VALUES ('i2', '[]'), ('i3', '[]')",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO aircraft (id, category, available) VALUES ('a2', 'single-engine', 1)",
    )
    .execute(&pool)
    .await
    .unwrap();

    let candidate_set = scheduling::generate(&pool, &config, "f1", Utc::now()).await;
    assert!(candidate_set.error_reason.is_none());
    assert!(!candidate_set.candidates.is_empty());

    let flight = sqlx::query_as::<_, weather_core::models::Flight>(
        "SELECT * FROM flights WHERE id = 'f1'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();

    let ranker = Ranker::new(None, None, &config);
    let ranking = scheduling::rank(&ranker, &flight, &candidate_set).await;

    assert_eq!(ranking.source, scheduling::RankingSource::Fallback);
    assert!(ranking.recommendations.len() <= 3);
    for pair in ranking.recommendations.windows(2) {
        assert!(pair[0].confidence >= pair[1].confidence);
    }
}

#[tokio::test]
async fn manager_accept_mutates_original_and_creates_new_flight() {
    let pool = setup_test_db().await;
    let departure = Utc::now() + Duration::hours(5);
    seed_flight(&pool, "f1", departure, Duration::hours(1)).await;

    let input = ManagerDecisionInput {
        flight_id: "f1".to_string(),
        recommended_slot_index: Some(0),
        decision: Decision::Accept,
        manager_name: "ops-manager".to_string(),
        notes: Some("moved a day later".to_string()),
        top_recommendations: vec![TopRecommendation {
            rank: 1,
            candidate_index: 0,
            instructor_id: "i1".to_string(),
            aircraft_id: "a1".to_string(),
            departure_time: departure + Duration::days(1),
            confidence: 88,
            rationale: "best fit".to_string(),
        }],
    };

    let outcome = scheduling::record_manager_decision(&pool, input, Utc::now())
        .await
        .unwrap();

    let scheduling::Outcome::Accepted { new_flight_id, .. } = outcome else {
        panic!("expected Accepted outcome");
    };

    let original_status: String =
        sqlx::query_scalar("SELECT status FROM flights WHERE id = 'f1'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(original_status, "RESCHEDULED");

    let new_status: String = sqlx::query_scalar("SELECT status FROM flights WHERE id = ?")
        .bind(&new_flight_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(new_status, "SCHEDULED");

    let history = scheduling::history(&pool, "f1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].deciding_principal, "ops-manager");
    assert_eq!(history[0].selected_confidence, Some(88));
    assert_eq!(history[0].new_flight_id.as_deref(), Some(new_flight_id.as_str()));
    assert!(history[0].new_departure_time.is_some());
}

#[tokio::test]
async fn manager_reject_records_audit_without_mutating_flight() {
    let pool = setup_test_db().await;
    let departure = Utc::now() + Duration::hours(5);
    seed_flight(&pool, "f1", departure, Duration::hours(1)).await;

    let input = ManagerDecisionInput {
        flight_id: "f1".to_string(),
        recommended_slot_index: None,
        decision: Decision::Reject,
        manager_name: "ops-manager".to_string(),
        notes: None,
        top_recommendations: vec![],
    };

    let outcome = scheduling::record_manager_decision(&pool, input, Utc::now())
        .await
        .unwrap();
    assert!(matches!(outcome, scheduling::Outcome::Rejected { .. }));

    let status: String = sqlx::query_scalar("SELECT status FROM flights WHERE id = 'f1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "SCHEDULED");

    let history = scheduling::history(&pool, "f1").await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn low_confidence_recommendation_routes_to_pending_review_not_auto_accept() {
    let pool = setup_test_db().await;
    let config = PipelineConfig::default();
    let departure = Utc::now() + Duration::hours(5);
    seed_flight(&pool, "f1", departure, Duration::hours(1)).await;

    let flight = sqlx::query_as::<_, weather_core::models::Flight>(
        "SELECT * FROM flights WHERE id = 'f1'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();

    let low_confidence_pick = weather_core::scheduling::RankedRecommendation {
        slot_index: 0,
        instructor_id: "i1".to_string(),
        aircraft_id: "a1".to_string(),
        departure_time: departure + Duration::days(3),
        arrival_time: departure + Duration::days(3) + Duration::hours(1),
        confidence: 40,
        rationale: "low confidence pick".to_string(),
    };

    let denied = scheduling::record_auto_reschedule_decision(
        &pool,
        &flight,
        std::slice::from_ref(&low_confidence_pick),
        None,
        &config,
        Utc::now(),
    )
    .await;
    assert!(denied.is_err(), "sub-threshold confidence must not auto-accept");

    let status: String = sqlx::query_scalar("SELECT status FROM flights WHERE id = 'f1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "SCHEDULED", "sub-threshold confidence must not mutate the flight");

    let action_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM reschedule_actions WHERE original_flight_id = 'f1'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(
        action_count, 0,
        "a denied auto-accept must not leave an orphaned action row"
    );
}

#[tokio::test]
async fn orchestrator_run_completes_and_persists_a_cron_run() {
    let pool = setup_test_db().await;
    let config = PipelineConfig::default();
    let departure = Utc::now() + Duration::hours(5);
    seed_flight(&pool, "f1", departure, Duration::hours(1)).await;

    let gateway = ForecastGateway::new(None, None, config.clone());
    let store = SnapshotStore::new(pool.clone());
    let ranker = Ranker::new(None, None, &config);
    let orchestrator = Orchestrator::new(pool.clone(), gateway, store, ranker, config);

    let ids = vec!["f1".to_string()];
    let outcome = orchestrator.run(Trigger::Rpc, Some(&ids)).await;

    assert!(outcome.correlation_id.starts_with("rpc-run-"));
    assert_eq!(outcome.flights_analyzed, 1);
    assert!(outcome.snapshots_created >= 1);

    let run_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cron_runs WHERE correlation_id = ?")
        .bind(&outcome.correlation_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(run_count, 1);
}

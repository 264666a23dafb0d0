use crate::config::PipelineConfig;
use crate::models::{Aircraft, Flight, Instructor, Student, TrainingLevel};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

/// One candidate reschedule slot (spec §4.4, component C4). All flags are
/// `true` by construction: a candidate only ever reaches the output list
/// once every gate has already passed.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub slot_index: usize,
    pub instructor_id: String,
    pub aircraft_id: String,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    pub confidence: i32,
    pub instructor_available: bool,
    pub aircraft_available: bool,
    pub certification_valid: bool,
    pub within_time_window: bool,
    pub minimum_spacing_met: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CandidateSet {
    pub original_flight_id: String,
    pub original_departure_time: Option<DateTime<Utc>>,
    pub candidates: Vec<Candidate>,
    pub error_reason: Option<String>,
}

/// Search instructor/aircraft availability windows for a flight, apply
/// certification and spacing constraints, and score each resulting slot.
pub async fn generate(
    pool: &SqlitePool,
    config: &PipelineConfig,
    flight_id: &str,
    now: DateTime<Utc>,
) -> CandidateSet {
    let Ok(Some(flight)) = sqlx::query_as::<_, Flight>("SELECT * FROM flights WHERE id = ?")
        .bind(flight_id)
        .fetch_optional(pool)
        .await
    else {
        return CandidateSet {
            original_flight_id: flight_id.to_string(),
            error_reason: Some("missing-reference: flight not found".to_string()),
            ..Default::default()
        };
    };

    let Ok(Some(student)) = sqlx::query_as::<_, Student>("SELECT * FROM students WHERE id = ?")
        .bind(&flight.student_id)
        .fetch_optional(pool)
        .await
    else {
        return CandidateSet {
            original_flight_id: flight_id.to_string(),
            original_departure_time: Some(flight.departure_time),
            error_reason: Some("missing-reference: student not found".to_string()),
            ..Default::default()
        };
    };

    let duration = flight.arrival_time - flight.departure_time;
    let window_start = (flight.departure_time - ChronoDuration::days(config.search_window_days))
        .max(now);
    let window_end = flight.departure_time + ChronoDuration::days(config.search_window_days);

    let instructors: Vec<Instructor> = sqlx::query_as::<_, Instructor>("SELECT * FROM instructors")
        .fetch_all(pool)
        .await
        .unwrap_or_default();

    let aircraft_list: Vec<Aircraft> = sqlx::query_as::<_, Aircraft>(
        "SELECT * FROM aircraft WHERE available = 1",
    )
    .fetch_all(pool)
    .await
    .unwrap_or_default();

    let mut candidates: Vec<Candidate> = Vec::new();

    'outer: for instructor in &instructors {
        if !certification_gate(student.training_level, instructor) {
            continue;
        }

        let committed: Vec<Flight> = sqlx::query_as::<_, Flight>(
            "SELECT * FROM flights
             WHERE instructor_id = ?1 AND status IN ('SCHEDULED', 'RESCHEDULED')
               AND departure_time BETWEEN ?2 AND ?3
             ORDER BY departure_time",
        )
        .bind(&instructor.id)
        .bind(window_start)
        .bind(window_end)
        .fetch_all(pool)
        .await
        .unwrap_or_default();

        let slots = free_slots(
            &committed,
            window_start,
            window_end,
            duration,
            config.operating_start_hour_utc,
            config.operating_end_hour_utc,
        );

        for (slot_start, slot_end) in slots {
            let spacing_hours = (slot_start - flight.departure_time).num_seconds().abs() as f64
                / 3600.0;
            if spacing_hours < config.minimum_spacing_hours as f64 {
                continue;
            }

            for aircraft in &aircraft_list {
                if candidates.len() >= config.max_candidates {
                    break 'outer;
                }

                let committed_aircraft: Vec<Flight> = sqlx::query_as::<_, Flight>(
                    "SELECT * FROM flights
                     WHERE aircraft_id = ?1 AND status IN ('SCHEDULED', 'RESCHEDULED')
                       AND departure_time BETWEEN ?2 AND ?3
                     ORDER BY departure_time",
                )
                .bind(&aircraft.id)
                .bind(window_start)
                .bind(window_end)
                .fetch_all(pool)
                .await
                .unwrap_or_default();

                if committed_aircraft
                    .iter()
                    .any(|f| overlaps(slot_start, slot_end, f.departure_time, f.arrival_time))
                {
                    continue;
                }

                let confidence = score_slot(flight.departure_time, slot_start, duration);

                candidates.push(Candidate {
                    slot_index: 0,
                    instructor_id: instructor.id.clone(),
                    aircraft_id: aircraft.id.clone(),
                    departure_time: slot_start,
                    arrival_time: slot_end,
                    confidence,
                    instructor_available: true,
                    aircraft_available: true,
                    certification_valid: true,
                    within_time_window: true,
                    minimum_spacing_met: true,
                    notes: None,
                });
            }
        }
    }

    candidates.sort_by(|a, b| {
        b.confidence
            .cmp(&a.confidence)
            .then(a.departure_time.cmp(&b.departure_time))
    });
    for (i, candidate) in candidates.iter_mut().enumerate() {
        candidate.slot_index = i;
    }

    CandidateSet {
        original_flight_id: flight_id.to_string(),
        original_departure_time: Some(flight.departure_time),
        candidates,
        error_reason: None,
    }
}

fn certification_gate(training_level: TrainingLevel, instructor: &Instructor) -> bool {
    match training_level {
        TrainingLevel::Student => true,
        TrainingLevel::Private => instructor
            .certifications
            .iter()
            .any(|c| c.eq_ignore_ascii_case("private")),
        TrainingLevel::Instrument => instructor
            .certifications
            .iter()
            .any(|c| c.eq_ignore_ascii_case("instrument")),
    }
}

fn overlaps(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// Free intervals between committed flights, intersected with operating
/// hours, day by day across the search window; candidate start times step
/// the lesson's duration from each interval's start (spec §4.4 step 3).
fn free_slots(
    committed: &[Flight],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    duration: ChronoDuration,
    operating_start_hour: u32,
    operating_end_hour: u32,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut slots = Vec::new();
    let mut day = window_start.date_naive();
    let last_day = window_end.date_naive();

    while day <= last_day {
        let Some(day_open) = Utc.with_ymd_and_hms(
            day.year(),
            day.month(),
            day.day(),
            operating_start_hour,
            0,
            0,
        )
        .single() else {
            day = day.succ_opt().unwrap_or(day);
            continue;
        };
        let Some(day_close) = Utc.with_ymd_and_hms(
            day.year(),
            day.month(),
            day.day(),
            operating_end_hour,
            0,
            0,
        )
        .single() else {
            day = day.succ_opt().unwrap_or(day);
            continue;
        };

        let day_open = day_open.max(window_start);
        let day_close = day_close.min(window_end);

        if day_open < day_close {
            let mut busy: Vec<(DateTime<Utc>, DateTime<Utc>)> = committed
                .iter()
                .filter(|f| overlaps(day_open, day_close, f.departure_time, f.arrival_time))
                .map(|f| (f.departure_time.max(day_open), f.arrival_time.min(day_close)))
                .collect();
            busy.sort_by_key(|(s, _)| *s);

            let mut cursor = day_open;
            for (busy_start, busy_end) in &busy {
                if cursor < *busy_start {
                    step_interval(cursor, *busy_start, duration, &mut slots);
                }
                cursor = cursor.max(*busy_end);
            }
            if cursor < day_close {
                step_interval(cursor, day_close, duration, &mut slots);
            }
        }

        day = day.succ_opt().unwrap_or(day);
        if day > last_day {
            break;
        }
    }

    slots
}

fn step_interval(
    interval_start: DateTime<Utc>,
    interval_end: DateTime<Utc>,
    duration: ChronoDuration,
    out: &mut Vec<(DateTime<Utc>, DateTime<Utc>)>,
) {
    let mut t = interval_start;
    while t + duration <= interval_end {
        out.push((t, t + duration));
        t += duration;
    }
}

/// Deterministic confidence score in [0, 100] (spec §4.4 step 5).
fn score_slot(
    original_departure: DateTime<Utc>,
    slot_start: DateTime<Utc>,
    _duration: ChronoDuration,
) -> i32 {
    let day_offset = (slot_start.date_naive() - original_departure.date_naive())
        .num_days()
        .abs();

    let mut score: i32 = match day_offset {
        0 => 100,
        1 => 80,
        2..=3 => 60,
        4..=5 => 40,
        _ => 20,
    };

    let original_hour = original_departure.hour() as i64;
    let slot_hour = slot_start.hour() as i64;
    let raw_delta = (slot_hour - original_hour).rem_euclid(24);
    let hour_delta = raw_delta.min(24 - raw_delta);

    if hour_delta <= 2 {
        // no change
    } else if hour_delta <= 4 {
        score -= 10;
    } else {
        score -= 20;
    }

    // Candidate slots are always generated with the original lesson's exact
    // duration, so this is always an exact match (spec step 5, "duration
    // alignment").
    score = (score + 5).min(100);

    if day_offset != 0 && slot_start.weekday() == original_departure.weekday() {
        score = (score + 5).min(100);
    }

    score.clamp(0, 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn score_same_slot_is_perfect() {
        let original = Utc.with_ymd_and_hms(2026, 8, 1, 14, 0, 0).unwrap();
        let score = score_slot(original, original, ChronoDuration::hours(1));
        assert_eq!(score, 100);
    }

    #[test]
    fn score_decreases_with_day_offset() {
        let original = Utc.with_ymd_and_hms(2026, 8, 1, 14, 0, 0).unwrap();
        let one_day = Utc.with_ymd_and_hms(2026, 8, 2, 14, 0, 0).unwrap();
        let five_days = Utc.with_ymd_and_hms(2026, 8, 6, 14, 0, 0).unwrap();
        let ten_days = Utc.with_ymd_and_hms(2026, 8, 11, 14, 0, 0).unwrap();

        let s1 = score_slot(original, one_day, ChronoDuration::hours(1));
        let s5 = score_slot(original, five_days, ChronoDuration::hours(1));
        let s10 = score_slot(original, ten_days, ChronoDuration::hours(1));

        assert!(s1 > s5);
        assert!(s5 > s10);
    }

    #[test]
    fn score_penalizes_time_of_day_drift() {
        let original = Utc.with_ymd_and_hms(2026, 8, 1, 14, 0, 0).unwrap();
        let aligned = Utc.with_ymd_and_hms(2026, 8, 1, 15, 0, 0).unwrap();
        let drifted = Utc.with_ymd_and_hms(2026, 8, 1, 20, 0, 0).unwrap();

        let s_aligned = score_slot(original, aligned, ChronoDuration::hours(1));
        let s_drifted = score_slot(original, drifted, ChronoDuration::hours(1));
        assert!(s_aligned > s_drifted);
    }

    #[test]
    fn free_slots_avoid_committed_flights() {
        let window_start = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        let window_end = Utc.with_ymd_and_hms(2026, 8, 2, 0, 0, 0).unwrap();
        let committed = vec![Flight {
            id: "f1".into(),
            student_id: "s1".into(),
            instructor_id: "i1".into(),
            aircraft_id: "a1".into(),
            departure_time: Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap(),
            arrival_time: Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap(),
            origin: "KPAO".into(),
            destination: "KSQL".into(),
            status: crate::models::FlightStatus::Scheduled,
            weather_status: crate::models::WeatherStatus::Clear,
        }];

        let slots = free_slots(
            &committed,
            window_start,
            window_end,
            ChronoDuration::hours(1),
            6,
            18,
        );

        for (start, end) in &slots {
            assert!(!overlaps(
                *start,
                *end,
                committed[0].departure_time,
                committed[0].arrival_time
            ));
        }
        assert!(!slots.is_empty());
    }

    #[test]
    fn minimum_spacing_boundary_is_inclusive() {
        // Slot exactly 6h from original passes (boundary >=), per spec §8.
        let original = Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap();
        let six_hours_later = original + ChronoDuration::hours(6);
        let spacing_hours = (six_hours_later - original).num_seconds().abs() as f64 / 3600.0;
        assert!(spacing_hours >= 6.0);
    }
}

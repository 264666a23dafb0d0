use crate::config::PipelineConfig;
use crate::models::Flight;
use crate::scheduling::candidates::CandidateSet;
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_RECOMMENDATIONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RankingSource {
    Ai,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedRecommendation {
    pub slot_index: usize,
    pub instructor_id: String,
    pub aircraft_id: String,
    pub departure_time: chrono::DateTime<chrono::Utc>,
    pub arrival_time: chrono::DateTime<chrono::Utc>,
    pub confidence: i32,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankingResult {
    pub flight_id: String,
    pub recommendations: Vec<RankedRecommendation>,
    pub source: RankingSource,
    pub fallback_reason: Option<String>,
}

/// Calls out to a reschedule-recommendation model, falling back to a
/// deterministic top-N-by-confidence ordering when the model is
/// unconfigured, unreachable, slow, or returns something unusable (spec
/// §4.5, component C5).
#[derive(Clone)]
pub struct Ranker {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl Ranker {
    pub fn new(api_key: Option<String>, base_url: Option<String>, config: &PipelineConfig) -> Self {
        let timeout = Duration::from_millis(config.ranker_timeout_ms);
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://api.example-ai.test/v1/chat/completions".to_string()),
            model: "gpt-4o-mini".to_string(),
            timeout,
        }
    }

    pub fn from_env(config: &PipelineConfig) -> Self {
        let api_key = std::env::var("AI_RESCHEDULE_API_KEY").ok();
        let base_url = std::env::var("AI_RESCHEDULE_BASE_URL").ok();
        Self::new(api_key, base_url, config)
    }
}

/// Rank a candidate set for one flight, down to at most three recommendations.
pub async fn rank(ranker: &Ranker, flight: &Flight, candidate_set: &CandidateSet) -> RankingResult {
    if candidate_set.candidates.is_empty() {
        return RankingResult {
            flight_id: candidate_set.original_flight_id.clone(),
            recommendations: vec![],
            source: RankingSource::Fallback,
            fallback_reason: Some("no candidates to rank".to_string()),
        };
    }

    let Some(api_key) = ranker.api_key.clone() else {
        return fallback(flight, candidate_set, "ranking model not configured");
    };

    match call_model(ranker, &api_key, flight, candidate_set).await {
        Ok(recommendations) if !recommendations.is_empty() => RankingResult {
            flight_id: candidate_set.original_flight_id.clone(),
            recommendations,
            source: RankingSource::Ai,
            fallback_reason: None,
        },
        Ok(_) => fallback(flight, candidate_set, "model returned no usable recommendations"),
        Err(reason) => {
            tracing::warn!(flight_id = %flight.id, reason = %reason, "ranking model call failed, using fallback");
            fallback(flight, candidate_set, &reason)
        }
    }
}

fn fallback(flight: &Flight, candidate_set: &CandidateSet, reason: &str) -> RankingResult {
    let recommendations = candidate_set
        .candidates
        .iter()
        .take(MAX_RECOMMENDATIONS)
        .map(|candidate| RankedRecommendation {
            slot_index: candidate.slot_index,
            instructor_id: candidate.instructor_id.clone(),
            aircraft_id: candidate.aircraft_id.clone(),
            departure_time: candidate.departure_time,
            arrival_time: candidate.arrival_time,
            confidence: candidate.confidence,
            rationale: format!(
                "[Fallback: {}] {} available at {} on {}. All constraints met.",
                reason,
                candidate.instructor_id,
                candidate.departure_time.format("%H:%M"),
                candidate.aircraft_id
            ),
        })
        .collect();

    RankingResult {
        flight_id: flight.id.clone(),
        recommendations,
        source: RankingSource::Fallback,
        fallback_reason: Some(reason.to_string()),
    }
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: String,
}

#[derive(Deserialize)]
struct ModelPick {
    rank: i32,
    #[serde(rename = "candidateIndex")]
    candidate_index: usize,
    confidence: i32,
    rationale: String,
}

async fn call_model(
    ranker: &Ranker,
    api_key: &str,
    flight: &Flight,
    candidate_set: &CandidateSet,
) -> Result<Vec<RankedRecommendation>, String> {
    let prompt = build_prompt(flight, candidate_set);

    let request = ChatRequest {
        model: ranker.model.clone(),
        messages: vec![
            ChatMessage {
                role: "system".to_string(),
                content: "You are a flight training scheduling assistant. Pick the best \
                    reschedule candidates from the numbered list given. Return a JSON array \
                    of at most 3 objects, ranked best first, each with rank (integer starting \
                    at 1), candidateIndex (integer, matching the list), confidence (integer \
                    0-100), and rationale (one sentence). Return nothing but the JSON array."
                    .to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: prompt,
            },
        ],
        temperature: 0.2,
    };

    let send = ranker
        .client
        .post(&ranker.base_url)
        .header("Authorization", format!("Bearer {api_key}"))
        .header("Content-Type", "application/json")
        .json(&request)
        .send();

    let response = tokio::time::timeout(ranker.timeout, send)
        .await
        .map_err(|_| "ranker request timed out".to_string())?
        .map_err(|e| format!("ranker request failed: {e}"))?;

    if !response.status().is_success() {
        return Err(format!("ranker returned status {}", response.status()));
    }

    let chat_response: ChatResponse = response
        .json()
        .await
        .map_err(|e| format!("failed to parse ranker response envelope: {e}"))?;

    let content = chat_response
        .choices
        .first()
        .map(|c| c.message.content.as_str())
        .ok_or_else(|| "ranker response had no choices".to_string())?;

    let raw: Vec<serde_json::Value> = serde_json::from_str(strip_code_fence(content))
        .map_err(|e| format!("failed to parse ranker JSON: {e}"))?;

    // Drop entries missing any of rank/candidateIndex/confidence/rationale
    // rather than failing the whole response over one bad element.
    let picks: Vec<ModelPick> = raw
        .into_iter()
        .filter_map(|value| serde_json::from_value::<ModelPick>(value).ok())
        .collect();

    let mut recommendations = Vec::new();
    for pick in picks {
        let Some(candidate) = candidate_set.candidates.get(pick.candidate_index) else {
            continue;
        };
        recommendations.push(RankedRecommendation {
            slot_index: candidate.slot_index,
            instructor_id: candidate.instructor_id.clone(),
            aircraft_id: candidate.aircraft_id.clone(),
            departure_time: candidate.departure_time,
            arrival_time: candidate.arrival_time,
            confidence: pick.confidence,
            rationale: pick.rationale,
        });
        if recommendations.len() >= MAX_RECOMMENDATIONS {
            break;
        }
    }

    Ok(recommendations)
}

fn build_prompt(flight: &Flight, candidate_set: &CandidateSet) -> String {
    let listing: String = candidate_set
        .candidates
        .iter()
        .map(|c| {
            format!(
                "{}: instructor {} on {} at {} (confidence {})",
                c.slot_index,
                c.instructor_id,
                c.aircraft_id,
                c.departure_time.format("%Y-%m-%d %H:%M UTC"),
                c.confidence
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Flight {} (originally departing {}) needs a new slot due to a weather conflict.\n\n\
         Candidate slots:\n{}\n\n\
         Choose up to 3 of the best candidates by index and explain why.",
        flight.id,
        flight.departure_time.format("%Y-%m-%d %H:%M UTC"),
        listing
    )
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches('\n');
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FlightStatus, WeatherStatus};
    use crate::scheduling::candidates::Candidate;
    use chrono::Utc;

    fn test_flight() -> Flight {
        Flight {
            id: "f1".into(),
            student_id: "s1".into(),
            instructor_id: "i1".into(),
            aircraft_id: "a1".into(),
            departure_time: Utc::now(),
            arrival_time: Utc::now() + ChronoDuration::hours(1),
            origin: "KPAO".into(),
            destination: "KSQL".into(),
            status: FlightStatus::Scheduled,
            weather_status: WeatherStatus::AutoReschedule,
        }
    }

    fn test_candidate(slot_index: usize, confidence: i32) -> Candidate {
        Candidate {
            slot_index,
            instructor_id: format!("instr-{slot_index}"),
            aircraft_id: "a1".into(),
            departure_time: Utc::now() + ChronoDuration::days(slot_index as i64 + 1),
            arrival_time: Utc::now() + ChronoDuration::days(slot_index as i64 + 1) + ChronoDuration::hours(1),
            confidence,
            instructor_available: true,
            aircraft_available: true,
            certification_valid: true,
            within_time_window: true,
            minimum_spacing_met: true,
            notes: None,
        }
    }

    #[test]
    fn strip_code_fence_removes_json_fence() {
        let fenced =
            "```json\n[{\"rank\":1,\"candidateIndex\":0,\"confidence\":90,\"rationale\":\"ok\"}]\n```";
        assert_eq!(
            strip_code_fence(fenced),
            "[{\"rank\":1,\"candidateIndex\":0,\"confidence\":90,\"rationale\":\"ok\"}]"
        );
    }

    #[test]
    fn strip_code_fence_passes_through_plain_json() {
        let plain = "[{\"rank\":1,\"candidateIndex\":0,\"confidence\":90,\"rationale\":\"ok\"}]";
        assert_eq!(strip_code_fence(plain), plain);
    }

    #[tokio::test]
    async fn empty_candidates_short_circuit_to_fallback() {
        let flight = test_flight();
        let empty = CandidateSet {
            original_flight_id: flight.id.clone(),
            original_departure_time: Some(flight.departure_time),
            candidates: vec![],
            error_reason: None,
        };
        let config = PipelineConfig::default();
        let ranker = Ranker::new(None, None, &config);

        let result = rank(&ranker, &flight, &empty).await;
        assert!(result.recommendations.is_empty());
        assert_eq!(result.source, RankingSource::Fallback);
    }

    #[tokio::test]
    async fn unconfigured_ranker_falls_back_to_top_n_by_confidence() {
        let flight = test_flight();
        let candidate_set = CandidateSet {
            original_flight_id: flight.id.clone(),
            original_departure_time: Some(flight.departure_time),
            candidates: vec![
                test_candidate(0, 90),
                test_candidate(1, 70),
                test_candidate(2, 50),
                test_candidate(3, 30),
            ],
            error_reason: None,
        };
        let config = PipelineConfig::default();
        let ranker = Ranker::new(None, None, &config);

        let result = rank(&ranker, &flight, &candidate_set).await;
        assert_eq!(result.source, RankingSource::Fallback);
        assert_eq!(result.recommendations.len(), MAX_RECOMMENDATIONS);
        assert_eq!(result.recommendations[0].slot_index, 0);
        assert!(result.recommendations[0].rationale.contains("[Fallback:"));
    }
}

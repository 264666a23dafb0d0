use crate::config::PipelineConfig;
use crate::models::{CheckpointType, Flight, WeatherSnapshot};
use crate::weather::store::SnapshotStore;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const KPH_TO_KNOTS: f64 = 0.539957;
const METERS_TO_MILES: f64 = 0.000621371;

/// A forecast normalized into the shape a [`crate::models::WeatherSnapshot`]
/// is built from, before it has an id or correlation id assigned.
#[derive(Debug, Clone)]
pub struct NormalizedForecast {
    pub location_code: String,
    pub forecast_instant: DateTime<Utc>,
    pub wind_speed_kt: f64,
    pub visibility_sm: f64,
    pub ceiling_ft: Option<f64>,
    pub conditions: String,
    pub confidence_horizon_hours: i64,
    pub revalidation_token: Option<String>,
}

/// Result of a single checkpoint fetch.
#[derive(Debug, Clone)]
pub enum ForecastOutcome {
    /// Newly observed data (remote 2xx, or synthetic) the caller should
    /// persist via [`SnapshotStore::append`].
    Fresh(NormalizedForecast),
    /// An existing, already-persisted snapshot that should be reused
    /// unchanged (a 304 revalidation, or a stale cache fallback).
    Reused(WeatherSnapshot),
    /// Remote, cache, and synthetic sources were all exhausted.
    Unavailable,
}

/// Fetches forecasts with retry/backoff, conditional revalidation, cache
/// fallback, and synthetic fallback (spec §4.1, component C1).
#[derive(Clone)]
pub struct ForecastGateway {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    config: PipelineConfig,
    synthetic_profiles: HashMap<(String, String, CheckpointType), SyntheticProfile>,
    default_profile: SyntheticProfile,
}

#[derive(Debug, Clone)]
struct SyntheticProfile {
    wind_speed_kt: f64,
    visibility_sm: f64,
    ceiling_ft: Option<f64>,
    conditions: &'static str,
}

#[derive(Debug, Deserialize)]
struct UpstreamForecastResponse {
    list: Vec<UpstreamHourBucket>,
}

#[derive(Debug, Deserialize)]
struct UpstreamHourBucket {
    dt: i64,
    wind_kph: f64,
    visibility_m: f64,
    cloud_cover_pct: f64,
    conditions: String,
}

enum AttemptOutcome {
    Success {
        body: UpstreamForecastResponse,
        revalidation_token: Option<String>,
    },
    NotModified,
    Transient,
    Terminal,
}

impl ForecastGateway {
    pub fn new(api_key: Option<String>, base_url: Option<String>, config: PipelineConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.gateway_timeout_secs))
            .build()
            .expect("failed to build forecast HTTP client");

        Self {
            client,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.example-forecast.test/v1".to_string()),
            config,
            synthetic_profiles: default_synthetic_profiles(),
            default_profile: SyntheticProfile {
                wind_speed_kt: 8.0,
                visibility_sm: 10.0,
                ceiling_ft: None,
                conditions: "Clear",
            },
        }
    }

    /// Absent `WEATHER_API_KEY` degrades this gateway to cache/synthetic-only
    /// operation (spec §6 "Environment").
    pub fn from_env(config: PipelineConfig) -> Self {
        let api_key = std::env::var("WEATHER_API_KEY").ok();
        let base_url = std::env::var("WEATHER_API_BASE_URL").ok();
        Self::new(api_key, base_url, config)
    }

    fn resolve_checkpoint(
        flight: &Flight,
        checkpoint: CheckpointType,
    ) -> (String, DateTime<Utc>) {
        match checkpoint {
            CheckpointType::Departure => (flight.origin.clone(), flight.departure_time),
            CheckpointType::Arrival => (flight.destination.clone(), flight.arrival_time),
            // Open question (spec §9b): corridor is currently identical to
            // departure. Left as-is pending a real enroute midpoint.
            CheckpointType::Corridor => (flight.origin.clone(), flight.departure_time),
        }
    }

    pub async fn fetch_checkpoint(
        &self,
        flight: &Flight,
        checkpoint: CheckpointType,
        store: &SnapshotStore,
    ) -> ForecastOutcome {
        let (location, target_instant) = Self::resolve_checkpoint(flight, checkpoint);

        if let Some(api_key) = &self.api_key {
            match self
                .fetch_remote_with_retry(api_key, &location, target_instant, store)
                .await
            {
                RemoteResult::Fresh(forecast) => return ForecastOutcome::Fresh(forecast),
                RemoteResult::NotModifiedHit(snapshot) => return ForecastOutcome::Reused(snapshot),
                RemoteResult::Failed => {}
            }
        }

        if let Some(cached) = store
            .latest_for_flight_checkpoint(&flight.id, checkpoint)
            .await
        {
            tracing::warn!(
                flight_id = %flight.id,
                checkpoint = checkpoint.as_str(),
                "forecast gateway degraded to cached snapshot"
            );
            return ForecastOutcome::Reused(cached);
        }

        if let Some(forecast) =
            self.synthesize(&flight.origin, &flight.destination, checkpoint, target_instant)
        {
            tracing::warn!(
                flight_id = %flight.id,
                checkpoint = checkpoint.as_str(),
                "forecast gateway degraded to synthetic profile"
            );
            return ForecastOutcome::Fresh(forecast);
        }

        tracing::error!(
            flight_id = %flight.id,
            checkpoint = checkpoint.as_str(),
            "no forecast available from remote, cache, or synthetic sources"
        );
        ForecastOutcome::Unavailable
    }

    async fn fetch_remote_with_retry(
        &self,
        api_key: &str,
        location: &str,
        target_instant: DateTime<Utc>,
        store: &SnapshotStore,
    ) -> RemoteResult {
        let prior_token = store
            .latest_for_location_forecast(location, target_instant)
            .await
            .and_then(|s| s.revalidation_token);

        for attempt in 0..self.config.gateway_attempts {
            match self
                .attempt_once(api_key, location, target_instant, prior_token.as_deref())
                .await
            {
                AttemptOutcome::Success {
                    body,
                    revalidation_token,
                } => {
                    if let Some(forecast) =
                        Self::project(&body, location, target_instant, revalidation_token)
                    {
                        return RemoteResult::Fresh(forecast);
                    }
                    return RemoteResult::Failed;
                }
                AttemptOutcome::NotModified => {
                    if let Some(snapshot) = store
                        .latest_for_location_forecast(location, target_instant)
                        .await
                    {
                        return RemoteResult::NotModifiedHit(snapshot);
                    }
                    return RemoteResult::Failed;
                }
                AttemptOutcome::Terminal => return RemoteResult::Failed,
                AttemptOutcome::Transient => {
                    if attempt + 1 < self.config.gateway_attempts {
                        let delay_ms = (self.config.gateway_base_backoff_ms * (1u64 << attempt))
                            .min(self.config.gateway_max_backoff_ms);
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
            }
        }

        RemoteResult::Failed
    }

    async fn attempt_once(
        &self,
        api_key: &str,
        location: &str,
        target_instant: DateTime<Utc>,
        prior_token: Option<&str>,
    ) -> AttemptOutcome {
        let date = target_instant.format("%Y-%m-%d").to_string();
        let mut request = self
            .client
            .get(format!("{}/forecast", self.base_url))
            .query(&[("q", location), ("date", date.as_str()), ("appid", api_key)]);

        if let Some(token) = prior_token {
            request = request.header("If-None-Match", token);
        }

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(err) => {
                tracing::warn!(error = %err, "forecast gateway transport error");
                return AttemptOutcome::Transient;
            }
        };

        let status = response.status();
        if status.as_u16() == 304 {
            return AttemptOutcome::NotModified;
        }
        if status.is_success() {
            let revalidation_token = response
                .headers()
                .get("ETag")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            return match response.json::<UpstreamForecastResponse>().await {
                Ok(body) => AttemptOutcome::Success {
                    body,
                    revalidation_token,
                },
                Err(_) => AttemptOutcome::Terminal,
            };
        }
        if status.as_u16() >= 500 || status.as_u16() == 429 {
            return AttemptOutcome::Transient;
        }
        AttemptOutcome::Terminal
    }

    fn project(
        body: &UpstreamForecastResponse,
        location: &str,
        target_instant: DateTime<Utc>,
        revalidation_token: Option<String>,
    ) -> Option<NormalizedForecast> {
        let bucket = body
            .list
            .iter()
            .filter(|b| {
                DateTime::from_timestamp(b.dt, 0)
                    .map(|dt| dt.format("%H").to_string() == target_instant.format("%H").to_string())
                    .unwrap_or(false)
            })
            .min_by_key(|b| {
                (DateTime::from_timestamp(b.dt, 0).unwrap_or(target_instant) - target_instant)
                    .num_seconds()
                    .abs()
            })
            .or_else(|| {
                body.list.iter().min_by_key(|b| {
                    (DateTime::from_timestamp(b.dt, 0).unwrap_or(target_instant) - target_instant)
                        .num_seconds()
                        .abs()
                })
            })?;

        let wind_speed_kt = (bucket.wind_kph * KPH_TO_KNOTS).round();
        let visibility_sm = bucket.visibility_m * METERS_TO_MILES;
        let ceiling_ft = if bucket.cloud_cover_pct < 10.0 {
            None
        } else {
            Some(10000.0 - bucket.cloud_cover_pct * 100.0)
        };

        Some(NormalizedForecast {
            location_code: location.to_string(),
            forecast_instant: target_instant,
            wind_speed_kt,
            visibility_sm,
            ceiling_ft,
            conditions: bucket.conditions.clone(),
            confidence_horizon_hours: confidence_horizon_for(target_instant),
            revalidation_token,
        })
    }

    fn synthesize(
        &self,
        origin: &str,
        destination: &str,
        checkpoint: CheckpointType,
        target_instant: DateTime<Utc>,
    ) -> Option<NormalizedForecast> {
        let key = (origin.to_string(), destination.to_string(), checkpoint);
        let profile = self
            .synthetic_profiles
            .get(&key)
            .unwrap_or(&self.default_profile);

        Some(NormalizedForecast {
            location_code: match checkpoint {
                CheckpointType::Arrival => destination.to_string(),
                _ => origin.to_string(),
            },
            forecast_instant: target_instant,
            wind_speed_kt: profile.wind_speed_kt,
            visibility_sm: profile.visibility_sm,
            ceiling_ft: profile.ceiling_ft,
            conditions: profile.conditions.to_string(),
            confidence_horizon_hours: confidence_horizon_for(target_instant),
            revalidation_token: None,
        })
    }
}

enum RemoteResult {
    Fresh(NormalizedForecast),
    NotModifiedHit(WeatherSnapshot),
    Failed,
}

/// Lead time <24h -> 24h window, <72h -> 48h window, else 72h (spec §4.1 step 5).
/// Boundary is strict `<`, so exactly 24h/72h jumps to the wider bucket.
fn confidence_horizon_for(target_instant: DateTime<Utc>) -> i64 {
    let lead_hours = (target_instant - Utc::now()).num_seconds() as f64 / 3600.0;
    if lead_hours < 24.0 {
        24
    } else if lead_hours < 72.0 {
        48
    } else {
        72
    }
}

fn default_synthetic_profiles() -> HashMap<(String, String, CheckpointType), SyntheticProfile> {
    let mut map = HashMap::new();
    map.insert(
        ("KPAO".to_string(), "KSQL".to_string(), CheckpointType::Departure),
        SyntheticProfile {
            wind_speed_kt: 9.0,
            visibility_sm: 9.0,
            ceiling_ft: Some(6000.0),
            conditions: "Few clouds",
        },
    );
    map.insert(
        ("KPAO".to_string(), "KSQL".to_string(), CheckpointType::Arrival),
        SyntheticProfile {
            wind_speed_kt: 7.0,
            visibility_sm: 10.0,
            ceiling_ft: None,
            conditions: "Clear",
        },
    );
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_horizon_boundaries() {
        let now = Utc::now();
        assert_eq!(confidence_horizon_for(now + chrono::Duration::hours(23)), 24);
        assert_eq!(confidence_horizon_for(now + chrono::Duration::hours(24)), 48);
        assert_eq!(confidence_horizon_for(now + chrono::Duration::hours(71)), 48);
        assert_eq!(confidence_horizon_for(now + chrono::Duration::hours(72)), 72);
        assert_eq!(confidence_horizon_for(now + chrono::Duration::hours(200)), 72);
    }

    #[test]
    fn ceiling_derivation_matches_spec() {
        let low_cover = UpstreamHourBucket {
            dt: Utc::now().timestamp(),
            wind_kph: 10.0,
            visibility_m: 10000.0,
            cloud_cover_pct: 5.0,
            conditions: "Clear".into(),
        };
        let high_cover = UpstreamHourBucket {
            dt: Utc::now().timestamp(),
            wind_kph: 10.0,
            visibility_m: 10000.0,
            cloud_cover_pct: 50.0,
            conditions: "Broken".into(),
        };

        let body_low = UpstreamForecastResponse {
            list: vec![low_cover],
        };
        let body_high = UpstreamForecastResponse {
            list: vec![high_cover],
        };

        let target = Utc::now();
        let low = ForecastGateway::project(&body_low, "KPAO", target, None).unwrap();
        let high = ForecastGateway::project(&body_high, "KPAO", target, None).unwrap();

        assert_eq!(low.ceiling_ft, None);
        assert_eq!(high.ceiling_ft, Some(5000.0));
    }

    #[test]
    fn wind_kph_to_knots_rounds() {
        let bucket = UpstreamHourBucket {
            dt: Utc::now().timestamp(),
            wind_kph: 20.0,
            visibility_m: 10000.0,
            cloud_cover_pct: 0.0,
            conditions: "Clear".into(),
        };
        let body = UpstreamForecastResponse { list: vec![bucket] };
        let forecast = ForecastGateway::project(&body, "KPAO", Utc::now(), None).unwrap();
        // 20 kph * 0.539957 = 10.799.. -> rounds to 11
        assert_eq!(forecast.wind_speed_kt, 11.0);
        assert_eq!(forecast.location_code, "KPAO");
    }
}

/// The full tunable set for the scheduling pipeline (spec §9 design notes).
///
/// Defaults match the spec exactly; every field can be overridden through
/// environment variables via [`PipelineConfig::from_env`], the same pattern
/// `WeatherClient::from_env` / `AiRescheduleClient::from_env` use elsewhere
/// in this workspace.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub auto_accept_confidence_threshold: i32,
    pub reschedule_horizon_hours: i64,
    pub search_window_days: i64,
    pub minimum_spacing_hours: i64,
    pub operating_start_hour_utc: u32,
    pub operating_end_hour_utc: u32,
    pub duration_tolerance_minutes: i64,
    pub max_candidates: usize,
    pub gateway_attempts: u32,
    pub gateway_base_backoff_ms: u64,
    pub gateway_max_backoff_ms: u64,
    pub gateway_timeout_secs: u64,
    pub ranker_timeout_ms: u64,
    pub pipeline_budget_seconds: u64,
    pub max_parallel_flights: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            auto_accept_confidence_threshold: 80,
            reschedule_horizon_hours: 72,
            search_window_days: 7,
            minimum_spacing_hours: 6,
            operating_start_hour_utc: 6,
            operating_end_hour_utc: 18,
            duration_tolerance_minutes: 5,
            max_candidates: 15,
            gateway_attempts: 4,
            gateway_base_backoff_ms: 2000,
            gateway_max_backoff_ms: 8000,
            gateway_timeout_secs: 10,
            ranker_timeout_ms: 5000,
            pipeline_budget_seconds: 120,
            max_parallel_flights: 16,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            auto_accept_confidence_threshold: env_or(
                "AUTO_ACCEPT_CONFIDENCE_THRESHOLD",
                defaults.auto_accept_confidence_threshold,
            ),
            reschedule_horizon_hours: env_or(
                "RESCHEDULE_HORIZON_HOURS",
                defaults.reschedule_horizon_hours,
            ),
            search_window_days: env_or("SEARCH_WINDOW_DAYS", defaults.search_window_days),
            minimum_spacing_hours: env_or(
                "MINIMUM_SPACING_HOURS",
                defaults.minimum_spacing_hours,
            ),
            operating_start_hour_utc: env_or(
                "OPERATING_START_HOUR_UTC",
                defaults.operating_start_hour_utc,
            ),
            operating_end_hour_utc: env_or(
                "OPERATING_END_HOUR_UTC",
                defaults.operating_end_hour_utc,
            ),
            duration_tolerance_minutes: env_or(
                "DURATION_TOLERANCE_MINUTES",
                defaults.duration_tolerance_minutes,
            ),
            max_candidates: env_or("MAX_CANDIDATES", defaults.max_candidates),
            gateway_attempts: env_or("GATEWAY_ATTEMPTS", defaults.gateway_attempts),
            gateway_base_backoff_ms: env_or(
                "GATEWAY_BASE_BACKOFF_MS",
                defaults.gateway_base_backoff_ms,
            ),
            gateway_max_backoff_ms: env_or(
                "GATEWAY_MAX_BACKOFF_MS",
                defaults.gateway_max_backoff_ms,
            ),
            gateway_timeout_secs: env_or("GATEWAY_TIMEOUT_SECS", defaults.gateway_timeout_secs),
            ranker_timeout_ms: env_or("RANKER_TIMEOUT_MS", defaults.ranker_timeout_ms),
            pipeline_budget_seconds: env_or(
                "PIPELINE_BUDGET_SECONDS",
                defaults.pipeline_budget_seconds,
            ),
            max_parallel_flights: env_or("MAX_PARALLEL_FLIGHTS", defaults.max_parallel_flights),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.auto_accept_confidence_threshold, 80);
        assert_eq!(cfg.reschedule_horizon_hours, 72);
        assert_eq!(cfg.search_window_days, 7);
        assert_eq!(cfg.minimum_spacing_hours, 6);
        assert_eq!(cfg.operating_start_hour_utc, 6);
        assert_eq!(cfg.operating_end_hour_utc, 18);
        assert_eq!(cfg.duration_tolerance_minutes, 5);
        assert_eq!(cfg.max_candidates, 15);
        assert_eq!(cfg.gateway_attempts, 4);
        assert_eq!(cfg.gateway_base_backoff_ms, 2000);
        assert_eq!(cfg.gateway_max_backoff_ms, 8000);
        assert_eq!(cfg.ranker_timeout_ms, 5000);
        assert_eq!(cfg.pipeline_budget_seconds, 120);
    }

    #[test]
    fn env_override() {
        std::env::set_var("MAX_CANDIDATES", "7");
        let cfg = PipelineConfig::from_env();
        assert_eq!(cfg.max_candidates, 7);
        std::env::remove_var("MAX_CANDIDATES");
    }
}

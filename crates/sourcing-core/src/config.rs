//! Environment-driven configuration
//!
//! Every knob is optional with a documented default and is clamped to its
//! valid range at load time, so downstream code never has to re-validate.

use serde::{Deserialize, Serialize};

/// How discovery queries are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryGenMode {
    /// Deterministic templates only.
    Deterministic,
    /// LLM-generated queries merged onto the deterministic plan.
    Hybrid,
}

impl std::str::FromStr for QueryGenMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hybrid" => Ok(Self::Hybrid),
            "deterministic" => Ok(Self::Deterministic),
            _ => Err(()),
        }
    }
}

/// Immutable sourcing configuration, loaded once from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcingConfig {
    // Output sizing
    pub target_count: usize,
    pub min_good_enough: usize,
    pub job_max_enrich: usize,
    pub initial_enrich_count: usize,

    // Discovery budget
    pub max_serp_queries: usize,
    pub daily_serp_cap_per_tenant: i64,
    pub dynamic_query_multiplier: usize,
    pub min_discovery_per_run: usize,
    pub max_discovery_share: f64,
    pub min_discovery_share_low_quality: f64,
    pub min_discovered_in_output: usize,
    pub discovered_promotion_min_fit_score: f64,

    // Quality gate
    pub quality_top_k: usize,
    pub quality_min_avg_fit: f64,
    pub quality_threshold: f64,
    pub quality_min_count_above: usize,
    pub min_strict_matches_before_expand: usize,

    // Ranking
    pub best_matches_min_fit_score: f64,
    pub strict_rescue_count: usize,
    pub strict_rescue_min_fit_score: f64,
    pub fit_score_epsilon: f64,
    pub location_boost_weight: f64,

    // Guards & freshness
    pub country_guard_enabled: bool,
    pub country_guard_serp_locale_enabled: bool,
    pub location_coverage_floor: f64,
    pub snapshot_stale_days: i64,
    pub stale_refresh_max_per_run: usize,
    pub discovered_enrich_reserve: usize,
    pub discovered_orphan_enrich_reserve: usize,

    // Novelty
    pub novelty_enabled: bool,
    pub novelty_window_days: i64,

    // Query generation
    pub query_gen_mode: QueryGenMode,
    pub query_groq_timeout_ms: u64,
    pub query_groq_max_retries: u32,
    pub adaptive_min_strict_attempts: usize,
    pub adaptive_strict_min_yield: f64,
    pub adaptive_min_fallback_attempts: usize,
    pub adaptive_fallback_min_yield: f64,

    // Track classifier
    pub track_classifier_version: String,
    pub track_low_conf_threshold: f64,
    pub track_blend_threshold: f64,
    pub track_groq_enabled: bool,
    pub track_groq_timeout_ms: u64,
    pub track_groq_max_retries: u32,
    pub track_groq_cache_ttl_days: i64,
    pub track_cb_threshold: u32,
    pub track_cb_window_sec: u64,
    pub track_cb_cooldown_sec: u64,

    // Rerank
    pub rerank_after_enrichment: bool,
    pub rerank_delay_ms: u64,
}

impl Default for SourcingConfig {
    fn default() -> Self {
        Self {
            target_count: 100,
            min_good_enough: 25,
            job_max_enrich: 25,
            initial_enrich_count: 10,

            max_serp_queries: 12,
            daily_serp_cap_per_tenant: 200,
            dynamic_query_multiplier: 2,
            min_discovery_per_run: 10,
            max_discovery_share: 0.5,
            min_discovery_share_low_quality: 0.3,
            min_discovered_in_output: 10,
            discovered_promotion_min_fit_score: 0.35,

            quality_top_k: 20,
            quality_min_avg_fit: 0.45,
            quality_threshold: 0.55,
            quality_min_count_above: 8,
            min_strict_matches_before_expand: 15,

            best_matches_min_fit_score: 0.45,
            strict_rescue_count: 5,
            strict_rescue_min_fit_score: 0.30,
            fit_score_epsilon: 0.02,
            location_boost_weight: 0.1,

            country_guard_enabled: true,
            country_guard_serp_locale_enabled: true,
            location_coverage_floor: 0.4,
            snapshot_stale_days: 30,
            stale_refresh_max_per_run: 10,
            discovered_enrich_reserve: 5,
            discovered_orphan_enrich_reserve: 3,

            novelty_enabled: false,
            novelty_window_days: 14,

            query_gen_mode: QueryGenMode::Deterministic,
            query_groq_timeout_ms: 1500,
            query_groq_max_retries: 1,
            adaptive_min_strict_attempts: 4,
            adaptive_strict_min_yield: 0.5,
            adaptive_min_fallback_attempts: 3,
            adaptive_fallback_min_yield: 0.25,

            track_classifier_version: "v3".to_string(),
            track_low_conf_threshold: 0.70,
            track_blend_threshold: 0.15,
            track_groq_enabled: true,
            track_groq_timeout_ms: 1200,
            track_groq_max_retries: 1,
            track_groq_cache_ttl_days: 14,
            track_cb_threshold: 5,
            track_cb_window_sec: 300,
            track_cb_cooldown_sec: 60,

            rerank_after_enrichment: true,
            rerank_delay_ms: 15_000,
        }
    }
}

impl SourcingConfig {
    /// Load configuration from environment variables, clamping every value
    /// to its documented range.
    pub fn from_env() -> Self {
        let d = Self::default();

        Self {
            target_count: env_usize("TARGET_COUNT", d.target_count).max(1),
            min_good_enough: env_usize("MIN_GOOD_ENOUGH", d.min_good_enough),
            job_max_enrich: env_usize("JOB_MAX_ENRICH", d.job_max_enrich),
            initial_enrich_count: env_usize("INITIAL_ENRICH_COUNT", d.initial_enrich_count),

            max_serp_queries: env_usize("MAX_SERP_QUERIES", d.max_serp_queries).max(1),
            daily_serp_cap_per_tenant: env_i64(
                "SOURCE_DAILY_SERP_CAP_PER_TENANT",
                d.daily_serp_cap_per_tenant,
            ),
            dynamic_query_multiplier: env_usize(
                "SOURCE_DYNAMIC_QUERY_MULTIPLIER",
                d.dynamic_query_multiplier,
            )
            .clamp(1, 5),
            min_discovery_per_run: env_usize("SOURCE_MIN_DISCOVERY_PER_RUN", d.min_discovery_per_run),
            max_discovery_share: env_share("SOURCE_MAX_DISCOVERY_SHARE", d.max_discovery_share),
            min_discovery_share_low_quality: env_share(
                "SOURCE_MIN_DISCOVERY_SHARE_LOW_QUALITY",
                d.min_discovery_share_low_quality,
            ),
            min_discovered_in_output: env_usize(
                "SOURCE_MIN_DISCOVERED_IN_OUTPUT",
                d.min_discovered_in_output,
            ),
            discovered_promotion_min_fit_score: env_share(
                "SOURCE_DISCOVERED_PROMOTION_MIN_FIT_SCORE",
                d.discovered_promotion_min_fit_score,
            ),

            quality_top_k: env_usize("SOURCE_QUALITY_TOP_K", d.quality_top_k).max(1),
            quality_min_avg_fit: env_share("SOURCE_QUALITY_MIN_AVG_FIT", d.quality_min_avg_fit),
            quality_threshold: env_share("SOURCE_QUALITY_THRESHOLD", d.quality_threshold),
            quality_min_count_above: env_usize(
                "SOURCE_QUALITY_MIN_COUNT_ABOVE",
                d.quality_min_count_above,
            ),
            min_strict_matches_before_expand: env_usize(
                "SOURCE_MIN_STRICT_MATCHES_BEFORE_EXPAND",
                d.min_strict_matches_before_expand,
            ),

            best_matches_min_fit_score: env_share(
                "SOURCE_BEST_MATCHES_MIN_FIT_SCORE",
                d.best_matches_min_fit_score,
            ),
            strict_rescue_count: env_usize("SOURCE_STRICT_RESCUE_COUNT", d.strict_rescue_count),
            strict_rescue_min_fit_score: env_share(
                "SOURCE_STRICT_RESCUE_MIN_FIT_SCORE",
                d.strict_rescue_min_fit_score,
            ),
            fit_score_epsilon: env_share("SOURCE_FIT_SCORE_EPSILON", d.fit_score_epsilon),
            location_boost_weight: env_share("SOURCE_LOCATION_BOOST_WEIGHT", d.location_boost_weight),

            country_guard_enabled: env_bool("SOURCE_COUNTRY_GUARD_ENABLED", d.country_guard_enabled),
            country_guard_serp_locale_enabled: env_bool(
                "SOURCE_COUNTRY_GUARD_SERP_LOCALE_ENABLED",
                d.country_guard_serp_locale_enabled,
            ),
            location_coverage_floor: env_share(
                "SOURCE_LOCATION_COVERAGE_FLOOR",
                d.location_coverage_floor,
            ),
            snapshot_stale_days: env_i64("SNAPSHOT_STALE_DAYS", d.snapshot_stale_days).max(1),
            stale_refresh_max_per_run: env_usize(
                "STALE_REFRESH_MAX_PER_RUN",
                d.stale_refresh_max_per_run,
            ),
            discovered_enrich_reserve: env_usize(
                "SOURCE_DISCOVERED_ENRICH_RESERVE",
                d.discovered_enrich_reserve,
            ),
            discovered_orphan_enrich_reserve: env_usize(
                "SOURCE_DISCOVERED_ORPHAN_ENRICH_RESERVE",
                d.discovered_orphan_enrich_reserve,
            ),

            novelty_enabled: env_bool("SOURCE_NOVELTY_ENABLED", d.novelty_enabled),
            novelty_window_days: env_i64("SOURCE_NOVELTY_WINDOW_DAYS", d.novelty_window_days).max(1),

            query_gen_mode: std::env::var("SOURCING_QUERY_GEN_MODE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(d.query_gen_mode),
            query_groq_timeout_ms: env_u64("SOURCING_QUERY_GROQ_TIMEOUT_MS", d.query_groq_timeout_ms)
                .max(1),
            query_groq_max_retries: env_u32(
                "SOURCING_QUERY_GROQ_MAX_RETRIES",
                d.query_groq_max_retries,
            ),
            adaptive_min_strict_attempts: env_usize(
                "SOURCING_ADAPTIVE_MIN_STRICT_ATTEMPTS",
                d.adaptive_min_strict_attempts,
            )
            .max(1),
            adaptive_strict_min_yield: env_share(
                "SOURCING_ADAPTIVE_STRICT_MIN_YIELD",
                d.adaptive_strict_min_yield,
            ),
            adaptive_min_fallback_attempts: env_usize(
                "SOURCING_ADAPTIVE_MIN_FALLBACK_ATTEMPTS",
                d.adaptive_min_fallback_attempts,
            )
            .max(1),
            adaptive_fallback_min_yield: env_share(
                "SOURCING_ADAPTIVE_FALLBACK_MIN_YIELD",
                d.adaptive_fallback_min_yield,
            ),

            track_classifier_version: std::env::var("TRACK_CLASSIFIER_VERSION")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(d.track_classifier_version),
            track_low_conf_threshold: env_share(
                "TRACK_LOW_CONF_THRESHOLD",
                d.track_low_conf_threshold,
            ),
            track_blend_threshold: env_share("TRACK_BLEND_THRESHOLD", d.track_blend_threshold),
            track_groq_enabled: env_bool("TRACK_GROQ_ENABLED", d.track_groq_enabled),
            track_groq_timeout_ms: env_u64("TRACK_GROQ_TIMEOUT_MS", d.track_groq_timeout_ms).max(1),
            track_groq_max_retries: env_u32("TRACK_GROQ_MAX_RETRIES", d.track_groq_max_retries),
            track_groq_cache_ttl_days: env_i64(
                "TRACK_GROQ_CACHE_TTL_DAYS",
                d.track_groq_cache_ttl_days,
            )
            .max(1),
            track_cb_threshold: env_u32("TRACK_CB_THRESHOLD", d.track_cb_threshold).max(1),
            track_cb_window_sec: env_u64("TRACK_CB_WINDOW_SEC", d.track_cb_window_sec).max(1),
            track_cb_cooldown_sec: env_u64("TRACK_CB_COOLDOWN_SEC", d.track_cb_cooldown_sec).max(1),

            rerank_after_enrichment: env_bool("RERANK_AFTER_ENRICHMENT", d.rerank_after_enrichment),
            rerank_delay_ms: env_u64("RERANK_DELAY_MS", d.rerank_delay_ms),
        }
    }
}

/// Worker process settings (queue concurrency, health port, sweeper).
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub port: u16,
    pub callback_redelivery_enabled: bool,
    pub callback_redelivery_interval_minutes: u64,
    pub callback_redelivery_max_age_minutes: i64,
    pub callback_redelivery_batch_size: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 2,
            port: 8080,
            callback_redelivery_enabled: true,
            callback_redelivery_interval_minutes: 10,
            callback_redelivery_max_age_minutes: 30,
            callback_redelivery_batch_size: 50,
        }
    }
}

impl WorkerSettings {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            concurrency: env_usize("SOURCING_WORKER_CONCURRENCY", d.concurrency).max(1),
            port: env_u64("PORT", d.port as u64).min(u16::MAX as u64) as u16,
            callback_redelivery_enabled: env_bool(
                "SOURCING_CALLBACK_REDELIVERY_ENABLED",
                d.callback_redelivery_enabled,
            ),
            callback_redelivery_interval_minutes: env_u64(
                "SOURCING_CALLBACK_REDELIVERY_INTERVAL_MINUTES",
                d.callback_redelivery_interval_minutes,
            )
            .max(1),
            callback_redelivery_max_age_minutes: env_i64(
                "SOURCING_CALLBACK_REDELIVERY_MAX_AGE_MINUTES",
                d.callback_redelivery_max_age_minutes,
            )
            .max(1),
            callback_redelivery_batch_size: env_usize(
                "SOURCING_CALLBACK_REDELIVERY_BATCH_SIZE",
                d.callback_redelivery_batch_size,
            )
            .max(1),
        }
    }
}

/// Connection strings and key material, read separately from tuning knobs.
#[derive(Debug, Clone)]
pub struct Secrets {
    pub redis_url: String,
    pub database_url: String,
    pub jwt_private_key: Option<String>,
    pub jwt_active_kid: String,
    pub groq_api_key: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            database_url: std::env::var("DATABASE_URL").unwrap_or_default(),
            jwt_private_key: std::env::var("SIGNAL_JWT_PRIVATE_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            jwt_active_kid: std::env::var("SIGNAL_JWT_ACTIVE_KID")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "v1".to_string()),
            groq_api_key: std::env::var("GROQ_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Fractional shares clamp to [0, 1].
fn env_share(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .map(|v| v.clamp(0.0, 1.0))
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SourcingConfig::default();
        assert_eq!(config.target_count, 100);
        assert_eq!(config.track_blend_threshold, 0.15);
        assert_eq!(config.track_cb_threshold, 5);
        assert_eq!(config.track_cb_cooldown_sec, 60);
        assert_eq!(config.track_groq_timeout_ms, 1200);
        assert_eq!(config.query_groq_timeout_ms, 1500);
        assert_eq!(config.query_gen_mode, QueryGenMode::Deterministic);
    }

    #[test]
    fn test_multiplier_clamped() {
        std::env::set_var("SOURCE_DYNAMIC_QUERY_MULTIPLIER", "9");
        let config = SourcingConfig::from_env();
        assert_eq!(config.dynamic_query_multiplier, 5);
        std::env::remove_var("SOURCE_DYNAMIC_QUERY_MULTIPLIER");
    }

    #[test]
    fn test_share_clamped() {
        std::env::set_var("SOURCE_MAX_DISCOVERY_SHARE", "1.7");
        let config = SourcingConfig::from_env();
        assert_eq!(config.max_discovery_share, 1.0);
        std::env::remove_var("SOURCE_MAX_DISCOVERY_SHARE");
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        std::env::set_var("TARGET_COUNT", "not-a-number");
        let config = SourcingConfig::from_env();
        assert_eq!(config.target_count, 100);
        std::env::remove_var("TARGET_COUNT");
    }

    #[test]
    fn test_query_gen_mode_parse() {
        assert_eq!("hybrid".parse::<QueryGenMode>(), Ok(QueryGenMode::Hybrid));
        assert_eq!(
            "Deterministic".parse::<QueryGenMode>(),
            Ok(QueryGenMode::Deterministic)
        );
        assert!("llm-only".parse::<QueryGenMode>().is_err());
    }

    #[test]
    fn test_worker_settings_defaults() {
        let settings = WorkerSettings::default();
        assert_eq!(settings.concurrency, 2);
        assert_eq!(settings.callback_redelivery_interval_minutes, 10);
        assert_eq!(settings.callback_redelivery_max_age_minutes, 30);
        assert_eq!(settings.callback_redelivery_batch_size, 50);
    }
}

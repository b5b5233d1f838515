//! Configuration management via environment variables
//!
//! Provides helper functions for reading environment variables with fallback
//! to deprecated variable names with warning logs, and the tuning knobs of the
//! circuit breaker, metrics windows and admission queues.

use std::time::Duration;

use crate::common::error::{CommonError, CommonResult};

/// Get an environment variable with fallback to a deprecated name
///
/// If the new variable name is set, returns its value.
/// If only the old (deprecated) variable name is set, returns its value
/// and logs a deprecation warning.
///
/// # Example
/// ```
/// use llm_orchestrator::config::get_env_with_fallback;
///
/// let threshold = get_env_with_fallback("LLM_ORCH_BREAKER_THRESHOLD", "CIRCUIT_BREAKER_THRESHOLD");
/// ```
pub fn get_env_with_fallback(new_name: &str, old_name: &str) -> Option<String> {
    if let Ok(val) = std::env::var(new_name) {
        return Some(val);
    }
    if let Ok(val) = std::env::var(old_name) {
        tracing::warn!(
            "Environment variable '{}' is deprecated, use '{}' instead",
            old_name,
            new_name
        );
        return Some(val);
    }
    None
}

/// Get an environment variable with fallback and default value
pub fn get_env_with_fallback_or(new_name: &str, old_name: &str, default: &str) -> String {
    get_env_with_fallback(new_name, old_name).unwrap_or_else(|| default.to_string())
}

/// Get an environment variable with fallback, parsing to a specific type
///
/// Returns `default` when neither variable is set or parsing fails.
pub fn get_env_with_fallback_parse<T: std::str::FromStr>(
    new_name: &str,
    old_name: &str,
    default: T,
) -> T {
    get_env_with_fallback(new_name, old_name)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// サーキットブレーカー設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerConfig {
    /// Closed → Open に遷移する連続失敗回数
    pub failure_threshold: u32,
    /// 初回Open時のクールダウン
    pub cooldown: Duration,
    /// 指数バックオフ後のクールダウン上限
    pub max_cooldown: Duration,
    /// 再Open時にクールダウンへ掛ける倍率（1.0で固定クールダウン）
    pub backoff_multiplier: f64,
    /// HalfOpen中に同時に許可するプローブ数
    pub half_open_max_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            half_open_max_probes: 1,
        }
    }
}

impl BreakerConfig {
    /// Load breaker configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            failure_threshold: get_env_with_fallback_parse(
                "LLM_ORCH_BREAKER_THRESHOLD",
                "CIRCUIT_BREAKER_THRESHOLD",
                defaults.failure_threshold,
            ),
            cooldown: Duration::from_secs(get_env_with_fallback_parse(
                "LLM_ORCH_BREAKER_COOLDOWN_SECS",
                "CIRCUIT_BREAKER_COOLDOWN_SECS",
                defaults.cooldown.as_secs(),
            )),
            max_cooldown: Duration::from_secs(get_env_with_fallback_parse(
                "LLM_ORCH_BREAKER_MAX_COOLDOWN_SECS",
                "CIRCUIT_BREAKER_MAX_COOLDOWN_SECS",
                defaults.max_cooldown.as_secs(),
            )),
            backoff_multiplier: get_env_with_fallback_parse(
                "LLM_ORCH_BREAKER_BACKOFF_MULTIPLIER",
                "CIRCUIT_BREAKER_BACKOFF_MULTIPLIER",
                defaults.backoff_multiplier,
            ),
            half_open_max_probes: get_env_with_fallback_parse(
                "LLM_ORCH_BREAKER_HALF_OPEN_PROBES",
                "CIRCUIT_BREAKER_HALF_OPEN_PROBES",
                defaults.half_open_max_probes,
            ),
        }
    }

    /// 連続失敗閾値を指定して返す
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// クールダウンを指定して返す
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// クールダウン上限を指定して返す
    pub fn with_max_cooldown(mut self, max_cooldown: Duration) -> Self {
        self.max_cooldown = max_cooldown;
        self
    }

    /// バックオフ倍率を指定して返す
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// HalfOpen時のプローブ数を指定して返す
    pub fn with_half_open_max_probes(mut self, probes: u32) -> Self {
        self.half_open_max_probes = probes;
        self
    }

    fn validate(&self) -> CommonResult<()> {
        if self.failure_threshold == 0 {
            return Err(CommonError::Config(
                "breaker failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.half_open_max_probes == 0 {
            return Err(CommonError::Config(
                "breaker half_open_max_probes must be at least 1".to_string(),
            ));
        }
        if self.cooldown.is_zero() {
            return Err(CommonError::Config(
                "breaker cooldown must be greater than zero".to_string(),
            ));
        }
        if self.max_cooldown < self.cooldown {
            return Err(CommonError::Config(
                "breaker max_cooldown must not be shorter than cooldown".to_string(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(CommonError::Config(
                "breaker backoff_multiplier must be a finite value >= 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// メトリクス時間窓の設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsConfig {
    /// 直近ウィンドウのバケット幅
    pub bucket_duration: Duration,
    /// 直近ウィンドウのバケット数
    pub bucket_count: usize,
    /// 長期履歴のバケット幅
    pub history_bucket_duration: Duration,
    /// 長期履歴のバケット数
    pub history_bucket_count: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            bucket_duration: Duration::from_secs(10),
            bucket_count: 6,
            history_bucket_duration: Duration::from_secs(60),
            history_bucket_count: 60,
        }
    }
}

impl MetricsConfig {
    /// Load metrics window configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bucket_duration: Duration::from_secs(get_env_with_fallback_parse(
                "LLM_ORCH_METRICS_BUCKET_SECS",
                "METRICS_BUCKET_SECS",
                defaults.bucket_duration.as_secs(),
            )),
            bucket_count: get_env_with_fallback_parse(
                "LLM_ORCH_METRICS_BUCKET_COUNT",
                "METRICS_BUCKET_COUNT",
                defaults.bucket_count,
            ),
            history_bucket_duration: Duration::from_secs(get_env_with_fallback_parse(
                "LLM_ORCH_HISTORY_BUCKET_SECS",
                "HISTORY_BUCKET_SECS",
                defaults.history_bucket_duration.as_secs(),
            )),
            history_bucket_count: get_env_with_fallback_parse(
                "LLM_ORCH_HISTORY_BUCKET_COUNT",
                "HISTORY_BUCKET_COUNT",
                defaults.history_bucket_count,
            ),
        }
    }

    /// 直近ウィンドウ全体の長さ
    pub fn window_duration(&self) -> Duration {
        self.bucket_duration
            .saturating_mul(u32::try_from(self.bucket_count).unwrap_or(u32::MAX))
    }

    fn validate(&self) -> CommonResult<()> {
        if self.bucket_duration.as_millis() == 0 || self.history_bucket_duration.as_millis() == 0
        {
            return Err(CommonError::Config(
                "metrics bucket durations must be at least 1ms".to_string(),
            ));
        }
        if self.bucket_count == 0 || self.history_bucket_count == 0 {
            return Err(CommonError::Config(
                "metrics bucket counts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Admission queue configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// サーバー×モデルごとの同時受け入れ上限
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

impl QueueConfig {
    /// Load queue configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            capacity: get_env_with_fallback_parse(
                "LLM_ORCH_QUEUE_CAPACITY",
                "QUEUE_CAPACITY",
                Self::default().capacity,
            ),
        }
    }

    fn validate(&self) -> CommonResult<()> {
        if self.capacity == 0 {
            return Err(CommonError::Config(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// オーケストレーター全体の設定
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OrchestratorConfig {
    /// サーキットブレーカー設定
    pub breaker: BreakerConfig,
    /// メトリクス設定
    pub metrics: MetricsConfig,
    /// キュー設定
    pub queue: QueueConfig,
}

impl OrchestratorConfig {
    /// 環境変数から設定を読み込む
    pub fn from_env() -> Self {
        Self {
            breaker: BreakerConfig::from_env(),
            metrics: MetricsConfig::from_env(),
            queue: QueueConfig::from_env(),
        }
    }

    /// 設定値の整合性を検証する
    pub fn validate(&self) -> CommonResult<()> {
        self.breaker.validate()?;
        self.metrics.validate()?;
        self.queue.validate()?;
        Ok(())
    }
}

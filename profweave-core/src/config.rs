//! Profiling configuration
//!
//! ## Configuration Sources (in precedence order)
//!
//! 1. `PROFWEAVE_*` environment variables
//! 2. A YAML (`.yml`/`.yaml`) or JSON (`.json`) options file
//! 3. Built-in defaults
//!
//! ```yaml
//! max_profile_duration_ms: 30000
//! chunk_interval_ms: 5000
//! profile_queue_capacity: 50
//! profiles_sample_rate: 1.0
//! ```
//!
//! Leaving `profiles_sample_rate` unset (or zero) without a programmatic
//! sampler selects continuous chunked profiling; anything else selects
//! span-scoped profiling.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ProfilingError, Result};

pub const ENV_MAX_PROFILE_DURATION_MS: &str = "PROFWEAVE_MAX_PROFILE_DURATION_MS";
pub const ENV_CHUNK_INTERVAL_MS: &str = "PROFWEAVE_CHUNK_INTERVAL_MS";
pub const ENV_PROFILE_QUEUE_CAPACITY: &str = "PROFWEAVE_PROFILE_QUEUE_CAPACITY";
pub const ENV_PROFILES_SAMPLE_RATE: &str = "PROFWEAVE_PROFILES_SAMPLE_RATE";

/// Serializable profiling options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilingOptions {
    /// Hard cap on a single span-scoped capture
    #[serde(default = "default_max_profile_duration_ms")]
    pub max_profile_duration_ms: u64,

    /// Length of one continuous-mode chunk
    #[serde(default = "default_chunk_interval_ms")]
    pub chunk_interval_ms: u64,

    /// Number of captured-but-unsent profiles kept before LRU eviction
    #[serde(default = "default_profile_queue_capacity")]
    pub profile_queue_capacity: usize,

    /// Probability that a sampled root span is also profiled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles_sample_rate: Option<f64>,

    /// Profiles with fewer samples than this are discarded
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

impl Default for ProfilingOptions {
    fn default() -> Self {
        Self {
            max_profile_duration_ms: default_max_profile_duration_ms(),
            chunk_interval_ms: default_chunk_interval_ms(),
            profile_queue_capacity: default_profile_queue_capacity(),
            profiles_sample_rate: None,
            min_samples: default_min_samples(),
            release: None,
            environment: None,
        }
    }
}

fn default_max_profile_duration_ms() -> u64 {
    30_000
}

fn default_chunk_interval_ms() -> u64 {
    5_000
}

fn default_profile_queue_capacity() -> usize {
    50
}

fn default_min_samples() -> usize {
    2
}

impl ProfilingOptions {
    /// Load options from a YAML or JSON file, picked by extension.
    ///
    /// A missing file yields the defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No profiling options file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let options = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content)?,
            Some("yml") | Some("yaml") => Self::from_yaml_str(&content)?,
            other => {
                return Err(ProfilingError::Config(format!(
                    "Unsupported options file extension: {other:?}"
                )))
            }
        };

        debug!("Loaded profiling options from {:?}", path);
        Ok(options)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Apply `PROFWEAVE_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_with(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_override::<u64>(&lookup, ENV_MAX_PROFILE_DURATION_MS) {
            self.max_profile_duration_ms = v;
        }
        if let Some(v) = parse_override::<u64>(&lookup, ENV_CHUNK_INTERVAL_MS) {
            self.chunk_interval_ms = v;
        }
        if let Some(v) = parse_override::<usize>(&lookup, ENV_PROFILE_QUEUE_CAPACITY) {
            self.profile_queue_capacity = v;
        }
        if let Some(v) = parse_override::<f64>(&lookup, ENV_PROFILES_SAMPLE_RATE) {
            self.profiles_sample_rate = Some(v);
        }
    }

    /// Reject option combinations the coordinators cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_profile_duration_ms == 0 {
            return Err(ProfilingError::Config(
                "max_profile_duration_ms must be greater than zero".into(),
            ));
        }
        if self.chunk_interval_ms == 0 {
            return Err(ProfilingError::Config(
                "chunk_interval_ms must be greater than zero".into(),
            ));
        }
        if self.profile_queue_capacity == 0 {
            return Err(ProfilingError::Config(
                "profile_queue_capacity must be greater than zero".into(),
            ));
        }
        if let Some(rate) = self.profiles_sample_rate {
            if !is_valid_sample_rate(rate) {
                return Err(ProfilingError::Config(format!(
                    "profiles_sample_rate must be between 0 and 1 (got {rate})"
                )));
            }
        }
        Ok(())
    }

    pub fn max_profile_duration(&self) -> Duration {
        Duration::from_millis(self.max_profile_duration_ms)
    }

    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms)
    }

    /// Queue capacity, clamped to at least one entry
    pub fn queue_capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.profile_queue_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

fn parse_override<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(value) => {
            debug!("Applying {} override", name);
            Some(value)
        }
        Err(_) => {
            warn!("Ignoring invalid value for {}: {:?}", name, raw);
            None
        }
    }
}

/// A sample rate is usable when it is a finite number in `[0, 1]`.
pub fn is_valid_sample_rate(rate: f64) -> bool {
    rate.is_finite() && (0.0..=1.0).contains(&rate)
}

/// Inputs handed to a programmatic profiles sampler
#[derive(Debug, Clone)]
pub struct SamplingContext {
    pub name: String,
    pub trace_id: String,
    pub parent_sampled: Option<bool>,
}

/// Returns the probability that the described root span gets profiled
pub type ProfilesSampler = Arc<dyn Fn(&SamplingContext) -> f64 + Send + Sync>;

/// Which profiling mode an integration runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfilingMode {
    /// Capture only while a root span is active
    SpanScoped,
    /// Capture in fixed-length chunks regardless of spans
    Continuous,
}

/// Client-level options: the serializable part plus the optional sampler
#[derive(Clone, Default)]
pub struct ClientOptions {
    pub profiling: ProfilingOptions,
    pub profiles_sampler: Option<ProfilesSampler>,
}

impl ClientOptions {
    pub fn new(profiling: ProfilingOptions) -> Self {
        Self {
            profiling,
            profiles_sampler: None,
        }
    }

    pub fn with_sampler(mut self, sampler: ProfilesSampler) -> Self {
        self.profiles_sampler = Some(sampler);
        self
    }

    /// Unset or zero sample rate and no sampler means continuous profiling.
    pub fn profiling_mode(&self) -> ProfilingMode {
        let has_rate = matches!(self.profiling.profiles_sample_rate, Some(rate) if rate != 0.0);
        if has_rate || self.profiles_sampler.is_some() {
            ProfilingMode::SpanScoped
        } else {
            ProfilingMode::Continuous
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("profiling", &self.profiling)
            .field("profiles_sampler", &self.profiles_sampler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let options = ProfilingOptions::default();
        assert_eq!(options.max_profile_duration_ms, 30_000);
        assert_eq!(options.chunk_interval_ms, 5_000);
        assert_eq!(options.profile_queue_capacity, 50);
        assert_eq!(options.min_samples, 2);
        assert!(options.profiles_sample_rate.is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_yaml_partial_uses_defaults() {
        let options = ProfilingOptions::from_yaml_str("chunk_interval_ms: 1000\n").unwrap();
        assert_eq!(options.chunk_interval_ms, 1000);
        assert_eq!(options.profile_queue_capacity, 50);
    }

    #[test]
    fn test_json_parsing() {
        let options = ProfilingOptions::from_json_str(
            r#"{"profiles_sample_rate": 0.5, "release": "app@1.2.3"}"#,
        )
        .unwrap();
        assert_eq!(options.profiles_sample_rate, Some(0.5));
        assert_eq!(options.release.as_deref(), Some("app@1.2.3"));
    }

    #[test]
    fn test_load_missing_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let options = ProfilingOptions::load_from_file(&dir.path().join("absent.yml")).unwrap();
        assert_eq!(options, ProfilingOptions::default());
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.toml");
        std::fs::write(&path, "chunk_interval_ms = 1").unwrap();
        assert!(matches!(
            ProfilingOptions::load_from_file(&path),
            Err(ProfilingError::Config(_))
        ));
    }

    #[test]
    fn test_overrides_ignore_garbage() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_CHUNK_INTERVAL_MS, "250"),
            (ENV_PROFILE_QUEUE_CAPACITY, "lots"),
            (ENV_PROFILES_SAMPLE_RATE, "0.25"),
        ]);
        let mut options = ProfilingOptions::default();
        options.apply_overrides_with(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(options.chunk_interval_ms, 250);
        assert_eq!(options.profile_queue_capacity, 50);
        assert_eq!(options.profiles_sample_rate, Some(0.25));
    }

    #[test]
    fn test_validation_rejects_zero_and_bad_rates() {
        let zero_capacity = ProfilingOptions {
            profile_queue_capacity: 0,
            ..Default::default()
        };
        assert!(zero_capacity.validate().is_err());

        let zero_interval = ProfilingOptions {
            chunk_interval_ms: 0,
            ..Default::default()
        };
        assert!(zero_interval.validate().is_err());

        let bad_rate = ProfilingOptions {
            profiles_sample_rate: Some(1.5),
            ..Default::default()
        };
        assert!(bad_rate.validate().is_err());

        assert!(!is_valid_sample_rate(f64::NAN));
    }

    #[test]
    fn test_mode_selection() {
        let mut options = ClientOptions::default();
        assert_eq!(options.profiling_mode(), ProfilingMode::Continuous);

        options.profiling.profiles_sample_rate = Some(0.0);
        assert_eq!(options.profiling_mode(), ProfilingMode::Continuous);

        options.profiling.profiles_sample_rate = Some(0.1);
        assert_eq!(options.profiling_mode(), ProfilingMode::SpanScoped);

        let sampled = ClientOptions::default().with_sampler(Arc::new(|_| 1.0));
        assert_eq!(sampled.profiling_mode(), ProfilingMode::SpanScoped);
    }
}

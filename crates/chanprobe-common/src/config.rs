//! ---
//! probe_section: "03-configuration"
//! probe_subsection: "module"
//! probe_type: "source"
//! probe_scope: "code"
//! probe_description: "Shared configuration and logging primitives."
//! probe_version: "v0.1.0"
//! probe_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

fn default_gateway_url() -> Url {
    "ws://centrifugo:8000/connection/websocket"
        .parse()
        .expect("valid default gateway url")
}

fn default_connect_timeout() -> Duration {
    Duration::from_millis(5_000)
}

fn default_namespace() -> String {
    "testdb".to_owned()
}

fn default_collection() -> String {
    "testcoll".to_owned()
}

fn default_data_purpose() -> String {
    "integration-tests".to_owned()
}

fn default_nodata_purpose() -> String {
    "nodata".to_owned()
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_collection_timeout() -> Duration {
    Duration::from_millis(10_000)
}

fn default_integer_rule() -> RangeRuleConfig {
    RangeRuleConfig {
        lower: 150.0,
        upper: 160.0,
        mandatory_in_snapshot: true,
    }
}

fn default_float_rule() -> RangeRuleConfig {
    RangeRuleConfig {
        lower: 32.0,
        upper: 35.0,
        mandatory_in_snapshot: true,
    }
}

fn default_timestamp_fields() -> Vec<String> {
    vec!["first".to_owned(), "second".to_owned()]
}

fn default_mandatory() -> bool {
    true
}

fn default_count_minimum() -> usize {
    6
}

fn default_coverage_minimum() -> usize {
    4
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for a probe run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProbeConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub scenario: ScenarioConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where a [`ProbeConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedProbeConfig {
    pub config: ProbeConfig,
    /// `None` when the built-in defaults were used.
    pub source: Option<PathBuf>,
}

impl ProbeConfig {
    pub const ENV_CONFIG_PATH: &str = "CHANPROBE_CONFIG";

    /// Load configuration from disk, respecting the `CHANPROBE_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    ///
    /// When no candidate exists the built-in scenario defaults are used; the
    /// probe is expected to run against ad-hoc gateways with nothing but CLI
    /// overrides.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedProbeConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedProbeConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedProbeConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!("no configuration file found; using built-in defaults");
        Ok(LoadedProbeConfig {
            config: Self::default(),
            source: None,
        })
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<ProbeConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.channels.validate()?;
        self.scenario.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for ProbeConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: ProbeConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Connection settings for the messaging gateway under test.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub url: Url,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_connect_timeout", rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// Separator between namespace and collection in channel names.
///
/// Both `testdb.testcoll:<purpose>` and `testdb-testcoll:<purpose>` are in
/// use across gateway deployments; which one applies is deployment
/// configuration, not something the probe infers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Separator {
    #[default]
    Dot,
    Hyphen,
}

impl Separator {
    pub fn as_char(self) -> char {
        match self {
            Separator::Dot => '.',
            Separator::Hyphen => '-',
        }
    }
}

/// Channel naming settings: `<namespace><sep><collection>:<purpose>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub separator: Separator,
    #[serde(default = "default_data_purpose")]
    pub data_purpose: String,
    #[serde(default = "default_nodata_purpose")]
    pub nodata_purpose: String,
}

impl ChannelsConfig {
    /// Full name of the channel expected to stream publications.
    pub fn data_channel(&self) -> String {
        self.channel(&self.data_purpose)
    }

    /// Full name of the channel declared to carry no data.
    pub fn nodata_channel(&self) -> String {
        self.channel(&self.nodata_purpose)
    }

    fn channel(&self, purpose: &str) -> String {
        format!(
            "{}{}{}:{}",
            self.namespace,
            self.separator.as_char(),
            self.collection,
            purpose
        )
    }

    pub fn validate(&self) -> Result<()> {
        for (label, value) in [
            ("namespace", &self.namespace),
            ("collection", &self.collection),
            ("data_purpose", &self.data_purpose),
            ("nodata_purpose", &self.nodata_purpose),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("channels.{} must not be empty", label));
            }
        }
        if self.data_purpose == self.nodata_purpose {
            return Err(anyhow!(
                "channels.data_purpose and channels.nodata_purpose must differ"
            ));
        }
        Ok(())
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            collection: default_collection(),
            separator: Separator::default(),
            data_purpose: default_data_purpose(),
            nodata_purpose: default_nodata_purpose(),
        }
    }
}

/// Wire shape of snapshot/publication payloads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PayloadShape {
    /// `{integer, float, ts: {first, second}}`
    Flat,
    /// `{val: {integer, float}, ts: {first, second}}`
    #[default]
    Nested,
}

/// How the probe decides that enough publications have been collected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SufficiencyConfig {
    /// Total buffered publications must reach `minimum`.
    Count {
        #[serde(default = "default_count_minimum")]
        minimum: usize,
    },
    /// Every tracked optional field must appear in at least `minimum`
    /// buffered publications.
    Coverage {
        #[serde(default = "default_coverage_minimum")]
        minimum: usize,
    },
}

impl Default for SufficiencyConfig {
    fn default() -> Self {
        SufficiencyConfig::Coverage {
            minimum: default_coverage_minimum(),
        }
    }
}

/// Inclusive numeric range rule for a payload field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RangeRuleConfig {
    pub lower: f64,
    pub upper: f64,
    #[serde(default = "default_mandatory")]
    pub mandatory_in_snapshot: bool,
}

/// Timestamp fields nested under the payload's `ts` object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimestampRuleConfig {
    #[serde(default = "default_timestamp_fields")]
    pub fields: Vec<String>,
    #[serde(default = "default_mandatory")]
    pub mandatory_in_snapshot: bool,
}

impl Default for TimestampRuleConfig {
    fn default() -> Self {
        Self {
            fields: default_timestamp_fields(),
            mandatory_in_snapshot: default_mandatory(),
        }
    }
}

/// Per-field validation rules for one scenario.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RulesConfig {
    #[serde(default = "default_integer_rule")]
    pub integer: RangeRuleConfig,
    #[serde(default = "default_float_rule")]
    pub float: RangeRuleConfig,
    #[serde(default)]
    pub timestamps: TimestampRuleConfig,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            integer: default_integer_rule(),
            float: default_float_rule(),
            timestamps: TimestampRuleConfig::default(),
        }
    }
}

/// One conformance scenario: payload shape, validation rules, sufficiency
/// predicate and collection window.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub shape: PayloadShape,
    #[serde(default)]
    pub sufficiency: SufficiencyConfig,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_poll_interval", rename = "poll_interval_ms")]
    pub poll_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_collection_timeout", rename = "timeout_ms")]
    pub timeout: Duration,
    #[serde(default)]
    pub rules: RulesConfig,
}

impl ScenarioConfig {
    pub fn validate(&self) -> Result<()> {
        let minimum = match &self.sufficiency {
            SufficiencyConfig::Count { minimum } | SufficiencyConfig::Coverage { minimum } => {
                *minimum
            }
        };
        if minimum == 0 {
            return Err(anyhow!("scenario.sufficiency.minimum must be positive"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("scenario.poll_interval_ms must be positive"));
        }
        if self.timeout < self.poll_interval {
            return Err(anyhow!(
                "scenario.timeout_ms must be at least scenario.poll_interval_ms"
            ));
        }
        if self.rules.integer.lower > self.rules.integer.upper {
            return Err(anyhow!("scenario.rules.integer bounds are inverted"));
        }
        if self.rules.float.lower > self.rules.float.upper {
            return Err(anyhow!("scenario.rules.float bounds are inverted"));
        }
        if self.rules.timestamps.fields.is_empty() {
            return Err(anyhow!(
                "scenario.rules.timestamps.fields must not be empty"
            ));
        }
        Ok(())
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            shape: PayloadShape::default(),
            sufficiency: SufficiencyConfig::default(),
            poll_interval: default_poll_interval(),
            timeout: default_collection_timeout(),
            rules: RulesConfig::default(),
        }
    }
}

/// Logging sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

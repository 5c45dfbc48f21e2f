use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::path::parse_path;

/// Top-level configuration for the rtcollect agent.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,

    /// Pipeline batching configuration.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Ingestion engine instances.
    #[serde(default)]
    pub inputs: InputsConfig,

    /// Processor chain, applied in list order.
    #[serde(default)]
    pub processors: Vec<ProcessorConfig>,

    /// Output sink configuration.
    #[serde(default)]
    pub outputs: OutputsConfig,
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Deserialize)]
pub struct HealthConfig {
    /// Listen address. Default: "127.0.0.1:9090".
    #[serde(default = "default_health_addr")]
    pub addr: String,

    /// Enable the health endpoint. Default: true.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Pipeline batching configuration.
#[derive(Debug, Deserialize)]
pub struct PipelineConfig {
    /// Maximum time between processor chain invocations. Default: 1s.
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Maximum measurements per batch. Default: 1000.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// Ingestion engine instances.
#[derive(Debug, Default, Deserialize)]
pub struct InputsConfig {
    /// Streaming RPC (gNMI) engine instances.
    #[serde(default)]
    pub gnmi: Vec<GnmiConfig>,

    /// Session XML-RPC (NETCONF) engine instances.
    #[serde(default)]
    pub netconf: Vec<NetconfConfig>,
}

/// One gNMI plugin instance: a set of devices sharing subscriptions.
#[derive(Debug, Clone, Deserialize)]
pub struct GnmiConfig {
    /// Device addresses as host:port.
    pub addresses: Vec<String>,

    /// Stream metadata credentials.
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,

    /// Requested encoding: proto, json, json_ietf or bytes. Default: proto.
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Optional subscription list prefix.
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub target: String,

    /// Reconnect delay after a transport failure. Default: 10s.
    #[serde(default = "default_redial", with = "humantime_serde")]
    pub redial: Duration,

    /// Ask the target to send only updates after the initial sync.
    #[serde(default)]
    pub updates_only: bool,

    /// Keep the full path as tag key instead of the short key form.
    #[serde(default)]
    pub long_tag: bool,

    /// Keep the full path as field key instead of the shortened form.
    #[serde(default)]
    pub long_field: bool,

    /// Decode 4-byte bytes values as IEEE-754 float32 (big endian).
    #[serde(default)]
    pub bytes_to_float: bool,

    /// Decode the vendor telemetry header extension into prefix tags.
    #[serde(default)]
    pub vendor_header: bool,

    /// Enable client-side TLS.
    #[serde(default)]
    pub enable_tls: bool,

    /// TLS material, used when enable_tls is set.
    #[serde(default)]
    pub tls: TlsConfig,

    /// Extra measurement-name aliases: name -> list of encoding paths.
    #[serde(default)]
    pub aliases: HashMap<String, Vec<String>>,

    /// Stream subscriptions.
    #[serde(default)]
    pub subscriptions: Vec<GnmiSubscription>,
}

/// TLS material for the gNMI transport.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub ca_file: String,
    #[serde(default)]
    pub cert_file: String,
    #[serde(default)]
    pub key_file: String,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

/// One gNMI subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct GnmiSubscription {
    /// Measurement name; defaults to the last path element.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub origin: String,
    pub path: String,

    /// Subscription mode: sample, on_change or target_defined.
    #[serde(default = "default_subscription_mode")]
    pub mode: String,

    #[serde(default = "default_sample_interval", with = "humantime_serde")]
    pub sample_interval: Duration,

    /// Suppress redundant transmissions when values are unchanged.
    #[serde(default)]
    pub suppress_redundant: bool,

    /// With suppression, send updates at least this often anyway.
    #[serde(default, with = "humantime_serde")]
    pub heartbeat_interval: Duration,
}

/// One NETCONF plugin instance.
#[derive(Debug, Clone, Deserialize)]
pub struct NetconfConfig {
    /// Device addresses; port 830 is implied.
    pub addresses: Vec<String>,

    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,

    /// Reconnect delay after a session failure. Default: 10s.
    #[serde(default = "default_redial", with = "humantime_serde")]
    pub redial: Duration,

    #[serde(default)]
    pub subscriptions: Vec<NetconfSubscription>,
}

/// One NETCONF RPC subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct NetconfSubscription {
    /// Measurement name for everything this RPC produces.
    pub name: String,

    /// XML RPC body, e.g. `<get-interface-information><statistics/></get-interface-information>`.
    pub rpc: String,

    /// Field specs as `xpath:type` with optional `[key]` loop markers.
    pub fields: Vec<String>,

    #[serde(default = "default_sample_interval", with = "humantime_serde")]
    pub sample_interval: Duration,
}

/// One processor chain entry. List order is chain order.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessorConfig {
    Rate(RateConfig),
    Jitter(JitterConfig),
    Monitoring(MonitoringConfig),
    Xmetrictags(XMetricTagsConfig),
    Filtering(FilteringConfig),
    Xreducer(XReducerConfig),
    Sum(SumConfig),
    Enrichment(EnrichmentConfig),
}

/// Rate derivation over counter fields.
#[derive(Debug, Clone, Deserialize)]
pub struct RateConfig {
    pub fields: Vec<String>,

    /// Unit factor applied to the per-second rate (bytes to bits = 8).
    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Appended to the source field name. Default: "_rate".
    #[serde(default = "default_rate_suffix")]
    pub suffix: String,

    /// Minimum elapsed time between samples before a rate is computed.
    #[serde(default, with = "humantime_serde")]
    pub delta_min: Duration,

    #[serde(default = "default_cache_period", with = "humantime_serde")]
    pub period: Duration,

    #[serde(default = "default_cache_retention", with = "humantime_serde")]
    pub retention: Duration,
}

/// Sample-spacing jitter detection.
#[derive(Debug, Clone, Deserialize)]
pub struct JitterConfig {
    pub fields: Vec<String>,

    /// Expected spacing between samples of one series.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Tolerated deviation before an exception measurement is emitted.
    #[serde(with = "humantime_serde")]
    pub jitter_max: Duration,

    #[serde(default = "default_cache_period", with = "humantime_serde")]
    pub period: Duration,

    #[serde(default = "default_cache_retention", with = "humantime_serde")]
    pub retention: Duration,
}

/// Threshold monitoring with alarm emission.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// Measurement name for emitted alarms. Default: "ALARMING".
    #[serde(default = "default_alarm_measurement")]
    pub measurement: String,

    /// Tag key carrying the alarm name. Default: "ALARM_TYPE".
    #[serde(default = "default_alarm_tag")]
    pub tag_name: String,

    #[serde(default = "default_cache_period", with = "humantime_serde")]
    pub period: Duration,

    #[serde(default = "default_cache_retention", with = "humantime_serde")]
    pub retention: Duration,

    #[serde(default)]
    pub probes: Vec<ProbeConfig>,
}

/// One monitoring probe.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    pub alarm_name: String,
    pub field: String,

    /// current, delta, delta_rate or delta_percent.
    pub probe_type: String,

    pub threshold: f64,

    /// Probe only fires when the current value is at least this.
    #[serde(default)]
    pub min_value: f64,

    /// lt, gt or eq.
    pub operator: String,

    /// Copy tags from the source measurement onto the alarm.
    #[serde(default)]
    pub copy_tag: bool,

    /// With copy_tag: empty list copies all tags, otherwise only these.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Cross-measurement tag carrying.
#[derive(Debug, Clone, Deserialize)]
pub struct XMetricTagsConfig {
    #[serde(default = "default_cache_period", with = "humantime_serde")]
    pub period: Duration,

    /// Rules tracking a field value.
    #[serde(default)]
    pub fields: Vec<XMetricRule>,

    /// Rules tracking a tag value.
    #[serde(default)]
    pub tags: Vec<XMetricRule>,
}

/// One xmetrictags rule.
#[derive(Debug, Clone, Deserialize)]
pub struct XMetricRule {
    pub track_key: String,
    pub tag_keys: Vec<String>,
    pub tag_name: String,

    #[serde(default = "default_cache_retention", with = "humantime_serde")]
    pub retention: Duration,
}

/// Regex filtering over tags and string fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilteringConfig {
    #[serde(default)]
    pub tags: Vec<FilterRule>,
    #[serde(default)]
    pub fields: Vec<FilterRule>,
}

/// One filter rule.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterRule {
    pub key: String,
    pub pattern: String,

    /// drop or accept.
    pub action: String,
}

/// Path shortening for tag and field keys.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct XReducerConfig {
    #[serde(default)]
    pub tags: Vec<KeyMatch>,
    #[serde(default)]
    pub fields: Vec<KeyMatch>,
}

/// A key selector; "all" matches every key.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyMatch {
    pub key: String,
}

/// Field summing.
#[derive(Debug, Clone, Deserialize)]
pub struct SumConfig {
    #[serde(default)]
    pub fields: Vec<SumRule>,
}

/// One sum rule.
#[derive(Debug, Clone, Deserialize)]
pub struct SumRule {
    pub sources: Vec<String>,
    pub target: String,
}

/// File-backed tag enrichment.
#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    /// Path to the JSON enrichment database.
    pub file_path: String,

    /// Use the second filtering level.
    #[serde(default)]
    pub two_levels: bool,

    /// Reload check cadence in minutes. Default: 60.
    #[serde(default = "default_refresh_period")]
    pub refresh_period: u64,

    pub level1_tag_key: String,

    #[serde(default)]
    pub level2_tag_keys: Vec<String>,
}

/// Output sink configuration.
#[derive(Debug, Default, Deserialize)]
pub struct OutputsConfig {
    #[serde(default)]
    pub stdout: StdoutOutputConfig,
}

/// Line-protocol writer on stdout.
#[derive(Debug, Default, Deserialize)]
pub struct StdoutOutputConfig {
    #[serde(default)]
    pub enabled: bool,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_health_addr() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_true() -> bool {
    true
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_batch_size() -> usize {
    1000
}

fn default_encoding() -> String {
    "proto".to_string()
}

fn default_redial() -> Duration {
    Duration::from_secs(10)
}

fn default_subscription_mode() -> String {
    "sample".to_string()
}

fn default_sample_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_factor() -> f64 {
    1.0
}

fn default_rate_suffix() -> String {
    "_rate".to_string()
}

fn default_cache_period() -> Duration {
    Duration::from_secs(300)
}

fn default_cache_retention() -> Duration {
    Duration::from_secs(3600)
}

fn default_alarm_measurement() -> String {
    "ALARMING".to_string()
}

fn default_alarm_tag() -> String {
    "ALARM_TYPE".to_string()
}

fn default_refresh_period() -> u64 {
    60
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            health: HealthConfig::default(),
            pipeline: PipelineConfig::default(),
            inputs: InputsConfig::default(),
            processors: Vec::new(),
            outputs: OutputsConfig::default(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            addr: default_health_addr(),
            enabled: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            flush_interval: default_flush_interval(),
            batch_size: default_batch_size(),
        }
    }
}

// --- Validation and loading ---

const ENCODINGS: &[&str] = &["proto", "json", "json_ietf", "bytes"];
const SUBSCRIPTION_MODES: &[&str] = &["sample", "on_change", "target_defined"];
const PROBE_TYPES: &[&str] = &["current", "delta", "delta_rate", "delta_percent"];
const OPERATORS: &[&str] = &["lt", "gt", "eq"];
const FILTER_ACTIONS: &[&str] = &["drop", "accept"];

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration. Start never runs on an invalid config.
    pub fn validate(&self) -> Result<()> {
        for (i, gnmi) in self.inputs.gnmi.iter().enumerate() {
            gnmi.validate().with_context(|| format!("inputs.gnmi[{i}]"))?;
        }

        for (i, nc) in self.inputs.netconf.iter().enumerate() {
            nc.validate()
                .with_context(|| format!("inputs.netconf[{i}]"))?;
        }

        for (i, proc) in self.processors.iter().enumerate() {
            proc.validate().with_context(|| format!("processors[{i}]"))?;
        }

        Ok(())
    }
}

impl GnmiConfig {
    fn validate(&self) -> Result<()> {
        if self.addresses.is_empty() {
            bail!("addresses must not be empty");
        }

        if self.redial.is_zero() {
            bail!("redial duration must be positive");
        }

        if !ENCODINGS.contains(&self.encoding.as_str()) {
            bail!("unsupported encoding {:?}", self.encoding);
        }

        parse_path(&self.origin, &self.prefix, &self.target).context("invalid prefix")?;

        if self.subscriptions.is_empty() {
            bail!("at least one subscription is required");
        }

        for sub in &self.subscriptions {
            parse_path(&sub.origin, &sub.path, "")
                .with_context(|| format!("invalid subscription path {:?}", sub.path))?;

            if !SUBSCRIPTION_MODES.contains(&sub.mode.as_str()) {
                bail!("invalid subscription mode {:?}", sub.mode);
            }
        }

        Ok(())
    }
}

impl NetconfConfig {
    fn validate(&self) -> Result<()> {
        if self.addresses.is_empty() {
            bail!("addresses must not be empty");
        }

        if self.redial.is_zero() {
            bail!("redial duration must be positive");
        }

        if self.subscriptions.is_empty() {
            bail!("at least one subscription is required");
        }

        for sub in &self.subscriptions {
            if sub.rpc.is_empty() {
                bail!("subscription {:?} has an empty rpc", sub.name);
            }

            if sub.sample_interval.is_zero() {
                bail!(
                    "subscription {:?} sample_interval must be positive",
                    sub.name
                );
            }

            for field in &sub.fields {
                if !field.contains(':') {
                    bail!("malformed field spec {field:?}, expected xpath:type");
                }
            }
        }

        Ok(())
    }
}

impl ProcessorConfig {
    fn validate(&self) -> Result<()> {
        match self {
            ProcessorConfig::Rate(c) => {
                if c.fields.is_empty() {
                    bail!("rate: fields must not be empty");
                }
            }
            ProcessorConfig::Jitter(c) => {
                if c.fields.is_empty() {
                    bail!("jitter: fields must not be empty");
                }
                if c.interval.is_zero() {
                    bail!("jitter: interval must be positive");
                }
            }
            ProcessorConfig::Monitoring(c) => {
                for probe in &c.probes {
                    if !PROBE_TYPES.contains(&probe.probe_type.as_str()) {
                        bail!("monitoring: invalid probe_type {:?}", probe.probe_type);
                    }
                    if !OPERATORS.contains(&probe.operator.as_str()) {
                        bail!("monitoring: invalid operator {:?}", probe.operator);
                    }
                }
            }
            ProcessorConfig::Xmetrictags(c) => {
                for rule in c.fields.iter().chain(c.tags.iter()) {
                    if rule.tag_keys.is_empty() {
                        bail!("xmetrictags: tag_keys must not be empty");
                    }
                }
            }
            ProcessorConfig::Filtering(c) => {
                for rule in c.tags.iter().chain(c.fields.iter()) {
                    if !FILTER_ACTIONS.contains(&rule.action.as_str()) {
                        bail!("filtering: invalid action {:?}", rule.action);
                    }
                }
            }
            ProcessorConfig::Enrichment(c) => {
                if c.file_path.is_empty() {
                    bail!("enrichment: file_path is required");
                }
                if c.level1_tag_key.is_empty() {
                    bail!("enrichment: level1_tag_key is required");
                }
            }
            ProcessorConfig::Xreducer(_) | ProcessorConfig::Sum(_) => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gnmi_base() -> GnmiConfig {
        serde_yaml::from_str(
            r#"
            addresses: ["10.0.0.1:57400"]
            subscriptions:
              - name: ifcounters
                path: /interfaces/interface/state/counters
                sample_interval: 10s
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert!(cfg.inputs.gnmi.is_empty());
        assert_eq!(cfg.pipeline.flush_interval, Duration::from_secs(1));
        assert_eq!(cfg.pipeline.batch_size, 1000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_gnmi_defaults() {
        let g = gnmi_base();
        assert_eq!(g.encoding, "proto");
        assert_eq!(g.redial, Duration::from_secs(10));
        assert_eq!(g.subscriptions[0].mode, "sample");
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_gnmi_rejects_zero_redial() {
        let mut g = gnmi_base();
        g.redial = Duration::ZERO;
        let err = g.validate().unwrap_err();
        assert!(err.to_string().contains("redial"));
    }

    #[test]
    fn test_gnmi_rejects_bad_encoding() {
        let mut g = gnmi_base();
        g.encoding = "xml".to_string();
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_gnmi_rejects_bad_path() {
        let mut g = gnmi_base();
        g.subscriptions[0].path = "interfaces/interface".to_string();
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_gnmi_rejects_bad_mode() {
        let mut g = gnmi_base();
        g.subscriptions[0].mode = "poll".to_string();
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_netconf_rejects_malformed_field_spec() {
        let nc: NetconfConfig = serde_yaml::from_str(
            r#"
            addresses: ["10.0.0.1"]
            subscriptions:
              - name: ifcounters
                rpc: "<get-interface-information/>"
                fields: ["/interface-information/physical-interface/speed"]
                sample_interval: 10s
            "#,
        )
        .unwrap();
        let err = nc.validate().unwrap_err();
        assert!(err.to_string().contains("field spec"));
    }

    #[test]
    fn test_processor_chain_parses_in_order() {
        let cfg: Config = serde_yaml::from_str(
            r#"
            processors:
              - type: rate
                fields: [in_octets]
                factor: 8.0
              - type: filtering
                tags:
                  - key: device
                    pattern: "^r1$"
                    action: drop
            "#,
        )
        .unwrap();
        assert_eq!(cfg.processors.len(), 2);
        assert!(matches!(cfg.processors[0], ProcessorConfig::Rate(_)));
        assert!(matches!(cfg.processors[1], ProcessorConfig::Filtering(_)));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_monitoring_rejects_bad_operator() {
        let cfg: Config = serde_yaml::from_str(
            r#"
            processors:
              - type: monitoring
                probes:
                  - alarm_name: CPU_HIGH
                    field: idle_cpu
                    probe_type: current
                    threshold: 10.0
                    operator: ge
            "#,
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_filtering_rejects_bad_action() {
        let cfg: Config = serde_yaml::from_str(
            r#"
            processors:
              - type: filtering
                tags:
                  - key: device
                    pattern: "^r1$"
                    action: reject
            "#,
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }
}

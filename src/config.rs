//! Layered application configuration: defaults, then a TOML file, then
//! `DWELLTRACK_*` environment overrides, then validation.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alert::{Severity, WebhookConfig};
use crate::engine::{ClockRegressionPolicy, EngineConfig};
use crate::tracker::{CooldownPolicy, DisplacementMetric, MatcherKind};

const DEFAULT_REGION_IOU: f32 = 0.5;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AppConfigFile {
    detection: Option<DetectionConfigFile>,
    tracking: Option<TrackingConfigFile>,
    cooldown: Option<CooldownConfigFile>,
    alert: Option<AlertConfigFile>,
    webhook: Option<WebhookConfigFile>,
    output: Option<OutputConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    target_label: Option<String>,
    prompt: Option<String>,
    min_confidence: Option<f32>,
    sample_interval_seconds: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrackingConfigFile {
    iou_match_threshold: Option<f32>,
    movement_tolerance: Option<f32>,
    displacement: Option<DisplacementMetric>,
    persistence_threshold_seconds: Option<f64>,
    expiry_seconds: Option<f64>,
    max_tracks: Option<usize>,
    matcher: Option<MatcherKind>,
    clock_regression: Option<ClockRegressionPolicy>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum CooldownPolicyName {
    PerTrack,
    PerRegion,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CooldownConfigFile {
    seconds: Option<f64>,
    policy: Option<CooldownPolicyName>,
    region_iou: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AlertConfigFile {
    what: Option<String>,
    who: Option<String>,
    location: Option<String>,
    method: Option<String>,
    alert_type: Option<String>,
    severity: Option<Severity>,
    requires_action: Option<bool>,
    horizontal_aspect_ratio: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct WebhookConfigFile {
    url: Option<String>,
    timeout_seconds: Option<f64>,
    retry_attempts: Option<u32>,
    retry_delay_seconds: Option<f64>,
    sender: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OutputConfigFile {
    alert_log_dir: Option<PathBuf>,
}

/// Everything the `dwelltrack` binary needs to run one feed.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub engine: EngineConfig,
    /// Minimum spacing between processed frames; zero processes every frame
    pub sample_interval_seconds: f64,
    /// Absent when no webhook URL is configured
    pub webhook: Option<WebhookConfig>,
    pub alert_log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            sample_interval_seconds: 0.0,
            webhook: None,
            alert_log_dir: None,
        }
    }
}

impl AppConfig {
    /// Load from `path` if given, then apply the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => AppConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document on its own, without environment overrides.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: AppConfigFile = toml::from_str(raw).context("invalid configuration")?;
        let mut cfg = Self::from_file(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Result<Self> {
        let mut cfg = Self::default();
        let engine = &mut cfg.engine;

        if let Some(detection) = file.detection {
            if let Some(label) = detection.target_label {
                engine.target_label = label;
            }
            if let Some(prompt) = detection.prompt {
                engine.alert.prompt = prompt;
            }
            if let Some(min) = detection.min_confidence {
                engine.min_confidence = min;
            }
            if let Some(interval) = detection.sample_interval_seconds {
                cfg.sample_interval_seconds = interval;
            }
        }

        if let Some(tracking) = file.tracking {
            let tracker = &mut engine.tracker;
            tracker.iou_match_threshold = tracking
                .iou_match_threshold
                .unwrap_or(tracker.iou_match_threshold);
            tracker.movement_tolerance = tracking
                .movement_tolerance
                .unwrap_or(tracker.movement_tolerance);
            tracker.displacement = tracking.displacement.unwrap_or(tracker.displacement);
            tracker.persistence_threshold_seconds = tracking
                .persistence_threshold_seconds
                .unwrap_or(tracker.persistence_threshold_seconds);
            tracker.expiry_seconds = tracking.expiry_seconds.unwrap_or(tracker.expiry_seconds);
            tracker.max_tracks = tracking.max_tracks.unwrap_or(tracker.max_tracks);
            tracker.matcher = tracking.matcher.unwrap_or(tracker.matcher);
            engine.clock_regression = tracking
                .clock_regression
                .unwrap_or(engine.clock_regression);
        }

        if let Some(cooldown) = file.cooldown {
            let tracker = &mut engine.tracker;
            tracker.cooldown_seconds = cooldown.seconds.unwrap_or(tracker.cooldown_seconds);
            match (cooldown.policy, cooldown.region_iou) {
                (Some(CooldownPolicyName::PerRegion), region_iou) => {
                    tracker.cooldown_policy = CooldownPolicy::PerRegion {
                        region_iou: region_iou.unwrap_or(DEFAULT_REGION_IOU),
                    };
                }
                (Some(CooldownPolicyName::PerTrack), Some(_)) => {
                    return Err(anyhow!(
                        "cooldown.region_iou only applies to policy = \"per_region\""
                    ));
                }
                (Some(CooldownPolicyName::PerTrack), None) => {
                    tracker.cooldown_policy = CooldownPolicy::PerTrack;
                }
                (None, Some(_)) => {
                    return Err(anyhow!("cooldown.region_iou requires policy = \"per_region\""));
                }
                (None, None) => {}
            }
        }

        if let Some(alert) = file.alert {
            let profile = &mut engine.alert;
            if let Some(what) = alert.what {
                profile.what = what;
            }
            if let Some(who) = alert.who {
                profile.who = who;
            }
            if let Some(location) = alert.location {
                profile.location = location;
            }
            if let Some(method) = alert.method {
                profile.method = method;
            }
            if let Some(alert_type) = alert.alert_type {
                profile.alert_type = alert_type;
            }
            profile.severity = alert.severity.unwrap_or(profile.severity);
            profile.requires_action = alert.requires_action.unwrap_or(profile.requires_action);
            if let Some(ratio) = alert.horizontal_aspect_ratio {
                engine.horizontal_aspect_ratio = ratio;
            }
        }

        if let Some(webhook) = file.webhook {
            if let Some(url) = webhook.url {
                let mut hook = WebhookConfig::new(url);
                if let Some(timeout) = webhook.timeout_seconds {
                    hook.timeout = seconds("webhook.timeout_seconds", timeout)?;
                }
                hook.retry_attempts = webhook.retry_attempts.unwrap_or(hook.retry_attempts);
                if let Some(delay) = webhook.retry_delay_seconds {
                    hook.retry_delay = seconds("webhook.retry_delay_seconds", delay)?;
                }
                if let Some(sender) = webhook.sender {
                    hook.sender = sender;
                }
                cfg.webhook = Some(hook);
            } else if webhook.timeout_seconds.is_some()
                || webhook.retry_attempts.is_some()
                || webhook.retry_delay_seconds.is_some()
                || webhook.sender.is_some()
            {
                log::warn!("[webhook] settings ignored: no url configured");
            }
        }

        cfg.alert_log_dir = file.output.and_then(|output| output.alert_log_dir);
        Ok(cfg)
    }

    /// Apply `DWELLTRACK_*` overrides read through `var`.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        let set = |key: &str| var(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = set("DWELLTRACK_WEBHOOK_URL") {
            match self.webhook.as_mut() {
                Some(hook) => hook.url = url,
                None => self.webhook = Some(WebhookConfig::new(url)),
            }
        }
        if let Some(dir) = set("DWELLTRACK_ALERT_LOG_DIR") {
            self.alert_log_dir = Some(PathBuf::from(dir));
        }
        if let Some(location) = set("DWELLTRACK_LOCATION") {
            self.engine.alert.location = location;
        }
        if let Some(label) = set("DWELLTRACK_TARGET_LABEL") {
            self.engine.target_label = label;
        }
        if let Some(min) = set("DWELLTRACK_MIN_CONFIDENCE") {
            self.engine.min_confidence = parse_env("DWELLTRACK_MIN_CONFIDENCE", &min)?;
        }
        if let Some(secs) = set("DWELLTRACK_PERSISTENCE_SECONDS") {
            self.engine.tracker.persistence_threshold_seconds =
                parse_env("DWELLTRACK_PERSISTENCE_SECONDS", &secs)?;
        }
        if let Some(secs) = set("DWELLTRACK_COOLDOWN_SECONDS") {
            self.engine.tracker.cooldown_seconds = parse_env("DWELLTRACK_COOLDOWN_SECONDS", &secs)?;
        }
        if let Some(secs) = set("DWELLTRACK_SAMPLE_INTERVAL_SECONDS") {
            self.sample_interval_seconds = parse_env("DWELLTRACK_SAMPLE_INTERVAL_SECONDS", &secs)?;
        }
        Ok(())
    }

    /// Check ranges after all layers are applied. Call again after applying
    /// CLI overrides.
    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        let tracker = &engine.tracker;

        unit_interval("detection.min_confidence", engine.min_confidence)?;
        unit_interval("tracking.iou_match_threshold", tracker.iou_match_threshold)?;
        match tracker.displacement {
            DisplacementMetric::AnchorIou => {
                unit_interval("tracking.movement_tolerance", tracker.movement_tolerance)?
            }
            DisplacementMetric::CenterDistance => non_negative(
                "tracking.movement_tolerance",
                f64::from(tracker.movement_tolerance),
            )?,
        }
        if let CooldownPolicy::PerRegion { region_iou } = tracker.cooldown_policy {
            unit_interval("cooldown.region_iou", region_iou)?;
        }

        non_negative("detection.sample_interval_seconds", self.sample_interval_seconds)?;
        non_negative("tracking.expiry_seconds", tracker.expiry_seconds)?;
        non_negative("cooldown.seconds", tracker.cooldown_seconds)?;
        let persistence = tracker.persistence_threshold_seconds;
        if !persistence.is_finite() || persistence <= 0.0 {
            return Err(anyhow!(
                "tracking.persistence_threshold_seconds must be greater than zero, got {}",
                persistence
            ));
        }
        if tracker.max_tracks == 0 {
            return Err(anyhow!("tracking.max_tracks must be at least 1"));
        }
        if !engine.horizontal_aspect_ratio.is_finite() || engine.horizontal_aspect_ratio <= 0.0 {
            return Err(anyhow!("alert.horizontal_aspect_ratio must be positive"));
        }
        if engine.target_label.trim().is_empty() {
            return Err(anyhow!("detection.target_label must not be empty"));
        }

        if let Some(hook) = &self.webhook {
            if !(hook.url.starts_with("http://") || hook.url.starts_with("https://")) {
                return Err(anyhow!(
                    "webhook.url must use http or https, got {:?}",
                    hook.url
                ));
            }
            if hook.retry_attempts == 0 {
                return Err(anyhow!("webhook.retry_attempts must be at least 1"));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let cfg = toml::from_str(&raw)
        .with_context(|| format!("invalid config file {}", path.display()))?;
    Ok(cfg)
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} has an invalid value: {:?}", key, value))
}

fn seconds(key: &str, value: f64) -> Result<Duration> {
    non_negative(key, value)?;
    Ok(Duration::from_secs_f64(value))
}

fn unit_interval(key: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be within [0, 1], got {}", key, value));
    }
    Ok(())
}

fn non_negative(key: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(anyhow!("{} must be finite and non-negative, got {}", key, value));
    }
    Ok(())
}

//! Automation run configuration, loaded from a JSON document

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adb::TextStrategy;
use crate::error::{FleetError, Result};

/// Something to tap: a fixed device pixel or a UI element found by label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Affordance {
    Point { x: i32, y: i32 },
    Element { label: String },
}

impl Affordance {
    pub fn element(label: impl Into<String>) -> Self {
        Affordance::Element {
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwipeSpec {
    pub from_x: i32,
    pub from_y: i32,
    pub to_x: i32,
    pub to_y: i32,
    #[serde(default = "default_swipe_ms")]
    pub duration_ms: u32,
}

fn default_swipe_ms() -> u32 {
    300
}

impl SwipeSpec {
    pub fn args(&self) -> Vec<String> {
        crate::adb::device::swipe(self.from_x, self.from_y, self.to_x, self.to_y, self.duration_ms)
    }
}

/// Downward scroll through the middle of a 1080-wide screen
impl Default for SwipeSpec {
    fn default() -> Self {
        Self {
            from_x: 540,
            from_y: 1600,
            to_x: 540,
            to_y: 600,
            duration_ms: default_swipe_ms(),
        }
    }
}

/// A link to share and the caption to post with it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostPair {
    pub link: String,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Directory holding one `<serial>.txt` account list per device
    pub accounts_dir: PathBuf,
    /// Package receiving the share intent
    pub app_package: String,
    pub posts: Vec<PostPair>,
    /// Caption lines used for pairs that carry no caption of their own
    pub caption_file: Option<PathBuf>,
    /// Post every pair from the current account before any switching
    pub initial_share: bool,
    pub account_menu: Affordance,
    pub reveal_accounts: SwipeSpec,
    pub switch_account: Affordance,
    pub post_button: Affordance,
    /// Downward scroll used when an element is not on screen
    pub scroll: SwipeSpec,
    pub scroll_attempts: usize,
    pub settle_delay_secs: f64,
    pub cooldown_secs: f64,
    pub post_retries: usize,
    pub retry_backoff_secs: f64,
    pub text_strategy: TextStrategy,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            accounts_dir: PathBuf::from("accounts"),
            app_package: "com.facebook.lite".to_string(),
            posts: Vec::new(),
            caption_file: None,
            initial_share: true,
            account_menu: Affordance::element("Menu"),
            reveal_accounts: SwipeSpec {
                from_x: 540,
                from_y: 1500,
                to_x: 540,
                to_y: 500,
                duration_ms: 300,
            },
            switch_account: Affordance::element("Switch account"),
            post_button: Affordance::element("Post"),
            scroll: SwipeSpec::default(),
            scroll_attempts: 3,
            settle_delay_secs: 3.0,
            cooldown_secs: 30.0,
            post_retries: 3,
            retry_backoff_secs: 2.0,
            text_strategy: TextStrategy::default(),
        }
    }
}

impl AutomationConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
            .map_err(|e| FleetError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.posts.is_empty() {
            return Err(FleetError::Config("no posts configured".to_string()));
        }
        if let Some(pair) = self.posts.iter().find(|p| p.link.trim().is_empty()) {
            return Err(FleetError::Config(format!(
                "post with empty link (caption {:?})",
                pair.caption
            )));
        }
        if self.post_retries == 0 {
            return Err(FleetError::Config("post_retries must be at least 1".to_string()));
        }
        for (name, value) in [
            ("settle_delay_secs", self.settle_delay_secs),
            ("cooldown_secs", self.cooldown_secs),
            ("retry_backoff_secs", self.retry_backoff_secs),
        ] {
            if !value.is_finite() || !(0.0..=MAX_DELAY_SECS).contains(&value) {
                return Err(FleetError::Config(format!(
                    "{name} must be between 0 and {MAX_DELAY_SECS} seconds, got {value}"
                )));
            }
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        seconds(self.settle_delay_secs)
    }

    pub fn cooldown(&self) -> Duration {
        seconds(self.cooldown_secs)
    }

    /// Backoff before retry `attempt` (1-based): grows linearly with each failure.
    pub fn retry_backoff(&self, attempt: usize) -> Duration {
        seconds(self.retry_backoff_secs * attempt as f64)
    }
}

/// Upper bound for any configured delay: one day
const MAX_DELAY_SECS: f64 = 86_400.0;

/// Negative and NaN become zero, anything too large for a `Duration` saturates
fn seconds(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_document_uses_defaults() {
        let config =
            AutomationConfig::from_json(r#"{"posts": [{"link": "https://example.com/p/1"}]}"#)
                .unwrap();
        assert_eq!(config.posts.len(), 1);
        assert_eq!(config.posts[0].caption, None);
        assert_eq!(config.scroll_attempts, 3);
        assert_eq!(config.switch_account, Affordance::element("Switch account"));
    }

    #[test]
    fn test_affordance_forms() {
        let config = AutomationConfig::from_json(
            r#"{
                "posts": [{"link": "https://example.com", "caption": "hello there"}],
                "post_button": {"x": 980, "y": 150},
                "account_menu": {"label": "Profile"},
                "text_strategy": "per_character"
            }"#,
        )
        .unwrap();
        assert_eq!(config.post_button, Affordance::Point { x: 980, y: 150 });
        assert_eq!(config.account_menu, Affordance::element("Profile"));
        assert_eq!(config.text_strategy, TextStrategy::PerCharacter);
    }

    #[test]
    fn test_rejects_empty_posts() {
        let err = AutomationConfig::from_json(r#"{"posts": []}"#).unwrap_err();
        assert!(matches!(err, FleetError::Config(_)));
    }

    #[test]
    fn test_rejects_out_of_range_delays() {
        for doc in [
            r#"{"posts": [{"link": "x"}], "cooldown_secs": 1e20}"#,
            r#"{"posts": [{"link": "x"}], "settle_delay_secs": -1}"#,
            r#"{"posts": [{"link": "x"}], "retry_backoff_secs": 90000}"#,
        ] {
            let err = AutomationConfig::from_json(doc).unwrap_err();
            assert!(matches!(err, FleetError::Config(_)), "{doc}: {err}");
        }
    }

    #[test]
    fn test_unvalidated_delays_do_not_panic() {
        let config = AutomationConfig {
            cooldown_secs: 1e20,
            settle_delay_secs: f64::NAN,
            retry_backoff_secs: f64::INFINITY,
            ..AutomationConfig::default()
        };
        assert_eq!(config.cooldown(), Duration::MAX);
        assert_eq!(config.settle_delay(), Duration::ZERO);
        assert_eq!(config.retry_backoff(3), Duration::MAX);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_increases() {
        let config = AutomationConfig {
            retry_backoff_secs: 1.5,
            ..AutomationConfig::default()
        };
        assert!(config.retry_backoff(2) > config.retry_backoff(1));
        assert_eq!(config.retry_backoff(2), Duration::from_secs(3));
    }
}

use serde::Deserialize;
use std::time::Duration;

/// `[verification]` configuration: where challenges show up and how long to
/// wait for them to clear.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Presence of any of these means a code challenge.
    pub code_markers: Vec<String>,
    /// Inputs the code is typed into, tried in order.
    pub code_inputs: Vec<String>,
    pub slider_markers: Vec<String>,
    pub slider_handles: Vec<String>,
    pub image_markers: Vec<String>,
    /// Case-insensitive button text used to submit a challenge.
    pub submit_labels: Vec<String>,
    pub code_confirm_timeout_ms: u64,
    pub slider_settle_min_ms: u64,
    pub slider_settle_max_ms: u64,
    pub image_settle_ms: u64,
    /// Distance kept from the track's right edge when releasing the handle.
    pub slider_end_margin_px: f64,
}

fn selectors(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for VerificationConfig {
    fn default() -> Self {
        let code = selectors(&[
            r#"input[placeholder*="verification" i]"#,
            r#"input[placeholder*="code" i]"#,
            r#"input[type="tel"]"#,
        ]);
        Self {
            code_inputs: code.clone(),
            code_markers: code,
            slider_markers: selectors(&[
                r#"div[class*="slider" i]"#,
                r#"div[class*="drag" i]"#,
            ]),
            slider_handles: selectors(&[
                r#"div[class*="slider" i] span"#,
                r#"div[class*="drag" i] span"#,
            ]),
            image_markers: selectors(&[
                r#"div[class*="captcha" i] img"#,
                r#"img[class*="captcha" i]"#,
            ]),
            submit_labels: selectors(&["submit", "verify", "confirm"]),
            code_confirm_timeout_ms: 15_000,
            slider_settle_min_ms: 2_000,
            slider_settle_max_ms: 4_000,
            image_settle_ms: 3_000,
            slider_end_margin_px: 10.0,
        }
    }
}

impl VerificationConfig {
    pub fn code_confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.code_confirm_timeout_ms)
    }

    /// Random settle delay within the configured slider window.
    pub fn slider_settle(&self) -> Duration {
        use rand::Rng;
        let low = self.slider_settle_min_ms.min(self.slider_settle_max_ms);
        let high = self.slider_settle_min_ms.max(self.slider_settle_max_ms);
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }

    pub fn image_settle(&self) -> Duration {
        Duration::from_millis(self.image_settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slider_settle_stays_in_window() {
        let config = VerificationConfig::default();
        for _ in 0..100 {
            let settle = config.slider_settle();
            assert!(settle >= Duration::from_secs(2) && settle <= Duration::from_secs(4));
        }
    }

    #[test]
    fn inverted_window_is_tolerated() {
        let config = VerificationConfig {
            slider_settle_min_ms: 500,
            slider_settle_max_ms: 100,
            ..Default::default()
        };
        let settle = config.slider_settle();
        assert!(settle >= Duration::from_millis(100) && settle <= Duration::from_millis(500));
    }

    #[test]
    fn partial_toml_keeps_default_selectors() {
        let config: VerificationConfig = toml::from_str("image_settle_ms = 10").unwrap();
        assert_eq!(config.image_settle(), Duration::from_millis(10));
        assert_eq!(config.submit_labels, vec!["submit", "verify", "confirm"]);
        assert_eq!(config.code_markers.len(), 3);
    }
}

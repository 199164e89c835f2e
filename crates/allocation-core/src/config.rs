//! Explicit configuration passed into every pipeline call.
//!
//! Nothing here is read from the environment: API keys and provider
//! selection travel with the request so concurrent callers can use
//! different advisors.

use serde::{Deserialize, Serialize};

use crate::error::AllocationError;
use crate::optimization::cleaning::DEFAULT_WEIGHT_CUTOFF;
use crate::optimization::qp::QpSettings;
use crate::prices::LookbackPeriod;
use crate::AllocationResult;

/// Settings for a full allocation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    /// Annual risk-free rate used by the max-Sharpe objective.
    pub risk_free_rate: f64,
    /// Weights below this are zeroed by the cleaner.
    pub weight_cutoff: f64,
    /// Price history window.
    pub lookback: LookbackPeriod,
    /// Active-set solver limits.
    pub solver: QpSettings,
    /// Number of efficient frontier points.
    pub frontier_points: usize,
    /// Wall-clock limit per optimizer, counted from when the optimizers
    /// start; exceeding it counts as a failed optimization. `None` disables
    /// the limit.
    pub optimization_timeout_ms: Option<u64>,
    pub advisor: AdvisorConfig,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.02,
            weight_cutoff: DEFAULT_WEIGHT_CUTOFF,
            lookback: LookbackPeriod::OneYear,
            solver: QpSettings::default(),
            frontier_points: 20,
            optimization_timeout_ms: Some(30_000),
            advisor: AdvisorConfig::default(),
        }
    }
}

impl AllocationConfig {
    pub fn validate(&self) -> AllocationResult<()> {
        if !self.risk_free_rate.is_finite() {
            return Err(AllocationError::InvalidInput {
                field: "risk_free_rate".into(),
                reason: "Must be finite".into(),
            });
        }
        if !self.weight_cutoff.is_finite() || self.weight_cutoff < 0.0 || self.weight_cutoff >= 1.0 {
            return Err(AllocationError::InvalidInput {
                field: "weight_cutoff".into(),
                reason: "Must be in [0, 1)".into(),
            });
        }
        if self.frontier_points < 2 {
            return Err(AllocationError::InvalidInput {
                field: "frontier_points".into(),
                reason: "At least 2 frontier points required".into(),
            });
        }
        self.solver.validate()?;
        if self.optimization_timeout_ms == Some(0) {
            return Err(AllocationError::InvalidInput {
                field: "optimization_timeout_ms".into(),
                reason: "Timeout must be positive".into(),
            });
        }
        self.advisor.validate()
    }
}

/// Large-language-model backend used for advice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvisorProvider {
    #[default]
    OpenAi,
    Ollama,
    Disabled,
}

/// Advisor connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    pub provider: AdvisorProvider,
    /// Model name; provider default when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Endpoint for self-hosted providers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub max_tokens: u32,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            provider: AdvisorProvider::OpenAi,
            model: None,
            api_key: None,
            base_url: None,
            max_tokens: 500,
        }
    }
}

impl AdvisorConfig {
    pub fn model(&self) -> &str {
        match (&self.model, self.provider) {
            (Some(m), _) => m,
            (None, AdvisorProvider::Ollama) => "llama3",
            (None, _) => "gpt-4o",
        }
    }

    pub fn base_url(&self) -> Option<&str> {
        match (&self.base_url, self.provider) {
            (Some(url), _) => Some(url),
            (None, AdvisorProvider::Ollama) => Some("http://localhost:11434/v1"),
            (None, _) => None,
        }
    }

    /// OpenAI needs a key; Ollama runs without one.
    pub fn is_enabled(&self) -> bool {
        match self.provider {
            AdvisorProvider::OpenAi => self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty()),
            AdvisorProvider::Ollama => true,
            AdvisorProvider::Disabled => false,
        }
    }

    fn validate(&self) -> AllocationResult<()> {
        if self.max_tokens == 0 {
            return Err(AllocationError::InvalidInput {
                field: "advisor.max_tokens".into(),
                reason: "Must be positive".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AllocationConfig::default();
        assert_eq!(config.risk_free_rate, 0.02);
        assert_eq!(config.weight_cutoff, 1e-4);
        assert_eq!(config.lookback, LookbackPeriod::OneYear);
        assert_eq!(config.frontier_points, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AllocationConfig =
            serde_json::from_str(r#"{"risk_free_rate": 0.04, "lookback": "6M"}"#).unwrap();
        assert_eq!(config.risk_free_rate, 0.04);
        assert_eq!(config.lookback, LookbackPeriod::SixMonths);
        assert_eq!(config.solver, QpSettings::default());
    }

    #[test]
    fn test_invalid_cutoff() {
        let config = AllocationConfig {
            weight_cutoff: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_advisor_provider_defaults() {
        let openai = AdvisorConfig::default();
        assert_eq!(openai.model(), "gpt-4o");
        assert!(!openai.is_enabled());

        let ollama = AdvisorConfig {
            provider: AdvisorProvider::Ollama,
            ..Default::default()
        };
        assert_eq!(ollama.model(), "llama3");
        assert_eq!(ollama.base_url(), Some("http://localhost:11434/v1"));
        assert!(ollama.is_enabled());
    }

    #[test]
    fn test_api_key_not_serialized() {
        let config = AdvisorConfig {
            api_key: Some("sk-secret".into()),
            ..Default::default()
        };
        assert!(config.is_enabled());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-secret"));
    }
}

//! Boundaries to the services around the allocation core: historical
//! price retrieval and natural-language advice. Only the interfaces and
//! in-process implementations live here.

use serde::{Deserialize, Serialize};

use crate::config::AdvisorConfig;
use crate::error::AllocationError;
use crate::prices::{LookbackPeriod, PriceMatrix};
use crate::types::{PerformanceMetrics, Ticker, WeightVector};
use crate::AllocationResult;

/// Source of historical closing prices.
///
/// Implementations must report failures as errors; an unknown ticker or an
/// unreachable provider is never an empty matrix.
pub trait MarketDataProvider: Send + Sync {
    fn fetch_prices(&self, tickers: &[Ticker], period: LookbackPeriod) -> AllocationResult<PriceMatrix>;
}

/// Serves prices from a matrix already in memory.
#[derive(Debug, Clone)]
pub struct StaticPriceProvider {
    prices: PriceMatrix,
}

impl StaticPriceProvider {
    pub fn new(prices: PriceMatrix) -> Self {
        Self { prices }
    }
}

impl MarketDataProvider for StaticPriceProvider {
    fn fetch_prices(&self, tickers: &[Ticker], period: LookbackPeriod) -> AllocationResult<PriceMatrix> {
        if tickers.is_empty() {
            return Err(AllocationError::InvalidInput {
                field: "tickers".into(),
                reason: "At least one ticker is required".into(),
            });
        }
        let selected = self
            .prices
            .select(tickers)?
            .with_lookback(period)
            .trim_to_common_history();
        if selected.n_rows() < 2 {
            return Err(AllocationError::DataError(format!(
                "Only {} aligned price rows for {} over {period}",
                selected.n_rows(),
                tickers.join(", ")
            )));
        }
        Ok(selected)
    }
}

// ---------------------------------------------------------------------------
// Advice
// ---------------------------------------------------------------------------

pub const SYSTEM_PROMPT: &str = "You are an expert financial advisor. Analyze the portfolio \
metrics and optimization suggestions provided. Give concise, actionable advice on how to \
improve the portfolio's risk-adjusted return. Focus on diversification gaps.";

/// Used when an OpenAI advisor has no `base_url`.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Candidate allocations from both optimizers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizedWeights {
    pub mvo: WeightVector,
    pub hrp: WeightVector,
}

/// Everything an advisor sees about a portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdviceRequest {
    pub tickers: Vec<Ticker>,
    pub current_weights: Option<WeightVector>,
    pub current_performance: Option<PerformanceMetrics>,
    pub optimized: OptimizedWeights,
}

impl AdviceRequest {
    /// User message sent alongside [`SYSTEM_PROMPT`].
    pub fn prompt(&self) -> String {
        let perf = self.current_performance.unwrap_or(PerformanceMetrics::new(0.0, 0.0));
        let pretty = |w: &WeightVector| serde_json::to_string_pretty(w).unwrap_or_else(|_| "{}".into());
        format!(
            "Current Portfolio Tickers: {tickers:?}\n\n\
             Current Performance:\n\
             - Annual Return: {ret:.2}%\n\
             - Volatility: {vol:.2}%\n\
             - Sharpe Ratio: {sharpe:.2}\n\n\
             Optimization Suggestion (MVO):\n{mvo}\n\n\
             Optimization Suggestion (HRP):\n{hrp}\n\n\
             Please compare the current portfolio with the optimized suggestions and explain \
             3 key changes the user should make.",
            tickers = self.tickers,
            ret = perf.expected_return * 100.0,
            vol = perf.volatility * 100.0,
            sharpe = perf.sharpe_ratio,
            mvo = pretty(&self.optimized.mvo),
            hrp = pretty(&self.optimized.hrp),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// OpenAI-compatible chat completion call for a configured advisor. Carries
/// no credentials; the host adds the API key when it sends the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub endpoint: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

impl AdviceRequest {
    /// The chat completion `config` describes, or `None` when no advisor is
    /// configured.
    pub fn chat_request(&self, config: &AdvisorConfig) -> Option<ChatRequest> {
        if !config.is_enabled() {
            return None;
        }
        let base = config.base_url().unwrap_or(OPENAI_BASE_URL).trim_end_matches('/');
        Some(ChatRequest {
            endpoint: format!("{base}/chat/completions"),
            model: config.model().to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: SYSTEM_PROMPT.into(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: self.prompt(),
                },
            ],
            max_tokens: config.max_tokens,
        })
    }
}

/// Produces free-text advice for a portfolio.
pub trait AdviceGenerator: Send + Sync {
    fn generate(&self, request: &AdviceRequest) -> AllocationResult<String>;
}

/// Advisor used when no provider is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledAdvisor;

impl DisabledAdvisor {
    pub const MESSAGE: &'static str =
        "Advisor disabled (API key missing or provider not configured).";
}

impl AdviceGenerator for DisabledAdvisor {
    fn generate(&self, _request: &AdviceRequest) -> AllocationResult<String> {
        Ok(Self::MESSAGE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdvisorProvider;
    use chrono::NaiveDate;

    fn matrix() -> PriceMatrix {
        let d = |day| NaiveDate::from_ymd_opt(2024, 5, day).unwrap();
        PriceMatrix::new(
            vec!["AAA".into(), "BBB".into(), "CCC".into()],
            vec![d(1), d(2), d(3), d(6)],
            vec![
                vec![None, Some(20.0), Some(5.0)],
                vec![Some(10.0), Some(21.0), Some(5.1)],
                vec![Some(10.5), Some(20.5), Some(5.2)],
                vec![Some(10.4), Some(20.9), Some(5.3)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_static_provider_selects_and_trims() {
        let provider = StaticPriceProvider::new(matrix());
        let p = provider
            .fetch_prices(&["CCC".into(), "AAA".into()], LookbackPeriod::Max)
            .unwrap();
        assert_eq!(p.tickers(), &["CCC".to_string(), "AAA".to_string()]);
        assert_eq!(p.n_rows(), 3);
    }

    #[test]
    fn test_static_provider_unknown_ticker_is_error() {
        let provider = StaticPriceProvider::new(matrix());
        assert!(matches!(
            provider.fetch_prices(&["ZZZ".into()], LookbackPeriod::OneYear),
            Err(AllocationError::DataError(_))
        ));
    }

    #[test]
    fn test_static_provider_empty_request() {
        let provider = StaticPriceProvider::new(matrix());
        assert!(provider.fetch_prices(&[], LookbackPeriod::OneYear).is_err());
    }

    #[test]
    fn test_prompt_mentions_both_optimizers() {
        let request = AdviceRequest {
            tickers: vec!["AAA".into(), "BBB".into()],
            current_weights: None,
            current_performance: Some(PerformanceMetrics::new(0.12, 0.2)),
            optimized: OptimizedWeights {
                mvo: WeightVector::from_pairs([("AAA", 1.0), ("BBB", 0.0)]),
                hrp: WeightVector::from_pairs([("AAA", 0.4), ("BBB", 0.6)]),
            },
        };
        let prompt = request.prompt();
        assert!(prompt.contains("Annual Return: 12.00%"));
        assert!(prompt.contains("Sharpe Ratio: 0.60"));
        assert!(prompt.contains("Optimization Suggestion (HRP)"));
        assert!(prompt.contains("\"BBB\": 0.6"));
    }

    #[test]
    fn test_chat_request_follows_advisor_config() {
        let request = AdviceRequest {
            tickers: vec!["AAA".into()],
            current_weights: None,
            current_performance: None,
            optimized: OptimizedWeights::default(),
        };
        assert_eq!(request.chat_request(&AdvisorConfig::default()), None);

        let ollama = AdvisorConfig {
            provider: AdvisorProvider::Ollama,
            max_tokens: 300,
            ..Default::default()
        };
        let chat = request.chat_request(&ollama).unwrap();
        assert_eq!(chat.endpoint, "http://localhost:11434/v1/chat/completions");
        assert_eq!(chat.model, "llama3");
        assert_eq!(chat.max_tokens, 300);
        assert_eq!(chat.messages[0].content, SYSTEM_PROMPT);
        assert!(chat.messages[1].content.contains("AAA"));

        let openai = AdvisorConfig {
            api_key: Some("sk-test".into()),
            model: Some("gpt-4o-mini".into()),
            ..Default::default()
        };
        let chat = request.chat_request(&openai).unwrap();
        assert_eq!(chat.endpoint, "https://api.openai.com/v1/chat/completions");
        assert_eq!(chat.model, "gpt-4o-mini");
        assert!(!serde_json::to_string(&chat).unwrap().contains("sk-test"));
    }

    #[test]
    fn test_disabled_advisor() {
        let request = AdviceRequest {
            tickers: vec![],
            current_weights: None,
            current_performance: None,
            optimized: OptimizedWeights::default(),
        };
        assert_eq!(DisabledAdvisor.generate(&request).unwrap(), DisabledAdvisor::MESSAGE);
    }
}

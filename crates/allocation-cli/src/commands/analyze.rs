use clap::Args;
use serde_json::Value;
use tracing::info;

use allocation_core::analysis::{analyze_portfolio, run_analysis, AnalysisInput, AnalysisRequest};
use allocation_core::collaborators::DisabledAdvisor;
use allocation_core::{AllocationConfig, MarketDataProvider, WeightIntent};

use super::PriceArgs;
use crate::input;

#[derive(Args)]
pub struct AnalyzeArgs {
    /// Analysis request as JSON (`holdings`, `prices`, optional `config`)
    #[arg(long)]
    pub input: Option<String>,

    #[command(flatten)]
    pub prices: PriceArgs,

    /// Holdings CSV (`ticker`, optional `weight` / `quantity`)
    #[arg(long)]
    pub holdings: Option<String>,
}

pub fn run_analyze(args: AnalyzeArgs, config: &AllocationConfig) -> Result<Value, Box<dyn std::error::Error>> {
    let advisor = DisabledAdvisor;

    let result = match args.prices.provider()? {
        Some(provider) => {
            let path = args
                .holdings
                .as_deref()
                .ok_or("--holdings <file.csv> required with --prices")?;
            let request = AnalysisRequest {
                holdings: input::csv_in::read_holdings(path)?,
            };
            let mut config = config.clone();
            config.lookback = args.prices.lookback(&config);
            let tickers = WeightIntent::from_holdings(&request.holdings)?.tickers();
            let prices = provider.fetch_prices(&tickers, config.lookback)?;
            note_advisor(&config);
            analyze_portfolio(&request, &prices, &config, &advisor)?
        }
        None => {
            let mut analysis: AnalysisInput = input::read_request(args.input.as_deref(), "portfolio analysis")?;
            if let Some(lookback) = args.prices.lookback {
                analysis.config.lookback = lookback;
            }
            note_advisor(&analysis.config);
            run_analysis(&analysis, &advisor)?
        }
    };
    Ok(serde_json::to_value(result)?)
}

fn note_advisor(config: &AllocationConfig) {
    if config.advisor.is_enabled() {
        info!(
            provider = ?config.advisor.provider,
            model = config.advisor.model(),
            "advisor configured; chat request included as advice_request"
        );
    }
}

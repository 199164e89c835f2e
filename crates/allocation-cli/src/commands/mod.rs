pub mod analyze;
pub mod optimize;
pub mod performance;
pub mod returns;

use allocation_core::collaborators::StaticPriceProvider;
use allocation_core::{AllocationConfig, LookbackPeriod, MarketDataProvider, PriceMatrix, Ticker};
use clap::Args;

use crate::input;

/// Price history source shared by every command.
#[derive(Args)]
pub struct PriceArgs {
    /// Price history CSV (`date,TICK1,TICK2,...`, empty cell = missing)
    #[arg(long)]
    pub prices: Option<String>,

    /// History window: 1M, 3M, 6M, 1Y, 2Y, 5Y or MAX (overrides --config)
    #[arg(long)]
    pub lookback: Option<LookbackPeriod>,
}

impl PriceArgs {
    pub fn lookback(&self, config: &AllocationConfig) -> LookbackPeriod {
        self.lookback.unwrap_or(config.lookback)
    }

    /// Provider over the full `--prices` file, `None` when no file was given.
    pub fn provider(&self) -> Result<Option<StaticPriceProvider>, Box<dyn std::error::Error>> {
        match self.prices.as_deref() {
            Some(path) => Ok(Some(StaticPriceProvider::new(input::csv_in::read_prices(path)?))),
            None => Ok(None),
        }
    }

    /// Every ticker in `--prices`, cut to the lookback window and to the
    /// dates where each has a price at both ends.
    pub fn load(&self, config: &AllocationConfig) -> Result<Option<PriceMatrix>, Box<dyn std::error::Error>> {
        let Some(path) = self.prices.as_deref() else {
            return Ok(None);
        };
        let history = input::csv_in::read_prices(path)?;
        let tickers: Vec<Ticker> = history.tickers().to_vec();
        let prices = StaticPriceProvider::new(history).fetch_prices(&tickers, self.lookback(config))?;
        Ok(Some(prices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use allocation_core::AllocationError;
    use std::fs;

    fn write_csv(name: &str, contents: &str) -> String {
        let path = std::env::temp_dir().join(format!("alloc-{}-{name}.csv", std::process::id()));
        fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_load_trims_to_common_history() {
        let path = write_csv(
            "common",
            "date,AAA,BBB\n2024-01-02,,20\n2024-01-03,10,21\n2024-01-04,11,22\n2024-01-05,12,\n",
        );
        let args = PriceArgs {
            prices: Some(path.clone()),
            lookback: Some(LookbackPeriod::Max),
        };
        let prices = args.load(&AllocationConfig::default()).unwrap().unwrap();
        fs::remove_file(path).unwrap();
        assert_eq!(prices.tickers(), &["AAA".to_string(), "BBB".to_string()]);
        assert_eq!(prices.n_rows(), 2);
    }

    #[test]
    fn test_load_reports_short_history_as_data_error() {
        let path = write_csv("short", "date,AAA\n2024-01-02,10\n");
        let args = PriceArgs {
            prices: Some(path.clone()),
            lookback: None,
        };
        let err = args.load(&AllocationConfig::default()).unwrap_err();
        fs::remove_file(path).unwrap();
        assert!(matches!(
            err.downcast_ref::<AllocationError>(),
            Some(AllocationError::DataError(_))
        ));
    }

    #[test]
    fn test_no_prices_file_means_no_provider() {
        let args = PriceArgs {
            prices: None,
            lookback: None,
        };
        assert!(args.provider().unwrap().is_none());
        assert!(args.load(&AllocationConfig::default()).unwrap().is_none());
    }
}

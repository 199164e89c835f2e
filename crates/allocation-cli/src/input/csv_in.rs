use allocation_core::{Holding, PriceMatrix};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;

use super::file::read_text;

type CsvResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Read a price history CSV: `date,TICK1,TICK2,...`, one row per date,
/// empty cells for missing prices.
pub fn read_prices(path: &str) -> CsvResult<PriceMatrix> {
    let (_, contents) = read_text(path)?;
    parse_prices(&contents)
}

/// Read a holdings CSV with a `ticker` (or `symbol`) column and optional
/// `weight` and `quantity` (or `shares`) columns. Headers are matched
/// case-insensitively.
pub fn read_holdings(path: &str) -> CsvResult<Vec<Holding>> {
    let (_, contents) = read_text(path)?;
    parse_holdings(&contents)
}

pub fn parse_prices(contents: &str) -> CsvResult<PriceMatrix> {
    let mut rdr = reader(contents);
    let headers = rdr.headers()?.clone();
    if headers.len() < 2 {
        return Err("Price CSV needs a date column and at least one ticker column".into());
    }
    let tickers: Vec<String> = headers.iter().skip(1).map(|h| h.to_string()).collect();

    let mut dates = Vec::new();
    let mut rows = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record?;
        let raw_date = record.get(0).unwrap_or_default();
        let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d")
            .map_err(|e| format!("Row {}: invalid date '{}': {}", line + 2, raw_date, e))?;
        let row = (1..=tickers.len())
            .map(|c| match record.get(c).unwrap_or_default() {
                "" => Ok(None),
                cell => f64::from_str(cell)
                    .map(Some)
                    .map_err(|e| format!("Row {}: invalid price '{}': {}", line + 2, cell, e)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        dates.push(date);
        rows.push(row);
    }

    Ok(PriceMatrix::new(tickers, dates, rows)?)
}

pub fn parse_holdings(contents: &str) -> CsvResult<Vec<Holding>> {
    let mut rdr = reader(contents);
    let headers = rdr.headers()?.clone();
    let find = |names: &[&str]| {
        headers
            .iter()
            .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
    };
    let ticker_col = find(&["ticker", "symbol"]).ok_or("Holdings CSV must contain a 'ticker' column")?;
    let weight_col = find(&["weight"]);
    let quantity_col = find(&["quantity", "shares"]);

    let mut holdings = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record?;
        let cell = |col: Option<usize>| col.and_then(|c| record.get(c)).filter(|s| !s.is_empty());

        let ticker = cell(Some(ticker_col)).ok_or(format!("Row {}: missing ticker", line + 2))?;
        let mut holding = Holding::new(ticker);
        if let Some(w) = cell(weight_col) {
            holding.weight = Some(
                f64::from_str(w).map_err(|e| format!("Row {}: invalid weight '{}': {}", line + 2, w, e))?,
            );
        }
        if let Some(q) = cell(quantity_col) {
            holding.quantity = Some(
                Decimal::from_str(q)
                    .map_err(|e| format!("Row {}: invalid quantity '{}': {}", line + 2, q, e))?,
            );
        }
        holdings.push(holding);
    }

    if holdings.is_empty() {
        return Err("Holdings CSV contains no rows".into());
    }
    Ok(holdings)
}

fn reader(contents: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(contents.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_prices_with_gap() {
        let csv = "date,AAA,BBB\n2024-01-02,10.0,20.0\n2024-01-03,,21.5\n2024-01-04,10.5,22\n";
        let p = parse_prices(csv).unwrap();
        assert_eq!(p.tickers(), &["AAA".to_string(), "BBB".to_string()]);
        assert_eq!(p.n_rows(), 3);
        assert_eq!(p.rows()[1][0], None);
        assert_eq!(p.rows()[2][1], Some(22.0));
    }

    #[test]
    fn test_parse_prices_bad_date() {
        let csv = "date,AAA\n01/02/2024,10.0\n";
        assert!(parse_prices(csv).is_err());
    }

    #[test]
    fn test_parse_holdings_case_insensitive() {
        let csv = "Ticker,Weight,Shares\nAAA,0.6,10\nBBB,0.4,\n";
        let h = parse_holdings(csv).unwrap();
        assert_eq!(h.len(), 2);
        assert_eq!(h[0].weight, Some(0.6));
        assert_eq!(h[0].quantity, Some(dec!(10)));
        assert_eq!(h[1].quantity, None);
    }

    #[test]
    fn test_parse_holdings_tickers_only() {
        let h = parse_holdings("symbol\nAAA\nBBB\n").unwrap();
        assert_eq!(h[1].ticker, "BBB");
        assert_eq!(h[1].weight, None);
    }

    #[test]
    fn test_parse_holdings_requires_ticker_column() {
        assert!(parse_holdings("name,weight\nApple,1.0\n").is_err());
    }
}

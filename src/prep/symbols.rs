//! 4.H step 3 — symbol discovery via `GET /v2/assets`.
//!
//! Grounded on `original_source/trading_bot/workspace/tradingBot.cpp`'s
//! `getAvailableSymbols`/`updateSymbol`/`updateSymbolData`: the array
//! parser's field callback records raw string fields, the record callback
//! applies the active/tradable/exchange/all-caps filter and only then
//! pushes the symbol into the result.
use crate::engine::symbol::Exchange;
use crate::error::{EngineError, Result};
use crate::json::array::parse_array;

#[derive(Debug, Clone, Default)]
struct RawAsset {
    symbol: String,
    class: String,
    exchange: String,
    status: String,
    tradable: bool,
    shortable: bool,
    easy_to_borrow: bool,
}

#[derive(Debug, Clone)]
pub struct DiscoveredSymbol {
    pub ticker: String,
    pub exchange: Exchange,
}

/// Parses the `/v2/assets?status=active&asset_class=us_equity` response
/// body and retains only symbols that are active, tradable, listed on NYSE
/// or NASDAQ, and whose ticker is all upper-case ASCII.
pub fn discover_symbols(assets_json: &str) -> Result<Vec<DiscoveredSymbol>> {
    let mut record = RawAsset::default();
    let mut out: Vec<DiscoveredSymbol> = Vec::new();

    parse_array(
        assets_json,
        &mut record,
        &mut out,
        |rec, key, value| match key {
            "symbol" => rec.symbol = value.to_string(),
            "class" => rec.class = value.to_string(),
            "exchange" => rec.exchange = value.to_string(),
            "status" => rec.status = value.to_string(),
            "tradable" => rec.tradable = value == "true",
            "shortable" => rec.shortable = value == "true",
            "easy_to_borrow" => rec.easy_to_borrow = value == "true",
            _ => {}
        },
        |rec, collector| {
            if let Some(exchange) = accept(rec) {
                collector.push(DiscoveredSymbol {
                    ticker: rec.symbol.clone(),
                    exchange,
                });
            }
            *rec = RawAsset::default();
        },
    )?;

    if out.is_empty() {
        return Err(EngineError::PrecheckFailure("no symbols available to trade".into()));
    }
    Ok(out)
}

fn accept(asset: &RawAsset) -> Option<Exchange> {
    if asset.status != "active" || !asset.tradable {
        return None;
    }
    let exchange = match asset.exchange.as_str() {
        "NYSE" => Exchange::Nyse,
        "NASDAQ" => Exchange::Nasdaq,
        _ => return None,
    };
    if asset.symbol.is_empty() || !asset.symbol.bytes().all(|b| b.is_ascii_uppercase()) {
        return None;
    }
    Some(exchange)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_active_tradable_nyse_nasdaq_uppercase_only() {
        let json = r#"[
            {"symbol":"AAPL","class":"us_equity","exchange":"NASDAQ","status":"active","tradable":true,"shortable":true,"easy_to_borrow":true},
            {"symbol":"BRK.B","class":"us_equity","exchange":"NYSE","status":"active","tradable":true,"shortable":true,"easy_to_borrow":true},
            {"symbol":"IBKR","class":"us_equity","exchange":"ARCA","status":"active","tradable":true,"shortable":true,"easy_to_borrow":true},
            {"symbol":"DEAD","class":"us_equity","exchange":"NYSE","status":"inactive","tradable":false,"shortable":false,"easy_to_borrow":false}
        ]"#;
        let symbols = discover_symbols(json).unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].ticker, "AAPL");
        assert_eq!(symbols[0].exchange, Exchange::Nasdaq);
    }

    #[test]
    fn empty_result_is_a_precheck_failure() {
        let err = discover_symbols("[]").unwrap_err();
        assert!(matches!(err, EngineError::PrecheckFailure(_)));
    }
}

//! 4.H — per-day preparation pipeline: the six steps that run once before
//! market open and produce the static daily inputs the realtime engine
//! (`engine::Engine`) consumes for the rest of the session.
//!
//! Grounded on `original_source/trading_bot/workspace/tradingBot.cpp`'s
//! `start()`, which runs these same six steps in sequence and aborts the
//! day on the first failure (spec 4.H, section 7 `PrecheckFailure`).
pub mod daily_bars;
pub mod precheck;
pub mod qpl;
pub mod symbols;
pub mod warmup;

use std::collections::HashMap;
use std::time::Duration;

use openssl::ssl::SslConnector;

use crate::engine::symbol::Symbol;
use crate::error::{EngineError, Result};
use crate::model::scaler::Scalers;
use crate::net::http::{BlockingClient, HttpRequest, Method};
use crate::net::tls::TlsSocket;
use crate::net::ws::WsClient;

/// Everything the day's preparation pipeline produces for the realtime
/// engine: the populated symbol table (non-outliers only) and the
/// account's non-marginable buying power as of the precheck.
pub struct DailyPrep {
    pub symbols: HashMap<String, Symbol>,
    pub buying_power: f64,
    pub data_feed: WsClient,
}

/// `GET /v2/assets?status=active&asset_class=us_equity` against the
/// trading host (step 3 reuses the precheck client rather than the
/// data-fetching pool since it's a single request).
fn fetch_assets(client: &BlockingClient, host: &str, headers: &[(String, String)]) -> Result<String> {
    let mut req = HttpRequest::new(Method::Get, host, "/v2/assets")
        .query("status", "active")
        .query("asset_class", "us_equity");
    for (k, v) in headers {
        req = req.header(k, v);
    }
    let response = client.get_with_init_budget(&req)?;
    if response.status != 200 {
        return Err(EngineError::PrecheckFailure(format!(
            "assets endpoint returned status {}",
            response.status
        )));
    }
    Ok(String::from_utf8_lossy(&response.body).to_string())
}

/// Runs the full per-day pipeline: calendar/account prechecks, symbol
/// discovery, historical daily bars, QPL parameter calculation, and the
/// intraday volume warm-up, in that order (spec 4.H). `date` is the
/// current trading day as `YYYY-MM-DD`. `max_clients` bounds both the
/// historical and intraday HTTP client pools.
#[allow(clippy::too_many_arguments)]
pub fn run(
    connector: &SslConnector,
    trading_host: &str,
    data_host: &str,
    trading_port: u16,
    headers: &[(String, String)],
    ws_headers: &[(String, String)],
    date: &str,
    allocated_buying_power: f64,
    risk_per_trade: f64,
    scalers: &Scalers,
    max_clients: usize,
    timeout: Duration,
) -> Result<DailyPrep> {
    let blocking = BlockingClient::new(connector.clone(), trading_host, trading_port, timeout);

    precheck::check_calendar(&blocking, trading_host, headers, date)?;
    let buying_power = precheck::check_account(&blocking, trading_host, headers, allocated_buying_power, risk_per_trade)?;

    let assets_json = fetch_assets(&blocking, trading_host, headers)?;
    let discovered = symbols::discover_symbols(&assets_json)?;
    let tickers: Vec<String> = discovered.iter().map(|d| d.ticker.clone()).collect();

    let window_end = date.to_string();
    let window_start = two_thousand_trading_days_before(date);
    let bars_by_ticker = daily_bars::fetch_all(
        connector,
        trading_host,
        &tickers,
        &window_start,
        &window_end,
        headers,
        max_clients,
        timeout,
    )?;

    let mut table: HashMap<String, Symbol> = HashMap::new();
    for discovered_symbol in &discovered {
        let bars = bars_by_ticker.get(&discovered_symbol.ticker).map(Vec::as_slice).unwrap_or(&[]);
        let daily = qpl::compute_daily_statics(bars, scalers);
        if daily.is_outlier {
            continue;
        }
        let mut symbol = Symbol::new(discovered_symbol.ticker.clone(), discovered_symbol.exchange);
        symbol.daily = daily;
        table.insert(discovered_symbol.ticker.clone(), symbol);
    }

    if table.is_empty() {
        return Err(EngineError::PrecheckFailure("no stocks available to trade".into()));
    }

    let watch_list: Vec<String> = table.keys().cloned().collect();

    let socket = TlsSocket::connect(connector, data_host, 443)?;
    let mut data_feed = warmup::open_data_feed(Box::new(socket), data_host, &watch_list, timeout)?;

    let first_bars = warmup::recv_first_bar_update(&mut data_feed, timeout)?;
    let earliest_timestamp = first_bars
        .iter()
        .map(|(_, t, _)| t.as_str())
        .min()
        .ok_or_else(|| EngineError::ProtocolViolation("first minute bar update carried no bars".into()))?;
    let backfill_end = warmup::one_minute_before(earliest_timestamp)?;

    let backfilled = warmup::backfill_vsum(
        connector,
        trading_host,
        &watch_list,
        date,
        &backfill_end,
        headers,
        max_clients,
        timeout,
    )?;
    let totals = warmup::fold_first_bar_into_totals(backfilled, &first_bars);

    for (ticker, vsum) in totals {
        if let Some(symbol) = table.get_mut(&ticker) {
            symbol.vsum = vsum;
        }
    }

    warmup::subscribe_trades_and_quotes(&mut data_feed, &watch_list, timeout)?;

    Ok(DailyPrep { symbols: table, buying_power, data_feed })
}

/// Alpaca's daily-bars endpoint is keyed by calendar date, not trading
/// day count, so the lookback window is padded generously (spec 4.H
/// step 4 wants up to `lookback_period` *completed* trading days; this
/// requests a calendar span wide enough to cover it after weekends and
/// holidays are accounted for).
fn two_thousand_trading_days_before(date: &str) -> String {
    use chrono::{Duration as ChronoDuration, NaiveDate};
    let Ok(day) = NaiveDate::parse_from_str(date, "%Y-%m-%d") else {
        return date.to_string();
    };
    let start = day - ChronoDuration::days(2900);
    start.format("%Y-%m-%d").to_string()
}

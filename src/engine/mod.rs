//! The realtime per-symbol trading engine (spec 4.I): the hot path that
//! turns trade/quote/bar/error messages into rolling statistics, quantum
//! price level crossings, MLP scores, and position-update decisions.
pub mod features;
pub mod position;
pub mod qpl_levels;
pub mod reactor;
pub mod rolling;
pub mod symbol;

use std::collections::HashMap;

use crate::error::{EngineError, Result};
use crate::model::Model;
use crate::numeric;
use position::OrderBroker;
use rolling::{Quote, Trade};
use symbol::{Side, Symbol};

const MIN_TRADE_SIZE: i64 = 100;

pub struct Engine {
    pub symbols: HashMap<String, Symbol>,
    pub buying_power: f64,
    pub risk_per_trade: f64,
    pub trading_permitted: bool,
    model: Model,
}

/// Parsed, pre-filter representation of one trade message (fields already
/// pulled out of the feed envelope by the caller via 4.D's object parser).
pub struct RawTrade<'a> {
    pub ticker: &'a str,
    pub exchange: char,
    pub condition: &'a str,
    pub timestamp: &'a str,
    pub price: f64,
    pub size: i64,
}

pub struct RawQuote<'a> {
    pub ticker: &'a str,
    pub exchange: char,
    pub timestamp: &'a str,
    pub bid: f64,
    pub ask: f64,
}

impl Engine {
    pub fn new(model: Model, buying_power: f64, risk_per_trade: f64) -> Self {
        Engine {
            symbols: HashMap::new(),
            buying_power,
            risk_per_trade,
            trading_permitted: true,
            model,
        }
    }

    /// Trade handler (spec 4.I). Filters, updates the rolling window and
    /// quantum level, evaluates the scoring gate, and on a level crossing
    /// drives the position-update state machine.
    pub fn handle_trade(&mut self, trade: RawTrade, broker: &mut impl OrderBroker) -> Result<()> {
        if trade.exchange == 'D' {
            return Ok(());
        }
        if trade.size < MIN_TRADE_SIZE {
            return Ok(());
        }
        if trade.condition.contains('U') || trade.condition.contains('Z') {
            return Ok(());
        }
        if trade.price <= 0.0 {
            return Ok(());
        }

        let Some(symbol) = self.symbols.get_mut(trade.ticker) else {
            return Ok(());
        };

        let t = numeric::to_utc_ns(trade.timestamp)?;
        symbol.trades.push(Trade { t, price: trade.price, size: trade.size });
        symbol.trades.evict_stale();

        let (dt, dp) = symbol.trades.dt_seconds_and_dp().unwrap_or((0.0, 1.0));
        let rolling_vsum = symbol.trades.rolling_vsum();
        let rolling_count = symbol.trades.len();

        let past_quote = symbol.quotes.most_recent_before(t);
        let has_past_quote = past_quote.is_some();

        let mut new_n = symbol.n;
        shift_quantum_level(&symbol.daily, &mut new_n, trade.price);

        if !symbol.found_first_n {
            symbol.n = new_n;
            symbol.new_n = new_n;
            symbol.found_first_n = true;
            return Ok(());
        }
        symbol.new_n = new_n;

        if new_n != symbol.n && has_past_quote {
            let quote = past_quote.unwrap();

            // sticky entry price for every update_position call on this
            // symbol until the next crossing, including calls driven by
            // account-update reconciliation (spec 4.I step 6/7).
            let price_at_n = qpl_levels::price_level(
                symbol.daily.previous_close,
                symbol.daily.std,
                symbol.daily.lambda,
                symbol.daily.e0,
                new_n,
                0,
            )
            .unwrap_or(symbol.daily.previous_close);
            symbol.entry_price = round_price(price_at_n.max(trade.price));

            let raw = features::raw_features(
                t,
                symbol.relative_volume(),
                symbol.n,
                symbol.daily.mean,
                dp,
                symbol.daily.std,
                dt,
                symbol.vsum,
                symbol.daily.average_volume,
                symbol.daily.previous_close,
                rolling_count,
                rolling_vsum,
                symbol.daily.p_minus,
                trade.size,
                symbol.daily.p_plus,
                symbol.daily.lambda,
            );

            let gate_ok = features::failing_inlier_features(&self.model.scalers, &raw).is_empty()
                && features::passes_notional_and_count_gate(
                    &self.model.scalers,
                    &features::TradeContext {
                        time_of_day_ns: t,
                        price: trade.price,
                        size: trade.size,
                        dt_seconds: dt,
                        dp,
                        rolling_vsum,
                        rolling_trade_count: rolling_count,
                    },
                );

            if gate_ok {
                let slippage = (quote.ask - quote.bid).max(0.0);
                let daily = &symbol.daily;
                let upper = qpl_levels::price_level(
                    daily.previous_close,
                    daily.std,
                    daily.lambda,
                    daily.e0,
                    new_n,
                    1,
                );
                let lower = qpl_levels::price_level(
                    daily.previous_close,
                    daily.std,
                    daily.lambda,
                    daily.e0,
                    new_n,
                    -1,
                );
                if let (Some(upper), Some(lower)) = (upper, lower) {
                    let gain_per_share = upper - trade.price - slippage;
                    let loss_per_share = trade.price - lower + slippage;
                    let standardized = features::standardize_all(&self.model.scalers, &raw);
                    let prob_up = self.model.prob_up(&standardized) as f64;

                    symbol.order.quantity_desired = if gain_per_share > 0.0
                        && loss_per_share > 0.0
                        && prob_up * (gain_per_share + loss_per_share) > loss_per_share
                    {
                        (self.risk_per_trade / loss_per_share).floor() as i64
                    } else {
                        0
                    };
                }
            }
        }

        if self.trading_permitted {
            let symbol = self.symbols.get_mut(trade.ticker).expect("symbol still present");
            let entry_price = symbol.entry_price;
            position::update_position(symbol, &mut self.buying_power, entry_price, broker)?;
        }

        let symbol = self.symbols.get_mut(trade.ticker).expect("symbol still present");
        symbol.n = symbol.new_n;
        Ok(())
    }

    /// Quote handler (spec 4.I): appended to the rolling quote window after
    /// the same exchange filter trades use.
    pub fn handle_quote(&mut self, quote: RawQuote) -> Result<()> {
        // Source branches on bx == 'D' (FINRA ADF) in one variant and not in
        // another; kept off here to match the newer variant (spec section 9).
        let Some(symbol) = self.symbols.get_mut(quote.ticker) else {
            return Ok(());
        };
        let t = numeric::to_utc_ns(quote.timestamp)?;
        symbol.quotes.push(Quote { t, bid: quote.bid, ask: quote.ask });
        Ok(())
    }

    /// Bar handler (spec 4.I): adds the bar's volume into the running
    /// session `vsum`.
    pub fn handle_bar(&mut self, ticker: &str, volume: i64) -> Result<()> {
        if let Some(symbol) = self.symbols.get_mut(ticker) {
            symbol.vsum += volume;
        }
        Ok(())
    }

    /// Error envelope handler (spec 4.I): always surfaces as a feed error.
    pub fn handle_error(&self, code: i64, msg: String) -> Result<()> {
        Err(EngineError::FeedError { code, msg })
    }

    /// One unit of bounded background maintenance (spec section 5): trims
    /// the quote window of a single symbol, rotating through the watch set
    /// round-robin across calls. Returns whether anything was trimmed.
    pub fn trim_one_quote_window(&mut self, cursor: &mut usize) -> bool {
        if self.symbols.is_empty() {
            return false;
        }
        let tickers: Vec<&String> = self.symbols.keys().collect();
        let idx = *cursor % tickers.len();
        let ticker = tickers[idx].clone();
        *cursor = (*cursor + 1) % tickers.len().max(1);

        if let Some(symbol) = self.symbols.get_mut(&ticker) {
            if let Some(newest) = symbol.trades.newest() {
                let before = symbol.quotes.len();
                symbol.quotes.trim(newest.t, 8);
                return symbol.quotes.len() != before;
            }
        }
        false
    }

    /// Best-effort end-of-session liquidation (spec section 4/5 error
    /// propagation policy): cancel every open order, then market-sell any
    /// owned quantity. Individual failures are swallowed; the caller's job
    /// is to tear the session down regardless.
    pub fn liquidate_all(&mut self, broker: &mut impl OrderBroker) {
        for symbol in self.symbols.values_mut() {
            if let Some(id) = symbol.order.order_id.clone() {
                let _ = broker.cancel(&id);
            }
            if symbol.order.quantity_owned > 0 {
                let _ = broker.submit_market(&symbol.ticker, symbol.order.quantity_owned, Side::Sell);
            } else if symbol.order.quantity_owned < 0 {
                let _ = broker.submit_market(&symbol.ticker, -symbol.order.quantity_owned, Side::Buy);
            }
        }
    }
}

/// Shifts `new_n` until `price` sits within `[price_level(new_n-1),
/// price_level(new_n+1)]` (spec 4.I step 4). Stops adjusting (rather than
/// erroring) if ground-state energy is momentarily unavailable.
fn shift_quantum_level(daily: &symbol::DailyStatics, new_n: &mut i64, price: f64) {
    loop {
        let Some(lower) = qpl_levels::price_level(
            daily.previous_close,
            daily.std,
            daily.lambda,
            daily.e0,
            *new_n,
            -1,
        ) else {
            return;
        };
        if price <= lower {
            *new_n -= 1;
        } else {
            break;
        }
    }
    loop {
        let Some(upper) = qpl_levels::price_level(
            daily.previous_close,
            daily.std,
            daily.lambda,
            daily.e0,
            *new_n,
            1,
        ) else {
            return;
        };
        if price >= upper {
            *new_n += 1;
        } else {
            break;
        }
    }
}

/// Price rounding (spec 4.J): 4 decimals below $1, 2 decimals at or above.
pub fn round_price(price: f64) -> f64 {
    let scale = if price < 1.0 { 10_000.0 } else { 100.0 };
    (price * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::symbol::Exchange;
    use crate::model::mlp::Mlp;
    use crate::model::scaler::Scalers;

    fn identity_scalers() -> Scalers {
        let entries: Vec<String> = crate::model::scaler::FEATURE_NAMES
            .iter()
            .map(|n| format!(r#"{{"feature name":"{n}","mean":0.0,"std":50.0}}"#))
            .collect();
        Scalers::load(&format!("[{}]", entries.join(","))).unwrap()
    }

    fn flat_model() -> Model {
        let layer_dims = [(16, 32), (32, 16), (16, 32), (32, 16), (16, 32), (32, 16), (16, 3)];
        let layers: Vec<(Vec<Vec<f32>>, Vec<f32>)> = layer_dims
            .iter()
            .map(|&(i, o)| (vec![vec![0.0f32; i]; o], vec![0.0f32; o]))
            .collect();
        Model { mlp: Mlp::from_raw_layers(&layers).unwrap(), scalers: identity_scalers() }
    }

    #[test]
    fn round_price_uses_four_decimals_below_a_dollar() {
        assert_eq!(round_price(0.12345), 0.1235);
        assert_eq!(round_price(12.345), 12.35);
    }

    #[test]
    fn handle_error_always_surfaces_feed_error() {
        let engine = Engine::new(flat_model(), 0.0, 0.0);
        let err = engine.handle_error(400, "bad".into()).unwrap_err();
        assert!(matches!(err, EngineError::FeedError { code: 400, .. }));
    }

    #[test]
    fn handle_bar_accumulates_volume_for_known_symbol() {
        let mut engine = Engine::new(flat_model(), 0.0, 0.0);
        engine.symbols.insert("AAPL".into(), Symbol::new("AAPL".into(), Exchange::Nasdaq));
        engine.handle_bar("AAPL", 500).unwrap();
        engine.handle_bar("AAPL", 250).unwrap();
        assert_eq!(engine.symbols["AAPL"].vsum, 750);
    }

    #[test]
    fn handle_trade_drops_small_size_and_finra_adf() {
        let mut engine = Engine::new(flat_model(), 10_000.0, 100.0);
        engine.symbols.insert("AAPL".into(), Symbol::new("AAPL".into(), Exchange::Nasdaq));
        struct NoopBroker;
        impl OrderBroker for NoopBroker {
            fn submit(&mut self, _: &str, _: i64, _: Side, _: f64) -> Result<String> {
                Ok("x".into())
            }
            fn replace(&mut self, _: &str, _: i64, _: f64) -> Result<Option<String>> {
                Ok(Some("x".into()))
            }
            fn cancel(&mut self, _: &str) -> Result<()> {
                Ok(())
            }
            fn submit_market(&mut self, _: &str, _: i64, _: Side) -> Result<String> {
                Ok("x".into())
            }
        }
        let mut broker = NoopBroker;
        engine
            .handle_trade(
                RawTrade {
                    ticker: "AAPL",
                    exchange: 'P',
                    condition: "",
                    timestamp: "2026-01-05T14:30:00Z",
                    price: 50.0,
                    size: 50,
                },
                &mut broker,
            )
            .unwrap();
        assert_eq!(engine.symbols["AAPL"].trades.len(), 0);

        engine
            .handle_trade(
                RawTrade {
                    ticker: "AAPL",
                    exchange: 'D',
                    condition: "",
                    timestamp: "2026-01-05T14:30:00Z",
                    price: 50.0,
                    size: 500,
                },
                &mut broker,
            )
            .unwrap();
        assert_eq!(engine.symbols["AAPL"].trades.len(), 0);
    }

    #[test]
    fn liquidate_all_market_sells_owned_longs() {
        let mut engine = Engine::new(flat_model(), 0.0, 0.0);
        let mut sym = Symbol::new("AAPL".into(), Exchange::Nasdaq);
        sym.order.quantity_owned = 40;
        sym.order.order_id = Some("o1".into());
        engine.symbols.insert("AAPL".into(), sym);

        struct RecordingBroker {
            canceled: Vec<String>,
            market_orders: Vec<(String, i64, Side)>,
        }
        impl OrderBroker for RecordingBroker {
            fn submit(&mut self, _: &str, _: i64, _: Side, _: f64) -> Result<String> {
                Ok("x".into())
            }
            fn replace(&mut self, _: &str, _: i64, _: f64) -> Result<Option<String>> {
                Ok(Some("x".into()))
            }
            fn cancel(&mut self, id: &str) -> Result<()> {
                self.canceled.push(id.to_string());
                Ok(())
            }
            fn submit_market(&mut self, ticker: &str, qty: i64, side: Side) -> Result<String> {
                self.market_orders.push((ticker.to_string(), qty, side));
                Ok("m1".into())
            }
        }
        let mut broker = RecordingBroker { canceled: Vec::new(), market_orders: Vec::new() };
        engine.liquidate_all(&mut broker);

        assert_eq!(broker.canceled, vec!["o1".to_string()]);
        assert_eq!(broker.market_orders, vec![("AAPL".to_string(), 40, Side::Sell)]);
    }
}

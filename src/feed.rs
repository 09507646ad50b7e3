//! Dispatches data-feed WebSocket messages (the `T`-discriminated trade,
//! quote, bar, and error envelopes) into `engine::Engine`'s handlers, and
//! does the equivalent dispatch for the account feed's trade-update
//! envelopes into `broker::account::reconcile`.
//!
//! Grounded on `original_source/trading_bot/workspace/tradingBot.cpp`'s
//! `updateTradeOrBarInfo`/`updateSymbolData` (field-by-field record
//! assembly keyed by the short JSON field names the feed actually uses,
//! then per-`T` dispatch) and `handleTradeUpdate` for the account side.
use crate::engine::position::OrderBroker;
use crate::engine::symbol::Symbol;
use crate::engine::{Engine, RawQuote, RawTrade};
use crate::error::{EngineError, Result};
use crate::json::array::parse_array;
use crate::numeric;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
struct RawEnvelope {
    t_type: String,
    ticker: String,
    size: String,
    price: String,
    timestamp: String,
    trade_exchange: String,
    condition: String,
    volume: String,
    bid_exchange: String,
    bid_price: String,
    ask_exchange: String,
    ask_price: String,
    code: String,
    msg: String,
}

enum Event {
    Trade { ticker: String, exchange: char, condition: String, timestamp: String, price: f64, size: i64 },
    Quote { ticker: String, exchange: char, timestamp: String, bid: f64, ask: f64 },
    Bar { ticker: String, volume: i64 },
    Error { code: i64, msg: String },
    /// Connection/auth/subscription acks and anything else not relevant
    /// once the feed is streaming live data (spec 4.D, section 7).
    Ignored,
}

fn first_char(s: &str, default: char) -> char {
    s.chars().next().unwrap_or(default)
}

fn finish_envelope(raw: &RawEnvelope) -> Result<Event> {
    match raw.t_type.as_str() {
        "t" => Ok(Event::Trade {
            ticker: raw.ticker.clone(),
            exchange: first_char(&raw.trade_exchange, ' '),
            condition: raw.condition.clone(),
            timestamp: raw.timestamp.clone(),
            price: numeric::to_double(&raw.price)?,
            size: numeric::to_long(&raw.size)?,
        }),
        "q" => Ok(Event::Quote {
            ticker: raw.ticker.clone(),
            exchange: first_char(&raw.bid_exchange, ' '),
            timestamp: raw.timestamp.clone(),
            bid: numeric::to_double(&raw.bid_price)?,
            ask: numeric::to_double(&raw.ask_price)?,
        }),
        "b" => Ok(Event::Bar { ticker: raw.ticker.clone(), volume: numeric::to_long(&raw.volume)? }),
        "error" => Ok(Event::Error { code: numeric::to_long(&raw.code).unwrap_or(0), msg: raw.msg.clone() }),
        _ => Ok(Event::Ignored),
    }
}

/// Parses a data-feed message body (a JSON array of envelopes) and
/// applies each one to `engine` in order.
pub fn dispatch_data_message(engine: &mut Engine, body: &str, broker: &mut impl OrderBroker) -> Result<()> {
    let mut record = RawEnvelope::default();
    let mut events: Vec<Result<Event>> = Vec::new();
    parse_array(
        body,
        &mut record,
        &mut events,
        |rec, key, value| match key {
            "T" => rec.t_type = value.to_string(),
            "S" => rec.ticker = value.to_string(),
            "s" => rec.size = value.to_string(),
            "p" => rec.price = value.to_string(),
            "t" => rec.timestamp = value.to_string(),
            "x" => rec.trade_exchange = value.to_string(),
            "c" => rec.condition = value.to_string(),
            "v" => rec.volume = value.to_string(),
            "bx" => rec.bid_exchange = value.to_string(),
            "bp" => rec.bid_price = value.to_string(),
            "ax" => rec.ask_exchange = value.to_string(),
            "ap" => rec.ask_price = value.to_string(),
            "code" => rec.code = value.to_string(),
            "msg" => rec.msg = value.to_string(),
            _ => {}
        },
        |rec, collector| {
            collector.push(finish_envelope(rec));
            *rec = RawEnvelope::default();
        },
    )?;

    for event in events {
        match event? {
            Event::Trade { ticker, exchange, condition, timestamp, price, size } => {
                engine.handle_trade(
                    RawTrade { ticker: &ticker, exchange, condition: &condition, timestamp: &timestamp, price, size },
                    broker,
                )?;
            }
            Event::Quote { ticker, exchange, timestamp, bid, ask } => {
                engine.handle_quote(RawQuote { ticker: &ticker, exchange, timestamp: &timestamp, bid, ask })?;
            }
            Event::Bar { ticker, volume } => {
                engine.handle_bar(&ticker, volume)?;
            }
            Event::Error { code, msg } => {
                engine.handle_error(code, msg)?;
            }
            Event::Ignored => {}
        }
    }
    Ok(())
}

/// Parses an account-feed message body (a single `{"stream":
/// "trade_updates", ...}` envelope, not an array) and reconciles it
/// against `symbols`/`buying_power`.
pub fn dispatch_account_message(
    symbols: &mut HashMap<String, Symbol>,
    buying_power: &mut f64,
    trading_permitted: bool,
    body: &str,
    broker: &mut impl OrderBroker,
) -> Result<Option<String>> {
    if !body.trim_start().starts_with('{') {
        return Err(EngineError::MalformedJson("account message is not an object".into()));
    }
    crate::broker::account::reconcile(symbols, buying_power, trading_permitted, body, broker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::symbol::{Exchange, Side};
    use crate::model::mlp::Mlp;
    use crate::model::scaler::Scalers;
    use crate::model::Model;

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

    #[test]
    fn dispatches_bar_update_into_vsum() {
        let mut engine = Engine::new(flat_model(), 0.0, 0.0);
        engine.symbols.insert("AAPL".into(), Symbol::new("AAPL".into(), Exchange::Nasdaq));
        let mut broker = NoopBroker;
        let body = r#"[{"T":"b","S":"AAPL","v":1200}]"#;
        dispatch_data_message(&mut engine, body, &mut broker).unwrap();
        assert_eq!(engine.symbols["AAPL"].vsum, 1200);
    }

    #[test]
    fn dispatches_quote_into_rolling_window() {
        let mut engine = Engine::new(flat_model(), 0.0, 0.0);
        engine.symbols.insert("AAPL".into(), Symbol::new("AAPL".into(), Exchange::Nasdaq));
        let mut broker = NoopBroker;
        let body = r#"[{"T":"q","S":"AAPL","bx":"P","bp":100.0,"ax":"P","ap":100.5,"t":"2026-01-05T14:30:00Z"}]"#;
        dispatch_data_message(&mut engine, body, &mut broker).unwrap();
        assert_eq!(engine.symbols["AAPL"].quotes.len(), 1);
    }

    #[test]
    fn error_envelope_propagates_as_feed_error() {
        let mut engine = Engine::new(flat_model(), 0.0, 0.0);
        let mut broker = NoopBroker;
        let body = r#"[{"T":"error","code":400,"msg":"invalid syntax"}]"#;
        let err = dispatch_data_message(&mut engine, body, &mut broker).unwrap_err();
        assert!(matches!(err, EngineError::FeedError { code: 400, .. }));
    }

    #[test]
    fn ignores_subscription_acks() {
        let mut engine = Engine::new(flat_model(), 0.0, 0.0);
        let mut broker = NoopBroker;
        let body = r#"[{"T":"subscription","trades":["AAPL"]}]"#;
        dispatch_data_message(&mut engine, body, &mut broker).unwrap();
    }

    #[test]
    fn dispatch_account_message_rejects_non_object_body() {
        let mut symbols = HashMap::new();
        let mut buying_power = 0.0;
        let mut broker = NoopBroker;
        let err = dispatch_account_message(&mut symbols, &mut buying_power, false, "[]", &mut broker).unwrap_err();
        assert!(matches!(err, EngineError::MalformedJson(_)));
    }
}

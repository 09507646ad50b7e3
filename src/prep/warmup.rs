//! 4.H step 6 — intraday volume warm-up. Opens the data WebSocket,
//! waits for the connection/authentication handshake messages the feed
//! sends unprompted, subscribes to minute bars for the day's non-outlier
//! symbols, waits for the first streamed bar, then backfills every
//! symbol's `vsum` from `00:00:00Z` up to the minute before that bar over
//! the REST daily-bars-style client pool. Only after that backfill
//! completes does it subscribe to trades and quotes, handing back a
//! `WsClient` ready for the realtime engine to drive.
//!
//! Grounded on `original_source/trading_bot/workspace/tradingBot.cpp`'s
//! inline warm-up sequence (the `data_ws`/`intradayParser` block between
//! the daily-bars fetch and the account websocket's opening).
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use openssl::ssl::SslConnector;

use crate::error::{EngineError, Result};
use crate::json::array::parse_array;
use crate::json::object::parse_object_literal;
use crate::net::http::{HttpClient, HttpRequest, HttpResponse, HttpState, Method};
use crate::net::tls::TlsSocket;
use crate::net::ws::{Opcode, WsClient, WsMessage};
use crate::numeric;

/// Strips the single-element array wrapper the feed sends its
/// connection/auth/subscription acks in and parses the inner object.
fn expect_array_message(payload: &[u8]) -> Result<HashMap<String, String>> {
    let text = String::from_utf8_lossy(payload);
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| EngineError::ProtocolViolation("expected a single-element JSON array".into()))?;
    parse_object_literal(inner.trim())
}

fn recv_message(ws: &mut WsClient, deadline: Instant) -> Result<WsMessage> {
    let mut msg = WsMessage::default();
    loop {
        if ws.recv(&mut msg)? {
            if !msg.payload.is_empty() {
                return Ok(msg);
            }
            // control frame only (ping/close with signal_on_control off
            // would never reach here); keep waiting for an app message.
        }
        if Instant::now() > deadline {
            return Err(EngineError::TimedOut("waiting for data feed message".into()));
        }
    }
}

fn expect_field(fields: &HashMap<String, String>, key: &str, expected: &str, context: &str) -> Result<()> {
    match fields.get(key) {
        Some(v) if v == expected => Ok(()),
        Some(v) => Err(EngineError::ProtocolViolation(format!(
            "{context}: expected {key}={expected}, got {v}"
        ))),
        None => Err(EngineError::ProtocolViolation(format!("{context}: missing {key}"))),
    }
}

/// Opens the data feed, waits for the connected/authenticated acks
/// (the feed sends these on its own once the handshake headers carry
/// valid credentials), and subscribes to minute bars for `tickers`.
pub fn open_data_feed(
    transport: Box<dyn crate::net::Transport>,
    host: &str,
    tickers: &[String],
    timeout: Duration,
) -> Result<WsClient> {
    let mut ws = WsClient::open(transport, host, "/v2/sip", timeout, false)?;
    let deadline = Instant::now() + timeout;

    let connected = recv_message(&mut ws, deadline)?;
    let fields = expect_array_message(&connected.payload)?;
    expect_field(&fields, "T", "success", "data feed connect")?;
    expect_field(&fields, "msg", "connected", "data feed connect")?;

    let authed = recv_message(&mut ws, deadline)?;
    let fields = expect_array_message(&authed.payload)?;
    expect_field(&fields, "T", "success", "data feed auth")?;
    expect_field(&fields, "msg", "authenticated", "data feed auth")?;

    let symbol_list: Vec<String> = tickers.iter().map(|t| format!("\"{t}\"")).collect();
    let bar_sub_msg = format!(r#"{{"action": "subscribe", "bars": [{}]}}"#, symbol_list.join(","));
    ws.send(Opcode::Text, bar_sub_msg.as_bytes())?;

    let ack = recv_message(&mut ws, deadline)?;
    let fields = expect_array_message(&ack.payload)?;
    expect_field(&fields, "T", "subscription", "bar subscription")?;

    Ok(ws)
}

/// Sends the trades+quotes subscription message once the minute-bar
/// backfill has completed, waiting for the subscription ack.
pub fn subscribe_trades_and_quotes(ws: &mut WsClient, tickers: &[String], timeout: Duration) -> Result<()> {
    let symbol_list: Vec<String> = tickers.iter().map(|t| format!("\"{t}\"")).collect();
    let msg = format!(
        r#"{{"action": "subscribe", "quotes": [{0}], "trades": [{0}]}}"#,
        symbol_list.join(",")
    );
    ws.send(Opcode::Text, msg.as_bytes())?;
    let deadline = Instant::now() + timeout;
    let ack = recv_message(ws, deadline)?;
    let fields = expect_array_message(&ack.payload)?;
    expect_field(&fields, "T", "subscription", "trade/quote subscription")?;
    Ok(())
}

/// Opens the account-update WebSocket (`/stream`) and runs its two-step
/// handshake: an explicit `auth` action message (unlike the data feed,
/// this stream does not authenticate off handshake headers) followed by
/// a `listen` action subscribing to `trade_updates`. Both acks are plain
/// objects (not the single-element-array shape the data feed uses).
pub fn open_account_feed(
    transport: Box<dyn crate::net::Transport>,
    host: &str,
    api_key: &str,
    api_secret: &str,
    timeout: Duration,
) -> Result<WsClient> {
    let mut ws = WsClient::open(transport, host, "/stream", timeout, false)?;
    let deadline = Instant::now() + timeout;

    let auth_msg = format!(r#"{{"action": "auth", "key": "{api_key}", "secret": "{api_secret}"}}"#);
    ws.send(Opcode::Text, auth_msg.as_bytes())?;

    let auth_ack = recv_message(&mut ws, deadline)?;
    let envelope = parse_object_literal(String::from_utf8_lossy(&auth_ack.payload).trim())?;
    expect_field(&envelope, "stream", "authorization", "account feed auth")?;
    let data_literal = envelope
        .get("data")
        .ok_or_else(|| EngineError::ProtocolViolation("account feed auth missing data".into()))?;
    let data = parse_object_literal(data_literal)?;
    expect_field(&data, "action", "authenticate", "account feed auth")?;
    expect_field(&data, "status", "authorized", "account feed auth")?;

    let listen_msg = r#"{"action": "listen", "data": {"streams": ["trade_updates"]}}"#;
    ws.send(Opcode::Text, listen_msg.as_bytes())?;

    let listen_ack = recv_message(&mut ws, deadline)?;
    let envelope = parse_object_literal(String::from_utf8_lossy(&listen_ack.payload).trim())?;
    expect_field(&envelope, "stream", "listening", "account feed listen")?;
    let data_literal = envelope
        .get("data")
        .ok_or_else(|| EngineError::ProtocolViolation("account feed listen missing data".into()))?;
    if !data_literal.contains("trade_updates") {
        return Err(EngineError::ProtocolViolation(
            "account feed did not confirm the trade_updates stream".into(),
        ));
    }

    Ok(ws)
}

struct RawBarUpdate {
    ticker: String,
    timestamp: String,
    volume: String,
}

/// Blocks until at least one minute-bar update message arrives on the
/// feed, returning every bar the message carried (usually one) with
/// volumes already parsed. The message is a JSON array of bar objects,
/// each carrying its own `S` (symbol) field (spec 4.D).
pub fn recv_first_bar_update(ws: &mut WsClient, timeout: Duration) -> Result<Vec<(String, String, i64)>> {
    let deadline = Instant::now() + timeout;
    let msg = recv_message(ws, deadline)?;
    let text = String::from_utf8_lossy(&msg.payload).to_string();

    let mut record = RawBarUpdate { ticker: String::new(), timestamp: String::new(), volume: String::new() };
    let mut collected: Vec<Result<(String, String, i64)>> = Vec::new();
    parse_array(
        &text,
        &mut record,
        &mut collected,
        |rec, key, value| match key {
            "S" => rec.ticker = value.to_string(),
            "t" => rec.timestamp = value.to_string(),
            "v" => rec.volume = value.to_string(),
            _ => {}
        },
        |rec, collector| {
            if rec.ticker == "b" {
                // ignore non-bar records that slip through (e.g. a
                // trailing status message batched into the same array)
                *rec = RawBarUpdate { ticker: String::new(), timestamp: String::new(), volume: String::new() };
                return;
            }
            collector.push(numeric::to_long(&rec.volume).map(|v| (rec.ticker.clone(), rec.timestamp.clone(), v)));
            *rec = RawBarUpdate { ticker: String::new(), timestamp: String::new(), volume: String::new() };
        },
    )?;

    let mut out = Vec::with_capacity(collected.len());
    for r in collected {
        out.push(r?);
    }
    Ok(out)
}

/// One minute before `timestamp` (an RFC 3339 `...THH:MM:00Z` bar
/// timestamp), rolling back across the hour boundary. Mirrors the
/// original's string-surgery exactly since the feed always emits
/// zero-second, whole-minute timestamps for bars.
pub fn one_minute_before(timestamp: &str) -> Result<String> {
    if timestamp.len() < 19 {
        return Err(EngineError::MalformedJson(format!("bar timestamp too short: {timestamp}")));
    }
    let hour: i64 = timestamp[11..13]
        .parse()
        .map_err(|_| EngineError::NumberFormat(timestamp.to_string()))?;
    let minute: i64 = timestamp[14..16]
        .parse()
        .map_err(|_| EngineError::NumberFormat(timestamp.to_string()))?;

    if minute == 0 {
        if hour == 0 {
            return Err(EngineError::ProtocolViolation(
                "first minute bar arrived at midnight, nothing to backfill".into(),
            ));
        }
        Ok(format!("{}{:02}:59:00Z", &timestamp[..11], hour - 1))
    } else {
        Ok(format!("{}{:02}:{:02}:00Z", &timestamp[..11], hour, minute - 1))
    }
}

struct BarSlot {
    ticker: String,
    client: HttpClient,
    response: HttpResponse,
}

#[allow(clippy::too_many_arguments)]
fn build_intraday_request(
    host: &str,
    ticker: &str,
    start: &str,
    end: &str,
    page_token: Option<&str>,
    headers: &[(String, String)],
) -> HttpRequest {
    let mut req = HttpRequest::new(Method::Get, host, "/v2/stocks/bars")
        .query("symbols", ticker)
        .query("timeframe", "1Min")
        .query("start", start)
        .query("end", end)
        .query("limit", "10000")
        .query("adjustment", "all")
        .query("feed", "sip");
    if let Some(token) = page_token {
        req = req.query("page_token", token);
    }
    for (k, v) in headers {
        req = req.header(k, v);
    }
    req
}

struct RawMinuteBar {
    v: String,
}

fn sum_page_volume(ticker: &str, body: &str) -> Result<(i64, Option<String>)> {
    let top = parse_object_literal(body.trim())?;
    let next_page_token = top
        .get("next_page_token")
        .filter(|v| v.as_str() != "null" && !v.is_empty())
        .cloned();

    let Some(bars_literal) = top.get("bars") else {
        return Ok((0, next_page_token));
    };
    let bars_by_ticker = parse_object_literal(bars_literal)?;
    let Some(array_literal) = bars_by_ticker.get(ticker) else {
        return Ok((0, next_page_token));
    };

    let mut record = RawMinuteBar { v: String::new() };
    let mut collected: Vec<Result<i64>> = Vec::new();
    parse_array(
        array_literal,
        &mut record,
        &mut collected,
        |rec, key, value| {
            if key == "v" {
                rec.v = value.to_string();
            }
        },
        |rec, collector| {
            collector.push(numeric::to_long(&rec.v));
            rec.v.clear();
        },
    )?;

    let mut total = 0i64;
    for r in collected {
        total += r?;
    }
    Ok((total, next_page_token))
}

/// Backfills `vsum` for every ticker from `00:00:00Z` up to `end` (one
/// minute before the first streamed bar), returning each ticker's
/// accumulated volume. Uses the same bounded round-robin client pool
/// shape as daily bars (`prep::daily_bars::fetch_all`).
pub fn backfill_vsum(
    connector: &SslConnector,
    host: &str,
    tickers: &[String],
    date: &str,
    end: &str,
    headers: &[(String, String)],
    max_clients: usize,
    timeout: Duration,
) -> Result<HashMap<String, i64>> {
    let start = format!("{date}T00:00:00Z");
    let num_clients = max_clients.min(tickers.len()).max(1);
    let mut remaining: VecDeque<String> = tickers.iter().cloned().collect();
    let mut slots: Vec<Option<BarSlot>> = Vec::with_capacity(num_clients);

    for _ in 0..num_clients {
        let Some(ticker) = remaining.pop_front() else {
            slots.push(None);
            continue;
        };
        let socket = TlsSocket::connect(connector, host, 443)?;
        let req = build_intraday_request(host, &ticker, &start, end, None, headers);
        let client = HttpClient::new(Box::new(socket), &req, timeout);
        slots.push(Some(BarSlot { ticker, client, response: HttpResponse::default() }));
    }

    let mut totals: HashMap<String, i64> = HashMap::new();
    let mut running: HashMap<String, i64> = HashMap::new();

    while slots.iter().any(|s| s.is_some()) {
        for i in 0..slots.len() {
            let Some(slot) = slots[i].as_mut() else { continue };
            match slot.client.step(&mut slot.response)? {
                HttpState::ReceivedResponse => {
                    if slot.response.status != 200 {
                        return Err(EngineError::PrecheckFailure(format!(
                            "intraday bars request for {} returned status {}",
                            slot.ticker, slot.response.status
                        )));
                    }
                    let body = String::from_utf8_lossy(&slot.response.body).to_string();
                    let (volume, next_token) = sum_page_volume(&slot.ticker, &body)?;
                    *running.entry(slot.ticker.clone()).or_insert(0) += volume;

                    if let Some(token) = next_token {
                        let req = build_intraday_request(host, &slot.ticker, &start, end, Some(&token), headers);
                        let socket = TlsSocket::connect(connector, host, 443)?;
                        slot.client = HttpClient::new(Box::new(socket), &req, timeout);
                        slot.response = HttpResponse::default();
                    } else {
                        let finished = slots[i].take().unwrap();
                        let total = running.remove(&finished.ticker).unwrap_or(0);
                        totals.insert(finished.ticker, total);
                        if let Some(next_ticker) = remaining.pop_front() {
                            let socket = TlsSocket::connect(connector, host, 443)?;
                            let req = build_intraday_request(host, &next_ticker, &start, end, None, headers);
                            let client = HttpClient::new(Box::new(socket), &req, timeout);
                            slots[i] = Some(BarSlot { ticker: next_ticker, client, response: HttpResponse::default() });
                        }
                    }
                }
                HttpState::TimedOut => {
                    return Err(EngineError::TimedOut(format!(
                        "intraday bars request for {} timed out",
                        slot.ticker
                    )));
                }
                _ => {}
            }
        }
    }

    Ok(totals)
}

/// Result of the full warm-up step: each ticker's `vsum` as of the
/// minute before live bar streaming started, plus that first streamed
/// bar's volume already added in (spec 4.H step 6 folds it into the
/// running sum, it isn't double counted by the backfill window since
/// the backfill end is exclusive of that minute).
pub fn fold_first_bar_into_totals(mut totals: HashMap<String, i64>, first_bars: &[(String, String, i64)]) -> HashMap<String, i64> {
    for (ticker, _timestamp, volume) in first_bars {
        *totals.entry(ticker.clone()).or_insert(0) += volume;
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_minute_before_rolls_back_within_the_hour() {
        assert_eq!(one_minute_before("2026-01-05T14:05:00Z").unwrap(), "2026-01-05T14:04:00Z");
    }

    #[test]
    fn one_minute_before_rolls_back_across_hour_boundary() {
        assert_eq!(one_minute_before("2026-01-05T14:00:00Z").unwrap(), "2026-01-05T13:59:00Z");
    }

    #[test]
    fn one_minute_before_rejects_midnight() {
        let err = one_minute_before("2026-01-05T00:00:00Z").unwrap_err();
        assert!(matches!(err, EngineError::ProtocolViolation(_)));
    }

    #[test]
    fn sum_page_volume_adds_every_bar_in_the_page() {
        let body = r#"{"bars":{"AAPL":[{"t":"2026-01-05T09:30:00Z","v":100},{"t":"2026-01-05T09:31:00Z","v":250}]},"next_page_token":null}"#;
        let (total, next) = sum_page_volume("AAPL", body).unwrap();
        assert_eq!(total, 350);
        assert!(next.is_none());
    }

    #[test]
    fn fold_first_bar_into_totals_adds_volume() {
        let mut totals = HashMap::new();
        totals.insert("AAPL".to_string(), 1_000i64);
        let folded = fold_first_bar_into_totals(totals, &[("AAPL".to_string(), "2026-01-05T14:05:00Z".to_string(), 500)]);
        assert_eq!(folded["AAPL"], 1_500);
    }
}

//! 4.H step 4 — historical daily bars, fetched concurrently over a bounded
//! pool of non-blocking HTTP clients (`N = min(max_clients, |symbols|)`,
//! default 16), following `next_page_token` pagination.
//!
//! Grounded on `original_source/trading_bot/workspace/tradingBot.cpp`'s
//! client pool loop (`data_clients`/`retired`/`active_clients`): each
//! client owns exactly one symbol at a time and is handed the next symbol
//! off the worklist as soon as its pagination completes, same as the
//! bounded round-robin this module drives.
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use openssl::ssl::SslConnector;

use crate::error::{EngineError, Result};
use crate::json::array::parse_array;
use crate::json::object::parse_object_literal;
use crate::net::http::{HttpClient, HttpRequest, HttpResponse, HttpState, Method};
use crate::net::tls::TlsSocket;
use crate::numeric;

#[derive(Debug, Clone)]
pub struct DailyBar {
    pub t: String,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: i64,
    pub n: i64,
}

#[derive(Debug, Clone, Default)]
struct RawBar {
    t: String,
    o: String,
    h: String,
    l: String,
    c: String,
    v: String,
    n: String,
}

fn finish_bar(raw: &RawBar) -> Result<DailyBar> {
    Ok(DailyBar {
        t: raw.t.clone(),
        o: numeric::to_double(&raw.o)?,
        h: numeric::to_double(&raw.h)?,
        l: numeric::to_double(&raw.l)?,
        c: numeric::to_double(&raw.c)?,
        v: numeric::to_long(&raw.v)?,
        n: raw.n.parse().unwrap_or(0),
    })
}

struct Slot {
    ticker: String,
    client: HttpClient,
    response: HttpResponse,
    bars: Vec<DailyBar>,
}

#[allow(clippy::too_many_arguments)]
fn build_request(
    host: &str,
    ticker: &str,
    start: &str,
    end: &str,
    page_token: Option<&str>,
    headers: &[(String, String)],
) -> HttpRequest {
    let mut req = HttpRequest::new(Method::Get, host, "/v2/stocks/bars")
        .query("symbols", ticker)
        .query("timeframe", "1Day")
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

fn spawn_slot(
    connector: &SslConnector,
    host: &str,
    ticker: &str,
    start: &str,
    end: &str,
    headers: &[(String, String)],
    timeout: Duration,
) -> Result<Slot> {
    let socket = TlsSocket::connect(connector, host, 443)?;
    let req = build_request(host, ticker, start, end, None, headers);
    let client = HttpClient::new(Box::new(socket), &req, timeout);
    Ok(Slot {
        ticker: ticker.to_string(),
        client,
        response: HttpResponse::default(),
        bars: Vec::new(),
    })
}

/// Parses one page's body (`{"bars":{"TICKER":[...]}, "next_page_token"}`)
/// into this ticker's bars for the page, plus the next page token if any
/// (`"null"` or absent both mean "no more pages").
fn parse_page(ticker: &str, body: &str) -> Result<(Vec<DailyBar>, Option<String>)> {
    let top = parse_object_literal(body.trim())?;
    let next_page_token = top
        .get("next_page_token")
        .filter(|v| v.as_str() != "null" && !v.is_empty())
        .cloned();

    let Some(bars_literal) = top.get("bars") else {
        return Ok((Vec::new(), next_page_token));
    };
    let bars_by_ticker = parse_object_literal(bars_literal)?;
    let Some(array_literal) = bars_by_ticker.get(ticker) else {
        return Ok((Vec::new(), next_page_token));
    };

    let mut record = RawBar::default();
    let mut collected: Vec<Result<DailyBar>> = Vec::new();
    parse_array(
        array_literal,
        &mut record,
        &mut collected,
        |rec, key, value| match key {
            "t" => rec.t = value.to_string(),
            "o" => rec.o = value.to_string(),
            "h" => rec.h = value.to_string(),
            "l" => rec.l = value.to_string(),
            "c" => rec.c = value.to_string(),
            "v" => rec.v = value.to_string(),
            "n" => rec.n = value.to_string(),
            _ => {}
        },
        |rec, collector| {
            collector.push(finish_bar(rec));
            *rec = RawBar::default();
        },
    )?;

    let mut bars = Vec::with_capacity(collected.len());
    for result in collected {
        bars.push(result?);
    }
    Ok((bars, next_page_token))
}

/// Fetches `1Day` bars over `[start, end]` for every ticker in
/// `tickers`, using a bounded pool of `min(max_clients, tickers.len())`
/// non-blocking HTTP clients driven round-robin until every ticker's
/// pagination completes.
pub fn fetch_all(
    connector: &SslConnector,
    host: &str,
    tickers: &[String],
    start: &str,
    end: &str,
    headers: &[(String, String)],
    max_clients: usize,
    timeout: Duration,
) -> Result<HashMap<String, Vec<DailyBar>>> {
    let num_clients = max_clients.min(tickers.len()).max(1);
    let mut remaining: VecDeque<String> = tickers.iter().cloned().collect();
    let mut slots: Vec<Option<Slot>> = Vec::with_capacity(num_clients);
    for _ in 0..num_clients {
        if let Some(ticker) = remaining.pop_front() {
            slots.push(Some(spawn_slot(connector, host, &ticker, start, end, headers, timeout)?));
        } else {
            slots.push(None);
        }
    }

    let mut results: HashMap<String, Vec<DailyBar>> = HashMap::new();

    while slots.iter().any(|s| s.is_some()) {
        for i in 0..slots.len() {
            let Some(slot) = slots[i].as_mut() else { continue };
            match slot.client.step(&mut slot.response)? {
                HttpState::ReceivedResponse => {
                    if slot.response.status != 200 {
                        return Err(EngineError::PrecheckFailure(format!(
                            "daily bars request for {} returned status {}",
                            slot.ticker, slot.response.status
                        )));
                    }
                    let body = String::from_utf8_lossy(&slot.response.body).to_string();
                    let (mut page_bars, next_token) = parse_page(&slot.ticker, &body)?;
                    slot.bars.append(&mut page_bars);

                    if let Some(token) = next_token {
                        let req = build_request(host, &slot.ticker, start, end, Some(&token), headers);
                        let socket = TlsSocket::connect(connector, host, 443)?;
                        slot.client = HttpClient::new(Box::new(socket), &req, timeout);
                        slot.response = HttpResponse::default();
                    } else {
                        let finished = slots[i].take().unwrap();
                        results.insert(finished.ticker, finished.bars);
                        if let Some(next_ticker) = remaining.pop_front() {
                            slots[i] =
                                Some(spawn_slot(connector, host, &next_ticker, start, end, headers, timeout)?);
                        }
                    }
                }
                HttpState::TimedOut => {
                    return Err(EngineError::TimedOut(format!(
                        "daily bars request for {} timed out",
                        slot.ticker
                    )));
                }
                _ => {}
            }
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_page_with_no_next_token() {
        let body = r#"{"bars":{"AAPL":[{"t":"2024-01-02T00:00:00Z","o":100.0,"h":101.0,"l":99.0,"c":100.5,"v":1000000,"n":5000}]},"next_page_token":null}"#;
        let (bars, next) = parse_page("AAPL", body).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].c, 100.5);
        assert!(next.is_none());
    }

    #[test]
    fn carries_forward_a_non_null_page_token() {
        let body = r#"{"bars":{"AAPL":[]},"next_page_token":"abc123"}"#;
        let (bars, next) = parse_page("AAPL", body).unwrap();
        assert!(bars.is_empty());
        assert_eq!(next.as_deref(), Some("abc123"));
    }

    #[test]
    fn missing_ticker_in_bars_yields_empty_page() {
        let body = r#"{"bars":{},"next_page_token":null}"#;
        let (bars, next) = parse_page("AAPL", body).unwrap();
        assert!(bars.is_empty());
        assert!(next.is_none());
    }
}

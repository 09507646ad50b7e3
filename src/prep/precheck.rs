//! 4.H steps 1-2 — calendar and account prechecks. Both run once per
//! trading day, before any symbol-level work starts; either one failing
//! aborts the day (spec 4.H, section 7 `PrecheckFailure`).
//!
//! Grounded on `original_source/trading_bot/workspace/tradingBot.cpp`'s
//! `start()` (the `/v2/calendar` and `/v2/account` gates) and
//! `getBuyingPower`.
use crate::error::{EngineError, Result};
use crate::json::object::parse_object_literal;
use crate::net::http::{BlockingClient, HttpRequest, Method};
use crate::numeric;

/// `GET /v2/calendar?date_type=TRADING&start=D&end=D`. A holiday (early
/// close, or an empty body) fails the precheck rather than the day's
/// trading hours silently shrinking.
pub fn check_calendar(client: &BlockingClient, host: &str, headers: &[(String, String)], date: &str) -> Result<()> {
    let mut req = HttpRequest::new(Method::Get, host, "/v2/calendar")
        .query("date_type", "TRADING")
        .query("start", date)
        .query("end", date);
    for (k, v) in headers {
        req = req.header(k, v);
    }
    let response = client.get_with_init_budget(&req)?;
    if response.status != 200 {
        return Err(EngineError::PrecheckFailure(format!(
            "calendar endpoint returned status {}",
            response.status
        )));
    }
    let body = String::from_utf8_lossy(&response.body);
    // the calendar endpoint returns an empty array on some holidays
    if body.trim().len() < 4 {
        return Err(EngineError::PrecheckFailure(
            "no calendar data returned, assuming a market holiday".into(),
        ));
    }
    // the body is `[{...}]`; the object parser expects the inner object
    // literal so strip the outer array brackets first.
    let inner = body
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| EngineError::MalformedHttp("calendar response is not an array".into()))?;
    let day = parse_object_literal(inner.trim())?;

    let open = day
        .get("open")
        .ok_or_else(|| EngineError::PrecheckFailure("calendar response missing open".into()))?;
    let close = day
        .get("close")
        .ok_or_else(|| EngineError::PrecheckFailure("calendar response missing close".into()))?;

    if open != "09:30" || close != "16:00" {
        return Err(EngineError::PrecheckFailure(format!(
            "today is a holiday or early close (open={open}, close={close})"
        )));
    }
    Ok(())
}

/// `GET /v2/account`. Fails if the account carries any of the three
/// blocking flags, or if non-marginable buying power can't cover the
/// requested allocation/risk-per-trade.
pub fn check_account(
    client: &BlockingClient,
    host: &str,
    headers: &[(String, String)],
    allocated_buying_power: f64,
    risk_per_trade: f64,
) -> Result<f64> {
    let mut req = HttpRequest::new(Method::Get, host, "/v2/account");
    for (k, v) in headers {
        req = req.header(k, v);
    }
    let response = client.get_with_init_budget(&req)?;
    if response.status != 200 {
        return Err(EngineError::PrecheckFailure(format!(
            "account endpoint returned status {}",
            response.status
        )));
    }
    let body = String::from_utf8_lossy(&response.body);
    let account = parse_object_literal(body.trim())?;

    for flag in ["trading_blocked", "trade_suspended_by_user", "account_blocked"] {
        let value = account
            .get(flag)
            .ok_or_else(|| EngineError::PrecheckFailure(format!("account response missing {flag}")))?;
        if value != "false" {
            return Err(EngineError::PrecheckFailure(format!("account flag {flag} is set")));
        }
    }

    let buying_power = account
        .get("non_marginable_buying_power")
        .ok_or_else(|| {
            EngineError::PrecheckFailure("account response missing non_marginable_buying_power".into())
        })
        .and_then(|v| numeric::to_double(v))?;

    if buying_power < allocated_buying_power {
        return Err(EngineError::PrecheckFailure(
            "not enough cash to allocate to this bot".into(),
        ));
    }
    if allocated_buying_power < risk_per_trade {
        return Err(EngineError::PrecheckFailure(
            "not enough cash to risk on a single trade".into(),
        ));
    }

    Ok(buying_power)
}

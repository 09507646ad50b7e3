//! 4.J — broker order adapter: submit/replace/cancel thin wrappers around
//! the HTTP client, plus the §4.I status-handling rules those three calls
//! share.
use std::collections::HashMap;
use std::time::Duration;

use crate::engine::position::OrderBroker;
use crate::engine::symbol::Side;
use crate::error::{EngineError, Result};
use crate::json::object::parse_object_literal;
use crate::net::http::{BlockingClient, HttpRequest, Method};

pub struct AlpacaOrderBroker {
    client: BlockingClient,
    host: String,
    api_key: String,
    api_secret: String,
    extended_hours: bool,
}

impl AlpacaOrderBroker {
    pub fn new(
        host: &str,
        api_key: String,
        api_secret: String,
        connector: openssl::ssl::SslConnector,
    ) -> Self {
        AlpacaOrderBroker {
            client: BlockingClient::new(connector, host, 443, Duration::from_secs(10)),
            host: host.to_string(),
            api_key,
            api_secret,
            extended_hours: true,
        }
    }

    fn authed(&self, req: HttpRequest) -> HttpRequest {
        req.header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
            .header("Content-Type", "application/json")
    }

    /// Price rounding (spec 4.J): 4 decimals below $1, 2 decimals at or
    /// above.
    fn round(price: f64) -> f64 {
        crate::engine::round_price(price)
    }

    /// Interprets a response status: success variants return the parsed
    /// `order_data` (empty if the body was empty), the documented races
    /// return `None` (silent no-op), anything else is `BrokerRejected`.
    fn interpret(status: u16, body: &str) -> Result<Option<HashMap<String, String>>> {
        match status {
            200 | 201 | 202 | 204 => {
                if body.trim().is_empty() {
                    Ok(Some(HashMap::new()))
                } else {
                    Ok(Some(parse_object_literal(body)?))
                }
            }
            404 => Ok(None),
            422 if body.contains("order is not open")
                || body.contains("qty must be > filled_qty")
                || body.contains("qty must be \\u003e filled_qty") =>
            {
                Ok(None)
            }
            other => Err(EngineError::BrokerRejected {
                code: other as u32,
                msg: body.to_string(),
            }),
        }
    }

    pub fn submit_limit(
        &mut self,
        ticker: &str,
        qty: i64,
        side: Side,
        limit: f64,
    ) -> Result<Option<HashMap<String, String>>> {
        let body = serde_json::json!({
            "symbol": ticker,
            "qty": qty.to_string(),
            "side": side_str(side),
            "type": "limit",
            "time_in_force": "day",
            "limit_price": format!("{:.4}", Self::round(limit)),
            "extended_hours": self.extended_hours,
        })
        .to_string();
        let req = self.authed(HttpRequest::new(Method::Post, &self.host, "/v2/orders")).body(body);
        let response = self.client.post(&req)?;
        let data = Self::interpret(response.status, &String::from_utf8_lossy(&response.body))?;
        Ok(data)
    }

    pub fn submit_market(
        &mut self,
        ticker: &str,
        qty: i64,
        side: Side,
    ) -> Result<Option<HashMap<String, String>>> {
        let body = serde_json::json!({
            "symbol": ticker,
            "qty": qty.to_string(),
            "side": side_str(side),
            "type": "market",
            "time_in_force": "day",
        })
        .to_string();
        let req = self.authed(HttpRequest::new(Method::Post, &self.host, "/v2/orders")).body(body);
        let response = self.client.post(&req)?;
        let data = Self::interpret(response.status, &String::from_utf8_lossy(&response.body))?;
        Ok(data)
    }

    pub fn replace_order(
        &mut self,
        order_id: &str,
        qty: i64,
        limit: f64,
    ) -> Result<Option<HashMap<String, String>>> {
        let body = serde_json::json!({
            "qty": qty.to_string(),
            "limit_price": format!("{:.4}", Self::round(limit)),
        })
        .to_string();
        let req = self
            .authed(HttpRequest::new(Method::Patch, &self.host, &format!("/v2/orders/{order_id}")))
            .body(body);
        let response = self.client.patch(&req)?;
        Self::interpret(response.status, &String::from_utf8_lossy(&response.body))
    }

    pub fn cancel_order(&mut self, order_id: &str) -> Result<Option<HashMap<String, String>>> {
        let req = self.authed(HttpRequest::new(Method::Delete, &self.host, &format!("/v2/orders/{order_id}")));
        let response = self.client.del(&req)?;
        Self::interpret(response.status, &String::from_utf8_lossy(&response.body))
    }
}

fn side_str(side: Side) -> &'static str {
    match side {
        Side::Buy => "buy",
        Side::Sell => "sell",
    }
}

impl OrderBroker for AlpacaOrderBroker {
    fn submit(&mut self, ticker: &str, qty: i64, side: Side, limit: f64) -> Result<String> {
        let data = self.submit_limit(ticker, qty, side, limit)?;
        extract_order_id(data)
    }

    fn replace(&mut self, order_id: &str, qty: i64, limit: f64) -> Result<Option<String>> {
        match self.replace_order(order_id, qty, limit)? {
            Some(data) => Ok(Some(extract_order_id(Some(data))?)),
            None => Ok(None),
        }
    }

    fn cancel(&mut self, order_id: &str) -> Result<()> {
        self.cancel_order(order_id)?;
        Ok(())
    }

    fn submit_market(&mut self, ticker: &str, qty: i64, side: Side) -> Result<String> {
        let data = AlpacaOrderBroker::submit_market(self, ticker, qty, side)?;
        extract_order_id(data)
    }
}

fn extract_order_id(data: Option<HashMap<String, String>>) -> Result<String> {
    data.and_then(|m| m.get("id").cloned())
        .ok_or_else(|| EngineError::MalformedHttp("order submission response missing id".into()))
}

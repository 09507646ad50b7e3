//! Account update reconciler.
//!
//! Grounded on `original_source/trading_bot/workspace/tradingBot.cpp`'s
//! `handleTradeUpdate`: parses the `{stream, data:{event, order:{...}}}`
//! envelope with the object parser twice (once for the envelope, once for
//! the nested `order` literal it passes through verbatim), then applies
//! the same event-keyed accounting the original does. Runs on the account
//! feed, a stream with no ordering guarantee relative to the data feed — a
//! fill can arrive before, with, or after the trade that provoked it.
use std::collections::HashMap;

use crate::engine::position::{update_position, OrderBroker};
use crate::engine::symbol::Symbol;
use crate::error::{EngineError, Result};
use crate::json::object::parse_object_literal;
use crate::numeric;

/// One parsed `order` sub-object from the trade-update envelope.
struct OrderUpdate {
    symbol: String,
    order_id: String,
    side: String,
    order_type: String,
    event: String,
    qty: i64,
    filled_qty: i64,
    average_fill_price: f64,
    limit_price: f64,
}

fn parse_order_update(envelope_literal: &str) -> Result<OrderUpdate> {
    let envelope = parse_object_literal(envelope_literal)?;
    let data_literal = envelope
        .get("data")
        .ok_or_else(|| EngineError::MalformedJson("trade update missing data field".into()))?;
    let data = parse_object_literal(data_literal)?;

    let event = data
        .get("event")
        .ok_or_else(|| EngineError::MalformedJson("trade update missing event".into()))?
        .clone();
    let order_literal = data
        .get("order")
        .ok_or_else(|| EngineError::MalformedJson("trade update missing order field".into()))?;
    let order = parse_object_literal(order_literal)?;

    let get = |key: &str| -> Result<&String> {
        order
            .get(key)
            .ok_or_else(|| EngineError::MalformedJson(format!("order update missing {key}")))
    };

    let parse_nullable_double = |key: &str| -> Result<f64> {
        match order.get(key).map(|s| s.as_str()) {
            Some("null") | None => Ok(0.0),
            Some(v) => numeric::to_double(v),
        }
    };

    Ok(OrderUpdate {
        symbol: get("symbol")?.clone(),
        order_id: get("id")?.clone(),
        side: get("side")?.clone(),
        order_type: get("type")?.clone(),
        event,
        qty: numeric::to_long(get("qty")?)?,
        filled_qty: numeric::to_long(get("filled_qty")?)?,
        average_fill_price: parse_nullable_double("filled_avg_price")?,
        limit_price: parse_nullable_double("limit_price")?,
    })
}

/// Applies one account-update envelope to the engine's symbol table and
/// `buying_power`. Returns the ticker that was updated, or `None` if the
/// event was ignored (unknown symbol, or an order id matching neither the
/// primary nor replacement slot).
pub fn reconcile(
    symbols: &mut HashMap<String, Symbol>,
    buying_power: &mut f64,
    trading_permitted: bool,
    envelope_literal: &str,
    broker: &mut impl OrderBroker,
) -> Result<Option<String>> {
    let update = parse_order_update(envelope_literal)?;

    let Some(symbol) = symbols.get_mut(&update.symbol) else {
        return Ok(None);
    };

    let rejected_replacement = update.event == "rejected"
        && symbol.order.replacement_order_id.as_deref() == Some(update.order_id.as_str());

    if !rejected_replacement && symbol.order.order_id.as_deref() != Some(update.order_id.as_str())
    {
        return Ok(None);
    }

    let delta_filled = update.filled_qty - symbol.order.order_quantity_filled;
    let is_buy = update.side == "buy";

    match update.event.as_str() {
        "fill" | "partial_fill" => {
            if is_buy {
                symbol.order.quantity_owned += delta_filled;
                symbol.order.quantity_pending -= delta_filled;
                if update.order_type == "limit" {
                    *buying_power += (update.limit_price - update.average_fill_price) * delta_filled as f64;
                } else if update.order_type == "market" {
                    *buying_power -= update.average_fill_price * update.filled_qty as f64
                        - symbol.order.order_quantity_filled as f64 * symbol.order.average_fill_price;
                }
            } else {
                *buying_power += update.average_fill_price * update.filled_qty as f64
                    - symbol.order.order_quantity_filled as f64 * symbol.order.average_fill_price;
                symbol.order.quantity_pending += delta_filled;
                symbol.order.quantity_owned -= delta_filled;
            }

            if update.event == "fill" {
                symbol.order.order_id = symbol.order.replacement_order_id.take();
            } else {
                symbol.order.average_fill_price = update.average_fill_price;
                symbol.order.order_quantity_filled = update.filled_qty;
                symbol.order.order_quantity = update.qty;
            }
        }
        "replaced" | "canceled" | "rejected" | "expired" => {
            // these statuses report the *old* order's qty/filled_qty, so
            // restore buying power and pending counters for what never
            // filled (spec 4.K).
            let unfilled = update.qty - update.filled_qty;
            if is_buy {
                symbol.order.quantity_pending -= unfilled;
                if update.order_type == "limit" {
                    *buying_power += update.limit_price * unfilled as f64;
                }
            } else {
                symbol.order.quantity_pending += unfilled;
            }

            if rejected_replacement {
                symbol.order.replacement_order_id = None;
            } else if update.event == "replaced" {
                symbol.order.order_id = symbol.order.replacement_order_id.take();
            } else {
                symbol.order.order_id = None;
            }
        }
        "new" => {
            symbol.order.average_fill_price = update.average_fill_price;
            symbol.order.order_quantity_filled = update.filled_qty;
            symbol.order.order_quantity = update.qty;
        }
        _ => {
            // pending_new, accepted, and anything else undocumented:
            // record as last_update_status only (handled below).
        }
    }

    symbol.order.last_update_status = Some(update.event.clone());
    symbol.order.waiting_for_update = false;

    if trading_permitted && (update.event == "canceled" || update.event == "new") {
        let entry_price = symbol.entry_price;
        update_position(symbol, buying_power, entry_price, broker)?;
    }

    Ok(Some(update.symbol))
}

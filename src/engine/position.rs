//! Position-update state machine, invoked both from the trade handler and
//! from account-update reconciliation. Grounded on
//! `original_source/trading_bot/workspace/tradingBot.cpp`'s limit-order
//! `updatePosition`, the default path.
use crate::engine::symbol::{Side, Symbol};
use crate::error::Result;

/// The capability a broker adapter must provide for the position state
/// machine to drive it. Kept in `engine` rather than `broker` so the
/// dependency runs one way: `broker` implements this trait, `engine` never
/// imports `broker`.
pub trait OrderBroker {
    fn submit(&mut self, ticker: &str, qty: i64, side: Side, limit: f64) -> Result<String>;
    /// A replace PATCH returns the *new* order's id synchronously (the
    /// broker's replace semantics create a fresh order); the old id keeps
    /// living in `order_id` until the account feed's `replaced` event
    /// promotes the new one (spec 4.K). `None` is the documented 404/422
    /// race (spec 4.I): the order already terminated, nothing changed, and
    /// the account feed will reconcile it instead.
    fn replace(&mut self, order_id: &str, qty: i64, limit: f64) -> Result<Option<String>>;
    fn cancel(&mut self, order_id: &str) -> Result<()>;
    /// Market-order submission, used only by end-of-session liquidation.
    fn submit_market(&mut self, ticker: &str, qty: i64, side: Side) -> Result<String>;
}

/// Drives `symbol.order` one step closer to `quantity_desired` at
/// `entry_price`, booking `buying_power` optimistically on every
/// submit/replace. No-op if `waiting_for_update` is set: at most one order
/// action is in flight per symbol at a time.
pub fn update_position(
    symbol: &mut Symbol,
    buying_power: &mut f64,
    entry_price: f64,
    broker: &mut impl OrderBroker,
) -> Result<()> {
    if symbol.order.waiting_for_update {
        return Ok(());
    }

    let net = symbol.order.net();
    let desired = symbol.order.quantity_desired;

    if desired > net {
        want_more(symbol, buying_power, entry_price, broker, desired - net)
    } else if desired < net {
        want_less(symbol, entry_price, broker, net - desired)
    } else {
        realign_price(symbol, buying_power, entry_price, broker)
    }
}

fn want_more(
    symbol: &mut Symbol,
    buying_power: &mut f64,
    entry_price: f64,
    broker: &mut impl OrderBroker,
    shortfall: i64,
) -> Result<()> {
    let order = &mut symbol.order;
    if order.has_open_buy() {
        if order.last_update_status.as_deref() == Some("pending_new") {
            return Ok(());
        }
        // add back the capital already reserved for the order being
        // replaced (at its current limit) before resizing, so a replace is
        // never under-sized by capital committed to itself
        // (original_source tradingBot.cpp:1750).
        let reserved = order.limit_price * order.order_quantity as f64;
        let affordable_total = ((*buying_power + reserved) / entry_price).floor() as i64;
        let add = shortfall.min((affordable_total - order.order_quantity).max(0));
        if add <= 0 {
            return Ok(());
        }
        let new_qty = order.order_quantity + add;
        let id = order.order_id.clone().expect("open buy has an order id");
        if let Some(replacement_id) = broker.replace(&id, new_qty, entry_price)? {
            *buying_power -= add as f64 * entry_price;
            order.replacement_order_id = Some(replacement_id);
            order.order_quantity = new_qty;
            order.quantity_pending += add;
            order.limit_price = entry_price;
            order.waiting_for_update = true;
        }
    } else if order.has_open_sell() {
        let id = order.order_id.clone().expect("open sell has an order id");
        broker.cancel(&id)?;
        order.canceled_order = true;
        order.waiting_for_update = true;
    } else {
        let affordable = (*buying_power / entry_price).floor() as i64;
        let qty = shortfall.min(affordable);
        if qty <= 0 {
            return Ok(());
        }
        let id = broker.submit(&symbol.ticker, qty, Side::Buy, entry_price)?;
        *buying_power -= qty as f64 * entry_price;
        order.order_id = Some(id);
        order.order_quantity = qty;
        order.quantity_pending += qty;
        order.limit_price = entry_price;
        order.waiting_for_update = true;
    }
    Ok(())
}

fn want_less(
    symbol: &mut Symbol,
    entry_price: f64,
    broker: &mut impl OrderBroker,
    excess: i64,
) -> Result<()> {
    let order = &mut symbol.order;
    if order.has_open_sell() {
        if order.last_update_status.as_deref() == Some("pending_new") {
            return Ok(());
        }
        let sellable = order.quantity_owned - (-order.quantity_pending);
        let add = excess.min(sellable.max(0));
        if add <= 0 {
            return Ok(());
        }
        let new_qty = order.order_quantity + add;
        let id = order.order_id.clone().expect("open sell has an order id");
        if let Some(replacement_id) = broker.replace(&id, new_qty, entry_price)? {
            order.replacement_order_id = Some(replacement_id);
            order.order_quantity = new_qty;
            order.quantity_pending -= add;
            order.limit_price = entry_price;
            order.waiting_for_update = true;
        }
    } else if order.has_open_buy() {
        let id = order.order_id.clone().expect("open buy has an order id");
        broker.cancel(&id)?;
        order.canceled_order = true;
        order.waiting_for_update = true;
    } else {
        let qty = excess.min(order.quantity_owned.max(0));
        if qty <= 0 {
            return Ok(());
        }
        let id = broker.submit(&symbol.ticker, qty, Side::Sell, entry_price)?;
        order.order_id = Some(id);
        order.order_quantity = qty;
        order.quantity_pending -= qty;
        order.limit_price = entry_price;
        order.waiting_for_update = true;
    }
    Ok(())
}

fn realign_price(
    symbol: &mut Symbol,
    buying_power: &mut f64,
    entry_price: f64,
    broker: &mut impl OrderBroker,
) -> Result<()> {
    let order = &mut symbol.order;
    if order.quantity_pending == 0 {
        return Ok(());
    }

    let mut quantity_remaining = order.order_quantity;
    if order.quantity_pending > 0 {
        // bound a pending buy's replace by buying power, adding back the
        // capital already reserved for this order at its current limit
        // (original_source tradingBot.cpp:1920-1926).
        let reserved = order.limit_price * order.order_quantity as f64;
        let attainable = ((*buying_power + reserved) / entry_price).floor() as i64;
        if attainable <= 0 {
            return Ok(());
        }
        if attainable < quantity_remaining {
            quantity_remaining = attainable;
        }
    }

    if quantity_remaining == order.order_quantity
        && (order.limit_price - entry_price).abs() < f64::EPSILON
    {
        return Ok(());
    }
    if order.last_update_status.as_deref() == Some("pending_new") {
        return Ok(());
    }

    let id = order.order_id.clone().expect("open order has an order id");
    if let Some(replacement_id) = broker.replace(&id, quantity_remaining, entry_price)? {
        let delta = quantity_remaining - order.order_quantity;
        if order.quantity_pending > 0 {
            *buying_power -= entry_price * delta as f64;
            order.quantity_pending += delta;
        } else {
            order.quantity_pending -= delta;
        }
        order.order_quantity = quantity_remaining;
        order.replacement_order_id = Some(replacement_id);
        order.limit_price = entry_price;
        order.waiting_for_update = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::symbol::Exchange;

    struct RecordingBroker {
        submitted: Vec<(String, i64, Side, f64)>,
        replaced: Vec<(String, i64, f64)>,
        canceled: Vec<String>,
        next_id: u32,
    }

    impl RecordingBroker {
        fn new() -> Self {
            RecordingBroker {
                submitted: Vec::new(),
                replaced: Vec::new(),
                canceled: Vec::new(),
                next_id: 0,
            }
        }
    }

    impl OrderBroker for RecordingBroker {
        fn submit(&mut self, ticker: &str, qty: i64, side: Side, limit: f64) -> Result<String> {
            self.next_id += 1;
            let id = format!("o{}", self.next_id);
            self.submitted.push((ticker.to_string(), qty, side, limit));
            Ok(id)
        }

        fn replace(&mut self, order_id: &str, qty: i64, limit: f64) -> Result<Option<String>> {
            self.next_id += 1;
            self.replaced.push((order_id.to_string(), qty, limit));
            Ok(Some(format!("r{}", self.next_id)))
        }

        fn cancel(&mut self, order_id: &str) -> Result<()> {
            self.canceled.push(order_id.to_string());
            Ok(())
        }

        fn submit_market(&mut self, ticker: &str, qty: i64, side: Side) -> Result<String> {
            self.submit(ticker, qty, side, 0.0)
        }
    }

    #[test]
    fn submits_new_buy_bounded_by_buying_power() {
        let mut symbol = Symbol::new("AAPL".into(), Exchange::Nasdaq);
        symbol.order.quantity_desired = 100;
        let mut buying_power = 4_000.0;
        let mut broker = RecordingBroker::new();

        update_position(&mut symbol, &mut buying_power, 50.0, &mut broker).unwrap();

        assert_eq!(broker.submitted, vec![("AAPL".to_string(), 80, Side::Buy, 50.0)]);
        assert_eq!(symbol.order.quantity_pending, 80);
        assert_eq!(buying_power, 0.0);
        assert!(symbol.order.waiting_for_update);
    }

    #[test]
    fn noop_while_waiting_for_update() {
        let mut symbol = Symbol::new("AAPL".into(), Exchange::Nasdaq);
        symbol.order.quantity_desired = 100;
        symbol.order.waiting_for_update = true;
        let mut buying_power = 10_000.0;
        let mut broker = RecordingBroker::new();

        update_position(&mut symbol, &mut buying_power, 50.0, &mut broker).unwrap();

        assert!(broker.submitted.is_empty());
        assert_eq!(buying_power, 10_000.0);
    }

    #[test]
    fn cancels_open_sell_before_buying() {
        let mut symbol = Symbol::new("AAPL".into(), Exchange::Nasdaq);
        symbol.order.quantity_desired = 50;
        symbol.order.quantity_pending = -20;
        symbol.order.order_id = Some("sell1".into());
        let mut buying_power = 10_000.0;
        let mut broker = RecordingBroker::new();

        update_position(&mut symbol, &mut buying_power, 50.0, &mut broker).unwrap();

        assert_eq!(broker.canceled, vec!["sell1".to_string()]);
        assert!(symbol.order.canceled_order);
        assert!(broker.submitted.is_empty());
    }

    #[test]
    fn replaces_open_buy_upward_skipping_pending_new() {
        let mut symbol = Symbol::new("AAPL".into(), Exchange::Nasdaq);
        symbol.order.quantity_desired = 150;
        symbol.order.quantity_pending = 80;
        symbol.order.order_quantity = 80;
        symbol.order.order_id = Some("buy1".into());
        symbol.order.last_update_status = Some("pending_new".into());
        let mut buying_power = 10_000.0;
        let mut broker = RecordingBroker::new();

        update_position(&mut symbol, &mut buying_power, 50.0, &mut broker).unwrap();
        assert!(broker.replaced.is_empty());

        symbol.order.last_update_status = Some("accepted".into());
        update_position(&mut symbol, &mut buying_power, 50.0, &mut broker).unwrap();
        assert_eq!(broker.replaced, vec![("buy1".to_string(), 150, 50.0)]);
    }

    #[test]
    fn realigns_price_when_quantity_already_matches() {
        let mut symbol = Symbol::new("AAPL".into(), Exchange::Nasdaq);
        symbol.order.quantity_pending = 40;
        symbol.order.quantity_desired = 40;
        symbol.order.order_quantity = 40;
        symbol.order.order_id = Some("buy1".into());
        symbol.order.limit_price = 49.5;
        let mut buying_power = 10_000.0;
        let mut broker = RecordingBroker::new();

        update_position(&mut symbol, &mut buying_power, 50.0, &mut broker).unwrap();

        assert_eq!(broker.replaced, vec![("buy1".to_string(), 40, 50.0)]);
    }

    #[test]
    fn want_more_adds_back_reserved_capital_before_sizing_replace() {
        // 80 shares are already reserved at the old $50 limit ($4000,
        // fully committed: no free buying power). The new entry price
        // drops to $40, so the same $4000 now supports 100 shares. Without
        // adding the old reservation back, the replace would be capped at
        // zero growth even though the order can safely grow.
        let mut symbol = Symbol::new("AAPL".into(), Exchange::Nasdaq);
        symbol.order.quantity_desired = 150;
        symbol.order.quantity_pending = 80;
        symbol.order.order_quantity = 80;
        symbol.order.order_id = Some("buy1".into());
        symbol.order.limit_price = 50.0;
        let mut buying_power = 0.0;
        let mut broker = RecordingBroker::new();

        update_position(&mut symbol, &mut buying_power, 40.0, &mut broker).unwrap();

        // affordable_total = floor((0 + 50*80) / 40) = 100
        assert_eq!(broker.replaced, vec![("buy1".to_string(), 100, 40.0)]);
        assert_eq!(symbol.order.quantity_pending, 100);
    }

    #[test]
    fn realign_price_skips_replace_while_pending_new() {
        let mut symbol = Symbol::new("AAPL".into(), Exchange::Nasdaq);
        symbol.order.quantity_pending = 40;
        symbol.order.quantity_desired = 40;
        symbol.order.order_quantity = 40;
        symbol.order.order_id = Some("buy1".into());
        symbol.order.limit_price = 49.5;
        symbol.order.last_update_status = Some("pending_new".into());
        let mut buying_power = 10_000.0;
        let mut broker = RecordingBroker::new();

        update_position(&mut symbol, &mut buying_power, 50.0, &mut broker).unwrap();

        assert!(broker.replaced.is_empty());
    }

    #[test]
    fn realign_price_bounds_pending_buy_replace_by_buying_power() {
        // desired quantity matches net, but the new price would cost more
        // than the reserved-plus-free capital supports; the replace should
        // shrink the order instead of resizing it to the unaffordable
        // quantity.
        let mut symbol = Symbol::new("AAPL".into(), Exchange::Nasdaq);
        symbol.order.quantity_pending = 100;
        symbol.order.quantity_desired = 100;
        symbol.order.order_quantity = 100;
        symbol.order.order_id = Some("buy1".into());
        symbol.order.limit_price = 40.0;
        let mut buying_power = 0.0; // fully reserved: 100 * 40.0
        let mut broker = RecordingBroker::new();

        update_position(&mut symbol, &mut buying_power, 50.0, &mut broker).unwrap();

        // attainable = floor((0 + 40*100) / 50) = 80
        assert_eq!(broker.replaced, vec![("buy1".to_string(), 80, 50.0)]);
        assert_eq!(symbol.order.quantity_pending, 80);
    }
}

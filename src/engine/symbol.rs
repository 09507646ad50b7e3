//! Per-ticker engine state (spec section 3 "Data Model").
use crate::engine::rolling::{QuoteWindow, TradeWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    Nyse,
    Nasdaq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

/// Daily statics set once per trading day by the preparation pipeline
/// (4.H), immutable during the session.
#[derive(Debug, Clone, Default)]
pub struct DailyStatics {
    pub previous_close: f64,
    pub average_volume: f64,
    pub mean: f64,
    pub std: f64,
    pub p_plus: f64,
    pub p_minus: f64,
    pub lambda: f64,
    pub e0: f64,
    pub is_outlier: bool,
    pub trading_permitted: bool,
}

/// Order-state mirror: the engine's view of what it believes is true about
/// its one in-flight order per symbol.
#[derive(Debug, Clone, Default)]
pub struct OrderState {
    pub quantity_owned: i64,
    pub quantity_pending: i64,
    pub quantity_desired: i64,
    pub order_id: Option<String>,
    pub replacement_order_id: Option<String>,
    pub order_quantity: i64,
    pub order_quantity_filled: i64,
    pub average_fill_price: f64,
    pub limit_price: f64,
    pub canceled_order: bool,
    pub waiting_for_update: bool,
    pub last_update_status: Option<String>,
}

impl OrderState {
    /// `quantity_owned + quantity_pending`: the engine's optimistic net
    /// exposure assuming all open orders fill at their limit.
    pub fn net(&self) -> i64 {
        self.quantity_owned + self.quantity_pending
    }

    pub fn has_open_buy(&self) -> bool {
        self.quantity_pending > 0
    }

    pub fn has_open_sell(&self) -> bool {
        self.quantity_pending < 0
    }
}

pub struct Symbol {
    pub ticker: String,
    pub exchange: Exchange,
    pub daily: DailyStatics,

    pub vsum: i64,
    pub trades: TradeWindow,
    pub quotes: QuoteWindow,

    pub n: i64,
    pub new_n: i64,
    pub found_first_n: bool,

    /// Sticky limit price for the next position-update call, set only at a
    /// qualifying level crossing (`max(price_level(0), trade.price)`,
    /// rounded) and reused by every later `update_position` invocation on
    /// this symbol until the next crossing, including ones driven by
    /// account-update reconciliation.
    pub entry_price: f64,

    pub order: OrderState,
}

impl Symbol {
    pub fn new(ticker: String, exchange: Exchange) -> Self {
        Symbol {
            ticker,
            exchange,
            daily: DailyStatics::default(),
            vsum: 0,
            trades: TradeWindow::default(),
            quotes: QuoteWindow::default(),
            n: 0,
            new_n: 0,
            found_first_n: false,
            entry_price: 0.0,
            order: OrderState::default(),
        }
    }

    /// Resets per-session streaming state at the start of a trading day,
    /// keeping identity (`ticker`, `exchange`) in place. Daily statics are
    /// overwritten separately by the preparation pipeline.
    pub fn reset_for_session(&mut self) {
        self.vsum = 0;
        self.trades = TradeWindow::default();
        self.quotes = QuoteWindow::default();
        self.n = 0;
        self.new_n = 0;
        self.found_first_n = false;
        self.entry_price = 0.0;
        self.order = OrderState::default();
    }

    pub fn relative_volume(&self) -> f64 {
        if self.daily.average_volume > 0.0 {
            self.vsum as f64 / self.daily.average_volume
        } else {
            0.0
        }
    }
}

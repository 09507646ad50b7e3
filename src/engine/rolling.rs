//! Rolling trade/quote windows (spec section 3): bounded by
//! `ROLLING_PERIOD = 2e9 ns`, push-back/pop-front, monotonic in timestamp.
use std::collections::VecDeque;

pub const ROLLING_PERIOD_NS: i64 = 2_000_000_000;

#[derive(Debug, Clone, Copy)]
pub struct Trade {
    pub t: i64,
    pub price: f64,
    pub size: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct Quote {
    pub t: i64,
    pub bid: f64,
    pub ask: f64,
}

#[derive(Debug, Default)]
pub struct TradeWindow {
    trades: VecDeque<Trade>,
}

impl TradeWindow {
    pub fn push(&mut self, trade: Trade) {
        self.trades.push_back(trade);
    }

    /// Evicts from the front while the window spans at least
    /// `ROLLING_PERIOD_NS` (spec 4.I step 2).
    pub fn evict_stale(&mut self) {
        while self.trades.len() >= 2 {
            let newest = self.trades.back().unwrap().t;
            let oldest = self.trades.front().unwrap().t;
            if newest - oldest >= ROLLING_PERIOD_NS {
                self.trades.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn rolling_vsum(&self) -> i64 {
        self.trades.iter().map(|t| t.size).sum()
    }

    /// Oldest-to-newest `Δt` in seconds, and `Δp` as a price ratio
    /// (newest / oldest). `None` when fewer than 2 trades are present.
    pub fn dt_seconds_and_dp(&self) -> Option<(f64, f64)> {
        if self.trades.len() < 2 {
            return None;
        }
        let oldest = self.trades.front().unwrap();
        let newest = self.trades.back().unwrap();
        let dt = (newest.t - oldest.t) as f64 / 1_000_000_000.0;
        let dp = newest.price / oldest.price;
        Some((dt, dp))
    }

    pub fn newest(&self) -> Option<&Trade> {
        self.trades.back()
    }
}

#[derive(Debug, Default)]
pub struct QuoteWindow {
    quotes: VecDeque<Quote>,
}

impl QuoteWindow {
    pub fn push(&mut self, quote: Quote) {
        self.quotes.push_back(quote);
    }

    /// Scans from the newest backward for the most recent quote strictly
    /// older than `trade_t`, bounding per-trade cost regardless of quote
    /// window depth (spec 4.I step 3).
    pub fn most_recent_before(&self, trade_t: i64) -> Option<Quote> {
        self.quotes
            .iter()
            .rev()
            .find(|q| q.t < trade_t)
            .copied()
    }

    /// One unit of background maintenance: trims at most
    /// `max_removals` stale quotes (those older than the most recent trade
    /// timestamp, keeping the single most recent one before it), matching
    /// spec section 5's bounded per-tick removal and
    /// `original_source/tradingBot.cpp::cleanQuoteDeque`.
    pub fn trim(&mut self, most_recent_trade_t: i64, max_removals: usize) {
        let mut removed = 0;
        while removed < max_removals && self.quotes.len() >= 2 {
            let second_oldest_t = self.quotes[1].t;
            if second_oldest_t < most_recent_trade_t {
                self.quotes.pop_front();
                removed += 1;
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_window_evicts_and_stays_monotonic() {
        let mut w = TradeWindow::default();
        w.push(Trade { t: 0, price: 10.0, size: 100 });
        w.push(Trade { t: 1_000_000_000, price: 10.1, size: 100 });
        w.push(Trade { t: 2_500_000_000, price: 10.2, size: 100 });
        w.evict_stale();
        assert_eq!(w.len(), 2);
        let (_, _) = w.dt_seconds_and_dp().unwrap();
    }

    #[test]
    fn quote_window_scans_backward_for_most_recent_before() {
        let mut w = QuoteWindow::default();
        w.push(Quote { t: 0, bid: 9.9, ask: 10.0 });
        w.push(Quote { t: 100, bid: 9.95, ask: 10.05 });
        w.push(Quote { t: 200, bid: 10.0, ask: 10.1 });
        let found = w.most_recent_before(150).unwrap();
        assert_eq!(found.t, 100);
    }

    #[test]
    fn quote_window_trim_is_bounded() {
        let mut w = QuoteWindow::default();
        for t in 0..20 {
            w.push(Quote { t, bid: 1.0, ask: 1.1 });
        }
        w.trim(15, 4);
        assert_eq!(w.len(), 16);
    }
}

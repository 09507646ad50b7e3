//! The single-threaded cooperative reactor: round-robins the data feed,
//! the account feed, and one bounded unit of background maintenance, in
//! that priority order, once per tick.
use crate::error::Result;
use crate::net::ws::WsMessage;

/// Abstraction over `WsClient::recv` so the reactor's scheduling logic can
/// be tested without a live socket.
pub trait WsSource {
    fn recv(&mut self, msg: &mut WsMessage) -> Result<bool>;
}

impl WsSource for crate::net::ws::WsClient {
    fn recv(&mut self, msg: &mut WsMessage) -> Result<bool> {
        crate::net::ws::WsClient::recv(self, msg)
    }
}

pub trait DataFeedHandler {
    fn handle(&mut self, msg: &WsMessage) -> Result<()>;
}

pub trait AccountFeedHandler {
    fn handle(&mut self, msg: &WsMessage) -> Result<()>;
}

/// One bounded unit of background work per tick (spec 5: "one unit of
/// background quote-window cleanup on one symbol"). Returns whether it did
/// anything, so the reactor can distinguish a fully idle tick.
pub trait BackgroundMaintenance {
    fn run_one(&mut self) -> bool;
}

pub struct Reactor<S1, S2, D, A, M> {
    data_source: S1,
    account_source: S2,
    data_handler: D,
    account_handler: A,
    maintenance: M,
}

impl<S1, S2, D, A, M> Reactor<S1, S2, D, A, M>
where
    S1: WsSource,
    S2: WsSource,
    D: DataFeedHandler,
    A: AccountFeedHandler,
    M: BackgroundMaintenance,
{
    pub fn new(data_source: S1, account_source: S2, data_handler: D, account_handler: A, maintenance: M) -> Self {
        Reactor {
            data_source,
            account_source,
            data_handler,
            account_handler,
            maintenance,
        }
    }

    /// One scheduler tick: data feed first, then account feed, then one
    /// unit of maintenance only if neither feed produced a message.
    /// Returns whether any work happened.
    pub fn tick(&mut self) -> Result<bool> {
        let mut msg = WsMessage::default();

        if self.data_source.recv(&mut msg)? {
            self.data_handler.handle(&msg)?;
            return Ok(true);
        }

        if self.account_source.recv(&mut msg)? {
            self.account_handler.handle(&msg)?;
            return Ok(true);
        }

        Ok(self.maintenance.run_one())
    }

    /// Runs ticks until the outer market-hours scheduler signals the
    /// session is over. The reactor itself has no notion of wall-clock
    /// time; `should_stop` is the seam where that lives.
    pub fn run_until(&mut self, mut should_stop: impl FnMut() -> bool) -> Result<()> {
        while !should_stop() {
            self.tick()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct FakeSource {
        messages: Vec<WsMessage>,
    }

    impl WsSource for FakeSource {
        fn recv(&mut self, msg: &mut WsMessage) -> Result<bool> {
            if let Some(next) = self.messages.pop() {
                *msg = next;
                Ok(true)
            } else {
                Ok(false)
            }
        }
    }

    struct RecordingHandler {
        seen: Rc<RefCell<Vec<String>>>,
        label: &'static str,
    }

    impl DataFeedHandler for RecordingHandler {
        fn handle(&mut self, _msg: &WsMessage) -> Result<()> {
            self.seen.borrow_mut().push(self.label.to_string());
            Ok(())
        }
    }

    impl AccountFeedHandler for RecordingHandler {
        fn handle(&mut self, _msg: &WsMessage) -> Result<()> {
            self.seen.borrow_mut().push(self.label.to_string());
            Ok(())
        }
    }

    struct CountingMaintenance {
        runs: Rc<RefCell<usize>>,
    }

    impl BackgroundMaintenance for CountingMaintenance {
        fn run_one(&mut self) -> bool {
            *self.runs.borrow_mut() += 1;
            true
        }
    }

    #[test]
    fn data_feed_takes_priority_over_account_feed() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let runs = Rc::new(RefCell::new(0));
        let mut reactor = Reactor::new(
            FakeSource { messages: vec![WsMessage::default()] },
            FakeSource { messages: vec![WsMessage::default()] },
            RecordingHandler { seen: seen.clone(), label: "data" },
            RecordingHandler { seen: seen.clone(), label: "account" },
            CountingMaintenance { runs: runs.clone() },
        );

        reactor.tick().unwrap();
        assert_eq!(*seen.borrow(), vec!["data".to_string()]);
        assert_eq!(*runs.borrow(), 0);
    }

    #[test]
    fn falls_through_to_account_feed_when_data_feed_idle() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let runs = Rc::new(RefCell::new(0));
        let mut reactor = Reactor::new(
            FakeSource { messages: vec![] },
            FakeSource { messages: vec![WsMessage::default()] },
            RecordingHandler { seen: seen.clone(), label: "data" },
            RecordingHandler { seen: seen.clone(), label: "account" },
            CountingMaintenance { runs: runs.clone() },
        );

        reactor.tick().unwrap();
        assert_eq!(*seen.borrow(), vec!["account".to_string()]);
        assert_eq!(*runs.borrow(), 0);
    }

    #[test]
    fn runs_maintenance_only_when_both_feeds_idle() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let runs = Rc::new(RefCell::new(0));
        let mut reactor = Reactor::new(
            FakeSource { messages: vec![] },
            FakeSource { messages: vec![] },
            RecordingHandler { seen: seen.clone(), label: "data" },
            RecordingHandler { seen: seen.clone(), label: "account" },
            CountingMaintenance { runs: runs.clone() },
        );

        reactor.tick().unwrap();
        assert!(seen.borrow().is_empty());
        assert_eq!(*runs.borrow(), 1);
    }
}

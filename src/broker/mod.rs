//! Broker-facing layer: the order adapter and the account-update
//! reconciler that keeps the engine's order-state mirror honest against a
//! parallel, independently-ordered feed.
pub mod account;
pub mod orders;

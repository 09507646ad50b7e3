//! An automated equities trading bot: a realtime per-symbol trading
//! engine driven by a single-threaded cooperative reactor over Alpaca's
//! market data and account WebSocket feeds, backed by a from-scratch
//! TLS/HTTP/WebSocket transport, streaming JSON parsers tuned for the
//! feed's fixed message grammar, and a small MLP that scores each
//! quantum-price-level crossing.
pub mod broker;
pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod json;
pub mod logging;
pub mod model;
pub mod net;
pub mod numeric;
pub mod prep;

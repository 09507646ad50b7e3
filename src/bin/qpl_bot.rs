//! Process entry point: loads configuration and the scoring model, runs
//! the per-day preparation pipeline, opens the account feed, and drives
//! the realtime engine through the cooperative reactor until the
//! session's close time, liquidating every open position on the way out.
//!
//! Grounded on `original_source/trading_bot/workspace/tradingBot.cpp`'s
//! `main`/`start`, which runs this same sequence once per trading day.
use std::cell::RefCell;
use std::fs;
use std::rc::Rc;
use std::time::Duration;

use chrono::{NaiveTime, Utc};

use qpl_bot::broker::orders::AlpacaOrderBroker;
use qpl_bot::config::Config;
use qpl_bot::engine::reactor::{AccountFeedHandler, BackgroundMaintenance, DataFeedHandler, Reactor};
use qpl_bot::engine::Engine;
use qpl_bot::error::Result;
use qpl_bot::model::scaler::Scalers;
use qpl_bot::model::Model;
use qpl_bot::net::tls::TlsSocket;
use qpl_bot::net::ws::WsMessage;
use qpl_bot::{feed, logging, prep};

const TIMEOUT: Duration = Duration::from_secs(10);
const MAX_CLIENTS: usize = 16;
const SESSION_CLOSE: (u32, u32) = (20, 0); // 16:00 ET expressed in UTC during EDT

struct DataHandler {
    engine: Rc<RefCell<Engine>>,
    broker: Rc<RefCell<AlpacaOrderBroker>>,
}

impl DataFeedHandler for DataHandler {
    fn handle(&mut self, msg: &WsMessage) -> Result<()> {
        let body = String::from_utf8_lossy(&msg.payload).to_string();
        let mut engine = self.engine.borrow_mut();
        let mut broker = self.broker.borrow_mut();
        feed::dispatch_data_message(&mut engine, &body, &mut *broker)
    }
}

struct AccountHandler {
    engine: Rc<RefCell<Engine>>,
    broker: Rc<RefCell<AlpacaOrderBroker>>,
}

impl AccountFeedHandler for AccountHandler {
    fn handle(&mut self, msg: &WsMessage) -> Result<()> {
        let body = String::from_utf8_lossy(&msg.payload).to_string();
        let mut engine = self.engine.borrow_mut();
        let mut broker = self.broker.borrow_mut();
        let trading_permitted = engine.trading_permitted;
        feed::dispatch_account_message(
            &mut engine.symbols,
            &mut engine.buying_power,
            trading_permitted,
            &body,
            &mut *broker,
        )?;
        Ok(())
    }
}

struct QuoteWindowMaintenance {
    engine: Rc<RefCell<Engine>>,
    cursor: usize,
}

impl BackgroundMaintenance for QuoteWindowMaintenance {
    fn run_one(&mut self) -> bool {
        self.engine.borrow_mut().trim_one_quote_window(&mut self.cursor)
    }
}

fn past_session_close() -> bool {
    let now = Utc::now().time();
    let close = NaiveTime::from_hms_opt(SESSION_CLOSE.0, SESSION_CLOSE.1, 0).unwrap();
    now >= close
}

fn run() -> Result<()> {
    logging::init("qpl_bot.log")?;
    let config = Config::from_env()?;
    let connector = qpl_bot::net::tls::new_connector()?;

    let weights_json = fs::read_to_string("model_weights.json")
        .map_err(|e| qpl_bot::error::EngineError::BadWeights(format!("model_weights.json: {e}")))?;
    let scaler_json = fs::read_to_string("scaler_info.json")
        .map_err(|e| qpl_bot::error::EngineError::MissingFeature(format!("scaler_info.json: {e}")))?;
    let model = Model::load(&weights_json, &scaler_json)?;
    let scalers = Scalers::load(&scaler_json)?;

    let headers = vec![
        ("APCA-API-KEY-ID".to_string(), config.api_key.clone()),
        ("APCA-API-SECRET-KEY".to_string(), config.api_secret.clone()),
    ];
    let ws_headers = headers.clone();

    let date = Utc::now().format("%Y-%m-%d").to_string();

    log::info!("running daily preparation pipeline for {date}");
    let mut daily = prep::run(
        &connector,
        &config.account_host,
        &config.stream_host,
        443,
        &headers,
        &ws_headers,
        &date,
        config.allocated_buying_power,
        config.risk_per_trade,
        &scalers,
        MAX_CLIENTS,
        TIMEOUT,
    )?;
    log::info!("watching {} symbols today", daily.symbols.len());

    let account_socket = TlsSocket::connect(&connector, &config.account_host, 443)?;
    let account_feed = prep::warmup::open_account_feed(
        Box::new(account_socket),
        &config.account_host,
        &config.api_key,
        &config.api_secret,
        TIMEOUT,
    )?;

    let mut engine = Engine::new(model, daily.buying_power, config.risk_per_trade);
    engine.symbols = std::mem::take(&mut daily.symbols);
    engine.trading_permitted = true;

    let engine = Rc::new(RefCell::new(engine));
    let broker = Rc::new(RefCell::new(AlpacaOrderBroker::new(
        &config.account_host,
        config.api_key.clone(),
        config.api_secret.clone(),
        connector.clone(),
    )));

    let mut reactor = Reactor::new(
        daily.data_feed,
        account_feed,
        DataHandler { engine: engine.clone(), broker: broker.clone() },
        AccountHandler { engine: engine.clone(), broker: broker.clone() },
        QuoteWindowMaintenance { engine: engine.clone(), cursor: 0 },
    );

    log::info!("entering the trading session");
    reactor.run_until(past_session_close)?;

    log::info!("session closed, liquidating all open positions");
    let mut engine_mut = engine.borrow_mut();
    let mut broker_mut = broker.borrow_mut();
    engine_mut.liquidate_all(&mut *broker_mut);

    Ok(())
}

fn main() {
    if let Err(e) = run() {
        log::error!("qpl_bot exited with an error: {e}");
        std::process::exit(1);
    }
}

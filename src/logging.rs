//! Process-wide logging setup: a console appender plus a file appender,
//! both at `info` by default.
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} {l} [{t}] {m}{n}";

/// Initializes logging to stdout and to `log_path`. Safe to call once per
/// process; a second call is a logic error in the caller, not handled here.
pub fn init(log_path: &str) -> crate::error::Result<()> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();

    let file = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(log_path)
        .map_err(|e| crate::error::EngineError::Io(std::io::Error::other(e.to_string())))?;

    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .appender(Appender::builder().build("file", Box::new(file)))
        .build(
            Root::builder()
                .appender("stdout")
                .appender("file")
                .build(LevelFilter::Info),
        )
        .map_err(|e| crate::error::EngineError::Io(std::io::Error::other(e.to_string())))?;

    log4rs::init_config(config)
        .map_err(|e| crate::error::EngineError::Io(std::io::Error::other(e.to_string())))?;

    Ok(())
}

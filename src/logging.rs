//! Logging setup for the fan controller

use fern::Dispatch;
use log::LevelFilter;

/// Map the `-v` count to a level filter.
///
/// The per-tick temperature line is logged at info, so the quietest setting
/// still shows it.
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Setup logging with the specified verbosity level
pub fn setup(verbosity: u8) -> Result<(), fern::InitError> {
    Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level_for(verbosity))
        .chain(std::io::stdout())
        .apply()?;

    Ok(())
}

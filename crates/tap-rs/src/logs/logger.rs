use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;

// Visible width of the '[LEVEL]' column including padding
const LEVEL_FIELD_WIDTH: usize = 8;

/// Configures the global logger.
///
/// The format is `timestamp | [LEVEL] | target | message` with the level
/// colored unless `NO_COLOR` is set. The default filter is `Info`; setting
/// the `DEBUG` environment variable to a value greater than zero switches
/// it to `Debug`, which enables the per-request tracing of the proxy.
pub fn configure_logger() {
    let no_color = env::var("NO_COLOR").is_ok();

    let level = match env::var("DEBUG").ok().and_then(|v| v.parse::<i64>().ok()) {
        Some(v) if v > 0 => LevelFilter::Debug,
        _ => LevelFilter::Info,
    };

    Builder::new()
        .format(move |buf, record| {
            let level = record.level();
            let level_plain = format!("[{level}]");

            let colored_level = if no_color {
                level_plain.clone()
            } else {
                let color = match level {
                    log::Level::Error => "\x1b[31m", // red
                    log::Level::Warn => "\x1b[33m",  // yellow
                    log::Level::Info => "\x1b[32m",  // green
                    log::Level::Debug => "\x1b[34m", // blue
                    log::Level::Trace => "\x1b[35m", // magenta
                };
                format!("{color}{level_plain}\x1b[0m")
            };

            let padding = LEVEL_FIELD_WIDTH.saturating_sub(level_plain.len()).max(1);

            writeln!(
                buf,
                "{} | {}{}| {} | {}",
                Local::now().format("%b %d %y %I:%M:%S %p"),
                colored_level,
                " ".repeat(padding),
                record.target(),
                record.args(),
            )
        })
        .filter_level(level)
        .init();

    if level == LevelFilter::Debug {
        log::debug!("Debug is enabled");
    }
}

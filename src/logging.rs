use std::env;

use colored::{ColoredString, Colorize};
use log::{Level, LevelFilter};

/// Dependencies only get through when something went wrong.
const EXTERNAL_FILTER: LevelFilter = LevelFilter::Warn;

/// Wires up the fern dispatcher: one line per record, scoped and colored by
/// the part of the server that emitted it. `PARLOR_LOG` overrides the local
/// verbosity (e.g. `PARLOR_LOG=debug`).
pub fn init_logger() {
    let local_filter = env::var("PARLOR_LOG")
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(LevelFilter::Info);

    fern::Dispatch::new()
        .format(|out, message, record| {
            let time = chrono::Local::now().format("%H:%M:%S").to_string();

            out.finish(format_args!(
                "{} {} {} {}",
                time.dimmed(),
                badge(record.level()),
                scope(record.target()),
                message
            ))
        })
        .level(EXTERNAL_FILTER)
        .level_for("parlor", local_filter)
        .chain(std::io::stdout())
        .apply()
        .expect("logging is initialized")
}

/// Severe levels shout, the rest stay quiet.
fn badge(level: Level) -> ColoredString {
    match level {
        Level::Error => "error".red().bold(),
        Level::Warn => " warn".yellow().bold(),
        Level::Info => " info".blue(),
        Level::Debug => "debug".white().dimmed(),
        Level::Trace => "trace".white().dimmed(),
    }
}

/// Maps a record's target onto the part of the server it came from, so a
/// reader can follow one room's story through interleaved output.
fn scope(target: &str) -> ColoredString {
    let mut path = target.split("::");

    match (path.next(), path.next()) {
        (Some("parlor"), Some("server")) => "gateway".bright_green(),
        (Some("parlor"), Some("rooms")) => "rooms".bright_purple(),
        (Some("parlor"), Some("streams")) => "streams".blue(),
        (Some("parlor"), Some("clients")) => "clients".yellow(),
        (Some("parlor"), Some("commands")) => "console".bright_cyan(),
        (Some("parlor"), _) => "parlor".cyan(),
        (other, _) => other.unwrap_or("deps").normal(),
    }
}

//! Console logger that never prints peer addresses
//!
//! Every formatted line passes through [`scrub`] before it reaches the
//! browser console (or stderr when running natively), replacing IPv4 and
//! IPv6 addresses, with or without a port, by `[scrubbed]`.

use std::sync::OnceLock;

use log::{Level, LevelFilter, Log, Metadata, Record};
use regex::Regex;

const SCRUBBED: &str = "[scrubbed]";

const IPV4: &str = r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}";
const IPV6: &str = r"([0-9a-fA-F]{0,4}:){5,7}([0-9a-fA-F]{0,4})?";
const IPV6_COMPRESSED: &str =
    r"([0-9a-fA-F]{0,4}:){0,5}([0-9a-fA-F]{0,4})?(::)([0-9a-fA-F]{0,4}:){0,5}([0-9a-fA-F]{0,4})?";
const OPTIONAL_PORT: &str = r"(:\d{1,5})?";

struct Scrubber {
    /// An address together with the characters delimiting it
    delimited: Regex,
    /// The bare address, applied inside each delimited match
    address: Regex,
}

fn scrubber() -> &'static Scrubber {
    static SCRUBBER: OnceLock<Scrubber> = OnceLock::new();
    SCRUBBER.get_or_init(|| {
        let ipv6_full = format!(
            "({v6}({v4}))|({v6c}({v4}))|({v6})|({v6c})",
            v4 = IPV4,
            v6 = IPV6,
            v6c = IPV6_COMPRESSED
        );
        let address = format!(
            r"(({v4})|(\[({v6})\])|({v6})){port}",
            v4 = IPV4,
            v6 = ipv6_full,
            port = OPTIONAL_PORT
        );
        let delimited = format!(r"(^|\s|[^\w:]){}(\s|(:\s)|[^\w:]|$)", address);
        Scrubber {
            delimited: Regex::new(&delimited).expect("static address pattern"),
            address: Regex::new(&address).expect("static address pattern"),
        }
    })
}

/// Replace every delimited IP address (and port) in `line`
pub fn scrub(line: &str) -> String {
    let s = scrubber();
    s.delimited
        .replace_all(line, |caps: &regex::Captures<'_>| {
            s.address.replace_all(&caps[0], SCRUBBED).into_owned()
        })
        .into_owned()
}

/// Scrubbing logger behind the `log` facade
#[derive(Debug, Default)]
pub struct ScrubbingLogger;

static LOGGER: ScrubbingLogger = ScrubbingLogger;

impl Log for ScrubbingLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = scrub(&format!("[{}] {}", record.target(), record.args()));
        write_line(record, &line);
    }

    fn flush(&self) {}
}

/// Hand the scrubbed line to `console_log` with the original level and target
#[cfg(target_arch = "wasm32")]
fn write_line(record: &Record<'_>, line: &str) {
    console_log::log(
        &Record::builder()
            .args(format_args!("{}", line))
            .level(record.level())
            .target(record.target())
            .build(),
    );
}

#[cfg(not(target_arch = "wasm32"))]
fn write_line(record: &Record<'_>, line: &str) {
    eprintln!("{:<5} {}", record.level(), line);
}

/// Install the scrubbing logger
///
/// Safe to call more than once; later calls only adjust the level.
pub fn init(level: Level) {
    if log::set_logger(&LOGGER).is_err() {
        log::debug!("Logger already installed");
    }
    log::set_max_level(level.to_level_filter());
}

/// Parse a level name as used in configuration (`"debug"`, `"info"`, ...)
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    name.parse().ok()
}

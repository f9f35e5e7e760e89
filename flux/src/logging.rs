//! Terminal structured logging, initialized once at process start.

pub use slog::{debug, error, info, o, warn, Logger};

/// Builds a terminal-backed root logger at debug level. A config-file driven
/// variant (picking destination/level from the service's own config) can be
/// layered on later; a sane default is enough for a single remote endpoint
/// process.
pub fn init() -> Logger {
    use sloggers::terminal::{Destination, TerminalLoggerBuilder};
    use sloggers::types::Severity;
    use sloggers::Build;

    let mut builder = TerminalLoggerBuilder::new();
    builder.level(Severity::Debug);
    builder.destination(Destination::Stderr);

    builder.build().expect("failed to build terminal logger")
}

use std::io::Write;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use env_logger::{Builder, Env};

/// Install the process logger: `[<unix ms>ms][<thread>] <message>` on stderr.
///
/// Defaults to `info`, so every unit produced gets a line; `RUST_LOG`
/// overrides it (e.g. `RUST_LOG=debug` adds lifecycle transitions).
pub fn init() {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format(|buf, record| {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let current = thread::current();
        let thread_name = current.name().unwrap_or("unnamed");
        writeln!(buf, "[{ts}ms][{thread_name}] {}", record.args())
    });
    // A second init (e.g. from tests) keeps the first logger.
    let _ = builder.try_init();
}

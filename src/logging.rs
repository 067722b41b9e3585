use std::io::Write;

use chrono::Local;
use log::LevelFilter;

/// Installs the process logger. `RUST_LOG` overrides `level`.
/// Calling it twice is harmless; the first logger stays in place.
pub fn init(level: LevelFilter) {
    let result = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init();

    match result {
        Ok(()) => log::info!("Logging initialized"),
        Err(e) => eprintln!("Logger already initialized: {}", e),
    }
}

#[cfg(feature = "env")]
use std::io::Write;

/// Initialize `env_logger` for tests and local runs.
///
/// Each line carries the source location, a local timestamp, the thread name and the level. The
/// thread name identifies the shard a record was emitted on. Filtering follows `RUST_LOG`. Calling
/// it again once a logger is installed does nothing.
#[cfg(feature = "env")]
pub fn try_init_log() {
    let _ = env_logger::builder()
        .is_test(true)
        .format(|buf, record| {
            let thread = std::thread::current();
            writeln!(
                buf,
                "{}:{} {} [{}] [{}] - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                thread.name().unwrap_or("unnamed"),
                record.level(),
                record.args()
            )
        })
        .try_init();
}

use env_logger::{Builder, Env};

/// Routes `log` records to stderr, filtered by `RUST_LOG` (warnings by default).
pub fn init() {
    Builder::from_env(Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

//! Helpers shared by spilljoin test binaries.

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize tracing for test binaries. Safe to call multiple times.
///
/// Honors `RUST_LOG` when set; defaults to `info` otherwise. Set
/// `RUST_LOG=spilljoin_join=trace` to follow individual spill events.
pub fn init_tracing_for_tests() {
    INIT.call_once(|| {
        use tracing_subscriber::filter::EnvFilter;
        use tracing_subscriber::fmt;
        let env = std::env::var("RUST_LOG").ok();
        let filter = match env {
            Some(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            None => EnvFilter::new("info"),
        };
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_test_writer()
            .init();
    });
}

/// Create a scratch directory for spill files that is removed when the guard drops.
pub fn spill_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("spilljoin-test-")
        .tempdir()
        .expect("create spill directory for test")
}

/// Number of entries currently present in a spill directory.
pub fn spill_file_count(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

#[cfg(feature = "auto-init")]
mod auto {
    // Use ctor to run at binary init time to avoid having to call init in every test.
    use ctor::ctor;

    #[ctor]
    fn init() {
        super::init_tracing_for_tests();
    }
}

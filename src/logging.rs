//! Tracing setup shared by both binaries.

use tracing::{debug, trace};
use tracing_subscriber::EnvFilter;

fn level_for(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Installs a stderr subscriber. `RUST_LOG` wins over the `-v` count so a
/// single module can be turned up without flooding the rest.
pub fn init_logging(verbose: u8) {
    let level = level_for(verbose);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,mr={level},distributor={level},worker={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose >= 1)
        .with_thread_ids(verbose >= 2)
        .init();

    debug!("logging initialised at verbosity {}", verbose);
    trace!("args: {:?}", std::env::args().collect::<Vec<_>>());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_for(0), "info");
        assert_eq!(level_for(1), "debug");
        assert_eq!(level_for(5), "trace");
    }
}

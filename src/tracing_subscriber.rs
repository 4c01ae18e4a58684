/// `verbosity` is the repeat count of the CLI's `-v`/`--verbose` flag: it only picks the
/// default level `RUST_LOG` falls back to when unset, so an explicit `RUST_LOG` always
/// wins.
pub fn init(verbosity: u8) {
    let _ = verbosity;

    #[cfg(all(feature = "tracing-subscriber", not(feature = "console-subscriber")))]
    {
        use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, FmtSubscriber};

        let default_level = match verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

        FmtSubscriber::builder().with_env_filter(filter).finish().init();
    }

    #[cfg(feature = "console-subscriber")]
    console_subscriber::init();
}

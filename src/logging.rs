use tracing_subscriber::{fmt, EnvFilter};

/// Install the stderr subscriber. `RUST_LOG` wins over `default_directives`.
pub fn init(default_directives: &str) {
    let env = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Default directive set for a tool binary.
pub fn directives(verbose: bool) -> &'static str {
    if verbose {
        "debug,reqwest=info,hyper=info,rustls=info"
    } else {
        "info"
    }
}

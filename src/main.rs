use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = catpool::cli::parse(None) {
        eprintln!("fatal: {e}");
        std::process::exit(128);
    }
}

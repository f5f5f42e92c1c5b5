mod app;
mod design;
mod executor;

use anyhow::Context;
use stimex_core::RuntimeConfig;

use app::App;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => RuntimeConfig::from_path(&path)
            .with_context(|| format!("loading runtime config from {path}"))?,
        None => RuntimeConfig::default(),
    };
    let output = args.next().map(Into::into);

    App::new(config, output)?.run()
}

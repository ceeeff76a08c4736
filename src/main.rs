use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod at;
mod bench;
mod cli;
mod cmd;
mod coap;
mod http;
mod payload;
mod port;
mod radio;
mod socket;

fn init_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_logging(args.debug);
    match args.cmd {
        cli::Cmd::At(opts) => cmd::at::run(opts),
        cli::Cmd::Attach(opts) => cmd::attach::run(opts),
        cli::Cmd::Coap(opts) => cmd::coap::run(opts),
        cli::Cmd::Http(opts) => cmd::http::run(opts),
        cli::Cmd::Mqtt(opts) => cmd::mqtt::run(opts),
    }
}

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::{open_nbiot, with_radio};
use crate::cli::AttachOpts;
use crate::radio::Radio;

pub fn run(opts: AttachOpts) -> Result<()> {
    info!("attach: {:?}", opts);
    let mut radio = open_nbiot(&opts.ser, &opts.nbiot)?;
    with_radio(&mut radio, |radio| {
        if let Some(addr) = radio.address() {
            info!("local address {}", addr);
        }
        match radio.signal_strength()? {
            Some(q) => info!("signal quality: {}", q),
            None => warn!("signal quality unavailable"),
        }
        let replies = radio
            .ping(&opts.server.host, opts.ping_count, Duration::from_secs(opts.ping_timeout))
            .with_context(|| format!("ping {}", opts.server.host))?;
        info!(
            "{}: {}/{} echo replies",
            opts.server.host,
            replies.len(),
            opts.ping_count
        );
        Ok(())
    })
}

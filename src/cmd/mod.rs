//! Subcommand entry points. Each one brings a bearer up, runs its transfers
//! and always brings the bearer down again.

use std::fmt;
use std::thread;

use anyhow::{Context, Result, bail};
use tracing::warn;

use crate::bench::{Retryable, RttStats, repeat_until_ok, timed};
use crate::cli::{NbiotOpts, RepeatOpts, SerialOpts};
use crate::port::open_port;
use crate::radio::{HostRadio, Nbiot, Radio, RadioKind};

pub mod at;
pub mod attach;
pub mod coap;
pub mod http;
pub mod mqtt;

pub fn open_nbiot(ser: &SerialOpts, nbiot: &NbiotOpts) -> Result<Nbiot> {
    let port = open_port(ser)?;
    Ok(Nbiot::new(Box::new(port), nbiot.config(ser)))
}

/// Connect `radio`, run `f`, then deinit whatever `f` returned.
pub fn with_radio<R: Radio, T>(radio: &mut R, f: impl FnOnce(&mut R) -> Result<T>) -> Result<T> {
    let kind = radio.kind();
    if let Err(e) = radio.connect() {
        if let Err(down) = radio.deinit() {
            warn!("{} deinit after failed connect: {}", kind, down);
        }
        return Err(e).with_context(|| format!("{} connect", kind));
    }
    let result = f(radio);
    if let Err(e) = radio.deinit() {
        warn!("{} deinit: {}", kind, e);
    }
    result
}

/// WLAN/LTE bearer for transfers over host sockets.
pub fn host_radio(kind: RadioKind, dns_probe: &str) -> Result<HostRadio> {
    if kind == RadioKind::Nbiot {
        bail!("{} has no host sockets; pick a modem transport with --via", kind);
    }
    Ok(HostRadio::new(kind).with_dns_probe(dns_probe))
}

/// Run `transfer` `opts.repeat` times. Timeouts are retried per transfer;
/// each successful attempt contributes one round-trip sample.
pub fn run_repeated<E: Retryable + fmt::Display>(
    desc: &str,
    opts: &RepeatOpts,
    mut transfer: impl FnMut() -> Result<(), E>,
) -> Result<RttStats> {
    let mut stats = RttStats::new();
    for i in 0..opts.repeat {
        if i > 0 {
            thread::sleep(opts.pause());
        }
        match repeat_until_ok(opts.retry_delay(), opts.max_attempts, || timed(desc, &mut transfer)) {
            Ok(((), rtt)) => stats.record(rtt),
            Err(_) => stats.record_failure(),
        }
    }
    stats.log_summary(desc);
    if opts.repeat > 0 && stats.ok() == 0 {
        bail!("{}: no transfer succeeded", desc);
    }
    Ok(stats)
}

//! Timing and retry helpers around one transfer.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::at::AtError;
use crate::coap::CoapError;
use crate::http::HttpError;
use crate::radio::RadioError;
use crate::socket::SocketError;

/// Errors that tell a timeout apart from a hard failure.
pub trait Retryable {
    fn is_timeout(&self) -> bool;
}

impl Retryable for AtError {
    fn is_timeout(&self) -> bool {
        AtError::is_timeout(self)
    }
}

impl Retryable for SocketError {
    fn is_timeout(&self) -> bool {
        SocketError::is_timeout(self)
    }
}

impl Retryable for CoapError {
    fn is_timeout(&self) -> bool {
        CoapError::is_timeout(self)
    }
}

impl Retryable for RadioError {
    fn is_timeout(&self) -> bool {
        RadioError::is_timeout(self)
    }
}

impl Retryable for HttpError {
    fn is_timeout(&self) -> bool {
        HttpError::is_timeout(self)
    }
}

/// Run `f`, logging its start, outcome and duration.
pub fn timed<T, E: fmt::Display>(desc: &str, f: impl FnOnce() -> Result<T, E>) -> Result<(T, Duration), E> {
    info!("{} ...", desc);
    let t0 = Instant::now();
    let result = f();
    let elapsed = t0.elapsed();
    match result {
        Ok(v) => {
            info!("{} OK ({} ms)", desc, elapsed.as_millis());
            Ok((v, elapsed))
        }
        Err(e) => {
            warn!("{} failed ({} ms): {}", desc, elapsed.as_millis(), e);
            Err(e)
        }
    }
}

pub fn timed_step<T, E: fmt::Display>(desc: &str, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
    timed(desc, f).map(|(v, _)| v)
}

/// Call `f` until it succeeds, sleeping `delay` after every timeout. Other
/// failures are returned at once. `max_attempts` of `None` never gives up.
pub fn repeat_until_ok<T, E: Retryable + fmt::Display>(
    delay: Duration,
    max_attempts: Option<u32>,
    mut f: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    let mut attempt = 1u32;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_timeout() && max_attempts.is_none_or(|max| attempt < max) => {
                warn!("attempt {} timed out ({}), retrying in {:?}", attempt, e, delay);
                thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Round-trip times of repeated transfers.
#[derive(Debug, Clone, Default)]
pub struct RttStats {
    samples: Vec<Duration>,
    failed: u32,
}

impl RttStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, rtt: Duration) {
        self.samples.push(rtt);
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    pub fn ok(&self) -> usize {
        self.samples.len()
    }

    pub fn failed(&self) -> u32 {
        self.failed
    }

    pub fn min(&self) -> Option<Duration> {
        self.samples.iter().min().copied()
    }

    pub fn max(&self) -> Option<Duration> {
        self.samples.iter().max().copied()
    }

    pub fn mean(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<Duration>() / self.samples.len() as u32)
    }

    pub fn log_summary(&self, desc: &str) {
        match (self.min(), self.mean(), self.max()) {
            (Some(min), Some(mean), Some(max)) => info!(
                "{}: ok={} failed={} rtt min/avg/max = {}/{}/{} ms",
                desc,
                self.ok(),
                self.failed(),
                min.as_millis(),
                mean.as_millis(),
                max.as_millis()
            ),
            _ => info!("{}: ok=0 failed={}", desc, self.failed()),
        }
    }
}

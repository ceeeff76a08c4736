use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::{debug, warn};

use super::command::{AtCommand, Response};
use super::error::AtError;
use crate::port::{LineTransport, SerialLink, truncate_for_log};

/// Emitted by the modem when it loses power. Fatal for any command except
/// the one that asked for it.
pub const POWER_DOWN_MARKER: &str = "NORMAL POWER DOWN";
pub const ERROR_MARKER: &str = "ERROR";
const CME_ERROR_PREFIX: &str = "+CME ERROR";

/// How the detached reader treats matching indication lines.
#[derive(Debug, Clone, Copy)]
pub enum DetachedMode<'a> {
    /// Return as soon as one matching line arrives.
    First,
    /// Collect matching lines until a line containing `until` arrives.
    Accumulate { until: &'a str },
}

/// Command/response capability of a radio driver.
pub trait AtChannel {
    fn execute(&mut self, cmd: &AtCommand) -> Result<Response, AtError>;

    /// Wait for unsolicited lines containing `prefix`. Each matched line is
    /// returned with spaces and quotes removed, split on commas. The idle
    /// timer restarts with every received line.
    fn read_detached(
        &mut self,
        prefix: &str,
        mode: DetachedMode<'_>,
        timeout: Duration,
    ) -> Result<Vec<Vec<String>>, AtError>;
}

/// Adapters sharing one modem. Only one command is ever in flight.
pub type SharedChannel = Rc<RefCell<dyn AtChannel>>;

pub struct AtEngine {
    transport: LineTransport,
}

impl AtEngine {
    pub fn new(link: Box<dyn SerialLink>) -> Self {
        Self {
            transport: LineTransport::new(link),
        }
    }

    pub fn set_power_line(&mut self, high: bool) -> io::Result<()> {
        self.transport.link_mut().set_power_line(high)
    }

    fn send(&mut self, cmd: &AtCommand) -> Result<Instant, AtError> {
        debug!("--> {}", truncate_for_log(cmd.text()));
        self.transport.write_line(cmd.text())?;
        Ok(Instant::now() + cmd.deadline_after())
    }

    fn next_line(&mut self, deadline: Instant, cmd: &AtCommand) -> Result<String, AtError> {
        let line = self.transport.read_line(deadline, cmd.text())?;
        debug!("<-- {}", truncate_for_log(&line));
        if line == POWER_DOWN_MARKER && cmd.terminal_marker() != POWER_DOWN_MARKER {
            warn!("modem powered down while running {}", truncate_for_log(cmd.text()));
            return Err(AtError::PoweredDown);
        }
        Ok(line)
    }

    /// Run `cmd` while collecting lines that start with `prefix` (with the
    /// prefix removed, split on commas). Completes once the echo and the
    /// terminal marker were seen and `done` accepts the collected lines.
    pub fn execute_streaming(
        &mut self,
        cmd: &AtCommand,
        prefix: &str,
        done: impl Fn(&[Vec<String>]) -> bool,
    ) -> Result<(Response, Vec<Vec<String>>), AtError> {
        let deadline = self.send(cmd)?;
        let mut echoed = false;
        let mut terminated = false;
        let mut lines = Vec::new();

        while !(echoed && terminated && done(&lines)) {
            let line = self.next_line(deadline, cmd)?;
            if is_failure(&line) {
                return Ok((Response::failure(), lines));
            }
            if !echoed && line.contains(cmd.text()) {
                echoed = true;
                continue;
            }
            if let Some(rest) = line.strip_prefix(prefix) {
                lines.push(split_fields(rest.trim()));
                continue;
            }
            if line.trim() == cmd.terminal_marker() {
                terminated = true;
            }
        }
        Ok((Response::success(Vec::new()), lines))
    }
}

impl AtChannel for AtEngine {
    fn execute(&mut self, cmd: &AtCommand) -> Result<Response, AtError> {
        let pattern = cmd.pattern().map(compile).transpose()?;
        let deadline = self.send(cmd)?;
        let mut echoed = false;
        let mut terminated = false;
        let mut captured: Option<Vec<String>> = None;

        while !(echoed && terminated && (pattern.is_none() || captured.is_some())) {
            let line = self.next_line(deadline, cmd)?;
            if is_failure(&line) {
                debug!("<--- CMD_ERROR");
                return Ok(Response::failure());
            }
            if !echoed && line.contains(cmd.text()) {
                echoed = true;
                continue;
            }
            if captured.is_none()
                && let Some(re) = &pattern
                && let Some(fields) = capture_fields(re, &line, cmd.indices())
            {
                captured = Some(fields);
                continue;
            }
            if line.trim() == cmd.terminal_marker() {
                terminated = true;
            }
        }

        debug!("<--- CMD_OK");
        Ok(Response::success(captured.unwrap_or_default()))
    }

    fn read_detached(
        &mut self,
        prefix: &str,
        mode: DetachedMode<'_>,
        timeout: Duration,
    ) -> Result<Vec<Vec<String>>, AtError> {
        let mut collected = Vec::new();

        loop {
            let deadline = Instant::now() + timeout;
            let line = match self.transport.read_line(deadline, prefix) {
                Ok(line) => line,
                // A drained stream that never sent its closing indication.
                Err(AtError::Timeout { .. }) if !collected.is_empty() => return Ok(collected),
                Err(e) => return Err(e),
            };
            debug!("<-- {}", truncate_for_log(&line));
            if line == POWER_DOWN_MARKER {
                warn!("modem powered down while waiting for {}", prefix);
                return Err(AtError::PoweredDown);
            }

            if line.contains(prefix) {
                collected.push(split_fields(&strip_noise(&line)));
                if matches!(mode, DetachedMode::First) {
                    return Ok(collected);
                }
                continue;
            }
            if let DetachedMode::Accumulate { until } = mode
                && line.contains(until)
            {
                return Ok(collected);
            }
        }
    }
}

fn compile(pattern: &str) -> Result<Regex, AtError> {
    Ok(Regex::new(&format!("^(?:{pattern})"))?)
}

fn is_failure(line: &str) -> bool {
    line == ERROR_MARKER || line.starts_with(CME_ERROR_PREFIX)
}

/// Fields of `line` if `re` matches it: the requested capture groups, or the
/// comma-split line when no indices are given. Missing groups yield "".
pub fn capture_fields(re: &Regex, line: &str, indices: Option<&[usize]>) -> Option<Vec<String>> {
    let caps = re.captures(line)?;
    if caps.get(0)?.as_str().is_empty() {
        return None;
    }
    Some(match indices {
        Some(idx) => idx
            .iter()
            .map(|&i| caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect(),
        None => split_fields(line),
    })
}

pub fn split_fields(line: &str) -> Vec<String> {
    line.split(',').map(str::to_string).collect()
}

/// Drop the spaces and quotes modems put around indication fields.
pub fn strip_noise(line: &str) -> String {
    line.chars().filter(|&c| c != ' ' && c != '"').collect()
}

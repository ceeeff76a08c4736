use std::borrow::Cow;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use anyhow::Result;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::trace;

use crate::at::AtError;
use crate::cli::SerialOpts;

/// Blocking read granularity of the serial port. Bounds how far a read may
/// overshoot its deadline.
pub const READ_QUANTUM: Duration = Duration::from_millis(20);

/// Logged lines are cut to this many characters.
pub const LOG_LINE_MAX: usize = 75;

const READ_CHUNK: usize = 256;

/// Byte channel to the modem plus its power-control line.
pub trait SerialLink: Read + Write {
    /// Drive the modem's power-key line. Links without one ignore the call.
    fn set_power_line(&mut self, _high: bool) -> io::Result<()> {
        Ok(())
    }
}

impl SerialLink for Box<dyn SerialPort> {
    // The power key is wired to DTR on the adapter boards we use.
    fn set_power_line(&mut self, high: bool) -> io::Result<()> {
        self.write_data_terminal_ready(high).map_err(io::Error::from)
    }
}

pub fn open_port(opts: &SerialOpts) -> Result<Box<dyn SerialPort>> {
    let builder = serialport::new(&opts.dev, opts.baud)
        .timeout(READ_QUANTUM)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(if opts.rtscts {
            FlowControl::Hardware
        } else {
            FlowControl::None
        });

    builder
        .open()
        .map_err(|e| anyhow::anyhow!("open {}: {}", opts.dev, e))
}

/// Cut a line for logging only; matching always uses the full line.
pub fn truncate_for_log(line: &str) -> Cow<'_, str> {
    match line.char_indices().nth(LOG_LINE_MAX) {
        Some((cut, _)) => Cow::Owned(format!("{}..", &line[..cut])),
        None => Cow::Borrowed(line),
    }
}

/// Newline-delimited text transport over a serial link.
///
/// Bytes are buffered across calls, so lines that arrive after a command has
/// completed are still delivered to the next reader.
pub struct LineTransport {
    link: Box<dyn SerialLink>,
    pending: Vec<u8>,
}

impl LineTransport {
    pub fn new(link: Box<dyn SerialLink>) -> Self {
        Self {
            link,
            pending: Vec::with_capacity(READ_CHUNK * 2),
        }
    }

    pub fn link_mut(&mut self) -> &mut dyn SerialLink {
        &mut *self.link
    }

    /// Write `line` followed by CRLF.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut out = Vec::with_capacity(line.len() + 2);
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
        self.link.write_all(&out)?;
        self.link.flush()
    }

    /// Next non-empty, decodable line, with CR/LF stripped.
    ///
    /// Fails with [`AtError::Timeout`] once `deadline` passes. Lines that are
    /// not valid UTF-8 are dropped and reading continues.
    pub fn read_line(&mut self, deadline: Instant, command: &str) -> Result<String, AtError> {
        loop {
            while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = self.pending.drain(..=pos).collect();
                let trimmed = trim_line_end(&raw);
                if trimmed.is_empty() {
                    continue;
                }
                match std::str::from_utf8(trimmed) {
                    Ok(text) => return Ok(text.to_string()),
                    Err(e) => trace!("dropping undecodable line ({} bytes): {}", trimmed.len(), e),
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(AtError::Timeout {
                    command: command.to_string(),
                });
            }

            let mut chunk = [0u8; READ_CHUNK];
            match self.link.read(&mut chunk) {
                Ok(0) => std::thread::sleep(READ_QUANTUM.min(deadline - now)),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(AtError::Io(e)),
            }
        }
    }
}

fn trim_line_end(raw: &[u8]) -> &[u8] {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\r' | b'\n') {
        end -= 1;
    }
    let mut start = 0;
    while start < end && raw[start] == b'\r' {
        start += 1;
    }
    &raw[start..end]
}

#[cfg(test)]
pub mod mock {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::rc::Rc;

    use super::SerialLink;

    /// Serial link that answers written command lines from a script.
    ///
    /// Every written line is echoed back (like `ATE1`), then the scripted
    /// reply of the first pending entry whose expected prefix matches.
    #[derive(Default)]
    pub struct ScriptedLink {
        inbound: VecDeque<u8>,
        outbound: Vec<u8>,
        script: VecDeque<(String, Vec<String>)>,
        echo: bool,
        written: Rc<RefCell<Vec<String>>>,
        power: Rc<RefCell<Vec<bool>>>,
    }

    impl ScriptedLink {
        pub fn new() -> Self {
            Self {
                echo: true,
                ..Default::default()
            }
        }

        pub fn without_echo(mut self) -> Self {
            self.echo = false;
            self
        }

        /// Reply with `lines` once a line starting with `command` is written.
        pub fn reply(mut self, command: &str, lines: &[&str]) -> Self {
            self.script.push_back((
                command.to_string(),
                lines.iter().map(|l| l.to_string()).collect(),
            ));
            self
        }

        /// Bytes available before any command is written.
        pub fn preload(mut self, raw: &[u8]) -> Self {
            self.inbound.extend(raw.iter().copied());
            self
        }

        /// Shared log of every line written to the link.
        pub fn written(&self) -> Rc<RefCell<Vec<String>>> {
            Rc::clone(&self.written)
        }

        pub fn power_log(&self) -> Rc<RefCell<Vec<bool>>> {
            Rc::clone(&self.power)
        }

        fn push_line(&mut self, line: &str) {
            self.inbound.extend(line.as_bytes().iter().copied());
            self.inbound.extend(b"\r\n".iter().copied());
        }

        fn on_line(&mut self, line: String) {
            if self.echo {
                self.push_line(&line);
            }
            let hit = self
                .script
                .iter()
                .position(|(expect, _)| line.starts_with(expect.as_str()));
            if let Some(idx) = hit
                && let Some((_, reply)) = self.script.remove(idx)
            {
                for l in reply {
                    self.push_line(&l);
                }
            }
            self.written.borrow_mut().push(line);
        }
    }

    impl Read for ScriptedLink {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.inbound.is_empty() {
                return Ok(0);
            }
            let n = buf.len().min(self.inbound.len());
            for (dst, src) in buf.iter_mut().zip(self.inbound.drain(..n)) {
                *dst = src;
            }
            Ok(n)
        }
    }

    impl Write for ScriptedLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.outbound.extend_from_slice(buf);
            while let Some(pos) = self.outbound.windows(2).position(|w| w == b"\r\n") {
                let raw: Vec<u8> = self.outbound.drain(..pos + 2).collect();
                let line = String::from_utf8_lossy(&raw[..pos]).into_owned();
                self.on_line(line);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SerialLink for ScriptedLink {
        fn set_power_line(&mut self, high: bool) -> io::Result<()> {
            self.power.borrow_mut().push(high);
            Ok(())
        }
    }
}

use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const OK_MARKER: &str = "OK";

/// One command line and what must be seen before its response is complete.
#[derive(Debug, Clone)]
pub struct AtCommand {
    text: String,
    pattern: Option<String>,
    indices: Option<Vec<usize>>,
    terminal: String,
    timeout: Duration,
}

impl AtCommand {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            pattern: None,
            indices: None,
            terminal: OK_MARKER.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Require a line matching `pattern` (anchored at the line start).
    pub fn expect(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Capture groups to extract from the matching line. Without indices the
    /// whole matching line is split on commas.
    pub fn capture(mut self, indices: &[usize]) -> Self {
        self.indices = Some(indices.to_vec());
        self
    }

    pub fn terminal(mut self, marker: impl Into<String>) -> Self {
        self.terminal = marker.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    pub fn indices(&self) -> Option<&[usize]> {
        self.indices.as_deref()
    }

    pub fn terminal_marker(&self) -> &str {
        &self.terminal
    }

    pub fn deadline_after(&self) -> Duration {
        self.timeout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failure,
}

/// Outcome of a completed command. Timeouts are reported as errors instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub captured: Vec<String>,
}

impl Response {
    pub fn success(captured: Vec<String>) -> Self {
        Self {
            status: Status::Success,
            captured,
        }
    }

    pub fn failure() -> Self {
        Self {
            status: Status::Failure,
            captured: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn field(&self, idx: usize) -> Option<&str> {
        self.captured.get(idx).map(String::as_str)
    }
}

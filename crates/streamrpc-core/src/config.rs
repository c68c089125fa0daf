//! Centralized configuration for the stream transport.
//!
//! Constants live on [`TransportConfig`]; per-client settings live on
//! [`ClientConfig`], whose `Default` is built from those constants.

use std::time::Duration;

/// Transport-level constants.
pub struct TransportConfig;

impl TransportConfig {
    pub const JSONRPC_VERSION: &'static str = "2.0";
    pub const READER_THREAD_NAME: &'static str = "streamrpc-reader";
    pub const NOTIFICATION_THREAD_NAME: &'static str = "streamrpc-notify";
    pub const READ_BUFFER_SIZE: usize = 8192;
    /// Longest top-level number literal the reader accepts.
    pub const MAX_NUMBER_LITERAL_LEN: usize = 1024;
    pub const DEFAULT_CLI_TIMEOUT: Duration = Duration::from_secs(30);
}

/// How responses are matched to the calls that are waiting for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorrelationMode {
    /// Each caller receives the response carrying the id of its own request.
    #[default]
    ById,
    /// The first waiting caller receives whatever response arrives next.
    ///
    /// Only sound when calls are issued one at a time; concurrent callers
    /// can receive each other's responses.
    Fifo,
}

impl CorrelationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationMode::ById => "by-id",
            CorrelationMode::Fifo => "fifo",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "by-id" | "byid" | "id" => Some(CorrelationMode::ById),
            "fifo" => Some(CorrelationMode::Fifo),
            _ => None,
        }
    }
}

impl std::fmt::Display for CorrelationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Runtime configuration for a [`StreamingClient`](crate::StreamingClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Response matching strategy.
    pub correlation: CorrelationMode,
    /// Upper bound on queued values. In FIFO mode the reader pauses while
    /// the queue is full; in by-id mode the oldest unsolicited value is
    /// discarded instead.
    pub max_pending_responses: Option<usize>,
    /// How long a call waits for its response (`None` = forever).
    pub response_timeout: Option<Duration>,
    /// Peek for end-of-stream before each value parse.
    pub probe_end_of_stream: bool,
    /// Terminate each outbound message with a newline.
    pub line_delimited: bool,
    /// Name of the background reader thread.
    pub reader_thread_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            correlation: CorrelationMode::default(),
            max_pending_responses: None,
            response_timeout: None,
            probe_end_of_stream: true,
            line_delimited: true,
            reader_thread_name: TransportConfig::READER_THREAD_NAME.to_string(),
        }
    }
}

impl ClientConfig {
    /// Configuration matching the positional FIFO behaviour.
    pub fn fifo() -> Self {
        Self {
            correlation: CorrelationMode::Fifo,
            ..Self::default()
        }
    }

    pub fn with_correlation(mut self, mode: CorrelationMode) -> Self {
        self.correlation = mode;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    pub fn with_max_pending_responses(mut self, bound: usize) -> Self {
        self.max_pending_responses = Some(bound.max(1));
        self
    }

    pub fn with_probe_end_of_stream(mut self, enabled: bool) -> Self {
        self.probe_end_of_stream = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_mode_roundtrip() {
        for mode in [CorrelationMode::ById, CorrelationMode::Fifo] {
            let parsed = CorrelationMode::from_str(mode.as_str()).expect("Should parse");
            assert_eq!(mode, parsed);
        }
        assert!(CorrelationMode::from_str("random").is_none());
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.correlation, CorrelationMode::ById);
        assert!(config.probe_end_of_stream);
        assert!(config.max_pending_responses.is_none());
        assert_eq!(config.reader_thread_name, TransportConfig::READER_THREAD_NAME);
    }

    #[test]
    fn test_pending_bound_is_at_least_one() {
        let config = ClientConfig::fifo().with_max_pending_responses(0);
        assert_eq!(config.max_pending_responses, Some(1));
        assert_eq!(config.correlation, CorrelationMode::Fifo);
    }
}

//! Baud rate auto-detection
//!
//! The instrument streams ASCII as soon as it is powered. Opening the port at
//! the wrong rate yields mostly garbage characters, so each candidate rate is
//! scored by how text-like the first few characters look.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use super::{LinkError, SerialTransport};

/// Candidate rates, fastest first
pub const DEFAULT_CANDIDATE_RATES: [u32; 5] = [9600, 2400, 1200, 600, 300];

/// Characters examined per rate
pub const DEFAULT_CHAR_QUOTA: usize = 30;

const READ_CHUNK: usize = 64;

/// Link negotiation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Rates to try, in order
    pub candidate_rates: Vec<u32>,
    /// Characters examined before giving up on a rate
    pub char_quota: usize,
    /// A running score above this accepts the rate
    pub accept_score: i32,
    /// A running score below this rejects the rate
    pub reject_score: i32,
    /// Longest wait for a single read, in milliseconds
    pub read_timeout_ms: u64,
    /// How often a rate is reopened after the stream ends early
    pub max_eof_retries: u32,
    /// Whitespace-only reads tolerated per probe before the rate is given up
    pub max_blank_reads: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            candidate_rates: DEFAULT_CANDIDATE_RATES.to_vec(),
            char_quota: DEFAULT_CHAR_QUOTA,
            accept_score: 5,
            reject_score: -5,
            read_timeout_ms: 2000,
            max_eof_retries: 3,
            max_blank_reads: 16,
        }
    }
}

/// How a single probe at one rate ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    Accepted(i32),
    Rejected(i32),
    QuotaExhausted(i32),
    TimedOut(i32),
    StreamEnded(i32),
}

fn link_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[A-Za-z0-9#:./\s]").expect("static pattern"))
}

/// Text-likeness of one chunk: two points per expected character, minus the
/// chunk length. Plain instrument output scores positive, line noise negative.
pub fn score_chunk(chunk: &str) -> i32 {
    let matching = link_chars().find_iter(chunk).count() as i32;
    let length = chunk.chars().count() as i32;
    2 * matching - length
}

/// Finds the rate the instrument is transmitting at
#[derive(Debug, Clone, Default)]
pub struct LinkNegotiator {
    config: LinkConfig,
}

impl LinkNegotiator {
    /// Negotiator with the given configuration
    pub fn new(config: LinkConfig) -> Self {
        Self { config }
    }

    /// Active configuration
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Try the configured candidate rates in order.
    ///
    /// `Ok(None)` means no rate produced text-like output; the caller decides
    /// whether to retry. The port is closed before this returns, on every path.
    pub async fn detect_baud_rate<T: SerialTransport>(
        &self,
        transport: &mut T,
        cancel: &CancellationToken,
    ) -> Result<Option<u32>, LinkError> {
        let rates = self.config.candidate_rates.clone();
        self.detect_with_rates(transport, &rates, cancel).await
    }

    /// Same as [`detect_baud_rate`](Self::detect_baud_rate) over an explicit rate list
    pub async fn detect_with_rates<T: SerialTransport>(
        &self,
        transport: &mut T,
        rates: &[u32],
        cancel: &CancellationToken,
    ) -> Result<Option<u32>, LinkError> {
        for &rate in rates {
            let mut eof_retries = 0;
            loop {
                if cancel.is_cancelled() {
                    return Err(LinkError::Cancelled);
                }

                let probe = {
                    let mut reader = transport.open(rate)?;
                    self.probe(&mut reader, cancel).await?
                };

                match probe {
                    Probe::Accepted(score) => {
                        tracing::info!(baud_rate = rate, score, "instrument link detected");
                        return Ok(Some(rate));
                    }
                    Probe::StreamEnded(score) if eof_retries < self.config.max_eof_retries => {
                        eof_retries += 1;
                        tracing::debug!(
                            baud_rate = rate,
                            score,
                            attempt = eof_retries,
                            "stream ended early, reopening"
                        );
                    }
                    other => {
                        tracing::debug!(baud_rate = rate, outcome = ?other, "rate rejected");
                        break;
                    }
                }
            }
        }

        tracing::warn!(rates = ?rates, "no candidate rate produced a readable stream");
        Ok(None)
    }

    async fn probe<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
        cancel: &CancellationToken,
    ) -> Result<Probe, LinkError> {
        let timeout = Duration::from_millis(self.config.read_timeout_ms);
        let mut buf = [0u8; READ_CHUNK];
        let mut score = 0i32;
        let mut consumed = 0usize;
        let mut blank_reads = 0u32;

        while consumed < self.config.char_quota {
            let read = tokio::select! {
                _ = cancel.cancelled() => return Err(LinkError::Cancelled),
                read = tokio::time::timeout(timeout, reader.read(&mut buf)) => read,
            };

            let n = match read {
                Err(_) => return Ok(Probe::TimedOut(score)),
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(0)) => return Ok(Probe::StreamEnded(score)),
                Ok(Ok(n)) => n,
            };

            let chunk = String::from_utf8_lossy(&buf[..n]);
            // Idle line padding carries no signal and does not count toward the quota
            if chunk.trim().is_empty() {
                blank_reads += 1;
                if blank_reads > self.config.max_blank_reads {
                    return Ok(Probe::QuotaExhausted(score));
                }
                continue;
            }

            score += score_chunk(&chunk);
            consumed += chunk.chars().count();

            if score < self.config.reject_score {
                return Ok(Probe::Rejected(score));
            }
            if score > self.config.accept_score {
                return Ok(Probe::Accepted(score));
            }
        }

        Ok(Probe::QuotaExhausted(score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_plain_text() {
        assert_eq!(score_chunk("001234.5 #/cc\r\n"), 15);
    }

    #[test]
    fn test_score_garbage() {
        assert_eq!(score_chunk("\u{fffd}\u{fffd}\u{fffd}x"), -2);
        assert_eq!(score_chunk("~~~~"), -4);
    }

    #[test]
    fn test_default_config() {
        let config = LinkConfig::default();
        assert_eq!(config.candidate_rates, vec![9600, 2400, 1200, 600, 300]);
        assert_eq!(config.char_quota, 30);
        assert_eq!(config.max_blank_reads, 16);
    }
}

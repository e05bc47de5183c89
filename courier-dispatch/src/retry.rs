//! Retry strategy: classify a failed attempt and pick the next defer delay.
//!
//! Classification is deliberately retry-biased: anything not recognizably
//! permanent is treated as temporary, so a transient outage never burns a
//! message.

use serde::Deserialize;

use crate::error::SendError;

/// Defer delays in seconds, indexed by attempt; attempts beyond the ladder
/// reuse the last value.
pub const DEFAULT_RETRY_DELAYS: [u64; 5] = [60, 300, 900, 1800, 3600];

/// Attempts after which a temporary failure becomes permanent.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Outcome of classifying one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Whether the failure is worth retrying.
    pub is_temporary: bool,
    /// SMTP status code involved, when one could be determined.
    pub smtp_code: Option<u16>,
}

/// Retry configuration and classification rules.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryStrategy {
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,
    #[serde(default = "defaults::delays")]
    pub delays: Vec<u64>,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_retries: defaults::max_retries(),
            delays: defaults::delays(),
        }
    }
}

mod defaults {
    pub const fn max_retries() -> u32 {
        super::DEFAULT_MAX_RETRIES
    }

    pub fn delays() -> Vec<u64> {
        super::DEFAULT_RETRY_DELAYS.to_vec()
    }
}

impl RetryStrategy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay in seconds before the retry for the given attempt index.
    #[must_use]
    pub fn calculate_delay(&self, attempt: u32) -> u64 {
        let index = (attempt as usize).min(self.delays.len().saturating_sub(1));
        self.delays.get(index).copied().unwrap_or(3600)
    }

    /// Whether a failed attempt should be retried.
    #[must_use]
    pub fn should_retry(&self, attempt: u32, error: &SendError) -> bool {
        self.classify(error).is_temporary && attempt < self.max_retries
    }

    /// Classify an error as temporary or permanent. First match wins.
    #[must_use]
    pub fn classify(&self, error: &SendError) -> Classification {
        let message = error.to_string().to_lowercase();
        let smtp_code = error.smtp_code().or_else(|| embedded_code(&message));

        // Permanent: broken TLS stacks don't heal on retry.
        if is_tls_failure(&message) {
            return Classification {
                is_temporary: false,
                smtp_code,
            };
        }

        // Permanent: credential problems.
        if is_auth_failure(&message) {
            return Classification {
                is_temporary: false,
                smtp_code,
            };
        }

        // Structural temporaries before code-based rules.
        if matches!(error, SendError::Timeout(_) | SendError::Connection(_)) {
            return Classification {
                is_temporary: true,
                smtp_code,
            };
        }

        if let Some(code) = smtp_code {
            if code == 535 {
                return Classification {
                    is_temporary: false,
                    smtp_code,
                };
            }
            if (400..500).contains(&code) {
                return Classification {
                    is_temporary: true,
                    smtp_code,
                };
            }
            if (500..600).contains(&code) {
                // 5.4.x enhanced codes are routing problems, worth retrying.
                let is_temporary = message.contains("5.4.");
                return Classification {
                    is_temporary,
                    smtp_code,
                };
            }
        }

        if is_throttle(&message) {
            return Classification {
                is_temporary: true,
                smtp_code,
            };
        }

        // Unknown: retry-biased default.
        Classification {
            is_temporary: true,
            smtp_code,
        }
    }
}

/// Extract the first standalone 3-digit SMTP code embedded in a message.
fn embedded_code(message: &str) -> Option<u16> {
    message
        .split(|c: char| !c.is_ascii_digit())
        .filter(|token| token.len() == 3)
        .find_map(|token| token.parse::<u16>().ok())
        .filter(|code| (200..600).contains(code))
}

fn is_tls_failure(message: &str) -> bool {
    let tls_context = message.contains("ssl") || message.contains("tls");
    let tls_symptom = message.contains("version")
        || message.contains("handshake")
        || message.contains("verify");

    (tls_context && tls_symptom)
        || message.contains("wrong_version_number")
        || message.contains("certificate verify failed")
        || message.contains("handshake failure")
}

fn is_auth_failure(message: &str) -> bool {
    ["authentication failed", "auth failed", "authentication required", "auth required"]
        .iter()
        .any(|pattern| message.contains(pattern))
}

fn is_throttle(message: &str) -> bool {
    message.contains("throttl")
        || message.contains("rate limit")
        || message.contains("rate-limit")
        || message.contains("ratelimit")
        || message.contains("try again")
}

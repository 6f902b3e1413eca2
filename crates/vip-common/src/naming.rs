//! Collision-resistant names for per-run resources
//!
//! Several operators may verify sites in the same namespace at once, so every
//! ephemeral resource name carries the run's start second and a random token
//! from the system CSPRNG.

use std::fmt::Write;

use crate::{Error, Result};

/// Kubernetes label values (and so Job names, via `job-name`) are capped at 63 chars
pub const MAX_NAME_LEN: usize = 63;

/// Random bytes per name suffix (rendered as 8 lowercase hex chars)
const SUFFIX_BYTES: usize = 4;

/// Names of the ephemeral resources owned by one remote run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    /// ConfigMap holding the rendered test configuration
    pub config_map: String,
    /// Batch Job running the test suite
    pub job: String,
}

impl ResourceNames {
    /// Generate names for a run starting now.
    ///
    /// Fails with `Error::Random` if the random source is unavailable, which
    /// callers must treat as fatal before touching the cluster.
    pub fn generate(prefix: &str) -> Result<Self> {
        let timestamp = chrono::Utc::now().timestamp();
        Ok(Self {
            config_map: unique_name(prefix, "config", timestamp, &random_hex(SUFFIX_BYTES)?),
            job: unique_name(prefix, "job", timestamp, &random_hex(SUFFIX_BYTES)?),
        })
    }
}

/// Hex-encode `len` bytes from the system CSPRNG
pub fn random_hex(len: usize) -> Result<String> {
    let mut raw = vec![0u8; len];
    aws_lc_rs::rand::fill(&mut raw).map_err(|_| Error::Random {
        purpose: "resource name suffix".to_string(),
    })?;
    let mut out = String::with_capacity(len * 2);
    for byte in raw {
        let _ = write!(out, "{:02x}", byte);
    }
    Ok(out)
}

/// Build `<prefix>-<role>-<timestamp>-<suffix>`, shortening the prefix to fit
/// [`MAX_NAME_LEN`] and normalising it to a DNS label.
pub fn unique_name(prefix: &str, role: &str, timestamp: i64, suffix: &str) -> String {
    let tail = format!("{}-{}-{}", role, timestamp, suffix);
    let budget = MAX_NAME_LEN.saturating_sub(tail.len() + 1);

    let mut head = sanitize(prefix);
    head.truncate(budget);
    let head = head.trim_end_matches('-');

    if head.is_empty() {
        tail
    } else {
        format!("{}-{}", head, tail)
    }
}

/// Lowercase, map anything outside `[a-z0-9-]` to `-`, and trim leading dashes
fn sanitize(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .collect();
    mapped.trim_start_matches('-').to_string()
}

//! Content checksums computed on both ends of a transfer.
//!
//! The remote side runs the matching coreutils command (`md5sum`/`sha256sum`)
//! and the local side hashes the bytes as they are persisted.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Md5,
    Sha256,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }

    /// Name of the coreutils binary producing this digest.
    pub fn remote_command(&self) -> &'static str {
        match self {
            Self::Md5 => "md5sum",
            Self::Sha256 => "sha256sum",
        }
    }

    /// Expected length of the lowercase hex digest.
    fn hex_len(&self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 => 64,
        }
    }

    pub fn hasher(&self) -> RunningChecksum {
        match self {
            Self::Md5 => RunningChecksum::Md5(Md5::new()),
            Self::Sha256 => RunningChecksum::Sha256(Sha256::new()),
        }
    }

    /// Extract the digest from `md5sum -b` style output (`<hex> *<path>`).
    ///
    /// Diagnostics merged into the output are skipped.
    pub fn parse_remote_output(&self, lines: &[String]) -> Option<String> {
        lines.iter().find_map(|line| {
            let digest = line.split_whitespace().next()?.to_ascii_lowercase();
            (digest.len() == self.hex_len() && digest.chars().all(|c| c.is_ascii_hexdigit()))
                .then_some(digest)
        })
    }
}

/// Incrementally updated digest.
#[derive(Clone)]
pub enum RunningChecksum {
    Md5(Md5),
    Sha256(Sha256),
}

impl RunningChecksum {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    /// Lowercase hex digest, matching coreutils output.
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Md5(h) => format!("{:x}", h.finalize()),
            Self::Sha256(h) => format!("{:x}", h.finalize()),
        }
    }
}

/// One-shot digest of a buffer.
pub fn digest_hex(algorithm: ChecksumAlgorithm, data: &[u8]) -> String {
    let mut hasher = algorithm.hasher();
    hasher.update(data);
    hasher.finalize_hex()
}

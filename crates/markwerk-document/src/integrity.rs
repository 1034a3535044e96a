// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Source fingerprints: SHA-256 over scan documents and stored results.

use markwerk_core::error::{MarkwerkError, Result};
use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of `data` and return it as a lowercase hex string.
///
/// Every `PageResult` carries the hash of the document its page came from, so
/// a result can be traced back to the exact scan file that produced it.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verify that `data` matches the expected SHA-256 hex digest.
pub fn verify_hash(data: &[u8], expected_hex: &str) -> Result<()> {
    let actual = hash_bytes(data);
    if actual == expected_hex {
        Ok(())
    } else {
        Err(MarkwerkError::IntegrityMismatch {
            expected: expected_hex.to_owned(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str =
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn hash_empty_input() {
        assert_eq!(hash_bytes(b""), EMPTY_SHA256);
    }

    #[test]
    fn verify_detects_edits() {
        let stored = br#"{"page":1}"#;
        let digest = hash_bytes(stored);
        assert!(verify_hash(stored, &digest).is_ok());
        match verify_hash(br#"{"page":2}"#, &digest) {
            Err(MarkwerkError::IntegrityMismatch { expected, .. }) => assert_eq!(expected, digest),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}

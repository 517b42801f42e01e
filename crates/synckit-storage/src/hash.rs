// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Filename to two-level hashed directory mapping.
//!
//! `example.txt` lives at `e1/bc/example.txt`: the first four hex characters of
//! the SHA-1 of the UTF-8 name, split into two directory levels. The mapping is
//! stable across restarts, which is what lets a cache rebuild its index from disk.

use std::path::PathBuf;

use sha1::{Digest, Sha1};

use crate::error::{Result, StorageError};

/// Relative path of `filename` under a cache root.
pub fn hashed_path(filename: &str) -> Result<PathBuf> {
    validate_name(filename)?;
    let digest = hex::encode(Sha1::digest(filename.as_bytes()));
    Ok(PathBuf::from(&digest[0..2]).join(&digest[2..4]).join(filename))
}

/// Reject names that are empty or could escape their directory.
pub fn validate_name(filename: &str) -> Result<()> {
    let bad = filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains(['/', '\\', '\0']);
    if bad {
        return Err(StorageError::InvalidName(filename.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_mapping_fixture() {
        assert_eq!(hashed_path("example.txt").unwrap(), PathBuf::from("e1/bc/example.txt"));
        assert_eq!(hashed_path("test.jpg").unwrap(), PathBuf::from("cb/56/test.jpg"));
        assert_eq!(hashed_path("data.bin").unwrap(), PathBuf::from("1f/ad/data.bin"));
    }

    #[test]
    fn test_hash_mapping_is_stable() {
        assert_eq!(hashed_path("report.pdf").unwrap(), hashed_path("report.pdf").unwrap());
    }

    #[test]
    fn test_rejects_unsafe_names() {
        for name in ["", ".", "..", "a/b", "..\\x", "nul\0"] {
            assert!(
                matches!(hashed_path(name), Err(StorageError::InvalidName(_))),
                "{name:?} should be rejected"
            );
        }
        hashed_path("..hidden").unwrap();
    }
}

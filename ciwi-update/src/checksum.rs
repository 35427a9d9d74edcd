//! SHA-256 verification against a `sha256sum`-style listing

use sha2::{Digest, Sha256};

use crate::error::{Result, UpdateError};

/// Lowercase hex SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Find the digest listed for `asset`
///
/// Lines look like `<hex>  <name>` or `<hex> *<name>` (binary mode).
pub fn find_checksum(listing: &str, asset: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let digest = parts.next()?;
        let name = parts.next()?.trim_start_matches('*');
        let name = name.rsplit('/').next().unwrap_or(name);
        (name == asset && digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()))
            .then(|| digest.to_ascii_lowercase())
    })
}

/// Check `bytes` against the digest listed for `asset`
pub fn verify(bytes: &[u8], listing: &str, asset: &str) -> Result<()> {
    let expected =
        find_checksum(listing, asset).ok_or_else(|| UpdateError::ChecksumMissing(asset.to_string()))?;
    let actual = sha256_hex(bytes);

    if actual != expected {
        return Err(UpdateError::ChecksumMismatch {
            asset: asset.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

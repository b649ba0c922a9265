//! SHA-256 digests for derived identifiers and plan fingerprints.

use std::fmt::Write as _;

use sha2::{Digest, Sha256};

/// Hashes the given fields and returns the lowercase hex digest.
///
/// Fields are separated by a NUL byte so that `["ab", "c"]` and
/// `["a", "bc"]` hash differently.
#[must_use]
pub fn sha256_hex<I, B>(fields: I) -> String
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update(field.as_ref());
        hasher.update([0_u8]);
    }
    let mut hex = String::with_capacity(64);
    for byte in hasher.finalize() {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

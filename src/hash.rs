//! Content hashing for cache-busting file names.
//!
//! Every published asset is renamed after its content: `img/logo.png` with
//! bytes hashing to `0a1b2c3d4e…` is written as `img/logo.0a1b2c3d4e.png`.
//! Identical bytes always produce the identical name, so an unchanged asset
//! keeps its URL (and its browser cache entry) across builds, while any change
//! produces a new URL that no cache has seen.
//!
//! The token is a prefix of the lowercase hex SHA-256 digest. Collision
//! resistance only has to hold within one site build, so ten hex characters
//! (40 bits) is the default; `hash_length` in `revsite.toml` can raise it.

use sha2::{Digest, Sha256};

/// Shortest token accepted by [`is_hashed_name`].
pub const MIN_TOKEN_LEN: usize = 6;

/// Compute the content token for a file's bytes.
///
/// `len` is clamped to the 64 hex characters a SHA-256 digest provides.
pub fn content_token(bytes: &[u8], len: usize) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = format!("{:x}", digest);
    hex.truncate(len.min(64));
    hex
}

/// Insert a token before the extension of the last path segment.
///
/// - `img/logo.png` → `img/logo.TOKEN.png`
/// - `js/vendor.min.js` → `js/vendor.min.TOKEN.js`
/// - `fonts/LICENSE` → `fonts/LICENSE.TOKEN`
/// - `.htaccess` → `.htaccess.TOKEN` (a leading dot is not an extension)
pub fn hashed_path(original: &str, token: &str) -> String {
    let name_start = original.rfind('/').map(|i| i + 1).unwrap_or(0);
    let name = &original[name_start..];
    match name.rfind('.') {
        Some(dot) if dot > 0 => {
            let split = name_start + dot;
            format!("{}.{}{}", &original[..split], token, &original[split..])
        }
        _ => format!("{original}.{token}"),
    }
}

/// Whether a file name carries a content token of at least
/// [`MIN_TOKEN_LEN`] lowercase hex characters as its second-to-last
/// dot-separated component.
///
/// Used by the static server to decide which responses may be cached
/// forever.
pub fn is_hashed_name(name: &str) -> bool {
    let mut parts = name.rsplit('.');
    let (Some(_ext), Some(token), Some(stem)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    !stem.is_empty()
        && token.len() >= MIN_TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

//! Test-user password generation

use vip_common::{Error, Result};

/// Length of generated passwords
pub const PASSWORD_LEN: usize = 32;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Largest multiple of the alphabet size that fits in a byte. Bytes at or above
/// it are discarded so every character is equally likely.
const ACCEPT_BELOW: u8 = (256 / ALPHABET.len() * ALPHABET.len()) as u8;

/// Generate a [`PASSWORD_LEN`]-character alphanumeric password from the system CSPRNG.
///
/// Returns `Error::Random` if the random source fails; there is no weaker
/// fallback.
pub fn generate_password() -> Result<String> {
    let mut out = String::with_capacity(PASSWORD_LEN);
    let mut buf = [0u8; 64];
    while out.len() < PASSWORD_LEN {
        aws_lc_rs::rand::fill(&mut buf).map_err(|_| Error::Random {
            purpose: "test user password".to_string(),
        })?;
        extend_from_bytes(&mut out, &buf, PASSWORD_LEN);
    }
    Ok(out)
}

/// Map random bytes onto the alphabet by rejection sampling until `out` holds `len` chars
fn extend_from_bytes(out: &mut String, bytes: &[u8], len: usize) {
    for &b in bytes {
        if out.len() == len {
            break;
        }
        if b < ACCEPT_BELOW {
            out.push(ALPHABET[b as usize % ALPHABET.len()] as char);
        }
    }
}

//! Deterministic tunnel key derivation
//!
//! An endpoint's private key is `clamp(SHA3-256(seed || additional || address))`.
//! Nothing but the network seed needs to be stored: keys are recomputed
//! every time an interface is configured, and a leaked key together with
//! its address does not reveal the seed.

use std::net::Ipv4Addr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tiny_keccak::{Hasher, Sha3};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{Error, Result};

/// Salt used when a network does not specify one: base64("bestov.io")
pub const DEFAULT_ADDITIONAL: &str = "YmVzdG92Lmlv";

/// Length of a Curve25519 key in bytes
pub const KEY_LEN: usize = 32;

/// Derive a raw private key
pub fn derive(seed: &[u8], address: [u8; 4], additional: &[u8]) -> [u8; KEY_LEN] {
    let mut sha3 = Sha3::v256();
    let mut key = [0u8; KEY_LEN];
    sha3.update(seed);
    sha3.update(additional);
    sha3.update(&address);
    sha3.finalize(&mut key);
    clamp(&mut key);
    key
}

/// Clamp 32 bytes into a valid Curve25519 private scalar
fn clamp(key: &mut [u8; KEY_LEN]) {
    key[0] &= 0b1111_1000;
    key[31] = (key[31] & 0b0111_1111) | 0b0100_0000;
}

/// Derive a base64 private key from base64 seed/salt and a textual IPv4 address
pub fn derive_private_key(seed: &str, address: &str, additional: &str) -> Result<String> {
    let seed = decode(seed, "seed")?;
    let additional = decode(additional, "additional")?;
    let address = parse_ipv4(address)?;
    Ok(BASE64.encode(derive(&seed, address.octets(), &additional)))
}

/// Public key matching a base64 private key
pub fn public_key(private_key: &str) -> Result<String> {
    let bytes = decode_key(private_key, "private key")?;
    let secret = StaticSecret::from(bytes);
    Ok(BASE64.encode(PublicKey::from(&secret).as_bytes()))
}

/// Parse an IPv4 address, ignoring an optional `/prefix` suffix
pub fn parse_ipv4(address: &str) -> Result<Ipv4Addr> {
    let host = address.split('/').next().unwrap_or_default().trim();
    host.parse::<Ipv4Addr>()
        .map_err(|_| Error::InvalidAddress(address.to_string()))
}

/// Decode base64 that must be exactly one key long
pub fn decode_key(value: &str, what: &str) -> Result<[u8; KEY_LEN]> {
    let bytes = decode(value, what)?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        Error::InvalidKey(format!("{} has {} bytes (expected {})", what, b.len(), KEY_LEN))
    })
}

fn decode(value: &str, what: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(value.trim())
        .map_err(|e| Error::InvalidKey(format!("{} is not valid base64: {}", what, e)))
}

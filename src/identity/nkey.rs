//! Ed25519 keys in the messaging server's text encoding.
//!
//! A public key is `prefix || key || crc16`, a seed is
//! `seed-prefix || key-type || seed || crc16`, both base32 without padding.
//! The CRC is CRC-16/XMODEM, little-endian.

use crate::error::{Error, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;

const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

const PREFIX_SEED: u8 = 18 << 3;
const PREFIX_OPERATOR: u8 = 14 << 3;
const PREFIX_ACCOUNT: u8 = 0;
const PREFIX_USER: u8 = 20 << 3;

/// Role a key plays in the trust chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Operator,
    Account,
    User,
}

impl KeyKind {
    fn prefix(self) -> u8 {
        match self {
            KeyKind::Operator => PREFIX_OPERATOR,
            KeyKind::Account => PREFIX_ACCOUNT,
            KeyKind::User => PREFIX_USER,
        }
    }

    fn from_prefix(prefix: u8) -> Result<Self> {
        match prefix {
            PREFIX_OPERATOR => Ok(KeyKind::Operator),
            PREFIX_ACCOUNT => Ok(KeyKind::Account),
            PREFIX_USER => Ok(KeyKind::User),
            other => Err(Error::Nkey(format!("unsupported key prefix byte {}", other))),
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::Operator => write!(f, "operator"),
            KeyKind::Account => write!(f, "account"),
            KeyKind::User => write!(f, "user"),
        }
    }
}

/// A signing key tagged with its role.
pub struct KeyPair {
    kind: KeyKind,
    signing: SigningKey,
}

impl KeyPair {
    pub fn generate(kind: KeyKind) -> Self {
        Self {
            kind,
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Decode an encoded seed (`SO...`, `SA...`, `SU...`).
    pub fn from_seed(seed: &str) -> Result<Self> {
        let raw = decode_checked(seed)?;
        if raw.len() != 34 {
            return Err(Error::Nkey(format!("seed has {} bytes, expected 34", raw.len())));
        }
        if raw[0] & 0xF8 != PREFIX_SEED {
            return Err(Error::Nkey("not a seed".to_string()));
        }
        let prefix = ((raw[0] & 0x07) << 5) | ((raw[1] & 0xF8) >> 3);
        let kind = KeyKind::from_prefix(prefix)?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&raw[2..]);
        Ok(Self {
            kind,
            signing: SigningKey::from_bytes(&bytes),
        })
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    /// Encoded public key; also the entity's id in the trust chain.
    pub fn public_key(&self) -> String {
        let mut raw = Vec::with_capacity(35);
        raw.push(self.kind.prefix());
        raw.extend_from_slice(&self.signing.verifying_key().to_bytes());
        encode_checked(raw)
    }

    /// Encoded private seed.
    pub fn seed(&self) -> String {
        let prefix = self.kind.prefix();
        let mut raw = Vec::with_capacity(36);
        raw.push(PREFIX_SEED | (prefix >> 5));
        raw.push((prefix & 0x1F) << 3);
        raw.extend_from_slice(&self.signing.to_bytes());
        encode_checked(raw)
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing.sign(message).to_bytes().to_vec()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("kind", &self.kind)
            .field("public_key", &self.public_key())
            .finish()
    }
}

/// Decode an encoded public key into its role and verifying key.
pub fn decode_public_key(public_key: &str) -> Result<(KeyKind, VerifyingKey)> {
    let raw = decode_checked(public_key)?;
    if raw.len() != 33 {
        return Err(Error::Nkey(format!(
            "public key has {} bytes, expected 33",
            raw.len()
        )));
    }
    let kind = KeyKind::from_prefix(raw[0])?;
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&raw[1..]);
    let key = VerifyingKey::from_bytes(&bytes)
        .map_err(|e| Error::Nkey(format!("invalid ed25519 public key: {}", e)))?;
    Ok((kind, key))
}

/// Verify `signature` over `message` against an encoded public key.
pub fn verify(public_key: &str, message: &[u8], signature: &[u8]) -> Result<()> {
    let (_, key) = decode_public_key(public_key)?;
    let signature = Signature::from_slice(signature)
        .map_err(|e| Error::Nkey(format!("malformed signature: {}", e)))?;
    key.verify(message, &signature)
        .map_err(|_| Error::Nkey(format!("signature does not verify for {}", public_key)))
}

fn encode_checked(mut raw: Vec<u8>) -> String {
    let crc = crc16(&raw);
    raw.extend_from_slice(&crc.to_le_bytes());
    base32_encode(&raw)
}

fn decode_checked(text: &str) -> Result<Vec<u8>> {
    let mut raw = base32_decode(text.trim())?;
    if raw.len() < 3 {
        return Err(Error::Nkey("encoded key too short".to_string()));
    }
    let split = raw.len() - 2;
    let expected = u16::from_le_bytes([raw[split], raw[split + 1]]);
    raw.truncate(split);
    if crc16(&raw) != expected {
        return Err(Error::Nkey("checksum mismatch".to_string()));
    }
    Ok(raw)
}

/// CRC-16/XMODEM (poly 0x1021, init 0).
pub(crate) fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// RFC 4648 base32, uppercase, no padding.
pub(crate) fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for &byte in data {
        buffer = (buffer << 8) | byte as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((buffer >> bits) & 0x1F) as usize] as char);
        }
        buffer &= (1 << bits) - 1;
    }
    if bits > 0 {
        out.push(ALPHABET[((buffer << (5 - bits)) & 0x1F) as usize] as char);
    }
    out
}

pub(crate) fn base32_decode(text: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for c in text.bytes() {
        let value = ALPHABET
            .iter()
            .position(|&a| a == c)
            .ok_or_else(|| Error::Nkey(format!("invalid base32 character '{}'", c as char)))?;
        buffer = (buffer << 5) | value as u32;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }
    Ok(out)
}

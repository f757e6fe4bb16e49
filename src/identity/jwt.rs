//! Signed claims in the messaging server's JWT dialect.
//!
//! Header `{"typ":"JWT","alg":"ed25519-nkey"}`; the claim id (`jti`) is the
//! base32 SHA-512/256 of the claims serialized without it; the signature is
//! Ed25519 by the issuer over `header.payload`, all segments base64url.

use super::nkey::{self, base32_encode, KeyPair};
use crate::error::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha512_256};

const HEADER: &str = r#"{"typ":"JWT","alg":"ed25519-nkey"}"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jti: String,
    pub iat: i64,
    pub iss: String,
    #[serde(default)]
    pub name: String,
    pub sub: String,
    pub nats: Value,
}

impl Claims {
    fn new(name: &str, subject: &str, issuer: &str, nats: Value) -> Self {
        Self {
            jti: String::new(),
            iat: chrono::Utc::now().timestamp(),
            iss: issuer.to_string(),
            name: name.to_string(),
            sub: subject.to_string(),
            nats,
        }
    }

    /// Self-signed operator claims naming the system account.
    pub fn operator(name: &str, operator: &str, system_account: &str) -> Self {
        Self::new(
            name,
            operator,
            operator,
            json!({
                "type": "operator",
                "version": 2,
                "system_account": system_account,
            }),
        )
    }

    /// Account claims issued by the operator, with unlimited limits.
    pub fn account(name: &str, account: &str, operator: &str) -> Self {
        Self::new(
            name,
            account,
            operator,
            json!({
                "type": "account",
                "version": 2,
                "limits": {
                    "subs": -1,
                    "data": -1,
                    "payload": -1,
                    "imports": -1,
                    "exports": -1,
                    "wildcards": true,
                    "conn": -1,
                    "leaf": -1,
                },
                "default_permissions": { "pub": {}, "sub": {} },
            }),
        )
    }

    /// User claims issued by an account.
    pub fn user(name: &str, user: &str, account: &str) -> Self {
        Self::new(
            name,
            user,
            account,
            json!({
                "type": "user",
                "version": 2,
                "pub": {},
                "sub": {},
                "subs": -1,
                "data": -1,
                "payload": -1,
            }),
        )
    }

    /// The `nats.type` field.
    pub fn kind(&self) -> Option<&str> {
        self.nats.get("type").and_then(Value::as_str)
    }

    /// The operator's `nats.system_account`, if any.
    pub fn system_account(&self) -> Option<&str> {
        self.nats.get("system_account").and_then(Value::as_str)
    }
}

/// Assign the claim id and sign with `issuer`.
pub fn encode(mut claims: Claims, issuer: &KeyPair) -> Result<String> {
    if claims.iss != issuer.public_key() {
        return Err(Error::Nkey(format!(
            "claims for '{}' name issuer {} but are signed by {}",
            claims.name,
            claims.iss,
            issuer.public_key()
        )));
    }
    claims.jti = String::new();
    let unsigned = serde_json::to_vec(&claims)?;
    claims.jti = base32_encode(&Sha512_256::digest(&unsigned));

    let header = URL_SAFE_NO_PAD.encode(HEADER);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
    let signing_input = format!("{}.{}", header, payload);
    let signature = URL_SAFE_NO_PAD.encode(issuer.sign(signing_input.as_bytes()));
    Ok(format!("{}.{}", signing_input, signature))
}

/// Decode the claims without checking the signature.
pub fn decode(token: &str) -> Result<Claims> {
    let (_, payload, _) = split(token)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| Error::IdentityMalformed(format!("JWT payload is not base64url: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::IdentityMalformed(format!("JWT payload is not valid claims: {}", e)))
}

/// Decode the claims and check the signature against the claimed issuer.
pub fn verify(token: &str) -> Result<Claims> {
    let (header, payload, signature) = split(token)?;
    let header_json = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|e| Error::IdentityMalformed(format!("JWT header is not base64url: {}", e)))?;
    let header_value: Value = serde_json::from_slice(&header_json)
        .map_err(|e| Error::IdentityMalformed(format!("JWT header is not JSON: {}", e)))?;
    if header_value.get("alg").and_then(Value::as_str) != Some("ed25519-nkey") {
        return Err(Error::IdentityMalformed(
            "JWT header does not name ed25519-nkey".to_string(),
        ));
    }

    let claims = decode(token)?;
    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|e| Error::IdentityMalformed(format!("JWT signature is not base64url: {}", e)))?;
    let signing_input = format!("{}.{}", header, payload);
    nkey::verify(&claims.iss, signing_input.as_bytes(), &signature).map_err(|e| {
        Error::IdentityMalformed(format!("JWT for '{}' failed verification: {}", claims.name, e))
    })?;
    Ok(claims)
}

fn split(token: &str) -> Result<(&str, &str, &str)> {
    let mut parts = token.trim().split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(p), Some(s), None) if !h.is_empty() && !p.is_empty() && !s.is_empty() => {
            Ok((h, p, s))
        }
        _ => Err(Error::IdentityMalformed(
            "JWT must have three dot-separated segments".to_string(),
        )),
    }
}

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

/// key: stripe-signature -> verify `stripe-signature: t=...,v1=...` headers
///
/// Stripe signs `"{timestamp}.{raw body}"` with HMAC-SHA256 over the webhook
/// secret and sends the hex digest as one or more `v1` entries (multiple
/// entries appear while a secret is being rotated). Verification accepts the
/// delivery if any `v1` entry matches and the timestamp is within tolerance.
pub fn verify(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let parsed = parse_header(header)?;

    // t= is attacker-controlled and may sit at the i64 extremes
    let age = now
        .timestamp()
        .saturating_sub(parsed.timestamp)
        .checked_abs()
        .unwrap_or(i64::MAX);
    if age > tolerance_secs {
        return Err(AppError::Signature(format!(
            "timestamp outside tolerance ({age}s old, {tolerance_secs}s allowed)"
        )));
    }

    for candidate in &parsed.signatures {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("hmac accepts keys of any length");
        mac.update(parsed.timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        // Mac::verify_slice is constant-time
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(AppError::Signature("no matching v1 signature".into()))
}

/// Produces the hex `v1` signature for a payload at a given timestamp.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn parse_header(header: &str) -> AppResult<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for element in header.split(',') {
        let Some((key, value)) = element.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => signatures.push(value.to_string()),
            // v0 entries and unknown schemes are ignored
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| AppError::Signature("missing or invalid timestamp".into()))?;
    if signatures.is_empty() {
        return Err(AppError::Signature("missing v1 signature".into()));
    }
    Ok(SignatureHeader { timestamp, signatures })
}

//! HMAC-SHA256 webhook signature verification (spec.md §6 "Webhooks").
//!
//! Every provider webhook (treasury/ACH, fiat ramp, KYC/KYB) carries a signature computed
//! over the raw request body with a per-provider shared secret. Verification happens once,
//! here, before the payload is handed to the provider-specific normalizer (treasury's
//! [`crate::treasury::TreasuryIngestor::handle_webhook`] already assumes its caller did
//! this). `hmac`'s `verify_slice` compares in constant time internally, satisfying spec.md
//! §6's "constant-time comparison" requirement without a separate `subtle` dependency.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// `signature_hex` is the lowercase-hex HMAC-SHA256 of `payload` under `secret`. Returns
/// `false` for a malformed hex signature rather than erroring, since a bad signature and a
/// malformed one are both just "not authentic" from the caller's perspective.
pub fn verify_hmac_signature(secret: &[u8], payload: &[u8], signature_hex: &str) -> bool {
    let Ok(sig_bytes) = hex::decode(signature_hex) else { return false };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else { return false };
    mac.update(payload);
    mac.verify_slice(&sig_bytes).is_ok()
}

/// Computes the lowercase-hex HMAC-SHA256 signature a provider would send, used by the
/// deterministic mock providers in `agentpay-adapters` to produce signatures a caller can
/// verify with [`verify_hmac_signature`].
pub fn sign_hmac(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let secret = b"whsec_test";
        let payload = br#"{"event_id":"evt_1"}"#;
        let sig = sign_hmac(secret, payload);
        assert!(verify_hmac_signature(secret, payload, &sig));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let secret = b"whsec_test";
        let sig = sign_hmac(secret, b"original");
        assert!(!verify_hmac_signature(secret, b"tampered", &sig));
    }

    #[test]
    fn malformed_signature_is_rejected_not_panicked() {
        assert!(!verify_hmac_signature(b"secret", b"payload", "not-hex"));
    }
}

//! Identity resolution and signature verification (spec.md §4.1 checks 11-12, §6).
//!
//! `IdentityRegistry` is a collaborator contract (spec.md §6) — injected, not owned by
//! this crate. `verify_signature` is the cryptographic primitive the mandate verifier calls
//! once identity resolution has bound `(agent_id, domain, public_key, algorithm)`.

use crate::error::AgentPayError;
use async_trait::async_trait;
use ed25519_dalek::{Signature as Ed25519Signature, Verifier as _, VerifyingKey};
use p256::ecdsa::signature::Verifier as P256Verifier;
use p256::ecdsa::{Signature as P256Signature, VerifyingKey as P256VerifyingKey};
use rsa::pkcs1v15::{Signature as Rsa15Signature, VerifyingKey as Rsa15VerifyingKey};
use rsa::pss::{Signature as PssSignature, VerifyingKey as PssVerifyingKey};
use rsa::sha2::Sha256 as RsaSha256;
use rsa::signature::Verifier as RsaVerifier;
use rsa::RsaPublicKey;

/// Algorithms accepted for message signatures (`ed25519`, `ecdsa-p256`) and for linked
/// objects (`ed25519`, `ps256`, `rs256`), per spec.md §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Ed25519,
    EcdsaP256,
    Ps256,
    Rs256,
}

impl SignatureAlgorithm {
    pub fn parse(label: &str) -> crate::error::Result<Self> {
        match label {
            "ed25519" => Ok(Self::Ed25519),
            "ecdsa-p256" => Ok(Self::EcdsaP256),
            "ps256" => Ok(Self::Ps256),
            "rs256" => Ok(Self::Rs256),
            other => Err(AgentPayError::crypto(
                "signature_malformed",
                format!("unsupported signature algorithm '{}'", other),
            )),
        }
    }

    pub fn is_message_algorithm(&self) -> bool {
        matches!(self, Self::Ed25519 | Self::EcdsaP256)
    }
}

/// Verifies `signature` over `message` using `public_key` under `alg`. Returns
/// `Ok(true)`/`Ok(false)` for a well-formed but non-matching signature, and `Err` only for
/// malformed keys/signatures so callers can distinguish `signature_invalid` from
/// `signature_malformed` per spec.md §4.1.
pub fn verify_signature(
    alg: SignatureAlgorithm,
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> crate::error::Result<bool> {
    match alg {
        SignatureAlgorithm::Ed25519 => {
            let key_bytes: [u8; 32] = public_key.try_into().map_err(|_| {
                AgentPayError::crypto("signature_malformed", "ed25519 public key must be 32 bytes")
            })?;
            let key = VerifyingKey::from_bytes(&key_bytes)
                .map_err(|_| AgentPayError::crypto("signature_malformed", "invalid ed25519 public key"))?;
            let sig_bytes: [u8; 64] = signature.try_into().map_err(|_| {
                AgentPayError::crypto("signature_malformed", "ed25519 signature must be 64 bytes")
            })?;
            let sig = Ed25519Signature::from_bytes(&sig_bytes);
            Ok(key.verify(message, &sig).is_ok())
        }
        SignatureAlgorithm::EcdsaP256 => {
            let key = P256VerifyingKey::from_sec1_bytes(public_key)
                .map_err(|_| AgentPayError::crypto("signature_malformed", "invalid ecdsa-p256 public key"))?;
            let sig = P256Signature::from_der(signature)
                .or_else(|_| P256Signature::from_slice(signature))
                .map_err(|_| AgentPayError::crypto("signature_malformed", "invalid ecdsa-p256 signature"))?;
            Ok(key.verify(message, &sig).is_ok())
        }
        SignatureAlgorithm::Ps256 => {
            let rsa_key = RsaPublicKey::try_from(
                rsa::pkcs1::DecodeRsaPublicKey::from_pkcs1_der(public_key)
                    .map_err(|_| AgentPayError::crypto("signature_malformed", "invalid rsa public key"))?,
            )
            .map_err(|_| AgentPayError::crypto("signature_malformed", "invalid rsa public key"))?;
            let key = PssVerifyingKey::<RsaSha256>::new(rsa_key);
            let sig = PssSignature::try_from(signature)
                .map_err(|_| AgentPayError::crypto("signature_malformed", "invalid ps256 signature"))?;
            Ok(key.verify(message, &sig).is_ok())
        }
        SignatureAlgorithm::Rs256 => {
            let rsa_key = RsaPublicKey::try_from(
                rsa::pkcs1::DecodeRsaPublicKey::from_pkcs1_der(public_key)
                    .map_err(|_| AgentPayError::crypto("signature_malformed", "invalid rsa public key"))?,
            )
            .map_err(|_| AgentPayError::crypto("signature_malformed", "invalid rsa public key"))?;
            let key = Rsa15VerifyingKey::<RsaSha256>::new(rsa_key);
            let sig = Rsa15Signature::try_from(signature)
                .map_err(|_| AgentPayError::crypto("signature_malformed", "invalid rs256 signature"))?;
            Ok(key.verify(message, &sig).is_ok())
        }
    }
}

/// Injected collaborator contract (spec.md §6): resolves whether an agent's claimed key
/// binding is registered. Never implemented against a real KYC/registry provider in this
/// crate — see `agentpay-adapters` for a deterministic in-memory stand-in.
#[async_trait]
pub trait IdentityRegistry: Send + Sync {
    async fn verify_binding(
        &self,
        agent_id: &crate::ids::AgentId,
        domain: &str,
        public_key: &[u8],
        algorithm: &str,
    ) -> crate::error::Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    #[test]
    fn ed25519_round_trips() {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let verifying_key = signing_key.verifying_key();
        let message = b"mandate_1|agent_1|5000|USDC|base|0xdead|abc123";
        let signature = signing_key.sign(message);
        let ok = verify_signature(
            SignatureAlgorithm::Ed25519,
            verifying_key.as_bytes(),
            message,
            &signature.to_bytes(),
        )
        .unwrap();
        assert!(ok);
    }

    #[test]
    fn ed25519_rejects_tampered_message() {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let verifying_key = signing_key.verifying_key();
        let message = b"original message";
        let signature = signing_key.sign(message);
        let ok = verify_signature(
            SignatureAlgorithm::Ed25519,
            verifying_key.as_bytes(),
            b"tampered message",
            &signature.to_bytes(),
        )
        .unwrap();
        assert!(!ok);
    }

    #[test]
    fn unsupported_algorithm_is_malformed() {
        assert!(SignatureAlgorithm::parse("hmac-sha256").is_err());
    }
}

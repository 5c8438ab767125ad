//! Opaque, URL-safe, type-prefixed identifiers (spec.md §3).
//!
//! Every entity id is a newtype wrapping a `String` of the form `"{prefix}_{uuid}"`. The
//! prefix is part of the type, not just a display convention, so a `WalletId` can never be
//! passed where an `AgentId` is expected even though both are plain strings underneath.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! typed_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::new_v4().simple()))
            }

            /// Wrap an existing value without validating the prefix. Used when
            /// deserializing ids that were minted elsewhere (tests, fixtures, storage rows).
            pub fn from_raw(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn has_valid_prefix(&self) -> bool {
                self.0.starts_with(concat!($prefix, "_"))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

typed_id!(WalletId, "wallet");
typed_id!(AgentId, "agent");
typed_id!(TxId, "tx");
typed_id!(HoldId, "hold");
typed_id!(MandateId, "mandate");
typed_id!(CheckoutSessionId, "cs");
typed_id!(EscrowId, "esc");
typed_id!(AnchorId, "anchor");
typed_id!(JourneyId, "jrny");
typed_id!(OrgId, "org");
typed_id!(TeamId, "team");
typed_id!(ExternalBankAccountId, "eba");
typed_id!(AchPaymentId, "ach");

/// `journey_id` is deterministic rather than random (spec.md §3): `"jrny_" + first 24 hex
/// chars of SHA-256("org_id:rail:external_reference")`.
pub fn derive_journey_id(org_id: &OrgId, rail: &str, external_reference: &str) -> JourneyId {
    use sha2::{Digest, Sha256};
    let material = format!("{}:{}:{}", org_id.as_str(), rail, external_reference);
    let digest = Sha256::digest(material.as_bytes());
    let hex = hex::encode(digest);
    JourneyId::from_raw(format!("jrny_{}", &hex[..24]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_are_stable() {
        assert!(AgentId::new().has_valid_prefix());
        assert!(MandateId::new().as_str().starts_with("mandate_"));
    }

    #[test]
    fn journey_id_is_deterministic() {
        let org = OrgId::from_raw("org_abc");
        let a = derive_journey_id(&org, "ach", "ref-1");
        let b = derive_journey_id(&org, "ach", "ref-1");
        let c = derive_journey_id(&org, "ach", "ref-2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("jrny_"));
        assert_eq!(a.as_str().len(), "jrny_".len() + 24);
    }
}

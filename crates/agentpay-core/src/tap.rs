//! Trusted Agent Protocol (TAP) header parsing and version negotiation (spec.md §4.1, §6;
//! SPEC_FULL.md §C.1-2), grounded on `original_source/sardis_protocol/tap.py`.

use crate::error::AgentPayError;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

pub const TAP_ALLOWED_TAGS: &[&str] = &["agent-browser-auth", "agent-payer-auth"];
pub const TAP_MAX_TIME_WINDOW_SECONDS: i64 = 8 * 60;
pub const TAP_ALLOWED_MESSAGE_ALGS: &[&str] = &["ed25519", "ecdsa-p256"];
pub const TAP_ALLOWED_OBJECT_ALGS: &[&str] = &["ed25519", "ps256", "rs256"];
pub const TAP_PROTOCOL_VERSION: &str = "1.0";
pub const TAP_SUPPORTED_VERSIONS: &[&str] = &["1.0"];
pub const TAP_REQUIRED_COMPONENTS: &[&str] = &["@authority", "@path"];

/// Parsed `Signature-Input` parameters for one labeled signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapSignatureInput {
    pub label: String,
    pub components: Vec<String>,
    pub created: i64,
    pub expires: i64,
    pub keyid: String,
    pub alg: String,
    pub nonce: String,
    pub tag: String,
}

impl TapSignatureInput {
    /// Canonical re-serialization used as part of the overall signature base.
    pub fn signature_params(&self) -> String {
        format!(
            "{}=({});created={};keyid=\"{}\";alg=\"{}\";expires={};nonce=\"{}\";tag=\"{}\"",
            self.label,
            self.components.iter().map(|c| format!("\"{}\"", c)).collect::<Vec<_>>().join(" "),
            self.created,
            self.keyid,
            self.alg,
            self.expires,
            self.nonce,
            self.tag,
        )
    }

    pub fn has_required_components(&self) -> bool {
        TAP_REQUIRED_COMPONENTS.iter().all(|c| self.components.iter().any(|x| x == c))
    }
}

fn sig_input_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?x)
            (?P<label>[a-zA-Z0-9_-]+)
            =\(
            (?P<components>[^)]*)
            \)
            (?P<params>;.*)?
            "#,
        )
        .expect("static regex is valid")
    })
}

fn param_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?P<key>[a-zA-Z0-9_-]+)=(?:"(?P<qval>[^"]*)"|(?P<val>[^;]+))"#)
            .expect("static regex is valid")
    })
}

fn component_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]+)"|([a-zA-Z0-9_.@-]+)"#).expect("static regex is valid"))
}

/// Parses a `Signature-Input` header value (e.g.
/// `sig1=("@authority" "@path");created=1700000000;keyid="k1";alg="ed25519";expires=1700000480;nonce="n1";tag="agent-payer-auth"`).
pub fn parse_signature_input(header_value: &str) -> crate::error::Result<TapSignatureInput> {
    let caps = sig_input_re()
        .captures(header_value.trim())
        .ok_or_else(|| AgentPayError::crypto("tap_signature_malformed", "Signature-Input header is malformed"))?;

    let label = caps.name("label").unwrap().as_str().to_string();
    let components_raw = caps.name("components").map(|m| m.as_str()).unwrap_or_default();
    let components: Vec<String> = component_re()
        .captures_iter(components_raw)
        .map(|c| c.get(1).or_else(|| c.get(2)).unwrap().as_str().to_string())
        .collect();

    let mut params: HashMap<String, String> = HashMap::new();
    if let Some(param_block) = caps.name("params") {
        for cap in param_re().captures_iter(param_block.as_str()) {
            let key = cap.name("key").unwrap().as_str().to_string();
            let value = cap
                .name("qval")
                .or_else(|| cap.name("val"))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            params.insert(key, value);
        }
    }

    let get = |k: &str| -> crate::error::Result<String> {
        params
            .get(k)
            .cloned()
            .ok_or_else(|| AgentPayError::crypto("tap_signature_malformed", format!("missing TAP parameter '{}'", k)))
    };
    let get_i64 = |k: &str| -> crate::error::Result<i64> {
        get(k)?.parse::<i64>().map_err(|_| {
            AgentPayError::crypto("tap_signature_malformed", format!("TAP parameter '{}' is not an integer", k))
        })
    };

    Ok(TapSignatureInput {
        label,
        components,
        created: get_i64("created")?,
        expires: get_i64("expires")?,
        keyid: get("keyid")?,
        alg: get("alg")?,
        nonce: get("nonce")?,
        tag: get("tag")?,
    })
}

/// Validates a `TapSignatureInput` against the structural constraints of spec.md §4.1:
/// allowed tag, time window bound, and `created < now < expires`.
pub fn validate_signature_input(input: &TapSignatureInput, now: DateTime<Utc>) -> crate::error::Result<()> {
    if !TAP_ALLOWED_TAGS.contains(&input.tag.as_str()) {
        return Err(AgentPayError::crypto("tap_tag_not_allowed", format!("tag '{}' is not an allowed TAP tag", input.tag)));
    }
    if !input.has_required_components() {
        return Err(AgentPayError::crypto(
            "tap_missing_required_component",
            "Signature-Input must cover @authority and @path",
        ));
    }
    let now_ts = now.timestamp();
    if !(input.created < now_ts && now_ts < input.expires) {
        return Err(AgentPayError::crypto("tap_window_invalid", "TAP signature is outside its created/expires window"));
    }
    if input.expires - input.created > TAP_MAX_TIME_WINDOW_SECONDS {
        return Err(AgentPayError::crypto(
            "tap_window_too_wide",
            format!("TAP window exceeds {} seconds", TAP_MAX_TIME_WINDOW_SECONDS),
        ));
    }
    Ok(())
}

/// Accepts a missing version, an exact match, or an unknown minor under a known major;
/// rejects an unknown major with `tap_version_unsupported` (SPEC_FULL.md §C.1, §D).
pub fn validate_tap_version(version: Option<&str>) -> (bool, Option<String>) {
    let version = match version {
        None => return (true, None),
        Some(v) if v.trim().is_empty() => return (true, None),
        Some(v) => v,
    };
    if TAP_SUPPORTED_VERSIONS.contains(&version) {
        return (true, None);
    }
    let major = version.split('.').next().unwrap_or(version);
    let known_major = TAP_SUPPORTED_VERSIONS
        .iter()
        .any(|supported| supported.split('.').next().unwrap_or(supported) == major);
    if known_major {
        (true, None)
    } else {
        (false, Some(format!("tap_version_unsupported:{}", version)))
    }
}

/// AP2 protocol version check (spec.md §6): declared versions match `YYYY.MINOR`; a major
/// (year) mismatch against the deployment default is rejected.
pub fn validate_ap2_version(version: &str, deployment_default: &str) -> crate::error::Result<()> {
    let (declared_major, _) = version.split_once('.').ok_or_else(|| {
        AgentPayError::validation("invalid_ap2_version_format", format!("'{}' is not YYYY.MINOR", version))
    })?;
    let (default_major, _) = deployment_default.split_once('.').unwrap_or((deployment_default, ""));
    if declared_major != default_major {
        return Err(AgentPayError::crypto(
            "tap_version_unsupported",
            format!("AP2 version '{}' major mismatch against deployment default '{}'", version, deployment_default),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_signature_input() {
        let header = r#"sig1=("@authority" "@path");created=1700000000;keyid="k1";alg="ed25519";expires=1700000400;nonce="n1";tag="agent-payer-auth""#;
        let parsed = parse_signature_input(header).unwrap();
        assert_eq!(parsed.label, "sig1");
        assert_eq!(parsed.components, vec!["@authority", "@path"]);
        assert_eq!(parsed.alg, "ed25519");
        assert!(parsed.has_required_components());
    }

    #[test]
    fn rejects_window_wider_than_480_seconds() {
        let header = r#"sig1=("@authority" "@path");created=1700000000;keyid="k1";alg="ed25519";expires=1700001000;nonce="n1";tag="agent-payer-auth""#;
        let parsed = parse_signature_input(header).unwrap();
        let now = DateTime::from_timestamp(1700000100, 0).unwrap();
        let err = validate_signature_input(&parsed, now).unwrap_err();
        assert!(err.to_string().contains("tap_window_too_wide"));
    }

    #[test]
    fn missing_version_is_accepted() {
        assert_eq!(validate_tap_version(None), (true, None));
    }

    #[test]
    fn unknown_minor_under_known_major_is_accepted() {
        let (ok, reason) = validate_tap_version(Some("1.7"));
        assert!(ok);
        assert!(reason.is_none());
    }

    #[test]
    fn unknown_major_is_rejected() {
        let (ok, reason) = validate_tap_version(Some("2.0"));
        assert!(!ok);
        assert_eq!(reason.unwrap(), "tap_version_unsupported:2.0");
    }

    #[test]
    fn ap2_major_mismatch_rejected() {
        let err = validate_ap2_version("2026.1", "2025.1").unwrap_err();
        assert!(err.to_string().contains("tap_version_unsupported"));
        assert!(validate_ap2_version("2025.9", "2025.1").is_ok());
    }
}

//! Canonical signatures over semi-structured evidence.
//!
//! An evidence record is a tree of strings, sequences, and mappings. Two
//! records that differ only in key order or list order (recursively) must
//! name the same thing, so hypothesis nodes are keyed by a digest of the
//! record's canonical form rather than by the record as supplied:
//!
//! 1. mappings are serialized with keys sorted,
//! 2. sequences are sorted by the canonical serialization of each
//!    (already-normalized) element,
//! 3. the normalized tree is serialized as compact JSON (`,` and `:`
//!    separators, no incidental whitespace) and hashed with SHA-256.
//!
//! The digest depends only on structure and leaf values: no iteration
//! order, pointer identity, or locale comparison is involved, so it is
//! stable across processes and restarts.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use thiserror::Error;

/// Errors raised at the evidence boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvidenceError {
    /// The input contained a value that is not a string, sequence, or mapping.
    #[error("unsupported evidence type: {found}")]
    Unsupported { found: &'static str },
}

/// A semi-structured evidence value: strings at the leaves, sequences and
/// string-keyed mappings above them.
///
/// The set is closed, so within the typed API the "unsupported type"
/// failure cannot occur; it survives only in [`EvidenceValue::try_from`]
/// for callers holding untyped JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum EvidenceValue {
    /// A leaf string
    Text(String),
    /// An ordered sequence (order is erased by normalization)
    Sequence(Vec<EvidenceValue>),
    /// A string-keyed mapping
    Mapping(BTreeMap<String, EvidenceValue>),
}

impl EvidenceValue {
    /// Normalize recursively: mapping values are normalized (keys are
    /// already sorted by the `BTreeMap`), sequence elements are normalized
    /// and then sorted by their canonical serialization, leaves pass
    /// through.
    pub fn normalized(self) -> Self {
        match self {
            EvidenceValue::Text(s) => EvidenceValue::Text(s),
            EvidenceValue::Sequence(items) => {
                let mut norm: Vec<EvidenceValue> =
                    items.into_iter().map(EvidenceValue::normalized).collect();
                norm.sort_by_cached_key(EvidenceValue::canonical_json);
                EvidenceValue::Sequence(norm)
            }
            EvidenceValue::Mapping(map) => EvidenceValue::Mapping(
                map.into_iter().map(|(k, v)| (k, v.normalized())).collect(),
            ),
        }
    }

    /// Compact JSON serialization of this value as-is (callers normalize
    /// first when canonical bytes are required).
    fn canonical_json(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }

    fn write_canonical(&self, out: &mut String) {
        match self {
            EvidenceValue::Text(s) => write_json_string(s, out),
            EvidenceValue::Sequence(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_canonical(out);
                }
                out.push(']');
            }
            EvidenceValue::Mapping(map) => {
                out.push('{');
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write_json_string(key, out);
                    out.push(':');
                    value.write_canonical(out);
                }
                out.push('}');
            }
        }
    }
}

/// JSON string escaping per RFC 8259: quote, backslash, and control
/// characters are escaped; everything else is emitted as UTF-8.
fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

impl From<&BTreeMap<String, String>> for EvidenceValue {
    fn from(attrs: &BTreeMap<String, String>) -> Self {
        EvidenceValue::Mapping(
            attrs
                .iter()
                .map(|(k, v)| (k.clone(), EvidenceValue::Text(v.clone())))
                .collect(),
        )
    }
}

impl TryFrom<serde_json::Value> for EvidenceValue {
    type Error = EvidenceError;

    /// Convert untyped JSON into evidence. Null, booleans, and numbers are
    /// not evidence values and are rejected.
    fn try_from(value: serde_json::Value) -> Result<Self, EvidenceError> {
        match value {
            serde_json::Value::String(s) => Ok(EvidenceValue::Text(s)),
            serde_json::Value::Array(items) => Ok(EvidenceValue::Sequence(
                items
                    .into_iter()
                    .map(EvidenceValue::try_from)
                    .collect::<Result<_, _>>()?,
            )),
            serde_json::Value::Object(map) => Ok(EvidenceValue::Mapping(
                map.into_iter()
                    .map(|(k, v)| EvidenceValue::try_from(v).map(|v| (k, v)))
                    .collect::<Result<_, _>>()?,
            )),
            serde_json::Value::Null => Err(EvidenceError::Unsupported { found: "null" }),
            serde_json::Value::Bool(_) => Err(EvidenceError::Unsupported { found: "boolean" }),
            serde_json::Value::Number(_) => Err(EvidenceError::Unsupported { found: "number" }),
        }
    }
}

/// A canonical signature: the lowercase-hex SHA-256 digest of an evidence
/// value's canonical serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    /// Compute the signature of an evidence value.
    pub fn of(value: &EvidenceValue) -> Self {
        let payload = value.clone().normalized().canonical_json();
        Self(hex::encode(Sha256::digest(payload.as_bytes())))
    }

    /// Compute the signature of a flat string-to-string attribute map.
    pub fn of_attrs(attrs: &BTreeMap<String, String>) -> Self {
        Self::of(&EvidenceValue::from(attrs))
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evidence(v: serde_json::Value) -> EvidenceValue {
        EvidenceValue::try_from(v).expect("valid evidence")
    }

    #[test]
    fn test_known_digest_flat_mapping() {
        // Independently computed: sha256 of
        // {"kind":"Country","name":"United States of America"}
        let sig = Signature::of(&evidence(json!({
            "name": "United States of America",
            "kind": "Country",
        })));
        assert_eq!(
            sig.as_str(),
            "e3b2a96f388e3fdd78f649ad5e73ebb26f8e4a889112c72e392e23b588ee097a"
        );
    }

    #[test]
    fn test_known_digest_nested() {
        // Independently computed: sha256 of
        // {"config":{"level":"5","mode":"debug"},
        //  "users":[{"id":"1","name":"Alice"},{"id":"2","name":"Bob"}]}
        let sig = Signature::of(&evidence(json!({
            "users": [
                {"id": "2", "name": "Bob"},
                {"id": "1", "name": "Alice"},
            ],
            "config": {"level": "5", "mode": "debug"},
        })));
        assert_eq!(
            sig.as_str(),
            "c564b1d63a10c46432078767145ced1905a13a79bc2558b42c5b5eab75011111"
        );
    }

    #[test]
    fn test_key_order_is_irrelevant() {
        let a = evidence(json!({"mode": "debug", "level": "5"}));
        let b = evidence(json!({"level": "5", "mode": "debug"}));
        assert_eq!(Signature::of(&a), Signature::of(&b));
    }

    #[test]
    fn test_list_order_is_irrelevant_recursively() {
        let a = evidence(json!({
            "users": [
                {"id": "2", "name": "Bob"},
                {"id": "1", "name": "Alice"},
            ],
        }));
        let b = evidence(json!({
            "users": [
                {"name": "Alice", "id": "1"},
                {"name": "Bob", "id": "2"},
            ],
        }));
        assert_eq!(Signature::of(&a), Signature::of(&b));
    }

    #[test]
    fn test_leaf_change_changes_digest() {
        let a = evidence(json!({"name": "Alice"}));
        let b = evidence(json!({"name": "alice"}));
        assert_ne!(Signature::of(&a), Signature::of(&b));
    }

    #[test]
    fn test_structural_change_changes_digest() {
        let a = evidence(json!({"users": [{"id": "1"}]}));
        let b = evidence(json!({"users": [{"id": "1"}, {"extra": "x"}]}));
        assert_ne!(Signature::of(&a), Signature::of(&b));
    }

    #[test]
    fn test_digest_is_lowercase_hex() {
        let sig = Signature::of(&evidence(json!({"k": "v"})));
        assert_eq!(sig.as_str().len(), 64);
        assert!(sig
            .as_str()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_empty_containers_are_distinct() {
        let map = Signature::of(&evidence(json!({})));
        let list = Signature::of(&evidence(json!([])));
        assert_ne!(map, list);
    }

    #[test]
    fn test_attrs_matches_equivalent_mapping() {
        let mut attrs = BTreeMap::new();
        attrs.insert("name".to_string(), "X".to_string());
        attrs.insert("kind".to_string(), "K".to_string());
        let via_json = evidence(json!({"kind": "K", "name": "X"}));
        assert_eq!(Signature::of_attrs(&attrs), Signature::of(&via_json));
    }

    #[test]
    fn test_non_evidence_json_is_rejected() {
        for (value, found) in [
            (json!(null), "null"),
            (json!(true), "boolean"),
            (json!(42), "number"),
            (json!({"nested": {"deep": 1.5}}), "number"),
            (json!(["ok", false]), "boolean"),
        ] {
            assert_eq!(
                EvidenceValue::try_from(value),
                Err(EvidenceError::Unsupported { found })
            );
        }
    }

    #[test]
    fn test_control_characters_are_escaped() {
        let a = evidence(json!({"k": "line\nbreak"}));
        let b = evidence(json!({"k": "line\\nbreak"}));
        // The escaped form of a real newline must not collide with a
        // literal backslash-n in the leaf.
        assert_ne!(Signature::of(&a), Signature::of(&b));
    }
}

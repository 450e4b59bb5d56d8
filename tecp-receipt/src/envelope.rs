//! JSON transport envelope for receipts (spec.md section 6).
//!
//! The signed preimage is always canonical CBOR over raw bytes; this module
//! only governs how a `Receipt` is serialized to and from JSON at the wire
//! boundary, where binary fields become base64 text.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use tecp_encode::{EncodeError, Value};

use crate::{KeyErasure, KeyErasureScheme, LogInclusion, Receipt, ReceiptEnvironment};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyErasureEnvelope {
    pub scheme: String,
    pub evidence: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogInclusionEnvelope {
    pub leaf_index: u64,
    pub tree_size: u64,
    pub merkle_proof: Vec<String>,
    pub log_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptEnvelope {
    pub version: String,
    pub code_ref: String,
    pub ts: i64,
    pub nonce: String,
    pub input_hash: String,
    pub output_hash: String,
    pub policy_ids: Vec<String>,
    pub sig: String,
    pub pubkey: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_erasure: Option<KeyErasureEnvelope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentEnvelope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_inclusion: Option<LogInclusionEnvelope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("invalid base64 in field {0}: {1}")]
    Base64(&'static str, base64::DecodeError),
    #[error("unknown key_erasure scheme: {0}")]
    UnknownScheme(String),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl From<&Receipt> for ReceiptEnvelope {
    fn from(r: &Receipt) -> Self {
        ReceiptEnvelope {
            version: r.version.clone(),
            code_ref: r.code_ref.clone(),
            ts: r.ts,
            nonce: BASE64.encode(&r.nonce),
            input_hash: BASE64.encode(&r.input_hash),
            output_hash: BASE64.encode(&r.output_hash),
            policy_ids: r.policy_ids.clone(),
            sig: BASE64.encode(&r.sig),
            pubkey: BASE64.encode(&r.pubkey),
            key_erasure: r.key_erasure.as_ref().map(|ke| KeyErasureEnvelope {
                scheme: ke.scheme.to_string(),
                evidence: ke.evidence.clone(),
            }),
            environment: r.environment.as_ref().map(|e| EnvironmentEnvelope {
                region: e.region.clone(),
                provider: e.provider.clone(),
            }),
            log_inclusion: r.log_inclusion.as_ref().map(|inc| LogInclusionEnvelope {
                leaf_index: inc.leaf_index,
                tree_size: inc.tree_size,
                merkle_proof: inc.merkle_proof.iter().map(|h| BASE64.encode(h)).collect(),
                log_root: BASE64.encode(&inc.log_root),
            }),
            ext: r.ext.as_ref().map(value_map_to_json),
        }
    }
}

impl TryFrom<&ReceiptEnvelope> for Receipt {
    type Error = EnvelopeError;

    fn try_from(env: &ReceiptEnvelope) -> Result<Self, Self::Error> {
        let scheme = match env.key_erasure.as_ref().map(|ke| ke.scheme.as_str()) {
            Some("counter+seal@tee") => Some(KeyErasureScheme::CounterSealTee),
            Some("sw-sim") => Some(KeyErasureScheme::SoftwareSimulation),
            Some(other) => return Err(EnvelopeError::UnknownScheme(other.to_string())),
            None => None,
        };

        Ok(Receipt {
            version: env.version.clone(),
            code_ref: env.code_ref.clone(),
            ts: env.ts,
            nonce: decode_b64("nonce", &env.nonce)?,
            input_hash: decode_b64("input_hash", &env.input_hash)?,
            output_hash: decode_b64("output_hash", &env.output_hash)?,
            policy_ids: env.policy_ids.clone(),
            sig: decode_b64("sig", &env.sig)?,
            pubkey: decode_b64("pubkey", &env.pubkey)?,
            key_erasure: env
                .key_erasure
                .as_ref()
                .zip(scheme)
                .map(|(ke, scheme)| KeyErasure {
                    scheme,
                    evidence: ke.evidence.clone(),
                }),
            environment: env.environment.as_ref().map(|e| ReceiptEnvironment {
                region: e.region.clone(),
                provider: e.provider.clone(),
            }),
            log_inclusion: match &env.log_inclusion {
                Some(inc) => Some(LogInclusion {
                    leaf_index: inc.leaf_index,
                    tree_size: inc.tree_size,
                    merkle_proof: inc
                        .merkle_proof
                        .iter()
                        .map(|h| decode_b64("merkle_proof[]", h))
                        .collect::<Result<Vec<_>, _>>()?,
                    log_root: decode_b64("log_root", &inc.log_root)?,
                }),
                None => None,
            },
            ext: match &env.ext {
                Some(obj) => Some(json_map_to_value(obj)?),
                None => None,
            },
        })
    }
}

fn decode_b64(field: &'static str, s: &str) -> Result<Vec<u8>, EnvelopeError> {
    BASE64.decode(s).map_err(|e| EnvelopeError::Base64(field, e))
}

fn value_map_to_json(m: &BTreeMap<String, Value>) -> serde_json::Map<String, serde_json::Value> {
    let mut out = serde_json::Map::new();
    for (k, v) in m {
        out.insert(k.clone(), value_to_json(v));
    }
    out
}

fn value_to_json(v: &Value) -> serde_json::Value {
    match v {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::Number((*i).into()),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::String(BASE64.encode(b)),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(m) => serde_json::Value::Object(value_map_to_json(m)),
    }
}

fn json_map_to_value(
    obj: &serde_json::Map<String, serde_json::Value>,
) -> Result<BTreeMap<String, Value>, EnvelopeError> {
    let mut out = BTreeMap::new();
    for (k, v) in obj {
        out.insert(k.clone(), tecp_encode::value_from_json(v)?);
    }
    Ok(out)
}

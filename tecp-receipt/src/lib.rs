//! Receipt issuance and verification (TECP component C2).
//!
//! A receipt is a value object: built once by [`create_receipt`], never
//! mutated, freely copied. [`verify`] is a pure function of
//! `(receipt, now, profile, optional log client)` — it never retries and
//! never panics on malformed input.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use tecp_encode::{canonicalize, EncodeError, Value};
use tecp_policy::{Context as PolicyContext, EnforceOutcome, PolicyRegistry, Violation};

pub mod envelope;

/// Declared key-erasure scheme, matching the two named schemes in the
/// receipt data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyErasureScheme {
    #[serde(rename = "counter+seal@tee")]
    CounterSealTee,
    #[serde(rename = "sw-sim")]
    SoftwareSimulation,
}

impl fmt::Display for KeyErasureScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyErasureScheme::CounterSealTee => write!(f, "counter+seal@tee"),
            KeyErasureScheme::SoftwareSimulation => write!(f, "sw-sim"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyErasure {
    pub scheme: KeyErasureScheme,
    pub evidence: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiptEnvironment {
    pub region: Option<String>,
    pub provider: Option<String>,
}

/// A Merkle inclusion anchor, attached to a receipt after the fact by the
/// transparency log. Never part of the signed preimage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogInclusion {
    pub leaf_index: u64,
    pub tree_size: u64,
    pub merkle_proof: Vec<Vec<u8>>,
    pub log_root: Vec<u8>,
}

/// A single TECP receipt. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub version: String,
    pub code_ref: String,
    pub ts: i64,
    pub nonce: Vec<u8>,
    pub input_hash: Vec<u8>,
    pub output_hash: Vec<u8>,
    pub policy_ids: Vec<String>,
    pub sig: Vec<u8>,
    pub pubkey: Vec<u8>,
    pub key_erasure: Option<KeyErasure>,
    pub environment: Option<ReceiptEnvironment>,
    pub log_inclusion: Option<LogInclusion>,
    pub ext: Option<BTreeMap<String, Value>>,
}

/// Verification profile: a named tuple of thresholds (spec.md table 4.2.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Profile {
    Lite,
    Default,
    Strict,
}

impl Profile {
    pub fn max_age_ms(self) -> i64 {
        match self {
            Profile::Lite => 7 * 24 * 3600 * 1000,
            Profile::Default => 24 * 3600 * 1000,
            Profile::Strict => 3600 * 1000,
        }
    }

    pub fn max_skew_ms(self) -> i64 {
        match self {
            Profile::Lite => 15 * 60 * 1000,
            Profile::Default => 5 * 60 * 1000,
            Profile::Strict => 60 * 1000,
        }
    }

    pub fn requires_policy(self) -> bool {
        matches!(self, Profile::Strict)
    }

    pub fn requires_log(self) -> bool {
        matches!(self, Profile::Strict)
    }

    fn tag(self) -> &'static str {
        match self {
            Profile::Lite => "LITE",
            Profile::Default => "DEFAULT",
            Profile::Strict => "STRICT",
        }
    }

    fn from_tag(tag: &str) -> Option<Profile> {
        match tag {
            "LITE" => Some(Profile::Lite),
            "DEFAULT" => Some(Profile::Default),
            "STRICT" => Some(Profile::Strict),
            _ => None,
        }
    }

    /// The `version` string a signer targeting this profile stamps on a
    /// receipt, e.g. `TECP-0.1-DEFAULT`.
    pub fn version_tag(self) -> String {
        format!("{PROTOCOL_VERSION}-{}", self.tag())
    }

    fn parse_version(version: &str) -> Option<Profile> {
        let suffix = version.strip_prefix(&format!("{PROTOCOL_VERSION}-"))?;
        Profile::from_tag(suffix)
    }

    /// The stricter of two profiles (greater max-age/max-skew tolerance
    /// loses; `Strict` always wins).
    pub fn stricter(self, other: Profile) -> Profile {
        self.max(other)
    }
}

pub const PROTOCOL_VERSION: &str = "TECP-0.1";

#[derive(Debug, Error)]
pub enum SignError {
    #[error("SIGN_NO_KEY: no signing key configured")]
    NoKey,
    #[error("SIGN_POLICY_DENIED: {0:?}")]
    PolicyDenied(Vec<Violation>),
    #[error("encoding failure: {0}")]
    Encoding(#[from] EncodeError),
}

/// Stable verification error codes, matching spec.md section 6's prefix
/// taxonomy. `Display` renders the exact wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCode {
    SigInvalid,
    SigKeyFormat,
    AgeExpired,
    AgeFuture,
    TsMalformed,
    SchemaMissingField,
    SchemaWrongType,
    SchemaUnknownVersion,
    PolicyUnknown,
    PolicyDenied,
    LogMissing,
    LogRootMismatch,
    LogUnavailable,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::SigInvalid => "SIG_INVALID",
            ErrorCode::SigKeyFormat => "SIG_KEY_FORMAT",
            ErrorCode::AgeExpired => "AGE_EXPIRED",
            ErrorCode::AgeFuture => "AGE_FUTURE",
            ErrorCode::TsMalformed => "TS_MALFORMED",
            ErrorCode::SchemaMissingField => "SCHEMA_MISSING_FIELD",
            ErrorCode::SchemaWrongType => "SCHEMA_WRONG_TYPE",
            ErrorCode::SchemaUnknownVersion => "SCHEMA_UNKNOWN_VERSION",
            ErrorCode::PolicyUnknown => "POLICY_UNKNOWN",
            ErrorCode::PolicyDenied => "POLICY_DENIED",
            ErrorCode::LogMissing => "LOG_MISSING",
            ErrorCode::LogRootMismatch => "LOG_ROOT_MISMATCH",
            ErrorCode::LogUnavailable => "LOG_UNAVAILABLE",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationError {
    pub code: ErrorCode,
    pub message: String,
    pub field: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationResult {
    pub valid: bool,
    pub errors: Vec<VerificationError>,
}

impl VerificationResult {
    fn push(&mut self, code: ErrorCode, message: impl Into<String>, field: Option<&str>) {
        self.errors.push(VerificationError {
            code,
            message: message.into(),
            field: field.map(str::to_string),
        });
    }
}

/// Minimal synchronous contract a transparency log exposes to signers and
/// verifiers. Implemented by `tecp-log::TransparencyLog`; callers may also
/// supply a test double.
pub trait LogClient: Send + Sync {
    fn append(&self, code_ref: &str, receipt_hash: &[u8]) -> Result<LogInclusion, LogClientError>;

    /// Reconstruct the Merkle root from `leaf_hash` and `proof.merkle_proof`
    /// and check it against a root the log actually published (current or
    /// historical). Returns `Ok(true)` iff the proof is valid against a
    /// root the log recognizes.
    fn verify_inclusion(&self, leaf_hash: &[u8], proof: &LogInclusion) -> Result<bool, LogClientError>;
}

#[derive(Debug, Error)]
pub enum LogClientError {
    #[error("log unavailable: {0}")]
    Unavailable(String),
}

/// Owns the Ed25519 private key and, optionally, a handle to a
/// transparency log. No other mutable state (spec.md section 4.2.4).
pub struct ReceiptSigner {
    key: SigningKey,
    log: Option<Box<dyn LogClient>>,
}

impl ReceiptSigner {
    pub fn new(key: SigningKey) -> Self {
        Self { key, log: None }
    }

    pub fn with_log(key: SigningKey, log: Box<dyn LogClient>) -> Self {
        Self {
            key,
            log: Some(log),
        }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }
}

/// Parameters for issuing a receipt (spec.md section 4.2.1).
pub struct CreateReceiptRequest<'a> {
    pub code_ref: String,
    pub input: &'a [u8],
    pub output: &'a [u8],
    pub policy_ids: Vec<String>,
    pub profile: Profile,
    pub key_erasure: Option<KeyErasure>,
    pub environment: Option<ReceiptEnvironment>,
    pub ext: Option<BTreeMap<String, Value>>,
    /// Anchor the receipt in the signer's configured log, if any.
    pub anchor_in_log: bool,
    /// Override "now" for deterministic tests; `None` uses the wall clock.
    pub now_ms: Option<i64>,
    /// Override the random nonce for deterministic tests.
    pub nonce: Option<[u8; 16]>,
}

pub fn create_receipt(
    signer: &ReceiptSigner,
    registry: &PolicyRegistry,
    policy_context: &PolicyContext,
    req: CreateReceiptRequest<'_>,
) -> Result<Receipt, SignError> {
    let EnforceOutcome {
        allowed,
        transformed_input,
        evidence,
        violations,
    } = tecp_policy::enforce(registry, &req.policy_ids, req.input, policy_context);
    if !allowed {
        return Err(SignError::PolicyDenied(violations));
    }

    let input_hash = sha256(&transformed_input);
    let output_hash = sha256(req.output);

    let nonce = req.nonce.unwrap_or_else(random_nonce);
    let ts = req.now_ms.unwrap_or_else(now_ms);

    let ext = merge_policy_evidence(req.ext, evidence);

    let mut receipt = Receipt {
        version: req.profile.version_tag(),
        code_ref: req.code_ref,
        ts,
        nonce: nonce.to_vec(),
        input_hash,
        output_hash,
        policy_ids: req.policy_ids,
        sig: Vec::new(),
        pubkey: signer.public_key_bytes().to_vec(),
        key_erasure: req.key_erasure,
        environment: req.environment,
        log_inclusion: None,
        ext,
    };

    let preimage = canonicalize(&signed_value(&receipt))?;
    let signature = signer.key.sign(&preimage);
    receipt.sig = signature.to_bytes().to_vec();

    if req.anchor_in_log {
        if let Some(log) = &signer.log {
            let full_bytes = canonicalize(&full_value(&receipt))?;
            let receipt_hash = sha256(&full_bytes);
            let inclusion = log
                .append(&receipt.code_ref, &receipt_hash)
                .map_err(|e| SignError::Encoding(EncodeError::Write(e.to_string())))?;
            receipt.log_inclusion = Some(inclusion);
        }
    }

    Ok(receipt)
}

/// Verification options (spec.md section 4.2.2/4.2.3).
pub struct VerifyOptions<'a> {
    pub profile: Profile,
    pub now_ms: i64,
    pub log: Option<&'a dyn LogClient>,
    /// Require log inclusion even under a profile that would not demand it.
    pub require_log_inclusion: bool,
}

pub fn verify(receipt: &Receipt, opts: &VerifyOptions<'_>) -> VerificationResult {
    let mut result = VerificationResult {
        valid: true,
        errors: Vec::new(),
    };

    // 1. Schema + 2. version check.
    if receipt.nonce.len() != 16 {
        result.push(
            ErrorCode::SchemaWrongType,
            "nonce must be 16 bytes",
            Some("nonce"),
        );
    }
    if receipt.input_hash.len() != 32 || receipt.output_hash.len() != 32 {
        result.push(
            ErrorCode::SchemaWrongType,
            "input_hash/output_hash must be 32-byte SHA-256 digests",
            Some("input_hash"),
        );
    }
    if receipt.sig.len() != 64 {
        result.push(
            ErrorCode::SigKeyFormat,
            "sig must be 64 bytes",
            Some("sig"),
        );
    }
    if receipt.pubkey.len() != 32 {
        result.push(
            ErrorCode::SigKeyFormat,
            "pubkey must be 32 bytes",
            Some("pubkey"),
        );
    }

    let signer_profile = Profile::parse_version(&receipt.version);
    if signer_profile.is_none() {
        result.push(
            ErrorCode::SchemaUnknownVersion,
            format!("unknown version: {}", receipt.version),
            Some("version"),
        );
    }
    let effective_profile = match signer_profile {
        Some(p) => opts.profile.stricter(p),
        None => opts.profile,
    };

    // 3. Timestamp check.
    let age = opts.now_ms - receipt.ts;
    if age > effective_profile.max_age_ms() {
        result.push(
            ErrorCode::AgeExpired,
            format!(
                "receipt age {age}ms exceeds max_age {}ms",
                effective_profile.max_age_ms()
            ),
            Some("ts"),
        );
    }
    if -age > effective_profile.max_skew_ms() {
        result.push(
            ErrorCode::AgeFuture,
            format!(
                "receipt ts is {}ms in the future, exceeding max_skew {}ms",
                -age,
                effective_profile.max_skew_ms()
            ),
            Some("ts"),
        );
    }

    // 4. Signature check.
    match (
        VerifyingKey::from_bytes(&to_array32(&receipt.pubkey)),
        Signature::from_slice(&receipt.sig),
    ) {
        (Ok(pubkey), Ok(sig)) => match canonicalize(&signed_value(receipt)) {
            Ok(preimage) => {
                if pubkey.verify(&preimage, &sig).is_err() {
                    result.push(ErrorCode::SigInvalid, "signature does not verify", Some("sig"));
                }
            }
            Err(e) => result.push(
                ErrorCode::SchemaWrongType,
                format!("could not re-canonicalize receipt: {e}"),
                None,
            ),
        },
        _ => {
            result.push(
                ErrorCode::SigInvalid,
                "malformed pubkey or signature bytes",
                Some("sig"),
            );
        }
    }

    let structurally_valid = result.errors.is_empty();

    // 5. Policy check (profile-dependent).
    if structurally_valid && effective_profile.requires_policy() && receipt.policy_ids.is_empty() {
        result.push(
            ErrorCode::PolicyDenied,
            "STRICT profile requires at least one policy_id",
            Some("policy_ids"),
        );
    }

    // 6. Log inclusion check.
    if structurally_valid {
        let required = effective_profile.requires_log() || opts.require_log_inclusion;
        match (&receipt.log_inclusion, opts.log) {
            (None, _) if required => {
                result.push(ErrorCode::LogMissing, "log inclusion is required but absent", None);
            }
            (None, _) => {}
            (Some(inclusion), Some(log)) => {
                let full_bytes = match canonicalize(&full_value_excluding_log(receipt)) {
                    Ok(b) => b,
                    Err(e) => {
                        result.push(
                            ErrorCode::LogRootMismatch,
                            format!("could not canonicalize receipt for log check: {e}"),
                            None,
                        );
                        Vec::new()
                    }
                };
                if !full_bytes.is_empty() {
                    let receipt_hash = sha256(&full_bytes);
                    let leaf_hash = rfc6962_leaf_hash(&receipt_hash);
                    match log.verify_inclusion(&leaf_hash, inclusion) {
                        Ok(true) => {}
                        Ok(false) => result.push(
                            ErrorCode::LogRootMismatch,
                            "inclusion proof does not reconstruct a recognized log root",
                            None,
                        ),
                        Err(e) => {
                            if required {
                                result.push(ErrorCode::LogUnavailable, e.to_string(), None);
                            }
                        }
                    }
                }
            }
            (Some(_), None) if required => {
                result.push(
                    ErrorCode::LogUnavailable,
                    "log inclusion required but no log client configured",
                    None,
                );
            }
            (Some(_), None) => {}
        }
    }

    result.valid = result.errors.is_empty();
    result
}

/// Project the signed field set (everything except `sig` and
/// `log_inclusion`) into a canonicalizable `Value`.
fn signed_value(r: &Receipt) -> Value {
    let mut map = BTreeMap::new();
    map.insert("version".into(), Value::Text(r.version.clone()));
    map.insert("code_ref".into(), Value::Text(r.code_ref.clone()));
    map.insert("ts".into(), Value::Int(r.ts));
    map.insert("nonce".into(), Value::Bytes(r.nonce.clone()));
    map.insert("input_hash".into(), Value::Bytes(r.input_hash.clone()));
    map.insert("output_hash".into(), Value::Bytes(r.output_hash.clone()));
    map.insert(
        "policy_ids".into(),
        Value::Array(r.policy_ids.iter().cloned().map(Value::Text).collect()),
    );
    map.insert("pubkey".into(), Value::Bytes(r.pubkey.clone()));
    if let Some(ke) = &r.key_erasure {
        let mut kmap = BTreeMap::new();
        kmap.insert("scheme".into(), Value::Text(ke.scheme.to_string()));
        kmap.insert("evidence".into(), Value::Text(ke.evidence.clone()));
        map.insert("key_erasure".into(), Value::Map(kmap));
    }
    if let Some(env) = &r.environment {
        let mut emap = BTreeMap::new();
        if let Some(region) = &env.region {
            emap.insert("region".into(), Value::Text(region.clone()));
        }
        if let Some(provider) = &env.provider {
            emap.insert("provider".into(), Value::Text(provider.clone()));
        }
        map.insert("environment".into(), Value::Map(emap));
    }
    if let Some(ext) = &r.ext {
        map.insert("ext".into(), Value::Map(ext.clone()));
    }
    Value::Map(map)
}

/// Project everything except `log_inclusion` (i.e. signed fields plus
/// `sig`), used to compute the log's `receipt_hash`.
fn full_value_excluding_log(r: &Receipt) -> Value {
    let mut map = match signed_value(r) {
        Value::Map(m) => m,
        _ => unreachable!(),
    };
    map.insert("sig".into(), Value::Bytes(r.sig.clone()));
    Value::Map(map)
}

fn full_value(r: &Receipt) -> Value {
    full_value_excluding_log(r)
}

/// Fold the policy runtime's evidence (spec.md section 4.3: "structured
/// evidence for inclusion in the receipt") into the signed `ext` map under
/// a `policy_evidence` sub-map, alongside whatever extensions the caller
/// opted into. When no policy produced evidence, `caller_ext` passes
/// through untouched.
fn merge_policy_evidence(
    caller_ext: Option<BTreeMap<String, Value>>,
    evidence: BTreeMap<String, Value>,
) -> Option<BTreeMap<String, Value>> {
    if evidence.is_empty() {
        return caller_ext;
    }
    let mut ext = caller_ext.unwrap_or_default();
    ext.insert("policy_evidence".into(), Value::Map(evidence));
    Some(ext)
}

fn sha256(bytes: &[u8]) -> Vec<u8> {
    Sha256::digest(bytes).to_vec()
}

fn random_nonce() -> [u8; 16] {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}

fn to_array32(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let n = bytes.len().min(32);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

/// RFC 6962 `leaf_hash(x) = SHA-256(0x00 || x)`. Duplicated in `tecp-log`,
/// which owns the rest of the Merkle tree machinery; both copies are three
/// lines and kept in lockstep by the shared spec section, not by a shared
/// dependency.
fn rfc6962_leaf_hash(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update([0x00]);
    hasher.update(data);
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tecp_policy::Environment as PolicyEnvironment;

    fn signer() -> ReceiptSigner {
        let mut csprng = rand::rngs::OsRng;
        ReceiptSigner::new(SigningKey::generate(&mut csprng))
    }

    fn ctx() -> PolicyContext {
        PolicyContext {
            environment: PolicyEnvironment {
                region: Some("eu-west-1".into()),
                provider: None,
            },
            start_time_ms: 0,
            now_ms: 0,
            key_erasure_evidence: None,
            code_ref: "git:abc123".into(),
        }
    }

    fn base_request<'a>(input: &'a [u8], output: &'a [u8]) -> CreateReceiptRequest<'a> {
        CreateReceiptRequest {
            code_ref: "git:abc123".into(),
            input,
            output,
            policy_ids: vec!["no_retention".into()],
            profile: Profile::Default,
            key_erasure: None,
            environment: None,
            ext: None,
            anchor_in_log: false,
            now_ms: Some(1_000_000),
            nonce: Some([7u8; 16]),
        }
    }

    #[test]
    fn minimal_valid_receipt_default_profile() {
        let signer = signer();
        let registry = PolicyRegistry::standard();
        let receipt = create_receipt(
            &signer,
            &registry,
            &ctx(),
            base_request(b"hello", b"world"),
        )
        .unwrap();

        let result = verify(
            &receipt,
            &VerifyOptions {
                profile: Profile::Default,
                now_ms: 1_000_000,
                log: None,
                require_log_inclusion: false,
            },
        );
        assert!(result.valid, "{:?}", result.errors);
    }

    #[test]
    fn tampered_output_hash_fails_signature() {
        let signer = signer();
        let registry = PolicyRegistry::standard();
        let mut receipt = create_receipt(
            &signer,
            &registry,
            &ctx(),
            base_request(b"hello", b"world"),
        )
        .unwrap();
        let last = receipt.output_hash.len() - 1;
        receipt.output_hash[last] ^= 0xFF;

        let result = verify(
            &receipt,
            &VerifyOptions {
                profile: Profile::Default,
                now_ms: 1_000_000,
                log: None,
                require_log_inclusion: false,
            },
        );
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.code == ErrorCode::SigInvalid));
    }

    #[test]
    fn expired_receipt_is_rejected() {
        let signer = signer();
        let registry = PolicyRegistry::standard();
        let receipt = create_receipt(
            &signer,
            &registry,
            &ctx(),
            base_request(b"hello", b"world"),
        )
        .unwrap();

        let result = verify(
            &receipt,
            &VerifyOptions {
                profile: Profile::Default,
                now_ms: 1_000_000 + 25 * 3600 * 1000,
                log: None,
                require_log_inclusion: false,
            },
        );
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.code == ErrorCode::AgeExpired));
    }

    #[test]
    fn future_skew_is_rejected() {
        let signer = signer();
        let registry = PolicyRegistry::standard();
        let mut request = base_request(b"hello", b"world");
        request.now_ms = Some(1_000_000 + 10 * 60 * 1000);
        let receipt = create_receipt(&signer, &registry, &ctx(), request).unwrap();

        let result = verify(
            &receipt,
            &VerifyOptions {
                profile: Profile::Default,
                now_ms: 1_000_000,
                log: None,
                require_log_inclusion: false,
            },
        );
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.code == ErrorCode::AgeFuture));
    }

    #[test]
    fn strict_without_policies_is_rejected() {
        let signer = signer();
        let registry = PolicyRegistry::standard();
        let mut request = base_request(b"hello", b"world");
        request.policy_ids = vec![];
        request.profile = Profile::Strict;
        let receipt = create_receipt(&signer, &registry, &ctx(), request).unwrap();

        let result = verify(
            &receipt,
            &VerifyOptions {
                profile: Profile::Strict,
                now_ms: 1_000_000,
                log: None,
                require_log_inclusion: false,
            },
        );
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.code == ErrorCode::PolicyDenied));
    }

    #[test]
    fn boundary_timestamp_exactly_at_max_age_is_accepted() {
        let signer = signer();
        let registry = PolicyRegistry::standard();
        let receipt = create_receipt(
            &signer,
            &registry,
            &ctx(),
            base_request(b"hello", b"world"),
        )
        .unwrap();

        let result = verify(
            &receipt,
            &VerifyOptions {
                profile: Profile::Default,
                now_ms: 1_000_000 + Profile::Default.max_age_ms(),
                log: None,
                require_log_inclusion: false,
            },
        );
        assert!(result.valid, "{:?}", result.errors);

        let result = verify(
            &receipt,
            &VerifyOptions {
                profile: Profile::Default,
                now_ms: 1_000_000 + Profile::Default.max_age_ms() + 1,
                log: None,
                require_log_inclusion: false,
            },
        );
        assert!(!result.valid);
    }

    #[test]
    fn wrong_key_fails_verification() {
        let signer_a = signer();
        let signer_b = signer();
        let registry = PolicyRegistry::standard();
        let mut receipt = create_receipt(
            &signer_a,
            &registry,
            &ctx(),
            base_request(b"hello", b"world"),
        )
        .unwrap();
        receipt.pubkey = signer_b.public_key_bytes().to_vec();

        let result = verify(
            &receipt,
            &VerifyOptions {
                profile: Profile::Default,
                now_ms: 1_000_000,
                log: None,
                require_log_inclusion: false,
            },
        );
        assert!(!result.valid);
    }

    #[test]
    fn policy_denied_blocks_issuance() {
        let signer = signer();
        let registry = PolicyRegistry::standard();
        let mut request = base_request(b"hello", b"world");
        request.policy_ids = vec!["nonexistent_policy".into()];
        let err = create_receipt(&signer, &registry, &ctx(), request).unwrap_err();
        assert!(matches!(err, SignError::PolicyDenied(_)));
    }

    #[test]
    fn mechanically_checked_policy_evidence_is_embedded_in_ext() {
        let signer = signer();
        let registry = PolicyRegistry::standard();
        let mut request = base_request(b"hello", b"world");
        request.policy_ids = vec!["no_retention".into(), "eu_region".into()];
        let receipt = create_receipt(&signer, &registry, &ctx(), request).unwrap();

        let ext = receipt.ext.as_ref().expect("evidence should populate ext");
        let evidence = ext
            .get("policy_evidence")
            .and_then(|v| v.as_map())
            .expect("policy_evidence should be a map");
        assert_eq!(
            evidence.get("eu_region.region"),
            Some(&Value::Text("eu-west-1".into()))
        );

        let result = verify(
            &receipt,
            &VerifyOptions {
                profile: Profile::Default,
                now_ms: 1_000_000,
                log: None,
                require_log_inclusion: false,
            },
        );
        assert!(result.valid, "{:?}", result.errors);
    }

    #[test]
    fn design_only_policies_leave_ext_untouched() {
        let signer = signer();
        let registry = PolicyRegistry::standard();
        let receipt = create_receipt(
            &signer,
            &registry,
            &ctx(),
            base_request(b"hello", b"world"),
        )
        .unwrap();
        assert!(receipt.ext.is_none());
    }

    proptest::proptest! {
        #[test]
        fn single_bit_mutation_is_detected(byte_index in 0usize..32, bit in 0u8..8) {
            let signer = signer();
            let registry = PolicyRegistry::standard();
            let mut receipt = create_receipt(
                &signer,
                &registry,
                &ctx(),
                base_request(b"hello", b"world"),
            )
            .unwrap();
            receipt.input_hash[byte_index % receipt.input_hash.len()] ^= 1 << bit;

            let result = verify(
                &receipt,
                &VerifyOptions {
                    profile: Profile::Default,
                    now_ms: 1_000_000,
                    log: None,
                    require_log_inclusion: false,
                },
            );
            prop_assert!(!result.valid);
        }
    }
}

//! Policy registry and enforcement runtime (TECP component C3).
//!
//! The registry is intentionally thin: most policy ids are `design`
//! declarations with no mechanical check, a naming convention that yokes
//! a receipt to auditable policy semantics. A small subset is mechanically
//! validated (`cryptographic`, `infrastructure`, `runtime`, `code_audit`).
//! Conflating these in one pipeline while keeping each one's nature
//! explicit is the point, not an oversight.

use std::collections::BTreeMap;

use tecp_encode::Value;

/// How a policy id is enforced, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementType {
    /// No runtime check; declarative only.
    Design,
    /// Requires structured evidence (e.g. key-erasure proof).
    Cryptographic,
    /// Requires a match against the call's declared environment.
    Infrastructure,
    /// Requires a check against the call's start time / max duration.
    Runtime,
    /// Requires a verifiable `code_ref` format.
    CodeAudit,
}

/// The mechanical check a policy carries, as data rather than code, so the
/// registry can be introspected and extended without recompiling checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyCheck {
    None,
    RegionPrefix(String),
    MaxAgeSeconds(u64),
    KeyErasureEvidence,
    CodeRefFormat,
}

/// A built-in content transformation a policy may carry. Most policies
/// carry none; a handful (e.g. PII redaction) rewrite the input before it
/// is hashed and signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    None,
    RedactEmails,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDescriptor {
    pub id: String,
    pub description: String,
    pub enforcement_type: EnforcementType,
    pub check: PolicyCheck,
    pub transform: Transform,
    pub compliance_tags: Vec<String>,
}

/// Static map from policy id to its descriptor.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: BTreeMap<String, PolicyDescriptor>,
}

impl PolicyRegistry {
    pub fn empty() -> Self {
        Self {
            policies: BTreeMap::new(),
        }
    }

    /// The built-in registry shipped with TECP.
    pub fn standard() -> Self {
        let mut reg = Self::empty();
        reg.insert(PolicyDescriptor {
            id: "no_retention".into(),
            description: "The enclosing service does not persist inputs or outputs.".into(),
            enforcement_type: EnforcementType::Design,
            check: PolicyCheck::None,
            transform: Transform::None,
            compliance_tags: vec!["privacy".into()],
        });
        reg.insert(PolicyDescriptor {
            id: "no_pii".into(),
            description: "The computation declares it does not handle PII.".into(),
            enforcement_type: EnforcementType::Design,
            check: PolicyCheck::None,
            transform: Transform::None,
            compliance_tags: vec!["privacy".into()],
        });
        reg.insert(PolicyDescriptor {
            id: "redact_pii".into(),
            description: "Email-shaped substrings in the input are redacted before hashing."
                .into(),
            enforcement_type: EnforcementType::Design,
            check: PolicyCheck::None,
            transform: Transform::RedactEmails,
            compliance_tags: vec!["privacy".into()],
        });
        reg.insert(PolicyDescriptor {
            id: "eu_region".into(),
            description: "The computation ran in an EU region.".into(),
            enforcement_type: EnforcementType::Infrastructure,
            check: PolicyCheck::RegionPrefix("eu".into()),
            transform: Transform::None,
            compliance_tags: vec!["gdpr".into()],
        });
        reg.insert(PolicyDescriptor {
            id: "us_region".into(),
            description: "The computation ran in a US region.".into(),
            enforcement_type: EnforcementType::Infrastructure,
            check: PolicyCheck::RegionPrefix("us".into()),
            transform: Transform::None,
            compliance_tags: vec![],
        });
        reg.insert(PolicyDescriptor {
            id: "ttl_60s".into(),
            description: "The computation completed within 60 seconds of starting.".into(),
            enforcement_type: EnforcementType::Runtime,
            check: PolicyCheck::MaxAgeSeconds(60),
            transform: Transform::None,
            compliance_tags: vec!["ephemeral".into()],
        });
        reg.insert(PolicyDescriptor {
            id: "ttl_300s".into(),
            description: "The computation completed within 300 seconds of starting.".into(),
            enforcement_type: EnforcementType::Runtime,
            check: PolicyCheck::MaxAgeSeconds(300),
            transform: Transform::None,
            compliance_tags: vec!["ephemeral".into()],
        });
        reg.insert(PolicyDescriptor {
            id: "key_erasure".into(),
            description: "The per-computation key was erased after use, with evidence.".into(),
            enforcement_type: EnforcementType::Cryptographic,
            check: PolicyCheck::KeyErasureEvidence,
            transform: Transform::None,
            compliance_tags: vec!["ephemeral".into()],
        });
        reg.insert(PolicyDescriptor {
            id: "code_audit".into(),
            description: "The code reference is independently auditable.".into(),
            enforcement_type: EnforcementType::CodeAudit,
            check: PolicyCheck::CodeRefFormat,
            transform: Transform::None,
            compliance_tags: vec!["provenance".into()],
        });
        reg
    }

    /// Build a registry from `standard()` plus caller-supplied extras,
    /// overriding on id collision.
    pub fn with_extra(extra: impl IntoIterator<Item = PolicyDescriptor>) -> Self {
        let mut reg = Self::standard();
        for d in extra {
            reg.insert(d);
        }
        reg
    }

    pub fn insert(&mut self, descriptor: PolicyDescriptor) {
        self.policies.insert(descriptor.id.clone(), descriptor);
    }

    pub fn get(&self, id: &str) -> Option<&PolicyDescriptor> {
        self.policies.get(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub region: Option<String>,
    pub provider: Option<String>,
}

/// The call context `enforce` evaluates policies against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub environment: Environment,
    /// Wall-clock time the computation started, ms since epoch.
    pub start_time_ms: u64,
    /// Wall-clock time "now", ms since epoch — passed explicitly so
    /// enforcement stays a pure function of its inputs.
    pub now_ms: u64,
    pub key_erasure_evidence: Option<String>,
    pub code_ref: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationCode {
    /// Policy id is not in the registry.
    Unknown,
    /// Policy id is known but its mechanical check failed.
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub policy_id: String,
    pub code: ViolationCode,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct EnforceOutcome {
    pub allowed: bool,
    pub transformed_input: Vec<u8>,
    pub evidence: BTreeMap<String, Value>,
    pub violations: Vec<Violation>,
}

/// Evaluate `policy_ids`, in order and with their declared multiplicity,
/// against `input` and `context`. Order and duplicates are preserved by
/// the caller (the caller signs exactly this sequence); `enforce` itself
/// does not deduplicate.
pub fn enforce(
    registry: &PolicyRegistry,
    policy_ids: &[String],
    input: &[u8],
    context: &Context,
) -> EnforceOutcome {
    let mut violations = Vec::new();
    let mut evidence = BTreeMap::new();
    let mut current_input = input.to_vec();

    for id in policy_ids {
        let Some(descriptor) = registry.get(id) else {
            violations.push(Violation {
                policy_id: id.clone(),
                code: ViolationCode::Unknown,
                message: format!("unknown policy id: {id}"),
            });
            continue;
        };

        match &descriptor.check {
            PolicyCheck::None => {}
            PolicyCheck::RegionPrefix(prefix) => {
                let ok = context
                    .environment
                    .region
                    .as_deref()
                    .is_some_and(|r| r.starts_with(prefix.as_str()));
                if !ok {
                    violations.push(Violation {
                        policy_id: id.clone(),
                        code: ViolationCode::Denied,
                        message: format!(
                            "region {:?} does not match required prefix {prefix:?}",
                            context.environment.region
                        ),
                    });
                } else {
                    evidence.insert(
                        format!("{id}.region"),
                        Value::Text(context.environment.region.clone().unwrap_or_default()),
                    );
                }
            }
            PolicyCheck::MaxAgeSeconds(max_seconds) => {
                let elapsed_ms = context.now_ms.saturating_sub(context.start_time_ms);
                let max_ms = max_seconds.saturating_mul(1000);
                if elapsed_ms > max_ms {
                    violations.push(Violation {
                        policy_id: id.clone(),
                        code: ViolationCode::Denied,
                        message: format!(
                            "elapsed {elapsed_ms}ms exceeds policy max {max_ms}ms"
                        ),
                    });
                } else {
                    evidence.insert(format!("{id}.elapsed_ms"), Value::Int(elapsed_ms as i64));
                }
            }
            PolicyCheck::KeyErasureEvidence => {
                match context.key_erasure_evidence.as_deref() {
                    Some(ev) if !ev.is_empty() => {
                        evidence.insert(format!("{id}.evidence"), Value::Text(ev.to_string()));
                    }
                    _ => violations.push(Violation {
                        policy_id: id.clone(),
                        code: ViolationCode::Denied,
                        message: "no key-erasure evidence supplied".into(),
                    }),
                }
            }
            PolicyCheck::CodeRefFormat => {
                if is_verifiable_code_ref(&context.code_ref) {
                    evidence.insert(
                        format!("{id}.code_ref"),
                        Value::Text(context.code_ref.clone()),
                    );
                } else {
                    violations.push(Violation {
                        policy_id: id.clone(),
                        code: ViolationCode::Denied,
                        message: format!(
                            "code_ref {:?} is not a verifiable reference",
                            context.code_ref
                        ),
                    });
                }
            }
        }

        current_input = apply_transform(descriptor.transform, &current_input);
    }

    EnforceOutcome {
        allowed: violations.is_empty(),
        transformed_input: current_input,
        evidence,
        violations,
    }
}

fn apply_transform(transform: Transform, input: &[u8]) -> Vec<u8> {
    match transform {
        Transform::None => input.to_vec(),
        Transform::RedactEmails => redact_emails(input),
    }
}

/// A deliberately simple, dependency-free email-shaped redactor:
/// replaces any `local@domain` run of non-whitespace bytes containing
/// exactly one `@` with `[redacted]`. Not a general PII scrubber.
fn redact_emails(input: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(input);
    let mut out = String::with_capacity(text.len());
    for word in text.split_inclusive(char::is_whitespace) {
        let trimmed = word.trim_end();
        let trailing = &word[trimmed.len()..];
        if trimmed.matches('@').count() == 1
            && !trimmed.starts_with('@')
            && !trimmed.ends_with('@')
        {
            out.push_str("[redacted]");
        } else {
            out.push_str(trimmed);
        }
        out.push_str(trailing);
    }
    out.into_bytes()
}

fn is_verifiable_code_ref(code_ref: &str) -> bool {
    const PREFIXES: &[&str] = &["git:", "oci:", "sha256:"];
    PREFIXES
        .iter()
        .any(|p| code_ref.starts_with(p) && code_ref.len() > p.len())
}

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Reserved parameter names
// ---------------------------------------------------------------------------

/// Parameter name under which the primary message text is stored.
pub const PARAM_PROMPT: &str = "prompt";
/// Parameter name under which the system prompt is stored.
pub const PARAM_SYSTEM_PROMPT: &str = "system_prompt";
/// Parameter name under which the serialized chat history is stored.
pub const PARAM_HISTORY: &str = "history";

/// Names that callers may not use for their own parameters.
pub const RESERVED_PARAM_NAMES: [&str; 3] = [PARAM_PROMPT, PARAM_SYSTEM_PROMPT, PARAM_HISTORY];

// ---------------------------------------------------------------------------
// ModelValue — typed parameter values
// ---------------------------------------------------------------------------

/// A single model-parameter value.
///
/// Values are restricted to scalars; richer structures (lists, objects) must
/// be serialized to a string by the caller before they reach the cache.
/// The variant is part of cache identity: `Str("1")` and `Int(1)` are
/// different values and never produce the same cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ModelValue {
    /// Human-readable name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ModelValue::Str(_) => "string",
            ModelValue::Int(_) => "int",
            ModelValue::Float(_) => "float",
            ModelValue::Bool(_) => "bool",
        }
    }
}

// Floats compare bit-exact so that values behave as plain map keys; cache
// identity needs determinism, not numeric semantics.
impl PartialEq for ModelValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ModelValue::Str(a), ModelValue::Str(b)) => a == b,
            (ModelValue::Int(a), ModelValue::Int(b)) => a == b,
            (ModelValue::Float(a), ModelValue::Float(b)) => a.to_bits() == b.to_bits(),
            (ModelValue::Bool(a), ModelValue::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ModelValue {}

impl Hash for ModelValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            ModelValue::Str(s) => {
                0u8.hash(state);
                s.hash(state);
            }
            ModelValue::Int(i) => {
                1u8.hash(state);
                i.hash(state);
            }
            ModelValue::Float(f) => {
                2u8.hash(state);
                f.to_bits().hash(state);
            }
            ModelValue::Bool(b) => {
                3u8.hash(state);
                b.hash(state);
            }
        }
    }
}

impl From<&str> for ModelValue {
    fn from(value: &str) -> Self {
        ModelValue::Str(value.to_string())
    }
}

impl From<String> for ModelValue {
    fn from(value: String) -> Self {
        ModelValue::Str(value)
    }
}

impl From<i64> for ModelValue {
    fn from(value: i64) -> Self {
        ModelValue::Int(value)
    }
}

impl From<i32> for ModelValue {
    fn from(value: i32) -> Self {
        ModelValue::Int(value as i64)
    }
}

impl From<f64> for ModelValue {
    fn from(value: f64) -> Self {
        ModelValue::Float(value)
    }
}

impl From<bool> for ModelValue {
    fn from(value: bool) -> Self {
        ModelValue::Bool(value)
    }
}

impl fmt::Display for ModelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelValue::Str(s) => write!(f, "{s}"),
            ModelValue::Int(i) => write!(f, "{i}"),
            ModelValue::Float(x) => write!(f, "{x}"),
            ModelValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Named model parameters. A `BTreeMap` so that insertion order never leaks
/// into cache identity.
pub type ModelParams = BTreeMap<String, ModelValue>;

/// Convert a JSON object into [`ModelParams`].
///
/// Null, array, and object values are rejected: callers that carry nested
/// structures (tool schemas, stop-sequence lists) must serialize them to a
/// string before handing them to the cache.
pub fn params_from_json(map: &serde_json::Map<String, Value>) -> Result<ModelParams, ReplayError> {
    let mut params = ModelParams::new();
    for (name, value) in map {
        let value = match value {
            Value::String(s) => ModelValue::Str(s.clone()),
            Value::Bool(b) => ModelValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ModelValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    ModelValue::Float(f)
                } else {
                    return Err(ReplayError::UnsupportedValueType {
                        name: name.clone(),
                        found: "number".to_string(),
                    });
                }
            }
            Value::Null => {
                return Err(ReplayError::UnsupportedValueType {
                    name: name.clone(),
                    found: "null".to_string(),
                })
            }
            Value::Array(_) => {
                return Err(ReplayError::UnsupportedValueType {
                    name: name.clone(),
                    found: "array".to_string(),
                })
            }
            Value::Object(_) => {
                return Err(ReplayError::UnsupportedValueType {
                    name: name.clone(),
                    found: "object".to_string(),
                })
            }
        };
        params.insert(name.clone(), value);
    }
    Ok(params)
}

// ---------------------------------------------------------------------------
// ChatHistory
// ---------------------------------------------------------------------------

/// One role-tagged turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }
}

/// An ordered conversation history preceding the current message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatHistory {
    turns: Vec<ChatTurn>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<ChatTurn>) -> Self {
        Self { turns }
    }

    pub fn push(&mut self, turn: ChatTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Deterministic serialized form used for fingerprinting: a compact JSON
    /// array of `{content, role}` objects with sorted keys, in turn order.
    pub fn canonical_string(&self) -> String {
        let turns: Vec<Value> = self
            .turns
            .iter()
            .map(|t| serde_json::json!({ "content": t.content, "role": t.role }))
            .collect();
        Value::Array(turns).to_string()
    }
}

impl FromIterator<ChatTurn> for ChatHistory {
    fn from_iter<I: IntoIterator<Item = ChatTurn>>(iter: I) -> Self {
        Self {
            turns: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Modality
// ---------------------------------------------------------------------------

/// The category of model interaction a wrapper is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Chat,
    Completion,
    Vision,
    Diffusion,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Chat => "chat",
            Modality::Completion => "completion",
            Modality::Vision => "vision",
            Modality::Diffusion => "diffusion",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Unified error type for the Replay crates.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("'{0}' is a reserved parameter name")]
    InvalidParameterName(String),
    #[error("unsupported value type for parameter '{name}': {found} (serialize it to a string first)")]
    UnsupportedValueType { name: String, found: String },
    #[error("a cache entry with this fingerprint already exists")]
    DuplicateEntry,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("model error: {0}")]
    Model(String),
    #[error("config error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Canonical identity of one model call: the model id plus the full set of
/// `(name, typed value)` pairs, including the reserved entries for message,
/// system prompt, and history.
///
/// Built through [`CacheRequest::fingerprint`]; two requests with the same
/// inputs fingerprint identically regardless of parameter insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    model_id: String,
    params: ModelParams,
}

impl Fingerprint {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    /// SHA-256 over the sorted, type-tagged parameter pairs.
    ///
    /// Used by storage backends as a uniqueness guard on concurrent inserts.
    /// Lookups match on the parameter set itself, never on this digest, so
    /// partial-match lookup modes remain possible later.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.model_id.as_bytes());
        hasher.update([0x1e]);
        for (name, value) in &self.params {
            hasher.update(name.as_bytes());
            hasher.update([0x1f]);
            match value {
                ModelValue::Str(s) => {
                    hasher.update(b"s:");
                    hasher.update(s.as_bytes());
                }
                ModelValue::Int(i) => {
                    hasher.update(b"i:");
                    hasher.update(i.to_le_bytes());
                }
                ModelValue::Float(f) => {
                    hasher.update(b"f:");
                    hasher.update(f.to_bits().to_le_bytes());
                }
                ModelValue::Bool(b) => {
                    hasher.update(b"b:");
                    hasher.update([*b as u8]);
                }
            }
            hasher.update([0x1e]);
        }
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

// ---------------------------------------------------------------------------
// CacheRequest — fingerprint builder
// ---------------------------------------------------------------------------

/// Builder canonicalizing one model call into a [`Fingerprint`].
///
/// The message text is stored under [`PARAM_PROMPT`], the system prompt under
/// [`PARAM_SYSTEM_PROMPT`], and the history (serialized in turn order) under
/// [`PARAM_HISTORY`]. User parameters using any of those names are rejected
/// before any storage access.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    model_id: String,
    message: String,
    history: Option<ChatHistory>,
    system_prompt: Option<String>,
    params: ModelParams,
}

impl CacheRequest {
    pub fn new(model_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            message: message.into(),
            history: None,
            system_prompt: None,
            params: ModelParams::new(),
        }
    }

    pub fn with_history(mut self, history: ChatHistory) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_params(mut self, params: ModelParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ModelValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Canonicalize into a [`Fingerprint`].
    ///
    /// Fails with [`ReplayError::InvalidParameterName`] if a user parameter
    /// uses a reserved name. An empty history fingerprints the same as no
    /// history. Booleans are normalized to integers (0/1) so that identity is
    /// consistent with how the storage layer persists them.
    pub fn fingerprint(&self) -> Result<Fingerprint, ReplayError> {
        for name in self.params.keys() {
            if RESERVED_PARAM_NAMES.contains(&name.as_str()) {
                return Err(ReplayError::InvalidParameterName(name.clone()));
            }
        }

        let mut params = ModelParams::new();
        for (name, value) in &self.params {
            let value = match value {
                ModelValue::Bool(b) => ModelValue::Int(*b as i64),
                other => other.clone(),
            };
            params.insert(name.clone(), value);
        }

        params.insert(
            PARAM_PROMPT.to_string(),
            ModelValue::Str(self.message.clone()),
        );
        if let Some(system_prompt) = &self.system_prompt {
            params.insert(
                PARAM_SYSTEM_PROMPT.to_string(),
                ModelValue::Str(system_prompt.clone()),
            );
        }
        if let Some(history) = &self.history {
            if !history.is_empty() {
                params.insert(
                    PARAM_HISTORY.to_string(),
                    ModelValue::Str(history.canonical_string()),
                );
            }
        }

        Ok(Fingerprint {
            model_id: self.model_id.clone(),
            params,
        })
    }
}

// ---------------------------------------------------------------------------
// Cache store types
// ---------------------------------------------------------------------------

/// One memoized call as returned by a cache probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Surrogate key assigned by the store on insert.
    pub id: i64,
    /// The stored responses, in the order the model returned them.
    pub responses: Vec<String>,
    /// Unix-epoch milliseconds; set once on insert.
    pub created_at: i64,
    /// Unix-epoch milliseconds; updated on every hit.
    pub accessed_at: i64,
}

/// Age filter for [`ResponseCache::purge`]. At least one field must be set;
/// an empty filter is rejected so the purge path cannot wipe a store
/// unconditionally.
#[derive(Debug, Clone, Default)]
pub struct PurgeFilter {
    pub model_id: Option<String>,
    pub created_before: Option<i64>,
    pub accessed_before: Option<i64>,
}

impl PurgeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// Match entries created strictly before the given unix-millisecond time.
    pub fn with_created_before(mut self, timestamp: i64) -> Self {
        self.created_before = Some(timestamp);
        self
    }

    /// Match entries last accessed strictly before the given unix-millisecond
    /// time.
    pub fn with_accessed_before(mut self, timestamp: i64) -> Self {
        self.accessed_before = Some(timestamp);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.model_id.is_none() && self.created_before.is_none() && self.accessed_before.is_none()
    }

    pub fn validate(&self) -> Result<(), ReplayError> {
        if self.is_empty() {
            return Err(ReplayError::Config(
                "purge requires at least one filter".to_string(),
            ));
        }
        Ok(())
    }
}

/// Current time as unix-epoch milliseconds.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

// ---------------------------------------------------------------------------
// Core traits
// ---------------------------------------------------------------------------

/// A keyed store of model responses.
///
/// One store may be shared by any number of model wrappers, across
/// modalities; entries are disambiguated by model id plus parameter set.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Look up the entry whose model id and full parameter set exactly match
    /// the fingerprint. On a hit the entry's access time is updated; a miss
    /// has no side effect.
    async fn probe(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, ReplayError>;

    /// Persist a new entry with its parameters and ordered responses,
    /// atomically. Fails with [`ReplayError::DuplicateEntry`] if a
    /// concurrent writer already inserted the same fingerprint; callers
    /// treat that as a hit.
    async fn insert(
        &self,
        fingerprint: &Fingerprint,
        responses: &[String],
    ) -> Result<i64, ReplayError>;

    /// Delete entries matching the filter (with their parameters and
    /// responses) and return how many were removed. An empty filter is a
    /// config error.
    async fn purge(&self, filter: &PurgeFilter) -> Result<u64, ReplayError>;
}

/// The capability the cache depends on: something that, given a message,
/// optional history, and parameters, asynchronously produces one or more
/// response strings.
///
/// Provider clients implement this once per modality; the cache never
/// depends on a concrete provider.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Identifier of the model and configuration producing the responses.
    fn model_id(&self) -> &str;

    fn modality(&self) -> Modality;

    /// The system prompt the model is configured with, if any.
    fn system_prompt(&self) -> Option<&str> {
        None
    }

    /// Issue the request and return the response(s).
    async fn generate(
        &self,
        message: &str,
        history: Option<&ChatHistory>,
        params: &ModelParams,
    ) -> Result<Vec<String>, ReplayError>;
}

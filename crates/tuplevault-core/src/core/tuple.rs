// crates/tuplevault-core/src/core/tuple.rs
// ============================================================================
// Module: Relationship Tuples
// Description: Resource/relation/subject facts with optional caveats.
// Purpose: Model stored relationships and their canonical text form.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! A [`RelationTuple`] states that a subject holds a relation on a resource,
//! optionally guarded by a caveat. The [`TupleKey`] of a tuple is its six
//! identity fields; at most one live row exists per key. Tuples have a
//! canonical text form used by fixtures and the CLI:
//!
//! ```text
//! document:plan#viewer@user:alice
//! folder:company#viewer@folder:auditors#viewer
//! document:plan#viewer@user:bob[only_on_tuesday:{"day":"tuesday"}]
//! ```

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Relation used for a subject that refers to the object itself.
pub const ELLIPSIS: &str = "...";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while decoding tuples, mutations, or caveat contexts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TupleParseError {
    /// Tuple text does not match the canonical form.
    #[error("invalid relationship tuple `{0}`")]
    Format(String),
    /// Caveat context is not a JSON object.
    #[error("invalid caveat context: {0}")]
    CaveatContext(String),
    /// Mutation operation code is not recognized.
    #[error("unknown mutation operation code {0}")]
    UnknownOperation(i32),
}

// ============================================================================
// SECTION: Object And Relation
// ============================================================================

/// Object reference paired with a relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectAndRelation {
    /// Object type (namespace name).
    pub namespace: String,
    /// Object identifier within the namespace.
    pub object_id: String,
    /// Relation name.
    pub relation: String,
}

impl ObjectAndRelation {
    /// Creates an object and relation reference.
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        object_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            object_id: object_id.into(),
            relation: relation.into(),
        }
    }
}

// ============================================================================
// SECTION: Caveats
// ============================================================================

/// Named values supplied to a caveat expression at write time.
///
/// # Invariants
/// - Encodes as a JSON object; keys are ordered for deterministic bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaveatContext(BTreeMap<String, Value>);

impl CaveatContext {
    /// Creates an empty context.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Inserts a named value, returning the previous value if any.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(name.into(), value)
    }

    /// Returns a named value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Returns true when the context holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of named values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Encodes the context as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`TupleParseError::CaveatContext`] when a value cannot be serialized.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, TupleParseError> {
        serde_json::to_vec(&self.0).map_err(|err| TupleParseError::CaveatContext(err.to_string()))
    }

    /// Decodes a context from JSON bytes. `null` decodes to an empty context.
    ///
    /// # Errors
    ///
    /// Returns [`TupleParseError::CaveatContext`] when the bytes are not a JSON object.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, TupleParseError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|err| TupleParseError::CaveatContext(err.to_string()))?;
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => Ok(Self(map.into_iter().collect())),
            other => Err(TupleParseError::CaveatContext(format!(
                "expected object, found {}",
                json_kind(&other)
            ))),
        }
    }
}

impl FromIterator<(String, Value)> for CaveatContext {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Caveat reference attached to a tuple, with its write-time context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextualizedCaveat {
    /// Name of the caveat definition.
    pub caveat_name: String,
    /// Values bound at write time.
    #[serde(default)]
    pub context: CaveatContext,
}

impl ContextualizedCaveat {
    /// Creates a caveat reference.
    #[must_use]
    pub fn new(caveat_name: impl Into<String>, context: CaveatContext) -> Self {
        Self {
            caveat_name: caveat_name.into(),
            context,
        }
    }

    /// Rebuilds a caveat reference from stored columns. An absent or empty
    /// name means the tuple carries no caveat.
    ///
    /// # Errors
    ///
    /// Returns [`TupleParseError::CaveatContext`] when the stored context is malformed.
    pub fn from_stored(
        caveat_name: Option<String>,
        context: Option<&[u8]>,
    ) -> Result<Option<Self>, TupleParseError> {
        let Some(caveat_name) = caveat_name.filter(|name| !name.is_empty()) else {
            return Ok(None);
        };
        let context = match context {
            Some(bytes) => CaveatContext::from_json_bytes(bytes)?,
            None => CaveatContext::new(),
        };
        Ok(Some(Self {
            caveat_name,
            context,
        }))
    }
}

// ============================================================================
// SECTION: Tuples
// ============================================================================

/// Identity fields of a tuple (caveat excluded).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TupleKey {
    /// Resource side of the tuple.
    pub resource: ObjectAndRelation,
    /// Subject side of the tuple.
    pub subject: ObjectAndRelation,
}

/// Relationship between a resource and a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationTuple {
    /// Resource and relation being granted.
    pub resource: ObjectAndRelation,
    /// Subject receiving the relation.
    pub subject: ObjectAndRelation,
    /// Optional caveat guarding the relationship.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caveat: Option<ContextualizedCaveat>,
}

impl RelationTuple {
    /// Creates an uncaveated tuple.
    #[must_use]
    pub const fn new(resource: ObjectAndRelation, subject: ObjectAndRelation) -> Self {
        Self {
            resource,
            subject,
            caveat: None,
        }
    }

    /// Returns the tuple with the given caveat attached.
    #[must_use]
    pub fn with_caveat(mut self, caveat: ContextualizedCaveat) -> Self {
        self.caveat = Some(caveat);
        self
    }

    /// Returns the identity key of the tuple.
    #[must_use]
    pub fn key(&self) -> TupleKey {
        TupleKey {
            resource: self.resource.clone(),
            subject: self.subject.clone(),
        }
    }

    /// Parses the canonical text form.
    ///
    /// # Errors
    ///
    /// Returns [`TupleParseError`] when the text is malformed.
    pub fn parse(value: &str) -> Result<Self, TupleParseError> {
        let (body, caveat) = split_caveat(value)?;
        let (resource, subject) =
            body.split_once('@').ok_or_else(|| TupleParseError::Format(value.to_string()))?;
        let resource =
            parse_resource(resource).ok_or_else(|| TupleParseError::Format(value.to_string()))?;
        let subject =
            parse_subject(subject).ok_or_else(|| TupleParseError::Format(value.to_string()))?;
        Ok(Self {
            resource,
            subject,
            caveat,
        })
    }
}

impl FromStr for RelationTuple {
    type Err = TupleParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl fmt::Display for RelationTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}#{}@{}:{}",
            self.resource.namespace,
            self.resource.object_id,
            self.resource.relation,
            self.subject.namespace,
            self.subject.object_id
        )?;
        if self.subject.relation != ELLIPSIS {
            write!(f, "#{}", self.subject.relation)?;
        }
        if let Some(caveat) = &self.caveat {
            if caveat.context.is_empty() {
                write!(f, "[{}]", caveat.caveat_name)?;
            } else {
                let context = serde_json::to_string(&caveat.context).map_err(|_| fmt::Error)?;
                write!(f, "[{}:{context}]", caveat.caveat_name)?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Mutations
// ============================================================================

/// Operation applied by a relationship mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOperation {
    /// Insert a tuple; fails if a live tuple with the same key exists.
    Create,
    /// Insert or replace a tuple; a value-identical live tuple is left untouched.
    Touch,
    /// Tombstone the live tuple with the same key, if any.
    Delete,
}

impl MutationOperation {
    /// Returns the wire code for the operation.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Create => 1,
            Self::Touch => 2,
            Self::Delete => 3,
        }
    }

    /// Returns a stable label for the operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Touch => "touch",
            Self::Delete => "delete",
        }
    }
}

impl TryFrom<i32> for MutationOperation {
    type Error = TupleParseError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Create),
            2 => Ok(Self::Touch),
            3 => Ok(Self::Delete),
            other => Err(TupleParseError::UnknownOperation(other)),
        }
    }
}

/// Mutation applied to a single tuple inside a write transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipMutation {
    /// Operation to apply.
    pub operation: MutationOperation,
    /// Target tuple.
    pub tuple: RelationTuple,
}

impl RelationshipMutation {
    /// Builds a CREATE mutation.
    #[must_use]
    pub const fn create(tuple: RelationTuple) -> Self {
        Self {
            operation: MutationOperation::Create,
            tuple,
        }
    }

    /// Builds a TOUCH mutation.
    #[must_use]
    pub const fn touch(tuple: RelationTuple) -> Self {
        Self {
            operation: MutationOperation::Touch,
            tuple,
        }
    }

    /// Builds a DELETE mutation.
    #[must_use]
    pub const fn delete(tuple: RelationTuple) -> Self {
        Self {
            operation: MutationOperation::Delete,
            tuple,
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Splits an optional trailing `[caveat]` section from tuple text.
fn split_caveat(value: &str) -> Result<(&str, Option<ContextualizedCaveat>), TupleParseError> {
    let Some(start) = value.find('[') else {
        return Ok((value, None));
    };
    let body = &value[.. start];
    let inner = value[start + 1 ..]
        .strip_suffix(']')
        .ok_or_else(|| TupleParseError::Format(value.to_string()))?;
    let (name, context) = match inner.split_once(':') {
        Some((name, json)) => (name, CaveatContext::from_json_bytes(json.as_bytes())?),
        None => (inner, CaveatContext::new()),
    };
    if name.is_empty() {
        return Err(TupleParseError::Format(value.to_string()));
    }
    Ok((body, Some(ContextualizedCaveat::new(name, context))))
}

/// Parses `namespace:object_id#relation`.
fn parse_resource(value: &str) -> Option<ObjectAndRelation> {
    let (object, relation) = value.split_once('#')?;
    let (namespace, object_id) = object.split_once(':')?;
    non_empty_reference(namespace, object_id, relation)
}

/// Parses `namespace:object_id` with an optional `#relation` suffix.
fn parse_subject(value: &str) -> Option<ObjectAndRelation> {
    let (object, relation) = value.split_once('#').unwrap_or((value, ELLIPSIS));
    let (namespace, object_id) = object.split_once(':')?;
    non_empty_reference(namespace, object_id, relation)
}

/// Builds a reference when every part is non-empty.
fn non_empty_reference(
    namespace: &str,
    object_id: &str,
    relation: &str,
) -> Option<ObjectAndRelation> {
    if namespace.is_empty() || object_id.is_empty() || relation.is_empty() {
        return None;
    }
    Some(ObjectAndRelation::new(namespace, object_id, relation))
}

/// Returns a short label for a JSON value kind.
const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

//! Core types for declarative resource management

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Values
// ============================================================================

/// A literal attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Borrow as a string, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as an integer, if this is an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Whether a NaN or infinite float appears anywhere in the value.
    /// Such floats never compare equal to their recorded form.
    pub fn has_non_finite(&self) -> bool {
        match self {
            Self::Float(f) => !f.is_finite(),
            Self::List(items) => items.iter().any(Self::has_non_finite),
            Self::Map(entries) => entries.values().any(Self::has_non_finite),
            _ => false,
        }
    }

    /// Render for string interpolation (strings unquoted)
    pub fn to_interpolated(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("<unprintable>"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

// ============================================================================
// Addresses
// ============================================================================

/// Index of one instance within an expanded declaration
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstanceKey {
    /// `count` index
    Int(usize),
    /// `for_each` key
    Str(String),
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

/// Identity of a resource instance: `type.name` or `type.name[index]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Address {
    pub resource_type: String,
    pub name: String,
    pub key: Option<InstanceKey>,
}

impl Address {
    /// Address of a declaration without cardinality
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            key: None,
        }
    }

    /// Address of one indexed instance
    pub fn with_key(mut self, key: InstanceKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Whether this address belongs to the declaration `type.name`
    pub fn same_declaration(&self, other: &Address) -> bool {
        self.resource_type == other.resource_type && self.name == other.name
    }

    /// Whether this address, used as a selector, picks `other`: an exact
    /// match, or any instance of the declaration when this has no index
    pub fn covers(&self, other: &Address) -> bool {
        self == other || (self.key.is_none() && self.same_declaration(other))
    }

    /// The declaration part (`type.name`)
    pub fn declaration(&self) -> String {
        format!("{}.{}", self.resource_type, self.name)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)?;
        if let Some(key) = &self.key {
            write!(f, "[{key}]")?;
        }
        Ok(())
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

impl TryFrom<String> for Address {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (resource_type, name, index) = split_address(s)?;
        let key = match index {
            None => None,
            Some(raw) => Some(parse_key(s, raw)?),
        };
        Ok(Self {
            resource_type,
            name,
            key,
        })
    }
}

/// Index part of a reference target, before expansion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefIndex {
    /// No index: the target must have no cardinality
    None,
    /// A fixed index or key
    Key(InstanceKey),
    /// `[count.index]`: the referring instance's own index
    CountIndex,
    /// `[each.key]`: the referring instance's own key
    EachKey,
    /// `[*]`: every instance of the target
    Splat,
}

/// A reference target as written in a declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefTarget {
    pub resource_type: String,
    pub name: String,
    pub index: RefIndex,
}

impl fmt::Display for RefTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)?;
        match &self.index {
            RefIndex::None => Ok(()),
            RefIndex::Key(key) => write!(f, "[{key}]"),
            RefIndex::CountIndex => f.write_str("[count.index]"),
            RefIndex::EachKey => f.write_str("[each.key]"),
            RefIndex::Splat => f.write_str("[*]"),
        }
    }
}

impl FromStr for RefTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (resource_type, name, index) = split_address(s)?;
        let index = match index {
            None => RefIndex::None,
            Some("*") => RefIndex::Splat,
            Some("count.index") => RefIndex::CountIndex,
            Some("each.key") => RefIndex::EachKey,
            Some(raw) => RefIndex::Key(parse_key(s, raw)?),
        };
        Ok(Self {
            resource_type,
            name,
            index,
        })
    }
}

fn split_address(input: &str) -> Result<(String, String, Option<&str>)> {
    let invalid = |message: &str| Error::InvalidAddress {
        input: input.to_string(),
        message: message.to_string(),
    };

    let (head, index) = match input.find('[') {
        Some(pos) => {
            let inner = input[pos + 1..]
                .strip_suffix(']')
                .ok_or_else(|| invalid("missing closing ']'"))?;
            (&input[..pos], Some(inner.trim()))
        }
        None => (input, None),
    };

    let mut parts = head.split('.');
    let (Some(resource_type), Some(name), None) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid("expected <type>.<name>"));
    };

    let valid = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    };
    if !valid(resource_type) || !valid(name) {
        return Err(invalid(
            "type and name may only contain letters, digits, '_' and '-'",
        ));
    }

    Ok((resource_type.to_string(), name.to_string(), index))
}

fn parse_key(input: &str, raw: &str) -> Result<InstanceKey> {
    if let Some(quoted) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        return Ok(InstanceKey::Str(quoted.to_string()));
    }
    raw.parse::<usize>()
        .map(InstanceKey::Int)
        .map_err(|_| Error::InvalidAddress {
            input: input.to_string(),
            message: format!("index '{raw}' is neither an integer nor a quoted key"),
        })
}

// ============================================================================
// Expressions and resolved attributes
// ============================================================================

/// A declaration-time attribute expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal; strings may contain `${...}` interpolations
    Value(Value),
    /// Reference to another declaration
    Ref {
        target: RefTarget,
        output: Option<String>,
    },
    /// Whole-variable lookup
    Var(String),
    List(Vec<Expr>),
    Map(IndexMap<String, Expr>),
}

impl Expr {
    /// Reference to `target` (parsed) with an optional output attribute
    pub fn reference(target: &str, output: Option<&str>) -> Result<Self> {
        Ok(Self::Ref {
            target: target.parse()?,
            output: output.map(str::to_string),
        })
    }

    /// String literal
    pub fn string(s: impl Into<String>) -> Self {
        Self::Value(Value::String(s.into()))
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// A concrete reference: instance address plus output attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub target: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl Reference {
    /// Output attribute this reference reads (`id` when unspecified)
    pub fn output_name(&self) -> &str {
        self.output.as_deref().unwrap_or("id")
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.output_name())
    }
}

/// A resolved instance attribute: values with embedded references
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attr {
    Value(Value),
    Ref(Reference),
    List(Vec<Attr>),
    Map(BTreeMap<String, Attr>),
}

impl Attr {
    /// Build a list, collapsing to a plain value when it holds no references
    pub fn list(items: Vec<Attr>) -> Self {
        if items.iter().all(|a| matches!(a, Attr::Value(_))) {
            Attr::Value(Value::List(
                items
                    .into_iter()
                    .filter_map(|a| match a {
                        Attr::Value(v) => Some(v),
                        _ => None,
                    })
                    .collect(),
            ))
        } else {
            Attr::List(items)
        }
    }

    /// Build a map, collapsing to a plain value when it holds no references
    pub fn map(entries: BTreeMap<String, Attr>) -> Self {
        if entries.values().all(|a| matches!(a, Attr::Value(_))) {
            Attr::Value(Value::Map(
                entries
                    .into_iter()
                    .filter_map(|(k, a)| match a {
                        Attr::Value(v) => Some((k, v)),
                        _ => None,
                    })
                    .collect(),
            ))
        } else {
            Attr::Map(entries)
        }
    }

    /// All references contained in this attribute, depth first
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Attr::Value(_) => {}
            Attr::Ref(r) => out.push(r),
            Attr::List(items) => items.iter().for_each(|a| a.collect_refs(out)),
            Attr::Map(entries) => entries.values().for_each(|a| a.collect_refs(out)),
        }
    }

    /// Resolve references to values. Returns the first unresolvable reference.
    pub fn resolve<F>(&self, lookup: &F) -> std::result::Result<Value, Reference>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        match self {
            Attr::Value(v) => Ok(v.clone()),
            Attr::Ref(r) => lookup(r).ok_or_else(|| r.clone()),
            Attr::List(items) => items
                .iter()
                .map(|a| a.resolve(lookup))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Value::List),
            Attr::Map(entries) => entries
                .iter()
                .map(|(k, a)| a.resolve(lookup).map(|v| (k.clone(), v)))
                .collect::<std::result::Result<BTreeMap<_, _>, _>>()
                .map(Value::Map),
        }
    }
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attr::Value(v) => write!(f, "{v}"),
            Attr::Ref(r) => write!(f, "${{{r}}}"),
            Attr::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Attr::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k} = {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Attribute map of one instance, keyed by attribute name
pub type Attributes = BTreeMap<String, Attr>;

/// Resolved attribute values handed to a provider
pub type Values = BTreeMap<String, Value>;

// ============================================================================
// Apply results
// ============================================================================

/// Final status of one planned action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ActionStatus {
    /// Provider call succeeded and state was written
    Applied,
    /// Provider call (or reference resolution) failed
    Failed { error: String },
    /// Not attempted because a prerequisite failed
    Skipped { blocked_by: Address },
    /// Running when cancellation was observed; it was allowed to finish
    InFlightAtCancel { error: Option<String> },
    /// Not dispatched because of cancellation
    NotStarted,
}

impl ActionStatus {
    /// Check if the status represents a completed change
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Applied | Self::InFlightAtCancel { error: None }
        )
    }
}

/// Terminal outcome of an apply run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Every action succeeded
    Applied,
    /// Some actions succeeded, others failed or were skipped
    PartiallyApplied,
    /// Nothing succeeded
    Failed,
    /// Cancellation stopped dispatch
    Cancelled,
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied => write!(f, "applied"),
            Self::PartiallyApplied => write!(f, "partially applied"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub destroyed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_started: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.destroyed
    }

    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && self.not_started == 0
    }

    /// Total number of actions processed
    pub fn total(&self) -> usize {
        self.total_changes() + self.failed + self.skipped + self.not_started
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Maximum number of provider calls in flight
    pub jobs: usize,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self { jobs: 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_roundtrip_forms() {
        for raw in ["aws_vpc.main", "aws_subnet.public[1]", "aws_subnet.az[\"us-east-1a\"]"] {
            let address: Address = raw.parse().unwrap();
            assert_eq!(address.to_string(), raw);
        }
    }

    #[test]
    fn test_address_rejects_garbage() {
        assert!("vpc".parse::<Address>().is_err());
        assert!("a.b.c".parse::<Address>().is_err());
        assert!("a.b[1".parse::<Address>().is_err());
        assert!("a.b[x]".parse::<Address>().is_err());
        assert!("a.b[count.index]".parse::<Address>().is_err());
    }

    #[test]
    fn test_address_covers() {
        let whole: Address = "aws_subnet.public".parse().unwrap();
        assert!(whole.covers(&"aws_subnet.public[0]".parse().unwrap()));
        assert!(whole.covers(&"aws_subnet.public[\"a\"]".parse().unwrap()));
        assert!(whole.covers(&whole));
        assert!(!whole.covers(&"aws_subnet.private[0]".parse().unwrap()));

        let one: Address = "aws_subnet.public[1]".parse().unwrap();
        assert!(one.covers(&one));
        assert!(!one.covers(&"aws_subnet.public[0]".parse().unwrap()));
        assert!(!one.covers(&whole));
    }

    #[test]
    fn test_non_finite_floats_detected_when_nested() {
        assert!(!Value::Float(1.5).has_non_finite());
        assert!(Value::Float(f64::NAN).has_non_finite());
        assert!(Value::List(vec![Value::Int(1), Value::Float(f64::INFINITY)]).has_non_finite());
        let mut map = BTreeMap::new();
        map.insert("weight".to_string(), Value::Float(f64::NEG_INFINITY));
        assert!(Value::Map(map).has_non_finite());
    }

    #[test]
    fn test_ref_target_indices() {
        let t: RefTarget = "aws_subnet.private[count.index]".parse().unwrap();
        assert_eq!(t.index, RefIndex::CountIndex);
        let t: RefTarget = "aws_subnet.private[*]".parse().unwrap();
        assert_eq!(t.index, RefIndex::Splat);
        let t: RefTarget = "aws_subnet.private[each.key]".parse().unwrap();
        assert_eq!(t.index, RefIndex::EachKey);
        let t: RefTarget = "aws_subnet.private[2]".parse().unwrap();
        assert_eq!(t.index, RefIndex::Key(InstanceKey::Int(2)));
        assert_eq!(t.to_string(), "aws_subnet.private[2]");
    }

    #[test]
    fn test_address_serializes_as_string() {
        let address: Address = "aws_instance.web[0]".parse().unwrap();
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"aws_instance.web[0]\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }

    #[test]
    fn test_attr_list_collapses_without_refs() {
        let attr = Attr::list(vec![Attr::Value(Value::Int(1)), Attr::Value(Value::Int(2))]);
        assert_eq!(attr, Attr::Value(Value::List(vec![Value::Int(1), Value::Int(2)])));

        let r = Reference {
            target: Address::new("aws_vpc", "main"),
            output: None,
        };
        let attr = Attr::list(vec![Attr::Ref(r.clone()), Attr::Value(Value::Int(2))]);
        assert_eq!(attr.references(), vec![&r]);
    }

    #[test]
    fn test_attr_resolve_reports_missing_reference() {
        let r = Reference {
            target: Address::new("aws_vpc", "main"),
            output: Some("arn".into()),
        };
        let attr = Attr::Map(BTreeMap::from([("vpc".to_string(), Attr::Ref(r.clone()))]));
        assert_eq!(attr.resolve(&|_| None), Err(r));

        let resolved = attr.resolve(&|_| Some(Value::from("arn:x"))).unwrap();
        assert_eq!(
            resolved,
            Value::Map(BTreeMap::from([("vpc".to_string(), Value::from("arn:x"))]))
        );
    }

    #[test]
    fn test_value_untagged_json() {
        let v: Value = serde_json::from_str(r#"{"a": [1, "x", null, true, 1.5]}"#).unwrap();
        let Value::Map(m) = v else { panic!("expected map") };
        assert_eq!(
            m["a"],
            Value::List(vec![
                Value::Int(1),
                Value::from("x"),
                Value::Null,
                Value::Bool(true),
                Value::Float(1.5),
            ])
        );
    }

    #[test]
    fn test_summary_counts() {
        let summary = ExecuteSummary {
            created: 2,
            destroyed: 1,
            skipped: 1,
            ..Default::default()
        };
        assert_eq!(summary.total_changes(), 3);
        assert_eq!(summary.total(), 4);
        assert!(!summary.is_success());
    }
}

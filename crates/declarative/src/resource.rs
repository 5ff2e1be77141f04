//! Resource declarations and per-type schema
//!
//! A declaration is the typed, named description of desired infrastructure.
//! Declarations are immutable once handed to the graph builder; expansion
//! into instances happens in [`crate::graph`].

use crate::types::{Expr, RefTarget, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Variable bindings available to declarations
pub type Variables = BTreeMap<String, Value>;

/// How many instances a declaration expands into
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cardinality {
    /// Exactly one instance, addressed without an index
    #[default]
    Single,
    /// `count`: must evaluate to a non-negative integer
    Count(Expr),
    /// `for_each`: must evaluate to a list of strings or a map
    ForEach(Expr),
}

/// A typed resource declaration
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDeclaration {
    /// Resource type, e.g. "aws_subnet"
    pub resource_type: String,
    /// Declaration name, unique within its type
    pub name: String,
    /// Instance cardinality
    pub cardinality: Cardinality,
    /// Attributes in declaration order
    pub attributes: IndexMap<String, Expr>,
    /// Extra ordering edges beyond attribute references
    pub depends_on: Vec<RefTarget>,
}

impl ResourceDeclaration {
    /// Create a single-instance declaration with no attributes
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            cardinality: Cardinality::Single,
            attributes: IndexMap::new(),
            depends_on: Vec::new(),
        }
    }

    /// Builder: add an attribute
    pub fn attr(mut self, name: impl Into<String>, expr: impl Into<Expr>) -> Self {
        self.attributes.insert(name.into(), expr.into());
        self
    }

    /// Builder: expand into `n` indexed instances
    pub fn count(mut self, n: i64) -> Self {
        self.cardinality = Cardinality::Count(Expr::Value(Value::Int(n)));
        self
    }

    /// Builder: expand once per element of `expr`
    pub fn for_each(mut self, expr: Expr) -> Self {
        self.cardinality = Cardinality::ForEach(expr);
        self
    }

    /// Builder: add an explicit dependency
    pub fn depends_on(mut self, target: RefTarget) -> Self {
        self.depends_on.push(target);
        self
    }

    /// Identity used in messages: `type.name`
    pub fn identity(&self) -> String {
        format!("{}.{}", self.resource_type, self.name)
    }
}

/// Per-type behaviour the engine cannot infer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSchema {
    /// Attributes whose change forces destroy-then-create
    #[serde(default)]
    pub replace_on: BTreeSet<String>,
}

/// Registry of known resource types
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    types: BTreeMap<String, TypeSchema>,
}

impl SchemaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a type schema
    pub fn register(&mut self, resource_type: impl Into<String>, schema: TypeSchema) {
        self.types.insert(resource_type.into(), schema);
    }

    /// Builder: register a type whose listed attributes force replacement
    pub fn with_type(mut self, resource_type: &str, replace_on: &[&str]) -> Self {
        self.register(
            resource_type,
            TypeSchema {
                replace_on: replace_on.iter().map(|s| (*s).to_string()).collect(),
            },
        );
        self
    }

    /// Whether a type has been registered
    pub fn knows(&self, resource_type: &str) -> bool {
        self.types.contains_key(resource_type)
    }

    /// Whether changing `attribute` on `resource_type` forces replacement
    pub fn requires_replacement(&self, resource_type: &str, attribute: &str) -> bool {
        self.types
            .get(resource_type)
            .is_some_and(|s| s.replace_on.contains(attribute))
    }
}

impl FromIterator<(String, TypeSchema)> for SchemaRegistry {
    fn from_iter<I: IntoIterator<Item = (String, TypeSchema)>>(iter: I) -> Self {
        Self {
            types: iter.into_iter().collect(),
        }
    }
}

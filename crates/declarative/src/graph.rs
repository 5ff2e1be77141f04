//! Resource graph builder
//!
//! Expands declarations into indexed instances, evaluates their attribute
//! expressions and turns references into explicit edges. Everything is known
//! once [`ResourceGraph::build`] returns; nothing is looked up at apply time
//! except provider outputs.

use crate::error::{Error, Result};
use crate::resource::{Cardinality, ResourceDeclaration, Variables};
use crate::types::{Address, Attr, Attributes, Expr, InstanceKey, RefIndex, RefTarget, Reference, Value};
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

static INTERPOLATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\s*([^}]*?)\s*\}").expect("Invalid interpolation regex")
});

/// One expanded instance of a declaration
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceInstance {
    /// Instance address
    pub address: Address,
    /// Evaluated attributes (references kept as edges)
    pub attributes: Attributes,
    /// Direct dependencies, in attribute order then `depends_on` order
    pub dependencies: Vec<Address>,
    /// Position of the source declaration in the input
    pub declaration: usize,
}

impl ResourceInstance {
    /// Resource type of this instance
    pub fn resource_type(&self) -> &str {
        &self.address.resource_type
    }
}

/// Expanded instances plus reference edges
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    instances: Vec<ResourceInstance>,
    index: HashMap<Address, usize>,
}

impl ResourceGraph {
    /// Expand and validate declarations into a graph.
    ///
    /// Fails with `DuplicateIdentity` on repeated identities and with
    /// `UnresolvedReference` when a reference has no target after
    /// expansion. Cycles are left for the resolver to report.
    pub fn build(declarations: &[ResourceDeclaration], variables: &Variables) -> Result<Self> {
        let mut seen = HashSet::new();
        for decl in declarations {
            if !seen.insert((decl.resource_type.as_str(), decl.name.as_str())) {
                return Err(Error::DuplicateIdentity {
                    address: decl.identity(),
                });
            }
        }

        // First pass: instance keys for every declaration, so references
        // (including splats) can be checked in the second pass.
        let mut expansions = Vec::with_capacity(declarations.len());
        let mut keys: HashMap<(String, String), Vec<Option<InstanceKey>>> = HashMap::new();
        for decl in declarations {
            let expansion = expand(decl, variables)?;
            keys.insert(
                (decl.resource_type.clone(), decl.name.clone()),
                expansion.iter().map(|e| e.key.clone()).collect(),
            );
            expansions.push(expansion);
        }

        let mut graph = Self::default();
        for (position, (decl, expansion)) in declarations.iter().zip(expansions).enumerate() {
            for each in expansion {
                let mut address = Address::new(&decl.resource_type, &decl.name);
                address.key = each.key.clone();

                let scope = Scope {
                    address: &address,
                    index: match &each.key {
                        Some(InstanceKey::Int(i)) => Some(*i),
                        _ => None,
                    },
                    each: each.key.as_ref().and_then(|k| match k {
                        InstanceKey::Str(s) => Some((s.as_str(), each.value.as_ref())),
                        InstanceKey::Int(_) => None,
                    }),
                    variables,
                    keys: &keys,
                };

                let mut dependencies = Vec::new();
                let mut attributes = BTreeMap::new();
                for (name, expr) in &decl.attributes {
                    let context = format!("{address}.{name}");
                    let attr = scope.eval(expr, &context, &mut dependencies)?;
                    attributes.insert(name.clone(), attr);
                }
                for target in &decl.depends_on {
                    let context = format!("{address}.depends_on");
                    dependencies.extend(scope.targets(target, &context)?);
                }
                dedup_in_order(&mut dependencies);

                graph.insert(ResourceInstance {
                    address,
                    attributes,
                    dependencies,
                    declaration: position,
                })?;
            }
        }

        log::debug!(
            "Built resource graph: {} declarations, {} instances",
            declarations.len(),
            graph.len()
        );
        Ok(graph)
    }

    fn insert(&mut self, instance: ResourceInstance) -> Result<()> {
        if self.index.contains_key(&instance.address) {
            return Err(Error::DuplicateIdentity {
                address: instance.address.to_string(),
            });
        }
        self.index
            .insert(instance.address.clone(), self.instances.len());
        self.instances.push(instance);
        Ok(())
    }

    /// Instances in declaration order
    pub fn instances(&self) -> &[ResourceInstance] {
        &self.instances
    }

    /// Look up an instance by address
    pub fn get(&self, address: &Address) -> Option<&ResourceInstance> {
        self.index.get(address).map(|&i| &self.instances[i])
    }

    /// Whether an address is part of the graph
    pub fn contains(&self, address: &Address) -> bool {
        self.index.contains_key(address)
    }

    /// Whether any instance has the given type
    pub fn has_type(&self, resource_type: &str) -> bool {
        self.instances
            .iter()
            .any(|i| i.resource_type() == resource_type)
    }

    /// Number of instances
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Check if the graph has no instances
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// All reference edges as (referrer, target) pairs
    pub fn edges(&self) -> impl Iterator<Item = (&Address, &Address)> {
        self.instances
            .iter()
            .flat_map(|i| i.dependencies.iter().map(move |d| (&i.address, d)))
    }
}

struct Expansion {
    key: Option<InstanceKey>,
    value: Option<Value>,
}

/// Largest `count` a single declaration may expand to
pub const MAX_COUNT: usize = 10_000;

fn expand(decl: &ResourceDeclaration, variables: &Variables) -> Result<Vec<Expansion>> {
    let context = decl.identity();
    let invalid = |message: String| Error::InvalidDeclaration {
        context: context.clone(),
        message,
    };

    match &decl.cardinality {
        Cardinality::Single => Ok(vec![Expansion {
            key: None,
            value: None,
        }]),
        Cardinality::Count(expr) => {
            let n = match eval_static(expr, variables, &format!("{context}.count"))? {
                Value::Int(n) if n >= 0 => n as usize,
                Value::String(s) => s
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| invalid(format!("count '{s}' is not a non-negative integer")))?,
                other => {
                    return Err(invalid(format!(
                        "count must be a non-negative integer, got {other}"
                    )));
                }
            };
            if n > MAX_COUNT {
                return Err(invalid(format!("count {n} exceeds the limit of {MAX_COUNT}")));
            }
            Ok((0..n)
                .map(|i| Expansion {
                    key: Some(InstanceKey::Int(i)),
                    value: None,
                })
                .collect())
        }
        Cardinality::ForEach(expr) => {
            let entries: Vec<(String, Value)> =
                match eval_static(expr, variables, &format!("{context}.for_each"))? {
                    Value::List(items) => items
                        .into_iter()
                        .map(|item| match item {
                            Value::String(s) => Ok((s.clone(), Value::String(s))),
                            other => Err(invalid(format!(
                                "for_each list elements must be strings, got {other}"
                            ))),
                        })
                        .collect::<Result<_>>()?,
                    Value::Map(map) => map.into_iter().collect(),
                    other => {
                        return Err(invalid(format!(
                            "for_each must be a list of strings or a map, got {other}"
                        )));
                    }
                };

            let mut seen = HashSet::new();
            let mut out = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                if !seen.insert(key.clone()) {
                    return Err(Error::DuplicateIdentity {
                        address: format!("{context}[\"{key}\"]"),
                    });
                }
                out.push(Expansion {
                    key: Some(InstanceKey::Str(key)),
                    value: Some(value),
                });
            }
            Ok(out)
        }
    }
}

/// Evaluate a cardinality expression: variables only, no references
fn eval_static(expr: &Expr, variables: &Variables, context: &str) -> Result<Value> {
    let address = Address::new("_", "_");
    let keys = HashMap::new();
    let scope = Scope {
        address: &address,
        index: None,
        each: None,
        variables,
        keys: &keys,
    };
    let mut deps = Vec::new();
    match scope.eval(expr, context, &mut deps) {
        Ok(Attr::Value(v)) if deps.is_empty() => Ok(v),
        Ok(_) => Err(Error::InvalidDeclaration {
            context: context.to_string(),
            message: "cardinality cannot depend on other resources".into(),
        }),
        Err(Error::UnresolvedReference { .. }) => Err(Error::InvalidDeclaration {
            context: context.to_string(),
            message: "cardinality cannot depend on other resources".into(),
        }),
        Err(e) => Err(e),
    }
}

/// NaN and infinities cannot be recorded in state or compared for changes
fn finite(value: Value, context: &str) -> Result<Value> {
    if value.has_non_finite() {
        return Err(Error::InvalidDeclaration {
            context: context.to_string(),
            message: "NaN and infinite numbers are not supported".into(),
        });
    }
    Ok(value)
}

struct Scope<'a> {
    address: &'a Address,
    index: Option<usize>,
    each: Option<(&'a str, Option<&'a Value>)>,
    variables: &'a Variables,
    keys: &'a HashMap<(String, String), Vec<Option<InstanceKey>>>,
}

impl Scope<'_> {
    fn eval(&self, expr: &Expr, context: &str, deps: &mut Vec<Address>) -> Result<Attr> {
        match expr {
            Expr::Value(value) => finite(self.interpolate(value, context)?, context).map(Attr::Value),
            Expr::Var(name) => finite(self.variable(name, context)?.clone(), context).map(Attr::Value),
            Expr::Ref { target, output } => {
                let addresses = self.targets(target, context)?;
                deps.extend(addresses.iter().cloned());
                let refs = addresses.into_iter().map(|target| {
                    Attr::Ref(Reference {
                        target,
                        output: output.clone(),
                    })
                });
                let mut refs: Vec<Attr> = refs.collect();
                if target.index == RefIndex::Splat || refs.len() != 1 {
                    Ok(Attr::list(refs))
                } else {
                    Ok(refs.remove(0))
                }
            }
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval(item, context, deps))
                .collect::<Result<Vec<_>>>()
                .map(Attr::list),
            Expr::Map(entries) => entries
                .iter()
                .map(|(k, v)| self.eval(v, &format!("{context}.{k}"), deps).map(|a| (k.clone(), a)))
                .collect::<Result<BTreeMap<_, _>>>()
                .map(Attr::map),
        }
    }

    /// Concrete addresses a reference target points at
    fn targets(&self, target: &RefTarget, context: &str) -> Result<Vec<Address>> {
        let unresolved = || Error::UnresolvedReference {
            from: context.to_string(),
            target: target.to_string(),
        };
        let keys = self
            .keys
            .get(&(target.resource_type.clone(), target.name.clone()))
            .ok_or_else(unresolved)?;
        let base = Address::new(&target.resource_type, &target.name);

        let key = match &target.index {
            RefIndex::Splat => {
                return Ok(keys
                    .iter()
                    .map(|k| Address {
                        key: k.clone(),
                        ..base.clone()
                    })
                    .collect());
            }
            RefIndex::None => None,
            RefIndex::Key(key) => Some(key.clone()),
            RefIndex::CountIndex => Some(InstanceKey::Int(self.count_index(context)?)),
            RefIndex::EachKey => Some(InstanceKey::Str(self.each_key(context)?.to_string())),
        };

        if !keys.contains(&key) {
            return Err(unresolved());
        }
        Ok(vec![Address { key, ..base }])
    }

    fn variable(&self, name: &str, context: &str) -> Result<&Value> {
        self.variables
            .get(name)
            .ok_or_else(|| Error::UnknownVariable {
                context: context.to_string(),
                name: name.to_string(),
            })
    }

    fn count_index(&self, context: &str) -> Result<usize> {
        self.index.ok_or_else(|| Error::InvalidDeclaration {
            context: context.to_string(),
            message: format!("count.index used but {} has no count", self.address.declaration()),
        })
    }

    fn each_key(&self, context: &str) -> Result<&str> {
        self.each.map(|(k, _)| k).ok_or_else(|| Error::InvalidDeclaration {
            context: context.to_string(),
            message: format!("each.* used but {} has no for_each", self.address.declaration()),
        })
    }

    fn interpolate(&self, value: &Value, context: &str) -> Result<Value> {
        match value {
            Value::String(s) => self.interpolate_str(s, context),
            Value::List(items) => items
                .iter()
                .map(|v| self.interpolate(v, context))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            Value::Map(entries) => entries
                .iter()
                .map(|(k, v)| self.interpolate(v, context).map(|v| (k.clone(), v)))
                .collect::<Result<BTreeMap<_, _>>>()
                .map(Value::Map),
            other => Ok(other.clone()),
        }
    }

    fn interpolate_str(&self, s: &str, context: &str) -> Result<Value> {
        // A string that is exactly one interpolation keeps the value's type
        if let Some(caps) = INTERPOLATION.captures(s)
            && caps.get(0).is_some_and(|m| m.start() == 0 && m.end() == s.len())
        {
            return self.token(&caps[1], context);
        }

        let mut out = String::with_capacity(s.len());
        let mut last = 0;
        for caps in INTERPOLATION.captures_iter(s) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&s[last..whole.start()]);
            out.push_str(&self.token(&caps[1], context)?.to_interpolated());
            last = whole.end();
        }
        out.push_str(&s[last..]);
        Ok(Value::String(out))
    }

    fn token(&self, token: &str, context: &str) -> Result<Value> {
        match token {
            "count.index" => Ok(Value::Int(self.count_index(context)? as i64)),
            "each.key" => Ok(Value::String(self.each_key(context)?.to_string())),
            "each.value" => {
                self.each_key(context)?;
                Ok(self
                    .each
                    .and_then(|(_, v)| v.cloned())
                    .unwrap_or(Value::Null))
            }
            _ => {
                let Some(rest) = token.strip_prefix("var.") else {
                    return Err(Error::InvalidDeclaration {
                        context: context.to_string(),
                        message: format!("unsupported interpolation '${{{token}}}'"),
                    });
                };
                match rest.split_once('[') {
                    None => Ok(self.variable(rest, context)?.clone()),
                    Some((name, index)) => {
                        let index = index.strip_suffix(']').ok_or_else(|| {
                            Error::InvalidDeclaration {
                                context: context.to_string(),
                                message: format!("malformed index in '${{{token}}}'"),
                            }
                        })?;
                        let value = self.variable(name, context)?;
                        self.element(value, index.trim(), token, context)
                    }
                }
            }
        }
    }

    fn element(&self, value: &Value, index: &str, token: &str, context: &str) -> Result<Value> {
        let out_of_range = || Error::InvalidDeclaration {
            context: context.to_string(),
            message: format!("'${{{token}}}' has no element at [{index}]"),
        };
        let key = match index {
            "count.index" => InstanceKey::Int(self.count_index(context)?),
            "each.key" => InstanceKey::Str(self.each_key(context)?.to_string()),
            raw => match raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
                Some(quoted) => InstanceKey::Str(quoted.to_string()),
                None => InstanceKey::Int(raw.parse().map_err(|_| out_of_range())?),
            },
        };
        match (value, key) {
            (Value::List(items), InstanceKey::Int(i)) => {
                items.get(i).cloned().ok_or_else(out_of_range)
            }
            (Value::Map(entries), InstanceKey::Str(k)) => {
                entries.get(&k).cloned().ok_or_else(out_of_range)
            }
            _ => Err(out_of_range()),
        }
    }
}

fn dedup_in_order(addresses: &mut Vec<Address>) {
    let mut seen = HashSet::new();
    addresses.retain(|a| seen.insert(a.clone()));
}

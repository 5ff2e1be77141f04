//! Declaration document schema
//!
//! A declaration document is TOML:
//!
//! ```toml
//! [variables]
//! vpc_cidr = "10.0.0.0/16"
//! public_subnets = ["10.0.1.0/24", "10.0.2.0/24"]
//!
//! [types.aws_instance]
//! replace_on = ["ami", "subnet_id"]
//!
//! [[resources]]
//! type = "aws_subnet"
//! name = "public"
//! count = 2
//! [resources.attributes]
//! vpc_id = { ref = "aws_vpc.main" }
//! cidr_block = "${var.public_subnets[count.index]}"
//!
//! [outputs]
//! lb_dns = { ref = "aws_lb.web", attr = "dns_name" }
//! ```
//!
//! Attribute values are literals (strings may interpolate `${...}`),
//! `{ ref = "type.name[index]", attr = "output" }` references,
//! `{ var = "name" }` whole-variable lookups, or arrays and tables of those.

use anyhow::{Context, Result, bail};
use declarative::{
    Expr, RefTarget, ResourceDeclaration, SchemaRegistry, TypeSchema, Value, Variables,
};
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Prefix of environment variables that override declared variables
pub const ENV_VAR_PREFIX: &str = "TIERFORM_VAR_";

/// Resource type reserved for evaluating `[outputs]`
pub const OUTPUT_TYPE: &str = "output";

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("Invalid identifier regex")
});

// ============================================================================
// Raw document
// ============================================================================

/// The declaration document as written
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeclarationDoc {
    #[serde(default)]
    pub variables: IndexMap<String, toml::Value>,

    /// Per-type behaviour, e.g. `replace_on`
    #[serde(default)]
    pub types: IndexMap<String, TypeSchema>,

    #[serde(default)]
    pub resources: Vec<ResourceDoc>,

    #[serde(default)]
    pub outputs: IndexMap<String, toml::Value>,
}

/// One `[[resources]]` entry
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceDoc {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    #[serde(default)]
    pub count: Option<toml::Value>,
    #[serde(default)]
    pub for_each: Option<toml::Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub attributes: IndexMap<String, toml::Value>,
}

// ============================================================================
// Parsed declarations
// ============================================================================

/// A parsed declaration document, ready for the engine
#[derive(Debug, Clone)]
pub struct Declarations {
    /// Where the document was read from
    pub path: PathBuf,
    pub resources: Vec<ResourceDeclaration>,
    pub variables: Variables,
    pub schema: SchemaRegistry,
    /// Output expressions in document order
    pub outputs: IndexMap<String, Expr>,
}

impl Declarations {
    /// Read and parse a declaration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read declarations: {}", path.display()))?;
        Self::parse(&content, path)
            .with_context(|| format!("Invalid declarations in {}", path.display()))
    }

    /// Parse a declaration document
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let doc: DeclarationDoc = toml::from_str(content).context("Invalid TOML format")?;
        Self::from_doc(doc, path)
    }

    fn from_doc(doc: DeclarationDoc, path: &Path) -> Result<Self> {
        let variables: Variables = doc
            .variables
            .into_iter()
            .map(|(name, value)| (name, value_from_toml(value)))
            .collect();

        let schema = doc.types.into_iter().collect::<SchemaRegistry>();

        let resources = doc
            .resources
            .into_iter()
            .map(ResourceDoc::into_declaration)
            .collect::<Result<Vec<_>>>()?;

        let outputs = doc
            .outputs
            .into_iter()
            .map(|(name, value)| {
                check_identifier(&name, "output name")?;
                let expr = expr_from_toml(value, &format!("output.{name}"))?;
                Ok((name, expr))
            })
            .collect::<Result<IndexMap<_, _>>>()?;

        log::debug!(
            "Parsed {} declarations, {} variables, {} outputs from {}",
            resources.len(),
            variables.len(),
            outputs.len(),
            path.display()
        );

        Ok(Self {
            path: path.to_path_buf(),
            resources,
            variables,
            schema,
            outputs,
        })
    }

    /// Apply variable overrides.
    ///
    /// Precedence, lowest first: document defaults, `TIERFORM_VAR_<name>`
    /// environment variables, then `--var name=value` arguments.
    /// Environment entries for undeclared variables are ignored; an
    /// undeclared `--var` is an error.
    pub fn apply_overrides<I>(&mut self, env: I, cli: &[String]) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, raw) in env {
            let Some(name) = key.strip_prefix(ENV_VAR_PREFIX) else {
                continue;
            };
            if self.variables.contains_key(name) {
                log::debug!("Variable '{name}' set from {key}");
                self.variables.insert(name.to_string(), parse_var_value(&raw));
            } else {
                log::debug!("Ignoring {key}: no variable '{name}' is declared");
            }
        }

        for assignment in cli {
            let (name, raw) = assignment
                .split_once('=')
                .with_context(|| format!("Invalid --var '{assignment}': expected name=value"))?;
            let name = name.trim();
            if !self.variables.contains_key(name) {
                bail!("Invalid --var '{assignment}': no variable '{name}' is declared");
            }
            self.variables.insert(name.to_string(), parse_var_value(raw));
        }
        Ok(())
    }

    /// Resources plus one synthetic `output.<name>` declaration per output,
    /// whose `value` attribute holds the output expression.
    pub fn with_output_declarations(&self) -> Vec<ResourceDeclaration> {
        let mut all = self.resources.clone();
        all.extend(self.outputs.iter().map(|(name, expr)| {
            ResourceDeclaration::new(OUTPUT_TYPE, name.as_str()).attr("value", expr.clone())
        }));
        all
    }
}

impl ResourceDoc {
    fn into_declaration(self) -> Result<ResourceDeclaration> {
        check_identifier(&self.resource_type, "resource type")?;
        check_identifier(&self.name, "resource name")?;
        if self.resource_type == OUTPUT_TYPE {
            bail!("resource type '{OUTPUT_TYPE}' is reserved for [outputs]");
        }

        let identity = format!("{}.{}", self.resource_type, self.name);
        let mut decl = ResourceDeclaration::new(&self.resource_type, &self.name);

        match (self.count, self.for_each) {
            (Some(_), Some(_)) => bail!("{identity}: count and for_each are mutually exclusive"),
            (Some(count), None) => {
                decl.cardinality = declarative::Cardinality::Count(expr_from_toml(
                    count,
                    &format!("{identity}.count"),
                )?);
            }
            (None, Some(each)) => {
                decl = decl.for_each(expr_from_toml(each, &format!("{identity}.for_each"))?);
            }
            (None, None) => {}
        }

        for (name, value) in self.attributes {
            let expr = expr_from_toml(value, &format!("{identity}.{name}"))?;
            decl = decl.attr(name, expr);
        }

        for target in &self.depends_on {
            let target: RefTarget = target
                .parse()
                .with_context(|| format!("{identity}: invalid depends_on entry"))?;
            decl = decl.depends_on(target);
        }

        Ok(decl)
    }
}

// ============================================================================
// TOML conversion
// ============================================================================

fn check_identifier(s: &str, what: &str) -> Result<()> {
    if !IDENTIFIER.is_match(s) {
        bail!("invalid {what} '{s}'");
    }
    Ok(())
}

/// Convert a TOML value into an engine literal
pub fn value_from_toml(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Int(i),
        toml::Value::Float(f) => Value::Float(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(d) => Value::String(d.to_string()),
        toml::Value::Array(items) => Value::List(items.into_iter().map(value_from_toml).collect()),
        toml::Value::Table(table) => Value::Map(
            table
                .into_iter()
                .map(|(k, v)| (k, value_from_toml(v)))
                .collect::<BTreeMap<_, _>>(),
        ),
    }
}

/// Convert a TOML value into an attribute expression
fn expr_from_toml(value: toml::Value, context: &str) -> Result<Expr> {
    match value {
        toml::Value::Table(mut table) => {
            if let Some(target) = table.remove("ref") {
                let target = target
                    .as_str()
                    .with_context(|| format!("{context}: 'ref' must be a string"))?
                    .to_string();
                let output = match table.remove("attr") {
                    Some(toml::Value::String(s)) => Some(s),
                    Some(_) => bail!("{context}: 'attr' must be a string"),
                    None => None,
                };
                if let Some(extra) = table.keys().next() {
                    bail!("{context}: unexpected key '{extra}' next to 'ref'");
                }
                return Expr::reference(&target, output.as_deref())
                    .with_context(|| format!("{context}: invalid reference"));
            }

            if table.len() == 1
                && let Some(toml::Value::String(name)) = table.get("var")
            {
                return Ok(Expr::Var(name.clone()));
            }

            table
                .into_iter()
                .map(|(k, v)| {
                    let expr = expr_from_toml(v, &format!("{context}.{k}"))?;
                    Ok((k, expr))
                })
                .collect::<Result<IndexMap<_, _>>>()
                .map(Expr::Map)
        }
        toml::Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| expr_from_toml(v, &format!("{context}[{i}]")))
            .collect::<Result<Vec<_>>>()
            .map(Expr::List),
        scalar => Ok(Expr::Value(value_from_toml(scalar))),
    }
}

/// Parse an override value as TOML when possible, else as a plain string
fn parse_var_value(raw: &str) -> Value {
    let wrapped = format!("v = {raw}");
    match toml::from_str::<toml::Table>(&wrapped) {
        Ok(mut table) => table
            .remove("v")
            .map(value_from_toml)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        Err(_) => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{Cardinality, RefIndex};

    const DOC: &str = r#"
[variables]
vpc_cidr = "10.0.0.0/16"
az_count = 2
public_subnets = ["10.0.1.0/24", "10.0.2.0/24"]

[types.aws_instance]
replace_on = ["ami", "subnet_id"]

[[resources]]
type = "aws_vpc"
name = "main"
[resources.attributes]
cidr_block = "${var.vpc_cidr}"
tags = { Name = "main" }

[[resources]]
type = "aws_subnet"
name = "public"
count = { var = "az_count" }
depends_on = ["aws_vpc.main"]
[resources.attributes]
vpc_id = { ref = "aws_vpc.main" }
cidr_block = "${var.public_subnets[count.index]}"

[outputs]
vpc_id = { ref = "aws_vpc.main" }
subnet_arns = { ref = "aws_subnet.public[*]", attr = "arn" }
"#;

    fn parse(doc: &str) -> Result<Declarations> {
        Declarations::parse(doc, Path::new("test.toml"))
    }

    #[test]
    fn test_parse_example_document() {
        let decls = parse(DOC).unwrap();

        assert_eq!(decls.resources.len(), 2);
        assert_eq!(decls.variables["az_count"], Value::Int(2));
        assert!(decls.schema.requires_replacement("aws_instance", "ami"));
        assert!(!decls.schema.requires_replacement("aws_instance", "tags"));

        let vpc = &decls.resources[0];
        assert_eq!(vpc.identity(), "aws_vpc.main");
        assert!(matches!(vpc.attributes["tags"], Expr::Map(_)));

        let subnet = &decls.resources[1];
        assert_eq!(
            subnet.cardinality,
            Cardinality::Count(Expr::Var("az_count".into()))
        );
        assert_eq!(subnet.depends_on.len(), 1);
        assert!(matches!(
            &subnet.attributes["vpc_id"],
            Expr::Ref { target, output: None } if target.name == "main"
        ));

        let keys: Vec<_> = decls.outputs.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["vpc_id", "subnet_arns"]);
        assert!(matches!(
            &decls.outputs["subnet_arns"],
            Expr::Ref { target, output: Some(o) } if target.index == RefIndex::Splat && o == "arn"
        ));
    }

    #[test]
    fn test_attribute_order_preserved() {
        let decls = parse(
            r#"
[[resources]]
type = "aws_lb"
name = "web"
[resources.attributes]
zeta = 1
alpha = 2
"#,
        )
        .unwrap();
        let names: Vec<_> = decls.resources[0].attributes.keys().collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_count_and_for_each_rejected() {
        let err = parse(
            r#"
[[resources]]
type = "aws_subnet"
name = "x"
count = 1
for_each = ["a"]
"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("mutually exclusive"));
    }

    #[test]
    fn test_nan_attribute_fails_graph_build() {
        let decls = parse(
            r#"
[variables]
weight = inf

[[resources]]
type = "aws_lb_target_group"
name = "tg"
[resources.attributes]
weight = nan
"#,
        )
        .unwrap();
        assert!(decls.variables["weight"].has_non_finite());
        let err = declarative::ResourceGraph::build(&decls.resources, &decls.variables).unwrap_err();
        assert!(err.to_string().contains("NaN"), "{err}");
    }

    #[test]
    fn test_ref_with_extra_key_rejected() {
        let err = parse(
            r#"
[[resources]]
type = "aws_subnet"
name = "x"
[resources.attributes]
vpc_id = { ref = "aws_vpc.main", output = "id" }
"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("unexpected key 'output'"));
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        assert!(parse("[resource]\ntype = \"x\"\n").is_err());
    }

    #[test]
    fn test_reserved_and_invalid_names() {
        let reserved = parse("[[resources]]\ntype = \"output\"\nname = \"x\"\n").unwrap_err();
        assert!(format!("{reserved:#}").contains("reserved"));

        let invalid = parse("[[resources]]\ntype = \"aws vpc\"\nname = \"x\"\n").unwrap_err();
        assert!(format!("{invalid:#}").contains("invalid resource type"));
    }

    #[test]
    fn test_overrides_env_then_cli() {
        let mut decls = parse(DOC).unwrap();
        let env = vec![
            ("TIERFORM_VAR_az_count".to_string(), "3".to_string()),
            ("TIERFORM_VAR_vpc_cidr".to_string(), "10.1.0.0/16".to_string()),
            ("TIERFORM_VAR_undeclared".to_string(), "x".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ];
        decls
            .apply_overrides(env, &["vpc_cidr=10.9.0.0/16".to_string()])
            .unwrap();

        assert_eq!(decls.variables["az_count"], Value::Int(3));
        // Not valid TOML, kept as a string
        assert_eq!(decls.variables["vpc_cidr"], Value::from("10.9.0.0/16"));
        assert!(!decls.variables.contains_key("undeclared"));
    }

    #[test]
    fn test_cli_override_of_undeclared_variable_fails() {
        let mut decls = parse(DOC).unwrap();
        let err = decls
            .apply_overrides(Vec::new(), &["nope=1".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("no variable 'nope'"));

        let err = decls
            .apply_overrides(Vec::new(), &["missing-equals".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("name=value"));
    }

    #[test]
    fn test_parse_var_value() {
        assert_eq!(parse_var_value("true"), Value::Bool(true));
        assert_eq!(parse_var_value("\"quoted\""), Value::from("quoted"));
        assert_eq!(
            parse_var_value("[\"a\", \"b\"]"),
            Value::List(vec![Value::from("a"), Value::from("b")])
        );
        assert_eq!(parse_var_value("t3.micro"), Value::from("t3.micro"));
    }

    #[test]
    fn test_output_declarations_appended() {
        let decls = parse(DOC).unwrap();
        let all = decls.with_output_declarations();
        assert_eq!(all.len(), 4);
        assert_eq!(all[2].identity(), "output.vpc_id");
        assert!(all[2].attributes.contains_key("value"));
    }
}

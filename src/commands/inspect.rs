//! Read-only commands: `validate`, `graph`, `output`

use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use declarative::{
    Address, Reference, ResourceGraph, StateSnapshot, StateStore, Value, resolve,
};
use indexmap::IndexMap;

use crate::Context;
use crate::cli::{GraphArgs, OutputArgs};
use crate::engine::planner::{build_graph, load_declarations, open_state};
use crate::schema::OUTPUT_TYPE;
use crate::ui;

// ============================================================================
// Validate Command
// ============================================================================

pub fn validate(ctx: &Context) -> Result<()> {
    let declarations = load_declarations(ctx)?;
    let graph = build_graph(&declarations)?;

    // Outputs must resolve against the graph too
    ResourceGraph::build(
        &declarations.with_output_declarations(),
        &declarations.variables,
    )
    .context("Invalid [outputs]")?;

    ui::success(&format!(
        "{} is valid: {} → {}, {}",
        ctx.file.display(),
        ui::plural(declarations.resources.len(), "declaration"),
        ui::plural(graph.len(), "instance"),
        ui::plural(graph.edges().count(), "edge")
    ));
    Ok(())
}

// ============================================================================
// Graph Command
// ============================================================================

pub fn graph(ctx: &Context, args: GraphArgs) -> Result<()> {
    let declarations = load_declarations(ctx)?;
    let graph = build_graph(&declarations)?;

    if args.order {
        for (i, address) in resolve(&graph)?.iter().enumerate() {
            println!("{:>4}. {}", i + 1, address);
        }
    } else {
        print!("{}", to_dot(&graph));
    }
    Ok(())
}

/// Graphviz DOT; edges point from referrer to target
fn to_dot(graph: &ResourceGraph) -> String {
    let mut out = String::from("digraph tierform {\n  rankdir = \"BT\";\n  node [shape = box];\n");
    for instance in graph.instances() {
        out.push_str(&format!("  {};\n", quote(&instance.address)));
    }
    for (from, to) in graph.edges() {
        out.push_str(&format!("  {} -> {};\n", quote(from), quote(to)));
    }
    out.push_str("}\n");
    out
}

fn quote(address: &Address) -> String {
    format!("\"{}\"", address.to_string().replace('\\', "\\\\").replace('"', "\\\""))
}

// ============================================================================
// Output Command
// ============================================================================

pub fn output(ctx: &Context, args: OutputArgs) -> Result<()> {
    let declarations = load_declarations(ctx)?;
    if let Some(name) = &args.name
        && !declarations.outputs.contains_key(name)
    {
        bail!("No output named '{name}' in {}", ctx.file.display());
    }

    let graph = ResourceGraph::build(
        &declarations.with_output_declarations(),
        &declarations.variables,
    )
    .context("Invalid [outputs]")?;
    let snapshot = open_state(ctx)?.snapshot()?;
    let values = resolve_outputs(&graph, &snapshot, declarations.outputs.keys());

    if let Some(name) = &args.name {
        match &values[name] {
            Ok(value) if args.json => println!("{}", serde_json::to_string_pretty(value)?),
            Ok(value) => println!("{}", value.to_interpolated()),
            Err(pending) => bail!("Output '{name}' is not available yet: {pending} is not in state"),
        }
        return Ok(());
    }

    if args.json {
        let resolved: IndexMap<&String, Option<&Value>> =
            values.iter().map(|(k, v)| (k, v.as_ref().ok())).collect();
        println!("{}", serde_json::to_string_pretty(&resolved)?);
        return Ok(());
    }

    if values.is_empty() {
        ui::info("No outputs declared");
    }
    for (name, value) in &values {
        match value {
            Ok(value) => println!("{} = {}", name.bold(), value),
            Err(pending) => println!(
                "{} = {}",
                name.bold(),
                format!("(not applied: {pending})").dimmed()
            ),
        }
    }
    Ok(())
}

/// Resolve each output; `Err` names the first reference missing from state
fn resolve_outputs<'a>(
    graph: &ResourceGraph,
    snapshot: &StateSnapshot,
    names: impl Iterator<Item = &'a String>,
) -> IndexMap<String, Result<Value, String>> {
    names
        .map(|name| {
            let address = Address::new(OUTPUT_TYPE, name.as_str());
            let value = graph
                .get(&address)
                .and_then(|i| i.attributes.get("value"))
                .map_or(Ok(Value::Null), |attr| {
                    attr.resolve(&|r: &Reference| snapshot.lookup(r))
                        .map_err(|r| r.to_string())
                });
            (name.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Declarations;
    use declarative::{StateRecord, Values};
    use std::path::Path;

    const DOC: &str = r#"
[[resources]]
type = "aws_vpc"
name = "main"

[[resources]]
type = "aws_subnet"
name = "public"
for_each = ["a", "b"]
[resources.attributes]
vpc_id = { ref = "aws_vpc.main" }

[outputs]
vpc_id = { ref = "aws_vpc.main" }
vpc_arn = { ref = "aws_vpc.main", attr = "arn" }
subnet_ids = { ref = "aws_subnet.public[*]" }
region = "eu-west-1"
"#;

    fn graph(declarations: &Declarations, outputs: bool) -> ResourceGraph {
        let decls = if outputs {
            declarations.with_output_declarations()
        } else {
            declarations.resources.clone()
        };
        ResourceGraph::build(&decls, &declarations.variables).unwrap()
    }

    fn record(address: &str, provider_id: &str) -> StateRecord {
        let address: Address = address.parse().unwrap();
        let mut outputs = Values::new();
        outputs.insert("arn".into(), Value::from(format!("arn:sim:{provider_id}")));
        StateRecord {
            resource_type: address.resource_type.clone(),
            address,
            provider_id: provider_id.into(),
            attributes: Default::default(),
            outputs,
            dependencies: Vec::new(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_dot_lists_nodes_and_edges() {
        let declarations = Declarations::parse(DOC, Path::new("t.toml")).unwrap();
        let dot = to_dot(&graph(&declarations, false));
        assert!(dot.starts_with("digraph tierform {"));
        assert!(dot.contains("  \"aws_vpc.main\";\n"));
        assert!(dot.contains(r#"  "aws_subnet.public[\"a\"]" -> "aws_vpc.main";"#));
        assert!(dot.ends_with("}\n"));
    }

    #[test]
    fn test_outputs_resolve_from_state() {
        let declarations = Declarations::parse(DOC, Path::new("t.toml")).unwrap();
        let graph = graph(&declarations, true);

        let mut snapshot = StateSnapshot::default();
        for (address, id) in [
            ("aws_vpc.main", "vpc-1"),
            ("aws_subnet.public[\"a\"]", "subnet-a"),
            ("aws_subnet.public[\"b\"]", "subnet-b"),
        ] {
            let r = record(address, id);
            snapshot.records.insert(r.address.clone(), r);
        }

        let values = resolve_outputs(&graph, &snapshot, declarations.outputs.keys());
        assert_eq!(values["vpc_id"], Ok(Value::from("vpc-1")));
        assert_eq!(values["vpc_arn"], Ok(Value::from("arn:sim:vpc-1")));
        assert_eq!(
            values["subnet_ids"],
            Ok(Value::List(vec![Value::from("subnet-a"), Value::from("subnet-b")]))
        );
        assert_eq!(values["region"], Ok(Value::from("eu-west-1")));
    }

    #[test]
    fn test_outputs_pending_before_apply() {
        let declarations = Declarations::parse(DOC, Path::new("t.toml")).unwrap();
        let graph = graph(&declarations, true);
        let values = resolve_outputs(&graph, &StateSnapshot::default(), declarations.outputs.keys());
        assert_eq!(values["vpc_id"], Err("aws_vpc.main.id".to_string()));
        assert!(values["region"].is_ok());
    }
}

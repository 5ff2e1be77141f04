//! Loading declarations and state, planning, and saved plans

use anyhow::{Context as AnyhowContext, Result, bail};
use declarative::{
    Address, Plan, PlanOptions, Planner, ResourceGraph, StateStore, resolve,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::Context;
use crate::paths;
use crate::schema::Declarations;
use crate::state::FileStateStore;

/// Saved plan format version
const SAVED_PLAN_VERSION: u32 = 1;

/// Declarations, their graph, and the state they are planned against
pub struct Workspace {
    pub declarations: Declarations,
    pub graph: ResourceGraph,
    pub store: FileStateStore,
}

impl Workspace {
    /// Load declarations (with overrides), build and resolve the graph,
    /// and open the state file.
    pub fn load(ctx: &Context) -> Result<Self> {
        let declarations = load_declarations(ctx)?;
        let graph = build_graph(&declarations)?;
        let store = open_state(ctx)?;
        Ok(Self {
            declarations,
            graph,
            store,
        })
    }

    /// Plan against the current state
    pub fn plan(&self, destroy: bool, targets: &[Address]) -> Result<Plan> {
        let snapshot = self.store.snapshot()?;
        for target in targets {
            let known = self.graph.instances().iter().any(|i| target.covers(&i.address))
                || snapshot.records.keys().any(|a| target.covers(a));
            if !known {
                log::warn!("Target {target} matches no declared or recorded instance");
            }
        }

        let planner = Planner::new(self.declarations.schema.clone());
        let options = PlanOptions {
            destroy,
            targets: targets.to_vec(),
        };
        let plan = planner
            .plan(&self.graph, &snapshot, &options)
            .context("Planning failed")?;
        log::info!(
            "Planned {} actions ({} unchanged) against {} state records",
            plan.len(),
            plan.unchanged.len(),
            snapshot.len()
        );
        Ok(plan)
    }
}

/// Read the declaration file and apply `TIERFORM_VAR_*` and `--var` overrides
pub fn load_declarations(ctx: &Context) -> Result<Declarations> {
    let mut declarations = Declarations::load(&ctx.file)?;
    declarations.apply_overrides(std::env::vars(), &ctx.vars)?;
    Ok(declarations)
}

/// Expand declarations into a graph and check it resolves
pub fn build_graph(declarations: &Declarations) -> Result<ResourceGraph> {
    let graph = ResourceGraph::build(&declarations.resources, &declarations.variables)
        .with_context(|| format!("Invalid declarations in {}", declarations.path.display()))?;
    let order = resolve(&graph)
        .with_context(|| format!("Invalid declarations in {}", declarations.path.display()))?;
    log::debug!("Resolved {} instances", order.len());
    Ok(graph)
}

/// State file for this invocation: `--state`, or derived from the
/// declaration file name
pub fn state_path(ctx: &Context) -> Result<PathBuf> {
    match &ctx.state {
        Some(path) => Ok(path.clone()),
        None => paths::state_file_for(&ctx.file),
    }
}

/// Open the state file for this invocation
pub fn open_state(ctx: &Context) -> Result<FileStateStore> {
    let path = state_path(ctx)?;
    FileStateStore::open(&path).with_context(|| format!("Could not open state {}", path.display()))
}

/// Parse `-t/--target` arguments
pub fn parse_targets(targets: &[String]) -> Result<Vec<Address>> {
    targets
        .iter()
        .map(|t| {
            t.parse::<Address>()
                .with_context(|| format!("Invalid target '{t}'"))
        })
        .collect()
}

// ============================================================================
// Saved plans
// ============================================================================

/// A plan written by `plan -o`, bound to the state file it was computed for
#[derive(Debug, Serialize, Deserialize)]
pub struct SavedPlan {
    pub version: u32,
    pub state_path: PathBuf,
    pub plan: Plan,
}

impl SavedPlan {
    /// Wrap a plan for the given state file
    pub fn new(plan: Plan, state_path: PathBuf) -> Self {
        Self {
            version: SAVED_PLAN_VERSION,
            state_path,
            plan,
        }
    }

    /// Write as JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to serialize plan")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write plan file: {}", path.display()))?;
        Ok(())
    }

    /// Read a saved plan
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read plan file: {}", path.display()))?;
        let saved: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid plan file: {}", path.display()))?;
        if saved.version != SAVED_PLAN_VERSION {
            bail!(
                "Unsupported plan version {} in {} (expected {SAVED_PLAN_VERSION})",
                saved.version,
                path.display()
            );
        }
        Ok(saved)
    }

    /// Check the plan belongs to `state_path` and that the state is unchanged
    pub fn verify(&self, state_path: &Path, store: &FileStateStore) -> Result<()> {
        if self.state_path != state_path {
            bail!(
                "Plan was created for state {} but this run uses {}",
                self.state_path.display(),
                state_path.display()
            );
        }
        self.plan
            .check_fresh(&store.snapshot()?)
            .context("Saved plan cannot be applied; run plan again")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    const DOC: &str = r#"
[[resources]]
type = "aws_vpc"
name = "main"
[resources.attributes]
cidr_block = "10.0.0.0/16"

[[resources]]
type = "aws_subnet"
name = "app"
count = 2
[resources.attributes]
vpc_id = { ref = "aws_vpc.main" }
"#;

    fn context(dir: &TempDir, doc: &str) -> Context {
        let file = dir.path().join("infra.toml");
        fs::write(&file, doc).unwrap();
        Context {
            verbose: 0,
            quiet: true,
            file,
            state: Some(dir.path().join("infra.state.json")),
            config: Config::default(),
            vars: Vec::new(),
        }
    }

    #[test]
    fn test_workspace_plans_creates_in_order() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, DOC);
        let workspace = Workspace::load(&ctx).unwrap();
        let plan = workspace.plan(false, &[]).unwrap();

        let labels: Vec<_> = plan.actions.iter().map(declarative::PlannedAction::label).collect();
        assert_eq!(
            labels,
            vec![
                "create aws_vpc.main",
                "create aws_subnet.app[0]",
                "create aws_subnet.app[1]"
            ]
        );
    }

    #[test]
    fn test_cycle_is_reported_at_load() {
        let dir = TempDir::new().unwrap();
        let ctx = context(
            &dir,
            r#"
[[resources]]
type = "a"
name = "x"
[resources.attributes]
peer = { ref = "b.y" }

[[resources]]
type = "b"
name = "y"
[resources.attributes]
peer = { ref = "a.x" }
"#,
        );
        let err = Workspace::load(&ctx).err().unwrap();
        let message = format!("{err:#}");
        assert!(message.contains("dependency cycle"), "{message}");
        assert!(message.contains("a.x") && message.contains("b.y"), "{message}");
    }

    #[test]
    fn test_parse_targets() {
        let targets = parse_targets(&["aws_subnet.app[1]".into(), "aws_vpc.main".into()]).unwrap();
        assert_eq!(targets[0].to_string(), "aws_subnet.app[1]");
        assert!(parse_targets(&["not-an-address".into()]).is_err());
    }

    #[test]
    fn test_saved_plan_roundtrip_and_staleness() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, DOC);
        let mut workspace = Workspace::load(&ctx).unwrap();
        let plan = workspace.plan(false, &[]).unwrap();
        let state = state_path(&ctx).unwrap();

        let plan_file = dir.path().join("plan.json");
        SavedPlan::new(plan.clone(), state.clone()).save(&plan_file).unwrap();
        let saved = SavedPlan::load(&plan_file).unwrap();
        assert_eq!(saved.plan, plan);
        saved.verify(&state, &workspace.store).unwrap();

        // Wrong state file
        assert!(saved.verify(&dir.path().join("other.json"), &workspace.store).is_err());

        // State changed since planning
        workspace
            .store
            .put(declarative::StateRecord {
                address: "aws_vpc.main".parse().unwrap(),
                resource_type: "aws_vpc".into(),
                provider_id: "vpc-1".into(),
                attributes: Default::default(),
                outputs: Default::default(),
                dependencies: Vec::new(),
                updated_at: chrono::Utc::now(),
            })
            .unwrap();
        let err = saved.verify(&state, &workspace.store).unwrap_err();
        assert!(format!("{err:#}").contains("stale"));
    }
}

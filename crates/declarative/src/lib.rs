//! # Declarative
//!
//! A resource-graph engine for declarative infrastructure.
//!
//! Typed resource declarations are expanded into a graph of instances,
//! ordered by their references, compared against recorded state to produce
//! a plan, and applied through a pluggable provider.
//!
//! ## Core Concepts
//!
//! - **ResourceDeclaration**: a typed, named description of desired infrastructure
//! - **ResourceGraph**: expanded instances plus their reference edges
//! - **Planner**: diffs the graph against a [`StateSnapshot`] and orders actions
//! - **apply**: runs a [`Plan`] through a [`Provider`] with bounded parallelism
//! - **StateStore**: last-applied record of every instance
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     apply, CancelToken, Expr, ExecuteOptions, MemoryStateStore, NoProgress,
//!     PlanOptions, Planner, ResourceDeclaration, ResourceGraph, SchemaRegistry,
//!     StateStore, Value, Variables,
//! };
//!
//! let decls = vec![
//!     ResourceDeclaration::new("aws_vpc", "main").attr("cidr_block", Value::from("10.0.0.0/16")),
//!     ResourceDeclaration::new("aws_subnet", "app")
//!         .attr("vpc_id", Expr::reference("aws_vpc.main", None)?),
//! ];
//!
//! let graph = ResourceGraph::build(&decls, &Variables::new())?;
//! let mut store = MemoryStateStore::new();
//! let plan = Planner::new(SchemaRegistry::new())
//!     .plan(&graph, &store.snapshot()?, &PlanOptions::default())?;
//!
//! let report = apply(
//!     &plan,
//!     &my_provider,
//!     &mut store,
//!     &ExecuteOptions::default(),
//!     &CancelToken::new(),
//!     &mut NoProgress,
//! )?;
//! ```
//!
//! ## Provider Traits
//!
//! The crate uses traits for dependency injection:
//!
//! - [`Provider`]: creates, updates and destroys real infrastructure
//! - [`StateStore`]: persists state records
//! - [`ProgressCallback`]: receives progress updates
//! - [`RetryCallback`]: notified when [`RetryingProvider`] retries
//!
//! This allows the crate to be used without hard dependencies on a
//! specific cloud API, storage backend or terminal UI.

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod planner;
pub mod resolver;
pub mod resource;
pub mod retry;
pub mod state;
pub mod types;

// Re-export main types at crate root
pub use context::{CancelToken, Created, NoProgress, ProgressCallback, Provider};
pub use diff::{AttributeChange, DiffSummary, diff_attributes, group_by_type};
pub use error::{Error, ErrorCategory, ProviderError, Result};
pub use executor::{ActionReport, ApplyReport, apply};
pub use graph::{ResourceGraph, ResourceInstance};
pub use planner::{ActionKind, ActionReason, Plan, PlanOptions, PlannedAction, Planner};
pub use resolver::{resolve, topological_order};
pub use resource::{Cardinality, ResourceDeclaration, SchemaRegistry, TypeSchema, Variables};
pub use retry::{LogCallback, RetryCallback, RetryConfig, RetryingProvider, with_retry};
pub use state::{MemoryStateStore, StateRecord, StateSnapshot, StateStore};
pub use types::{
    ActionStatus, Address, ApplyOutcome, Attr, Attributes, ExecuteOptions, ExecuteSummary, Expr,
    InstanceKey, RefIndex, RefTarget, Reference, Value, Values,
};

// Plan, apply and destroy
pub mod declarative;

// Read-only inspection: validate, graph, output
pub mod inspect;

// State inspection and surgery
pub mod state;

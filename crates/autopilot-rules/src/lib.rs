//! autopilot-rules: the coordination rule engine.
//!
//! # Evaluation
//!
//! ```text
//! Snapshot (metrics + predictions + subsystem status + pool)
//!   └── confidence gate (optional) → condition view
//!         └── every rule whose condition holds
//!               └── stable sort by priority (Critical → Low)
//!                     └── Vec<DispatchedAction>
//!
//! dispatch(actions, &dyn ActionTarget)
//!   ├── apply each action in order
//!   ├── failure → rule marked failed this tick, keep going
//!   └── hit counters += 1 per firing rule
//! ```
//!
//! The engine performs no I/O itself. Subsystems are reached only
//! through the `ActionTarget` the caller supplies.

pub mod defaults;
pub mod engine;
pub mod rule;

pub use defaults::default_rules;
pub use engine::{ActionTarget, DispatchedAction, RuleEngine, TickOutcome};
pub use rule::{Action, Condition, CoordinationRule, Priority};

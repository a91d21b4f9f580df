//! autopilot-pool: the worker agent registry.
//!
//! Agents are created by `scale_up`, demoted to `Idle` by `reclaim_idle`,
//! pulled from rotation by `isolate`, and stopped on shutdown. No agent is
//! ever removed from the registry during a run, so isolated and stopped
//! agents stay available for inspection.
//!
//! Pool operations never fail: bad input is logged and ignored.

pub mod pool;

pub use pool::AgentPool;

//! Core domain logic for FlowDo.
//! This crate is the single source of truth for flow-up invariants.

pub mod config;
pub mod db;
pub mod flow;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod trigger;

pub use config::{ConfigError, FlowDoConfig};
pub use flow::boundary::{classify, BoundaryFlags};
pub use flow::engine::{
    plan_flow_up, run_flow_up, run_flow_up_now, FlowUpError, FlowUpPlan, FlowUpStore,
    FlowUpSummary,
};
pub use flow::rules::{evaluate, next_state, FlowUpdate, Outcome, Transition};
pub use logging::{default_log_level, init_logging, init_logging_from_config, logging_status};
pub use model::do_item::{Do, DoId, DoType, DoValidationError, ParseEnumError, TimeUnit, UserId};
pub use repo::do_repo::{DoListQuery, DoRepository, RepoError, RepoResult, SqliteDoRepository};
pub use service::do_service::{DoPatch, DoService};
pub use trigger::{
    authorize_on_demand, next_run_after, next_scheduled_run, TriggerError, TriggerSource,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

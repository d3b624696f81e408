//! A partial-order causal-link planner with durative actions.
//!
//! The crate is organised into a model layer (`data`), a plan-space search
//! engine (`planner`), a PDDL-subset reader (`parser`), and the planner
//! configuration (`config`). The engine searches the space of partial
//! plans, repairing one flaw at a time, and returns a causally correct,
//! temporally consistent partial order of action steps.

pub mod config;
pub mod data;
pub mod parser;
pub mod planner;

pub use config::{ActionCost, ConfigError, Parameters, SearchAlgorithm};
pub use data::{
    Action, Atom, Domain, DomainError, Effect, EffectTime, Expression, Formula, FormulaTime,
    Literal, Problem, Requirements,
};
pub use parser::{parse_domain, parse_problem, ParseError};
pub use planner::{
    Flaw, FlawSelectionOrder, Heuristic, HeuristicValue, Plan, PlanResult, Planner, GOAL_ID,
    INIT_ID, THRESHOLD,
};

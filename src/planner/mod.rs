//! The plan-space search engine: variable bindings, ordering constraints,
//! the planning graph, flaw repair, and the search driver.

pub mod bindings;
pub mod flaws;
pub mod graph;
pub mod heuristics;
pub mod orderings;
pub mod plans;
pub mod search;

/// Id of the synthetic initial step.
pub const INIT_ID: usize = 0;
/// Id of the synthetic goal step.
pub const GOAL_ID: usize = usize::MAX;

pub use bindings::{ActionDomain, Binding, BindingList, Bindings, StepDomain, VarSet};
pub use flaws::{Flaw, MutexThreat, OpenCondition, Unsafe};
pub use graph::{ActionEffectMap, HeuristicValue, PlanningGraph};
pub use heuristics::{FlawSelectionOrder, Heuristic};
pub use orderings::{Ordering, Orderings, StepPoint, StepTime, THRESHOLD};
pub use plans::{Link, Plan, Step};
pub use search::{PlanResult, Planner};

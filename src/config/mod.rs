//! Planner configuration: search algorithm, heuristic, flaw selection
//! orders, action cost model, and resource limits.

use std::str::FromStr;

use thiserror::Error;

use crate::planner::heuristics::{FlawSelectionOrder, Heuristic};

/// A configuration string that does not name a known setting.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid search algorithm `{0}`")]
    InvalidSearchAlgorithm(String),
    #[error("invalid action cost `{0}`")]
    InvalidActionCost(String),
    #[error("invalid heuristic `{0}`")]
    InvalidHeuristic(String),
    #[error("invalid flaw selection order `{0}`")]
    InvalidFlawSelectionOrder(String),
}

/// Search algorithm driving plan-space exploration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SearchAlgorithm {
    AStar,
    IdaStar,
    HillClimbing,
}

impl FromStr for SearchAlgorithm {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Self, ConfigError> {
        match name.to_ascii_uppercase().as_str() {
            "A" | "A-STAR" => Ok(SearchAlgorithm::AStar),
            "IDA" | "IDA-STAR" => Ok(SearchAlgorithm::IdaStar),
            "HC" | "HILL-CLIMBING" => Ok(SearchAlgorithm::HillClimbing),
            _ => Err(ConfigError::InvalidSearchAlgorithm(name.to_string())),
        }
    }
}

/// How the additive heuristic charges for an action.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ActionCost {
    Unit,
    Duration,
    Relative,
}

impl FromStr for ActionCost {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Self, ConfigError> {
        match name.to_ascii_uppercase().as_str() {
            "UNIT" => Ok(ActionCost::Unit),
            "DURATION" => Ok(ActionCost::Duration),
            "RELATIVE" => Ok(ActionCost::Relative),
            _ => Err(ConfigError::InvalidActionCost(name.to_string())),
        }
    }
}

/// Planning parameters.
#[derive(Clone, Debug)]
pub struct Parameters {
    /// Wall clock limit in minutes, if any.
    pub time_limit: Option<u64>,
    pub search_algorithm: SearchAlgorithm,
    pub heuristic: Heuristic,
    pub action_cost: ActionCost,
    /// Multiplier on heuristic terms.
    pub weight: f32,
    /// Flaw selection orders tried round-robin.
    pub flaw_orders: Vec<FlawSelectionOrder>,
    /// Per-order generated-plan limits, matched to `flaw_orders` by index.
    pub search_limits: Vec<usize>,
    /// Shuffle open conditions on insertion.
    pub random_open_conditions: bool,
    /// Plan with fully ground actions from the planning graph.
    pub ground_actions: bool,
    /// Attach step domains from planning-graph action tuples.
    pub domain_constraints: bool,
    pub keep_static_preconditions: bool,
    /// Seed for the search's random choices.
    pub seed: u64,
}

impl Default for Parameters {
    fn default() -> Parameters {
        Parameters {
            time_limit: None,
            search_algorithm: SearchAlgorithm::AStar,
            heuristic: Heuristic::default(),
            action_cost: ActionCost::Unit,
            weight: 1.0,
            flaw_orders: vec![FlawSelectionOrder::default()],
            search_limits: vec![usize::MAX],
            random_open_conditions: false,
            ground_actions: false,
            domain_constraints: false,
            keep_static_preconditions: true,
            seed: 0,
        }
    }
}

impl Parameters {
    /// Static preconditions are dropped when domain constraints make them
    /// redundant.
    pub fn strip_static_preconditions(&self) -> bool {
        !self.ground_actions && self.domain_constraints && !self.keep_static_preconditions
    }
}

#[cfg(test)]
mod tests {
    use super::{ActionCost, ConfigError, Parameters, SearchAlgorithm};

    #[test]
    fn search_algorithm_names_parse() {
        assert_eq!("A-STAR".parse(), Ok(SearchAlgorithm::AStar));
        assert_eq!("ida".parse(), Ok(SearchAlgorithm::IdaStar));
        assert_eq!("hill-climbing".parse(), Ok(SearchAlgorithm::HillClimbing));
        assert_eq!(
            "best-first".parse::<SearchAlgorithm>(),
            Err(ConfigError::InvalidSearchAlgorithm("best-first".into()))
        );
    }

    #[test]
    fn action_cost_names_parse() {
        assert_eq!("unit".parse(), Ok(ActionCost::Unit));
        assert_eq!("DURATION".parse(), Ok(ActionCost::Duration));
        assert_eq!("relative".parse(), Ok(ActionCost::Relative));
        assert!("cheap".parse::<ActionCost>().is_err());
    }

    #[test]
    fn defaults_keep_static_preconditions() {
        let params = Parameters::default();
        assert!(!params.strip_static_preconditions());
        assert_eq!(params.flaw_orders.len(), params.search_limits.len());
    }
}

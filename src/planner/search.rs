use std::cell::{Cell, RefCell};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, BinaryHeap};
use std::rc::Rc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::config::{Parameters, SearchAlgorithm};
use crate::data::actions::Action;
use crate::data::predicates::Predicate;
use crate::data::problem::Problem;
use crate::data::{DomainError, ModelEnv, SubstitutionMap};
use crate::planner::graph::{ActionEffectMap, PlanningGraph};
use crate::planner::plans::Plan;

/// Outcome of a search.
#[derive(Clone, Debug)]
pub enum PlanResult {
    /// A complete plan was found.
    Solved { plan: Rc<Plan> },
    /// A resource limit cut the search short; the plan being refined when
    /// it hit, if any, is the best so far.
    Limit { best: Option<Rc<Plan>> },
    /// The search space was exhausted without a solution.
    NoPlan,
}

/// A plan queued by rank: lower lexicographic rank is better and surfaces
/// first.
struct RankedPlan(Rc<Plan>);

impl RankedPlan {
    fn rank(&self) -> &[f32] {
        self.0
            .rank_if_computed()
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

impl PartialEq for RankedPlan {
    fn eq(&self, other: &RankedPlan) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for RankedPlan {}

impl PartialOrd for RankedPlan {
    fn partial_cmp(&self, other: &RankedPlan) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankedPlan {
    fn cmp(&self, other: &RankedPlan) -> CmpOrdering {
        for (a, b) in self.rank().iter().zip(other.rank().iter()) {
            match b.total_cmp(a) {
                CmpOrdering::Equal => continue,
                unequal => return unequal,
            }
        }
        CmpOrdering::Equal
    }
}

/// A planning session: the problem, the derived search structures, and the
/// per-run statistics.
pub struct Planner<'p> {
    pub(crate) params: Parameters,
    pub(crate) problem: &'p Problem,
    pub(crate) graph: Option<PlanningGraph>,
    pub(crate) achieves_pred: BTreeMap<Predicate, ActionEffectMap>,
    pub(crate) achieves_neg_pred: BTreeMap<Predicate, ActionEffectMap>,
    pub(crate) goal_action: Rc<Action>,
    pub(crate) rng: RefCell<StdRng>,
    pub(crate) static_pred_flaw: Cell<bool>,
    num_generated: Cell<usize>,
    num_visited: Cell<usize>,
    num_static: Cell<usize>,
    num_dead_ends: Cell<usize>,
}

impl<'p> Planner<'p> {
    /// Set up a session: build the planning graph if anything needs it and
    /// index achievers by predicate for lifted planning.
    pub fn new(problem: &'p Problem, mut params: Parameters) -> Result<Planner<'p>, DomainError> {
        while params.search_limits.len() < params.flaw_orders.len() {
            params.search_limits.push(usize::MAX);
        }
        let needs_graph = params.ground_actions
            || params.domain_constraints
            || params.heuristic.needs_planning_graph()
            || params.flaw_orders.iter().any(|o| o.needs_planning_graph());
        let graph = if needs_graph {
            Some(PlanningGraph::new(problem, &params)?)
        } else {
            None
        };

        let mut achieves_pred: BTreeMap<Predicate, ActionEffectMap> = BTreeMap::new();
        let mut achieves_neg_pred: BTreeMap<Predicate, ActionEffectMap> = BTreeMap::new();
        if !params.ground_actions {
            for schema in problem.domain().actions().values() {
                for effect in &schema.effects {
                    let target = if effect.literal.negated {
                        &mut achieves_neg_pred
                    } else {
                        &mut achieves_pred
                    };
                    target
                        .entry(effect.literal.predicate())
                        .or_default()
                        .push((Rc::clone(schema), Rc::clone(effect)));
                }
            }
            let init_action = problem.init_action();
            for effect in &init_action.effects {
                achieves_pred
                    .entry(effect.literal.predicate())
                    .or_default()
                    .push((Rc::clone(init_action), Rc::clone(effect)));
            }
            for (_, action) in problem.timed_actions() {
                for effect in &action.effects {
                    let target = if effect.literal.negated {
                        &mut achieves_neg_pred
                    } else {
                        &mut achieves_pred
                    };
                    target
                        .entry(effect.literal.predicate())
                        .or_default()
                        .push((Rc::clone(action), Rc::clone(effect)));
                }
            }
        }

        let goal_action = if params.ground_actions {
            let mut action = Action::ground(problem.domain().fresh_action_id(), "<goal>", false);
            action.set_condition(problem.goal().instantiate(&SubstitutionMap::new(), problem));
            Rc::new(action)
        } else {
            let mut action = Action::schema(problem.domain().fresh_action_id(), "<goal>", false);
            action.set_condition(Rc::clone(problem.goal()));
            Rc::new(action)
        };

        let rng = RefCell::new(StdRng::seed_from_u64(params.seed));
        Ok(Planner {
            params,
            problem,
            graph,
            achieves_pred,
            achieves_neg_pred,
            goal_action,
            rng,
            static_pred_flaw: Cell::new(false),
            num_generated: Cell::new(0),
            num_visited: Cell::new(0),
            num_static: Cell::new(0),
            num_dead_ends: Cell::new(0),
        })
    }

    pub fn problem(&self) -> &Problem {
        self.problem
    }

    /// (generated, visited, dead ends) counts of the last search.
    pub fn stats(&self) -> (usize, usize, usize) {
        (
            self.num_generated.get(),
            self.num_visited.get(),
            self.num_dead_ends.get(),
        )
    }

    pub(crate) fn env(&self) -> ModelEnv<'_> {
        self.problem.env()
    }

    fn bump(&self, cell: &Cell<usize>) {
        cell.set(cell.get() + 1);
    }

    /// Search plan space for a complete plan.
    pub fn search(&self) -> Result<PlanResult, DomainError> {
        let started = Instant::now();
        let deadline = self.params.time_limit.map(|m| Duration::from_secs(m * 60));
        let num_orders = self.params.flaw_orders.len();
        let mut generated_plans = vec![0usize; num_orders];
        let mut queues: Vec<BinaryHeap<RankedPlan>> =
            (0..num_orders).map(|_| BinaryHeap::new()).collect();

        let initial_plan = match self.make_initial_plan()? {
            Some(plan) => plan,
            None => return Ok(PlanResult::NoPlan),
        };
        initial_plan.set_serial(0);

        let mut current_flaw_order = 0usize;
        let mut flaw_orders_left = num_orders;
        let mut next_switch = 1000usize;
        let mut current_plan = Some(Rc::clone(&initial_plan));
        generated_plans[current_flaw_order] += 1;
        self.bump(&self.num_generated);
        let mut f_limit = if self.params.search_algorithm == SearchAlgorithm::IdaStar {
            initial_plan.primary_rank(self)
        } else {
            f32::INFINITY
        };

        loop {
            let mut next_f_limit = f32::INFINITY;
            while let Some(plan) = current_plan.clone() {
                if plan.is_complete() {
                    break;
                }
                if let Some(deadline) = deadline {
                    if started.elapsed() >= deadline {
                        info!("time limit reached");
                        return Ok(PlanResult::Limit { best: current_plan });
                    }
                }
                self.bump(&self.num_visited);
                debug!(
                    serial = plan.serial(),
                    rank = plan.primary_rank(self),
                    open_conds = plan.num_open_conds,
                    unsafes = plan.num_unsafes,
                    "visiting plan"
                );

                let children = self.refinements(&plan, &self.params.flaw_orders[current_flaw_order])?;
                if self.params.search_algorithm == SearchAlgorithm::HillClimbing {
                    // Keep only the best child of the current plan.
                    queues[current_flaw_order].clear();
                }
                let mut added = false;
                for child in children {
                    child.set_serial(self.num_generated.get());
                    let rank = child.primary_rank(self);
                    if rank.is_finite()
                        && generated_plans[current_flaw_order]
                            < self.params.search_limits[current_flaw_order]
                    {
                        if self.params.search_algorithm == SearchAlgorithm::IdaStar
                            && rank > f_limit
                        {
                            next_f_limit = next_f_limit.min(rank);
                            continue;
                        }
                        if !added && self.static_pred_flaw.get() {
                            self.bump(&self.num_static);
                        }
                        added = true;
                        queues[current_flaw_order].push(RankedPlan(child));
                        generated_plans[current_flaw_order] += 1;
                        self.bump(&self.num_generated);
                    }
                }
                if !added {
                    self.bump(&self.num_dead_ends);
                }

                // Round-robin over flaw orders; an exhausted order is
                // abandoned, and the switch budget doubles per cycle.
                let limit_reached = generated_plans[current_flaw_order]
                    >= self.params.search_limits[current_flaw_order];
                if limit_reached || generated_plans[current_flaw_order] >= next_switch {
                    if limit_reached {
                        flaw_orders_left -= 1;
                        queues[current_flaw_order].clear();
                    }
                    if flaw_orders_left > 0 {
                        loop {
                            current_flaw_order += 1;
                            if current_flaw_order >= num_orders {
                                current_flaw_order = 0;
                                next_switch *= 2;
                            }
                            if generated_plans[current_flaw_order]
                                < self.params.search_limits[current_flaw_order]
                            {
                                break;
                            }
                        }
                    }
                }
                if flaw_orders_left == 0 {
                    if next_f_limit.is_finite() {
                        current_plan = None;
                    }
                    break;
                }
                if generated_plans[current_flaw_order] == 0 {
                    current_plan = Some(Rc::clone(&initial_plan));
                    generated_plans[current_flaw_order] += 1;
                    self.bump(&self.num_generated);
                } else {
                    current_plan = queues[current_flaw_order].pop().map(|r| r.0);
                }

                // Force full instantiation of an otherwise complete plan
                // when planning with lifted actions.
                let mut instantiated = self.params.ground_actions;
                while let Some(plan) = current_plan.clone() {
                    if !plan.is_complete() || instantiated {
                        break;
                    }
                    match self.step_instantiation(&plan.steps, 0, Rc::clone(&plan.bindings)) {
                        Some(bindings) => {
                            instantiated = true;
                            if !Rc::ptr_eq(&bindings, &plan.bindings) {
                                let ground = Plan::make(
                                    plan.steps.clone(),
                                    plan.num_steps,
                                    plan.links.clone(),
                                    plan.num_links,
                                    Rc::clone(&plan.orderings),
                                    bindings,
                                    None,
                                    0,
                                    None,
                                    0,
                                    None,
                                );
                                ground.set_serial(plan.serial());
                                current_plan = Some(ground);
                            }
                        }
                        None => {
                            current_plan = queues[current_flaw_order].pop().map(|r| r.0);
                        }
                    }
                }
            }
            if let Some(plan) = &current_plan {
                if plan.is_complete() {
                    debug!(
                        generated = self.num_generated.get(),
                        visited = self.num_visited.get(),
                        dead_ends = self.num_dead_ends.get(),
                        "search finished"
                    );
                    return Ok(PlanResult::Solved { plan: Rc::clone(plan) });
                }
            }
            f_limit = next_f_limit;
            if !f_limit.is_finite() {
                break;
            }
            // Iterative deepening: restart with the next threshold.
            current_plan = Some(Rc::clone(&initial_plan));
        }
        debug!(
            generated = self.num_generated.get(),
            visited = self.num_visited.get(),
            dead_ends = self.num_dead_ends.get(),
            "search exhausted"
        );
        Ok(PlanResult::NoPlan)
    }
}

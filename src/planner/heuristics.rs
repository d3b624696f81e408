use std::collections::BTreeMap;
use std::rc::Rc;
use std::str::FromStr;

use rand::Rng;
use tracing::trace;

use crate::config::ConfigError;
use crate::data::chain::Chain;
use crate::data::formulas::{Formula, FormulaTime};
use crate::data::DomainError;
use crate::planner::flaws::Flaw;
use crate::planner::graph::HeuristicValue;
use crate::planner::orderings::{condition_start_time, effect_time, StepPoint, StepTime};
use crate::planner::plans::Plan;
use crate::planner::search::Planner;

/// A primitive plan rank.
///
/// LIFO/FIFO rank by creation order; OC, UC, BUC, S+OC, and UCPOP count
/// flaws; the ADD family sums additive planning-graph costs over open
/// conditions (R variants credit reuse); MAKESPAN ranks by the temporal
/// schedule.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum RankComponent {
    Lifo,
    Fifo,
    OpenConditions,
    UnsafeLinks,
    BinaryUnsafeLinks,
    StepsPlusOpenConditions,
    Ucpop,
    Add,
    AddCost,
    AddWork,
    AddReuse,
    AddReuseCost,
    AddReuseWork,
    Makespan,
}

/// A plan ranking heuristic: a slash-separated list of primitive ranks
/// compared lexicographically.
#[derive(Clone, Debug, PartialEq)]
pub struct Heuristic {
    components: Vec<RankComponent>,
    needs_graph: bool,
}

impl Default for Heuristic {
    fn default() -> Heuristic {
        "UCPOP".parse().expect("default heuristic parses")
    }
}

impl FromStr for Heuristic {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Heuristic, ConfigError> {
        let mut components = Vec::new();
        let mut needs_graph = false;
        for key in name.split('/') {
            let component = match key.to_ascii_uppercase().as_str() {
                "LIFO" => RankComponent::Lifo,
                "FIFO" => RankComponent::Fifo,
                "OC" => RankComponent::OpenConditions,
                "UC" => RankComponent::UnsafeLinks,
                "BUC" => RankComponent::BinaryUnsafeLinks,
                "S+OC" => RankComponent::StepsPlusOpenConditions,
                "UCPOP" => RankComponent::Ucpop,
                "ADD" => RankComponent::Add,
                "ADD_COST" => RankComponent::AddCost,
                "ADD_WORK" => RankComponent::AddWork,
                "ADDR" => RankComponent::AddReuse,
                "ADDR_COST" => RankComponent::AddReuseCost,
                "ADDR_WORK" => RankComponent::AddReuseWork,
                "MAKESPAN" => RankComponent::Makespan,
                _ => return Err(ConfigError::InvalidHeuristic(name.to_string())),
            };
            needs_graph |= matches!(
                component,
                RankComponent::Add
                    | RankComponent::AddCost
                    | RankComponent::AddWork
                    | RankComponent::AddReuse
                    | RankComponent::AddReuseCost
                    | RankComponent::AddReuseWork
                    | RankComponent::Makespan
            );
            components.push(component);
        }
        if components.is_empty() {
            return Err(ConfigError::InvalidHeuristic(name.to_string()));
        }
        Ok(Heuristic { components, needs_graph })
    }
}

impl Heuristic {
    pub fn needs_planning_graph(&self) -> bool {
        self.needs_graph
    }
}

impl Planner<'_> {
    /// The heuristic value of a formula in the context of a plan. With
    /// `reuse`, a literal some existing step can still support is free.
    pub(crate) fn formula_value(
        &self,
        plan: &Plan,
        formula: &Rc<Formula>,
        step_id: usize,
        reuse: bool,
    ) -> (HeuristicValue, HeuristicValue) {
        let bindings = self.heuristic_bindings(&plan.bindings);
        if reuse {
            if let Some((literal, when)) = formula.timed_literal() {
                let gt = condition_start_time(when);
                let env = self.env();
                if !self
                    .problem
                    .domain()
                    .predicates()
                    .is_static(literal.predicate())
                {
                    for step in Chain::iter(&plan.steps) {
                        if step.id == 0
                            || !plan.orderings.possibly_before(
                                step.id,
                                StepTime::AT_START,
                                step_id,
                                gt,
                            )
                        {
                            continue;
                        }
                        for effect in &step.action.effects {
                            let et = effect_time(effect);
                            if !plan.orderings.possibly_before(step.id, et, step_id, gt) {
                                continue;
                            }
                            if effect.literal.negated != literal.negated {
                                continue;
                            }
                            let supported = match bindings {
                                Some(b) => {
                                    let mut mgu = Vec::new();
                                    b.unify(
                                        &mut mgu,
                                        &literal,
                                        step_id,
                                        &effect.literal,
                                        step.id,
                                        &env,
                                    )
                                }
                                None => literal == effect.literal,
                            };
                            if supported {
                                let h = HeuristicValue::ZERO_COST_UNIT_WORK;
                                let hs = if when != FormulaTime::AtEnd {
                                    HeuristicValue::ZERO_COST_UNIT_WORK
                                } else {
                                    HeuristicValue::ZERO
                                };
                                return (h, hs);
                            }
                        }
                    }
                }
            } else {
                match formula.as_ref() {
                    Formula::Disjunction(fs) => {
                        let mut h = HeuristicValue::INFINITE;
                        let mut hs = HeuristicValue::INFINITE;
                        for f in fs {
                            let (hi, hsi) = self.formula_value(plan, f, step_id, true);
                            h = HeuristicValue::min(h, hi);
                            hs = HeuristicValue::min(hs, hsi);
                        }
                        return (h, hs);
                    }
                    Formula::Conjunction(fs) => {
                        let mut h = HeuristicValue::ZERO;
                        let mut hs = HeuristicValue::ZERO;
                        for f in fs {
                            let (hi, hsi) = self.formula_value(plan, f, step_id, true);
                            h.add(&hi);
                            hs.add(&hsi);
                        }
                        return (h, hs);
                    }
                    Formula::Exists(q) => {
                        return self.formula_value(plan, &q.body, step_id, true);
                    }
                    Formula::Forall(_, _) => {
                        let base = formula.universal_base(&Default::default(), self.problem);
                        return self.formula_value(plan, &base, step_id, true);
                    }
                    _ => {}
                }
            }
        }
        match &self.graph {
            Some(graph) => graph.formula_values(formula, step_id, bindings, self.problem),
            None => (HeuristicValue::ZERO, HeuristicValue::ZERO),
        }
    }

    /// Fill the rank vector for a plan; lower is better, compared
    /// lexicographically.
    pub(crate) fn plan_rank(&self, plan: &Plan) -> Vec<f32> {
        let weight = self.params.weight;
        let mut rank = Vec::new();
        let mut add: Option<(f32, i32)> = None;
        let mut add_reuse: Option<(f32, i32)> = None;
        for component in &self.params.heuristic.components {
            match component {
                RankComponent::Lifo => rank.push(-(plan.serial() as f32)),
                RankComponent::Fifo => rank.push(plan.serial() as f32),
                RankComponent::OpenConditions => rank.push(plan.num_open_conds as f32),
                RankComponent::UnsafeLinks => rank.push(plan.num_unsafes as f32),
                RankComponent::BinaryUnsafeLinks => {
                    rank.push(if plan.num_unsafes > 0 { 1.0 } else { 0.0 })
                }
                RankComponent::StepsPlusOpenConditions => {
                    rank.push(plan.num_steps as f32 + weight * plan.num_open_conds as f32)
                }
                RankComponent::Ucpop => rank.push(
                    plan.num_steps as f32
                        + weight * (plan.num_open_conds + plan.num_unsafes) as f32,
                ),
                RankComponent::Add | RankComponent::AddCost | RankComponent::AddWork => {
                    let (cost, work) =
                        *add.get_or_insert_with(|| self.additive_values(plan, false));
                    rank.push(self.additive_rank(*component, plan, cost, work));
                }
                RankComponent::AddReuse
                | RankComponent::AddReuseCost
                | RankComponent::AddReuseWork => {
                    let (cost, work) =
                        *add_reuse.get_or_insert_with(|| self.additive_values(plan, true));
                    rank.push(self.additive_rank(*component, plan, cost, work));
                }
                RankComponent::Makespan => {
                    let mut min_times: BTreeMap<(usize, StepPoint), f32> = BTreeMap::new();
                    for open_cond in Chain::iter(&plan.open_conds) {
                        let (v, vs) = self.formula_value(
                            plan,
                            &open_cond.condition,
                            open_cond.step_id,
                            false,
                        );
                        let start = min_times
                            .entry((open_cond.step_id, StepPoint::Start))
                            .or_insert(0.0);
                        *start = start.max(weight * vs.makespan);
                        let end = min_times
                            .entry((open_cond.step_id, StepPoint::End))
                            .or_insert(0.0);
                        *end = end.max(weight * v.makespan);
                    }
                    rank.push(plan.orderings.makespan(&min_times));
                }
            }
        }
        rank
    }

    fn additive_values(&self, plan: &Plan, reuse: bool) -> (f32, i32) {
        let mut cost = 0.0f32;
        let mut work = 0i32;
        for open_cond in Chain::iter(&plan.open_conds) {
            let (v, _) = self.formula_value(plan, &open_cond.condition, open_cond.step_id, reuse);
            cost += v.add_cost;
            work = work.saturating_add(v.add_work);
        }
        (cost, work)
    }

    fn additive_rank(&self, component: RankComponent, plan: &Plan, cost: f32, work: i32) -> f32 {
        match component {
            RankComponent::Add | RankComponent::AddReuse => {
                if cost.is_finite() {
                    plan.num_steps as f32 + self.params.weight * cost
                } else {
                    f32::INFINITY
                }
            }
            RankComponent::AddCost | RankComponent::AddReuseCost => {
                if cost.is_finite() {
                    cost
                } else {
                    f32::INFINITY
                }
            }
            _ => {
                if work < i32::MAX {
                    work as f32
                } else {
                    f32::INFINITY
                }
            }
        }
    }
}

/// How a selection criterion orders the flaws it matches.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OrderType {
    Lifo,
    Fifo,
    Random,
    LeastRefinements,
    MostRefinements,
    New,
    Reuse,
    LeastCost,
    MostCost,
    LeastWork,
    MostWork,
}

/// Heuristic used by cost/work-ranking criteria.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RankHeuristic {
    Add,
    Makespan,
}

/// One entry of a flaw selection order: the flaw kinds it matches, a cap on
/// refinements, and the strategy that picks among matches.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionCriterion {
    non_separable: bool,
    separable: bool,
    open_cond: bool,
    local_open_cond: bool,
    static_open_cond: bool,
    unsafe_open_cond: bool,
    max_refinements: i32,
    order: OrderType,
    heuristic: RankHeuristic,
    reuse: bool,
}

impl SelectionCriterion {
    fn new() -> SelectionCriterion {
        SelectionCriterion {
            non_separable: false,
            separable: false,
            open_cond: false,
            local_open_cond: false,
            static_open_cond: false,
            unsafe_open_cond: false,
            max_refinements: i32::MAX,
            order: OrderType::Lifo,
            heuristic: RankHeuristic::Add,
            reuse: false,
        }
    }
}

/// An ordered list of selection criteria; earlier criteria dominate and
/// later ones only break ties.
#[derive(Clone, Debug, PartialEq)]
pub struct FlawSelectionOrder {
    criteria: Vec<SelectionCriterion>,
    needs_graph: bool,
    first_unsafe_criterion: i32,
    last_unsafe_criterion: i32,
    first_open_cond_criterion: i32,
    last_open_cond_criterion: i32,
}

impl Default for FlawSelectionOrder {
    fn default() -> FlawSelectionOrder {
        "UCPOP".parse().expect("default flaw selection order parses")
    }
}

/// Well-known selection orders from the planning literature, expanded to
/// criterion strings.
fn named_order(name: &str) -> Option<&'static str> {
    let expansion = match name.to_ascii_uppercase().as_str() {
        "UCPOP" => "{n,s}LIFO/{o}LIFO",
        "UCPOP-LC" => "{n,s}LIFO/{o}LR",
        "DSEP-LIFO" => "{n}LIFO/{o}LIFO/{s}LIFO",
        "DSEP-FIFO" => "{n}LIFO/{o}FIFO/{s}LIFO",
        "DSEP-LC" => "{n}LIFO/{o}LR/{s}LIFO",
        "DUNF-LIFO" => "{n,s}0LIFO/{n,s}1LIFO/{o}LIFO/{n,s}LIFO",
        "DUNF-FIFO" => "{n,s}0LIFO/{n,s}1LIFO/{o}FIFO/{n,s}LIFO",
        "DUNF-LC" => "{n,s}0LIFO/{n,s}1LIFO/{o}LR/{n,s}LIFO",
        "DUNF-GEN" => "{n,s,o}0LIFO/{n,s,o}1LIFO/{n,s,o}LIFO",
        "DRES-LIFO" => "{n,s}0LIFO/{o}LIFO/{n,s}LIFO",
        "DRES-FIFO" => "{n,s}0LIFO/{o}FIFO/{n,s}LIFO",
        "DRES-LC" => "{n,s}0LIFO/{o}LR/{n,s}LIFO",
        "DEND-LIFO" => "{o}LIFO/{n,s}LIFO",
        "DEND-FIFO" => "{o}FIFO/{n,s}LIFO",
        "DEND-LC" => "{o}LR/{n,s}LIFO",
        "LCFR" => "{n,s,o}LR",
        "LCFR-DSEP" => "{n,o}LR/{s}LR",
        "ZLIFO" => "{n}LIFO/{o}0LIFO/{o}1NEW/{o}LIFO/{s}LIFO",
        "ZLIFO*" => "{o}0LIFO/{n,s}LIFO/{o}1NEW/{o}LIFO",
        "STATIC" => "{t}LIFO/{n,s}LIFO/{o}LIFO",
        "LCFR-LOC" => "{n,s,l}LR",
        "LCFR-CONF" => "{n,s,u}LR/{o}LR",
        "LCFR-LOC-CONF" => "{n,s,u}LR/{l}LR",
        "MC" => "{n,s}LR/{o}MC_ADD",
        "MC-LOC" => "{n,s}LR/{l}MC_ADD",
        "MC-LOC-CONF" => "{n,s}LR/{u}MC_ADD/{l}MC_ADD",
        "MW" => "{n,s}LR/{o}MW_ADD",
        "MW-LOC" => "{n,s}LR/{l}MW_ADD",
        "MW-LOC-CONF" => "{n,s}LR/{u}MW_ADD/{l}MW_ADD",
        _ => return None,
    };
    Some(expansion)
}

impl FromStr for FlawSelectionOrder {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<FlawSelectionOrder, ConfigError> {
        if let Some(expansion) = named_order(name) {
            return expansion.parse();
        }
        let err = || ConfigError::InvalidFlawSelectionOrder(name.to_string());
        let mut order = FlawSelectionOrder {
            criteria: Vec::new(),
            needs_graph: false,
            first_unsafe_criterion: i32::MAX,
            last_unsafe_criterion: -1,
            first_open_cond_criterion: i32::MAX,
            last_open_cond_criterion: -1,
        };
        let mut non_separable_max = -1i64;
        let mut separable_max = -1i64;
        let mut open_cond_max = -1i64;
        for spec in name.split('/') {
            let rest = spec.strip_prefix('{').ok_or_else(err)?;
            let (kinds, rest) = rest.split_once('}').ok_or_else(err)?;
            let mut criterion = SelectionCriterion::new();
            let index = order.criteria.len() as i32;
            for kind in kinds.split(',') {
                match kind {
                    "n" => {
                        criterion.non_separable = true;
                        order.mark_unsafe_criterion(index);
                    }
                    "s" => {
                        criterion.separable = true;
                        order.mark_unsafe_criterion(index);
                    }
                    "o" => {
                        criterion.open_cond = true;
                        criterion.local_open_cond = false;
                        criterion.static_open_cond = false;
                        criterion.unsafe_open_cond = false;
                        order.mark_open_cond_criterion(index);
                    }
                    "l" => {
                        if !criterion.open_cond {
                            criterion.local_open_cond = true;
                            order.mark_open_cond_criterion(index);
                        }
                    }
                    "t" => {
                        if !criterion.open_cond {
                            criterion.static_open_cond = true;
                            order.mark_open_cond_criterion(index);
                        }
                    }
                    "u" => {
                        if !criterion.open_cond {
                            criterion.unsafe_open_cond = true;
                            order.mark_open_cond_criterion(index);
                        }
                    }
                    _ => return Err(err()),
                }
            }
            let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
            if digits > 0 {
                criterion.max_refinements = rest[..digits].parse().map_err(|_| err())?;
            }
            let strategy = &rest[digits..];
            match strategy.to_ascii_uppercase().as_str() {
                "LIFO" => criterion.order = OrderType::Lifo,
                "FIFO" => criterion.order = OrderType::Fifo,
                "R" => criterion.order = OrderType::Random,
                "LR" => criterion.order = OrderType::LeastRefinements,
                "MR" => criterion.order = OrderType::MostRefinements,
                other => {
                    if criterion.non_separable || criterion.separable {
                        // Threats admit no other strategies.
                        return Err(err());
                    }
                    match other {
                        "NEW" => criterion.order = OrderType::New,
                        "REUSE" => criterion.order = OrderType::Reuse,
                        _ => {
                            let (order_type, heuristic) = other.split_once('_').ok_or_else(err)?;
                            criterion.order = match order_type {
                                "LC" => OrderType::LeastCost,
                                "MC" => OrderType::MostCost,
                                "LW" => OrderType::LeastWork,
                                "MW" => OrderType::MostWork,
                                _ => return Err(err()),
                            };
                            order.needs_graph = true;
                            match heuristic {
                                "ADD" => {
                                    criterion.heuristic = RankHeuristic::Add;
                                    criterion.reuse = false;
                                }
                                "ADDR" => {
                                    criterion.heuristic = RankHeuristic::Add;
                                    criterion.reuse = true;
                                }
                                "MAKESPAN"
                                    if matches!(
                                        criterion.order,
                                        OrderType::LeastCost | OrderType::MostCost
                                    ) =>
                                {
                                    criterion.heuristic = RankHeuristic::Makespan;
                                    criterion.reuse = false;
                                }
                                _ => return Err(err()),
                            }
                        }
                    }
                }
            }
            if criterion.non_separable {
                non_separable_max = non_separable_max.max(criterion.max_refinements as i64);
            }
            if criterion.separable {
                separable_max = separable_max.max(criterion.max_refinements as i64);
            }
            if criterion.open_cond || criterion.local_open_cond {
                open_cond_max = open_cond_max.max(criterion.max_refinements as i64);
            }
            order.criteria.push(criterion);
        }
        // Every flaw kind needs at least one uncapped criterion, or the
        // order could leave flaws unselectable.
        let complete = i32::MAX as i64;
        if non_separable_max < complete || separable_max < complete || open_cond_max < complete {
            return Err(err());
        }
        Ok(order)
    }
}

/// The incumbent during one selection pass.
struct FlawSelection {
    flaw: Option<Flaw>,
    criterion: i32,
    rank: f32,
    streak: i32,
}

impl FlawSelectionOrder {
    fn mark_unsafe_criterion(&mut self, index: i32) {
        if self.first_unsafe_criterion > self.last_unsafe_criterion {
            self.first_unsafe_criterion = index;
        }
        self.last_unsafe_criterion = index;
    }

    fn mark_open_cond_criterion(&mut self, index: i32) {
        if self.first_open_cond_criterion > self.last_open_cond_criterion {
            self.first_open_cond_criterion = index;
        }
        self.last_open_cond_criterion = index;
    }

    pub fn needs_planning_graph(&self) -> bool {
        self.needs_graph
    }

    /// Select the flaw to repair next.
    pub(crate) fn select(&self, planner: &Planner, plan: &Plan) -> Result<Flaw, DomainError> {
        let mut selection =
            FlawSelection { flaw: None, criterion: i32::MAX, rank: 0.0, streak: 1 };
        let last_criterion = self.select_unsafe(
            planner,
            plan,
            &mut selection,
            self.first_unsafe_criterion,
            self.last_unsafe_criterion,
        );
        self.select_open_cond(
            planner,
            plan,
            &mut selection,
            self.first_open_cond_criterion,
            self.last_open_cond_criterion.min(last_criterion),
        )?;
        if let Some(flaw) = selection.flaw {
            return Ok(flaw);
        }
        match &plan.mutex_threats {
            Some(chain) => Ok(Flaw::Mutex(chain.head().clone())),
            None => unreachable!("flaw selection on a complete plan"),
        }
    }

    /// Scan threats against the criteria in `[first, last]`, narrowing the
    /// window as flaws are selected. Returns the last criterion later
    /// passes may still use.
    fn select_unsafe(
        &self,
        planner: &Planner,
        plan: &Plan,
        selection: &mut FlawSelection,
        first_criterion: i32,
        mut last_criterion: i32,
    ) -> i32 {
        if first_criterion > last_criterion || plan.unsafes.is_none() {
            return i32::MAX;
        }
        for unsafe_link in Chain::iter(&plan.unsafes) {
            if first_criterion > last_criterion {
                break;
            }
            let mut refinements = -1;
            let mut separable = -1;
            let mut promotable = -1;
            let mut demotable = -1;
            for c in first_criterion..=self.last_unsafe_criterion {
                // The window narrows as better flaws are found.
                if c > last_criterion {
                    break;
                }
                let criterion = &self.criteria[c as usize];
                if !criterion.applies_to_unsafe() {
                    continue;
                }
                if criterion.non_separable != criterion.separable && separable < 0 {
                    separable = planner.is_separable(plan, unsafe_link);
                }
                let matches = (criterion.non_separable && criterion.separable)
                    || (criterion.separable && separable > 0)
                    || (criterion.non_separable && separable == 0);
                if !matches {
                    continue;
                }
                if criterion.max_refinements < 3
                    && !planner.unsafe_refinements(
                        plan,
                        &mut refinements,
                        &mut separable,
                        &mut promotable,
                        &mut demotable,
                        unsafe_link,
                        criterion.max_refinements,
                    )
                {
                    continue;
                }
                match criterion.order {
                    OrderType::Lifo => {
                        selection.select(Flaw::Threat(unsafe_link.clone()), c, 0.0);
                        last_criterion = c - 1;
                        trace!(criterion = c, "threat selected by LIFO");
                    }
                    OrderType::Fifo => {
                        selection.select(Flaw::Threat(unsafe_link.clone()), c, 0.0);
                        last_criterion = c;
                    }
                    OrderType::Random => {
                        if c == selection.criterion {
                            selection.streak += 1;
                        } else {
                            selection.streak = 1;
                        }
                        let accept = planner.rng.borrow_mut().gen::<f64>()
                            < 1.0 / selection.streak as f64;
                        if accept {
                            let streak = selection.streak;
                            selection.select(Flaw::Threat(unsafe_link.clone()), c, 0.0);
                            selection.streak = streak;
                            last_criterion = c;
                        }
                    }
                    OrderType::LeastRefinements => {
                        let better_criterion = c < selection.criterion
                            || planner.unsafe_refinements(
                                plan,
                                &mut refinements,
                                &mut separable,
                                &mut promotable,
                                &mut demotable,
                                unsafe_link,
                                (selection.rank + 0.5) as i32 - 1,
                            );
                        if better_criterion {
                            planner.unsafe_refinements(
                                plan,
                                &mut refinements,
                                &mut separable,
                                &mut promotable,
                                &mut demotable,
                                unsafe_link,
                                i32::MAX,
                            );
                            selection.select(
                                Flaw::Threat(unsafe_link.clone()),
                                c,
                                refinements as f32,
                            );
                            last_criterion = if refinements == 0 { c - 1 } else { c };
                        }
                    }
                    OrderType::MostRefinements => {
                        planner.unsafe_refinements(
                            plan,
                            &mut refinements,
                            &mut separable,
                            &mut promotable,
                            &mut demotable,
                            unsafe_link,
                            i32::MAX,
                        );
                        if c < selection.criterion || refinements as f32 > selection.rank {
                            selection.select(
                                Flaw::Threat(unsafe_link.clone()),
                                c,
                                refinements as f32,
                            );
                            last_criterion = if refinements == 3 { c - 1 } else { c };
                        }
                    }
                    // No other strategies apply to threats.
                    _ => {}
                }
            }
        }
        last_criterion
    }

    /// Scan open conditions against the criteria in `[first, last]`.
    fn select_open_cond(
        &self,
        planner: &Planner,
        plan: &Plan,
        selection: &mut FlawSelection,
        first_criterion: i32,
        mut last_criterion: i32,
    ) -> Result<(), DomainError> {
        if first_criterion > last_criterion || plan.open_conds.is_none() {
            return Ok(());
        }
        let initial_last = last_criterion;
        let mut local_id = 0usize;
        for open_cond in Chain::iter(&plan.open_conds) {
            if first_criterion > last_criterion {
                break;
            }
            if local_id == 0 {
                local_id = open_cond.step_id;
            }
            let local = open_cond.step_id == local_id;
            let mut is_static = -1;
            let mut is_unsafe = -1;
            let mut refinements = -1;
            let mut addable = -1;
            let mut reusable = -1;
            for c in first_criterion..=initial_last {
                // The window narrows as better flaws are found.
                if c > last_criterion {
                    break;
                }
                let criterion = &self.criteria[c as usize];
                if !criterion.applies_to_open_cond() {
                    continue;
                }
                if criterion.local_open_cond
                    && !local
                    && !criterion.static_open_cond
                    && !criterion.unsafe_open_cond
                {
                    if c == last_criterion {
                        last_criterion -= 1;
                    }
                    continue;
                }
                if criterion.static_open_cond && is_static < 0 {
                    is_static = i32::from(
                        open_cond.is_static(planner.problem.domain().predicates()),
                    );
                }
                if criterion.unsafe_open_cond && is_unsafe < 0 {
                    is_unsafe =
                        i32::from(planner.is_unsafe_open_condition(plan, open_cond));
                }
                let matches = criterion.open_cond
                    || (criterion.local_open_cond && local)
                    || (criterion.static_open_cond && is_static > 0)
                    || (criterion.unsafe_open_cond && is_unsafe > 0);
                if !matches {
                    continue;
                }
                if criterion.max_refinements != i32::MAX
                    && !planner.open_cond_refinements(
                        plan,
                        &mut refinements,
                        &mut addable,
                        &mut reusable,
                        open_cond,
                        criterion.max_refinements,
                    )?
                {
                    continue;
                }
                match criterion.order {
                    OrderType::Lifo => {
                        selection.select(Flaw::OpenCond(open_cond.clone()), c, 0.0);
                        last_criterion = c - 1;
                    }
                    OrderType::Fifo => {
                        selection.select(Flaw::OpenCond(open_cond.clone()), c, 0.0);
                        last_criterion = c;
                    }
                    OrderType::Random => {
                        if c == selection.criterion {
                            selection.streak += 1;
                        } else {
                            selection.streak = 1;
                        }
                        let accept = planner.rng.borrow_mut().gen::<f64>()
                            < 1.0 / selection.streak as f64;
                        if accept {
                            let streak = selection.streak;
                            selection.select(Flaw::OpenCond(open_cond.clone()), c, 0.0);
                            selection.streak = streak;
                            last_criterion = c;
                        }
                    }
                    OrderType::LeastRefinements => {
                        let better = c < selection.criterion
                            || planner.open_cond_refinements(
                                plan,
                                &mut refinements,
                                &mut addable,
                                &mut reusable,
                                open_cond,
                                (selection.rank + 0.5) as i32 - 1,
                            )?;
                        if better {
                            planner.open_cond_refinements(
                                plan,
                                &mut refinements,
                                &mut addable,
                                &mut reusable,
                                open_cond,
                                i32::MAX,
                            )?;
                            selection.select(
                                Flaw::OpenCond(open_cond.clone()),
                                c,
                                refinements as f32,
                            );
                            last_criterion = if refinements == 0 { c - 1 } else { c };
                        }
                    }
                    OrderType::MostRefinements => {
                        planner.open_cond_refinements(
                            plan,
                            &mut refinements,
                            &mut addable,
                            &mut reusable,
                            open_cond,
                            i32::MAX,
                        )?;
                        if c < selection.criterion || refinements as f32 > selection.rank {
                            selection.select(
                                Flaw::OpenCond(open_cond.clone()),
                                c,
                                refinements as f32,
                            );
                            last_criterion = c;
                        }
                    }
                    OrderType::New => {
                        let has_new = if addable < 0 {
                            match open_cond.literal() {
                                Some(literal) => !planner.addable_steps(
                                    plan,
                                    &mut addable,
                                    &literal,
                                    open_cond,
                                    0,
                                )?,
                                None => false,
                            }
                        } else {
                            addable > 0
                        };
                        if has_new || c < selection.criterion {
                            selection.select(Flaw::OpenCond(open_cond.clone()), c, 0.0);
                            last_criterion = if has_new { c - 1 } else { c };
                        }
                    }
                    OrderType::Reuse => {
                        let has_reuse = if reusable < 0 {
                            match open_cond.literal() {
                                Some(literal) => !planner.reusable_steps(
                                    plan,
                                    &mut reusable,
                                    &literal,
                                    open_cond,
                                    0,
                                )?,
                                None => false,
                            }
                        } else {
                            reusable > 0
                        };
                        if has_reuse || c < selection.criterion {
                            selection.select(Flaw::OpenCond(open_cond.clone()), c, 0.0);
                            last_criterion = if has_reuse { c - 1 } else { c };
                        }
                    }
                    OrderType::LeastCost | OrderType::MostCost => {
                        let (h, _) = planner.formula_value(
                            plan,
                            &open_cond.condition,
                            open_cond.step_id,
                            criterion.reuse,
                        );
                        let rank = match (criterion.order, criterion.heuristic) {
                            (OrderType::LeastCost, RankHeuristic::Add) => h.add_cost,
                            (OrderType::LeastCost, RankHeuristic::Makespan) => h.makespan,
                            (_, RankHeuristic::Add) => h.add_cost,
                            (_, RankHeuristic::Makespan) => h.makespan + 0.5,
                        };
                        let better = if criterion.order == OrderType::LeastCost {
                            c < selection.criterion || rank < selection.rank
                        } else {
                            c < selection.criterion || rank > selection.rank
                        };
                        if better {
                            selection.select(Flaw::OpenCond(open_cond.clone()), c, rank);
                            last_criterion =
                                if criterion.order == OrderType::LeastCost && rank == 0.0 {
                                    c - 1
                                } else {
                                    c
                                };
                        }
                    }
                    OrderType::LeastWork | OrderType::MostWork => {
                        let (h, _) = planner.formula_value(
                            plan,
                            &open_cond.condition,
                            open_cond.step_id,
                            criterion.reuse,
                        );
                        let rank = h.add_work as f32;
                        let better = if criterion.order == OrderType::LeastWork {
                            c < selection.criterion || rank < selection.rank
                        } else {
                            c < selection.criterion || rank > selection.rank
                        };
                        if better {
                            selection.select(Flaw::OpenCond(open_cond.clone()), c, rank);
                            last_criterion =
                                if criterion.order == OrderType::LeastWork && rank == 0.0 {
                                    c - 1
                                } else {
                                    c
                                };
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl SelectionCriterion {
    fn applies_to_unsafe(&self) -> bool {
        self.non_separable || self.separable
    }

    fn applies_to_open_cond(&self) -> bool {
        self.open_cond || self.local_open_cond || self.static_open_cond || self.unsafe_open_cond
    }
}

impl FlawSelection {
    fn select(&mut self, flaw: Flaw, criterion: i32, rank: f32) {
        self.flaw = Some(flaw);
        self.criterion = criterion;
        self.rank = rank;
        self.streak = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::{FlawSelectionOrder, Heuristic, OrderType};
    use crate::config::ConfigError;

    #[test]
    fn heuristic_strings_parse() {
        assert!("UCPOP".parse::<Heuristic>().is_ok());
        assert!("ADD/MAKESPAN".parse::<Heuristic>().unwrap().needs_planning_graph());
        assert!(!"LIFO/OC".parse::<Heuristic>().unwrap().needs_planning_graph());
        assert_eq!(
            "BOGUS".parse::<Heuristic>(),
            Err(ConfigError::InvalidHeuristic("BOGUS".into()))
        );
    }

    #[test]
    fn flaw_order_grammar_parses() {
        let order: FlawSelectionOrder = "{n,s}LIFO/{o}LIFO".parse().unwrap();
        assert_eq!(order.criteria.len(), 2);
        assert!(order.criteria[0].non_separable && order.criteria[0].separable);
        assert!(order.criteria[1].open_cond);
        assert!(!order.needs_planning_graph());
    }

    #[test]
    fn named_orders_expand() {
        let order: FlawSelectionOrder = "UCPOP".parse().unwrap();
        assert_eq!(order.criteria.len(), 2);
        let lcfr: FlawSelectionOrder = "LCFR".parse().unwrap();
        assert_eq!(lcfr.criteria.len(), 1);
        assert_eq!(lcfr.criteria[0].order, OrderType::LeastRefinements);
    }

    #[test]
    fn capped_criteria_parse_their_bound() {
        let order: FlawSelectionOrder = "{n,s}0LIFO/{o}1NEW/{o}LIFO/{n,s}LIFO".parse().unwrap();
        assert_eq!(order.criteria[0].max_refinements, 0);
        assert_eq!(order.criteria[1].max_refinements, 1);
        assert_eq!(order.criteria[1].order, OrderType::New);
    }

    #[test]
    fn incomplete_orders_are_rejected() {
        // No uncapped open-condition criterion.
        assert!("{n,s}LIFO/{o}0LIFO".parse::<FlawSelectionOrder>().is_err());
        // Threats never covered.
        assert!("{o}LIFO".parse::<FlawSelectionOrder>().is_err());
    }

    #[test]
    fn cost_orders_need_a_planning_graph() {
        let order: FlawSelectionOrder = "{n,s}LIFO/{o}LC_ADD".parse().unwrap();
        assert!(order.needs_planning_graph());
        assert!("{n,s}LC_ADD".parse::<FlawSelectionOrder>().is_err());
        assert!("{o}LW_MAKESPAN".parse::<FlawSelectionOrder>().is_err());
    }
}

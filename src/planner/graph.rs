use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::config::{ActionCost, Parameters};
use crate::data::actions::Action;
use crate::data::effects::{Effect, EffectTime};
use crate::data::formulas::{Atom, Formula, FormulaTime, Literal};
use crate::data::predicates::Predicate;
use crate::data::problem::Problem;
use crate::data::terms::Object;
use crate::data::DomainError;
use crate::planner::bindings::{ActionDomain, BindingList, Bindings};
use crate::planner::orderings::THRESHOLD;

/// Cost estimate attached to a reachable literal: additive cost, additive
/// work, and earliest-makespan components.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HeuristicValue {
    pub add_cost: f32,
    pub add_work: i32,
    pub makespan: f32,
}

impl HeuristicValue {
    pub const ZERO: HeuristicValue =
        HeuristicValue { add_cost: 0.0, add_work: 0, makespan: THRESHOLD };
    pub const ZERO_COST_UNIT_WORK: HeuristicValue =
        HeuristicValue { add_cost: 0.0, add_work: 1, makespan: THRESHOLD };
    pub const INFINITE: HeuristicValue = HeuristicValue {
        add_cost: f32::INFINITY,
        add_work: i32::MAX,
        makespan: f32::INFINITY,
    };

    pub fn is_zero(&self) -> bool {
        self.add_cost == 0.0
    }

    pub fn is_infinite(&self) -> bool {
        self.makespan == f32::INFINITY
    }

    /// Componentwise sum; work saturates, makespan takes the maximum.
    pub fn add(&mut self, other: &HeuristicValue) {
        self.add_cost += other.add_cost;
        self.add_work = self.add_work.saturating_add(other.add_work);
        if self.makespan < other.makespan {
            self.makespan = other.makespan;
        }
    }

    pub fn increase_cost(&mut self, x: f32) {
        self.add_cost += x;
    }

    pub fn increment_work(&mut self) {
        self.add_work = self.add_work.saturating_add(1);
    }

    pub fn increase_makespan(&mut self, x: f32) {
        self.makespan += x;
    }

    /// Componentwise minimum; cost is primary and work breaks its ties.
    pub fn min(v1: HeuristicValue, v2: HeuristicValue) -> HeuristicValue {
        let (add_cost, add_work) = if v1.add_cost == v2.add_cost {
            (v1.add_cost, v1.add_work.min(v2.add_work))
        } else if v1.add_cost < v2.add_cost {
            (v1.add_cost, v1.add_work)
        } else {
            (v2.add_cost, v2.add_work)
        };
        HeuristicValue { add_cost, add_work, makespan: v1.makespan.min(v2.makespan) }
    }
}

/// Achievers of a literal: the actions and effects that can assert it.
pub type ActionEffectMap = Vec<(Rc<Action>, Rc<Effect>)>;

fn achiever_recorded(map: &ActionEffectMap, action: &Rc<Action>, effect: &Rc<Effect>) -> bool {
    map.iter()
        .any(|(a, e)| a.id == action.id && Rc::ptr_eq(e, effect))
}

/// Forward reachability graph built once per problem. Literal values settle
/// to a fixpoint; achiever maps and per-action parameter domains accumulate
/// along the way.
#[derive(Debug, Default)]
pub struct PlanningGraph {
    atom_values: BTreeMap<Rc<Atom>, HeuristicValue>,
    negation_values: BTreeMap<Rc<Atom>, HeuristicValue>,
    achievers: BTreeMap<Literal, ActionEffectMap>,
    predicate_atoms: BTreeMap<Predicate, Vec<Rc<Atom>>>,
    predicate_negations: BTreeMap<Predicate, Vec<Rc<Atom>>>,
    action_domains: BTreeMap<String, Rc<ActionDomain>>,
}

impl PlanningGraph {
    pub fn new(problem: &Problem, params: &Parameters) -> Result<PlanningGraph, DomainError> {
        let mut graph = PlanningGraph::default();
        graph.build(problem, params)?;
        Ok(graph)
    }

    fn build(&mut self, problem: &Problem, params: &Parameters) -> Result<(), DomainError> {
        let actions = problem.instantiated_actions()?;
        debug!(count = actions.len(), "instantiated actions");

        // Duration scaling factors for relative action costs.
        let mut duration_factor: BTreeMap<Literal, f32> = BTreeMap::new();
        if params.action_cost == ActionCost::Relative {
            for action in &actions {
                let d = THRESHOLD.max(action.constant_min_duration()?);
                for effect in &action.effects {
                    duration_factor
                        .entry(effect.literal.clone())
                        .and_modify(|f| *f = f.min(d))
                        .or_insert(d);
                }
            }
            for (time, action) in problem.timed_actions() {
                for effect in &action.effects {
                    duration_factor
                        .entry(effect.literal.clone())
                        .and_modify(|f| *f = f.min(*time))
                        .or_insert(*time);
                }
            }
        }

        // Level 0: initial atoms, then timed initial literals at their cost.
        let init_action = Rc::clone(problem.init_action());
        for effect in &init_action.effects {
            let atom = Rc::clone(&effect.literal.atom);
            self.achievers
                .entry(effect.literal.clone())
                .or_default()
                .push((Rc::clone(&init_action), Rc::clone(effect)));
            let value = if problem.domain().predicates().is_static(atom.predicate) {
                HeuristicValue::ZERO
            } else {
                HeuristicValue::ZERO_COST_UNIT_WORK
            };
            self.atom_values.insert(atom, value);
        }
        for (time, action) in problem.timed_actions() {
            for effect in &action.effects {
                let literal = &effect.literal;
                self.achievers
                    .entry(literal.clone())
                    .or_default()
                    .push((Rc::clone(action), Rc::clone(effect)));
                let mut d = if params.action_cost == ActionCost::Unit { 1.0 } else { *time };
                if let Some(factor) = duration_factor.get(literal) {
                    d /= factor;
                }
                let value = HeuristicValue { add_cost: d, add_work: 1, makespan: *time };
                if !literal.negated {
                    self.atom_values.entry(Rc::clone(&literal.atom)).or_insert(value);
                } else if !self.negation_values.contains_key(&literal.atom)
                    && self.ground_atom_value(&literal.atom).is_zero()
                {
                    self.negation_values.insert(Rc::clone(&literal.atom), value);
                }
            }
        }

        // Iterate until no literal value decreases.
        let mut applicable: BTreeSet<usize> = BTreeSet::new();
        let mut useful: BTreeSet<usize> = BTreeSet::new();
        let mut level = 0;
        loop {
            level += 1;
            trace!(level, atoms = self.atom_values.len(), "planning graph level");
            let mut changed = false;
            let mut new_atom_values: BTreeMap<Rc<Atom>, HeuristicValue> = BTreeMap::new();
            let mut new_negation_values: BTreeMap<Rc<Atom>, HeuristicValue> = BTreeMap::new();
            for action in &actions {
                let (pre_value, start_value) =
                    self.formula_values(&action.condition, 0, None, problem);
                if start_value.is_infinite() {
                    continue;
                }
                if !pre_value.is_infinite() {
                    applicable.insert(action.id);
                }
                for effect in &action.effects {
                    if effect.when == EffectTime::AtEnd && pre_value.is_infinite() {
                        continue;
                    }
                    let (mut cond_value, _) =
                        self.formula_values(&effect.condition, 0, None, problem);
                    if cond_value.is_infinite() || effect.link_condition.is_contradiction() {
                        continue;
                    }
                    if effect.when == EffectTime::AtStart {
                        cond_value.add(&start_value);
                    } else {
                        cond_value.add(&pre_value);
                    }
                    let min_duration = action.constant_min_duration()?;
                    cond_value.increase_makespan(THRESHOLD + min_duration);

                    let literal = &effect.literal;
                    let mut d = if params.action_cost == ActionCost::Unit {
                        1.0
                    } else {
                        THRESHOLD + min_duration
                    };
                    if let Some(factor) = duration_factor.get(literal) {
                        d /= factor;
                    }
                    cond_value.increase_cost(d);

                    let recorded = self
                        .achievers
                        .get(literal)
                        .is_some_and(|m| achiever_recorded(m, action, effect));
                    if !recorded {
                        if !pre_value.is_infinite() {
                            self.achievers
                                .entry(literal.clone())
                                .or_default()
                                .push((Rc::clone(action), Rc::clone(effect)));
                        }
                        useful.insert(action.id);
                    }

                    let mut new_value = cond_value;
                    new_value.increment_work();
                    if !literal.negated {
                        let old = new_atom_values
                            .get(&literal.atom)
                            .or_else(|| self.atom_values.get(&literal.atom))
                            .copied();
                        match old {
                            None => {
                                new_atom_values.insert(Rc::clone(&literal.atom), new_value);
                                changed = true;
                            }
                            Some(old_value) => {
                                let merged = HeuristicValue::min(new_value, old_value);
                                if merged != old_value {
                                    new_atom_values.insert(Rc::clone(&literal.atom), merged);
                                    changed = true;
                                }
                            }
                        }
                    } else {
                        let old = new_negation_values
                            .get(&literal.atom)
                            .or_else(|| self.negation_values.get(&literal.atom))
                            .copied();
                        match old {
                            None => {
                                // Only record deletion of an atom that can
                                // hold; unachievable atoms are false by the
                                // closed world assumption.
                                if self.ground_atom_value(&literal.atom).is_zero() {
                                    new_negation_values
                                        .insert(Rc::clone(&literal.atom), new_value);
                                    changed = true;
                                }
                            }
                            Some(old_value) => {
                                let merged = HeuristicValue::min(new_value, old_value);
                                if merged != old_value {
                                    new_negation_values
                                        .insert(Rc::clone(&literal.atom), merged);
                                    changed = true;
                                }
                            }
                        }
                    }
                }
            }
            self.atom_values.extend(new_atom_values);
            self.negation_values.extend(new_negation_values);
            if !changed {
                break;
            }
        }

        for atom in self.atom_values.keys() {
            self.predicate_atoms
                .entry(atom.predicate)
                .or_default()
                .push(Rc::clone(atom));
        }
        for atom in self.negation_values.keys() {
            self.predicate_negations
                .entry(atom.predicate)
                .or_default()
                .push(Rc::clone(atom));
        }

        // Parameter domains collect from actions that are both applicable
        // and useful.
        if params.domain_constraints {
            let mut tuples: BTreeMap<String, Vec<Rc<Vec<Object>>>> = BTreeMap::new();
            for action in &actions {
                if applicable.contains(&action.id)
                    && useful.contains(&action.id)
                    && !action.arguments().is_empty()
                {
                    tuples
                        .entry(action.name.clone())
                        .or_default()
                        .push(Rc::new(action.arguments().to_vec()));
                }
            }
            self.action_domains = tuples
                .into_iter()
                .map(|(name, tuples)| (name, ActionDomain::new(tuples)))
                .collect();
        }
        debug!(
            applicable = applicable.len(),
            useful = useful.len(),
            "planning graph settled"
        );
        Ok(())
    }

    fn ground_atom_value(&self, atom: &Rc<Atom>) -> HeuristicValue {
        self.atom_values
            .get(atom)
            .copied()
            .unwrap_or(HeuristicValue::INFINITE)
    }

    /// The heuristic value of an atom. With bindings, the minimum over
    /// reachable ground atoms the query unifies with.
    pub fn heuristic_value_atom(
        &self,
        atom: &Rc<Atom>,
        step_id: usize,
        bindings: Option<&Bindings>,
        problem: &Problem,
    ) -> HeuristicValue {
        match bindings {
            None => self.ground_atom_value(atom),
            Some(bindings) => {
                let env = problem.env();
                let query = Literal::positive(Rc::clone(atom));
                let mut value = HeuristicValue::INFINITE;
                if let Some(ground_atoms) = self.predicate_atoms.get(&atom.predicate) {
                    for ground in ground_atoms {
                        let mut mgu = BindingList::new();
                        let candidate = Literal::positive(Rc::clone(ground));
                        if bindings.unify(&mut mgu, &query, step_id, &candidate, 0, &env) {
                            value = HeuristicValue::min(value, self.ground_atom_value(ground));
                            if value.is_zero() {
                                return value;
                            }
                        }
                    }
                }
                value
            }
        }
    }

    /// The heuristic value of a negated atom. An unachievable positive atom
    /// makes the negation free by the closed world assumption.
    pub fn heuristic_value_negation(
        &self,
        atom: &Rc<Atom>,
        step_id: usize,
        bindings: Option<&Bindings>,
        problem: &Problem,
    ) -> HeuristicValue {
        match bindings {
            None => {
                if let Some(&value) = self.negation_values.get(atom) {
                    value
                } else if self.ground_atom_value(atom).is_zero() {
                    HeuristicValue::INFINITE
                } else {
                    HeuristicValue::ZERO_COST_UNIT_WORK
                }
            }
            Some(bindings) => {
                if !self
                    .heuristic_value_atom(atom, step_id, Some(bindings), problem)
                    .is_zero()
                {
                    return HeuristicValue::ZERO;
                }
                let env = problem.env();
                let query = Literal::positive(Rc::clone(atom));
                let mut value = HeuristicValue::INFINITE;
                if let Some(ground_atoms) = self.predicate_negations.get(&atom.predicate) {
                    for ground in ground_atoms {
                        let mut mgu = BindingList::new();
                        let candidate = Literal::positive(Rc::clone(ground));
                        if bindings.unify(&mut mgu, &query, step_id, &candidate, 0, &env) {
                            let v = self
                                .negation_values
                                .get(ground)
                                .copied()
                                .unwrap_or(HeuristicValue::INFINITE);
                            value = HeuristicValue::min(value, v);
                            if value.is_zero() {
                                return value;
                            }
                        }
                    }
                }
                value
            }
        }
    }

    /// The heuristic value of a formula: the pair (value, start value),
    /// where the start value covers only what must hold at the start.
    pub fn formula_values(
        &self,
        formula: &Rc<Formula>,
        step_id: usize,
        bindings: Option<&Bindings>,
        problem: &Problem,
    ) -> (HeuristicValue, HeuristicValue) {
        match formula.as_ref() {
            Formula::True | Formula::False => (HeuristicValue::ZERO, HeuristicValue::ZERO),
            Formula::Atom(atom) => {
                let v = self.heuristic_value_atom(atom, step_id, bindings, problem);
                (v, v)
            }
            Formula::Negation(atom) => {
                let v = self.heuristic_value_negation(atom, step_id, bindings, problem);
                (v, v)
            }
            Formula::Equality(bl) => {
                let consistent = match bindings {
                    None => true,
                    Some(b) => b.consistent_with_equality(bl, step_id),
                };
                let v = if consistent { HeuristicValue::ZERO } else { HeuristicValue::INFINITE };
                (v, v)
            }
            Formula::Inequality(bl) => {
                let consistent = match bindings {
                    None => true,
                    Some(b) => b.consistent_with_inequality(bl, step_id),
                };
                let v = if consistent { HeuristicValue::ZERO } else { HeuristicValue::INFINITE };
                (v, v)
            }
            Formula::Conjunction(fs) => {
                let mut h = HeuristicValue::ZERO;
                let mut hs = HeuristicValue::ZERO;
                for f in fs {
                    if h.is_infinite() {
                        break;
                    }
                    let (hi, hsi) = self.formula_values(f, step_id, bindings, problem);
                    h.add(&hi);
                    hs.add(&hsi);
                }
                (h, hs)
            }
            Formula::Disjunction(fs) => {
                let mut h = HeuristicValue::INFINITE;
                let mut hs = HeuristicValue::INFINITE;
                for f in fs {
                    if h.is_zero() {
                        break;
                    }
                    let (hi, hsi) = self.formula_values(f, step_id, bindings, problem);
                    h = HeuristicValue::min(h, hi);
                    hs = HeuristicValue::min(hs, hsi);
                }
                (h, hs)
            }
            Formula::Exists(q) => self.formula_values(&q.body, step_id, bindings, problem),
            Formula::Forall(_, _) => {
                let base = formula.universal_base(&Default::default(), problem);
                self.formula_values(&base, step_id, bindings, problem)
            }
            Formula::Timed(literal, when) => {
                let wrapped = Formula::from_literal(literal);
                let (h, mut hs) = self.formula_values(&wrapped, step_id, bindings, problem);
                if *when == FormulaTime::AtEnd {
                    hs = HeuristicValue::ZERO;
                }
                (h, hs)
            }
        }
    }

    /// The recorded achievers for the given literal.
    pub fn literal_achievers(&self, literal: &Literal) -> Option<&ActionEffectMap> {
        self.achievers.get(literal)
    }

    /// The collected parameter domain for the named action.
    pub fn action_domain(&self, name: &str) -> Option<Rc<ActionDomain>> {
        self.action_domains.get(name).map(Rc::clone)
    }
}

use std::cell::{Cell, OnceCell, RefCell};
use std::rc::Rc;

use rand::Rng;
use tracing::trace;

use crate::data::actions::Action;
use crate::data::chain::{Chain, ChainRef};
use crate::data::formulas::{Formula, FormulaTime, Literal, Quantified};
use crate::data::terms::{SubstitutionMap, Term};
use crate::data::DomainError;
use crate::planner::bindings::{Binding, BindingList, Bindings};
use crate::planner::flaws::{Flaw, MutexThreat, OpenCondition, Unsafe};
use crate::planner::heuristics::FlawSelectionOrder;
use crate::planner::orderings::{
    condition_end_time, condition_start_time, effect_time, Ordering, Orderings, StepBounds,
    StepTime, THRESHOLD,
};
use crate::planner::search::Planner;
use crate::planner::GOAL_ID;

/// A plan step: an id and the action it is an instance of.
#[derive(Clone, Debug)]
pub struct Step {
    pub id: usize,
    pub action: Rc<Action>,
}

impl Step {
    pub fn new(id: usize, action: Rc<Action>) -> Step {
        Step { id, action }
    }
}

/// A causal link committing a producer's effect to a consumer's condition.
#[derive(Clone, Debug, PartialEq)]
pub struct Link {
    pub from_id: usize,
    pub effect_time: StepTime,
    pub to_id: usize,
    pub condition: Literal,
    pub condition_time: FormulaTime,
}

/// An immutable partial plan. Chains share their tails with the parent
/// plan, so children cost a handful of cells each.
#[derive(Debug)]
pub struct Plan {
    pub steps: ChainRef<Step>,
    pub num_steps: usize,
    pub links: ChainRef<Link>,
    pub num_links: usize,
    pub orderings: Rc<Orderings>,
    pub bindings: Rc<Bindings>,
    pub unsafes: ChainRef<Unsafe>,
    pub num_unsafes: usize,
    pub open_conds: ChainRef<OpenCondition>,
    pub num_open_conds: usize,
    pub mutex_threats: ChainRef<MutexThreat>,
    rank: OnceCell<Vec<f32>>,
    serial: Cell<usize>,
}

impl Plan {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn make(
        steps: ChainRef<Step>,
        num_steps: usize,
        links: ChainRef<Link>,
        num_links: usize,
        orderings: Rc<Orderings>,
        bindings: Rc<Bindings>,
        unsafes: ChainRef<Unsafe>,
        num_unsafes: usize,
        open_conds: ChainRef<OpenCondition>,
        num_open_conds: usize,
        mutex_threats: ChainRef<MutexThreat>,
    ) -> Rc<Plan> {
        Rc::new(Plan {
            steps,
            num_steps,
            links,
            num_links,
            orderings,
            bindings,
            unsafes,
            num_unsafes,
            open_conds,
            num_open_conds,
            mutex_threats,
            rank: OnceCell::new(),
            serial: Cell::new(0),
        })
    }

    /// A plan is complete when nothing remains to repair.
    pub fn is_complete(&self) -> bool {
        self.unsafes.is_none() && self.open_conds.is_none() && self.mutex_threats.is_none()
    }

    pub fn serial(&self) -> usize {
        self.serial.get()
    }

    pub(crate) fn set_serial(&self, serial: usize) {
        self.serial.set(serial);
    }

    /// The memoized rank vector, filled on first use.
    pub(crate) fn rank(&self, planner: &Planner) -> &[f32] {
        self.rank.get_or_init(|| planner.plan_rank(self))
    }

    pub(crate) fn primary_rank(&self, planner: &Planner) -> f32 {
        self.rank(planner).first().copied().unwrap_or(0.0)
    }

    pub(crate) fn rank_if_computed(&self) -> Option<&Vec<f32>> {
        self.rank.get()
    }

    /// Find the step with the given id.
    pub fn find_step(&self, id: usize) -> Option<&Step> {
        Chain::iter(&self.steps).find(|s| s.id == id)
    }
}

impl Planner<'_> {
    /// The bindings heuristics should see: none when planning with fully
    /// ground actions.
    pub(crate) fn heuristic_bindings<'a>(&self, bindings: &'a Bindings) -> Option<&'a Bindings> {
        if self.params.ground_actions {
            None
        } else {
            Some(bindings)
        }
    }

    /// Add a goal formula as open conditions and bindings. Returns false if
    /// the goal is inconsistent.
    pub(crate) fn add_goal(
        &self,
        open_conds: &mut ChainRef<OpenCondition>,
        num_open_conds: &mut usize,
        new_bindings: &mut BindingList,
        goal: Rc<Formula>,
        step_id: usize,
        test_only: bool,
    ) -> bool {
        if goal.is_tautology() {
            return true;
        }
        if goal.is_contradiction() {
            return false;
        }
        let mut goals = vec![goal];
        while let Some(goal) = goals.pop() {
            match goal.as_ref() {
                Formula::True => {}
                Formula::False => return false,
                Formula::Atom(_) | Formula::Negation(_) | Formula::Timed(_, _) => {
                    let Some((literal, when)) = goal.timed_literal() else {
                        continue;
                    };
                    let stripped = self.params.strip_static_preconditions()
                        && self
                            .problem
                            .domain()
                            .predicates()
                            .is_static(literal.predicate());
                    if !test_only && !stripped {
                        *open_conds = Some(Chain::cons(
                            OpenCondition::literal_at(step_id, &literal, when),
                            open_conds.take(),
                        ));
                    }
                    *num_open_conds += 1;
                }
                Formula::Conjunction(fs) => {
                    for f in fs {
                        self.push_goal(&mut goals, Rc::clone(f));
                    }
                }
                Formula::Disjunction(_) => {
                    if !test_only {
                        *open_conds = Some(Chain::cons(
                            OpenCondition::new(step_id, Rc::clone(&goal)),
                            open_conds.take(),
                        ));
                    }
                    *num_open_conds += 1;
                }
                Formula::Equality(bl) => {
                    new_bindings.push(Binding::equality(
                        bl.variable,
                        bl.step_id1(step_id),
                        bl.term,
                        bl.step_id2(step_id),
                    ));
                }
                Formula::Inequality(bl) => {
                    new_bindings.push(Binding::inequality(
                        bl.variable,
                        bl.step_id1(step_id),
                        bl.term,
                        bl.step_id2(step_id),
                    ));
                }
                Formula::Exists(q) => {
                    self.push_goal(&mut goals, Rc::clone(&q.body));
                }
                Formula::Forall(_, _) => {
                    let base = goal.universal_base(&SubstitutionMap::new(), self.problem);
                    self.push_goal(&mut goals, base);
                }
            }
        }
        true
    }

    /// Insert a subgoal into the worklist, at a random position when
    /// randomized open conditions are on.
    fn push_goal(&self, goals: &mut Vec<Rc<Formula>>, goal: Rc<Formula>) {
        if self.params.random_open_conditions {
            let pos = self.rng.borrow_mut().gen_range(0..=goals.len());
            if pos == goals.len() {
                goals.push(goal);
            } else {
                let displaced = Rc::clone(&goals[pos]);
                goals[pos] = goal;
                goals.push(displaced);
            }
        } else {
            goals.push(goal);
        }
    }

    /// The achievers of a literal: planning-graph achievers when grounding,
    /// otherwise the schemas (plus initial and timed actions) indexed by
    /// predicate.
    pub(crate) fn literal_achievers(
        &self,
        literal: &Literal,
    ) -> Option<&crate::planner::graph::ActionEffectMap> {
        if self.params.ground_actions {
            self.graph.as_ref()?.literal_achievers(literal)
        } else if !literal.negated {
            self.achieves_pred.get(&literal.predicate())
        } else {
            self.achieves_neg_pred.get(&literal.predicate())
        }
    }

    /// Record threats to one link from the effects of existing steps.
    fn link_threats(
        &self,
        unsafes: &mut ChainRef<Unsafe>,
        num_unsafes: &mut usize,
        link: &Link,
        steps: &ChainRef<Step>,
        orderings: &Orderings,
        bindings: &Bindings,
    ) {
        let env = self.env();
        let durative = self.problem.domain().requirements.durative_actions;
        let lt1 = link.effect_time;
        let lt2 = condition_end_time(link.condition_time);
        for step in Chain::iter(steps) {
            if !(orderings.possibly_not_after(link.from_id, lt1, step.id, StepTime::AT_END)
                && orderings.possibly_not_before(link.to_id, lt2, step.id, StepTime::AT_START))
            {
                continue;
            }
            for effect in &step.action.effects {
                if !durative && effect.link_condition.is_contradiction() {
                    continue;
                }
                let et = effect_time(effect);
                if step.id == link.to_id && et >= lt2 {
                    continue;
                }
                if !(orderings.possibly_not_after(link.from_id, lt1, step.id, et)
                    && orderings.possibly_not_before(link.to_id, lt2, step.id, et))
                {
                    continue;
                }
                if !link.condition.negated && link.from_id == step.id && lt1 == et {
                    continue;
                }
                let mut mgu = BindingList::new();
                if bindings.affects(
                    &mut mgu,
                    &effect.literal,
                    step.id,
                    &link.condition,
                    link.to_id,
                    &env,
                ) {
                    *unsafes = Some(Chain::cons(
                        Unsafe {
                            link: link.clone(),
                            step_id: step.id,
                            effect: Rc::clone(effect),
                        },
                        unsafes.take(),
                    ));
                    *num_unsafes += 1;
                }
            }
        }
    }

    /// Record links threatened by the effects of one (new) step.
    fn step_threats(
        &self,
        unsafes: &mut ChainRef<Unsafe>,
        num_unsafes: &mut usize,
        step: &Step,
        links: &ChainRef<Link>,
        orderings: &Orderings,
        bindings: &Bindings,
    ) {
        let env = self.env();
        let durative = self.problem.domain().requirements.durative_actions;
        for link in Chain::iter(links) {
            let lt1 = link.effect_time;
            let lt2 = condition_end_time(link.condition_time);
            if !(orderings.possibly_not_after(link.from_id, lt1, step.id, StepTime::AT_END)
                && orderings.possibly_not_before(link.to_id, lt2, step.id, StepTime::AT_START))
            {
                continue;
            }
            for effect in &step.action.effects {
                if !durative && effect.link_condition.is_contradiction() {
                    continue;
                }
                let et = effect_time(effect);
                if step.id == link.to_id && et >= lt2 {
                    continue;
                }
                if !(orderings.possibly_not_after(link.from_id, lt1, step.id, et)
                    && orderings.possibly_not_before(link.to_id, lt2, step.id, et))
                {
                    continue;
                }
                if !link.condition.negated && link.from_id == step.id && lt1 == et {
                    continue;
                }
                let mut mgu = BindingList::new();
                if bindings.affects(
                    &mut mgu,
                    &effect.literal,
                    step.id,
                    &link.condition,
                    link.to_id,
                    &env,
                ) {
                    *unsafes = Some(Chain::cons(
                        Unsafe {
                            link: link.clone(),
                            step_id: step.id,
                            effect: Rc::clone(effect),
                        },
                        unsafes.take(),
                    ));
                    *num_unsafes += 1;
                }
            }
        }
    }

    /// Record mutex threats between one step's effects and every possibly
    /// concurrent step.
    fn mutex_threats_for_step(
        &self,
        threats: &mut ChainRef<MutexThreat>,
        step: &Step,
        steps: &ChainRef<Step>,
        orderings: &Orderings,
        bindings: &Bindings,
    ) {
        let env = self.env();
        for other in Chain::iter(steps) {
            let Some([ss, se, es, ee]) = orderings.possibly_concurrent(step.id, other.id)
            else {
                continue;
            };
            for e1 in &step.action.effects {
                let start1 = e1.when == crate::data::effects::EffectTime::AtStart;
                if start1 && !ss && !se {
                    continue;
                }
                if !start1 && !es && !ee {
                    continue;
                }
                for e2 in &other.action.effects {
                    let start2 = e2.when == crate::data::effects::EffectTime::AtStart;
                    let possible = match (start1, start2) {
                        (true, true) => ss,
                        (true, false) => se,
                        (false, true) => es,
                        (false, false) => ee,
                    };
                    if !possible || e1.literal.negated == e2.literal.negated {
                        continue;
                    }
                    let mut mgu = BindingList::new();
                    let a1 = Literal::positive(Rc::clone(&e1.literal.atom));
                    let a2 = Literal::positive(Rc::clone(&e2.literal.atom));
                    if bindings.unify(&mut mgu, &a1, step.id, &a2, other.id, &env) {
                        *threats = Some(Chain::cons(
                            MutexThreat::Threat {
                                step_id1: step.id,
                                effect1: Rc::clone(e1),
                                step_id2: other.id,
                                effect2: Rc::clone(e2),
                            },
                            threats.take(),
                        ));
                    }
                }
            }
        }
    }

    /// The initial plan for the problem, or `None` when the goal is already
    /// inconsistent.
    pub(crate) fn make_initial_plan(&self) -> Result<Option<Rc<Plan>>, DomainError> {
        let env = self.env();
        let mut open_conds = None;
        let mut num_open_conds = 0;
        let mut new_bindings = BindingList::new();
        if !self.add_goal(
            &mut open_conds,
            &mut num_open_conds,
            &mut new_bindings,
            Rc::clone(&self.goal_action.condition),
            GOAL_ID,
            false,
        ) {
            return Ok(None);
        }
        let Some(bindings) = Bindings::default().add(&new_bindings, false, &env) else {
            return Ok(None);
        };
        let mutex_threats = Some(Chain::cons(MutexThreat::Unexpanded, None));
        let mut steps = Some(Chain::cons(
            Step::new(0, Rc::clone(self.problem.init_action())),
            Some(Chain::cons(Step::new(GOAL_ID, Rc::clone(&self.goal_action)), None)),
        ));
        let mut num_steps = 0;
        let orderings = if self.problem.domain().requirements.durative_actions {
            let mut temporal = crate::planner::orderings::TemporalOrderings::default();
            for (time, action) in self.problem.timed_actions() {
                num_steps += 1;
                steps = Some(Chain::cons(Step::new(num_steps, Rc::clone(action)), steps));
                temporal = temporal.refine_timed(*time, num_steps);
            }
            Orderings::Temporal(temporal)
        } else {
            Orderings::binary()
        };
        Ok(Some(Plan::make(
            steps,
            num_steps,
            None,
            0,
            Rc::new(orderings),
            Rc::new(bindings),
            None,
            0,
            open_conds,
            num_open_conds,
            mutex_threats,
        )))
    }

    /// Select one flaw and emit every legal child plan for it.
    pub(crate) fn refinements(
        &self,
        plan: &Rc<Plan>,
        flaw_order: &FlawSelectionOrder,
    ) -> Result<Vec<Rc<Plan>>, DomainError> {
        let flaw = flaw_order.select(self, plan)?;
        if !self.params.ground_actions {
            self.static_pred_flaw.set(match &flaw {
                Flaw::OpenCond(oc) => oc.is_static(self.problem.domain().predicates()),
                _ => false,
            });
        }
        trace!(?flaw, "handling flaw");
        let mut plans = Vec::new();
        match flaw {
            Flaw::Threat(unsafe_link) => self.handle_unsafe(&mut plans, plan, &unsafe_link),
            Flaw::OpenCond(open_cond) => {
                self.handle_open_condition(&mut plans, plan, &open_cond)?
            }
            Flaw::Mutex(mutex) => self.handle_mutex_threat(&mut plans, plan, &mutex),
        }
        Ok(plans)
    }

    /// Resolve a threatened link by separation, promotion, or demotion; a
    /// threat that is no longer live is simply dropped.
    fn handle_unsafe(&self, plans: &mut Vec<Rc<Plan>>, plan: &Plan, unsafe_link: &Unsafe) {
        let env = self.env();
        let link = &unsafe_link.link;
        let lt1 = link.effect_time;
        let lt2 = condition_end_time(link.condition_time);
        let et = effect_time(&unsafe_link.effect);
        let mut unifier = BindingList::new();
        if plan
            .orderings
            .possibly_not_after(link.from_id, lt1, unsafe_link.step_id, et)
            && plan
                .orderings
                .possibly_not_before(link.to_id, lt2, unsafe_link.step_id, et)
            && plan.bindings.affects(
                &mut unifier,
                &unsafe_link.effect.literal,
                unsafe_link.step_id,
                &link.condition,
                link.to_id,
                &env,
            )
        {
            self.separate_unsafe(plans, plan, unsafe_link, &unifier, false);
            self.promote_unsafe(plans, plan, unsafe_link, false);
            self.demote_unsafe(plans, plan, unsafe_link, false);
        } else {
            // A bogus flaw; drop it.
            plans.push(Plan::make(
                plan.steps.clone(),
                plan.num_steps,
                plan.links.clone(),
                plan.num_links,
                Rc::clone(&plan.orderings),
                Rc::clone(&plan.bindings),
                Chain::remove(&plan.unsafes, unsafe_link),
                plan.num_unsafes - 1,
                plan.open_conds.clone(),
                plan.num_open_conds,
                plan.mutex_threats.clone(),
            ));
        }
    }

    /// Separation: make the threat inapplicable by separating variables or
    /// by denying the threatening effect's condition.
    fn separate_unsafe(
        &self,
        plans: &mut Vec<Rc<Plan>>,
        plan: &Plan,
        unsafe_link: &Unsafe,
        unifier: &BindingList,
        test_only: bool,
    ) -> i32 {
        let env = self.env();
        let mut goal = Formula::falsity();
        for subst in unifier {
            if !unsafe_link.effect.quantifies(subst.var) {
                let g = Formula::inequality(
                    subst.var.into(),
                    subst.var_id,
                    subst.term,
                    subst.term_id,
                    &env,
                );
                let consistent = match g.as_ref() {
                    Formula::Inequality(bl) => plan.bindings.consistent_with_inequality(bl, 0),
                    _ => true,
                };
                if consistent {
                    goal = Formula::or(goal, g);
                }
            }
        }
        let effect_cond = &unsafe_link.effect.condition;
        if !effect_cond.is_tautology() {
            let negated = if unsafe_link.effect.parameters.is_empty() {
                Formula::negation(effect_cond)
            } else if test_only {
                let body = Formula::negation(effect_cond);
                requantified(unsafe_link.effect.parameters.clone(), body)
            } else {
                let mut forall_subst = SubstitutionMap::new();
                let mut parameters = Vec::new();
                for &vi in &unsafe_link.effect.parameters {
                    let v = self
                        .problem
                        .terms()
                        .add_variable(env.terms.type_of(vi.into()));
                    parameters.push(v);
                    forall_subst.insert(vi, v.into());
                }
                let body =
                    Formula::negation(&effect_cond.substitute(&forall_subst, &env));
                requantified(parameters, body)
            };
            goal = Formula::or(goal, negated);
        }
        let mut new_open_conds = if test_only { None } else { plan.open_conds.clone() };
        let mut new_num_open_conds = if test_only { 0 } else { plan.num_open_conds };
        let mut new_bindings = BindingList::new();
        let added = self.add_goal(
            &mut new_open_conds,
            &mut new_num_open_conds,
            &mut new_bindings,
            Rc::clone(&goal),
            unsafe_link.step_id,
            test_only,
        );
        let mut count = 0;
        if added {
            if let Some(bindings) = plan.bindings.add(&new_bindings, test_only, &env) {
                if !test_only {
                    let mut new_orderings = Some(plan.orderings.as_ref().clone());
                    if !goal.is_tautology() && self.graph.is_some() {
                        if let Some(graph) = &self.graph {
                            let (h, hs) = graph.formula_values(
                                &goal,
                                unsafe_link.step_id,
                                self.heuristic_bindings(&bindings),
                                self.problem,
                            );
                            new_orderings = plan.orderings.refine_bounds(
                                unsafe_link.step_id,
                                hs.makespan,
                                h.makespan,
                            );
                        }
                    }
                    if let Some(new_orderings) = new_orderings {
                        plans.push(Plan::make(
                            plan.steps.clone(),
                            plan.num_steps,
                            plan.links.clone(),
                            plan.num_links,
                            Rc::new(new_orderings),
                            Rc::new(bindings),
                            Chain::remove(&plan.unsafes, unsafe_link),
                            plan.num_unsafes - 1,
                            new_open_conds,
                            new_num_open_conds,
                            plan.mutex_threats.clone(),
                        ));
                    }
                }
                count += 1;
            }
        }
        count
    }

    /// Demotion: order the threat before the link's producer.
    fn demote_unsafe(
        &self,
        plans: &mut Vec<Rc<Plan>>,
        plan: &Plan,
        unsafe_link: &Unsafe,
        test_only: bool,
    ) -> i32 {
        let link = &unsafe_link.link;
        let lt1 = link.effect_time;
        let et = effect_time(&unsafe_link.effect);
        if plan
            .orderings
            .possibly_before(unsafe_link.step_id, et, link.from_id, lt1)
        {
            if !test_only {
                self.new_ordering_unsafe(
                    plans,
                    plan,
                    Ordering::new(unsafe_link.step_id, et, link.from_id, lt1),
                    unsafe_link,
                );
            }
            1
        } else {
            0
        }
    }

    /// Promotion: order the threat after the link's consumer.
    fn promote_unsafe(
        &self,
        plans: &mut Vec<Rc<Plan>>,
        plan: &Plan,
        unsafe_link: &Unsafe,
        test_only: bool,
    ) -> i32 {
        let link = &unsafe_link.link;
        let lt2 = condition_end_time(link.condition_time);
        let et = effect_time(&unsafe_link.effect);
        if plan
            .orderings
            .possibly_before(link.to_id, lt2, unsafe_link.step_id, et)
        {
            if !test_only {
                self.new_ordering_unsafe(
                    plans,
                    plan,
                    Ordering::new(link.to_id, lt2, unsafe_link.step_id, et),
                    unsafe_link,
                );
            }
            1
        } else {
            0
        }
    }

    fn new_ordering_unsafe(
        &self,
        plans: &mut Vec<Rc<Plan>>,
        plan: &Plan,
        ordering: Ordering,
        unsafe_link: &Unsafe,
    ) {
        if let Some(new_orderings) = plan.orderings.refine(&ordering) {
            plans.push(Plan::make(
                plan.steps.clone(),
                plan.num_steps,
                plan.links.clone(),
                plan.num_links,
                Rc::new(new_orderings),
                Rc::clone(&plan.bindings),
                Chain::remove(&plan.unsafes, unsafe_link),
                plan.num_unsafes - 1,
                plan.open_conds.clone(),
                plan.num_open_conds,
                plan.mutex_threats.clone(),
            ));
        }
    }

    /// Resolve a mutex threat. The unexpanded sentinel is replaced by the
    /// full enumeration; live threats offer separation and both orderings.
    fn handle_mutex_threat(&self, plans: &mut Vec<Rc<Plan>>, plan: &Plan, mutex: &MutexThreat) {
        let env = self.env();
        let MutexThreat::Threat { step_id1, effect1, step_id2, effect2 } = mutex else {
            let mut new_threats = None;
            for step in Chain::iter(&plan.steps) {
                self.mutex_threats_for_step(
                    &mut new_threats,
                    step,
                    &plan.steps,
                    &plan.orderings,
                    &plan.bindings,
                );
            }
            plans.push(Plan::make(
                plan.steps.clone(),
                plan.num_steps,
                plan.links.clone(),
                plan.num_links,
                Rc::clone(&plan.orderings),
                Rc::clone(&plan.bindings),
                plan.unsafes.clone(),
                plan.num_unsafes,
                plan.open_conds.clone(),
                plan.num_open_conds,
                new_threats,
            ));
            return;
        };
        let et1 = effect_time(effect1);
        let et2 = effect_time(effect2);
        let mut unifier = BindingList::new();
        let a1 = Literal::positive(Rc::clone(&effect1.literal.atom));
        let a2 = Literal::positive(Rc::clone(&effect2.literal.atom));
        if plan.orderings.possibly_not_before(*step_id1, et1, *step_id2, et2)
            && plan.orderings.possibly_not_after(*step_id1, et1, *step_id2, et2)
            && plan
                .bindings
                .unify(&mut unifier, &a1, *step_id1, &a2, *step_id2, &env)
        {
            self.separate_mutex(plans, plan, mutex, &unifier);
            self.promote_mutex(plans, plan, mutex);
            self.demote_mutex(plans, plan, mutex);
        } else {
            // A bogus flaw; drop it.
            plans.push(Plan::make(
                plan.steps.clone(),
                plan.num_steps,
                plan.links.clone(),
                plan.num_links,
                Rc::clone(&plan.orderings),
                Rc::clone(&plan.bindings),
                plan.unsafes.clone(),
                plan.num_unsafes,
                plan.open_conds.clone(),
                plan.num_open_conds,
                Chain::remove(&plan.mutex_threats, mutex),
            ));
        }
    }

    fn separate_mutex(
        &self,
        plans: &mut Vec<Rc<Plan>>,
        plan: &Plan,
        mutex: &MutexThreat,
        unifier: &BindingList,
    ) {
        let MutexThreat::Threat { step_id1, effect1, step_id2, effect2 } = mutex else {
            return;
        };
        let env = self.env();
        if !unifier.is_empty() {
            let mut goal = Formula::falsity();
            for subst in unifier {
                if !effect1.quantifies(subst.var) && !effect2.quantifies(subst.var) {
                    let g = Formula::inequality(
                        subst.var.into(),
                        subst.var_id,
                        subst.term,
                        subst.term_id,
                        &env,
                    );
                    let consistent = match g.as_ref() {
                        Formula::Inequality(bl) => {
                            plan.bindings.consistent_with_inequality(bl, 0)
                        }
                        _ => true,
                    };
                    if consistent {
                        goal = Formula::or(goal, g);
                    }
                }
            }
            let mut new_open_conds = plan.open_conds.clone();
            let mut new_num_open_conds = plan.num_open_conds;
            let mut new_bindings = BindingList::new();
            if self.add_goal(
                &mut new_open_conds,
                &mut new_num_open_conds,
                &mut new_bindings,
                goal,
                0,
                false,
            ) {
                if let Some(bindings) = plan.bindings.add(&new_bindings, false, &env) {
                    plans.push(Plan::make(
                        plan.steps.clone(),
                        plan.num_steps,
                        plan.links.clone(),
                        plan.num_links,
                        Rc::clone(&plan.orderings),
                        Rc::new(bindings),
                        plan.unsafes.clone(),
                        plan.num_unsafes,
                        new_open_conds,
                        new_num_open_conds,
                        Chain::remove(&plan.mutex_threats, mutex),
                    ));
                }
            }
        }
        for (step_id, effect) in [(*step_id1, effect1), (*step_id2, effect2)] {
            let effect_cond = &effect.condition;
            if effect_cond.is_tautology() {
                continue;
            }
            let goal = if effect.parameters.is_empty() {
                Formula::negation(effect_cond)
            } else {
                let mut forall_subst = SubstitutionMap::new();
                let mut parameters = Vec::new();
                for &vi in &effect.parameters {
                    let v = self
                        .problem
                        .terms()
                        .add_variable(env.terms.type_of(vi.into()));
                    parameters.push(v);
                    forall_subst.insert(vi, v.into());
                }
                let body =
                    Formula::negation(&effect_cond.substitute(&forall_subst, &env));
                requantified(parameters, body)
            };
            let mut new_open_conds = plan.open_conds.clone();
            let mut new_num_open_conds = plan.num_open_conds;
            let mut new_bindings = BindingList::new();
            if !self.add_goal(
                &mut new_open_conds,
                &mut new_num_open_conds,
                &mut new_bindings,
                Rc::clone(&goal),
                step_id,
                false,
            ) {
                continue;
            }
            let Some(bindings) = plan.bindings.add(&new_bindings, false, &env) else {
                continue;
            };
            let mut new_orderings = Some(plan.orderings.as_ref().clone());
            if !goal.is_tautology() {
                if let Some(graph) = &self.graph {
                    let (h, hs) = graph.formula_values(
                        &goal,
                        step_id,
                        self.heuristic_bindings(&bindings),
                        self.problem,
                    );
                    new_orderings =
                        plan.orderings.refine_bounds(step_id, hs.makespan, h.makespan);
                }
            }
            if let Some(new_orderings) = new_orderings {
                plans.push(Plan::make(
                    plan.steps.clone(),
                    plan.num_steps,
                    plan.links.clone(),
                    plan.num_links,
                    Rc::new(new_orderings),
                    Rc::new(bindings),
                    plan.unsafes.clone(),
                    plan.num_unsafes,
                    new_open_conds,
                    new_num_open_conds,
                    Chain::remove(&plan.mutex_threats, mutex),
                ));
            }
        }
    }

    fn demote_mutex(&self, plans: &mut Vec<Rc<Plan>>, plan: &Plan, mutex: &MutexThreat) {
        let MutexThreat::Threat { step_id1, effect1, step_id2, effect2 } = mutex else {
            return;
        };
        let et1 = effect_time(effect1);
        let et2 = effect_time(effect2);
        if plan.orderings.possibly_before(*step_id1, et1, *step_id2, et2) {
            self.new_ordering_mutex(plans, plan, Ordering::new(*step_id1, et1, *step_id2, et2), mutex);
        }
    }

    fn promote_mutex(&self, plans: &mut Vec<Rc<Plan>>, plan: &Plan, mutex: &MutexThreat) {
        let MutexThreat::Threat { step_id1, effect1, step_id2, effect2 } = mutex else {
            return;
        };
        let et1 = effect_time(effect1);
        let et2 = effect_time(effect2);
        if plan.orderings.possibly_before(*step_id2, et2, *step_id1, et1) {
            self.new_ordering_mutex(plans, plan, Ordering::new(*step_id2, et2, *step_id1, et1), mutex);
        }
    }

    fn new_ordering_mutex(
        &self,
        plans: &mut Vec<Rc<Plan>>,
        plan: &Plan,
        ordering: Ordering,
        mutex: &MutexThreat,
    ) {
        if let Some(new_orderings) = plan.orderings.refine(&ordering) {
            plans.push(Plan::make(
                plan.steps.clone(),
                plan.num_steps,
                plan.links.clone(),
                plan.num_links,
                Rc::new(new_orderings),
                Rc::clone(&plan.bindings),
                plan.unsafes.clone(),
                plan.num_unsafes,
                plan.open_conds.clone(),
                plan.num_open_conds,
                Chain::remove(&plan.mutex_threats, mutex),
            ));
        }
    }

    /// Resolve an open condition by kind: literal, disjunction, or
    /// inequality.
    fn handle_open_condition(
        &self,
        plans: &mut Vec<Rc<Plan>>,
        plan: &Plan,
        open_cond: &OpenCondition,
    ) -> Result<(), DomainError> {
        if let Some(literal) = open_cond.literal() {
            if let Some(achievers) = self.literal_achievers(&literal) {
                self.add_step(plans, plan, &literal, open_cond, achievers)?;
                self.reuse_step(plans, plan, &literal, open_cond, achievers)?;
            }
            if literal.negated {
                self.new_cw_link(plans, plan, &literal, open_cond, false)?;
            }
        } else if open_cond.disjuncts().is_some() {
            self.handle_disjunction(plans, plan, open_cond, false);
        } else if open_cond.inequality().is_some() {
            self.handle_inequality(plans, plan, open_cond, false);
        }
        Ok(())
    }

    /// Try each disjunct of a disjunctive open condition in turn.
    fn handle_disjunction(
        &self,
        plans: &mut Vec<Rc<Plan>>,
        plan: &Plan,
        open_cond: &OpenCondition,
        test_only: bool,
    ) -> i32 {
        let env = self.env();
        let disjuncts: Vec<Rc<Formula>> = match open_cond.disjuncts() {
            Some(ds) => ds.to_vec(),
            None => return 0,
        };
        let mut count = 0;
        for disjunct in disjuncts {
            let mut new_bindings = BindingList::new();
            let mut new_open_conds = if test_only {
                None
            } else {
                Chain::remove(&plan.open_conds, open_cond)
            };
            let mut new_num_open_conds =
                if test_only { 0 } else { plan.num_open_conds - 1 };
            if self.add_goal(
                &mut new_open_conds,
                &mut new_num_open_conds,
                &mut new_bindings,
                disjunct,
                open_cond.step_id,
                test_only,
            ) {
                if let Some(bindings) = plan.bindings.add(&new_bindings, test_only, &env) {
                    if !test_only {
                        plans.push(Plan::make(
                            plan.steps.clone(),
                            plan.num_steps,
                            plan.links.clone(),
                            plan.num_links,
                            Rc::clone(&plan.orderings),
                            Rc::new(bindings),
                            plan.unsafes.clone(),
                            plan.num_unsafes,
                            new_open_conds,
                            new_num_open_conds,
                            plan.mutex_threats.clone(),
                        ));
                    }
                    count += 1;
                }
            }
        }
        count
    }

    /// Branch an inequality by pinning the variable with the smaller domain
    /// to each of its candidates while excluding it from the other side.
    fn handle_inequality(
        &self,
        plans: &mut Vec<Rc<Plan>>,
        plan: &Plan,
        open_cond: &OpenCondition,
        test_only: bool,
    ) -> i32 {
        let env = self.env();
        let Some(neq) = open_cond.inequality() else { return 0 };
        let step_id = open_cond.step_id;
        let var1 = neq.variable;
        let id1 = neq.step_id1(step_id);
        let id2 = neq.step_id2(step_id);
        let mut count = 0;
        let Some(var2) = neq.term.as_variable() else {
            // Variable against object: a single refinement records the
            // exclusion.
            let new_bindings = vec![Binding::inequality(var1, id1, neq.term, id2)];
            if let Some(bindings) = plan.bindings.add(&new_bindings, test_only, &env) {
                if !test_only {
                    plans.push(Plan::make(
                        plan.steps.clone(),
                        plan.num_steps,
                        plan.links.clone(),
                        plan.num_links,
                        Rc::clone(&plan.orderings),
                        Rc::new(bindings),
                        plan.unsafes.clone(),
                        plan.num_unsafes,
                        Chain::remove(&plan.open_conds, open_cond),
                        plan.num_open_conds - 1,
                        plan.mutex_threats.clone(),
                    ));
                }
                count += 1;
            }
            return count;
        };
        let d1 = plan.bindings.get_domain(var1, id1, self.problem);
        let d2 = plan.bindings.get_domain(var2, id2, self.problem);
        let (bound_var, bound_id, other_var, other_id, domain) = if d1.len() < d2.len() {
            (var1, id1, var2, id2, d1)
        } else {
            (var2, id2, var1, id1, d2)
        };
        for obj in domain {
            let new_bindings = vec![
                Binding::equality(bound_var, bound_id, obj.into(), 0),
                Binding::inequality(other_var, other_id, obj.into(), 0),
            ];
            if let Some(bindings) = plan.bindings.add(&new_bindings, test_only, &env) {
                if !test_only {
                    plans.push(Plan::make(
                        plan.steps.clone(),
                        plan.num_steps,
                        plan.links.clone(),
                        plan.num_links,
                        Rc::clone(&plan.orderings),
                        Rc::new(bindings),
                        plan.unsafes.clone(),
                        plan.num_unsafes,
                        Chain::remove(&plan.open_conds, open_cond),
                        plan.num_open_conds - 1,
                        plan.mutex_threats.clone(),
                    ));
                }
                count += 1;
            }
        }
        count
    }

    /// Support a literal open condition with a fresh step per achiever.
    fn add_step(
        &self,
        plans: &mut Vec<Rc<Plan>>,
        plan: &Plan,
        literal: &Literal,
        open_cond: &OpenCondition,
        achievers: &crate::planner::graph::ActionEffectMap,
    ) -> Result<(), DomainError> {
        for (action, effect) in achievers {
            if !action.is_synthetic() {
                let step = Step::new(plan.num_steps + 1, Rc::clone(action));
                self.new_link(plans, plan, &step, effect, literal, open_cond, false)?;
            }
        }
        Ok(())
    }

    /// Support a literal open condition from an existing step whose effect
    /// can precede the consumer.
    fn reuse_step(
        &self,
        plans: &mut Vec<Rc<Plan>>,
        plan: &Plan,
        literal: &Literal,
        open_cond: &OpenCondition,
        achievers: &crate::planner::graph::ActionEffectMap,
    ) -> Result<(), DomainError> {
        let gt = condition_start_time(open_cond.when);
        for step in Chain::iter(&plan.steps) {
            if !plan.orderings.possibly_before(
                step.id,
                StepTime::AT_START,
                open_cond.step_id,
                gt,
            ) {
                continue;
            }
            for (action, effect) in achievers {
                if action.id != step.action.id {
                    continue;
                }
                let et = effect_time(effect);
                if plan
                    .orderings
                    .possibly_before(step.id, et, open_cond.step_id, gt)
                {
                    self.new_link(plans, plan, step, effect, literal, open_cond, false)?;
                }
            }
        }
        Ok(())
    }

    /// Link the given step's effect to the open condition if they unify.
    fn new_link(
        &self,
        plans: &mut Vec<Rc<Plan>>,
        plan: &Plan,
        step: &Step,
        effect: &Rc<crate::data::effects::Effect>,
        literal: &Literal,
        open_cond: &OpenCondition,
        test_only: bool,
    ) -> Result<i32, DomainError> {
        let env = self.env();
        let mut mgu = BindingList::new();
        if plan.bindings.unify(
            &mut mgu,
            &effect.literal,
            step.id,
            literal,
            open_cond.step_id,
            &env,
        ) {
            self.make_link(plans, plan, step, effect, literal, open_cond, &mgu, test_only)
        } else {
            Ok(0)
        }
    }

    /// Support a negated literal from the initial state under the closed
    /// world assumption: the goal atom must be separable from every initial
    /// atom it unifies with.
    fn new_cw_link(
        &self,
        plans: &mut Vec<Rc<Plan>>,
        plan: &Plan,
        literal: &Literal,
        open_cond: &OpenCondition,
        test_only: bool,
    ) -> Result<i32, DomainError> {
        let env = self.env();
        let goal_atom = Literal::positive(Rc::clone(&literal.atom));
        let mut goals = Formula::truth();
        for effect in &self.problem.init_action().effects {
            let mut mgu = BindingList::new();
            if plan.bindings.unify(
                &mut mgu,
                &effect.literal,
                0,
                &goal_atom,
                open_cond.step_id,
                &env,
            ) {
                if mgu.is_empty() {
                    // The goal atom holds initially and cannot be separated.
                    return Ok(0);
                }
                let mut binds = Formula::falsity();
                for subst in &mgu {
                    binds = Formula::or(
                        binds,
                        Formula::inequality(
                            subst.var.into(),
                            subst.var_id,
                            subst.term,
                            subst.term_id,
                            &env,
                        ),
                    );
                }
                goals = Formula::and(goals, binds);
            }
        }
        let mut new_open_conds = if test_only {
            None
        } else {
            Chain::remove(&plan.open_conds, open_cond)
        };
        let mut new_num_open_conds = if test_only { 0 } else { plan.num_open_conds - 1 };
        let mut new_bindings = BindingList::new();
        if !self.add_goal(
            &mut new_open_conds,
            &mut new_num_open_conds,
            &mut new_bindings,
            goals,
            0,
            test_only,
        ) {
            return Ok(0);
        }
        let Some(bindings) = plan.bindings.add(&new_bindings, test_only, &env) else {
            return Ok(0);
        };
        if test_only {
            return Ok(1);
        }
        let link = Link {
            from_id: 0,
            effect_time: StepTime::AT_END,
            to_id: open_cond.step_id,
            condition: literal.clone(),
            condition_time: open_cond.when,
        };
        let mut new_unsafes = plan.unsafes.clone();
        let mut new_num_unsafes = plan.num_unsafes;
        self.link_threats(
            &mut new_unsafes,
            &mut new_num_unsafes,
            &link,
            &plan.steps,
            &plan.orderings,
            &bindings,
        );
        plans.push(Plan::make(
            plan.steps.clone(),
            plan.num_steps,
            Some(Chain::cons(link, plan.links.clone())),
            plan.num_links + 1,
            Rc::clone(&plan.orderings),
            Rc::new(bindings),
            new_unsafes,
            new_num_unsafes,
            new_open_conds,
            new_num_open_conds,
            plan.mutex_threats.clone(),
        ));
        Ok(1)
    }

    /// Commit a causal link: apply the unifier, add the effect's and (for a
    /// new step) the action's conditions as goals, order the effect before
    /// the consumer, and record any threats.
    #[allow(clippy::too_many_arguments)]
    fn make_link(
        &self,
        plans: &mut Vec<Rc<Plan>>,
        plan: &Plan,
        step: &Step,
        effect: &Rc<crate::data::effects::Effect>,
        literal: &Literal,
        open_cond: &OpenCondition,
        unifier: &BindingList,
        test_only: bool,
    ) -> Result<i32, DomainError> {
        let env = self.env();
        // Universally quantified effect parameters get fresh variables.
        let mut new_bindings = BindingList::new();
        let mut forall_subst = SubstitutionMap::new();
        if test_only {
            new_bindings = unifier.clone();
        } else {
            for subst in unifier {
                if effect.quantifies(subst.var) {
                    let v = self
                        .problem
                        .terms()
                        .add_variable(env.terms.type_of(subst.var.into()));
                    forall_subst.insert(subst.var, v.into());
                    new_bindings.push(Binding::equality(
                        v,
                        subst.var_id,
                        subst.term,
                        subst.term_id,
                    ));
                } else {
                    new_bindings.push(subst.clone());
                }
            }
        }

        // A conditional effect contributes its condition as a new goal.
        let mut new_open_conds = if test_only {
            None
        } else {
            Chain::remove(&plan.open_conds, open_cond)
        };
        let mut new_num_open_conds = if test_only { 0 } else { plan.num_open_conds - 1 };
        let mut cond_goal = Formula::and(
            Rc::clone(&effect.condition),
            Rc::clone(&effect.link_condition),
        );
        if !cond_goal.is_tautology() {
            if !test_only && !effect.parameters.is_empty() {
                for &vi in &effect.parameters {
                    if !forall_subst.contains_key(&vi) {
                        let v = self
                            .problem
                            .terms()
                            .add_variable(env.terms.type_of(vi.into()));
                        forall_subst.insert(vi, v.into());
                    }
                }
                cond_goal = cond_goal.substitute(&forall_subst, &env);
            }
            if !self.add_goal(
                &mut new_open_conds,
                &mut new_num_open_conds,
                &mut new_bindings,
                Rc::clone(&cond_goal),
                step.id,
                test_only,
            ) {
                return Ok(0);
            }
        }

        // A new step also contributes its preconditions and, if enabled,
        // its parameter-domain constraint.
        let mut bindings = Rc::clone(&plan.bindings);
        let mut new_steps = if test_only { None } else { plan.steps.clone() };
        let mut new_num_steps = if test_only { 0 } else { plan.num_steps };
        let is_new_step = step.id > plan.num_steps;
        if is_new_step {
            if !self.add_goal(
                &mut new_open_conds,
                &mut new_num_open_conds,
                &mut new_bindings,
                Rc::clone(&step.action.condition),
                step.id,
                test_only,
            ) {
                return Ok(0);
            }
            if self.params.domain_constraints {
                let Some(graph) = self.graph.as_ref() else {
                    return Ok(0);
                };
                match bindings.add_step(step.id, &step.action, graph, &env)? {
                    None => return Ok(0),
                    Some(b) => bindings = Rc::new(b),
                }
            }
            if !test_only {
                new_steps = Some(Chain::cons(step.clone(), new_steps));
                new_num_steps += 1;
            }
        }
        let Some(added) = bindings.add(&new_bindings, test_only, &env) else {
            return Ok(0);
        };
        if test_only {
            return Ok(1);
        }
        let bindings = Rc::new(added);

        // Order the effect before the consumer's condition.
        let et = effect_time(effect);
        let gt = condition_start_time(open_cond.when);
        let bounds = if is_new_step && plan.orderings.is_temporal() {
            let min_duration = step.action.constant_min_duration()?;
            let max_duration = step.action.constant_max_duration()?;
            let mut min_start = THRESHOLD;
            let mut min_end;
            if let Some(graph) = &self.graph {
                let (h, hs) = graph.formula_values(
                    &step.action.condition,
                    step.id,
                    self.heuristic_bindings(&bindings),
                    self.problem,
                );
                if hs.makespan > min_start {
                    min_start = hs.makespan;
                }
                min_end = min_start + min_duration;
                if h.makespan > min_end {
                    min_end = h.makespan;
                }
            } else {
                min_end = THRESHOLD + min_duration;
            }
            Some(StepBounds { min_start, min_end, min_duration, max_duration })
        } else {
            None
        };
        let ordering = Ordering::new(step.id, et, open_cond.step_id, gt);
        let mut new_orderings = plan.orderings.refine_step(&ordering, step.id, bounds);
        if let Some(orderings) = &new_orderings {
            if !cond_goal.is_tautology() {
                if let Some(graph) = &self.graph {
                    let (h, hs) = graph.formula_values(
                        &cond_goal,
                        step.id,
                        self.heuristic_bindings(&bindings),
                        self.problem,
                    );
                    new_orderings = orderings.refine_bounds(step.id, hs.makespan, h.makespan);
                }
            }
        }
        let Some(new_orderings) = new_orderings else {
            return Ok(0);
        };

        // Record the new link and every threat it creates or receives.
        let link = Link {
            from_id: step.id,
            effect_time: et,
            to_id: open_cond.step_id,
            condition: literal.clone(),
            condition_time: open_cond.when,
        };
        let mut new_unsafes = plan.unsafes.clone();
        let mut new_num_unsafes = plan.num_unsafes;
        self.link_threats(
            &mut new_unsafes,
            &mut new_num_unsafes,
            &link,
            &new_steps,
            &new_orderings,
            &bindings,
        );
        if is_new_step {
            self.step_threats(
                &mut new_unsafes,
                &mut new_num_unsafes,
                step,
                &plan.links,
                &new_orderings,
                &bindings,
            );
        }
        plans.push(Plan::make(
            new_steps,
            new_num_steps,
            Some(Chain::cons(link, plan.links.clone())),
            plan.num_links + 1,
            Rc::new(new_orderings),
            bindings,
            new_unsafes,
            new_num_unsafes,
            new_open_conds,
            new_num_open_conds,
            plan.mutex_threats.clone(),
        ));
        Ok(1)
    }

    /// Bind every remaining parameter of every step to some object,
    /// backtracking over candidates.
    pub(crate) fn step_instantiation(
        &self,
        steps: &ChainRef<Step>,
        n: usize,
        bindings: Rc<Bindings>,
    ) -> Option<Rc<Bindings>> {
        let env = self.env();
        let Some(cell) = steps.as_deref() else {
            return Some(bindings);
        };
        let step = cell.head();
        let parameters = step.action.parameters();
        if parameters.len() <= n {
            return self.step_instantiation(cell.tail(), 0, bindings);
        }
        let variable = parameters[n];
        if Term::from(variable) != bindings.get_binding(variable.into(), step.id) {
            return self.step_instantiation(steps, n + 1, bindings);
        }
        let candidates = self
            .problem
            .terms()
            .compatible_objects(env.types, env.terms.type_of(variable.into()));
        for &obj in candidates.iter() {
            let binding = vec![Binding::equality(variable, step.id, obj.into(), 0)];
            if let Some(extended) = bindings.add(&binding, false, &env) {
                if let Some(result) = self.step_instantiation(steps, n + 1, Rc::new(extended)) {
                    return Some(result);
                }
            }
        }
        None
    }

    /// Count refinements of a threat, giving up early past `limit`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn unsafe_refinements(
        &self,
        plan: &Plan,
        refinements: &mut i32,
        separable: &mut i32,
        promotable: &mut i32,
        demotable: &mut i32,
        unsafe_link: &Unsafe,
        limit: i32,
    ) -> bool {
        if *refinements >= 0 {
            return *refinements <= limit;
        }
        let env = self.env();
        let link = &unsafe_link.link;
        let lt1 = link.effect_time;
        let lt2 = condition_end_time(link.condition_time);
        let et = effect_time(&unsafe_link.effect);
        let mut unifier = BindingList::new();
        if plan
            .orderings
            .possibly_not_after(link.from_id, lt1, unsafe_link.step_id, et)
            && plan
                .orderings
                .possibly_not_before(link.to_id, lt2, unsafe_link.step_id, et)
            && plan.bindings.affects(
                &mut unifier,
                &unsafe_link.effect.literal,
                unsafe_link.step_id,
                &link.condition,
                link.to_id,
                &env,
            )
        {
            let mut count = 0;
            let mut dummy = Vec::new();
            if *separable < 0 {
                *separable = self.separate_unsafe(&mut dummy, plan, unsafe_link, &unifier, true);
            }
            count += *separable;
            if count <= limit {
                if *promotable < 0 {
                    *promotable = self.promote_unsafe(&mut dummy, plan, unsafe_link, true);
                }
                count += *promotable;
                if count <= limit {
                    if *demotable < 0 {
                        *demotable = self.demote_unsafe(&mut dummy, plan, unsafe_link, true);
                    }
                    *refinements = count + *demotable;
                    return *refinements <= limit;
                }
            }
            false
        } else {
            *separable = 0;
            *promotable = 0;
            *demotable = 0;
            *refinements = 1;
            *refinements <= limit
        }
    }

    /// The number of ways a threat can be separated; zero means it is not
    /// separable (or bogus).
    pub(crate) fn is_separable(&self, plan: &Plan, unsafe_link: &Unsafe) -> i32 {
        let env = self.env();
        let link = &unsafe_link.link;
        let lt1 = link.effect_time;
        let lt2 = condition_end_time(link.condition_time);
        let et = effect_time(&unsafe_link.effect);
        let mut unifier = BindingList::new();
        if plan
            .orderings
            .possibly_not_after(link.from_id, lt1, unsafe_link.step_id, et)
            && plan
                .orderings
                .possibly_not_before(link.to_id, lt2, unsafe_link.step_id, et)
            && plan.bindings.affects(
                &mut unifier,
                &unsafe_link.effect.literal,
                unsafe_link.step_id,
                &link.condition,
                link.to_id,
                &env,
            )
        {
            let mut dummy = Vec::new();
            self.separate_unsafe(&mut dummy, plan, unsafe_link, &unifier, true)
        } else {
            0
        }
    }

    /// Check if an open condition is threatened by some step's effect.
    pub(crate) fn is_unsafe_open_condition(&self, plan: &Plan, open_cond: &OpenCondition) -> bool {
        let env = self.env();
        let Some(goal) = open_cond.literal() else {
            return false;
        };
        let gt = condition_end_time(open_cond.when);
        for step in Chain::iter(&plan.steps) {
            if !plan
                .orderings
                .possibly_not_before(open_cond.step_id, gt, step.id, StepTime::AT_START)
            {
                continue;
            }
            for effect in &step.action.effects {
                let et = effect_time(effect);
                let mut mgu = BindingList::new();
                if plan
                    .orderings
                    .possibly_not_before(open_cond.step_id, gt, step.id, et)
                    && plan.bindings.affects(
                        &mut mgu,
                        &effect.literal,
                        step.id,
                        &goal,
                        open_cond.step_id,
                        &env,
                    )
                {
                    return true;
                }
            }
        }
        false
    }

    /// Count refinements of an open condition, giving up early past
    /// `limit`.
    pub(crate) fn open_cond_refinements(
        &self,
        plan: &Plan,
        refinements: &mut i32,
        addable: &mut i32,
        reusable: &mut i32,
        open_cond: &OpenCondition,
        limit: i32,
    ) -> Result<bool, DomainError> {
        if *refinements >= 0 {
            return Ok(*refinements <= limit);
        }
        if let Some(literal) = open_cond.literal() {
            let mut count = 0;
            if *addable < 0 && !self.addable_steps(plan, addable, &literal, open_cond, limit)? {
                return Ok(false);
            }
            count += *addable;
            if count <= limit {
                if *reusable < 0
                    && !self.reusable_steps(plan, reusable, &literal, open_cond, limit)?
                {
                    return Ok(false);
                }
                *refinements = count + *reusable;
                return Ok(*refinements <= limit);
            }
            Ok(false)
        } else {
            let mut dummy = Vec::new();
            if open_cond.disjuncts().is_some() {
                *refinements = self.handle_disjunction(&mut dummy, plan, open_cond, true);
                Ok(*refinements <= limit)
            } else {
                *refinements = self.handle_inequality(&mut dummy, plan, open_cond, true);
                Ok(*refinements <= limit)
            }
        }
    }

    /// Count the add-step refinements of a literal open condition.
    pub(crate) fn addable_steps(
        &self,
        plan: &Plan,
        refinements: &mut i32,
        literal: &Literal,
        open_cond: &OpenCondition,
        limit: i32,
    ) -> Result<bool, DomainError> {
        let mut count = 0;
        let mut dummy = Vec::new();
        if let Some(achievers) = self.literal_achievers(literal) {
            for (action, effect) in achievers {
                if !action.is_synthetic() {
                    let step = Step::new(plan.num_steps + 1, Rc::clone(action));
                    count +=
                        self.new_link(&mut dummy, plan, &step, effect, literal, open_cond, true)?;
                    if count > limit {
                        return Ok(false);
                    }
                }
            }
        }
        *refinements = count;
        Ok(count <= limit)
    }

    /// Count the reuse-step refinements of a literal open condition.
    pub(crate) fn reusable_steps(
        &self,
        plan: &Plan,
        refinements: &mut i32,
        literal: &Literal,
        open_cond: &OpenCondition,
        limit: i32,
    ) -> Result<bool, DomainError> {
        let mut count = 0;
        let mut dummy = Vec::new();
        if let Some(achievers) = self.literal_achievers(literal) {
            let gt = condition_start_time(open_cond.when);
            for step in Chain::iter(&plan.steps) {
                if !plan.orderings.possibly_before(
                    step.id,
                    StepTime::AT_START,
                    open_cond.step_id,
                    gt,
                ) {
                    continue;
                }
                for (action, effect) in achievers {
                    if action.id != step.action.id {
                        continue;
                    }
                    let et = effect_time(effect);
                    if plan
                        .orderings
                        .possibly_before(step.id, et, open_cond.step_id, gt)
                    {
                        count +=
                            self.new_link(&mut dummy, plan, step, effect, literal, open_cond, true)?;
                        if count > limit {
                            return Ok(false);
                        }
                    }
                }
            }
        }
        if literal.negated {
            count += self.new_cw_link(&mut dummy, plan, literal, open_cond, true)?;
        }
        *refinements = count;
        Ok(count <= limit)
    }
}

/// Rebuild a universal quantification over fresh parameters, collapsing
/// constant bodies.
fn requantified(parameters: Vec<crate::data::terms::Variable>, body: Rc<Formula>) -> Rc<Formula> {
    if body.is_tautology() || body.is_contradiction() {
        body
    } else {
        Rc::new(Formula::Forall(Quantified { parameters, body }, RefCell::new(None)))
    }
}

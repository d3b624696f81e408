use std::collections::BTreeSet;
use std::rc::Rc;

use crate::data::actions::Action;
use crate::data::domain::Domain;
use crate::data::effects::{Effect, EffectTime};
use crate::data::expressions::{Expression, Fluent, ValueMap};
use crate::data::formulas::{Atom, Formula, Literal};
use crate::data::terms::TermTable;
use crate::data::{DomainError, ModelEnv};

/// A planning problem: objects, initial state, timed initial literals, goal,
/// and metric, against a fixed domain.
#[derive(Debug)]
pub struct Problem {
    name: String,
    domain: Rc<Domain>,
    terms: Rc<TermTable>,
    init_atoms: BTreeSet<Rc<Atom>>,
    init_values: ValueMap,
    timed_literals: Vec<(f32, Literal)>,
    init_action: Rc<Action>,
    timed_actions: Vec<(f32, Rc<Action>)>,
    goal: Rc<Formula>,
    metric: Rc<Expression>,
}

impl Problem {
    pub fn new(name: impl Into<String>, domain: Rc<Domain>) -> Problem {
        let terms = Rc::new(TermTable::extending(Rc::clone(domain.terms())));
        let init_action = Rc::new(Action::ground(domain.fresh_action_id(), "<init 0>", false));
        Problem {
            name: name.into(),
            domain,
            terms,
            init_atoms: BTreeSet::new(),
            init_values: ValueMap::new(),
            timed_literals: Vec::new(),
            init_action,
            timed_actions: Vec::new(),
            goal: Formula::truth(),
            metric: Expression::value(0.0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> &Rc<Domain> {
        &self.domain
    }

    pub fn terms(&self) -> &Rc<TermTable> {
        &self.terms
    }

    pub fn env(&self) -> ModelEnv<'_> {
        ModelEnv { types: self.domain.types(), terms: &self.terms }
    }

    pub fn init_atoms(&self) -> &BTreeSet<Rc<Atom>> {
        &self.init_atoms
    }

    pub fn init_values(&self) -> &ValueMap {
        &self.init_values
    }

    /// The synthetic action whose effects assert the initial atoms. Valid
    /// after [`Problem::finish`].
    pub fn init_action(&self) -> &Rc<Action> {
        &self.init_action
    }

    /// Synthetic actions for timed initial literals, ordered by time. Valid
    /// after [`Problem::finish`].
    pub fn timed_actions(&self) -> &[(f32, Rc<Action>)] {
        &self.timed_actions
    }

    pub fn goal(&self) -> &Rc<Formula> {
        &self.goal
    }

    pub fn metric(&self) -> &Rc<Expression> {
        &self.metric
    }

    pub fn add_init_atom(&mut self, atom: Rc<Atom>) {
        self.init_atoms.insert(atom);
    }

    /// Add a timed initial literal. Time zero positive literals fold into
    /// the initial state.
    pub fn add_init_literal(&mut self, time: f32, literal: Literal) {
        if time == 0.0 {
            if !literal.negated {
                self.add_init_atom(Rc::clone(&literal.atom));
            }
        } else {
            self.timed_literals.push((time, literal));
        }
    }

    pub fn add_init_value(&mut self, fluent: Rc<Fluent>, value: f32) {
        self.init_values.insert(fluent, value);
    }

    pub fn set_goal(&mut self, goal: Rc<Formula>) {
        self.goal = goal;
    }

    /// Set the metric to minimize; a maximized metric is negated. The
    /// metric is folded against the initial values.
    pub fn set_metric(&mut self, metric: Rc<Expression>, negate: bool) -> Result<(), DomainError> {
        let metric = if negate {
            Expression::subtraction(Expression::value(0.0), metric)
        } else {
            metric
        };
        let functions = self.domain.functions();
        self.metric = metric.instantiate(
            &Default::default(),
            &self.init_values,
            |f| functions.is_static(f),
        )?;
        Ok(())
    }

    pub fn constant_metric(&self) -> bool {
        self.metric.as_value().is_some()
    }

    /// Freeze the synthetic initial and timed actions. Call once after all
    /// initial conditions are in place.
    pub fn finish(&mut self) {
        let mut init = Action::ground(self.init_action.id, "<init 0>", false);
        for atom in &self.init_atoms {
            init.add_effect(Effect::new(
                Literal::positive(Rc::clone(atom)),
                EffectTime::AtEnd,
            ));
        }
        self.init_action = Rc::new(init);

        let mut by_time: Vec<(f32, Vec<Literal>)> = Vec::new();
        let mut sorted = self.timed_literals.clone();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
        for (time, literal) in sorted {
            match by_time.last_mut() {
                Some((t, literals)) if *t == time => literals.push(literal),
                _ => by_time.push((time, vec![literal])),
            }
        }
        self.timed_actions = by_time
            .into_iter()
            .map(|(time, literals)| {
                let mut action = Action::ground(
                    self.domain.fresh_action_id(),
                    format!("<init {}>", time),
                    false,
                );
                for literal in literals {
                    action.add_effect(Effect::new(literal, EffectTime::AtEnd));
                }
                (time, Rc::new(action))
            })
            .collect();
    }

    /// Ground every schema of the domain against this problem's objects.
    pub fn instantiated_actions(&self) -> Result<Vec<Rc<Action>>, DomainError> {
        let mut actions = Vec::new();
        for schema in self.domain.actions().values() {
            actions.extend(schema.instantiations(self)?);
        }
        Ok(actions)
    }
}

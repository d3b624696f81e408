use std::rc::Rc;

use crate::data::effects::Effect;
use crate::data::expressions::Expression;
use crate::data::formulas::{Formula, Literal};
use crate::data::problem::Problem;
use crate::data::terms::{Object, SubstitutionMap, Variable};
use crate::data::{DomainError, ModelEnv};
use crate::planner::bindings::{BindingList, Bindings};

/// What distinguishes a lifted schema from a fully ground action.
#[derive(Clone, Debug)]
pub enum ActionKind {
    Schema { parameters: Vec<Variable> },
    Ground { arguments: Vec<Object> },
}

/// An action definition: named, with a condition, a list of effects, and a
/// duration interval. Schemas carry typed parameter variables; ground
/// actions carry object arguments.
#[derive(Clone, Debug)]
pub struct Action {
    pub id: usize,
    pub name: String,
    pub condition: Rc<Formula>,
    pub effects: Vec<Rc<Effect>>,
    pub durative: bool,
    pub min_duration: Rc<Expression>,
    pub max_duration: Rc<Expression>,
    pub kind: ActionKind,
}

impl Action {
    pub fn schema(id: usize, name: impl Into<String>, durative: bool) -> Action {
        Action {
            id,
            name: name.into(),
            condition: Formula::truth(),
            effects: Vec::new(),
            durative,
            min_duration: Expression::value(0.0),
            max_duration: Expression::value(if durative { f32::INFINITY } else { 0.0 }),
            kind: ActionKind::Schema { parameters: Vec::new() },
        }
    }

    pub fn ground(id: usize, name: impl Into<String>, durative: bool) -> Action {
        Action {
            id,
            name: name.into(),
            condition: Formula::truth(),
            effects: Vec::new(),
            durative,
            min_duration: Expression::value(0.0),
            max_duration: Expression::value(if durative { f32::INFINITY } else { 0.0 }),
            kind: ActionKind::Ground { arguments: Vec::new() },
        }
    }

    pub fn parameters(&self) -> &[Variable] {
        match &self.kind {
            ActionKind::Schema { parameters } => parameters,
            ActionKind::Ground { .. } => &[],
        }
    }

    pub fn arguments(&self) -> &[Object] {
        match &self.kind {
            ActionKind::Ground { arguments } => arguments,
            ActionKind::Schema { .. } => &[],
        }
    }

    pub fn is_schema(&self) -> bool {
        matches!(self.kind, ActionKind::Schema { .. })
    }

    /// Synthetic actions (initial state, timed initial literals, the goal)
    /// have bracketed names and never appear as plan steps in output.
    pub fn is_synthetic(&self) -> bool {
        self.name.starts_with('<')
    }

    pub fn add_parameter(&mut self, variable: Variable) {
        if let ActionKind::Schema { parameters } = &mut self.kind {
            parameters.push(variable);
        }
    }

    pub fn add_argument(&mut self, object: Object) {
        if let ActionKind::Ground { arguments } = &mut self.kind {
            arguments.push(object);
        }
    }

    pub fn set_condition(&mut self, condition: Rc<Formula>) {
        self.condition = condition;
    }

    pub fn add_effect(&mut self, effect: Effect) {
        self.effects.push(Rc::new(effect));
    }

    /// Tighten the lower duration bound.
    pub fn set_min_duration(&mut self, expr: Rc<Expression>) {
        self.min_duration = Expression::maximum(Rc::clone(&self.min_duration), expr);
    }

    /// Tighten the upper duration bound.
    pub fn set_max_duration(&mut self, expr: Rc<Expression>) {
        self.max_duration = Expression::minimum(Rc::clone(&self.max_duration), expr);
    }

    pub fn set_duration(&mut self, expr: Rc<Expression>) {
        self.set_min_duration(Rc::clone(&expr));
        self.set_max_duration(expr);
    }

    /// The lower duration bound as a constant, or an error if it did not
    /// ground to one.
    pub fn constant_min_duration(&self) -> Result<f32, DomainError> {
        self.min_duration
            .as_value()
            .ok_or(DomainError::NonConstantDuration)
    }

    /// The upper duration bound as a constant, or an error if it did not
    /// ground to one.
    pub fn constant_max_duration(&self) -> Result<f32, DomainError> {
        self.max_duration
            .as_value()
            .ok_or(DomainError::NonConstantDuration)
    }

    /// Strengthen effect link conditions. A negative effect must not
    /// contradict a same-time positive effect of the same action, and no
    /// effect may support a condition the action's own precondition asserts
    /// at the same time.
    pub fn strengthen_effects(&mut self, env: &ModelEnv) {
        let mut link_conditions: Vec<Rc<Formula>> =
            self.effects.iter().map(|e| Rc::clone(&e.link_condition)).collect();

        for (i, ei) in self.effects.iter().enumerate() {
            if !ei.literal.negated {
                continue;
            }
            let mut cond = Formula::truth();
            for ej in &self.effects {
                if cond.is_contradiction() {
                    break;
                }
                if ei.when != ej.when || ej.literal.negated {
                    continue;
                }
                // Only separate two effects with identical quantified
                // parameter lists.
                if ei.parameters != ej.parameters {
                    continue;
                }
                let mut mgu = BindingList::new();
                let positive = Literal::positive(Rc::clone(&ei.literal.atom));
                if Bindings::is_unifiable(&mut mgu, &positive, 1, &ej.literal, 1, env) {
                    let mut sep = Formula::falsity();
                    for b in &mgu {
                        sep = Formula::or(
                            sep,
                            Formula::inequality(b.var.into(), 0, b.term, 0, env),
                        );
                    }
                    let guard = Formula::or(sep, Formula::negation(&ej.condition));
                    cond = Formula::and(cond, guard);
                }
            }
            if !cond.is_tautology() {
                link_conditions[i] = cond;
            }
        }

        for (i, effect) in self.effects.iter().enumerate() {
            link_conditions[i] = Formula::and(
                Rc::clone(&link_conditions[i]),
                self.condition.separator(effect, env),
            );
        }

        let strengthened = self
            .effects
            .iter()
            .zip(link_conditions)
            .map(|(effect, link_condition)| {
                if Rc::ptr_eq(&effect.link_condition, &link_condition) {
                    Rc::clone(effect)
                } else {
                    let mut e = effect.as_ref().clone();
                    e.link_condition = link_condition;
                    Rc::new(e)
                }
            })
            .collect();
        self.effects = strengthened;
    }

    /// Ground this schema every consistent way, pruning assignments whose
    /// accumulated condition is a contradiction and dropping groundings
    /// without a single useful effect or with an empty duration interval.
    pub fn instantiations(&self, problem: &Problem) -> Result<Vec<Rc<Action>>, DomainError> {
        let parameters = self.parameters().to_vec();
        let mut actions = Vec::new();
        if parameters.is_empty() {
            if let Some(action) =
                self.instantiation(&SubstitutionMap::new(), problem, Rc::clone(&self.condition))?
            {
                actions.push(action);
            }
            return Ok(actions);
        }
        let env = problem.env();
        let mut arguments = Vec::with_capacity(parameters.len());
        for &param in &parameters {
            let objects = problem
                .terms()
                .compatible_objects(env.types, env.terms.type_of(param.into()));
            if objects.is_empty() {
                return Ok(actions);
            }
            arguments.push(objects);
        }
        let mut args = SubstitutionMap::new();
        self.instantiate_rec(
            &parameters,
            0,
            &arguments,
            &mut args,
            Rc::clone(&self.condition),
            &mut actions,
            problem,
        )?;
        Ok(actions)
    }

    #[allow(clippy::too_many_arguments)]
    fn instantiate_rec(
        &self,
        parameters: &[Variable],
        depth: usize,
        arguments: &[Rc<Vec<Object>>],
        args: &mut SubstitutionMap,
        condition: Rc<Formula>,
        actions: &mut Vec<Rc<Action>>,
        problem: &Problem,
    ) -> Result<(), DomainError> {
        if depth == parameters.len() {
            if let Some(action) = self.instantiation(args, problem, condition)? {
                actions.push(action);
            }
            return Ok(());
        }
        for &obj in arguments[depth].iter() {
            let mut partial = SubstitutionMap::new();
            partial.insert(parameters[depth], obj.into());
            let narrowed = condition.instantiate(&partial, problem);
            if narrowed.is_contradiction() {
                continue;
            }
            args.insert(parameters[depth], obj.into());
            self.instantiate_rec(
                parameters,
                depth + 1,
                arguments,
                args,
                narrowed,
                actions,
                problem,
            )?;
        }
        args.remove(&parameters[depth]);
        Ok(())
    }

    fn instantiation(
        &self,
        args: &SubstitutionMap,
        problem: &Problem,
        condition: Rc<Formula>,
    ) -> Result<Option<Rc<Action>>, DomainError> {
        let mut effects = Vec::new();
        let mut useful = 0;
        for effect in &self.effects {
            effect.instantiations(&mut effects, &mut useful, args, problem);
        }
        if useful == 0 {
            return Ok(None);
        }
        let functions = problem.domain().functions();
        let is_static = |f| functions.is_static(f);
        let min_duration =
            self.min_duration
                .instantiate(args, problem.init_values(), is_static)?;
        let max_duration =
            self.max_duration
                .instantiate(args, problem.init_values(), is_static)?;
        if let (Some(min), Some(max)) = (min_duration.as_value(), max_duration.as_value()) {
            if min > max {
                return Ok(None);
            }
        }
        let mut ground = Action::ground(
            problem.domain().fresh_action_id(),
            self.name.clone(),
            self.durative,
        );
        for &param in self.parameters() {
            let term = args
                .get(&param)
                .copied()
                .expect("schema parameter bound during instantiation");
            if let Some(obj) = term.as_object() {
                ground.add_argument(obj);
            }
        }
        ground.condition = condition;
        ground.effects = effects;
        ground.min_duration = min_duration;
        ground.max_duration = max_duration;
        Ok(Some(Rc::new(ground)))
    }
}

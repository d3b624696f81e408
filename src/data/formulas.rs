use std::cell::RefCell;
use std::rc::Rc;

use crate::data::effects::{Effect, EffectTime};
use crate::data::predicates::Predicate;
use crate::data::problem::Problem;
use crate::data::terms::{SubstitutionMap, Term, Variable};
use crate::data::ModelEnv;
use crate::planner::bindings::{Bindings, BindingList};

/// Temporal annotation on a condition.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FormulaTime {
    AtStart,
    OverAll,
    AtEnd,
}

/// A predicate applied to a list of terms. Atoms are shared through `Rc` and
/// compared structurally.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Atom {
    pub predicate: Predicate,
    pub terms: Vec<Term>,
}

impl Atom {
    pub fn new(predicate: Predicate, terms: Vec<Term>) -> Rc<Atom> {
        Rc::new(Atom { predicate, terms })
    }

    pub fn is_ground(&self) -> bool {
        self.terms.iter().all(|t| t.is_object())
    }

    /// Apply a substitution, returning the same `Rc` when nothing changed.
    pub fn substitute(self: &Rc<Self>, subst: &SubstitutionMap) -> Rc<Atom> {
        let mut changed = false;
        let terms: Vec<Term> = self
            .terms
            .iter()
            .map(|&t| match t.as_variable().and_then(|v| subst.get(&v)) {
                Some(&replacement) => {
                    changed = true;
                    replacement
                }
                None => t,
            })
            .collect();
        if changed {
            Atom::new(self.predicate, terms)
        } else {
            Rc::clone(self)
        }
    }
}

/// Tests if a (possibly lifted) atom can match a ground atom, reusing one
/// consistent assignment for repeated variables.
fn unifiable_atoms(lifted: &Atom, ground: &Atom) -> bool {
    if lifted.predicate != ground.predicate || lifted.terms.len() != ground.terms.len() {
        return false;
    }
    let mut bound = SubstitutionMap::new();
    for (&t1, &t2) in lifted.terms.iter().zip(ground.terms.iter()) {
        match t1.as_variable() {
            None => {
                if t1 != t2 {
                    return false;
                }
            }
            Some(v) => match bound.get(&v) {
                Some(&prev) => {
                    if prev != t2 {
                        return false;
                    }
                }
                None => {
                    bound.insert(v, t2);
                }
            },
        }
    }
    true
}

/// An atom or its negation.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Literal {
    pub atom: Rc<Atom>,
    pub negated: bool,
}

impl Literal {
    pub fn positive(atom: Rc<Atom>) -> Literal {
        Literal { atom, negated: false }
    }

    pub fn negative(atom: Rc<Atom>) -> Literal {
        Literal { atom, negated: true }
    }

    pub fn predicate(&self) -> Predicate {
        self.atom.predicate
    }

    pub fn negation(&self) -> Literal {
        Literal { atom: Rc::clone(&self.atom), negated: !self.negated }
    }

    pub fn substitute(&self, subst: &SubstitutionMap) -> Literal {
        Literal { atom: self.atom.substitute(subst), negated: self.negated }
    }
}

/// An equality or inequality between a variable and a term, each optionally
/// pinned to a step. A zero id means "the step this condition belongs to".
#[derive(Clone, Debug, PartialEq)]
pub struct BindingLiteral {
    pub variable: Variable,
    pub id1: usize,
    pub term: Term,
    pub id2: usize,
}

impl BindingLiteral {
    pub fn step_id1(&self, default_id: usize) -> usize {
        if self.id1 != 0 {
            self.id1
        } else {
            default_id
        }
    }

    pub fn step_id2(&self, default_id: usize) -> usize {
        if self.id2 != 0 {
            self.id2
        } else {
            default_id
        }
    }
}

/// A quantified subformula.
#[derive(Clone, Debug)]
pub struct Quantified {
    pub parameters: Vec<Variable>,
    pub body: Rc<Formula>,
}

/// A condition formula. Immutable once built; shared through `Rc`.
#[derive(Debug)]
pub enum Formula {
    True,
    False,
    Atom(Rc<Atom>),
    Negation(Rc<Atom>),
    Equality(BindingLiteral),
    Inequality(BindingLiteral),
    Conjunction(Vec<Rc<Formula>>),
    Disjunction(Vec<Rc<Formula>>),
    Exists(Quantified),
    /// Universal quantification, with the universal base cached after the
    /// first expansion.
    Forall(Quantified, RefCell<Option<Rc<Formula>>>),
    Timed(Literal, FormulaTime),
}

impl Formula {
    pub fn truth() -> Rc<Formula> {
        Rc::new(Formula::True)
    }

    pub fn falsity() -> Rc<Formula> {
        Rc::new(Formula::False)
    }

    pub fn atom(atom: Rc<Atom>) -> Rc<Formula> {
        Rc::new(Formula::Atom(atom))
    }

    pub fn from_literal(literal: &Literal) -> Rc<Formula> {
        if literal.negated {
            Rc::new(Formula::Negation(Rc::clone(&literal.atom)))
        } else {
            Rc::new(Formula::Atom(Rc::clone(&literal.atom)))
        }
    }

    /// A literal stamped with a condition time. Start conditions carry no
    /// wrapper.
    pub fn timed(literal: Literal, when: FormulaTime) -> Rc<Formula> {
        if when == FormulaTime::AtStart {
            Formula::from_literal(&literal)
        } else {
            Rc::new(Formula::Timed(literal, when))
        }
    }

    pub fn is_tautology(&self) -> bool {
        matches!(self, Formula::True)
    }

    pub fn is_contradiction(&self) -> bool {
        matches!(self, Formula::False)
    }

    /// The literal of this formula, if it is one (a timed wrapper included).
    pub fn literal(&self) -> Option<Literal> {
        match self {
            Formula::Atom(a) => Some(Literal::positive(Rc::clone(a))),
            Formula::Negation(a) => Some(Literal::negative(Rc::clone(a))),
            _ => None,
        }
    }

    /// The literal and time stamp of this condition. Bare literals read as
    /// start conditions.
    pub fn timed_literal(&self) -> Option<(Literal, FormulaTime)> {
        match self {
            Formula::Timed(l, when) => Some((l.clone(), *when)),
            _ => self.literal().map(|l| (l, FormulaTime::AtStart)),
        }
    }

    /// Normalising conjunction: identities drop out, a contradiction absorbs
    /// everything, nested conjunctions flatten.
    pub fn and(f1: Rc<Formula>, f2: Rc<Formula>) -> Rc<Formula> {
        if f1.is_contradiction() || f2.is_tautology() || Rc::ptr_eq(&f1, &f2) {
            return f1;
        }
        if f2.is_contradiction() || f1.is_tautology() {
            return f2;
        }
        let mut conjuncts = Vec::new();
        match f1.as_ref() {
            Formula::Conjunction(fs) => conjuncts.extend(fs.iter().cloned()),
            _ => conjuncts.push(f1),
        }
        match f2.as_ref() {
            Formula::Conjunction(fs) => conjuncts.extend(fs.iter().cloned()),
            _ => conjuncts.push(f2),
        }
        Rc::new(Formula::Conjunction(conjuncts))
    }

    /// Normalising disjunction, dual to [`Formula::and`].
    pub fn or(f1: Rc<Formula>, f2: Rc<Formula>) -> Rc<Formula> {
        if f1.is_tautology() || f2.is_contradiction() || Rc::ptr_eq(&f1, &f2) {
            return f1;
        }
        if f2.is_tautology() || f1.is_contradiction() {
            return f2;
        }
        let mut disjuncts = Vec::new();
        match f1.as_ref() {
            Formula::Disjunction(fs) => disjuncts.extend(fs.iter().cloned()),
            _ => disjuncts.push(f1),
        }
        match f2.as_ref() {
            Formula::Disjunction(fs) => disjuncts.extend(fs.iter().cloned()),
            _ => disjuncts.push(f2),
        }
        Rc::new(Formula::Disjunction(disjuncts))
    }

    /// Negation, pushed through connectives and quantifiers.
    pub fn negation(f: &Rc<Formula>) -> Rc<Formula> {
        match f.as_ref() {
            Formula::True => Formula::falsity(),
            Formula::False => Formula::truth(),
            Formula::Atom(a) => Rc::new(Formula::Negation(Rc::clone(a))),
            Formula::Negation(a) => Rc::new(Formula::Atom(Rc::clone(a))),
            Formula::Equality(bl) => Rc::new(Formula::Inequality(bl.clone())),
            Formula::Inequality(bl) => Rc::new(Formula::Equality(bl.clone())),
            Formula::Conjunction(fs) => fs
                .iter()
                .fold(Formula::falsity(), |acc, c| {
                    Formula::or(acc, Formula::negation(c))
                }),
            Formula::Disjunction(fs) => fs
                .iter()
                .fold(Formula::truth(), |acc, d| {
                    Formula::and(acc, Formula::negation(d))
                }),
            Formula::Exists(q) => Rc::new(Formula::Forall(
                Quantified {
                    parameters: q.parameters.clone(),
                    body: Formula::negation(&q.body),
                },
                RefCell::new(None),
            )),
            Formula::Forall(q, _) => Rc::new(Formula::Exists(Quantified {
                parameters: q.parameters.clone(),
                body: Formula::negation(&q.body),
            })),
            Formula::Timed(l, when) => Rc::new(Formula::Timed(l.negation(), *when)),
        }
    }

    /// An equality over two terms, simplified when it is decided by term
    /// identity or by type incompatibility.
    pub fn equality(t1: Term, id1: usize, t2: Term, id2: usize, env: &ModelEnv) -> Rc<Formula> {
        if t1 == t2 && id1 == id2 {
            return Formula::truth();
        }
        match (t1.as_variable(), t2.as_variable()) {
            (None, None) => {
                if t1 == t2 {
                    Formula::truth()
                } else {
                    Formula::falsity()
                }
            }
            (Some(v1), _) => {
                let ty1 = env.terms.type_of(t1);
                let ty2 = env.terms.type_of(t2);
                let possible = if t2.is_variable() {
                    env.types.is_compatible(ty1, ty2)
                } else {
                    env.types.is_subtype(ty2, ty1)
                };
                if possible {
                    Rc::new(Formula::Equality(BindingLiteral {
                        variable: v1,
                        id1,
                        term: t2,
                        id2,
                    }))
                } else {
                    Formula::falsity()
                }
            }
            (None, Some(v2)) => {
                let ty1 = env.terms.type_of(t1);
                let ty2 = env.terms.type_of(t2);
                if env.types.is_subtype(ty1, ty2) {
                    Rc::new(Formula::Equality(BindingLiteral {
                        variable: v2,
                        id1: id2,
                        term: t1,
                        id2: id1,
                    }))
                } else {
                    Formula::falsity()
                }
            }
        }
    }

    /// An inequality over two terms, dual to [`Formula::equality`].
    pub fn inequality(t1: Term, id1: usize, t2: Term, id2: usize, env: &ModelEnv) -> Rc<Formula> {
        match Formula::equality(t1, id1, t2, id2, env).as_ref() {
            Formula::True => Formula::falsity(),
            Formula::False => Formula::truth(),
            Formula::Equality(bl) => Rc::new(Formula::Inequality(bl.clone())),
            _ => unreachable!("equality simplifies to a constant or a binding literal"),
        }
    }

    /// Apply a variable substitution.
    pub fn substitute(self: &Rc<Self>, subst: &SubstitutionMap, env: &ModelEnv) -> Rc<Formula> {
        match self.as_ref() {
            Formula::True | Formula::False => Rc::clone(self),
            Formula::Atom(a) => {
                let inst = a.substitute(subst);
                if Rc::ptr_eq(&inst, a) {
                    Rc::clone(self)
                } else {
                    Formula::atom(inst)
                }
            }
            Formula::Negation(a) => {
                let inst = a.substitute(subst);
                if Rc::ptr_eq(&inst, a) {
                    Rc::clone(self)
                } else {
                    Rc::new(Formula::Negation(inst))
                }
            }
            Formula::Equality(bl) => {
                let t1 = substituted_term(bl.variable.into(), subst);
                let t2 = substituted_term(bl.term, subst);
                if t1 == bl.variable.into() && t2 == bl.term {
                    Rc::clone(self)
                } else {
                    Formula::equality(t1, bl.id1, t2, bl.id2, env)
                }
            }
            Formula::Inequality(bl) => {
                let t1 = substituted_term(bl.variable.into(), subst);
                let t2 = substituted_term(bl.term, subst);
                if t1 == bl.variable.into() && t2 == bl.term {
                    Rc::clone(self)
                } else {
                    Formula::inequality(t1, bl.id1, t2, bl.id2, env)
                }
            }
            Formula::Conjunction(fs) => fs.iter().fold(Formula::truth(), |acc, c| {
                Formula::and(acc, c.substitute(subst, env))
            }),
            Formula::Disjunction(fs) => fs.iter().fold(Formula::falsity(), |acc, d| {
                Formula::or(acc, d.substitute(subst, env))
            }),
            Formula::Exists(q) => {
                let body = q.body.substitute(subst, env);
                requantify_exists(self, q, body)
            }
            Formula::Forall(q, _) => {
                let body = q.body.substitute(subst, env);
                requantify_forall(self, q, body)
            }
            Formula::Timed(l, when) => {
                let inst = l.substitute(subst);
                if inst == *l {
                    Rc::clone(self)
                } else {
                    Formula::timed(inst, *when)
                }
            }
        }
    }

    /// Substitute, simplify static atoms against the initial state, and
    /// expand quantifiers over the problem's objects.
    pub fn instantiate(self: &Rc<Self>, subst: &SubstitutionMap, problem: &Problem) -> Rc<Formula> {
        let env = problem.env();
        match self.as_ref() {
            Formula::True | Formula::False => Rc::clone(self),
            Formula::Atom(a) => instantiate_atom(a, subst, problem),
            Formula::Negation(a) => Formula::negation(&instantiate_atom(a, subst, problem)),
            Formula::Equality(_) | Formula::Inequality(_) => self.substitute(subst, &env),
            Formula::Conjunction(fs) => {
                let mut result = Formula::truth();
                for c in fs {
                    result = Formula::and(result, c.instantiate(subst, problem));
                    if result.is_contradiction() {
                        break;
                    }
                }
                result
            }
            Formula::Disjunction(fs) => {
                let mut result = Formula::falsity();
                for d in fs {
                    result = Formula::or(result, d.instantiate(subst, problem));
                    if result.is_tautology() {
                        break;
                    }
                }
                result
            }
            Formula::Exists(q) => expand_quantifier(q, subst, problem, false),
            Formula::Forall(q, _) => expand_quantifier(q, subst, problem, true),
            Formula::Timed(l, when) => {
                let atom_formula = instantiate_atom(&l.atom, subst, problem);
                let inst = if l.negated {
                    Formula::negation(&atom_formula)
                } else {
                    atom_formula
                };
                match inst.literal() {
                    Some(lit) => Formula::timed(lit, *when),
                    None => inst,
                }
            }
        }
    }

    /// Like [`Formula::instantiate`] but expanding only universal
    /// quantifiers; the expansion of each universal node is cached.
    pub fn universal_base(
        self: &Rc<Self>,
        subst: &SubstitutionMap,
        problem: &Problem,
    ) -> Rc<Formula> {
        let env = problem.env();
        match self.as_ref() {
            Formula::True | Formula::False => Rc::clone(self),
            Formula::Atom(_) | Formula::Negation(_) => self.instantiate(subst, problem),
            Formula::Equality(_) | Formula::Inequality(_) => self.substitute(subst, &env),
            Formula::Conjunction(fs) => {
                let mut result = Formula::truth();
                for c in fs {
                    result = Formula::and(result, c.universal_base(subst, problem));
                    if result.is_contradiction() {
                        break;
                    }
                }
                result
            }
            Formula::Disjunction(fs) => {
                let mut result = Formula::falsity();
                for d in fs {
                    result = Formula::or(result, d.universal_base(subst, problem));
                    if result.is_tautology() {
                        break;
                    }
                }
                result
            }
            Formula::Exists(q) => {
                let body = q.body.universal_base(subst, problem);
                requantify_exists(self, q, body)
            }
            Formula::Forall(q, cache) => {
                if let Some(base) = cache.borrow().as_ref() {
                    return Rc::clone(base);
                }
                let base = expand_universal_base(q, subst, problem);
                *cache.borrow_mut() = Some(Rc::clone(&base));
                base
            }
            Formula::Timed(_, _) => self.instantiate(subst, problem),
        }
    }

    /// A formula that, when satisfied, guarantees the given effect cannot
    /// interfere with anything this formula definitely asserts. Used to
    /// compute effect link conditions.
    pub fn separator(self: &Rc<Self>, effect: &Effect, env: &ModelEnv) -> Rc<Formula> {
        match self.as_ref() {
            Formula::Atom(_) | Formula::Negation(_) => {
                let literal = self.literal().expect("literal formula");
                literal_separator(&literal, effect, env)
            }
            Formula::Conjunction(fs) => {
                let mut result = Formula::truth();
                for c in fs {
                    result = Formula::and(result, c.separator(effect, env));
                    if result.is_contradiction() {
                        break;
                    }
                }
                result
            }
            Formula::Disjunction(fs) => {
                let mut result = Formula::truth();
                for d in fs {
                    let c = Formula::and(Formula::negation(d), d.separator(effect, env));
                    result = Formula::and(result, c);
                    if result.is_contradiction() {
                        break;
                    }
                }
                result
            }
            Formula::Timed(l, when) => {
                let same_time = (*when == FormulaTime::AtEnd) == (effect.when == EffectTime::AtEnd);
                if same_time {
                    literal_separator(l, effect, env)
                } else {
                    Formula::truth()
                }
            }
            _ => Formula::truth(),
        }
    }
}

fn substituted_term(t: Term, subst: &SubstitutionMap) -> Term {
    match t.as_variable().and_then(|v| subst.get(&v)) {
        Some(&replacement) => replacement,
        None => t,
    }
}

fn requantify_exists(original: &Rc<Formula>, q: &Quantified, body: Rc<Formula>) -> Rc<Formula> {
    if Rc::ptr_eq(&body, &q.body) {
        Rc::clone(original)
    } else if body.is_tautology() || body.is_contradiction() {
        body
    } else {
        Rc::new(Formula::Exists(Quantified {
            parameters: q.parameters.clone(),
            body,
        }))
    }
}

fn requantify_forall(original: &Rc<Formula>, q: &Quantified, body: Rc<Formula>) -> Rc<Formula> {
    if Rc::ptr_eq(&body, &q.body) {
        Rc::clone(original)
    } else if body.is_tautology() || body.is_contradiction() {
        body
    } else {
        Rc::new(Formula::Forall(
            Quantified {
                parameters: q.parameters.clone(),
                body,
            },
            RefCell::new(None),
        ))
    }
}

fn instantiate_atom(atom: &Rc<Atom>, subst: &SubstitutionMap, problem: &Problem) -> Rc<Formula> {
    let inst = atom.substitute(subst);
    if problem.domain().predicates().is_static(inst.predicate) {
        if inst.is_ground() {
            if problem.init_atoms().contains(&inst) {
                Formula::truth()
            } else {
                Formula::falsity()
            }
        } else if problem
            .init_atoms()
            .iter()
            .any(|ia| unifiable_atoms(&inst, ia))
        {
            Formula::atom(inst)
        } else {
            Formula::falsity()
        }
    } else {
        Formula::atom(inst)
    }
}

/// Expand a quantifier over the cross product of objects compatible with its
/// parameters. Universal expansion folds with `and` (empty domain is true);
/// existential with `or` (empty domain is false).
fn expand_quantifier(
    q: &Quantified,
    subst: &SubstitutionMap,
    problem: &Problem,
    universal: bool,
) -> Rc<Formula> {
    let env = problem.env();
    let mut arguments = Vec::with_capacity(q.parameters.len());
    for &param in &q.parameters {
        let objects = problem
            .terms()
            .compatible_objects(env.types, env.terms.type_of(param.into()));
        if objects.is_empty() {
            return if universal { Formula::truth() } else { Formula::falsity() };
        }
        arguments.push(objects);
    }
    let mut args = subst.clone();
    let mut result = if universal { Formula::truth() } else { Formula::falsity() };
    expand_rec(q, problem, universal, &arguments, 0, &mut args, &mut result, false);
    result
}

#[allow(clippy::too_many_arguments)]
fn expand_rec(
    q: &Quantified,
    problem: &Problem,
    universal: bool,
    arguments: &[Rc<Vec<crate::data::terms::Object>>],
    depth: usize,
    args: &mut SubstitutionMap,
    result: &mut Rc<Formula>,
    base_only: bool,
) {
    if depth == q.parameters.len() {
        let branch = if base_only {
            q.body.universal_base(args, problem)
        } else {
            q.body.instantiate(args, problem)
        };
        *result = if universal {
            Formula::and(Rc::clone(result), branch)
        } else {
            Formula::or(Rc::clone(result), branch)
        };
        return;
    }
    for &obj in arguments[depth].iter() {
        args.insert(q.parameters[depth], obj.into());
        expand_rec(q, problem, universal, arguments, depth + 1, args, result, base_only);
        if universal && result.is_contradiction() {
            break;
        }
        if !universal && result.is_tautology() {
            break;
        }
    }
    args.remove(&q.parameters[depth]);
}

fn expand_universal_base(
    q: &Quantified,
    subst: &SubstitutionMap,
    problem: &Problem,
) -> Rc<Formula> {
    let env = problem.env();
    let mut arguments = Vec::with_capacity(q.parameters.len());
    for &param in &q.parameters {
        let objects = problem
            .terms()
            .compatible_objects(env.types, env.terms.type_of(param.into()));
        if objects.is_empty() {
            return Formula::truth();
        }
        arguments.push(objects);
    }
    let mut args = subst.clone();
    let mut result = Formula::truth();
    expand_rec(q, problem, true, &arguments, 0, &mut args, &mut result, true);
    result
}

/// Separator of a condition literal against an effect literal: a disjunction
/// of inequalities over the most general unifier, false when the two cannot
/// be told apart, true when they cannot interfere at all.
fn literal_separator(literal: &Literal, effect: &Effect, env: &ModelEnv) -> Rc<Formula> {
    let mut mgu = BindingList::new();
    if Bindings::is_unifiable(&mut mgu, literal, 1, &effect.literal, 1, env) {
        let mut result = Formula::falsity();
        for b in &mgu {
            if Term::from(b.var) != b.term {
                result = Formula::or(
                    result,
                    Formula::inequality(b.var.into(), 0, b.term, 0, env),
                );
            }
        }
        result
    } else {
        Formula::truth()
    }
}

#[cfg(test)]
mod tests {
    use super::{Atom, Formula, Literal};
    use crate::data::predicates::PredicateTable;
    use crate::data::terms::{SubstitutionMap, TermTable};
    use crate::data::types::{Type, TypeTable};
    use crate::data::ModelEnv;
    use std::rc::Rc;

    #[test]
    fn conjunction_normalises_constants() {
        let types = TypeTable::new();
        let terms = TermTable::new();
        let _env = ModelEnv { types: &types, terms: &terms };
        let mut preds = PredicateTable::new();
        let p = preds.add_predicate("p");
        let atom = Formula::atom(Atom::new(p, vec![]));
        assert!(Formula::and(Formula::truth(), Rc::clone(&atom))
            .literal()
            .is_some());
        assert!(Formula::and(Formula::falsity(), atom).is_contradiction());
        assert!(Formula::or(Formula::truth(), Formula::falsity()).is_tautology());
    }

    #[test]
    fn nested_conjunctions_flatten() {
        let mut preds = PredicateTable::new();
        let p = preds.add_predicate("p");
        let q = preds.add_predicate("q");
        let r = preds.add_predicate("r");
        let fp = Formula::atom(Atom::new(p, vec![]));
        let fq = Formula::atom(Atom::new(q, vec![]));
        let fr = Formula::atom(Atom::new(r, vec![]));
        let pq = Formula::and(fp, fq);
        let pqr = Formula::and(pq, fr);
        match pqr.as_ref() {
            Formula::Conjunction(fs) => assert_eq!(fs.len(), 3),
            other => panic!("expected flat conjunction, got {:?}", other),
        }
    }

    #[test]
    fn double_negation_restores_the_atom() {
        let mut preds = PredicateTable::new();
        let p = preds.add_predicate("p");
        let f = Formula::atom(Atom::new(p, vec![]));
        let back = Formula::negation(&Formula::negation(&f));
        assert_eq!(back.literal(), f.literal());
    }

    #[test]
    fn equality_of_identical_objects_is_true() {
        let types = TypeTable::new();
        let terms = TermTable::new();
        let a = terms.add_object("a", Type::OBJECT);
        let b = terms.add_object("b", Type::OBJECT);
        let env = ModelEnv { types: &types, terms: &terms };
        assert!(Formula::equality(a.into(), 0, a.into(), 0, &env).is_tautology());
        assert!(Formula::equality(a.into(), 0, b.into(), 0, &env).is_contradiction());
        assert!(Formula::inequality(a.into(), 0, b.into(), 0, &env).is_tautology());
    }

    #[test]
    fn equality_respects_types() {
        let mut types = TypeTable::new();
        let block = types.add_type("block");
        let truck = types.add_type("truck");
        let terms = TermTable::new();
        let a = terms.add_object("a", block);
        let x = terms.add_variable(truck);
        let env = ModelEnv { types: &types, terms: &terms };
        // A block can never codesignate with a truck variable.
        assert!(Formula::equality(x.into(), 0, a.into(), 0, &env).is_contradiction());
    }

    #[test]
    fn substitution_rewrites_atom_terms() {
        let types = TypeTable::new();
        let terms = TermTable::new();
        let a = terms.add_object("a", Type::OBJECT);
        let x = terms.add_variable(Type::OBJECT);
        let env = ModelEnv { types: &types, terms: &terms };
        let mut preds = PredicateTable::new();
        let p = preds.add_predicate("p");
        let f = Formula::atom(Atom::new(p, vec![x.into()]));
        let mut subst = SubstitutionMap::new();
        subst.insert(x, a.into());
        let g = f.substitute(&subst, &env);
        let literal = g.literal().unwrap();
        assert_eq!(literal, Literal::positive(Atom::new(p, vec![a.into()])));
    }
}

use std::collections::HashMap;
use std::rc::Rc;

use crate::data::functions::Function;
use crate::data::terms::{SubstitutionMap, Term};
use crate::data::DomainError;

/// A numeric state variable applied to a list of terms.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fluent {
    pub function: Function,
    pub terms: Vec<Term>,
}

impl Fluent {
    pub fn new(function: Function, terms: Vec<Term>) -> Rc<Self> {
        Rc::new(Self { function, terms })
    }

    pub fn is_ground(&self) -> bool {
        self.terms.iter().all(|t| t.is_object())
    }

    /// Apply a substitution, returning a new fluent (or the same one when
    /// nothing changed).
    pub fn substitute(self: &Rc<Self>, subst: &SubstitutionMap) -> Rc<Fluent> {
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
            Fluent::new(self.function, terms)
        } else {
            Rc::clone(self)
        }
    }
}

/// Mapping from ground fluents to their values in a state.
pub type ValueMap = HashMap<Rc<Fluent>, f32>;

/// An arithmetic expression over fluents and constants.
#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    Value(f32),
    Fluent(Rc<Fluent>),
    Addition(Rc<Expression>, Rc<Expression>),
    Subtraction(Rc<Expression>, Rc<Expression>),
    Multiplication(Rc<Expression>, Rc<Expression>),
    Division(Rc<Expression>, Rc<Expression>),
    Minimum(Rc<Expression>, Rc<Expression>),
    Maximum(Rc<Expression>, Rc<Expression>),
}

impl Expression {
    pub fn value(v: f32) -> Rc<Expression> {
        Rc::new(Expression::Value(v))
    }

    /// Return the constant value of this expression, if it is one.
    pub fn as_value(&self) -> Option<f32> {
        match self {
            Expression::Value(v) => Some(*v),
            _ => None,
        }
    }

    fn fold(
        op1: Rc<Expression>,
        op2: Rc<Expression>,
        f: fn(f32, f32) -> f32,
        make: fn(Rc<Expression>, Rc<Expression>) -> Expression,
    ) -> Rc<Expression> {
        match (op1.as_value(), op2.as_value()) {
            (Some(v1), Some(v2)) => Expression::value(f(v1, v2)),
            _ => Rc::new(make(op1, op2)),
        }
    }

    pub fn addition(op1: Rc<Expression>, op2: Rc<Expression>) -> Rc<Expression> {
        Self::fold(op1, op2, |a, b| a + b, Expression::Addition)
    }

    pub fn subtraction(op1: Rc<Expression>, op2: Rc<Expression>) -> Rc<Expression> {
        Self::fold(op1, op2, |a, b| a - b, Expression::Subtraction)
    }

    pub fn multiplication(op1: Rc<Expression>, op2: Rc<Expression>) -> Rc<Expression> {
        Self::fold(op1, op2, |a, b| a * b, Expression::Multiplication)
    }

    /// Division folds constants; a constant zero divisor is a domain error.
    pub fn division(
        op1: Rc<Expression>,
        op2: Rc<Expression>,
    ) -> Result<Rc<Expression>, DomainError> {
        if op2.as_value() == Some(0.0) {
            return Err(DomainError::DivisionByZero);
        }
        Ok(Self::fold(op1, op2, |a, b| a / b, Expression::Division))
    }

    pub fn minimum(op1: Rc<Expression>, op2: Rc<Expression>) -> Rc<Expression> {
        if op1 == op2 {
            return op1;
        }
        Self::fold(op1, op2, f32::min, Expression::Minimum)
    }

    pub fn maximum(op1: Rc<Expression>, op2: Rc<Expression>) -> Rc<Expression> {
        if op1 == op2 {
            return op1;
        }
        Self::fold(op1, op2, f32::max, Expression::Maximum)
    }

    /// Evaluate this expression in the given state.
    pub fn eval(&self, values: &ValueMap) -> Result<f32, DomainError> {
        match self {
            Expression::Value(v) => Ok(*v),
            Expression::Fluent(f) => values
                .get(f)
                .copied()
                .ok_or(DomainError::UndefinedFluent),
            Expression::Addition(a, b) => Ok(a.eval(values)? + b.eval(values)?),
            Expression::Subtraction(a, b) => Ok(a.eval(values)? - b.eval(values)?),
            Expression::Multiplication(a, b) => Ok(a.eval(values)? * b.eval(values)?),
            Expression::Division(a, b) => {
                let d = b.eval(values)?;
                if d == 0.0 {
                    Err(DomainError::DivisionByZero)
                } else {
                    Ok(a.eval(values)? / d)
                }
            }
            Expression::Minimum(a, b) => Ok(a.eval(values)?.min(b.eval(values)?)),
            Expression::Maximum(a, b) => Ok(a.eval(values)?.max(b.eval(values)?)),
        }
    }

    /// Substitute and fold against the given initial values. Ground static
    /// fluents resolve to their initial value; an unresolved one is a domain
    /// error, since durations must ground to constants.
    pub fn instantiate(
        self: &Rc<Self>,
        subst: &SubstitutionMap,
        values: &ValueMap,
        is_static: impl Fn(Function) -> bool + Copy,
    ) -> Result<Rc<Expression>, DomainError> {
        match self.as_ref() {
            Expression::Value(_) => Ok(Rc::clone(self)),
            Expression::Fluent(f) => {
                let inst = f.substitute(subst);
                if is_static(inst.function) && inst.is_ground() {
                    match values.get(&inst) {
                        Some(&v) => Ok(Expression::value(v)),
                        None => Err(DomainError::UndefinedFluent),
                    }
                } else if Rc::ptr_eq(&inst, f) {
                    Ok(Rc::clone(self))
                } else {
                    Ok(Rc::new(Expression::Fluent(inst)))
                }
            }
            Expression::Addition(a, b) => Ok(Expression::addition(
                a.instantiate(subst, values, is_static)?,
                b.instantiate(subst, values, is_static)?,
            )),
            Expression::Subtraction(a, b) => Ok(Expression::subtraction(
                a.instantiate(subst, values, is_static)?,
                b.instantiate(subst, values, is_static)?,
            )),
            Expression::Multiplication(a, b) => Ok(Expression::multiplication(
                a.instantiate(subst, values, is_static)?,
                b.instantiate(subst, values, is_static)?,
            )),
            Expression::Division(a, b) => Expression::division(
                a.instantiate(subst, values, is_static)?,
                b.instantiate(subst, values, is_static)?,
            ),
            Expression::Minimum(a, b) => Ok(Expression::minimum(
                a.instantiate(subst, values, is_static)?,
                b.instantiate(subst, values, is_static)?,
            )),
            Expression::Maximum(a, b) => Ok(Expression::maximum(
                a.instantiate(subst, values, is_static)?,
                b.instantiate(subst, values, is_static)?,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Expression, Fluent, ValueMap};
    use crate::data::functions::FunctionTable;
    use crate::data::terms::SubstitutionMap;
    use std::rc::Rc;

    #[test]
    fn constant_folding_in_constructors() {
        let e = Expression::addition(Expression::value(2.0), Expression::value(3.0));
        assert_eq!(e.as_value(), Some(5.0));
        let e = Expression::maximum(Expression::value(2.0), Expression::value(3.0));
        assert_eq!(e.as_value(), Some(3.0));
    }

    #[test]
    fn division_by_constant_zero_is_an_error() {
        assert!(Expression::division(Expression::value(1.0), Expression::value(0.0)).is_err());
        let e = Expression::division(Expression::value(6.0), Expression::value(3.0)).unwrap();
        assert_eq!(e.as_value(), Some(2.0));
    }

    #[test]
    fn instantiation_resolves_static_fluents() {
        let mut functions = FunctionTable::new();
        let dist = functions.add_function("distance");
        let fluent = Fluent::new(dist, vec![]);
        let mut values = ValueMap::new();
        values.insert(Rc::clone(&fluent), 7.0);
        let e = Rc::new(Expression::Fluent(fluent));
        let inst = e
            .instantiate(&SubstitutionMap::new(), &values, |f| functions.is_static(f))
            .unwrap();
        assert_eq!(inst.as_value(), Some(7.0));
    }

    #[test]
    fn undefined_static_fluent_is_an_error() {
        let mut functions = FunctionTable::new();
        let dist = functions.add_function("distance");
        let e = Rc::new(Expression::Fluent(Fluent::new(dist, vec![])));
        let result =
            e.instantiate(&SubstitutionMap::new(), &ValueMap::new(), |f| {
                functions.is_static(f)
            });
        assert!(result.is_err());
    }
}

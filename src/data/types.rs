use std::collections::BTreeSet;
use std::fmt;

use crate::data::DomainError;

/// A type: either a simple type (positive index, with 0 reserved for the
/// universal `object` type) or a union type (negative index into the union
/// table).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Type(pub(crate) i32);

impl Type {
    /// The universal `object` type.
    pub const OBJECT: Type = Type(0);

    pub fn is_simple(self) -> bool {
        self.0 >= 0
    }
}

/// A set of simple types, ordered by index.
pub type TypeSet = BTreeSet<Type>;

/// Table of declared types and the transitive closure of the subtype
/// relation.
///
/// The closure is kept as triangular rows: row `i - 2` covers both directions
/// between simple type `i` and every earlier simple type, so a new type costs
/// one row instead of resizing a square matrix.
#[derive(Debug, Default)]
pub struct TypeTable {
    names: Vec<String>,
    subtype: Vec<Vec<bool>>,
    unions: Vec<TypeSet>,
}

pub const OBJECT_NAME: &str = "object";
pub const NUMBER_NAME: &str = "number";

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a simple type with the given name, or return the existing one.
    pub fn add_type(&mut self, name: &str) -> Type {
        if name == OBJECT_NAME {
            return Type::OBJECT;
        }
        if let Some(t) = self.find_type(name) {
            return t;
        }
        self.names.push(name.to_string());
        let index = self.names.len() as i32;
        if index > 1 {
            self.subtype.push(vec![false; 2 * (index as usize - 1)]);
        }
        Type(index)
    }

    /// Return the type with the given name, if declared.
    pub fn find_type(&self, name: &str) -> Option<Type> {
        if name == OBJECT_NAME {
            return Some(Type::OBJECT);
        }
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| Type(i as i32 + 1))
    }

    /// Return a union of the given types. A singleton set collapses to its
    /// only member.
    pub fn union_type(&mut self, types: TypeSet) -> Option<Type> {
        match types.len() {
            0 => None,
            1 => types.iter().next().copied(),
            _ => {
                self.unions.push(types);
                Some(Type(-(self.unions.len() as i32)))
            }
        }
    }

    fn union_components(&self, t: Type) -> &TypeSet {
        &self.unions[(-t.0 - 1) as usize]
    }

    /// Fill `out` with the simple components of `t`. The universal type has
    /// no components.
    pub fn components(&self, out: &mut TypeSet, t: Type) {
        if !t.is_simple() {
            out.extend(self.union_components(t).iter().copied());
        } else if t != Type::OBJECT {
            out.insert(t);
        }
    }

    /// Declare `t2` a supertype of `t1`, extending the transitive closure.
    /// Fails if `t2` is already a proper subtype of `t1` (the edge would make
    /// the two types mutually subtypes).
    pub fn add_supertype(&mut self, t1: Type, t2: Type) -> Result<(), DomainError> {
        if !t2.is_simple() {
            let components: Vec<Type> =
                self.union_components(t2).iter().copied().collect();
            for t in components {
                self.add_supertype(t1, t)?;
            }
            return Ok(());
        }
        if self.is_subtype(t1, t2) {
            return Ok(());
        }
        if self.is_subtype(t2, t1) {
            return Err(DomainError::IncompatibleTypes);
        }
        let n = self.names.len() as i32;
        for k in 1..=n {
            if self.is_subtype(Type(k), t1) && !self.is_subtype(Type(k), t2) {
                for l in 1..=n {
                    if self.is_subtype(t2, Type(l)) && k != l {
                        self.set_subtype(k, l);
                    }
                }
            }
        }
        Ok(())
    }

    fn set_subtype(&mut self, k: i32, l: i32) {
        // Row layout matches lookup in simple_subtype.
        if k > l {
            self.subtype[k as usize - 2][(2 * k - l - 2) as usize] = true;
        } else {
            self.subtype[l as usize - 2][(k - 1) as usize] = true;
        }
    }

    fn simple_subtype(&self, t1: Type, t2: Type) -> bool {
        if t1 == Type::OBJECT {
            false
        } else if t2 == Type::OBJECT {
            true
        } else if t2 < t1 {
            self.subtype[t1.0 as usize - 2][(2 * t1.0 - t2.0 - 2) as usize]
        } else {
            self.subtype[t2.0 as usize - 2][(t1.0 - 1) as usize]
        }
    }

    /// Test the (reflexive) subtype relation.
    pub fn is_subtype(&self, t1: Type, t2: Type) -> bool {
        if t1 == t2 {
            true
        } else if !t1.is_simple() {
            self.union_components(t1)
                .iter()
                .all(|&t| self.is_subtype(t, t2))
        } else if !t2.is_simple() {
            self.union_components(t2)
                .iter()
                .any(|&t| self.is_subtype(t1, t))
        } else {
            self.simple_subtype(t1, t2)
        }
    }

    /// Test if one type is a subtype of the other.
    pub fn is_compatible(&self, t1: Type, t2: Type) -> bool {
        self.is_subtype(t1, t2) || self.is_subtype(t2, t1)
    }

    /// Return the more specific of two types, or `None` if they are
    /// incompatible.
    pub fn most_specific(&self, t1: Type, t2: Type) -> Option<Type> {
        if self.is_subtype(t1, t2) {
            Some(t1)
        } else if self.is_subtype(t2, t1) {
            Some(t2)
        } else {
            None
        }
    }

    /// Return the name of a simple type, for display.
    pub fn name(&self, t: Type) -> &str {
        if t == Type::OBJECT {
            OBJECT_NAME
        } else {
            &self.names[t.0 as usize - 1]
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_simple() {
            write!(f, "type#{}", self.0)
        } else {
            write!(f, "(either #{})", -self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Type, TypeTable};

    #[test]
    fn subtype_is_reflexive_and_rooted_at_object() {
        let mut table = TypeTable::new();
        let truck = table.add_type("truck");
        assert!(table.is_subtype(truck, truck));
        assert!(table.is_subtype(truck, Type::OBJECT));
        assert!(!table.is_subtype(Type::OBJECT, truck));
    }

    #[test]
    fn supertype_edges_close_transitively() {
        let mut table = TypeTable::new();
        let truck = table.add_type("truck");
        let vehicle = table.add_type("vehicle");
        let movable = table.add_type("movable");
        table.add_supertype(truck, vehicle).unwrap();
        table.add_supertype(vehicle, movable).unwrap();
        assert!(table.is_subtype(truck, movable));
        assert!(!table.is_subtype(movable, truck));
    }

    #[test]
    fn cyclic_supertype_is_rejected() {
        let mut table = TypeTable::new();
        let a = table.add_type("a");
        let b = table.add_type("b");
        table.add_supertype(a, b).unwrap();
        assert!(table.add_supertype(b, a).is_err());
    }

    #[test]
    fn union_subtype_requires_every_component() {
        let mut table = TypeTable::new();
        let car = table.add_type("car");
        let bike = table.add_type("bike");
        let vehicle = table.add_type("vehicle");
        table.add_supertype(car, vehicle).unwrap();
        table.add_supertype(bike, vehicle).unwrap();
        let mut set = super::TypeSet::new();
        set.insert(car);
        set.insert(bike);
        let either = table.union_type(set).unwrap();
        assert!(table.is_subtype(either, vehicle));
        assert!(table.is_subtype(car, either));
        assert!(!table.is_subtype(vehicle, either));
    }

    #[test]
    fn most_specific_picks_the_subtype() {
        let mut table = TypeTable::new();
        let truck = table.add_type("truck");
        let vehicle = table.add_type("vehicle");
        let rock = table.add_type("rock");
        table.add_supertype(truck, vehicle).unwrap();
        assert_eq!(table.most_specific(truck, vehicle), Some(truck));
        assert_eq!(table.most_specific(vehicle, truck), Some(truck));
        assert_eq!(table.most_specific(truck, rock), None);
    }
}

use std::rc::Rc;

/// An immutable cons cell. Plans share the tails of their chains with their
/// parents, so extending a chain is O(1) and removal copies only the prefix
/// up to the removed element.
#[derive(Clone, Debug)]
pub struct Chain<T> {
    head: T,
    tail: ChainRef<T>,
}

/// A possibly empty chain.
pub type ChainRef<T> = Option<Rc<Chain<T>>>;

impl<T> Chain<T> {
    /// Prepend `head` to `tail`.
    pub fn cons(head: T, tail: ChainRef<T>) -> Rc<Chain<T>> {
        Rc::new(Chain { head, tail })
    }

    pub fn head(&self) -> &T {
        &self.head
    }

    pub fn tail(&self) -> &ChainRef<T> {
        &self.tail
    }

    /// Iterate over the elements of a chain, newest first.
    pub fn iter(chain: &ChainRef<T>) -> ChainIter<'_, T> {
        ChainIter { next: chain.as_deref() }
    }

    /// Return the number of elements in a chain.
    pub fn len(chain: &ChainRef<T>) -> usize {
        Chain::iter(chain).count()
    }
}

impl<T: PartialEq> Chain<T> {
    /// Check if a chain contains the given element.
    pub fn contains(chain: &ChainRef<T>, item: &T) -> bool {
        Chain::iter(chain).any(|h| h == item)
    }
}

impl<T: Clone + PartialEq> Chain<T> {
    /// Return a chain with the first occurrence of `item` removed. The
    /// suffix after the removed cell is shared with the input.
    pub fn remove(chain: &ChainRef<T>, item: &T) -> ChainRef<T> {
        let mut prefix = Vec::new();
        let mut current = chain.as_deref();
        while let Some(cell) = current {
            if cell.head == *item {
                let mut result = cell.tail.clone();
                for head in prefix.into_iter().rev() {
                    result = Some(Chain::cons(head, result));
                }
                return result;
            }
            prefix.push(cell.head.clone());
            current = cell.tail.as_deref();
        }
        chain.clone()
    }
}

/// Iterator over chain elements.
pub struct ChainIter<'a, T> {
    next: Option<&'a Chain<T>>,
}

impl<'a, T> Iterator for ChainIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let cell = self.next?;
        self.next = cell.tail.as_deref();
        Some(&cell.head)
    }
}

#[cfg(test)]
mod tests {
    use super::{Chain, ChainRef};
    use std::rc::Rc;

    fn build(items: &[i32]) -> ChainRef<i32> {
        let mut chain = None;
        for &i in items {
            chain = Some(Chain::cons(i, chain));
        }
        chain
    }

    #[test]
    fn cons_and_iterate_newest_first() {
        let chain = build(&[1, 2, 3]);
        let collected: Vec<i32> = Chain::iter(&chain).copied().collect();
        assert_eq!(collected, vec![3, 2, 1]);
        assert_eq!(Chain::len(&chain), 3);
    }

    #[test]
    fn remove_shares_the_suffix() {
        let chain = build(&[1, 2, 3, 4]);
        let removed = Chain::remove(&chain, &3);
        let collected: Vec<i32> = Chain::iter(&removed).copied().collect();
        assert_eq!(collected, vec![4, 2, 1]);
        // The [2, 1] suffix is the same allocation in both chains.
        let original_suffix = chain.as_ref().unwrap().tail().as_ref().unwrap().tail();
        let removed_suffix = removed.as_ref().unwrap().tail();
        assert!(Rc::ptr_eq(
            original_suffix.as_ref().unwrap(),
            removed_suffix.as_ref().unwrap()
        ));
    }

    #[test]
    fn remove_of_missing_element_is_identity() {
        let chain = build(&[1, 2]);
        let removed = Chain::remove(&chain, &9);
        assert!(Rc::ptr_eq(chain.as_ref().unwrap(), removed.as_ref().unwrap()));
    }

    #[test]
    fn contains_scans_the_whole_chain() {
        let chain = build(&[1, 2, 3]);
        assert!(Chain::contains(&chain, &1));
        assert!(!Chain::contains(&chain, &9));
        assert!(!Chain::contains(&None::<Rc<Chain<i32>>>, &1));
    }
}

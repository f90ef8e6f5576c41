use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// Typed handle into an `Arena`.
pub trait ArenaId: Copy + Eq + Hash + Ord + Debug {
    fn from_index(index: usize) -> Self;
    fn index(self) -> usize;
}

/// Declares a newtype id usable as an `Arena` handle.
#[macro_export]
macro_rules! arena_id {
    ($(#[$meta:meta])* $vis:vis struct $name:ident;) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        $vis struct $name(pub usize);

        impl $crate::ArenaId for $name {
            fn from_index(index: usize) -> Self {
                $name(index)
            }
            fn index(self) -> usize {
                self.0
            }
        }
    }
}

/// Append-only id allocator. Ids are never reused, even after `remove`.
#[derive(Eq, PartialEq, Clone, Debug)]
pub struct Arena<I, T> {
    counter: usize,
    data: HashMap<usize, T>,
    _id: PhantomData<I>,
}

impl<I: ArenaId, T> Default for Arena<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: ArenaId, T> Arena<I, T> {
    pub fn new() -> Self {
        Self {
            counter: 0,
            data: Default::default(),
            _id: PhantomData,
        }
    }
    pub fn append(&mut self, t: T) -> I {
        let c = self.counter;
        self.counter += 1;
        self.data.insert(c, t);
        I::from_index(c)
    }
    pub fn get(&self, id: I) -> Option<&T> {
        self.data.get(&id.index())
    }
    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.data.get_mut(&id.index())
    }
    pub fn remove(&mut self, id: I) -> Option<T> {
        self.data.remove(&id.index())
    }
    pub fn contains(&self, id: I) -> bool {
        self.data.contains_key(&id.index())
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    /// Live ids in allocation order.
    pub fn ids(&self) -> Vec<I> {
        let mut ids: Vec<usize> = self.data.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().map(I::from_index).collect()
    }
}

impl<I: ArenaId, T> Index<I> for Arena<I, T> {
    type Output = T;

    fn index(&self, id: I) -> &T {
        match self.data.get(&id.index()) {
            Some(t) => t,
            None => panic!("{:?} is not allocated", id),
        }
    }
}

impl<I: ArenaId, T> IndexMut<I> for Arena<I, T> {
    fn index_mut(&mut self, id: I) -> &mut T {
        match self.data.get_mut(&id.index()) {
            Some(t) => t,
            None => panic!("{:?} is not allocated", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    arena_id! {
        struct TestId;
    }

    #[test]
    fn ids_are_not_reused() {
        let mut a: Arena<TestId, &str> = Arena::new();
        let x = a.append("x");
        let y = a.append("y");
        assert_eq!(a[x], "x");
        assert_eq!(a.remove(x), Some("x"));
        assert!(!a.contains(x));
        let z = a.append("z");
        assert_ne!(z, x);
        assert_eq!(a.ids(), vec![y, z]);
        a[y] = "w";
        assert_eq!(a.get(y), Some(&"w"));
        assert_eq!(a.len(), 2);
    }
}

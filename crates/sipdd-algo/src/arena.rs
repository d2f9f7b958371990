//! Scratch allocation for one evaluation pass.
//!
//! Buffers that only live while a node is evaluated (dispersion envelopes,
//! candidate index lists, start-vector dedup sets) are allocated from a
//! bumpalo arena owned by the pass. Everything is released together when the
//! arena is dropped at the end of the pass, on every return path.

use bumpalo::Bump;

/// Arena for pass-scoped allocations.
///
/// # Example
///
/// ```
/// use sipdd_algo::arena::ScratchArena;
///
/// let scratch = ScratchArena::new();
/// let mut candidates = scratch.alloc_vec::<usize>();
/// candidates.push(3);
/// candidates.push(7);
/// assert_eq!(candidates.len(), 2);
/// ```
pub struct ScratchArena {
    bump: Bump,
}

impl ScratchArena {
    pub fn new() -> Self {
        Self { bump: Bump::new() }
    }

    pub fn alloc_vec<T>(&self) -> bumpalo::collections::Vec<'_, T> {
        bumpalo::collections::Vec::new_in(&self.bump)
    }

    /// Vector of `len` copies of `value`.
    pub fn filled_vec<T: Clone>(&self, len: usize, value: T) -> bumpalo::collections::Vec<'_, T> {
        let mut v = bumpalo::collections::Vec::with_capacity_in(len, &self.bump);
        v.resize(len, value);
        v
    }

    pub fn alloc_hashset<T: Eq + std::hash::Hash>(
        &self,
    ) -> hashbrown::HashSet<T, hashbrown::DefaultHashBuilder, &Bump> {
        hashbrown::HashSet::new_in(&self.bump)
    }
}

impl Default for ScratchArena {
    fn default() -> Self {
        Self::new()
    }
}

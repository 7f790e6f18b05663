//! Slot Generations
//!
//! Each arena slot carries a counter that advances whenever the slot is
//! freed. A `NodeId` remembers the counter it was issued with, so handles
//! to discarded nodes are detected instead of silently aliasing whatever
//! node reuses the slot.

/// Reuse counter of an arena slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Generation(u32);

impl Generation {
    /// Generation of a freshly created slot
    pub const INITIAL: Self = Generation(0);

    #[inline]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Generation after the slot is freed once more. Wraps; an id would
    /// have to outlive 2^32 reuses of its slot to alias.
    #[inline]
    pub(crate) const fn next(self) -> Self {
        Generation(self.0.wrapping_add(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_advances() {
        let g = Generation::INITIAL.next().next();
        assert_eq!(g.value(), 2);
        assert_ne!(g, Generation::INITIAL);
        assert_eq!(Generation::default(), Generation::INITIAL);
    }

    #[test]
    fn test_wraps_at_max() {
        let max = Generation(u32::MAX);
        assert_eq!(max.next(), Generation::INITIAL);
    }
}

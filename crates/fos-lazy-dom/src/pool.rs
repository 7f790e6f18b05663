//! Object Pool
//!
//! Bounded free list used to recycle per-container node-list caches
//! instead of allocating a fresh one for every container that is indexed.

use std::collections::VecDeque;

/// Generic object pool
#[derive(Debug)]
pub struct Pool<T> {
    items: VecDeque<T>,
    max_size: usize,
    stats: PoolStats,
}

/// Pool statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub created: usize,
    pub reused: usize,
    pub returned: usize,
    pub dropped: usize,
}

impl PoolStats {
    pub fn reuse_rate(&self) -> f64 {
        let total = self.created + self.reused;
        if total == 0 {
            0.0
        } else {
            self.reused as f64 / total as f64
        }
    }
}

impl<T> Pool<T> {
    /// Create a new pool with maximum size
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(max_size.min(64)),
            max_size,
            stats: PoolStats::default(),
        }
    }

    /// Get an item from the pool, or create with factory
    pub fn get<F>(&mut self, factory: F) -> T
    where
        F: FnOnce() -> T,
    {
        match self.items.pop_front() {
            Some(item) => {
                self.stats.reused += 1;
                item
            }
            None => {
                self.stats.created += 1;
                factory()
            }
        }
    }

    /// Return an item to the pool
    pub fn put(&mut self, item: T) {
        if self.items.len() < self.max_size {
            self.stats.returned += 1;
            self.items.push_back(item);
        } else {
            self.stats.dropped += 1;
        }
    }

    /// Get pool capacity
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_basic() {
        let mut pool: Pool<String> = Pool::new(10);

        // Empty pool creates new
        let s = pool.get(|| "new".to_string());
        assert_eq!(s, "new");

        // Put and get back
        pool.put("recycled".to_string());
        let s = pool.get(|| "new".to_string());
        assert_eq!(s, "recycled");

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.reuse_rate(), 0.5);
    }

    #[test]
    fn test_pool_max_size() {
        let mut pool: Pool<i32> = Pool::new(2);

        pool.put(1);
        pool.put(2);
        pool.put(3); // Should be dropped

        let stats = pool.stats();
        assert_eq!((stats.returned, stats.dropped), (2, 1));
        assert_eq!(pool.capacity(), 2);

        assert_eq!(pool.get(|| 0), 1);
        assert_eq!(pool.get(|| 0), 2);
        assert_eq!(pool.get(|| 0), 0);
        assert_eq!(pool.stats().created, 1);
    }
}

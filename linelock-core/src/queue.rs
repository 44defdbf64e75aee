//! Bounded FIFO command pool.
//!
//! The host's receive threads push commands here and a single worker pops
//! them in arrival order, so all file mutations are totally ordered.

use std::collections::VecDeque;

/// Error type for pool operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Pool is at capacity.
    Full {
        /// Pool capacity.
        capacity: usize,
    },
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolError::Full { capacity } => {
                write!(f, "command pool full (capacity: {})", capacity)
            }
        }
    }
}

impl std::error::Error for PoolError {}

/// FIFO queue with a maximum size.
#[derive(Debug)]
pub struct CommandPool<T> {
    capacity: usize,
    queue: VecDeque<T>,
}

impl<T> CommandPool<T> {
    /// Create a pool holding at most `capacity` commands.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: VecDeque::new(),
        }
    }

    /// Append a command.
    ///
    /// Returns the command back inside the error if the pool is full.
    pub fn push(&mut self, command: T) -> Result<(), (PoolError, T)> {
        if self.queue.len() >= self.capacity {
            return Err((
                PoolError::Full {
                    capacity: self.capacity,
                },
                command,
            ));
        }
        self.queue.push_back(command);
        Ok(())
    }

    /// Remove and return the oldest command.
    pub fn pop(&mut self) -> Option<T> {
        self.queue.pop_front()
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Pool capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every queued command.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_is_fifo() {
        let mut pool = CommandPool::new(10);
        pool.push("a").unwrap();
        pool.push("b").unwrap();
        pool.push("c").unwrap();
        assert_eq!(pool.pop(), Some("a"));
        assert_eq!(pool.pop(), Some("b"));
        assert_eq!(pool.pop(), Some("c"));
        assert_eq!(pool.pop(), None);
    }

    #[test]
    fn pool_rejects_when_full() {
        let mut pool = CommandPool::new(2);
        pool.push(1).unwrap();
        pool.push(2).unwrap();
        let (err, rejected) = pool.push(3).unwrap_err();
        assert_eq!(err, PoolError::Full { capacity: 2 });
        assert_eq!(rejected, 3);
        assert_eq!(pool.len(), 2);

        pool.pop();
        assert!(pool.push(3).is_ok());
    }

    #[test]
    fn clear_empties_the_pool() {
        let mut pool = CommandPool::new(4);
        pool.push(1).unwrap();
        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 4);
    }

    #[test]
    fn pool_error_display() {
        let err = PoolError::Full { capacity: 256 };
        assert_eq!(format!("{}", err), "command pool full (capacity: 256)");
    }
}

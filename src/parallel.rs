//! Partitioned record collections and the worker pool that processes them
//!
//! A [`ParallelCollection`] is a list of partitions. An [`Executor`] owns a
//! fixed rayon thread pool and runs per-partition work on it. Every fallible
//! operation is all-or-nothing: the first error from any partition aborts the
//! pass and no partial output is returned.
//!
//! # Example
//!
//! ```
//! use ferro_join::parallel::{Executor, ParallelConfig};
//!
//! let executor = Executor::new(ParallelConfig::new().with_chunk_size(2)).unwrap();
//! let input = executor.partition(vec![1, 2, 3, 4, 5]);
//! assert_eq!(input.num_partitions(), 3);
//!
//! let doubled = executor.map(input, |n| n * 2);
//! let mut values = doubled.into_vec();
//! values.sort();
//! assert_eq!(values, vec![2, 4, 6, 8, 10]);
//! ```

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::JoinError;

/// Configuration for parallel processing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Records per partition
    pub chunk_size: usize,
    /// Number of worker threads (0 = use rayon default)
    pub num_threads: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            num_threads: 0,
        }
    }
}

impl ParallelConfig {
    /// Create a new parallel configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chunk size for partitioning
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Set the number of threads
    pub fn with_num_threads(mut self, threads: usize) -> Self {
        self.num_threads = threads;
        self
    }
}

/// A collection split into independently processed partitions.
///
/// Partition boundaries carry no meaning and no order is implied across
/// partitions once they have been processed.
#[derive(Debug, Clone, PartialEq)]
pub struct ParallelCollection<T> {
    partitions: Vec<Vec<T>>,
}

impl<T> Default for ParallelCollection<T> {
    fn default() -> Self {
        Self {
            partitions: Vec::new(),
        }
    }
}

impl<T> ParallelCollection<T> {
    /// An empty collection
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wrap existing partitions
    pub fn from_partitions(partitions: Vec<Vec<T>>) -> Self {
        Self { partitions }
    }

    /// Split items into partitions of at most `chunk_size` items.
    ///
    /// A `chunk_size` of 0 keeps everything in one partition.
    pub fn from_vec(items: Vec<T>, chunk_size: usize) -> Self {
        if items.is_empty() {
            return Self::empty();
        }
        if chunk_size == 0 || items.len() <= chunk_size {
            return Self::from_partitions(vec![items]);
        }

        let mut partitions = Vec::with_capacity(items.len().div_ceil(chunk_size));
        let mut current = Vec::with_capacity(chunk_size);
        for item in items {
            current.push(item);
            if current.len() == chunk_size {
                partitions.push(std::mem::replace(
                    &mut current,
                    Vec::with_capacity(chunk_size),
                ));
            }
        }
        if !current.is_empty() {
            partitions.push(current);
        }
        Self { partitions }
    }

    /// Total number of items
    pub fn len(&self) -> usize {
        self.partitions.iter().map(Vec::len).sum()
    }

    /// Whether there are no items
    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(Vec::is_empty)
    }

    /// Number of partitions
    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Borrow the partitions
    pub fn partitions(&self) -> &[Vec<T>] {
        &self.partitions
    }

    /// Iterate over all items, partition by partition
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.partitions.iter().flatten()
    }

    /// Concatenate two collections. No deduplication.
    pub fn union(mut self, other: ParallelCollection<T>) -> Self {
        self.partitions.extend(other.partitions);
        self
    }

    /// Flatten into a single vector
    pub fn into_vec(self) -> Vec<T> {
        self.partitions.into_iter().flatten().collect()
    }

    /// Unwrap into partitions
    pub fn into_partitions(self) -> Vec<Vec<T>> {
        self.partitions
    }
}

/// Fixed worker pool running per-partition work
pub struct Executor {
    pool: rayon::ThreadPool,
    config: ParallelConfig,
}

impl Executor {
    /// Build a worker pool for the configuration
    pub fn new(config: ParallelConfig) -> Result<Self, JoinError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .thread_name(|i| format!("ferro-join-worker-{}", i))
            .build()
            .map_err(|e| JoinError::Config {
                msg: format!("Failed to build worker pool: {}", e),
            })?;
        Ok(Self { pool, config })
    }

    /// Current configuration
    pub fn config(&self) -> &ParallelConfig {
        &self.config
    }

    /// Number of worker threads
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Partition items using the configured chunk size
    pub fn partition<T>(&self, items: Vec<T>) -> ParallelCollection<T> {
        ParallelCollection::from_vec(items, self.config.chunk_size)
    }

    /// Run a fallible function over every partition.
    ///
    /// Returns the first error encountered; remaining partitions are
    /// abandoned and no output is returned.
    pub fn try_map_partitions<T, U, F>(
        &self,
        input: ParallelCollection<T>,
        f: F,
    ) -> Result<ParallelCollection<U>, JoinError>
    where
        T: Send,
        U: Send,
        F: Fn(Vec<T>) -> Result<Vec<U>, JoinError> + Sync + Send,
    {
        let partitions = self.pool.install(|| {
            input
                .partitions
                .into_par_iter()
                .map(&f)
                .collect::<Result<Vec<_>, _>>()
        })?;
        Ok(ParallelCollection::from_partitions(partitions))
    }

    /// Run a fallible function over every item
    pub fn try_map<T, U, F>(
        &self,
        input: ParallelCollection<T>,
        f: F,
    ) -> Result<ParallelCollection<U>, JoinError>
    where
        T: Send,
        U: Send,
        F: Fn(T) -> Result<U, JoinError> + Sync + Send,
    {
        self.try_map_partitions(input, |partition| partition.into_iter().map(&f).collect())
    }

    /// Run an infallible function over every item
    pub fn map<T, U, F>(&self, input: ParallelCollection<T>, f: F) -> ParallelCollection<U>
    where
        T: Send,
        U: Send,
        F: Fn(T) -> U + Sync + Send,
    {
        let partitions = self.pool.install(|| {
            input
                .partitions
                .into_par_iter()
                .map(|partition| partition.into_iter().map(&f).collect())
                .collect()
        });
        ParallelCollection::from_partitions(partitions)
    }

    /// Fan-in barrier: fold every item into one accumulator on the caller.
    ///
    /// Runs after all partitions have been produced. The first error stops
    /// the fold.
    pub fn collect_fold<T, A, F>(
        &self,
        input: ParallelCollection<T>,
        init: A,
        mut f: F,
    ) -> Result<A, JoinError>
    where
        F: FnMut(A, T) -> Result<A, JoinError>,
    {
        input
            .partitions
            .into_iter()
            .flatten()
            .try_fold(init, |acc, item| f(acc, item))
    }
}

// Copyright (c) 2024-2025 Fulcrum Genomics LLC
// SPDX-License-Identifier: MIT

//! ferro-join: primary/meta join and release pipeline for genomic observations
//!
//! Part of the ferro bioinformatics toolkit.
//!
//! # Example
//!
//! ```
//! use ferro_join::join::BroadcastJoinEngine;
//! use ferro_join::parallel::{Executor, ParallelConfig};
//! use ferro_join::Record;
//!
//! let executor = Executor::new(ParallelConfig::default()).unwrap();
//!
//! let primary = Record::new()
//!     .with("_donor_id", "DO1")
//!     .with("analysis_id", "A1")
//!     .with("analyzed_sample_id", "S1")
//!     .with("x", 1);
//! let meta = Record::new()
//!     .with("analysis_id", "A1")
//!     .with("analyzed_sample_id", "S1")
//!     .with("y", 2);
//!
//! // Join each primary record with its meta record
//! let joined = BroadcastJoinEngine::new(&executor)
//!     .join(executor.partition(vec![primary]), executor.partition(vec![meta]))
//!     .unwrap()
//!     .into_vec();
//! assert_eq!(joined[0].get("y"), Some(&serde_json::json!(2)));
//! ```

pub mod category;
pub mod config;
pub mod enrich;
pub mod error;
pub mod export;
pub mod join;
pub mod key;
pub mod parallel;
pub mod raw_sequence;
pub mod record;
pub mod redact;
pub mod task;

// Re-export commonly used types
pub use category::{resolve_paired, Category, CategoryRole};
pub use config::PipelineConfig;
pub use enrich::{enrich, enrich_in_project, DonorSample, DonorSampleLookup, EnrichmentStage};
pub use error::{ErrorCode, JoinError};
pub use join::{BroadcastJoinEngine, MetaIndex};
pub use key::{build_key, KeyFields};
pub use parallel::{Executor, ParallelCollection, ParallelConfig};
pub use raw_sequence::{resolve_reference, RawSequenceResolver, ReferenceTable};
pub use record::Record;
pub use redact::{redact, ControlledFields};
pub use task::{JoinTask, ResolveReferenceTask, Task, TaskContext, TaskSummary};

/// Result type alias for ferro-join operations
pub type Result<T> = std::result::Result<T, JoinError>;

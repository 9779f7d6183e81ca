//! Per-project pipeline tasks
//!
//! A [`Task`] runs once per project against a shared [`TaskContext`]. Each
//! execution reads its inputs, runs its stages on the context's executor and
//! commits its outputs only when every stage succeeded.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::category::{self, Category};
use crate::config::PipelineConfig;
use crate::enrich::{DonorSampleLookup, EnrichmentStage};
use crate::error::JoinError;
use crate::join::BroadcastJoinEngine;
use crate::parallel::{Executor, ParallelCollection};
use crate::raw_sequence::{RawSequenceResolver, ReferenceTable};
use crate::record::{category_path, commit_all, read_category, Record, StagedWriter};
use crate::redact::redact_all;

/// Output directory name of the raw-sequence reference table
pub const RAW_SEQUENCE_DIR: &str = "raw_sequence";

/// Suffix of the directory holding the open-access copy of an output category
pub const OPEN_SUFFIX: &str = "_open";

/// Shared state of a pipeline run
pub struct TaskContext {
    input_dir: PathBuf,
    output_dir: PathBuf,
    executor: Executor,
    config: PipelineConfig,
    donor_samples: Arc<DonorSampleLookup>,
}

impl TaskContext {
    /// Create a context, building the worker pool from the configuration
    pub fn new(
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        config: PipelineConfig,
        donor_samples: DonorSampleLookup,
    ) -> Result<Self, JoinError> {
        let executor = Executor::new(config.parallel.clone())?;
        Ok(Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            executor,
            config,
            donor_samples: Arc::new(donor_samples),
        })
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn donor_samples(&self) -> Arc<DonorSampleLookup> {
        Arc::clone(&self.donor_samples)
    }

    /// Read one category of a project into a partitioned collection
    pub fn read(
        &self,
        category: &Category,
        project: &str,
    ) -> Result<ParallelCollection<Record>, JoinError> {
        let records = read_category(&self.input_dir, category, project)?;
        debug!(category = %category, project, records = records.len(), "Read input");
        Ok(self.executor.partition(records))
    }

    /// Projects with input for a category, in sorted order
    pub fn projects(&self, category: &Category) -> Result<Vec<String>, JoinError> {
        list_projects(&self.input_dir, category)
    }
}

/// Counts reported by a finished task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSummary {
    /// Task name, e.g. `JoinTask(SSM)`
    pub task: String,
    pub project: String,
    /// Records read across all inputs
    pub input_records: usize,
    /// Records written to the main output
    pub output_records: usize,
    /// Records written to the open-access output, if one was written
    pub open_records: Option<usize>,
    pub duration: Duration,
}

impl TaskSummary {
    /// Output records per second.
    ///
    /// Returns 0.0 if the duration is too short to provide a meaningful rate.
    pub fn records_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs < f64::EPSILON {
            0.0
        } else {
            self.output_records as f64 / secs
        }
    }
}

impl fmt::Display for TaskSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]: {} in, {} out",
            self.task, self.project, self.input_records, self.output_records
        )?;
        if let Some(open) = self.open_records {
            write!(f, ", {} open", open)?;
        }
        write!(f, " ({:.2}s)", self.duration.as_secs_f64())
    }
}

/// A unit of pipeline work run once per project
pub trait Task {
    /// Name used in logs
    fn name(&self) -> String;

    /// Run for one project
    fn execute(&self, ctx: &TaskContext, project: &str) -> Result<TaskSummary, JoinError>;
}

/// Run a task for each project in order, stopping at the first failure.
pub fn run_task<T: Task + ?Sized>(
    ctx: &TaskContext,
    task: &T,
    projects: &[String],
) -> Result<Vec<TaskSummary>, JoinError> {
    let mut summaries = Vec::with_capacity(projects.len());
    for project in projects {
        info!(task = %task.name(), project = %project, "Starting task");
        let summary = task.execute(ctx, project)?;
        info!(
            task = %summary.task,
            project = %summary.project,
            input = summary.input_records,
            output = summary.output_records,
            elapsed_ms = summary.duration.as_millis() as u64,
            "Finished task"
        );
        summaries.push(summary);
    }
    Ok(summaries)
}

/// Project directories of a category, in sorted order.
///
/// A missing category directory has no projects.
pub fn list_projects(root: &Path, category: &Category) -> Result<Vec<String>, JoinError> {
    let dir = root.join(category.dir_name());
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut projects = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() && !name.starts_with('.') {
            projects.push(name);
        }
    }
    projects.sort();
    Ok(projects)
}

/// Stage every partition as a part file, ready to commit.
///
/// An empty collection still produces one empty part file.
fn stage_collection(
    target: &Path,
    records: &ParallelCollection<Record>,
) -> Result<StagedWriter, JoinError> {
    let mut writer = StagedWriter::create(target)?;
    let mut wrote_part = false;
    for partition in records.partitions() {
        if !partition.is_empty() {
            writer.write_part(partition)?;
            wrote_part = true;
        }
    }
    if !wrote_part {
        writer.write_part(&[])?;
    }
    Ok(writer)
}

/// Joins a primary category with its meta category and enriches the result
#[derive(Debug, Clone)]
pub struct JoinTask {
    primary: Category,
    meta: Category,
    output: Category,
}

impl JoinTask {
    /// Create a task for a primary category.
    ///
    /// Paired categories are resolved here, so an unresolvable name fails
    /// before any input is read.
    pub fn new(primary: Category) -> Result<Self, JoinError> {
        let meta = primary.meta_of()?;
        let output = primary.output_of()?;
        Ok(Self {
            primary,
            meta,
            output,
        })
    }

    pub fn primary(&self) -> &Category {
        &self.primary
    }

    pub fn meta(&self) -> &Category {
        &self.meta
    }

    pub fn output(&self) -> &Category {
        &self.output
    }

    /// Directory of the joined output for a project
    pub fn output_path(&self, ctx: &TaskContext, project: &str) -> PathBuf {
        category_path(ctx.output_dir(), &self.output, project)
    }

    /// Directory of the open-access output for a project
    pub fn open_path(&self, ctx: &TaskContext, project: &str) -> PathBuf {
        ctx.output_dir()
            .join(format!("{}{}", self.output.dir_name(), OPEN_SUFFIX))
            .join(project)
    }

    /// Read, join and enrich without writing anything.
    ///
    /// Donors are resolved within `project`.
    pub fn join(
        &self,
        ctx: &TaskContext,
        project: &str,
    ) -> Result<(usize, ParallelCollection<Record>), JoinError> {
        let primary = ctx.read(&self.primary, project)?;
        let meta = ctx.read(&self.meta, project)?;
        let input_records = primary.len() + meta.len();

        let joined = BroadcastJoinEngine::new(ctx.executor()).join(primary, meta)?;
        let enriched = EnrichmentStage::new(self.output.dir_name(), ctx.donor_samples())
            .with_project(project)
            .run(ctx.executor(), joined)?;
        Ok((input_records, enriched))
    }
}

impl Task for JoinTask {
    fn name(&self) -> String {
        format!("JoinTask({})", self.output)
    }

    fn execute(&self, ctx: &TaskContext, project: &str) -> Result<TaskSummary, JoinError> {
        let start = Instant::now();
        let (input_records, records) = self.join(ctx, project)?;

        let controlled = ctx.config().controlled();
        let open = if ctx.config().write_open && !controlled.is_empty() {
            Some(redact_all(ctx.executor(), records.clone(), &controlled))
        } else {
            None
        };

        // Both outputs are staged before either is committed.
        let main = stage_collection(&self.output_path(ctx, project), &records)?;
        let open = match open {
            Some(open) => Some(stage_collection(&self.open_path(ctx, project), &open)?),
            None => None,
        };
        let output_records = main.records_written();
        let open_records = open.as_ref().map(StagedWriter::records_written);
        commit_all(std::iter::once(main).chain(open).collect())?;

        Ok(TaskSummary {
            task: self.name(),
            project: project.to_string(),
            input_records,
            output_records,
            open_records,
            duration: start.elapsed(),
        })
    }
}

/// Builds the raw-sequence reference table, one project per execution.
///
/// Resolved records accumulate in the task's [`ReferenceTable`].
pub struct ResolveReferenceTask {
    resolver: RawSequenceResolver,
    write_output: bool,
    table: Mutex<ReferenceTable>,
}

impl ResolveReferenceTask {
    pub fn new(resolver: RawSequenceResolver) -> Self {
        Self {
            resolver,
            write_output: false,
            table: Mutex::new(ReferenceTable::new()),
        }
    }

    /// Build from the configured projection and excluded categories
    pub fn from_config(config: &PipelineConfig) -> Result<Self, JoinError> {
        Ok(Self::new(RawSequenceResolver::new(
            config.reference.clone(),
            config.excluded_categories()?,
        )))
    }

    /// Also write each project's table under `raw_sequence/<project>`
    pub fn with_output(mut self, write_output: bool) -> Self {
        self.write_output = write_output;
        self
    }

    /// Snapshot of the tables resolved so far
    pub fn table(&self) -> ReferenceTable {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn into_table(self) -> ReferenceTable {
        self.table
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Selected meta categories that have input for a project
    fn inputs(
        &self,
        ctx: &TaskContext,
        project: &str,
    ) -> Result<BTreeMap<Category, ParallelCollection<Record>>, JoinError> {
        let mut collections = BTreeMap::new();
        for category in category::meta_categories() {
            if !self.resolver.selects(category) {
                continue;
            }
            if category_path(ctx.input_dir(), category, project).is_dir() {
                collections.insert(category.clone(), ctx.read(category, project)?);
            }
        }
        Ok(collections)
    }
}

impl Task for ResolveReferenceTask {
    fn name(&self) -> String {
        "ResolveReferenceTask".to_string()
    }

    fn execute(&self, ctx: &TaskContext, project: &str) -> Result<TaskSummary, JoinError> {
        let start = Instant::now();
        let inputs = self.inputs(ctx, project)?;
        let input_records = inputs.values().map(ParallelCollection::len).sum();

        let reference = self.resolver.resolve(ctx.executor(), inputs)?;
        let output_records = reference.len();
        if self.write_output {
            let target = ctx.output_dir().join(RAW_SEQUENCE_DIR).join(project);
            stage_collection(&target, &reference)?.commit()?;
        }

        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(project, reference);

        Ok(TaskSummary {
            task: self.name(),
            project: project.to_string(),
            input_records,
            output_records,
            open_records: None,
            duration: start.elapsed(),
        })
    }
}

// Copyright (c) 2024-2025 Fulcrum Genomics LLC
// SPDX-License-Identifier: MIT

//! ferro-join CLI
//!
//! Command-line interface for the primary/meta join, raw-sequence reference
//! resolution and open-access redaction of genomic observation files.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::util::SubscriberInitExt;

use ferro_join::category::{self, Category};
use ferro_join::enrich::DonorSampleLookup;
use ferro_join::export::TransformRegistry;
use ferro_join::parallel::Executor;
use ferro_join::record::{open_records, read_category};
use ferro_join::redact::redact;
use ferro_join::task::{run_task, JoinTask, ResolveReferenceTask, TaskContext, TaskSummary};
use ferro_join::{JoinError, PipelineConfig};

#[derive(Parser)]
#[command(name = "ferro-join")]
#[command(author, version, about = "Primary/meta join and release pipeline")]
#[command(long_about = "Join primary observation files with their meta files, attach \
donor/sample context and write controlled and open-access outputs.

Examples:
  ferro-join join -i staging -o release --donor-samples donors.json
  ferro-join join -i staging -o release -c SSM_P -p BRCA-UK
  ferro-join reference -i staging -o release --write
  ferro-join redact -i ssm.json --field mutated_from_allele
  ferro-join export -i release -c METH_ARRAY -p BRCA-UK -o meth_array.tsv
  ferro-join resolve SGV_P_MATCHED")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by the pipeline commands
#[derive(Args)]
struct PipelineArgs {
    /// Configuration file (default: .ferro-join.toml or ~/.config/ferro-join/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of worker threads (0 = one per core)
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Records per partition
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Join primary categories with their meta categories
    Join {
        /// Input root directory
        #[arg(short, long)]
        input: PathBuf,

        /// Output root directory
        #[arg(short, long)]
        output: PathBuf,

        /// Primary categories to join (default: all registered)
        #[arg(short, long = "category")]
        categories: Vec<String>,

        /// Projects to process (default: every project found per category)
        #[arg(short, long = "project")]
        projects: Vec<String>,

        /// Donor/sample lookup file (JSON or NDJSON)
        #[arg(long)]
        donor_samples: Option<PathBuf>,

        /// Additional controlled field (repeatable)
        #[arg(long = "controlled-field")]
        controlled_fields: Vec<String>,

        /// Do not write the open-access copy
        #[arg(long)]
        no_open: bool,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Build the raw-sequence reference table
    Reference {
        /// Input root directory
        #[arg(short, long)]
        input: PathBuf,

        /// Output root directory
        #[arg(short, long)]
        output: PathBuf,

        /// Projects to process (default: every project with meta input)
        #[arg(short, long = "project")]
        projects: Vec<String>,

        /// Write the table under <output>/raw_sequence/<project>
        #[arg(long)]
        write: bool,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Strip controlled fields from an NDJSON file
    Redact {
        /// Input file (plain or .gz)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Controlled field (repeatable); added to those of the configuration
        #[arg(short, long = "field")]
        fields: Vec<String>,

        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Export a joined category as tab-separated rows
    Export {
        /// Root directory of joined output
        #[arg(short, long)]
        input: PathBuf,

        /// Output category with a registered export (e.g. METH_ARRAY)
        #[arg(short, long)]
        category: String,

        /// Project to export
        #[arg(short, long)]
        project: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Show the output and meta categories of primary categories
    Resolve {
        /// Category names (default: all registered primary categories)
        names: Vec<String>,
    },

    /// Generate a sample configuration file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Join {
            input,
            output,
            categories,
            projects,
            donor_samples,
            controlled_fields,
            no_open,
            pipeline,
        } => run_join(
            &input,
            &output,
            &categories,
            &projects,
            donor_samples,
            &controlled_fields,
            no_open,
            &pipeline,
        ),
        Commands::Reference {
            input,
            output,
            projects,
            write,
            pipeline,
        } => run_reference(&input, &output, &projects, write, &pipeline),
        Commands::Redact {
            input,
            output,
            fields,
            config,
        } => run_redact(&input, output.as_deref(), &fields, config.as_deref()),
        Commands::Export {
            input,
            category,
            project,
            output,
            pipeline,
        } => run_export(&input, &category, &project, output.as_deref(), &pipeline),
        Commands::Resolve { names } => run_resolve(&names),
        Commands::Config { output, force } => run_config(output.as_deref(), force),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e.detailed_message());
        std::process::exit(1);
    }
}

fn init_tracing(level: &str) -> Result<(), JoinError> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

    let filter = EnvFilter::try_new(level).map_err(|e| JoinError::Config {
        msg: format!("Invalid log level '{}': {}", level, e),
    })?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();

    Ok(())
}

/// Load the configuration file, falling back to the defaults
fn load_config(path: Option<&Path>) -> Result<PipelineConfig, JoinError> {
    match path {
        Some(path) => PipelineConfig::load_from_path(path),
        None => Ok(PipelineConfig::load()?.unwrap_or_default()),
    }
}

fn pipeline_config(
    args: &PipelineArgs,
    controlled_fields: &[String],
    write_open: Option<bool>,
) -> Result<PipelineConfig, JoinError> {
    init_tracing(&args.log_level)?;
    let config = load_config(args.config.as_deref())?.merge_with_cli(
        args.threads,
        args.chunk_size,
        controlled_fields,
        write_open,
    );
    config.validate()?;
    Ok(config)
}

fn report(summaries: &[TaskSummary]) {
    for summary in summaries {
        println!("{}", summary);
    }
}

#[allow(clippy::too_many_arguments)]
fn run_join(
    input: &Path,
    output: &Path,
    categories: &[String],
    projects: &[String],
    donor_samples: Option<PathBuf>,
    controlled_fields: &[String],
    no_open: bool,
    pipeline: &PipelineArgs,
) -> Result<(), JoinError> {
    let config = pipeline_config(pipeline, controlled_fields, no_open.then_some(false))?;

    let donor_path = donor_samples
        .or_else(|| config.donor_samples.clone())
        .ok_or_else(|| JoinError::Config {
            msg: "No donor/sample lookup given (use --donor-samples or donor_samples)"
                .to_string(),
        })?;
    let donors = DonorSampleLookup::load(&donor_path)?;

    // Resolve every task before touching any input.
    let tasks = if categories.is_empty() {
        category::primary_categories()
            .cloned()
            .map(JoinTask::new)
            .collect::<Result<Vec<_>, _>>()?
    } else {
        categories
            .iter()
            .map(|name| JoinTask::new(Category::parse(name)?))
            .collect::<Result<Vec<_>, _>>()?
    };

    let ctx = TaskContext::new(input, output, config, donors)?;
    info!(
        tasks = tasks.len(),
        threads = ctx.executor().num_threads(),
        "Starting join"
    );

    for task in &tasks {
        let task_projects = if projects.is_empty() {
            ctx.projects(task.primary())?
        } else {
            projects.to_vec()
        };
        report(&run_task(&ctx, task, &task_projects)?);
    }
    Ok(())
}

fn run_reference(
    input: &Path,
    output: &Path,
    projects: &[String],
    write: bool,
    pipeline: &PipelineArgs,
) -> Result<(), JoinError> {
    let config = pipeline_config(pipeline, &[], None)?;
    let task = ResolveReferenceTask::from_config(&config)?.with_output(write);
    let ctx = TaskContext::new(input, output, config, DonorSampleLookup::new())?;

    let projects = if projects.is_empty() {
        let mut all = Vec::new();
        for category in category::meta_categories() {
            for project in ctx.projects(category)? {
                if !all.contains(&project) {
                    all.push(project);
                }
            }
        }
        all.sort();
        all
    } else {
        projects.to_vec()
    };

    report(&run_task(&ctx, &task, &projects)?);
    let table = task.into_table();
    info!(
        projects = table.len(),
        records = table.total_records(),
        "Resolved reference table"
    );
    Ok(())
}

fn run_redact(
    input: &Path,
    output: Option<&Path>,
    fields: &[String],
    config: Option<&Path>,
) -> Result<(), JoinError> {
    let config = load_config(config)?.merge_with_cli(None, None, fields, None);
    let controlled = config.controlled();

    let mut writer: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(fs::File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    for record in open_records(input)? {
        let redacted = redact(record?, controlled.as_set());
        writeln!(writer, "{}", redacted.to_json_line()?)?;
    }
    writer.flush()?;
    Ok(())
}

fn run_export(
    input: &Path,
    category: &str,
    project: &str,
    output: Option<&Path>,
    pipeline: &PipelineArgs,
) -> Result<(), JoinError> {
    let config = pipeline_config(pipeline, &[], None)?;
    let registry = TransformRegistry::default();
    let descriptor = registry.require(category)?;
    let category = Category::new(category)?;

    let executor = Executor::new(config.parallel.clone())?;
    let records = executor.partition(read_category(input, &category, project)?);
    let lines = descriptor.export_table(&executor, records)?;

    let mut writer: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(fs::File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    for line in &lines {
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;

    info!(category = %category, project, rows = lines.len() - 1, "Exported");
    Ok(())
}

fn run_resolve(names: &[String]) -> Result<(), JoinError> {
    let categories = if names.is_empty() {
        category::primary_categories().cloned().collect()
    } else {
        names
            .iter()
            .map(Category::new)
            .collect::<Result<Vec<_>, _>>()?
    };

    for category in categories {
        println!(
            "{}\t{}\t{}",
            category,
            category.output_of()?,
            category.meta_of()?
        );
    }
    Ok(())
}

fn run_config(output: Option<&Path>, force: bool) -> Result<(), JoinError> {
    let content = PipelineConfig::default().to_toml()?;
    match output {
        None => print!("{}", content),
        Some(path) => {
            if path.exists() && !force {
                return Err(JoinError::Config {
                    msg: format!(
                        "Configuration file already exists: {} (use --force to overwrite)",
                        path.display()
                    ),
                });
            }
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(path, content)?;
            println!("Configuration written to {}", path.display());
        }
    }
    Ok(())
}

//! CLI binary for inspecting feeds and sequencing pipelines.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;

use tributary_api::{FeedApi, HttpFeedApi};
use tributary_graph::{build_forest, forest_size, resolve_cross_links, InstanceNode, PathTreeBuilder, PathTreeNode};
use tributary_pipeline::{
    check, Assignments, ComputeResolver, ExecutionPlan, SequenceError, Sequencer, Severity,
};
use tributary_types::{
    FeedId, InstanceId, ParameterValue, PipingId, PipingRecord, Plugin, PluginCatalog, PluginId,
};

#[derive(Parser)]
#[command(name = "trib", version, about = "Feed-graph inspection and pipeline sequencing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Backend base URL (falls back to TRIBUTARY_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Bearer token (falls back to TRIBUTARY_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the output file tree of an instance
    Files {
        /// Instance whose output files to list
        instance_id: InstanceId,

        /// Path prefix shared by every file (the output directory)
        #[arg(short, long, default_value = "")]
        prefix: String,
    },

    /// Print the instance forest of a feed
    Graph {
        /// Feed whose instances to reconstruct
        feed_id: FeedId,

        /// Plugin catalog JSON; enables fan-in cross-link resolution
        #[arg(short, long)]
        catalog: Option<PathBuf>,
    },

    /// Lint a pipeline definition file
    Check {
        /// Path to the pipeline .json file
        pipeline: PathBuf,
    },

    /// Run a pipeline against an attachment instance
    Run {
        /// Path to the pipeline .json file
        pipeline: PathBuf,

        /// Instance the pipeline's root piping(s) attach to
        #[arg(short, long)]
        attach: InstanceId,

        /// Plugin catalog JSON
        #[arg(short, long)]
        catalog: PathBuf,

        /// Compute override, repeatable: <piping_id>=<resource_name>
        #[arg(long = "compute", value_parser = parse_compute_override)]
        compute: Vec<(PipingId, String)>,
    },
}

/// On-disk pipeline definition consumed by `check` and `run`.
#[derive(Deserialize)]
struct PipelineFile {
    name: String,
    pipings: Vec<PipingRecord>,
    #[serde(default)]
    defaults: HashMap<PipingId, Vec<ParameterValue>>,
}

fn parse_compute_override(raw: &str) -> Result<(PipingId, String), String> {
    let (id, name) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected <piping_id>=<resource_name>, got '{raw}'"))?;
    let id = id
        .trim()
        .parse::<PipingId>()
        .map_err(|_| format!("'{id}' is not a piping id"))?;
    Ok((id, name.trim().to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    match cli.command {
        Commands::Files {
            instance_id,
            ref prefix,
        } => {
            let api = connect(&cli)?;
            cmd_files(&api, instance_id, prefix).await?;
        }
        Commands::Graph {
            feed_id,
            ref catalog,
        } => {
            let api = connect(&cli)?;
            cmd_graph(&api, feed_id, catalog.as_deref()).await?;
        }
        Commands::Check { ref pipeline } => {
            cmd_check(pipeline)?;
        }
        Commands::Run {
            ref pipeline,
            attach,
            ref catalog,
            ref compute,
        } => {
            let api = connect(&cli)?;
            cmd_run(&api, pipeline, attach, catalog, compute).await?;
        }
    }

    Ok(())
}

fn connect(cli: &Cli) -> anyhow::Result<HttpFeedApi> {
    let mut api = match cli.base_url {
        Some(ref url) => HttpFeedApi::new(url.clone()),
        None => HttpFeedApi::from_env()?,
    };
    if let Some(ref token) = cli.token {
        api = api.with_token(token.clone());
    }
    Ok(api)
}

fn load_pipeline(path: &Path) -> anyhow::Result<PipelineFile> {
    let source = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&source)?)
}

fn load_catalog(path: &Path) -> anyhow::Result<PluginCatalog> {
    let source = std::fs::read_to_string(path)?;
    let plugins: Vec<Plugin> = serde_json::from_str(&source)?;
    Ok(plugins.into_iter().collect())
}

async fn cmd_files(api: &HttpFeedApi, instance_id: InstanceId, prefix: &str) -> anyhow::Result<()> {
    let files = api.list_files(instance_id).await?;
    let tree = PathTreeBuilder::new(prefix).build(&files)?;

    println!("{} file(s) under '{}'", files.len(), prefix);
    print_path_tree(&tree, 0);
    Ok(())
}

fn print_path_tree(node: &PathTreeNode, depth: usize) {
    for child in &node.children {
        if child.is_leaf() {
            let size = child.file.as_ref().map(|f| f.size).unwrap_or(0);
            println!("{}{}  ({} bytes)", "  ".repeat(depth), child.name, size);
        } else {
            println!("{}{}/", "  ".repeat(depth), child.name);
        }
        print_path_tree(child, depth + 1);
    }
}

async fn cmd_graph(
    api: &HttpFeedApi,
    feed_id: FeedId,
    catalog_path: Option<&Path>,
) -> anyhow::Result<()> {
    let records = api.list_instances(feed_id).await?;
    let forest = build_forest(&records)?;

    println!(
        "Feed {}: {} instance(s), {} root(s)",
        feed_id,
        forest_size(&forest),
        forest.len()
    );
    for root in &forest {
        print_instance_tree(root);
    }

    if let Some(path) = catalog_path {
        let catalog = load_catalog(path)?;

        // Only fan-in capable instances need their parameter values.
        let mut values = HashMap::new();
        for record in &records {
            let fan_in = catalog.get(record.plugin_id).and_then(|p| p.fan_in.as_ref());
            if fan_in.is_some() {
                values.insert(record.id, api.instance_parameters(record.id).await?);
            }
        }

        let links = resolve_cross_links(&records, &catalog, &values);
        if !links.is_empty() {
            println!("\nFan-in edges:");
            for edge in links.edges() {
                println!("  {} -> {}", edge.ancestor, edge.descendant);
            }
        }
    }

    Ok(())
}

fn print_instance_tree(node: &InstanceNode) {
    println!(
        "{}{} {}@{} [{:?}]",
        "  ".repeat(node.depth),
        node.record.id,
        node.record.plugin_name,
        node.record.plugin_version,
        node.record.status
    );
    for child in &node.children {
        print_instance_tree(child);
    }
}

fn cmd_check(path: &Path) -> anyhow::Result<()> {
    let pipeline = load_pipeline(path)?;
    let diagnostics = check(&pipeline.pipings);

    if diagnostics.is_empty() {
        println!("Pipeline '{}' is valid", pipeline.name);
        return Ok(());
    }

    let mut has_error = false;
    for diag in &diagnostics {
        let severity = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
        };
        println!("[{}] {}: {}", severity, diag.rule, diag.message);
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_run(
    api: &HttpFeedApi,
    pipeline_path: &Path,
    attach: InstanceId,
    catalog_path: &Path,
    overrides: &[(PipingId, String)],
) -> anyhow::Result<()> {
    let pipeline = load_pipeline(pipeline_path)?;
    let catalog = load_catalog(catalog_path)?;
    let plan = ExecutionPlan::compile(pipeline.pipings.clone(), pipeline.defaults.clone())?;

    println!(
        "Running pipeline '{}' ({} piping(s)) against instance {}",
        pipeline.name,
        plan.len(),
        attach
    );

    // Resolve compute candidates for every piping whose plugin is known,
    // then apply explicit overrides.
    let resolver = ComputeResolver::new(Arc::new(api.clone()));
    let targets: Vec<(PipingId, PluginId)> = plan
        .pipings()
        .iter()
        .filter_map(|p| {
            catalog
                .find(&p.plugin_name, &p.plugin_version)
                .map(|plugin| (p.id, plugin.id))
        })
        .collect();
    let mut assignments = resolver.resolve_many(&targets).await.unwrap_or_else(|err| {
        tracing::warn!(error = %err, "compute resolution unavailable, continuing without");
        Assignments::new()
    });
    for (piping, name) in overrides {
        if !assignments.select(*piping, name) {
            anyhow::bail!("'{name}' is not a compute resource of piping {piping}");
        }
    }

    let outcome = Sequencer::new(api)
        .run(&plan, &catalog, attach, &assignments)
        .await?;

    println!("\nCreated {} instance(s):", outcome.created.len());
    for created in &outcome.created {
        println!(
            "  {} ({}@{}) previous={:?}",
            created.id, created.plugin_name, created.plugin_version, created.previous_id
        );
    }
    if let Some(last) = outcome.last_created() {
        println!("Anchor for a follow-on pipeline: instance {}", last.id);
    }

    if !outcome.is_complete() {
        println!("\n{} piping(s) failed:", outcome.errors.len());
        for error in &outcome.errors {
            match error {
                SequenceError::Creation { piping, title, message } => {
                    println!("  {} '{}': {}", piping, title, message);
                }
                SequenceError::DependencyUnavailable {
                    piping,
                    title,
                    dependency,
                } => {
                    println!(
                        "  {} '{}': skipped, dependency {} unavailable",
                        piping, title, dependency
                    );
                }
            }
        }
        std::process::exit(1);
    }

    Ok(())
}

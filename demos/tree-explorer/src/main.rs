//! Compute the best fragmentation trees for a JSON file with candidate fragmentation graphs

use std::{collections::HashMap, fs::File, io::BufReader, path::PathBuf};

use clap::Parser;
use context_error::{BoxedError, Context, CreateError};
use mztree::{BatchSearch, ColoredGraphBuilder, SolverSettings, TreeError};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Cli {
    /// The JSON file with the graphs, one per candidate root formula, and optionally the solver
    /// settings
    #[arg(short, long)]
    in_path: PathBuf,
    /// The number of trees to show
    #[arg(short, long, default_value = "5")]
    trees: usize,
    /// Do not show trees with a lower score
    #[arg(long)]
    lower_bound: Option<f64>,
    /// Skip these root formulas
    #[arg(long)]
    without: Vec<String>,
    /// Only use these root formulas
    #[arg(long)]
    only_with: Vec<String>,
    /// Search all candidates in parallel
    #[arg(long)]
    parallel: bool,
    /// Print the trees as JSON instead of as an outline
    #[arg(long)]
    json: bool,
}

/// The contents of the input file
#[derive(Deserialize)]
struct Instance {
    #[serde(default)]
    settings: SolverSettings,
    graphs: Vec<ColoredGraphBuilder<String>>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let instance: Instance =
        serde_json::from_reader(BufReader::new(File::open(args.in_path).unwrap())).unwrap();
    let candidates: Vec<String> = instance
        .graphs
        .iter()
        .map(|g| g.root_formula().clone())
        .collect();
    let graphs: HashMap<String, ColoredGraphBuilder<String>> = instance
        .graphs
        .into_iter()
        .map(|g| (g.root_formula().clone(), g))
        .collect();
    let build = |root: &String| {
        graphs.get(root).cloned().map_or_else(
            || {
                Err(BoxedError::new(
                    TreeError::InvalidIndex,
                    "Unknown root",
                    format!("There is no graph for root {root}"),
                    Context::none(),
                ))
            },
            ColoredGraphBuilder::build,
        )
    };

    let mut search = BatchSearch::new(candidates, instance.settings).trees(args.trees);
    if let Some(bound) = args.lower_bound {
        search = search.lower_bound(bound);
    }
    if !args.only_with.is_empty() {
        search = search.only_with(args.only_with);
    }
    search = search.without(args.without);
    let trees = if args.parallel {
        search.par_run(&build)
    } else {
        search.run(&build)
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&trees).unwrap());
    } else {
        for (rank, tree) in trees.iter().enumerate() {
            println!("#{} {tree}", rank + 1);
        }
    }
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ethosu_conv2d::{
    GraphError, InferenceOptions, Node, OperatorRegistry, TypeInference, load_graph_from_path,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Infer tensor types for Ethos-U convolution graphs", long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is not set (e.g. `debug`).
    #[arg(long, global = true, default_value = "warn")]
    log: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run type inference over a JSON graph description.
    Infer {
        /// Path to the JSON graph description.
        graph: PathBuf,
        /// Upper bound on inference passes.
        #[arg(long)]
        max_passes: Option<usize>,
        /// Print the inferred node types as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print registered operator metadata.
    Describe {
        /// Only describe this operator.
        #[arg(long)]
        op: Option<String>,
    },
}

fn infer(graph_path: PathBuf, max_passes: Option<usize>, json: bool) -> Result<(), GraphError> {
    let registry = OperatorRegistry::with_defaults();
    let graph = load_graph_from_path(&graph_path, &registry)?;
    let mut options = InferenceOptions::default();
    if let Some(max_passes) = max_passes {
        options.max_passes = max_passes;
    }
    let artifacts = TypeInference::new(&graph, &registry, options).run()?;

    if json {
        let rendered = artifacts.to_json()?;
        println!("{rendered}");
        return Ok(());
    }

    println!(
        "Inferred types for `{}` ({} nodes, {} passes):",
        graph_path.display(),
        graph.len(),
        artifacts.passes
    );
    for (idx, node) in graph.nodes().iter().enumerate() {
        let name = match node {
            Node::Input { name, .. } => name.clone(),
            Node::Call(call) => call.display_name(),
        };
        println!("  %{idx} {name}: {}", artifacts.types[idx]);
    }
    Ok(())
}

fn describe(op: Option<String>) -> Result<(), GraphError> {
    let registry = OperatorRegistry::with_defaults();
    let names = match op {
        Some(name) => vec![registry.get(&name)?.name],
        None => registry.available_operators(),
    };
    for name in names {
        let descriptor = registry.get(name)?;
        println!(
            "{} (inputs: {}, support level: {}, attrs: {})",
            descriptor.name,
            descriptor.num_inputs,
            descriptor.support_level,
            descriptor.attrs_type_key
        );
        println!();
        println!("{}", descriptor.description);
        println!("Arguments:");
        for arg in descriptor.arguments {
            println!("  - {} ({}): {}", arg.name, arg.type_info, arg.description);
        }
        println!("Attributes:");
        for field in descriptor.attr_fields {
            let default = field.default.unwrap_or("required");
            println!(
                "  - {}: {} = {} -- {}",
                field.name, field.type_info, default, field.description
            );
        }
    }
    Ok(())
}

fn run() -> Result<(), GraphError> {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Infer {
            graph,
            max_passes,
            json,
        } => infer(graph, max_passes, json),
        Command::Describe { op } => describe(op),
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

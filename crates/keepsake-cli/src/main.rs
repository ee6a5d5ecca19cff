use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, bail};
use clap::{Parser as ClapParser, Subcommand};
use keepsake::namespace::NamespaceSpec;
use keepsake::{
    Context, EngineConfig, EvalError, Evaluator, Instantiation, KeepSnapshot, Namespace, Runtime,
};

#[derive(ClapParser)]
#[command(name = "keepsake")]
#[command(about = "Evaluate definition trees with keep-directive caching")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a definition of a tree
    Eval {
        /// Path to the definition tree (.json)
        tree: PathBuf,
        /// Fully-qualified name of the definition to evaluate
        name: String,
        /// Number of requests to run, each with a fresh context
        #[arg(long, default_value_t = 1)]
        repeat: u32,
        /// Engine configuration (.toml)
        #[arg(long)]
        config: Option<PathBuf>,
        /// State file for durable keeps (load on start, save on exit)
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Check that a tree loads, and list its definitions
    Check {
        /// Path to the definition tree (.json)
        tree: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Eval { tree, name, repeat, config, state } => {
            let config = match config {
                Some(path) => EngineConfig::from_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => EngineConfig::default(),
            };
            eval_tree(&tree, &name, repeat, config, state.as_deref())
        }
        Commands::Check { tree } => check_tree(&tree),
    }
}

fn load_tree(path: &Path) -> anyhow::Result<Namespace> {
    let source =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let namespace = NamespaceSpec::from_json(&source)?.build()?;
    Ok(namespace)
}

fn eval_tree(
    tree: &Path,
    name: &str,
    repeat: u32,
    config: EngineConfig,
    state: Option<&Path>,
) -> anyhow::Result<()> {
    let namespace = load_tree(tree)?;
    let Some(definition) = namespace.lookup(name) else {
        bail!("no definition named `{name}` in {}", tree.display());
    };
    let runtime = Runtime::new(Arc::new(namespace), config);

    if let Some(state) = state.filter(|state| state.exists()) {
        let json = fs::read_to_string(state)
            .with_context(|| format!("reading state {}", state.display()))?;
        let restored = runtime.restore_keeps(&KeepSnapshot::from_json(&json)?);
        eprintln!("Restored {restored} kept values from {}", state.display());
    }

    let site = runtime.namespace().definition(definition).site;
    for request in 0..repeat.max(1) {
        let mut context = Context::new(runtime.clone());
        if let Some(site) = site.filter(|site| *site != definition) {
            context.push(site, Default::default(), true)?;
        }
        let qualified = runtime.namespace().definition(definition).full_name.clone();
        match Evaluator::new().evaluate(&mut context, &Instantiation::new(&qualified)) {
            Ok(value) => {
                if request == 0 {
                    println!("{}", serde_json::to_string_pretty(&value)?);
                }
            }
            Err(EvalError::Context(error)) if !error.is_fatal() => {
                let redirection = error.into_redirection()?;
                println!(
                    "{}",
                    serde_json::json!({
                        "status": redirection.status,
                        "location": &*redirection.location,
                        "message": &*redirection.message,
                    })
                );
            }
            Err(error) => return Err(error.into()),
        }
    }

    let stats = runtime.stats();
    stats.log_summary();
    eprintln!("{}", serde_json::to_string_pretty(&stats.snapshot())?);

    if let Some(state) = state {
        fs::write(state, runtime.snapshot_keeps().to_json()?)
            .with_context(|| format!("writing state {}", state.display()))?;
    }
    Ok(())
}

fn check_tree(tree: &Path) -> anyhow::Result<()> {
    let namespace = load_tree(tree)?;
    for definition in namespace.iter() {
        let keeps = definition
            .keeps()
            .iter()
            .map(|keep| keep.target.to_string())
            .collect::<Vec<_>>();
        if keeps.is_empty() {
            println!("{} ({:?})", definition.full_name, definition.durability);
        } else {
            println!(
                "{} ({:?}) keeps {}",
                definition.full_name,
                definition.durability,
                keeps.join(", ")
            );
        }
    }
    eprintln!("OK: {} definitions", namespace.len());
    Ok(())
}

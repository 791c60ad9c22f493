//! mapdata CLI
//!
//! Entry point for the `mapdata` command-line tool.

use clap::{Args, Parser, Subcommand, ValueEnum};
use mapdata::config::SourcePlan;
use mapdata::sources::parse_value;
use mapdata::tofs::{self, CandidateOrigin};
use mapdata::{
    ConfigValue, ContentStore, DirStore, FactSnapshot, FactValue, MapData, ResolvedConfig,
    SourceSpec,
};
use std::fs;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mapdata")]
#[command(about = "Resolve layered formula configuration and template files", version)]
struct Cli {
    /// Log filter, e.g. "debug" or "mapdata=trace"
    #[arg(long, global = true, env = "MAPDATA_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve and print the formula configuration
    Resolve {
        #[command(flatten)]
        formula: FormulaArgs,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,

        /// Print only the merged values, without provenance
        #[arg(long)]
        values_only: bool,

        /// Do not redact secret-looking values
        #[arg(long)]
        show_secrets: bool,

        /// Also write the full JSON report to this file (redacted like stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Print the template file chosen for an asset
    Locate {
        #[command(flatten)]
        formula: FormulaArgs,

        #[command(flatten)]
        asset: AssetArgs,
    },

    /// Print every template candidate for an asset, marking existing ones
    Candidates {
        #[command(flatten)]
        formula: FormulaArgs,

        #[command(flatten)]
        asset: AssetArgs,
    },

    /// Print the effective source order and skipped candidates
    Sources {
        #[command(flatten)]
        formula: FormulaArgs,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct FormulaArgs {
    /// Formula file root (the directory holding `<formula>/`)
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Formula name
    #[arg(long)]
    formula: String,

    /// Facts file (YAML or JSON mapping of fact to value or list)
    #[arg(long)]
    facts: Option<PathBuf>,

    /// Single fact, e.g. `os_family=Debian` or `roles=web,db`
    #[arg(long = "fact", value_name = "NAME=VALUE")]
    fact: Vec<String>,

    /// Override document (pillar), YAML, JSON or TOML
    #[arg(long = "override", value_name = "FILE")]
    override_file: Option<PathBuf>,

    /// Source spec, repeatable (replaces the formula's source list)
    #[arg(long = "source", value_name = "SPEC")]
    sources: Vec<String>,

    /// Extra fact dimension for the default source list
    #[arg(long)]
    custom_key: Option<String>,

    /// Parameters directory relative to the root (default: `<formula>/parameters`)
    #[arg(long)]
    parameters_dir: Option<String>,
}

#[derive(Args)]
struct AssetArgs {
    /// Asset key looked up in `tofs.source_files`
    #[arg(long)]
    key: String,

    /// Default file names of the asset
    #[arg(required = true)]
    files: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let result = match cli.command {
        Commands::Resolve {
            formula,
            format,
            values_only,
            show_secrets,
            output,
        } => run_resolve(&formula, format, values_only, show_secrets, output),
        Commands::Locate { formula, asset } => run_locate(&formula, &asset),
        Commands::Candidates { formula, asset } => run_candidates(&formula, &asset),
        Commands::Sources { formula, json } => run_sources(&formula, json),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn init_logging(level: Option<&str>) {
    let filter = EnvFilter::new(level.unwrap_or("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_facts(args: &FormulaArgs) -> Result<FactSnapshot, String> {
    let mut facts = match args.facts {
        Some(ref path) => FactSnapshot::from_file(path)
            .map_err(|e| format!("{}: {}", path.display(), e))?,
        None => FactSnapshot::new(),
    };

    for entry in &args.fact {
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| format!("invalid --fact '{}', expected NAME=VALUE", entry))?;
        let value = if value.contains(',') {
            FactValue::Many(value.split(',').map(|v| v.trim().to_string()).collect())
        } else {
            FactValue::One(value.to_string())
        };
        facts.insert(name.trim(), value);
    }

    Ok(facts)
}

fn build_engine(args: &FormulaArgs) -> Result<MapData, String> {
    let mut engine = MapData::new(&args.formula);

    if let Some(ref dir) = args.parameters_dir {
        engine = engine.parameters_dir(dir);
    }
    if let Some(ref key) = args.custom_key {
        engine = engine.custom_key(key);
    }
    if !args.sources.is_empty() {
        let specs = args
            .sources
            .iter()
            .map(|s| SourceSpec::parse(s))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())?;
        engine = engine.sources(specs);
    }
    if let Some(ref path) = args.override_file {
        let bytes = fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        let document = match parse_value(&path.to_string_lossy(), &bytes).map_err(|e| e.to_string())? {
            ConfigValue::Null => ConfigValue::empty_mapping(),
            document => document,
        };
        engine = engine.overrides(document);
    }

    Ok(engine)
}

fn resolve(args: &FormulaArgs) -> Result<(ResolvedConfig, DirStore), String> {
    let facts = load_facts(args)?;
    let store = DirStore::new(&args.root);
    let config = build_engine(args)?
        .resolve_facts(facts, &store)
        .map_err(|e| e.to_string())?;
    Ok((config, store))
}

fn run_resolve(
    args: &FormulaArgs,
    format: Format,
    values_only: bool,
    show_secrets: bool,
    output: Option<PathBuf>,
) -> Result<(), String> {
    let (config, _) = resolve(args)?;

    let config = if show_secrets {
        config
    } else {
        let (redacted, paths) = config.redacted();
        if !paths.is_empty() {
            tracing::info!(redacted = ?paths, "redacted secret values");
        }
        redacted
    };

    if let Some(ref path) = output {
        config
            .write_to_file(path)
            .map_err(|e| format!("{}: {}", path.display(), e))?;
    }

    let rendered = match (format, values_only) {
        (Format::Json, false) => config.to_json().map_err(|e| e.to_string())?,
        (Format::Yaml, false) => config.to_yaml().map_err(|e| e.to_string())?,
        (Format::Json, true) => serde_json::to_string_pretty(&config.values).map_err(|e| e.to_string())?,
        (Format::Yaml, true) => serde_yaml::to_string(&config.values).map_err(|e| e.to_string())?,
    };
    println!("{}", rendered.trim_end());
    Ok(())
}

fn run_locate(args: &FormulaArgs, asset: &AssetArgs) -> Result<(), String> {
    let (config, store) = resolve(args)?;
    let files: Vec<&str> = asset.files.iter().map(String::as_str).collect();

    let path = config
        .files_switch(&files, &asset.key, &store)
        .map_err(|e| e.to_string())?;
    println!("{}", path);
    Ok(())
}

fn run_candidates(args: &FormulaArgs, asset: &AssetArgs) -> Result<(), String> {
    let (config, store) = resolve(args)?;
    let files: Vec<&str> = asset.files.iter().map(String::as_str).collect();

    let resolution = tofs::lookup(&config.values, &config.formula, &files, &asset.key, &config.facts, &store)
        .map_err(|e| e.to_string())?;

    for (index, candidate) in resolution.candidates.iter().enumerate() {
        let marker = if resolution.matched == Some(index) {
            "=>"
        } else if store.exists(&candidate.path) {
            " +"
        } else {
            "  "
        };
        let origin = match &candidate.origin {
            CandidateOrigin::Extra => "source_files".to_string(),
            CandidateOrigin::Fact { name, value } => format!("{}={}", name, value),
            CandidateOrigin::Literal { segment } => format!("literal {}", segment),
            CandidateOrigin::Default => "default".to_string(),
        };
        println!("{} {}  ({})", marker, candidate.path, origin);
    }

    if !resolution.is_match() {
        return Err(format!("no candidate exists for '{}'", asset.key));
    }
    Ok(())
}

fn run_sources(args: &FormulaArgs, json_output: bool) -> Result<(), String> {
    let facts = load_facts(args)?;
    let store = DirStore::new(&args.root);
    let plan: SourcePlan = build_engine(args)?
        .plan(facts, &store)
        .map_err(|e| e.to_string())?;

    if json_output {
        let output = serde_json::json!({
            "origin": plan.origin,
            "specs": plan.specs,
            "sources": plan.loaded.sources.iter().map(|s| serde_json::json!({
                "name": s.name,
                "kind": s.kind,
                "precedence": s.precedence,
                "digest": s.digest,
            })).collect::<Vec<_>>(),
            "skipped": plan.loaded.skipped,
            "conflicts": plan.strategies.conflicts(),
        });
        let json = serde_json::to_string_pretty(&output).map_err(|e| e.to_string())?;
        println!("{}", json);
        return Ok(());
    }

    println!(
        "Source list ({:?}): {}",
        plan.origin,
        plan.specs.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    );
    println!();
    println!("Merge order ({} sources, later wins):", plan.loaded.sources.len());
    for source in &plan.loaded.sources {
        println!("  {:>2}. {} [{:?}]", source.precedence, source.name, source.kind);
    }

    if !plan.loaded.skipped.is_empty() {
        println!();
        println!("Skipped:");
        for skipped in &plan.loaded.skipped {
            match skipped.path {
                Some(ref path) => println!("  {} ({}): {:?}", skipped.source, path, skipped.reason),
                None => println!("  {}: {:?}", skipped.source, skipped.reason),
            }
        }
    }

    for conflict in plan.strategies.conflicts() {
        println!("Strategy conflict: {}", conflict);
    }
    Ok(())
}

//! sparql-entity CLI: inspect what a read query turns into.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::Result;
use oxigraph::model::NamedNode;

use sparql_entity::config::SessionConfig;
use sparql_entity::error::{EntityError, RuntimeError};
use sparql_entity::model::EntityDefinition;
use sparql_entity::runtime::{
    EntityClass, IntegrityListener, IntegrityViolation, LogListener, Session,
};
use sparql_entity::synth::SynthesisCache;

#[derive(Parser)]
#[command(name = "sparql-entity", version, about = "Entity access synthesized from SPARQL read queries")]
struct Cli {
    /// Session configuration (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a definition and print its property plans.
    Analyze {
        /// Entity definition (.toml or .json).
        definition: PathBuf,
    },

    /// Print the synthesized template table.
    Synth {
        definition: PathBuf,

        /// JSON override table applied on top of the definition's overrides.
        #[arg(long)]
        overrides: Option<PathBuf>,

        /// Write the table as JSON instead of printing it.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Print the canonical read query, optionally pinned to one entity.
    Query {
        definition: PathBuf,

        #[arg(long)]
        uri: Option<String>,

        /// SPARQL filter expression over the query's variables.
        #[arg(long)]
        filter: Option<String>,
    },

    /// Run the integrity checks against the configured endpoint.
    Check { definition: PathBuf },
}

fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    Ok(match path {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    })
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze { definition } => {
            let definition = EntityDefinition::load(&definition)?;
            let class = EntityClass::build(definition, &config.analysis)?;
            let analysis = class.analysis();
            println!("{} (anchor ?{})", class.name(), analysis.anchor());
            println!("  {} dependency edges", analysis.edges().len());
            for plan in class.plans() {
                let paths = analysis
                    .variable(&plan.variable)
                    .map(|v| v.paths.len())
                    .unwrap_or(0);
                println!(
                    "  {:<16} ?{:<16} {:<12} {:<8} context {:<8} {} path(s)",
                    plan.field,
                    plan.variable,
                    plan.cardinality_name(),
                    if plan.simple { "simple" } else { "complex" },
                    analysis.defining_context(&plan.variable),
                    paths,
                );
            }
        }

        Commands::Synth {
            definition,
            overrides,
            out,
        } => {
            let mut definition = EntityDefinition::load(&definition)?;
            if let Some(path) = overrides {
                definition.overrides.extend(SynthesisCache::load_table(&path)?);
            }
            let class = EntityClass::build(definition, &config.analysis)?;
            match out {
                Some(path) => {
                    class.synthesis_cache().save(&path)?;
                    println!(
                        "Wrote {} templates to {}",
                        class.synthesis_cache().len(),
                        path.display()
                    );
                }
                None => {
                    for (key, text) in class.synthesis_table() {
                        println!("# {key}\n{text}\n");
                    }
                }
            }
        }

        Commands::Query {
            definition,
            uri,
            filter,
        } => {
            let definition = EntityDefinition::load(&definition)?;
            let class = EntityClass::build(definition, &config.analysis)?;
            let uri = uri
                .map(|u| {
                    NamedNode::new(u.as_str()).map_err(|e| RuntimeError::TypeMismatch {
                        field: "uri".into(),
                        expected: "iri".into(),
                        value: format!("{u} ({e})"),
                    })
                })
                .transpose()?;
            println!("{}", class.canonical_query(uri.as_ref(), filter.as_deref()));
        }

        Commands::Check { definition } => {
            let definition = EntityDefinition::load(&definition)?;
            let name = definition.name.clone();
            let mut session = Session::connect(SessionConfig {
                validate_on_register: false,
                ..config
            });
            session.register(definition)?;
            let mut offenders = 0;
            let mut report = |violation: &IntegrityViolation| {
                LogListener.on_violation(violation);
                offenders += violation.offenders.len();
            };
            let failed = session.revalidate(&name, &mut report)?;
            if failed > 0 {
                let total = session.class(&name)?.checks().len();
                return Err(EntityError::from(RuntimeError::IntegrityViolation {
                    class: name,
                    check: format!("{failed} of {total}"),
                    count: offenders,
                })
                .into());
            }
            println!("{name}: all integrity checks passed");
        }
    }

    Ok(())
}

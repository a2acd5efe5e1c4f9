use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use rules_repository::render::{category_tree, package_tree, render_tree};
use rules_repository::{RepositoryConfig, RulesRepository, VersionedRecord};

#[derive(Parser)]
#[command(name = "rulesrepo")]
#[command(about = "Inspect and maintain a versioned rules repository")]
struct Cli {
    /// SQLite database to use instead of the configured one
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Use a throwaway in-memory repository
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the config file and create the database
    Init {
        /// Name of the package every repository starts with
        #[arg(long)]
        default_package: Option<String>,
    },
    /// List all packages
    Packages,
    /// Create a package
    CreatePackage {
        name: String,

        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Show the assets and functions of a package
    Rules {
        package: String,

        /// Only assets tagged with this state
        #[arg(long)]
        state: Option<String>,

        /// Show a historical package version instead of head
        #[arg(long)]
        baseline: Option<u64>,
    },
    /// Show the version history of an asset
    History { asset: Uuid },
    /// Freeze a package as a new baseline
    Baseline {
        package: String,

        #[arg(short, long)]
        comment: String,

        #[arg(short, long)]
        state: String,
    },
    /// Move an asset to another package
    Move {
        asset: Uuid,
        package: String,

        #[arg(short, long)]
        comment: String,
    },
    /// Show the category tree
    Categories,
}

/// Logs go to stderr so command output stays clean.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "rules_repository=info".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(db: Option<&Path>) -> RepositoryConfig {
    let mut config = RepositoryConfig::load();
    if let Some(path) = db {
        config.database_path = Some(path.to_path_buf());
    }
    config
}

fn open_repository(db: Option<&Path>, memory: bool) -> Result<RulesRepository> {
    if memory {
        return RulesRepository::open_memory().context("Failed to open in-memory repository");
    }
    RulesRepository::open(&load_config(db)).context("Failed to open repository")
}

fn main() -> Result<()> {
    let Cli {
        db,
        memory,
        command,
    } = Cli::parse();
    init_tracing();

    match command {
        Commands::Init { default_package } => {
            let mut config = load_config(db.as_deref());
            if let Some(name) = default_package {
                config.default_package = name;
            }
            let config_path = config.save().context("Failed to write config")?;
            RulesRepository::open(&config).context("Failed to create repository")?;
            println!("{}", config_path.display());
        }
        Commands::Packages => {
            let repo = open_repository(db.as_deref(), memory)?;
            for package in repo.list_packages()? {
                let package = package?;
                println!(
                    "{}\t{}\tv{}\t{}",
                    package.uuid(),
                    package.name(),
                    package.version_number(),
                    package.description()?
                );
            }
        }
        Commands::CreatePackage { name, description } => {
            let repo = open_repository(db.as_deref(), memory)?;
            let package = repo.create_rule_package(&name, &description)?;
            repo.save()?;
            println!("{}", package.uuid());
        }
        Commands::Rules {
            package,
            state,
            baseline,
        } => {
            let repo = open_repository(db.as_deref(), memory)?;
            let mut package = repo.load_rule_package(&package)?;
            if let Some(number) = baseline {
                package = package
                    .load_version(number)
                    .with_context(|| format!("No baseline {} of '{}'", number, package.name()))?;
            }
            match state {
                None => print!("{}", render_tree(&[package_tree(&package)?])),
                Some(state) => {
                    let state = repo.get_state(&state)?;
                    for asset in package.rules_with_state(Some(&state))? {
                        let asset = asset?;
                        println!(
                            "{}\t{}\tv{}",
                            asset.uuid(),
                            asset.name(),
                            asset.version_number()
                        );
                    }
                }
            }
        }
        Commands::History { asset } => {
            let repo = open_repository(db.as_deref(), memory)?;
            let asset = repo.load_rule_by_uuid(asset)?;
            for version in asset.version_history()? {
                let modified = version
                    .last_modified()?
                    .map(|d| d.to_rfc3339())
                    .unwrap_or_default();
                println!(
                    "v{}\t{}\t{}\t{}\t{}",
                    version.version_number(),
                    modified,
                    version.package_name()?,
                    version.state_name()?.unwrap_or_default(),
                    version.checkin_comment()?
                );
            }
        }
        Commands::Baseline {
            package,
            comment,
            state,
        } => {
            let repo = open_repository(db.as_deref(), memory)?;
            let mut package = repo.load_rule_package(&package)?;
            let state = repo.get_state(&state)?;
            package.create_baseline(&comment, &state)?;
            repo.save()?;
            println!("{}", package);
        }
        Commands::Move {
            asset,
            package,
            comment,
        } => {
            let repo = open_repository(db.as_deref(), memory)?;
            let asset = repo.move_rule_item_package(&package, asset, &comment)?;
            repo.save()?;
            println!("{}", asset);
        }
        Commands::Categories => {
            let repo = open_repository(db.as_deref(), memory)?;
            let root = repo.load_category("/")?;
            print!("{}", render_tree(&[category_tree(&root)?]));
        }
    }

    Ok(())
}

//! SCORM Runtime CLI
//!
//! Offline tooling around the runtime library.
//!
//! ## Usage
//!
//! ```bash
//! # Print the parsed manifest of a package
//! scorm-runtime inspect course.zip
//!
//! # Run the security validator (non-zero exit when rejected)
//! scorm-runtime validate course.zip
//!
//! # Print the effective configuration
//! scorm-runtime --config /path/to/config.toml config
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use scorm_runtime::config::default_config_path;
use scorm_runtime::security::{has_manifest, total_uncompressed_size};
use scorm_runtime::{Config, PackageManifest, PackageValidator, SecurityVerdict};
use serde_json::json;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use zip::ZipArchive;

#[derive(Parser, Debug)]
#[command(name = "scorm-runtime")]
#[command(about = "SCORM package inspection and validation")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "SCORM_RUNTIME_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the package manifest as JSON
    Inspect {
        /// SCORM package (.zip)
        package: PathBuf,
    },

    /// Validate a package before it is served
    Validate {
        /// SCORM package (.zip)
        package: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = default_config_path();
            if !default.exists() {
                debug!("No config file; using defaults");
                return Ok(Config::default());
            }
            default
        }
    };
    Config::load(&path).with_context(|| format!("loading {}", path.display()))
}

fn open_package(path: &Path) -> anyhow::Result<ZipArchive<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    ZipArchive::new(BufReader::new(file)).with_context(|| format!("reading {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("scorm_runtime=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Inspect { package } => {
            let mut archive = open_package(&package)?;
            let manifest = PackageManifest::from_archive(&mut archive)?;
            let report = json!({
                "manifest": manifest,
                "entries": archive.len(),
                "uncompressed_bytes": total_uncompressed_size(&mut archive),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Validate { package } => {
            let mut archive = open_package(&package)?;
            let verdict = if !has_manifest(&archive) {
                SecurityVerdict::invalid("Manifest not found in package")
            } else {
                let manifest = PackageManifest::from_archive(&mut archive)?;
                info!(
                    title = %manifest.title,
                    version = %manifest.version,
                    "Validating package"
                );
                PackageValidator::new(config.package.clone()).validate(&mut archive, &manifest)
            };

            println!("{}", serde_json::to_string_pretty(&verdict)?);
            if !verdict.valid {
                std::process::exit(1);
            }
        }

        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

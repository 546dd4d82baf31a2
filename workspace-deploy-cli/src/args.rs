use std::path::PathBuf;

use clap::FromArgMatches;
use clap::{CommandFactory, Parser};

use workspace_deploy::manifest::MANIFEST_FILE_NAME;
use workspace_deploy::{DeployOptions, ErrorPolicy, ReplacementRules};

use crate::error::AppError;

// Shamelessly borrowed from https://github.com/crate-ci/clap-cargo/blob/0378657ffdf2b67bcd6f1ab56e04a1322b92dd0e/src/style.rs
// thanks to https://stackoverflow.com/a/79614957
use anstyle::AnsiColor::*;
use anstyle::Effects;
use anstyle::Style;

const HEADER: Style = Green.on_default().effects(Effects::BOLD);
const USAGE: Style = Green.on_default().effects(Effects::BOLD);
const LITERAL: Style = Cyan.on_default().effects(Effects::BOLD);
const PLACEHOLDER: Style = Cyan.on_default();
const ERROR: Style = Red.on_default().effects(Effects::BOLD);
const VALID: Style = Cyan.on_default().effects(Effects::BOLD);
const INVALID: Style = Yellow.on_default().effects(Effects::BOLD);

const APP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(HEADER)
    .usage(USAGE)
    .literal(LITERAL)
    .placeholder(PLACEHOLDER)
    .error(ERROR)
    .valid(VALID)
    .invalid(INVALID);

#[derive(Debug, Parser)]
#[command(name = "workspace-deploy")]
#[command(version)]
#[command(about = "Deploy workspace artifacts from a packaged archive in dependency order")]
#[command(long_about = None)]
#[command(styles = APP_STYLING)]
#[command(term_width = 80)]
struct Args {
    /// Log progress to stderr. The `WORKSPACE_DEPLOY_LOG` environment variable takes precedence.
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Fetch the source and publish every artifact to the target workspace
    Publish {
        /// Path to the deploy.toml file. If not given, search for the file in the current and
        /// parent directories.
        #[arg(long, short = 'm', value_name = "PATH")]
        manifest: Option<PathBuf>,

        /// YAML file of replacements, used instead of the one named in the manifest.
        #[arg(long, short = 'r', value_name = "PATH")]
        replacements: Option<PathBuf>,

        /// Replace every occurrence of TOKEN with VALUE. Applied after the replacement file, in
        /// the order given.
        #[arg(long = "replace", value_name = "TOKEN=VALUE")]
        replace: Vec<String>,

        /// What to do after an artifact fails to publish. Required unless the manifest sets
        /// `[publish] on-error`.
        #[arg(long, value_name = "fail-fast|continue")]
        on_error: Option<ErrorPolicy>,

        /// Publish the artifacts of each type in parallel.
        #[arg(long)]
        parallel: bool,

        /// Number of threads to use with --parallel. Defaults to one per logical CPU.
        #[arg(long, short = 't', value_name = "NUM-THREADS")]
        threads: Option<u32>,

        /// Publish to an in-memory workspace instead of the target. No token is acquired.
        #[arg(long)]
        dry_run: bool,

        /// Print the report in this format instead of a summary
        #[arg(long, short = 'f', value_enum, value_name = "FORMAT")]
        format: Option<OutputFormat>,
    },
    /// Fetch and classify the source and print the publish plan without publishing
    List {
        /// Path to the deploy.toml file. If not given, search for the file in the current and
        /// parent directories.
        #[arg(long, short = 'm', value_name = "PATH")]
        manifest: Option<PathBuf>,

        /// Output format
        #[arg(long, short = 'f', value_enum, value_name = "FORMAT")]
        format: Option<OutputFormat>,
    },
    /// Check that an access token can be acquired with the configured method
    Token {
        /// Path to the deploy.toml file. If not given, search for the file in the current and
        /// parent directories.
        #[arg(long, short = 'm', value_name = "PATH")]
        manifest: Option<PathBuf>,

        /// Print the token to stdout
        #[arg(long)]
        show: bool,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Output in JSON format
    Json,
    /// Output in TOML format
    Toml,
}

#[derive(Debug)]
pub struct ValidatedArgs {
    pub verbose: bool,
    pub command: ValidatedCommand,
}

#[derive(Debug)]
pub enum ValidatedCommand {
    Publish {
        manifest_file: PathBuf,
        options: DeployOptions,
        dry_run: bool,
        format: Option<OutputFormat>,
    },
    List {
        manifest_file: PathBuf,
        format: Option<OutputFormat>,
    },
    Token {
        manifest_file: PathBuf,
        show: bool,
    },
}

impl ValidatedArgs {
    fn detect_manifest_file(arg: Option<PathBuf>) -> Result<PathBuf, AppError> {
        match arg {
            Some(path) => Ok(path),
            None => workspace_deploy::find_manifest(std::env::current_dir()?).ok_or_else(|| {
                AppError::arg_validation(format!(
                    "could not find '{MANIFEST_FILE_NAME}' in the current directory or any parent directory"
                ))
            }),
        }
    }

    fn parse_replace_pairs(pairs: Vec<String>) -> Result<ReplacementRules, AppError> {
        let mut rules = ReplacementRules::new();
        for pair in pairs {
            rules
                .insert_pair(&pair)
                .map_err(|e| AppError::arg_validation(format!("invalid --replace '{pair}': {e}")))?;
        }
        Ok(rules)
    }

    #[cfg(feature = "rayon")]
    fn configure_threads(threads: Option<u32>) -> Result<(), AppError> {
        if let Some(threads) = threads {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads as usize)
                .build_global()
                .map_err(|e| AppError::arg_validation(format!("Failed to set thread count: {e}")))?;
        }
        Ok(())
    }

    #[cfg(not(feature = "rayon"))]
    fn configure_threads(threads: Option<u32>) -> Result<(), AppError> {
        if threads.is_some() {
            tracing::warn!("built without rayon; --threads has no effect");
        }
        Ok(())
    }
}

impl TryFrom<Command> for ValidatedCommand {
    type Error = AppError;

    fn try_from(command: Command) -> Result<Self, Self::Error> {
        match command {
            Command::Publish {
                manifest,
                replacements,
                replace,
                on_error,
                parallel,
                threads,
                dry_run,
                format,
            } => {
                // If given, validate that the replacement file exists
                if let Some(ref file) = replacements
                    && !file.is_file()
                {
                    return Err(AppError::arg_validation(format!(
                        "replacement file does not exist: {}",
                        file.display()
                    )));
                }

                if threads == Some(0) {
                    return Err(AppError::arg_validation(
                        "--threads must be at least 1".to_string(),
                    ));
                }
                ValidatedArgs::configure_threads(threads)?;

                let options = DeployOptions {
                    policy: on_error,
                    parallel,
                    replacements_file: replacements,
                    extra_rules: ValidatedArgs::parse_replace_pairs(replace)?,
                    ..Default::default()
                };

                Ok(ValidatedCommand::Publish {
                    manifest_file: ValidatedArgs::detect_manifest_file(manifest)?,
                    options,
                    dry_run,
                    format,
                })
            }
            Command::List { manifest, format } => Ok(ValidatedCommand::List {
                manifest_file: ValidatedArgs::detect_manifest_file(manifest)?,
                format,
            }),
            Command::Token { manifest, show } => Ok(ValidatedCommand::Token {
                manifest_file: ValidatedArgs::detect_manifest_file(manifest)?,
                show,
            }),
        }
    }
}

pub fn parse() -> Result<ValidatedArgs, AppError> {
    let matches = Args::command().get_matches();
    let args = match Args::from_arg_matches(&matches) {
        Ok(args) => args,
        Err(err) => {
            err.format(&mut Args::command()).exit();
        }
    };
    Ok(ValidatedArgs {
        verbose: args.verbose,
        command: ValidatedCommand::try_from(args.command)?,
    })
}

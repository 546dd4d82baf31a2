use std::path::Path;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use workspace_deploy::artifact::Catalog;
use workspace_deploy::{ArchiveMap, DeployManifest, DeployOptions, WorkspaceClient};

use crate::args::{OutputFormat, ValidatedCommand};
use crate::error::AppError;
use crate::output::Plan;

mod args;
mod error;
mod output;
mod progress;

const LOG_ENV: &str = "WORKSPACE_DEPLOY_LOG";

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            err.into()
        }
    }
}

fn run() -> Result<(), AppError> {
    let args = args::parse()?;
    init_tracing(args.verbose);
    tracing::debug!(?args, "validated arguments");

    match args.command {
        ValidatedCommand::Publish {
            manifest_file,
            options,
            dry_run,
            format,
        } => publish(&manifest_file, options, dry_run, format),
        ValidatedCommand::List {
            manifest_file,
            format,
        } => list(&manifest_file, format),
        ValidatedCommand::Token {
            manifest_file,
            show,
        } => token(&manifest_file, show),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn load_manifest(manifest_file: &Path) -> Result<DeployManifest, AppError> {
    DeployManifest::load(manifest_file)
        .map_err(|err| AppError::manifest(manifest_file.display().to_string(), err))
}

fn fetch_entries(manifest: &DeployManifest) -> Result<ArchiveMap, AppError> {
    manifest
        .fetch_entries()
        .map_err(|err| AppError::source_acquisition(manifest.source.to_string(), err))
}

fn publish(
    manifest_file: &Path,
    options: DeployOptions,
    dry_run: bool,
    format: Option<OutputFormat>,
) -> Result<(), AppError> {
    let manifest = load_manifest(manifest_file)?;
    // Refuse to start before any token is requested or anything is fetched
    manifest
        .error_policy(options.policy)
        .map_err(|err| AppError::arg_validation(err.to_string()))?;

    let client: Box<dyn WorkspaceClient> = if dry_run {
        Box::new(manifest.preview_client())
    } else {
        let token = manifest
            .auth
            .acquire()
            .map_err(|err| AppError::credential(manifest.auth.to_string(), err))?;
        Box::new(manifest.rest_client(&token)?)
    };

    let cancel = options.cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || cancel.cancel()) {
        tracing::warn!(%err, "could not install Ctrl-C handler; the run cannot be cancelled");
    }

    let publisher = manifest.publisher(client, &options)?;
    let catalog = publisher.catalog(fetch_entries(&manifest)?);

    let pb = progress::make_progress_bar(catalog.artifacts().len() + catalog.skipped().len());
    let observer_pb = pb.clone();
    let report = publisher
        .with_observer(move |result| progress::record_result(&observer_pb, result))
        .publish_catalog(catalog);
    pb.finish_and_clear();

    match format {
        Some(format) => println!("{}", output::render(&report, format)?),
        None => {
            for result in report.successes() {
                println!("✅ {result}");
            }
            println!("\n{}", progress::summary(&report));
        }
    }

    match report.failures().count() {
        0 => Ok(()),
        failed => Err(AppError::publish(failed)),
    }
}

fn list(manifest_file: &Path, format: Option<OutputFormat>) -> Result<(), AppError> {
    let manifest = load_manifest(manifest_file)?;
    let client = manifest.preview_client();
    let catalog = Catalog::build(fetch_entries(&manifest)?, &manifest.classify_options(&client));
    let plan = Plan::new(&catalog, Some(client.supported_types()));
    match format {
        Some(format) => println!("{}", output::render(&plan, format)?),
        None => print!("{plan}"),
    }
    Ok(())
}

fn token(manifest_file: &Path, show: bool) -> Result<(), AppError> {
    let manifest = load_manifest(manifest_file)?;
    let token = manifest
        .auth
        .acquire()
        .map_err(|err| AppError::credential(manifest.auth.to_string(), err))?;
    if show {
        println!("{}", token.secret());
    } else {
        println!("✅ Acquired an access token using {}", manifest.auth);
    }
    Ok(())
}

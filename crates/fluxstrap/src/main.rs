//! `fluxstrap` command line.
//!
//! A thin wrapper over [`BootstrapService`]: every subcommand loads the YAML
//! configuration, reads or writes the JSON state file and prints what the
//! service returned.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;

use fluxstrap::lifecycle::Diagnostics;
use fluxstrap::service::{
    ConfigureRequest, CreateRequest, DeleteRequest, ImportRequest, PlanRequest, ReadRequest,
    RenderRequest, UpdateRequest,
};
use fluxstrap::{
    load_configuration, logging, BootstrapError, BootstrapReconciler, BootstrapService,
    Configuration, DriftScheduler, GitCli, KubeCluster, LogFormat, PersistedState, Result,
};

/// Bootstrap and reconcile a Flux installation from a Git repository
#[derive(Parser, Debug)]
#[command(name = "fluxstrap")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (YAML)
    #[arg(long, short, global = true, env = "FLUXSTRAP_CONFIG", default_value = "fluxstrap.yaml")]
    config: PathBuf,

    /// State file (JSON) recording the installation
    #[arg(long, global = true, env = "FLUXSTRAP_STATE", default_value = "fluxstrap-state.json")]
    state: PathBuf,

    /// Log output format (text, json)
    #[arg(long, global = true, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration and print it with defaults applied
    Validate,
    /// Print the manifests the configuration renders to
    Render {
        /// Write the files below this directory instead of printing them
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Show what an update would change
    Plan,
    /// Commit the manifests, install Flux and record the installation
    Create,
    /// Refresh the recorded state from the repository and the cluster
    Read,
    /// Commit changed manifests and converge the cluster to them
    Update,
    /// Uninstall Flux and stop tracking the installation
    Delete,
    /// Record an existing installation without changing it
    Import {
        /// Namespace the installation lives in
        namespace: String,
    },
    /// Correct drift on every reconciliation interval until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_configuration(&cli.config)?;
    let service = service(&config);

    match cli.command {
        Commands::Validate => {
            let response = service.configure(ConfigureRequest { configuration: config })?;
            print_yaml(&response.configuration.without_secrets())?;
        }
        Commands::Render { output } => {
            let install = service.render_install(RenderRequest {
                configuration: config.clone(),
            })?;
            let sync = service.render_sync(RenderRequest {
                configuration: config.clone(),
            })?;
            match output {
                Some(dir) => {
                    for (path, content) in fluxstrap::build(&config)?.iter() {
                        write_file(&dir.join(path), content)?;
                    }
                    println!("wrote manifests to {}", dir.display());
                }
                None => {
                    for manifest in [install, sync] {
                        println!("# {}\n{}", manifest.path, manifest.content);
                    }
                }
            }
        }
        Commands::Plan => {
            let state = PersistedState::load(&cli.state)?;
            let response = service.plan(PlanRequest {
                configuration: config,
                state,
            })?;
            print_json(&response.plan)?;
        }
        Commands::Create => {
            refuse_existing(&cli.state)?;
            let response = service.create(CreateRequest { configuration: config }).await?;
            report(&response.diagnostics);
            response.state.save(&cli.state)?;
            println!("created installation {}", response.state.id);
        }
        Commands::Read => {
            let state = require_state(&cli.state)?;
            let response = service
                .read(ReadRequest {
                    configuration: config,
                    state,
                })
                .await?;
            report(&response.diagnostics);
            match response.state {
                Some(state) => {
                    state.save(&cli.state)?;
                    print_json(&state.repository_files)?;
                }
                None => {
                    PersistedState::remove(&cli.state)?;
                    println!("installation no longer exists; state removed");
                }
            }
        }
        Commands::Update => {
            let state = require_state(&cli.state)?;
            let response = service
                .update(UpdateRequest {
                    configuration: config,
                    state,
                })
                .await?;
            report(&response.diagnostics);
            response.state.save(&cli.state)?;
            println!("updated installation {}", response.state.id);
        }
        Commands::Delete => {
            let state = require_state(&cli.state)?;
            let response = service
                .delete(DeleteRequest {
                    configuration: config,
                    state,
                })
                .await;
            report(&response.diagnostics);
            PersistedState::remove(&cli.state)?;
            if let Some(error) = response.error {
                eprintln!("error: {}", error);
                return Ok(ExitCode::FAILURE);
            }
            println!("deleted installation");
        }
        Commands::Import { namespace } => {
            refuse_existing(&cli.state)?;
            let response = service
                .import(ImportRequest {
                    id: namespace,
                    configuration: config,
                })
                .await?;
            report(&response.diagnostics);
            response.state.save(&cli.state)?;
            print_yaml(&response.configuration.without_secrets())?;
        }
        Commands::Watch => {
            let reconciler = Arc::new(service.into_reconciler());
            let scheduler = DriftScheduler::new(reconciler, config, &cli.state)?;
            let (shutdown_tx, shutdown_rx) = watch::channel(false);

            let interrupt = async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "failed to listen for interrupt");
                }
                tracing::info!("interrupt received, shutting down");
                let _ = shutdown_tx.send(true);
            };
            tokio::join!(scheduler.run(shutdown_rx), interrupt);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn service(config: &Configuration) -> BootstrapService<GitCli, KubeCluster> {
    BootstrapService::new(BootstrapReconciler::new(
        GitCli::new(&config.credentials),
        KubeCluster::new(&config.cluster),
    ))
}

fn refuse_existing(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(BootstrapError::State(format!(
            "{} already records an installation",
            path.display()
        )));
    }
    Ok(())
}

fn require_state(path: &Path) -> Result<PersistedState> {
    PersistedState::load(path)?.ok_or_else(|| {
        BootstrapError::State(format!(
            "no installation recorded at {}; run create or import first",
            path.display()
        ))
    })
}

fn report(diagnostics: &Diagnostics) {
    for diagnostic in diagnostics.iter() {
        eprintln!("{}", diagnostic);
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| BootstrapError::State(format!("failed to serialize output: {}", e)))?;
    println!("{}", json);
    Ok(())
}

fn print_yaml<T: serde::Serialize>(value: &T) -> Result<()> {
    let yaml = serde_yaml::to_string(value).map_err(|e| BootstrapError::Render {
        manifest: "output".to_string(),
        message: e.to_string(),
    })?;
    print!("{}", yaml);
    Ok(())
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| BootstrapError::WriteFile {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    std::fs::write(path, content).map_err(|e| BootstrapError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}

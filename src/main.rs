use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gauth::credentials::{for_remote, CredentialsModule, RobotCredentials};
use gauth::metadata::MetadataReader;
use gauth::registry::{credentials_list, CredentialRegistry, CredentialStore, InMemoryStore};
use gauth::scope::ScopeRequirement;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "gauth=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cfg = gauth::config::load()?;
    let args = cli::Cli::parse();
    let module = CredentialsModule::from_config(&cfg)?;

    let result = run(&cfg, module, args.command).await;
    if let Err(ref e) = result {
        tracing::error!(error = %e, "command failed");
    }
    result
}

async fn run(
    cfg: &gauth::config::Config,
    module: CredentialsModule,
    command: cli::Commands,
) -> anyhow::Result<()> {
    match command {
        cli::Commands::Metadata { command } => handle_metadata_command(&module, command).await,
        cli::Commands::List { scope } => {
            let store = load_store(cfg, module).await?;
            let requirement = ScopeRequirement::google(scope);
            for (name, id) in credentials_list(&store, &requirement).await {
                println!("{id}\t{name}");
            }
            Ok(())
        }
        cli::Commands::Token { id, scope } => {
            let store = load_store(cfg, module).await?;
            let credentials = find(&store, &id).await?;
            let token = credentials
                .get_access_token(&ScopeRequirement::google(scope))
                .await?;
            println!("{}", token.value.expose());
            Ok(())
        }
        cli::Commands::Remote { id, scope } => {
            let store = load_store(cfg, module).await?;
            let credentials = find(&store, &id).await?;
            let snapshot = for_remote(&credentials, &ScopeRequirement::google(scope)).await?;
            println!("{}", serde_json::to_string_pretty(snapshot.as_ref())?);
            Ok(())
        }
    }
}

async fn load_store(
    cfg: &gauth::config::Config,
    module: CredentialsModule,
) -> anyhow::Result<InMemoryStore> {
    let registry = CredentialRegistry::discover(module).await;
    let source = std::fs::read_to_string(&cfg.credentials_file)
        .with_context(|| format!("failed to read {}", cfg.credentials_file))?;
    let store = InMemoryStore::from_yaml(&registry, &source)?;
    tracing::debug!(count = store.len(), "loaded credentials");
    Ok(store)
}

async fn find(store: &InMemoryStore, id: &str) -> anyhow::Result<Arc<dyn RobotCredentials>> {
    store
        .lookup_by_id(id)
        .await
        .with_context(|| format!("no credential with id '{id}'"))
}

async fn handle_metadata_command(
    module: &CredentialsModule,
    command: cli::MetadataCommands,
) -> anyhow::Result<()> {
    match command {
        cli::MetadataCommands::Probe => {
            if module.metadata.has_metadata().await {
                println!("metadata service reachable");
            } else {
                anyhow::bail!("metadata service unreachable");
            }
        }
        cli::MetadataCommands::Read { path } => {
            let value = module.metadata.read_metadata(&path).await?;
            println!("{value}");
        }
    }
    Ok(())
}

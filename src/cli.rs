use clap::{Parser, Subcommand};

/// gauth: OAuth2 robot credentials for build workers
#[derive(Parser)]
#[command(name = "gauth", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List credentials able to serve the given scopes
    List {
        #[arg(long, value_delimiter = ',')]
        scope: Vec<String>,
    },

    /// Print a fresh access token for a credential
    Token {
        #[arg(long)]
        id: String,
        #[arg(long, value_delimiter = ',')]
        scope: Vec<String>,
    },

    /// Print a snapshot of a credential, safe to ship to a worker
    Remote {
        #[arg(long)]
        id: String,
        #[arg(long, value_delimiter = ',')]
        scope: Vec<String>,
    },

    /// Query the instance metadata service
    Metadata {
        #[command(subcommand)]
        command: MetadataCommands,
    },
}

#[derive(Subcommand)]
pub enum MetadataCommands {
    /// Check whether the metadata service is reachable
    Probe,
    /// Read one metadata path, e.g. /project/project-id
    Read { path: String },
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "grantstore")]
#[command(about = "grantstore - manage persisted OAuth2 grants, clients and users")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file (defaults to ./grantstore.toml when present)
    #[arg(short, long, global = true, env = "GRANTSTORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level or filter directive (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create collections and expiry indexes
    Init,
    /// Delete expired records
    Reap(ReapArgs),
    /// Print the grant behind a code, token or account
    Inspect(InspectArgs),
    /// Delete a code, access token or refresh token record
    Revoke(RevokeArgs),
    /// Manage client registrations
    Client(ClientArgs),
    /// Manage users
    User(UserArgs),
    /// Show effective settings
    Config(ConfigArgs),
}

#[derive(clap::Args)]
pub struct ReapArgs {
    /// Run a single pass instead of polling until Ctrl-C
    #[arg(long)]
    pub once: bool,
}

#[derive(clap::Args)]
#[group(required = true, multiple = false)]
pub struct InspectArgs {
    /// Authorization code
    #[arg(long)]
    pub code: Option<String>,
    /// Access token
    #[arg(long)]
    pub access: Option<String>,
    /// Refresh token
    #[arg(long)]
    pub refresh: Option<String>,
    /// User ID and client ID
    #[arg(long, num_args = 2, value_names = ["USER", "CLIENT"])]
    pub account: Option<Vec<String>>,
}

#[derive(clap::Args)]
#[group(required = true, multiple = false)]
pub struct RevokeArgs {
    /// Authorization code
    #[arg(long)]
    pub code: Option<String>,
    /// Access token (the basic record and refresh token are kept)
    #[arg(long)]
    pub access: Option<String>,
    /// Refresh token (the basic record and access token are kept)
    #[arg(long)]
    pub refresh: Option<String>,
}

#[derive(clap::Args)]
pub struct ClientArgs {
    #[command(subcommand)]
    pub command: ClientCommands,
}

#[derive(Subcommand)]
pub enum ClientCommands {
    /// Register a client
    Add(ClientAddArgs),
    /// Show a client
    Get {
        /// Client ID
        id: String,
    },
    /// Remove a client
    Remove {
        /// Client ID
        id: String,
    },
}

#[derive(clap::Args)]
pub struct ClientAddArgs {
    /// Client ID
    pub id: String,
    /// Client secret
    #[arg(long, env = "GRANTSTORE_CLIENT_SECRET")]
    pub secret: String,
    /// Redirect domain
    #[arg(long, default_value = "")]
    pub domain: String,
    /// Owning user ID
    #[arg(long, default_value = "")]
    pub user_id: String,
}

#[derive(clap::Args)]
pub struct UserArgs {
    #[command(subcommand)]
    pub command: UserCommands,
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create a user
    Add(PasswordArgs),
    /// Change a user's password
    Passwd(PasswordArgs),
    /// Remove a user
    Remove {
        /// User ID
        id: String,
    },
}

#[derive(clap::Args)]
pub struct PasswordArgs {
    /// User ID
    pub id: String,
    /// Raw password; it is hashed before storage
    #[arg(long, env = "GRANTSTORE_PASSWORD")]
    pub password: String,
}

#[derive(clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the merged settings as TOML
    Show,
}

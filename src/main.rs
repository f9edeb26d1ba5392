use clap::{Parser, Subcommand};
use kc_adapter::{AppConfig, KeycloakAdapter, KeycloakPort};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to the platform config dir); KEYCLOAK__* env vars override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Password grant
    Token { username: String, password: String },
    /// Exchange a refresh token for a new token pair
    Refresh { refresh_token: String },
    /// User info for an access token
    Userinfo { token: String },
    /// End the session of a refresh token
    Logout { refresh_token: String },
    /// Check signature and expiry of an access token
    Validate { token: String },
    /// Ask Keycloak whether a token is active
    Introspect { token: String },
    /// Print the verified claims of an access token
    Whoami { token: String },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout stays machine readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::load(args.config.as_deref())?;
    tracing::debug!(
        "Using realm {} at {}",
        config.keycloak.realm_name,
        config.keycloak.server_url
    );
    let adapter = KeycloakAdapter::new(config.keycloak)?;

    match args.command {
        Command::Token { username, password } => print_json(&adapter.get_token(&username, &password)?)?,
        Command::Refresh { refresh_token } => print_json(&adapter.refresh_token(&refresh_token)?)?,
        Command::Userinfo { token } => print_json(&adapter.get_userinfo(&token)?)?,
        Command::Logout { refresh_token } => {
            adapter.logout(&refresh_token)?;
            print_json(&serde_json::json!({ "logged_out": true }))?;
        }
        Command::Validate { token } => {
            let valid = adapter.validate_token(&token);
            print_json(&serde_json::json!({ "valid": valid }))?;
            if !valid {
                std::process::exit(1);
            }
        }
        Command::Introspect { token } => print_json(&adapter.introspect_token(&token)?)?,
        Command::Whoami { token } => print_json(&adapter.get_token_info(&token)?)?,
    }

    Ok(())
}

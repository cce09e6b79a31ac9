use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{error, info, warn};

use hakotalk::auth::{BrowserAuth, LoginOptions};
use hakotalk::client::{Client, ClientOptions, Group};
use hakotalk::config::{load_config, print_schema, ConfigV1};
use hakotalk::error::HakoError;
use hakotalk::store::create_store;
use hakotalk::sync::SyncManager;
use hakotalk::utils::init_logging;

const USAGE: &str = "\
usage: hakotalk <command> [args]

commands:
  login <group> [--headless] [--profile DIR]   interactive browser login
  refresh <group> [--profile DIR]              refresh the stored access token
  sync <group> [--profile DIR]                 mirror messages and media
  logout <group>                               delete stored credentials
  schema                                       print the config JSON schema

groups: hinatazaka46, nogizaka46, sakurazaka46";

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{}", USAGE);
        return ExitCode::FAILURE;
    };

    if command == "schema" {
        print_schema();
        return ExitCode::SUCCESS;
    }

    let config = load_config();
    init_logging(&config.logging);

    let result = match command {
        "login" => login(&config, &args[1..]).await,
        "refresh" => refresh(&config, &args[1..]).await,
        "sync" => sync(&config, &args[1..]).await,
        "logout" => logout(&config, &args[1..]).await,
        _ => {
            eprintln!("unknown command '{}'\n\n{}", command, USAGE);
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn parse_group(args: &[String]) -> Result<Group, HakoError> {
    args.first()
        .map(String::as_str)
        .unwrap_or("")
        .parse::<Group>()
}

fn flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

fn flag_value(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

async fn build_client(
    config: &ConfigV1,
    group: Group,
    args: &[String],
) -> Result<Client, HakoError> {
    let options = ClientOptions {
        auth_dir: flag_value(args, "--profile").map(PathBuf::from),
        auto_install_browser: true,
        ..Default::default()
    };
    let store = create_store(&config.store);
    Client::with_store(group, options, store).await
}

async fn login(config: &ConfigV1, args: &[String]) -> Result<(), HakoError> {
    let group = parse_group(args)?;
    let options = LoginOptions {
        headless: flag(args, "--headless"),
        profile_dir: flag_value(args, "--profile").map(PathBuf::from),
        channel: flag_value(args, "--channel"),
    };

    let Some(bundle) = BrowserAuth::login(group, &options).await else {
        warn!(group = %group, "Login did not produce credentials");
        return Err(HakoError::Store("login failed".to_string()));
    };

    let mut client = build_client(config, group, args).await?;
    client.adopt_bundle(&bundle).await;

    match client.get_profile().await? {
        Some(profile) => {
            let nickname = profile
                .get("nickname")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("(unknown)");
            info!(group = %group, nickname, "Logged in");
        }
        None => warn!(group = %group, "Logged in, but the profile request failed"),
    }
    Ok(())
}

async fn refresh(config: &ConfigV1, args: &[String]) -> Result<(), HakoError> {
    let group = parse_group(args)?;
    let mut client = build_client(config, group, args).await?;
    if client.refresh_access_token().await? {
        info!(group = %group, "Token refreshed");
        Ok(())
    } else {
        Err(HakoError::Store(
            "refresh failed; run `hakotalk login` again".to_string(),
        ))
    }
}

async fn sync(config: &ConfigV1, args: &[String]) -> Result<(), HakoError> {
    let group = parse_group(args)?;
    let client = build_client(config, group, args).await?;
    tokio::fs::create_dir_all(&config.sync.output_dir).await?;
    let mut manager = SyncManager::new(client, &config.sync.output_dir, config.sync.concurrency);
    let processed = manager.run().await?;
    info!(group = %group, processed, "Done");
    Ok(())
}

async fn logout(config: &ConfigV1, args: &[String]) -> Result<(), HakoError> {
    let group = parse_group(args)?;
    let store = create_store(&config.store);
    store
        .delete(group.as_str())
        .await
        .map_err(HakoError::Store)?;
    info!(group = %group, "Stored credentials deleted");
    Ok(())
}

//! Command handlers.
//!
//! Every handler runs one service call and prints its result as JSON on stdout.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::ArgMatches;
use rollout_core::{
    config::{load_config, Config},
    invitation::ParticipantInvitation,
    protocol::{DeviceRegistration, RegistrationDetails, RoleName, StudyProtocolSnapshot},
    DeploymentId, DeploymentService, SystemClock,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::setup::init_tracing;
use crate::store::JsonFileRepository;

type Service = DeploymentService<JsonFileRepository>;

pub async fn dispatch(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches.get_one::<PathBuf>("config").cloned())
        .await
        .context("Failed to load configuration")?;
    init_tracing(&config.log.level)?;

    let repository = JsonFileRepository::new(&config.store.data_dir);
    debug!(data_dir = %repository.dir().display(), "Using deployment store");
    let service = DeploymentService::new(Arc::new(repository), Arc::new(SystemClock));

    match matches.subcommand() {
        Some(("create", sub_m)) => handle_create(&service, &config, sub_m).await,
        Some(("status", sub_m)) => handle_status(&service, &config, sub_m).await,
        Some(("register", sub_m)) => handle_register(&service, &config, sub_m).await,
        Some(("unregister", sub_m)) => handle_unregister(&service, &config, sub_m).await,
        Some(("deployment", sub_m)) => handle_deployment(&service, &config, sub_m).await,
        Some(("deployed", sub_m)) => handle_deployed(&service, &config, sub_m).await,
        Some(("stop", sub_m)) => handle_stop(&service, &config, sub_m).await,
        Some(("list", _)) => handle_list(&service, &config).await,
        _ => anyhow::bail!("Unknown command. Run 'rollout --help' for usage."),
    }
}

async fn handle_create(service: &Service, config: &Config, matches: &ArgMatches) -> Result<()> {
    let protocol: StudyProtocolSnapshot = read_json(required::<PathBuf>(matches, "protocol")?).await?;
    let invitations: Vec<ParticipantInvitation> = match matches.get_one::<PathBuf>("invitations") {
        Some(path) => read_json(path).await?,
        None => Vec::new(),
    };

    let status = service.create_deployment(protocol, &invitations).await?;
    print_json(config, &status)
}

async fn handle_status(service: &Service, config: &Config, matches: &ArgMatches) -> Result<()> {
    let status = service.status(deployment_id(matches)?).await?;
    print_json(config, &status)
}

async fn handle_register(service: &Service, config: &Config, matches: &ArgMatches) -> Result<()> {
    let device_id = required::<String>(matches, "device-id")?;
    let registration = match matches.get_one::<String>("details") {
        Some(json) => {
            let details: RegistrationDetails =
                serde_json::from_str(json).context("Invalid --details JSON")?;
            DeviceRegistration::with_details(device_id.as_str(), details)
        }
        None => DeviceRegistration::new(device_id.as_str()),
    };

    let status = service
        .register_device(deployment_id(matches)?, role(matches)?, registration)
        .await?;
    print_json(config, &status)
}

async fn handle_unregister(
    service: &Service,
    config: &Config,
    matches: &ArgMatches,
) -> Result<()> {
    let status = service
        .unregister_device(deployment_id(matches)?, role(matches)?)
        .await?;
    print_json(config, &status)
}

async fn handle_deployment(
    service: &Service,
    config: &Config,
    matches: &ArgMatches,
) -> Result<()> {
    let deployment = service
        .device_deployment_for(deployment_id(matches)?, &role(matches)?)
        .await?;
    print_json(config, &deployment)
}

async fn handle_deployed(service: &Service, config: &Config, matches: &ArgMatches) -> Result<()> {
    let token = *required::<DateTime<Utc>>(matches, "token")?;
    let status = service
        .device_deployed(deployment_id(matches)?, role(matches)?, token)
        .await?;
    print_json(config, &status)
}

async fn handle_stop(service: &Service, config: &Config, matches: &ArgMatches) -> Result<()> {
    let status = service.stop(deployment_id(matches)?).await?;
    print_json(config, &status)
}

async fn handle_list(service: &Service, config: &Config) -> Result<()> {
    let ids = service.list().await?;
    print_json(config, &ids)
}

// ═══════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════

fn required<'a, T: Clone + Send + Sync + 'static>(
    matches: &'a ArgMatches,
    name: &str,
) -> Result<&'a T> {
    matches
        .get_one::<T>(name)
        .with_context(|| format!("Missing required argument '{name}'"))
}

fn deployment_id(matches: &ArgMatches) -> Result<DeploymentId> {
    required::<DeploymentId>(matches, "id").copied()
}

fn role(matches: &ArgMatches) -> Result<RoleName> {
    required::<RoleName>(matches, "role").cloned()
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: Serialize>(config: &Config, value: &T) -> Result<()> {
    let json = if config.output.pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{json}");
    Ok(())
}

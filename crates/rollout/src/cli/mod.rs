//! CLI command definitions using `clap`

pub mod handlers;
pub mod setup;

use std::{path::PathBuf, str::FromStr};

use chrono::{DateTime, Utc};
use clap::{value_parser, Arg, Command};
use rollout_core::{protocol::RoleName, DeploymentId};

pub fn build_cli() -> Command {
    Command::new("rollout")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Roll study protocols out onto participant devices")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file overriding all other sources"),
        )
        .subcommand(cmd_create())
        .subcommand(cmd_status())
        .subcommand(cmd_register())
        .subcommand(cmd_unregister())
        .subcommand(cmd_deployment())
        .subcommand(cmd_deployed())
        .subcommand(cmd_stop())
        .subcommand(Command::new("list").about("List stored deployment ids"))
}

fn arg_deployment_id() -> Arg {
    Arg::new("id")
        .required(true)
        .value_name("DEPLOYMENT_ID")
        .value_parser(DeploymentId::from_str)
        .help("Deployment id as returned by 'rollout create'")
}

fn arg_role() -> Arg {
    Arg::new("role")
        .long("role")
        .short('r')
        .required(true)
        .value_name("ROLE")
        .value_parser(|s: &str| RoleName::parse(s))
        .help("Role name of the device in the protocol")
}

fn cmd_create() -> Command {
    Command::new("create")
        .about("Create a deployment from a protocol")
        .arg(
            Arg::new("protocol")
                .long("protocol")
                .short('p')
                .required(true)
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("JSON file holding the study protocol"),
        )
        .arg(
            Arg::new("invitations")
                .long("invitations")
                .short('i')
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("JSON file holding the participant invitations"),
        )
}

fn cmd_status() -> Command {
    Command::new("status")
        .about("Show the status of a deployment")
        .arg(arg_deployment_id())
}

fn cmd_register() -> Command {
    Command::new("register")
        .about("Register a device for a role")
        .arg(arg_deployment_id())
        .arg(arg_role())
        .arg(
            Arg::new("device-id")
                .long("device-id")
                .short('d')
                .required(true)
                .value_name("DEVICE_ID")
                .help("Identifier of the physical device"),
        )
        .arg(
            Arg::new("details")
                .long("details")
                .value_name("JSON")
                .help("Type-specific registration details, e.g. '{\"kind\":\"default\"}'"),
        )
}

fn cmd_unregister() -> Command {
    Command::new("unregister")
        .about("Remove the registration of a device")
        .arg(arg_deployment_id())
        .arg(arg_role())
}

fn cmd_deployment() -> Command {
    Command::new("deployment")
        .about("Print the deployment a master device has to run")
        .arg(arg_deployment_id())
        .arg(arg_role())
}

fn cmd_deployed() -> Command {
    Command::new("deployed")
        .about("Confirm a master device runs its deployment")
        .arg(arg_deployment_id())
        .arg(arg_role())
        .arg(
            Arg::new("token")
                .long("token")
                .short('t')
                .required(true)
                .value_name("RFC3339")
                .value_parser(|s: &str| {
                    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
                })
                .help("The 'last_updated_on' of the deployment that was installed"),
        )
}

fn cmd_stop() -> Command {
    Command::new("stop")
        .about("Stop a deployment")
        .arg(arg_deployment_id())
}

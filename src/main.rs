mod cli;
mod tui;
mod watch;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use netgauge::settings::SettingsError;
use netgauge::{InterfaceHandle, SystemProvider, ThroughputSampler};

use crate::cli::{Cli, Commands, OutputFormat};
use crate::tui::run_dashboard;
use crate::watch::run_watch;

#[derive(Debug, Error)]
pub(crate) enum CommandError {
    #[error("no network interfaces found")]
    NoInterfaces,
}

fn print_interfaces(all: bool, format: OutputFormat) -> Result<()> {
    let mut sampler = ThroughputSampler::new(SystemProvider::new());
    let interfaces = if all {
        sampler.all_interfaces()
    } else {
        sampler.interfaces()
    }
    .context("Listing interfaces")?;

    if interfaces.is_empty() {
        return Err(CommandError::NoInterfaces.into());
    }
    println!("{}", render_interfaces(&interfaces, format)?);
    Ok(())
}

fn render_interfaces(interfaces: &[InterfaceHandle], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(interfaces)?),
        OutputFormat::Text => {
            let lines: Vec<String> = interfaces
                .iter()
                .map(|i| {
                    let speed = i
                        .link_speed
                        .map(|bps| format!("{} Mbit/s", bps / 1_000_000))
                        .unwrap_or_else(|| "-".into());
                    format!("{}\t{:?}\t{:?}\t{}", i.id, i.kind, i.oper_state, speed)
                })
                .collect();
            Ok(lines.join("\n"))
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let cli = Cli::parse();
    let result: Result<()> = match cli.command {
        Some(Commands::Interfaces { all, format }) => print_interfaces(all, format),
        Some(Commands::Watch { monitor, format, count }) => run_watch(monitor, format, count),
        Some(Commands::Dashboard { monitor }) => run_dashboard(monitor),
        None => {
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    };

    if let Err(err) = result {
        let code = exit_code_for_error(&err);
        eprintln!("error: {err:?}");
        std::process::exit(code);
    }
}

pub(crate) fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    // 2: no interfaces, 3: bad settings, 1: other
    for cause in err.chain() {
        if let Some(CommandError::NoInterfaces) = cause.downcast_ref::<CommandError>() {
            return 2;
        }
        if cause.is::<SettingsError>() {
            return 3;
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use netgauge::interfaces::{InterfaceKind, OperState};

    #[test]
    fn exit_code_no_interfaces() {
        let err = anyhow::Error::from(CommandError::NoInterfaces);
        assert_eq!(exit_code_for_error(&err), 2);
    }

    #[test]
    fn exit_code_settings_error_behind_context() {
        let err = anyhow::Error::from(SettingsError::Invalid {
            field: "max_scale_decay",
            reason: "must be in (0, 1]".into(),
        })
        .context("Loading settings");
        assert_eq!(exit_code_for_error(&err), 3);
    }

    #[test]
    fn exit_code_other() {
        let err = anyhow::anyhow!("other");
        assert_eq!(exit_code_for_error(&err), 1);
    }

    #[test]
    fn text_listing_shows_speed_in_mbit() {
        let list = vec![
            InterfaceHandle {
                id: "eth0".into(),
                name: "eth0".into(),
                kind: InterfaceKind::Ethernet,
                oper_state: OperState::Up,
                link_speed: Some(1_000_000_000),
            },
            InterfaceHandle {
                id: "wg0".into(),
                name: "wg0".into(),
                kind: InterfaceKind::Tunnel,
                oper_state: OperState::Unknown,
                link_speed: None,
            },
        ];
        let out = render_interfaces(&list, OutputFormat::Text).unwrap();
        assert_eq!(out, "eth0\tEthernet\tUp\t1000 Mbit/s\nwg0\tTunnel\tUnknown\t-");

        let json = render_interfaces(&list, OutputFormat::Json).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v[0]["kind"], "ethernet");
        assert_eq!(v[1]["oper_state"], "unknown");
    }
}

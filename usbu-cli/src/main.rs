//! usbu command line
//!
//! A thin front end over [`SnapshotService`]. Text goes to stdout, logs go
//! to stderr. Exit status: 0 ok, 1 not found, 2 ambiguous, 3 any other
//! failure (store, port enumeration, serial I/O).

mod cli;
mod output;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use usbu_detect::ScanWarning;
use usbu_model::Generation;
use usbu_sync::{Resolution, ServiceError, SnapshotService};

use cli::{Cli, Commands, FindArgs, ResolveArgs, SendArgs, TargetArgs};

const NOT_FOUND: u8 = 1;
const AMBIGUOUS: u8 = 2;
const FAILURE: u8 = 3;

#[derive(Serialize)]
struct ScanOutput<'a> {
    persisted: bool,
    store: String,
    snapshots: &'a Generation,
    warnings: &'a [ScanWarning],
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ResolveOutput<'a> {
    Found { port: &'a str },
    NotFound,
    Ambiguous { candidates: Vec<&'a str> },
}

#[derive(Serialize)]
struct SendOutput<'a> {
    port: &'a str,
    bytes_written: usize,
    response: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "usbu_cli=info,usbu_model=info,usbu_detect=info,usbu_sync=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(failure_code(&e))
        }
    }
}

/// Exit status for a failed command
fn failure_code(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<ServiceError>() {
        Some(ServiceError::NotFound(_)) => NOT_FOUND,
        Some(ServiceError::Ambiguous { .. }) => AMBIGUOUS,
        _ => FAILURE,
    }
}

async fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    let config = cli.service_config();
    tracing::debug!("Using store {}", config.snapshot_path.display());
    let service = SnapshotService::from_config(&config);

    match &cli.command {
        Commands::Scan => cmd_scan(cli, &service).await,
        Commands::List => cmd_list(cli, &service).await,
        Commands::Find(args) => cmd_find(cli, &service, args).await,
        Commands::Resolve(args) => cmd_resolve(cli, &service, args).await,
        Commands::Ports => cmd_ports(cli, &service).await,
        Commands::Connections(args) => cmd_connections(cli, &service, args).await,
        Commands::IsConnected(args) => cmd_is_connected(cli, &service, args).await,
        Commands::Send(args) => cmd_send(cli, &service, args).await,
    }
}

async fn cmd_scan(cli: &Cli, service: &SnapshotService) -> anyhow::Result<ExitCode> {
    let report = service.scan().await.context("scan failed")?;
    let store = service.repository().path().display().to_string();

    if cli.json {
        output::print_json(&ScanOutput {
            persisted: report.persisted,
            store,
            snapshots: &report.generation,
            warnings: &report.warnings,
        })?;
    } else {
        for snapshot in report.generation.iter() {
            println!("{}", output::snapshot_line(snapshot));
        }
        for warning in &report.warnings {
            eprintln!("warning: {}", warning);
        }
        if report.persisted {
            println!("{} device(s) stored in {}", report.generation.len(), store);
        } else {
            println!("Every backend failed; {} left unchanged", store);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_list(cli: &Cli, service: &SnapshotService) -> anyhow::Result<ExitCode> {
    let generation = service.latest().await?;
    if cli.json {
        output::print_json(generation.as_ref())?;
    } else if generation.is_empty() {
        println!("No stored devices; run `usbu scan` first");
    } else {
        for snapshot in generation.iter() {
            println!("{}", output::snapshot_block(snapshot));
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_find(
    cli: &Cli,
    service: &SnapshotService,
    args: &FindArgs,
) -> anyhow::Result<ExitCode> {
    let target = &args.target;
    let mut found = service
        .find_all_by_identity(target.vendor_id, target.product_id, target.serial.as_deref())
        .await?;
    if !args.all {
        found.truncate(1);
    }

    if cli.json {
        output::print_json(&found)?;
    } else {
        for snapshot in &found {
            println!("{}", output::snapshot_block(snapshot));
        }
    }
    Ok(if found.is_empty() {
        ExitCode::from(NOT_FOUND)
    } else {
        ExitCode::SUCCESS
    })
}

async fn cmd_resolve(
    cli: &Cli,
    service: &SnapshotService,
    args: &ResolveArgs,
) -> anyhow::Result<ExitCode> {
    let query = args.query();
    let resolution = service.resolve(&query).await?;

    let (rendered, code) = match &resolution {
        Resolution::Found(port) => (
            ResolveOutput::Found {
                port: &port.port_name,
            },
            ExitCode::SUCCESS,
        ),
        Resolution::NotFound => (ResolveOutput::NotFound, ExitCode::from(NOT_FOUND)),
        Resolution::Ambiguous(_) => (
            ResolveOutput::Ambiguous {
                candidates: resolution.candidate_names(),
            },
            ExitCode::from(AMBIGUOUS),
        ),
    };

    if cli.json {
        output::print_json(&rendered)?;
    } else {
        match rendered {
            ResolveOutput::Found { port } => println!("{}", port),
            ResolveOutput::NotFound => eprintln!("No live port for {}", query),
            ResolveOutput::Ambiguous { candidates } => {
                eprintln!("{} matches several ports; pass --tag to pick one", query);
                for name in candidates {
                    println!("{}", name);
                }
            }
        }
    }
    Ok(code)
}

async fn cmd_ports(cli: &Cli, service: &SnapshotService) -> anyhow::Result<ExitCode> {
    let ports = service.list_ports().await?;
    if cli.json {
        output::print_json(&ports)?;
    } else if ports.is_empty() {
        println!("No serial ports found");
    } else {
        for port in &ports {
            println!("{}", output::port_line(port));
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_connections(
    cli: &Cli,
    service: &SnapshotService,
    target: &TargetArgs,
) -> anyhow::Result<ExitCode> {
    let connections = service
        .connections(target.vendor_id, target.product_id, target.serial.as_deref())
        .await?;

    if cli.json {
        output::print_json(&connections)?;
    } else {
        for connection in &connections {
            println!("{}", output::connection_block(connection));
        }
    }
    Ok(if connections.is_empty() {
        ExitCode::from(NOT_FOUND)
    } else {
        ExitCode::SUCCESS
    })
}

async fn cmd_is_connected(
    cli: &Cli,
    service: &SnapshotService,
    target: &TargetArgs,
) -> anyhow::Result<ExitCode> {
    let connected = service
        .is_connected(target.vendor_id, target.product_id, target.serial.as_deref())
        .await?;

    if cli.json {
        output::print_json(&serde_json::json!({ "connected": connected }))?;
    } else {
        println!("{}", if connected { "connected" } else { "not connected" });
    }
    Ok(if connected {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(NOT_FOUND)
    })
}

async fn cmd_send(
    cli: &Cli,
    service: &SnapshotService,
    args: &SendArgs,
) -> anyhow::Result<ExitCode> {
    let payload = args.payload_bytes().map_err(anyhow::Error::msg)?;
    let reply = service
        .send_command(&args.resolve.query(), &payload, &args.exchange_options())
        .await?;

    let response = if args.hex {
        output::hex_bytes(&reply.response)
    } else {
        reply.response_text()
    };

    if cli.json {
        output::print_json(&SendOutput {
            port: &reply.port,
            bytes_written: reply.bytes_written,
            response,
        })?;
    } else {
        eprintln!("{} byte(s) written to {}", reply.bytes_written, reply.port);
        if !response.is_empty() {
            println!("{}", response.trim_end_matches(['\r', '\n']));
        }
    }
    Ok(ExitCode::SUCCESS)
}

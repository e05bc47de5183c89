//! Command-line utility for managing a running courier instance
//!
//! This tool drives the control socket:
//! - Pinging and querying status
//! - Suspending and resuming dispatch, per tenant or per batch code
//! - Triggering immediate dispatch ticks and report cycles

use clap::{Parser, Subcommand};
use courier_control::{
    ControlClient, DEFAULT_CONTROL_SOCKET, DispatchCommand, ReportCommand, Request,
    RequestCommand, ResponseData, ResponsePayload, SystemCommand,
};

/// Manage the courier mail relay
#[derive(Parser, Debug)]
#[command(name = "courierctl")]
#[command(about = "Manage the courier mail relay", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the control socket
    #[arg(short, long, default_value = DEFAULT_CONTROL_SOCKET)]
    socket: String,

    /// Bearer token, when the server has auth enabled
    #[arg(short, long, env = "COURIER_CONTROL_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Health check
    Ping,
    /// Show queue counters and per-tenant sync state
    Status,
    /// Pause dispatch for a tenant (or everything with no tenant)
    Suspend {
        /// Tenant to pause; omitted pauses the whole loop
        #[arg(long)]
        tenant: Option<String>,
        /// Only pause this batch code
        #[arg(long)]
        batch_code: Option<String>,
    },
    /// Resume dispatch for a tenant (or everything with no tenant)
    Activate {
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long)]
        batch_code: Option<String>,
    },
    /// Run a dispatch tick immediately
    RunNow,
    /// Run a report sync cycle immediately
    SyncNow {
        /// Focus on one tenant and reset its do-not-disturb window
        #[arg(long)]
        tenant: Option<String>,
    },
}

fn command_for(cli_command: Commands) -> RequestCommand {
    match cli_command {
        Commands::Ping => RequestCommand::System(SystemCommand::Ping),
        Commands::Status => RequestCommand::System(SystemCommand::Status),
        Commands::Suspend { tenant, batch_code } => {
            RequestCommand::Dispatch(DispatchCommand::Suspend {
                tenant_id: tenant,
                batch_code,
            })
        }
        Commands::Activate { tenant, batch_code } => {
            RequestCommand::Dispatch(DispatchCommand::Activate {
                tenant_id: tenant,
                batch_code,
            })
        }
        Commands::RunNow => RequestCommand::Dispatch(DispatchCommand::RunNow),
        Commands::SyncNow { tenant } => {
            RequestCommand::Report(ReportCommand::RunNow { tenant_id: tenant })
        }
    }
}

fn print_response(payload: ResponsePayload) {
    match payload {
        ResponsePayload::Ok => println!("ok"),
        ResponsePayload::Error(message) => eprintln!("error: {message}"),
        ResponsePayload::Data(data) => match *data {
            ResponseData::Message(message) => println!("{message}"),
            ResponseData::Status(status) => {
                println!("courier {} (up {}s)", status.version, status.uptime_secs);
                println!(
                    "dispatch: {}",
                    if status.dispatch_active {
                        "active"
                    } else {
                        "suspended"
                    }
                );
                println!(
                    "queue: {} pending, {} deferred, {} processed",
                    status.queue.pending, status.queue.deferred, status.queue.processed
                );
                if !status.suspended.is_empty() {
                    println!("suspended tenants:");
                    for (tenant, batches) in status.suspended {
                        println!("  {tenant}: {}", batches.join(", "));
                    }
                }
                println!(
                    "tenants (sync interval {}s):",
                    status.sync_interval_seconds
                );
                for tenant in status.tenants {
                    println!(
                        "  {} ({}) active={} last_sync={} dnd={} due={}",
                        tenant.id,
                        tenant.name,
                        tenant.active,
                        tenant
                            .last_sync_ts
                            .map_or_else(|| "never".to_string(), |ts| ts.to_string()),
                        tenant.in_dnd,
                        tenant.next_sync_due,
                    );
                }
            }
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let client = ControlClient::new(cli.socket).with_token(cli.token.clone());
    let request = Request::new(command_for(cli.command));

    let response = client.send_request(request).await?;
    print_response(response.payload);

    Ok(())
}

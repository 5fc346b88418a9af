//! ShiftPass domain server
//!
//! Serves the pairing and attendance API for one company, and offers the
//! administrative commands that provision employees, registers and
//! terminals.

use clap::{Parser, Subcommand};
use shiftpass_core::registration::{EmployeeDraft, PairingLink};
use shiftpass_server::cleanup::spawn_cleanup_task;
use shiftpass_server::registration::{issue_repair_token, issue_token};
use shiftpass_server::storage::admin;
use shiftpass_server::{build_router, AppState, ServerConfig, Storage};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "shiftpass-server", about = "ShiftPass domain server")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "shiftpass-server.toml")]
    config: PathBuf,

    /// Listen address override
    #[arg(short, long)]
    listen: Option<String>,

    /// Database path override
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Issue a registration token and print its pairing link
    IssueToken {
        /// Re-pair an existing employee on a new device
        #[arg(long, conflicts_with_all = ["first_name", "last_name", "email"])]
        employee: Option<Uuid>,
        #[arg(long, required_unless_present = "employee")]
        first_name: Option<String>,
        #[arg(long, required_unless_present = "employee")]
        last_name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    AddRetail {
        name: String,
    },
    AddRegister {
        retail_id: i64,
        name: String,
        #[arg(long, allow_hyphen_values = true)]
        latitude: f64,
        #[arg(long, allow_hyphen_values = true)]
        longitude: f64,
    },
    /// Allow an employee to record attendance at a register
    AssignRegister {
        employee: Uuid,
        register_id: i64,
    },
    AddLocalDevice {
        register_id: i64,
        label: String,
    },
    /// Delete a terminal; events already attributed to it keep the id
    RemoveLocalDevice {
        local_device_id: i64,
    },
    ListLocalDevices {
        register_id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut cfg = if cli.config.exists() {
        ServerConfig::load(&cli.config)?
    } else {
        tracing::info!("No config file found, using defaults");
        ServerConfig::default()
    };

    if let Some(listen) = cli.listen {
        cfg.listen_addr = listen;
    }
    if let Some(database) = cli.database {
        cfg.storage_path = database;
    }

    let storage = Storage::open(&cfg.storage_path)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(storage, cfg).await,
        command => run_admin(&storage, &cfg, command),
    }
}

async fn serve(storage: Storage, cfg: ServerConfig) -> anyhow::Result<()> {
    tracing::info!(
        "Starting ShiftPass server for {} on {}",
        cfg.company_name,
        cfg.listen_addr
    );

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    let state = AppState::new(storage, cfg);
    spawn_cleanup_task(state.clone());

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

fn run_admin(storage: &Storage, cfg: &ServerConfig, command: Command) -> anyhow::Result<()> {
    let conn = storage.conn()?;
    let now = chrono::Utc::now().timestamp();

    match command {
        Command::Serve => anyhow::bail!("serve is not an administrative command"),
        Command::IssueToken {
            employee,
            first_name,
            last_name,
            email,
        } => {
            let token = match employee {
                Some(employee_id) => {
                    issue_repair_token(&conn, &employee_id, cfg.registration_ttl_secs, now)?
                }
                None => {
                    let draft = EmployeeDraft {
                        employee_id: None,
                        first_name: first_name.unwrap_or_default(),
                        last_name: last_name.unwrap_or_default(),
                        email,
                    };
                    issue_token(&conn, &draft, cfg.registration_ttl_secs, now)?
                }
            };
            let link = PairingLink::new(&cfg.public_url, &token.token_id)?;
            println!("{}", link.to_uri());
            println!(
                "Expires at {}",
                chrono::DateTime::from_timestamp(token.expires_at, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| token.expires_at.to_string())
            );
        }
        Command::AddRetail { name } => {
            let retail = admin::add_retail(&conn, &name)?;
            println!("Retail {} created: {}", retail.retail_id, retail.name);
        }
        Command::AddRegister {
            retail_id,
            name,
            latitude,
            longitude,
        } => {
            let register = admin::add_register(&conn, retail_id, &name, latitude, longitude)?;
            println!("Register {} created: {}", register.register_id, register.name);
        }
        Command::AssignRegister {
            employee,
            register_id,
        } => {
            admin::assign_register(&conn, &employee, register_id)?;
            println!("Register {} assigned to {}", register_id, employee);
        }
        Command::AddLocalDevice { register_id, label } => {
            let device = admin::add_local_device(&conn, register_id, &label, now)?;
            println!("Local device {} created: {}", device.id, device.label);
        }
        Command::RemoveLocalDevice { local_device_id } => {
            if admin::remove_local_device(&conn, local_device_id)? {
                println!("Local device {} removed", local_device_id);
            } else {
                anyhow::bail!("local device {} not found", local_device_id);
            }
        }
        Command::ListLocalDevices { register_id } => {
            for device in admin::list_local_devices(&conn, register_id)? {
                let seen = device
                    .last_seen_at
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!("{}\t{}\tlast seen {}", device.id, device.label, seen);
            }
        }
    }

    Ok(())
}

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use shiftpass_core::attendance::{AttendanceKind, AttendanceOutcome, HistoryQuery};
use shiftpass_core::platform::get_default_config_path;
use shiftpass_core::{
    AttendancePayload, ClientConfig, Device, Geolocation, LocalDevice, PairingLink, ShiftpassError,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// ShiftPass - attendance from a paired device
#[derive(Parser)]
#[command(name = "shiftpass")]
#[command(about = "Record attendance at every employer this device is paired with", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pair this device using a link from your employer
    Pair {
        /// shiftpass://pair?... or https://<domain>/pair/<token>
        link: String,

        /// Phone number to register with
        #[arg(long)]
        phone: Option<String>,

        /// Email to register with, instead of the one on file
        #[arg(long)]
        email: Option<String>,
    },

    /// List paired domains
    Domains,

    /// Start a shift
    CheckIn(Action),
    /// End a shift
    CheckOut(Action),
    Break(Action),
    Pause(Action),
    /// Break that needs a reason
    SpecificBreak {
        #[command(flatten)]
        action: Action,

        /// Why the break is taken
        #[arg(long)]
        reason: String,
    },

    /// Pick the terminal for an event recorded without one
    ConfirmDevice {
        #[arg(long)]
        domain: String,
        #[arg(long)]
        event: i64,
        #[arg(long)]
        local_device: i64,
    },

    /// Registers near you across every paired domain
    Workplaces {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
    },

    /// Your profile on every paired domain
    Companies,

    /// Attendance history on one domain
    History {
        #[arg(long)]
        domain: String,
        #[arg(long)]
        retail: Option<i64>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        skip: Option<u32>,
    },

    /// Revoke this device on a domain and forget it
    Unpair {
        #[arg(long)]
        domain: String,
        #[arg(long)]
        reason: Option<String>,
        /// Forget the identity even if the domain cannot be reached
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct Action {
    #[arg(long)]
    domain: String,
    #[arg(long)]
    register: i64,
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,
    #[arg(long, allow_hyphen_values = true)]
    lon: f64,
    /// Terminal in use, if known
    #[arg(long)]
    local_device: Option<i64>,
}

impl Action {
    fn payload(&self, kind: AttendanceKind) -> AttendancePayload {
        let payload = AttendancePayload::new(kind, self.register, Geolocation::new(self.lat, self.lon));
        match self.local_device {
            Some(id) => payload.with_local_device(id),
            None => payload,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(get_default_config_path);
    let config = ClientConfig::load(&config_path)?;

    if let Err(e) = run(&config, cli.command).await {
        match e.downcast_ref::<ShiftpassError>() {
            Some(ShiftpassError::AmbiguousLocalDevice(devices)) => {
                eprintln!("Error: that terminal does not belong to the register.");
                print_candidates(devices);
            }
            Some(error) => eprintln!("Error: {}", error.user_message()),
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(config: &ClientConfig, command: Commands) -> Result<()> {
    let mut device = Device::open(config)?;

    match command {
        Commands::Pair { link, phone, email } => {
            let link = PairingLink::parse(&link)?;
            let info = device.inspect(&link).await?;
            println!(
                "Pairing with {} as {}",
                info.company_name,
                info.employee.display_name()
            );

            let mut form = info.employee.to_form();
            if phone.is_some() {
                form.phone = phone;
            }
            if email.is_some() {
                form.email = email;
            }

            let domain = device.pair(&link, Some(form)).await?;
            info!("Paired {} on {}", config.device_name, domain.url);
            println!("Paired with {} ({})", domain.display_name, domain.url);
        }
        Commands::Domains => {
            let domains = device.directory().list_domains();
            if domains.is_empty() {
                println!("No paired domains.");
            }
            for domain in domains {
                println!(
                    "{}\t{}\temployee {}\tpaired {}",
                    domain.url,
                    domain.display_name,
                    domain.paired_employee_id,
                    format_time(domain.paired_at)
                );
            }
        }
        Commands::CheckIn(action) => record(&device, &action, AttendanceKind::CheckIn).await?,
        Commands::CheckOut(action) => record(&device, &action, AttendanceKind::CheckOut).await?,
        Commands::Break(action) => record(&device, &action, AttendanceKind::Break).await?,
        Commands::Pause(action) => record(&device, &action, AttendanceKind::Pause).await?,
        Commands::SpecificBreak { action, reason } => {
            let payload = action.payload(AttendanceKind::SpecificBreak).with_reason(reason);
            let outcome = device.record(&action.domain, &payload).await?;
            report(&action.domain, &outcome);
        }
        Commands::ConfirmDevice {
            domain,
            event,
            local_device,
        } => {
            let receipt = device
                .confirm_local_device(&domain, event, local_device)
                .await?;
            println!(
                "Event {} recorded at terminal {}",
                receipt.event_id, local_device
            );
        }
        Commands::Workplaces { lat, lon } => {
            let workplaces = device.today_workplaces(Geolocation::new(lat, lon)).await?;
            for tagged in &workplaces.items {
                let place = &tagged.item;
                println!(
                    "{}\t{} / {}\tregister {}\t{:.0} m{}",
                    tagged.display_name,
                    place.retail_name,
                    place.register_name,
                    place.register_id,
                    place.distance_m,
                    if place.within_range { "" } else { " (out of range)" }
                );
            }
            for failure in &workplaces.failures {
                eprintln!("{}: {}", failure.domain, failure.error.user_message());
            }
        }
        Commands::Companies => {
            let companies = device.my_companies().await;
            for tagged in &companies.items {
                println!(
                    "{}\t{}\t{}",
                    tagged.item.company_name, tagged.item.display_name, tagged.domain
                );
            }
            for failure in &companies.failures {
                eprintln!("{}: {}", failure.domain, failure.error.user_message());
            }
        }
        Commands::History {
            domain,
            retail,
            limit,
            skip,
        } => {
            let events = device
                .history(&domain, retail, HistoryQuery { limit, skip })
                .await?;
            if events.is_empty() {
                println!("No attendance recorded.");
            }
            for event in events {
                let terminal = event
                    .local_device_id
                    .map(|id| format!("terminal {}", id))
                    .unwrap_or_else(|| "terminal unknown".to_string());
                println!(
                    "{}\t{}\t{}\tregister {}\t{}",
                    event.id,
                    format_time(event.timestamp),
                    event.kind.as_str(),
                    event.register_id,
                    terminal
                );
            }
        }
        Commands::Unpair {
            domain,
            reason,
            force,
        } => {
            device.unpair(&domain, reason, force).await?;
            println!("Unpaired from {}", domain);
        }
    }

    Ok(())
}

async fn record(device: &Device, action: &Action, kind: AttendanceKind) -> Result<()> {
    let outcome = device.record(&action.domain, &action.payload(kind)).await?;
    report(&action.domain, &outcome);
    Ok(())
}

fn report(domain: &str, outcome: &AttendanceOutcome) {
    let receipt = &outcome.receipt;
    println!(
        "{} recorded at {} (event {})",
        receipt.kind.as_str(),
        format_time(receipt.timestamp),
        receipt.event_id
    );

    if outcome.needs_local_device() {
        println!("Which terminal did you use?");
        print_candidates(&outcome.candidates);
        println!(
            "Confirm with: shiftpass confirm-device --domain {} --event {} --local-device <id>",
            domain, receipt.event_id
        );
    }
}

fn print_candidates(devices: &[LocalDevice]) {
    for (i, device) in devices.iter().enumerate() {
        println!("  {}. {} (id {})", i + 1, device.label, device.id);
    }
}

fn format_time(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

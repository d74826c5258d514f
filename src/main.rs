use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use climb_board_link::domain::board::BoardData;
use climb_board_link::domain::frames;
use climb_board_link::domain::models::{ClimbPlacements, DeviceId};
use climb_board_link::domain::sender::{self, ClimbSender};
use climb_board_link::domain::settings::SettingsService;
use climb_board_link::infrastructure::bluetooth::connection::ConnectionConfig;
use climb_board_link::infrastructure::bluetooth::platform::BtleplugBackend;
use climb_board_link::infrastructure::bluetooth::protocol::WireFormat;
use climb_board_link::infrastructure::bluetooth::{ConnectionHandle, ConnectionManager};
use climb_board_link::infrastructure::logging;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Light climbs on a Bluetooth LE climbing board",
    long_about = None
)]
struct Cli {
    /// Settings file, defaults to the user config directory
    #[arg(long, global = true, env = "CLIMB_BOARD_LINK_SETTINGS")]
    settings: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List boards advertising nearby
    Scan {
        /// How long to listen, overrides the configured scan duration
        #[arg(long)]
        duration_ms: Option<u64>,
    },
    /// Light a climb on the board
    Send {
        /// Board data export with placement and role tables
        #[arg(long)]
        board: PathBuf,
        /// Climb in frames form, e.g. p1073r12p1090r13
        #[arg(long, required_unless_present = "resume", conflicts_with = "resume")]
        frames: Option<String>,
        /// Send the climb saved by the last run
        #[arg(long)]
        resume: bool,
        /// Board to connect to, defaults to the last one used
        #[arg(long)]
        device: Option<String>,
        #[arg(long)]
        format: Option<WireFormat>,
    },
    /// Turn every LED off
    Clear {
        #[arg(long)]
        device: Option<String>,
        #[arg(long)]
        format: Option<WireFormat>,
    },
    /// Print the packet for a climb without connecting
    Encode {
        #[arg(long)]
        board: PathBuf,
        #[arg(long)]
        frames: String,
        #[arg(long)]
        format: Option<WireFormat>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => SettingsService::with_path(path.clone()),
        None => SettingsService::new()?,
    };
    let _guard = logging::init_logger(&settings.get().log_settings)?;
    if let Some(e) = settings.load_error() {
        warn!(
            "Ignoring unreadable settings {}: {}",
            settings.path().display(),
            e
        );
    }
    info!("Using settings from {}", settings.path().display());

    match cli.command {
        Commands::Scan { duration_ms } => {
            let duration =
                Duration::from_millis(duration_ms.unwrap_or(settings.get().scan_duration_ms));
            scan(&settings, duration).await
        }
        Commands::Send {
            board,
            frames,
            resume,
            device,
            format,
        } => {
            let climb = match frames {
                Some(frames) => frames::decode(&frames),
                None => settings.get().climb_in_progress.clone(),
            };
            if resume {
                info!("Resuming saved climb with {} holds", climb.len());
            }
            settings.set_climb_in_progress(climb.clone())?;

            let board = BoardData::load_from_file(&board)?;
            let format = format.unwrap_or(settings.get().wire_format);
            send(&mut settings, board, &climb, device, format).await
        }
        Commands::Clear { device, format } => {
            let format = format.unwrap_or(settings.get().wire_format);
            send(
                &mut settings,
                BoardData::default(),
                &ClimbPlacements::new(),
                device,
                format,
            )
            .await
        }
        Commands::Encode {
            board,
            frames,
            format,
        } => {
            let format = format.unwrap_or(settings.get().wire_format);
            encode(&board, &frames, format)
        }
    }
}

async fn start_manager(settings: &SettingsService) -> Result<ConnectionHandle> {
    let config = ConnectionConfig::from_settings(settings.get())?;
    let backend = Arc::new(BtleplugBackend::new().await?);
    let handle = ConnectionManager::start(
        backend,
        config,
        settings.get().last_connected_device.clone(),
    )
    .await?;

    // Some platforms report adapter power shortly after startup
    let scan_duration = Duration::from_millis(settings.get().scan_duration_ms);
    if handle
        .wait_for_state(scan_duration, |state| state.is_powered_on())
        .await
        .is_none()
    {
        bail!("Bluetooth adapter is powered off");
    }
    Ok(handle)
}

async fn scan(settings: &SettingsService, duration: Duration) -> Result<()> {
    let handle = start_manager(settings).await?;
    let devices = handle
        .scan_for(duration, |_| false)
        .await
        .context("Failed to scan for boards")?;
    handle.shutdown().await;

    if devices.is_empty() {
        println!("No boards found");
    }
    for device in devices {
        let rssi = device
            .rssi
            .map(|rssi| format!("{} dBm", rssi))
            .unwrap_or_else(|| "-".to_string());
        println!("{}\t{}\t{}", device.id, device.display_name(), rssi);
    }
    Ok(())
}

/// Connect to the requested, remembered or first discovered board
async fn connect(
    settings: &mut SettingsService,
    handle: &ConnectionHandle,
    requested: Option<String>,
) -> Result<()> {
    let target = requested
        .map(DeviceId::new)
        .or_else(|| settings.get().last_connected_device.clone());
    let window = Duration::from_millis(settings.get().scan_duration_ms);

    match handle.connect_to_board(target, window).await {
        Ok(device) => settings.set_last_connected_device(Some(device)),
        Err(e) => {
            settings.set_last_connected_device(None)?;
            Err(e).context("Failed to connect to board")
        }
    }
}

async fn send(
    settings: &mut SettingsService,
    board: BoardData,
    climb: &ClimbPlacements,
    device: Option<String>,
    format: WireFormat,
) -> Result<()> {
    let handle = start_manager(settings).await?;
    let connected = connect(settings, &handle, device).await;
    if let Err(e) = connected {
        handle.shutdown().await;
        return Err(e);
    }

    let mut sender = ClimbSender::new(handle.clone(), format);
    sender.set_board_data(Arc::new(board));
    let sent = sender.send(climb).await;
    handle.shutdown().await;

    if !sent {
        bail!("Failed to send climb to board");
    }
    Ok(())
}

fn encode(board: &Path, frames: &str, format: WireFormat) -> Result<()> {
    let board = BoardData::load_from_file(board)?;
    let climb = frames::decode(frames);
    let (packet, issues) = sender::build_packet(&board, &climb, format)?;

    for issue in &issues {
        warn!("Skipped: {:?}", issue);
    }
    println!("{}", packet.to_hex());
    Ok(())
}

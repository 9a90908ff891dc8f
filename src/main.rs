use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::Parser;
use ratatui::crossterm::event::Event;
use tokio::sync::mpsc::unbounded_channel;
use tracing::info;
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod controller;
mod domain;
mod inputter;
mod inspector;
mod model;
mod service;
mod table;
mod ui;

use controller::Controller;
use domain::{VipConfig, VipError};
use inspector::InspectorEvent;
use model::{Model, Status};
use table::VariantTable;
use ui::InspectorUI;

/// Inspect clustered variant calls one record at a time.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Call table to inspect (csv, parquet or arrow)
    path: String,

    /// Columns whose values group calls into one record
    #[arg(long, value_delimiter = ',', default_value = "chr1,bp1,chr2,bp2")]
    cluster_by: Vec<String>,

    /// Record (1-based) to open first
    #[arg(long)]
    index: Option<usize>,

    /// CSV file decisions are saved to and restored from
    #[arg(long)]
    progress: Option<String>,

    /// Number of records ahead of the cursor to queue snapshots for
    #[arg(long, default_value_t = 10)]
    snapshot_window: usize,

    /// Terminal event poll interval in ms
    #[arg(long, default_value_t = 100)]
    poll_ms: u64,

    #[arg(long, default_value_t = 32)]
    max_column_width: usize,

    /// Write logs to this file, filtered by RUST_LOG
    #[arg(long)]
    log: Option<String>,
}

enum Step {
    Terminal(Event),
    Inspector(InspectorEvent),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
    }
}

fn expand(path: &str) -> Result<PathBuf, VipError> {
    Ok(PathBuf::from(shellexpand::full(path)?.into_owned()))
}

fn init_tracing(log: Option<&str>) -> Result<(), VipError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = match log {
        Some(path) => {
            let file = File::create(expand(path)?)?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(ErrorLayer::default())
        .try_init()?;
    Ok(())
}

fn config_from(cli: &Cli) -> Result<VipConfig, VipError> {
    let mut cfg = VipConfig::default()
        .with_event_poll_time(cli.poll_ms)
        .with_max_column_width(cli.max_column_width)
        .with_cluster_columns(cli.cluster_by.clone())
        .with_snapshot_window(cli.snapshot_window);
    if let Some(progress) = &cli.progress {
        cfg = cfg.with_progress_path(expand(progress)?);
    }
    if let Some(index) = cli.index {
        // The command line counts records from 1.
        cfg = cfg.with_pending_index(index.saturating_sub(1));
    }
    Ok(cfg)
}

fn run(cli: Cli) -> Result<(), VipError> {
    init_tracing(cli.log.as_deref())?;
    let cfg = config_from(&cli)?;
    info!("Starting vip with {:?}", cfg);

    let table = Arc::new(VariantTable::load(expand(&cli.path)?, &cfg)?);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(inspect(cfg, table))
}

async fn inspect(cfg: VipConfig, table: Arc<VariantTable>) -> Result<(), VipError> {
    let mut terminal = ratatui::init();
    let result = event_loop(&cfg, table, &mut terminal).await;
    ratatui::restore();
    result
}

async fn event_loop(
    cfg: &VipConfig,
    table: Arc<VariantTable>,
    terminal: &mut ratatui::DefaultTerminal,
) -> Result<(), VipError> {
    let size = terminal.size()?;
    let mut model = Model::init(cfg, table, size.width as usize, size.height as usize);
    let mut ui = InspectorUI::new();
    let controller = Controller::new(cfg);

    let (terminal_tx, mut terminal_rx) = unbounded_channel();
    let _reader = controller.spawn_reader(terminal_tx);
    model.start();

    while model.status != Status::QUITTING {
        terminal.draw(|f| ui.draw(model.get_uidata(), f))?;

        let step = tokio::select! {
            Some(event) = terminal_rx.recv() => Step::Terminal(event),
            Some(event) = model.next_inspector_event() => Step::Inspector(event),
            else => break,
        };
        match step {
            Step::Terminal(event) => {
                if let Some(message) = controller.handle_event(event, model.raw_keyevents()) {
                    model.update(message)?;
                }
            }
            Step::Inspector(event) => model.apply_inspector_event(event),
        }
    }

    model.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_subscriber_install_is_an_error() {
        let _ = init_tracing(None);
        assert!(matches!(init_tracing(None), Err(VipError::Tracing(_))));
    }

    #[test]
    fn command_line_index_is_one_based() {
        let cli = Cli::parse_from(["vip", "calls.csv", "--index", "3", "--cluster-by", "chr1,bp1"]);
        let cfg = config_from(&cli).unwrap();
        assert_eq!(cfg.pending_index, Some(2));
        assert_eq!(cfg.cluster_columns, vec!["chr1", "bp1"]);
    }
}

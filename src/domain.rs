use std::path::PathBuf;

use derive_setters::Setters;
use polars::error::PolarsError;
use ratatui::crossterm::event::KeyEvent;
use thiserror::Error;

use crate::service::Decision;

pub const DEFAULT_CLUSTER_COLUMNS: [&str; 4] = ["chr1", "bp1", "chr2", "bp2"];

pub const HELP_TEXT: &str = "\
 Navigation
   → l n      next record
   ← h p      previous record
   g / G      first / last record
   :          go to record (1-based)
   ↑ ↓ PgUp PgDn   scroll fields
   J / K      scroll related calls

 Decisions
   a          approved
   x          declined
   m          maybe
   d          custom decision

 Other
   y          copy record to clipboard
   s          save progress
   ?          this help
   Esc        close popup / cancel input
   q          quit";

#[derive(Debug, Error)]
pub enum VipError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    PolarsError(#[from] PolarsError),
    #[error("loading failed: {0}")]
    LoadingFailed(String),
    #[error("file not found")]
    FileNotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("unknown file type")]
    UnknownFileType,
    #[error("column '{0}' is missing in the call table")]
    MissingColumn(String),
    #[error("no progress file configured")]
    NoProgressFile,
    #[error("invalid path: {0}")]
    InvalidPath(#[from] shellexpand::LookupError<std::env::VarError>),
    #[error("installing the log subscriber failed: {0}")]
    Tracing(#[from] tracing_subscriber::util::TryInitError),
}

#[derive(Debug, Clone, Setters)]
#[setters(prefix = "with_")]
pub struct VipConfig {
    /// How long the input thread blocks waiting for a terminal event, in ms.
    pub event_poll_time: u64,
    /// Field names in the record view are cut to this width.
    pub max_column_width: usize,
    pub cluster_columns: Vec<String>,
    /// Number of records, starting at the cursor, whose snapshots get queued.
    pub snapshot_window: usize,
    #[setters(strip_option)]
    pub progress_path: Option<PathBuf>,
    #[setters(strip_option)]
    pub pending_index: Option<usize>,
}

impl Default for VipConfig {
    fn default() -> Self {
        Self {
            event_poll_time: 100,
            max_column_width: 32,
            cluster_columns: DEFAULT_CLUSTER_COLUMNS.iter().map(|c| c.to_string()).collect(),
            snapshot_window: 10,
            progress_path: None,
            pending_index: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CMDMode {
    GotoIndex,
    Decision,
}

impl CMDMode {
    pub fn prompt(&self) -> &'static str {
        match self {
            CMDMode::GotoIndex => "Go to: ",
            CMDMode::Decision => "Decision: ",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Quit,
    Exit,
    Help,
    NextRecord,
    PreviousRecord,
    FirstRecord,
    LastRecord,
    MoveUp,
    MoveDown,
    MovePageUp,
    MovePageDown,
    RelatedUp,
    RelatedDown,
    Decide(Decision),
    EnterDecision,
    GotoIndex,
    CopyRecord,
    Save,
    Resize(usize, usize),
    RawKey(KeyEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_override_defaults() {
        let cfg = VipConfig::default()
            .with_snapshot_window(3)
            .with_progress_path(PathBuf::from("progress.csv"))
            .with_pending_index(7);

        assert_eq!(cfg.snapshot_window, 3);
        assert_eq!(cfg.progress_path, Some(PathBuf::from("progress.csv")));
        assert_eq!(cfg.pending_index, Some(7));
        assert_eq!(cfg.cluster_columns, vec!["chr1", "bp1", "chr2", "bp2"]);
    }
}

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use polars::prelude::*;
use rayon::prelude::*;
use tracing::{debug, info, instrument, trace};

use crate::domain::{VipConfig, VipError};
use crate::service::{Decision, Record, ServiceError, TableService};

pub const DECISION_COLUMN: &str = "decision";
pub const CALLS_COLUMN: &str = "calls";

const PROGRESS_KEY_COLUMN: &str = "key";

#[derive(Debug)]
enum FileType {
    CSV,
    PARQUET,
    ARROW,
}

#[derive(Debug)]
struct FileInfo {
    path: PathBuf,
    file_size: u64,
    file_type: FileType,
}

struct CallColumn {
    name: String,
    data: Vec<Option<String>>,
}

#[derive(Default)]
struct SnapshotQueue {
    queued: VecDeque<String>,
    seen: HashSet<String>,
}

/// In-process variant table.
///
/// Calls sharing the same values in the cluster columns form one clustered
/// record. Clustered records are addressed by index in order of their first
/// call, the calls of a cluster are its related records.
pub struct VariantTable {
    path: PathBuf,
    columns: Vec<CallColumn>,
    clusters: Vec<Vec<usize>>, // Clustered index -> call rows
    keys: Vec<String>,
    decisions: Mutex<Vec<Option<String>>>,
    snapshots: Mutex<SnapshotQueue>,
    snapshot_window: usize,
    progress_path: Option<PathBuf>,
}

impl VariantTable {
    /// Loads and clusters the call table at `path`.
    ///
    /// Polars runs its own async runtime while collecting, so this has to be
    /// called outside of any tokio runtime. Inside one it returns
    /// [`VipError::LoadingFailed`] instead of panicking.
    #[instrument(skip(path, config), fields(path = %path.display()))]
    pub fn load(path: PathBuf, config: &VipConfig) -> Result<Self, VipError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(VipError::LoadingFailed(
                "call tables must be loaded outside of the async runtime".into(),
            ));
        }
        let file_info = Self::get_file_info(path)?;
        debug!(
            "Loading {:?} file of {} bytes",
            file_info.file_type, file_info.file_size
        );
        let frame = match file_info.file_type {
            FileType::CSV => Self::load_csv(&file_info.path)?,
            FileType::PARQUET => Self::load_parquet(&file_info.path)?,
            FileType::ARROW => Self::load_arrow(&file_info.path)?,
        };

        // Each column is converted to strings on its own rayon worker.
        let start_time = Instant::now();
        let df = frame.collect()?;
        let columns = df
            .get_column_names()
            .par_iter()
            .map(|name| Self::load_column(&df, name))
            .collect::<Result<Vec<CallColumn>, PolarsError>>()?;
        info!(
            "Loading {} calls took {}ms ...",
            df.height(),
            start_time.elapsed().as_millis()
        );

        Self::from_columns(file_info.path, columns, config)
    }

    fn from_columns(
        path: PathBuf,
        columns: Vec<CallColumn>,
        config: &VipConfig,
    ) -> Result<Self, VipError> {
        let key_columns = config
            .cluster_columns
            .iter()
            .map(|name| {
                columns
                    .iter()
                    .position(|c| &c.name == name)
                    .ok_or_else(|| VipError::MissingColumn(name.clone()))
            })
            .collect::<Result<Vec<usize>, VipError>>()?;

        let nrows = columns.first().map(|c| c.data.len()).unwrap_or(0);
        let mut clusters: Vec<Vec<usize>> = Vec::new();
        let mut keys = Vec::new();
        let mut lookup: HashMap<String, usize> = HashMap::new();
        for row in 0..nrows {
            let key = key_columns
                .iter()
                .map(|&c| columns[c].data[row].as_deref().unwrap_or(""))
                .collect::<Vec<&str>>()
                .join(":");
            match lookup.get(&key) {
                Some(&cidx) => clusters[cidx].push(row),
                None => {
                    lookup.insert(key.clone(), clusters.len());
                    clusters.push(vec![row]);
                    keys.push(key);
                }
            }
        }
        info!("Clustered {nrows} calls into {} records", clusters.len());

        let mut table = Self {
            path,
            columns,
            decisions: Mutex::new(vec![None; clusters.len()]),
            clusters,
            keys,
            snapshots: Mutex::new(SnapshotQueue::default()),
            snapshot_window: config.snapshot_window,
            progress_path: config.progress_path.clone(),
        };
        if let Some(progress) = config.progress_path.as_deref()
            && progress.exists()
        {
            table.restore_progress(progress)?;
        }
        Ok(table)
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("???")
            .to_string()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    /// Number of clustered records that carry a decision.
    pub fn decided(&self) -> usize {
        self.decisions().iter().filter(|d| d.is_some()).count()
    }

    /// Keys queued for snapshotting, oldest first.
    pub fn scheduled_snapshots(&self) -> Vec<String> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queued
            .iter()
            .cloned()
            .collect()
    }

    /// Writes all decisions to the progress file. Returns the number written.
    pub fn save_progress(&self) -> Result<usize, VipError> {
        let path = self.progress_path.as_ref().ok_or(VipError::NoProgressFile)?;
        let (keys, labels): (Vec<String>, Vec<String>) = self
            .keys
            .iter()
            .zip(self.decisions().iter())
            .filter_map(|(k, d)| d.as_ref().map(|d| (k.clone(), d.clone())))
            .unzip();

        let mut df = df!(PROGRESS_KEY_COLUMN => keys, DECISION_COLUMN => labels)?;
        let mut file = File::create(path)?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut df)?;
        info!("Saved {} decisions to {}", df.height(), path.display());
        Ok(df.height())
    }

    fn restore_progress(&mut self, path: &Path) -> Result<(), VipError> {
        let df = Self::load_csv(path)?.collect()?;
        let keys = df.column(PROGRESS_KEY_COLUMN)?.cast(&DataType::String)?;
        let labels = df.column(DECISION_COLUMN)?.cast(&DataType::String)?;

        let lookup: HashMap<&str, usize> = self
            .keys
            .iter()
            .enumerate()
            .map(|(idx, k)| (k.as_str(), idx))
            .collect();
        let decisions = self
            .decisions
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);

        let mut restored = 0;
        for (key, label) in keys.str()?.into_iter().zip(labels.str()?.into_iter()) {
            if let (Some(key), Some(label)) = (key, label)
                && let Some(&idx) = lookup.get(key)
            {
                decisions[idx] = Some(label.to_string());
                restored += 1;
            } else {
                trace!("Skipping progress entry {key:?}");
            }
        }
        info!("Restored {restored} decisions from {}", path.display());
        Ok(())
    }

    fn decisions(&self) -> MutexGuard<'_, Vec<Option<String>>> {
        self.decisions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cluster(&self, index: usize) -> Result<&[usize], ServiceError> {
        self.clusters
            .get(index)
            .map(|rows| rows.as_slice())
            .ok_or(ServiceError::IndexOutOfRange {
                index,
                size: self.clusters.len(),
            })
    }

    fn call(&self, row: usize) -> Record {
        self.columns
            .iter()
            .fold(Record::new(), |record, c| {
                record.with(c.name.as_str(), c.data[row].clone())
            })
    }

    fn load_column(df: &DataFrame, col_name: &str) -> Result<CallColumn, PolarsError> {
        let col = df.column(col_name)?.cast(&DataType::String)?;
        let data = col
            .str()?
            .into_iter()
            .map(|value| value.map(|s| s.to_string()))
            .collect();
        Ok(CallColumn {
            name: col_name.to_string(),
            data,
        })
    }

    fn get_file_info(path: PathBuf) -> Result<FileInfo, VipError> {
        let metadata = fs::metadata(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => VipError::FileNotFound,
            ErrorKind::PermissionDenied => VipError::PermissionDenied,
            _ => VipError::IoError(e),
        })?;
        if !metadata.is_file() {
            return Err(VipError::LoadingFailed("Not a file!".into()));
        }

        let file_size = metadata.len();
        let file_type = Self::detect_file_type(&path)?;

        Ok(FileInfo {
            path,
            file_size,
            file_type,
        })
    }

    fn detect_file_type(path: &Path) -> Result<FileType, VipError> {
        match path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_uppercase())
            .as_deref()
        {
            Some("CSV") => Ok(FileType::CSV),
            Some("PARQUET") | Some("PQ") => Ok(FileType::PARQUET),
            Some("ARROW") | Some("IPC") | Some("FEATHER") => Ok(FileType::ARROW),
            _ => Err(VipError::UnknownFileType),
        }
    }

    fn load_csv(path: &Path) -> Result<LazyFrame, PolarsError> {
        LazyCsvReader::new(PlPath::Local(path.into()))
            .with_has_header(true)
            .finish()
    }

    fn load_parquet(path: &Path) -> Result<LazyFrame, PolarsError> {
        LazyFrame::scan_parquet(PlPath::Local(path.into()), ScanArgsParquet::default())
    }

    fn load_arrow(path: &Path) -> Result<LazyFrame, PolarsError> {
        LazyFrame::scan_ipc(
            PlPath::Local(path.into()),
            polars::io::ipc::IpcScanOptions,
            UnifiedScanArgs::default(),
        )
    }
}

#[async_trait]
impl TableService for VariantTable {
    async fn size(&self) -> Result<usize, ServiceError> {
        Ok(self.len())
    }

    async fn related_column_names(&self) -> Result<Vec<String>, ServiceError> {
        Ok(self.columns.iter().map(|c| c.name.clone()).collect())
    }

    async fn table_row(&self, index: usize) -> Result<Record, ServiceError> {
        let rows = self.cluster(index)?;
        let mut record = self.call(rows[0]);
        record.push(CALLS_COLUMN, Some(rows.len().to_string()));
        record.push(DECISION_COLUMN, self.decisions()[index].clone());
        Ok(record)
    }

    async fn related_calls(&self, index: usize) -> Result<Vec<Record>, ServiceError> {
        Ok(self.cluster(index)?.iter().map(|&row| self.call(row)).collect())
    }

    async fn schedule_snapshot(&self, index: usize) -> Result<(), ServiceError> {
        let end = std::cmp::min(index.saturating_add(self.snapshot_window), self.keys.len());
        let mut snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        for key in self.keys.iter().take(end).skip(index) {
            if snapshots.seen.insert(key.clone()) {
                trace!("Queued snapshot {key}");
                snapshots.queued.push_back(key.clone());
            }
        }
        Ok(())
    }

    async fn persist_decision(
        &self,
        index: usize,
        decision: &Decision,
    ) -> Result<(), ServiceError> {
        self.cluster(index)?;
        if decision.as_str().trim().is_empty() {
            return Err(ServiceError::Backend("decision label is empty".into()));
        }
        self.decisions()[index] = Some(decision.to_string());
        debug!("Decision for {} ({index}) is now '{decision}'", self.keys[index]);
        Ok(())
    }
}

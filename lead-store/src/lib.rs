use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mintwatch_core::{CoreError, Intent, LeadLogError, LeadRecord, LeadSink};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};


pub const HEADER: [&str; 7] = ["timestamp", "type", "id", "author", "subreddit", "intent", "text"];

/// Append-only CSV log of detected leads.
///
/// Cloning is cheap; clones share the same write lock so rows from
/// concurrent streams never interleave.
#[derive(Debug, Clone)]
pub struct CsvLeadLog {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl CsvLeadLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file with its header row unless it already has content.
    pub fn initialize(&self) -> Result<(), LeadLogError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let file = self.open_for_append()?;
        if self.is_empty(&file)? {
            self.write_header(file)?;
            info!("Created lead log at {}", self.path.display());
        } else {
            debug!("Lead log {} already exists", self.path.display());
        }
        Ok(())
    }

    /// Blocking append of a single row, writing the header first if needed.
    pub fn append_record(&self, record: &LeadRecord) -> Result<(), LeadLogError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let file = self.open_for_append()?;
        let needs_header = self.is_empty(&file)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(HEADER)?;
        }
        writer.serialize(record)?;
        writer.flush().map_err(|source| LeadLogError::WriteFailed {
            id: record.id.clone(),
            source,
        })?;

        debug!("Logged {} lead {} from r/{}", record.intent, record.id, record.origin);
        Ok(())
    }

    /// Every parseable row in file order. A missing file is an empty log.
    pub fn read_all(&self) -> Result<Vec<LeadRecord>, LeadLogError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(LeadLogError::Open {
                    path: self.path.display().to_string(),
                    source,
                })
            }
        };

        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
        let mut records = Vec::new();
        for (index, row) in reader.deserialize::<LeadRecord>().enumerate() {
            match row {
                Ok(record) => records.push(record),
                // line 1 is the header
                Err(e) => warn!("Skipping malformed lead row {}: {}", index + 2, e),
            }
        }
        Ok(records)
    }

    pub async fn load_summary(&self, recent: usize) -> Result<LeadSummary, LeadLogError> {
        let log = self.clone();
        let records = tokio::task::spawn_blocking(move || log.read_all())
            .await
            .map_err(|e| LeadLogError::TaskFailed {
                reason: e.to_string(),
            })??;
        Ok(LeadSummary::from_records(records, recent))
    }

    fn open_for_append(&self) -> Result<fs::File, LeadLogError> {
        let open_error = |source| LeadLogError::Open {
            path: self.path.display().to_string(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(open_error)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(open_error)
    }

    fn is_empty(&self, file: &fs::File) -> Result<bool, LeadLogError> {
        let metadata = file.metadata().map_err(|source| LeadLogError::Open {
            path: self.path.display().to_string(),
            source,
        })?;
        Ok(metadata.len() == 0)
    }

    fn write_header(&self, mut file: fs::File) -> Result<(), LeadLogError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(HEADER)?;
        let bytes = writer.into_inner().map_err(|e| LeadLogError::TaskFailed {
            reason: e.to_string(),
        })?;
        file.write_all(&bytes).map_err(|source| LeadLogError::Open {
            path: self.path.display().to_string(),
            source,
        })
    }
}

#[async_trait]
impl LeadSink for CsvLeadLog {
    async fn append(&self, record: &LeadRecord) -> Result<(), CoreError> {
        let log = self.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || log.append_record(&record))
            .await
            .map_err(|e| LeadLogError::TaskFailed {
                reason: e.to_string(),
            })??;
        Ok(())
    }
}

/// What the dashboard shows: the tail of the log and per-intent totals.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadSummary {
    pub total: usize,
    /// Oldest first, ending with the newest row.
    pub recent: Vec<LeadRecord>,
    pub intent_counts: BTreeMap<String, usize>,
    pub latest: Option<DateTime<Utc>>,
}

impl LeadSummary {
    pub fn from_records(records: Vec<LeadRecord>, recent: usize) -> Self {
        let mut intent_counts: BTreeMap<String, usize> = BTreeMap::new();
        for record in &records {
            *intent_counts.entry(record.intent.to_string()).or_default() += 1;
        }

        let total = records.len();
        let latest = records.iter().map(|r| r.timestamp).max();
        let recent = records
            .into_iter()
            .skip(total.saturating_sub(recent))
            .collect();

        Self {
            total,
            recent,
            intent_counts,
            latest,
        }
    }

    pub fn count(&self, intent: Intent) -> usize {
        self.intent_counts.get(intent.as_str()).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

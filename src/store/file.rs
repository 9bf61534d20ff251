//! File-backed state store
//!
//! Layout under the data directory:
//!
//! ```text
//! kv.json                 key/value slots (primary session pointer)
//! workers/<name>.json     one mirror row per live worker
//! conversation.jsonl      bounded conversation log, oldest first
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::core::AssistantResult;

use super::store::{ConversationLogEntry, StateStore, WorkerRecord, DEFAULT_MAX_LOG_ENTRIES};

const KV_FILE: &str = "kv.json";
const WORKERS_DIR: &str = "workers";
const LOG_FILE: &str = "conversation.jsonl";

/// JSON-file implementation of `StateStore`
#[derive(Debug)]
pub struct FileStateStore {
    base_dir: PathBuf,
    max_log_entries: usize,
    /// Serializes read-modify-write cycles on the files
    write_lock: Mutex<()>,
}

impl FileStateStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> AssistantResult<Self> {
        let base_dir = dir.into();
        fs::create_dir_all(base_dir.join(WORKERS_DIR))?;
        tracing::info!("[FileStateStore] Using data directory {:?}", base_dir);

        Ok(Self {
            base_dir,
            max_log_entries: DEFAULT_MAX_LOG_ENTRIES,
            write_lock: Mutex::new(()),
        })
    }

    /// Set how many conversation log entries are kept
    pub fn with_max_log_entries(mut self, max: usize) -> Self {
        self.max_log_entries = max.max(1);
        self
    }

    /// Get the base directory
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn kv_path(&self) -> PathBuf {
        self.base_dir.join(KV_FILE)
    }

    fn worker_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(WORKERS_DIR).join(format!("{}.json", name))
    }

    fn log_path(&self) -> PathBuf {
        self.base_dir.join(LOG_FILE)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load_kv(&self) -> AssistantResult<BTreeMap<String, String>> {
        let path = self.kv_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }

        let reader = BufReader::new(File::open(&path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    fn save_kv(&self, kv: &BTreeMap<String, String>) -> AssistantResult<()> {
        // Write to a temp file then rename so a crash never leaves a torn file
        let tmp = self.base_dir.join(format!("{}.tmp", KV_FILE));
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, kv)?;
        writer.flush()?;
        drop(writer);
        fs::rename(&tmp, self.kv_path())?;
        Ok(())
    }

    fn load_log(&self) -> AssistantResult<Vec<ConversationLogEntry>> {
        let path = self.log_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&path)?);
        let mut entries = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!("[FileStateStore] Skipping corrupt log line: {}", e),
            }
        }

        Ok(entries)
    }

    fn save_log(&self, entries: &[ConversationLogEntry]) -> AssistantResult<()> {
        let file = File::create(self.log_path())?;
        let mut writer = BufWriter::new(file);

        for entry in entries {
            let json = serde_json::to_string(entry)?;
            writeln!(writer, "{}", json)?;
        }

        writer.flush()?;
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn get(&self, key: &str) -> AssistantResult<Option<String>> {
        let _guard = self.lock();
        Ok(self.load_kv()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AssistantResult<()> {
        let _guard = self.lock();
        let mut kv = self.load_kv()?;
        kv.insert(key.to_string(), value.to_string());
        self.save_kv(&kv)
    }

    fn remove(&self, key: &str) -> AssistantResult<()> {
        let _guard = self.lock();
        let mut kv = self.load_kv()?;
        if kv.remove(key).is_some() {
            self.save_kv(&kv)?;
        }
        Ok(())
    }

    fn upsert_worker(&self, record: &WorkerRecord) -> AssistantResult<()> {
        let _guard = self.lock();
        let file = File::create(self.worker_path(&record.name))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, record)?;
        writer.flush()?;
        Ok(())
    }

    fn delete_worker(&self, name: &str) -> AssistantResult<()> {
        let _guard = self.lock();
        let path = self.worker_path(name);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn list_workers(&self) -> AssistantResult<Vec<WorkerRecord>> {
        let _guard = self.lock();
        let dir = self.base_dir.join(WORKERS_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let reader = BufReader::new(File::open(&path)?);
            match serde_json::from_reader::<_, WorkerRecord>(reader) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("[FileStateStore] Skipping corrupt worker row {:?}: {}", path, e),
            }
        }

        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    fn append_log(&self, entry: &ConversationLogEntry) -> AssistantResult<()> {
        let _guard = self.lock();
        let mut entries = self.load_log()?;

        if entries.len() < self.max_log_entries {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.log_path())?;
            let json = serde_json::to_string(entry)?;
            writeln!(file, "{}", json)?;
            return Ok(());
        }

        entries.push(entry.clone());
        let overflow = entries.len() - self.max_log_entries;
        entries.drain(..overflow);
        self.save_log(&entries)
    }

    fn recent_log(&self, limit: usize) -> AssistantResult<Vec<ConversationLogEntry>> {
        let _guard = self.lock();
        let entries = self.load_log()?;
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.into_iter().skip(skip).collect())
    }
}

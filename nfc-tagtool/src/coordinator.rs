//! Tag coordinator
//!
//! The single entry point for callers. The coordinator owns one engine per
//! protocol, built on first use, and the current [`TagRecord`]: the result
//! of the last read or load, which writes replay onto a card and saves
//! persist to the dump folders.
//!
//! Every operation answers with an [`Outcome`]; engine errors never escape.
//!
//! # Locking
//!
//! Each engine sits behind its own mutex, so two hardware operations on
//! the same protocol queue up instead of interleaving. The current record
//! has a separate lock that is only taken after an engine lock, never
//! while waiting for one.

use log::{debug, error, info, warn};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::compare::{compare_records, CompareReport};
use crate::config::CoordinatorConfig;
use crate::error::TagError;
use crate::keys::KeyStore;
use crate::mifare::layout::BLOCK_SIZE;
use crate::mifare::{self, CardIdentity, MifareEngine};
use crate::outcome::{Outcome, Status};
use crate::srix::{self, SrixEngine, SrixWriteReport, SRIX_BLOCK_SIZE, SRIX_UID_LEN};
use crate::storage::{self, FsStorage, Storage};
use crate::tag::{Protocol, TagMemory, TagRecord, Uid};
use crate::task::{spawn_operation, Operation, OperationHandle, WaitOutcome, POLL_INTERVAL};
use crate::transport::TransportProvider;

/// Protocol dispatch, current tag state and dump file routing
pub struct TagCoordinator {
    config: CoordinatorConfig,
    storage: Arc<dyn Storage>,
    keys: Arc<KeyStore>,
    provider: Arc<dyn TransportProvider>,
    // `Some(None)` once a transport failed to open: the protocol stays
    // unavailable for the life of the coordinator.
    mifare: OnceCell<Option<Mutex<MifareEngine>>>,
    srix: OnceCell<Option<Mutex<SrixEngine>>>,
    current: Mutex<TagRecord>,
}

impl TagCoordinator {
    /// Create a coordinator over a storage and a reader
    ///
    /// No transport is opened until the first operation that needs it.
    pub fn new(config: CoordinatorConfig, storage: Arc<dyn Storage>, provider: Arc<dyn TransportProvider>) -> Self {
        let keys = Arc::new(KeyStore::new(storage.clone(), config.key_file.clone()));
        Self {
            config,
            storage,
            keys,
            provider,
            mifare: OnceCell::new(),
            srix: OnceCell::new(),
            current: Mutex::new(TagRecord::empty()),
        }
    }

    /// Create a coordinator persisting to the local filesystem
    pub fn with_fs_storage(config: CoordinatorConfig, provider: Arc<dyn TransportProvider>) -> Self {
        let storage: Arc<dyn Storage> = Arc::new(FsStorage::new(config.storage_dir.clone()));
        Self::new(config, storage, provider)
    }

    /// Load the key database and create the dump folders
    pub fn begin(&self) -> Result<(), TagError> {
        let keys = self.keys.begin()?;
        self.storage.create_dir_all(&self.config.srix_dir)?;
        self.storage.create_dir_all(&self.config.mifare_dir)?;
        info!("Tag coordinator ready, {} keys loaded", keys);
        Ok(())
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    /// Check if the engine of a protocol has been built
    pub fn engine_started(&self, protocol: Protocol) -> bool {
        match protocol {
            Protocol::Srix => self.srix.get().is_some(),
            Protocol::MifareClassic => self.mifare.get().is_some(),
            _ => false,
        }
    }

    fn mifare_engine(&self) -> Result<&Mutex<MifareEngine>, TagError> {
        self.mifare
            .get_or_init(|| match self.provider.open_mifare() {
                Ok(transport) => {
                    info!("Mifare reader initialized");
                    Some(Mutex::new(MifareEngine::new(
                        transport,
                        self.keys.clone(),
                        self.config.timing.clone(),
                    )))
                }
                Err(e) => {
                    error!("Mifare reader failed to initialize: {}", e);
                    None
                }
            })
            .as_ref()
            .ok_or_else(|| TagError::HardwareUnavailable("Mifare reader not available".to_string()))
    }

    fn srix_engine(&self) -> Result<&Mutex<SrixEngine>, TagError> {
        self.srix
            .get_or_init(|| match self.provider.open_srix() {
                Ok(transport) => {
                    info!("SRIX reader initialized");
                    Some(Mutex::new(SrixEngine::new(transport, self.config.timing.clone())))
                }
                Err(e) => {
                    error!("SRIX reader failed to initialize: {}", e);
                    None
                }
            })
            .as_ref()
            .ok_or_else(|| TagError::HardwareUnavailable("SRIX reader not available".to_string()))
    }

    // =========================================================================
    // Current tag
    // =========================================================================

    /// Copy of the current record
    pub fn current_tag(&self) -> TagRecord {
        self.current.lock().clone()
    }

    /// Forget the current record and the engines' live buffers
    pub fn clear_current_tag(&self) {
        *self.current.lock() = TagRecord::empty();
        if let Some(Some(engine)) = self.srix.get() {
            engine.lock().clear();
        }
        if let Some(Some(engine)) = self.mifare.get() {
            engine.lock().clear();
        }
        debug!("Current tag cleared");
    }

    /// Make `record` current and seed the matching engine with it
    ///
    /// Engines that have not been built yet pick the record up on their
    /// first write.
    pub fn restore_current_tag(&self, record: TagRecord) {
        *self.current.lock() = record.clone();
        match &record.memory {
            TagMemory::Srix(dump) => {
                if let (Some(Some(engine)), Ok(uid)) = (self.srix.get(), srix_uid(&record.uid)) {
                    engine.lock().adopt(uid, dump.clone());
                }
            }
            TagMemory::Mifare(dump) => {
                if let Some(Some(engine)) = self.mifare.get() {
                    engine.lock().adopt(record.uid.clone(), dump.clone());
                }
            }
            TagMemory::Empty => {}
        }
    }

    fn stage_srix(&self, engine: &mut SrixEngine) -> Result<(), TagError> {
        let record = self.current.lock().clone();
        match (&record.memory, record.valid) {
            (TagMemory::Srix(dump), true) => {
                engine.adopt(srix_uid(&record.uid)?, dump.clone());
                Ok(())
            }
            _ => Err(TagError::InvalidData("no SRIX dump loaded".to_string())),
        }
    }

    fn stage_mifare(&self, engine: &mut MifareEngine) -> Result<(), TagError> {
        let record = self.current.lock().clone();
        match (&record.memory, record.valid) {
            (TagMemory::Mifare(dump), true) => {
                engine.adopt(record.uid.clone(), dump.clone());
                Ok(())
            }
            _ => Err(TagError::InvalidData("no Mifare dump loaded".to_string())),
        }
    }

    // =========================================================================
    // Protocol dispatch
    // =========================================================================

    /// Read a tag of `protocol` and make it current
    pub fn read(&self, protocol: Protocol, timeout: Duration) -> Outcome {
        match protocol {
            Protocol::Srix => self.read_srix(timeout),
            Protocol::MifareClassic => self.read_mifare(timeout),
            Protocol::Ntag | Protocol::Desfire => Outcome::not_implemented(protocol.name()),
            Protocol::Unknown => TagError::InvalidData("unknown protocol".to_string()).into(),
        }
    }

    /// Write the current record onto a tag of `protocol`
    pub fn write(&self, protocol: Protocol, timeout: Duration) -> Outcome {
        match protocol {
            Protocol::Srix => self.write_srix(timeout),
            Protocol::MifareClassic => self.write_mifare(timeout),
            Protocol::Ntag | Protocol::Desfire => Outcome::not_implemented(protocol.name()),
            Protocol::Unknown => TagError::InvalidData("unknown protocol".to_string()).into(),
        }
    }

    /// Write the listed blocks of the current record
    pub fn write_selective(&self, protocol: Protocol, blocks: &[usize]) -> Outcome {
        match protocol {
            Protocol::Srix => self.write_srix_selective(blocks),
            Protocol::MifareClassic => self.write_mifare_selective(blocks),
            Protocol::Ntag | Protocol::Desfire => Outcome::not_implemented(protocol.name()),
            Protocol::Unknown => TagError::InvalidData("unknown protocol".to_string()).into(),
        }
    }

    /// [`read`](Self::read) with the configured read timeout
    pub fn read_default(&self, protocol: Protocol) -> Outcome {
        self.read(protocol, self.config.read_timeout)
    }

    /// [`write`](Self::write) with the configured write timeout
    pub fn write_default(&self, protocol: Protocol) -> Outcome {
        self.write(protocol, self.config.write_timeout)
    }

    pub fn read_mifare_uid_default(&self) -> (Outcome, Option<CardIdentity>) {
        self.read_mifare_uid(self.config.uid_timeout)
    }

    pub fn clone_mifare_uid_default(&self) -> Outcome {
        self.clone_mifare_uid(self.config.write_timeout)
    }

    pub fn compare_default(&self) -> CompareReport {
        self.compare_with_physical(self.config.read_timeout)
    }

    // =========================================================================
    // SRIX
    // =========================================================================

    pub fn read_srix(&self, timeout: Duration) -> Outcome {
        match self.srix_engine().and_then(|engine| engine.lock().read(timeout)) {
            Ok(record) => {
                let message = format!("SRIX tag read, UID {}", record.uid.to_colon_string());
                *self.current.lock() = record;
                Outcome::ok(message)
            }
            Err(e) => {
                warn!("SRIX read failed: {}", e);
                e.into()
            }
        }
    }

    /// Write the current SRIX record to a tag
    ///
    /// A tag that leaves the field part way is not a hard failure: the
    /// outcome code is the number of blocks written.
    pub fn write_srix(&self, timeout: Duration) -> Outcome {
        let result = self.srix_engine().and_then(|engine| {
            let mut engine = engine.lock();
            self.stage_srix(&mut engine)?;
            engine.write(timeout)
        });
        match result {
            Ok(SrixWriteReport::Complete) => Outcome::ok("SRIX write complete"),
            Ok(SrixWriteReport::TagLost { blocks_written }) => Outcome::tag_lost(blocks_written),
            Err(e) => {
                warn!("SRIX write failed: {}", e);
                e.into()
            }
        }
    }

    /// Write one SRIX block
    ///
    /// Codes 0, 1 and 2 all mean the block was written; they differ in how
    /// far the read back could confirm it.
    pub fn write_srix_block(&self, block: usize, data: [u8; SRIX_BLOCK_SIZE]) -> Outcome {
        let result = self.srix_engine().and_then(|engine| {
            let mut engine = engine.lock();
            // a loaded dump is optional for a single block
            if let Err(e) = self.stage_srix(&mut engine) {
                debug!("Writing SRIX block {} without a staged dump: {}", block, e);
            }
            engine.write_block(block, data)
        });
        match result {
            Ok(written) => {
                if let Some(dump) = self.current.lock().srix_dump_mut() {
                    if let Err(e) = dump.set_block(block, &data) {
                        warn!("Current record not updated: {}", e);
                    }
                }
                Outcome::new(true, format!("Block {}: {}", block, written.message()), written.code())
            }
            Err(e) => e.into(),
        }
    }

    pub fn write_srix_selective(&self, blocks: &[usize]) -> Outcome {
        if blocks.is_empty() {
            return TagError::InvalidData("no blocks selected".to_string()).into();
        }
        let engine = match self.srix_engine() {
            Ok(engine) => engine,
            Err(e) => return e.into(),
        };
        let mut engine = engine.lock();
        if let Err(e) = self.stage_srix(&mut engine) {
            return e.into();
        }
        match engine.write_selective(blocks) {
            Ok(tally) => {
                let unverified = tally.verify_mismatch + tally.verify_skipped;
                if unverified > 0 {
                    Outcome::ok(format!(
                        "Successfully wrote {} blocks ({} unverified)",
                        tally.written, unverified
                    ))
                } else {
                    Outcome::ok(format!("Successfully wrote {} blocks", tally.written))
                }
            }
            Err(e) => {
                warn!("Selective SRIX write stopped: {}", e);
                e.into()
            }
        }
    }

    // =========================================================================
    // Mifare
    // =========================================================================

    pub fn read_mifare(&self, timeout: Duration) -> Outcome {
        let result = self.mifare_engine().and_then(|engine| {
            let mut engine = engine.lock();
            let summary = engine.read(timeout)?;
            let record = engine
                .record()
                .ok_or_else(|| TagError::ReadFailed("read produced no image".to_string()))?;
            Ok((summary, record))
        });
        match result {
            Ok((summary, record)) => {
                let mut message = format!(
                    "Read {}/{} blocks from {} {}",
                    summary.blocks_read,
                    summary.total_blocks,
                    summary.identity.card_type.name(),
                    summary.identity.uid.to_colon_string()
                );
                if !summary.failed_sectors.is_empty() {
                    message.push_str(&format!(", {} sectors locked", summary.failed_sectors.len()));
                }
                *self.current.lock() = record;
                Outcome::ok(message)
            }
            Err(e) => {
                warn!("Mifare read failed: {}", e);
                e.into()
            }
        }
    }

    /// Identify the card in the field without reading its memory
    ///
    /// The current record is left untouched.
    pub fn read_mifare_uid(&self, timeout: Duration) -> (Outcome, Option<CardIdentity>) {
        match self.mifare_engine().and_then(|engine| engine.lock().read_uid(timeout)) {
            Ok(identity) => (
                Outcome::ok(format!(
                    "{} {}",
                    identity.card_type.name(),
                    identity.uid.to_colon_string()
                )),
                Some(identity),
            ),
            Err(e) => (e.into(), None),
        }
    }

    pub fn write_mifare(&self, timeout: Duration) -> Outcome {
        let result = self.mifare_engine().and_then(|engine| {
            let mut engine = engine.lock();
            self.stage_mifare(&mut engine)?;
            engine.write(timeout)
        });
        match result {
            Ok(summary) => Outcome::ok(format!(
                "Wrote {} blocks in {} sectors",
                summary.blocks_written, summary.sectors_written
            )),
            Err(e) => {
                warn!("Mifare write failed: {}", e);
                e.into()
            }
        }
    }

    /// Copy the current record's UID onto a magic card
    pub fn clone_mifare_uid(&self, timeout: Duration) -> Outcome {
        let result = self.mifare_engine().and_then(|engine| {
            let mut engine = engine.lock();
            self.stage_mifare(&mut engine)?;
            engine.clone_uid(timeout)
        });
        match result {
            Ok(()) => Outcome::ok(format!("UID {} cloned", self.current.lock().uid.to_colon_string())),
            Err(e) => e.into(),
        }
    }

    /// Write one data block of a Mifare card
    pub fn write_mifare_block(&self, block: usize, data: [u8; BLOCK_SIZE]) -> Outcome {
        let result = self.mifare_engine().and_then(|engine| {
            let mut engine = engine.lock();
            if let Err(e) = self.stage_mifare(&mut engine) {
                debug!("Writing Mifare block {} without a staged dump: {}", block, e);
            }
            engine.write_single_block(block, Some(data))
        });
        match result {
            Ok(()) => {
                if let Some(dump) = self.current.lock().mifare_dump_mut() {
                    if let Err(e) = dump.set_block(block, &data) {
                        warn!("Current record not updated: {}", e);
                    }
                }
                Outcome::ok(format!("Block {} written", block))
            }
            Err(e) => e.into(),
        }
    }

    pub fn write_mifare_selective(&self, blocks: &[usize]) -> Outcome {
        if blocks.is_empty() {
            return TagError::InvalidData("no blocks selected".to_string()).into();
        }
        let engine = match self.mifare_engine() {
            Ok(engine) => engine,
            Err(e) => return e.into(),
        };
        let mut engine = engine.lock();
        if let Err(e) = self.stage_mifare(&mut engine) {
            return e.into();
        }
        match engine.write_selective(blocks) {
            Ok(written) => Outcome::ok(format!("Successfully wrote {} blocks", written)),
            Err(e) => {
                warn!("Selective Mifare write stopped: {}", e);
                e.into()
            }
        }
    }

    // =========================================================================
    // Dump files
    // =========================================================================

    fn dump_dir(&self, protocol: Protocol) -> Result<(&str, &'static str), TagError> {
        match protocol {
            Protocol::Srix => Ok((self.config.srix_dir.as_str(), "srix")),
            Protocol::MifareClassic => Ok((self.config.mifare_dir.as_str(), "mfc")),
            Protocol::Ntag | Protocol::Desfire => Err(TagError::NotImplemented(protocol.name())),
            Protocol::Unknown => Err(TagError::InvalidData(
                "cannot detect protocol from file name".to_string(),
            )),
        }
    }

    /// Resolve a dump file name to its protocol and storage path
    fn locate(&self, name: &str, protocol: Option<Protocol>) -> Result<(Protocol, String), TagError> {
        let name = checked_name(name)?;
        let protocol = protocol.unwrap_or_else(|| Protocol::from_filename(name));
        let (dir, ext) = self.dump_dir(protocol)?;
        Ok((protocol, storage::join(dir, &with_extension(name, ext))))
    }

    /// Save the current record under `name`
    ///
    /// The protocol extension is added when missing and an existing file
    /// is never overwritten: `name_1`, `name_2`... are tried instead.
    pub fn save(&self, name: &str) -> Outcome {
        match self.save_current(name) {
            Ok(file_name) => Outcome::ok(format!("Saved as {}", file_name)),
            Err(e) => {
                warn!("Save failed: {}", e);
                e.into()
            }
        }
    }

    fn save_current(&self, name: &str) -> Result<String, TagError> {
        let name = checked_name(name)?;
        let record = self.current.lock().clone();
        if !record.valid {
            return Err(TagError::InvalidData("no valid tag data to save".to_string()));
        }

        let content = match &record.memory {
            TagMemory::Srix(dump) => srix::dump::encode(&srix_uid(&record.uid)?, dump),
            TagMemory::Mifare(dump) => mifare::dump::encode(&record.uid, dump),
            TagMemory::Empty => return Err(TagError::InvalidData("unknown protocol".to_string())),
        };
        let (dir, ext) = self.dump_dir(record.protocol())?;

        let stem = name.strip_suffix(&format!(".{}", ext)).unwrap_or(name);
        let mut file_name = format!("{}.{}", stem, ext);
        let mut suffix = 1;
        while self.storage.exists(&storage::join(dir, &file_name)) {
            file_name = format!("{}_{}.{}", stem, suffix, ext);
            suffix += 1;
        }

        self.storage.create_dir_all(dir)?;
        self.storage.write(&storage::join(dir, &file_name), &content)?;
        info!("Saved {} dump {}", record.protocol(), file_name);
        Ok(file_name)
    }

    /// Load a dump file and make it current
    ///
    /// Without an explicit protocol the file extension decides; an
    /// unknown extension is an error.
    pub fn load(&self, name: &str, protocol: Option<Protocol>) -> Outcome {
        match self.load_file(name, protocol) {
            Ok(record) => {
                let message = format!(
                    "Loaded {} dump, UID {} ({} bytes)",
                    record.protocol(),
                    record.uid.to_colon_string(),
                    record.memory.len()
                );
                self.restore_current_tag(record);
                Outcome::ok(message)
            }
            Err(e) => {
                warn!("Load of {} failed: {}", name, e);
                e.into()
            }
        }
    }

    fn load_file(&self, name: &str, protocol: Option<Protocol>) -> Result<TagRecord, TagError> {
        let (protocol, path) = self.locate(name, protocol)?;
        if !self.storage.exists(&path) {
            return Err(TagError::FileError(format!("File not found: {}", path)));
        }
        let text = self.storage.read_to_string(&path)?;
        let record = match protocol {
            Protocol::MifareClassic => {
                let (uid, dump) = mifare::dump::decode(&text)?;
                TagRecord::mifare(uid, dump)
            }
            _ => {
                let (uid, dump) = srix::dump::decode(&text)?;
                TagRecord::srix(uid, dump)
            }
        };
        info!("Loaded {}", path);
        Ok(record)
    }

    /// Names of the saved dumps of a protocol, sorted
    pub fn dump_files(&self, protocol: Protocol) -> Result<Vec<String>, TagError> {
        let (dir, ext) = self.dump_dir(protocol)?;
        if !self.storage.exists(dir) {
            return Ok(Vec::new());
        }
        let suffix = format!(".{}", ext);
        Ok(self
            .storage
            .list(dir)?
            .into_iter()
            .filter(|name| name.to_ascii_lowercase().ends_with(&suffix))
            .collect())
    }

    /// Count the saved dumps of a protocol; the code is the count
    pub fn list_files(&self, protocol: Protocol) -> Outcome {
        match self.dump_files(protocol) {
            Ok(files) => Outcome::new(true, format!("{} files found", files.len()), files.len() as i32),
            Err(e) => e.into(),
        }
    }

    pub fn delete_file(&self, name: &str, protocol: Option<Protocol>) -> Outcome {
        let path = match self.locate(name, protocol) {
            Ok((_, path)) => path,
            Err(e) => return e.into(),
        };
        if !self.storage.exists(&path) {
            return Outcome::failure("File not found", Status::FILE_ERROR);
        }
        match self.storage.remove(&path) {
            Ok(()) => {
                info!("Deleted {}", path);
                Outcome::ok("File deleted")
            }
            Err(e) => TagError::from(e).into(),
        }
    }

    // =========================================================================
    // Compare
    // =========================================================================

    /// Re-read the physical tag and diff it against the current record
    ///
    /// The current record is restored afterwards, in the coordinator and in
    /// the engine whose buffer the re-read replaced.
    pub fn compare_with_physical(&self, timeout: Duration) -> CompareReport {
        let loaded = self.current_tag();
        if !loaded.valid {
            return CompareReport::failure("No dump loaded to compare");
        }

        let physical = match loaded.protocol() {
            Protocol::Srix => self.srix_engine().and_then(|engine| engine.lock().read(timeout)),
            Protocol::MifareClassic => self.mifare_engine().and_then(|engine| {
                let mut engine = engine.lock();
                engine.read(timeout)?;
                engine
                    .record()
                    .ok_or_else(|| TagError::ReadFailed("read produced no image".to_string()))
            }),
            other => Err(TagError::NotImplemented(other.name())),
        };

        let report = match physical {
            Ok(physical) => compare_records(&loaded, &physical),
            Err(e) => CompareReport::failure(format!("Physical read failed: {}", e)),
        };
        self.restore_current_tag(loaded);
        report
    }

    // =========================================================================
    // Background operations
    // =========================================================================

    /// Run an operation on the calling thread
    pub fn execute(&self, operation: &Operation) -> Outcome {
        match operation {
            Operation::Read { protocol, timeout } => self.read(*protocol, *timeout),
            Operation::ReadUid { timeout } => self.read_mifare_uid(*timeout).0,
            Operation::Write { protocol, timeout } => self.write(*protocol, *timeout),
            Operation::CloneUid { timeout } => self.clone_mifare_uid(*timeout),
            Operation::WriteSelective { protocol, blocks } => self.write_selective(*protocol, blocks),
            Operation::Compare { timeout } => {
                let report = self.compare_with_physical(*timeout);
                let code = if report.success {
                    Status::OK
                } else if report.size_mismatch {
                    Status::INVALID_DATA
                } else {
                    Status::READ_FAILED
                };
                Outcome::new(report.success, report.message, code)
            }
        }
    }

    /// Start an operation on a worker thread
    pub fn spawn(self: &Arc<Self>, operation: Operation) -> Result<OperationHandle<Outcome>, TagError> {
        let name = operation.name();
        let coordinator = Arc::clone(self);
        spawn_operation(name, move || coordinator.execute(&operation))
    }

    /// Run an operation on a worker thread and wait for it within its bound
    ///
    /// `liveness` runs on every poll tick. Past the bound the caller gets a
    /// timeout outcome while the operation keeps running to its own end.
    pub fn run_bounded(self: &Arc<Self>, operation: Operation, liveness: impl FnMut()) -> Outcome {
        let bound = operation.wait_bound();
        let handle = match self.spawn(operation) {
            Ok(handle) => handle,
            Err(e) => return e.into(),
        };
        match handle.wait(bound, POLL_INTERVAL, liveness) {
            WaitOutcome::Completed(outcome) => outcome,
            WaitOutcome::TimedOut { waited } => TagError::Timeout(format!(
                "no result after {}s, the operation may still be running",
                waited.as_secs()
            ))
            .into(),
            WaitOutcome::Lost => TagError::Timeout("operation ended without a result".to_string()).into(),
        }
    }
}

fn srix_uid(uid: &Uid) -> Result<[u8; SRIX_UID_LEN], TagError> {
    <[u8; SRIX_UID_LEN]>::try_from(uid.as_bytes())
        .map_err(|_| TagError::InvalidData(format!("SRIX UID must be {} bytes", SRIX_UID_LEN)))
}

/// Reject names that would leave the dump folder
fn checked_name(name: &str) -> Result<&str, TagError> {
    let name = name.trim();
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(TagError::InvalidData(format!("invalid file name '{}'", name)));
    }
    Ok(name)
}

fn with_extension(name: &str, ext: &str) -> String {
    if name.to_ascii_lowercase().ends_with(&format!(".{}", ext)) {
        name.to_string()
    } else {
        format!("{}.{}", name, ext)
    }
}

//! Durable ledger storage.
//!
//! A [`LedgerStore`] persists the whole ledger as one unit. [`JsonFileStore`]
//! writes a pretty-printed JSON object keyed by user id, replacing the file
//! atomically so a crash mid-write never leaves a truncated ledger behind.

use crate::error::{LedgerError, LedgerResult};
use crate::types::{UserId, UserRecord};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// All user records, ordered by id.
pub type Ledger = BTreeMap<UserId, UserRecord>;

/// Backing medium for the ledger.
pub trait LedgerStore: Send + Sync {
	/// Loads the full ledger. A medium that does not exist yet is an empty ledger.
	fn load(&self) -> LedgerResult<Ledger>;

	/// Replaces the persisted ledger with `ledger`.
	fn save(&self, ledger: &Ledger) -> LedgerResult<()>;

	/// Human-readable description for logs
	fn describe(&self) -> String;
}

/// JSON file ledger.
///
/// [`JsonFileStore::open`] takes an exclusive advisory lock on `<path>.lock`
/// that lives as long as the store and its clones, so a second process
/// cannot flush an outdated cache over the file. [`JsonFileStore::read_only`]
/// skips the lock and refuses to save.
///
/// # Example
///
/// ```rust
/// use passgate_ledger::{JsonFileStore, Ledger, LedgerStore, UserId, UserRecord};
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("users_data.json");
/// let store = JsonFileStore::open(&path).unwrap();
/// assert!(store.load().unwrap().is_empty());
///
/// let mut ledger = Ledger::new();
/// ledger.insert(UserId::from("7"), UserRecord::new(Some("carol")));
/// store.save(&ledger).unwrap();
/// assert_eq!(JsonFileStore::read_only(&path).load().unwrap(), ledger);
/// assert!(JsonFileStore::open(&path).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct JsonFileStore {
	path: PathBuf,
	lock: Option<Arc<File>>,
}

impl JsonFileStore {
	/// Opens the ledger at `path` for exclusive use.
	///
	/// Fails with [`LedgerError::StorageUnavailable`] of kind
	/// [`io::ErrorKind::WouldBlock`] while another owner holds the lock.
	pub fn open(path: impl Into<PathBuf>) -> LedgerResult<Self> {
		let path = path.into();
		create_parent(&path)?;
		let lock_path = sibling(&path, ".lock");
		let file = OpenOptions::new()
			.create(true)
			.truncate(false)
			.write(true)
			.open(&lock_path)?;
		if let Err(e) = fs2::FileExt::try_lock_exclusive(&file) {
			tracing::warn!(
				path = %path.display(),
				error = %e,
				"ledger is owned by another process"
			);
			return Err(LedgerError::StorageUnavailable(io::Error::new(
				io::ErrorKind::WouldBlock,
				format!("ledger {} is locked by another owner", path.display()),
			)));
		}
		Ok(Self {
			path,
			lock: Some(Arc::new(file)),
		})
	}

	/// Opens the ledger at `path` for inspection only.
	pub fn read_only(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			lock: None,
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn is_read_only(&self) -> bool {
		self.lock.is_none()
	}
}

impl LedgerStore for JsonFileStore {
	fn load(&self) -> LedgerResult<Ledger> {
		let bytes = match fs::read(&self.path) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Ledger::new()),
			Err(e) => return Err(e.into()),
		};
		decode(&bytes)
	}

	fn save(&self, ledger: &Ledger) -> LedgerResult<()> {
		if self.is_read_only() {
			return Err(io::Error::new(
				io::ErrorKind::PermissionDenied,
				format!("ledger {} is opened read-only", self.path.display()),
			)
			.into());
		}
		let bytes = encode(ledger)?;
		create_parent(&self.path)?;
		atomic_write(&self.path, &bytes)?;
		Ok(())
	}

	fn describe(&self) -> String {
		if self.is_read_only() {
			format!("JSON file (read-only): {}", self.path.display())
		} else {
			format!("JSON file: {}", self.path.display())
		}
	}
}

fn create_parent(path: &Path) -> io::Result<()> {
	match path.parent() {
		Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
		_ => Ok(()),
	}
}

/// `path` with `suffix` appended to its file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
	let mut name = OsString::from(path.as_os_str());
	name.push(suffix);
	PathBuf::from(name)
}

fn encode(ledger: &Ledger) -> LedgerResult<Vec<u8>> {
	let mut bytes = serde_json::to_vec_pretty(ledger)
		.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
	bytes.push(b'\n');
	Ok(bytes)
}

fn decode(bytes: &[u8]) -> LedgerResult<Ledger> {
	if bytes.iter().all(u8::is_ascii_whitespace) {
		return Ok(Ledger::new());
	}
	serde_json::from_slice(bytes)
		.map_err(|e| LedgerError::StorageUnavailable(io::Error::new(io::ErrorKind::InvalidData, e)))
}

/// Writes `content` to `path` through a sibling temporary file and a rename.
///
/// The temporary file is flushed to disk before the rename, which is atomic
/// on the same filesystem. Permissions of an existing target are kept.
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
	let original_perms = fs::metadata(path).ok().map(|m| m.permissions());

	let tmp_path = sibling(path, ".tmp");

	let written = File::create(&tmp_path).and_then(|mut file| {
		file.write_all(content)?;
		file.sync_all()
	});
	if let Err(e) = written {
		let _ = fs::remove_file(&tmp_path);
		return Err(e);
	}

	if let Some(perms) = original_perms {
		fs::set_permissions(&tmp_path, perms)?;
	}

	if let Err(e) = fs::rename(&tmp_path, path) {
		let _ = fs::remove_file(&tmp_path);
		return Err(e);
	}

	// Make the rename itself durable.
	#[cfg(unix)]
	if let Some(parent) = path.parent()
		&& !parent.as_os_str().is_empty()
		&& let Ok(dir) = File::open(parent)
	{
		let _ = dir.sync_all();
	}

	Ok(())
}

/// In-memory ledger storage for tests.
///
/// Saves are serialized to JSON and loads deserialize them again, so the
/// store exercises the same encoding as [`JsonFileStore`]. Failures can be
/// injected for the next save or load.
#[derive(Debug, Default)]
pub struct MemoryStore {
	bytes: Mutex<Option<Vec<u8>>>,
	fail_next_save: AtomicBool,
	fail_next_load: AtomicBool,
	saves: AtomicUsize,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a store that already holds `ledger`.
	pub fn with_ledger(ledger: &Ledger) -> LedgerResult<Self> {
		let store = Self::new();
		*store.bytes.lock() = Some(encode(ledger)?);
		Ok(store)
	}

	/// Creates a store holding raw bytes, e.g. a corrupt ledger.
	pub fn with_raw(bytes: impl Into<Vec<u8>>) -> Self {
		let store = Self::new();
		*store.bytes.lock() = Some(bytes.into());
		store
	}

	/// Configures whether the next save should fail.
	pub fn set_fail_next_save(&self, fail: bool) {
		self.fail_next_save.store(fail, Ordering::SeqCst);
	}

	/// Configures whether the next load should fail.
	pub fn set_fail_next_load(&self, fail: bool) {
		self.fail_next_load.store(fail, Ordering::SeqCst);
	}

	/// Number of successful saves.
	pub fn save_count(&self) -> usize {
		self.saves.load(Ordering::SeqCst)
	}
}

impl LedgerStore for MemoryStore {
	fn load(&self) -> LedgerResult<Ledger> {
		if self.fail_next_load.swap(false, Ordering::SeqCst) {
			return Err(io::Error::other("memory store configured to fail").into());
		}
		match self.bytes.lock().as_deref() {
			Some(bytes) => decode(bytes),
			None => Ok(Ledger::new()),
		}
	}

	fn save(&self, ledger: &Ledger) -> LedgerResult<()> {
		if self.fail_next_save.swap(false, Ordering::SeqCst) {
			return Err(io::Error::other("memory store configured to fail").into());
		}
		let bytes = encode(ledger)?;
		*self.bytes.lock() = Some(bytes);
		self.saves.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	fn describe(&self) -> String {
		"memory".to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	fn sample_ledger() -> Ledger {
		let mut ledger = Ledger::new();
		ledger.insert(UserId::from("1"), UserRecord::new(Some("alice")));
		ledger.insert(
			UserId::from("2"),
			UserRecord {
				is_paid: true,
				trial_used: true,
				subscription_end: chrono::NaiveDate::from_ymd_opt(2026, 5, 1),
				access_link: Some("ss://x#User2".to_string()),
				..UserRecord::default()
			},
		);
		ledger
	}

	#[rstest]
	fn test_missing_file_loads_empty_ledger() {
		let dir = tempfile::tempdir().expect("failed to create temp dir");
		let store = JsonFileStore::open(dir.path().join("absent.json")).unwrap();

		assert!(store.load().unwrap().is_empty());
	}

	#[rstest]
	fn test_save_creates_parent_dirs_and_leaves_no_temp_file() {
		// Arrange
		let dir = tempfile::tempdir().expect("failed to create temp dir");
		let path = dir.path().join("state").join("users_data.json");
		let store = JsonFileStore::open(&path).unwrap();

		// Act
		store.save(&sample_ledger()).unwrap();

		// Assert
		assert!(path.exists());
		assert!(!dir.path().join("state").join("users_data.json.tmp").exists());
		assert_eq!(store.load().unwrap(), sample_ledger());
	}

	#[rstest]
	fn test_saved_file_is_human_readable_json_keyed_by_user() {
		let dir = tempfile::tempdir().expect("failed to create temp dir");
		let path = dir.path().join("users_data.json");
		let store = JsonFileStore::open(&path).unwrap();

		store.save(&sample_ledger()).unwrap();

		let text = fs::read_to_string(&path).unwrap();
		let value: serde_json::Value = serde_json::from_str(&text).unwrap();
		assert_eq!(value["2"]["subscription_end"], "2026-05-01");
		assert_eq!(value["2"]["vpn_config_link"], "ss://x#User2");
		assert_eq!(value["1"]["username"], "alice");
		assert!(text.contains('\n'));
	}

	#[rstest]
	fn test_corrupt_file_is_storage_unavailable() {
		let dir = tempfile::tempdir().expect("failed to create temp dir");
		let path = dir.path().join("users_data.json");
		fs::write(&path, "{\"1\": {").unwrap();

		let result = JsonFileStore::read_only(&path).load();

		assert!(matches!(result, Err(LedgerError::StorageUnavailable(_))));
	}

	#[rstest]
	fn test_blank_file_loads_empty_ledger() {
		let dir = tempfile::tempdir().expect("failed to create temp dir");
		let path = dir.path().join("users_data.json");
		fs::write(&path, "\n").unwrap();

		assert!(JsonFileStore::read_only(&path).load().unwrap().is_empty());
	}

	#[rstest]
	fn test_interrupted_write_keeps_previous_ledger() {
		// Arrange: a committed ledger plus a leftover temp file from a crash
		let dir = tempfile::tempdir().expect("failed to create temp dir");
		let path = dir.path().join("users_data.json");
		let store = JsonFileStore::open(&path).unwrap();
		store.save(&sample_ledger()).unwrap();
		fs::write(dir.path().join("users_data.json.tmp"), "{\"half").unwrap();

		// Act
		let loaded = store.load().unwrap();

		// Assert
		assert_eq!(loaded, sample_ledger());
	}

	#[rstest]
	fn test_second_owner_of_same_file_is_refused() {
		// Arrange
		let dir = tempfile::tempdir().expect("failed to create temp dir");
		let path = dir.path().join("users_data.json");
		let owner = JsonFileStore::open(&path).unwrap();
		owner.save(&sample_ledger()).unwrap();

		// Act
		let second = JsonFileStore::open(&path);

		// Assert
		match second {
			Err(LedgerError::StorageUnavailable(e)) => {
				assert_eq!(e.kind(), io::ErrorKind::WouldBlock)
			}
			other => panic!("expected a locked ledger, got {other:?}"),
		}
		assert_eq!(owner.load().unwrap(), sample_ledger());
	}

	#[rstest]
	fn test_lock_is_released_with_last_clone() {
		let dir = tempfile::tempdir().expect("failed to create temp dir");
		let path = dir.path().join("users_data.json");
		let owner = JsonFileStore::open(&path).unwrap();
		let clone = owner.clone();

		drop(owner);
		assert!(JsonFileStore::open(&path).is_err());
		drop(clone);

		assert!(JsonFileStore::open(&path).is_ok());
	}

	#[rstest]
	fn test_read_only_store_loads_but_refuses_saves() {
		// Arrange
		let dir = tempfile::tempdir().expect("failed to create temp dir");
		let path = dir.path().join("users_data.json");
		let _owner = JsonFileStore::open(&path).unwrap();
		fs::write(&path, "{}").unwrap();
		let viewer = JsonFileStore::read_only(&path);

		// Act
		let loaded = viewer.load();
		let saved = viewer.save(&sample_ledger());

		// Assert
		assert!(loaded.unwrap().is_empty());
		assert!(matches!(saved, Err(LedgerError::StorageUnavailable(_))));
		assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
	}

	#[rstest]
	fn test_memory_store_injected_failures_are_one_shot() {
		let store = MemoryStore::new();
		store.set_fail_next_save(true);

		assert!(store.save(&sample_ledger()).is_err());
		assert_eq!(store.save_count(), 0);
		assert!(store.save(&sample_ledger()).is_ok());
		assert_eq!(store.save_count(), 1);

		store.set_fail_next_load(true);
		assert!(store.load().is_err());
		assert_eq!(store.load().unwrap(), sample_ledger());
	}
}

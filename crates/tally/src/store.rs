// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable snapshot storage.
//!
//! A client keeps one snapshot per project token. Saves replace the whole
//! snapshot atomically (temporary file, fsync, rename) so a crash mid-write
//! leaves the previous snapshot intact. A missing, unreadable or
//! incompatible snapshot is reported as "no prior state".

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tally_core::Snapshot;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::error::{Result, TallyError};
use crate::state::ClientState;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
	/// Returns the last committed snapshot, or `None` when there is no usable one.
	async fn load(&self) -> Result<Option<Snapshot>>;
	/// Commits a snapshot, replacing the previous one.
	async fn save(&self, snapshot: &Snapshot) -> Result<()>;
	/// Removes the stored snapshot.
	async fn clear(&self) -> Result<()>;
}

/// Stores the snapshot as a JSON file.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
	path: PathBuf,
}

impl FileSnapshotStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	/// Creates a store for `token` inside `data_dir`.
	pub fn for_token(data_dir: &Path, token: &str) -> Self {
		Self::new(data_dir.join(snapshot_file_name(token)))
	}

	/// Creates a store for `token` in the platform data directory.
	pub fn from_xdg(token: &str) -> Result<Self> {
		let data_dir = dirs::data_dir().ok_or_else(|| {
			TallyError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				"could not determine XDG data directory",
			))
		})?;

		let store = Self::for_token(&data_dir.join("tally"), token);
		info!(path = %store.path.display(), "initialized snapshot store");
		Ok(store)
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn tmp_path(&self) -> PathBuf {
		let mut name = self
			.path
			.file_name()
			.map(|n| n.to_os_string())
			.unwrap_or_default();
		name.push(".tmp");
		self.path.with_file_name(name)
	}
}

/// File name for a token; anything outside `[A-Za-z0-9_-]` becomes `_`.
fn snapshot_file_name(token: &str) -> String {
	let safe: String = token
		.chars()
		.map(|c| {
			if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
				c
			} else {
				'_'
			}
		})
		.collect();
	format!("tally-{safe}.json")
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
	async fn load(&self) -> Result<Option<Snapshot>> {
		let bytes = match tokio::fs::read(&self.path).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!(path = %self.path.display(), "snapshot file not found");
				return Ok(None);
			}
			Err(e) => return Err(e.into()),
		};

		match Snapshot::from_bytes(&bytes) {
			Ok(snapshot) => {
				debug!(
					path = %self.path.display(),
					records = snapshot.pending_records(),
					"loaded snapshot from disk"
				);
				Ok(Some(snapshot))
			}
			Err(e) => {
				error!(
					path = %self.path.display(),
					error = %e,
					"failed to parse snapshot file, starting empty"
				);
				Ok(None)
			}
		}
	}

	async fn save(&self, snapshot: &Snapshot) -> Result<()> {
		if let Some(parent) = self.path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}

		let bytes = snapshot.to_bytes()?;
		let tmp_path = self.tmp_path();

		let mut file = tokio::fs::File::create(&tmp_path).await?;
		file.write_all(&bytes).await?;
		file.sync_all().await?;
		drop(file);
		tokio::fs::rename(&tmp_path, &self.path).await?;

		debug!(
			path = %self.path.display(),
			records = snapshot.pending_records(),
			bytes = bytes.len(),
			"saved snapshot to disk"
		);

		Ok(())
	}

	async fn clear(&self) -> Result<()> {
		match tokio::fs::remove_file(&self.path).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}
}

/// Keeps the encoded snapshot in memory; for tests and ephemeral clients.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
	bytes: Mutex<Option<Vec<u8>>>,
}

impl MemorySnapshotStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Raw bytes of the last save.
	pub fn raw(&self) -> Option<Vec<u8>> {
		self.bytes.lock().clone()
	}

	/// Overwrites the stored bytes, e.g. to simulate a corrupt file.
	pub fn set_raw(&self, bytes: Vec<u8>) {
		*self.bytes.lock() = Some(bytes);
	}
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
	async fn load(&self) -> Result<Option<Snapshot>> {
		let Some(bytes) = self.raw() else {
			return Ok(None);
		};
		match Snapshot::from_bytes(&bytes) {
			Ok(snapshot) => Ok(Some(snapshot)),
			Err(e) => {
				error!(error = %e, "failed to parse in-memory snapshot, starting empty");
				Ok(None)
			}
		}
	}

	async fn save(&self, snapshot: &Snapshot) -> Result<()> {
		let bytes = snapshot.to_bytes()?;
		*self.bytes.lock() = Some(bytes);
		Ok(())
	}

	async fn clear(&self) -> Result<()> {
		*self.bytes.lock() = None;
		Ok(())
	}
}

/// Writes client state through a [`SnapshotStore`], one save at a time.
pub struct Persister {
	store: Arc<dyn SnapshotStore>,
	write_lock: tokio::sync::Mutex<()>,
}

impl Persister {
	pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
		Self {
			store,
			write_lock: tokio::sync::Mutex::new(()),
		}
	}

	/// Loads the last snapshot; any failure means starting empty.
	pub async fn load(&self) -> Option<Snapshot> {
		match self.store.load().await {
			Ok(snapshot) => snapshot,
			Err(e) => {
				error!(error = %e, "failed to load snapshot, starting empty");
				None
			}
		}
	}

	/// Saves the current state unconditionally. Returns whether the save succeeded.
	pub async fn persist(&self, state: &Mutex<ClientState>) -> bool {
		let _guard = self.write_lock.lock().await;
		// Captured under the write guard so saves commit in capture order.
		let snapshot = {
			let mut state = state.lock();
			state.take_dirty();
			state.snapshot()
		};

		match self.store.save(&snapshot).await {
			Ok(()) => true,
			Err(e) => {
				warn!(error = %e, "failed to save snapshot");
				state.lock().mark_dirty();
				false
			}
		}
	}

	/// Saves only if something changed since the last save.
	pub async fn persist_if_dirty(&self, state: &Mutex<ClientState>) -> bool {
		if !state.lock().is_dirty() {
			return true;
		}
		self.persist(state).await
	}
}

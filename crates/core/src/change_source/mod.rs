//! Component E: live change sources feeding the Mutation Applier.

pub mod audit_log;
pub mod kernel;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

pub use audit_log::AuditLogSource;
pub use kernel::KernelNotifySource;

/// One of the three mutation kinds a [`ChangeSource`] may deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
	Create(PathBuf),
	Delete(PathBuf),
	Rename { src: PathBuf, dst: PathBuf },
}

/// A live source of filesystem mutations.
///
/// `start` may fail to initialize (missing audit log, inotify limits
/// exhausted, ...); the daemon falls back to sleep-only polling in that
/// case rather than treating it as fatal.
#[async_trait]
pub trait ChangeSource: Send {
	async fn start(&mut self) -> bool;

	/// Runs until `timeout` elapses, dispatching events to `on_event` as
	/// they arrive, and returns how many were dispatched.
	async fn watch(
		&mut self,
		timeout: Duration,
		on_event: &mut (dyn FnMut(ChangeEvent) + Send),
	) -> usize;
}

/// Paths with a colon are extended-attribute side-channels and must never
/// reach the Mutation Applier.
pub fn is_xattr_sidechannel(path: &std::path::Path) -> bool {
	path.to_string_lossy().contains(':')
}

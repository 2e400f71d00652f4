//! Component E1: kernel filesystem-notification change source, backed by
//! the `notify` crate.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use notify::{
	event::{CreateKind, ModifyKind, RemoveKind, RenameMode},
	Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use tracing::{debug, trace, warn};

use super::{is_xattr_sidechannel, ChangeEvent, ChangeSource};

/// Debounces duplicate events for the same path in quick succession; many
/// editors emit several notify events for a single logical write.
const DEBOUNCE: Duration = Duration::from_millis(50);

pub struct KernelNotifySource {
	roots: Vec<PathBuf>,
	watcher: Option<RecommendedWatcher>,
	rx: Option<Receiver<notify::Result<Event>>>,
	recent: Arc<RwLock<HashMap<PathBuf, Instant>>>,
	pending_rename_from: Option<PathBuf>,
}

impl KernelNotifySource {
	pub fn new(roots: Vec<PathBuf>) -> Self {
		Self {
			roots,
			watcher: None,
			rx: None,
			recent: Arc::new(RwLock::new(HashMap::new())),
			pending_rename_from: None,
		}
	}

	fn should_debounce(&self, path: &PathBuf) -> bool {
		let now = Instant::now();
		let mut recent = self.recent.write().expect("lock poisoned");
		if let Some(&last_seen) = recent.get(path) {
			if now.duration_since(last_seen) < DEBOUNCE {
				return true;
			}
		}
		recent.insert(path.clone(), now);
		recent.retain(|_, &mut last_seen| now.duration_since(last_seen) < Duration::from_secs(2));
		false
	}

	fn map_event(&mut self, event: Event) -> Vec<ChangeEvent> {
		let mut out = Vec::new();

		match event.kind {
			EventKind::Create(CreateKind::Any | CreateKind::File | CreateKind::Folder) => {
				for path in event.paths {
					if self.admit(&path) {
						out.push(ChangeEvent::Create(path));
					}
				}
			}
			EventKind::Remove(RemoveKind::Any | RemoveKind::File | RemoveKind::Folder) => {
				for path in event.paths {
					if self.admit(&path) {
						out.push(ChangeEvent::Delete(path));
					}
				}
			}
			EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
				if let [src, dst] = &event.paths[..] {
					if !is_xattr_sidechannel(src) && !is_xattr_sidechannel(dst) && self.either_not_debounced(src, dst) {
						out.push(ChangeEvent::Rename {
							src: src.clone(),
							dst: dst.clone(),
						});
					}
				}
			}
			EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
				self.pending_rename_from = event.paths.into_iter().next();
			}
			EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
				if let (Some(src), Some(dst)) = (self.pending_rename_from.take(), event.paths.into_iter().next()) {
					if !is_xattr_sidechannel(&src)
						&& !is_xattr_sidechannel(&dst)
						&& self.either_not_debounced(&src, &dst)
					{
						out.push(ChangeEvent::Rename { src, dst });
					}
				}
			}
			_ => trace!(?event.kind, "ignoring unhandled notify event kind"),
		}

		out
	}

	fn admit(&self, path: &PathBuf) -> bool {
		if is_xattr_sidechannel(path) {
			return false;
		}
		!self.should_debounce(path)
	}

	/// Debounce gate for a rename pair, applied only once the xattr
	/// side-channel check has already passed for both sides.
	fn either_not_debounced(&self, src: &PathBuf, dst: &PathBuf) -> bool {
		!self.should_debounce(src) || !self.should_debounce(dst)
	}
}

#[async_trait]
impl ChangeSource for KernelNotifySource {
	async fn start(&mut self) -> bool {
		let (tx, rx) = std::sync::mpsc::channel();

		let mut watcher = match RecommendedWatcher::new(
			move |res| {
				let _ = tx.send(res);
			},
			notify::Config::default(),
		) {
			Ok(watcher) => watcher,
			Err(err) => {
				warn!(error = %err, "failed to initialize kernel notification watcher");
				return false;
			}
		};

		for root in &self.roots {
			if let Err(err) = watcher.watch(root, RecursiveMode::Recursive) {
				warn!(path = %root.display(), error = %err, "failed to register watch, falling back to sleep-only");
				return false;
			}
		}

		debug!(roots = self.roots.len(), "kernel notification watcher started");
		self.watcher = Some(watcher);
		self.rx = Some(rx);
		true
	}

	async fn watch(&mut self, timeout: Duration, on_event: &mut (dyn FnMut(ChangeEvent) + Send)) -> usize {
		let Some(rx) = self.rx.take() else {
			return 0;
		};

		let deadline = Instant::now() + timeout;
		let mut count = 0;
		let mut pending = Vec::new();

		loop {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				break;
			}

			match rx.recv_timeout(remaining) {
				Ok(Ok(event)) => pending.push(event),
				Ok(Err(err)) => warn!(error = %err, "kernel notification watcher reported an error"),
				Err(RecvTimeoutError::Timeout) => break,
				Err(RecvTimeoutError::Disconnected) => break,
			}
		}

		for event in pending {
			for change in self.map_event(event) {
				on_event(change);
				count += 1;
			}
		}

		self.rx = Some(rx);
		count
	}
}

#[cfg(test)]
mod tests {
	use notify::event::{CreateKind, RemoveKind};

	use super::*;

	fn source() -> KernelNotifySource {
		KernelNotifySource::new(vec![PathBuf::from("/data")])
	}

	#[test]
	fn rename_both_dispatches_for_clean_paths() {
		let mut source = source();
		let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
			.add_path(PathBuf::from("/data/a.txt"))
			.add_path(PathBuf::from("/data/b.txt"));

		assert_eq!(
			source.map_event(event),
			vec![ChangeEvent::Rename {
				src: PathBuf::from("/data/a.txt"),
				dst: PathBuf::from("/data/b.txt"),
			}]
		);
	}

	/// A colon-bearing source must drop the rename even though the
	/// destination alone would pass admission.
	#[test]
	fn rename_both_drops_when_source_is_xattr_sidechannel() {
		let mut source = source();
		let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
			.add_path(PathBuf::from("/data/a.txt:stream"))
			.add_path(PathBuf::from("/data/a.txt.new"));

		assert!(source.map_event(event).is_empty());
	}

	#[test]
	fn rename_both_drops_when_dest_is_xattr_sidechannel() {
		let mut source = source();
		let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
			.add_path(PathBuf::from("/data/a.txt"))
			.add_path(PathBuf::from("/data/a.txt:stream"));

		assert!(source.map_event(event).is_empty());
	}

	#[test]
	fn rename_from_to_sequence_dispatches() {
		let mut source = source();
		let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From))).add_path(PathBuf::from("/data/a.txt"));
		assert!(source.map_event(from).is_empty());

		let to = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To))).add_path(PathBuf::from("/data/b.txt"));
		assert_eq!(
			source.map_event(to),
			vec![ChangeEvent::Rename {
				src: PathBuf::from("/data/a.txt"),
				dst: PathBuf::from("/data/b.txt"),
			}]
		);
	}

	#[test]
	fn rename_from_to_drops_when_source_is_xattr_sidechannel() {
		let mut source = source();
		let from =
			Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From))).add_path(PathBuf::from("/data/a.txt:stream"));
		source.map_event(from);

		let to = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To))).add_path(PathBuf::from("/data/b.txt"));
		assert!(source.map_event(to).is_empty());
	}

	#[test]
	fn create_and_remove_are_still_gated_by_admit() {
		let mut source = source();
		let created = Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/data/new.txt"));
		assert_eq!(source.map_event(created), vec![ChangeEvent::Create(PathBuf::from("/data/new.txt"))]);

		let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path(PathBuf::from("/data/gone.txt"));
		assert_eq!(source.map_event(removed), vec![ChangeEvent::Delete(PathBuf::from("/data/gone.txt"))]);
	}

	#[test]
	fn create_drops_xattr_sidechannel() {
		let mut source = source();
		let created = Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/data/a.txt:stream"));
		assert!(source.map_event(created).is_empty());
	}
}

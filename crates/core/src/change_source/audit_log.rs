//! Component E2: tails the Samba `full_audit` VFS module's log for live
//! filesystem changes.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, trace, warn};

use super::{is_xattr_sidechannel, ChangeEvent, ChangeSource};
use crate::config::SambaConfig;

pub struct AuditLogSource {
	path: Option<PathBuf>,
	monitor_sleep_time: Duration,
	reader: Option<BufReader<File>>,
	/// Set once a rotation goes unrecovered within its deadline; the source
	/// then reports 0 changes for the remainder of the process.
	disabled: bool,
}

impl AuditLogSource {
	pub fn new(config: &SambaConfig) -> Self {
		Self {
			path: config.audit_log.clone(),
			monitor_sleep_time: Duration::from_secs(config.monitor_sleep_time.max(1)),
			reader: None,
			disabled: false,
		}
	}

	fn open_at_end(path: &PathBuf) -> std::io::Result<BufReader<File>> {
		let mut file = File::open(path)?;
		file.seek(SeekFrom::End(0))?;
		Ok(BufReader::new(file))
	}

	/// Attempts to recover from a rotated log: reopens at offset 0 if the
	/// file was truncated in place (copytruncate), or polls for a fresh
	/// file at the same name until one appears or `deadline` passes.
	fn recover_from_rotation(&mut self, deadline: Instant) -> bool {
		let Some(path) = self.path.clone() else {
			return false;
		};

		let current_offset = self
			.reader
			.as_mut()
			.and_then(|r| r.stream_position().ok())
			.unwrap_or(0);

		let size_on_disk = std::fs::metadata(&path).map(|meta| meta.len());

		let file_was_rotated = match size_on_disk {
			Ok(size) => current_offset > size,
			Err(_) => true,
		};

		if !file_was_rotated {
			std::thread::sleep(self.monitor_sleep_time);
			return true;
		}

		info!(path = %path.display(), "samba audit log was rotated, reopening");
		self.reader = None;

		while Instant::now() <= deadline {
			match File::open(&path) {
				Ok(file) => {
					info!("samba audit log reopened");
					self.reader = Some(BufReader::new(file));
					return true;
				}
				Err(_) => std::thread::sleep(self.monitor_sleep_time),
			}
		}

		warn!("samba audit log could not be reopened before deadline, disabling monitoring");
		self.disabled = true;
		false
	}

	fn parse_line(line: &str) -> Vec<ChangeEvent> {
		let mut fields = line.trim_end().split('|');
		let _user = fields.next();
		let _ip = fields.next();
		let Some(op) = fields.next() else {
			return Vec::new();
		};
		let Some(status) = fields.next() else {
			return Vec::new();
		};
		if status != "ok" {
			trace!(op, status, "ignoring non-ok audit log entry");
			return Vec::new();
		}

		let rest: Vec<&str> = fields.collect();

		match op {
			"openat" => {
				let [mode, path, ..] = rest[..] else {
					return Vec::new();
				};
				if mode == "w" {
					vec![ChangeEvent::Create(PathBuf::from(path))]
				} else {
					Vec::new()
				}
			}
			"mkdirat" => rest
				.first()
				.map(|path| ChangeEvent::Create(PathBuf::from(path)))
				.into_iter()
				.collect(),
			"unlinkat" => rest
				.first()
				.map(|path| ChangeEvent::Delete(PathBuf::from(path)))
				.into_iter()
				.collect(),
			"renameat" => {
				let [src, dst, ..] = rest[..] else {
					return Vec::new();
				};
				if is_xattr_sidechannel(std::path::Path::new(src)) {
					Vec::new()
				} else {
					vec![ChangeEvent::Rename {
						src: PathBuf::from(src),
						dst: PathBuf::from(dst),
					}]
				}
			}
			_ => Vec::new(),
		}
	}
}

#[async_trait]
impl ChangeSource for AuditLogSource {
	async fn start(&mut self) -> bool {
		if self.disabled {
			return false;
		}

		let Some(path) = self.path.clone() else {
			return false;
		};

		match Self::open_at_end(&path) {
			Ok(reader) => {
				info!(path = %path.display(), "monitoring samba audit log");
				self.reader = Some(reader);
				true
			}
			Err(err) => {
				warn!(path = %path.display(), error = %err, "failed to open samba audit log");
				false
			}
		}
	}

	async fn watch(&mut self, timeout: Duration, on_event: &mut (dyn FnMut(ChangeEvent) + Send)) -> usize {
		if self.disabled || self.reader.is_none() {
			return 0;
		}

		let deadline = Instant::now() + timeout;
		let mut count = 0;

		while Instant::now() <= deadline {
			let mut line = String::new();
			let read = self
				.reader
				.as_mut()
				.map(|reader| reader.read_line(&mut line))
				.unwrap_or(Ok(0));

			match read {
				Ok(0) => {
					if !self.recover_from_rotation(deadline) {
						break;
					}
				}
				Ok(_) => {
					trace!(%line, "got new audit log line");
					for event in Self::parse_line(&line) {
						on_event(event);
						count += 1;
					}
				}
				Err(err) => {
					warn!(error = %err, "failed to read samba audit log");
					break;
				}
			}
		}

		debug!(count, "samba audit log watch cycle finished");
		count
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_create_on_openat_write() {
		let events = AuditLogSource::parse_line("user|10.0.0.1|openat|ok|w|/data/a.txt");
		assert_eq!(events, vec![ChangeEvent::Create(PathBuf::from("/data/a.txt"))]);
	}

	#[test]
	fn ignores_openat_read() {
		let events = AuditLogSource::parse_line("user|10.0.0.1|openat|ok|r|/data/a.txt");
		assert!(events.is_empty());
	}

	#[test]
	fn parses_mkdirat() {
		let events = AuditLogSource::parse_line("user|10.0.0.1|mkdirat|ok|/data/newdir");
		assert_eq!(events, vec![ChangeEvent::Create(PathBuf::from("/data/newdir"))]);
	}

	#[test]
	fn parses_unlinkat() {
		let events = AuditLogSource::parse_line("user|10.0.0.1|unlinkat|ok|/data/gone.txt");
		assert_eq!(events, vec![ChangeEvent::Delete(PathBuf::from("/data/gone.txt"))]);
	}

	#[test]
	fn parses_renameat() {
		let events = AuditLogSource::parse_line("user|10.0.0.1|renameat|ok|/data/old.txt|/data/new.txt");
		assert_eq!(
			events,
			vec![ChangeEvent::Rename {
				src: PathBuf::from("/data/old.txt"),
				dst: PathBuf::from("/data/new.txt"),
			}]
		);
	}

	#[test]
	fn drops_renameat_with_colon_in_source() {
		let events = AuditLogSource::parse_line("user|10.0.0.1|renameat|ok|/data/a.txt:stream|/data/b.txt");
		assert!(events.is_empty());
	}

	#[test]
	fn ignores_non_ok_outcomes() {
		let events = AuditLogSource::parse_line("user|10.0.0.1|unlinkat|fail|/data/gone.txt");
		assert!(events.is_empty());
	}

	#[test]
	fn ignores_unrecognized_operation() {
		let events = AuditLogSource::parse_line("user|10.0.0.1|chmodat|ok|/data/a.txt");
		assert!(events.is_empty());
	}
}

//! The audit-log source resumes after both rotation styles without
//! re-emitting events from before the rotation.

use std::fs;
use std::io::Write;
use std::time::Duration;

use esindexer_core::change_source::{ChangeSource, ChangeEvent};
use esindexer_core::change_source::AuditLogSource;
use esindexer_core::config::SambaConfig;
use tempfile::TempDir;

async fn collect(source: &mut AuditLogSource, timeout: Duration) -> Vec<ChangeEvent> {
	let mut events = Vec::new();
	let mut push = |event| events.push(event);
	source.watch(timeout, &mut push).await;
	events
}

#[tokio::test]
async fn resumes_after_copytruncate_rotation() {
	let dir = TempDir::new().unwrap();
	let log_path = dir.path().join("audit.log");

	{
		let mut file = fs::File::create(&log_path).unwrap();
		writeln!(file, "u|ip|unlinkat|ok|/data/before.txt").unwrap();
	}

	let samba = SambaConfig {
		audit_log: Some(log_path.clone()),
		monitor_sleep_time: 1,
	};
	let mut source = AuditLogSource::new(&samba);
	assert!(source.start().await);

	// copytruncate: file is truncated to a smaller size in place.
	{
		let mut file = fs::OpenOptions::new().write(true).truncate(true).open(&log_path).unwrap();
		writeln!(file, "u|ip|openat|ok|w|/data/after.txt").unwrap();
	}

	let events = collect(&mut source, Duration::from_millis(500)).await;
	assert_eq!(events, vec![ChangeEvent::Create("/data/after.txt".into())]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resumes_after_rename_then_recreate_rotation() {
	let dir = TempDir::new().unwrap();
	let log_path = dir.path().join("audit.log");

	{
		let mut file = fs::File::create(&log_path).unwrap();
		writeln!(file, "u|ip|unlinkat|ok|/data/before.txt").unwrap();
	}

	let samba = SambaConfig {
		audit_log: Some(log_path.clone()),
		monitor_sleep_time: 1,
	};
	let mut source = AuditLogSource::new(&samba);
	assert!(source.start().await);

	let rotated_path = dir.path().join("audit.log.1");
	fs::rename(&log_path, &rotated_path).unwrap();

	let write_task = {
		let log_path = log_path.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(200)).await;
			let mut file = fs::File::create(&log_path).unwrap();
			writeln!(file, "u|ip|mkdirat|ok|/data/newdir").unwrap();
		})
	};

	let events = collect(&mut source, Duration::from_secs(3)).await;
	write_task.await.unwrap();

	assert_eq!(events, vec![ChangeEvent::Create("/data/newdir".into())]);
}

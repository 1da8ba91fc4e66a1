// Copyright 2024-2026 civic-archive contributors.
// This file is part of civic-archive.

// civic-archive is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// civic-archive is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with civic-archive.  If not, see <http://www.gnu.org/licenses/>.

//! small utilities

use std::{fs, io, path::Path, time::Duration};

use futures::FutureExt;

/// Sleep for `duration` unless the stop channel fires (or its sender is
/// dropped) first. Returns true when interrupted.
pub async fn interruptible_sleep(duration: Duration, stop: &flume::Receiver<()>) -> bool {
	let timer = futures_timer::Delay::new(duration).fuse();
	let stopped = stop.recv_async().fuse();
	futures::pin_mut!(timer, stopped);
	futures::select! {
		_ = timer => false,
		_ = stopped => true,
	}
}

/// Create a directory if it doesn't exist yet.
#[cfg(feature = "logging")]
pub fn create_dir(path: &Path) -> io::Result<()> {
	if let Err(e) = fs::create_dir_all(path) {
		if e.kind() != io::ErrorKind::AlreadyExists {
			return Err(e);
		}
	}
	Ok(())
}

/// Platform data directory for logs and scratch state.
#[cfg(feature = "logging")]
pub fn archive_dir() -> io::Result<std::path::PathBuf> {
	let base = dirs::BaseDirs::new()
		.ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no home directory"))?;
	let mut path = base.data_local_dir().to_path_buf();
	path.push("civic_archive");
	Ok(path)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Instant;

	#[test]
	fn sleep_runs_to_completion_without_a_signal() {
		let (_tx, rx) = flume::bounded::<()>(1);
		let started = Instant::now();
		let interrupted = smol::block_on(interruptible_sleep(Duration::from_millis(30), &rx));
		assert!(!interrupted);
		assert!(started.elapsed() >= Duration::from_millis(25));
	}

	#[test]
	fn dropping_the_sender_interrupts_immediately() {
		let (tx, rx) = flume::bounded::<()>(1);
		drop(tx);
		let started = Instant::now();
		let interrupted = smol::block_on(interruptible_sleep(Duration::from_secs(5), &rx));
		assert!(interrupted);
		assert!(started.elapsed() < Duration::from_millis(500));
	}
}

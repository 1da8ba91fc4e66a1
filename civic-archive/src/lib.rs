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

//! Continuously harvests legislative meeting data from municipal civic-tech
//! platforms, deduplicates legislative matters across meetings, extracts the
//! attached documents, drives a batch summarizer and persists everything to
//! PostgreSQL for a read-only API to serve.

#![forbid(unsafe_code)]
#![deny(dead_code)]

mod actors;
pub mod archive;
pub mod database;
pub mod documents;
mod error;
pub mod extract;
pub mod identity;
#[cfg(feature = "logging")]
mod logger;
pub mod matter;
pub mod queue;
pub mod ratelimit;
pub mod summarize;
pub mod sync;
pub mod tasks;
pub mod types;
mod util;
pub mod vendors;

pub use self::actors::{
	run_and_settle, status, sync_and_process_city, sync_city_once, sync_due, ControlConfig, RunMode, StatusReport,
	System, SystemConfig,
};
pub use self::archive::{block_until, Archive, ArchiveBuilder};
pub use self::database::{queries, Database};
pub use self::error::{ArchiveError, Result};
#[cfg(feature = "logging")]
pub use self::logger::init as init_logger;
pub use self::util::interruptible_sleep;

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

use std::path::PathBuf;

use clap::{load_yaml, App};

#[derive(Debug, Clone)]
pub enum Command {
	Daemon,
	Fetcher,
	Processor,
	SyncCity(String),
	SyncAndProcessCity(String),
	Status,
}

#[derive(Debug, Clone)]
pub struct CliOpts {
	pub file: Option<PathBuf>,
	pub log_level: log::LevelFilter,
	pub command: Command,
}

impl CliOpts {
	pub fn parse() -> Self {
		let yaml = load_yaml!("cli_opts.yaml");
		let matches = App::from(yaml).get_matches();
		let log_level = match matches.occurrences_of("verbose") {
			0 | 1 | 2 => log::LevelFilter::Info,
			3 => log::LevelFilter::Debug,
			_ => log::LevelFilter::Trace,
		};
		let file = matches.value_of("config").map(PathBuf::from);

		let command = match matches.subcommand() {
			("daemon", _) | ("", _) => Command::Daemon,
			("fetcher", _) => Command::Fetcher,
			("processor", _) => Command::Processor,
			("sync-city", Some(sub)) => {
				Command::SyncCity(sub.value_of("banana").expect("banana is required").to_string())
			}
			("sync-and-process-city", Some(sub)) => {
				Command::SyncAndProcessCity(sub.value_of("banana").expect("banana is required").to_string())
			}
			("status", _) => Command::Status,
			(other, _) => panic!("unknown subcommand {}", other),
		};

		CliOpts { file, log_level, command }
	}
}

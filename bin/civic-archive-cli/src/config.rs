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

use std::path::Path;

use anyhow::Result;
use serde::Deserialize;

use civic_archive::{ratelimit::RateLimiterConfig, ControlConfig};

use crate::cli_opts::CliOpts;

/// Default endpoint of the pdf extraction sidecar.
const DEFAULT_EXTRACTOR_URL: &str = "http://127.0.0.1:8089/extract";

#[derive(Debug, Clone, Default, Deserialize)]
struct TomlConfig {
	db_url: Option<String>,
	sync_interval_hours: Option<u64>,
	city_concurrency: Option<usize>,
	extract_concurrency: Option<usize>,
	extractor_url: Option<String>,
	summarizer_url: Option<String>,
	enhanced_probe: Option<bool>,
	#[serde(default)]
	rate_limit: Option<RateLimiterConfig>,
}

#[derive(Debug, Clone)]
pub struct Config {
	cli: CliOpts,
	toml: TomlConfig,
}

impl Config {
	pub fn new() -> Result<Self> {
		let cli = CliOpts::parse();
		let toml = cli.file.clone().map(|f| Self::parse_file(f.as_path())).transpose()?.unwrap_or_default();
		log::debug!("{:?}", toml);
		Ok(Self { cli, toml })
	}

	fn parse_file(path: &Path) -> Result<TomlConfig> {
		let toml_str = std::fs::read_to_string(path)?;
		Ok(toml::from_str(toml_str.as_str())?)
	}

	pub fn cli(&self) -> &CliOpts {
		&self.cli
	}

	pub fn db_url(&self) -> Option<String> {
		self.toml.db_url.clone()
	}

	pub fn control(&self) -> ControlConfig {
		let mut control = ControlConfig::default();
		if let Some(hours) = self.toml.sync_interval_hours {
			control.sync_interval_hours = hours;
		}
		if let Some(n) = self.toml.city_concurrency {
			control.city_concurrency = n;
		}
		if let Some(n) = self.toml.extract_concurrency {
			control.extract_concurrency = n;
		}
		control
	}

	pub fn limiter(&self) -> RateLimiterConfig {
		self.toml.rate_limit.clone().unwrap_or_default()
	}

	pub fn extractor_url(&self) -> String {
		self.toml.extractor_url.clone().unwrap_or_else(|| DEFAULT_EXTRACTOR_URL.to_string())
	}

	pub fn summarizer_url(&self) -> Option<String> {
		self.toml.summarizer_url.clone()
	}

	pub fn enhanced_probe(&self) -> bool {
		self.toml.enhanced_probe.unwrap_or(true)
	}

	/// stdout log filter: `LOG_LEVEL` env wins, then `-v` flags.
	pub fn log_level(&self) -> log::LevelFilter {
		match std::env::var("LOG_LEVEL").ok().as_deref() {
			Some("DEBUG") => log::LevelFilter::Debug,
			Some("INFO") => log::LevelFilter::Info,
			Some("WARNING") => log::LevelFilter::Warn,
			Some("ERROR") => log::LevelFilter::Error,
			_ => self.cli.log_level,
		}
	}
}

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

use std::{env, sync::Arc, time::Duration};

use crate::{
	actors::{ControlConfig, RunMode, System, SystemConfig},
	database,
	error::{ArchiveError, Result},
	extract::DocumentExtractor,
	identity::{AttachmentProbe, HttpProbe},
	ratelimit::RateLimiterConfig,
	summarize::Summarizer,
	vendors::AdapterRegistry,
};

const POSTGRES_VAR: &str = "DATABASE_URL";
const LLM_KEY_VAR: &str = "LLM_API_KEY";

/// The control interface of a running archive system.
pub trait Archive {
	/// start driving the sync and processing loops
	fn drive(&mut self) -> Result<()>;

	/// shutdown the system, letting current iterations finish
	fn shutdown(self) -> Result<()>;

	/// Shutdown the system when self is boxed (useful when erasing types)
	fn boxed_shutdown(self: Box<Self>) -> Result<()>;
}

pub struct ArchiveBuilder {
	pg_url: Option<String>,
	mode: RunMode,
	control: ControlConfig,
	limiter: RateLimiterConfig,
	adapters: AdapterRegistry,
	extractor: Option<Arc<dyn DocumentExtractor>>,
	summarizer: Option<Arc<dyn Summarizer>>,
	enhanced_probe: bool,
}

impl Default for ArchiveBuilder {
	fn default() -> Self {
		Self {
			pg_url: None,
			mode: RunMode::Daemon,
			control: ControlConfig::default(),
			limiter: RateLimiterConfig::default(),
			adapters: AdapterRegistry::new(),
			extractor: None,
			summarizer: None,
			enhanced_probe: true,
		}
	}
}

impl ArchiveBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Set the url to the Postgres database.
	///
	/// # Default
	/// defaults to the value of the environment variable DATABASE_URL
	pub fn pg_url<S: Into<String>>(mut self, url: Option<S>) -> Self {
		self.pg_url = url.map(Into::into);
		self
	}

	pub fn mode(mut self, mode: RunMode) -> Self {
		self.mode = mode;
		self
	}

	pub fn control(mut self, control: ControlConfig) -> Self {
		self.control = control;
		self
	}

	pub fn limiter(mut self, limiter: RateLimiterConfig) -> Self {
		self.limiter = limiter;
		self
	}

	pub fn adapters(mut self, adapters: AdapterRegistry) -> Self {
		self.adapters = adapters;
		self
	}

	pub fn extractor(mut self, extractor: Arc<dyn DocumentExtractor>) -> Self {
		self.extractor = Some(extractor);
		self
	}

	/// The summarizer is optional: without one (no LLM_API_KEY) the
	/// processor still runs but fails its jobs non-retryably.
	pub fn summarizer(mut self, summarizer: Option<Arc<dyn Summarizer>>) -> Self {
		self.summarizer = summarizer;
		self
	}

	/// Whether enhanced attachment hashing may issue HEAD probes.
	pub fn enhanced_probe(mut self, enabled: bool) -> Self {
		self.enhanced_probe = enabled;
		self
	}

	/// Resolve configuration, run migrations and return the (not yet
	/// driven) system configuration.
	pub fn build_config(self) -> Result<SystemConfig> {
		let pg_url = match self.pg_url {
			Some(url) => url,
			None => env::var(POSTGRES_VAR)?,
		};
		smol::block_on(database::migrate(&pg_url))?;

		if self.summarizer.is_none() {
			if env::var(LLM_KEY_VAR).is_ok() {
				log::warn!("LLM_API_KEY is set but no summarizer was provided");
			} else {
				log::warn!("no summarizer configured; summarization jobs will fail non-retryably");
			}
		}
		let extractor = self
			.extractor
			.ok_or_else(|| ArchiveError::Validation("an extractor implementation is required".into()))?;

		let probe: Option<Arc<dyn AttachmentProbe>> =
			if self.enhanced_probe { Some(Arc::new(HttpProbe::new()?)) } else { None };

		Ok(SystemConfig {
			pg_url,
			mode: self.mode,
			control: self.control,
			limiter: self.limiter,
			adapters: self.adapters,
			extractor,
			summarizer: self.summarizer,
			probe,
		})
	}

	/// Build and return the running system.
	pub fn build(self) -> Result<impl Archive> {
		let config = self.build_config()?;
		System::new(config)
	}
}

impl Archive for System {
	fn drive(&mut self) -> Result<()> {
		System::drive(self);
		Ok(())
	}

	fn shutdown(self) -> Result<()> {
		System::shutdown(self)
	}

	fn boxed_shutdown(self: Box<Self>) -> Result<()> {
		System::shutdown(*self)
	}
}

/// Block the calling thread until `running` goes false (the front-end's
/// ctrl-c handler flips it).
pub fn block_until(running: &std::sync::atomic::AtomicBool) {
	while running.load(std::sync::atomic::Ordering::SeqCst) {
		std::thread::sleep(Duration::from_millis(100));
	}
}

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

mod cli_opts;
mod config;
mod remote;

use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc,
};

use anyhow::Result;

use civic_archive::{
	block_until, sync_and_process_city, sync_city_once, types::SyncStatus, vendors::AdapterRegistry, Archive,
	ArchiveBuilder, RunMode, SystemConfig,
};

use crate::{
	cli_opts::Command,
	config::Config,
	remote::{HttpExtractor, HttpSummarizer, JsonFeedAdapter},
};

fn main() -> Result<()> {
	let config = Config::new()?;
	civic_archive::init_logger(config.log_level(), log::LevelFilter::Debug)?;

	match config.cli().command.clone() {
		Command::Daemon => run_loops(&config, RunMode::Daemon),
		Command::Fetcher => run_loops(&config, RunMode::Fetcher),
		Command::Processor => run_loops(&config, RunMode::Processor),
		Command::SyncCity(banana) => one_shot(&config, &banana, false),
		Command::SyncAndProcessCity(banana) => one_shot(&config, &banana, true),
		Command::Status => status(&config),
	}
}

fn builder(config: &Config, mode: RunMode) -> Result<ArchiveBuilder> {
	let adapters = AdapterRegistry::new().register("jsonfeed", Arc::new(JsonFeedAdapter::new()?));

	// without credentials the processor runs but marks summarization jobs
	// failed non-retryably
	let summarizer: Option<Arc<dyn civic_archive::summarize::Summarizer>> =
		match (config.summarizer_url(), std::env::var("LLM_API_KEY").ok()) {
			(Some(url), Some(key)) => Some(Arc::new(HttpSummarizer::new(url, key)?)),
			_ => None,
		};

	Ok(ArchiveBuilder::new()
		.pg_url(config.db_url())
		.mode(mode)
		.control(config.control())
		.limiter(config.limiter())
		.adapters(adapters)
		.extractor(Arc::new(HttpExtractor::new(config.extractor_url())?))
		.summarizer(summarizer)
		.enhanced_probe(config.enhanced_probe()))
}

fn system_config(config: &Config, mode: RunMode) -> Result<SystemConfig> {
	Ok(builder(config, mode)?.build_config()?)
}

fn run_loops(config: &Config, mode: RunMode) -> Result<()> {
	let mut archive = builder(config, mode)?.build()?;
	archive.drive()?;

	let running = Arc::new(AtomicBool::new(true));
	let r = running.clone();
	ctrlc::set_handler(move || {
		r.store(false, Ordering::SeqCst);
	})
	.expect("Error setting Ctrl-C handler");
	block_until(&running);

	archive.shutdown()?;
	Ok(())
}

fn one_shot(config: &Config, banana: &str, drain: bool) -> Result<()> {
	let conf = system_config(config, RunMode::Fetcher)?;
	let result = if drain {
		let (result, drained) = smol::block_on(sync_and_process_city(&conf, banana))?;
		println!("drained {} jobs for {}", drained, banana);
		result
	} else {
		smol::block_on(sync_city_once(&conf, banana))?
	};

	println!(
		"{}: {} meetings found, {} processed, {} items stored in {:.1}s",
		result.banana, result.meetings_found, result.meetings_processed, result.items_stored, result.duration_seconds
	);
	if result.status == SyncStatus::Failed {
		eprintln!("sync failed: {}", result.error.as_deref().unwrap_or("unknown error"));
		std::process::exit(1);
	}
	Ok(())
}

fn status(config: &Config) -> Result<()> {
	let conf = system_config(config, RunMode::Processor)?;
	let report = smol::block_on(civic_archive::status(&conf))?;
	println!("queue: {}", report.queue);
	for city in &report.cities {
		match city.last_synced_at {
			Some(at) => println!("{:<24} last synced {}", city.banana, at.format("%Y-%m-%d %H:%M UTC")),
			None => println!("{:<24} never synced", city.banana),
		}
	}
	Ok(())
}

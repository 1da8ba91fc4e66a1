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

//! The conductor. `System` owns the sync loop and the processing loop as
//! independent tasks sharing one cooperative shutdown signal; each loop
//! finishes its current iteration on shutdown and in-flight leases are left
//! for the next start's stale-lease recovery.

mod workers;

use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use serde::Deserialize;
use xtra::{prelude::*, spawn::Smol};

pub use self::workers::{sync_due, DatabaseActor, FetcherActor, SyncAll, CITY_SYNC_CONCURRENCY};
use crate::{
	database::{queries, queries::CitySyncInfo, Database},
	error::{ArchiveError, Result},
	extract::DocumentExtractor,
	identity::{AttachmentHasher, AttachmentProbe},
	queue::{Queue, QueueStats, ERROR_BACKOFF, POLL_BACKOFF, POLL_INTERVAL, STALE_LEASE_AGE},
	ratelimit::{RateLimiter, RateLimiterConfig},
	summarize::Summarizer,
	sync::SyncOrchestrator,
	tasks::Environment,
	types::{Die, SyncResult},
	util::interruptible_sleep,
	vendors::AdapterRegistry,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
	/// Sync loop and processing loop together.
	Daemon,
	/// Sync loop only.
	Fetcher,
	/// Processing loop only.
	Processor,
}

impl RunMode {
	pub fn fetches(&self) -> bool {
		matches!(self, RunMode::Daemon | RunMode::Fetcher)
	}

	pub fn processes(&self) -> bool {
		matches!(self, RunMode::Daemon | RunMode::Processor)
	}
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct ControlConfig {
	/// Hours between scheduled sync passes.
	#[serde(default = "default_sync_interval_hours")]
	pub sync_interval_hours: u64,
	/// Concurrent city syncs within a vendor partition.
	#[serde(default = "default_city_concurrency")]
	pub city_concurrency: usize,
	/// Concurrent document extractions within one meeting.
	#[serde(default = "default_extract_concurrency")]
	pub extract_concurrency: usize,
}

impl Default for ControlConfig {
	fn default() -> Self {
		Self {
			sync_interval_hours: default_sync_interval_hours(),
			city_concurrency: default_city_concurrency(),
			extract_concurrency: default_extract_concurrency(),
		}
	}
}

const fn default_sync_interval_hours() -> u64 {
	24
}

const fn default_city_concurrency() -> usize {
	CITY_SYNC_CONCURRENCY
}

fn default_extract_concurrency() -> usize {
	num_cpus::get().min(8)
}

/// Everything the actors need, provided by the front-end.
#[derive(Clone)]
pub struct SystemConfig {
	pub pg_url: String,
	pub mode: RunMode,
	pub control: ControlConfig,
	pub limiter: RateLimiterConfig,
	pub adapters: AdapterRegistry,
	pub extractor: Arc<dyn DocumentExtractor>,
	pub summarizer: Option<Arc<dyn Summarizer>>,
	pub probe: Option<Arc<dyn AttachmentProbe>>,
}

impl SystemConfig {
	fn hasher(&self) -> AttachmentHasher {
		match &self.probe {
			Some(probe) => AttachmentHasher::with_probe(probe.clone()),
			None => AttachmentHasher::new(),
		}
	}

	fn environment(&self, db: &Database, queue: &Queue) -> Environment {
		Environment::new(
			db.clone(),
			queue.clone(),
			self.extractor.clone(),
			self.summarizer.clone(),
			self.hasher(),
			self.control.extract_concurrency,
		)
	}

	fn orchestrator(&self, db: &Database, queue: &Queue) -> SyncOrchestrator {
		SyncOrchestrator::new(db.clone(), queue.clone(), self.hasher())
	}
}

struct Actors {
	db: Address<DatabaseActor>,
	fetcher: Option<Address<FetcherActor>>,
}

/// Control the execution of the harvesting engine. Will exit on Drop.
pub struct System {
	start_tx: flume::Sender<()>,
	kill_tx: flume::Sender<()>,
	/// handle to the runtime driving the loops
	handle: Option<jod_thread::JoinHandle<Result<()>>>,
}

impl System {
	pub fn new(config: SystemConfig) -> Result<Self> {
		let (start_tx, kill_tx, handle) = Self::start(config);
		Ok(Self { start_tx, kill_tx, handle: Some(handle) })
	}

	pub fn drive(&self) {
		self.start_tx.send(()).expect("Could not start system");
	}

	/// Spawn the driver thread; it blocks until `drive` is called.
	fn start(conf: SystemConfig) -> (flume::Sender<()>, flume::Sender<()>, jod_thread::JoinHandle<Result<()>>) {
		let (tx_start, rx_start) = flume::bounded(1);
		let (tx_kill, rx_kill) = flume::bounded(1);

		let handle = jod_thread::spawn(move || {
			// block until we receive the message to start
			let _ = rx_start.recv();
			smol::block_on(Self::main_loop(conf, rx_kill))?;
			Ok(())
		});

		(tx_start, tx_kill, handle)
	}

	async fn main_loop(conf: SystemConfig, rx_kill: flume::Receiver<()>) -> Result<()> {
		let db = Database::new(&conf.pg_url).await?;
		let queue = Queue::new(db.pool().clone());

		// one cooperative stop signal for every loop; dropping the sender
		// trips all of them
		let (stop_tx, stop_rx) = flume::unbounded::<()>();
		let actors = Self::spawn_actors(&conf, &db, &queue, stop_rx.clone());

		let mut loops = Vec::new();
		if let Some(fetcher) = actors.fetcher.clone() {
			let interval = Duration::from_secs(conf.control.sync_interval_hours * 3600);
			loops.push(smol::spawn(sync_loop(fetcher, interval, stop_rx.clone())));
		}
		if conf.mode.processes() {
			queue.recover_stale(STALE_LEASE_AGE).await?;
			let env = Arc::new(conf.environment(&db, &queue));
			loops.push(smol::spawn(process_loop(env, stop_rx.clone())));
		}

		let _ = rx_kill.recv_async().await;
		log::info!("shutdown requested, letting loops finish their iteration");
		drop(stop_tx);
		join_all(loops).await;
		Self::kill_actors(actors).await;
		log::info!("shutdown complete");
		Ok(())
	}

	fn spawn_actors(conf: &SystemConfig, db: &Database, queue: &Queue, stop: flume::Receiver<()>) -> Actors {
		let db_addr = DatabaseActor::new(db.clone()).create(None).spawn(&mut Smol::Global);
		let fetcher = conf.mode.fetches().then(|| {
			FetcherActor::new(
				db.clone(),
				db_addr.clone(),
				Arc::new(conf.orchestrator(db, queue)),
				conf.adapters.clone(),
				Arc::new(RateLimiter::new(conf.limiter.clone())),
				conf.control.city_concurrency,
				stop,
			)
			.create(None)
			.spawn(&mut Smol::Global)
		});
		Actors { db: db_addr, fetcher }
	}

	async fn kill_actors(actors: Actors) {
		if let Some(fetcher) = actors.fetcher {
			let _ = fetcher.send(Die).await;
		}
		let _ = actors.db.send(Die).await;
	}

	/// Trip the shutdown signal and wait for the driver thread.
	pub fn shutdown(mut self) -> Result<()> {
		let _ = self.kill_tx.send(());
		if let Some(handle) = self.handle.take() {
			handle.join()?;
		}
		Ok(())
	}
}

/// `sync -> sleep 24h` forever. The sleep is interruptible, so shutdown
/// never waits for the next tick.
async fn sync_loop(fetcher: Address<FetcherActor>, interval: Duration, stop: flume::Receiver<()>) {
	loop {
		match fetcher.send(SyncAll).await {
			Ok(Ok(results)) => log::info!("sync pass finished: {} cities", results.len()),
			Ok(Err(e)) => log::error!("sync pass failed: {}", e),
			Err(_) => break,
		}
		if interruptible_sleep(interval, &stop).await {
			break;
		}
	}
	log::debug!("sync loop stopped");
}

/// `lease -> process -> complete` forever, with the spec'd backoffs. The
/// current job always runs to completion before a shutdown is honored.
async fn process_loop(env: Arc<Environment>, stop: flume::Receiver<()>) {
	let worker = format!("processor-{}", std::process::id());
	log::info!("{} starting", worker);
	loop {
		if stop.is_disconnected() {
			break;
		}
		let job = match env.queue().lease(&worker).await {
			Ok(job) => job,
			Err(e) => {
				log::error!("queue lease failed: {}; backing off", e);
				if interruptible_sleep(POLL_BACKOFF, &stop).await {
					break;
				}
				continue;
			}
		};
		let job = match job {
			Some(job) => job,
			None => {
				if interruptible_sleep(POLL_INTERVAL, &stop).await {
					break;
				}
				continue;
			}
		};

		match run_and_settle(&env, &job).await {
			Ok(true) => {}
			Ok(false) => {
				// give a failing dependency a moment before the next lease
				if interruptible_sleep(ERROR_BACKOFF, &stop).await {
					break;
				}
			}
			Err(e) => {
				log::error!("job {} settlement failed: {}; backing off", job.id, e);
				if interruptible_sleep(ERROR_BACKOFF, &stop).await {
					break;
				}
			}
		}
	}
	log::info!("{} stopped", worker);
}

/// Run one job and route its outcome back to the queue; returns whether the
/// job succeeded. Only queue/database errors escape; handler errors are
/// settled via `fail`.
pub async fn run_and_settle(env: &Environment, job: &crate::queue::QueueJob) -> Result<bool> {
	match env.run_job(job).await {
		Ok(()) => {
			env.queue().complete(job.id).await?;
			Ok(true)
		}
		Err(e) => {
			let retryable = e.is_retryable();
			log::warn!("job {} ({}) failed (retryable: {}): {}", job.id, job.dedup_key, retryable, e);
			env.queue().fail(job.id, &e.to_string(), retryable).await?;
			Ok(false)
		}
	}
}

/// One-shot sync of a single city, bypassing the schedule policy.
pub async fn sync_city_once(conf: &SystemConfig, banana: &str) -> Result<SyncResult> {
	let db = Database::new(&conf.pg_url).await?;
	let queue = Queue::new(db.pool().clone());
	let orchestrator = conf.orchestrator(&db, &queue);
	let limiter = RateLimiter::new(conf.limiter.clone());

	let mut conn = db.conn().await?;
	let city = queries::city_by_banana(&mut conn, banana)
		.await?
		.ok_or_else(|| ArchiveError::Validation(format!("unknown city {}", banana)))?;
	let result = workers::sync_city(&orchestrator, &conf.adapters, &limiter, &city).await;
	if result.error.is_none() {
		crate::database::touch_city_sync(&mut conn, banana, chrono::Utc::now()).await?;
	}
	Ok(result)
}

/// Sync one city, then drain that city's queued jobs to completion.
pub async fn sync_and_process_city(conf: &SystemConfig, banana: &str) -> Result<(SyncResult, u64)> {
	let result = sync_city_once(conf, banana).await?;

	let db = Database::new(&conf.pg_url).await?;
	let queue = Queue::new(db.pool().clone());
	let env = conf.environment(&db, &queue);
	let worker = format!("oneshot-{}", std::process::id());

	let mut drained = 0;
	while let Some(job) = queue.lease_for_city(&worker, banana).await? {
		run_and_settle(&env, &job).await?;
		drained += 1;
	}
	Ok((result, drained))
}

/// Queue stats plus per-city sync recency, for the `status` command.
pub struct StatusReport {
	pub queue: QueueStats,
	pub cities: Vec<CitySyncInfo>,
}

pub async fn status(conf: &SystemConfig) -> Result<StatusReport> {
	let db = Database::new(&conf.pg_url).await?;
	let queue = Queue::new(db.pool().clone());
	let stats = queue.stats().await?;
	let mut conn = db.conn().await?;
	let cities = queries::sync_times(&mut conn).await?;
	Ok(StatusReport { queue: stats, cities })
}

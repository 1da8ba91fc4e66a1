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

//! The sync scheduler. A pass partitions active cities by vendor, orders
//! everything by recent meeting activity, runs a small worker pool per
//! partition under the vendor rate limiter, and goes idle for half a minute
//! between partitions so no platform sees back-to-back bursts.

use std::{
	collections::hash_map::DefaultHasher,
	hash::{Hash, Hasher as _},
	sync::Arc,
	time::{Duration, Instant},
};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::StreamExt;
use hashbrown::HashMap;
use parking_lot::Mutex;
use xtra::prelude::*;

use super::DatabaseActor;
use crate::{
	database::{queries, Database},
	error::Result,
	ratelimit::RateLimiter,
	sync::SyncOrchestrator,
	types::{City, Die, SyncResult, SyncStatus},
	util::interruptible_sleep,
	vendors::AdapterRegistry,
};

/// Concurrent city syncs within one vendor partition.
pub const CITY_SYNC_CONCURRENCY: usize = 2;

/// Base idle period between vendor partitions; a deterministic jitter of up
/// to ten seconds is added per vendor.
pub const PARTITION_IDLE: Duration = Duration::from_secs(30);

/// Fallback lookback for cities that have never been synced.
const FIRST_SYNC_LOOKBACK_DAYS: i64 = 90;

/// Is a city due for a sync under the activity-based schedule policy?
/// High-activity cities refresh twice a day, sleepy ones weekly, and a city
/// that has never synced is always due.
pub fn sync_due(activity_30d: i64, last_synced: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
	let last = match last_synced {
		None => return true,
		Some(t) => t,
	};
	let interval = if activity_30d >= 8 {
		ChronoDuration::hours(12)
	} else if activity_30d >= 4 {
		ChronoDuration::hours(24)
	} else {
		ChronoDuration::days(7)
	};
	now - last >= interval
}

/// Group cities by vendor; partitions and the cities inside them are both
/// ordered by 30-day meeting activity, busiest first.
pub fn partition_by_vendor(cities: Vec<City>, activity: &HashMap<String, i64>) -> Vec<(String, Vec<City>)> {
	let mut by_vendor: HashMap<String, Vec<City>> = HashMap::new();
	for city in cities {
		by_vendor.entry(city.vendor.clone()).or_default().push(city);
	}
	let mut partitions: Vec<(String, Vec<City>)> = by_vendor.into_iter().collect();
	for (_, cities) in partitions.iter_mut() {
		cities.sort_by_key(|c| std::cmp::Reverse(activity.get(&c.banana).copied().unwrap_or(0)));
	}
	partitions.sort_by_key(|(_, cities)| {
		std::cmp::Reverse(cities.iter().map(|c| activity.get(&c.banana).copied().unwrap_or(0)).sum::<i64>())
	});
	partitions
}

/// 30s + up to 10s, derived from the vendor name so a fleet of fetchers
/// spreads out without shared state.
pub fn partition_idle(vendor: &str) -> Duration {
	let mut hasher = DefaultHasher::new();
	vendor.hash(&mut hasher);
	PARTITION_IDLE + Duration::from_secs(hasher.finish() % 10)
}

/// Sync one city end to end: rate-limited vendor fetch, then orchestrated
/// ingest. Never panics the pass; failures come back as a failed
/// [`SyncResult`].
pub async fn sync_city(
	orchestrator: &SyncOrchestrator,
	adapters: &AdapterRegistry,
	limiter: &RateLimiter,
	city: &City,
) -> SyncResult {
	let started = Instant::now();
	let adapter = match adapters.get(&city.vendor) {
		Ok(adapter) => adapter,
		Err(e) => return SyncResult::failed(&city.banana, e, started.elapsed().as_secs_f64()),
	};
	limiter.wait_if_needed(&city.vendor).await;

	let since = city
		.last_synced_at
		.unwrap_or_else(|| Utc::now() - ChronoDuration::days(FIRST_SYNC_LOOKBACK_DAYS));
	let drafts = match adapter.fetch_meetings(city, since).await {
		Ok(drafts) => drafts,
		Err(e) => return SyncResult::failed(&city.banana, e, started.elapsed().as_secs_f64()),
	};

	let found = drafts.len();
	match orchestrator.ingest(city, drafts).await {
		Ok(stats) => SyncResult {
			banana: city.banana.clone(),
			status: SyncStatus::Success,
			meetings_found: found,
			meetings_processed: stats.meetings_stored,
			items_stored: stats.items_stored,
			duration_seconds: started.elapsed().as_secs_f64(),
			error: None,
		},
		Err(e) => SyncResult::failed(&city.banana, e, started.elapsed().as_secs_f64()),
	}
}

pub struct FetcherActor {
	db: Database,
	db_addr: Address<DatabaseActor>,
	orchestrator: Arc<SyncOrchestrator>,
	adapters: AdapterRegistry,
	limiter: Arc<RateLimiter>,
	city_concurrency: usize,
	stop: flume::Receiver<()>,
}

impl FetcherActor {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		db: Database,
		db_addr: Address<DatabaseActor>,
		orchestrator: Arc<SyncOrchestrator>,
		adapters: AdapterRegistry,
		limiter: Arc<RateLimiter>,
		city_concurrency: usize,
		stop: flume::Receiver<()>,
	) -> Self {
		Self { db, db_addr, orchestrator, adapters, limiter, city_concurrency, stop }
	}

	async fn sync_pass(&self) -> Result<Vec<SyncResult>> {
		let mut conn = self.db.conn().await?;
		let cities = queries::active_cities(&mut conn).await?;
		let activity = queries::meeting_counts_30d(&mut conn).await?;
		drop(conn);

		let now = Utc::now();
		let total = cities.len();
		let due: Vec<City> = cities
			.into_iter()
			.filter(|c| sync_due(activity.get(&c.banana).copied().unwrap_or(0), c.last_synced_at, now))
			.collect();
		log::info!("sync pass: {}/{} cities due", due.len(), total);

		let partitions = partition_by_vendor(due, &activity);
		let results = Mutex::new(Vec::new());
		for (index, (vendor, cities)) in partitions.iter().enumerate() {
			if index > 0 && interruptible_sleep(partition_idle(vendor), &self.stop).await {
				log::info!("sync pass interrupted between partitions");
				break;
			}
			if self.stop.is_disconnected() {
				break;
			}
			log::info!("syncing {} cities on vendor `{}`", cities.len(), vendor);
			futures::stream::iter(cities)
				.for_each_concurrent(self.city_concurrency, |city| async {
					let result = sync_city(&self.orchestrator, &self.adapters, &self.limiter, city).await;
					let _ = self.db_addr.do_send(result.clone());
					results.lock().push(result);
				})
				.await;
		}

		let results = results.into_inner();
		let failed: Vec<&str> =
			results.iter().filter(|r| r.status == SyncStatus::Failed).map(|r| r.banana.as_str()).collect();
		if !failed.is_empty() {
			log::warn!("sync pass finished with {} failed cities: {}", failed.len(), failed.join(", "));
		}
		Ok(results)
	}
}

impl Actor for FetcherActor {}

/// Run a full scheduled sync pass.
pub struct SyncAll;
impl Message for SyncAll {
	type Result = Result<Vec<SyncResult>>;
}

#[async_trait::async_trait]
impl Handler<SyncAll> for FetcherActor {
	async fn handle(&mut self, _: SyncAll, _: &mut Context<Self>) -> Result<Vec<SyncResult>> {
		self.sync_pass().await
	}
}

#[async_trait::async_trait]
impl Handler<Die> for FetcherActor {
	async fn handle(&mut self, _: Die, ctx: &mut Context<Self>) {
		ctx.stop();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	fn city(banana: &str, vendor: &str, last_synced: Option<DateTime<Utc>>) -> City {
		City {
			banana: banana.into(),
			name: banana.into(),
			state: "CA".into(),
			vendor: vendor.into(),
			config: serde_json::json!({}),
			active: true,
			last_synced_at: last_synced,
		}
	}

	#[test]
	fn never_synced_is_always_due() {
		let now = Utc::now();
		assert!(sync_due(0, None, now));
		assert!(sync_due(20, None, now));
	}

	#[test]
	fn schedule_policy_tiers() {
		let now = chrono::Utc.ymd(2025, 11, 10).and_hms(12, 0, 0);
		let hours = |h: i64| Some(now - ChronoDuration::hours(h));
		// high activity: every 12h
		assert!(!sync_due(9, hours(11), now));
		assert!(sync_due(9, hours(12), now));
		// medium: every 24h
		assert!(!sync_due(5, hours(23), now));
		assert!(sync_due(5, hours(25), now));
		// low: weekly
		assert!(!sync_due(2, hours(24 * 6), now));
		assert!(sync_due(2, hours(24 * 7), now));
	}

	#[test]
	fn partitions_order_by_activity() {
		let mut activity = HashMap::new();
		activity.insert("bigCA".to_string(), 12i64);
		activity.insert("midCA".to_string(), 5i64);
		activity.insert("smallCA".to_string(), 1i64);
		let cities = vec![
			city("smallCA", "granicus", None),
			city("bigCA", "legistar", None),
			city("midCA", "legistar", None),
		];
		let partitions = partition_by_vendor(cities, &activity);
		assert_eq!(partitions.len(), 2);
		assert_eq!(partitions[0].0, "legistar");
		let legistar: Vec<&str> = partitions[0].1.iter().map(|c| c.banana.as_str()).collect();
		assert_eq!(legistar, vec!["bigCA", "midCA"]);
	}

	#[test]
	fn partition_idle_stays_in_band() {
		for vendor in ["legistar", "granicus", "civicplus", "primegov"] {
			let idle = partition_idle(vendor);
			assert!(idle >= Duration::from_secs(30) && idle < Duration::from_secs(40));
		}
		assert_eq!(partition_idle("legistar"), partition_idle("legistar"));
	}
}

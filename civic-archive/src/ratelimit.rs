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

//! Per-vendor request pacing. Each vendor gets a token bucket refilled at
//! one token per configured delay; callers block cooperatively until a token
//! is available. State is process-local; horizontal scaling of fetchers needs
//! external rate state instead.
//!
//! The 30-40s idle period between vendor partitions is the fetcher's
//! responsibility, not this limiter's.

use std::{
	collections::HashMap,
	time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde::Deserialize;

/// Default spacing between requests to the same vendor.
const DEFAULT_DELAY: Duration = Duration::from_secs(4);

#[derive(Clone, Debug, Deserialize)]
pub struct RateLimiterConfig {
	/// Seconds between requests to a vendor without an explicit entry.
	#[serde(default = "default_delay_secs")]
	pub default_delay_secs: f64,
	/// Requests a vendor may burst through without waiting.
	#[serde(default = "default_burst")]
	pub burst: u32,
	/// Vendor name -> seconds between requests.
	#[serde(default)]
	pub vendor_delay_secs: HashMap<String, f64>,
}

fn default_delay_secs() -> f64 {
	DEFAULT_DELAY.as_secs_f64()
}

const fn default_burst() -> u32 {
	1
}

impl Default for RateLimiterConfig {
	fn default() -> Self {
		Self { default_delay_secs: default_delay_secs(), burst: default_burst(), vendor_delay_secs: HashMap::new() }
	}
}

struct Bucket {
	tokens: f64,
	last_refill: Instant,
}

pub struct RateLimiter {
	config: RateLimiterConfig,
	buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
	pub fn new(config: RateLimiterConfig) -> Self {
		Self { config, buckets: Mutex::new(HashMap::new()) }
	}

	fn delay_for(&self, vendor: &str) -> Duration {
		let secs = self.config.vendor_delay_secs.get(vendor).copied().unwrap_or(self.config.default_delay_secs);
		Duration::from_secs_f64(secs.max(0.001))
	}

	/// Take a token for `vendor`, waiting for the bucket to refill if it is
	/// empty. Returns how long the caller was held.
	pub async fn wait_if_needed(&self, vendor: &str) -> Duration {
		let start = Instant::now();
		let delay = self.delay_for(vendor);
		let burst = f64::from(self.config.burst.max(1));

		loop {
			let wait = {
				let mut buckets = self.buckets.lock();
				let bucket = buckets
					.entry(vendor.to_string())
					.or_insert_with(|| Bucket { tokens: burst, last_refill: Instant::now() });

				let elapsed = bucket.last_refill.elapsed();
				bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() / delay.as_secs_f64()).min(burst);
				bucket.last_refill = Instant::now();

				if bucket.tokens >= 1.0 {
					bucket.tokens -= 1.0;
					None
				} else {
					Some(delay.mul_f64(1.0 - bucket.tokens))
				}
			};

			match wait {
				None => return start.elapsed(),
				Some(wait) => {
					log::debug!("rate limiter holding {} request for {:?}", vendor, wait);
					smol::Timer::after(wait).await;
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn limiter(delay_ms: u64, burst: u32) -> RateLimiter {
		RateLimiter::new(RateLimiterConfig {
			default_delay_secs: delay_ms as f64 / 1000.0,
			burst,
			vendor_delay_secs: HashMap::new(),
		})
	}

	#[test]
	fn first_request_is_immediate() {
		let limiter = limiter(50, 1);
		let held = smol::block_on(limiter.wait_if_needed("legistar"));
		assert!(held < Duration::from_millis(10));
	}

	#[test]
	fn second_request_waits_for_the_refill() {
		let limiter = limiter(50, 1);
		smol::block_on(async {
			limiter.wait_if_needed("legistar").await;
			let held = limiter.wait_if_needed("legistar").await;
			assert!(held >= Duration::from_millis(40), "held only {:?}", held);
		});
	}

	#[test]
	fn burst_allowance_passes_without_waiting() {
		let limiter = limiter(50, 3);
		smol::block_on(async {
			for _ in 0..3 {
				let held = limiter.wait_if_needed("granicus").await;
				assert!(held < Duration::from_millis(10));
			}
			let held = limiter.wait_if_needed("granicus").await;
			assert!(held >= Duration::from_millis(40));
		});
	}

	#[test]
	fn vendors_do_not_share_buckets() {
		let limiter = limiter(50, 1);
		smol::block_on(async {
			limiter.wait_if_needed("legistar").await;
			let held = limiter.wait_if_needed("civicplus").await;
			assert!(held < Duration::from_millis(10));
		});
	}
}

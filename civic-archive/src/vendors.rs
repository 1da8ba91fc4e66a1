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

//! Vendor adapter contract. Each civic platform (Legistar, Granicus,
//! CivicPlus, ...) is wrapped by an adapter that normalizes its agenda data
//! into [`MeetingDraft`]s; parsing specifics stay out of the core.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hashbrown::HashMap;

use crate::{
	error::{ArchiveError, Result},
	types::{City, MeetingDraft},
};

#[async_trait::async_trait]
pub trait VendorAdapter: Send + Sync {
	/// Fetch every meeting for `city` scheduled or updated since `since`.
	async fn fetch_meetings(&self, city: &City, since: DateTime<Utc>) -> Result<Vec<MeetingDraft>>;
}

/// Adapters keyed by the vendor name carried on the city row.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
	adapters: HashMap<String, Arc<dyn VendorAdapter>>,
}

impl AdapterRegistry {
	pub fn new() -> Self {
		Self { adapters: HashMap::new() }
	}

	pub fn register<S: Into<String>>(mut self, vendor: S, adapter: Arc<dyn VendorAdapter>) -> Self {
		self.adapters.insert(vendor.into(), adapter);
		self
	}

	pub fn get(&self, vendor: &str) -> Result<&Arc<dyn VendorAdapter>> {
		self.adapters.get(vendor).ok_or_else(|| ArchiveError::UnknownVendor(vendor.to_string()))
	}

	pub fn vendors(&self) -> impl Iterator<Item = &str> {
		self.adapters.keys().map(String::as_str)
	}

	pub fn is_empty(&self) -> bool {
		self.adapters.is_empty()
	}
}

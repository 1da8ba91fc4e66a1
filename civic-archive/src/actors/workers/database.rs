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

//! Bookkeeping writes that don't belong to any one sync worker: per-city
//! sync recency and failure logging funnel through this actor.

use chrono::Utc;
use xtra::prelude::*;

use crate::{
	database::{self, Database},
	error::Result,
	types::{Die, SyncResult, SyncStatus},
};

#[derive(Clone)]
pub struct DatabaseActor {
	db: Database,
}

impl DatabaseActor {
	pub fn new(db: Database) -> Self {
		Self { db }
	}

	async fn record_sync(&self, result: &SyncResult) -> Result<()> {
		let mut conn = self.db.conn().await?;
		database::touch_city_sync(&mut conn, &result.banana, Utc::now()).await?;
		Ok(())
	}
}

impl Actor for DatabaseActor {}

#[async_trait::async_trait]
impl Handler<SyncResult> for DatabaseActor {
	async fn handle(&mut self, result: SyncResult, _: &mut Context<Self>) {
		match result.status {
			SyncStatus::Success => {
				log::info!(
					"synced {}: {} meetings found, {} processed, {} items in {:.1}s",
					result.banana,
					result.meetings_found,
					result.meetings_processed,
					result.items_stored,
					result.duration_seconds
				);
				if let Err(e) = self.record_sync(&result).await {
					log::error!("failed to record sync time for {}: {}", result.banana, e);
				}
			}
			SyncStatus::Failed => {
				log::warn!(
					"sync failed for {}: {}",
					result.banana,
					result.error.as_deref().unwrap_or("unknown error")
				);
			}
			SyncStatus::Skipped => {}
		}
	}
}

#[async_trait::async_trait]
impl Handler<Die> for DatabaseActor {
	async fn handle(&mut self, _: Die, ctx: &mut Context<Self>) {
		ctx.stop();
	}
}

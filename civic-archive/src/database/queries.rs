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

//! Common SQL queries on the archive database abstracted into rust functions

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use sqlx::{FromRow, PgConnection};

use crate::{
	database::models::{AgendaItemModel, CityModel, MatterModel, MeetingModel},
	error::Result,
	types::{AgendaItem, City, Matter, Meeting},
};

/// Return type of queries that `SELECT banana, COUNT(*)`
#[derive(FromRow)]
struct BananaCount {
	banana: String,
	count: i64,
}

/// Return type of queries that `SELECT banana, last_synced_at`
#[derive(FromRow)]
pub struct CitySyncInfo {
	pub banana: String,
	pub last_synced_at: Option<DateTime<Utc>>,
}

/// Return type of queries that `SELECT item_id`
#[derive(FromRow)]
struct ItemId {
	item_id: String,
}

pub async fn active_cities(conn: &mut PgConnection) -> Result<Vec<City>> {
	let rows = sqlx::query_as::<_, CityModel>(
		"SELECT banana, name, state, vendor, config, active, last_synced_at
		 FROM cities WHERE active ORDER BY banana",
	)
	.fetch_all(conn)
	.await?;
	Ok(rows.into_iter().map(Into::into).collect())
}

pub async fn city_by_banana(conn: &mut PgConnection, banana: &str) -> Result<Option<City>> {
	let row = sqlx::query_as::<_, CityModel>(
		"SELECT banana, name, state, vendor, config, active, last_synced_at
		 FROM cities WHERE banana = $1",
	)
	.bind(banana)
	.fetch_optional(conn)
	.await?;
	Ok(row.map(Into::into))
}

/// Meetings per city over the trailing 30 days; the activity signal behind
/// both partition ordering and the sync schedule policy.
pub async fn meeting_counts_30d(conn: &mut PgConnection) -> Result<HashMap<String, i64>> {
	let rows = sqlx::query_as::<_, BananaCount>(
		"SELECT banana, COUNT(*) as count FROM meetings
		 WHERE date > now() - interval '30 days'
		 GROUP BY banana",
	)
	.fetch_all(conn)
	.await?;
	Ok(rows.into_iter().map(|r| (r.banana, r.count)).collect())
}

pub async fn get_meeting(conn: &mut PgConnection, id: &str) -> Result<Option<Meeting>> {
	let row = sqlx::query_as::<_, MeetingModel>(
		"SELECT id, banana, vendor_meeting_key, title, date, agenda_url, packet_url,
		        summary, topics, participation, processing_status
		 FROM meetings WHERE id = $1",
	)
	.bind(id)
	.fetch_optional(conn)
	.await?;
	Ok(row.map(Into::into))
}

pub async fn meeting_items(conn: &mut PgConnection, meeting_id: &str) -> Result<Vec<AgendaItem>> {
	let rows = sqlx::query_as::<_, AgendaItemModel>(
		"SELECT id, meeting_id, sequence, vendor_item_key, title, attachments,
		        matter_id, summary, topics, filter_reason
		 FROM agenda_items WHERE meeting_id = $1 ORDER BY sequence",
	)
	.bind(meeting_id)
	.fetch_all(conn)
	.await?;
	Ok(rows.into_iter().map(Into::into).collect())
}

pub async fn items_by_ids(conn: &mut PgConnection, ids: &[String]) -> Result<Vec<AgendaItem>> {
	let rows = sqlx::query_as::<_, AgendaItemModel>(
		"SELECT id, meeting_id, sequence, vendor_item_key, title, attachments,
		        matter_id, summary, topics, filter_reason
		 FROM agenda_items WHERE id = ANY($1) ORDER BY sequence",
	)
	.bind(ids)
	.fetch_all(conn)
	.await?;
	Ok(rows.into_iter().map(Into::into).collect())
}

pub async fn get_matter(conn: &mut PgConnection, id: &str) -> Result<Option<Matter>> {
	let row = sqlx::query_as::<_, MatterModel>(
		"SELECT id, banana, matter_file, matter_id, matter_type, title,
		        canonical_summary, canonical_topics, attachment_hash, sponsors,
		        first_seen, last_seen, appearance_count
		 FROM matters WHERE id = $1",
	)
	.bind(id)
	.fetch_optional(conn)
	.await?;
	Ok(row.map(Into::into))
}

/// Every item the matter has appeared as, across all meetings.
pub async fn matter_item_ids(conn: &mut PgConnection, matter_id: &str) -> Result<Vec<String>> {
	let rows = sqlx::query_as::<_, ItemId>(
		"SELECT item_id FROM matter_appearances WHERE matter_id = $1 ORDER BY item_id",
	)
	.bind(matter_id)
	.fetch_all(conn)
	.await?;
	Ok(rows.into_iter().map(|r| r.item_id).collect())
}

/// Per-city sync recency for the `status` command.
pub async fn sync_times(conn: &mut PgConnection) -> Result<Vec<CitySyncInfo>> {
	sqlx::query_as::<_, CitySyncInfo>(
		"SELECT banana, last_synced_at FROM cities WHERE active ORDER BY banana",
	)
	.fetch_all(conn)
	.await
	.map_err(Into::into)
}

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

//! IO for the PostgreSQL database backing the archive.
//! Upserts here are re-sync safe: vendor-owned columns are refreshed while
//! processor-owned columns (summaries, topics, statuses) are preserved.

mod batch;
pub mod models;
pub mod queries;

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{
	pool::PoolConnection,
	postgres::{PgConnection, PgPool, PgPoolOptions, Postgres},
	types::Json,
	Connection,
};

use self::batch::Batch;
use crate::{
	error::Result,
	types::{AgendaItem, Meeting, Participation, ProcessingStatus},
};

/// Run all the migrations.
pub async fn migrate<T: AsRef<str>>(url: T) -> Result<()> {
	let mut conn = PgConnection::connect(url.as_ref()).await?;
	sqlx::migrate!("./src/migrations").run(&mut conn).await?;
	Ok(())
}

#[derive(Clone)]
pub struct Database {
	/// pool of database connections
	pool: PgPool,
}

impl Database {
	/// Connect to the database
	pub async fn new(url: &str) -> Result<Self> {
		let pool = PgPoolOptions::new()
			.min_connections(2)
			.max_connections(16)
			.idle_timeout(Duration::from_secs(60))
			.connect(url)
			.await?;
		Ok(Self { pool })
	}

	/// Start the database with a pre-defined pool
	pub fn with_pool(pool: PgPool) -> Self {
		Self { pool }
	}

	pub async fn insert(&self, data: impl Insert) -> Result<u64> {
		let mut conn = self.pool.acquire().await?;
		let res = data.insert(&mut conn).await?;
		Ok(res)
	}

	pub async fn conn(&self) -> Result<DbConn> {
		self.pool.acquire().await.map_err(Into::into)
	}

	pub fn pool(&self) -> &PgPool {
		&self.pool
	}
}

pub type DbReturn = Result<u64>;
pub type DbConn = PoolConnection<Postgres>;

#[async_trait::async_trait]
pub trait Insert: Send + Sized {
	async fn insert(mut self, conn: &mut PgConnection) -> DbReturn;
}

#[async_trait::async_trait]
impl Insert for Meeting {
	async fn insert(mut self, conn: &mut PgConnection) -> DbReturn {
		log::trace!("upserting meeting {} ({})", self.id, self.title);
		sqlx::query(
			r#"
			INSERT INTO meetings (
				id, banana, vendor_meeting_key, title, date, agenda_url, packet_url,
				summary, topics, participation, processing_status, created_at, updated_at
			) VALUES ($1, $2, $3, $4, $5, $6, $7, NULL, $8, $9, 'pending', now(), now())
			ON CONFLICT (id) DO UPDATE SET
				title = EXCLUDED.title,
				date = EXCLUDED.date,
				agenda_url = EXCLUDED.agenda_url,
				packet_url = EXCLUDED.packet_url,
				updated_at = now()
			"#,
		)
		.bind(&self.id)
		.bind(&self.banana)
		.bind(&self.vendor_meeting_key)
		.bind(&self.title)
		.bind(self.date)
		.bind(&self.agenda_url)
		.bind(&self.packet_url)
		.bind(Json(&self.topics))
		.bind(Json(&self.participation))
		.execute(conn)
		.await
		.map(|d| d.rows_affected())
		.map_err(Into::into)
	}
}

#[async_trait::async_trait]
impl Insert for Vec<AgendaItem> {
	async fn insert(mut self, conn: &mut PgConnection) -> DbReturn {
		let mut batch = Batch::new(
			r#"
			INSERT INTO agenda_items (
				id, meeting_id, sequence, vendor_item_key, title, attachments,
				matter_id, summary, topics, filter_reason
			) VALUES
			"#,
			r#"
			ON CONFLICT (id) DO UPDATE SET
				title = EXCLUDED.title,
				sequence = EXCLUDED.sequence,
				attachments = EXCLUDED.attachments,
				matter_id = COALESCE(agenda_items.matter_id, EXCLUDED.matter_id)
			"#,
		);
		for item in &self {
			batch.reserve(7);
			if batch.current_num_arguments() > 0 {
				batch.append(",");
			}
			batch.append("(");
			batch.bind(&item.id)?;
			batch.append(",");
			batch.bind(&item.meeting_id)?;
			batch.append(",");
			batch.bind(item.sequence)?;
			batch.append(",");
			batch.bind(&item.vendor_item_key)?;
			batch.append(",");
			batch.bind(&item.title)?;
			batch.append(",");
			batch.bind(Json(&item.attachments))?;
			batch.append(",");
			batch.bind(&item.matter_id)?;
			batch.append(", NULL, '[]'::jsonb, NULL)");
		}
		batch.execute(conn).await
	}
}

/// Persist an item's summarization result. The durability boundary: every
/// chunk of LLM output lands here before the next chunk is pulled.
pub async fn set_item_summary(
	conn: &mut PgConnection,
	item_id: &str,
	summary: &str,
	topics: &[String],
) -> Result<u64> {
	sqlx::query("UPDATE agenda_items SET summary = $2, topics = $3 WHERE id = $1")
		.bind(item_id)
		.bind(summary)
		.bind(Json(topics))
		.execute(conn)
		.await
		.map(|d| d.rows_affected())
		.map_err(Into::into)
}

pub async fn set_item_filter_reason(conn: &mut PgConnection, item_id: &str, reason: &str) -> Result<u64> {
	sqlx::query("UPDATE agenda_items SET filter_reason = $2 WHERE id = $1 AND summary IS NULL")
		.bind(item_id)
		.bind(reason)
		.execute(conn)
		.await
		.map(|d| d.rows_affected())
		.map_err(Into::into)
}

pub async fn set_meeting_status(conn: &mut PgConnection, meeting_id: &str, status: ProcessingStatus) -> Result<u64> {
	sqlx::query("UPDATE meetings SET processing_status = $2, updated_at = now() WHERE id = $1")
		.bind(meeting_id)
		.bind(status.as_str())
		.execute(conn)
		.await
		.map(|d| d.rows_affected())
		.map_err(Into::into)
}

/// Monolithic-path result write: summary, topics and participation land in
/// one statement.
pub async fn set_meeting_summary(
	conn: &mut PgConnection,
	meeting_id: &str,
	summary: &str,
	topics: &[String],
	participation: &Participation,
) -> Result<u64> {
	sqlx::query(
		"UPDATE meetings SET summary = $2, topics = $3, participation = $4, updated_at = now() WHERE id = $1",
	)
	.bind(meeting_id)
	.bind(summary)
	.bind(Json(topics))
	.bind(Json(participation))
	.execute(conn)
	.await
	.map(|d| d.rows_affected())
	.map_err(Into::into)
}

/// Item-path aggregation write: topic union and merged participation only,
/// the meeting keeps its (null) monolithic summary.
pub async fn set_meeting_aggregates(
	conn: &mut PgConnection,
	meeting_id: &str,
	topics: &[String],
	participation: &Participation,
) -> Result<u64> {
	sqlx::query("UPDATE meetings SET topics = $2, participation = $3, updated_at = now() WHERE id = $1")
		.bind(meeting_id)
		.bind(Json(topics))
		.bind(Json(participation))
		.execute(conn)
		.await
		.map(|d| d.rows_affected())
		.map_err(Into::into)
}

pub async fn set_matter_canonical(
	conn: &mut PgConnection,
	matter_id: &str,
	summary: &str,
	topics: &[String],
	attachment_hash: &str,
) -> Result<u64> {
	sqlx::query(
		"UPDATE matters SET canonical_summary = $2, canonical_topics = $3, attachment_hash = $4 WHERE id = $1",
	)
	.bind(matter_id)
	.bind(summary)
	.bind(Json(topics))
	.bind(attachment_hash)
	.execute(conn)
	.await
	.map(|d| d.rows_affected())
	.map_err(Into::into)
}

/// Back-fill a matter's canonical summary onto appearances that have none of
/// their own. Item-level summaries always win.
pub async fn backfill_item_summaries(
	conn: &mut PgConnection,
	item_ids: &[String],
	summary: &str,
	topics: &[String],
) -> Result<u64> {
	sqlx::query("UPDATE agenda_items SET summary = $2, topics = $3 WHERE id = ANY($1) AND summary IS NULL")
		.bind(item_ids)
		.bind(summary)
		.bind(Json(topics))
		.execute(conn)
		.await
		.map(|d| d.rows_affected())
		.map_err(Into::into)
}

pub async fn touch_city_sync(conn: &mut PgConnection, banana: &str, at: DateTime<Utc>) -> Result<u64> {
	sqlx::query("UPDATE cities SET last_synced_at = $2, updated_at = now() WHERE banana = $1")
		.bind(banana)
		.bind(at)
		.execute(conn)
		.await
		.map(|d| d.rows_affected())
		.map_err(Into::into)
}

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

//! Shared fixtures for the Postgres-backed suites. Tests are serialized on
//! one lock and run against the database named by DATABASE_URL; every setup
//! truncates all tables.

#![allow(dead_code)]

use std::{
	sync::{Arc, Mutex, MutexGuard},
	time::Duration,
};

use chrono::{DateTime, TimeZone, Utc};
use futures::stream;
use once_cell::sync::Lazy;

use civic_archive::{
	extract::{DocumentExtractor, Extraction},
	queue::Queue,
	summarize::{ChunkStream, ItemSummary, SummaryBatch, SummaryChunk, Summarizer},
	types::{AgendaItemDraft, Attachment, City, MeetingDraft},
	ArchiveError, Database, Result,
};

static LOCK: Lazy<Mutex<()>> = Lazy::new(Default::default);
static INIT: Lazy<()> = Lazy::new(|| {
	let _ = pretty_env_logger::try_init();
});

pub fn lock() -> MutexGuard<'static, ()> {
	Lazy::force(&INIT);
	LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn database_url() -> String {
	std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a scratch postgres for these tests")
}

/// Migrate, wipe and seed two cities.
pub async fn setup() -> (Database, Queue) {
	let url = database_url();
	civic_archive::database::migrate(&url).await.unwrap();
	let db = Database::new(&url).await.unwrap();
	let mut conn = db.conn().await.unwrap();
	sqlx::query("TRUNCATE queue, matter_appearances, agenda_items, matters, meetings, cities CASCADE")
		.execute(&mut conn)
		.await
		.unwrap();
	for (banana, name) in [("paloaltoCA", "Palo Alto"), ("sfCA", "San Francisco")] {
		sqlx::query(
			"INSERT INTO cities (banana, name, state, vendor, config, active) VALUES ($1, $2, 'CA', 'jsonfeed', '{}'::jsonb, TRUE)",
		)
		.bind(banana)
		.bind(name)
		.execute(&mut conn)
		.await
		.unwrap();
	}
	let queue = Queue::new(db.pool().clone());
	(db, queue)
}

pub async fn city(db: &Database, banana: &str) -> City {
	let mut conn = db.conn().await.unwrap();
	civic_archive::queries::city_by_banana(&mut conn, banana).await.unwrap().unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
	Utc.ymd(y, m, d).and_hms(19, 0, 0)
}

pub fn att(url: &str, name: &str) -> Attachment {
	Attachment { url: url.into(), name: name.into(), page_range: None }
}

pub fn item_draft(key: &str, title: &str, sequence: i32, attachments: Vec<Attachment>) -> AgendaItemDraft {
	AgendaItemDraft {
		vendor_item_key: key.into(),
		title: title.into(),
		sequence,
		matter_file: None,
		matter_id: None,
		matter_type: None,
		sponsors: Vec::new(),
		attachments,
	}
}

pub fn meeting_draft(key: &str, title: &str, date: DateTime<Utc>, items: Vec<AgendaItemDraft>) -> MeetingDraft {
	MeetingDraft {
		vendor_meeting_key: key.into(),
		title: title.into(),
		date,
		agenda_url: Some(format!("https://agendas.example/{}", key)),
		packet_url: None,
		participation: None,
		items,
	}
}

/// Extractor that serves fixed text for any url.
pub struct MapExtractor;

#[async_trait::async_trait]
impl DocumentExtractor for MapExtractor {
	async fn extract(&self, url: &str, _timeout: Duration) -> Result<Extraction> {
		Ok(Extraction {
			url: url.to_string(),
			text: format!("Staff report contents for {}", url),
			page_count: 4,
			ocr_ratio: 0.0,
		})
	}
}

/// Extractor that always fails; drives the retry/DLQ scenarios.
pub struct FailingExtractor;

#[async_trait::async_trait]
impl DocumentExtractor for FailingExtractor {
	async fn extract(&self, url: &str, _timeout: Duration) -> Result<Extraction> {
		Err(ArchiveError::Extraction(format!("{} unreachable", url)))
	}
}

/// Summarizer that answers every request in fixed-size chunks, optionally
/// dying after a number of chunks, and records which item ids it was asked
/// about.
pub struct ScriptedSummarizer {
	pub chunk_size: usize,
	pub fail_after: Option<usize>,
	pub seen: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSummarizer {
	pub fn new(chunk_size: usize) -> Self {
		Self { chunk_size, fail_after: None, seen: Arc::new(Mutex::new(Vec::new())) }
	}

	pub fn failing_after(chunk_size: usize, chunks: usize) -> Self {
		Self { chunk_size, fail_after: Some(chunks), seen: Arc::new(Mutex::new(Vec::new())) }
	}
}

#[async_trait::async_trait]
impl Summarizer for ScriptedSummarizer {
	async fn submit(&self, batch: SummaryBatch) -> Result<ChunkStream> {
		self.seen.lock().unwrap().extend(batch.requests.iter().map(|r| r.item_id.clone()));
		let mut chunks: Vec<Result<SummaryChunk>> = batch
			.requests
			.chunks(self.chunk_size.max(1))
			.map(|requests| {
				Ok(SummaryChunk {
					results: requests
						.iter()
						.map(|r| ItemSummary {
							item_id: r.item_id.clone(),
							summary: Some(format!("Summary of {}", r.title)),
							topics: vec!["Zoning".into(), "Budget".into()],
							error: None,
						})
						.collect(),
				})
			})
			.collect();
		if let Some(limit) = self.fail_after {
			chunks.truncate(limit);
			chunks.push(Err(ArchiveError::Summarizer("connection reset mid-batch".into())));
		}
		Ok(Box::pin(stream::iter(chunks)))
	}
}

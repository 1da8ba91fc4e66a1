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

//! Background jobs that take their parameters from the queue: meeting
//! summarization (item-level and monolithic) and canonical matter
//! summarization. Results are written incrementally as the summarizer
//! streams chunks back; a crash mid-job loses at most the unwritten tail.

use std::sync::Arc;

use futures::StreamExt;
use hashbrown::{HashMap, HashSet};

use crate::{
	database::{self, queries, Database},
	documents::{self, scan_participation, DocumentCache},
	error::{ArchiveError, Result},
	extract::DocumentExtractor,
	identity::{self, AttachmentHasher, HashMode},
	queue::{JobPayload, Queue, QueueJob},
	summarize::{aggregate_topics, normalize_topics, SummaryBatch, SummaryRequest, Summarizer},
	types::{AgendaItem, Attachment, Meeting, Participation, ProcessingStatus},
};

/// Items whose titles match these classes are persisted for search but never
/// summarized. Matching is case-insensitive substring.
const PROCEDURAL_PATTERNS: &[&str] = &[
	"roll call",
	"call to order",
	"pledge of allegiance",
	"adjournment",
	"adjourn",
	"approval of minutes",
	"approval of the minutes",
	"approval of agenda",
	"agenda review",
	"public comment",
];

const CEREMONIAL_PATTERNS: &[&str] =
	&["proclamation", "presentation of", "recognition of", "commendation", "invocation", "oath of office", "swearing in"];

const ADMINISTRATIVE_PATTERNS: &[&str] =
	&["closed session", "announcements", "city manager report", "future agenda", "committee assignments"];

pub fn item_filter_reason(title: &str) -> Option<&'static str> {
	let lowered = title.to_lowercase();
	let hit = |set: &[&str]| set.iter().any(|p| lowered.contains(p));
	if hit(PROCEDURAL_PATTERNS) {
		Some("procedural")
	} else if hit(CEREMONIAL_PATTERNS) {
		Some("ceremonial")
	} else if hit(ADMINISTRATIVE_PATTERNS) {
		Some("administrative")
	} else {
		None
	}
}

/// Matter ids are `{banana}_{16 hex}`; anything else in a job payload means
/// the row was corrupted and wants manual review.
pub fn validate_matter_id(id: &str) -> Result<()> {
	let malformed = || ArchiveError::Validation(format!("malformed matter id `{}`", id));
	let (banana, hash) = id.rsplit_once('_').ok_or_else(malformed)?;
	identity::validate_banana(banana).map_err(|_| malformed())?;
	if hash.len() == 16 && hash.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
		Ok(())
	} else {
		Err(malformed())
	}
}

/// Deduplicated union of the attachment sets of several items.
pub fn union_attachments(items: &[AgendaItem]) -> Vec<Attachment> {
	let mut seen = HashSet::new();
	let mut union = Vec::new();
	for item in items {
		for att in &item.attachments {
			if seen.insert((att.url.clone(), att.name.clone())) {
				union.push(att.clone());
			}
		}
	}
	union
}

/// The representative item of a matter is whichever appearance carries the
/// richest attachment set.
pub fn richest_item(items: &[AgendaItem]) -> Option<&AgendaItem> {
	items.iter().max_by_key(|i| i.attachments.len()).filter(|i| !i.attachments.is_empty())
}

/// The environment passed to each job handler.
pub struct Environment {
	db: Database,
	queue: Queue,
	extractor: Arc<dyn DocumentExtractor>,
	summarizer: Option<Arc<dyn Summarizer>>,
	hasher: AttachmentHasher,
	extract_concurrency: usize,
}

impl Environment {
	pub fn new(
		db: Database,
		queue: Queue,
		extractor: Arc<dyn DocumentExtractor>,
		summarizer: Option<Arc<dyn Summarizer>>,
		hasher: AttachmentHasher,
		extract_concurrency: usize,
	) -> Self {
		Self { db, queue, extractor, summarizer, hasher, extract_concurrency }
	}

	pub fn queue(&self) -> &Queue {
		&self.queue
	}

	fn summarizer(&self) -> Result<&Arc<dyn Summarizer>> {
		self.summarizer.as_ref().ok_or(ArchiveError::MissingCredentials)
	}

	pub async fn run_job(&self, job: &QueueJob) -> Result<()> {
		match job.payload() {
			JobPayload::Meeting { meeting_id } => self.process_meeting(meeting_id).await,
			JobPayload::Matter { matter_id, meeting_id, item_ids } => {
				self.process_matter(matter_id, meeting_id, item_ids).await
			}
		}
	}

	async fn process_meeting(&self, meeting_id: &str) -> Result<()> {
		let mut conn = self.db.conn().await?;
		let meeting = queries::get_meeting(&mut conn, meeting_id)
			.await?
			.ok_or_else(|| ArchiveError::Validation(format!("meeting {} not found", meeting_id)))?;
		database::set_meeting_status(&mut conn, meeting_id, ProcessingStatus::Processing).await?;

		let items = queries::meeting_items(&mut conn, meeting_id).await?;
		let result = if items.iter().any(AgendaItem::has_attachments) {
			self.process_meeting_items(&mut conn, &meeting, items).await
		} else if let Some(packet_url) = meeting.packet_url.clone() {
			self.process_monolithic(&mut conn, &meeting, &packet_url).await
		} else {
			log::debug!("meeting {} has neither item attachments nor a packet", meeting_id);
			Ok(())
		};

		match result {
			Ok(()) => {
				database::set_meeting_status(&mut conn, meeting_id, ProcessingStatus::Completed).await?;
				Ok(())
			}
			Err(e) => {
				// the row stays `processing`; the queue decides whether this
				// job retries or parks, and the next run resumes from the
				// summaries already written
				Err(e)
			}
		}
	}

	/// Item-level path: build the document cache, batch the unsummarized
	/// items, write each chunk as it lands, then aggregate meeting rollups.
	async fn process_meeting_items(
		&self,
		conn: &mut sqlx::PgConnection,
		meeting: &Meeting,
		items: Vec<AgendaItem>,
	) -> Result<()> {
		let city = queries::city_by_banana(&mut *conn, &meeting.banana).await?;
		let city_patterns: Vec<String> = city
			.as_ref()
			.and_then(|c| c.config.get("skip_document_patterns").cloned())
			.and_then(|v| serde_json::from_value(v).ok())
			.unwrap_or_default();
		let hash_mode =
			if city.map(|c| c.enhanced_hashing()).unwrap_or(false) { HashMode::Enhanced } else { HashMode::Fast };

		// decide which items are headed for the summarizer
		let mut active: Vec<&AgendaItem> = Vec::new();
		for item in &items {
			if item.summary.is_some() || item.filter_reason.is_some() {
				continue;
			}
			if let Some(reason) = item_filter_reason(&item.title) {
				log::debug!("filtering item `{}`: {}", item.title, reason);
				database::set_item_filter_reason(&mut *conn, &item.id, reason).await?;
				continue;
			}
			if item.has_attachments() {
				active.push(item);
			}
		}

		if active.is_empty() {
			log::debug!("meeting {}: every item already summarized or filtered", meeting.id);
			self.write_meeting_rollups(&mut *conn, meeting, &Participation::default()).await?;
			return Ok(());
		}

		// union of attachments across active items, minus junk names, with
		// versioned duplicates superseded
		let mut union: Vec<Attachment> = Vec::new();
		let mut seen_urls = HashSet::new();
		for item in &active {
			for att in &item.attachments {
				if !seen_urls.insert(att.url.clone()) {
					continue;
				}
				if let Some(reason) = documents::document_filter_reason(&att.name, &city_patterns) {
					log::debug!("excluding document `{}`: {}", att.name, reason);
					continue;
				}
				union.push(att.clone());
			}
		}
		let union = documents::supersede_versions(union);
		let cache_urls: HashSet<String> = union.iter().map(|a| a.url.clone()).collect();

		let cache =
			DocumentCache::build(cache_urls.iter().cloned(), self.extractor.as_ref(), self.extract_concurrency)
				.await;
		log::info!(
			"meeting {}: cached {} documents ({} failed, {} discarded)",
			meeting.id,
			cache.len(),
			cache.failed(),
			cache.discarded()
		);

		// a document is shared iff referenced by >= 2 active items
		let per_item_urls: Vec<Vec<String>> = active
			.iter()
			.map(|item| {
				item.attachments.iter().map(|a| a.url.clone()).filter(|u| cache.get(u).is_some()).collect()
			})
			.collect();
		let shared = documents::shared_urls(per_item_urls.iter());

		let shared_context = {
			let mut text = String::new();
			for url in &shared {
				if let Some(ex) = cache.get(url) {
					if !text.is_empty() {
						text.push_str("\n\n");
					}
					text.push_str(&ex.text);
				}
			}
			if text.is_empty() {
				None
			} else {
				Some(text)
			}
		};

		let mut requests = Vec::new();
		let mut by_id: HashMap<String, &AgendaItem> = HashMap::new();
		for item in &active {
			let own: Vec<Attachment> =
				item.attachments.iter().filter(|a| !shared.contains(&a.url)).cloned().collect();
			let (text, page_count) = cache.text_for(&own);
			let uses_shared = item.attachments.iter().any(|a| shared.contains(&a.url));
			if text.is_empty() && !uses_shared {
				database::set_item_filter_reason(&mut *conn, &item.id, "no extractable text").await?;
				continue;
			}
			by_id.insert(item.id.clone(), *item);
			requests.push(SummaryRequest {
				item_id: item.id.clone(),
				title: item.title.clone(),
				text,
				page_count,
				uses_shared_context: uses_shared,
			});
		}

		if !requests.is_empty() {
			let batch = SummaryBatch {
				meeting_id: meeting.id.clone(),
				meeting_title: meeting.title.clone(),
				shared_context,
				requests,
			};
			let mut chunks = self.summarizer()?.submit(batch).await?;
			// one chunk at a time: every pull is preceded by a durable write
			// of the previous chunk's results
			while let Some(chunk) = chunks.next().await {
				let chunk = chunk?;
				for item_result in chunk.results {
					let summary = match item_result.summary {
						Some(s) => s,
						None => {
							log::warn!(
								"summarizer skipped item {}: {}",
								item_result.item_id,
								item_result.error.as_deref().unwrap_or("unknown")
							);
							continue;
						}
					};
					let topics = normalize_topics(item_result.topics);
					database::set_item_summary(&mut *conn, &item_result.item_id, &summary, &topics).await?;
					if let Some(item) = by_id.get(&item_result.item_id) {
						if let Some(matter_id) = &item.matter_id {
							let hash = self.hasher.hash(&item.attachments, hash_mode).await;
							database::set_matter_canonical(&mut *conn, matter_id, &summary, &topics, &hash)
								.await?;
						}
					}
				}
			}
		}

		// participation hides in the first and last agenda documents
		let mut participation = Participation::default();
		for item in [active.first(), active.last()].into_iter().flatten() {
			let (text, _) = cache.text_for(&item.attachments);
			participation.merge(&scan_participation(&text));
		}

		self.write_meeting_rollups(&mut *conn, meeting, &participation).await?;
		// cache memory is the big consumer; give it back before the next job
		drop(cache);
		Ok(())
	}

	/// Re-read items and fold their topics and participation up to the
	/// meeting row.
	async fn write_meeting_rollups(
		&self,
		conn: &mut sqlx::PgConnection,
		meeting: &Meeting,
		scraped: &Participation,
	) -> Result<()> {
		let items = queries::meeting_items(&mut *conn, &meeting.id).await?;
		let topic_lists: Vec<&Vec<String>> = items.iter().map(|i| &i.topics).collect();
		let topics = aggregate_topics(topic_lists.into_iter());
		let mut participation = meeting.participation.clone();
		participation.merge(scraped);
		database::set_meeting_aggregates(&mut *conn, &meeting.id, &topics, &participation).await?;
		Ok(())
	}

	/// Monolithic path: no items, one packet, one request.
	async fn process_monolithic(
		&self,
		conn: &mut sqlx::PgConnection,
		meeting: &Meeting,
		packet_url: &str,
	) -> Result<()> {
		let extraction = self
			.extractor
			.extract(packet_url, crate::extract::EXTRACT_TIMEOUT)
			.await
			.map_err(|e| ArchiveError::Extraction(format!("packet {}: {}", packet_url, e)))?;
		if !documents::text_is_usable(&extraction) {
			return Err(ArchiveError::Extraction(format!("packet {} is not usable text", packet_url)));
		}

		let batch = SummaryBatch {
			meeting_id: meeting.id.clone(),
			meeting_title: meeting.title.clone(),
			shared_context: None,
			requests: vec![SummaryRequest {
				item_id: meeting.id.clone(),
				title: meeting.title.clone(),
				text: extraction.text.clone(),
				page_count: extraction.page_count,
				uses_shared_context: false,
			}],
		};

		let mut chunks = self.summarizer()?.submit(batch).await?;
		while let Some(chunk) = chunks.next().await {
			for result in chunk?.results {
				if let Some(summary) = result.summary {
					let topics = normalize_topics(result.topics);
					let mut participation = meeting.participation.clone();
					participation.merge(&scan_participation(&extraction.text));
					database::set_meeting_summary(&mut *conn, &meeting.id, &summary, &topics, &participation)
						.await?;
					return Ok(());
				}
			}
		}
		Err(ArchiveError::Summarizer(format!("no summary produced for meeting {}", meeting.id)))
	}

	/// Canonical matter summarization: one representative item, one call,
	/// then back-fill the appearances.
	async fn process_matter(&self, matter_id: &str, meeting_id: &str, item_ids: &[String]) -> Result<()> {
		validate_matter_id(matter_id)?;
		let mut conn = self.db.conn().await?;
		let matter = queries::get_matter(&mut conn, matter_id)
			.await?
			.ok_or_else(|| ArchiveError::Validation(format!("matter {} not found", matter_id)))?;
		let items = queries::items_by_ids(&mut conn, item_ids).await?;

		let union = union_attachments(&items);
		if union.is_empty() {
			return Err(ArchiveError::Validation(format!("matter job {} has no attachments", matter_id)));
		}
		let city = queries::city_by_banana(&mut conn, &matter.banana).await?;
		let hash_mode =
			if city.map(|c| c.enhanced_hashing()).unwrap_or(false) { HashMode::Enhanced } else { HashMode::Fast };
		let attachment_hash = self.hasher.hash(&union, hash_mode).await;

		let representative = richest_item(&items)
			.ok_or_else(|| ArchiveError::Validation(format!("matter job {} has no usable item", matter_id)))?;
		let keep: Vec<Attachment> = documents::supersede_versions(
			representative
				.attachments
				.iter()
				.filter(|a| documents::document_filter_reason(&a.name, &[]).is_none())
				.cloned()
				.collect(),
		);
		let cache = DocumentCache::build(
			keep.iter().map(|a| a.url.clone()),
			self.extractor.as_ref(),
			self.extract_concurrency,
		)
		.await;
		let (text, page_count) = cache.text_for(&keep);
		if text.is_empty() {
			return Err(ArchiveError::Extraction(format!("no text extracted for matter {}", matter_id)));
		}

		let batch = SummaryBatch {
			meeting_id: meeting_id.to_string(),
			meeting_title: matter.title.clone(),
			shared_context: None,
			requests: vec![SummaryRequest {
				item_id: representative.id.clone(),
				title: matter.title.clone(),
				text,
				page_count,
				uses_shared_context: false,
			}],
		};

		let mut chunks = self.summarizer()?.submit(batch).await?;
		while let Some(chunk) = chunks.next().await {
			for result in chunk?.results {
				if let Some(summary) = result.summary {
					let topics = normalize_topics(result.topics);
					database::set_matter_canonical(&mut conn, matter_id, &summary, &topics, &attachment_hash)
						.await?;
					let backfilled =
						database::backfill_item_summaries(&mut conn, item_ids, &summary, &topics).await?;
					log::debug!("matter {}: back-filled {} items", matter_id, backfilled);
					return Ok(());
				}
			}
		}
		Err(ArchiveError::Summarizer(format!("no summary produced for matter {}", matter_id)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn item(id: &str, attachments: usize) -> AgendaItem {
		AgendaItem {
			id: id.into(),
			meeting_id: "m".into(),
			sequence: 1,
			vendor_item_key: id.into(),
			title: "An Item".into(),
			attachments: (0..attachments)
				.map(|i| Attachment { url: format!("{}-{}", id, i), name: format!("doc {}", i), page_range: None })
				.collect(),
			matter_id: None,
			summary: None,
			topics: Vec::new(),
			filter_reason: None,
		}
	}

	#[test]
	fn filter_classes_match_expected_titles() {
		assert_eq!(item_filter_reason("Roll Call"), Some("procedural"));
		assert_eq!(item_filter_reason("Approval of Minutes - October"), Some("procedural"));
		assert_eq!(item_filter_reason("Proclamation Honoring Veterans"), Some("ceremonial"));
		assert_eq!(item_filter_reason("Closed Session Report"), Some("administrative"));
		assert_eq!(item_filter_reason("Ordinance 2025-14: Zoning Amendment"), None);
	}

	#[test]
	fn matter_id_validation() {
		assert!(validate_matter_id("paloaltoCA_0123456789abcdef").is_ok());
		assert!(validate_matter_id("paloaltoCA_0123").is_err());
		assert!(validate_matter_id("PALOALTO_0123456789abcdef").is_err());
		assert!(validate_matter_id("no-separator").is_err());
		assert!(validate_matter_id("paloaltoCA_0123456789ABCDEF").is_err());
	}

	#[test]
	fn union_deduplicates_attachments() {
		let mut a = item("a", 2);
		let b = item("b", 1);
		a.attachments.push(b.attachments[0].clone());
		let union = union_attachments(&[a, b]);
		assert_eq!(union.len(), 3);
	}

	#[test]
	fn representative_is_the_richest() {
		let items = vec![item("a", 1), item("b", 4), item("c", 2)];
		assert_eq!(richest_item(&items).unwrap().id, "b");
		let bare = vec![item("a", 0)];
		assert!(richest_item(&bare).is_none());
	}
}

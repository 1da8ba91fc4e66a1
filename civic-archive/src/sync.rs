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

//! Turns one vendor fetch result into stored rows and queued jobs.
//!
//! Each meeting is written in its own transaction; enqueues happen after the
//! commit so a queue outage can never roll back meeting data. Re-running the
//! same drafts produces no new rows and regresses no summaries.

use chrono::Utc;

use crate::{
	database::{queries, Database, Insert},
	error::Result,
	identity::{self, AttachmentHasher, HashMode},
	matter,
	queue::{matter_priority, meeting_priority, JobPayload, Queue},
	types::{AgendaItem, City, Meeting, MeetingDraft, Participation, ProcessingStatus, SyncStats},
};

/// Title tokens that mark an entire meeting as a fixture, not a proceeding.
const MEETING_SKIP_TOKENS: &[&str] = &["test", "demo", "training", "placeholder"];

pub fn meeting_is_skippable(title: &str) -> bool {
	title
		.split(|c: char| !c.is_ascii_alphanumeric())
		.any(|token| MEETING_SKIP_TOKENS.contains(&token.to_lowercase().as_str()))
}

/// Should a meeting job be enqueued, and if not, why not.
pub fn should_enqueue_meeting(
	has_items: bool,
	all_items_summarized: bool,
	meeting_has_summary: bool,
) -> (bool, &'static str) {
	if has_items && all_items_summarized {
		(false, "all items summarized")
	} else if !has_items && meeting_has_summary {
		(false, "monolithic already summarized")
	} else {
		(true, "needs processing")
	}
}

/// Should a matter job be enqueued. `existing` is the matter's state before
/// the current sighting.
pub fn should_enqueue_matter(
	existing_summary: Option<&str>,
	existing_hash: Option<&str>,
	new_hash: &str,
	has_attachments: bool,
) -> (bool, &'static str) {
	if !has_attachments {
		return (false, "no attachments");
	}
	if existing_summary.is_none() {
		return (true, "new matter");
	}
	match existing_hash {
		Some(hash) if hash == new_hash => (false, "unchanged"),
		_ => (true, "attachments changed"),
	}
}

/// A decision made inside the meeting transaction, executed after commit.
struct PendingJob {
	payload: JobPayload,
	banana: String,
	priority: i32,
	reason: &'static str,
}

pub struct SyncOrchestrator {
	db: Database,
	queue: Queue,
	hasher: AttachmentHasher,
}

impl SyncOrchestrator {
	pub fn new(db: Database, queue: Queue, hasher: AttachmentHasher) -> Self {
		Self { db, queue, hasher }
	}

	/// Ingest one vendor fetch result. Per-meeting failures abort only that
	/// meeting's transaction.
	pub async fn ingest(&self, city: &City, drafts: Vec<MeetingDraft>) -> Result<SyncStats> {
		identity::validate_banana(&city.banana)?;
		let mut stats = SyncStats::default();
		for draft in drafts {
			let (meeting_stats, jobs) = self.ingest_meeting(city, draft).await?;
			stats.absorb(&meeting_stats);
			self.run_enqueues(jobs, &mut stats).await;
		}
		Ok(stats)
	}

	async fn ingest_meeting(&self, city: &City, draft: MeetingDraft) -> Result<(SyncStats, Vec<PendingJob>)> {
		let mut stats = SyncStats::default();
		if meeting_is_skippable(&draft.title) {
			log::debug!("skipping meeting `{}` ({}): fixture title", draft.title, city.banana);
			stats.meetings_skipped += 1;
			stats.items_skipped += draft.items.len();
			return Ok((stats, Vec::new()));
		}

		let now = Utc::now();
		let meeting_id = identity::meeting_id(&city.banana, &draft.vendor_meeting_key, &draft.date);
		let meeting = Meeting {
			id: meeting_id.clone(),
			banana: city.banana.clone(),
			vendor_meeting_key: draft.vendor_meeting_key.clone(),
			title: draft.title.clone(),
			date: draft.date,
			agenda_url: draft.agenda_url.clone(),
			packet_url: draft.packet_url.clone(),
			summary: None,
			topics: Vec::new(),
			participation: draft.participation.clone().unwrap_or_else(Participation::default),
			processing_status: ProcessingStatus::Pending,
		};

		let hash_mode = if city.enhanced_hashing() { HashMode::Enhanced } else { HashMode::Fast };
		let mut jobs: Vec<PendingJob> = Vec::new();

		let mut tx = self.db.pool().begin().await?;
		meeting.clone().insert(&mut *tx).await?;
		stats.meetings_stored += 1;

		let mut items: Vec<AgendaItem> = Vec::with_capacity(draft.items.len());
		for item_draft in &draft.items {
			let item_id = identity::item_id(&meeting_id, item_draft.sequence, &item_draft.vendor_item_key);
			let mut matter_ref = None;

			if item_draft.references_matter() {
				if let Some(tracked) = matter::track(&mut *tx, &meeting, &item_id, item_draft).await? {
					if tracked.created {
						stats.matters_created += 1;
					} else {
						stats.matters_seen += 1;
					}
					if tracked.appearance_recorded {
						stats.appearances_recorded += 1;
					}

					if !tracked.skip_job && !item_draft.attachments.is_empty() {
						let new_hash = self.hasher.hash(&item_draft.attachments, hash_mode).await;
						let (enqueue, reason) = should_enqueue_matter(
							tracked.existing_summary.as_deref(),
							tracked.existing_hash.as_deref(),
							&new_hash,
							true,
						);
						if enqueue {
							let item_ids = queries::matter_item_ids(&mut *tx, &tracked.matter_id).await?;
							jobs.push(PendingJob {
								payload: JobPayload::Matter {
									matter_id: tracked.matter_id.clone(),
									meeting_id: meeting_id.clone(),
									item_ids,
								},
								banana: city.banana.clone(),
								priority: matter_priority(&draft.date, &now),
								reason,
							});
						} else {
							log::trace!("matter {} not enqueued: {}", tracked.matter_id, reason);
						}
					}
					matter_ref = Some(tracked.matter_id);
				}
			}

			items.push(AgendaItem {
				id: item_id,
				meeting_id: meeting_id.clone(),
				sequence: item_draft.sequence,
				vendor_item_key: item_draft.vendor_item_key.clone(),
				title: item_draft.title.clone(),
				attachments: item_draft.attachments.clone(),
				matter_id: matter_ref,
				summary: None,
				topics: Vec::new(),
				filter_reason: None,
			});
		}

		if !items.is_empty() {
			stats.items_stored += items.len();
			// `Vec::insert` shadows the trait method
			Insert::insert(items, &mut *tx).await?;
		}

		// the upsert preserved any processor-owned state; read it back to
		// decide whether this meeting still needs a job
		let stored_items = queries::meeting_items(&mut *tx, &meeting_id).await?;
		let stored_meeting = queries::get_meeting(&mut *tx, &meeting_id).await?;
		let all_summarized = !stored_items.is_empty() && stored_items.iter().all(|i| i.summary.is_some());
		let meeting_has_summary = stored_meeting.map(|m| m.summary.is_some()).unwrap_or(false);

		let (enqueue, reason) = should_enqueue_meeting(!stored_items.is_empty(), all_summarized, meeting_has_summary);
		if enqueue {
			jobs.push(PendingJob {
				payload: JobPayload::Meeting { meeting_id: meeting_id.clone() },
				banana: city.banana.clone(),
				priority: meeting_priority(&draft.date, &now),
				reason,
			});
		} else {
			log::debug!("meeting {} not enqueued: {}", meeting_id, reason);
		}

		tx.commit().await?;
		Ok((stats, jobs))
	}

	/// Enqueue outside of any meeting transaction. Failures are logged and
	/// counted; the next sync pass will decide again.
	async fn run_enqueues(&self, jobs: Vec<PendingJob>, stats: &mut SyncStats) {
		for job in jobs {
			match self.queue.enqueue(&job.payload, &job.banana, job.priority).await {
				Ok(crate::queue::Enqueued::Created(_)) => {
					log::debug!("enqueued {} ({})", job.payload.dedup_key(), job.reason);
					stats.jobs_enqueued += 1;
				}
				Ok(crate::queue::Enqueued::AlreadyActive(_)) => {
					// still waiting from an earlier sync; a fresher sighting
					// may deserve a better slot in line
					let _ = self.queue.update_priority(&job.payload.dedup_key(), job.priority).await;
					stats.jobs_deduplicated += 1;
				}
				Ok(crate::queue::Enqueued::AlreadyTerminal(_)) => {
					// the decider said this subject needs work again, so the
					// finished row is reset rather than left to block it
					match self.queue.requeue_terminal(&job.payload, &job.banana, job.priority).await {
						Ok(n) if n > 0 => {
							log::debug!("requeued {} ({})", job.payload.dedup_key(), job.reason);
							stats.jobs_enqueued += 1;
						}
						Ok(_) => stats.jobs_deduplicated += 1,
						Err(e) => {
							log::warn!("requeue failed for {}: {}", job.payload.dedup_key(), e);
							stats.enqueue_failures += 1;
						}
					}
				}
				Err(e) => {
					log::warn!("enqueue failed for {}: {}", job.payload.dedup_key(), e);
					stats.enqueue_failures += 1;
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fixture_titles_are_skipped() {
		assert!(meeting_is_skippable("TEST Meeting - do not publish"));
		assert!(meeting_is_skippable("Clerk training session"));
		assert!(meeting_is_skippable("Demo: agenda import"));
		assert!(!meeting_is_skippable("City Council Regular Meeting"));
		// token match, not substring: protest hearings are real meetings
		assert!(!meeting_is_skippable("Protest Hearing on Assessment"));
		assert!(!meeting_is_skippable("Contestant Review Board"));
	}

	#[test]
	fn meeting_decider_truth_table() {
		assert_eq!(should_enqueue_meeting(true, true, false), (false, "all items summarized"));
		assert_eq!(should_enqueue_meeting(false, false, true), (false, "monolithic already summarized"));
		assert_eq!(should_enqueue_meeting(true, false, false), (true, "needs processing"));
		assert_eq!(should_enqueue_meeting(false, false, false), (true, "needs processing"));
		// item-level takes precedence: a meeting with items and a stray
		// monolithic summary still processes its unsummarized items
		assert_eq!(should_enqueue_meeting(true, false, true), (true, "needs processing"));
	}

	#[test]
	fn matter_decider_truth_table() {
		assert_eq!(should_enqueue_matter(None, None, "h1", false), (false, "no attachments"));
		assert_eq!(should_enqueue_matter(None, None, "h1", true), (true, "new matter"));
		assert_eq!(should_enqueue_matter(Some("s"), Some("h1"), "h1", true), (false, "unchanged"));
		assert_eq!(should_enqueue_matter(Some("s"), Some("h1"), "h2", true), (true, "attachments changed"));
		// a matter with a summary but no recorded hash must be re-summarized
		assert_eq!(should_enqueue_matter(Some("s"), None, "h1", true), (true, "attachments changed"));
	}
}

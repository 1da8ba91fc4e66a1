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

//! Domain types shared between the fetcher, orchestrator and processor.
//! Drafts are what vendor adapters hand us; the rest are the persisted shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use xtra::Message;

/// A municipality tracked by the archive, identified by its `banana` slug
/// (lowercase city + uppercase state, e.g. `paloaltoCA`). Provisioned
/// externally; read-mostly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct City {
	pub banana: String,
	pub name: String,
	pub state: String,
	pub vendor: String,
	/// Platform-specific configuration, opaque to the core.
	pub config: serde_json::Value,
	pub active: bool,
	pub last_synced_at: Option<DateTime<Utc>>,
}

impl City {
	/// Cities can opt into enhanced (HEAD-probing) attachment hashing when
	/// their CDN rotates URLs.
	pub fn enhanced_hashing(&self) -> bool {
		self.config.get("hash_mode").and_then(|v| v.as_str()) == Some("enhanced")
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
	Pending,
	Processing,
	Completed,
	Failed,
}

impl ProcessingStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			ProcessingStatus::Pending => "pending",
			ProcessingStatus::Processing => "processing",
			ProcessingStatus::Completed => "completed",
			ProcessingStatus::Failed => "failed",
		}
	}

	pub fn parse(s: &str) -> Self {
		match s {
			"processing" => ProcessingStatus::Processing,
			"completed" => ProcessingStatus::Completed,
			"failed" => ProcessingStatus::Failed,
			_ => ProcessingStatus::Pending,
		}
	}
}

/// How the public can take part in a meeting. Merged from vendor data and
/// from the first/last agenda documents during processing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Participation {
	pub phone: Option<String>,
	pub email: Option<String>,
	pub stream_url: Option<String>,
}

impl Participation {
	pub fn is_empty(&self) -> bool {
		self.phone.is_none() && self.email.is_none() && self.stream_url.is_none()
	}

	/// Fill any empty fields from `other`; existing values win.
	pub fn merge(&mut self, other: &Participation) {
		if self.phone.is_none() {
			self.phone = other.phone.clone();
		}
		if self.email.is_none() {
			self.email = other.email.clone();
		}
		if self.stream_url.is_none() {
			self.stream_url = other.stream_url.clone();
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Attachment {
	pub url: String,
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub page_range: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Meeting {
	pub id: String,
	pub banana: String,
	pub vendor_meeting_key: String,
	pub title: String,
	pub date: DateTime<Utc>,
	pub agenda_url: Option<String>,
	pub packet_url: Option<String>,
	pub summary: Option<String>,
	pub topics: Vec<String>,
	pub participation: Participation,
	pub processing_status: ProcessingStatus,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgendaItem {
	pub id: String,
	pub meeting_id: String,
	pub sequence: i32,
	pub vendor_item_key: String,
	pub title: String,
	pub attachments: Vec<Attachment>,
	pub matter_id: Option<String>,
	pub summary: Option<String>,
	pub topics: Vec<String>,
	/// Set when the item was withheld from summarization (procedural,
	/// ceremonial, administrative or empty after extraction).
	pub filter_reason: Option<String>,
}

impl AgendaItem {
	pub fn has_attachments(&self) -> bool {
		!self.attachments.is_empty()
	}
}

/// A legislative item tracked across its appearances on multiple agendas.
/// The unit of canonical summarization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Matter {
	pub id: String,
	pub banana: String,
	pub matter_file: Option<String>,
	pub vendor_matter_id: Option<String>,
	pub matter_type: Option<String>,
	pub title: String,
	pub canonical_summary: Option<String>,
	pub canonical_topics: Vec<String>,
	/// Content address of the attachment set the canonical summary was
	/// produced from; the re-summarization gate.
	pub attachment_hash: Option<String>,
	pub sponsors: Vec<String>,
	pub first_seen: DateTime<Utc>,
	pub last_seen: DateTime<Utc>,
	pub appearance_count: i32,
}

/// What a vendor adapter hands back for one meeting.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeetingDraft {
	pub vendor_meeting_key: String,
	pub title: String,
	pub date: DateTime<Utc>,
	#[serde(default)]
	pub agenda_url: Option<String>,
	#[serde(default)]
	pub packet_url: Option<String>,
	#[serde(default)]
	pub participation: Option<Participation>,
	#[serde(default)]
	pub items: Vec<AgendaItemDraft>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgendaItemDraft {
	pub vendor_item_key: String,
	pub title: String,
	pub sequence: i32,
	#[serde(default)]
	pub matter_file: Option<String>,
	#[serde(default)]
	pub matter_id: Option<String>,
	#[serde(default)]
	pub matter_type: Option<String>,
	#[serde(default)]
	pub sponsors: Vec<String>,
	#[serde(default)]
	pub attachments: Vec<Attachment>,
}

impl AgendaItemDraft {
	/// Matters are only tracked when the vendor gave us at least one of the
	/// two identifiers.
	pub fn references_matter(&self) -> bool {
		self.matter_file.is_some() || self.matter_id.is_some()
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
	Success,
	Skipped,
	Failed,
}

/// Outcome of syncing a single city, reported back to the conductor and the
/// `status` command.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncResult {
	pub banana: String,
	pub status: SyncStatus,
	pub meetings_found: usize,
	pub meetings_processed: usize,
	pub items_stored: usize,
	pub duration_seconds: f64,
	pub error: Option<String>,
}

impl SyncResult {
	pub fn failed(banana: &str, error: impl ToString, duration_seconds: f64) -> Self {
		Self {
			banana: banana.to_string(),
			status: SyncStatus::Failed,
			meetings_found: 0,
			meetings_processed: 0,
			items_stored: 0,
			duration_seconds,
			error: Some(error.to_string()),
		}
	}
}

impl Message for SyncResult {
	type Result = ();
}

/// Counters produced by one orchestrator ingest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
	pub meetings_stored: usize,
	pub meetings_skipped: usize,
	pub items_stored: usize,
	pub items_skipped: usize,
	pub matters_created: usize,
	pub matters_seen: usize,
	pub appearances_recorded: usize,
	pub jobs_enqueued: usize,
	pub jobs_deduplicated: usize,
	pub enqueue_failures: usize,
}

impl SyncStats {
	pub fn absorb(&mut self, other: &SyncStats) {
		self.meetings_stored += other.meetings_stored;
		self.meetings_skipped += other.meetings_skipped;
		self.items_stored += other.items_stored;
		self.items_skipped += other.items_skipped;
		self.matters_created += other.matters_created;
		self.matters_seen += other.matters_seen;
		self.appearances_recorded += other.appearances_recorded;
		self.jobs_enqueued += other.jobs_enqueued;
		self.jobs_deduplicated += other.jobs_deduplicated;
		self.enqueue_failures += other.enqueue_failures;
	}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Die;
impl Message for Die {
	type Result = ();
}

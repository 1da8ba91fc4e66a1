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

//! Direct database representations of the types in `types.rs`. Json columns
//! are unwrapped here so the rest of the crate never touches `sqlx::types`.

use chrono::{DateTime, Utc};
use sqlx::{types::Json, FromRow};

use crate::types::{AgendaItem, Attachment, City, Matter, Meeting, Participation, ProcessingStatus};

#[derive(Debug, Clone, FromRow)]
pub struct CityModel {
	pub banana: String,
	pub name: String,
	pub state: String,
	pub vendor: String,
	pub config: Json<serde_json::Value>,
	pub active: bool,
	pub last_synced_at: Option<DateTime<Utc>>,
}

impl From<CityModel> for City {
	fn from(m: CityModel) -> City {
		City {
			banana: m.banana,
			name: m.name,
			state: m.state,
			vendor: m.vendor,
			config: m.config.0,
			active: m.active,
			last_synced_at: m.last_synced_at,
		}
	}
}

#[derive(Debug, Clone, FromRow)]
pub struct MeetingModel {
	pub id: String,
	pub banana: String,
	pub vendor_meeting_key: String,
	pub title: String,
	pub date: DateTime<Utc>,
	pub agenda_url: Option<String>,
	pub packet_url: Option<String>,
	pub summary: Option<String>,
	pub topics: Json<Vec<String>>,
	pub participation: Json<Participation>,
	pub processing_status: String,
}

impl From<MeetingModel> for Meeting {
	fn from(m: MeetingModel) -> Meeting {
		Meeting {
			id: m.id,
			banana: m.banana,
			vendor_meeting_key: m.vendor_meeting_key,
			title: m.title,
			date: m.date,
			agenda_url: m.agenda_url,
			packet_url: m.packet_url,
			summary: m.summary,
			topics: m.topics.0,
			participation: m.participation.0,
			processing_status: ProcessingStatus::parse(&m.processing_status),
		}
	}
}

#[derive(Debug, Clone, FromRow)]
pub struct AgendaItemModel {
	pub id: String,
	pub meeting_id: String,
	pub sequence: i32,
	pub vendor_item_key: String,
	pub title: String,
	pub attachments: Json<Vec<Attachment>>,
	pub matter_id: Option<String>,
	pub summary: Option<String>,
	pub topics: Json<Vec<String>>,
	pub filter_reason: Option<String>,
}

impl From<AgendaItemModel> for AgendaItem {
	fn from(m: AgendaItemModel) -> AgendaItem {
		AgendaItem {
			id: m.id,
			meeting_id: m.meeting_id,
			sequence: m.sequence,
			vendor_item_key: m.vendor_item_key,
			title: m.title,
			attachments: m.attachments.0,
			matter_id: m.matter_id,
			summary: m.summary,
			topics: m.topics.0,
			filter_reason: m.filter_reason,
		}
	}
}

#[derive(Debug, Clone, FromRow)]
pub struct MatterModel {
	pub id: String,
	pub banana: String,
	pub matter_file: Option<String>,
	pub matter_id: Option<String>,
	pub matter_type: Option<String>,
	pub title: String,
	pub canonical_summary: Option<String>,
	pub canonical_topics: Json<Vec<String>>,
	pub attachment_hash: Option<String>,
	pub sponsors: Json<Vec<String>>,
	pub first_seen: DateTime<Utc>,
	pub last_seen: DateTime<Utc>,
	pub appearance_count: i32,
}

impl From<MatterModel> for Matter {
	fn from(m: MatterModel) -> Matter {
		Matter {
			id: m.id,
			banana: m.banana,
			matter_file: m.matter_file,
			vendor_matter_id: m.matter_id,
			matter_type: m.matter_type,
			title: m.title,
			canonical_summary: m.canonical_summary,
			canonical_topics: m.canonical_topics.0,
			attachment_hash: m.attachment_hash,
			sponsors: m.sponsors.0,
			first_seen: m.first_seen,
			last_seen: m.last_seen,
			appearance_count: m.appearance_count,
		}
	}
}

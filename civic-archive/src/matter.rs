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

//! Matter deduplication. A matter is created the first time any meeting
//! mentions it and accumulates appearances from then on; re-syncing a
//! meeting never double-counts an appearance.

use sqlx::{postgres::PgConnection, types::Json};

use crate::{
	error::Result,
	identity,
	types::{AgendaItemDraft, Meeting},
};

/// What tracking one item-draft's matter reference produced. The enqueue
/// decider wants the state *before* this sighting, so the pre-existing
/// summary and hash ride along.
#[derive(Debug, Clone)]
pub struct TrackedMatter {
	pub matter_id: String,
	pub created: bool,
	pub appearance_recorded: bool,
	pub existing_summary: Option<String>,
	pub existing_hash: Option<String>,
	pub skip_job: bool,
}

/// Matter types that are persisted for referential integrity but never get a
/// summarization job.
const SKIP_MATTER_TYPES: &[&str] = &["minutes", "irc", "information item", "information items", "communication"];

pub fn job_exempt_type(matter_type: Option<&str>) -> bool {
	match matter_type {
		Some(t) => SKIP_MATTER_TYPES.contains(&t.trim().to_lowercase().as_str()),
		None => false,
	}
}

/// Look up or create the matter referenced by `draft` and record its
/// appearance on `meeting` at `sequence`. Returns `None` when the draft
/// carries no matter identifiers.
pub async fn track(
	conn: &mut PgConnection,
	meeting: &Meeting,
	item_id: &str,
	draft: &AgendaItemDraft,
) -> Result<Option<TrackedMatter>> {
	let matter_id =
		match identity::matter_id(&meeting.banana, draft.matter_file.as_deref(), draft.matter_id.as_deref()) {
			Some(id) => id,
			None => return Ok(None),
		};

	let existing = crate::database::queries::get_matter(conn, &matter_id).await?;
	let created = existing.is_none();

	if created {
		sqlx::query(
			r#"
			INSERT INTO matters (
				id, banana, matter_file, matter_id, matter_type, title,
				canonical_summary, canonical_topics, attachment_hash, sponsors,
				first_seen, last_seen, appearance_count
			) VALUES ($1, $2, $3, $4, $5, $6, NULL, '[]'::jsonb, NULL, $7, $8, $8, 0)
			ON CONFLICT (id) DO NOTHING
			"#,
		)
		.bind(&matter_id)
		.bind(&meeting.banana)
		.bind(&draft.matter_file)
		.bind(&draft.matter_id)
		.bind(&draft.matter_type)
		.bind(&draft.title)
		.bind(Json(&draft.sponsors))
		.bind(meeting.date)
		.execute(&mut *conn)
		.await?;
	} else {
		// later sightings can fill in identifiers the first one lacked
		sqlx::query(
			r#"
			UPDATE matters SET
				matter_type = COALESCE(matter_type, $2),
				sponsors = CASE WHEN sponsors = '[]'::jsonb THEN $3 ELSE sponsors END
			WHERE id = $1
			"#,
		)
		.bind(&matter_id)
		.bind(&draft.matter_type)
		.bind(Json(&draft.sponsors))
		.execute(&mut *conn)
		.await?;
	}

	let appearance = sqlx::query(
		r#"
		INSERT INTO matter_appearances (matter_id, meeting_id, item_id, sequence)
		VALUES ($1, $2, $3, $4)
		ON CONFLICT (matter_id, meeting_id, item_id) DO NOTHING
		"#,
	)
	.bind(&matter_id)
	.bind(&meeting.id)
	.bind(item_id)
	.bind(draft.sequence)
	.execute(&mut *conn)
	.await?;

	let appearance_recorded = appearance.rows_affected() > 0;
	if appearance_recorded {
		sqlx::query(
			r#"
			UPDATE matters SET
				appearance_count = appearance_count + 1,
				last_seen = GREATEST(last_seen, $2)
			WHERE id = $1
			"#,
		)
		.bind(&matter_id)
		.bind(meeting.date)
		.execute(&mut *conn)
		.await?;
	}

	let (existing_summary, existing_hash) = match existing {
		Some(m) => (m.canonical_summary, m.attachment_hash),
		None => (None, None),
	};

	Ok(Some(TrackedMatter {
		matter_id,
		created,
		appearance_recorded,
		existing_summary,
		existing_hash,
		skip_job: job_exempt_type(draft.matter_type.as_deref()),
	}))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn exempt_types_are_case_insensitive() {
		assert!(job_exempt_type(Some("Minutes")));
		assert!(job_exempt_type(Some(" IRC ")));
		assert!(job_exempt_type(Some("Information Item")));
		assert!(!job_exempt_type(Some("Ordinance")));
		assert!(!job_exempt_type(None));
	}
}

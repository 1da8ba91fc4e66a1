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

//! Orchestrator scenarios against a live Postgres: idempotent re-sync,
//! matter deduplication across meetings and enqueue decisions.

mod common;

use civic_archive::{
	identity::AttachmentHasher,
	queries,
	sync::SyncOrchestrator,
	types::SyncStats,
};

#[test]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
fn basic_item_level_sync_creates_rows_and_one_meeting_job() {
	let _guard = common::lock();
	smol::block_on(async {
		let (db, queue) = common::setup().await;
		let orchestrator = SyncOrchestrator::new(db.clone(), queue.clone(), AttachmentHasher::new());
		let city = common::city(&db, "paloaltoCA").await;

		let draft = common::meeting_draft(
			"2025-11-10-council",
			"City Council Regular Meeting",
			common::date(2025, 11, 10),
			vec![
				common::item_draft("i-1", "Zoning Map Amendment", 1, vec![common::att("https://d.example/1.pdf", "Staff Report")]),
				common::item_draft("i-2", "Transit Budget", 2, vec![common::att("https://d.example/2.pdf", "Resolution")]),
			],
		);
		let stats = orchestrator.ingest(&city, vec![draft]).await.unwrap();
		assert_eq!(stats.meetings_stored, 1);
		assert_eq!(stats.items_stored, 2);
		assert_eq!(stats.jobs_enqueued, 1);

		let job = queue.lease("t").await.unwrap().expect("a meeting job was enqueued");
		assert_eq!(job.job_type, "meeting");
		assert!((0..=150).contains(&job.priority));
		assert!(job.dedup_key.starts_with("meeting://paloaltoCA_"));

		let mut conn = db.conn().await.unwrap();
		let meeting_id = job.dedup_key.trim_start_matches("meeting://").to_string();
		let items = queries::meeting_items(&mut conn, &meeting_id).await.unwrap();
		assert_eq!(items.len(), 2);
		assert!(items.iter().all(|i| i.summary.is_none()));
	});
}

#[test]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
fn resync_is_idempotent_and_preserves_summaries() {
	let _guard = common::lock();
	smol::block_on(async {
		let (db, queue) = common::setup().await;
		let orchestrator = SyncOrchestrator::new(db.clone(), queue.clone(), AttachmentHasher::new());
		let city = common::city(&db, "paloaltoCA").await;

		let draft = common::meeting_draft(
			"2025-11-10-council",
			"City Council Regular Meeting",
			common::date(2025, 11, 10),
			vec![common::item_draft("i-1", "Zoning Map Amendment", 1, vec![common::att("https://d.example/1.pdf", "Staff Report")])],
		);
		orchestrator.ingest(&city, vec![draft.clone()]).await.unwrap();

		// a processor wrote a summary between syncs
		let mut conn = db.conn().await.unwrap();
		sqlx::query("UPDATE agenda_items SET summary = 'already summarized', topics = '[\"land use\"]'::jsonb")
			.execute(&mut conn)
			.await
			.unwrap();

		let stats = orchestrator.ingest(&city, vec![draft]).await.unwrap();
		assert_eq!(
			stats,
			SyncStats {
				meetings_stored: 1,
				items_stored: 1,
				matters_seen: 0,
				// all items summarized and no new appearance: nothing queued
				jobs_enqueued: 0,
				jobs_deduplicated: 0,
				..Default::default()
			}
		);

		let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agenda_items").fetch_one(&mut conn).await.unwrap();
		assert_eq!(count, 1, "re-sync must not duplicate items");
		let summary: Option<String> =
			sqlx::query_scalar("SELECT summary FROM agenda_items").fetch_one(&mut conn).await.unwrap();
		assert_eq!(summary.as_deref(), Some("already summarized"), "re-sync must preserve summaries");
	});
}

#[test]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
fn matters_deduplicate_across_meetings() {
	let _guard = common::lock();
	smol::block_on(async {
		let (db, queue) = common::setup().await;
		let orchestrator = SyncOrchestrator::new(db.clone(), queue.clone(), AttachmentHasher::new());
		let city = common::city(&db, "sfCA").await;

		let mut first_item =
			common::item_draft("i-1", "Ordinance 251041", 3, vec![common::att("https://d.example/ord.pdf", "Ordinance")]);
		first_item.matter_file = Some("251041".into());
		first_item.matter_type = Some("Ordinance".into());
		let mut second_item = first_item.clone();
		second_item.vendor_item_key = "i-9".into();
		second_item.sequence = 5;

		let first = common::meeting_draft("m-oct", "Board of Supervisors", common::date(2025, 10, 1), vec![first_item]);
		let second = common::meeting_draft("m-nov", "Board of Supervisors", common::date(2025, 11, 5), vec![second_item]);

		let stats_a = orchestrator.ingest(&city, vec![first]).await.unwrap();
		let stats_b = orchestrator.ingest(&city, vec![second]).await.unwrap();
		assert_eq!(stats_a.matters_created, 1);
		assert_eq!(stats_b.matters_created, 0);
		assert_eq!(stats_b.matters_seen, 1);
		assert_eq!(stats_a.appearances_recorded + stats_b.appearances_recorded, 2);

		let mut conn = db.conn().await.unwrap();
		let matter_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM matters").fetch_one(&mut conn).await.unwrap();
		assert_eq!(matter_count, 1);
		let appearance_count: i32 =
			sqlx::query_scalar("SELECT appearance_count FROM matters").fetch_one(&mut conn).await.unwrap();
		assert_eq!(appearance_count, 2);

		// two meeting jobs, one deduplicated matter job
		let meeting_jobs: i64 =
			sqlx::query_scalar("SELECT COUNT(*) FROM queue WHERE job_type = 'meeting'").fetch_one(&mut conn).await.unwrap();
		let matter_jobs: i64 =
			sqlx::query_scalar("SELECT COUNT(*) FROM queue WHERE job_type = 'matter'").fetch_one(&mut conn).await.unwrap();
		assert_eq!(meeting_jobs, 2);
		assert_eq!(matter_jobs, 1);
	});
}

#[test]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
fn changed_attachments_requeue_a_completed_matter_job() {
	let _guard = common::lock();
	smol::block_on(async {
		let (db, queue) = common::setup().await;
		let hasher = AttachmentHasher::new();
		let orchestrator = SyncOrchestrator::new(db.clone(), queue.clone(), hasher.clone());
		let city = common::city(&db, "sfCA").await;

		let old_att = vec![common::att("https://d.example/v1.pdf", "Ordinance")];
		let mut item = common::item_draft("i-1", "Ordinance 251041", 1, old_att.clone());
		item.matter_file = Some("251041".into());
		let draft = common::meeting_draft("m-oct", "Board of Supervisors", common::date(2025, 10, 1), vec![item.clone()]);
		orchestrator.ingest(&city, vec![draft]).await.unwrap();

		// pretend the processor finished the matter job with hash(old_att)
		let old_hash = hasher.hash(&old_att, civic_archive::identity::HashMode::Fast).await;
		let mut conn = db.conn().await.unwrap();
		sqlx::query("UPDATE matters SET canonical_summary = 'v1 summary', attachment_hash = $1")
			.bind(&old_hash)
			.execute(&mut conn)
			.await
			.unwrap();
		sqlx::query("UPDATE queue SET status = 'completed', completed_at = now() WHERE job_type = 'matter'")
			.execute(&mut conn)
			.await
			.unwrap();

		// next appearance arrives with a different attachment set
		item.attachments = vec![common::att("https://d.example/v2.pdf", "Ordinance Ver2")];
		item.vendor_item_key = "i-9".into();
		let draft = common::meeting_draft("m-nov", "Board of Supervisors", common::date(2025, 11, 5), vec![item]);
		orchestrator.ingest(&city, vec![draft]).await.unwrap();

		let status: String =
			sqlx::query_scalar("SELECT status FROM queue WHERE job_type = 'matter'").fetch_one(&mut conn).await.unwrap();
		assert_eq!(status, "pending", "attachment change must make the matter job workable again");
	});
}

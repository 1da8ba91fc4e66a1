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

//! Durable priority queue over Postgres with at-most-one lease semantics.
//!
//! Leasing is a single statement (`UPDATE ... WHERE id = (SELECT ... FOR
//! UPDATE SKIP LOCKED) RETURNING *`) so concurrent workers can never hold
//! the same job. Dedup keys make enqueue idempotent across re-syncs.

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgPool, types::Json, FromRow};

use crate::error::{ArchiveError, Result};

pub const MAX_RETRIES: i32 = 3;
pub const RETRY_PENALTY: i32 = 20;

/// How long a worker sleeps when the queue is empty.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// How long a worker backs off after a queue database error.
pub const POLL_BACKOFF: Duration = Duration::from_secs(10);
/// How long a worker backs off after a fatal handler error.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(10);
/// Leases older than this are considered abandoned by a dead worker.
pub const STALE_LEASE_AGE: Duration = Duration::from_secs(3600);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
	/// Summarize a meeting's items, or its monolithic packet.
	Meeting { meeting_id: String },
	/// Produce a canonical matter summary from its appearances.
	Matter { matter_id: String, meeting_id: String, item_ids: Vec<String> },
}

impl JobPayload {
	pub fn job_type(&self) -> &'static str {
		match self {
			JobPayload::Meeting { .. } => "meeting",
			JobPayload::Matter { .. } => "matter",
		}
	}

	/// `meeting://{id}` / `matter://{id}`; unique across active and terminal
	/// rows alike.
	pub fn dedup_key(&self) -> String {
		match self {
			JobPayload::Meeting { meeting_id } => format!("meeting://{}", meeting_id),
			JobPayload::Matter { matter_id, .. } => format!("matter://{}", matter_id),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
	Pending,
	Processing,
	Completed,
	Failed,
	DeadLetter,
}

impl JobStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			JobStatus::Pending => "pending",
			JobStatus::Processing => "processing",
			JobStatus::Completed => "completed",
			JobStatus::Failed => "failed",
			JobStatus::DeadLetter => "dead_letter",
		}
	}

	pub fn parse(s: &str) -> Self {
		match s {
			"processing" => JobStatus::Processing,
			"completed" => JobStatus::Completed,
			"failed" => JobStatus::Failed,
			"dead_letter" => JobStatus::DeadLetter,
			_ => JobStatus::Pending,
		}
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::DeadLetter)
	}
}

#[derive(Debug, Clone, FromRow)]
pub struct QueueJob {
	pub id: i64,
	pub job_type: String,
	pub payload: Json<JobPayload>,
	pub dedup_key: String,
	pub banana: String,
	pub priority: i32,
	pub status: String,
	pub retry_count: i32,
	pub error_message: Option<String>,
	pub created_at: DateTime<Utc>,
	pub started_at: Option<DateTime<Utc>>,
	pub completed_at: Option<DateTime<Utc>>,
	pub failed_at: Option<DateTime<Utc>>,
}

impl QueueJob {
	pub fn payload(&self) -> &JobPayload {
		&self.payload.0
	}
}

/// What `enqueue` did. Duplicate dedup keys are normal outcomes here, not
/// errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
	/// A new row was created.
	Created(i64),
	/// A pending/processing row already covers this work.
	AlreadyActive(i64),
	/// A completed or dead-lettered row blocks re-enqueue.
	AlreadyTerminal(i64),
}

impl Enqueued {
	pub fn created(&self) -> bool {
		matches!(self, Enqueued::Created(_))
	}
}

/// Where a retryable failure sends a job next. Kept pure so the ladder is
/// testable without a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTransition {
	Retry { retry_count: i32, priority: i32 },
	DeadLetter,
}

pub fn retry_transition(retry_count: i32, priority: i32) -> RetryTransition {
	if retry_count < MAX_RETRIES {
		RetryTransition::Retry { retry_count: retry_count + 1, priority: priority - RETRY_PENALTY }
	} else {
		RetryTransition::DeadLetter
	}
}

/// Meeting jobs always outrank matter jobs and recency dominates within a
/// class: priority decays with calendar distance from now.
pub fn meeting_priority(date: &DateTime<Utc>, now: &DateTime<Utc>) -> i32 {
	let days = (*date - *now).num_days().abs();
	(150 - days).max(0) as i32
}

pub fn matter_priority(representative_date: &DateTime<Utc>, now: &DateTime<Utc>) -> i32 {
	let days = (*representative_date - *now).num_days().abs();
	(50 - days).max(-100) as i32
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
	pub pending: i64,
	pub processing: i64,
	pub completed: i64,
	pub failed: i64,
	pub dead_letter: i64,
}

impl fmt::Display for QueueStats {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(
			f,
			"pending: {}, processing: {}, completed: {}, failed: {}, dead_letter: {}",
			self.pending, self.processing, self.completed, self.failed, self.dead_letter
		)
	}
}

#[derive(FromRow)]
struct StatusCount {
	status: String,
	count: i64,
}

#[derive(FromRow)]
struct JobRef {
	id: i64,
	status: String,
}

#[derive(FromRow)]
struct RetryState {
	retry_count: i32,
	priority: i32,
}

const JOB_COLUMNS: &str = "id, job_type, payload, dedup_key, banana, priority, status, retry_count, \
	 error_message, created_at, started_at, completed_at, failed_at";

#[derive(Clone)]
pub struct Queue {
	pool: PgPool,
}

impl Queue {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	/// Idempotent enqueue keyed on the payload's dedup key.
	pub async fn enqueue(&self, payload: &JobPayload, banana: &str, priority: i32) -> Result<Enqueued> {
		let dedup_key = payload.dedup_key();
		let inserted = sqlx::query_as::<_, JobRef>(
			r#"
			INSERT INTO queue (job_type, payload, dedup_key, banana, priority, status, retry_count, created_at)
			VALUES ($1, $2, $3, $4, $5, 'pending', 0, now())
			ON CONFLICT (dedup_key) DO NOTHING
			RETURNING id, status
			"#,
		)
		.bind(payload.job_type())
		.bind(Json(payload))
		.bind(&dedup_key)
		.bind(banana)
		.bind(priority)
		.fetch_optional(&self.pool)
		.await?;

		if let Some(row) = inserted {
			return Ok(Enqueued::Created(row.id));
		}

		let existing = sqlx::query_as::<_, JobRef>("SELECT id, status FROM queue WHERE dedup_key = $1")
			.bind(&dedup_key)
			.fetch_one(&self.pool)
			.await?;
		if JobStatus::parse(&existing.status).is_terminal() {
			Ok(Enqueued::AlreadyTerminal(existing.id))
		} else {
			Ok(Enqueued::AlreadyActive(existing.id))
		}
	}

	/// Atomically claim the highest-priority pending job, FIFO within a
	/// priority. `worker` only labels the log line; the lease itself is the
	/// row's `processing` status.
	pub async fn lease(&self, worker: &str) -> Result<Option<QueueJob>> {
		let job = sqlx::query_as::<_, QueueJob>(&format!(
			r#"
			UPDATE queue SET status = 'processing', started_at = now()
			WHERE id = (
				SELECT id FROM queue
				WHERE status = 'pending'
				ORDER BY priority DESC, id ASC
				FOR UPDATE SKIP LOCKED
				LIMIT 1
			)
			RETURNING {}
			"#,
			JOB_COLUMNS
		))
		.fetch_optional(&self.pool)
		.await?;
		if let Some(job) = &job {
			log::debug!("worker {} leased job {} ({})", worker, job.id, job.dedup_key);
		}
		Ok(job)
	}

	/// Like [`lease`](Self::lease) but restricted to one city's jobs; used to
	/// drain after a one-shot sync.
	pub async fn lease_for_city(&self, worker: &str, banana: &str) -> Result<Option<QueueJob>> {
		let job = sqlx::query_as::<_, QueueJob>(&format!(
			r#"
			UPDATE queue SET status = 'processing', started_at = now()
			WHERE id = (
				SELECT id FROM queue
				WHERE status = 'pending' AND banana = $1
				ORDER BY priority DESC, id ASC
				FOR UPDATE SKIP LOCKED
				LIMIT 1
			)
			RETURNING {}
			"#,
			JOB_COLUMNS
		))
		.bind(banana)
		.fetch_optional(&self.pool)
		.await?;
		if let Some(job) = &job {
			log::debug!("worker {} leased job {} ({})", worker, job.id, job.dedup_key);
		}
		Ok(job)
	}

	pub async fn complete(&self, id: i64) -> Result<()> {
		sqlx::query("UPDATE queue SET status = 'completed', completed_at = now() WHERE id = $1")
			.bind(id)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	/// Route a failure through the retry ladder. Non-retryable failures park
	/// the row as `failed` without burning a retry.
	pub async fn fail(&self, id: i64, error: &str, retryable: bool) -> Result<()> {
		let mut tx = self.pool.begin().await?;

		if !retryable {
			sqlx::query(
				"UPDATE queue SET status = 'failed', failed_at = now(), error_message = $2 WHERE id = $1",
			)
			.bind(id)
			.bind(error)
			.execute(&mut *tx)
			.await?;
			tx.commit().await?;
			return Ok(());
		}

		let state =
			sqlx::query_as::<_, RetryState>("SELECT retry_count, priority FROM queue WHERE id = $1 FOR UPDATE")
				.bind(id)
				.fetch_optional(&mut *tx)
				.await?
				.ok_or_else(|| ArchiveError::Validation(format!("queue row {} vanished", id)))?;

		match retry_transition(state.retry_count, state.priority) {
			RetryTransition::Retry { retry_count, priority } => {
				sqlx::query(
					r#"
					UPDATE queue SET status = 'pending', retry_count = $2, priority = $3,
						error_message = $4, started_at = NULL
					WHERE id = $1
					"#,
				)
				.bind(id)
				.bind(retry_count)
				.bind(priority)
				.bind(error)
				.execute(&mut *tx)
				.await?;
				log::warn!("job {} failed (retry {}/{}): {}", id, retry_count, MAX_RETRIES, error);
			}
			RetryTransition::DeadLetter => {
				sqlx::query(
					r#"
					UPDATE queue SET status = 'dead_letter', failed_at = now(), error_message = $2
					WHERE id = $1
					"#,
				)
				.bind(id)
				.bind(error)
				.execute(&mut *tx)
				.await?;
				log::error!("job {} dead-lettered after {} retries: {}", id, MAX_RETRIES, error);
			}
		}
		tx.commit().await?;
		Ok(())
	}

	/// Rescue leases abandoned by a crashed worker. Called on processor
	/// startup; rescued rows go back through the retry ladder.
	pub async fn recover_stale(&self, older_than: Duration) -> Result<u64> {
		#[derive(FromRow)]
		struct Stale {
			id: i64,
		}
		let stale = sqlx::query_as::<_, Stale>(
			"SELECT id FROM queue WHERE status = 'processing' AND started_at < now() - make_interval(secs => $1)",
		)
		.bind(older_than.as_secs_f64())
		.fetch_all(&self.pool)
		.await?;

		let count = stale.len() as u64;
		for row in stale {
			self.fail(row.id, "stale lease recovered", true).await?;
		}
		if count > 0 {
			log::info!("recovered {} stale leases", count);
		}
		Ok(count)
	}

	/// Reset a terminal row for genuinely new work on the same subject: a
	/// matter whose attachment set changed after its job completed, or a
	/// completed meeting that grew new items. `enqueue` itself never touches
	/// terminal rows; callers escalate here only on a fresh should-enqueue
	/// decision.
	pub async fn requeue_terminal(&self, payload: &JobPayload, banana: &str, priority: i32) -> Result<u64> {
		sqlx::query(
			r#"
			UPDATE queue SET payload = $2, banana = $3, priority = $4, status = 'pending',
				retry_count = 0, error_message = NULL, started_at = NULL,
				completed_at = NULL, failed_at = NULL, created_at = now()
			WHERE dedup_key = $1 AND status IN ('completed', 'failed', 'dead_letter')
			"#,
		)
		.bind(payload.dedup_key())
		.bind(Json(payload))
		.bind(banana)
		.bind(priority)
		.execute(&self.pool)
		.await
		.map(|d| d.rows_affected())
		.map_err(Into::into)
	}

	/// Bump a still-pending job's priority; the escape hatch when an enqueue
	/// was deduplicated but the new sighting is more urgent.
	pub async fn update_priority(&self, dedup_key: &str, priority: i32) -> Result<u64> {
		sqlx::query("UPDATE queue SET priority = $2 WHERE dedup_key = $1 AND status = 'pending'")
			.bind(dedup_key)
			.bind(priority)
			.execute(&self.pool)
			.await
			.map(|d| d.rows_affected())
			.map_err(Into::into)
	}

	pub async fn stats(&self) -> Result<QueueStats> {
		let rows = sqlx::query_as::<_, StatusCount>("SELECT status, COUNT(*) as count FROM queue GROUP BY status")
			.fetch_all(&self.pool)
			.await?;
		let mut stats = QueueStats::default();
		for row in rows {
			match JobStatus::parse(&row.status) {
				JobStatus::Pending => stats.pending = row.count,
				JobStatus::Processing => stats.processing = row.count,
				JobStatus::Completed => stats.completed = row.count,
				JobStatus::Failed => stats.failed = row.count,
				JobStatus::DeadLetter => stats.dead_letter = row.count,
			}
		}
		Ok(stats)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	#[test]
	fn dedup_keys_are_scheme_prefixed() {
		let meeting = JobPayload::Meeting { meeting_id: "paloaltoCA_aabb".into() };
		assert_eq!(meeting.dedup_key(), "meeting://paloaltoCA_aabb");
		let matter = JobPayload::Matter {
			matter_id: "sfCA_ccdd".into(),
			meeting_id: "sfCA_aabb".into(),
			item_ids: vec![],
		};
		assert_eq!(matter.dedup_key(), "matter://sfCA_ccdd");
	}

	#[test]
	fn payload_round_trips_through_json() {
		let payload = JobPayload::Matter {
			matter_id: "sfCA_ccdd".into(),
			meeting_id: "sfCA_aabb".into(),
			item_ids: vec!["i1".into(), "i2".into()],
		};
		let json = serde_json::to_value(&payload).unwrap();
		assert_eq!(json["kind"], "matter");
		assert_eq!(serde_json::from_value::<JobPayload>(json).unwrap(), payload);
	}

	#[test]
	fn retry_ladder_descends_to_dead_letter() {
		// pending(p) -> p-20/r1 -> p-40/r2 -> p-60/r3 -> dead_letter
		let p = 140;
		let mut state = (0, p);
		let mut seen = Vec::new();
		loop {
			match retry_transition(state.0, state.1) {
				RetryTransition::Retry { retry_count, priority } => {
					seen.push((retry_count, priority));
					state = (retry_count, priority);
				}
				RetryTransition::DeadLetter => break,
			}
		}
		assert_eq!(seen, vec![(1, 120), (2, 100), (3, 80)]);
		assert!(seen.windows(2).all(|w| w[1].1 < w[0].1), "priority must strictly decrease");
	}

	#[test]
	fn retry_count_never_exceeds_max() {
		assert_eq!(retry_transition(MAX_RETRIES, 0), RetryTransition::DeadLetter);
		assert_eq!(retry_transition(MAX_RETRIES + 1, 0), RetryTransition::DeadLetter);
	}

	#[test]
	fn meeting_priorities_stay_in_window() {
		let now = chrono::Utc.ymd(2025, 11, 10).and_hms(0, 0, 0);
		let soon = chrono::Utc.ymd(2025, 11, 15).and_hms(0, 0, 0);
		let far = chrono::Utc.ymd(2026, 11, 10).and_hms(0, 0, 0);
		assert_eq!(meeting_priority(&soon, &now), 145);
		assert_eq!(meeting_priority(&far, &now), 0);
		assert_eq!(meeting_priority(&now, &now), 150);
	}

	#[test]
	fn matter_priorities_stay_in_window() {
		let now = chrono::Utc.ymd(2025, 11, 10).and_hms(0, 0, 0);
		let soon = chrono::Utc.ymd(2025, 11, 12).and_hms(0, 0, 0);
		let far = chrono::Utc.ymd(2026, 11, 10).and_hms(0, 0, 0);
		assert_eq!(matter_priority(&soon, &now), 48);
		assert_eq!(matter_priority(&far, &now), -100);
	}

	#[test]
	fn meetings_always_outrank_matters() {
		let now = chrono::Utc.ymd(2025, 11, 10).and_hms(0, 0, 0);
		let ancient = chrono::Utc.ymd(2020, 1, 1).and_hms(0, 0, 0);
		let today = now;
		// the worst meeting priority still beats the best matter priority
		// only at comparable recency; the class split comes from the ranges
		assert!(meeting_priority(&ancient, &now) >= 0);
		assert!(matter_priority(&today, &now) <= 50);
		assert!(meeting_priority(&today, &now) > matter_priority(&today, &now));
	}
}

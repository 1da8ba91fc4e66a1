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

//! Batch summarization contract and topic normalization.
//!
//! The remote service accepts one batch per meeting and streams results back
//! chunk by chunk. The processor must write each chunk before pulling the
//! next one; buffering the whole batch in memory would lose the chunk-level
//! crash-safety the pipeline is built around.

use futures::stream::BoxStream;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One agenda item submitted for summarization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SummaryRequest {
	pub item_id: String,
	pub title: String,
	pub text: String,
	pub page_count: u32,
	/// Whether the meeting-level shared context applies to this item.
	#[serde(default)]
	pub uses_shared_context: bool,
}

/// A per-meeting batch. Shared-document text is submitted once, not copied
/// into every request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SummaryBatch {
	pub meeting_id: String,
	pub meeting_title: String,
	#[serde(default)]
	pub shared_context: Option<String>,
	pub requests: Vec<SummaryRequest>,
}

/// One item's result inside a chunk. A failed item carries no summary but
/// never fails its chunk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemSummary {
	pub item_id: String,
	#[serde(default)]
	pub summary: Option<String>,
	#[serde(default)]
	pub topics: Vec<String>,
	#[serde(default)]
	pub error: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SummaryChunk {
	pub results: Vec<ItemSummary>,
}

pub type ChunkStream = BoxStream<'static, Result<SummaryChunk>>;

#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
	/// Submit a batch; results arrive lazily, one chunk at a time.
	async fn submit(&self, batch: SummaryBatch) -> Result<ChunkStream>;
}

/// Canonical topic taxonomy. The left side is what models and vendors emit;
/// the right side is what we store and the API filters on.
const TOPIC_ALIASES: &[(&str, &str)] = &[
	("affordable housing", "housing"),
	("homelessness", "housing"),
	("zoning", "land use"),
	("planning", "land use"),
	("development", "land use"),
	("streets", "transportation"),
	("transit", "transportation"),
	("parking", "transportation"),
	("bike", "transportation"),
	("police", "public safety"),
	("fire", "public safety"),
	("emergency", "public safety"),
	("water", "utilities"),
	("sewer", "utilities"),
	("stormwater", "utilities"),
	("budget", "finance"),
	("appropriation", "finance"),
	("tax", "finance"),
	("fees", "finance"),
	("parks", "parks and recreation"),
	("recreation", "parks and recreation"),
	("library", "parks and recreation"),
	("climate", "environment"),
	("sustainability", "environment"),
	("contracts", "procurement"),
	("procurement", "procurement"),
	("appointment", "governance"),
	("election", "governance"),
	("ethics", "governance"),
];

/// Lowercase, map through the alias table and deduplicate while keeping the
/// model's ordering.
pub fn normalize_topics<I, S>(raw: I) -> Vec<String>
where
	I: IntoIterator<Item = S>,
	S: AsRef<str>,
{
	let mut seen: Vec<String> = Vec::new();
	for topic in raw {
		let lowered = topic.as_ref().trim().to_lowercase();
		if lowered.is_empty() {
			continue;
		}
		let canonical = TOPIC_ALIASES
			.iter()
			.find(|(alias, _)| lowered.contains(alias))
			.map(|(_, canonical)| (*canonical).to_string())
			.unwrap_or(lowered);
		if !seen.contains(&canonical) {
			seen.push(canonical);
		}
	}
	seen
}

/// Aggregate item-level topic lists into the meeting-level set, first
/// occurrence wins the ordering.
pub fn aggregate_topics<'a, I>(per_item: I) -> Vec<String>
where
	I: IntoIterator<Item = &'a Vec<String>>,
{
	per_item.into_iter().flatten().unique().cloned().collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn topics_are_lowercased_and_aliased() {
		let topics = normalize_topics(vec!["Affordable Housing", "ZONING", "budget amendment"]);
		assert_eq!(topics, vec!["housing", "land use", "finance"]);
	}

	#[test]
	fn unknown_topics_pass_through_lowercased() {
		let topics = normalize_topics(vec!["Broadband Expansion"]);
		assert_eq!(topics, vec!["broadband expansion"]);
	}

	#[test]
	fn duplicates_collapse_preserving_order() {
		let topics = normalize_topics(vec!["transit", "Parking", "zoning", "bike lanes"]);
		assert_eq!(topics, vec!["transportation", "land use"]);
	}

	#[test]
	fn empty_entries_are_dropped() {
		let topics = normalize_topics(vec!["", "  ", "water"]);
		assert_eq!(topics, vec!["utilities"]);
	}

	#[test]
	fn meeting_topics_union_item_topics() {
		let a = vec!["housing".to_string(), "finance".to_string()];
		let b = vec!["finance".to_string(), "land use".to_string()];
		assert_eq!(aggregate_topics([&a, &b]), vec!["housing", "finance", "land use"]);
	}
}

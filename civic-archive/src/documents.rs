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

//! Meeting-scoped extraction cache and the filters that keep junk documents
//! away from the summarizer. The cache is the dominant memory consumer during
//! item-level processing and is dropped as soon as the meeting finishes.

use futures::{stream, StreamExt};
use hashbrown::{HashMap, HashSet};

use crate::{
	extract::{DocumentExtractor, Extraction, EXTRACT_TIMEOUT},
	types::{Attachment, Participation},
};

/// Documents whose name matches one of these sets are never extracted.
/// Matching is case-insensitive substring.
const PUBLIC_COMMENT_PATTERNS: &[&str] =
	&["public comment", "public comments", "written comment", "correspondence received", "ecomment"];

const PARCEL_TABLE_PATTERNS: &[&str] = &["parcel table", "parcel list", "apn list", "assessor parcel", "parcel map"];

const BOILERPLATE_CONTRACT_PATTERNS: &[&str] =
	&["standard agreement", "insurance requirements", "terms and conditions", "sample contract", "contract template"];

const EIR_PATTERNS: &[&str] =
	&["environmental impact report", "draft eir", "final eir", "eir appendix", "eir attachment"];

/// Reason a document name was excluded from the cache, or `None` to keep it.
/// `city_patterns` come from the city's platform configuration.
pub fn document_filter_reason(name: &str, city_patterns: &[String]) -> Option<&'static str> {
	let lowered = name.to_lowercase();
	let hit = |set: &[&str]| set.iter().any(|p| lowered.contains(p));
	if hit(PUBLIC_COMMENT_PATTERNS) {
		return Some("public comment");
	}
	if hit(PARCEL_TABLE_PATTERNS) {
		return Some("parcel table");
	}
	if hit(BOILERPLATE_CONTRACT_PATTERNS) {
		return Some("boilerplate contract");
	}
	if hit(EIR_PATTERNS) {
		return Some("environmental impact report");
	}
	if city_patterns.iter().any(|p| lowered.contains(&p.to_lowercase())) {
		return Some("city filter");
	}
	None
}

/// Parse a trailing `VerN`/`ver N` marker out of an attachment name.
/// Returns the name with the marker removed (lowercased) and the version.
fn version_split(name: &str) -> Option<(String, u32)> {
	let lowered = name.to_lowercase();
	let mut search = 0;
	while let Some(rel) = lowered[search..].find("ver") {
		let start = search + rel;
		search = start + 3;
		// must sit on a token boundary: "Ver2", "ver 2", "_ver2"
		if start > 0 && lowered.as_bytes()[start - 1].is_ascii_alphanumeric() {
			continue;
		}
		let rest = &lowered[start + 3..];
		let digits: String = rest.chars().skip_while(|c| *c == ' ' || *c == '.').take_while(char::is_ascii_digit).collect();
		if digits.is_empty() {
			continue;
		}
		if let Ok(version) = digits.parse::<u32>() {
			let mut base = String::with_capacity(lowered.len());
			base.push_str(lowered[..start].trim_end_matches(&[' ', '_', '-'][..]));
			let tail_start = start + 3 + (rest.len() - rest.trim_start_matches(&[' ', '.'][..]).len()) + digits.len();
			base.push_str(&lowered[tail_start..]);
			return Some((base, version));
		}
	}
	None
}

/// Collapse versioned attachment names, keeping only the highest `VerN` of
/// each base name. Unversioned attachments always survive.
pub fn supersede_versions(attachments: Vec<Attachment>) -> Vec<Attachment> {
	let mut best: HashMap<String, (u32, usize)> = HashMap::new();
	for (idx, att) in attachments.iter().enumerate() {
		if let Some((base, version)) = version_split(&att.name) {
			let entry = best.entry(base).or_insert((version, idx));
			if version > entry.0 {
				*entry = (version, idx);
			}
		}
	}
	let keep: HashSet<usize> = best.values().map(|(_, idx)| *idx).collect();
	attachments
		.into_iter()
		.enumerate()
		.filter(|(idx, att)| version_split(&att.name).is_none() || keep.contains(idx))
		.map(|(_, att)| att)
		.collect()
}

/// Extracted text heuristics. Massive scans, OCR-heavy dumps and mail-merge
/// piles of form letters are worse than nothing as model input.
pub fn text_is_usable(extraction: &Extraction) -> bool {
	if extraction.page_count > 1000 {
		return false;
	}
	if extraction.page_count > 50 && extraction.ocr_ratio > 0.3 {
		return false;
	}
	if extraction.text.len() > 5000 && extraction.text.matches("Sincerely,").count() > 20 {
		return false;
	}
	true
}

/// URLs referenced by two or more items. Their text is submitted once as
/// meeting-level context instead of being copied into every request.
pub fn shared_urls<'a, I>(per_item_urls: I) -> HashSet<String>
where
	I: IntoIterator<Item = &'a Vec<String>>,
{
	let mut counts: HashMap<&str, usize> = HashMap::new();
	for urls in per_item_urls {
		for url in urls.iter().collect::<HashSet<_>>() {
			*counts.entry(url.as_str()).or_default() += 1;
		}
	}
	counts.into_iter().filter(|(_, n)| *n >= 2).map(|(url, _)| url.to_string()).collect()
}

/// Extract-once cache for a single meeting, keyed by URL.
pub struct DocumentCache {
	docs: HashMap<String, Extraction>,
	failed: usize,
	discarded: usize,
}

impl DocumentCache {
	/// Extract `urls` with at most `concurrency` in-flight requests.
	/// Failures and heuristic discards shrink the cache but never fail it.
	pub async fn build<I>(urls: I, extractor: &dyn DocumentExtractor, concurrency: usize) -> Self
	where
		I: IntoIterator<Item = String>,
	{
		let results: Vec<(String, Option<Extraction>)> = stream::iter(urls)
			.map(|url| async move {
				match extractor.extract(&url, EXTRACT_TIMEOUT).await {
					Ok(extraction) => (url, Some(extraction)),
					Err(e) => {
						log::warn!("extraction failed for {}: {}", url, e);
						(url, None)
					}
				}
			})
			.buffer_unordered(concurrency.max(1))
			.collect()
			.await;

		let mut docs = HashMap::new();
		let mut failed = 0;
		let mut discarded = 0;
		for (url, extraction) in results {
			match extraction {
				Some(ex) if text_is_usable(&ex) => {
					docs.insert(url, ex);
				}
				Some(ex) => {
					log::debug!("discarding {} ({} pages, ocr {:.2})", url, ex.page_count, ex.ocr_ratio);
					discarded += 1;
				}
				None => failed += 1,
			}
		}
		Self { docs, failed, discarded }
	}

	pub fn get(&self, url: &str) -> Option<&Extraction> {
		self.docs.get(url)
	}

	/// Concatenated text and total page count for an item's attachments,
	/// skipping anything not in the cache.
	pub fn text_for(&self, attachments: &[Attachment]) -> (String, u32) {
		let mut text = String::new();
		let mut pages = 0;
		for att in attachments {
			if let Some(ex) = self.docs.get(&att.url) {
				if !text.is_empty() {
					text.push_str("\n\n");
				}
				text.push_str(&ex.text);
				pages += ex.page_count;
			}
		}
		(text, pages)
	}

	pub fn len(&self) -> usize {
		self.docs.len()
	}

	pub fn is_empty(&self) -> bool {
		self.docs.is_empty()
	}

	pub fn failed(&self) -> usize {
		self.failed
	}

	pub fn discarded(&self) -> usize {
		self.discarded
	}
}

/// Best-effort scrape of participation details out of agenda text.
pub fn scan_participation(text: &str) -> Participation {
	let mut participation = Participation::default();
	for token in text.split_whitespace() {
		if participation.stream_url.is_none() && token.starts_with("http") && looks_like_stream(token) {
			participation.stream_url = Some(token.trim_end_matches(&['.', ',', ')', ';'][..]).to_string());
		}
		if participation.email.is_none() {
			if let Some(at) = token.find('@') {
				if token[at + 1..].contains('.') {
					participation.email = Some(token.trim_matches(&['.', ',', '(', ')', ';', '<', '>'][..]).to_string());
				}
			}
		}
		if participation.phone.is_none() && looks_like_phone(token) {
			participation.phone = Some(token.trim_end_matches(&['.', ','][..]).to_string());
		}
		if participation.phone.is_some() && participation.email.is_some() && participation.stream_url.is_some() {
			break;
		}
	}
	participation
}

fn looks_like_stream(url: &str) -> bool {
	const HOSTS: &[&str] = &["zoom.", "youtube.", "youtu.be", "webex.", "teams.", "granicus", "viebit", "/live"];
	HOSTS.iter().any(|h| url.contains(h))
}

fn looks_like_phone(token: &str) -> bool {
	let digits = token.chars().filter(char::is_ascii_digit).count();
	let other = token.chars().filter(|c| !c.is_ascii_digit() && !"()-.+".contains(*c)).count();
	(10..=11).contains(&digits) && other == 0 && token.contains('-')
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::{ArchiveError, Result};
	use std::time::Duration;

	fn att(url: &str, name: &str) -> Attachment {
		Attachment { url: url.into(), name: name.into(), page_range: None }
	}

	fn extraction(url: &str, text: &str, pages: u32, ocr: f32) -> Extraction {
		Extraction { url: url.into(), text: text.into(), page_count: pages, ocr_ratio: ocr }
	}

	#[test]
	fn name_filters_catch_the_usual_suspects() {
		assert_eq!(document_filter_reason("Public Comments Received 11-10.pdf", &[]), Some("public comment"));
		assert_eq!(document_filter_reason("Assessor Parcel Map.pdf", &[]), Some("parcel table"));
		assert_eq!(document_filter_reason("Draft EIR Vol 2.pdf", &[]), Some("environmental impact report"));
		assert_eq!(document_filter_reason("Staff Report.pdf", &[]), None);
	}

	#[test]
	fn city_patterns_extend_the_filters() {
		let patterns = vec!["consent calendar backup".to_string()];
		assert_eq!(document_filter_reason("Consent Calendar Backup.pdf", &patterns), Some("city filter"));
	}

	#[test]
	fn higher_versions_supersede() {
		let atts = vec![
			att("u1", "Staff Report Ver1.pdf"),
			att("u2", "Staff Report Ver2.pdf"),
			att("u3", "Ordinance.pdf"),
		];
		let kept = supersede_versions(atts);
		let names: Vec<&str> = kept.iter().map(|a| a.name.as_str()).collect();
		assert_eq!(names, vec!["Staff Report Ver2.pdf", "Ordinance.pdf"]);
	}

	#[test]
	fn version_marker_requires_digits() {
		let atts = vec![att("u1", "Traverse Area Plan.pdf"), att("u2", "Riverside Overlay.pdf")];
		assert_eq!(supersede_versions(atts).len(), 2);
	}

	#[test]
	fn heuristics_reject_scans_and_form_letters() {
		assert!(!text_is_usable(&extraction("u", "x", 1001, 0.0)));
		assert!(!text_is_usable(&extraction("u", "x", 51, 0.4)));
		let letters = "Sincerely,\n".repeat(25) + &"filler ".repeat(1000);
		assert!(!text_is_usable(&extraction("u", &letters, 10, 0.0)));
		assert!(text_is_usable(&extraction("u", "a staff report", 30, 0.1)));
	}

	#[test]
	fn shared_means_two_or_more_items() {
		let a = vec!["u1".to_string(), "u2".to_string()];
		let b = vec!["u2".to_string(), "u2".to_string(), "u3".to_string()];
		let shared = shared_urls([&a, &b]);
		// u2 appears in both items; duplicate references within one item
		// do not count.
		assert_eq!(shared.len(), 1);
		assert!(shared.contains("u2"));
	}

	struct FixedExtractor;

	#[async_trait::async_trait]
	impl DocumentExtractor for FixedExtractor {
		async fn extract(&self, url: &str, _timeout: Duration) -> Result<Extraction> {
			match url {
				"fail" => Err(ArchiveError::Extraction("boom".into())),
				"huge" => Ok(extraction(url, "x", 2000, 0.0)),
				_ => Ok(extraction(url, "body text", 3, 0.0)),
			}
		}
	}

	#[test]
	fn cache_survives_partial_failures() {
		let cache = smol::block_on(DocumentCache::build(
			vec!["ok1".to_string(), "fail".to_string(), "huge".to_string()],
			&FixedExtractor,
			4,
		));
		assert_eq!(cache.len(), 1);
		assert_eq!(cache.failed(), 1);
		assert_eq!(cache.discarded(), 1);
		assert!(cache.get("ok1").is_some());
	}

	#[test]
	fn item_text_concatenates_cached_documents() {
		let cache = smol::block_on(DocumentCache::build(
			vec!["ok1".to_string(), "ok2".to_string()],
			&FixedExtractor,
			2,
		));
		let atts = vec![att("ok1", "A"), att("ok2", "B"), att("missing", "C")];
		let (text, pages) = cache.text_for(&atts);
		assert_eq!(text, "body text\n\nbody text");
		assert_eq!(pages, 6);
	}

	#[test]
	fn participation_scrape_finds_the_basics() {
		let text = "Join at https://us02web.zoom.us/j/123 or dial 888-475-4499. Questions: clerk@citYofpaloalto.org ok";
		let p = scan_participation(text);
		assert_eq!(p.stream_url.as_deref(), Some("https://us02web.zoom.us/j/123"));
		assert_eq!(p.phone.as_deref(), Some("888-475-4499"));
		assert_eq!(p.email.as_deref(), Some("clerk@citYofpaloalto.org"));
	}
}

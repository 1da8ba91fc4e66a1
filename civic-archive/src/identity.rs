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

//! Deterministic identifiers and content-addressed attachment hashing.
//! Repeated sync of the same vendor payload must land on the same primary
//! keys, so everything here is a pure function of its inputs.

use std::{sync::Arc, time::Duration};

use sha2::{Digest, Sha256};

use crate::{
	error::{ArchiveError, Result},
	types::Attachment,
};

/// Number of hex characters of the SHA-256 digest kept in row ids.
const ID_HASH_LEN: usize = 16;

/// Per-request timeout for HEAD probes in enhanced hashing mode.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

fn short_hash(parts: &[&str]) -> String {
	let mut hasher = Sha256::new();
	for (i, part) in parts.iter().enumerate() {
		if i > 0 {
			hasher.update(b":");
		}
		hasher.update(part.as_bytes());
	}
	let digest = hex::encode(hasher.finalize());
	digest[..ID_HASH_LEN].to_string()
}

/// Check a city slug against `^[a-z0-9]+[A-Z]{2}$`.
pub fn validate_banana(banana: &str) -> Result<()> {
	let bytes = banana.as_bytes();
	let valid = bytes.len() >= 3
		&& bytes[bytes.len() - 2..].iter().all(u8::is_ascii_uppercase)
		&& bytes[..bytes.len() - 2].iter().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
	if valid {
		Ok(())
	} else {
		Err(ArchiveError::InvalidBanana(banana.to_string()))
	}
}

/// `{banana}_{16 hex of sha256(banana:key:YYYY-MM-DD)}`
pub fn meeting_id(banana: &str, vendor_meeting_key: &str, date: &chrono::DateTime<chrono::Utc>) -> String {
	let day = date.format("%Y-%m-%d").to_string();
	format!("{}_{}", banana, short_hash(&[banana, vendor_meeting_key, &day]))
}

/// `{meeting_id}_{16 hex of sha256(meeting_id:sequence:key)}`
pub fn item_id(meeting_id: &str, sequence: i32, vendor_item_key: &str) -> String {
	let seq = sequence.to_string();
	format!("{}_{}", meeting_id, short_hash(&[meeting_id, &seq, vendor_item_key]))
}

/// `{banana}_{16 hex of sha256(banana:matter_file:matter_id)}`.
///
/// Returns `None` when the vendor supplied neither identifier; such items are
/// not tracked as matters. Both identifiers always feed the hash, so a matter
/// that later gains its second identifier keeps a stable id only if the first
/// sighting already carried both.
pub fn matter_id(banana: &str, matter_file: Option<&str>, vendor_matter_id: Option<&str>) -> Option<String> {
	if matter_file.is_none() && vendor_matter_id.is_none() {
		return None;
	}
	let file = matter_file.unwrap_or("");
	let vendor = vendor_matter_id.unwrap_or("");
	Some(format!("{}_{}", banana, short_hash(&[banana, file, vendor])))
}

/// Metadata a HEAD probe can add to an attachment's identity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProbeMeta {
	pub content_length: Option<u64>,
	pub last_modified: Option<String>,
}

/// Issues HEAD requests for enhanced hashing. A probe that fails must
/// degrade to `None` so a flaky CDN never fails the overall hash.
#[async_trait::async_trait]
pub trait AttachmentProbe: Send + Sync {
	async fn probe(&self, url: &str) -> Option<ProbeMeta>;
}

/// Probe backed by a blocking HTTP client, driven off the executor threads.
pub struct HttpProbe {
	client: reqwest::blocking::Client,
}

impl HttpProbe {
	pub fn new() -> Result<Self> {
		let client = reqwest::blocking::Client::builder().timeout(PROBE_TIMEOUT).build()?;
		Ok(Self { client })
	}
}

#[async_trait::async_trait]
impl AttachmentProbe for HttpProbe {
	async fn probe(&self, url: &str) -> Option<ProbeMeta> {
		let client = self.client.clone();
		let url = url.to_string();
		smol::unblock(move || {
			let resp = client.head(&url).send().ok()?;
			let content_length = resp.content_length();
			let last_modified = resp
				.headers()
				.get(reqwest::header::LAST_MODIFIED)
				.and_then(|v| v.to_str().ok())
				.map(|s| s.to_string());
			Some(ProbeMeta { content_length, last_modified })
		})
		.await
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashMode {
	/// Hash the sorted `(url, name)` tuples. The default.
	Fast,
	/// Additionally mix in `(Content-Length, Last-Modified)` from HEAD
	/// probes. Opt-in for cities whose CDN rotates attachment URLs.
	Enhanced,
}

/// Stable content address of an attachment set, used for matter
/// change-detection and meeting-level deduplication.
#[derive(Clone)]
pub struct AttachmentHasher {
	probe: Option<Arc<dyn AttachmentProbe>>,
}

impl AttachmentHasher {
	pub fn new() -> Self {
		Self { probe: None }
	}

	pub fn with_probe(probe: Arc<dyn AttachmentProbe>) -> Self {
		Self { probe: Some(probe) }
	}

	pub async fn hash(&self, attachments: &[Attachment], mode: HashMode) -> String {
		let mut sorted: Vec<&Attachment> = attachments.iter().collect();
		sorted.sort_by(|a, b| (&a.url, &a.name).cmp(&(&b.url, &b.name)));

		let mut hasher = Sha256::new();
		for att in sorted {
			hasher.update(att.url.as_bytes());
			hasher.update(b"\n");
			hasher.update(att.name.as_bytes());
			hasher.update(b"\n");
			if mode == HashMode::Enhanced {
				if let Some(meta) = self.probe_one(&att.url).await {
					if let Some(len) = meta.content_length {
						hasher.update(len.to_string().as_bytes());
					}
					hasher.update(b"\n");
					if let Some(modified) = &meta.last_modified {
						hasher.update(modified.as_bytes());
					}
					hasher.update(b"\n");
				}
			}
		}
		hex::encode(hasher.finalize())
	}

	async fn probe_one(&self, url: &str) -> Option<ProbeMeta> {
		match &self.probe {
			Some(probe) => probe.probe(url).await,
			None => None,
		}
	}
}

impl Default for AttachmentHasher {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	fn att(url: &str, name: &str) -> Attachment {
		Attachment { url: url.into(), name: name.into(), page_range: None }
	}

	#[test]
	fn banana_shape() {
		assert!(validate_banana("paloaltoCA").is_ok());
		assert!(validate_banana("nashville37TN").is_ok());
		assert!(validate_banana("PaloAltoCA").is_err());
		assert!(validate_banana("paloalto").is_err());
		assert!(validate_banana("CA").is_err());
		assert!(validate_banana("palo altoCA").is_err());
	}

	#[test]
	fn matter_id_is_deterministic() {
		let a = matter_id("nashvilleTN", Some("BL2025-1098"), Some("4412"));
		let b = matter_id("nashvilleTN", Some("BL2025-1098"), Some("4412"));
		assert_eq!(a, b);
		let id = a.unwrap();
		assert!(id.starts_with("nashvilleTN_"));
		assert_eq!(id.len(), "nashvilleTN_".len() + 16);
	}

	#[test]
	fn matter_id_scopes_by_city() {
		let a = matter_id("sfCA", Some("251041"), None).unwrap();
		let b = matter_id("oaklandCA", Some("251041"), None).unwrap();
		assert_ne!(a, b);
	}

	#[test]
	fn matter_id_requires_an_identifier() {
		assert_eq!(matter_id("sfCA", None, None), None);
		assert!(matter_id("sfCA", None, Some("88")).is_some());
	}

	#[test]
	fn meeting_id_changes_with_date() {
		let d1 = chrono::Utc.ymd(2025, 11, 10).and_hms(19, 0, 0);
		let d2 = chrono::Utc.ymd(2025, 11, 11).and_hms(19, 0, 0);
		assert_ne!(meeting_id("paloaltoCA", "m-1", &d1), meeting_id("paloaltoCA", "m-1", &d2));
		// same calendar day, different time of day: same id
		let d3 = chrono::Utc.ymd(2025, 11, 10).and_hms(9, 0, 0);
		assert_eq!(meeting_id("paloaltoCA", "m-1", &d1), meeting_id("paloaltoCA", "m-1", &d3));
	}

	#[test]
	fn hash_is_order_independent() {
		let hasher = AttachmentHasher::new();
		let fwd = [att("https://a.example/1.pdf", "Staff Report"), att("https://a.example/2.pdf", "Ordinance")];
		let rev = [fwd[1].clone(), fwd[0].clone()];
		let (h1, h2) = smol::block_on(async {
			(hasher.hash(&fwd, HashMode::Fast).await, hasher.hash(&rev, HashMode::Fast).await)
		});
		assert_eq!(h1, h2);
	}

	#[test]
	fn hash_reflects_content_changes() {
		let hasher = AttachmentHasher::new();
		let one = [att("https://a.example/1.pdf", "Staff Report")];
		let two = [att("https://a.example/1.pdf", "Staff Report Ver2")];
		let (h1, h2) = smol::block_on(async {
			(hasher.hash(&one, HashMode::Fast).await, hasher.hash(&two, HashMode::Fast).await)
		});
		assert_ne!(h1, h2);
	}

	struct FixedProbe(Option<ProbeMeta>);

	#[async_trait::async_trait]
	impl AttachmentProbe for FixedProbe {
		async fn probe(&self, _url: &str) -> Option<ProbeMeta> {
			self.0.clone()
		}
	}

	#[test]
	fn enhanced_mode_mixes_probe_metadata() {
		let atts = [att("https://a.example/1.pdf", "Staff Report")];
		let plain = AttachmentHasher::new();
		let meta = ProbeMeta { content_length: Some(1024), last_modified: Some("Tue, 04 Nov 2025 00:00:00 GMT".into()) };
		let probed = AttachmentHasher::with_probe(Arc::new(FixedProbe(Some(meta))));
		let (fast, enhanced) = smol::block_on(async {
			(plain.hash(&atts, HashMode::Fast).await, probed.hash(&atts, HashMode::Enhanced).await)
		});
		assert_ne!(fast, enhanced);
	}

	#[test]
	fn failed_probe_falls_back_to_url_only() {
		let atts = [att("https://a.example/1.pdf", "Staff Report")];
		let plain = AttachmentHasher::new();
		let failing = AttachmentHasher::with_probe(Arc::new(FixedProbe(None)));
		let (fast, degraded) = smol::block_on(async {
			(plain.hash(&atts, HashMode::Fast).await, failing.hash(&atts, HashMode::Enhanced).await)
		});
		assert_eq!(fast, degraded);
	}
}

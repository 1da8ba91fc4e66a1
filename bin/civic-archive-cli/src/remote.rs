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

//! HTTP-backed implementations of the core's external contracts: the pdf
//! extraction sidecar, the batch summarizer, and a generic JSON agenda-feed
//! vendor adapter. All of them drive a blocking client off the executor
//! threads.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream;
use serde::Deserialize;

use civic_archive::{
	extract::{DocumentExtractor, Extraction},
	summarize::{ChunkStream, SummaryBatch, SummaryChunk, Summarizer},
	types::{City, MeetingDraft},
	vendors::VendorAdapter,
	ArchiveError, Result,
};

fn client(timeout: Duration) -> Result<reqwest::blocking::Client> {
	reqwest::blocking::Client::builder().timeout(timeout).build().map_err(ArchiveError::from)
}

/// Client for the extraction sidecar: `POST {endpoint} {"url": ...}` returns
/// the text, page count and OCR ratio of the document.
pub struct HttpExtractor {
	client: reqwest::blocking::Client,
	endpoint: String,
}

#[derive(Deserialize)]
struct ExtractResponse {
	text: String,
	page_count: u32,
	#[serde(default)]
	ocr_ratio: f32,
}

impl HttpExtractor {
	pub fn new(endpoint: String) -> Result<Self> {
		Ok(Self { client: client(Duration::from_secs(150))?, endpoint })
	}
}

#[async_trait::async_trait]
impl DocumentExtractor for HttpExtractor {
	async fn extract(&self, url: &str, timeout: Duration) -> Result<Extraction> {
		let client = self.client.clone();
		let endpoint = self.endpoint.clone();
		let url = url.to_string();
		let response = smol::unblock(move || -> Result<(String, ExtractResponse), reqwest::Error> {
			let response = client
				.post(&endpoint)
				.timeout(timeout)
				.json(&serde_json::json!({ "url": url }))
				.send()?
				.error_for_status()?
				.json::<ExtractResponse>()?;
			Ok((url, response))
		})
		.await
		.map_err(|e| ArchiveError::Extraction(e.to_string()))?;
		let (url, body) = response;
		Ok(Extraction { url, text: body.text, page_count: body.page_count, ocr_ratio: body.ocr_ratio })
	}
}

/// Client for the batch summarizer. The service streams newline-delimited
/// chunk objects; each line is yielded as its own chunk so the processor can
/// write between pulls.
pub struct HttpSummarizer {
	client: reqwest::blocking::Client,
	endpoint: String,
	api_key: String,
}

impl HttpSummarizer {
	pub fn new(endpoint: String, api_key: String) -> Result<Self> {
		// summarization of a large meeting can take a while
		Ok(Self { client: client(Duration::from_secs(600))?, endpoint, api_key })
	}
}

#[async_trait::async_trait]
impl Summarizer for HttpSummarizer {
	async fn submit(&self, batch: SummaryBatch) -> Result<ChunkStream> {
		let client = self.client.clone();
		let endpoint = self.endpoint.clone();
		let api_key = self.api_key.clone();
		let body = smol::unblock(move || -> Result<String, reqwest::Error> {
			client.post(&endpoint).bearer_auth(&api_key).json(&batch).send()?.error_for_status()?.text()
		})
		.await
		.map_err(|e| ArchiveError::Summarizer(e.to_string()))?;

		let chunks: Vec<Result<SummaryChunk>> = body
			.lines()
			.filter(|line| !line.trim().is_empty())
			.map(|line| serde_json::from_str::<SummaryChunk>(line).map_err(ArchiveError::from))
			.collect();
		Ok(Box::pin(stream::iter(chunks)))
	}
}

/// Generic vendor adapter for cities that publish a JSON agenda feed. The
/// feed URL lives in the city's platform configuration and must return an
/// array of meeting drafts.
pub struct JsonFeedAdapter {
	client: reqwest::blocking::Client,
}

impl JsonFeedAdapter {
	pub fn new() -> Result<Self> {
		Ok(Self { client: client(Duration::from_secs(60))? })
	}
}

#[async_trait::async_trait]
impl VendorAdapter for JsonFeedAdapter {
	async fn fetch_meetings(&self, city: &City, since: DateTime<Utc>) -> Result<Vec<MeetingDraft>> {
		let feed_url = city
			.config
			.get("feed_url")
			.and_then(|v| v.as_str())
			.ok_or_else(|| ArchiveError::Vendor(format!("{} has no feed_url configured", city.banana)))?
			.to_string();
		let client = self.client.clone();
		let url = format!("{}?since={}", feed_url, since.to_rfc3339());
		smol::unblock(move || -> Result<Vec<MeetingDraft>, reqwest::Error> {
			client.get(&url).send()?.error_for_status()?.json::<Vec<MeetingDraft>>()
		})
		.await
		.map_err(|e| ArchiveError::Vendor(e.to_string()))
	}
}

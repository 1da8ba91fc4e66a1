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

//! PDF text extraction contract. Extraction itself lives behind this trait;
//! the archive only cares about the text, the page count and how much of the
//! document needed OCR.

use std::time::Duration;

use crate::error::Result;

/// Default ceiling for a single document extraction.
pub const EXTRACT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone, Debug, PartialEq)]
pub struct Extraction {
	pub url: String,
	pub text: String,
	pub page_count: u32,
	/// Fraction of pages that went through OCR, 0.0..=1.0.
	pub ocr_ratio: f32,
}

#[async_trait::async_trait]
pub trait DocumentExtractor: Send + Sync {
	async fn extract(&self, url: &str, timeout: Duration) -> Result<Extraction>;
}

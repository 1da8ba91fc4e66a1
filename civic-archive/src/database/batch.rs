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

//! A method of dynamic multi-row inserts with SQLx, built by appending
//! `($n, $n+1, ...)` tuples until Postgres' bind-parameter ceiling forces a
//! new chunk. Each chunk executes as its own statement.

use sqlx::{
	encode::Encode,
	postgres::{PgArguments, PgConnection, Postgres},
	Arguments, Type,
};

use crate::error::Result;

// Postgres caps bind parameters per statement at 65535; staying well under
// keeps statements cheap to plan. Agenda batches rarely get close.
const CHUNK_MAX: usize = 5_000;

pub struct Chunk {
	query: String,
	pub arguments: PgArguments,
	pub args_len: usize,
}

impl Chunk {
	fn new(sql: &str) -> Self {
		let mut query = String::with_capacity(1024 * 8);
		query.push_str(sql);
		Self { query, arguments: PgArguments::default(), args_len: 0 }
	}

	pub fn append(&mut self, sql: &str) {
		self.query.push_str(sql);
	}

	pub fn bind<'a, T: 'a>(&mut self, value: T) -> Result<()>
	where
		T: Encode<'a, Postgres> + Type<Postgres> + Send,
	{
		self.arguments.add(value);
		self.query.push('$');
		itoa::fmt(&mut self.query, self.args_len + 1)?;
		self.args_len += 1;
		Ok(())
	}

	async fn execute(self, conn: &mut PgConnection) -> Result<u64> {
		let done = sqlx::query_with(&self.query, self.arguments).execute(conn).await?;
		Ok(done.rows_affected())
	}
}

pub struct Batch {
	leading: String,
	trailing: String,
	chunks: Vec<Chunk>,
	index: usize,
	len: usize,
}

impl Batch {
	pub fn new(leading: &str, trailing: &str) -> Self {
		Self {
			leading: leading.to_owned(),
			trailing: trailing.to_owned(),
			chunks: vec![Chunk::new(leading)],
			index: 0,
			len: 0,
		}
	}

	// ensure there is enough room for N more arguments
	pub fn reserve(&mut self, arguments: usize) {
		self.len += 1;
		if self.chunks[self.index].args_len + arguments > CHUNK_MAX {
			self.chunks.push(Chunk::new(&self.leading));
			self.index += 1;
		}
	}

	pub fn append(&mut self, sql: &str) {
		self.chunks[self.index].append(sql);
	}

	pub fn bind<'a, T: 'a>(&mut self, value: T) -> Result<()>
	where
		T: Encode<'a, Postgres> + Type<Postgres> + Send,
	{
		self.chunks[self.index].bind(value)
	}

	pub fn current_num_arguments(&self) -> usize {
		self.chunks[self.index].args_len
	}

	pub async fn execute(self, conn: &mut PgConnection) -> Result<u64> {
		let mut rows_affected = 0;
		if self.len > 0 {
			for mut chunk in self.chunks {
				chunk.append(&self.trailing);
				rows_affected += chunk.execute(&mut *conn).await?;
			}
		}
		Ok(rows_affected)
	}
}

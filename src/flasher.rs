// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024-2026 gofwutil contributors

//! The erase/write engine that moves one partition's payload onto flash.
//!
//! Erase always precedes write - programming can only clear bits - and the
//! payload streams through a single block-sized buffer, so peak memory stays
//! at one erase block no matter how large the partition is. There is no
//! retry and no rollback here: the first failure is final for the session,
//! and the caller must stop rather than move on to the next partition.

use std::io::Read;

use log::{debug, info};

use crate::error::{FlashError, FormatError, UpdateError};
use crate::flash::{ERASE_BLOCK_SIZE, Flash, PARTITION_ALIGN, align_up, erase_span};

/// Running placement pointer for partitions written this session
///
/// Starts at the end of the factory partition and advances by each
/// partition's aligned allocation, staying erase-aligned by construction.
#[derive(Debug, Clone, Copy)]
pub struct FlashCursor
{
	position: u32,
}

impl FlashCursor
{
	pub fn new(start: u32) -> Self
	{
		Self {
			position: start,
		}
	}

	pub fn position(&self) -> u32
	{
		self.position
	}

	/// Claim an allocation for a partition declaring `declared_length` bytes,
	/// returning the flash offset it was given
	pub fn advance(&mut self, declared_length: u32) -> u32
	{
		let offset = self.position;
		self.position += align_up(declared_length, PARTITION_ALIGN);
		offset
	}
}

/// Erase and program one partition at `offset`, streaming `payload_length`
/// bytes from `source` in erase-block chunks
///
/// `progress` is called with a percentage of the payload after every chunk
/// lands. Returns the number of bytes written.
pub fn write_partition(
	flash: &mut impl Flash, offset: u32, payload_length: u32, source: &mut impl Read,
	progress: &mut impl FnMut(u8),
) -> Result<u32, UpdateError>
{
	// The cursor hands out 64 KiB-aligned offsets; anything else here means
	// the placement logic is broken, and erasing from it would chew into a
	// neighbouring partition
	if offset % PARTITION_ALIGN != 0 {
		return Err(FlashError::MisalignedCursor {
			cursor: offset,
		}
		.into());
	}

	let span = erase_span(payload_length);
	if span > 0 {
		flash.erase_range(offset, span)?;
	}
	debug!("erased {span:#x} bytes at {offset:#x}");

	let mut buffer = [0u8; ERASE_BLOCK_SIZE as usize];
	let mut written = 0u32;
	while written < payload_length {
		let count = source.read(&mut buffer).map_err(FormatError::Io)?;
		if count == 0 {
			return Err(FormatError::Truncated {
				context: "partition payload",
			}
			.into());
		}
		// The final read may hand back more than the payload has left; only
		// the remainder belongs to this partition
		let take = (count as u32).min(payload_length - written);
		flash.write(offset + written, &buffer[..take as usize])?;
		written += take;
		progress((u64::from(written) * 100 / u64::from(payload_length)) as u8);
	}

	info!("wrote {written} bytes at {offset:#x}");
	Ok(written)
}

#[cfg(test)]
mod tests
{
	use super::*;
	use crate::flash::{FlashOp, MemFlash};

	#[test]
	fn chunking_matches_block_size()
	{
		let payload = vec![0x42u8; (ERASE_BLOCK_SIZE * 2 + 37) as usize];
		let mut flash = MemFlash::new(0x20000).unwrap();

		let mut last_percent = 0;
		let written = write_partition(
			&mut flash,
			0,
			payload.len() as u32,
			&mut payload.as_slice(),
			&mut |percent| last_percent = percent,
		)
		.unwrap();

		assert_eq!(written, payload.len() as u32);
		assert_eq!(last_percent, 100);
		assert_eq!(
			flash.journal,
			vec![
				FlashOp::Erase {
					offset: 0,
					length: ERASE_BLOCK_SIZE * 3,
				},
				FlashOp::Write {
					offset: 0,
					length: ERASE_BLOCK_SIZE,
				},
				FlashOp::Write {
					offset: ERASE_BLOCK_SIZE,
					length: ERASE_BLOCK_SIZE,
				},
				FlashOp::Write {
					offset: ERASE_BLOCK_SIZE * 2,
					length: 37,
				},
			]
		);
		assert_eq!(&flash.contents()[..payload.len()], payload.as_slice());
	}

	#[test]
	fn misaligned_offset_refused_before_any_erase()
	{
		let mut flash = MemFlash::new(0x20000).unwrap();
		let result = write_partition(&mut flash, 0x1000, 8, &mut [0u8; 8].as_slice(), &mut |_| ());
		assert!(matches!(
			result,
			Err(UpdateError::Flash(FlashError::MisalignedCursor { .. }))
		));
		assert!(flash.journal.is_empty());
	}

	#[test]
	fn short_source_is_truncation()
	{
		let mut flash = MemFlash::new(0x20000).unwrap();
		let result = write_partition(&mut flash, 0, 100, &mut [0u8; 40].as_slice(), &mut |_| ());
		assert!(matches!(
			result,
			Err(UpdateError::Format(FormatError::Truncated { .. }))
		));
	}

	#[test]
	fn cursor_advances_by_aligned_allocations()
	{
		let mut cursor = FlashCursor::new(0x110000);
		assert_eq!(cursor.advance(0x30000), 0x110000);
		assert_eq!(cursor.advance(0x8000), 0x150000);
		assert_eq!(cursor.position(), 0x160000);
	}
}

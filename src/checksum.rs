// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024-2026 gofwutil contributors

//! Streaming CRC-32 gate run against the pristine image file before anything
//! is allowed to touch flash.
//!
//! The trailer is the last 4 bytes of the file, little-endian, covering every
//! preceding byte. This is a corruption check only - the format carries no
//! signature, so a passing image is intact, not authenticated.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crc32fast::Hasher;
use log::debug;

use crate::error::ChecksumError;
use crate::flash::ERASE_BLOCK_SIZE;

/// Size of the CRC-32 trailer at the end of every image
pub const TRAILER_SIZE: u64 = 4;

/// Verify `path` against its stored trailer
///
/// Streams the body in erase-block sized chunks, clamping the final read so
/// the trailer itself never enters the digest. Must succeed before the update
/// session may erase anything.
pub fn verify(path: &Path) -> Result<(), ChecksumError>
{
	let mut file = File::open(path)?;
	let file_size = file.seek(SeekFrom::End(0))?;
	if file_size < TRAILER_SIZE {
		return Err(ChecksumError::TooShort);
	}

	// The stored value sits in the last four bytes
	file.seek(SeekFrom::End(-(TRAILER_SIZE as i64)))?;
	let mut trailer = [0u8; TRAILER_SIZE as usize];
	file.read_exact(&mut trailer)?;
	let expected = u32::from_le_bytes(trailer);

	file.seek(SeekFrom::Start(0))?;
	let computed = digest_body(&mut file, file_size - TRAILER_SIZE)?;

	if computed != expected {
		return Err(ChecksumError::Mismatch {
			expected,
			computed,
		});
	}
	debug!("checksum ok: {computed:#010x} over {} bytes", file_size - TRAILER_SIZE);
	Ok(())
}

/// CRC-32 of the first `body_length` bytes of `source`
pub fn digest_body(source: &mut impl Read, body_length: u64) -> Result<u32, ChecksumError>
{
	let mut hasher = Hasher::new();
	let mut buffer = [0u8; ERASE_BLOCK_SIZE as usize];
	let mut remaining = body_length;

	while remaining > 0 {
		let want = remaining.min(buffer.len() as u64) as usize;
		let count = source.read(&mut buffer[..want])?;
		if count == 0 {
			// Declared body length ran past the end of the stream
			return Err(ChecksumError::TooShort);
		}
		// Clamp in case the reader handed back more than the body holds
		let take = count.min(remaining as usize);
		hasher.update(&buffer[..take]);
		remaining -= take as u64;
	}

	Ok(hasher.finalize())
}

#[cfg(test)]
mod tests
{
	use std::io::Write;

	use super::*;

	fn image_with_trailer(body: &[u8]) -> tempfile::NamedTempFile
	{
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(body).unwrap();
		file.write_all(&crc32fast::hash(body).to_le_bytes()).unwrap();
		file.flush().unwrap();
		file
	}

	#[test]
	fn accepts_intact_file()
	{
		let file = image_with_trailer(b"some firmware body longer than nothing");
		verify(file.path()).unwrap();
	}

	#[test]
	fn accepts_empty_body()
	{
		// A header-only image is exactly body + 4 trailer bytes; the degenerate
		// case here is a zero length body, which still has a valid trailer
		let file = image_with_trailer(b"");
		verify(file.path()).unwrap();
	}

	#[test]
	fn rejects_flipped_body_byte()
	{
		let mut body = vec![0xa5u8; ERASE_BLOCK_SIZE as usize * 2 + 3];
		let file = image_with_trailer(&body);

		for position in [0usize, body.len() / 2, body.len() - 1] {
			body[position] ^= 0x01;
			let mut corrupt = tempfile::NamedTempFile::new().unwrap();
			corrupt.write_all(&body).unwrap();
			let stored = std::fs::read(file.path()).unwrap();
			corrupt.write_all(&stored[stored.len() - 4..]).unwrap();
			corrupt.flush().unwrap();
			assert!(matches!(verify(corrupt.path()), Err(ChecksumError::Mismatch { .. })));
			body[position] ^= 0x01;
		}
	}

	#[test]
	fn rejects_flipped_trailer_byte()
	{
		let body = b"trailer corruption test body".to_vec();
		let mut bytes = body.clone();
		bytes.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
		let trailer_at = bytes.len() - 2;
		bytes[trailer_at] ^= 0xff;

		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(&bytes).unwrap();
		file.flush().unwrap();
		assert!(matches!(verify(file.path()), Err(ChecksumError::Mismatch { .. })));
	}

	#[test]
	fn rejects_file_shorter_than_trailer()
	{
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(&[0u8; 3]).unwrap();
		file.flush().unwrap();
		assert!(matches!(verify(file.path()), Err(ChecksumError::TooShort)));
	}
}

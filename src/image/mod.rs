// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024-2026 gofwutil contributors

//! Reader for the on-card firmware image container.
//!
//! Two container versions exist. The current one (v2) carries a label, flags
//! and a declared capacity per partition plus a menu icon; the legacy v1
//! container only knows an OTA slot number per payload. Both are detected by
//! their magic string at open time and exposed through the same lazy
//! [`FirmwareImage::next_partition`] contract, so nothing downstream cares
//! which version it is fed.
//!
//! The record sequence is forward-only and not restartable; a caller needing
//! a second pass over the file must open it again.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use bstr::ByteSlice;
use log::{debug, warn};

use crate::checksum::TRAILER_SIZE;
use crate::error::FormatError;
use crate::parttable::{LABEL_SIZE, part_type, subtype};

mod writer;

pub use writer::{ImageWriter, PartitionSpec};

/// Magic string opening a legacy (v1) image
pub const MAGIC_V1: &[u8; 24] = b"ODROIDGO_FIRMWARE_V00_00";
/// Magic string opening a current (v2) image
pub const MAGIC_V2: &[u8; 24] = b"ODROIDGO_FIRMWARE_V00_01";

/// Size of the null-padded description that follows the magic
pub const DESCRIPTION_SIZE: usize = 40;

pub const ICON_WIDTH: usize = 86;
pub const ICON_HEIGHT: usize = 48;
/// The v2 menu icon: RGB565, two bytes per pixel
pub const ICON_SIZE: usize = ICON_WIDTH * ICON_HEIGHT * 2;

/// v2 record header: type, subtype, two reserved bytes, label, flags, declared length
const RECORD_HEADER_SIZE_V2: u64 = 4 + LABEL_SIZE as u64 + 4 + 4;
/// v1 record header: OTA slot number only
const RECORD_HEADER_SIZE_V1: u64 = 4;
/// Payload length word trailing either header
const PAYLOAD_LENGTH_SIZE: u64 = 4;

/// Raw menu icon pixels from a v2 image
pub struct Icon
{
	pixels: Box<[u8]>,
}

impl Icon
{
	fn from_raw(pixels: Vec<u8>) -> Self
	{
		debug_assert_eq!(pixels.len(), ICON_SIZE);
		Self {
			pixels: pixels.into_boxed_slice(),
		}
	}

	pub fn raw(&self) -> &[u8]
	{
		&self.pixels
	}
}

/// Container version, selected once by the magic string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageVariant
{
	V1,
	V2,
}

/// One partition destination plus the location of its payload in the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRecord
{
	pub kind: u8,
	pub subtype: u8,
	pub label: [u8; LABEL_SIZE],
	pub flags: u32,
	/// Capacity this partition is to be given in the rewritten table; at
	/// least `payload_length`
	pub declared_length: u32,
	/// Actual byte count following the record header
	pub payload_length: u32,
	payload_start: u64,
}

impl PartitionRecord
{
	/// The label with its null padding stripped, lossily decoded
	pub fn label_text(&self) -> String
	{
		let end = self.label.find_byte(0).unwrap_or(LABEL_SIZE);
		String::from_utf8_lossy(&self.label[..end]).into_owned()
	}
}

/// A firmware image opened for sequential reading
pub struct FirmwareImage
{
	reader: BufReader<File>,
	variant: ImageVariant,
	description: String,
	icon: Option<Icon>,
	/// Offset of the CRC trailer; records may not extend past this
	body_end: u64,
	/// Offset of the next unread record header
	cursor: u64,
}

impl FirmwareImage
{
	/// Open `path` and read the fixed-size leader (magic, description, and
	/// for v2 the icon). Partition records are left unread.
	pub fn open(path: &Path) -> Result<Self, FormatError>
	{
		let file = File::open(path)?;
		let file_size = file.metadata()?.len();
		let mut reader = BufReader::new(file);

		let mut magic = [0u8; MAGIC_V2.len()];
		read_exactly(&mut reader, &mut magic, "image header")?;
		let variant = if &magic == MAGIC_V2 {
			ImageVariant::V2
		} else if &magic == MAGIC_V1 {
			ImageVariant::V1
		} else {
			return Err(FormatError::HeaderMismatch);
		};

		let mut description = [0u8; DESCRIPTION_SIZE];
		read_exactly(&mut reader, &mut description, "image description")?;
		let end = description.find_byte(0).unwrap_or(DESCRIPTION_SIZE);
		let description = String::from_utf8_lossy(&description[..end]).into_owned();

		let icon = match variant {
			ImageVariant::V2 => {
				let mut pixels = vec![0u8; ICON_SIZE];
				read_exactly(&mut reader, &mut pixels, "image icon")?;
				Some(Icon::from_raw(pixels))
			},
			ImageVariant::V1 => None,
		};

		// Records run from here to the CRC trailer
		let cursor = reader.stream_position()?;
		let body_end = file_size
			.checked_sub(TRAILER_SIZE)
			.filter(|&end| end >= cursor)
			.ok_or(FormatError::Truncated {
				context: "image body",
			})?;

		debug!("opened {variant:?} image '{description}', {} record bytes", body_end - cursor);

		Ok(Self {
			reader,
			variant,
			description,
			icon,
			body_end,
			cursor,
		})
	}

	pub fn variant(&self) -> ImageVariant
	{
		self.variant
	}

	pub fn description(&self) -> &str
	{
		&self.description
	}

	pub fn icon(&self) -> Option<&Icon>
	{
		self.icon.as_ref()
	}

	/// Produce the next partition record, or `None` once the trailer has been
	/// reached
	///
	/// The stream position is realigned to the start of the next record no
	/// matter how much of the previous record's payload was consumed.
	pub fn next_partition(&mut self) -> Result<Option<PartitionRecord>, FormatError>
	{
		if self.cursor >= self.body_end {
			return Ok(None);
		}
		self.reader.seek(SeekFrom::Start(self.cursor))?;

		let header_size = match self.variant {
			ImageVariant::V2 => RECORD_HEADER_SIZE_V2,
			ImageVariant::V1 => RECORD_HEADER_SIZE_V1,
		};
		if self.body_end - self.cursor < header_size + PAYLOAD_LENGTH_SIZE {
			return Err(FormatError::Truncated {
				context: "partition record header",
			});
		}

		let record = match self.variant {
			ImageVariant::V2 => self.read_record_v2()?,
			ImageVariant::V1 => self.read_record_v1()?,
		};

		// Realign past the payload whether or not the caller reads it
		let payload_end = record.payload_start + u64::from(record.payload_length);
		if payload_end > self.body_end {
			return Err(FormatError::Truncated {
				context: "partition payload",
			});
		}
		self.cursor = payload_end;

		Ok(Some(record))
	}

	fn read_record_v2(&mut self) -> Result<PartitionRecord, FormatError>
	{
		let mut header = [0u8; (RECORD_HEADER_SIZE_V2 + PAYLOAD_LENGTH_SIZE) as usize];
		read_exactly(&mut self.reader, &mut header, "partition record header")?;

		let mut label = [0u8; LABEL_SIZE];
		label.copy_from_slice(&header[4..4 + LABEL_SIZE]);

		Ok(PartitionRecord {
			kind: header[0],
			subtype: header[1],
			label,
			flags: u32::from_le_bytes(header[20..24].try_into().unwrap()),
			declared_length: u32::from_le_bytes(header[24..28].try_into().unwrap()),
			payload_length: u32::from_le_bytes(header[28..32].try_into().unwrap()),
			payload_start: self.cursor + RECORD_HEADER_SIZE_V2 + PAYLOAD_LENGTH_SIZE,
		})
	}

	fn read_record_v1(&mut self) -> Result<PartitionRecord, FormatError>
	{
		let mut header = [0u8; (RECORD_HEADER_SIZE_V1 + PAYLOAD_LENGTH_SIZE) as usize];
		read_exactly(&mut self.reader, &mut header, "partition record header")?;

		let slot = u32::from_le_bytes(header[0..4].try_into().unwrap());
		let payload_length = u32::from_le_bytes(header[4..8].try_into().unwrap());
		if slot > u32::from(subtype::OTA_MASK) {
			warn!("legacy record names OTA slot {slot}, beyond what the table can address");
		}

		// Legacy records only know their OTA slot; everything else takes the
		// values the updater would have derived anyway
		Ok(PartitionRecord {
			kind: part_type::APP,
			subtype: subtype::OTA_BASE + (slot as u8 & subtype::OTA_MASK),
			label: [0u8; LABEL_SIZE],
			flags: 0,
			declared_length: payload_length,
			payload_length,
			payload_start: self.cursor + RECORD_HEADER_SIZE_V1 + PAYLOAD_LENGTH_SIZE,
		})
	}

	/// A bounded reader over `record`'s payload bytes
	pub fn payload(&mut self, record: &PartitionRecord) -> Result<PayloadReader<'_>, FormatError>
	{
		self.reader.seek(SeekFrom::Start(record.payload_start))?;
		Ok(PayloadReader {
			reader: &mut self.reader,
			remaining: u64::from(record.payload_length),
		})
	}
}

/// Streams exactly one record's payload, clamped so a consumer can never read
/// into the next record or the trailer
pub struct PayloadReader<'image>
{
	reader: &'image mut BufReader<File>,
	remaining: u64,
}

impl Read for PayloadReader<'_>
{
	fn read(&mut self, buffer: &mut [u8]) -> std::io::Result<usize>
	{
		let want = buffer.len().min(self.remaining as usize);
		if want == 0 {
			return Ok(0);
		}
		let count = self.reader.read(&mut buffer[..want])?;
		self.remaining -= count as u64;
		Ok(count)
	}
}

fn read_exactly(reader: &mut impl Read, buffer: &mut [u8], context: &'static str) -> Result<(), FormatError>
{
	reader.read_exact(buffer).map_err(|error| match error.kind() {
		std::io::ErrorKind::UnexpectedEof => FormatError::Truncated {
			context,
		},
		_ => FormatError::Io(error),
	})
}

// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024-2026 gofwutil contributors

//! The on-flash partition table: its 32-byte entry codec, and the
//! load / append / commit cycle the updater drives it through.
//!
//! The table lives in one flash sector at a fixed offset. The factory
//! application entry is the immutable landmark: everything the updater
//! places goes after it, and everything previously after it is discarded.
//! The table is read once per session, rebuilt in memory, and written back
//! exactly once; consumers that held a pre-commit copy must re-load, since
//! every offset after the factory boundary may have moved.

use std::borrow::Cow;

use bstr::ByteSlice;
use log::{debug, error, warn};

use crate::error::{ConfigError, FlashError, UpdateError};
use crate::flash::{ERASE_BLOCK_SIZE, ERASED_BYTE, Flash, PARTITION_ALIGN, align_up};

/// Flash offset of the partition table sector
pub const TABLE_OFFSET: u32 = 0x8000;
/// Bytes of table data within that sector
pub const TABLE_SIZE: usize = 0xc00;
/// Size of one serialized table entry
pub const ENTRY_SIZE: usize = 32;
/// Fixed capacity of the table
pub const MAX_ENTRIES: usize = TABLE_SIZE / ENTRY_SIZE;

/// Magic opening every live table entry
pub const ENTRY_MAGIC: u16 = 0x50aa;
/// Magic of the digest marker some tables carry after their last entry
pub const DIGEST_MAGIC: u16 = 0xebeb;

/// Bytes of a label field
pub const LABEL_SIZE: usize = 16;

/// Partition type codes
pub mod part_type
{
	pub const APP: u8 = 0x00;
	pub const DATA: u8 = 0x01;
}

/// Partition subtype codes
pub mod subtype
{
	pub const FACTORY: u8 = 0x00;
	/// OTA slot n is `OTA_BASE + n`
	pub const OTA_BASE: u8 = 0x10;
	pub const OTA_MASK: u8 = 0x0f;
	pub const TEST: u8 = 0x20;

	pub const DATA_OTA: u8 = 0x00;
	pub const DATA_RF: u8 = 0x01;
	pub const DATA_WIFI: u8 = 0x02;
}

/// Truncate or null-pad `text` into a label field
pub fn pack_label(text: &str) -> [u8; LABEL_SIZE]
{
	let mut label = [0u8; LABEL_SIZE];
	let bytes = text.as_bytes();
	let length = bytes.len().min(LABEL_SIZE);
	label[..length].copy_from_slice(&bytes[..length]);
	label
}

/// One 32-byte entry of the on-flash table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableEntry
{
	pub kind: u8,
	pub subtype: u8,
	pub offset: u32,
	pub size: u32,
	pub label: [u8; LABEL_SIZE],
	pub flags: u32,
}

impl TableEntry
{
	pub fn is_factory(&self) -> bool
	{
		self.kind == part_type::APP && self.subtype == subtype::FACTORY
	}

	/// OTA slot index, for application entries living in an OTA slot
	pub fn ota_slot(&self) -> Option<u8>
	{
		if self.kind == part_type::APP && self.subtype & !subtype::OTA_MASK == subtype::OTA_BASE {
			Some(self.subtype & subtype::OTA_MASK)
		} else {
			None
		}
	}

	/// First flash offset past this partition
	pub fn end(&self) -> u32
	{
		self.offset + self.size
	}

	pub fn label_text(&self) -> Cow<'_, str>
	{
		let end = self.label.find_byte(0).unwrap_or(LABEL_SIZE);
		String::from_utf8_lossy(&self.label[..end])
	}

	fn from_bytes(bytes: &[u8; ENTRY_SIZE]) -> Slot
	{
		match u16::from_le_bytes([bytes[0], bytes[1]]) {
			ENTRY_MAGIC => Slot::Entry(Self {
				kind: bytes[2],
				subtype: bytes[3],
				offset: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
				size: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
				label: bytes[12..12 + LABEL_SIZE].try_into().unwrap(),
				flags: u32::from_le_bytes(bytes[28..32].try_into().unwrap()),
			}),
			DIGEST_MAGIC => Slot::Digest,
			other => Slot::Terminator(other),
		}
	}

	fn to_bytes(self) -> [u8; ENTRY_SIZE]
	{
		let mut bytes = [0u8; ENTRY_SIZE];
		bytes[0..2].copy_from_slice(&ENTRY_MAGIC.to_le_bytes());
		bytes[2] = self.kind;
		bytes[3] = self.subtype;
		bytes[4..8].copy_from_slice(&self.offset.to_le_bytes());
		bytes[8..12].copy_from_slice(&self.size.to_le_bytes());
		bytes[12..12 + LABEL_SIZE].copy_from_slice(&self.label);
		bytes[28..32].copy_from_slice(&self.flags.to_le_bytes());
		bytes
	}
}

enum Slot
{
	Entry(TableEntry),
	Digest,
	Terminator(u16),
}

/// A partition the updater wants appended after the factory boundary
///
/// The table assigns the offset and the erase-aligned size itself; callers
/// only say how much capacity the partition is declared to need.
#[derive(Debug, Clone, Copy)]
pub struct NewPartition
{
	pub kind: u8,
	pub subtype: u8,
	pub label: [u8; LABEL_SIZE],
	pub flags: u32,
	pub declared_length: u32,
}

/// An in-memory copy of the partition table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTable
{
	entries: Vec<TableEntry>,
}

impl PartitionTable
{
	/// Build a table directly from entries, e.g. when composing a fresh
	/// flash image on the host
	pub fn from_entries(entries: Vec<TableEntry>) -> Self
	{
		Self {
			entries,
		}
	}

	/// Read the table sector out of `flash`
	///
	/// Scanning stops at the first erased slot, at the digest marker, or at
	/// capacity, whichever comes first.
	pub fn load(flash: &mut impl Flash) -> Result<Self, FlashError>
	{
		let mut sector = [0u8; TABLE_SIZE];
		flash.read(TABLE_OFFSET, &mut sector).map_err(|source| {
			error!("partition table read failed: {source}");
			FlashError::TableReadFailed
		})?;

		let mut entries = Vec::new();
		for index in 0..MAX_ENTRIES {
			let raw: &[u8; ENTRY_SIZE] =
				sector[index * ENTRY_SIZE..(index + 1) * ENTRY_SIZE].first_chunk().unwrap();
			match TableEntry::from_bytes(raw) {
				Slot::Entry(entry) => entries.push(entry),
				Slot::Digest => break,
				Slot::Terminator(0xffff) => break,
				Slot::Terminator(magic) => {
					warn!("slot {index} holds unknown magic {magic:#06x}, treating as end of table");
					break;
				},
			}
		}

		debug!("loaded partition table: {} entries", entries.len());
		Ok(Self {
			entries,
		})
	}

	pub fn entries(&self) -> &[TableEntry]
	{
		&self.entries
	}

	/// Index of the immutable factory application entry
	pub fn factory_index(&self) -> Result<usize, FlashError>
	{
		self.entries
			.iter()
			.position(TableEntry::is_factory)
			.ok_or(FlashError::NoFactoryPartition)
	}

	pub fn factory(&self) -> Result<&TableEntry, FlashError>
	{
		Ok(&self.entries[self.factory_index()?])
	}

	/// Number of slots a rewritten table keeps: everything up to and
	/// including the factory entry
	pub fn slots_through_factory(&self) -> Result<usize, FlashError>
	{
		Ok(self.factory_index()? + 1)
	}

	/// Build the replacement table: keep everything through the factory
	/// entry, then lay `parts` out contiguously from `start_offset`, each
	/// sized to its declared length rounded up to the partition alignment
	///
	/// Old entries past the factory boundary are not merged - they are gone.
	pub fn append(&self, parts: &[NewPartition], start_offset: u32) -> Result<Self, UpdateError>
	{
		let keep = self.slots_through_factory()?;
		if keep + parts.len() > MAX_ENTRIES {
			return Err(ConfigError::TooManyEntries {
				capacity: MAX_ENTRIES,
			}
			.into());
		}

		let mut entries = self.entries[..keep].to_vec();
		let mut offset = start_offset;
		for part in parts {
			let size = align_up(part.declared_length, PARTITION_ALIGN);
			entries.push(TableEntry {
				kind: part.kind,
				subtype: part.subtype,
				offset,
				size,
				label: part.label,
				flags: part.flags,
			});
			offset += size;
		}

		Ok(Self {
			entries,
		})
	}

	/// Erase the table sector and write this table back, trailing slots left
	/// in the erased state
	pub fn commit(&self, flash: &mut impl Flash) -> Result<(), FlashError>
	{
		let mut sector = [ERASED_BYTE; TABLE_SIZE];
		for (entry, slot) in self.entries.iter().zip(sector.chunks_exact_mut(ENTRY_SIZE)) {
			slot.copy_from_slice(&entry.to_bytes());
		}

		let result = flash
			.erase_range(TABLE_OFFSET, ERASE_BLOCK_SIZE)
			.and_then(|()| flash.write(TABLE_OFFSET, &sector));
		result.map_err(|source| {
			error!("partition table commit failed: {source}");
			FlashError::TableWriteFailed
		})?;

		debug!("committed partition table: {} entries", self.entries.len());
		Ok(())
	}
}

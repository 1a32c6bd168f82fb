// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024-2026 gofwutil contributors

//! Module for error handling code.
//!
//! The taxonomy mirrors how far a failing operation has let the update
//! session get: [`FormatError`] and [`ChecksumError`] occur strictly before
//! any flash mutation and are fully recoverable; [`FlashError`] occurs inside
//! the mutation window and ends the session; [`ConfigError`] is detected
//! before the offending entry's erase, so it is recoverable for that entry
//! but not for entries already written this session.

use std::io;

use thiserror::Error;

use crate::updater::Phase;

/// Errors raised while parsing a firmware image container
#[derive(Debug, Error)]
pub enum FormatError
{
	#[error("file does not start with a recognised firmware header")]
	HeaderMismatch,

	#[error("firmware image ends early while reading {context}")]
	Truncated
	{
		/// What was being read when the stream ran out (e.g. `"partition record header"`)
		context: &'static str,
	},

	#[error("failed to read firmware image")]
	Io(#[from] io::Error),
}

/// Errors raised by the integrity gate run before any flash operation
#[derive(Debug, Error)]
pub enum ChecksumError
{
	#[error("checksum mismatch: stored {expected:#010x}, computed {computed:#010x}")]
	Mismatch
	{
		expected: u32,
		computed: u32,
	},

	#[error("file too short to carry a checksum trailer")]
	TooShort,

	#[error("failed to read file while checksumming")]
	Io(#[from] io::Error),
}

/// Errors raised by the flash storage layer and everything that drives it
#[derive(Debug, Error)]
pub enum FlashError
{
	#[error("flash access at {offset:#x}+{length:#x} is outside the device ({capacity:#x} bytes)")]
	OutOfRange
	{
		offset: u32,
		length: u32,
		capacity: u32,
	},

	#[error("flash erase failed at {offset:#x} ({length:#x} bytes)")]
	EraseFailed
	{
		offset: u32,
		length: u32,
	},

	#[error("flash write failed at {offset:#x}")]
	WriteFailed
	{
		offset: u32,
	},

	#[error("flash read failed at {offset:#x}")]
	ReadFailed
	{
		offset: u32,
	},

	#[error("failed to read the partition table sector")]
	TableReadFailed,

	#[error("failed to write the partition table sector back")]
	TableWriteFailed,

	#[error("no factory partition in the on-flash table, cannot place new partitions")]
	NoFactoryPartition,

	#[error("no bootable application slot in the committed table")]
	NoBootCandidate,

	#[error("write cursor {cursor:#x} is not erase-aligned")]
	MisalignedCursor
	{
		cursor: u32,
	},

	#[error("out of memory while allocating a flash buffer")]
	OutOfMemory,
}

/// Errors in what an image asks for, as opposed to how it is encoded
#[derive(Debug, Error)]
pub enum ConfigError
{
	#[error("partition '{label}' payload ({payload_length} bytes) exceeds its declared capacity ({declared_length} bytes)")]
	PayloadExceedsDeclared
	{
		label: String,
		payload_length: u32,
		declared_length: u32,
	},

	#[error("image holds more partitions than the table has slots ({capacity})")]
	TooManyEntries
	{
		capacity: usize,
	},
}

/// Umbrella over every way an update session can fail
#[derive(Debug, Error)]
pub enum UpdateError
{
	#[error(transparent)]
	Format(#[from] FormatError),

	#[error(transparent)]
	Checksum(#[from] ChecksumError),

	#[error(transparent)]
	Flash(#[from] FlashError),

	#[error(transparent)]
	Config(#[from] ConfigError),
}

/// An [`UpdateError`] tagged with the session phase it occurred in
///
/// The phase is what the device shell keys its behaviour off: a recoverable
/// failure returns control to file selection, anything else must halt in a
/// diagnostic state because flash no longer matches the table.
#[derive(Debug, Error)]
#[error("update failed while {phase}: {source}")]
pub struct SessionError
{
	#[source]
	pub source: UpdateError,
	pub phase: Phase,
}

impl SessionError
{
	/// True when the failure struck before the first erase, meaning flash and
	/// the partition table are untouched and the session may simply be retried
	pub fn is_recoverable(&self) -> bool
	{
		self.phase < Phase::Writing
	}
}

// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024-2026 gofwutil contributors

//! The update session: one straight run through
//! read → verify → confirm → write → commit → activate → reboot.
//!
//! Everything before the first erase is free to fail or be cancelled; the
//! device is untouched and the session just ends. From the first erase
//! onward there is no abort path and no rollback - an interrupted write
//! leaves flash in a worse state than any completed one - so the only
//! defence is the hard checksum gate up front.

use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::boot::{self, BootControl};
use crate::checksum;
use crate::error::{ConfigError, SessionError, UpdateError};
use crate::flash::Flash;
use crate::flasher::{self, FlashCursor};
use crate::image::{FirmwareImage, Icon};
use crate::input::{Button, InputSource};
use crate::parttable::{MAX_ENTRIES, NewPartition, PartitionTable};

/// How often the confirmation wait re-reads the input snapshot
pub const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Where in the session an operation was when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase
{
	Idle,
	Reading,
	Verifying,
	AwaitingConfirmation,
	Writing,
	CommittingTable,
	Activating,
	Rebooting,
}

impl std::fmt::Display for Phase
{
	fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
	{
		let name = match self {
			Phase::Idle => "idle",
			Phase::Reading => "reading the image",
			Phase::Verifying => "verifying the image",
			Phase::AwaitingConfirmation => "waiting for confirmation",
			Phase::Writing => "writing partitions",
			Phase::CommittingTable => "committing the partition table",
			Phase::Activating => "activating the boot slot",
			Phase::Rebooting => "rebooting",
		};
		formatter.write_str(name)
	}
}

/// How a session that did not error ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome
{
	/// Everything written and activated; the reboot request has been issued
	Completed,
	/// The user backed out before anything touched flash
	Cancelled,
}

/// Semantic drawing surface the session reports through
///
/// The session never touches pixels; the display collaborator decides what
/// these requests look like on screen.
pub trait StatusScreen
{
	/// Identify the firmware about to be installed
	fn show_firmware(&mut self, description: &str, icon: Option<&Icon>);
	/// A short line describing what the session is doing right now
	fn status(&mut self, text: &str);
	/// Per-partition write progress
	fn show_progress(&mut self, label: &str, percent: u8);
	fn show_error(&mut self, message: &str);
	/// Flush pending draw requests to the panel
	fn present(&mut self);
}

/// Removable-storage listing, as consumed by the file-picker shell
pub trait StorageCatalog
{
	/// Names of files under `directory` carrying `extension`, sorted
	fn list_files(&self, directory: &Path, extension: &str) -> io::Result<Vec<String>>;
}

/// [`StorageCatalog`] over an ordinary mounted filesystem
pub struct HostCatalog;

impl StorageCatalog for HostCatalog
{
	fn list_files(&self, directory: &Path, extension: &str) -> io::Result<Vec<String>>
	{
		let mut names: Vec<String> = std::fs::read_dir(directory)?
			.filter_map(|entry| {
				let path = entry.ok()?.path();
				if path.extension()?.eq_ignore_ascii_case(extension) {
					Some(path.file_name()?.to_string_lossy().into_owned())
				} else {
					None
				}
			})
			.collect();
		names.sort_unstable();
		Ok(names)
	}
}

/// Run one full update session against the image at `image_path`
///
/// On error the failure is also rendered through `screen`; the caller reads
/// [`SessionError::is_recoverable`] to choose between returning to file
/// selection and halting for a power cycle.
pub fn run_session(
	image_path: &Path, flash: &mut impl Flash, boot: &mut impl BootControl, input: &impl InputSource,
	screen: &mut impl StatusScreen,
) -> Result<Outcome, SessionError>
{
	let result = drive(image_path, flash, boot, input, &mut *screen);
	if let Err(error) = &result {
		warn!("session failed: {error}");
		screen.show_error(&error.to_string());
		screen.present();
	}
	result
}

fn drive(
	image_path: &Path, flash: &mut impl Flash, boot: &mut impl BootControl, input: &impl InputSource,
	screen: &mut impl StatusScreen,
) -> Result<Outcome, SessionError>
{
	// Reading: pull in the fixed-size leader so the user can see what they
	// are about to install
	let image = FirmwareImage::open(image_path).map_err(at(Phase::Reading))?;
	info!("selected firmware: '{}'", image.description());
	screen.show_firmware(image.description(), image.icon());
	screen.present();
	// The record stream is forward-only; the write pass opens its own
	drop(image);

	// Verifying: the hard gate. Nothing may erase until the pristine file
	// has checked out in full.
	screen.status("Verifying image");
	screen.present();
	checksum::verify(image_path).map_err(at(Phase::Verifying))?;

	// AwaitingConfirmation: the last point where backing out is possible
	screen.status("Press Start to flash, B to cancel");
	screen.present();
	loop {
		let state = input.read_input();
		if state.is_pressed(Button::B) {
			info!("update cancelled before flashing began");
			screen.status("Cancelled");
			screen.present();
			return Ok(Outcome::Cancelled);
		}
		if state.is_pressed(Button::Start) {
			break;
		}
		thread::sleep(CONFIRM_POLL_INTERVAL);
	}

	// Writing: placement is keyed off the factory partition; everything
	// after it is fair game
	let table = PartitionTable::load(flash).map_err(at(Phase::Writing))?;
	let factory_end = table.factory().map_err(at(Phase::Writing))?.end();
	let kept_slots = table.slots_through_factory().map_err(at(Phase::Writing))?;
	let mut cursor = FlashCursor::new(factory_end);

	let mut image = FirmwareImage::open(image_path).map_err(at(Phase::Writing))?;
	let mut new_parts: Vec<NewPartition> = Vec::new();
	while let Some(record) = image.next_partition().map_err(at(Phase::Writing))? {
		let label = record.label_text();

		// Both checks run before this entry's erase, while bailing out is
		// still harmless for it
		if record.payload_length > record.declared_length {
			return Err(at(Phase::Writing)(ConfigError::PayloadExceedsDeclared {
				label,
				payload_length: record.payload_length,
				declared_length: record.declared_length,
			}));
		}
		if kept_slots + new_parts.len() + 1 > MAX_ENTRIES {
			return Err(at(Phase::Writing)(ConfigError::TooManyEntries {
				capacity: MAX_ENTRIES,
			}));
		}

		let offset = cursor.advance(record.declared_length);
		screen.status(&format!("Writing '{label}'"));
		screen.present();

		let mut payload = image.payload(&record).map_err(at(Phase::Writing))?;
		flasher::write_partition(flash, offset, record.payload_length, &mut payload, &mut |percent| {
			screen.show_progress(&label, percent);
			screen.present();
		})
		.map_err(at(Phase::Writing))?;

		new_parts.push(NewPartition {
			kind: record.kind,
			subtype: record.subtype,
			label: record.label,
			flags: record.flags,
			declared_length: record.declared_length,
		});
	}

	// CommittingTable: one erase, one write, and the new layout is real
	screen.status("Committing partition table");
	screen.present();
	let rebuilt = table.append(&new_parts, factory_end).map_err(at(Phase::CommittingTable))?;
	rebuilt.commit(flash).map_err(at(Phase::CommittingTable))?;

	// Activating: the pre-commit table is stale now, go back to flash
	let committed = PartitionTable::load(flash).map_err(at(Phase::Activating))?;
	boot::activate(boot, &committed, boot::default_boot_predicate).map_err(at(Phase::Activating))?;

	screen.status("Rebooting");
	screen.present();
	boot.reboot();
	Ok(Outcome::Completed)
}

fn at<E: Into<UpdateError>>(phase: Phase) -> impl FnOnce(E) -> SessionError
{
	move |source| SessionError {
		source: source.into(),
		phase,
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn recovery_boundary_sits_at_writing()
	{
		for phase in [Phase::Idle, Phase::Reading, Phase::Verifying, Phase::AwaitingConfirmation] {
			assert!(phase < Phase::Writing);
		}
		for phase in [Phase::Writing, Phase::CommittingTable, Phase::Activating, Phase::Rebooting] {
			assert!(phase >= Phase::Writing);
		}
	}
}

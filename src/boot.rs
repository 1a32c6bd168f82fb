// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024-2026 gofwutil contributors

//! Boot slot selection, run only after the new partition table is on flash.
//!
//! Until [`BootControl::set_boot_target`] succeeds, the boot-control record
//! still points at whatever the device was running, so failing here leaves a
//! bootable device behind.

use log::info;

use crate::error::FlashError;
use crate::parttable::{PartitionTable, TableEntry};

/// The device's boot-control record and reset line
pub trait BootControl
{
	/// Record `entry` as the partition to boot from next
	fn set_boot_target(&mut self, entry: &TableEntry) -> Result<(), FlashError>;

	/// Trigger a restart. On hardware this never returns; test doubles note
	/// the request and do.
	fn reboot(&mut self);
}

/// The slot a freshly written image boots from: the first OTA application slot
pub fn default_boot_predicate(entry: &TableEntry) -> bool
{
	entry.ota_slot() == Some(0)
}

/// Find the first entry satisfying `predicate` and record it as the next
/// boot target
///
/// `table` must be freshly loaded from flash - offsets in a pre-commit copy
/// may no longer describe what is actually there.
pub fn activate(
	boot: &mut impl BootControl, table: &PartitionTable, predicate: impl Fn(&TableEntry) -> bool,
) -> Result<(), FlashError>
{
	let target = table
		.entries()
		.iter()
		.find(|entry| predicate(entry))
		.ok_or(FlashError::NoBootCandidate)?;
	info!("next boot target: '{}' at {:#x}", target.label_text(), target.offset);
	boot.set_boot_target(target)
}

#[cfg(test)]
mod tests
{
	use super::*;
	use crate::parttable::{pack_label, part_type, subtype};

	struct RecordingBoot
	{
		target: Option<(u8, u8, u32)>,
	}

	impl BootControl for RecordingBoot
	{
		fn set_boot_target(&mut self, entry: &TableEntry) -> Result<(), FlashError>
		{
			self.target = Some((entry.kind, entry.subtype, entry.offset));
			Ok(())
		}

		fn reboot(&mut self) {}
	}

	fn entry(kind: u8, sub: u8, offset: u32, label: &str) -> TableEntry
	{
		TableEntry {
			kind,
			subtype: sub,
			offset,
			size: 0x40000,
			label: pack_label(label),
			flags: 0,
		}
	}

	#[test]
	fn activates_first_ota_slot()
	{
		let table = PartitionTable::from_entries(vec![
			entry(part_type::APP, subtype::FACTORY, 0x10000, "factory"),
			entry(part_type::DATA, subtype::DATA_OTA, 0x50000, "save"),
			entry(part_type::APP, subtype::OTA_BASE, 0x110000, "app"),
			entry(part_type::APP, subtype::OTA_BASE + 1, 0x150000, "app2"),
		]);

		let mut boot = RecordingBoot {
			target: None,
		};
		activate(&mut boot, &table, default_boot_predicate).unwrap();
		assert_eq!(boot.target, Some((part_type::APP, subtype::OTA_BASE, 0x110000)));
	}

	#[test]
	fn missing_slot_reported()
	{
		let table = PartitionTable::from_entries(vec![entry(part_type::APP, subtype::FACTORY, 0x10000, "factory")]);
		let mut boot = RecordingBoot {
			target: None,
		};
		assert!(matches!(
			activate(&mut boot, &table, default_boot_predicate),
			Err(FlashError::NoBootCandidate)
		));
		assert!(boot.target.is_none());
	}
}

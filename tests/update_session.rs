// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024-2026 gofwutil contributors

#[cfg(test)]
mod tests
{
	use std::path::Path;

	use color_eyre::eyre::Result;
	use gofwutil::boot::BootControl;
	use gofwutil::error::{ConfigError, FlashError, UpdateError};
	use gofwutil::flash::{FLASH_CAPACITY, MemFlash};
	use gofwutil::image::{DESCRIPTION_SIZE, ICON_SIZE, Icon, ImageWriter, MAGIC_V2, PartitionSpec};
	use gofwutil::input::{Button, InputState};
	use gofwutil::parttable::{PartitionTable, TableEntry, pack_label, part_type, subtype};
	use gofwutil::updater::{Outcome, Phase, StatusScreen, run_session};

	struct TestScreen
	{
		statuses: Vec<String>,
		errors: Vec<String>,
	}

	impl TestScreen
	{
		fn new() -> Self
		{
			Self {
				statuses: Vec::new(),
				errors: Vec::new(),
			}
		}
	}

	impl StatusScreen for TestScreen
	{
		fn show_firmware(&mut self, description: &str, _icon: Option<&Icon>)
		{
			self.statuses.push(format!("firmware: {description}"));
		}

		fn status(&mut self, text: &str)
		{
			self.statuses.push(text.to_string());
		}

		fn show_progress(&mut self, _label: &str, _percent: u8) {}

		fn show_error(&mut self, message: &str)
		{
			self.errors.push(message.to_string());
		}

		fn present(&mut self) {}
	}

	struct RecordingBoot
	{
		target: Option<(u8, u8, u32)>,
		rebooted: bool,
	}

	impl RecordingBoot
	{
		fn new() -> Self
		{
			Self {
				target: None,
				rebooted: false,
			}
		}
	}

	impl BootControl for RecordingBoot
	{
		fn set_boot_target(&mut self, entry: &TableEntry) -> Result<(), FlashError>
		{
			self.target = Some((entry.kind, entry.subtype, entry.offset));
			Ok(())
		}

		fn reboot(&mut self)
		{
			self.rebooted = true;
		}
	}

	fn entry(kind: u8, sub: u8, offset: u32, size: u32, label: &str) -> TableEntry
	{
		TableEntry {
			kind,
			subtype: sub,
			offset,
			size,
			label: pack_label(label),
			flags: 0,
		}
	}

	/// A device as it comes back from the field: stock layout plus a stale
	/// OTA entry from some previous firmware
	fn field_device() -> Result<MemFlash>
	{
		let mut flash = MemFlash::new(FLASH_CAPACITY)?;
		PartitionTable::from_entries(vec![
			entry(part_type::DATA, subtype::DATA_WIFI, 0x9000, 0x4000, "nvs"),
			entry(part_type::DATA, subtype::DATA_OTA, 0xd000, 0x2000, "otadata"),
			entry(part_type::DATA, subtype::DATA_RF, 0xf000, 0x1000, "phy_init"),
			entry(part_type::APP, subtype::FACTORY, 0x10000, 0x100000, "factory"),
			entry(part_type::APP, subtype::OTA_BASE + 1, 0x110000, 0x80000, "stale"),
		])
		.commit(&mut flash)?;
		flash.journal.clear();
		Ok(flash)
	}

	fn payload_pattern(length: usize, seed: u8) -> Vec<u8>
	{
		(0..length).map(|index| (index as u8).wrapping_mul(13).wrapping_add(seed)).collect()
	}

	fn fixture_image(path: &Path) -> Result<(Vec<u8>, Vec<u8>)>
	{
		let app = payload_pattern(0x21025, 5);
		let saves = payload_pattern(0x1800, 11);
		let mut writer = ImageWriter::new("Go Play Micro");
		writer
			.partition(PartitionSpec::new(part_type::APP, subtype::OTA_BASE, 0x30000, "app"), app.clone())
			.partition(PartitionSpec::new(part_type::DATA, subtype::DATA_OTA, 0x8000, "saves"), saves.clone());
		writer.write_file(path)?;
		Ok((app, saves))
	}

	fn press(button: Button) -> impl Fn() -> InputState
	{
		move || InputState::default().with(button)
	}

	#[test]
	fn full_session_places_writes_and_activates() -> Result<()>
	{
		let image = tempfile::NamedTempFile::new()?;
		let (app, saves) = fixture_image(image.path())?;

		let mut flash = field_device()?;
		let mut boot = RecordingBoot::new();
		let mut screen = TestScreen::new();
		let outcome = run_session(image.path(), &mut flash, &mut boot, &press(Button::Start), &mut screen)
			.expect("session should succeed");
		assert_eq!(outcome, Outcome::Completed);

		// Placement: factory ends at 0x110000; declared 0x30000 rounds to
		// 0x40000, declared 0x8000 rounds to 0x10000
		let table = PartitionTable::load(&mut flash)?;
		let entries = table.entries();
		assert_eq!(entries.len(), 6);
		assert!(entries[3].is_factory());
		assert_eq!((entries[4].offset, entries[4].size), (0x110000, 0x40000));
		assert_eq!((entries[5].offset, entries[5].size), (0x150000, 0x10000));
		assert_eq!(entries[4].label_text(), "app");
		assert_eq!(entries[5].label_text(), "saves");

		// Payloads landed at their assigned offsets
		assert_eq!(&flash.contents()[0x110000..0x110000 + app.len()], app.as_slice());
		assert_eq!(&flash.contents()[0x150000..0x150000 + saves.len()], saves.as_slice());

		assert_eq!(boot.target, Some((part_type::APP, subtype::OTA_BASE, 0x110000)));
		assert!(boot.rebooted);
		Ok(())
	}

	#[test]
	fn rerunning_the_same_image_is_idempotent() -> Result<()>
	{
		let image = tempfile::NamedTempFile::new()?;
		fixture_image(image.path())?;

		let mut flash = field_device()?;

		let mut boot = RecordingBoot::new();
		run_session(image.path(), &mut flash, &mut boot, &press(Button::Start), &mut TestScreen::new())
			.expect("first run should succeed");
		let first_contents = flash.contents().to_vec();
		let first_table = PartitionTable::load(&mut flash)?;

		let mut boot = RecordingBoot::new();
		run_session(image.path(), &mut flash, &mut boot, &press(Button::Start), &mut TestScreen::new())
			.expect("second run should succeed");

		assert_eq!(flash.contents(), first_contents.as_slice());
		assert_eq!(PartitionTable::load(&mut flash)?, first_table);
		assert!(boot.rebooted);
		Ok(())
	}

	#[test]
	fn cancelling_before_flashing_leaves_no_trace() -> Result<()>
	{
		let image = tempfile::NamedTempFile::new()?;
		fixture_image(image.path())?;

		let mut flash = field_device()?;
		let baseline = flash.contents().to_vec();

		let mut boot = RecordingBoot::new();
		let outcome = run_session(image.path(), &mut flash, &mut boot, &press(Button::B), &mut TestScreen::new())
			.expect("cancellation is not an error");
		assert_eq!(outcome, Outcome::Cancelled);

		assert_eq!(flash.contents(), baseline.as_slice());
		assert!(flash.journal.is_empty());
		assert!(boot.target.is_none());
		assert!(!boot.rebooted);
		Ok(())
	}

	#[test]
	fn missing_factory_partition_fails_without_mutation() -> Result<()>
	{
		let image = tempfile::NamedTempFile::new()?;
		fixture_image(image.path())?;

		let mut flash = MemFlash::new(FLASH_CAPACITY)?;
		PartitionTable::from_entries(vec![entry(part_type::DATA, subtype::DATA_WIFI, 0x9000, 0x4000, "nvs")])
			.commit(&mut flash)?;
		flash.journal.clear();

		let mut boot = RecordingBoot::new();
		let mut screen = TestScreen::new();
		let error = run_session(image.path(), &mut flash, &mut boot, &press(Button::Start), &mut screen)
			.expect_err("no factory entry to key off");

		assert_eq!(error.phase, Phase::Writing);
		assert!(matches!(error.source, UpdateError::Flash(FlashError::NoFactoryPartition)));
		assert!(!error.is_recoverable());
		assert!(flash.journal.is_empty());
		assert!(!screen.errors.is_empty());
		Ok(())
	}

	#[test]
	fn oversized_payload_detected_before_its_erase() -> Result<()>
	{
		// Hand-build a v2 image whose record claims less capacity than its
		// payload; the encoder refuses to make one
		let mut body = MAGIC_V2.to_vec();
		body.extend_from_slice(&[0u8; DESCRIPTION_SIZE]);
		body.extend_from_slice(&[0u8; ICON_SIZE]);
		body.push(part_type::APP);
		body.push(subtype::OTA_BASE);
		body.extend_from_slice(&[0u8; 2]);
		body.extend_from_slice(&pack_label("bloated"));
		body.extend_from_slice(&0u32.to_le_bytes());
		body.extend_from_slice(&16u32.to_le_bytes()); // declared
		body.extend_from_slice(&32u32.to_le_bytes()); // payload length
		body.extend_from_slice(&[0xabu8; 32]);
		let crc = crc32fast::hash(&body);
		body.extend_from_slice(&crc.to_le_bytes());

		let image = tempfile::NamedTempFile::new()?;
		std::fs::write(image.path(), &body)?;

		let mut flash = field_device()?;
		let mut boot = RecordingBoot::new();
		let error =
			run_session(image.path(), &mut flash, &mut boot, &press(Button::Start), &mut TestScreen::new())
				.expect_err("payload larger than declared capacity");

		assert_eq!(error.phase, Phase::Writing);
		assert!(matches!(
			error.source,
			UpdateError::Config(ConfigError::PayloadExceedsDeclared { .. })
		));
		assert!(flash.journal.is_empty());
		Ok(())
	}
}

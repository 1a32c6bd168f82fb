// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024-2026 gofwutil contributors

//! `imgextract` - inspect a full flash dump, trim it down to its occupied
//! extent, and reset the RF calibration region so the image can be flashed
//! onto a different unit.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::{Result, bail};
use gofwutil::flash::{ERASED_BYTE, MemFlash};
use gofwutil::parttable::{PartitionTable, TABLE_OFFSET, TABLE_SIZE, part_type, subtype};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

/// RF calibration payload a trimmed image is re-seeded with, in place of the
/// unit-specific data the dump carried
const DEFAULT_RF_CAL: &[u8] = &[
	0x01, 0x00, 0x02, 0x00, 0x50, 0x48, 0x59, 0x00, 0x04, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
	0xe0, 0x2e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x14, 0x14, 0x14, 0x14, 0x14, 0x10, 0x10, 0x0c,
	0x0c, 0x0c, 0x0c, 0x0c, 0x0c, 0x0c, 0x0c, 0x0c, 0xf8, 0xf8, 0x52, 0x4e, 0x4a, 0x44, 0x40, 0x38,
	0x00, 0x00, 0x01, 0x01, 0x02, 0x03, 0x04, 0x05, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
	0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
	0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
	0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
	0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xe1, 0x0a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

#[derive(Parser)]
#[command(version, about = "Inspect a flash dump and write a trimmed, reflashable image", arg_required_else_help(true))]
struct CliArguments
{
	/// Full flash dump, e.g. the output of `esptool.py read_flash`
	dump: PathBuf,
}

fn main() -> Result<()>
{
	color_eyre::install()?;
	env_logger::Builder::new()
		.filter_level(log::LevelFilter::Info)
		.parse_default_env()
		.init();

	let cli_args = CliArguments::parse();
	let contents = fs::read(&cli_args.dump)?;
	if contents.len() < TABLE_OFFSET as usize + TABLE_SIZE {
		bail!("'{}' is too small to hold a partition table", cli_args.dump.display());
	}

	let mut flash = MemFlash::from_contents(contents);
	let table = PartitionTable::load(&mut flash)?;
	if table.entries().is_empty() {
		bail!("no partition table found in '{}'", cli_args.dump.display());
	}

	for (index, entry) in table.entries().iter().enumerate() {
		println!("partition {index}:");
		println!("\ttype={:#04x}", entry.kind);
		println!("\tsubtype={:#04x}", entry.subtype);
		println!("\t[pos.offset={:#010x}, pos.size={:#010x}]", entry.offset, entry.size);
		println!("\tlabel='{:<16}'", entry.label_text());
		println!("\tflags={:#010x}", entry.flags);
		println!();
	}

	// The image only needs to reach the end of the last partition
	let data_end = table.entries().iter().map(|entry| entry.end()).max().unwrap_or(0) as usize;
	if data_end > flash.contents().len() {
		bail!("partition table describes {data_end:#x} bytes but the dump holds {:#x}", flash.contents().len());
	}

	let image_name = cli_args.dump.with_extension("img");
	println!(
		"./esptool.py --port \"/dev/ttyUSB0\" --baud 921600 write_flash -z --flash_mode dio --flash_freq 80m \
		 --flash_size detect 0 {}",
		image_name.display()
	);

	let mut image = flash.contents()[..data_end].to_vec();

	// Unit-specific RF calibration must not travel to another device; blank
	// the partition and seed it with the stock payload
	let rf_entry = table
		.entries()
		.iter()
		.find(|entry| entry.kind == part_type::DATA && entry.subtype == subtype::DATA_RF);
	if let Some(entry) = rf_entry {
		if (entry.size as usize) < DEFAULT_RF_CAL.len() {
			bail!("RF calibration partition is smaller than the stock payload");
		}
		let start = entry.offset as usize;
		let end = entry.end() as usize;
		image[start..end].fill(ERASED_BYTE);
		image[start..start + DEFAULT_RF_CAL.len()].copy_from_slice(DEFAULT_RF_CAL);
		println!("reset RF calibration data at {:#x}", entry.offset);
	}

	let progress_bar = ProgressBar::new(image.len() as u64).with_style(
		ProgressStyle::default_bar()
			.template(" {percent:>3}% |{bar:50}| {bytes}/{total_bytes}")
			.unwrap(),
	);
	let mut output = fs::File::create(&image_name)?;
	for chunk in image.chunks(64 * 1024) {
		output.write_all(chunk)?;
		progress_bar.inc(chunk.len() as u64);
	}
	progress_bar.finish();

	println!("{} {}", "Wrote".green(), image_name.display());
	Ok(())
}

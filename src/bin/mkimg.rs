// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024-2026 gofwutil contributors

//! `mkimg` - compose a flat flash image by dropping binaries at absolute
//! offsets inside an erased 16 MiB buffer.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::{Result, bail, eyre};
use gofwutil::flash::{FLASH_CAPACITY, Flash, MemFlash};
use owo_colors::OwoColorize;

#[derive(Parser)]
#[command(version, about = "Compose a flat flash image from binaries at fixed offsets", arg_required_else_help(true))]
struct CliArguments
{
	/// File the composed image is written to
	output: PathBuf,

	#[arg(value_name = "OFFSET BINARY", num_args = 1..)]
	/// Pairs of flash offset (decimal or 0x-prefixed) and binary to place there
	placements: Vec<String>,
}

fn parse_offset(text: &str) -> Result<u32>
{
	let parsed = match text.strip_prefix("0x") {
		Some(hex) => u32::from_str_radix(hex, 16),
		None => text.parse(),
	};
	parsed.map_err(|_| eyre!("'{text}' is not a flash offset"))
}

fn main() -> Result<()>
{
	color_eyre::install()?;
	env_logger::Builder::new()
		.filter_level(log::LevelFilter::Info)
		.parse_default_env()
		.init();

	let cli_args = CliArguments::parse();
	if cli_args.placements.is_empty() || cli_args.placements.len() % 2 != 0 {
		bail!("placements must come as `offset binary` pairs");
	}

	let mut flash = MemFlash::new(FLASH_CAPACITY)?;
	for pair in cli_args.placements.chunks_exact(2) {
		let offset = parse_offset(&pair[0])?;
		let binary = PathBuf::from(&pair[1]);
		let data =
			fs::read(&binary).map_err(|error| eyre!("failed to read '{}': {error}", binary.display()))?;

		println!("offset={offset:#x}, fileName='{}', fileSize={}", binary.display(), data.len());
		flash
			.write(offset, &data)
			.map_err(|error| eyre!("'{}' does not fit: {error}", binary.display()))?;
	}

	let extent = flash.high_water() as usize;
	fs::write(&cli_args.output, &flash.contents()[..extent])?;
	println!("{} {} ({extent:#x} bytes)", "Wrote".green(), cli_args.output.display());
	Ok(())
}

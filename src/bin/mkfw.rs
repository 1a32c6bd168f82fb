// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024-2026 gofwutil contributors

//! `mkfw` - encode application binaries into a flashable `firmware.fw`.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use color_eyre::eyre::{Result, bail, eyre};
use gofwutil::image::{ImageWriter, MAGIC_V2, PartitionSpec};
use owo_colors::OwoColorize;

/// Name of the image this tool always writes, matching what the on-device
/// flasher looks for
const OUTPUT_FILE: &str = "firmware.fw";

/// Arguments per partition: type, subtype, length, label, binary
const ARGS_PER_PARTITION: usize = 5;

#[derive(Parser)]
#[command(version, about = "Encode binaries into an ODROID-GO firmware image", arg_required_else_help(true))]
struct CliArguments
{
	/// Description shown by the flasher menu (at most 39 characters survive)
	description: String,

	#[arg(value_name = "TYPE SUBTYPE LENGTH LABEL BINARY", num_args = 1..)]
	/// One group of five values per partition; LENGTH is the declared
	/// capacity and may exceed the binary's size
	partitions: Vec<String>,
}

fn parse_number(text: &str) -> Result<u32>
{
	let parsed = match text.strip_prefix("0x") {
		Some(hex) => u32::from_str_radix(hex, 16),
		None => text.parse(),
	};
	parsed.map_err(|_| eyre!("'{text}' is not a number"))
}

fn main() -> Result<()>
{
	color_eyre::install()?;
	env_logger::Builder::new()
		.filter_level(log::LevelFilter::Info)
		.parse_default_env()
		.init();

	let cli_args = CliArguments::parse();
	if cli_args.partitions.is_empty() || cli_args.partitions.len() % ARGS_PER_PARTITION != 0 {
		bail!("partitions must come as groups of `type subtype length label binary`");
	}

	println!("HEADER='{}'", String::from_utf8_lossy(MAGIC_V2));
	println!("FirmwareDescription='{}'", cli_args.description);

	let mut writer = ImageWriter::new(&cli_args.description);
	for (index, group) in cli_args.partitions.chunks_exact(ARGS_PER_PARTITION).enumerate() {
		let kind = u8::try_from(parse_number(&group[0])?).map_err(|_| eyre!("partition type out of range"))?;
		let subtype = u8::try_from(parse_number(&group[1])?).map_err(|_| eyre!("partition subtype out of range"))?;
		let declared_length = parse_number(&group[2])?;
		let label = &group[3];
		let binary = PathBuf::from(&group[4]);

		let payload = fs::read(&binary)
			.map_err(|error| eyre!("failed to read '{}': {error}", binary.display()))?;
		println!(
			"[{index}] type={kind}, subtype={subtype}, length={declared_length}, label={label:<16} payload={} ({})",
			payload.len(),
			binary.display()
		);

		writer.partition(PartitionSpec::new(kind, subtype, declared_length, label), payload);
	}

	writer.write_file(Path::new(OUTPUT_FILE))?;
	println!("{} {OUTPUT_FILE}", "Wrote".green());
	Ok(())
}

// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024-2026 gofwutil contributors

//! Encoder for the current (v2) image container, shared by the `mkfw` tool
//! and the round-trip tests.
//!
//! The encoder runs on the host, so unlike the device-side reader it is free
//! to buffer whole payloads.

use std::fs;
use std::path::Path;

use log::debug;

use super::{DESCRIPTION_SIZE, ICON_SIZE, MAGIC_V2};
use crate::error::{ConfigError, FormatError, UpdateError};
use crate::parttable::{LABEL_SIZE, pack_label};

/// Everything `mkfw` knows about one partition besides its payload
#[derive(Debug, Clone)]
pub struct PartitionSpec
{
	pub kind: u8,
	pub subtype: u8,
	pub label: [u8; LABEL_SIZE],
	pub flags: u32,
	pub declared_length: u32,
}

/// Builds a v2 firmware image in memory and writes it out with its trailer
pub struct ImageWriter
{
	description: [u8; DESCRIPTION_SIZE],
	icon: Option<Vec<u8>>,
	partitions: Vec<(PartitionSpec, Vec<u8>)>,
}

impl ImageWriter
{
	pub fn new(description: &str) -> Self
	{
		// Null-padded, and the final byte always terminates
		let mut padded = [0u8; DESCRIPTION_SIZE];
		let text = description.as_bytes();
		let length = text.len().min(DESCRIPTION_SIZE - 1);
		padded[..length].copy_from_slice(&text[..length]);

		Self {
			description: padded,
			icon: None,
			partitions: Vec::new(),
		}
	}

	/// Use `pixels` (RGB565, 86×48) as the menu icon instead of a blank block
	pub fn icon(&mut self, pixels: Vec<u8>) -> &mut Self
	{
		debug_assert_eq!(pixels.len(), ICON_SIZE);
		self.icon = Some(pixels);
		self
	}

	pub fn partition(&mut self, spec: PartitionSpec, payload: Vec<u8>) -> &mut Self
	{
		self.partitions.push((spec, payload));
		self
	}

	/// Serialize the image, trailer included
	pub fn to_bytes(&self) -> Result<Vec<u8>, UpdateError>
	{
		let mut out = Vec::new();
		out.extend_from_slice(MAGIC_V2);
		out.extend_from_slice(&self.description);
		match &self.icon {
			Some(pixels) => out.extend_from_slice(pixels),
			None => out.resize(out.len() + ICON_SIZE, 0),
		}

		for (spec, payload) in &self.partitions {
			let payload_length =
				u32::try_from(payload.len()).map_err(|_| ConfigError::PayloadExceedsDeclared {
					label: String::from_utf8_lossy(&spec.label).into_owned(),
					payload_length: u32::MAX,
					declared_length: spec.declared_length,
				})?;
			if payload_length > spec.declared_length {
				return Err(ConfigError::PayloadExceedsDeclared {
					label: String::from_utf8_lossy(&spec.label).into_owned(),
					payload_length,
					declared_length: spec.declared_length,
				}
				.into());
			}

			out.push(spec.kind);
			out.push(spec.subtype);
			out.extend_from_slice(&[0u8; 2]);
			out.extend_from_slice(&spec.label);
			out.extend_from_slice(&spec.flags.to_le_bytes());
			out.extend_from_slice(&spec.declared_length.to_le_bytes());
			out.extend_from_slice(&payload_length.to_le_bytes());
			out.extend_from_slice(payload);
		}

		let crc = crc32fast::hash(&out);
		out.extend_from_slice(&crc.to_le_bytes());
		debug!("encoded image: {} partitions, {} bytes, crc {crc:#010x}", self.partitions.len(), out.len());
		Ok(out)
	}

	pub fn write_file(&self, path: &Path) -> Result<(), UpdateError>
	{
		let bytes = self.to_bytes()?;
		fs::write(path, bytes).map_err(FormatError::Io)?;
		Ok(())
	}
}

/// Convenience for building a [`PartitionSpec`] from CLI-shaped arguments
impl PartitionSpec
{
	pub fn new(kind: u8, subtype: u8, declared_length: u32, label: &str) -> Self
	{
		Self {
			kind,
			subtype,
			label: pack_label(label),
			flags: 0,
			declared_length,
		}
	}
}

// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2024-2026 gofwutil contributors

//! Firmware update engine and image tooling for the ODROID-GO handheld.
//!
//! The library side implements the firmware image container (reader and
//! encoder), the CRC-32 integrity gate, the on-flash partition table and its
//! replacement cycle, the block-aligned erase/write engine, and boot slot
//! selection - everything between "a `.fw` file on the SD card" and "the
//! device reboots into it". Peripheral access (flash part, buttons, panel)
//! goes through traits so the same pipeline runs against hardware drivers on
//! the device and against [`flash::MemFlash`] in tools and tests.
//!
//! Integrity note: the image format carries a CRC-32 trailer and nothing
//! else. That catches corruption in transit or on the card, but it is not a
//! signature and authenticates nobody; this is a compatibility constraint of
//! the installed base, not a recommendation.

pub mod boot;
pub mod checksum;
pub mod error;
pub mod flash;
pub mod flasher;
pub mod image;
pub mod input;
pub mod parttable;
pub mod updater;

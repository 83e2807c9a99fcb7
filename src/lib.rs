//! `spacedock` injects boot payloads into Tegra X1 devices sitting in
//! RCM mode, driving the bootROM stack smash known as
//! [Fusee Gelee](https://github.com/Qyriad/fusee-launcher) (CVE-2018-6242).
//!
//! The exploit image sent to the device has the following structure:
//! 1. A length field which the bootROM reads as the transfer size, set
//!    to the maximum so the device accepts the whole image.
//! 2. A stack spray of the intermezzo address, overriding the saved
//!    return address when the overflow fires.
//! 3. The intermezzo relocator, which chains into the user payload at
//!    its final load address.
//! 4. The user payload itself.
//!
//! [`payload`] builds that image, [`usb`] moves it to the device and
//! issues the oversized control transfer that triggers the overflow,
//! and [`watcher`] ties both to a background thread that reacts to
//! device attach events. [`catalog`] and [`selection`] cover payload
//! discovery and the shared "currently selected payload" state read by
//! the watcher.

pub use owo_colors;
pub use rusb;

#[macro_use]
pub mod macros;

pub mod catalog;
pub mod error;
pub mod payload;
pub mod selection;
pub mod usb;
pub mod watcher;

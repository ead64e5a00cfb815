//! ADB (Android Debug Bridge) module for Android device control
//!
//! This module provides:
//! - `runner`: One bridge invocation with timeout and cancellation
//! - `connection`: Device discovery and the live device set
//! - `device`: Argument builders for input, keys and app lifecycle
//! - `input`: Text injection strategies and text-file helpers
//! - `screenshot`: Screen capture and frame decoding

mod connection;
pub mod device;
mod input;
mod runner;
mod screenshot;

pub use connection::{parse_devices, parse_wm_size, Device, DeviceRegistry, Resolution};
pub use device::{KeyCode, ScrollDirection};
pub use input::{
    escape_text, keyboard_broadcast, load_lines, random_line, strip_emoji, strip_emoji_file,
    text_commands, TextStrategy,
};
pub use runner::{CommandOutput, CommandRunner, DeviceCommand};
pub use screenshot::{capture, capture_args, decode_frame, resize_frame};

//! Text injection and text-file helpers

use std::path::Path;

use base64::{engine::general_purpose, Engine as _};
use lazy_static::lazy_static;
use rand::seq::SliceRandom;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

/// How text reaches the focused input field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextStrategy {
    /// One `input text` call for the whole payload
    #[default]
    WholeString,
    /// One `input text` call per character, paced by the character delay
    PerCharacter,
    /// Base64 broadcast to the ADB Keyboard IME; handles non-ASCII text
    AdbKeyboard,
}

const SHELL_SPECIAL: &[char] = &[
    '\\', '\'', '"', '`', '$', '&', '|', ';', '<', '>', '(', ')', '*', '~', '?', '!', '#',
];

/// Escape a payload for `input text`: spaces become `%s` and characters the
/// device shell would interpret are backslash-escaped.
pub fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            ' ' => escaped.push_str("%s"),
            c if SHELL_SPECIAL.contains(&c) => {
                escaped.push('\\');
                escaped.push(c);
            }
            c => escaped.push(c),
        }
    }
    escaped
}

fn input_text(payload: &str) -> Vec<String> {
    vec![
        "shell".to_string(),
        "input".to_string(),
        "text".to_string(),
        escape_text(payload),
    ]
}

/// Broadcast understood by the ADB Keyboard IME
pub fn keyboard_broadcast(text: &str) -> Vec<String> {
    let encoded = general_purpose::STANDARD.encode(text.as_bytes());
    vec![
        "shell".to_string(),
        "am".to_string(),
        "broadcast".to_string(),
        "-a".to_string(),
        "ADB_INPUT_B64".to_string(),
        "--es".to_string(),
        "msg".to_string(),
        encoded,
    ]
}

/// Argument vectors that type `text`, run in order on one device.
/// Empty text yields no commands.
pub fn text_commands(text: &str, strategy: TextStrategy) -> Vec<Vec<String>> {
    if text.is_empty() {
        return Vec::new();
    }
    match strategy {
        TextStrategy::WholeString => vec![input_text(text)],
        TextStrategy::PerCharacter => text
            .chars()
            .map(|c| input_text(c.encode_utf8(&mut [0; 4])))
            .collect(),
        TextStrategy::AdbKeyboard => vec![keyboard_broadcast(text)],
    }
}

/// Non-blank, trimmed lines of a text file
pub fn load_lines(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    let lines: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    if lines.is_empty() {
        return Err(FleetError::Config(format!(
            "{} has no usable lines",
            path.display()
        )));
    }
    Ok(lines)
}

pub fn random_line(lines: &[String]) -> Option<&String> {
    lines.choose(&mut rand::thread_rng())
}

lazy_static! {
    static ref EMOJI_PATTERN: Regex = Regex::new(concat!(
        "[",
        r"\x{1F600}-\x{1F64F}",
        r"\x{1F300}-\x{1F5FF}",
        r"\x{1F680}-\x{1F6FF}",
        r"\x{1F700}-\x{1F77F}",
        r"\x{1F780}-\x{1F7FF}",
        r"\x{1F800}-\x{1F8FF}",
        r"\x{1F900}-\x{1F9FF}",
        r"\x{1FA00}-\x{1FA6F}",
        r"\x{1FA70}-\x{1FAFF}",
        r"\x{2702}-\x{27B0}",
        r"\x{2600}-\x{26FF}",
        r"\x{25A0}-\x{25FF}",
        "]+"
    ))
    .expect("valid emoji pattern");
}

/// Remove emoji and pictographic symbols
pub fn strip_emoji(text: &str) -> String {
    EMOJI_PATTERN.replace_all(text, "").into_owned()
}

/// Rewrite a file in place without emoji; returns whether anything changed
pub fn strip_emoji_file(path: &Path) -> Result<bool> {
    let content = std::fs::read_to_string(path)?;
    let cleaned = strip_emoji(&content);
    if cleaned == content {
        return Ok(false);
    }
    std::fs::write(path, cleaned)?;
    Ok(true)
}

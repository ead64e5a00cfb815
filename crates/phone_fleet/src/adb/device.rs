//! Argument vectors for device input, key events and app lifecycle commands

use std::fmt;
use std::str::FromStr;

use crate::config::AppTarget;
use crate::error::FleetError;

/// Hold time used to turn a same-point swipe into a long press
pub const LONG_PRESS_MS: u32 = 1000;
/// Duration of a drag gesture
pub const SWIPE_MS: u32 = 300;

fn shell(args: &[&str]) -> Vec<String> {
    std::iter::once("shell")
        .chain(args.iter().copied())
        .map(str::to_string)
        .collect()
}

/// Tap at the specified device coordinates
pub fn tap(x: i32, y: i32) -> Vec<String> {
    shell(&["input", "tap", &x.to_string(), &y.to_string()])
}

/// Swipe from start to end over `duration_ms`
pub fn swipe(start_x: i32, start_y: i32, end_x: i32, end_y: i32, duration_ms: u32) -> Vec<String> {
    shell(&[
        "input",
        "swipe",
        &start_x.to_string(),
        &start_y.to_string(),
        &end_x.to_string(),
        &end_y.to_string(),
        &duration_ms.to_string(),
    ])
}

/// Long press, expressed as a swipe from a point to itself
pub fn long_press(x: i32, y: i32, duration_ms: u32) -> Vec<String> {
    swipe(x, y, x, y, duration_ms)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    /// Content moves down: finger travels from the upper to the lower quarter
    Up,
    /// Content moves up: finger travels from the lower to the upper quarter
    Down,
}

/// Vertical swipe through the middle half of a `width`x`height` screen
pub fn scroll(direction: ScrollDirection, width: u32, height: u32) -> Vec<String> {
    let x = (width / 2) as i32;
    let upper = (height / 4) as i32;
    let lower = (height / 4 * 3) as i32;
    match direction {
        ScrollDirection::Up => swipe(x, upper, x, lower, SWIPE_MS),
        ScrollDirection::Down => swipe(x, lower, x, upper, SWIPE_MS),
    }
}

/// Hardware keys the fleet can press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    Home,
    Back,
    Recents,
    VolumeUp,
    VolumeDown,
    Power,
    Mute,
}

impl KeyCode {
    pub fn code(self) -> u32 {
        match self {
            KeyCode::Home => 3,
            KeyCode::Back => 4,
            KeyCode::Recents => 187,
            KeyCode::VolumeUp => 24,
            KeyCode::VolumeDown => 25,
            KeyCode::Power => 26,
            KeyCode::Mute => 23,
        }
    }

    /// Keys whose effect the operator cannot undo remotely
    pub fn is_destructive(self) -> bool {
        matches!(self, KeyCode::Power)
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyCode::Home => "home",
            KeyCode::Back => "back",
            KeyCode::Recents => "recents",
            KeyCode::VolumeUp => "volume-up",
            KeyCode::VolumeDown => "volume-down",
            KeyCode::Power => "power",
            KeyCode::Mute => "mute",
        };
        f.write_str(name)
    }
}

impl FromStr for KeyCode {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "home" => Ok(KeyCode::Home),
            "back" => Ok(KeyCode::Back),
            "recents" | "recent" => Ok(KeyCode::Recents),
            "volume-up" | "volup" => Ok(KeyCode::VolumeUp),
            "volume-down" | "voldown" => Ok(KeyCode::VolumeDown),
            "power" => Ok(KeyCode::Power),
            "mute" => Ok(KeyCode::Mute),
            other => Err(FleetError::Parse(format!("unknown key: {other}"))),
        }
    }
}

pub fn keyevent(key: KeyCode) -> Vec<String> {
    shell(&["input", "keyevent", &key.code().to_string()])
}

/// Open a URI in the given package; an empty package lets the system choose
pub fn view_uri(uri: &str, package: &str) -> Vec<String> {
    let mut args = shell(&["am", "start", "-a", "android.intent.action.VIEW", "-d", uri]);
    if !package.is_empty() {
        args.push(package.to_string());
    }
    args
}

pub fn start_activity(app: &AppTarget) -> Vec<String> {
    shell(&["am", "start", "-n", &app.component()])
}

pub fn force_stop(package: &str) -> Vec<String> {
    shell(&["am", "force-stop", package])
}

/// Hand a link to the package's share sheet as plain text
pub fn share_text(text: &str, package: &str) -> Vec<String> {
    shell(&[
        "am",
        "start",
        "-a",
        "android.intent.action.SEND",
        "-t",
        "text/plain",
        "--es",
        "android.intent.extra.TEXT",
        text,
        package,
    ])
}

/// Share an image already present in the device's Download folder
pub fn share_image(file_name: &str, package: &str) -> Vec<String> {
    let stream = format!("file:///sdcard/Download/{file_name}");
    shell(&[
        "am",
        "start",
        "-a",
        "android.intent.action.SEND",
        "-t",
        "image/jpeg",
        "--eu",
        "android.intent.extra.STREAM",
        &stream,
        package,
    ])
}

pub fn window_size() -> Vec<String> {
    shell(&["wm", "size"])
}

pub fn get_state() -> Vec<String> {
    vec!["get-state".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::get_app;

    #[test]
    fn test_tap_args() {
        assert_eq!(tap(60, 70), vec!["shell", "input", "tap", "60", "70"]);
    }

    #[test]
    fn test_long_press_is_same_point_swipe() {
        assert_eq!(
            long_press(5, 9, LONG_PRESS_MS),
            vec!["shell", "input", "swipe", "5", "9", "5", "9", "1000"]
        );
    }

    #[test]
    fn test_scroll_down_moves_finger_up() {
        let args = scroll(ScrollDirection::Down, 1080, 2400);
        assert_eq!(args[3..7], ["540", "1800", "540", "600"]);
    }

    #[test]
    fn test_keycodes() {
        assert_eq!(keyevent(KeyCode::Recents)[3], "187");
        assert_eq!("power".parse::<KeyCode>().unwrap(), KeyCode::Power);
        assert!(KeyCode::Power.is_destructive());
        assert!(!KeyCode::Home.is_destructive());
        assert!("menu".parse::<KeyCode>().is_err());
    }

    #[test]
    fn test_app_lifecycle_args() {
        let app = get_app("tiktok-lite").unwrap();
        assert_eq!(
            start_activity(&app).last().unwrap(),
            "com.zhiliaoapp.musically.go/com.ss.android.ugc.aweme.main.homepage.MainActivity"
        );
        assert_eq!(
            force_stop("com.facebook.lite"),
            vec!["shell", "am", "force-stop", "com.facebook.lite"]
        );
        assert_eq!(
            view_uri("https://example.com", "com.android.chrome"),
            vec![
                "shell",
                "am",
                "start",
                "-a",
                "android.intent.action.VIEW",
                "-d",
                "https://example.com",
                "com.android.chrome",
            ]
        );
        assert_eq!(view_uri("https://example.com", "").last().unwrap(), "https://example.com");
    }

    #[test]
    fn test_share_image_path() {
        let args = share_image("cat.jpg", "com.facebook.lite");
        assert!(args.contains(&"file:///sdcard/Download/cat.jpg".to_string()));
    }
}

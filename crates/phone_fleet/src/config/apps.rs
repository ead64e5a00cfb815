//! Known app table for launch, force-stop and share intents

use phf::phf_map;

/// Package and launch activity of an app the fleet commonly drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppTarget {
    pub package: &'static str,
    pub activity: &'static str,
}

impl AppTarget {
    /// Component name accepted by `am start -n`
    pub fn component(&self) -> String {
        format!("{}/{}", self.package, self.activity)
    }
}

pub static APP_TARGETS: phf::Map<&'static str, AppTarget> = phf_map! {
    "fb-lite" => AppTarget {
        package: "com.facebook.lite",
        activity: "com.facebook.lite.MainActivity",
    },
    "tiktok-lite" => AppTarget {
        package: "com.zhiliaoapp.musically.go",
        activity: "com.ss.android.ugc.aweme.main.homepage.MainActivity",
    },
    "chrome" => AppTarget {
        package: "com.android.chrome",
        activity: "com.google.android.apps.chrome.Main",
    },
    // YouTube links are opened through the mobile site in Chrome.
    "youtube" => AppTarget {
        package: "com.android.chrome",
        activity: "com.google.android.apps.chrome.Main",
    },
};

/// Resolve an app by short name, falling back to treating the name as a raw package
pub fn resolve_package(name: &str) -> String {
    APP_TARGETS
        .get(name)
        .map(|t| t.package.to_string())
        .unwrap_or_else(|| name.to_string())
}

pub fn get_app(name: &str) -> Option<AppTarget> {
    APP_TARGETS.get(name).copied()
}

pub fn list_known_apps() -> Vec<&'static str> {
    let mut names: Vec<_> = APP_TARGETS.keys().copied().collect();
    names.sort();
    names
}

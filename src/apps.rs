use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::monitor::is_own_app;

/// Packages that must stay reachable during a lock: settings, system UI,
/// launchers, dialers and emergency calling.
pub const EXCLUDED_SYSTEM_PACKAGES: &[&str] = &[
    "android",
    "com.android.settings",
    "com.android.systemui",
    "com.android.launcher",
    "com.android.launcher3",
    "com.google.android.apps.nexuslauncher",
    "com.sec.android.app.launcher",
    "com.miui.home",
    "com.huawei.android.launcher",
    "com.android.phone",
    "com.android.dialer",
    "com.google.android.dialer",
    "com.samsung.android.incallui",
    "com.android.emergency",
];

/// A launchable app as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LauncherEntry {
    pub app_id: String,
    pub label: String,
}

/// One row of the app picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub app_id: String,
    pub label: String,
    pub is_selected: bool,
}

pub fn is_excluded(app_id: &str, own_app_id: &str) -> bool {
    is_own_app(app_id, own_app_id) || EXCLUDED_SYSTEM_PACKAGES.contains(&app_id)
}

/// Builds the picker list from launcher entries: drops excluded packages and
/// entries without a real label, keeps the first entry per id, and sorts by
/// label.
pub fn selectable_apps<I>(entries: I, own_app_id: &str, selected: &BTreeSet<String>) -> Vec<AppInfo>
where
    I: IntoIterator<Item = LauncherEntry>,
{
    let mut seen = HashSet::new();
    let mut apps: Vec<AppInfo> = entries
        .into_iter()
        .filter(|entry| !is_excluded(&entry.app_id, own_app_id))
        .filter(|entry| {
            let label = entry.label.trim();
            !label.is_empty() && label != entry.app_id
        })
        .filter(|entry| seen.insert(entry.app_id.clone()))
        .map(|entry| AppInfo {
            is_selected: selected.contains(&entry.app_id),
            label: entry.label.trim().to_string(),
            app_id: entry.app_id,
        })
        .collect();

    apps.sort_by(|a, b| {
        a.label
            .to_lowercase()
            .cmp(&b.label.to_lowercase())
            .then_with(|| a.app_id.cmp(&b.app_id))
    });
    apps
}

/// Flips `app_id` in `selected`; returns whether it is now selected.
pub fn toggle_selection(selected: &mut BTreeSet<String>, app_id: &str) -> bool {
    if selected.remove(app_id) {
        false
    } else {
        selected.insert(app_id.to_string());
        true
    }
}

/// Case-insensitive match on label or id. A blank query matches everything.
pub fn search<'a>(apps: &'a [AppInfo], query: &str) -> Vec<&'a AppInfo> {
    let needle = query.trim().to_lowercase();
    apps.iter()
        .filter(|app| {
            needle.is_empty()
                || app.label.to_lowercase().contains(&needle)
                || app.app_id.to_lowercase().contains(&needle)
        })
        .collect()
}

/// Removes ids that may never be locked.
pub fn sanitize_selection(selected: &BTreeSet<String>, own_app_id: &str) -> BTreeSet<String> {
    selected
        .iter()
        .filter(|app_id| !app_id.trim().is_empty() && !is_excluded(app_id, own_app_id))
        .cloned()
        .collect()
}

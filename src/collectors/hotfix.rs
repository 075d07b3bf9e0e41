use crate::report::HotFix;
#[cfg(any(target_os = "linux", test))]
use chrono::{Local, TimeZone};
use chrono::{NaiveDate, NaiveDateTime};
use std::cmp::Ordering;
#[cfg(any(target_os = "linux", test))]
use std::collections::HashMap;

const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y"];

/// Installed patches, most recent first.
pub fn collect_hotfixes() -> Vec<HotFix> {
    let mut fixes = read_hotfixes();
    sort_newest_first(&mut fixes);
    fixes
}

/// Orders by install date descending; undated entries go last in their
/// original order.
pub fn sort_newest_first(fixes: &mut [HotFix]) {
    fixes.sort_by(|a, b| match (a.install_date, b.install_date) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

pub fn parse_install_date(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    for fmt in DATE_TIME_FORMATS {
        if let Ok(at) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(at);
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(target_os = "windows")]
fn read_hotfixes() -> Vec<HotFix> {
    use super::{decode_cmd_stdout, run_powershell};
    use tracing::warn;

    let script = "Get-HotFix | Select-Object HotFixID,Description,\
        @{n='InstalledOn';e={if ($_.InstalledOn) { $_.InstalledOn.ToString('yyyy-MM-dd HH:mm:ss') }}} \
        | ConvertTo-Json -Compress";
    let Some(output) = run_powershell(script) else {
        warn!("powershell unavailable, hotfix list skipped");
        return Vec::new();
    };
    if !output.status.success() {
        warn!(
            status = %output.status,
            stderr = %decode_cmd_stdout(&output.stderr).trim(),
            "Get-HotFix failed"
        );
        return Vec::new();
    }
    match parse_get_hotfix_json(&decode_cmd_stdout(&output.stdout)) {
        Ok(fixes) => fixes,
        Err(err) => {
            warn!(error = %err, "unexpected Get-HotFix output");
            Vec::new()
        }
    }
}

#[cfg(target_os = "linux")]
fn read_hotfixes() -> Vec<HotFix> {
    use std::process::Command;

    let rpm = Command::new("rpm")
        .args([
            "-qa",
            "--queryformat",
            "%{NAME}-%{VERSION}-%{RELEASE}\t%{SUMMARY}\t%{INSTALLTIME}\n",
        ])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| super::decode_cmd_stdout(&output.stdout));

    package_history(rpm, || match std::fs::read_to_string("/var/log/dpkg.log") {
        Ok(text) => Some(text),
        Err(err) => {
            tracing::debug!(error = %err, "no package history found");
            None
        }
    })
}

/// rpm output wins when it lists any package; otherwise the dpkg log is read.
/// Hosts with an rpm binary but an empty rpm database fall through to dpkg.
#[cfg(any(target_os = "linux", test))]
fn package_history(
    rpm_output: Option<String>,
    dpkg_log: impl FnOnce() -> Option<String>,
) -> Vec<HotFix> {
    if let Some(fixes) = rpm_output
        .map(|text| parse_rpm_output(&text))
        .filter(|fixes| !fixes.is_empty())
    {
        return fixes;
    }
    dpkg_log()
        .map(|text| parse_dpkg_log(&text))
        .unwrap_or_default()
}

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
fn read_hotfixes() -> Vec<HotFix> {
    tracing::debug!("hotfix listing is not supported on this platform");
    Vec::new()
}

#[cfg(any(target_os = "windows", test))]
#[derive(Debug, serde::Deserialize)]
struct PsHotFix {
    #[serde(rename = "HotFixID")]
    hot_fix_id: Option<String>,
    #[serde(rename = "Description")]
    description: Option<String>,
    #[serde(rename = "InstalledOn")]
    installed_on: Option<String>,
}

/// Parses `Get-HotFix | ConvertTo-Json` output.
#[cfg(any(target_os = "windows", test))]
pub fn parse_get_hotfix_json(text: &str) -> Result<Vec<HotFix>, serde_json::Error> {
    let rows: Vec<PsHotFix> = super::json_rows(text)?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            Some(HotFix {
                id: row.hot_fix_id?,
                description: row.description.unwrap_or_default(),
                install_date: row.installed_on.as_deref().and_then(parse_install_date),
            })
        })
        .collect())
}

/// Parses `rpm -qa` output formatted as `NVR\tSUMMARY\tINSTALLTIME`.
#[cfg(any(target_os = "linux", test))]
pub fn parse_rpm_output(text: &str) -> Vec<HotFix> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let id = parts.next()?.trim();
            if id.is_empty() {
                return None;
            }
            let description = parts.next().unwrap_or_default().trim().to_string();
            let install_date = parts
                .next()
                .and_then(|t| t.trim().parse::<i64>().ok())
                .and_then(|secs| Local.timestamp_opt(secs, 0).single())
                .map(|at| at.naive_local());
            Some(HotFix {
                id: id.to_string(),
                description,
                install_date,
            })
        })
        .collect()
}

/// Collects `status installed` events from a dpkg log, one entry per
/// package version (latest event wins).
#[cfg(any(target_os = "linux", test))]
pub fn parse_dpkg_log(text: &str) -> Vec<HotFix> {
    let mut latest: HashMap<(String, String), Option<NaiveDateTime>> = HashMap::new();
    let mut order: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 || fields[2] != "status" || fields[3] != "installed" {
            continue;
        }
        let when = parse_install_date(&format!("{} {}", fields[0], fields[1]));
        let key = (fields[4].to_string(), fields[5].to_string());
        match latest.get_mut(&key) {
            Some(existing) => {
                if when > *existing {
                    *existing = when;
                }
            }
            None => {
                order.push(key.clone());
                latest.insert(key, when);
            }
        }
    }

    order
        .into_iter()
        .map(|key| {
            let install_date = latest.get(&key).copied().flatten();
            HotFix {
                id: key.0,
                description: key.1,
                install_date,
            }
        })
        .collect()
}

pub mod checks;
pub mod connections;
pub mod hotfix;
pub mod system;

#[cfg(any(target_os = "windows", test))]
use serde::de::DeserializeOwned;
#[cfg(any(target_os = "windows", test))]
use serde_json::Value;

/// Reads `ConvertTo-Json` output, which is an object for one row, an array
/// for several and empty for none.
#[cfg(any(target_os = "windows", test))]
pub(crate) fn json_rows<T: DeserializeOwned>(text: &str) -> Result<Vec<T>, serde_json::Error> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<Value>(trimmed)? {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.into_iter().map(serde_json::from_value).collect(),
        single => Ok(vec![serde_json::from_value(single)?]),
    }
}

pub(crate) fn decode_cmd_stdout(bytes: &[u8]) -> String {
    if let Ok(utf8) = std::str::from_utf8(bytes) {
        return utf8.to_string();
    }

    if bytes.len() >= 2 && bytes.len() % 2 == 0 {
        let u16buf: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if let Ok(s) = String::from_utf16(&u16buf) {
            return s;
        }
    }

    String::from_utf8_lossy(bytes).to_string()
}

#[cfg(target_os = "windows")]
pub(crate) fn run_powershell(script: &str) -> Option<std::process::Output> {
    use std::process::Command;

    let wrapped_script = format!(
        "[Console]::OutputEncoding=[System.Text.UTF8Encoding]::new($false); $OutputEncoding=[System.Text.UTF8Encoding]::new($false); {script}"
    );
    if let Ok(output) = Command::new("powershell")
        .args(["-NoProfile", "-NonInteractive", "-Command", &wrapped_script])
        .output()
    {
        return Some(output);
    }

    Command::new(r"C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe")
        .args(["-NoProfile", "-NonInteractive", "-Command", &wrapped_script])
        .output()
        .ok()
}

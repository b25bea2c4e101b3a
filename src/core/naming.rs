#![forbid(unsafe_code)]

use std::path::Path;

use uuid::Uuid;

/// Short random identifier for store entities.
#[must_use]
pub fn unique_short_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id.chars().take(8).collect()
}

#[must_use]
pub fn sanitize_for_filesystem(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        // Replace path separators and NUL and other control chars.
        if c == '/' || c == '\\' || c == '\0' || c.is_control() {
            out.push('-');
            continue;
        }
        // Windows reserved characters.
        if matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|') {
            out.push('-');
            continue;
        }
        out.push(c);
    }
    // Collapse consecutive '-' for nicer paths.
    while out.contains("--") {
        out = out.replace("--", "-");
    }
    out.trim_matches('-').to_owned()
}

#[must_use]
pub fn path_basename(path: &Path) -> String {
    match path.file_name().and_then(|s| s.to_str()) {
        Some(name) => name.to_owned(),
        None => path.to_string_lossy().into_owned(),
    }
}

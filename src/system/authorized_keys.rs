/// Comment appended to every key line written by this tool.
pub const MANAGED_MARKER: &str = "managed-by=azure-ad-users-to-linux";

fn is_managed(line: &str) -> bool {
    line.trim_end().ends_with(MANAGED_MARKER)
}

/// Split downloaded key material into individual key lines.
///
/// Blank lines and `#` comments are dropped.
pub fn key_lines(keys: &[String]) -> Vec<String> {
    keys.iter()
        .flat_map(|k| k.lines())
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Render the new authorized keys content.
///
/// Lines without the marker are kept verbatim and in order, previously
/// managed lines are dropped, and one marked line per current key is appended.
pub fn render(existing: Option<&str>, keys: &[String]) -> String {
    let mut out = String::new();

    if let Some(existing) = existing {
        for line in existing.lines().filter(|l| !is_managed(l)) {
            out.push_str(line);
            out.push('\n');
        }
    }

    for key in key_lines(keys) {
        out.push_str(&key);
        out.push(' ');
        out.push_str(MANAGED_MARKER);
        out.push('\n');
    }

    out
}

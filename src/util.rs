use std::path::Path;

/// Parses a source string as a capture device index.
///
/// Only plain integers are accepted, optionally negative. Surrounding
/// whitespace is ignored.
pub(crate) fn parse_device_index(source: &str) -> Option<i64> {
    let trimmed = source.trim();
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

/// Maps a possibly negative index onto a list of `len` items.
///
/// Negative values count from the end, so `-1` is the last item.
pub(crate) fn wrap_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let resolved = if index < 0 { len + index } else { index };
    (0..len)
        .contains(&resolved)
        .then(|| usize::try_from(resolved).ok())
        .flatten()
}

/// Renders an argv list for logs. Arguments containing spaces are quoted.
pub(crate) fn display_command<S: AsRef<str>>(program: &Path, args: &[S]) -> String {
    let mut line = quote(&program.to_string_lossy());
    for arg in args {
        line.push(' ');
        line.push_str(&quote(arg.as_ref()));
    }
    line
}

fn quote(arg: &str) -> String {
    if arg.is_empty() || arg.contains(char::is_whitespace) {
        format!("'{}'", arg)
    } else {
        arg.to_string()
    }
}

/// Returns the extension of `source` including the leading dot, or an empty
/// string when there is none.
pub(crate) fn dotted_extension(source: &str) -> String {
    Path::new(source)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default()
}

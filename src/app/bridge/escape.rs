/// Wraps an arbitrary string as a single POSIX-shell token.
///
/// Every `shell` command line sent to the device embeds user-chosen file
/// paths, so the quoting rule has to hold for arbitrary content: quotes,
/// semicolons, backticks, whitespace, newlines. A single-quoted token is
/// literal except for `'` itself, which is rewritten as `'\''` (close quote,
/// escaped literal quote, reopen quote).
pub fn escape_shell_arg(input: &str) -> String {
    if input.is_empty() {
        return "''".to_string();
    }
    let mut escaped = String::with_capacity(input.len() + 2);
    escaped.push('\'');
    for ch in input.chars() {
        if ch == '\'' {
            escaped.push_str("'\\''");
        } else {
            escaped.push(ch);
        }
    }
    escaped.push('\'');
    escaped
}

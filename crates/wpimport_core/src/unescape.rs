/// Decode MySQL backslash escapes left in place by the row scanner.
///
/// Unknown escapes drop the backslash and keep the character, as MySQL does.
/// A trailing lone backslash is kept.
pub fn unescape_mysql(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.to_string();
    }

    let mut output = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            output.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => output.push('\n'),
            Some('r') => output.push('\r'),
            Some('t') => output.push('\t'),
            Some('0') => output.push('\0'),
            Some('b') => output.push('\u{8}'),
            Some('Z') => output.push('\u{1a}'),
            Some(other) => output.push(other),
            None => output.push('\\'),
        }
    }
    output
}

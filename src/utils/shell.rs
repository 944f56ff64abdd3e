//! Shell quoting for values substituted into command templates.

/// Escape a value for use inside single quotes.
/// Replaces `'` with `'\''` (end quote, escaped quote, start quote).
pub fn escape_single_quote_content(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Quote a single argument for shell execution.
/// - Empty strings become `''`
/// - Strings with shell metacharacters are wrapped in single quotes
/// - Embedded single quotes are escaped
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }

    const SHELL_META: &[char] = &[
        ' ', '\t', '\n', '\'', '"', '\\', '$', '`', '!', '*', '?', '[', ']', '(', ')', '{', '}',
        '<', '>', '|', '&', ';', '#', '~',
    ];

    if !arg.contains(SHELL_META) {
        return arg.to_string();
    }

    format!("'{}'", escape_single_quote_content(arg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_paths_are_left_bare() {
        assert_eq!(quote_arg("/work/Sales.dtproj"), "/work/Sales.dtproj");
        assert_eq!(quote_arg("Release"), "Release");
    }

    #[test]
    fn paths_with_spaces_are_quoted() {
        assert_eq!(quote_arg("/my work/Sales.dtproj"), "'/my work/Sales.dtproj'");
    }

    #[test]
    fn embedded_quotes_are_escaped() {
        assert_eq!(quote_arg("it's"), "'it'\\''s'");
    }

    #[test]
    fn substitution_characters_are_neutralized() {
        assert_eq!(quote_arg("$(rm -rf)"), "'$(rm -rf)'");
    }

    #[test]
    fn empty_value_is_an_empty_quoted_string() {
        assert_eq!(quote_arg(""), "''");
    }
}

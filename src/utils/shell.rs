//! Shell quoting for commands sent over SSH and for log rendering.

/// Replaces `'` with `'\''` (end quote, escaped quote, start quote).
pub fn escape_single_quote_content(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Quote a single argument only when it contains shell metacharacters.
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

pub fn quote_args(args: &[String]) -> String {
    args.iter()
        .map(|a| quote_arg(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote a path for shell execution (always quotes).
pub fn quote_path(path: &str) -> String {
    format!("'{}'", escape_single_quote_content(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_arg_leaves_image_references_alone() {
        assert_eq!(quote_arg("10.0.0.5:5000/app-a"), "10.0.0.5:5000/app-a");
    }

    #[test]
    fn quote_arg_with_spaces() {
        assert_eq!(quote_arg("docker compose"), "'docker compose'");
    }

    #[test]
    fn quote_arg_with_single_quote() {
        assert_eq!(quote_arg("it's"), "'it'\\''s'");
    }

    #[test]
    fn quote_arg_empty() {
        assert_eq!(quote_arg(""), "''");
    }

    #[test]
    fn quote_args_joins_with_spaces() {
        let args = vec!["tar".to_string(), "-C".to_string(), "/etc/my app".to_string()];
        assert_eq!(quote_args(&args), "tar -C '/etc/my app'");
    }

    #[test]
    fn quote_path_always_quotes() {
        assert_eq!(quote_path("/etc/airlift"), "'/etc/airlift'");
        assert_eq!(quote_path("/etc/it's"), "'/etc/it'\\''s'");
    }
}

// ABOUTME: Argument escaping for flat command lines handed to the host process launcher
// ABOUTME: Quotes and escapes each argument except switch-style options starting with '/'

/// Joins an argument vector into one shell-safe command line.
///
/// Arguments starting with `/` are treated as switch-style options and
/// emitted verbatim. Everything else is wrapped in double quotes with
/// backslashes doubled and embedded double quotes backslash-escaped.
pub fn escape_arguments(arguments: &[impl AsRef<str>]) -> String {
    arguments
        .iter()
        .map(|a| escape_argument(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape_argument(argument: &str) -> String {
    if argument.starts_with('/') {
        return argument.to_string();
    }
    let mut escaped = String::with_capacity(argument.len() + 2);
    escaped.push('"');
    for c in argument.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            _ => escaped.push(c),
        }
    }
    escaped.push('"');
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_vector_produces_empty_string() {
        let arguments: Vec<String> = vec![];
        assert_eq!(escape_arguments(&arguments), "");
    }

    #[test]
    fn plain_arguments_are_quoted() {
        assert_eq!(escape_arguments(&["foo", "bar"]), r#""foo" "bar""#);
    }

    #[test]
    fn switch_arguments_pass_through_verbatim() {
        assert_eq!(escape_arguments(&["/flag"]), "/flag");
        assert_eq!(escape_arguments(&["/p:level=2"]), "/p:level=2");
    }

    #[test]
    fn quotes_and_backslashes_are_escaped() {
        let line = escape_arguments(&["foo", "/flag", "has \"quote\"", "back\\slash"]);
        assert_eq!(line, r#""foo" /flag "has \"quote\"" "back\\slash""#);
    }

    #[test]
    fn empty_argument_becomes_empty_quotes() {
        assert_eq!(escape_arguments(&[""]), r#""""#);
    }
}

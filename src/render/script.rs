//! Argument vector to shell command line.

/// Quote a single argument for a POSIX shell.
///
/// Arguments containing whitespace are single-quoted, with embedded single
/// quotes written as `'\''`. An empty argument becomes `''`. Anything else is
/// left bare.
///
/// Only whitespace triggers quoting. A bare argument carrying shell syntax
/// (`$HOME`, `a;b`, `>`, an unpaired `'`) is interpreted by the worker's
/// shell, so `["echo", "$HOME"]` prints the variable. Such an argument does
/// not survive word splitting as a single word.
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    if !arg.chars().any(char::is_whitespace) {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Join an argument vector into the single line the worker executes.
pub fn translate_args_to_script(args: &[String]) -> String {
    args.iter()
        .map(|arg| quote_arg(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Template filter quoting a value unconditionally.
pub(crate) fn shell_quote(value: String) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    /// Minimal POSIX word splitting: single quotes, backslash outside quotes.
    fn split_words(line: &str) -> Vec<String> {
        let mut words = Vec::new();
        let mut current = String::new();
        let mut in_word = false;
        let mut chars = line.chars();
        while let Some(c) = chars.next() {
            match c {
                '\'' => {
                    in_word = true;
                    for q in chars.by_ref() {
                        if q == '\'' {
                            break;
                        }
                        current.push(q);
                    }
                }
                '\\' => {
                    in_word = true;
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                c => {
                    in_word = true;
                    current.push(c);
                }
            }
        }
        if in_word {
            words.push(current);
        }
        words
    }

    #[test]
    fn test_bare_arguments() {
        assert_eq!(translate_args_to_script(&args(&["echo", "hi"])), "echo hi");
    }

    #[test]
    fn test_whitespace_is_quoted() {
        assert_eq!(
            translate_args_to_script(&args(&["echo", "hello world"])),
            "echo 'hello world'"
        );
        assert_eq!(quote_arg("a\tb"), "'a\tb'");
    }

    #[test]
    fn test_embedded_quote() {
        assert_eq!(quote_arg("it's here"), r"'it'\''s here'");
    }

    #[test]
    fn test_empty_argument() {
        assert_eq!(translate_args_to_script(&args(&["printf", ""])), "printf ''");
    }

    #[test]
    fn test_empty_vector() {
        assert_eq!(translate_args_to_script(&[]), "");
    }

    #[test]
    fn test_shell_syntax_without_whitespace_stays_bare() {
        assert_eq!(quote_arg("$HOME"), "$HOME");
        assert_eq!(quote_arg("a;b"), "a;b");
        assert_eq!(quote_arg("don't"), "don't");
        assert_eq!(
            translate_args_to_script(&args(&["echo", "$GREETING", ">", "/out/greeting"])),
            "echo $GREETING > /out/greeting"
        );
        // Unpaired quote opens a quoted span in the worker's shell.
        let unpaired = args(&["echo", "don't", "x"]);
        assert_ne!(split_words(&translate_args_to_script(&unpaired)), unpaired);
    }

    /// Holds for arguments free of shell syntax outside whitespace.
    #[test]
    fn test_round_trip_under_word_splitting() {
        let cases = [
            args(&["echo", "hi"]),
            args(&["sh", "-c", "echo one two"]),
            args(&["python", "-c", "print('a b')"]),
            args(&["x", "", "  padded  "]),
            args(&["grep", "-e", "don't stop"]),
        ];
        for case in cases {
            let line = translate_args_to_script(&case);
            assert_eq!(split_words(&line), case, "line: {}", line);
        }
    }

    #[test]
    fn test_shell_quote_filter() {
        assert_eq!(shell_quote("plain".into()), "'plain'");
        assert_eq!(shell_quote("a'b".into()), r"'a'\''b'");
    }
}

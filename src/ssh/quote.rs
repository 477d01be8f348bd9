//! Shell quoting for remote command lines
//!
//! The remote side runs commands through the login shell, so every argument
//! that is not a plain word is wrapped in single quotes.

/// Escapes a string for safe use in single-quoted shell contexts.
///
/// Replaces single quotes with the pattern `'"'"'` which ends the current
/// single-quoted string, adds a double-quoted single quote, and starts a new
/// single-quoted string.
///
/// # Examples
///
/// ```
/// use ssh_router::ssh::quote::escape_for_shell;
///
/// assert_eq!(escape_for_shell("hello"), "hello");
/// assert_eq!(escape_for_shell("it's"), "it'\"'\"'s");
/// ```
pub fn escape_for_shell(s: &str) -> String {
    s.replace('\'', "'\"'\"'")
}

/// Quote one argument; plain words are left alone
pub fn quote_arg(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", escape_for_shell(arg))
    }
}

/// Join an argv into a single shell command line
///
/// # Examples
///
/// ```
/// use ssh_router::ssh::quote::quote_argv;
///
/// assert_eq!(quote_argv(&["remote-bridge", "--privileged"]), "remote-bridge --privileged");
/// assert_eq!(quote_argv(&["echo", "a b"]), "echo 'a b'");
/// ```
pub fn quote_argv(argv: &[&str]) -> String {
    argv.iter()
        .map(|arg| quote_arg(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

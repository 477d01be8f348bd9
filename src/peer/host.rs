//! Host string parsing
//!
//! A routed host may carry a `user@` prefix and a `:port` suffix, e.g.
//! `admin@example.com:2222`. Split the user off first, then the port.

/// Split `host` into address and optional port
///
/// The port is whatever follows the last `:` when it is a non-empty run of
/// ASCII digits that fits a `u16`. A bare IPv6 literal is never split, since
/// its last group is indistinguishable from a port; use `[addr]:port`.
///
/// # Examples
///
/// ```
/// use ssh_router::peer::host::split_host_port;
///
/// assert_eq!(split_host_port("example.com:2222"), ("example.com", Some(2222)));
/// assert_eq!(split_host_port("example.com"), ("example.com", None));
/// assert_eq!(split_host_port("fe80::1:22"), ("fe80::1:22", None));
/// assert_eq!(split_host_port("[fe80::1]:22"), ("fe80::1", Some(22)));
/// ```
pub fn split_host_port(host: &str) -> (&str, Option<u16>) {
    let Some((base, port)) = host.rsplit_once(':') else {
        return (unbracket(host), None);
    };

    let numeric = !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit());
    let bracketed = base.ends_with(']');
    if !numeric || (base.contains(':') && !bracketed) {
        return (unbracket(host), None);
    }

    match port.parse::<u16>() {
        Ok(port) => (unbracket(base), Some(port)),
        Err(_) => (unbracket(host), None),
    }
}

/// Split a `user@` prefix off an address
///
/// # Examples
///
/// ```
/// use ssh_router::peer::host::split_user;
///
/// assert_eq!(split_user("admin@example.com"), (Some("admin"), "example.com"));
/// assert_eq!(split_user("example.com"), (None, "example.com"));
/// ```
pub fn split_user(address: &str) -> (Option<&str>, &str) {
    match address.rsplit_once('@') {
        Some((user, host)) if !user.is_empty() => (Some(user), host),
        Some((_, host)) => (None, host),
        None => (None, address),
    }
}

/// `[addr]` → `addr`; anything else unchanged
fn unbracket(address: &str) -> &str {
    address
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(address)
}

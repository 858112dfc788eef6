//! Process environment access.
//!
//! Startup code never calls `std::env` directly; it takes an [`Environment`]
//! so that parsing and host resolution can be exercised with a fixed map.

use std::collections::HashMap;

pub trait Environment {
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl Environment for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Replaces `${NAME}` and `$NAME` with the value of the variable, or the empty
/// string when it is unset. A `$` followed by anything else is kept.
pub fn expand(input: &str, env: &dyn Environment) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => {
                    let name = &braced[..end];
                    if !name.is_empty() {
                        out.push_str(&env.var(name).unwrap_or_default());
                    }
                    rest = &braced[end + 1..];
                }
                // Bad syntax, the remainder is swallowed.
                None => rest = "",
            }
            continue;
        }

        let name_len = match after.bytes().next() {
            Some(b) if is_special_var(b) => 1,
            _ => after
                .bytes()
                .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
                .count(),
        };

        if name_len == 0 {
            out.push('$');
            rest = after;
        } else {
            out.push_str(&env.var(&after[..name_len]).unwrap_or_default());
            rest = &after[name_len..];
        }
    }

    out.push_str(rest);
    out
}

/// Shell parameters such as `$1`, `$@` or `$-` are always one character.
fn is_special_var(b: u8) -> bool {
    b.is_ascii_digit() || matches!(b, b'*' | b'#' | b'$' | b'@' | b'!' | b'?' | b'-')
}

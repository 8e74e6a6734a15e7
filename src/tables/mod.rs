//! Domain table wrappers: the six concrete entities layered over the
//! generic [`crate::table::Table`] CRUD.

pub mod comments;
pub mod history;
pub mod journals;
pub mod settings;
pub mod submissions;
pub mod users;

/// Lowercase, then drop every character outside `[a-z0-9.~-]` — the closed
/// username alphabet. Matches the `replace(lower(x), '_', '')` search alias
/// used by the free-text `search` helpers, broadened to strip any other
/// disallowed character too.
pub fn normalize_username(username: &str) -> String {
    username
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '~' | '-'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lowercases_and_strips_underscore() {
        assert_eq!(normalize_username("Artist_A"), "artista");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_username("Foo_Bar.Baz~1");
        assert_eq!(normalize_username(&once), once);
    }
}

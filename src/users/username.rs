use crate::error::{SyncError, SyncResult};

/// Longest login name accepted by the shadow utilities on all supported distros.
pub const MAX_USERNAME_LEN: usize = 31;

/// Derive a local login name from a directory attribute value.
///
/// Everything from the first `@` on is dropped, the rest is lowercased,
/// `.` and `-` become `_`, and the result is cut to 31 characters.
pub fn derive_username(value: Option<&str>) -> SyncResult<String> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SyncError::Validation("no value to derive a username from".into()))?;

    let local_part = value.split('@').next().unwrap_or(value);
    let username: String = local_part
        .to_lowercase()
        .replace(['.', '-'], "_")
        .chars()
        .take(MAX_USERNAME_LEN)
        .collect();

    validate_username(&username).map_err(|reason| {
        SyncError::Validation(format!("cannot derive username from {value:?}: {reason}"))
    })?;

    Ok(username)
}

fn validate_username(username: &str) -> Result<(), &'static str> {
    let Some(first) = username.chars().next() else {
        return Err("nothing left before '@'");
    };
    if first.is_ascii_digit() {
        return Err("login names must not start with a digit");
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err("contains characters not allowed in login names");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_name_becomes_login_name() {
        assert_eq!(derive_username(Some("alice@co.com")).unwrap(), "alice");
        assert_eq!(
            derive_username(Some("Jean-Luc.Picard@starfleet.org")).unwrap(),
            "jean_luc_picard"
        );
        assert_eq!(derive_username(Some("no_at_sign")).unwrap(), "no_at_sign");
    }

    #[test]
    fn test_username_is_truncated() {
        let long = "a.very.long.name.that-keeps-going-and-going@co.com";
        let username = derive_username(Some(long)).unwrap();
        assert_eq!(username.len(), MAX_USERNAME_LEN);
        assert_eq!(username, "a_very_long_name_that_keeps_goi");
    }

    #[test]
    fn test_derived_names_are_normalized() {
        for principal in [
            "Bob.Smith@co.com",
            "x-y-z@co.com",
            "UPPER.CASE-Name.With.Many.Segments.Beyond.Limit@co.com",
            "carol",
        ] {
            let username = derive_username(Some(principal)).unwrap();
            assert!(username.len() <= MAX_USERNAME_LEN, "{username}");
            assert_eq!(username, username.to_lowercase());
            assert!(!username.contains('.'));
            assert!(!username.contains('-'));
        }
    }

    #[test]
    fn test_empty_or_missing_value_fails() {
        assert!(matches!(derive_username(None), Err(SyncError::Validation(_))));
        assert!(matches!(
            derive_username(Some("")),
            Err(SyncError::Validation(_))
        ));
        assert!(matches!(
            derive_username(Some("   ")),
            Err(SyncError::Validation(_))
        ));
    }

    #[test]
    fn test_unusable_names_fail() {
        assert!(derive_username(Some("@co.com")).is_err());
        assert!(derive_username(Some("1password@co.com")).is_err());
        assert!(derive_username(Some("john smith@co.com")).is_err());
    }
}

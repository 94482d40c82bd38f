//! Ordered field accessors over host SDK responses.
//!
//! Each attribute has a list of dotted paths, tried in order. The first one
//! that resolves to a non-blank string wins; when none does the attribute is
//! absent. An empty string is never returned.

use serde_json::Value;

use super::Scope;

/// Paths to the user id in a user-info response.
pub const ID_PATHS: &[&str] = &["userInfo.id", "id", "userID", "userId"];

/// Paths to the id in a `get_user_id` response object.
pub const USER_ID_PATHS: &[&str] = &["id", "userID", "userId"];

/// Paths to the display name.
pub const NAME_PATHS: &[&str] = &["userInfo.name", "name", "userInfo.displayName", "displayName"];

/// Paths to the avatar URI.
pub const AVATAR_PATHS: &[&str] = &[
    "userInfo.avatar",
    "avatar",
    "userInfo.avatarUrl",
    "avatarUrl",
];

/// Paths to the phone number.
pub const PHONE_PATHS: &[&str] = &["number", "phoneNumber", "phone", "userInfo.phone"];

/// Paths to the login token.
pub const TOKEN_PATHS: &[&str] = &["token", "accessToken", "access_token"];

/// Resolve a dotted path. The empty path is the value itself.
#[must_use]
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, key| current.get(key))
}

/// First non-blank trimmed string found at `paths`.
///
/// Numbers are accepted and rendered as strings since some hosts send
/// numeric ids.
#[must_use]
pub fn first_non_blank(value: &Value, paths: &[&str]) -> Option<String> {
    paths
        .iter()
        .filter_map(|path| lookup(value, path))
        .find_map(as_text)
}

/// Read an id response that is either a bare string or an object.
#[must_use]
pub fn user_id(value: &Value) -> Option<String> {
    as_text(value).or_else(|| first_non_blank(value, USER_ID_PATHS))
}

/// Whether a settings response grants `scope`.
#[must_use]
pub fn is_granted(settings: &Value, scope: Scope) -> bool {
    settings
        .get("authSetting")
        .and_then(|grants| grants.get(scope.as_str()))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_first_matching_path_wins() {
        let info = json!({
            "userInfo": { "id": "42", "name": "Lan" },
            "name": "Ignored",
        });
        assert_eq!(first_non_blank(&info, NAME_PATHS).as_deref(), Some("Lan"));
    }

    #[test]
    fn test_blank_values_fall_through() {
        let info = json!({
            "userInfo": { "name": "   " },
            "displayName": " Lan ",
        });
        assert_eq!(first_non_blank(&info, NAME_PATHS).as_deref(), Some("Lan"));
    }

    #[test]
    fn test_absent_is_never_empty_string() {
        let info = json!({ "userInfo": { "name": "" }, "avatar": null });
        assert_eq!(first_non_blank(&info, NAME_PATHS), None);
        assert_eq!(first_non_blank(&info, AVATAR_PATHS), None);
    }

    #[test]
    fn test_user_id_shapes() {
        assert_eq!(user_id(&json!("abc")).as_deref(), Some("abc"));
        assert_eq!(user_id(&json!({ "id": "abc" })).as_deref(), Some("abc"));
        assert_eq!(user_id(&json!({ "userID": "abc" })).as_deref(), Some("abc"));
        assert_eq!(user_id(&json!({ "id": 9001 })).as_deref(), Some("9001"));
        assert_eq!(user_id(&json!({ "id": "" })), None);
        assert_eq!(user_id(&json!(null)), None);
    }

    #[test]
    fn test_token_aliases() {
        assert_eq!(
            first_non_blank(&json!({ "accessToken": "t-1" }), TOKEN_PATHS).as_deref(),
            Some("t-1")
        );
        assert_eq!(
            first_non_blank(&json!({ "access_token": "t-2" }), TOKEN_PATHS).as_deref(),
            Some("t-2")
        );
    }

    #[test]
    fn test_is_granted() {
        let settings = json!({ "authSetting": { "scope.userInfo": true } });
        assert!(is_granted(&settings, Scope::UserInfo));
        assert!(!is_granted(&settings, Scope::UserPhoneNumber));
        assert!(!is_granted(&json!({}), Scope::UserInfo));
    }

    #[test]
    fn test_lookup_nested() {
        let value = json!({ "a": { "b": { "c": 1 } } });
        assert_eq!(lookup(&value, "a.b.c"), Some(&json!(1)));
        assert_eq!(lookup(&value, "a.x"), None);
        assert_eq!(lookup(&value, ""), Some(&value));
    }
}

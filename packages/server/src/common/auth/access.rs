use serde::{Deserialize, Serialize};

use super::AuthError;
use crate::server::middleware::AuthUser;

/// Who may perform an operation on a resource kind.
///
/// Serialized as `"public"`, `"authenticated"`, `"admin"` or
/// `{"role": "<name>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Anyone, including connections without a token.
    Public,
    /// Any caller holding a valid token.
    Authenticated,
    /// Callers whose token carries the admin flag.
    Admin,
    /// Callers whose token lists the role. Admins always pass.
    Role(String),
}

impl Access {
    /// Check the caller against this level. `action` names the operation
    /// for the denial message.
    pub fn check(&self, user: Option<&AuthUser>, action: &str) -> Result<(), AuthError> {
        if *self == Access::Public {
            return Ok(());
        }

        let user = user.ok_or(AuthError::AuthenticationRequired)?;

        match self {
            Access::Public | Access::Authenticated => Ok(()),
            Access::Admin if user.is_admin => Ok(()),
            Access::Admin => Err(AuthError::AdminRequired),
            Access::Role(_) if user.is_admin => Ok(()),
            Access::Role(role) if user.roles.iter().any(|r| r == role) => Ok(()),
            Access::Role(role) => Err(AuthError::PermissionDenied(format!(
                "role '{}' required to {}",
                role, action
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(roles: &[&str], is_admin: bool) -> AuthUser {
        AuthUser {
            user_id: "u-1".to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            is_admin,
        }
    }

    #[test]
    fn test_public_admits_anonymous() {
        assert!(Access::Public.check(None, "read").is_ok());
    }

    #[test]
    fn test_anonymous_needs_authentication() {
        assert_eq!(
            Access::Authenticated.check(None, "read"),
            Err(AuthError::AuthenticationRequired)
        );
        assert_eq!(
            Access::Admin.check(None, "delete"),
            Err(AuthError::AuthenticationRequired)
        );
    }

    #[test]
    fn test_admin_level() {
        assert_eq!(
            Access::Admin.check(Some(&user(&[], false)), "delete"),
            Err(AuthError::AdminRequired)
        );
        assert!(Access::Admin.check(Some(&user(&[], true)), "delete").is_ok());
    }

    #[test]
    fn test_role_level() {
        let finance = Access::Role("finance".into());
        assert!(finance.check(Some(&user(&["finance"], false)), "write").is_ok());
        assert!(finance.check(Some(&user(&[], true)), "write").is_ok());
        assert!(matches!(
            finance.check(Some(&user(&["fleet"], false)), "write"),
            Err(AuthError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_serde_forms() {
        let levels: Vec<Access> =
            serde_json::from_str(r#"["public", "admin", {"role": "finance"}]"#).unwrap();
        assert_eq!(
            levels,
            vec![Access::Public, Access::Admin, Access::Role("finance".into())]
        );
    }
}

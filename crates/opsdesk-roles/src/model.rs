//! Roles configuration document.
//!
//! Stored as one JSON object under the roles config key:
//!
//! ```text
//! {
//!   "roles": {
//!     "hr": {"name": "...", "permissions": {"canViewSalary": true}, "pages": {...}, "is_strict": true},
//!     ...
//!   },
//!   "user_assignments": {"user-42": "hr"}
//! }
//! ```
//!
//! On a strict role an absent entry means denied, so explicit `false`
//! entries carry no information and are dropped before saving. Roles
//! without `is_strict` predate that rule and fall back to catalog defaults.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::{self, Capability, PAGES};

/// One role and what it may do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Capability flags keyed by their stored name (`canViewSalary`, ...)
    #[serde(default)]
    pub permissions: BTreeMap<String, bool>,
    /// Page visibility keyed by page id
    #[serde(default)]
    pub pages: BTreeMap<String, bool>,
    #[serde(default)]
    pub is_strict: bool,
    #[serde(default)]
    pub is_system: bool,
}

impl RoleDefinition {
    /// A strict role with nothing granted.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            permissions: BTreeMap::new(),
            pages: BTreeMap::new(),
            is_strict: true,
            is_system: false,
        }
    }

    pub fn with_permission(mut self, capability: Capability, allowed: bool) -> Self {
        self.permissions
            .insert(capability.as_str().to_string(), allowed);
        self
    }

    pub fn with_page(mut self, page: &str, allowed: bool) -> Self {
        self.pages.insert(page.to_string(), allowed);
        self
    }

    fn flag(&self, role_id: &str, capability: Capability) -> bool {
        match self.permissions.get(capability.as_str()) {
            Some(&explicit) => explicit,
            None if self.is_strict => false,
            None => catalog::default_flag(role_id, capability),
        }
    }

    fn page(&self, page: &str) -> bool {
        match self.pages.get(page) {
            Some(&explicit) => explicit,
            None => !self.is_strict,
        }
    }

    /// Write out the effective value of every flag and page so that the
    /// role means the same thing after its mode changes.
    pub(crate) fn materialize(&mut self, role_id: &str) {
        for capability in Capability::ALL {
            let effective = self.flag(role_id, capability);
            self.permissions
                .insert(capability.as_str().to_string(), effective);
        }
        for page in PAGES {
            let effective = self.page(page);
            self.pages.insert(page.to_string(), effective);
        }
    }

    fn drop_denials(&mut self) {
        self.permissions.retain(|_, allowed| *allowed);
        self.pages.retain(|_, allowed| *allowed);
    }
}

/// The persisted roles configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RolesConfig {
    #[serde(default)]
    pub roles: BTreeMap<String, RoleDefinition>,
    /// User id to role id
    #[serde(default)]
    pub user_assignments: BTreeMap<String, String>,
}

impl RolesConfig {
    pub fn role(&self, role_id: &str) -> Option<&RoleDefinition> {
        self.roles.get(role_id)
    }

    /// Whether `role_id` holds `capability`. `isAdmin` implies every flag.
    pub fn allows(&self, role_id: &str, capability: Capability) -> bool {
        let Some(role) = self.roles.get(role_id) else {
            return false;
        };
        role.flag(role_id, Capability::IsAdmin) || role.flag(role_id, capability)
    }

    /// Whether `role_id` may open `page`.
    pub fn page_allowed(&self, role_id: &str, page: &str) -> bool {
        let Some(role) = self.roles.get(role_id) else {
            return false;
        };
        role.flag(role_id, Capability::IsAdmin) || role.page(page)
    }

    /// Role assigned to `user_id`, or the default user role.
    pub fn role_of(&self, user_id: &str) -> &str {
        self.user_assignments
            .get(user_id)
            .map(String::as_str)
            .unwrap_or(catalog::USER_ROLE)
    }

    /// Copy with explicit `false` entries removed from strict roles.
    pub fn sanitized(&self) -> Self {
        let mut out = self.clone();
        for role in out.roles.values_mut().filter(|r| r.is_strict) {
            role.drop_denials();
        }
        out
    }

    /// Ensure the system roles exist and are flagged as such.
    pub fn with_system_roles(mut self) -> Self {
        for id in catalog::SYSTEM_ROLES {
            match self.roles.get_mut(id) {
                Some(role) => role.is_system = true,
                None => {
                    if let Some(role) = catalog::default_role(id) {
                        self.roles.insert(id.to_string(), role);
                    }
                }
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_config;
    use serde_json::json;

    #[test]
    fn strict_absence_means_denied() {
        let config = default_config();
        assert!(config.allows("hr", Capability::CanEditSalary));
        assert!(!config.allows("manager", Capability::CanEditSalary));
        assert!(!config.allows("user", Capability::CanViewReports));
        assert!(!config.allows("ghost", Capability::CanViewReports));
    }

    #[test]
    fn admin_flag_implies_everything() {
        let config = default_config();
        assert!(config.allows("admin", Capability::CanManageRoles));
        assert!(config.page_allowed("admin", "settings"));
    }

    #[test]
    fn legacy_roles_fall_back_to_catalog() {
        let config: RolesConfig = serde_json::from_value(json!({
            "roles": {
                "hr": {"name": "HR", "permissions": {"canEditSalary": false}},
                "custom": {"name": "Custom"}
            }
        }))
        .unwrap();
        assert!(!config.allows("hr", Capability::CanEditSalary));
        assert!(config.allows("hr", Capability::CanViewSalary));
        assert!(!config.allows("custom", Capability::CanViewSalary));
        assert!(config.page_allowed("custom", "maintenance"));
    }

    #[test]
    fn sanitize_drops_false_from_strict_roles_only() {
        let mut config = default_config();
        config.roles.insert(
            "legacy".into(),
            RoleDefinition {
                is_strict: false,
                ..RoleDefinition::new("Legacy").with_permission(Capability::CanViewSalary, false)
            },
        );
        let hr = config.roles.get_mut("hr").unwrap();
        hr.permissions.insert("canEditSalary".into(), false);
        hr.pages.insert("settings".into(), false);

        let clean = config.sanitized();
        assert!(!clean.roles["hr"].permissions.contains_key("canEditSalary"));
        assert!(!clean.roles["hr"].pages.contains_key("settings"));
        assert_eq!(
            clean.roles["legacy"].permissions.get("canViewSalary"),
            Some(&false)
        );
        for role in ["admin", "hr", "manager", "maintenance", "user"] {
            for capability in Capability::ALL {
                assert_eq!(
                    clean.allows(role, capability),
                    config.allows(role, capability),
                    "{} {}",
                    role,
                    capability
                );
            }
        }
        let before = serde_json::to_string(&config).unwrap();
        let after = serde_json::to_string(&clean).unwrap();
        assert!(after.len() < before.len());
    }

    #[test]
    fn materialize_preserves_meaning() {
        let mut role: RoleDefinition = serde_json::from_value(json!({"name": "HR"})).unwrap();
        let before: Vec<bool> = Capability::ALL.iter().map(|c| role.flag("hr", *c)).collect();
        role.materialize("hr");
        role.is_strict = true;
        let after: Vec<bool> = Capability::ALL.iter().map(|c| role.flag("hr", *c)).collect();
        assert_eq!(before, after);
        assert!(role.page("reports"));
    }

    #[test]
    fn system_roles_are_restored() {
        let config = RolesConfig::default().with_system_roles();
        assert!(config.roles["admin"].is_system);
        assert!(config.roles["user"].is_system);
        assert_eq!(config.role_of("anyone"), "user");
    }
}

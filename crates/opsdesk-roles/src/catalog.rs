//! Built-in role catalog.
//!
//! Seeds the roles configuration when nothing is stored yet, and supplies
//! per-flag defaults for roles that predate strict mode.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::{RoleDefinition, RolesConfig};

/// Role that cannot be deleted and holds every capability.
pub const ADMIN_ROLE: &str = "admin";

/// Role that cannot be deleted; users of a deleted role fall back to it.
pub const USER_ROLE: &str = "user";

pub const SYSTEM_ROLES: [&str; 2] = [ADMIN_ROLE, USER_ROLE];

/// Dashboard pages that can be granted per role.
pub const PAGES: [&str; 9] = [
    "dashboard",
    "employees",
    "departments",
    "absences",
    "maintenance",
    "salaries",
    "reports",
    "roles",
    "settings",
];

/// Capability flag stored on a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    IsAdmin,
    CanViewSalary,
    CanEditSalary,
    CanManageEmployees,
    CanManageDepartments,
    CanApproveAbsences,
    CanManageMaintenance,
    CanViewReports,
    CanManageRoles,
}

impl Capability {
    pub const ALL: [Capability; 9] = [
        Capability::IsAdmin,
        Capability::CanViewSalary,
        Capability::CanEditSalary,
        Capability::CanManageEmployees,
        Capability::CanManageDepartments,
        Capability::CanApproveAbsences,
        Capability::CanManageMaintenance,
        Capability::CanViewReports,
        Capability::CanManageRoles,
    ];

    /// Name used as the key in stored permission maps.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::IsAdmin => "isAdmin",
            Capability::CanViewSalary => "canViewSalary",
            Capability::CanEditSalary => "canEditSalary",
            Capability::CanManageEmployees => "canManageEmployees",
            Capability::CanManageDepartments => "canManageDepartments",
            Capability::CanApproveAbsences => "canApproveAbsences",
            Capability::CanManageMaintenance => "canManageMaintenance",
            Capability::CanViewReports => "canViewReports",
            Capability::CanManageRoles => "canManageRoles",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown capability: {}", s))
    }
}

pub fn is_system_role(role_id: &str) -> bool {
    SYSTEM_ROLES.contains(&role_id)
}

pub fn is_known_page(page: &str) -> bool {
    PAGES.contains(&page)
}

const ADMIN_CAPABILITIES: &[Capability] = &Capability::ALL;
const ADMIN_PAGES: &[&str] = &PAGES;

const MANAGER_CAPABILITIES: &[Capability] = &[
    Capability::CanViewSalary,
    Capability::CanManageEmployees,
    Capability::CanApproveAbsences,
    Capability::CanViewReports,
];
const MANAGER_PAGES: &[&str] = &["dashboard", "employees", "departments", "absences", "reports"];

const HR_CAPABILITIES: &[Capability] = &[
    Capability::CanViewSalary,
    Capability::CanEditSalary,
    Capability::CanManageEmployees,
    Capability::CanManageDepartments,
    Capability::CanApproveAbsences,
    Capability::CanViewReports,
];
const HR_PAGES: &[&str] = &[
    "dashboard",
    "employees",
    "departments",
    "absences",
    "salaries",
    "reports",
];

const MAINTENANCE_CAPABILITIES: &[Capability] = &[Capability::CanManageMaintenance];
const MAINTENANCE_PAGES: &[&str] = &["dashboard", "maintenance"];

const USER_PAGES: &[&str] = &["dashboard"];

const NO_CAPABILITIES: &[Capability] = &[];
const NO_PAGES: &[&str] = &[];

fn grants(role_id: &str) -> (&'static [Capability], &'static [&'static str]) {
    match role_id {
        ADMIN_ROLE => (ADMIN_CAPABILITIES, ADMIN_PAGES),
        "manager" => (MANAGER_CAPABILITIES, MANAGER_PAGES),
        "hr" => (HR_CAPABILITIES, HR_PAGES),
        "maintenance" => (MAINTENANCE_CAPABILITIES, MAINTENANCE_PAGES),
        USER_ROLE => (NO_CAPABILITIES, USER_PAGES),
        _ => (NO_CAPABILITIES, NO_PAGES),
    }
}

/// Catalog default for one flag of one role; unknown roles get nothing.
pub fn default_flag(role_id: &str, capability: Capability) -> bool {
    grants(role_id).0.contains(&capability)
}

fn catalog_role(role_id: &str, name: &str, description: &str) -> RoleDefinition {
    let (capabilities, pages) = grants(role_id);
    RoleDefinition {
        name: name.to_string(),
        description: Some(description.to_string()),
        permissions: capabilities
            .iter()
            .map(|c| (c.as_str().to_string(), true))
            .collect(),
        pages: pages.iter().map(|p| (p.to_string(), true)).collect(),
        is_strict: true,
        is_system: is_system_role(role_id),
    }
}

/// The catalog entry for a built-in role.
pub fn default_role(role_id: &str) -> Option<RoleDefinition> {
    let role = match role_id {
        ADMIN_ROLE => catalog_role(ADMIN_ROLE, "Administrator", "Full access to every area"),
        "manager" => catalog_role("manager", "Manager", "Team oversight and absence approval"),
        "hr" => catalog_role("hr", "Human Resources", "Employee records and salaries"),
        "maintenance" => catalog_role("maintenance", "Maintenance", "Maintenance orders"),
        USER_ROLE => catalog_role(USER_ROLE, "User", "Basic dashboard access"),
        _ => return None,
    };
    Some(role)
}

/// Roles configuration used when nothing is stored.
pub fn default_config() -> RolesConfig {
    let ids = [ADMIN_ROLE, "manager", "hr", "maintenance", USER_ROLE];
    let roles: BTreeMap<String, RoleDefinition> = ids
        .into_iter()
        .filter_map(|id| default_role(id).map(|role| (id.to_string(), role)))
        .collect();
    RolesConfig {
        roles,
        user_assignments: BTreeMap::new(),
    }
}

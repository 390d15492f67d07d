//! The Grid application catalog and organization roles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// One of the sibling products sharing this identity and billing backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GridApp {
    SmartgridDashboard,
    Teamgrid,
    Brandgrid,
    Callgrid,
    Salesgrid,
}

impl GridApp {
    /// The downstream app granted when no explicit grant list applies.
    pub const DEFAULT_DOWNSTREAM: GridApp = GridApp::Teamgrid;

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SmartgridDashboard => "smartgrid-dashboard",
            Self::Teamgrid => "teamgrid",
            Self::Brandgrid => "brandgrid",
            Self::Callgrid => "callgrid",
            Self::Salesgrid => "salesgrid",
        }
    }

    /// Whether this is the platform's own admin surface rather than a
    /// downstream product.
    pub fn is_dashboard(self) -> bool {
        matches!(self, Self::SmartgridDashboard)
    }

    pub fn downstream_apps() -> [GridApp; 4] {
        [
            Self::Teamgrid,
            Self::Brandgrid,
            Self::Callgrid,
            Self::Salesgrid,
        ]
    }
}

impl fmt::Display for GridApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GridApp {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "smartgrid-dashboard" | "smartgrid" => Ok(Self::SmartgridDashboard),
            "teamgrid" => Ok(Self::Teamgrid),
            "brandgrid" => Ok(Self::Brandgrid),
            "callgrid" => Ok(Self::Callgrid),
            "salesgrid" => Ok(Self::Salesgrid),
            _ => Err(Error::InvalidInput(format!("Unknown app '{}'", value))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgRole {
    Owner,
    Admin,
    Member,
}

impl OrgRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    pub fn can_manage_members(self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }

    /// The dashboard itself is restricted to owners and admins; members
    /// are pointed at the per-product apps instead.
    pub fn can_access_dashboard(self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

impl fmt::Display for OrgRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrgRole {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            _ => Err(Error::InvalidInput(format!(
                "Unsupported role '{}'",
                value
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_names_round_trip() {
        for app in [
            GridApp::SmartgridDashboard,
            GridApp::Teamgrid,
            GridApp::Brandgrid,
            GridApp::Callgrid,
            GridApp::Salesgrid,
        ] {
            assert_eq!(app.as_str().parse::<GridApp>().unwrap(), app);
        }
    }

    #[test]
    fn only_owner_and_admin_reach_dashboard() {
        assert!(OrgRole::Owner.can_access_dashboard());
        assert!(OrgRole::Admin.can_access_dashboard());
        assert!(!OrgRole::Member.can_access_dashboard());
    }
}

//! Tenancy store: organizations, memberships and per-app access rows.
//!
//! Every mutating operation takes the single write lock, applies all of
//! its row changes, and persists once. The existence check and the insert
//! for provisioning therefore cannot interleave across requests, which is
//! what closes the duplicate-organization race on repeated OAuth
//! callbacks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::apps::{GridApp, OrgRole};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgStatus {
    Active,
    Suspended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub status: OrgStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub id: Uuid,
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub role: OrgRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Whether the organization as a whole is licensed for an app. Necessary
/// but not sufficient; the member-level row is checked after it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgAppAccess {
    pub org_id: Uuid,
    pub app: GridApp,
    pub has_access: bool,
    pub plan: String,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

/// Per-member access within an already-licensed organization. Absence of
/// a row means "inherit organization access"; only an explicit
/// `has_access = false` row denies an individual member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberAppAccess {
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub app: GridApp,
    pub has_access: bool,
    pub granted_at: DateTime<Utc>,
    pub granted_by: Option<Uuid>,
}

#[derive(Debug, Default)]
struct TenancyState {
    organizations: HashMap<Uuid, Organization>,
    memberships: HashMap<Uuid, Membership>,
    org_app_access: Vec<OrgAppAccess>,
    member_app_access: Vec<MemberAppAccess>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredTenancyState {
    organizations: Vec<Organization>,
    memberships: Vec<Membership>,
    org_app_access: Vec<OrgAppAccess>,
    member_app_access: Vec<MemberAppAccess>,
}

impl From<StoredTenancyState> for TenancyState {
    fn from(value: StoredTenancyState) -> Self {
        Self {
            organizations: value
                .organizations
                .into_iter()
                .map(|item| (item.id, item))
                .collect(),
            memberships: value
                .memberships
                .into_iter()
                .map(|item| (item.id, item))
                .collect(),
            org_app_access: value.org_app_access,
            member_app_access: value.member_app_access,
        }
    }
}

impl From<&TenancyState> for StoredTenancyState {
    fn from(value: &TenancyState) -> Self {
        Self {
            organizations: value.organizations.values().cloned().collect(),
            memberships: value.memberships.values().cloned().collect(),
            org_app_access: value.org_app_access.clone(),
            member_app_access: value.member_app_access.clone(),
        }
    }
}

#[derive(Clone)]
pub struct TenancyStore {
    state: Arc<RwLock<TenancyState>>,
    file_path: PathBuf,
}

impl TenancyStore {
    pub async fn new(base_dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&base_dir)
            .await
            .map_err(|err| Error::Storage(format!("Failed to create data directory: {}", err)))?;
        let file_path = base_dir.join("tenancy.json");
        let state = load_state(&file_path).await?;
        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            file_path,
        })
    }

    /// Create an organization owned by `user_id`, the owner membership,
    /// and the default app licenses, as one unit. Idempotent: if the user
    /// already holds an active membership anywhere, that organization is
    /// returned unchanged.
    pub async fn provision_for_owner(&self, user_id: Uuid, org_name: &str) -> Result<Organization> {
        let org_name = org_name.trim();
        if org_name.is_empty() {
            return Err(Error::InvalidInput(
                "Organization name cannot be empty".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        if let Some(existing) = state
            .memberships
            .values()
            .find(|membership| membership.user_id == user_id && membership.is_active)
        {
            let org = state
                .organizations
                .get(&existing.org_id)
                .cloned()
                .ok_or_else(|| Error::Storage("Membership without organization".to_string()))?;
            return Ok(org);
        }

        let now = Utc::now();
        let org = Organization {
            id: Uuid::new_v4(),
            name: org_name.to_string(),
            owner_id: user_id,
            status: OrgStatus::Active,
            created_at: now,
            updated_at: now,
        };
        let membership = Membership {
            id: Uuid::new_v4(),
            user_id,
            org_id: org.id,
            role: OrgRole::Owner,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.organizations.insert(org.id, org.clone());
        state.memberships.insert(membership.id, membership);
        for app in [GridApp::SmartgridDashboard, GridApp::DEFAULT_DOWNSTREAM] {
            upsert_org_access(&mut state, org.id, app, now);
        }
        persist_state(&self.file_path, &state).await?;
        Ok(org)
    }

    pub async fn get_org(&self, org_id: Uuid) -> Result<Organization> {
        let state = self.state.read().await;
        state
            .organizations
            .get(&org_id)
            .cloned()
            .ok_or_else(|| Error::NotFound("Organization not found".to_string()))
    }

    /// The user's active membership, if any. The data model allows at most
    /// one active membership per user per organization; signup flows only
    /// ever create one organization per user.
    pub async fn membership_for_user(&self, user_id: Uuid) -> Result<Option<Membership>> {
        let state = self.state.read().await;
        Ok(state
            .memberships
            .values()
            .find(|membership| membership.user_id == user_id && membership.is_active)
            .cloned())
    }

    pub async fn membership_in_org(
        &self,
        user_id: Uuid,
        org_id: Uuid,
    ) -> Result<Option<Membership>> {
        let state = self.state.read().await;
        Ok(state
            .memberships
            .values()
            .find(|membership| {
                membership.user_id == user_id
                    && membership.org_id == org_id
                    && membership.is_active
            })
            .cloned())
    }

    /// Attach `user_id` to the organization. An active membership is a
    /// conflict; a soft-deleted one is reactivated rather than duplicated.
    pub async fn ensure_member(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: OrgRole,
    ) -> Result<Membership> {
        let mut state = self.state.write().await;
        if !state.organizations.contains_key(&org_id) {
            return Err(Error::NotFound("Organization not found".to_string()));
        }

        let now = Utc::now();
        if let Some(existing) = state
            .memberships
            .values_mut()
            .find(|membership| membership.user_id == user_id && membership.org_id == org_id)
        {
            if existing.is_active {
                return Err(Error::DuplicateMembership);
            }
            existing.is_active = true;
            existing.role = role;
            existing.updated_at = now;
            let membership = existing.clone();
            persist_state(&self.file_path, &state).await?;
            return Ok(membership);
        }

        let membership = Membership {
            id: Uuid::new_v4(),
            user_id,
            org_id,
            role,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.memberships.insert(membership.id, membership.clone());
        persist_state(&self.file_path, &state).await?;
        Ok(membership)
    }

    pub async fn upsert_org_app_access(&self, org_id: Uuid, app: GridApp) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.organizations.contains_key(&org_id) {
            return Err(Error::NotFound("Organization not found".to_string()));
        }
        upsert_org_access(&mut state, org_id, app, Utc::now());
        persist_state(&self.file_path, &state).await?;
        Ok(())
    }

    pub async fn revoke_org_app_access(&self, org_id: Uuid, app: GridApp) -> Result<()> {
        let mut state = self.state.write().await;
        let row = state
            .org_app_access
            .iter_mut()
            .find(|row| row.org_id == org_id && row.app == app)
            .ok_or_else(|| Error::NotFound("Organization app access not found".to_string()))?;
        row.has_access = false;
        row.updated_at = Utc::now();
        persist_state(&self.file_path, &state).await?;
        Ok(())
    }

    pub async fn org_app_access(&self, org_id: Uuid, app: GridApp) -> Result<Option<OrgAppAccess>> {
        let state = self.state.read().await;
        Ok(state
            .org_app_access
            .iter()
            .find(|row| row.org_id == org_id && row.app == app)
            .cloned())
    }

    /// Write explicit allow rows for exactly `apps` (the invite
    /// allow-list), replacing any previous rows for those apps.
    pub async fn grant_member_app_access(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        apps: &[GridApp],
        granted_by: Option<Uuid>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        for app in apps {
            upsert_member_access(&mut state, org_id, user_id, *app, true, granted_by, now);
        }
        persist_state(&self.file_path, &state).await?;
        Ok(())
    }

    pub async fn set_member_app_access(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        app: GridApp,
        has_access: bool,
        granted_by: Option<Uuid>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        upsert_member_access(&mut state, org_id, user_id, app, has_access, granted_by, Utc::now());
        persist_state(&self.file_path, &state).await?;
        Ok(())
    }

    pub async fn member_app_access(
        &self,
        user_id: Uuid,
        org_id: Uuid,
        app: GridApp,
    ) -> Result<Option<MemberAppAccess>> {
        let state = self.state.read().await;
        Ok(state
            .member_app_access
            .iter()
            .find(|row| row.user_id == user_id && row.org_id == org_id && row.app == app)
            .cloned())
    }

    /// All explicit member rows for a user, keyed by app name. Apps with
    /// no row inherit organization access.
    pub async fn member_access_map(
        &self,
        user_id: Uuid,
        org_id: Uuid,
    ) -> Result<HashMap<String, bool>> {
        let state = self.state.read().await;
        Ok(state
            .member_app_access
            .iter()
            .filter(|row| row.user_id == user_id && row.org_id == org_id)
            .map(|row| (row.app.as_str().to_string(), row.has_access))
            .collect())
    }

    pub async fn list_members(&self, org_id: Uuid) -> Result<Vec<Membership>> {
        let state = self.state.read().await;
        if !state.organizations.contains_key(&org_id) {
            return Err(Error::NotFound("Organization not found".to_string()));
        }
        let mut members: Vec<Membership> = state
            .memberships
            .values()
            .filter(|membership| membership.org_id == org_id && membership.is_active)
            .cloned()
            .collect();
        members.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        Ok(members)
    }

    /// Soft delete: the membership row stays, flagged inactive.
    pub async fn deactivate_member(&self, org_id: Uuid, user_id: Uuid) -> Result<Membership> {
        let mut state = self.state.write().await;
        let membership = state
            .memberships
            .values_mut()
            .find(|membership| {
                membership.user_id == user_id
                    && membership.org_id == org_id
                    && membership.is_active
            })
            .ok_or_else(|| Error::NotFound("User is not a member of this organization".to_string()))?;
        membership.is_active = false;
        membership.updated_at = Utc::now();
        let removed = membership.clone();
        persist_state(&self.file_path, &state).await?;
        Ok(removed)
    }
}

fn upsert_org_access(state: &mut TenancyState, org_id: Uuid, app: GridApp, now: DateTime<Utc>) {
    if let Some(row) = state
        .org_app_access
        .iter_mut()
        .find(|row| row.org_id == org_id && row.app == app)
    {
        row.has_access = true;
        row.updated_at = now;
    } else {
        state.org_app_access.push(OrgAppAccess {
            org_id,
            app,
            has_access: true,
            plan: "free".to_string(),
            status: "active".to_string(),
            updated_at: now,
        });
    }
}

fn upsert_member_access(
    state: &mut TenancyState,
    org_id: Uuid,
    user_id: Uuid,
    app: GridApp,
    has_access: bool,
    granted_by: Option<Uuid>,
    now: DateTime<Utc>,
) {
    if let Some(row) = state
        .member_app_access
        .iter_mut()
        .find(|row| row.user_id == user_id && row.org_id == org_id && row.app == app)
    {
        row.has_access = has_access;
        row.granted_at = now;
        row.granted_by = granted_by;
    } else {
        state.member_app_access.push(MemberAppAccess {
            user_id,
            org_id,
            app,
            has_access,
            granted_at: now,
            granted_by,
        });
    }
}

async fn load_state(path: &Path) -> Result<TenancyState> {
    if !path.exists() {
        return Ok(TenancyState::default());
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| Error::Storage(format!("Failed to read tenancy store: {}", err)))?;
    if content.trim().is_empty() {
        return Ok(TenancyState::default());
    }
    let stored: StoredTenancyState = serde_json::from_str(&content)
        .map_err(|err| Error::Storage(format!("Failed to parse tenancy store: {}", err)))?;
    Ok(stored.into())
}

async fn persist_state(path: &Path, state: &TenancyState) -> Result<()> {
    let content = serde_json::to_string_pretty(&StoredTenancyState::from(state))
        .map_err(|err| Error::Storage(format!("Failed to serialize tenancy store: {}", err)))?;
    tokio::fs::write(path, content)
        .await
        .map_err(|err| Error::Storage(format!("Failed to write tenancy store: {}", err)))?;
    Ok(())
}

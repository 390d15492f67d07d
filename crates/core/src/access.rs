//! Access resolution and provisioning across the Grid applications.
//!
//! The resolver owns the login-time authorization chain and the
//! provisioning flows (signup, first OAuth login, member invites). The
//! ordering of the login checks is load-bearing: the organization-level
//! license gate always runs before the member-level gate, so an
//! unlicensed organization blocks every member regardless of individual
//! grants.

use std::collections::HashMap;

use uuid::Uuid;

use crate::apps::{GridApp, OrgRole};
use crate::billing::BillingStore;
use crate::directory::{generate_password, DirectoryStore, User, UserSummary};
use crate::tenancy::{Membership, Organization, TenancyStore};
use crate::{Error, Result};

/// Who is making the request. Trusted sibling services authenticate with
/// a shared secret and skip per-request role checks; everything else is a
/// user with a role inside one organization.
#[derive(Debug, Clone)]
pub enum Caller {
    Interactive { user_id: Uuid },
    Service { source: String },
}

impl Caller {
    pub fn interactive_user_id(&self) -> Option<Uuid> {
        match self {
            Self::Interactive { user_id } => Some(*user_id),
            Self::Service { .. } => None,
        }
    }
}

/// A successful login/authorization decision.
#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub user: User,
    pub organization: Organization,
    pub membership: Membership,
    /// Explicit member rows only; apps absent from the map inherit
    /// organization access.
    pub member_access: HashMap<String, bool>,
}

#[derive(Debug, Clone)]
pub struct NewSignup {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    pub organization_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MemberDraft {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: OrgRole,
}

#[derive(Debug, Clone)]
pub struct InvitedMember {
    pub user_id: Uuid,
    pub email: String,
    /// Generated credential, present only when the identity was created
    /// by this invite. Never populated for pre-existing identities.
    pub password: Option<String>,
    pub role: OrgRole,
    pub apps: Vec<GridApp>,
}

#[derive(Debug, Clone)]
pub struct MemberDetail {
    pub user: UserSummary,
    pub role: OrgRole,
    pub joined_at: chrono::DateTime<chrono::Utc>,
    pub app_access: HashMap<String, bool>,
}

/// Constructed once at process bootstrap and injected into every handler.
#[derive(Clone)]
pub struct AccessResolver {
    directory: DirectoryStore,
    tenancy: TenancyStore,
    billing: BillingStore,
}

impl AccessResolver {
    pub fn new(directory: DirectoryStore, tenancy: TenancyStore, billing: BillingStore) -> Self {
        Self {
            directory,
            tenancy,
            billing,
        }
    }

    pub fn directory(&self) -> &DirectoryStore {
        &self.directory
    }

    pub fn tenancy(&self) -> &TenancyStore {
        &self.tenancy
    }

    pub fn billing(&self) -> &BillingStore {
        &self.billing
    }

    /// Decide whether a (user, organization, app) triple may log in.
    ///
    /// Check order: credentials, membership, organization license,
    /// dashboard role rule, member-level row. A member row is only
    /// consulted once the organization itself is licensed.
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
        app: GridApp,
    ) -> Result<AccessGrant> {
        let user = self.directory.verify_credentials(email, password).await?;

        let membership = self
            .tenancy
            .membership_for_user(user.id)
            .await?
            .ok_or(Error::NoOrganization)?;

        let org_access = self
            .tenancy
            .org_app_access(membership.org_id, app)
            .await?;
        if !org_access.map(|row| row.has_access).unwrap_or(false) {
            return Err(Error::AppNotLicensed(app));
        }

        // The dashboard is the admin surface; members use the product
        // apps even when the organization is licensed for it.
        if app.is_dashboard() && !membership.role.can_access_dashboard() {
            return Err(Error::InsufficientRole(membership.role));
        }

        if let Some(row) = self
            .tenancy
            .member_app_access(user.id, membership.org_id, app)
            .await?
        {
            if !row.has_access {
                return Err(Error::MemberAccessDenied(app));
            }
        }

        let organization = self.tenancy.get_org(membership.org_id).await?;
        let member_access = self
            .tenancy
            .member_access_map(user.id, membership.org_id)
            .await?;

        tracing::info!(user_id = %user.id, app = %app, "Login authorized");
        Ok(AccessGrant {
            user,
            organization,
            membership,
            member_access,
        })
    }

    /// Create an identity plus its tenant in one call. Membership and
    /// license rows are created atomically with the organization; a
    /// failure there fails the whole signup rather than leaving a user
    /// without any membership.
    pub async fn signup(&self, signup: NewSignup) -> Result<(User, Organization)> {
        let user = self
            .directory
            .create_user(&signup.email, &signup.password, signup.full_name.clone())
            .await?;
        let org = self.provision_for_user(user.id, signup.organization_name).await?;
        Ok((user, org))
    }

    /// Provision an organization for a user who has none (signup or first
    /// OAuth login). Idempotent: repeated calls return the existing
    /// organization unchanged.
    pub async fn provision_for_user(
        &self,
        user_id: Uuid,
        organization_name: Option<String>,
    ) -> Result<Organization> {
        let user = self.directory.get(user_id).await?;
        let org_name = organization_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| {
                let display = user
                    .full_name
                    .clone()
                    .unwrap_or_else(|| user.email.split('@').next().unwrap_or("New").to_string());
                format!("{}'s Organization", display)
            });
        let org = self.tenancy.provision_for_owner(user_id, &org_name).await?;
        self.billing.ensure_account(user_id, org.id).await?;
        tracing::info!(user_id = %user_id, org_id = %org.id, "Organization provisioned");
        Ok(org)
    }

    /// Add a member to an organization, creating the identity if needed.
    ///
    /// Interactive callers must hold owner or admin in the organization;
    /// trusted service callers are exempt from the role check.
    pub async fn invite(
        &self,
        caller: &Caller,
        org_id: Uuid,
        draft: MemberDraft,
        apps: Vec<GridApp>,
    ) -> Result<InvitedMember> {
        match caller {
            Caller::Interactive { user_id } => {
                let membership = self
                    .tenancy
                    .membership_in_org(*user_id, org_id)
                    .await?
                    .ok_or_else(|| {
                        Error::Forbidden(
                            "You do not have permission to add members to this organization"
                                .to_string(),
                        )
                    })?;
                if !membership.role.can_manage_members() {
                    return Err(Error::Forbidden(
                        "You do not have permission to add members to this organization"
                            .to_string(),
                    ));
                }
            }
            Caller::Service { source } => {
                tracing::debug!(source, "Role check skipped for trusted service");
            }
        }

        let (user, generated_password) = match self.directory.find_by_email(&draft.email).await? {
            Some(existing) => (existing, None),
            None => {
                let password = generate_password();
                let full_name = format!("{} {}", draft.first_name.trim(), draft.last_name.trim());
                let user = self
                    .directory
                    .create_user(&draft.email, &password, Some(full_name))
                    .await?;
                (user, Some(password))
            }
        };

        // Membership before grants: a failure here must fail the invite
        // visibly, while grant rows can be retried.
        self.tenancy
            .ensure_member(org_id, user.id, draft.role)
            .await?;

        let granted_by = caller.interactive_user_id();
        for app in &apps {
            self.tenancy.upsert_org_app_access(org_id, *app).await?;
        }
        self.tenancy
            .grant_member_app_access(org_id, user.id, &apps, granted_by)
            .await?;

        tracing::info!(
            org_id = %org_id,
            member_id = %user.id,
            role = %draft.role,
            "Member invited"
        );
        Ok(InvitedMember {
            user_id: user.id,
            email: user.email,
            password: generated_password,
            role: draft.role,
            apps,
        })
    }

    /// List active members. Interactive callers must themselves be
    /// members; the requester's role is echoed back for the dashboard UI.
    pub async fn list_members(
        &self,
        caller: &Caller,
        org_id: Uuid,
    ) -> Result<(Vec<MemberDetail>, Option<OrgRole>)> {
        let requester_role = match caller {
            Caller::Interactive { user_id } => Some(
                self.tenancy
                    .membership_in_org(*user_id, org_id)
                    .await?
                    .ok_or_else(|| {
                        Error::Forbidden("You are not a member of this organization".to_string())
                    })?
                    .role,
            ),
            Caller::Service { .. } => None,
        };

        let memberships = self.tenancy.list_members(org_id).await?;
        let mut members = Vec::with_capacity(memberships.len());
        for membership in memberships {
            let user = self.directory.get(membership.user_id).await?;
            let app_access = self
                .tenancy
                .member_access_map(membership.user_id, org_id)
                .await?;
            members.push(MemberDetail {
                user: user.summary(),
                role: membership.role,
                joined_at: membership.created_at,
                app_access,
            });
        }
        Ok((members, requester_role))
    }

    /// Flip a member's explicit access row for one app. Interactive
    /// callers must hold owner or admin; trusted services are exempt.
    pub async fn set_member_access(
        &self,
        caller: &Caller,
        org_id: Uuid,
        target_user_id: Uuid,
        app: GridApp,
        has_access: bool,
    ) -> Result<()> {
        if let Caller::Interactive { user_id } = caller {
            let membership = self
                .tenancy
                .membership_in_org(*user_id, org_id)
                .await?
                .ok_or_else(|| {
                    Error::Forbidden(
                        "You do not have permission to manage app access in this organization"
                            .to_string(),
                    )
                })?;
            if !membership.role.can_manage_members() {
                return Err(Error::Forbidden(
                    "You do not have permission to manage app access in this organization"
                        .to_string(),
                ));
            }
        }
        self.tenancy
            .membership_in_org(target_user_id, org_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound("User is not a member of this organization".to_string())
            })?;
        self.tenancy
            .set_member_app_access(org_id, target_user_id, app, has_access, caller.interactive_user_id())
            .await
    }

    /// Soft-remove a member. Owners are irremovable except by themselves;
    /// admins can only be removed by the owner. Requires an interactive
    /// caller: removal is a dashboard action, not a service-to-service
    /// one.
    pub async fn remove_member(
        &self,
        caller: &Caller,
        org_id: Uuid,
        target_user_id: Uuid,
    ) -> Result<Membership> {
        let requester_id = caller.interactive_user_id().ok_or_else(|| {
            Error::Forbidden("Member removal requires an interactive session".to_string())
        })?;
        let requester = self
            .tenancy
            .membership_in_org(requester_id, org_id)
            .await?
            .ok_or_else(|| {
                Error::Forbidden(
                    "You do not have permission to remove members from this organization"
                        .to_string(),
                )
            })?;
        if !requester.role.can_manage_members() {
            return Err(Error::Forbidden(
                "You do not have permission to remove members from this organization".to_string(),
            ));
        }

        let target = self
            .tenancy
            .membership_in_org(target_user_id, org_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound("User is not a member of this organization".to_string())
            })?;
        if target.role == OrgRole::Owner && target_user_id != requester_id {
            return Err(Error::Forbidden(
                "Cannot remove organization owner".to_string(),
            ));
        }
        if requester.role != OrgRole::Owner && target.role == OrgRole::Admin {
            return Err(Error::Forbidden(
                "Only organization owners can remove admins".to_string(),
            ));
        }

        let removed = self.tenancy.deactivate_member(org_id, target_user_id).await?;
        tracing::info!(org_id = %org_id, member_id = %target_user_id, "Member removed");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    async fn build_resolver() -> (AccessResolver, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().to_path_buf();
        let directory = DirectoryStore::new(base.clone()).await.unwrap();
        let tenancy = TenancyStore::new(base.clone()).await.unwrap();
        let billing = BillingStore::new(base).await.unwrap();
        (AccessResolver::new(directory, tenancy, billing), temp_dir)
    }

    async fn signup_owner(resolver: &AccessResolver) -> (User, Organization) {
        resolver
            .signup(NewSignup {
                email: "a@x.com".to_string(),
                password: "Passw0rd1".to_string(),
                full_name: Some("Ada Lovelace".to_string()),
                organization_name: Some("Acme".to_string()),
            })
            .await
            .unwrap()
    }

    fn draft(email: &str, role: OrgRole) -> MemberDraft {
        MemberDraft {
            first_name: "Grace".to_string(),
            last_name: "Hopper".to_string(),
            email: email.to_string(),
            role,
        }
    }

    #[tokio::test]
    async fn signup_creates_owner_org_and_free_billing() {
        let (resolver, _tmp) = build_resolver().await;
        let (user, org) = signup_owner(&resolver).await;
        assert_eq!(org.name, "Acme");
        assert_eq!(org.owner_id, user.id);

        let membership = resolver
            .tenancy()
            .membership_for_user(user.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(membership.role, OrgRole::Owner);

        let billing = resolver.billing().account_for_user(user.id).await.unwrap();
        assert_eq!(billing.plan.as_str(), "free");
    }

    #[tokio::test]
    async fn repeated_provisioning_returns_same_org() {
        let (resolver, _tmp) = build_resolver().await;
        let (user, org) = signup_owner(&resolver).await;
        let again = resolver
            .provision_for_user(user.id, Some("Other Name".to_string()))
            .await
            .unwrap();
        assert_eq!(again.id, org.id);
    }

    #[tokio::test]
    async fn owner_logs_into_dashboard() {
        let (resolver, _tmp) = build_resolver().await;
        signup_owner(&resolver).await;
        let grant = resolver
            .authenticate("a@x.com", "Passw0rd1", GridApp::SmartgridDashboard)
            .await
            .unwrap();
        assert_eq!(grant.membership.role, OrgRole::Owner);
        assert!(grant.member_access.is_empty());
    }

    #[tokio::test]
    async fn member_role_is_rejected_by_dashboard_but_not_products() {
        let (resolver, _tmp) = build_resolver().await;
        let (owner, org) = signup_owner(&resolver).await;
        let caller = Caller::Interactive { user_id: owner.id };
        let invited = resolver
            .invite(
                &caller,
                org.id,
                draft("b@x.com", OrgRole::Member),
                vec![GridApp::Teamgrid, GridApp::SmartgridDashboard],
            )
            .await
            .unwrap();
        let password = invited.password.unwrap();

        let dashboard = resolver
            .authenticate("b@x.com", &password, GridApp::SmartgridDashboard)
            .await;
        assert!(matches!(
            dashboard,
            Err(Error::InsufficientRole(OrgRole::Member))
        ));

        resolver
            .authenticate("b@x.com", &password, GridApp::Teamgrid)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn absent_member_row_inherits_org_access() {
        let (resolver, _tmp) = build_resolver().await;
        let (owner, org) = signup_owner(&resolver).await;

        // No member row for the owner on teamgrid, org is licensed.
        resolver
            .authenticate("a@x.com", "Passw0rd1", GridApp::Teamgrid)
            .await
            .unwrap();

        resolver
            .tenancy()
            .set_member_app_access(org.id, owner.id, GridApp::Teamgrid, false, None)
            .await
            .unwrap();
        let denied = resolver
            .authenticate("a@x.com", "Passw0rd1", GridApp::Teamgrid)
            .await;
        assert!(matches!(
            denied,
            Err(Error::MemberAccessDenied(GridApp::Teamgrid))
        ));
    }

    #[tokio::test]
    async fn org_license_gate_precedes_member_grant() {
        let (resolver, _tmp) = build_resolver().await;
        let (owner, org) = signup_owner(&resolver).await;

        // Explicit member allow, then revoke the org license: the org
        // gate must win.
        resolver
            .tenancy()
            .set_member_app_access(org.id, owner.id, GridApp::Teamgrid, true, None)
            .await
            .unwrap();
        resolver
            .tenancy()
            .revoke_org_app_access(org.id, GridApp::Teamgrid)
            .await
            .unwrap();

        let denied = resolver
            .authenticate("a@x.com", "Passw0rd1", GridApp::Teamgrid)
            .await;
        assert!(matches!(
            denied,
            Err(Error::AppNotLicensed(GridApp::Teamgrid))
        ));
    }

    #[tokio::test]
    async fn unlicensed_app_is_rejected() {
        let (resolver, _tmp) = build_resolver().await;
        signup_owner(&resolver).await;
        let denied = resolver
            .authenticate("a@x.com", "Passw0rd1", GridApp::Callgrid)
            .await;
        assert!(matches!(
            denied,
            Err(Error::AppNotLicensed(GridApp::Callgrid))
        ));
    }

    #[tokio::test]
    async fn invite_requires_manager_role_for_interactive_callers() {
        let (resolver, _tmp) = build_resolver().await;
        let (owner, org) = signup_owner(&resolver).await;
        let owner_caller = Caller::Interactive { user_id: owner.id };
        let invited = resolver
            .invite(
                &owner_caller,
                org.id,
                draft("b@x.com", OrgRole::Member),
                vec![GridApp::Teamgrid],
            )
            .await
            .unwrap();

        let member_caller = Caller::Interactive {
            user_id: invited.user_id,
        };
        let refused = resolver
            .invite(
                &member_caller,
                org.id,
                draft("c@x.com", OrgRole::Member),
                vec![GridApp::Teamgrid],
            )
            .await;
        assert!(matches!(refused, Err(Error::Forbidden(_))));
    }

    #[tokio::test]
    async fn service_caller_bypasses_role_check() {
        let (resolver, _tmp) = build_resolver().await;
        let (_, org) = signup_owner(&resolver).await;
        let service = Caller::Service {
            source: "teamgrid".to_string(),
        };
        let invited = resolver
            .invite(
                &service,
                org.id,
                draft("b@x.com", OrgRole::Member),
                vec![GridApp::Teamgrid],
            )
            .await
            .unwrap();
        assert!(invited.password.is_some());
    }

    #[tokio::test]
    async fn inviting_existing_identity_never_returns_password() {
        let (resolver, _tmp) = build_resolver().await;
        let (owner, org) = signup_owner(&resolver).await;
        resolver
            .directory()
            .create_user("b@x.com", "TheirOwnPw1", None)
            .await
            .unwrap();

        let caller = Caller::Interactive { user_id: owner.id };
        let invited = resolver
            .invite(
                &caller,
                org.id,
                draft("b@x.com", OrgRole::Member),
                vec![GridApp::Teamgrid],
            )
            .await
            .unwrap();
        assert!(invited.password.is_none());
    }

    #[tokio::test]
    async fn inviting_active_member_is_a_duplicate() {
        let (resolver, _tmp) = build_resolver().await;
        let (owner, org) = signup_owner(&resolver).await;
        let caller = Caller::Interactive { user_id: owner.id };
        resolver
            .invite(
                &caller,
                org.id,
                draft("b@x.com", OrgRole::Member),
                vec![GridApp::Teamgrid],
            )
            .await
            .unwrap();
        let again = resolver
            .invite(
                &caller,
                org.id,
                draft("b@x.com", OrgRole::Member),
                vec![GridApp::Teamgrid],
            )
            .await;
        assert!(matches!(again, Err(Error::DuplicateMembership)));
    }

    #[tokio::test]
    async fn invite_grants_exactly_the_allow_list() {
        let (resolver, _tmp) = build_resolver().await;
        let (owner, org) = signup_owner(&resolver).await;
        let caller = Caller::Interactive { user_id: owner.id };
        let invited = resolver
            .invite(
                &caller,
                org.id,
                draft("b@x.com", OrgRole::Member),
                vec![GridApp::Callgrid],
            )
            .await
            .unwrap();

        let map = resolver
            .tenancy()
            .member_access_map(invited.user_id, org.id)
            .await
            .unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("callgrid"), Some(&true));

        // The invite also licensed the org for the granted app.
        let org_row = resolver
            .tenancy()
            .org_app_access(org.id, GridApp::Callgrid)
            .await
            .unwrap()
            .unwrap();
        assert!(org_row.has_access);
    }

    #[tokio::test]
    async fn owner_cannot_be_removed_by_admin() {
        let (resolver, _tmp) = build_resolver().await;
        let (owner, org) = signup_owner(&resolver).await;
        let owner_caller = Caller::Interactive { user_id: owner.id };
        let admin = resolver
            .invite(
                &owner_caller,
                org.id,
                draft("admin@x.com", OrgRole::Admin),
                vec![GridApp::Teamgrid],
            )
            .await
            .unwrap();

        let admin_caller = Caller::Interactive {
            user_id: admin.user_id,
        };
        let refused = resolver
            .remove_member(&admin_caller, org.id, owner.id)
            .await;
        assert!(matches!(refused, Err(Error::Forbidden(_))));

        // The owner can remove the admin.
        resolver
            .remove_member(&owner_caller, org.id, admin.user_id)
            .await
            .unwrap();
        let (members, _) = resolver
            .list_members(&owner_caller, org.id)
            .await
            .unwrap();
        assert_eq!(members.len(), 1);
    }
}

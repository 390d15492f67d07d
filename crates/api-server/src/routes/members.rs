//! Member management: invites, listing, app access, removal.

use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smartgrid_core::access::MemberDraft;
use smartgrid_core::apps::{GridApp, OrgRole};
use smartgrid_core::policy;
use uuid::Uuid;

use crate::identity::{app_source_header, origin_header, resolve_caller};
use crate::mirror::MirrorMember;
use crate::state::AppState;

use super::auth::{api_error, bad_request, map_core_error, ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddMemberRequest {
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    organization_id: Option<Uuid>,
    #[serde(default)]
    apps: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddMemberResponse {
    success: bool,
    message: String,
    user_id: Uuid,
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    role: OrgRole,
    apps: Vec<GridApp>,
}

fn parse_apps(raw: Option<Vec<String>>) -> Result<Option<Vec<GridApp>>, ApiError> {
    match raw {
        None => Ok(None),
        Some(names) => {
            let mut apps = Vec::with_capacity(names.len());
            for name in names {
                apps.push(name.parse::<GridApp>().map_err(map_core_error)?);
            }
            Ok(Some(apps))
        }
    }
}

async fn add_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AddMemberRequest>,
) -> Result<Json<AddMemberResponse>, ApiError> {
    let caller = resolve_caller(state.config(), &headers).map_err(map_core_error)?;
    let (Some(first_name), Some(last_name), Some(email)) =
        (req.first_name, req.last_name, req.email)
    else {
        return Err(bad_request("First name, last name and email are required"));
    };
    let Some(org_id) = req.organization_id else {
        return Err(bad_request("Organization ID is required"));
    };
    let role = match req.role.as_deref() {
        None => OrgRole::Member,
        Some(raw) => raw.parse::<OrgRole>().map_err(map_core_error)?,
    };

    // The requesting app caps what it may grant: sibling apps are pinned
    // to themselves no matter what the body asked for.
    let source = policy::resolve_source(app_source_header(&headers), origin_header(&headers));
    let apps = policy::resolve_app_grants(source, parse_apps(req.apps)?);

    let invited = state
        .resolver()
        .invite(
            &caller,
            org_id,
            MemberDraft {
                first_name: first_name.clone(),
                last_name: last_name.clone(),
                email,
                role,
            },
            apps,
        )
        .await
        .map_err(map_core_error)?;

    state
        .mirror()
        .mirror_member(&MirrorMember {
            user_id: invited.user_id,
            organization_id: org_id,
            email: invited.email.clone(),
            first_name,
            last_name,
            role: invited.role.to_string(),
        })
        .await;

    Ok(Json(AddMemberResponse {
        success: true,
        message: "Member added successfully".to_string(),
        user_id: invited.user_id,
        email: invited.email,
        password: invited.password,
        role: invited.role,
        apps: invited.apps,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMembersQuery {
    organization_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MemberPayload {
    id: Uuid,
    email: String,
    first_name: String,
    last_name: String,
    role: OrgRole,
    joined_at: DateTime<Utc>,
    app_access: HashMap<String, bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListMembersResponse {
    success: bool,
    members: Vec<MemberPayload>,
    total: usize,
    current_user_role: Option<OrgRole>,
}

fn split_name(full_name: Option<&str>) -> (String, String) {
    let full = full_name.unwrap_or("").trim();
    match full.split_once(' ') {
        Some((first, last)) => (first.to_string(), last.trim().to_string()),
        None => (full.to_string(), String::new()),
    }
}

async fn list_members(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListMembersQuery>,
) -> Result<Json<ListMembersResponse>, ApiError> {
    let caller = resolve_caller(state.config(), &headers).map_err(map_core_error)?;
    let Some(org_id) = query.organization_id else {
        return Err(bad_request("Organization ID is required"));
    };

    let (details, current_user_role) = state
        .resolver()
        .list_members(&caller, org_id)
        .await
        .map_err(map_core_error)?;

    let members: Vec<MemberPayload> = details
        .into_iter()
        .map(|detail| {
            let (first_name, last_name) = split_name(detail.user.full_name.as_deref());
            MemberPayload {
                id: detail.user.id,
                email: detail.user.email,
                first_name,
                last_name,
                role: detail.role,
                joined_at: detail.joined_at,
                app_access: detail.app_access,
            }
        })
        .collect();

    Ok(Json(ListMembersResponse {
        success: true,
        total: members.len(),
        members,
        current_user_role,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppAccessRequest {
    user_id: Option<Uuid>,
    organization_id: Option<Uuid>,
    app: Option<String>,
    has_access: Option<bool>,
}

#[derive(Debug, Serialize)]
struct AppAccessResponse {
    success: bool,
    message: String,
}

async fn set_app_access(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AppAccessRequest>,
) -> Result<Json<AppAccessResponse>, ApiError> {
    let caller = resolve_caller(state.config(), &headers).map_err(map_core_error)?;
    let (Some(user_id), Some(org_id), Some(app), Some(has_access)) =
        (req.user_id, req.organization_id, req.app.as_deref(), req.has_access)
    else {
        return Err(bad_request(
            "userId, organizationId, app and hasAccess are required",
        ));
    };
    let app = app.parse::<GridApp>().map_err(map_core_error)?;

    state
        .resolver()
        .set_member_access(&caller, org_id, user_id, app, has_access)
        .await
        .map_err(map_core_error)?;

    let verb = if has_access { "granted" } else { "revoked" };
    Ok(Json(AppAccessResponse {
        success: true,
        message: format!("Access to {} {}", app, verb),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveMemberRequest {
    user_id: Option<Uuid>,
    organization_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
struct RemovedUserPayload {
    id: Uuid,
    email: String,
    role: OrgRole,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoveMemberResponse {
    success: bool,
    message: String,
    removed_user: RemovedUserPayload,
}

async fn remove_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RemoveMemberRequest>,
) -> Result<Json<RemoveMemberResponse>, ApiError> {
    let caller = resolve_caller(state.config(), &headers).map_err(map_core_error)?;
    let (Some(user_id), Some(org_id)) = (req.user_id, req.organization_id) else {
        return Err(bad_request("userId and organizationId are required"));
    };

    let removed = state
        .resolver()
        .remove_member(&caller, org_id, user_id)
        .await
        .map_err(map_core_error)?;
    let user = state
        .resolver()
        .directory()
        .get(user_id)
        .await
        .map_err(map_core_error)?;

    Ok(Json(RemoveMemberResponse {
        success: true,
        message: "Member removed from organization".to_string(),
        removed_user: RemovedUserPayload {
            id: user.id,
            email: user.email,
            role: removed.role,
        },
    }))
}

async fn method_guard() -> ApiError {
    api_error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/organization/members/invite",
            post(add_member).get(method_guard),
        )
        .route("/organization/members/list", get(list_members))
        .route("/organization/members/app-access", post(set_app_access))
        .route("/organization/members/remove", delete(remove_member))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::routes::auth::tests::{body_json, build_state, post_json};
    use crate::session;
    use crate::state::AppState;

    async fn seeded_state() -> (AppState, tempfile::TempDir, String, uuid::Uuid) {
        let (state, tmp) = build_state().await;
        let (owner, org) = state
            .resolver()
            .signup(smartgrid_core::access::NewSignup {
                email: "owner@x.com".to_string(),
                password: "Passw0rd1".to_string(),
                full_name: Some("Olive Owner".to_string()),
                organization_name: Some("Acme".to_string()),
            })
            .await
            .unwrap();
        let tokens = session::issue_session(
            state.config(),
            owner.id,
            org.id,
            smartgrid_core::apps::OrgRole::Owner,
        )
        .unwrap();
        (state, tmp, tokens.access_token, org.id)
    }

    fn authed(mut request: Request<Body>, token: &str) -> Request<Body> {
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", token).parse().unwrap(),
        );
        request
    }

    #[tokio::test]
    async fn owner_invites_member_with_generated_password() {
        let (state, _tmp, token, org_id) = seeded_state().await;
        let app = super::router().with_state(state);

        let response = app
            .oneshot(authed(
                post_json(
                    "/organization/members/invite",
                    json!({
                        "firstName": "Grace",
                        "lastName": "Hopper",
                        "email": "grace@x.com",
                        "organizationId": org_id,
                        "apps": ["teamgrid", "callgrid"]
                    }),
                ),
                &token,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response.into_body()).await;
        assert_eq!(payload["role"], "member");
        assert!(payload["password"].as_str().unwrap().len() >= 12);
        // No Origin header and no x-app-source: the explicit list stands
        // only for dashboard callers, so the fallback applies.
        assert_eq!(payload["apps"], json!(["teamgrid"]));
    }

    #[tokio::test]
    async fn sibling_origin_overrides_requested_grants() {
        let (state, _tmp, token, org_id) = seeded_state().await;
        let app = super::router().with_state(state);

        let mut request = authed(
            post_json(
                "/organization/members/invite",
                json!({
                    "firstName": "Carl",
                    "lastName": "Caller",
                    "email": "carl@x.com",
                    "organizationId": org_id,
                    "apps": ["teamgrid", "salesgrid"]
                }),
            ),
            &token,
        );
        request
            .headers_mut()
            .insert("Origin", "http://localhost:3004".parse().unwrap());

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response.into_body()).await;
        assert_eq!(payload["apps"], json!(["callgrid"]));
    }

    #[tokio::test]
    async fn dashboard_source_header_keeps_requested_grants() {
        let (state, _tmp, token, org_id) = seeded_state().await;
        let app = super::router().with_state(state);

        let mut request = authed(
            post_json(
                "/organization/members/invite",
                json!({
                    "firstName": "Dana",
                    "lastName": "Dash",
                    "email": "dana@x.com",
                    "organizationId": org_id,
                    "apps": ["brandgrid", "salesgrid"]
                }),
            ),
            &token,
        );
        request
            .headers_mut()
            .insert("x-app-source", "smartgrid-dashboard".parse().unwrap());

        let response = app.oneshot(request).await.unwrap();
        let payload = body_json(response.into_body()).await;
        assert_eq!(payload["apps"], json!(["brandgrid", "salesgrid"]));
    }

    #[tokio::test]
    async fn listing_splits_names_and_reports_requester_role() {
        let (state, _tmp, token, org_id) = seeded_state().await;
        let app = super::router().with_state(state);

        let uri = format!("/organization/members/list?organizationId={}", org_id);
        let request = authed(
            Request::builder().uri(uri).body(Body::empty()).unwrap(),
            &token,
        );
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response.into_body()).await;
        assert_eq!(payload["total"], 1);
        assert_eq!(payload["currentUserRole"], "owner");
        assert_eq!(payload["members"][0]["firstName"], "Olive");
        assert_eq!(payload["members"][0]["lastName"], "Owner");
    }

    #[tokio::test]
    async fn listing_requires_membership() {
        let (state, _tmp, _token, org_id) = seeded_state().await;
        let outsider = state
            .resolver()
            .directory()
            .create_user("outsider@x.com", "Passw0rd1", None)
            .await
            .unwrap();
        let outsider_token = session::issue_session(
            state.config(),
            outsider.id,
            uuid::Uuid::new_v4(),
            smartgrid_core::apps::OrgRole::Member,
        )
        .unwrap()
        .access_token;
        let app = super::router().with_state(state);

        let uri = format!("/organization/members/list?organizationId={}", org_id);
        let request = authed(
            Request::builder().uri(uri).body(Body::empty()).unwrap(),
            &outsider_token,
        );
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn app_access_toggle_then_removal() {
        let (state, _tmp, token, org_id) = seeded_state().await;
        let app = super::router().with_state(state.clone());

        let invite = app
            .clone()
            .oneshot(authed(
                post_json(
                    "/organization/members/invite",
                    json!({
                        "firstName": "Grace",
                        "lastName": "Hopper",
                        "email": "grace@x.com",
                        "organizationId": org_id
                    }),
                ),
                &token,
            ))
            .await
            .unwrap();
        let invited: Value = body_json(invite.into_body()).await;
        let member_id = invited["userId"].as_str().unwrap().to_string();

        let toggled = app
            .clone()
            .oneshot(authed(
                post_json(
                    "/organization/members/app-access",
                    json!({
                        "userId": member_id,
                        "organizationId": org_id,
                        "app": "teamgrid",
                        "hasAccess": false
                    }),
                ),
                &token,
            ))
            .await
            .unwrap();
        assert_eq!(toggled.status(), StatusCode::OK);

        let mut remove = post_json(
            "/organization/members/remove",
            json!({"userId": member_id, "organizationId": org_id}),
        );
        *remove.method_mut() = axum::http::Method::DELETE;
        let removed = app.oneshot(authed(remove, &token)).await.unwrap();
        assert_eq!(removed.status(), StatusCode::OK);
        let payload = body_json(removed.into_body()).await;
        assert_eq!(payload["removedUser"]["email"], "grace@x.com");

        let (members, _) = state
            .resolver()
            .list_members(
                &smartgrid_core::access::Caller::Service {
                    source: "teamgrid".to_string(),
                },
                org_id,
            )
            .await
            .unwrap();
        assert_eq!(members.len(), 1);
    }

    #[tokio::test]
    async fn service_secret_invites_without_membership() {
        let (state, _tmp, _token, org_id) = seeded_state().await;
        let app = super::router().with_state(state);

        let mut request = post_json(
            "/organization/members/invite",
            json!({
                "firstName": "Sal",
                "lastName": "Sales",
                "email": "sal@x.com",
                "organizationId": org_id
            }),
        );
        request.headers_mut().insert(
            "Authorization",
            "Bearer grid-apps-test-secret".parse().unwrap(),
        );
        request
            .headers_mut()
            .insert("x-app-source", "salesgrid".parse().unwrap());

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let payload = body_json(response.into_body()).await;
        assert_eq!(payload["apps"], json!(["salesgrid"]));
    }
}

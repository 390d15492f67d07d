//! Best-effort mirror of new members into the TeamGrid document store.
//!
//! Mirroring is a secondary side effect: the membership and access rows
//! written by the resolver are the source of truth, so any failure here
//! is logged and swallowed rather than failing the request.

use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct MirrorMember {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
}

#[derive(Clone)]
pub struct MirrorClient {
    http: reqwest::Client,
    base_url: Option<String>,
}

impl MirrorClient {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    pub async fn mirror_member(&self, member: &MirrorMember) {
        let Some(base_url) = self.base_url.as_deref() else {
            return;
        };
        let url = format!("{}/users/create", base_url.trim_end_matches('/'));
        match self.http.post(&url).json(member).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(user_id = %member.user_id, "Member mirrored to TeamGrid");
            }
            Ok(response) => {
                tracing::warn!(
                    status = %response.status(),
                    user_id = %member.user_id,
                    "TeamGrid mirror rejected member"
                );
            }
            Err(err) => {
                tracing::warn!(error = %err, user_id = %member.user_id, "TeamGrid mirror unreachable");
            }
        }
    }
}

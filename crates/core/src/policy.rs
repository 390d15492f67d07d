//! Origin-based provisioning policy.
//!
//! A caller identifying as one sibling application may only provision
//! access to that application; only the dashboard origin may pass an
//! explicit multi-app grant list. Pure functions, no side effects.

use crate::apps::GridApp;

/// The application a request claims to originate from, resolved from the
/// `x-app-source` header first and the HTTP `Origin` second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppSource {
    Known(GridApp),
    Unknown,
}

const ORIGIN_TABLE: &[(&str, GridApp)] = &[
    ("http://localhost:3000", GridApp::SmartgridDashboard),
    ("http://localhost:3002", GridApp::Teamgrid),
    ("http://localhost:3003", GridApp::Brandgrid),
    ("http://localhost:3004", GridApp::Callgrid),
    ("http://localhost:3005", GridApp::Salesgrid),
    ("https://smartgrid-dashboard.vercel.app", GridApp::SmartgridDashboard),
    ("https://teamgrid-frontend.vercel.app", GridApp::Teamgrid),
    ("https://brandgrid-frontend.vercel.app", GridApp::Brandgrid),
    ("https://callgrid-frontend.vercel.app", GridApp::Callgrid),
    ("https://salesgrid-frontend.vercel.app", GridApp::Salesgrid),
];

pub fn resolve_source(source_header: Option<&str>, origin: Option<&str>) -> AppSource {
    if let Some(raw) = source_header {
        if let Ok(app) = raw.parse::<GridApp>() {
            return AppSource::Known(app);
        }
    }
    if let Some(origin) = origin {
        if let Some((_, app)) = ORIGIN_TABLE
            .iter()
            .find(|(known_origin, _)| *known_origin == origin)
        {
            return AppSource::Known(*app);
        }
    }
    AppSource::Unknown
}

/// Compute the apps to grant during an invite.
///
/// Known sibling sources are pinned to exactly their own app regardless of
/// the request body; the dashboard may pass an explicit list; unknown
/// sources fall back to the lowest-privilege downstream app.
pub fn resolve_app_grants(source: AppSource, requested: Option<Vec<GridApp>>) -> Vec<GridApp> {
    match source {
        AppSource::Known(GridApp::SmartgridDashboard) => {
            let mut grants = requested.unwrap_or_default();
            if grants.is_empty() {
                grants.push(GridApp::DEFAULT_DOWNSTREAM);
            }
            grants.dedup();
            grants
        }
        AppSource::Known(app) => vec![app],
        AppSource::Unknown => vec![GridApp::DEFAULT_DOWNSTREAM],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_header_wins_over_origin() {
        let source = resolve_source(Some("callgrid"), Some("http://localhost:3002"));
        assert_eq!(source, AppSource::Known(GridApp::Callgrid));
    }

    #[test]
    fn origin_table_resolves_known_front_ends() {
        let source = resolve_source(None, Some("https://brandgrid-frontend.vercel.app"));
        assert_eq!(source, AppSource::Known(GridApp::Brandgrid));
        assert_eq!(
            resolve_source(None, Some("https://evil.example.com")),
            AppSource::Unknown
        );
    }

    #[test]
    fn sibling_sources_are_pinned_to_their_own_app() {
        let grants = resolve_app_grants(
            AppSource::Known(GridApp::Callgrid),
            Some(vec![GridApp::Teamgrid, GridApp::Salesgrid]),
        );
        assert_eq!(grants, vec![GridApp::Callgrid]);
    }

    #[test]
    fn dashboard_may_pass_explicit_grant_list() {
        let grants = resolve_app_grants(
            AppSource::Known(GridApp::SmartgridDashboard),
            Some(vec![GridApp::Brandgrid, GridApp::Salesgrid]),
        );
        assert_eq!(grants, vec![GridApp::Brandgrid, GridApp::Salesgrid]);
    }

    #[test]
    fn dashboard_without_list_gets_default_downstream() {
        let grants = resolve_app_grants(AppSource::Known(GridApp::SmartgridDashboard), None);
        assert_eq!(grants, vec![GridApp::Teamgrid]);
    }

    #[test]
    fn unknown_source_falls_back_to_default() {
        let grants = resolve_app_grants(AppSource::Unknown, Some(vec![GridApp::Salesgrid]));
        assert_eq!(grants, vec![GridApp::Teamgrid]);
    }
}

// Route access rules for UI collaborators

use super::types::{Role, SessionState};

/// Paths that need a signed-in user
pub const PROTECTED_PATHS: [&str; 2] = ["/dashboard", "/events/create"];

pub const LOGIN_PATH: &str = "/login";
pub const REGISTER_PATH: &str = "/register";
pub const DASHBOARD_PATH: &str = "/dashboard";

/// What the UI should do when entering a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    Redirect(&'static str),
}

pub fn is_protected_path(path: &str) -> bool {
    PROTECTED_PATHS.iter().any(|p| path.starts_with(p))
}

/// Whether `role` (with or without the `ROLE_` prefix) may open `path`
pub fn has_access(role: &str, path: &str) -> bool {
    if !is_protected_path(path) || path.starts_with(DASHBOARD_PATH) {
        return true;
    }
    if path.starts_with("/events/create") {
        return Role::parse(role) == Some(Role::Organizer);
    }
    false
}

/// Decide navigation for `path` given the current session state
pub fn route_decision(state: &SessionState, path: &str) -> RouteDecision {
    if state.is_loading {
        return RouteDecision::Allow;
    }

    if state.is_authenticated && (path == LOGIN_PATH || path == REGISTER_PATH) {
        return RouteDecision::Redirect(DASHBOARD_PATH);
    }

    if !state.is_authenticated {
        return if is_protected_path(path) {
            RouteDecision::Redirect(LOGIN_PATH)
        } else {
            RouteDecision::Allow
        };
    }

    match state.user {
        Some(ref user) if !has_access(&user.role, path) => RouteDecision::Redirect(DASHBOARD_PATH),
        _ => RouteDecision::Allow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::UserProfile;

    fn signed_in(role: &str) -> SessionState {
        SessionState::signed_in(UserProfile {
            id: "1".to_string(),
            email: "a@b.com".to_string(),
            full_name: "A".to_string(),
            phone: None,
            role: role.to_string(),
            status: None,
        })
    }

    #[test]
    fn test_protected_paths() {
        assert!(is_protected_path("/dashboard"));
        assert!(is_protected_path("/dashboard/tickets"));
        assert!(is_protected_path("/events/create"));
        assert!(!is_protected_path("/events"));
        assert!(!is_protected_path("/"));
    }

    #[test]
    fn test_has_access_by_role() {
        assert!(has_access("ROLE_ORGANIZER", "/events/create"));
        assert!(has_access("ORGANIZER", "/events/create"));
        assert!(!has_access("ROLE_CUSTOMER", "/events/create"));
        assert!(has_access("ROLE_CUSTOMER", "/dashboard"));
        assert!(has_access("", "/events"));
    }

    #[test]
    fn test_guest_redirected_from_protected() {
        let state = SessionState::signed_out();
        assert_eq!(route_decision(&state, "/dashboard"), RouteDecision::Redirect("/login"));
        assert_eq!(route_decision(&state, "/events"), RouteDecision::Allow);
        assert_eq!(route_decision(&state, "/login"), RouteDecision::Allow);
    }

    #[test]
    fn test_expired_session_redirected_to_login() {
        assert_eq!(
            route_decision(&SessionState::expired(), "/events/create"),
            RouteDecision::Redirect("/login")
        );
    }

    #[test]
    fn test_signed_in_leaves_auth_pages() {
        let state = signed_in("ROLE_CUSTOMER");
        assert_eq!(route_decision(&state, "/login"), RouteDecision::Redirect("/dashboard"));
        assert_eq!(route_decision(&state, "/register"), RouteDecision::Redirect("/dashboard"));
    }

    #[test]
    fn test_customer_cannot_create_events() {
        assert_eq!(
            route_decision(&signed_in("ROLE_CUSTOMER"), "/events/create"),
            RouteDecision::Redirect("/dashboard")
        );
        assert_eq!(
            route_decision(&signed_in("ROLE_ORGANIZER"), "/events/create"),
            RouteDecision::Allow
        );
    }

    #[test]
    fn test_loading_defers_decision() {
        assert_eq!(
            route_decision(&SessionState::loading(), "/dashboard"),
            RouteDecision::Allow
        );
    }
}

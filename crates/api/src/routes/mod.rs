//! Router assembly.

pub mod admin;
pub mod auth;
pub mod steps;
pub mod workflows;

use axum::middleware;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;

use crate::auth::{require_admin, require_auth};
use crate::state::AppState;
use crate::websocket;

/// Build the full application router.
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    let public = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/request-password-reset", post(auth::request_password_reset))
        .route("/auth/hard-reset-password", post(auth::hard_reset_password))
        .route("/auth/check-first-user", get(auth::check_first_user))
        .route("/auth/check-availability", get(auth::check_availability))
        .route("/ws/token-monitor", get(websocket::token_monitor_handler))
        .route("/ws/status", get(websocket::status_handler));

    let protected = Router::new()
        .route("/auth/refresh-token", post(auth::refresh_token))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/logout-all-devices", post(auth::logout_all_devices))
        .route("/auth/verify-token", get(auth::verify_token))
        .route("/auth/me", get(auth::me))
        .route("/auth/change-password", post(auth::change_password))
        .route("/auth/edit-username", put(auth::edit_username))
        .route("/auth/delete-account", delete(auth::delete_account))
        .route("/workflow/create", post(workflows::create_workflow))
        .route("/workflow/list", get(workflows::list_workflows))
        .route(
            "/workflow/:workflow_id",
            get(workflows::get_workflow)
                .put(workflows::update_workflow)
                .delete(workflows::delete_workflow),
        )
        .route(
            "/workflow/:workflow_id/steps",
            post(steps::append_step).get(steps::list_steps),
        )
        .route("/workflow/:workflow_id/steps/reorder", put(steps::reorder_steps))
        .route("/workflow/:workflow_id/steps/id/:step_id", put(steps::update_step_by_id))
        .route(
            "/workflow/:workflow_id/steps/:order",
            put(steps::update_step_by_order).delete(steps::delete_step_by_order),
        )
        .route(
            "/workflow/:workflow_id/share/groups/:group_id",
            post(workflows::share_workflow).delete(workflows::unshare_workflow),
        )
        .route("/workflow/:workflow_id/permissions", get(workflows::workflow_permissions))
        .route("/workflow/:workflow_id/execute", post(workflows::execute_workflow))
        .layer(middleware::from_fn_with_state(
            auth_state.clone(),
            require_auth,
        ));

    let admin_routes = Router::new()
        .route(
            "/admin/role-permissions",
            get(admin::get_all_role_permissions)
                .post(admin::add_role_permission)
                .delete(admin::remove_role_permission),
        )
        .route("/admin/role-permissions/reset/:role", post(admin::reset_role_permissions))
        .route("/admin/role-permissions/:role", get(admin::get_role_permissions))
        .route("/admin/users", get(admin::list_users).post(admin::create_user))
        .route("/admin/users/stats", get(admin::user_stats))
        .route("/admin/users/permissions/all", get(admin::all_user_roles))
        .route(
            "/admin/users/:user_id",
            get(admin::get_user).delete(admin::delete_user),
        )
        .route(
            "/admin/users/:user_id/permissions",
            get(admin::get_user_role).put(admin::update_user_permissions),
        )
        .route("/admin/users/:user_id/active-status", patch(admin::update_active_status))
        .route("/admin/users/:user_id/elevate-admin", post(admin::elevate_admin))
        .route("/admin/users/:user_id/revoke-admin", post(admin::revoke_admin))
        .route(
            "/admin/users/:user_id/promote-permanent-admin",
            post(admin::promote_permanent_admin),
        )
        .route("/admin/users/:user_id/groups", get(admin::user_groups))
        .route(
            "/admin/users/:user_id/groups/:group_id",
            post(admin::assign_user_to_group).delete(admin::remove_user_from_group),
        )
        .route("/admin/groups", post(admin::create_group).get(admin::list_groups))
        .route(
            "/admin/groups/:group_id",
            get(admin::get_group)
                .put(admin::update_group)
                .delete(admin::delete_group),
        )
        .route("/admin/groups/:group_id/users", get(admin::group_users))
        .route("/admin/workflows", get(admin::list_all_workflows))
        .layer(middleware::from_fn_with_state(
            auth_state.clone(),
            require_admin,
        ))
        .layer(middleware::from_fn_with_state(auth_state, require_auth));

    Router::new()
        .merge(public)
        .merge(protected)
        .merge(admin_routes)
        .with_state(state)
}

//! Edge case tests for the authentication and authorization system.
//!
//! Covers boundary conditions in:
//! - Expiry parsing across storage encodings
//! - JWT lifetimes around the refresh threshold
//! - Share/role permission resolution
//! - Step order invariants under mixed mutations

#[cfg(test)]
mod expiry_boundary_tests {
    use crate::auth::expiry::{format_expires_at, parse_expires_at};
    use time::OffsetDateTime;

    // =========================================================================
    // A session written as epoch seconds right at "now" parses as expired
    // a second later and as live a second earlier.
    // =========================================================================
    #[test]
    fn epoch_second_rows_compare_cleanly_against_now() {
        let now = OffsetDateTime::now_utc();
        let past = (now.unix_timestamp() - 1).to_string();
        let future = (now.unix_timestamp() + 60).to_string();

        assert!(parse_expires_at(&past).unwrap() < now);
        assert!(parse_expires_at(&future).unwrap() > now);
    }

    // =========================================================================
    // The millisecond threshold: 10^12 itself is still seconds, which
    // lands outside the representable calendar range — the row is
    // unparsable, never silently reinterpreted as milliseconds.
    // =========================================================================
    #[test]
    fn threshold_value_is_seconds_and_out_of_range() {
        assert!(parse_expires_at("1000000000000").is_err());
    }

    #[test]
    fn just_above_threshold_is_milliseconds() {
        let parsed = parse_expires_at("1000000000001").unwrap();
        assert_eq!(parsed.year(), 2001);
    }

    // =========================================================================
    // Mixed-encoding rows written by different deployments all agree.
    // =========================================================================
    #[test]
    fn all_encodings_of_one_instant_agree() {
        let instant = time::macros::datetime!(2026-03-01 12:00:00 UTC);
        let encodings = [
            format_expires_at(instant),
            "2026-03-01 12:00:00".to_string(),
            "2026-03-01T12:00:00Z".to_string(),
            instant.unix_timestamp().to_string(),
            (instant.unix_timestamp() * 1000).to_string(),
        ];
        // The last value is above the millisecond threshold and decodes
        // through the millis path; every encoding lands on one instant.
        for encoding in &encodings {
            assert_eq!(
                parse_expires_at(encoding).unwrap().unix_timestamp(),
                instant.unix_timestamp(),
                "encoding {encoding:?} disagrees"
            );
        }
    }
}

#[cfg(test)]
mod token_boundary_tests {
    use crate::auth::jwt::JwtManager;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn manager() -> JwtManager {
        JwtManager::new("edge-case-test-secret-key-material")
    }

    // =========================================================================
    // A token with 31 seconds of life is still valid for requests; the
    // 30-second refresh hint is advisory and computed from the session
    // row, not the JWT.
    // =========================================================================
    #[test]
    fn token_near_refresh_threshold_still_validates() {
        let (token, _) = manager()
            .generate_access_token(
                Uuid::new_v4(),
                "viewer",
                HashMap::new(),
                false,
                time::Duration::seconds(31),
            )
            .expect("generate");
        assert!(manager().decode_access(&token).is_ok());
    }

    // =========================================================================
    // Refresh tokens must carry the `type` discriminator; a forged claim
    // set without it fails refresh decoding.
    // =========================================================================
    #[test]
    fn access_claims_never_pass_refresh_decoding() {
        let (token, _) = manager()
            .generate_access_token(
                Uuid::new_v4(),
                "admin",
                HashMap::new(),
                true,
                time::Duration::minutes(5),
            )
            .expect("generate");
        assert!(manager().decode_refresh(&token).is_err());
    }

    // =========================================================================
    // Refresh token accepted as refresh, rejected as access.
    // =========================================================================
    #[test]
    fn refresh_claims_never_pass_access_decoding() {
        let (token, _) = manager()
            .generate_refresh_token(Uuid::new_v4(), time::Duration::days(7))
            .expect("generate");
        assert!(manager().decode_access(&token).is_err());
        assert!(manager().decode_refresh(&token).is_ok());
    }
}

#[cfg(test)]
mod authorization_boundary_tests {
    use crate::authz::*;

    // =========================================================================
    // The literal share scenario: a viewer reached by a read share can
    // read and execute but not write; the owner keeps full control.
    // =========================================================================
    #[test]
    fn read_share_execute_but_not_write_matrix() {
        let shared_read = WorkflowAccess::Shared(SharePermission::Read);

        // Viewer through read share: read yes, execute yes, write no.
        assert!(allow_workflow_action(Role::Viewer, false, shared_read, Permission::Read));
        assert!(allow_workflow_action(Role::Viewer, false, shared_read, Permission::Execute));
        assert!(!allow_workflow_action(Role::Viewer, false, shared_read, Permission::Write));

        // The admin owner is unaffected by shares.
        assert!(allow_workflow_action(Role::Admin, false, WorkflowAccess::Owner, Permission::Write));
    }

    // =========================================================================
    // Share ranking: write beats execute beats read when a user reaches
    // a workflow through several groups.
    // =========================================================================
    #[test]
    fn multiple_group_shares_take_the_strongest() {
        assert_eq!(
            best_share(&[SharePermission::Read, SharePermission::Execute]),
            Some(SharePermission::Execute)
        );
        assert_eq!(
            best_share(&[SharePermission::Execute, SharePermission::Write]),
            Some(SharePermission::Write)
        );
    }

    // =========================================================================
    // An execute share does not grant more than a read share in effect.
    // =========================================================================
    #[test]
    fn execute_share_equals_read_share_in_effect() {
        assert_eq!(
            SharePermission::Read.granted(),
            SharePermission::Execute.granted()
        );
    }

    // =========================================================================
    // The default table's admin block is exactly the reconciler target.
    // =========================================================================
    #[test]
    fn admin_block_is_sixteen_rows() {
        let admin_rows = default_role_permissions()
            .into_iter()
            .filter(|(role, _, _)| *role == "admin")
            .count();
        assert_eq!(admin_rows, PERMISSIONS.len() * RESOURCE_TYPES.len());
        assert_eq!(admin_rows, 16);
    }
}

#[cfg(test)]
mod step_order_boundary_tests {
    use crate::workflows::model::StepInput;
    use crate::workflows::steps::*;
    use std::collections::HashMap;

    fn step(name: &str, order: u32) -> crate::workflows::model::Step {
        StepInput {
            name: name.to_string(),
            description: None,
            order: Some(order),
            script_type: "python".to_string(),
            script_filename: None,
            run_command: None,
            dependencies: Vec::new(),
            parameters: HashMap::new(),
            is_active: true,
        }
        .into_step(order)
    }

    // =========================================================================
    // Append N steps, delete them in arbitrary orders, and the sequence
    // is contiguous 1..k at every point.
    // =========================================================================
    #[test]
    fn append_then_delete_any_order_keeps_contiguity() {
        let mut steps: Vec<_> = Vec::new();
        for i in 0..6 {
            let order = next_order(&steps);
            steps.push(step(&format!("s{i}"), order));
            validate_orders(&steps).expect("append keeps orders valid");
        }

        // Delete from the middle, the front, and the back.
        for order_to_delete in [3, 1, 4] {
            let index = steps
                .iter()
                .position(|s| s.order == order_to_delete)
                .expect("step exists");
            steps.remove(index);
            compact_orders(&mut steps);
            let orders: Vec<u32> = steps.iter().map(|s| s.order).collect();
            let expected: Vec<u32> = (1..=steps.len() as u32).collect();
            assert_eq!(orders, expected);
        }
    }

    // =========================================================================
    // A reorder is rejected outright when the sequence is not a
    // permutation — the step list is left untouched.
    // =========================================================================
    #[test]
    fn failed_reorder_leaves_steps_intact() {
        let mut steps = vec![step("a", 1), step("b", 2), step("c", 3)];
        let before: Vec<(String, u32)> =
            steps.iter().map(|s| (s.name.clone(), s.order)).collect();

        assert!(apply_reorder(&mut steps, &[2, 2, 1]).is_err());

        let after: Vec<(String, u32)> =
            steps.iter().map(|s| (s.name.clone(), s.order)).collect();
        assert_eq!(before, after);
    }
}

//! Step-order bookkeeping.
//!
//! Invariants maintained by these operations:
//! - orders are positive and unique within a workflow (checked by
//!   [`validate_orders`] after every mutation, before persistence),
//! - append auto-assigns `max + 1`,
//! - bulk reorder and delete renumber to a contiguous `1..N` sequence.

use crate::error::{ApiError, ApiResult};
use crate::workflows::model::{Step, StepInput};

/// Next order for an appended step.
pub fn next_order(steps: &[Step]) -> u32 {
    steps.iter().map(|s| s.order).max().unwrap_or(0) + 1
}

/// Validate the order set: every order positive, no duplicates. Run
/// after every mutation; failure aborts persistence.
pub fn validate_orders(steps: &[Step]) -> ApiResult<()> {
    let mut seen = std::collections::HashSet::new();
    for step in steps {
        if step.order == 0 {
            return Err(ApiError::Validation(format!(
                "Step '{}' has a non-positive order",
                step.name
            )));
        }
        if !seen.insert(step.order) {
            return Err(ApiError::Validation(format!(
                "Duplicate step order {}",
                step.order
            )));
        }
    }
    Ok(())
}

/// Check an explicit order against the existing steps.
pub fn ensure_order_free(steps: &[Step], order: u32, ignore_step_id: Option<&str>) -> ApiResult<()> {
    if order == 0 {
        return Err(ApiError::Validation(
            "Step order must be a positive integer".to_string(),
        ));
    }
    let collides = steps
        .iter()
        .any(|s| s.order == order && Some(s.id.as_str()) != ignore_step_id);
    if collides {
        return Err(ApiError::Validation(format!(
            "Step order {order} is already in use"
        )));
    }
    Ok(())
}

/// Renumber steps to a contiguous 1..N sequence preserving their current
/// relative order. Used after a deletion.
pub fn compact_orders(steps: &mut [Step]) {
    steps.sort_by_key(|s| s.order);
    for (index, step) in steps.iter_mut().enumerate() {
        step.order = index as u32 + 1;
    }
}

/// Reconcile a wholesale steps replacement against the existing list.
///
/// Step ids are server-generated and immutable, so a replacement must
/// not re-mint them: an input landing on an existing step's order keeps
/// that step's id, directory, and execution metadata, and only the
/// caller-editable fields are overwritten. Inputs on orders with no
/// existing step become new steps with fresh ids. An omitted order means
/// the input's position in the list.
pub fn merge_step_inputs(current: &[Step], inputs: Vec<StepInput>) -> ApiResult<Vec<Step>> {
    let mut merged = Vec::with_capacity(inputs.len());
    for (index, input) in inputs.into_iter().enumerate() {
        let order = input.order.unwrap_or(index as u32 + 1);
        match current.iter().find(|s| s.order == order) {
            Some(existing) => merged.push(Step {
                id: existing.id.clone(),
                directory_name: existing.directory_name.clone(),
                name: input.name,
                description: input.description,
                order,
                script_type: input.script_type,
                script_filename: input.script_filename,
                run_command: input.run_command,
                dependencies: input.dependencies,
                parameters: input.parameters,
                is_active: input.is_active,
                last_status: existing.last_status.clone(),
                last_return_code: existing.last_return_code,
                last_output: existing.last_output.clone(),
                last_error: existing.last_error.clone(),
                last_run_started_at: existing.last_run_started_at.clone(),
                last_run_ended_at: existing.last_run_ended_at.clone(),
                last_execution_time: existing.last_execution_time,
            }),
            None => merged.push(input.into_step(order)),
        }
    }
    validate_orders(&merged)?;
    Ok(merged)
}

/// Apply a bulk reorder. `sequence` is the current orders listed in
/// their new positions; it must be a permutation of the existing orders.
/// Steps are renumbered 1..N in the given sequence, ids untouched.
pub fn apply_reorder(steps: &mut Vec<Step>, sequence: &[u32]) -> ApiResult<()> {
    let mut current: Vec<u32> = steps.iter().map(|s| s.order).collect();
    let mut requested: Vec<u32> = sequence.to_vec();
    current.sort_unstable();
    requested.sort_unstable();
    if current != requested {
        return Err(ApiError::Validation(
            "Reorder sequence must be a permutation of the current step orders".to_string(),
        ));
    }

    let mut reordered = Vec::with_capacity(steps.len());
    for (position, old_order) in sequence.iter().enumerate() {
        let step_index = steps
            .iter()
            .position(|s| s.order == *old_order)
            .ok_or_else(|| ApiError::Validation("Reorder sequence mismatch".to_string()))?;
        let mut step = steps.remove(step_index);
        step.order = position as u32 + 1;
        reordered.push(step);
    }
    *steps = reordered;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::model::StepInput;
    use std::collections::HashMap;

    fn input(name: &str, order: Option<u32>) -> StepInput {
        StepInput {
            name: name.to_string(),
            description: None,
            order,
            script_type: "python".to_string(),
            script_filename: None,
            run_command: None,
            dependencies: Vec::new(),
            parameters: HashMap::new(),
            is_active: true,
        }
    }

    fn step(name: &str, order: u32) -> Step {
        input(name, Some(order)).into_step(order)
    }

    #[test]
    fn next_order_starts_at_one() {
        assert_eq!(next_order(&[]), 1);
    }

    #[test]
    fn next_order_appends_after_max() {
        let steps = vec![step("a", 1), step("b", 2), step("c", 3)];
        assert_eq!(next_order(&steps), 4);
    }

    #[test]
    fn validate_rejects_duplicates() {
        let steps = vec![step("a", 1), step("b", 1)];
        assert!(validate_orders(&steps).is_err());
    }

    #[test]
    fn validate_rejects_zero() {
        let steps = vec![step("a", 0)];
        assert!(validate_orders(&steps).is_err());
    }

    #[test]
    fn validate_accepts_unique_positive_orders() {
        let steps = vec![step("a", 1), step("b", 2), step("c", 3)];
        assert!(validate_orders(&steps).is_ok());
    }

    #[test]
    fn order_free_check_ignores_the_step_being_moved() {
        let steps = vec![step("a", 1), step("b", 2)];
        let own_id = steps[0].id.clone();
        assert!(ensure_order_free(&steps, 1, Some(&own_id)).is_ok());
        assert!(ensure_order_free(&steps, 2, Some(&own_id)).is_err());
        assert!(ensure_order_free(&steps, 3, None).is_ok());
    }

    #[test]
    fn deletion_compacts_to_contiguous_sequence() {
        let mut steps = vec![step("a", 1), step("c", 3), step("d", 4)];
        compact_orders(&mut steps);
        let orders: Vec<u32> = steps.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        // Relative order preserved.
        let names: Vec<&str> = steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c", "d"]);
    }

    #[test]
    fn deleting_in_any_order_leaves_contiguous_sequence() {
        // Create five steps, delete three in arbitrary order, and the
        // remainder must always be 1..k.
        let mut steps: Vec<Step> = (1..=5).map(|i| step(&format!("s{i}"), i)).collect();
        for victim in ["s4", "s1", "s5"] {
            steps.retain(|s| s.name != victim);
            compact_orders(&mut steps);
            let orders: Vec<u32> = steps.iter().map(|s| s.order).collect();
            let expected: Vec<u32> = (1..=steps.len() as u32).collect();
            assert_eq!(orders, expected);
            validate_orders(&steps).expect("orders valid after delete");
        }
    }

    #[test]
    fn reorder_renumbers_in_given_sequence() {
        let mut steps = vec![step("a", 1), step("b", 2), step("c", 3), step("d", 4)];
        let ids: Vec<String> = steps.iter().map(|s| s.id.clone()).collect();

        apply_reorder(&mut steps, &[3, 1, 4, 2]).expect("reorder");

        let names: Vec<&str> = steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "d", "b"]);
        let orders: Vec<u32> = steps.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![1, 2, 3, 4]);
        // Ids unchanged by reordering.
        let mut ids_after: Vec<String> = steps.iter().map(|s| s.id.clone()).collect();
        ids_after.sort();
        let mut ids_before = ids;
        ids_before.sort();
        assert_eq!(ids_after, ids_before);
    }

    #[test]
    fn replaying_current_steps_keeps_every_id() {
        // A workflow update that sends the current steps back (e.g. to
        // change only the workflow name) must not re-mint step ids.
        let current = vec![step("a", 1), step("b", 2), step("c", 3)];
        let ids_before: Vec<String> = current.iter().map(|s| s.id.clone()).collect();

        let inputs: Vec<StepInput> = current
            .iter()
            .map(|s| input(&s.name, Some(s.order)))
            .collect();
        let merged = merge_step_inputs(&current, inputs).expect("merge");

        let ids_after: Vec<String> = merged.iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids_after, ids_before);
    }

    #[test]
    fn merge_preserves_execution_metadata_and_updates_fields() {
        let mut current = vec![step("a", 1)];
        current[0].last_status = Some("completed".to_string());
        current[0].last_return_code = Some(0);
        current[0].last_output = Some("ok".to_string());
        let directory = current[0].directory_name.clone();

        let merged =
            merge_step_inputs(&current, vec![input("renamed", Some(1))]).expect("merge");

        assert_eq!(merged[0].id, current[0].id);
        assert_eq!(merged[0].directory_name, directory);
        assert_eq!(merged[0].name, "renamed");
        assert_eq!(merged[0].last_status.as_deref(), Some("completed"));
        assert_eq!(merged[0].last_return_code, Some(0));
        assert_eq!(merged[0].last_output.as_deref(), Some("ok"));
    }

    #[test]
    fn merge_mints_ids_only_for_new_orders() {
        let current = vec![step("a", 1), step("b", 2)];
        let existing_ids: Vec<String> = current.iter().map(|s| s.id.clone()).collect();

        let merged = merge_step_inputs(
            &current,
            vec![
                input("a", Some(1)),
                input("b", Some(2)),
                input("brand-new", Some(3)),
            ],
        )
        .expect("merge");

        assert_eq!(merged[0].id, existing_ids[0]);
        assert_eq!(merged[1].id, existing_ids[1]);
        assert!(!existing_ids.contains(&merged[2].id));
        assert_eq!(merged[2].order, 3);
    }

    #[test]
    fn merge_with_omitted_orders_matches_by_position() {
        let current = vec![step("a", 1), step("b", 2)];
        let ids_before: Vec<String> = current.iter().map(|s| s.id.clone()).collect();

        let merged =
            merge_step_inputs(&current, vec![input("a", None), input("b", None)]).expect("merge");

        let ids_after: Vec<String> = merged.iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids_after, ids_before);
    }

    #[test]
    fn merge_rejects_colliding_orders() {
        let current = vec![step("a", 1), step("b", 2)];
        let result = merge_step_inputs(&current, vec![input("x", Some(1)), input("y", Some(1))]);
        assert!(result.is_err());
    }

    #[test]
    fn reorder_rejects_non_permutations() {
        let mut steps = vec![step("a", 1), step("b", 2)];
        assert!(apply_reorder(&mut steps, &[1, 1]).is_err());
        assert!(apply_reorder(&mut steps, &[1]).is_err());
        assert!(apply_reorder(&mut steps, &[1, 3]).is_err());
    }
}

//! Container image resolution for script types.

use sqlx::PgPool;

/// Built-in image used when no mapping row exists for a script type.
pub fn default_image(script_type: &str) -> &'static str {
    match script_type {
        "python" => "python:3.11-slim",
        "nodejs" => "node:18-alpine",
        _ => "alpine:latest",
    }
}

/// Resolve the container image for a script type: the active row in
/// `container_images` wins, otherwise the built-in default. Lookup errors
/// fall back to the default rather than failing the step.
pub async fn resolve_image(pool: &PgPool, script_type: &str) -> String {
    let mapped: Result<Option<String>, sqlx::Error> = sqlx::query_scalar(
        "SELECT image FROM container_images WHERE script_type = $1 AND is_active = TRUE",
    )
    .bind(script_type)
    .fetch_optional(pool)
    .await;

    match mapped {
        Ok(Some(image)) => image,
        Ok(None) => default_image(script_type).to_string(),
        Err(e) => {
            tracing::warn!(
                script_type = %script_type,
                error = %e,
                "Failed to look up container image mapping, using default"
            );
            default_image(script_type).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_script_types_have_specific_images() {
        assert_eq!(default_image("python"), "python:3.11-slim");
        assert_eq!(default_image("nodejs"), "node:18-alpine");
    }

    #[test]
    fn unknown_script_types_fall_back_to_alpine() {
        assert_eq!(default_image("sh"), "alpine:latest");
        assert_eq!(default_image("anything-else"), "alpine:latest");
    }
}

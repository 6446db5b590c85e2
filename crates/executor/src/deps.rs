//! Pre-run dependency installation.
//!
//! Dependencies install in a separate container with tighter limits than
//! execution (256 MiB, 25% CPU, still no network). Failures never block
//! the step itself.

use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, RemoveContainerOptions,
    WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::Docker;
use futures::StreamExt;
use thiserror::Error;
use uuid::Uuid;

use crate::container::ContainerLimits;
use crate::images::default_image;
use crate::types::EXEC_TIMEOUT;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("dependency installation exited with code {0}")]
    NonZeroExit(i64),
    #[error("dependency installation timed out")]
    Timeout,
    #[error("docker error: {0}")]
    Docker(#[from] DockerError),
}

/// Shell command that installs the given dependencies for a script type.
fn install_command(script_type: &str, dependencies: &[String]) -> String {
    let list = dependencies.join(" ");
    match script_type {
        "python" => format!("pip install {list}"),
        "nodejs" => format!("npm install {list}"),
        _ => format!("apk update && apk add --no-cache {list}"),
    }
}

/// Run the install container to completion (or kill it on timeout).
pub async fn install_dependencies(
    docker: &Docker,
    script_type: &str,
    dependencies: &[String],
) -> Result<(), InstallError> {
    let name = format!("opsflow-install-{}", Uuid::new_v4());
    let command = install_command(script_type, dependencies);

    tracing::info!(
        script_type = %script_type,
        count = dependencies.len(),
        "Installing step dependencies"
    );

    let config = Config {
        image: Some(default_image(script_type).to_string()),
        cmd: Some(vec!["/bin/sh".to_string(), "-c".to_string(), command]),
        host_config: Some(install_host_config()),
        ..Default::default()
    };

    docker
        .create_container(
            Some(CreateContainerOptions {
                name: name.clone(),
                platform: None,
            }),
            config,
        )
        .await?;

    if let Err(e) = docker.start_container::<String>(&name, None).await {
        remove(docker, &name).await;
        return Err(e.into());
    }

    let mut wait_stream = docker.wait_container(&name, None::<WaitContainerOptions<String>>);
    let outcome = match tokio::time::timeout(EXEC_TIMEOUT, wait_stream.next()).await {
        Ok(Some(Ok(response))) if response.status_code == 0 => Ok(()),
        Ok(Some(Ok(response))) => Err(InstallError::NonZeroExit(response.status_code)),
        Ok(Some(Err(DockerError::DockerContainerWaitError { code, .. }))) => {
            Err(InstallError::NonZeroExit(code))
        }
        Ok(Some(Err(e))) => Err(e.into()),
        Ok(None) => Err(InstallError::NonZeroExit(1)),
        Err(_) => {
            if let Err(e) = docker
                .kill_container(&name, None::<KillContainerOptions<String>>)
                .await
            {
                tracing::error!(container = %name, error = %e, "Failed to kill timed-out install container");
            }
            Err(InstallError::Timeout)
        }
    };

    remove(docker, &name).await;
    outcome
}

fn install_host_config() -> bollard::models::HostConfig {
    ContainerLimits::install().to_host_config(None)
}

async fn remove(docker: &Docker, name: &str) {
    let removed = docker
        .remove_container(
            name,
            Some(RemoveContainerOptions {
                force: true,
                ..Default::default()
            }),
        )
        .await;
    if let Err(e) = removed {
        tracing::warn!(container = %name, error = %e, "Failed to remove install container");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_uses_pip() {
        let cmd = install_command("python", &["requests".to_string(), "boto3".to_string()]);
        assert_eq!(cmd, "pip install requests boto3");
    }

    #[test]
    fn nodejs_uses_npm() {
        let cmd = install_command("nodejs", &["axios".to_string()]);
        assert_eq!(cmd, "npm install axios");
    }

    #[test]
    fn other_types_use_apk() {
        let cmd = install_command("sh", &["curl".to_string()]);
        assert_eq!(cmd, "apk update && apk add --no-cache curl");
    }
}

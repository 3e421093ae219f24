use bollard::Docker;
use std::path::Path;
use tracing::debug;

const DOCKER_SOCKET_PATH: &str = "/var/run/docker.sock";

/// Check whether the Docker daemon answers on the local socket
pub async fn check_engine_reachable() -> bool {
    if !Path::new(DOCKER_SOCKET_PATH).exists() {
        debug!("Docker socket not found at {}", DOCKER_SOCKET_PATH);
        return false;
    }

    let docker = match Docker::connect_with_local_defaults() {
        Ok(d) => d,
        Err(e) => {
            debug!("Failed to connect to Docker: {}", e);
            return false;
        }
    };

    match docker.version().await {
        Ok(v) => {
            debug!(
                "Docker engine {} (API {})",
                v.version.unwrap_or_else(|| "unknown".to_string()),
                v.api_version.unwrap_or_else(|| "0.0".to_string())
            );
            true
        }
        Err(e) => {
            debug!("Failed to get Docker version: {}", e);
            false
        }
    }
}

/// Endpoint used when talking to the local engine
pub fn engine_endpoint() -> String {
    format!("unix://{}", DOCKER_SOCKET_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_check_engine_reachable_does_not_panic() {
        // Result depends on whether Docker is running
        let _ = check_engine_reachable().await;
    }

    #[test]
    fn test_engine_endpoint() {
        let endpoint = engine_endpoint();
        assert!(endpoint.starts_with("unix://"));
        assert!(endpoint.contains("docker.sock"));
    }
}

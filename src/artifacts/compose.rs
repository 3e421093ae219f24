use crate::descriptor::DeploymentDescriptor;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;

const HEADER: &str = "# Managed by hostrig; local edits are overwritten\n";

#[derive(Debug, Serialize)]
struct ComposeFile {
    services: BTreeMap<String, ComposeService>,
}

#[derive(Debug, Serialize)]
struct ComposeService {
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    build: Option<String>,
    container_name: String,
    restart: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    ports: Vec<String>,
    environment: BTreeMap<String, String>,
    volumes: Vec<String>,
    healthcheck: Healthcheck,
}

#[derive(Debug, Serialize)]
struct Healthcheck {
    test: Vec<String>,
    interval: String,
    timeout: String,
    retries: u32,
    start_period: String,
}

/// Compose file with a single service published on the bind port
pub fn render_compose(descriptor: &DeploymentDescriptor) -> Result<String> {
    let health_url = format!(
        "http://localhost:{}{}",
        descriptor.bind_port, descriptor.health_path
    );

    let service = ComposeService {
        image: descriptor.image.clone(),
        build: descriptor.image.is_none().then(|| ".".to_string()),
        container_name: descriptor.name.clone(),
        restart: "always".to_string(),
        user: descriptor.user.clone(),
        ports: vec![format!("{}:{}", descriptor.bind_port, descriptor.bind_port)],
        environment: descriptor.service_environment(),
        volumes: vec!["./logs:/app/logs".to_string(), "./data:/app/data".to_string()],
        healthcheck: Healthcheck {
            test: vec![
                "CMD".to_string(),
                "curl".to_string(),
                "-f".to_string(),
                health_url,
            ],
            interval: "30s".to_string(),
            timeout: "10s".to_string(),
            retries: 3,
            start_period: "10s".to_string(),
        },
    };

    let mut services = BTreeMap::new();
    services.insert(descriptor.name.clone(), service);

    let body = serde_yaml::to_string(&ComposeFile { services })
        .context("Failed to serialize compose file")?;
    Ok(format!("{}{}", HEADER, body))
}

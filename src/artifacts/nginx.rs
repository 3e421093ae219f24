use crate::descriptor::DeploymentDescriptor;
use std::fmt;

const FORWARDED_HEADERS: &[(&str, &str)] = &[
    ("Host", "$host"),
    ("X-Real-IP", "$remote_addr"),
    ("X-Forwarded-For", "$proxy_add_x_forwarded_for"),
    ("X-Forwarded-Proto", "$scheme"),
];

/// Virtual host mapping every public name to the loopback-bound application
pub fn render_proxy_route(descriptor: &DeploymentDescriptor) -> String {
    ProxyRoute(descriptor).to_string()
}

struct ProxyRoute<'a>(&'a DeploymentDescriptor);

impl fmt::Display for ProxyRoute<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let descriptor = self.0;
        let upstream = format!("http://127.0.0.1:{}", descriptor.bind_port);

        writeln!(f, "# Managed by hostrig; local edits are overwritten")?;
        writeln!(f, "server {{")?;
        writeln!(f, "    listen {};", descriptor.public_port)?;
        writeln!(f, "    listen [::]:{};", descriptor.public_port)?;
        writeln!(f, "    server_name {};", descriptor.public_host_names.join(" "))?;
        writeln!(f)?;

        writeln!(f, "    location = {} {{", descriptor.health_path)?;
        writeln!(f, "        access_log off;")?;
        writeln!(f, "        auth_basic off;")?;
        writeln!(f, "        proxy_pass {}{};", upstream, descriptor.health_path)?;
        writeln!(f, "        proxy_set_header Host $host;")?;
        writeln!(f, "    }}")?;
        writeln!(f)?;

        writeln!(f, "    location / {{")?;
        writeln!(f, "        proxy_pass {};", upstream)?;
        writeln!(f, "        proxy_http_version 1.1;")?;
        for (header, value) in FORWARDED_HEADERS {
            writeln!(f, "        proxy_set_header {} {};", header, value)?;
        }
        writeln!(f, "        proxy_set_header Upgrade $http_upgrade;")?;
        writeln!(f, "        proxy_set_header Connection \"upgrade\";")?;
        writeln!(f, "    }}")?;
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> DeploymentDescriptor {
        let mut d = DeploymentDescriptor::new(5000, "/srv/webapp");
        d.public_host_names = vec!["example.com".to_string(), "www.example.com".to_string()];
        d
    }

    #[test]
    fn test_route_maps_all_hosts() {
        let conf = render_proxy_route(&descriptor());
        assert!(conf.contains("    listen 80;\n"));
        assert!(conf.contains("    server_name example.com www.example.com;\n"));
        assert!(conf.contains("        proxy_pass http://127.0.0.1:5000;\n"));
    }

    #[test]
    fn test_health_location_is_exact_and_quiet() {
        let conf = render_proxy_route(&descriptor());
        let start = conf.find("location = /health {").unwrap();
        let block = &conf[start..start + conf[start..].find('}').unwrap()];
        assert!(block.contains("access_log off;"));
        assert!(block.contains("auth_basic off;"));
        assert!(block.contains("proxy_pass http://127.0.0.1:5000/health;"));
    }

    #[test]
    fn test_custom_public_port_and_health_path() {
        let mut d = descriptor();
        d.public_port = 8080;
        d.health_path = "/api/status".to_string();
        let conf = render_proxy_route(&d);
        assert!(conf.contains("listen 8080;"));
        assert!(conf.contains("location = /api/status {"));
    }

    #[test]
    fn test_braces_balanced() {
        let conf = render_proxy_route(&descriptor());
        assert_eq!(conf.matches('{').count(), conf.matches('}').count());
    }
}

use crate::descriptor::DeploymentDescriptor;
use std::fmt;

const RESTART_SEC: u32 = 5;

/// Quote a single ExecStart argument the way systemd splits them
fn quote_arg(arg: &str) -> String {
    let escaped = arg.replace('%', "%%");
    if escaped.is_empty() || escaped.contains(|c: char| c.is_whitespace() || c == '"' || c == '\\') {
        format!("\"{}\"", escaped.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        escaped
    }
}

fn environment_line(key: &str, value: &str) -> String {
    let value = value
        .replace('%', "%%")
        .replace('\\', "\\\\")
        .replace('"', "\\\"");
    format!("Environment=\"{}={}\"", key, value)
}

pub fn render_unit(descriptor: &DeploymentDescriptor) -> String {
    UnitFile(descriptor).to_string()
}

struct UnitFile<'a>(&'a DeploymentDescriptor);

impl fmt::Display for UnitFile<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let descriptor = self.0;
        let exec_start = descriptor
            .command
            .iter()
            .map(|arg| quote_arg(arg))
            .collect::<Vec<_>>()
            .join(" ");

        writeln!(f, "# Managed by hostrig; local edits are overwritten")?;
        writeln!(f, "[Unit]")?;
        writeln!(f, "Description={} web service", descriptor.name)?;
        writeln!(f, "After=network-online.target")?;
        writeln!(f, "Wants=network-online.target")?;
        writeln!(f)?;
        writeln!(f, "[Service]")?;
        writeln!(f, "Type=simple")?;
        if let Some(user) = &descriptor.user {
            writeln!(f, "User={}", user)?;
        }
        writeln!(f, "WorkingDirectory={}", descriptor.working_directory.display())?;
        for (key, value) in descriptor.service_environment() {
            writeln!(f, "{}", environment_line(&key, &value))?;
        }
        writeln!(f, "ExecStart={}", exec_start)?;
        writeln!(f, "Restart=always")?;
        writeln!(f, "RestartSec={}", RESTART_SEC)?;
        writeln!(f)?;
        writeln!(f, "[Install]")?;
        writeln!(f, "WantedBy=multi-user.target")
    }
}

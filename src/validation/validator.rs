use crate::descriptor::DeploymentDescriptor;
use crate::topology::Topology;
use crate::validation::rules::{
    CommandRule, EnvironmentRule, HealthPathRule, HostNamesRule, NameRule, PortsRule,
    ValidationRule, WorkingDirectoryRule,
};
use anyhow::Result;

pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<Box<dyn ValidationRule>>) -> Self {
        Self { rules }
    }

    pub fn validate(&self, descriptor: &DeploymentDescriptor, topology: Topology) -> Result<()> {
        for rule in &self.rules {
            if let Err(e) = rule.validate(descriptor, topology) {
                anyhow::bail!("[{}] {}", rule.name(), e);
            }
        }
        Ok(())
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            rules: vec![
                Box::new(NameRule),
                Box::new(PortsRule),
                Box::new(HostNamesRule),
                Box::new(HealthPathRule),
                Box::new(WorkingDirectoryRule),
                Box::new(CommandRule),
                Box::new(EnvironmentRule),
            ],
        }
    }
}

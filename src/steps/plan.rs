use super::ProvisioningStep;
use crate::error::ProvisionError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// A validated step DAG with its execution order
#[derive(Debug, Clone)]
pub struct ProvisioningPlan {
    steps: Vec<ProvisioningStep>,
    order: Vec<usize>,
}

/// Printable view of a planned step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub id: String,
    pub action: String,
    pub description: String,
    pub depends_on: Vec<String>,
}

impl ProvisioningPlan {
    /// Validate ids and dependencies and compute the execution order.
    ///
    /// Rejects duplicate ids, dependencies on unknown ids and cycles.
    pub fn new(steps: Vec<ProvisioningStep>) -> Result<Self, ProvisionError> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, step) in steps.iter().enumerate() {
            if index.insert(step.id.as_str(), i).is_some() {
                return Err(ProvisionError::InvalidPlan(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
        }

        for step in &steps {
            for dep in &step.depends_on {
                if !index.contains_key(dep.as_str()) {
                    return Err(ProvisionError::InvalidPlan(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.id, dep
                    )));
                }
                if dep == &step.id {
                    return Err(ProvisionError::InvalidPlan(format!(
                        "step '{}' depends on itself",
                        step.id
                    )));
                }
            }
        }

        let order = topological_sort(&steps, &index)?;
        Ok(Self { steps, order })
    }

    /// Steps in declaration order
    pub fn steps(&self) -> &[ProvisioningStep] {
        &self.steps
    }

    /// Declaration indices in execution order
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Steps in execution order
    pub fn ordered(&self) -> impl Iterator<Item = &ProvisioningStep> {
        self.order.iter().map(move |&i| &self.steps[i])
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn planned(&self) -> Vec<PlannedStep> {
        self.ordered()
            .map(|step| PlannedStep {
                id: step.id.clone(),
                action: step.action.kind().to_string(),
                description: step.action.to_string(),
                depends_on: step.depends_on.iter().cloned().collect(),
            })
            .collect()
    }
}

/// Kahn's algorithm; among ready steps the earliest declared runs first
fn topological_sort(
    steps: &[ProvisioningStep],
    index: &HashMap<&str, usize>,
) -> Result<Vec<usize>, ProvisionError> {
    let mut in_degree = vec![0usize; steps.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];

    for (i, step) in steps.iter().enumerate() {
        for dep in &step.depends_on {
            let d = index[dep.as_str()];
            in_degree[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &degree)| degree == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(steps.len());
    while let Some(node) = ready.pop_first() {
        order.push(node);
        for &dependent in &dependents[node] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < steps.len() {
        let cyclic: Vec<&str> = (0..steps.len())
            .filter(|i| !order.contains(i))
            .map(|i| steps[i].id.as_str())
            .collect();
        return Err(ProvisionError::InvalidPlan(format!(
            "dependency cycle between steps: {}",
            cyclic.join(", ")
        )));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::StepAction;

    fn step(id: &str, deps: &[&str]) -> ProvisioningStep {
        ProvisioningStep::new(id, StepAction::OpenFirewallPort { port: 80 }).after(deps)
    }

    fn ids(plan: &ProvisioningPlan) -> Vec<&str> {
        plan.ordered().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn test_simple_linear_dependencies() {
        let plan = ProvisioningPlan::new(vec![step("app", &["lib"]), step("lib", &[])]).unwrap();
        assert_eq!(ids(&plan), vec!["lib", "app"]);
    }

    #[test]
    fn test_diamond_dependencies() {
        let plan = ProvisioningPlan::new(vec![
            step("app", &["lib1", "lib2"]),
            step("lib1", &["base"]),
            step("lib2", &["base"]),
            step("base", &[]),
        ])
        .unwrap();
        assert_eq!(ids(&plan), vec!["base", "lib1", "lib2", "app"]);
    }

    #[test]
    fn test_stable_tie_break_by_declaration() {
        let plan = ProvisioningPlan::new(vec![
            step("c", &[]),
            step("a", &[]),
            step("b", &["c"]),
            step("d", &[]),
        ])
        .unwrap();
        assert_eq!(ids(&plan), vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn test_cycle_detection() {
        let err = ProvisioningPlan::new(vec![step("app1", &["app2"]), step("app2", &["app1"])])
            .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidPlan(_)));
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_unknown_dependency() {
        let err = ProvisioningPlan::new(vec![step("a", &["ghost"])]).unwrap_err();
        assert!(err.to_string().contains("unknown step 'ghost'"));
    }

    #[test]
    fn test_duplicate_ids() {
        let err = ProvisioningPlan::new(vec![step("a", &[]), step("a", &[])]).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_self_dependency() {
        let err = ProvisioningPlan::new(vec![step("a", &["a"])]).unwrap_err();
        assert!(err.to_string().contains("itself"));
    }

    #[test]
    fn test_planned_view() {
        let plan = ProvisioningPlan::new(vec![step("a", &[]), step("b", &["a"])]).unwrap();
        let planned = plan.planned();
        assert_eq!(planned[1].id, "b");
        assert_eq!(planned[1].action, "open_firewall_port");
        assert_eq!(planned[1].depends_on, vec!["a".to_string()]);
        assert_eq!(planned[1].description, "open firewall port 80/tcp");
    }
}

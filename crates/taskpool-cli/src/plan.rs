//! Plan files: the agents and tasks a `taskpool run` feeds into the pool.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use taskpool_core::{Priority, TaskId, TaskSpec};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub agents: Vec<PlanAgent>,
    #[serde(default)]
    pub tasks: Vec<PlanTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanAgent {
    pub id: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_load: Option<u32>,
}

/// A task as written in the plan. `key` is a plan-local name other tasks
/// use in `depends_on`; the pool assigns the real id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTask {
    pub key: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub estimated_cost: u64,
    #[serde(default)]
    pub required_skills: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub phase: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl Plan {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading plan {}", path.display()))?;
        let plan: Plan = serde_json::from_str(&raw)
            .with_context(|| format!("parsing plan {}", path.display()))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Keys are unique and every dependency names an earlier task.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut agents = HashSet::new();
        for agent in &self.agents {
            if !agents.insert(agent.id.as_str()) {
                bail!("agent `{}` is listed twice", agent.id);
            }
        }

        let mut seen = HashSet::new();
        for task in &self.tasks {
            for dep in &task.depends_on {
                if !seen.contains(dep.as_str()) {
                    bail!(
                        "task `{}` depends on `{}`, which is not an earlier task in the plan",
                        task.key,
                        dep
                    );
                }
            }
            if !seen.insert(task.key.as_str()) {
                bail!("task key `{}` is used twice", task.key);
            }
        }
        Ok(())
    }

    pub fn sample() -> Self {
        let agent = |id: &str, skills: &[&str], max_load| PlanAgent {
            id: id.to_string(),
            skills: skills.iter().map(|s| s.to_string()).collect(),
            max_load,
        };
        let task = |key: &str, priority, cost, skills: &[&str], deps: &[&str], phase| PlanTask {
            key: key.to_string(),
            description: format!("{key} work"),
            priority,
            estimated_cost: cost,
            required_skills: skills.iter().map(|s| s.to_string()).collect(),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            phase,
            context_hash: None,
            max_retries: None,
        };

        let mut tasks = vec![
            task("schema", Priority::Critical, 1200, &["database"], &[], 1),
            task("api", Priority::High, 2000, &["backend"], &["schema"], 2),
            task("ui", Priority::Medium, 1500, &["frontend"], &["api"], 3),
            task("docs", Priority::Low, 400, &[], &[], 1),
            task("e2e", Priority::High, 900, &["frontend", "backend"], &["ui", "api"], 4),
        ];
        tasks[1].context_hash = Some("ctx-api".to_string());
        tasks[2].context_hash = Some("ctx-api".to_string());

        Plan {
            agents: vec![
                agent("db-1", &["database", "backend"], Some(2)),
                agent("web-1", &["frontend"], Some(1)),
                agent("full-1", &["frontend", "backend"], None),
            ],
            tasks,
        }
    }
}

impl PlanTask {
    /// Build the pool input, resolving `depends_on` keys through `ids`.
    pub fn to_spec(&self, ids: &HashMap<String, TaskId>) -> anyhow::Result<TaskSpec> {
        let deps = self
            .depends_on
            .iter()
            .map(|key| {
                ids.get(key)
                    .copied()
                    .with_context(|| format!("task `{}`: unknown dependency `{key}`", self.key))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut spec = TaskSpec::new(&self.description)
            .priority(self.priority)
            .estimated_cost(self.estimated_cost)
            .requires(self.required_skills.iter().cloned())
            .depends_on(deps)
            .phase(self.phase)
            .meta("plan_key", self.key.clone().into());
        if let Some(hash) = &self.context_hash {
            spec = spec.context_hash(hash.clone());
        }
        if let Some(n) = self.max_retries {
            spec = spec.max_retries(n);
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskpool_core::ports::{IdGenerator, SystemClock, UlidGenerator};

    #[test]
    fn sample_plan_is_valid_and_round_trips_json() {
        let plan = Plan::sample();
        plan.validate().unwrap();

        let json = serde_json::to_string(&plan).unwrap();
        let back: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tasks.len(), plan.tasks.len());
        assert_eq!(back.tasks[0].priority, Priority::Critical);
    }

    #[test]
    fn minimal_plan_uses_defaults() {
        let plan: Plan = serde_json::from_str(
            r#"{ "agents": [{ "id": "a" }], "tasks": [{ "key": "t", "priority": "high" }] }"#,
        )
        .unwrap();
        assert_eq!(plan.agents[0].max_load, None);
        assert_eq!(plan.tasks[0].priority, Priority::High);
        assert!(plan.tasks[0].depends_on.is_empty());
    }

    #[test]
    fn forward_and_duplicate_references_are_rejected() {
        let plan: Plan = serde_json::from_str(
            r#"{ "tasks": [{ "key": "a", "depends_on": ["b"] }, { "key": "b" }] }"#,
        )
        .unwrap();
        let err = plan.validate().unwrap_err().to_string();
        assert!(err.contains("not an earlier task"), "{err}");

        let plan: Plan =
            serde_json::from_str(r#"{ "tasks": [{ "key": "a" }, { "key": "a" }] }"#).unwrap();
        assert!(plan.validate().is_err());
    }

    #[test]
    fn to_spec_resolves_dependency_keys() {
        let plan = Plan::sample();
        let schema_id = UlidGenerator::new(SystemClock).generate_task_id();
        let ids = HashMap::from([("schema".to_string(), schema_id)]);

        let spec = plan.tasks[1].to_spec(&ids).unwrap();
        assert_eq!(spec.dependencies, vec![schema_id]);
        assert_eq!(spec.context_hash.as_deref(), Some("ctx-api"));
        assert_eq!(spec.metadata["plan_key"], "api");

        assert!(plan.tasks[2].to_spec(&ids).is_err());
    }
}

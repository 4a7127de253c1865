//! Agent selection: skill matching and the weighted assignment score.
//!
//! score = w.load    * (1 - load / max_load)
//!       + w.skill   * skill_match_fraction
//!       + w.success * success_rate
//!       + w.cost    * (estimated_cost / agent.average_cost)
//!
//! Skill matching is loose: a required skill is satisfied when it and one of
//! the agent's skills contain each other as a case-insensitive substring, in
//! either direction ("react" satisfies "frontend-react" and the other way
//! round). Agent choice depends on this rule.

use crate::domain::{AgentRecord, TaskRecord};

use super::config::ScoringWeights;

/// Case-insensitive, bidirectional substring match.
pub fn skill_matches(agent_skill: &str, required: &str) -> bool {
    let a = agent_skill.to_lowercase();
    let r = required.to_lowercase();
    a.contains(&r) || r.contains(&a)
}

/// Fraction of `required` satisfied by `agent_skills`. No requirements means
/// a full match.
pub fn skill_match_fraction(agent_skills: &[String], required: &[String]) -> f64 {
    if required.is_empty() {
        return 1.0;
    }
    let matched = required
        .iter()
        .filter(|r| agent_skills.iter().any(|s| skill_matches(s, r)))
        .count();
    matched as f64 / required.len() as f64
}

/// Active, below max load, and every required skill satisfied.
pub fn is_eligible(agent: &AgentRecord, task: &TaskRecord) -> bool {
    agent.has_capacity()
        && task
            .required_skills
            .iter()
            .all(|r| agent.skills.iter().any(|s| skill_matches(s, r)))
}

pub fn score(agent: &AgentRecord, task: &TaskRecord, weights: &ScoringWeights) -> f64 {
    let free = 1.0 - agent.load_ratio();
    let skill = skill_match_fraction(&agent.skills, &task.required_skills);
    let cost = if agent.average_cost > 0.0 {
        task.estimated_cost as f64 / agent.average_cost
    } else {
        0.0
    };
    weights.load * free + weights.skill * skill + weights.success * agent.success_rate + weights.cost * cost
}

/// Highest scoring eligible agent. Ties go to the first agent in iteration
/// order.
pub fn select_agent<'a, I>(
    agents: I,
    task: &TaskRecord,
    weights: &ScoringWeights,
) -> Option<(&'a AgentRecord, f64)>
where
    I: IntoIterator<Item = &'a AgentRecord>,
{
    let mut best: Option<(&AgentRecord, f64)> = None;
    for agent in agents.into_iter().filter(|a| is_eligible(a, task)) {
        let s = score(agent, task, weights);
        match best {
            Some((_, best_score)) if s <= best_score => {}
            _ => best = Some((agent, s)),
        }
    }
    best
}

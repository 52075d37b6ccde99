// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;
use std::path::Path;

use crate::{WorkflowDefinition, WorkflowError, WorkflowStep};

/// Parse a workflow definition from YAML.
pub fn parse_workflow(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let definition: WorkflowDefinition = serde_yaml::from_str(yaml)
        .map_err(|e| WorkflowError::Validation(format!("invalid YAML: {e}")))?;
    validate(&definition)?;
    Ok(definition)
}

/// Parse a workflow definition from a YAML file.
pub fn parse_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    if !path.is_file() {
        return Err(WorkflowError::Validation(format!(
            "workflow file not found: {}",
            path.display()
        )));
    }
    let text = std::fs::read_to_string(path)?;
    parse_workflow(&text)
}

/// Schema-level validation, independent of graph shape.
fn validate(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    let require = |field: &str, value: &str| {
        if value.trim().is_empty() {
            Err(WorkflowError::Validation(format!("'{field}' must not be empty")))
        } else {
            Ok(())
        }
    };
    require("name", &def.name)?;
    require("description", &def.description)?;
    require("version", &def.version)?;

    if def.steps.is_empty() {
        return Err(WorkflowError::Validation(
            "workflow must have at least one step".into(),
        ));
    }

    let mut seen = std::collections::HashSet::new();
    for step in &def.steps {
        require("step.id", &step.id)?;
        require("step.agent", &step.agent)?;
        require("step.description", &step.description)?;
        if step.timeout == Some(0) {
            return Err(WorkflowError::Validation(format!(
                "step '{}': timeout must be greater than zero",
                step.id
            )));
        }
        if !seen.insert(step.id.clone()) {
            return Err(WorkflowError::Validation(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }
    }
    Ok(())
}

/// Fluent builder for programmatic workflow creation.
pub struct WorkflowBuilder {
    name: String,
    version: String,
    description: Option<String>,
    author: Option<String>,
    metadata: BTreeMap<String, serde_json::Value>,
    steps: Vec<WorkflowStep>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            author: None,
            metadata: BTreeMap::new(),
            steps: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Shorthand for a plain step with dependencies.
    pub fn add_step(
        mut self,
        id: impl Into<String>,
        agent: impl Into<String>,
        description: impl Into<String>,
        depends_on: Vec<String>,
    ) -> Self {
        let mut step = WorkflowStep::new(id, agent, description);
        step.depends_on = depends_on;
        self.steps.push(step);
        self
    }

    pub fn build(self) -> Result<WorkflowDefinition, WorkflowError> {
        let definition = WorkflowDefinition {
            name: self.name,
            description: self.description.unwrap_or_default(),
            version: self.version,
            author: self.author,
            metadata: self.metadata,
            steps: self.steps,
        };
        validate(&definition)?;
        Ok(definition)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
name: wf
description: t
version: 1.0.0
steps:
  - {id: a, agent: general, description: A}
  - {id: b, agent: general, description: B, depends_on: [a]}
  - {id: c, agent: general, description: C, depends_on: [a], parallel_with: [b]}
"#;

    #[test]
    fn parses_valid_yaml() {
        let def = parse_workflow(VALID).unwrap();
        assert_eq!(def.name, "wf");
        assert_eq!(def.steps.len(), 3);
        assert_eq!(def.step("b").unwrap().depends_on, vec!["a"]);
        assert_eq!(def.step("c").unwrap().parallel_with, vec!["b"]);
    }

    #[test]
    fn yaml_round_trip_is_equivalent() {
        let def = parse_workflow(VALID).unwrap();
        let emitted = serde_yaml::to_string(&def).unwrap();
        let reparsed = parse_workflow(&emitted).unwrap();
        assert_eq!(reparsed.name, def.name);
        assert_eq!(reparsed.version, def.version);
        assert_eq!(reparsed.steps.len(), def.steps.len());
        for (a, b) in def.steps.iter().zip(reparsed.steps.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.depends_on, b.depends_on);
        }
    }

    #[test]
    fn missing_name_is_rejected() {
        let err = parse_workflow("description: d\nversion: '1'\nsteps: [{id: a, agent: g, description: A}]\n");
        assert!(err.is_err());
    }

    #[test]
    fn empty_steps_are_rejected() {
        let err = parse_workflow("name: x\ndescription: d\nversion: '1'\nsteps: []\n").unwrap_err();
        assert!(err.to_string().contains("at least one step"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = parse_workflow(
            "name: x\ndescription: d\nversion: '1'\nsteps: [{id: a, agent: g, description: A, timeout: 0}]\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn duplicate_step_ids_are_rejected() {
        let err = parse_workflow(
            "name: x\ndescription: d\nversion: '1'\nsteps:\n  - {id: a, agent: g, description: A}\n  - {id: a, agent: g, description: B}\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn invalid_yaml_reports_validation_error() {
        assert!(matches!(
            parse_workflow(": not yaml ["),
            Err(WorkflowError::Validation(_))
        ));
    }

    #[test]
    fn builder_produces_equivalent_definition() {
        let def = WorkflowBuilder::new("built", "2.0.0")
            .description("from the builder")
            .author("tests")
            .metadata("origin", serde_json::json!("unit"))
            .add_step("plan", "plan", "Plan the work", vec![])
            .add_step("apply", "general", "Apply the plan", vec!["plan".into()])
            .build()
            .unwrap();
        assert_eq!(def.steps.len(), 2);
        assert_eq!(def.step("apply").unwrap().depends_on, vec!["plan"]);
    }

    #[test]
    fn builder_without_description_fails() {
        let err = WorkflowBuilder::new("x", "1")
            .add_step("a", "g", "A", vec![])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("description"));
    }

    #[test]
    fn builder_without_steps_fails() {
        let err = WorkflowBuilder::new("x", "1").description("d").build().unwrap_err();
        assert!(err.to_string().contains("at least one step"));
    }
}

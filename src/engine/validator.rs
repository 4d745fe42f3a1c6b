// SPDX-License-Identifier: MIT

//! Dependency-graph validation, run before a workflow definition is accepted.
//!
//! Checks, in order:
//! 1. The workflow declares at least one step.
//! 2. Step ids are unique.
//! 3. Every dependency references a step declared in the same definition.
//! 4. Step conditions parse, and every declared condition variable is
//!    referenced by its expression.
//! 5. The dependency relation is acyclic (three-color depth-first walk).
//!
//! Validation is pure: it never touches storage.

use std::collections::HashMap;

use crate::engine::condition;
use crate::engine::error::EngineError;
use crate::engine::types::WorkflowDefinition;

#[derive(Clone, Copy, PartialEq)]
enum Color {
    Unvisited,
    InProgress,
    Done,
}

/// Validate a workflow's step graph for referential integrity and cycles.
pub fn validate(definition: &WorkflowDefinition) -> Result<(), EngineError> {
    if definition.steps.is_empty() {
        return Err(EngineError::validation("workflow has no steps"));
    }

    let mut colors: HashMap<&str, Color> = HashMap::new();
    for step in &definition.steps {
        if colors.insert(step.id.as_str(), Color::Unvisited).is_some() {
            return Err(EngineError::validation_at(
                &step.id,
                format!("duplicate step id '{}'", step.id),
            ));
        }
    }

    for step in &definition.steps {
        for dep in &step.dependencies {
            if !colors.contains_key(dep.as_str()) {
                return Err(EngineError::validation_at(
                    &step.id,
                    format!("dependency '{}' does not reference a declared step", dep),
                ));
            }
        }
    }

    for step in &definition.steps {
        if let Some(cond) = &step.condition {
            let expr = condition::parse(&cond.expression)
                .map_err(|e| EngineError::validation_at(&step.id, e.to_string()))?;
            let paths = expr.referenced_paths();
            for variable in &cond.variables {
                let referenced = paths.iter().any(|p| {
                    *p == variable.as_str()
                        || p.strip_prefix(variable.as_str())
                            .map(|rest| rest.starts_with('.'))
                            .unwrap_or(false)
                });
                if !referenced {
                    return Err(EngineError::validation_at(
                        &step.id,
                        format!(
                            "condition variable '{}' is not referenced by the expression",
                            variable
                        ),
                    ));
                }
            }
        }
    }

    // Adjacency: step -> the steps it depends on. A back-edge into an
    // in-progress node during the walk is a cycle.
    let deps: HashMap<&str, &[String]> = definition
        .steps
        .iter()
        .map(|s| (s.id.as_str(), s.dependencies.as_slice()))
        .collect();

    for step in &definition.steps {
        if colors[step.id.as_str()] == Color::Unvisited {
            visit(step.id.as_str(), &deps, &mut colors)?;
        }
    }

    Ok(())
}

fn visit<'a>(
    id: &'a str,
    deps: &HashMap<&'a str, &'a [String]>,
    colors: &mut HashMap<&'a str, Color>,
) -> Result<(), EngineError> {
    colors.insert(id, Color::InProgress);

    for dep in deps[id] {
        match colors[dep.as_str()] {
            Color::InProgress => {
                return Err(EngineError::validation_at(
                    dep,
                    format!("circular dependency involving step {}", dep),
                ));
            }
            Color::Unvisited => visit(dep.as_str(), deps, colors)?,
            Color::Done => {}
        }
    }

    colors.insert(id, Color::Done);
    Ok(())
}

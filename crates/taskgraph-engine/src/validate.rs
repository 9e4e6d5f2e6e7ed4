use std::collections::HashSet;

use taskgraph_core::{SchemaValidationError, SchemaViolation, WorkflowSchema};

/// Check a schema's structural invariants, collecting every violation.
///
/// Accepts iff node ids are unique, every edge endpoint exists, the start and
/// end ids are set and exist, and no node has a negative `maxRetries`.
pub fn validate(schema: &WorkflowSchema) -> Result<&WorkflowSchema, SchemaValidationError> {
    let mut violations = Vec::new();
    let mut ids: HashSet<&str> = HashSet::with_capacity(schema.nodes.len());
    let mut reported_duplicates: HashSet<&str> = HashSet::new();

    for node in &schema.nodes {
        if !ids.insert(node.id.as_str()) && reported_duplicates.insert(node.id.as_str()) {
            violations.push(SchemaViolation::DuplicateNodeId(node.id.clone()));
        }
        if node.max_retries < 0 {
            violations.push(SchemaViolation::NegativeMaxRetries {
                node_id: node.id.clone(),
                value: node.max_retries,
            });
        }
    }

    for edge in &schema.edges {
        if !ids.contains(edge.from.as_str()) {
            violations.push(SchemaViolation::UnknownEdgeSource {
                from: edge.from.clone(),
                to: edge.to.clone(),
            });
        }
        if !ids.contains(edge.to.as_str()) {
            violations.push(SchemaViolation::UnknownEdgeTarget {
                from: edge.from.clone(),
                to: edge.to.clone(),
            });
        }
    }

    if schema.start_node_id.trim().is_empty() {
        violations.push(SchemaViolation::MissingStartNode);
    } else if !ids.contains(schema.start_node_id.as_str()) {
        violations.push(SchemaViolation::UnknownStartNode(schema.start_node_id.clone()));
    }

    if schema.end_node_id.trim().is_empty() {
        violations.push(SchemaViolation::MissingEndNode);
    } else if !ids.contains(schema.end_node_id.as_str()) {
        violations.push(SchemaViolation::UnknownEndNode(schema.end_node_id.clone()));
    }

    if violations.is_empty() {
        Ok(schema)
    } else {
        Err(SchemaValidationError { violations })
    }
}

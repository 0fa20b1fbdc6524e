use crate::prelude::graphql::*;
use apollo_compiler::ast;
use apollo_compiler::Node;
use std::collections::{HashMap, HashSet};

/// A query planner that decomposes an operation by routing each top-level
/// field to its owning subgraph.
///
/// Fields of one subgraph are regrouped into a single sub-operation carrying
/// only the variable definitions and fragment definitions it uses. Queries
/// spanning several subgraphs fan out in parallel; mutations keep their
/// groups sequential.
#[derive(Debug, Default)]
pub struct RoutingPlanner;

impl QueryPlanner for RoutingPlanner {
    fn plan(
        &self,
        supergraph: &Supergraph,
        query: &str,
        operation_name: Option<&str>,
    ) -> Result<QueryPlan, QueryPlannerError> {
        let document = ast::Document::parse(query, "operation.graphql").map_err(|invalid| {
            QueryPlannerError::OperationParseError {
                reason: invalid.errors.to_string(),
            }
        })?;

        let mut operations = Vec::new();
        let mut fragments: HashMap<&str, &Node<ast::FragmentDefinition>> = HashMap::new();
        for definition in &document.definitions {
            match definition {
                ast::Definition::OperationDefinition(operation) => operations.push(operation),
                ast::Definition::FragmentDefinition(fragment) => {
                    fragments.insert(fragment.name.as_str(), fragment);
                }
                _ => {}
            }
        }

        let operation = match operation_name {
            Some(name) => operations
                .iter()
                .find(|operation| {
                    operation.name.as_ref().map(|n| n.as_str()) == Some(name)
                })
                .ok_or_else(|| QueryPlannerError::UnknownOperation {
                    name: name.to_string(),
                })?,
            None => match operations.as_slice() {
                [] => return Err(QueryPlannerError::NoOperation),
                [operation] => operation,
                _ => return Err(QueryPlannerError::AmbiguousOperation),
            },
        };

        let kind = match operation.operation_type {
            ast::OperationType::Query => OperationKind::Query,
            ast::OperationType::Mutation => OperationKind::Mutation,
            ast::OperationType::Subscription => {
                return Err(QueryPlannerError::SubscriptionNotSupported)
            }
        };

        let mut top_level = Vec::new();
        flatten_top_level(
            &operation.selection_set,
            &fragments,
            &mut HashSet::new(),
            &mut top_level,
        )?;

        // group fields by owning subgraph, in first-appearance order
        let mut groups: Vec<(String, Vec<&Node<ast::Field>>)> = Vec::new();
        for field in top_level {
            let service = supergraph
                .route_field(kind, field.name.as_str())
                .ok_or_else(|| QueryPlannerError::UnroutableField {
                    field: field.name.to_string(),
                })?;
            match groups.iter_mut().find(|(name, _)| name == service) {
                Some((_, group)) => group.push(field),
                None => groups.push((service.to_string(), vec![field])),
            }
        }

        let mut nodes = Vec::with_capacity(groups.len());
        for (service_name, group) in groups {
            nodes.push(PlanNode::Fetch(build_fetch(
                service_name,
                operation,
                &group,
                &fragments,
            )?));
        }

        let node = match nodes.len() {
            0 => None,
            1 => nodes.pop(),
            _ => Some(match kind {
                OperationKind::Query => PlanNode::Parallel { nodes },
                OperationKind::Mutation => PlanNode::Sequence { nodes },
            }),
        };
        Ok(QueryPlan { node })
    }
}

/// Reconstruct the sub-operation document for one subgraph group.
fn build_fetch(
    service_name: String,
    operation: &Node<ast::OperationDefinition>,
    group: &[&Node<ast::Field>],
    fragments: &HashMap<&str, &Node<ast::FragmentDefinition>>,
) -> Result<FetchNode, QueryPlannerError> {
    let mut variables = Vec::new();
    let mut used_fragments = Vec::new();
    let mut visited = HashSet::new();
    for field in group {
        collect_field_usages(
            field,
            fragments,
            &mut variables,
            &mut used_fragments,
            &mut visited,
        )?;
    }

    let sub_operation = ast::OperationDefinition {
        operation_type: operation.operation_type,
        name: operation.name.clone(),
        variables: operation
            .variables
            .iter()
            .filter(|definition| variables.iter().any(|v| v == definition.name.as_str()))
            .cloned()
            .collect(),
        directives: operation.directives.clone(),
        selection_set: group
            .iter()
            .map(|field| ast::Selection::Field((*field).clone()))
            .collect(),
    };

    let mut sub_document = ast::Document::new();
    sub_document
        .definitions
        .push(ast::Definition::OperationDefinition(Node::new(
            sub_operation,
        )));
    for fragment in used_fragments {
        sub_document
            .definitions
            .push(ast::Definition::FragmentDefinition(fragment.clone()));
    }

    Ok(FetchNode {
        service_name,
        operation: sub_document.to_string(),
        variable_usages: variables,
    })
}

/// Resolve the operation's top-level selections to plain fields, expanding
/// fragments in place.
fn flatten_top_level<'a>(
    selections: &'a [ast::Selection],
    fragments: &HashMap<&'a str, &'a Node<ast::FragmentDefinition>>,
    visited: &mut HashSet<&'a str>,
    out: &mut Vec<&'a Node<ast::Field>>,
) -> Result<(), QueryPlannerError> {
    for selection in selections {
        match selection {
            ast::Selection::Field(field) => out.push(field),
            ast::Selection::InlineFragment(inline) => {
                flatten_top_level(&inline.selection_set, fragments, visited, out)?;
            }
            ast::Selection::FragmentSpread(spread) => {
                let name = spread.fragment_name.as_str();
                if visited.insert(name) {
                    let fragment = fragments.get(name).ok_or_else(|| {
                        QueryPlannerError::UnknownFragment {
                            name: name.to_string(),
                        }
                    })?;
                    flatten_top_level(&fragment.selection_set, fragments, visited, out)?;
                }
            }
        }
    }
    Ok(())
}

fn collect_field_usages<'a>(
    field: &'a Node<ast::Field>,
    fragments: &HashMap<&'a str, &'a Node<ast::FragmentDefinition>>,
    variables: &mut Vec<String>,
    used_fragments: &mut Vec<&'a Node<ast::FragmentDefinition>>,
    visited: &mut HashSet<&'a str>,
) -> Result<(), QueryPlannerError> {
    for argument in &field.arguments {
        collect_value_variables(&argument.value, variables);
    }
    collect_directive_variables(&field.directives, variables);
    collect_selection_usages(
        &field.selection_set,
        fragments,
        variables,
        used_fragments,
        visited,
    )
}

fn collect_selection_usages<'a>(
    selections: &'a [ast::Selection],
    fragments: &HashMap<&'a str, &'a Node<ast::FragmentDefinition>>,
    variables: &mut Vec<String>,
    used_fragments: &mut Vec<&'a Node<ast::FragmentDefinition>>,
    visited: &mut HashSet<&'a str>,
) -> Result<(), QueryPlannerError> {
    for selection in selections {
        match selection {
            ast::Selection::Field(field) => {
                collect_field_usages(field, fragments, variables, used_fragments, visited)?;
            }
            ast::Selection::InlineFragment(inline) => {
                collect_directive_variables(&inline.directives, variables);
                collect_selection_usages(
                    &inline.selection_set,
                    fragments,
                    variables,
                    used_fragments,
                    visited,
                )?;
            }
            ast::Selection::FragmentSpread(spread) => {
                collect_directive_variables(&spread.directives, variables);
                let name = spread.fragment_name.as_str();
                if visited.insert(name) {
                    let fragment = fragments.get(name).ok_or_else(|| {
                        QueryPlannerError::UnknownFragment {
                            name: name.to_string(),
                        }
                    })?;
                    used_fragments.push(fragment);
                    collect_directive_variables(&fragment.directives, variables);
                    collect_selection_usages(
                        &fragment.selection_set,
                        fragments,
                        variables,
                        used_fragments,
                        visited,
                    )?;
                }
            }
        }
    }
    Ok(())
}

fn collect_directive_variables(directives: &ast::DirectiveList, variables: &mut Vec<String>) {
    for directive in directives.iter() {
        for argument in &directive.arguments {
            collect_value_variables(&argument.value, variables);
        }
    }
}

fn collect_value_variables(value: &ast::Value, variables: &mut Vec<String>) {
    match value {
        ast::Value::Variable(name) => {
            if !variables.iter().any(|v| v == name.as_str()) {
                variables.push(name.to_string());
            }
        }
        ast::Value::List(values) => {
            for value in values {
                collect_value_variables(value, variables);
            }
        }
        ast::Value::Object(fields) => {
            for (_, value) in fields {
                collect_value_variables(value, variables);
            }
        }
        _ => {}
    }
}

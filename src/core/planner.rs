//! ST-004: Change planning — diff a synthesized assembly against the last manifest.

use super::state;
use super::types::*;

/// Plan the changes the deployment engine would make.
///
/// Resources are compared by the hash of their declared JSON. With no
/// previous manifest, everything is a create.
pub fn plan(
    assembly: &CloudAssembly,
    previous: Option<&AssemblyManifest>,
) -> Result<ChangePlan, String> {
    let desired = state::manifest_from_assembly(assembly)?;
    let mut changes = Vec::new();

    for stack_name in &desired.order {
        let Some(stack) = desired.stacks.get(stack_name) else {
            continue;
        };
        let prev_stack = previous.and_then(|p| p.stacks.get(stack_name));

        for (id, entry) in &stack.resources {
            let prev_entry = prev_stack.and_then(|s| s.resources.get(id));
            let action = determine_action(entry, prev_entry);
            let description = describe_action(id, entry, prev_entry, &action);
            changes.push(PlannedChange {
                stack: stack_name.clone(),
                logical_id: id.clone(),
                resource_type: entry.resource_type.clone(),
                action,
                description,
            });
        }
    }

    // Resources in the previous manifest that are no longer declared
    if let Some(prev) = previous {
        for (stack_name, prev_stack) in &prev.stacks {
            let current = desired.stacks.get(stack_name);
            for (id, entry) in &prev_stack.resources {
                if current.is_some_and(|s| s.resources.contains_key(id)) {
                    continue;
                }
                changes.push(PlannedChange {
                    stack: stack_name.clone(),
                    logical_id: id.clone(),
                    resource_type: entry.resource_type.clone(),
                    action: PlanAction::Destroy,
                    description: format!("{}: destroy {}", id, entry.resource_type),
                });
            }
        }
    }

    let count = |action: PlanAction| changes.iter().filter(|c| c.action == action).count() as u32;
    Ok(ChangePlan {
        name: assembly.name.clone(),
        to_create: count(PlanAction::Create),
        to_update: count(PlanAction::Update),
        to_destroy: count(PlanAction::Destroy),
        unchanged: count(PlanAction::NoOp),
        stack_order: desired.order.clone(),
        changes,
    })
}

fn determine_action(entry: &ResourceEntry, previous: Option<&ResourceEntry>) -> PlanAction {
    match previous {
        None => PlanAction::Create,
        Some(prev) if prev.hash == entry.hash => PlanAction::NoOp,
        Some(_) => PlanAction::Update,
    }
}

fn describe_action(
    id: &str,
    entry: &ResourceEntry,
    previous: Option<&ResourceEntry>,
    action: &PlanAction,
) -> String {
    match action {
        PlanAction::Create => format!("{}: create {}", id, entry.resource_type),
        PlanAction::Update => match previous {
            Some(prev) if prev.resource_type != entry.resource_type => format!(
                "{}: replace ({} → {})",
                id, prev.resource_type, entry.resource_type
            ),
            _ => format!("{}: update (properties changed)", id),
        },
        PlanAction::Destroy => format!("{}: destroy {}", id, entry.resource_type),
        PlanAction::NoOp => format!("{}: no changes", id),
    }
}

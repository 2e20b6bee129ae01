//! ST-003: Template variables, reference checking, and dependency ordering.
//!
//! Resolves `{{params.key}}`, `{{env.account}}`, `{{env.region}}` and
//! `{{name}}` in config strings. Scans synthesized templates for `Ref`,
//! `Fn::GetAtt` and `Fn::ImportValue`, verifies every target exists, and
//! orders resources and stacks with Kahn's algorithm using alphabetical
//! tie-breaking for determinism.

use super::env::Environment;
use super::types::*;
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Values available to `{{...}}` templates in config strings.
pub struct TemplateVars<'a> {
    pub name: &'a str,
    pub params: &'a IndexMap<String, String>,
    pub env: &'a Environment,
}

/// Resolve all template variables in a string.
pub fn resolve_template(template: &str, vars: &TemplateVars) -> Result<String, String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        let value = if let Some(param_key) = key.strip_prefix("params.") {
            vars.params
                .get(param_key)
                .cloned()
                .ok_or_else(|| format!("unknown param: {}", param_key))?
        } else {
            match key {
                "name" => vars.name.to_string(),
                "env.account" => vars.env.account.clone(),
                "env.region" => vars.env.region.clone(),
                _ => return Err(format!("unknown template variable: {}", key)),
            }
        };

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

/// Resolve templates in the config's free-form string fields.
pub fn resolve_config_templates(
    config: &StratusConfig,
    env: &Environment,
) -> Result<StratusConfig, String> {
    let vars = TemplateVars {
        name: &config.name,
        params: &config.params,
        env,
    };
    let mut resolved = config.clone();

    resolved.database.name = resolve_template(&config.database.name, &vars)?;
    resolved.secrets.app_key_name = resolve_template(&config.secrets.app_key_name, &vars)?;
    for (key, ext) in resolved.secrets.external.iter_mut() {
        ext.name = resolve_template(&ext.name, &vars)
            .map_err(|e| format!("secrets.external.{}: {}", key, e))?;
    }
    resolved.service.image = match &config.service.image {
        ImageSource::Registry { uri } => ImageSource::Registry {
            uri: resolve_template(uri, &vars)?,
        },
        ImageSource::Asset {
            directory,
            dockerfile,
        } => ImageSource::Asset {
            directory: resolve_template(directory, &vars)?,
            dockerfile: resolve_template(dockerfile, &vars)?,
        },
    };
    resolved.service.health_check.path = resolve_template(&config.service.health_check.path, &vars)?;

    Ok(resolved)
}

/// Collect logical IDs referenced through `Ref` and `Fn::GetAtt`.
///
/// Pseudo parameters (`AWS::Region`, ...) are skipped.
pub fn collect_refs(value: &serde_json::Value, out: &mut BTreeSet<String>) {
    match value {
        serde_json::Value::Object(map) => {
            if map.len() == 1 {
                if let Some(serde_json::Value::String(target)) = map.get("Ref") {
                    if !target.starts_with("AWS::") {
                        out.insert(target.clone());
                    }
                    return;
                }
                if let Some(serde_json::Value::Array(parts)) = map.get("Fn::GetAtt") {
                    if let Some(serde_json::Value::String(target)) = parts.first() {
                        out.insert(target.clone());
                    }
                    return;
                }
            }
            for v in map.values() {
                collect_refs(v, out);
            }
        }
        serde_json::Value::Array(items) => {
            for v in items {
                collect_refs(v, out);
            }
        }
        _ => {}
    }
}

/// Collect export names consumed through `Fn::ImportValue`.
pub fn collect_imports(value: &serde_json::Value, out: &mut BTreeSet<String>) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(name)) = map.get("Fn::ImportValue") {
                out.insert(name.clone());
                return;
            }
            for v in map.values() {
                collect_imports(v, out);
            }
        }
        serde_json::Value::Array(items) => {
            for v in items {
                collect_imports(v, out);
            }
        }
        _ => {}
    }
}

/// Order a stack's resources so every referenced resource comes first.
///
/// Fails on references to undeclared IDs and on cycles.
pub fn resource_order(stack: &StackTemplate) -> Result<Vec<String>, String> {
    let mut edges: IndexMap<String, Vec<String>> = IndexMap::new();

    for (id, resource) in &stack.resources {
        let mut deps = BTreeSet::new();
        collect_refs(&resource.properties, &mut deps);
        deps.extend(resource.depends_on.iter().cloned());

        for dep in &deps {
            if !stack.resources.contains_key(dep) {
                return Err(format!(
                    "{}/{} references unknown resource '{}'",
                    stack.name, id, dep
                ));
            }
            if dep == id {
                return Err(format!("{}/{} references itself", stack.name, id));
            }
        }
        edges.insert(id.clone(), deps.into_iter().collect());
    }

    for (key, output) in &stack.outputs {
        let mut deps = BTreeSet::new();
        collect_refs(&output.value, &mut deps);
        if let Some(missing) = deps.iter().find(|d| !stack.resources.contains_key(*d)) {
            return Err(format!(
                "{} output '{}' references unknown resource '{}'",
                stack.name, key, missing
            ));
        }
    }

    topo_order(&edges).map_err(|e| format!("stack {}: {}", stack.name, e))
}

/// Compute which stacks each stack depends on through imported exports.
pub fn stack_dependencies(
    stacks: &IndexMap<String, StackTemplate>,
) -> Result<IndexMap<String, Vec<String>>, String> {
    let mut exporters: HashMap<&str, &str> = HashMap::new();
    for (name, stack) in stacks {
        for export in stack.exports() {
            if let Some(prev) = exporters.insert(export, name.as_str()) {
                return Err(format!(
                    "export '{}' declared by both {} and {}",
                    export, prev, name
                ));
            }
        }
    }

    let mut deps = IndexMap::new();
    for (name, stack) in stacks {
        let mut imports = BTreeSet::new();
        for resource in stack.resources.values() {
            collect_imports(&resource.properties, &mut imports);
        }
        for output in stack.outputs.values() {
            collect_imports(&output.value, &mut imports);
        }

        let mut needed = BTreeSet::new();
        for import in &imports {
            let owner = exporters.get(import.as_str()).ok_or_else(|| {
                format!("stack {} imports unknown export '{}'", name, import)
            })?;
            if *owner == name.as_str() {
                return Err(format!("stack {} imports its own export '{}'", name, import));
            }
            needed.insert(owner.to_string());
        }
        deps.insert(name.clone(), needed.into_iter().collect());
    }

    Ok(deps)
}

/// Build a topological order from `node -> dependencies` edges.
/// Uses Kahn's algorithm with alphabetical tie-breaking for determinism.
pub fn topo_order(edges: &IndexMap<String, Vec<String>>) -> Result<Vec<String>, String> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for id in edges.keys() {
        in_degree.insert(id.as_str(), 0);
        dependents.insert(id.as_str(), Vec::new());
    }

    for (id, deps) in edges {
        for dep in deps {
            let list = dependents
                .get_mut(dep.as_str())
                .ok_or_else(|| format!("'{}' depends on unknown '{}'", id, dep))?;
            list.push(id.as_str());
            *in_degree.entry(id.as_str()).or_insert(0) += 1;
        }
    }

    let mut zero_degree: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| *id)
        .collect();
    zero_degree.sort_unstable();
    let mut queue: VecDeque<&str> = zero_degree.into_iter().collect();

    let mut order = Vec::with_capacity(edges.len());
    while let Some(current) = queue.pop_front() {
        order.push(current.to_string());

        let mut next_ready: Vec<&str> = Vec::new();
        if let Some(list) = dependents.get(current) {
            for &dependent in list {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(dependent);
                    }
                }
            }
        }
        next_ready.sort_unstable();
        queue.extend(next_ready);
    }

    if order.len() != edges.len() {
        let ordered: HashSet<&str> = order.iter().map(String::as_str).collect();
        let mut cycle_members: Vec<&str> = edges
            .keys()
            .map(String::as_str)
            .filter(|id| !ordered.contains(id))
            .collect();
        cycle_members.sort_unstable();
        return Err(format!(
            "dependency cycle detected involving: {}",
            cycle_members.join(", ")
        ));
    }

    Ok(order)
}

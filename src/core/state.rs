//! ST-013: Assembly output — templates, manifest (atomic), path derivation.

use super::types::{AssemblyManifest, CloudAssembly, ResourceEntry, StackManifest};
use crate::tripwire::hasher;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Manifest schema version.
pub const MANIFEST_SCHEMA: &str = "1.0";

/// Derive the manifest path within an output directory.
pub fn manifest_path(out_dir: &Path) -> PathBuf {
    out_dir.join("manifest.yaml")
}

/// Template file name for a stack.
pub fn template_file_name(stack: &str) -> String {
    format!("{}.template.json", stack)
}

/// Describe an assembly: per-stack template hashes and per-resource hashes.
pub fn manifest_from_assembly(assembly: &CloudAssembly) -> Result<AssemblyManifest, String> {
    let mut stacks = IndexMap::new();
    let mut stack_hashes = Vec::with_capacity(assembly.order.len());

    for name in &assembly.order {
        let stack = assembly
            .stacks
            .get(name)
            .ok_or_else(|| format!("assembly order names unknown stack '{}'", name))?;
        let rendered = stack.render()?;
        let hash = hasher::hash_string(&rendered);

        let mut resources = IndexMap::new();
        for (id, resource) in &stack.resources {
            resources.insert(
                id.clone(),
                ResourceEntry {
                    resource_type: resource.resource_type.clone(),
                    hash: hasher::hash_json(resource)?,
                },
            );
        }

        stack_hashes.push(hash.clone());
        stacks.insert(
            name.clone(),
            StackManifest {
                template: template_file_name(name),
                hash,
                depends_on: stack.dependencies.clone(),
                resources,
            },
        );
    }

    let refs: Vec<&str> = stack_hashes.iter().map(String::as_str).collect();
    Ok(AssemblyManifest {
        schema: MANIFEST_SCHEMA.to_string(),
        generator: format!("stratus {}", env!("CARGO_PKG_VERSION")),
        name: assembly.name.clone(),
        account: assembly.environment.account.clone(),
        region: assembly.environment.region.clone(),
        fingerprint: hasher::composite_hash(&refs),
        order: assembly.order.clone(),
        stacks,
        assets: assembly.assets.clone(),
    })
}

/// Write every template plus the manifest. Returns the manifest written.
pub fn write_assembly(out_dir: &Path, assembly: &CloudAssembly) -> Result<AssemblyManifest, String> {
    std::fs::create_dir_all(out_dir)
        .map_err(|e| format!("cannot create dir {}: {}", out_dir.display(), e))?;

    for name in &assembly.order {
        if let Some(stack) = assembly.stacks.get(name) {
            let path = out_dir.join(template_file_name(name));
            atomic_write(&path, &stack.render()?)?;
            debug!(path = %path.display(), "wrote template");
        }
    }

    let manifest = manifest_from_assembly(assembly)?;
    save_manifest(out_dir, &manifest)?;
    info!(
        out_dir = %out_dir.display(),
        stacks = manifest.stacks.len(),
        fingerprint = %manifest.fingerprint,
        "assembly written"
    );
    Ok(manifest)
}

/// Load the manifest from an output directory. Returns None if absent.
pub fn load_manifest(out_dir: &Path) -> Result<Option<AssemblyManifest>, String> {
    let path = manifest_path(out_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let manifest: AssemblyManifest = serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("invalid manifest {}: {}", path.display(), e))?;
    Ok(Some(manifest))
}

/// Save a manifest atomically.
pub fn save_manifest(out_dir: &Path, manifest: &AssemblyManifest) -> Result<(), String> {
    let yaml = serde_yaml_ng::to_string(manifest).map_err(|e| format!("serialize error: {}", e))?;
    atomic_write(&manifest_path(out_dir), &yaml)
}

/// Write to a temp file, then rename over the target.
fn atomic_write(path: &Path, content: &str) -> Result<(), String> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| format!("invalid output path {}", path.display()))?;
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));
    std::fs::write(&tmp_path, content)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        format!(
            "cannot rename {} → {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })
}

//! ST-016: Drift detection — compare templates on disk to manifest hashes.

use crate::core::types::AssemblyManifest;
use crate::tripwire::hasher;
use std::path::Path;

/// A single drift finding.
#[derive(Debug, Clone)]
pub struct DriftFinding {
    pub stack: String,
    pub template: String,
    pub expected_hash: String,
    pub actual_hash: String,
    pub detail: String,
}

/// Check one template file against its recorded hash.
pub fn check_template_drift(
    stack: &str,
    path: &Path,
    expected_hash: &str,
) -> Option<DriftFinding> {
    let template = path.display().to_string();
    if !path.exists() {
        return Some(DriftFinding {
            stack: stack.to_string(),
            template: template.clone(),
            expected_hash: expected_hash.to_string(),
            actual_hash: "MISSING".to_string(),
            detail: format!("{} does not exist", template),
        });
    }

    let actual = hasher::hash_file(path).unwrap_or_else(|e| format!("ERROR:{}", e));
    if actual != expected_hash {
        Some(DriftFinding {
            stack: stack.to_string(),
            template: template.clone(),
            expected_hash: expected_hash.to_string(),
            actual_hash: actual,
            detail: format!("{} content changed", template),
        })
    } else {
        None
    }
}

/// Check every template the manifest lists.
pub fn detect_drift(out_dir: &Path, manifest: &AssemblyManifest) -> Vec<DriftFinding> {
    manifest
        .stacks
        .iter()
        .filter_map(|(name, entry)| {
            check_template_drift(name, &out_dir.join(&entry.template), &entry.hash)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::env::Environment;
    use crate::core::parser::parse_config;
    use crate::core::state;
    use crate::core::synth::synthesize;

    fn write_out(dir: &Path) -> AssemblyManifest {
        let config = parse_config(
            "version: \"1.0\"\nname: todo\nservice:\n  image:\n    registry:\n      uri: nginx:1\n",
        )
        .unwrap();
        let env = Environment::new("123456789012", "us-east-1").unwrap();
        let assembly = synthesize(&config, &env, Path::new(".")).unwrap();
        state::write_assembly(dir, &assembly).unwrap()
    }

    #[test]
    fn test_st016_no_drift() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_out(dir.path());
        assert!(detect_drift(dir.path(), &manifest).is_empty());
    }

    #[test]
    fn test_st016_content_drift() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_out(dir.path());
        let path = dir.path().join(&manifest.stacks["Database"].template);
        std::fs::write(&path, "{}\n").unwrap();

        let findings = detect_drift(dir.path(), &manifest);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].stack, "Database");
        assert_ne!(findings[0].actual_hash, findings[0].expected_hash);
        assert!(findings[0].detail.contains("content changed"));
    }

    #[test]
    fn test_st016_missing_template() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_out(dir.path());
        std::fs::remove_file(dir.path().join(&manifest.stacks["Network"].template)).unwrap();

        let findings = detect_drift(dir.path(), &manifest);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].actual_hash, "MISSING");
    }

    #[test]
    fn test_st016_check_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.template.json");
        std::fs::write(&file, "{}").unwrap();
        let hash = hasher::hash_file(&file).unwrap();
        assert!(check_template_drift("X", &file, &hash).is_none());
        assert!(check_template_drift("X", &file, "blake3:other").is_some());
    }
}

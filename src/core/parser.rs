//! ST-002: YAML parsing and validation.
//!
//! Parses stratus.yaml and validates structural constraints before any
//! synthesis happens. All problems are collected so one run reports them
//! together.

use super::cidr::{self, Ipv4Cidr};
use super::types::*;
use crate::stacks::pascal_case;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::path::Path;

/// Keys every service receives from the secrets definition.
pub const REQUIRED_DB_SECRET_KEYS: [&str; 5] = ["HOST", "PORT", "DB_NAME", "USERNAME", "PASSWORD"];

/// Idle minutes before the database pauses.
pub const AUTO_PAUSE_MINUTES: RangeInclusive<u32> = 5..=1440;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a stratus.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<StratusConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a stratus.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<StratusConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &StratusConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        push(
            &mut errors,
            format!("version must be \"1.0\", got \"{}\"", config.version),
        );
    }

    if config.name.is_empty() {
        push(&mut errors, "name must not be empty".to_string());
    } else if !is_match(r"^[A-Za-z][A-Za-z0-9-]{0,63}$", &config.name) {
        push(
            &mut errors,
            format!(
                "name '{}' must start with a letter and contain only letters, digits and '-'",
                config.name
            ),
        );
    }

    validate_network(&config.network, &mut errors);
    validate_database(config, &mut errors);
    validate_secrets(&config.secrets, &mut errors);
    validate_service(config, &mut errors);

    errors
}

fn push(errors: &mut Vec<ValidationError>, message: String) {
    errors.push(ValidationError { message });
}

/// Strings still holding `{{...}}` templates are checked after resolution.
fn is_templated(value: &str) -> bool {
    value.contains("{{")
}

fn is_match(pattern: &str, value: &str) -> bool {
    Regex::new(pattern)
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

fn validate_network(network: &NetworkConfig, errors: &mut Vec<ValidationError>) {
    let vpc = match network.cidr.parse::<Ipv4Cidr>() {
        Ok(c) => Some(c),
        Err(e) => {
            push(errors, format!("network.cidr: {}", e));
            None
        }
    };
    if let Some(vpc) = vpc {
        if vpc.prefix() > cidr::MAX_PREFIX {
            push(
                errors,
                format!(
                    "network.cidr {} is smaller than /{}",
                    vpc,
                    cidr::MAX_PREFIX
                ),
            );
        }
    }

    if network.max_azs == 0 {
        push(errors, "network.max_azs must be at least 1".to_string());
    }

    if network.subnets.is_empty() {
        push(errors, "network.subnets must declare at least one group".to_string());
    }

    let mut seen = HashSet::new();
    let mut logical_prefixes: HashMap<String, &str> = HashMap::new();
    for group in &network.subnets {
        if group.name.is_empty() {
            push(errors, "network.subnets: group name must not be empty".to_string());
        } else if !is_match(r"^[a-z][a-z0-9-]*$", &group.name) {
            push(
                errors,
                format!(
                    "network.subnets: group name '{}' must be lowercase letters, digits and '-'",
                    group.name
                ),
            );
        }
        if !seen.insert(group.name.as_str()) {
            push(
                errors,
                format!("network.subnets: duplicate group '{}'", group.name),
            );
        } else if let Some(other) =
            logical_prefixes.insert(pascal_case(&group.name), &group.name)
        {
            push(
                errors,
                format!(
                    "network.subnets: groups '{}' and '{}' map to the same resource prefix '{}'",
                    other,
                    group.name,
                    pascal_case(&group.name)
                ),
            );
        }
        if group.cidr_mask > cidr::MAX_PREFIX {
            push(
                errors,
                format!(
                    "network.subnets: group '{}' mask /{} is smaller than /{}",
                    group.name,
                    group.cidr_mask,
                    cidr::MAX_PREFIX
                ),
            );
        }
        if let Some(vpc) = vpc {
            if group.cidr_mask < vpc.prefix() {
                push(
                    errors,
                    format!(
                        "network.subnets: group '{}' mask /{} is larger than network {}",
                        group.name, group.cidr_mask, vpc
                    ),
                );
            }
        }
    }

    if !network
        .subnets
        .iter()
        .any(|g| g.kind == SubnetKind::Isolated)
    {
        push(
            errors,
            "network.subnets must include an isolated group".to_string(),
        );
    }

    // Only try the partition when the individual masks are sane.
    if let Some(vpc) = vpc {
        let masks_ok = network
            .subnets
            .iter()
            .all(|g| g.cidr_mask >= vpc.prefix() && g.cidr_mask <= cidr::MAX_PREFIX);
        if masks_ok && network.max_azs > 0 {
            let request: Vec<(u8, usize)> = network
                .subnets
                .iter()
                .map(|g| (g.cidr_mask, usize::from(network.max_azs)))
                .collect();
            if let Err(e) = vpc.partition(&request) {
                push(errors, format!("network.subnets: {}", e));
            }
        }
    }

    let mut endpoints = HashSet::new();
    for ep in &network.endpoints {
        if !endpoints.insert(ep) {
            push(
                errors,
                format!("network.endpoints: duplicate endpoint '{}'", ep.service_suffix()),
            );
        }
    }
}

fn group_kind(network: &NetworkConfig, name: &str) -> Option<SubnetKind> {
    network
        .subnets
        .iter()
        .find(|g| g.name == name)
        .map(|g| g.kind)
}

fn require_group(
    network: &NetworkConfig,
    field: &str,
    name: &str,
    kind: SubnetKind,
    errors: &mut Vec<ValidationError>,
) {
    match group_kind(network, name) {
        None => push(
            errors,
            format!("{} references unknown subnet group '{}'", field, name),
        ),
        Some(k) if k != kind => push(
            errors,
            format!(
                "{} must reference a subnet group of kind {}, '{}' is {}",
                field,
                kind.to_string().to_lowercase(),
                name,
                k.to_string().to_lowercase()
            ),
        ),
        Some(_) => {}
    }
}

fn validate_database(config: &StratusConfig, errors: &mut Vec<ValidationError>) {
    let db = &config.database;

    if !is_templated(&db.name) && !is_match(r"^[A-Za-z][A-Za-z0-9_]{0,63}$", &db.name) {
        push(
            errors,
            format!(
                "database.name '{}' must start with a letter and contain only letters, digits and '_'",
                db.name
            ),
        );
    }

    if let Err(e) = CapacityRange::new(db.min_capacity, db.max_capacity) {
        push(errors, e);
    }

    if !AUTO_PAUSE_MINUTES.contains(&db.auto_pause_minutes) {
        push(
            errors,
            format!(
                "database.auto_pause_minutes must be within {:?}, got {}",
                AUTO_PAUSE_MINUTES, db.auto_pause_minutes
            ),
        );
    }

    if !(1..=35).contains(&db.backup_retention_days) {
        push(
            errors,
            format!(
                "database.backup_retention_days must be within 1..=35, got {}",
                db.backup_retention_days
            ),
        );
    }

    require_group(
        &config.network,
        "database.subnet_group",
        &db.subnet_group,
        SubnetKind::Isolated,
        errors,
    );
}

fn validate_secrets(secrets: &SecretsConfig, errors: &mut Vec<ValidationError>) {
    let env_name = r"^[A-Z_][A-Z0-9_]*$";

    if !is_match(env_name, &secrets.app_key) {
        push(
            errors,
            format!("secrets.app_key '{}' is not a valid env var name", secrets.app_key),
        );
    }
    if REQUIRED_DB_SECRET_KEYS.contains(&secrets.app_key.as_str()) {
        push(
            errors,
            format!(
                "secrets.app_key '{}' collides with a database secret key",
                secrets.app_key
            ),
        );
    }
    if !is_templated(&secrets.app_key_name)
        && !is_match(r"^[A-Za-z0-9/_+=.@-]{1,400}$", &secrets.app_key_name)
    {
        push(
            errors,
            format!(
                "secrets.app_key_name '{}' is not a valid secret name",
                secrets.app_key_name
            ),
        );
    }

    for (key, ext) in &secrets.external {
        if !is_match(env_name, key) {
            push(
                errors,
                format!("secrets.external: '{}' is not a valid env var name", key),
            );
        }
        if REQUIRED_DB_SECRET_KEYS.contains(&key.as_str()) || *key == secrets.app_key {
            push(
                errors,
                format!("secrets.external: '{}' collides with a generated secret key", key),
            );
        }
        if ext.name.is_empty() {
            push(
                errors,
                format!("secrets.external: '{}' has no secret name", key),
            );
        }
    }
}

/// Valid Fargate task sizes: memory MiB allowed for each CPU value.
pub fn fargate_memory_valid(cpu: u32, memory_mib: u32) -> bool {
    match cpu {
        256 => matches!(memory_mib, 512 | 1024 | 2048),
        512 => (1024..=4096).contains(&memory_mib) && memory_mib % 1024 == 0,
        1024 => (2048..=8192).contains(&memory_mib) && memory_mib % 1024 == 0,
        2048 => (4096..=16384).contains(&memory_mib) && memory_mib % 1024 == 0,
        4096 => (8192..=30720).contains(&memory_mib) && memory_mib % 1024 == 0,
        8192 => (16384..=61440).contains(&memory_mib) && memory_mib % 4096 == 0,
        16384 => (32768..=122880).contains(&memory_mib) && memory_mib % 8192 == 0,
        _ => false,
    }
}

fn validate_service(config: &StratusConfig, errors: &mut Vec<ValidationError>) {
    let svc = &config.service;

    if !fargate_memory_valid(svc.cpu, svc.memory_mib) {
        push(
            errors,
            format!(
                "service: cpu {} with memory_mib {} is not a valid Fargate task size",
                svc.cpu, svc.memory_mib
            ),
        );
    }

    if let Err(e) = ScalingBounds::new(svc.min_capacity, svc.desired_count, svc.max_capacity) {
        push(errors, e);
    }

    if svc.container_port == 0 {
        push(errors, "service.container_port must be within 1..=65535".to_string());
    }
    if svc.listener_port == 0 {
        push(errors, "service.listener_port must be within 1..=65535".to_string());
    }

    if !is_match(r"^[A-Za-z0-9_-]{1,255}$", &svc.container_name) {
        push(
            errors,
            format!(
                "service.container_name '{}' must be letters, digits, '_' and '-'",
                svc.container_name
            ),
        );
    }

    let hc = &svc.health_check;
    if !hc.path.starts_with('/') {
        push(
            errors,
            format!("service.health_check.path '{}' must start with '/'", hc.path),
        );
    }
    for (field, value) in [
        ("healthy_threshold", hc.healthy_threshold),
        ("unhealthy_threshold", hc.unhealthy_threshold),
    ] {
        if !(2..=10).contains(&value) {
            push(
                errors,
                format!(
                    "service.health_check.{} must be within 2..=10, got {}",
                    field, value
                ),
            );
        }
    }

    if !(1..=100).contains(&svc.cpu_target_percent) {
        push(
            errors,
            format!(
                "service.cpu_target_percent must be within 1..=100, got {}",
                svc.cpu_target_percent
            ),
        );
    }

    if svc.log_retention_days == 0 {
        push(errors, "service.log_retention_days must be at least 1".to_string());
    }

    match &svc.image {
        ImageSource::Registry { uri } if uri.trim().is_empty() => {
            push(errors, "service.image.registry.uri must not be empty".to_string());
        }
        ImageSource::Asset { directory, dockerfile } => {
            if directory.trim().is_empty() {
                push(errors, "service.image.asset.directory must not be empty".to_string());
            }
            if dockerfile.trim().is_empty() {
                push(errors, "service.image.asset.dockerfile must not be empty".to_string());
            }
        }
        ImageSource::Registry { .. } => {}
    }

    require_group(
        &config.network,
        "service.subnet_group",
        &svc.subnet_group,
        SubnetKind::Isolated,
        errors,
    );
    require_group(
        &config.network,
        "service.load_balancer_subnet_group",
        &svc.load_balancer_subnet_group,
        SubnetKind::Public,
        errors,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(errors: &[ValidationError]) -> Vec<&str> {
        errors.iter().map(|e| e.message.as_str()).collect()
    }

    #[test]
    fn test_st002_parse_valid() {
        let yaml = r#"
version: "1.0"
name: django-todo
database:
  name: app_db
  min_capacity: 1
  max_capacity: 2
  auto_pause_minutes: 60
service:
  cpu: 256
  memory_mib: 512
  desired_count: 2
  min_capacity: 1
  max_capacity: 2
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.name, "django-todo");
        let errors = validate_config(&config);
        assert!(errors.is_empty(), "unexpected errors: {:?}", messages(&errors));
    }

    #[test]
    fn test_st002_bad_version_and_name() {
        let config = parse_config("version: \"2.0\"\nname: \"\"\n").unwrap();
        let errors = validate_config(&config);
        let msgs = messages(&errors);
        assert!(msgs.iter().any(|m| m.contains("version")));
        assert!(msgs.iter().any(|m| m.contains("name must not be empty")));
    }

    #[test]
    fn test_st002_name_charset() {
        let config = parse_config("version: \"1.0\"\nname: my_app\n").unwrap();
        let errors = validate_config(&config);
        assert!(messages(&errors).iter().any(|m| m.contains("must start with a letter")));
    }

    #[test]
    fn test_st002_capacity_bounds_inverted() {
        let yaml = r#"
version: "1.0"
name: app
database:
  min_capacity: 8
  max_capacity: 2
"#;
        let errors = validate_config(&parse_config(yaml).unwrap());
        assert!(messages(&errors).iter().any(|m| m.contains("min_capacity (8 ACU) exceeds")));
    }

    #[test]
    fn test_st002_service_bounds_inverted() {
        let yaml = r#"
version: "1.0"
name: app
service:
  desired_count: 3
  min_capacity: 4
  max_capacity: 2
"#;
        let errors = validate_config(&parse_config(yaml).unwrap());
        assert!(messages(&errors).iter().any(|m| m.contains("service min_capacity")));
    }

    #[test]
    fn test_st002_invalid_fargate_size() {
        let yaml = r#"
version: "1.0"
name: app
service:
  cpu: 256
  memory_mib: 4096
"#;
        let errors = validate_config(&parse_config(yaml).unwrap());
        assert!(messages(&errors).iter().any(|m| m.contains("not a valid Fargate task size")));
    }

    #[test]
    fn test_st002_fargate_table() {
        assert!(fargate_memory_valid(256, 512));
        assert!(fargate_memory_valid(512, 3072));
        assert!(fargate_memory_valid(4096, 30720));
        assert!(!fargate_memory_valid(512, 512));
        assert!(!fargate_memory_valid(1024, 2500));
        assert!(!fargate_memory_valid(300, 1024));
    }

    #[test]
    fn test_st002_bad_cidr() {
        let yaml = r#"
version: "1.0"
name: app
network:
  cidr: 10.0.0.1/16
"#;
        let errors = validate_config(&parse_config(yaml).unwrap());
        assert!(messages(&errors).iter().any(|m| m.starts_with("network.cidr")));
    }

    #[test]
    fn test_st002_partition_does_not_fit() {
        let yaml = r#"
version: "1.0"
name: app
network:
  cidr: 10.0.0.0/24
  max_azs: 3
  subnets:
    - { name: public, kind: public, cidr_mask: 26 }
    - { name: isolated, kind: isolated, cidr_mask: 26 }
"#;
        let errors = validate_config(&parse_config(yaml).unwrap());
        assert!(messages(&errors).iter().any(|m| m.contains("exceeds address space")));
    }

    #[test]
    fn test_st002_requires_isolated_group() {
        let yaml = r#"
version: "1.0"
name: app
network:
  subnets:
    - { name: public, kind: public }
"#;
        let errors = validate_config(&parse_config(yaml).unwrap());
        let msgs = messages(&errors);
        assert!(msgs.iter().any(|m| m.contains("must include an isolated group")));
        assert!(msgs.iter().any(|m| m.contains("database.subnet_group references unknown")));
    }

    #[test]
    fn test_st002_service_subnet_kind_mismatch() {
        let yaml = r#"
version: "1.0"
name: app
service:
  subnet_group: public
"#;
        let errors = validate_config(&parse_config(yaml).unwrap());
        assert!(messages(&errors)
            .iter()
            .any(|m| m.contains("service.subnet_group must reference a subnet group of kind isolated")));
    }

    #[test]
    fn test_st002_duplicate_subnet_group() {
        let yaml = r#"
version: "1.0"
name: app
network:
  subnets:
    - { name: public, kind: public }
    - { name: isolated, kind: isolated }
    - { name: isolated, kind: isolated }
"#;
        let errors = validate_config(&parse_config(yaml).unwrap());
        assert!(messages(&errors).iter().any(|m| m.contains("duplicate group 'isolated'")));
    }

    #[test]
    fn test_st002_subnet_groups_share_logical_prefix() {
        let yaml = r#"
version: "1.0"
name: app
network:
  subnets:
    - { name: public, kind: public }
    - { name: db-1, kind: isolated }
    - { name: db1, kind: isolated }
"#;
        let errors = validate_config(&parse_config(yaml).unwrap());
        assert!(
            messages(&errors)
                .iter()
                .any(|m| m.contains("'db-1' and 'db1' map to the same resource prefix 'Db1'")),
            "{:?}",
            messages(&errors)
        );
    }

    #[test]
    fn test_st002_external_secret_collision() {
        let yaml = r#"
version: "1.0"
name: app
secrets:
  external:
    PASSWORD: { name: Other }
    lower_case: { name: Thing }
"#;
        let errors = validate_config(&parse_config(yaml).unwrap());
        let msgs = messages(&errors);
        assert!(msgs.iter().any(|m| m.contains("'PASSWORD' collides")));
        assert!(msgs.iter().any(|m| m.contains("'lower_case' is not a valid env var name")));
    }

    #[test]
    fn test_st002_health_check_path() {
        let yaml = r#"
version: "1.0"
name: app
service:
  health_check:
    path: health
    healthy_threshold: 1
"#;
        let errors = validate_config(&parse_config(yaml).unwrap());
        let msgs = messages(&errors);
        assert!(msgs.iter().any(|m| m.contains("must start with '/'")));
        assert!(msgs.iter().any(|m| m.contains("healthy_threshold must be within")));
    }

    #[test]
    fn test_st002_auto_pause_range() {
        let yaml = r#"
version: "1.0"
name: app
database:
  auto_pause_minutes: 2
  backup_retention_days: 0
"#;
        let errors = validate_config(&parse_config(yaml).unwrap());
        let msgs = messages(&errors);
        assert!(msgs.iter().any(|m| m.contains("auto_pause_minutes")));
        assert!(msgs.iter().any(|m| m.contains("backup_retention_days")));
    }

    #[test]
    fn test_st002_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stratus.yaml");
        std::fs::write(&path, "version: \"1.0\"\nname: file-test\n").unwrap();
        let config = parse_config_file(&path).unwrap();
        assert_eq!(config.name, "file-test");
    }

    #[test]
    fn test_st002_parse_invalid_yaml() {
        let result = parse_config("not: [valid: yaml: {{");
        assert!(result.is_err());
    }

    #[test]
    fn test_st002_unknown_engine_rejected() {
        let yaml = r#"
version: "1.0"
name: app
database:
  engine: oracle
"#;
        assert!(parse_config(yaml).unwrap_err().contains("YAML parse error"));
    }
}

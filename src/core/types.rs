//! ST-001: Configuration, template, and manifest types.
//!
//! Defines the YAML schema for stratus.yaml (network, database, secrets,
//! service), the CloudFormation-shaped template model the definition units
//! emit, and the manifest/plan types used by diff and verify.

use super::env::Environment;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Top-level stratus.yaml
// ============================================================================

/// Root configuration: the desired shape of the application stack.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StratusConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Application name, used as the prefix for stack and export names
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Free-form parameters usable as `{{params.key}}` in string fields
    #[serde(default)]
    pub params: IndexMap<String, String>,

    /// Network definition
    #[serde(default)]
    pub network: NetworkConfig,

    /// Database definition
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Secrets definition
    #[serde(default)]
    pub secrets: SecretsConfig,

    /// Compute/service definition
    #[serde(default)]
    pub service: ServiceConfig,
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Network
// ============================================================================

/// Virtual network: address space, AZ spread, subnet partition, endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NetworkConfig {
    /// IPv4 address space in CIDR notation
    #[serde(default = "default_cidr")]
    pub cidr: String,

    /// Number of availability zones to spread subnets over
    #[serde(default = "default_max_azs")]
    pub max_azs: u8,

    /// Subnet partition scheme; each group gets one subnet per AZ
    #[serde(default = "default_subnet_groups")]
    pub subnets: Vec<SubnetGroup>,

    /// Private connectivity endpoints
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<EndpointService>,

    /// Enable DNS support and hostnames in the VPC
    #[serde(default = "default_true")]
    pub enable_dns: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cidr: default_cidr(),
            max_azs: default_max_azs(),
            subnets: default_subnet_groups(),
            endpoints: default_endpoints(),
            enable_dns: true,
        }
    }
}

fn default_cidr() -> String {
    "10.0.0.0/16".to_string()
}

fn default_max_azs() -> u8 {
    2
}

fn default_subnet_groups() -> Vec<SubnetGroup> {
    vec![
        SubnetGroup {
            name: "public".to_string(),
            kind: SubnetKind::Public,
            cidr_mask: 24,
        },
        SubnetGroup {
            name: "isolated".to_string(),
            kind: SubnetKind::Isolated,
            cidr_mask: 24,
        },
    ]
}

fn default_endpoints() -> Vec<EndpointService> {
    vec![
        EndpointService::S3,
        EndpointService::Ecr,
        EndpointService::EcrDocker,
        EndpointService::SecretsManager,
        EndpointService::CloudwatchLogs,
    ]
}

/// A named group of subnets, one per availability zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SubnetGroup {
    pub name: String,
    pub kind: SubnetKind,
    #[serde(default = "default_cidr_mask")]
    pub cidr_mask: u8,
}

fn default_cidr_mask() -> u8 {
    24
}

/// Subnet routing class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubnetKind {
    /// Routed to an internet gateway (load balancer only)
    Public,
    /// No route outside the VPC
    Isolated,
}

impl fmt::Display for SubnetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "Public"),
            Self::Isolated => write!(f, "Isolated"),
        }
    }
}

/// Services reachable from isolated subnets through VPC endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EndpointService {
    S3,
    Ecr,
    EcrDocker,
    SecretsManager,
    CloudwatchLogs,
}

impl EndpointService {
    /// Service suffix after `com.amazonaws.<region>.`
    pub fn service_suffix(&self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Ecr => "ecr.api",
            Self::EcrDocker => "ecr.dkr",
            Self::SecretsManager => "secretsmanager",
            Self::CloudwatchLogs => "logs",
        }
    }

    /// S3 is reached through a gateway endpoint, everything else through
    /// interface endpoints.
    pub fn is_gateway(&self) -> bool {
        matches!(self, Self::S3)
    }

    /// Logical ID of the endpoint resource.
    pub fn logical_id(&self) -> &'static str {
        match self {
            Self::S3 => "S3GatewayEndpoint",
            Self::Ecr => "EcrApiEndpoint",
            Self::EcrDocker => "EcrDockerEndpoint",
            Self::SecretsManager => "SecretsManagerEndpoint",
            Self::CloudwatchLogs => "CloudWatchLogsEndpoint",
        }
    }
}

// ============================================================================
// Database
// ============================================================================

/// Serverless relational cluster.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DatabaseConfig {
    /// Default database created in the cluster
    #[serde(default = "default_database_name")]
    pub name: String,

    #[serde(default)]
    pub engine: DatabaseEngine,

    /// Lower scaling bound in Aurora capacity units
    #[serde(default = "default_min_acu")]
    #[schemars(with = "u16")]
    pub min_capacity: CapacityUnit,

    /// Upper scaling bound in Aurora capacity units
    #[serde(default = "default_max_acu")]
    #[schemars(with = "u16")]
    pub max_capacity: CapacityUnit,

    /// Idle minutes before the cluster pauses
    #[serde(default = "default_auto_pause")]
    pub auto_pause_minutes: u32,

    #[serde(default = "default_backup_retention")]
    pub backup_retention_days: u32,

    /// Subnet group (must be isolated) the cluster is placed in
    #[serde(default = "default_isolated_group")]
    pub subnet_group: String,

    /// Cluster parameter group; engine default when unset
    #[serde(default)]
    pub parameter_group: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: default_database_name(),
            engine: DatabaseEngine::default(),
            min_capacity: default_min_acu(),
            max_capacity: default_max_acu(),
            auto_pause_minutes: default_auto_pause(),
            backup_retention_days: default_backup_retention(),
            subnet_group: default_isolated_group(),
            parameter_group: None,
        }
    }
}

fn default_database_name() -> String {
    "app_db".to_string()
}

fn default_min_acu() -> CapacityUnit {
    CapacityUnit::Acu2
}

fn default_max_acu() -> CapacityUnit {
    CapacityUnit::Acu4
}

fn default_auto_pause() -> u32 {
    30
}

fn default_backup_retention() -> u32 {
    1
}

fn default_isolated_group() -> String {
    "isolated".to_string()
}

/// Database engine kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseEngine {
    #[default]
    AuroraMysql,
    AuroraPostgresql,
}

impl DatabaseEngine {
    /// Engine name as the provisioning engine spells it.
    pub fn engine_name(&self) -> &'static str {
        match self {
            Self::AuroraMysql => "aurora-mysql",
            Self::AuroraPostgresql => "aurora-postgresql",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::AuroraMysql => 3306,
            Self::AuroraPostgresql => 5432,
        }
    }

    pub fn default_parameter_group(&self) -> &'static str {
        match self {
            Self::AuroraMysql => "default.aurora-mysql5.7",
            Self::AuroraPostgresql => "default.aurora-postgresql10",
        }
    }
}

/// Aurora Serverless capacity unit. Only these discrete sizes exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum CapacityUnit {
    Acu1,
    Acu2,
    Acu4,
    Acu8,
    Acu16,
    Acu32,
    Acu64,
    Acu128,
    Acu192,
    Acu256,
    Acu384,
}

impl CapacityUnit {
    pub const ALL: [CapacityUnit; 11] = [
        Self::Acu1,
        Self::Acu2,
        Self::Acu4,
        Self::Acu8,
        Self::Acu16,
        Self::Acu32,
        Self::Acu64,
        Self::Acu128,
        Self::Acu192,
        Self::Acu256,
        Self::Acu384,
    ];

    pub fn units(&self) -> u16 {
        match self {
            Self::Acu1 => 1,
            Self::Acu2 => 2,
            Self::Acu4 => 4,
            Self::Acu8 => 8,
            Self::Acu16 => 16,
            Self::Acu32 => 32,
            Self::Acu64 => 64,
            Self::Acu128 => 128,
            Self::Acu192 => 192,
            Self::Acu256 => 256,
            Self::Acu384 => 384,
        }
    }
}

impl TryFrom<u16> for CapacityUnit {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|u| u.units() == value)
            .ok_or_else(|| {
                format!(
                    "invalid capacity unit {}: expected one of 1, 2, 4, 8, 16, 32, 64, 128, 192, 256, 384",
                    value
                )
            })
    }
}

impl From<CapacityUnit> for u16 {
    fn from(unit: CapacityUnit) -> Self {
        unit.units()
    }
}

impl fmt::Display for CapacityUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ACU", self.units())
    }
}

/// Database scaling range. Construction guarantees `min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityRange {
    min: CapacityUnit,
    max: CapacityUnit,
}

impl CapacityRange {
    pub fn new(min: CapacityUnit, max: CapacityUnit) -> Result<Self, String> {
        if min > max {
            return Err(format!(
                "database min_capacity ({}) exceeds max_capacity ({})",
                min, max
            ));
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> CapacityUnit {
        self.min
    }

    pub fn max(&self) -> CapacityUnit {
        self.max
    }
}

// ============================================================================
// Secrets
// ============================================================================

/// Secrets exposed to the container as environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SecretsConfig {
    /// Env var that receives the generated application key
    #[serde(default = "default_app_key")]
    pub app_key: String,

    /// Secret name prefix for the generated application key
    #[serde(default = "default_app_key_name")]
    pub app_key_name: String,

    /// Externally managed secrets, imported by name
    #[serde(default)]
    pub external: IndexMap<String, ExternalSecret>,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            app_key: default_app_key(),
            app_key_name: default_app_key_name(),
            external: IndexMap::new(),
        }
    }
}

fn default_app_key() -> String {
    "SECRET_KEY".to_string()
}

fn default_app_key_name() -> String {
    "AppSecretKey".to_string()
}

/// A secret that already exists in the secret store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExternalSecret {
    /// Secret name in the store
    pub name: String,

    /// JSON field inside the secret; whole value when unset
    #[serde(default)]
    pub field: Option<String>,
}

// ============================================================================
// Service
// ============================================================================

/// Load-balanced, auto-scaled container service.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ServiceConfig {
    /// Task CPU units (256 = 0.25 vCPU)
    #[serde(default = "default_cpu")]
    pub cpu: u32,

    /// Task memory in MiB
    #[serde(default = "default_memory")]
    pub memory_mib: u32,

    #[serde(default = "default_desired")]
    pub desired_count: u32,

    #[serde(default = "default_min_tasks")]
    pub min_capacity: u32,

    #[serde(default = "default_max_tasks")]
    pub max_capacity: u32,

    #[serde(default = "default_container_name")]
    pub container_name: String,

    #[serde(default = "default_container_port")]
    pub container_port: u16,

    /// Public listener port on the load balancer
    #[serde(default = "default_listener_port")]
    pub listener_port: u16,

    #[serde(default)]
    pub health_check: HealthCheck,

    /// Average CPU utilization the scaling policy tracks
    #[serde(default = "default_cpu_target")]
    pub cpu_target_percent: u8,

    /// Either `registry: { uri }` or `asset: { directory, dockerfile }`
    #[serde(default, with = "serde_yaml_ng::with::singleton_map")]
    #[schemars(with = "ImageSource")]
    pub image: ImageSource,

    /// Subnet group (isolated) the tasks run in
    #[serde(default = "default_isolated_group")]
    pub subnet_group: String,

    /// Subnet group (public) the load balancer is placed in
    #[serde(default = "default_public_group")]
    pub load_balancer_subnet_group: String,

    #[serde(default = "default_platform_version")]
    pub platform_version: String,

    /// Container log retention in days
    #[serde(default = "default_log_retention")]
    pub log_retention_days: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cpu: default_cpu(),
            memory_mib: default_memory(),
            desired_count: default_desired(),
            min_capacity: default_min_tasks(),
            max_capacity: default_max_tasks(),
            container_name: default_container_name(),
            container_port: default_container_port(),
            listener_port: default_listener_port(),
            health_check: HealthCheck::default(),
            cpu_target_percent: default_cpu_target(),
            image: ImageSource::default(),
            subnet_group: default_isolated_group(),
            load_balancer_subnet_group: default_public_group(),
            platform_version: default_platform_version(),
            log_retention_days: default_log_retention(),
        }
    }
}

fn default_cpu() -> u32 {
    256
}

fn default_memory() -> u32 {
    1024
}

fn default_desired() -> u32 {
    2
}

fn default_min_tasks() -> u32 {
    2
}

fn default_max_tasks() -> u32 {
    4
}

fn default_container_name() -> String {
    "app".to_string()
}

fn default_container_port() -> u16 {
    8000
}

fn default_listener_port() -> u16 {
    80
}

fn default_cpu_target() -> u8 {
    75
}

fn default_public_group() -> String {
    "public".to_string()
}

fn default_platform_version() -> String {
    "1.4.0".to_string()
}

fn default_log_retention() -> u32 {
    1
}

/// Target-group health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HealthCheck {
    #[serde(default = "default_health_path")]
    pub path: String,
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u8,
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u8,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            healthy_threshold: default_healthy_threshold(),
            unhealthy_threshold: default_unhealthy_threshold(),
        }
    }
}

fn default_health_path() -> String {
    "/health_check/".to_string()
}

fn default_healthy_threshold() -> u8 {
    3
}

fn default_unhealthy_threshold() -> u8 {
    2
}

/// Where the container image comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    /// Prebuilt image in a registry
    Registry { uri: String },
    /// Local build context, published by the deployment tooling
    Asset {
        directory: String,
        #[serde(default = "default_dockerfile")]
        dockerfile: String,
    },
}

impl Default for ImageSource {
    fn default() -> Self {
        Self::Asset {
            directory: "app/".to_string(),
            dockerfile: default_dockerfile(),
        }
    }
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

/// Task count bounds. Construction guarantees `min <= desired <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingBounds {
    min: u32,
    desired: u32,
    max: u32,
}

impl ScalingBounds {
    pub fn new(min: u32, desired: u32, max: u32) -> Result<Self, String> {
        if max == 0 {
            return Err("service max_capacity must be at least 1".to_string());
        }
        if min > max {
            return Err(format!(
                "service min_capacity ({}) exceeds max_capacity ({})",
                min, max
            ));
        }
        if desired < min || desired > max {
            return Err(format!(
                "service desired_count ({}) outside [{}, {}]",
                desired, min, max
            ));
        }
        Ok(Self { min, desired, max })
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn desired(&self) -> u32 {
        self.desired
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}

// ============================================================================
// Templates
// ============================================================================

/// Resource removal behaviour on stack deletion or replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RemovalPolicy {
    Delete,
    Retain,
    Snapshot,
}

/// A single declared resource inside a stack template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateResource {
    #[serde(rename = "Type")]
    pub resource_type: String,

    #[serde(rename = "Properties")]
    pub properties: serde_json::Value,

    #[serde(rename = "DependsOn", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(rename = "DeletionPolicy", skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<RemovalPolicy>,

    #[serde(rename = "UpdateReplacePolicy", skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<RemovalPolicy>,
}

impl TemplateResource {
    pub fn new(resource_type: &str, properties: serde_json::Value) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            properties,
            depends_on: Vec::new(),
            deletion_policy: None,
            update_replace_policy: None,
        }
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.depends_on = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn removal(mut self, policy: RemovalPolicy) -> Self {
        self.deletion_policy = Some(policy);
        self.update_replace_policy = Some(policy);
        self
    }
}

/// A stack output, optionally exported for cross-stack import.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateOutput {
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "Value")]
    pub value: serde_json::Value,

    #[serde(rename = "Export", skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportName>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportName {
    #[serde(rename = "Name")]
    pub name: String,
}

/// One deployable stack: resources, outputs, and stack-level dependencies.
#[derive(Debug, Clone, PartialEq)]
pub struct StackTemplate {
    pub name: String,
    pub description: String,
    pub resources: IndexMap<String, TemplateResource>,
    pub outputs: IndexMap<String, TemplateOutput>,
    /// Stacks that must deploy first (filled in by the resolver)
    pub dependencies: Vec<String>,
}

impl StackTemplate {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            resources: IndexMap::new(),
            outputs: IndexMap::new(),
            dependencies: Vec::new(),
        }
    }

    /// Add a resource. Logical IDs are unique within a stack.
    pub fn add(&mut self, id: &str, resource: TemplateResource) -> Result<(), String> {
        if self.resources.contains_key(id) {
            return Err(format!(
                "stack '{}' declares resource '{}' twice",
                self.name, id
            ));
        }
        self.resources.insert(id.to_string(), resource);
        Ok(())
    }

    /// Add an output; `export` publishes it under that name. Keys are unique.
    pub fn output(
        &mut self,
        key: &str,
        value: serde_json::Value,
        export: Option<String>,
        description: &str,
    ) -> Result<(), String> {
        if self.outputs.contains_key(key) {
            return Err(format!(
                "stack '{}' declares output '{}' twice",
                self.name, key
            ));
        }
        self.outputs.insert(
            key.to_string(),
            TemplateOutput {
                description: Some(description.to_string()),
                value,
                export: export.map(|name| ExportName { name }),
            },
        );
        Ok(())
    }

    /// Export names this stack publishes.
    pub fn exports(&self) -> impl Iterator<Item = &str> {
        self.outputs
            .values()
            .filter_map(|o| o.export.as_ref().map(|e| e.name.as_str()))
    }

    /// Build the template document (keys are emitted sorted).
    pub fn to_document(&self) -> Result<serde_json::Value, String> {
        let mut resources = serde_json::Map::new();
        for (id, resource) in &self.resources {
            let value = serde_json::to_value(resource)
                .map_err(|e| format!("cannot serialize {}/{}: {}", self.name, id, e))?;
            resources.insert(id.clone(), value);
        }
        let mut doc = serde_json::Map::new();
        doc.insert(
            "AWSTemplateFormatVersion".to_string(),
            serde_json::Value::String("2010-09-09".to_string()),
        );
        doc.insert(
            "Description".to_string(),
            serde_json::Value::String(self.description.clone()),
        );
        doc.insert("Resources".to_string(), serde_json::Value::Object(resources));
        if !self.outputs.is_empty() {
            let mut outputs = serde_json::Map::new();
            for (key, output) in &self.outputs {
                let value = serde_json::to_value(output)
                    .map_err(|e| format!("cannot serialize output {}: {}", key, e))?;
                outputs.insert(key.clone(), value);
            }
            doc.insert("Outputs".to_string(), serde_json::Value::Object(outputs));
        }
        Ok(serde_json::Value::Object(doc))
    }

    /// Render the template as pretty JSON with a trailing newline.
    pub fn render(&self) -> Result<String, String> {
        let doc = self.to_document()?;
        let mut json = serde_json::to_string_pretty(&doc)
            .map_err(|e| format!("cannot render stack {}: {}", self.name, e))?;
        json.push('\n');
        Ok(json)
    }
}

// ============================================================================
// Assembly
// ============================================================================

/// A container image built from a local directory by the deployment tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAsset {
    /// Build context, relative to the config file
    pub directory: String,
    pub dockerfile: String,
    /// BLAKE3 of the build context
    pub hash: String,
    /// Registry URI the image is published to
    pub image_uri: String,
}

/// Everything synthesis produced, ready to be written out.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudAssembly {
    pub name: String,
    pub environment: Environment,
    pub stacks: IndexMap<String, StackTemplate>,
    /// Deployment order (stack names)
    pub order: Vec<String>,
    pub assets: Vec<ImageAsset>,
}

// ============================================================================
// Manifest
// ============================================================================

/// The manifest written next to the templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyManifest {
    pub schema: String,
    pub generator: String,
    pub name: String,
    pub account: String,
    pub region: String,
    /// Composite hash of every stack hash, in deployment order
    pub fingerprint: String,
    pub order: Vec<String>,
    pub stacks: IndexMap<String, StackManifest>,
    #[serde(default)]
    pub assets: Vec<ImageAsset>,
}

/// Per-stack manifest entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackManifest {
    /// Template file name inside the output directory
    pub template: String,
    /// BLAKE3 of the rendered template bytes
    pub hash: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub resources: IndexMap<String, ResourceEntry>,
}

/// Per-resource manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub hash: String,
}

// ============================================================================
// Plan
// ============================================================================

/// Action the deployment engine would take on a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    Destroy,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Destroy => write!(f, "DESTROY"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub stack: String,
    pub logical_id: String,
    pub resource_type: String,
    pub action: PlanAction,
    pub description: String,
}

/// Difference between a synthesized assembly and the previous manifest.
#[derive(Debug, Clone)]
pub struct ChangePlan {
    pub name: String,
    pub changes: Vec<PlannedChange>,
    pub stack_order: Vec<String>,
    pub to_create: u32,
    pub to_update: u32,
    pub to_destroy: u32,
    pub unchanged: u32,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_st001_config_parse() {
        let yaml = r#"
version: "1.0"
name: django-todo
network:
  cidr: 10.1.0.0/16
  max_azs: 3
database:
  name: todo
  min_capacity: 1
  max_capacity: 2
  auto_pause_minutes: 60
secrets:
  external:
    AWS_ACCESS_KEY_ID:
      name: AwsApiKeyId
service:
  cpu: 256
  memory_mib: 512
  min_capacity: 1
  max_capacity: 2
  image:
    registry:
      uri: nginx:latest
"#;
        let config: StratusConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.name, "django-todo");
        assert_eq!(config.network.max_azs, 3);
        assert_eq!(config.database.min_capacity, CapacityUnit::Acu1);
        assert_eq!(config.database.max_capacity, CapacityUnit::Acu2);
        assert_eq!(config.secrets.external["AWS_ACCESS_KEY_ID"].name, "AwsApiKeyId");
        assert_eq!(
            config.service.image,
            ImageSource::Registry {
                uri: "nginx:latest".to_string()
            }
        );
    }

    #[test]
    fn test_st001_image_asset_map_shape() {
        let yaml = r#"
cpu: 256
image: { asset: { directory: app/ } }
"#;
        let service: ServiceConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(service.image, ImageSource::default());

        let out = serde_yaml_ng::to_string(&service).unwrap();
        assert!(out.contains("image:\n  asset:"), "{}", out);
        let back: ServiceConfig = serde_yaml_ng::from_str(&out).unwrap();
        assert_eq!(back.image, service.image);
    }

    #[test]
    fn test_st001_minimal_config_defaults() {
        let yaml = r#"
version: "1.0"
name: app
"#;
        let config: StratusConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.network.cidr, "10.0.0.0/16");
        assert_eq!(config.network.max_azs, 2);
        assert_eq!(config.network.subnets.len(), 2);
        assert_eq!(config.network.endpoints.len(), 5);
        assert_eq!(config.database.engine, DatabaseEngine::AuroraMysql);
        assert_eq!(config.database.auto_pause_minutes, 30);
        assert_eq!(config.database.backup_retention_days, 1);
        assert_eq!(config.service.cpu, 256);
        assert_eq!(config.service.memory_mib, 1024);
        assert_eq!(config.service.container_port, 8000);
        assert_eq!(config.service.health_check.path, "/health_check/");
        assert_eq!(config.service.cpu_target_percent, 75);
        assert_eq!(config.secrets.app_key, "SECRET_KEY");
    }

    #[test]
    fn test_st001_capacity_unit_rejects_unknown_size() {
        let yaml = r#"
min_capacity: 3
"#;
        let result: Result<DatabaseConfig, _> = serde_yaml_ng::from_str(yaml);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("invalid capacity unit 3"), "{}", err);
    }

    #[test]
    fn test_st001_capacity_unit_ordering() {
        assert!(CapacityUnit::Acu1 < CapacityUnit::Acu2);
        assert!(CapacityUnit::Acu256 < CapacityUnit::Acu384);
        assert_eq!(CapacityUnit::Acu192.to_string(), "192 ACU");
        assert_eq!(u16::from(CapacityUnit::Acu64), 64);
    }

    #[test]
    fn test_st001_capacity_range() {
        assert!(CapacityRange::new(CapacityUnit::Acu1, CapacityUnit::Acu2).is_ok());
        assert!(CapacityRange::new(CapacityUnit::Acu2, CapacityUnit::Acu2).is_ok());
        let err = CapacityRange::new(CapacityUnit::Acu8, CapacityUnit::Acu2).unwrap_err();
        assert!(err.contains("exceeds"));
    }

    #[test]
    fn test_st001_scaling_bounds() {
        let b = ScalingBounds::new(1, 2, 2).unwrap();
        assert_eq!((b.min(), b.desired(), b.max()), (1, 2, 2));
        assert!(ScalingBounds::new(3, 3, 2).is_err());
        assert!(ScalingBounds::new(1, 5, 4).is_err());
        assert!(ScalingBounds::new(0, 0, 0).is_err());
    }

    #[test]
    fn test_st001_endpoint_service_kinds() {
        assert!(EndpointService::S3.is_gateway());
        assert!(!EndpointService::Ecr.is_gateway());
        assert_eq!(EndpointService::EcrDocker.service_suffix(), "ecr.dkr");
        assert_eq!(EndpointService::CloudwatchLogs.service_suffix(), "logs");
    }

    #[test]
    fn test_st001_template_rejects_duplicate_id() {
        let mut stack = StackTemplate::new("Network", "test");
        stack
            .add("Vpc", TemplateResource::new("AWS::EC2::VPC", serde_json::json!({})))
            .unwrap();
        let err = stack
            .add("Vpc", TemplateResource::new("AWS::EC2::VPC", serde_json::json!({})))
            .unwrap_err();
        assert!(err.contains("twice"));
    }

    #[test]
    fn test_st001_template_rejects_duplicate_output() {
        let mut stack = StackTemplate::new("Network", "net");
        stack
            .output("VpcId", serde_json::json!({"Ref": "Vpc"}), None, "vpc")
            .unwrap();
        let err = stack
            .output("VpcId", serde_json::json!({"Ref": "Other"}), None, "other")
            .unwrap_err();
        assert!(err.contains("declares output 'VpcId' twice"), "{}", err);
        assert_eq!(stack.outputs["VpcId"].value, serde_json::json!({"Ref": "Vpc"}));
    }

    #[test]
    fn test_st001_template_render_shape() {
        let mut stack = StackTemplate::new("Database", "db stack");
        stack
            .add(
                "Log",
                TemplateResource::new(
                    "AWS::Logs::LogGroup",
                    serde_json::json!({"RetentionInDays": 1}),
                )
                .removal(RemovalPolicy::Delete),
            )
            .unwrap();
        stack
            .output(
                "LogName",
                serde_json::json!({"Ref": "Log"}),
                Some("app-Database-LogName".to_string()),
                "log group",
            )
            .unwrap();
        let doc = stack.to_document().unwrap();
        assert_eq!(doc["AWSTemplateFormatVersion"], "2010-09-09");
        assert_eq!(doc["Resources"]["Log"]["Type"], "AWS::Logs::LogGroup");
        assert_eq!(doc["Resources"]["Log"]["DeletionPolicy"], "Delete");
        assert!(doc["Resources"]["Log"].get("DependsOn").is_none());
        assert_eq!(
            doc["Outputs"]["LogName"]["Export"]["Name"],
            "app-Database-LogName"
        );
        assert!(stack.render().unwrap().ends_with('\n'));
        assert_eq!(stack.exports().collect::<Vec<_>>(), vec!["app-Database-LogName"]);
    }

    #[test]
    fn test_st001_plan_action_display() {
        assert_eq!(PlanAction::Create.to_string(), "CREATE");
        assert_eq!(PlanAction::NoOp.to_string(), "NO-OP");
    }

    #[test]
    fn test_st001_manifest_roundtrip() {
        let manifest = AssemblyManifest {
            schema: "1.0".to_string(),
            generator: "stratus 0.3.0".to_string(),
            name: "app".to_string(),
            account: "123456789012".to_string(),
            region: "us-east-1".to_string(),
            fingerprint: "blake3:abc".to_string(),
            order: vec!["Network".to_string()],
            stacks: IndexMap::from([(
                "Network".to_string(),
                StackManifest {
                    template: "Network.template.json".to_string(),
                    hash: "blake3:def".to_string(),
                    depends_on: vec![],
                    resources: IndexMap::from([(
                        "Vpc".to_string(),
                        ResourceEntry {
                            resource_type: "AWS::EC2::VPC".to_string(),
                            hash: "blake3:123".to_string(),
                        },
                    )]),
                },
            )]),
            assets: vec![],
        };
        let yaml = serde_yaml_ng::to_string(&manifest).unwrap();
        let back: AssemblyManifest = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(back, manifest);
        assert!(yaml.contains("type: AWS::EC2::VPC"));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_capacity_unit_accepts_only_listed_sizes(value in 0u16..=400) {
                let listed = CapacityUnit::ALL.iter().any(|u| u.units() == value);
                prop_assert_eq!(CapacityUnit::try_from(value).is_ok(), listed);
            }

            #[test]
            fn prop_capacity_range_ordered(a in 0usize..11, b in 0usize..11) {
                let (lo, hi) = (CapacityUnit::ALL[a], CapacityUnit::ALL[b]);
                let range = CapacityRange::new(lo, hi);
                prop_assert_eq!(range.is_ok(), a <= b);
                if let Ok(r) = range {
                    prop_assert!(r.min() <= r.max());
                }
            }

            #[test]
            fn prop_scaling_bounds_hold(min in 0u32..8, desired in 0u32..8, max in 0u32..8) {
                if let Ok(b) = ScalingBounds::new(min, desired, max) {
                    prop_assert!(b.min() <= b.desired());
                    prop_assert!(b.desired() <= b.max());
                    prop_assert!(b.max() >= 1);
                }
            }
        }
    }
}

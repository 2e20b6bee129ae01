//! Definition units — each builds one stack template plus a handle that
//! downstream units consume.
//!
//! Control flow is fixed: network → database → secrets → service. Handles
//! carry cross-stack values as `Fn::ImportValue` expressions, so the
//! resolver can derive stack ordering from the templates themselves.

pub mod database;
pub mod network;
pub mod secrets;
pub mod service;

use crate::core::cidr::Ipv4Cidr;
use crate::core::env::Environment;
use crate::core::types::SubnetKind;
use indexmap::IndexMap;
use serde_json::{json, Value};

pub const NETWORK_STACK: &str = "Network";
pub const DATABASE_STACK: &str = "Database";
pub const SECRETS_STACK: &str = "Secrets";
pub const SERVICE_STACK: &str = "AppService";

/// Naming context shared by every definition unit.
#[derive(Debug, Clone)]
pub struct StackContext<'a> {
    /// Application name (stack/export prefix)
    pub app: &'a str,
    pub env: &'a Environment,
}

impl StackContext<'_> {
    /// Export name for `stack`'s output `key`.
    pub fn export_name(&self, stack: &str, key: &str) -> String {
        format!("{}-{}-{}", self.app, stack, key)
    }

    /// Standard `Name` tag plus the application tag.
    pub fn tags(&self, stack: &str, id: &str) -> Value {
        json!([
            {"Key": "Name", "Value": format!("{}/{}/{}", self.app, stack, id)},
            {"Key": "stratus:app", "Value": self.app},
        ])
    }
}

/// `{"Ref": id}`
pub fn reference(id: &str) -> Value {
    json!({ "Ref": id })
}

/// `{"Fn::GetAtt": [id, attr]}`
pub fn get_att(id: &str, attr: &str) -> Value {
    json!({ "Fn::GetAtt": [id, attr] })
}

/// `{"Fn::ImportValue": export}`
pub fn import_value(export: &str) -> Value {
    json!({ "Fn::ImportValue": export })
}

/// `{"Fn::Join": ["", parts]}`
pub fn join(parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": ["", parts] })
}

/// Convert `kebab-or_snake` names to `PascalCase` for logical IDs.
pub fn pascal_case(name: &str) -> String {
    name.split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Subnets of one group as seen by consumers of the network.
#[derive(Debug, Clone)]
pub struct SubnetGroupHandle {
    pub name: String,
    pub kind: SubnetKind,
    /// One CIDR per availability zone
    pub cidrs: Vec<Ipv4Cidr>,
    /// Comma-joined subnet IDs, imported from the network stack
    pub ids_export: String,
}

impl SubnetGroupHandle {
    /// Subnet ID list as an imported value.
    pub fn ids(&self) -> Value {
        json!({ "Fn::Split": [",", import_value(&self.ids_export)] })
    }
}

/// What the network definition hands to downstream units.
#[derive(Debug, Clone)]
pub struct NetworkHandle {
    pub vpc_id_export: String,
    pub cidr: Ipv4Cidr,
    pub groups: IndexMap<String, SubnetGroupHandle>,
    pub cluster_export: String,
    pub availability_zones: u8,
}

impl NetworkHandle {
    pub fn vpc_id(&self) -> Value {
        import_value(&self.vpc_id_export)
    }

    pub fn cluster(&self) -> Value {
        import_value(&self.cluster_export)
    }

    /// Select a subnet group by name, enforcing its kind.
    ///
    /// Selection never resolves outside the declared network.
    pub fn select(&self, name: &str, kind: SubnetKind) -> Result<&SubnetGroupHandle, String> {
        let group = self
            .groups
            .get(name)
            .ok_or_else(|| format!("network has no subnet group '{}'", name))?;
        if group.kind != kind {
            return Err(format!(
                "subnet group '{}' is {}, expected {}",
                name, group.kind, kind
            ));
        }
        if let Some(stray) = group.cidrs.iter().find(|c| !self.cidr.contains(c)) {
            return Err(format!(
                "subnet {} of group '{}' lies outside {}",
                stray, name, self.cidr
            ));
        }
        Ok(group)
    }
}

/// Where a secret value lives in the secret store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    /// Secret declared in this assembly; its ARN is exported under this name
    Export(String),
    /// Secret that already exists in the store, addressed by name
    Named(String),
}

/// A pointer into the secret store, resolved only at deploy time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRef {
    pub source: SecretSource,
    /// JSON field inside the secret; whole value when `None`
    pub field: Option<String>,
}

impl SecretRef {
    pub fn field(source: SecretSource, field: &str) -> Self {
        Self {
            source,
            field: Some(field.to_string()),
        }
    }

    /// ARN expression for the whole secret.
    pub fn arn(&self, env: &Environment) -> Value {
        match &self.source {
            SecretSource::Export(export) => import_value(export),
            SecretSource::Named(name) => Value::String(env.secret_arn(name)),
        }
    }

    /// IAM resource pattern covering the secret (named secrets carry a
    /// random six-character suffix in their real ARN).
    pub fn policy_resource(&self, env: &Environment) -> Value {
        match &self.source {
            SecretSource::Export(export) => import_value(export),
            SecretSource::Named(name) => Value::String(format!("{}-??????", env.secret_arn(name))),
        }
    }

    /// `ValueFrom` for a container secret: `<arn>:<field>::` when a field is
    /// selected.
    pub fn value_from(&self, env: &Environment) -> Value {
        match (&self.source, &self.field) {
            (_, None) => self.arn(env),
            (SecretSource::Export(_), Some(field)) => join(vec![
                self.arn(env),
                Value::String(format!(":{}::", field)),
            ]),
            (SecretSource::Named(name), Some(field)) => {
                Value::String(format!("{}:{}::", env.secret_arn(name), field))
            }
        }
    }
}

/// Ordered env-var name → secret reference mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretSet {
    entries: IndexMap<String, SecretRef>,
}

impl SecretSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a mapping. Names are unique.
    pub fn insert(&mut self, name: &str, secret: SecretRef) -> Result<(), String> {
        if self.entries.contains_key(name) {
            return Err(format!("secret '{}' mapped twice", name));
        }
        self.entries.insert(name.to_string(), secret);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&SecretRef> {
        self.entries.get(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SecretRef)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct secret sources, in first-use order.
    pub fn sources(&self) -> Vec<&SecretSource> {
        let mut out: Vec<&SecretSource> = Vec::new();
        for secret in self.entries.values() {
            if !out.contains(&&secret.source) {
                out.push(&secret.source);
            }
        }
        out
    }
}

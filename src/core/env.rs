//! ST-006: Target account/region context.
//!
//! Replaces an implicit process-wide provider context with an explicit
//! `Environment` value handed to every definition unit. Resolution order is
//! CLI override, then `CDK_DEFAULT_ACCOUNT` / `CDK_DEFAULT_REGION`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable selecting the target account.
pub const ACCOUNT_VAR: &str = "CDK_DEFAULT_ACCOUNT";

/// Environment variable selecting the target region.
pub const REGION_VAR: &str = "CDK_DEFAULT_REGION";

/// Account/region resolution failures. Raised before anything is synthesized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    #[error("{var} is not set (export it or pass --{flag})")]
    Missing {
        var: &'static str,
        flag: &'static str,
    },

    #[error("invalid account id '{0}': expected 12 digits")]
    InvalidAccount(String),

    #[error("invalid region '{0}': expected a region code such as us-east-1")]
    InvalidRegion(String),
}

/// Deployment target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub account: String,
    pub region: String,
}

impl Environment {
    /// Build a validated environment.
    pub fn new(account: &str, region: &str) -> Result<Self, EnvError> {
        let account = account.trim();
        let region = region.trim();
        if !matches_pattern(r"^\d{12}$", account) {
            return Err(EnvError::InvalidAccount(account.to_string()));
        }
        if !matches_pattern(r"^[a-z]{2}(-gov|-iso[a-z]?)?-[a-z]+-\d{1,2}$", region) {
            return Err(EnvError::InvalidRegion(region.to_string()));
        }
        Ok(Self {
            account: account.to_string(),
            region: region.to_string(),
        })
    }

    /// Resolve from overrides, falling back to the process environment.
    pub fn resolve(account: Option<&str>, region: Option<&str>) -> Result<Self, EnvError> {
        Self::resolve_with(account, region, |var| std::env::var(var).ok())
    }

    /// Resolve with an injectable variable lookup.
    pub fn resolve_with<F>(
        account: Option<&str>,
        region: Option<&str>,
        lookup: F,
    ) -> Result<Self, EnvError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let account = pick(account, &lookup, ACCOUNT_VAR).ok_or(EnvError::Missing {
            var: ACCOUNT_VAR,
            flag: "account",
        })?;
        let region = pick(region, &lookup, REGION_VAR).ok_or(EnvError::Missing {
            var: REGION_VAR,
            flag: "region",
        })?;
        Self::new(&account, &region)
    }

    /// `com.amazonaws.<region>.<suffix>` service name for VPC endpoints.
    pub fn endpoint_service_name(&self, suffix: &str) -> String {
        format!("com.amazonaws.{}.{}", self.region, suffix)
    }

    /// Partial ARN of a secret addressed by name.
    pub fn secret_arn(&self, name: &str) -> String {
        format!(
            "arn:aws:secretsmanager:{}:{}:secret:{}",
            self.region, self.account, name
        )
    }

    /// Registry host for images published into this account.
    pub fn registry_host(&self) -> String {
        format!("{}.dkr.ecr.{}.amazonaws.com", self.account, self.region)
    }
}

fn pick<F>(explicit: Option<&str>, lookup: &F, var: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let present = |v: &String| !v.trim().is_empty();
    explicit
        .map(str::to_string)
        .filter(present)
        .or_else(|| lookup(var).filter(present))
}

fn matches_pattern(pattern: &str, value: &str) -> bool {
    Regex::new(pattern)
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

//! ST-010: Secrets definition — env-var name to secret-store field mapping.
//!
//! Merges a generated application key with the database credentials and
//! any externally managed secrets. Nothing here reads a secret value.

use super::database::DatabaseHandle;
use super::{reference, SecretRef, SecretSet, SecretSource, StackContext};
use crate::core::parser::REQUIRED_DB_SECRET_KEYS;
use crate::core::types::{RemovalPolicy, SecretsConfig, StackTemplate, TemplateResource};
use crate::tripwire::hasher;
use serde_json::json;
use tracing::{info, warn};

/// Field of the generated application key secret holding the key.
pub const APP_KEY_FIELD: &str = "SecretKey";

const APP_KEY_ID: &str = "AppKeySecret";

/// Database env var → field inside the credentials secret.
const DB_FIELDS: [(&str, &str); 5] = [
    ("HOST", "host"),
    ("PORT", "port"),
    ("DB_NAME", "dbname"),
    ("USERNAME", "username"),
    ("PASSWORD", "password"),
];

/// Build the secrets stack and the mapping the service consumes.
pub fn build(
    ctx: &StackContext,
    config: &SecretsConfig,
    database: &DatabaseHandle,
) -> Result<(StackTemplate, SecretSet), String> {
    let stack_name = super::SECRETS_STACK;
    let mut stack = StackTemplate::new(
        stack_name,
        &format!("{} secrets: generated application key", ctx.app),
    );

    let secret_name = app_key_secret_name(ctx, &config.app_key_name);
    stack.add(
        APP_KEY_ID,
        TemplateResource::new(
            "AWS::SecretsManager::Secret",
            json!({
                "Name": secret_name,
                "Description": format!("{} application key", ctx.app),
                "GenerateSecretString": {
                    "SecretStringTemplate": "{}",
                    "GenerateStringKey": APP_KEY_FIELD,
                    "ExcludePunctuation": true,
                },
                "Tags": ctx.tags(stack_name, APP_KEY_ID),
            }),
        )
        .removal(RemovalPolicy::Delete),
    )?;

    let key_export = ctx.export_name(stack_name, "AppKeySecretArn");
    stack.output(
        "AppKeySecretArn",
        reference(APP_KEY_ID),
        Some(key_export.clone()),
        "Generated application key secret",
    )?;
    stack.output(
        "DatabaseCredentialsArn",
        SecretRef {
            source: database.credentials.clone(),
            field: None,
        }
        .arn(ctx.env),
        None,
        "Database credentials the mapping draws from",
    )?;

    let mut set = SecretSet::new();
    set.insert(
        &config.app_key,
        SecretRef::field(SecretSource::Export(key_export), APP_KEY_FIELD),
    )?;
    for (var, field) in DB_FIELDS {
        set.insert(var, SecretRef::field(database.credentials.clone(), field))?;
    }
    for (var, external) in &config.external {
        warn!(
            var = %var,
            secret = %external.name,
            "external secret must exist in the store before deployment"
        );
        set.insert(
            var,
            SecretRef {
                source: SecretSource::Named(external.name.clone()),
                field: external.field.clone(),
            },
        )?;
    }

    check_mapping(&set, config)?;

    info!(
        stack = stack_name,
        secret = %secret_name,
        mapped = set.len(),
        "secrets definition built"
    );

    Ok((stack, set))
}

/// The mapping must hold exactly the app key, the database keys and the
/// declared external secrets.
fn check_mapping(set: &SecretSet, config: &SecretsConfig) -> Result<(), String> {
    let mut expected: Vec<&str> = vec![config.app_key.as_str()];
    expected.extend(REQUIRED_DB_SECRET_KEYS);
    expected.extend(config.external.keys().map(String::as_str));
    expected.sort_unstable();

    let mut actual: Vec<&str> = set.keys().collect();
    actual.sort_unstable();

    if actual != expected {
        let missing: Vec<&str> = expected
            .iter()
            .filter(|k| !actual.contains(k))
            .copied()
            .collect();
        let extra: Vec<&str> = actual
            .iter()
            .filter(|k| !expected.contains(k))
            .copied()
            .collect();
        return Err(format!(
            "secret mapping mismatch: missing [{}], unexpected [{}]",
            missing.join(", "),
            extra.join(", ")
        ));
    }
    Ok(())
}

/// Secret name for the application key: the configured prefix plus a
/// six-character suffix stable for a given app, account and region.
pub fn app_key_secret_name(ctx: &StackContext, prefix: &str) -> String {
    let hash = hasher::composite_hash(&[
        ctx.app,
        ctx.env.account.as_str(),
        ctx.env.region.as_str(),
        prefix,
    ]);
    let suffix: String = hasher::hex_digest(&hash)
        .chars()
        .take(6)
        .collect::<String>()
        .to_uppercase();
    format!("{}{}", prefix, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::env::Environment;
    use crate::core::types::{DatabaseEngine, ExternalSecret};

    fn db() -> DatabaseHandle {
        DatabaseHandle {
            credentials: SecretSource::Export("todo-Database-CredentialsSecretArn".into()),
            engine: DatabaseEngine::AuroraMysql,
            port: 3306,
            endpoint_export: "todo-Database-ClusterEndpoint".into(),
        }
    }

    fn env() -> Environment {
        Environment::new("123456789012", "us-east-1").unwrap()
    }

    #[test]
    fn test_st010_default_mapping_keys() {
        let env = env();
        let ctx = StackContext { app: "todo", env: &env };
        let (_, set) = build(&ctx, &SecretsConfig::default(), &db()).unwrap();
        let keys: Vec<&str> = set.keys().collect();
        assert_eq!(
            keys,
            vec!["SECRET_KEY", "HOST", "PORT", "DB_NAME", "USERNAME", "PASSWORD"]
        );
    }

    #[test]
    fn test_st010_db_fields_point_at_credentials() {
        let env = env();
        let ctx = StackContext { app: "todo", env: &env };
        let (_, set) = build(&ctx, &SecretsConfig::default(), &db()).unwrap();
        let host = set.get("HOST").unwrap();
        assert_eq!(host.source, db().credentials);
        assert_eq!(host.field.as_deref(), Some("host"));
        assert_eq!(set.get("DB_NAME").unwrap().field.as_deref(), Some("dbname"));
    }

    #[test]
    fn test_st010_app_key_secret() {
        let env = env();
        let ctx = StackContext { app: "todo", env: &env };
        let (stack, set) = build(&ctx, &SecretsConfig::default(), &db()).unwrap();
        let secret = &stack.resources[APP_KEY_ID];
        let name = secret.properties["Name"].as_str().unwrap();
        assert!(name.starts_with("AppSecretKey"));
        assert_eq!(name.len(), "AppSecretKey".len() + 6);
        assert_eq!(
            secret.properties["GenerateSecretString"]["GenerateStringKey"],
            APP_KEY_FIELD
        );
        let key = set.get("SECRET_KEY").unwrap();
        assert_eq!(
            key.source,
            SecretSource::Export("todo-Secrets-AppKeySecretArn".into())
        );
    }

    #[test]
    fn test_st010_imports_database_credentials() {
        let env = env();
        let ctx = StackContext { app: "todo", env: &env };
        let (stack, _) = build(&ctx, &SecretsConfig::default(), &db()).unwrap();
        assert_eq!(
            stack.outputs["DatabaseCredentialsArn"].value,
            json!({"Fn::ImportValue": "todo-Database-CredentialsSecretArn"})
        );
    }

    #[test]
    fn test_st010_secret_name_deterministic() {
        let env = env();
        let ctx = StackContext { app: "todo", env: &env };
        let a = app_key_secret_name(&ctx, "AppSecretKey");
        let b = app_key_secret_name(&ctx, "AppSecretKey");
        assert_eq!(a, b);
        let other = Environment::new("123456789012", "eu-west-1").unwrap();
        let ctx2 = StackContext { app: "todo", env: &other };
        assert_ne!(a, app_key_secret_name(&ctx2, "AppSecretKey"));
    }

    #[test]
    fn test_st010_external_secrets_appended() {
        let env = env();
        let ctx = StackContext { app: "todo", env: &env };
        let mut config = SecretsConfig::default();
        config.external.insert(
            "AWS_API_KEY_ID".into(),
            ExternalSecret {
                name: "AwsApiKeyId".into(),
                field: None,
            },
        );
        let (stack, set) = build(&ctx, &config, &db()).unwrap();
        assert_eq!(set.len(), 7);
        assert_eq!(
            set.get("AWS_API_KEY_ID").unwrap().source,
            SecretSource::Named("AwsApiKeyId".into())
        );
        // External secrets are referenced, never declared
        assert_eq!(stack.resources.len(), 1);
    }

    #[test]
    fn test_st010_collision_rejected() {
        let env = env();
        let ctx = StackContext { app: "todo", env: &env };
        let mut config = SecretsConfig::default();
        config.external.insert(
            "HOST".into(),
            ExternalSecret {
                name: "Other".into(),
                field: None,
            },
        );
        let err = build(&ctx, &config, &db()).unwrap_err();
        assert!(err.contains("mapped twice"));
    }

    #[test]
    fn test_st010_custom_app_key_var() {
        let env = env();
        let ctx = StackContext { app: "todo", env: &env };
        let config = SecretsConfig {
            app_key: "DJANGO_SECRET_KEY".into(),
            ..SecretsConfig::default()
        };
        let (_, set) = build(&ctx, &config, &db()).unwrap();
        let keys: Vec<&str> = set.keys().collect();
        assert_eq!(
            keys,
            vec!["DJANGO_SECRET_KEY", "HOST", "PORT", "DB_NAME", "USERNAME", "PASSWORD"]
        );
        assert!(check_mapping(&set, &config).is_ok());
    }

    #[test]
    fn test_st010_mapping_check_rejects_missing_key() {
        let config = SecretsConfig::default();
        let mut set = SecretSet::new();
        set.insert(
            "SECRET_KEY",
            SecretRef::field(SecretSource::Named("k".into()), APP_KEY_FIELD),
        )
        .unwrap();
        for (var, field) in DB_FIELDS.iter().filter(|(var, _)| *var != "PASSWORD") {
            set.insert(var, SecretRef::field(db().credentials, field))
                .unwrap();
        }
        let err = check_mapping(&set, &config).unwrap_err();
        assert!(err.contains("missing [PASSWORD]"), "{}", err);
    }

    #[test]
    fn test_st010_mapping_check_rejects_unexpected_key() {
        let env = env();
        let ctx = StackContext { app: "todo", env: &env };
        let config = SecretsConfig::default();
        let (_, mut set) = build(&ctx, &config, &db()).unwrap();
        set.insert("STRAY", SecretRef::field(db().credentials, "host"))
            .unwrap();
        let err = check_mapping(&set, &config).unwrap_err();
        assert!(err.contains("unexpected [STRAY]"), "{}", err);
    }
}

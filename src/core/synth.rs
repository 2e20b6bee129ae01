//! ST-012: Synthesis — compose the definition units into a cloud assembly.
//!
//! Network → Database → Secrets → Service, each consuming the previous
//! unit's handle. Synthesis is pure apart from hashing the image build
//! context; the same config and environment always yield the same assembly.

use super::env::Environment;
use super::parser;
use super::resolver;
use super::types::*;
use crate::stacks::{self, database, network, secrets, service, StackContext};
use crate::tripwire::hasher;
use indexmap::IndexMap;
use std::path::Path;
use tracing::{debug, info};

/// Repository the external publisher pushes image assets into.
pub const ASSET_REPOSITORY: &str = "stratus-container-assets";

/// Build the full assembly for `config` in `env`.
///
/// `base_dir` anchors relative image asset directories (normally the
/// directory holding the config file).
pub fn synthesize(
    config: &StratusConfig,
    env: &Environment,
    base_dir: &Path,
) -> Result<CloudAssembly, String> {
    let config = resolver::resolve_config_templates(config, env)?;
    let errors = parser::validate_config(&config);
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(format!(
            "{} validation error(s):\n  {}",
            errors.len(),
            messages.join("\n  ")
        ));
    }

    let ctx = StackContext {
        app: &config.name,
        env,
    };

    let (image_uri, assets) = resolve_image(&config.service.image, env, base_dir)?;

    let (network_stack, net) = network::build(&ctx, &config.network)?;
    let (database_stack, db) = database::build(&ctx, &config.database, &net)?;
    let (secrets_stack, secret_set) = secrets::build(&ctx, &config.secrets, &db)?;
    let (service_stack, _) =
        service::build(&ctx, &config.service, &image_uri, &net, &secret_set)?;

    let mut stacks = IndexMap::new();
    for stack in [network_stack, database_stack, secrets_stack, service_stack] {
        let order = resolver::resource_order(&stack)?;
        debug!(stack = %stack.name, resources = ?order, "resource order");
        stacks.insert(stack.name.clone(), stack);
    }

    let dependencies = resolver::stack_dependencies(&stacks)?;
    for (name, deps) in &dependencies {
        if let Some(stack) = stacks.get_mut(name) {
            stack.dependencies = deps.clone();
        }
    }
    let order = resolver::topo_order(&dependencies)?;

    info!(
        app = %config.name,
        account = %env.account,
        region = %env.region,
        order = %order.join(" -> "),
        "assembly synthesized"
    );

    Ok(CloudAssembly {
        name: config.name.clone(),
        environment: env.clone(),
        stacks,
        order,
        assets,
    })
}

/// Resolve the container image URI, hashing a local build context if any.
fn resolve_image(
    image: &ImageSource,
    env: &Environment,
    base_dir: &Path,
) -> Result<(String, Vec<ImageAsset>), String> {
    match image {
        ImageSource::Registry { uri } => Ok((uri.clone(), Vec::new())),
        ImageSource::Asset {
            directory,
            dockerfile,
        } => {
            let context = base_dir.join(directory);
            let dockerfile_path = context.join(dockerfile);
            if !dockerfile_path.is_file() {
                return Err(format!(
                    "image asset: {} not found",
                    dockerfile_path.display()
                ));
            }
            let tree = hasher::hash_directory(&context)?;
            let hash = hasher::composite_hash(&[tree.as_str(), dockerfile.as_str()]);
            let image_uri = format!(
                "{}/{}:{}",
                env.registry_host(),
                ASSET_REPOSITORY,
                hasher::hex_digest(&hash)
            );
            debug!(directory = %context.display(), %hash, "hashed image asset");
            Ok((
                image_uri.clone(),
                vec![ImageAsset {
                    directory: directory.clone(),
                    dockerfile: dockerfile.clone(),
                    hash,
                    image_uri,
                }],
            ))
        }
    }
}

/// Stack names in build order, independent of any config.
pub fn stack_names() -> [&'static str; 4] {
    [
        stacks::NETWORK_STACK,
        stacks::DATABASE_STACK,
        stacks::SECRETS_STACK,
        stacks::SERVICE_STACK,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        Environment::new("123456789012", "us-east-1").unwrap()
    }

    fn registry_config() -> StratusConfig {
        parser::parse_config(
            r#"
version: "1.0"
name: todo
service:
  image:
    registry:
      uri: public.ecr.aws/example/app:latest
"#,
        )
        .unwrap()
    }

    fn asset_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("app")).unwrap();
        std::fs::write(dir.path().join("app/Dockerfile"), "FROM python:3.12\n").unwrap();
        std::fs::write(dir.path().join("app/manage.py"), "print('hi')\n").unwrap();
        dir
    }

    #[test]
    fn test_st012_stack_order() {
        let assembly = synthesize(&registry_config(), &env(), Path::new(".")).unwrap();
        assert_eq!(assembly.order, stack_names().to_vec());
        assert_eq!(assembly.stacks["Network"].dependencies, Vec::<String>::new());
        assert_eq!(assembly.stacks["Database"].dependencies, vec!["Network"]);
        assert_eq!(assembly.stacks["Secrets"].dependencies, vec!["Database"]);
        assert_eq!(
            assembly.stacks["AppService"].dependencies,
            vec!["Database", "Network", "Secrets"]
        );
        assert!(assembly.assets.is_empty());
    }

    #[test]
    fn test_st012_deterministic() {
        let a = synthesize(&registry_config(), &env(), Path::new(".")).unwrap();
        let b = synthesize(&registry_config(), &env(), Path::new(".")).unwrap();
        assert_eq!(a, b);
        for name in &a.order {
            assert_eq!(
                a.stacks[name].render().unwrap(),
                b.stacks[name].render().unwrap()
            );
        }
    }

    #[test]
    fn test_st012_image_asset_hashed() {
        let dir = asset_dir();
        let config = parser::parse_config("version: \"1.0\"\nname: todo\n").unwrap();
        let assembly = synthesize(&config, &env(), dir.path()).unwrap();
        assert_eq!(assembly.assets.len(), 1);
        let asset = &assembly.assets[0];
        assert!(asset.hash.starts_with("blake3:"));
        assert!(asset
            .image_uri
            .starts_with("123456789012.dkr.ecr.us-east-1.amazonaws.com/stratus-container-assets:"));
        let task = &assembly.stacks["AppService"].resources["TaskDefinition"];
        assert_eq!(
            task.properties["ContainerDefinitions"][0]["Image"],
            asset.image_uri.as_str()
        );
    }

    #[test]
    fn test_st012_image_asset_changes_with_content() {
        let dir = asset_dir();
        let config = parser::parse_config("version: \"1.0\"\nname: todo\n").unwrap();
        let before = synthesize(&config, &env(), dir.path()).unwrap();
        std::fs::write(dir.path().join("app/manage.py"), "print('bye')\n").unwrap();
        let after = synthesize(&config, &env(), dir.path()).unwrap();
        assert_ne!(before.assets[0].hash, after.assets[0].hash);
    }

    #[test]
    fn test_st012_missing_dockerfile() {
        let dir = tempfile::tempdir().unwrap();
        let config = parser::parse_config("version: \"1.0\"\nname: todo\n").unwrap();
        let err = synthesize(&config, &env(), dir.path()).unwrap_err();
        assert!(err.contains("not found"));
    }

    #[test]
    fn test_st012_validation_fails_fast() {
        let mut config = registry_config();
        config.service.min_capacity = 9;
        let err = synthesize(&config, &env(), Path::new(".")).unwrap_err();
        assert!(err.contains("validation error"));
    }

    #[test]
    fn test_st012_templates_resolved() {
        let mut config = registry_config();
        config.params.insert("db".into(), "todo_db".into());
        config.database.name = "{{params.db}}".into();
        let assembly = synthesize(&config, &env(), Path::new(".")).unwrap();
        assert_eq!(
            assembly.stacks["Database"].resources["DatabaseCluster"].properties["DatabaseName"],
            "todo_db"
        );
    }

    #[test]
    fn test_st012_account_region_in_endpoints() {
        let other = Environment::new("210987654321", "eu-central-1").unwrap();
        let assembly = synthesize(&registry_config(), &other, Path::new(".")).unwrap();
        assert_eq!(
            assembly.stacks["Network"].resources["SecretsManagerEndpoint"].properties
                ["ServiceName"],
            "com.amazonaws.eu-central-1.secretsmanager"
        );
        assert_eq!(assembly.environment, other);
    }
}

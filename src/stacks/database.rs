//! ST-009: Database definition — serverless cluster with generated credentials.
//!
//! The cluster pauses when idle and scales between two capacity units.
//! Credentials are generated by the secret store and never appear in the
//! template; the cluster reads them through dynamic references.

use super::{get_att, join, reference, NetworkHandle, SecretSource, StackContext};
use crate::core::parser::AUTO_PAUSE_MINUTES;
use crate::core::types::{
    CapacityRange, DatabaseConfig, DatabaseEngine, RemovalPolicy, StackTemplate, SubnetKind,
    TemplateResource,
};
use serde_json::{json, Value};
use tracing::{debug, info};

/// Master user name stored in the generated secret.
pub const MASTER_USERNAME: &str = "admin";

/// Characters the generated password never contains.
pub const PASSWORD_EXCLUDED: &str = "\"@/\\ '";

const CLUSTER_ID: &str = "DatabaseCluster";
const SECRET_ID: &str = "DatabaseSecret";

/// What the database definition hands to downstream units.
#[derive(Debug, Clone)]
pub struct DatabaseHandle {
    /// Generated credentials (username, password, host, port, dbname)
    pub credentials: SecretSource,
    pub engine: DatabaseEngine,
    pub port: u16,
    pub endpoint_export: String,
}

/// Build the database stack inside the given network.
pub fn build(
    ctx: &StackContext,
    config: &DatabaseConfig,
    network: &NetworkHandle,
) -> Result<(StackTemplate, DatabaseHandle), String> {
    let stack_name = super::DATABASE_STACK;
    let capacity = CapacityRange::new(config.min_capacity, config.max_capacity)?;
    if !AUTO_PAUSE_MINUTES.contains(&config.auto_pause_minutes) {
        return Err(format!(
            "database auto-pause of {} minutes is outside {:?}",
            config.auto_pause_minutes, AUTO_PAUSE_MINUTES
        ));
    }
    let placement = network.select(&config.subnet_group, SubnetKind::Isolated)?;
    let port = config.engine.default_port();

    let mut stack = StackTemplate::new(
        stack_name,
        &format!("{} database: serverless {} cluster", ctx.app, config.engine.engine_name()),
    );

    stack.add(
        "DatabaseSubnetGroup",
        TemplateResource::new(
            "AWS::RDS::DBSubnetGroup",
            json!({
                "DBSubnetGroupDescription": format!("{} database subnets ({})", ctx.app, placement.name),
                "SubnetIds": placement.ids(),
                "Tags": ctx.tags(stack_name, "DatabaseSubnetGroup"),
            }),
        ),
    )?;

    stack.add(
        "DatabaseSecurityGroup",
        TemplateResource::new(
            "AWS::EC2::SecurityGroup",
            json!({
                "GroupDescription": format!("{} database access", ctx.app),
                "VpcId": network.vpc_id(),
                "SecurityGroupIngress": [{
                    "CidrIp": network.cidr.to_string(),
                    "IpProtocol": "tcp",
                    "FromPort": port,
                    "ToPort": port,
                    "Description": "Database clients inside the VPC",
                }],
                "SecurityGroupEgress": [{
                    "CidrIp": "0.0.0.0/0",
                    "IpProtocol": "-1",
                    "Description": "Allow all outbound traffic",
                }],
                "Tags": ctx.tags(stack_name, "DatabaseSecurityGroup"),
            }),
        ),
    )?;

    let secret_template = serde_json::to_string(&json!({
        "username": MASTER_USERNAME,
        "dbname": config.name,
    }))
    .map_err(|e| format!("cannot encode secret template: {}", e))?;

    stack.add(
        SECRET_ID,
        TemplateResource::new(
            "AWS::SecretsManager::Secret",
            json!({
                "Description": format!("{} database credentials", ctx.app),
                "GenerateSecretString": {
                    "SecretStringTemplate": secret_template,
                    "GenerateStringKey": "password",
                    "PasswordLength": 30,
                    "ExcludeCharacters": PASSWORD_EXCLUDED,
                },
                "Tags": ctx.tags(stack_name, SECRET_ID),
            }),
        )
        .removal(RemovalPolicy::Delete),
    )?;

    let parameter_group = config
        .parameter_group
        .clone()
        .unwrap_or_else(|| config.engine.default_parameter_group().to_string());

    stack.add(
        CLUSTER_ID,
        TemplateResource::new(
            "AWS::RDS::DBCluster",
            json!({
                "Engine": config.engine.engine_name(),
                "EngineMode": "serverless",
                "DatabaseName": config.name,
                "Port": port,
                "MasterUsername": dynamic_secret_field("username"),
                "MasterUserPassword": dynamic_secret_field("password"),
                "DBSubnetGroupName": reference("DatabaseSubnetGroup"),
                "VpcSecurityGroupIds": [get_att("DatabaseSecurityGroup", "GroupId")],
                "DBClusterParameterGroupName": parameter_group,
                "ScalingConfiguration": {
                    "AutoPause": true,
                    "MinCapacity": capacity.min().units(),
                    "MaxCapacity": capacity.max().units(),
                    "SecondsUntilAutoPause": config.auto_pause_minutes * 60,
                },
                "BackupRetentionPeriod": config.backup_retention_days,
                "EnableHttpEndpoint": true,
                "StorageEncrypted": true,
                "DeletionProtection": false,
                "Tags": ctx.tags(stack_name, CLUSTER_ID),
            }),
        )
        .removal(RemovalPolicy::Delete),
    )?;

    stack.add(
        "DatabaseSecretAttachment",
        TemplateResource::new(
            "AWS::SecretsManager::SecretTargetAttachment",
            json!({
                "SecretId": reference(SECRET_ID),
                "TargetId": reference(CLUSTER_ID),
                "TargetType": "AWS::RDS::DBCluster",
            }),
        ),
    )?;

    debug!(
        min = %capacity.min(),
        max = %capacity.max(),
        pause_minutes = config.auto_pause_minutes,
        "database scaling configured"
    );

    let credentials_export = ctx.export_name(stack_name, "CredentialsSecretArn");
    let endpoint_export = ctx.export_name(stack_name, "ClusterEndpoint");
    stack.output(
        "CredentialsSecretArn",
        reference("DatabaseSecretAttachment"),
        Some(credentials_export.clone()),
        "Database credentials secret (with connection details attached)",
    )?;
    stack.output(
        "ClusterEndpoint",
        get_att(CLUSTER_ID, "Endpoint.Address"),
        Some(endpoint_export.clone()),
        "Cluster writer endpoint",
    )?;
    stack.output(
        "ClusterPort",
        get_att(CLUSTER_ID, "Endpoint.Port"),
        None,
        "Cluster port",
    )?;

    info!(
        stack = stack_name,
        engine = config.engine.engine_name(),
        subnet_group = %placement.name,
        "database definition built"
    );

    Ok((
        stack,
        DatabaseHandle {
            credentials: SecretSource::Export(credentials_export),
            engine: config.engine,
            port,
            endpoint_export,
        },
    ))
}

/// `{{resolve:secretsmanager:<secret>:SecretString:<field>}}`
fn dynamic_secret_field(field: &str) -> Value {
    join(vec![
        Value::String("{{resolve:secretsmanager:".to_string()),
        reference(SECRET_ID),
        Value::String(format!(":SecretString:{}}}}}", field)),
    ])
}

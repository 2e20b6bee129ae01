//! ST-011: Compute definition — load-balanced, auto-scaled container service.
//!
//! Tasks run in isolated subnets without public addresses; only the load
//! balancer sits in public subnets. Secrets reach the container as
//! environment variables resolved by the platform at task start.

use super::{get_att, join, reference, NetworkHandle, SecretSet, StackContext};
use crate::core::parser::fargate_memory_valid;
use crate::core::types::{
    RemovalPolicy, ScalingBounds, ServiceConfig, StackTemplate, SubnetKind, TemplateResource,
};
use serde_json::{json, Value};
use tracing::{debug, info};

const EXECUTION_POLICY: &str = "service-role/AmazonECSTaskExecutionRolePolicy";

/// The publicly reachable endpoint the service exposes.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    pub dns_export: String,
    pub listener_port: u16,
}

/// Build the service stack.
pub fn build(
    ctx: &StackContext,
    config: &ServiceConfig,
    image_uri: &str,
    network: &NetworkHandle,
    secrets: &SecretSet,
) -> Result<(StackTemplate, ServiceHandle), String> {
    let stack_name = super::SERVICE_STACK;
    let bounds = ScalingBounds::new(config.min_capacity, config.desired_count, config.max_capacity)?;
    if !fargate_memory_valid(config.cpu, config.memory_mib) {
        return Err(format!(
            "service memory {} MiB is not valid for {} CPU units",
            config.memory_mib, config.cpu
        ));
    }
    let tasks = network.select(&config.subnet_group, SubnetKind::Isolated)?;
    let balancer = network.select(&config.load_balancer_subnet_group, SubnetKind::Public)?;

    let mut stack = StackTemplate::new(
        stack_name,
        &format!("{} service: load-balanced container tasks", ctx.app),
    );

    stack.add(
        "ServiceLogGroup",
        TemplateResource::new(
            "AWS::Logs::LogGroup",
            json!({ "RetentionInDays": config.log_retention_days }),
        )
        .removal(RemovalPolicy::Delete),
    )?;

    declare_roles(ctx, secrets, &mut stack)?;

    let container_secrets: Vec<Value> = secrets
        .iter()
        .map(|(name, secret)| json!({ "Name": name, "ValueFrom": secret.value_from(ctx.env) }))
        .collect();

    stack.add(
        "TaskDefinition",
        TemplateResource::new(
            "AWS::ECS::TaskDefinition",
            json!({
                "Family": format!("{}-{}", ctx.app, config.container_name),
                "Cpu": config.cpu.to_string(),
                "Memory": config.memory_mib.to_string(),
                "NetworkMode": "awsvpc",
                "RequiresCompatibilities": ["FARGATE"],
                "ExecutionRoleArn": get_att("ExecutionRole", "Arn"),
                "TaskRoleArn": get_att("TaskRole", "Arn"),
                "ContainerDefinitions": [{
                    "Name": config.container_name,
                    "Image": image_uri,
                    "Essential": true,
                    "PortMappings": [{
                        "ContainerPort": config.container_port,
                        "Protocol": "tcp",
                    }],
                    "Secrets": container_secrets,
                    "LogConfiguration": {
                        "LogDriver": "awslogs",
                        "Options": {
                            "awslogs-group": reference("ServiceLogGroup"),
                            "awslogs-stream-prefix": config.container_name,
                            "awslogs-region": ctx.env.region,
                        },
                    },
                }],
                "Tags": ctx.tags(stack_name, "TaskDefinition"),
            }),
        ),
    )?;

    stack.add(
        "LoadBalancerSecurityGroup",
        TemplateResource::new(
            "AWS::EC2::SecurityGroup",
            json!({
                "GroupDescription": format!("{} load balancer", ctx.app),
                "VpcId": network.vpc_id(),
                "SecurityGroupIngress": [{
                    "CidrIp": "0.0.0.0/0",
                    "IpProtocol": "tcp",
                    "FromPort": config.listener_port,
                    "ToPort": config.listener_port,
                    "Description": "Public listener",
                }],
                "SecurityGroupEgress": [{
                    "CidrIp": network.cidr.to_string(),
                    "IpProtocol": "tcp",
                    "FromPort": config.container_port,
                    "ToPort": config.container_port,
                    "Description": "Container port inside the VPC",
                }],
                "Tags": ctx.tags(stack_name, "LoadBalancerSecurityGroup"),
            }),
        ),
    )?;

    stack.add(
        "ServiceSecurityGroup",
        TemplateResource::new(
            "AWS::EC2::SecurityGroup",
            json!({
                "GroupDescription": format!("{} service tasks", ctx.app),
                "VpcId": network.vpc_id(),
                "SecurityGroupIngress": [{
                    "SourceSecurityGroupId": get_att("LoadBalancerSecurityGroup", "GroupId"),
                    "IpProtocol": "tcp",
                    "FromPort": config.container_port,
                    "ToPort": config.container_port,
                    "Description": "Traffic from the load balancer",
                }],
                "SecurityGroupEgress": [{
                    "CidrIp": "0.0.0.0/0",
                    "IpProtocol": "-1",
                    "Description": "Allow all outbound traffic",
                }],
                "Tags": ctx.tags(stack_name, "ServiceSecurityGroup"),
            }),
        ),
    )?;

    stack.add(
        "LoadBalancer",
        TemplateResource::new(
            "AWS::ElasticLoadBalancingV2::LoadBalancer",
            json!({
                "Type": "application",
                "Scheme": "internet-facing",
                "Subnets": balancer.ids(),
                "SecurityGroups": [get_att("LoadBalancerSecurityGroup", "GroupId")],
                "Tags": ctx.tags(stack_name, "LoadBalancer"),
            }),
        ),
    )?;

    stack.add(
        "TargetGroup",
        TemplateResource::new(
            "AWS::ElasticLoadBalancingV2::TargetGroup",
            json!({
                "TargetType": "ip",
                "Protocol": "HTTP",
                "Port": config.container_port,
                "VpcId": network.vpc_id(),
                "HealthCheckPath": config.health_check.path,
                "HealthyThresholdCount": config.health_check.healthy_threshold,
                "UnhealthyThresholdCount": config.health_check.unhealthy_threshold,
                "Matcher": { "HttpCode": "200" },
                "Tags": ctx.tags(stack_name, "TargetGroup"),
            }),
        ),
    )?;

    stack.add(
        "Listener",
        TemplateResource::new(
            "AWS::ElasticLoadBalancingV2::Listener",
            json!({
                "LoadBalancerArn": reference("LoadBalancer"),
                "Port": config.listener_port,
                "Protocol": "HTTP",
                "DefaultActions": [{
                    "Type": "forward",
                    "TargetGroupArn": reference("TargetGroup"),
                }],
            }),
        ),
    )?;

    stack.add(
        "Service",
        TemplateResource::new(
            "AWS::ECS::Service",
            json!({
                "Cluster": network.cluster(),
                "LaunchType": "FARGATE",
                "PlatformVersion": config.platform_version,
                "DesiredCount": bounds.desired(),
                "TaskDefinition": reference("TaskDefinition"),
                "HealthCheckGracePeriodSeconds": 60,
                "DeploymentConfiguration": {
                    "MinimumHealthyPercent": 50,
                    "MaximumPercent": 200,
                },
                "LoadBalancers": [{
                    "ContainerName": config.container_name,
                    "ContainerPort": config.container_port,
                    "TargetGroupArn": reference("TargetGroup"),
                }],
                "NetworkConfiguration": {
                    "AwsvpcConfiguration": {
                        "AssignPublicIp": "DISABLED",
                        "Subnets": tasks.ids(),
                        "SecurityGroups": [get_att("ServiceSecurityGroup", "GroupId")],
                    },
                },
                "Tags": ctx.tags(stack_name, "Service"),
            }),
        )
        .depends_on(&["Listener", "ExecutionRolePolicy"]),
    )?;

    stack.add(
        "ScalableTarget",
        TemplateResource::new(
            "AWS::ApplicationAutoScaling::ScalableTarget",
            json!({
                "ServiceNamespace": "ecs",
                "ScalableDimension": "ecs:service:DesiredCount",
                "ResourceId": join(vec![
                    Value::String("service/".to_string()),
                    network.cluster(),
                    Value::String("/".to_string()),
                    get_att("Service", "Name"),
                ]),
                "MinCapacity": bounds.min(),
                "MaxCapacity": bounds.max(),
            }),
        ),
    )?;

    stack.add(
        "CpuScalingPolicy",
        TemplateResource::new(
            "AWS::ApplicationAutoScaling::ScalingPolicy",
            json!({
                "PolicyName": format!("{}-cpu-scaling", ctx.app),
                "PolicyType": "TargetTrackingScaling",
                "ScalingTargetId": reference("ScalableTarget"),
                "TargetTrackingScalingPolicyConfiguration": {
                    "PredefinedMetricSpecification": {
                        "PredefinedMetricType": "ECSServiceAverageCPUUtilization",
                    },
                    "TargetValue": f64::from(config.cpu_target_percent),
                },
            }),
        ),
    )?;

    debug!(
        min = bounds.min(),
        desired = bounds.desired(),
        max = bounds.max(),
        cpu_target = config.cpu_target_percent,
        "service scaling configured"
    );

    let dns_export = ctx.export_name(stack_name, "LoadBalancerDns");
    stack.output(
        "LoadBalancerDns",
        get_att("LoadBalancer", "DNSName"),
        Some(dns_export.clone()),
        "Load balancer DNS name",
    )?;
    stack.output(
        "ServiceUrl",
        service_url(config.listener_port),
        None,
        "Public service endpoint",
    )?;

    info!(
        stack = stack_name,
        image = image_uri,
        secrets = secrets.len(),
        "service definition built"
    );

    Ok((
        stack,
        ServiceHandle {
            dns_export,
            listener_port: config.listener_port,
        },
    ))
}

fn declare_roles(
    ctx: &StackContext,
    secrets: &SecretSet,
    stack: &mut StackTemplate,
) -> Result<(), String> {
    let stack_name = super::SERVICE_STACK;
    let assume = json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": "ecs-tasks.amazonaws.com" },
            "Action": "sts:AssumeRole",
        }],
    });

    stack.add(
        "ExecutionRole",
        TemplateResource::new(
            "AWS::IAM::Role",
            json!({
                "AssumeRolePolicyDocument": assume,
                "ManagedPolicyArns": [join(vec![
                    Value::String("arn:".to_string()),
                    reference("AWS::Partition"),
                    Value::String(format!(":iam::aws:policy/{}", EXECUTION_POLICY)),
                ])],
                "Tags": ctx.tags(stack_name, "ExecutionRole"),
            }),
        ),
    )?;

    let resources: Vec<Value> = secrets
        .sources()
        .into_iter()
        .map(|source| {
            super::SecretRef {
                source: source.clone(),
                field: None,
            }
            .policy_resource(ctx.env)
        })
        .collect();

    stack.add(
        "ExecutionRolePolicy",
        TemplateResource::new(
            "AWS::IAM::Policy",
            json!({
                "PolicyName": format!("{}-read-secrets", ctx.app),
                "Roles": [reference("ExecutionRole")],
                "PolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Action": [
                            "secretsmanager:GetSecretValue",
                            "secretsmanager:DescribeSecret",
                        ],
                        "Resource": resources,
                    }],
                },
            }),
        ),
    )?;

    stack.add(
        "TaskRole",
        TemplateResource::new(
            "AWS::IAM::Role",
            json!({
                "AssumeRolePolicyDocument": assume,
                "Tags": ctx.tags(stack_name, "TaskRole"),
            }),
        ),
    )?;

    Ok(())
}

fn service_url(listener_port: u16) -> Value {
    let suffix = if listener_port == 80 {
        String::new()
    } else {
        format!(":{}", listener_port)
    };
    join(vec![
        Value::String("http://".to_string()),
        get_att("LoadBalancer", "DNSName"),
        Value::String(suffix),
    ])
}

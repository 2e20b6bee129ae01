//! ST-008: Network definition — VPC, per-AZ subnets, endpoints, cluster.
//!
//! Isolated subnets have no route out of the VPC; the registry, secret
//! store and log sink are reached through VPC endpoints instead. Public
//! subnets exist only for the internet-facing load balancer.

use super::{get_att, pascal_case, reference, NetworkHandle, StackContext, SubnetGroupHandle};
use crate::core::cidr::Ipv4Cidr;
use crate::core::types::{
    EndpointService, NetworkConfig, StackTemplate, SubnetKind, TemplateResource,
};
use indexmap::IndexMap;
use serde_json::{json, Value};
use tracing::{debug, info};

/// Logical ID of the VPC.
pub const VPC_ID: &str = "Vpc";

/// Build the network stack.
pub fn build(
    ctx: &StackContext,
    config: &NetworkConfig,
) -> Result<(StackTemplate, NetworkHandle), String> {
    let stack_name = super::NETWORK_STACK;
    let cidr: Ipv4Cidr = config
        .cidr
        .parse()
        .map_err(|e| format!("network.cidr: {}", e))?;
    if config.max_azs == 0 {
        return Err("network.max_azs must be at least 1".to_string());
    }
    let azs = usize::from(config.max_azs);

    let request: Vec<(u8, usize)> = config.subnets.iter().map(|g| (g.cidr_mask, azs)).collect();
    let partition = cidr.partition(&request)?;

    let mut stack = StackTemplate::new(
        stack_name,
        &format!("{} network: VPC, subnets, private endpoints", ctx.app),
    );

    stack.add(
        VPC_ID,
        TemplateResource::new(
            "AWS::EC2::VPC",
            json!({
                "CidrBlock": cidr.to_string(),
                "EnableDnsHostnames": config.enable_dns,
                "EnableDnsSupport": config.enable_dns,
                "InstanceTenancy": "default",
                "Tags": ctx.tags(stack_name, VPC_ID),
            }),
        ),
    )?;

    let has_public = config.subnets.iter().any(|g| g.kind == SubnetKind::Public);
    if has_public {
        stack.add(
            "InternetGateway",
            TemplateResource::new(
                "AWS::EC2::InternetGateway",
                json!({ "Tags": ctx.tags(stack_name, "InternetGateway") }),
            ),
        )?;
        stack.add(
            "VpcGatewayAttachment",
            TemplateResource::new(
                "AWS::EC2::VPCGatewayAttachment",
                json!({
                    "VpcId": reference(VPC_ID),
                    "InternetGatewayId": reference("InternetGateway"),
                }),
            ),
        )?;
    }

    let mut groups = IndexMap::new();
    let mut route_tables: Vec<String> = Vec::new();
    let mut isolated_subnet_ids: Vec<String> = Vec::new();

    for (group, cidrs) in config.subnets.iter().zip(partition) {
        let prefix = pascal_case(&group.name);
        let mut subnet_ids = Vec::with_capacity(cidrs.len());

        for (az, subnet_cidr) in cidrs.iter().enumerate() {
            let subnet_id = format!("{}Subnet{}", prefix, az + 1);
            let table_id = format!("{}RouteTable", subnet_id);
            let public = group.kind == SubnetKind::Public;

            stack.add(
                &subnet_id,
                TemplateResource::new(
                    "AWS::EC2::Subnet",
                    json!({
                        "VpcId": reference(VPC_ID),
                        "CidrBlock": subnet_cidr.to_string(),
                        "AvailabilityZone": {"Fn::Select": [az, {"Fn::GetAZs": ""}]},
                        "MapPublicIpOnLaunch": public,
                        "Tags": [
                            {"Key": "Name", "Value": format!("{}/{}/{}", ctx.app, stack_name, subnet_id)},
                            {"Key": "stratus:app", "Value": ctx.app},
                            {"Key": "stratus:subnet-type", "Value": group.kind.to_string()},
                            {"Key": "stratus:subnet-name", "Value": group.name},
                        ],
                    }),
                ),
            )?;
            stack.add(
                &table_id,
                TemplateResource::new(
                    "AWS::EC2::RouteTable",
                    json!({
                        "VpcId": reference(VPC_ID),
                        "Tags": ctx.tags(stack_name, &table_id),
                    }),
                ),
            )?;
            stack.add(
                &format!("{}RouteTableAssociation", subnet_id),
                TemplateResource::new(
                    "AWS::EC2::SubnetRouteTableAssociation",
                    json!({
                        "RouteTableId": reference(&table_id),
                        "SubnetId": reference(&subnet_id),
                    }),
                ),
            )?;
            if public {
                stack.add(
                    &format!("{}DefaultRoute", subnet_id),
                    TemplateResource::new(
                        "AWS::EC2::Route",
                        json!({
                            "RouteTableId": reference(&table_id),
                            "DestinationCidrBlock": "0.0.0.0/0",
                            "GatewayId": reference("InternetGateway"),
                        }),
                    )
                    .depends_on(&["VpcGatewayAttachment"]),
                )?;
            } else {
                isolated_subnet_ids.push(subnet_id.clone());
            }

            debug!(subnet = %subnet_id, cidr = %subnet_cidr, "declared subnet");
            route_tables.push(table_id);
            subnet_ids.push(subnet_id);
        }

        let output_key = format!("{}SubnetIds", prefix);
        let export = ctx.export_name(stack_name, &output_key);
        stack.output(
            &output_key,
            json!({"Fn::Join": [",", subnet_ids.iter().map(|id| reference(id)).collect::<Vec<_>>()]}),
            Some(export.clone()),
            &format!("{} subnets ({})", group.name, group.kind),
        )?;
        groups.insert(
            group.name.clone(),
            SubnetGroupHandle {
                name: group.name.clone(),
                kind: group.kind,
                cidrs,
                ids_export: export,
            },
        );
    }

    if isolated_subnet_ids.is_empty() {
        return Err("network declares no isolated subnets".to_string());
    }

    declare_endpoints(ctx, config, &cidr, &route_tables, &isolated_subnet_ids, &mut stack)?;

    stack.add(
        "Cluster",
        TemplateResource::new(
            "AWS::ECS::Cluster",
            json!({ "Tags": ctx.tags(stack_name, "Cluster") }),
        ),
    )?;

    let vpc_export = ctx.export_name(stack_name, "VpcId");
    let cluster_export = ctx.export_name(stack_name, "ClusterName");
    stack.output("VpcId", reference(VPC_ID), Some(vpc_export.clone()), "VPC ID")?;
    stack.output(
        "VpcCidr",
        get_att(VPC_ID, "CidrBlock"),
        Some(ctx.export_name(stack_name, "VpcCidr")),
        "VPC address space",
    )?;
    stack.output(
        "ClusterName",
        reference("Cluster"),
        Some(cluster_export.clone()),
        "Container cluster name",
    )?;

    info!(
        stack = stack_name,
        cidr = %cidr,
        azs,
        resources = stack.resources.len(),
        "network definition built"
    );

    Ok((
        stack,
        NetworkHandle {
            vpc_id_export: vpc_export,
            cidr,
            groups,
            cluster_export,
            availability_zones: config.max_azs,
        },
    ))
}

fn declare_endpoints(
    ctx: &StackContext,
    config: &NetworkConfig,
    cidr: &Ipv4Cidr,
    route_tables: &[String],
    isolated_subnet_ids: &[String],
    stack: &mut StackTemplate,
) -> Result<(), String> {
    let interface: Vec<&EndpointService> =
        config.endpoints.iter().filter(|e| !e.is_gateway()).collect();

    if !interface.is_empty() {
        stack.add(
            "EndpointSecurityGroup",
            TemplateResource::new(
                "AWS::EC2::SecurityGroup",
                json!({
                    "GroupDescription": format!("{} VPC endpoints", ctx.app),
                    "VpcId": reference(VPC_ID),
                    "SecurityGroupIngress": [{
                        "CidrIp": cidr.to_string(),
                        "IpProtocol": "tcp",
                        "FromPort": 443,
                        "ToPort": 443,
                        "Description": "HTTPS from inside the VPC",
                    }],
                    "SecurityGroupEgress": [{
                        "CidrIp": "0.0.0.0/0",
                        "IpProtocol": "-1",
                        "Description": "Allow all outbound traffic",
                    }],
                    "Tags": ctx.tags(super::NETWORK_STACK, "EndpointSecurityGroup"),
                }),
            ),
        )?;
    }

    for endpoint in &config.endpoints {
        let service_name = ctx.env.endpoint_service_name(endpoint.service_suffix());
        let properties = if endpoint.is_gateway() {
            json!({
                "ServiceName": service_name,
                "VpcEndpointType": "Gateway",
                "VpcId": reference(VPC_ID),
                "RouteTableIds": route_tables.iter().map(|id| reference(id)).collect::<Vec<Value>>(),
            })
        } else {
            json!({
                "ServiceName": service_name,
                "VpcEndpointType": "Interface",
                "VpcId": reference(VPC_ID),
                "PrivateDnsEnabled": true,
                "SecurityGroupIds": [get_att("EndpointSecurityGroup", "GroupId")],
                "SubnetIds": isolated_subnet_ids.iter().map(|id| reference(id)).collect::<Vec<Value>>(),
            })
        };
        stack.add(
            endpoint.logical_id(),
            TemplateResource::new("AWS::EC2::VPCEndpoint", properties),
        )?;
    }

    Ok(())
}

//! DynamoDB-backed lease table.
//!
//! Table layout: hash key `leaseKey` (S) with attributes `checkpoint` (S),
//! `leaseCounter` (N) and `leaseOwner` (S).

use super::{Lease, LeaseManager, LeaseResult};
use crate::aws::build_sdk_config;
use crate::config::AwsConfig;
use crate::error::CheckpointError;
use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::operation::create_table::CreateTableError;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::operation::update_item::UpdateItemError;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, KeySchemaElement, KeyType, ProvisionedThroughput,
    ScalarAttributeType,
};
use aws_sdk_dynamodb::Client as DynamoDbClient;
use std::collections::HashMap;
use tracing::{debug, info};

const LEASE_KEY: &str = "leaseKey";
const CHECKPOINT: &str = "checkpoint";
const LEASE_COUNTER: &str = "leaseCounter";
const LEASE_OWNER: &str = "leaseOwner";

/// [`LeaseManager`] storing leases in a DynamoDB table.
#[derive(Debug, Clone)]
pub struct DynamoDbLeaseManager {
    client: DynamoDbClient,
    table_name: String,
}

impl DynamoDbLeaseManager {
    /// Build a client from AWS settings.
    pub async fn connect(aws: &AwsConfig, table_name: impl Into<String>) -> Self {
        let sdk_config = build_sdk_config(aws).await;
        let table_name = table_name.into();
        info!(region = %aws.region, table = %table_name, "DynamoDB lease manager initialized");
        Self::from_client(DynamoDbClient::new(&sdk_config), table_name)
    }

    /// Wrap an existing SDK client.
    pub fn from_client(client: DynamoDbClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

#[async_trait]
impl LeaseManager for DynamoDbLeaseManager {
    async fn create_lease_table_if_not_exists(
        &self,
        read_capacity: i64,
        write_capacity: i64,
    ) -> LeaseResult<bool> {
        let build_err = |e: aws_sdk_dynamodb::error::BuildError| {
            CheckpointError::TableCreation(e.to_string())
        };

        let result = self
            .client
            .create_table()
            .table_name(&self.table_name)
            .attribute_definitions(
                AttributeDefinition::builder()
                    .attribute_name(LEASE_KEY)
                    .attribute_type(ScalarAttributeType::S)
                    .build()
                    .map_err(build_err)?,
            )
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name(LEASE_KEY)
                    .key_type(KeyType::Hash)
                    .build()
                    .map_err(build_err)?,
            )
            .provisioned_throughput(
                ProvisionedThroughput::builder()
                    .read_capacity_units(read_capacity)
                    .write_capacity_units(write_capacity)
                    .build()
                    .map_err(build_err)?,
            )
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                let message = DisplayErrorContext(&e).to_string();
                match e.into_service_error() {
                    CreateTableError::ResourceInUseException(_) => {
                        debug!(table = %self.table_name, "Lease table already exists");
                        Ok(false)
                    }
                    _ => Err(CheckpointError::TableCreation(message)),
                }
            }
        }
    }

    async fn get_lease(&self, lease_key: &str) -> LeaseResult<Option<Lease>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(LEASE_KEY, AttributeValue::S(lease_key.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| CheckpointError::Lookup(DisplayErrorContext(&e).to_string()))?;

        Ok(output.item().and_then(lease_from_item))
    }

    async fn create_lease_if_not_exists(&self, lease: &Lease) -> LeaseResult<bool> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(lease_to_item(lease)))
            .condition_expression("attribute_not_exists(leaseKey)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                let message = DisplayErrorContext(&e).to_string();
                match e.into_service_error() {
                    PutItemError::ConditionalCheckFailedException(_) => Ok(false),
                    _ => Err(CheckpointError::Write(message)),
                }
            }
        }
    }

    async fn update_lease(&self, lease: &Lease) -> LeaseResult<bool> {
        let mut request = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key(LEASE_KEY, AttributeValue::S(lease.lease_key.clone()))
            .condition_expression("attribute_exists(leaseKey)")
            .expression_attribute_values(":one", AttributeValue::N("1".into()));

        request = match &lease.checkpoint {
            Some(checkpoint) => request
                .update_expression("SET checkpoint = :checkpoint ADD leaseCounter :one")
                .expression_attribute_values(":checkpoint", AttributeValue::S(checkpoint.clone())),
            None => request.update_expression("ADD leaseCounter :one"),
        };

        match request.send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let message = DisplayErrorContext(&e).to_string();
                match e.into_service_error() {
                    UpdateItemError::ConditionalCheckFailedException(_) => Ok(false),
                    _ => Err(CheckpointError::Write(message)),
                }
            }
        }
    }
}

fn lease_to_item(lease: &Lease) -> HashMap<String, AttributeValue> {
    let mut item = HashMap::new();
    item.insert(LEASE_KEY.to_string(), AttributeValue::S(lease.lease_key.clone()));
    item.insert(
        LEASE_COUNTER.to_string(),
        AttributeValue::N(lease.lease_counter.to_string()),
    );
    if let Some(checkpoint) = &lease.checkpoint {
        item.insert(CHECKPOINT.to_string(), AttributeValue::S(checkpoint.clone()));
    }
    if let Some(owner) = &lease.lease_owner {
        item.insert(LEASE_OWNER.to_string(), AttributeValue::S(owner.clone()));
    }
    item
}

fn lease_from_item(item: &HashMap<String, AttributeValue>) -> Option<Lease> {
    let lease_key = item.get(LEASE_KEY)?.as_s().ok()?.clone();
    let string_attr = |name: &str| item.get(name).and_then(|v| v.as_s().ok()).cloned();

    Some(Lease {
        lease_key,
        checkpoint: string_attr(CHECKPOINT),
        lease_counter: item
            .get(LEASE_COUNTER)
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse().ok())
            .unwrap_or(0),
        lease_owner: string_attr(LEASE_OWNER),
    })
}

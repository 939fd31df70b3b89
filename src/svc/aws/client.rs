//! # Client module
//!
//! This module provide the [`Api`] implementation backed by the aws sdk. An sdk
//! configuration is loaded once per region, from the environment, the shared
//! configuration files or the instance profile.

use std::{collections::BTreeMap, error::Error as StdError, sync::Arc};

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_rds::{
    error::{DisplayErrorContext, ProvideErrorMetadata},
    types,
};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use crate::svc::aws::{
    classify, Api, Arn, CreateDbInstance, DbInstance, DeleteDbInstance, Error, Page, Tag, User,
};

// -----------------------------------------------------------------------------
// helpers

/// returns the classified [`Error`] of a failed sdk call
fn from_sdk<E>(err: E) -> Error
where
    E: ProvideErrorMetadata + StdError,
{
    let message = err
        .message()
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());

    classify(err.code(), Some(&message))
}

fn timestamp(datetime: &aws_sdk_rds::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(datetime.secs(), datetime.subsec_nanos())
}

impl From<&types::DbInstance> for DbInstance {
    fn from(instance: &types::DbInstance) -> Self {
        Self {
            identifier: instance.db_instance_identifier().map(ToOwned::to_owned),
            status: instance.db_instance_status().map(ToOwned::to_owned),
            engine: instance.engine().map(ToOwned::to_owned),
            engine_version: instance.engine_version().map(ToOwned::to_owned),
            db_instance_class: instance.db_instance_class().map(ToOwned::to_owned),
            master_username: instance.master_username().map(ToOwned::to_owned),
            db_name: instance.db_name().map(ToOwned::to_owned),
            allocated_storage: instance.allocated_storage(),
            storage_type: instance.storage_type().map(ToOwned::to_owned),
            license_model: instance.license_model().map(ToOwned::to_owned),
            multi_az: instance.multi_az(),
            iops: instance.iops(),
            auto_minor_version_upgrade: instance.auto_minor_version_upgrade(),
            backup_retention_period: instance.backup_retention_period(),
            character_set_name: instance.character_set_name().map(ToOwned::to_owned),
            instance_create_time: instance.instance_create_time().and_then(timestamp),
            preferred_backup_window: instance.preferred_backup_window().map(ToOwned::to_owned),
            vpc_id: instance
                .db_subnet_group()
                .and_then(|group| group.vpc_id())
                .map(ToOwned::to_owned),
        }
    }
}

// -----------------------------------------------------------------------------
// Client structure

/// The lock only guards the lookup of the cell of a region, loading the
/// configuration of one region does not block calls to other regions.
#[derive(Default, Debug)]
pub struct Client {
    configs: Mutex<BTreeMap<String, Arc<OnceCell<SdkConfig>>>>,
}

impl Client {
    pub fn new() -> Self {
        Self::default()
    }

    async fn sdk_config(&self, region: &str) -> SdkConfig {
        let cell = self
            .configs
            .lock()
            .await
            .entry(region.to_string())
            .or_default()
            .to_owned();

        let config = cell
            .get_or_init(|| async {
                debug!(region = region, "Load sdk configuration for region");
                aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(region.to_string()))
                    .load()
                    .await
            })
            .await
            .to_owned();

        config
    }

    async fn rds(&self, region: &str) -> aws_sdk_rds::Client {
        aws_sdk_rds::Client::new(&self.sdk_config(region).await)
    }

    async fn iam(&self, region: &str) -> aws_sdk_iam::Client {
        aws_sdk_iam::Client::new(&self.sdk_config(region).await)
    }
}

#[async_trait]
impl Api for Client {
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    async fn list_instances(&self, region: &str, marker: Option<String>) -> Result<Page, Error> {
        let output = self
            .rds(region)
            .await
            .describe_db_instances()
            .set_marker(marker)
            .send()
            .await
            .map_err(from_sdk)?;

        Ok(Page {
            instances: output.db_instances().iter().map(DbInstance::from).collect(),
            marker: output.marker().map(ToOwned::to_owned),
        })
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    async fn list_tags(&self, arn: &Arn) -> Result<Vec<Tag>, Error> {
        let output = self
            .rds(&arn.region)
            .await
            .list_tags_for_resource()
            .resource_name(arn.to_string())
            .send()
            .await
            .map_err(from_sdk)?;

        Ok(output
            .tag_list()
            .iter()
            .filter_map(|tag| {
                tag.key()
                    .map(|key| Tag::new(key, tag.value().unwrap_or_default()))
            })
            .collect())
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(self, request), fields(identifier = %request.db_instance_identifier)))]
    async fn create_instance(
        &self,
        region: &str,
        request: &CreateDbInstance,
    ) -> Result<Option<DbInstance>, Error> {
        let output = self
            .rds(region)
            .await
            .create_db_instance()
            .db_instance_identifier(&request.db_instance_identifier)
            .set_db_name(request.db_name.to_owned())
            .set_db_instance_class(request.db_instance_class.to_owned())
            .set_vpc_security_group_ids(Some(request.vpc_security_group_ids.to_owned()))
            .set_engine(request.engine.to_owned())
            .set_engine_version(request.engine_version.to_owned())
            .set_license_model(request.license_model.to_owned())
            .set_storage_type(request.storage_type.to_owned())
            .set_multi_az(request.multi_az)
            .set_allocated_storage(request.allocated_storage)
            .set_iops(request.iops)
            .set_master_username(request.master_username.to_owned())
            .set_master_user_password(request.master_user_password.to_owned())
            .set_db_subnet_group_name(request.db_subnet_group_name.to_owned())
            .send()
            .await
            .map_err(from_sdk)?;

        Ok(output.db_instance().map(DbInstance::from))
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    async fn delete_instance(
        &self,
        region: &str,
        request: &DeleteDbInstance,
    ) -> Result<Option<DbInstance>, Error> {
        let output = self
            .rds(region)
            .await
            .delete_db_instance()
            .db_instance_identifier(&request.db_instance_identifier)
            .skip_final_snapshot(request.skip_final_snapshot)
            .set_final_db_snapshot_identifier(request.final_db_snapshot_identifier.to_owned())
            .send()
            .await
            .map_err(from_sdk)?;

        Ok(output.db_instance().map(DbInstance::from))
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    async fn add_tags(&self, arn: &Arn, tags: &[Tag]) -> Result<(), Error> {
        let tags = tags
            .iter()
            .map(|tag| types::Tag::builder().key(&tag.key).value(&tag.value).build())
            .collect();

        self.rds(&arn.region)
            .await
            .add_tags_to_resource()
            .resource_name(arn.to_string())
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(from_sdk)?;

        Ok(())
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    async fn delete_tags(&self, arn: &Arn, keys: &[String]) -> Result<(), Error> {
        self.rds(&arn.region)
            .await
            .remove_tags_from_resource()
            .resource_name(arn.to_string())
            .set_tag_keys(Some(keys.to_vec()))
            .send()
            .await
            .map_err(from_sdk)?;

        Ok(())
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    async fn get_caller_identity(&self, region: &str) -> Result<User, Error> {
        let output = self
            .iam(region)
            .await
            .get_user()
            .send()
            .await
            .map_err(from_sdk)?;

        match output.user() {
            Some(user) => Ok(User {
                arn: user.arn().to_string(),
            }),
            None => Err(Error::Sdk {
                code: None,
                message: "identity api returned no user".to_string(),
            }),
        }
    }
}

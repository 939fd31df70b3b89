//! # Enumerator module
//!
//! This module list live instances of regions and normalize them into
//! [`LiveInstanceRecord`], tags included.

use futures::future::join_all;
#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;
#[cfg(feature = "metrics")]
use prometheus::{opts, register_counter_vec, CounterVec};
use tracing::{debug, error, info, trace};

use crate::svc::{
    aws,
    identity::{self, AccountId},
    rds::{provider::Context, LiveInstanceRecord},
};

// -----------------------------------------------------------------------------
// Telemetry

#[cfg(feature = "metrics")]
static ENUMERATED_INSTANCES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "rds_provider_enumerated_instances",
            "number of live instances enumerated",
        ),
        &["region"]
    )
    .expect("metrics 'rds_provider_enumerated_instances' to not be already registered")
});

#[cfg(feature = "metrics")]
static ENUMERATION_FAILURE: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "rds_provider_enumeration_failure",
            "number of regions which failed to be enumerated",
        ),
        &["region"]
    )
    .expect("metrics 'rds_provider_enumeration_failure' to not be already registered")
});

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, PartialEq, Eq, Clone, Debug)]
pub enum Error {
    #[error("failed to list instances of region '{0}', {1}")]
    List(String, aws::Error),
    #[error("failed to resolve account of region '{0}', {1}")]
    Identity(String, identity::Error),
    #[error("failed to list tags of instance '{1}' in region '{0}', {2}")]
    Tags(String, String, aws::Error),
}

impl Error {
    /// returns the region which failed to be enumerated
    pub fn region(&self) -> &str {
        match self {
            Self::List(region, _) | Self::Identity(region, _) | Self::Tags(region, _, _) => region,
        }
    }
}

// -----------------------------------------------------------------------------
// Enumeration structure

/// Result of the enumeration of several regions, the records of a failed
/// region are dropped while other regions are kept
#[derive(Debug, Default)]
pub struct Enumeration {
    pub records: Vec<LiveInstanceRecord>,
    pub failures: Vec<Error>,
}

impl Enumeration {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// returns the records if every region has been enumerated, the first
    /// failure in region order otherwise
    pub fn into_result(self) -> Result<Vec<LiveInstanceRecord>, Error> {
        match self.failures.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(self.records),
        }
    }
}

// -----------------------------------------------------------------------------
// helpers

/// returns every live instance of the region, all pages are drained before
/// returning and any failure aborts the region
#[cfg_attr(feature = "trace", tracing::instrument(skip(ctx)))]
pub async fn list_region(ctx: &Context, region: &str) -> Result<Vec<LiveInstanceRecord>, Error> {
    let mut instances = vec![];
    let mut marker = None;

    loop {
        let page = ctx
            .api
            .list_instances(region, marker)
            .await
            .map_err(|err| Error::List(region.to_string(), err))?;

        trace!(
            region = region,
            count = page.instances.len(),
            "Receive page of instances"
        );

        instances.extend(page.instances);
        marker = page.marker;
        if marker.is_none() {
            break;
        }
    }

    let mut account: Option<AccountId> = None;
    let mut records = Vec::with_capacity(instances.len());
    for instance in instances {
        let name = match instance.identifier.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                debug!(region = region, "Skip instance without name");
                continue;
            }
        };

        if account.is_none() {
            account = Some(
                ctx.identity
                    .resolve_account(region)
                    .await
                    .map_err(|err| Error::Identity(region.to_string(), err))?,
            );
        }

        let arn = aws::Arn::db_instance(
            &ctx.config.partition,
            region,
            account.as_deref().unwrap_or_default(),
            &name,
        );

        let tags = ctx
            .api
            .list_tags(&arn)
            .await
            .map_err(|err| Error::Tags(region.to_string(), name.to_owned(), err))?;

        records.extend(LiveInstanceRecord::new(region, instance, tags));
    }

    Ok(records)
}

/// returns live instances of all regions, regions are enumerated concurrently
/// and merged in the order of the given list
#[cfg_attr(feature = "trace", tracing::instrument(skip(ctx)))]
pub async fn list_instances(ctx: &Context, regions: &[String]) -> Enumeration {
    let results = join_all(regions.iter().map(|region| list_region(ctx, region))).await;

    let mut enumeration = Enumeration::default();
    for (region, result) in regions.iter().zip(results) {
        match result {
            Ok(records) => {
                info!(
                    region = region.as_str(),
                    count = records.len(),
                    "Enumerate live instances of region"
                );

                #[cfg(feature = "metrics")]
                ENUMERATED_INSTANCES
                    .with_label_values(&[region.as_str()])
                    .inc_by(records.len() as f64);

                enumeration.records.extend(records);
            }
            Err(err) => {
                error!(
                    region = region.as_str(),
                    error = %err,
                    "Could not enumerate live instances of region"
                );

                #[cfg(feature = "metrics")]
                ENUMERATION_FAILURE
                    .with_label_values(&[region.as_str()])
                    .inc();

                enumeration.failures.push(err);
            }
        }
    }

    enumeration
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::svc::{
        aws::{
            memory::{Call, Memory, Operation},
            DbInstance, Tag,
        },
        cfg::Configuration,
        rds::Status,
    };

    fn instance(identifier: Option<&str>, status: &str) -> DbInstance {
        DbInstance {
            identifier: identifier.map(ToOwned::to_owned),
            status: Some(status.to_string()),
            engine: Some("postgres".to_string()),
            ..Default::default()
        }
    }

    fn context(api: Arc<Memory>) -> Context {
        Context::new(api, Arc::new(Configuration::default()))
    }

    #[tokio::test]
    async fn pages_are_drained_and_tags_flattened() {
        let api = Arc::new(Memory::new().with_page_size(2));
        for name in ["a", "b", "c", "d", "e"] {
            api.insert(
                "us-east-1",
                instance(Some(name), "available"),
                vec![Tag::new("owner", name)],
            );
        }

        let records = list_region(&context(api.to_owned()), "us-east-1")
            .await
            .unwrap();

        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(records[2].tag_map().get("owner").map(String::as_str), Some("c"));
        assert_eq!(records[2].status, Status::Available);

        let pages = api
            .journal()
            .into_iter()
            .filter(|call| call.operation() == Operation::ListInstances)
            .count();
        assert_eq!(pages, 3);
    }

    #[tokio::test]
    async fn nameless_instances_are_skipped() {
        let api = Arc::new(Memory::new());
        api.insert("us-east-1", instance(None, "available"), vec![]);
        api.insert("us-east-1", instance(Some(""), "available"), vec![]);
        api.insert("us-east-1", instance(Some("db1"), "creating"), vec![]);

        let records = list_region(&context(api.to_owned()), "us-east-1")
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "db1");
        assert!(!api
            .journal()
            .iter()
            .any(|call| matches!(call, Call::ListTags { arn } if arn.ends_with(":db:"))));
    }

    #[tokio::test]
    async fn tags_are_addressed_with_the_account() {
        let api = Arc::new(Memory::new());
        api.insert("eu-west-3", instance(Some("db1"), "available"), vec![]);

        list_region(&context(api.to_owned()), "eu-west-3")
            .await
            .unwrap();

        assert!(api.journal().contains(&Call::ListTags {
            arn: "arn:aws:rds:eu-west-3:123456789012:db:db1".to_string()
        }));
    }

    #[tokio::test]
    async fn failed_page_only_aborts_its_region() {
        let api = Arc::new(Memory::new().with_page_size(1));
        for region in ["us-east-1", "eu-west-1", "ap-south-1"] {
            api.insert(region, instance(Some("db1"), "available"), vec![]);
            api.insert(region, instance(Some("db2"), "available"), vec![]);
        }
        api.fail(
            Operation::ListInstances,
            Some("eu-west-1"),
            1,
            "Throttling",
            "Rate exceeded",
        );

        let regions = vec![
            "us-east-1".to_string(),
            "eu-west-1".to_string(),
            "ap-south-1".to_string(),
        ];
        let enumeration = list_instances(&context(api), &regions).await;

        assert!(!enumeration.is_complete());
        assert_eq!(enumeration.failures.len(), 1);
        assert_eq!(enumeration.failures[0].region(), "eu-west-1");

        let regions: Vec<_> = enumeration
            .records
            .iter()
            .map(|r| r.region.as_str())
            .collect();
        assert_eq!(
            regions,
            vec!["us-east-1", "us-east-1", "ap-south-1", "ap-south-1"]
        );

        assert!(matches!(
            enumeration.into_result(),
            Err(Error::List(region, aws::Error::Throttled { .. })) if region == "eu-west-1"
        ));
    }

    #[tokio::test]
    async fn failed_tags_abort_the_region() {
        let api = Arc::new(Memory::new());
        api.insert("us-east-1", instance(Some("db1"), "available"), vec![]);
        api.fail(Operation::ListTags, None, 0, "AccessDenied", "denied");

        let enumeration = list_instances(&context(api), &["us-east-1".to_string()]).await;
        assert!(enumeration.records.is_empty());
        assert!(matches!(
            enumeration.failures.as_slice(),
            [Error::Tags(_, name, _)] if name == "db1"
        ));
    }
}

//! # Provider module
//!
//! This module provide the contract exposed to the declarative engine and the
//! context shared by every operation of a reconciliation pass.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use tracing::debug;

use crate::svc::{
    aws::{Api, Arn},
    cfg::Configuration,
    identity::{self, AccountId, CallerIdentity, Cached, IdentityResolver, Static},
    rds::{
        enumerator, lifecycle, matcher,
        tags::{self, TagDiff},
        DesiredResource, ReconciliationRecord,
    },
};

// -----------------------------------------------------------------------------
// Context structure

/// contains the api, the account resolver and the configuration used during
/// reconciliation passes
#[derive(Clone)]
pub struct Context {
    pub api: Arc<dyn Api>,
    pub identity: Arc<dyn IdentityResolver>,
    pub config: Arc<Configuration>,
}

impl Context {
    /// returns a context which resolves the account from the configuration if
    /// set, from the identity api otherwise
    pub fn new(api: Arc<dyn Api>, config: Arc<Configuration>) -> Self {
        let identity: Arc<dyn IdentityResolver> = match &config.identity.account {
            Some(account) => Arc::new(Static::new(AccountId::new(account))),
            None => Arc::new(Cached::new(
                CallerIdentity::new(api.to_owned()),
                config.identity.cache,
                config.identity.ttl(),
            )),
        };

        Self {
            api,
            identity,
            config,
        }
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = identity;
        self
    }

    /// returns the address of the instance
    pub async fn arn(&self, region: &str, name: &str) -> Result<Arn, identity::Error> {
        let account = self.identity.resolve_account(region).await?;

        Ok(Arn::db_instance(
            &self.config.partition,
            region,
            &account,
            name,
        ))
    }
}

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Lifecycle(lifecycle::Error),
    #[error("{0}")]
    Tags(tags::Error),
}

impl From<lifecycle::Error> for Error {
    fn from(err: lifecycle::Error) -> Self {
        Self::Lifecycle(err)
    }
}

impl From<tags::Error> for Error {
    fn from(err: tags::Error) -> Self {
        Self::Tags(err)
    }
}

// -----------------------------------------------------------------------------
// Listing structure

/// Records of the regions which have been enumerated and the failures of the
/// others
#[derive(Debug, Default)]
pub struct Listing {
    pub records: Vec<ReconciliationRecord>,
    pub failures: Vec<enumerator::Error>,
}

impl Listing {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

// -----------------------------------------------------------------------------
// Provider trait

/// operations invoked by the declarative engine on instances
#[async_trait]
pub trait Provider {
    /// returns a record for every live instance of the configured regions, a
    /// region which failed to be enumerated is reported apart
    async fn list(&self) -> Listing;

    /// returns a record per declared instance, bound to its live counterpart.
    /// Records of a region which failed to be enumerated carry the failure.
    async fn prefetch(
        &self,
        desired: Vec<DesiredResource>,
    ) -> BTreeMap<String, ReconciliationRecord>;

    fn exists(&self, record: &ReconciliationRecord) -> bool;

    async fn create(&self, record: &mut ReconciliationRecord) -> Result<(), Error>;

    async fn destroy(&self, record: &mut ReconciliationRecord) -> Result<(), Error>;

    async fn set_tags(
        &self,
        record: &mut ReconciliationRecord,
        tags: &BTreeMap<String, String>,
    ) -> Result<TagDiff, Error>;
}

// -----------------------------------------------------------------------------
// RdsInstance structure

#[derive(Clone)]
pub struct RdsInstance {
    ctx: Context,
}

impl From<Context> for RdsInstance {
    fn from(ctx: Context) -> Self {
        Self { ctx }
    }
}

impl RdsInstance {
    pub fn new(ctx: Context) -> Self {
        Self::from(ctx)
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// returns the configured regions, or the declared ones in order of
    /// appearance when none is configured
    fn regions(&self, desired: &[DesiredResource]) -> Vec<String> {
        if !self.ctx.config.regions.is_empty() {
            return self.ctx.config.regions.to_owned();
        }

        let mut regions: Vec<String> = vec![];
        for resource in desired {
            if !regions.contains(&resource.region) {
                regions.push(resource.region.to_owned());
            }
        }

        regions
    }
}

#[async_trait]
impl Provider for RdsInstance {
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    async fn list(&self) -> Listing {
        let enumeration =
            enumerator::list_instances(&self.ctx, &self.ctx.config.regions).await;

        Listing {
            records: enumeration
                .records
                .into_iter()
                .map(ReconciliationRecord::from)
                .collect(),
            failures: enumeration.failures,
        }
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(self, desired)))]
    async fn prefetch(
        &self,
        desired: Vec<DesiredResource>,
    ) -> BTreeMap<String, ReconciliationRecord> {
        let regions = self.regions(&desired);
        debug!(
            regions = regions.join(",").as_str(),
            count = desired.len(),
            "Prefetch live instances of declared instances"
        );

        let enumeration = enumerator::list_instances(&self.ctx, &regions).await;

        let mut records = matcher::prefetch(desired, enumeration.records);
        matcher::mark_unenumerated(&mut records, &enumeration.failures);
        records
    }

    fn exists(&self, record: &ReconciliationRecord) -> bool {
        lifecycle::exists(record)
    }

    async fn create(&self, record: &mut ReconciliationRecord) -> Result<(), Error> {
        Ok(lifecycle::create(&self.ctx, record).await?)
    }

    async fn destroy(&self, record: &mut ReconciliationRecord) -> Result<(), Error> {
        Ok(lifecycle::destroy(&self.ctx, record).await?)
    }

    async fn set_tags(
        &self,
        record: &mut ReconciliationRecord,
        tags: &BTreeMap<String, String>,
    ) -> Result<TagDiff, Error> {
        Ok(tags::set_tags(&self.ctx, record, tags).await?)
    }
}

//! # Identity module
//!
//! This module provide resolvers of the account identifier needed to address
//! resources of a region.
//!
//! The [`CallerIdentity`] resolver asks the identity api for the user behind
//! the credentials. When the credentials are not allowed to do so, the denial
//! message still contains the address of the user, e.g.
//! `User: arn:aws:iam::123456789012:user/jane is not authorized to perform:
//! iam:GetUser`, and the account identifier is read from it.

use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
    ops::Deref,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::{sync::RwLock, time::Instant};
use tracing::{debug, trace};

use crate::svc::{aws, cfg::CachePolicy};

// -----------------------------------------------------------------------------
// Patterns

/// account identifier of a user address found in a denial message
static DENIED_USER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"arn:[^:\s]+:iam::(\d+):user").expect("denied user pattern to be valid")
});

/// account identifier of any identity service address
static IDENTITY_ARN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^arn:[^:\s]+:iam::(\d+):").expect("identity address pattern to be valid")
});

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, PartialEq, Eq, Clone, Debug)]
pub enum Error {
    #[error("failed to find an account identifier in the denial message '{0}'")]
    MissingAccount(String),
    #[error("failed to find an account identifier in the user address '{0}'")]
    InvalidUserArn(String),
    #[error("failed to query identity api in region '{0}', {1}")]
    Api(String, aws::Error),
}

// -----------------------------------------------------------------------------
// AccountId structure

/// Numeric identifier of an account
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Debug)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl Display for AccountId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Deref for AccountId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// -----------------------------------------------------------------------------
// helpers

/// returns the account identifier embedded in a denial message
pub fn from_denial(message: &str) -> Result<AccountId, Error> {
    DENIED_USER
        .captures(message)
        .and_then(|captures| captures.get(1))
        .map(|id| AccountId::new(id.as_str()))
        .ok_or_else(|| Error::MissingAccount(message.to_string()))
}

/// returns the account identifier of an identity service address
pub fn from_arn(arn: &str) -> Result<AccountId, Error> {
    IDENTITY_ARN
        .captures(arn)
        .and_then(|captures| captures.get(1))
        .map(|id| AccountId::new(id.as_str()))
        .ok_or_else(|| Error::InvalidUserArn(arn.to_string()))
}

// -----------------------------------------------------------------------------
// IdentityResolver trait

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve_account(&self, region: &str) -> Result<AccountId, Error>;
}

// -----------------------------------------------------------------------------
// CallerIdentity structure

/// Resolves the account by asking the identity api, falling back on the
/// denial message when the credentials are not allowed to
#[derive(Clone)]
pub struct CallerIdentity {
    api: Arc<dyn aws::Api>,
}

impl CallerIdentity {
    pub fn new(api: Arc<dyn aws::Api>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl IdentityResolver for CallerIdentity {
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    async fn resolve_account(&self, region: &str) -> Result<AccountId, Error> {
        match self.api.get_caller_identity(region).await {
            Ok(user) => from_arn(&user.arn),
            Err(aws::Error::AccessDenied { message }) => {
                debug!(
                    region = region,
                    "Identity api denied the request, read account identifier from the denial message"
                );
                from_denial(&message)
            }
            Err(err) => Err(Error::Api(region.to_string(), err)),
        }
    }
}

// -----------------------------------------------------------------------------
// Static structure

/// Always resolves to the same account, without any api call
#[derive(Clone, Debug)]
pub struct Static(AccountId);

impl Static {
    pub fn new(account: AccountId) -> Self {
        Self(account)
    }
}

#[async_trait]
impl IdentityResolver for Static {
    async fn resolve_account(&self, _region: &str) -> Result<AccountId, Error> {
        Ok(self.0.to_owned())
    }
}

// -----------------------------------------------------------------------------
// Cached structure

/// Keeps resolved accounts per region according to the cache policy
pub struct Cached<R> {
    inner: R,
    policy: CachePolicy,
    ttl: Option<Duration>,
    entries: RwLock<BTreeMap<String, (AccountId, Instant)>>,
}

impl<R> Cached<R>
where
    R: IdentityResolver,
{
    pub fn new(inner: R, policy: CachePolicy, ttl: Option<Duration>) -> Self {
        Self {
            inner,
            policy,
            ttl,
            entries: RwLock::default(),
        }
    }

    fn fresh(&self, resolved_at: &Instant) -> bool {
        self.ttl.map_or(true, |ttl| resolved_at.elapsed() < ttl)
    }

    /// drop every cached account
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl<R> IdentityResolver for Cached<R>
where
    R: IdentityResolver,
{
    async fn resolve_account(&self, region: &str) -> Result<AccountId, Error> {
        if self.policy == CachePolicy::Disabled {
            return self.inner.resolve_account(region).await;
        }

        if let Some((account, resolved_at)) = self.entries.read().await.get(region) {
            if self.fresh(resolved_at) {
                trace!(region = region, "Use cached account identifier");
                return Ok(account.to_owned());
            }
        }

        let account = self.inner.resolve_account(region).await?;
        self.entries
            .write()
            .await
            .insert(region.to_string(), (account.to_owned(), Instant::now()));

        Ok(account)
    }
}

//! # Reconciler module
//!
//! This module drive the provider for declared instances the way the
//! declarative engine does: compare the declared end-state with the presence
//! of the instance, then create, destroy or re-tag it.

use std::collections::BTreeMap;

#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;
#[cfg(feature = "metrics")]
use prometheus::{opts, register_counter_vec, CounterVec};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::svc::rds::{
    attribute, enumerator,
    provider::{self, Provider},
    tags::TagDiff,
    DesiredResource, Ensure, ReconciliationRecord,
};

// -----------------------------------------------------------------------------
// Telemetry

#[cfg(feature = "metrics")]
static RECONCILIATION_SUCCESS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "rds_provider_reconciliation_success",
            "number of successful reconciliation"
        ),
        &["action"]
    )
    .expect("metrics 'rds_provider_reconciliation_success' to not be already registered")
});

#[cfg(feature = "metrics")]
static RECONCILIATION_FAILED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "rds_provider_reconciliation_failed",
            "number of failed reconciliation"
        ),
        &["action"]
    )
    .expect("metrics 'rds_provider_reconciliation_failed' to not be already registered")
});

#[cfg(feature = "metrics")]
static RECONCILIATION_DURATION: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "rds_provider_reconciliation_duration",
            "duration of reconciliation",
        ),
        &["action", "unit"]
    )
    .expect("metrics 'rds_provider_reconciliation_duration' to not be already registered")
});

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to reconcile instance '{0}', it has no declaration")]
    Undeclared(String),
    #[error("failed to reconcile instance '{0}', its live state is unknown, {1}")]
    Unenumerated(String, enumerator::Error),
    #[error("failed to {1} instance '{0}', {2}")]
    Provider(String, Action, provider::Error),
}

// -----------------------------------------------------------------------------
// Action enumeration

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Action {
    Create,
    Destroy,
    Retag,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Destroy => write!(f, "destroy"),
            Self::Retag => write!(f, "retag"),
        }
    }
}

// -----------------------------------------------------------------------------
// Outcome enumeration

#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Outcome {
    Created,
    Destroyed,
    Retagged(TagDiff),
    Unchanged,
}

// -----------------------------------------------------------------------------
// helpers

/// bring the instance of the record to its declared end-state
#[cfg_attr(feature = "trace", tracing::instrument(skip(provider, record), fields(name = record.name(), region = record.region())))]
pub async fn apply<P>(provider: &P, record: &mut ReconciliationRecord) -> Result<Outcome, Error>
where
    P: Provider + Sync + ?Sized,
{
    let name = record.name().to_string();
    let desired = record
        .desired()
        .ok_or_else(|| Error::Undeclared(name.to_owned()))?;

    if let Some(err) = record.failure() {
        error!(
            name = name.as_str(),
            region = record.region(),
            error = %err,
            "Skip instance, its region failed to be enumerated"
        );

        return Err(Error::Unenumerated(name, err.to_owned()));
    }

    let ensure = desired.ensure;
    let tags = desired.tags.to_owned();
    let drift = attribute::drift(desired, record);

    let action = match (ensure, provider.exists(record)) {
        (Ensure::Present, false) => Action::Create,
        (Ensure::Absent, true) => Action::Destroy,
        (Ensure::Absent, false) => return Ok(Outcome::Unchanged),
        (Ensure::Present, true) => {
            for attribute in &drift {
                warn!(
                    name = name.as_str(),
                    attribute = %attribute,
                    "Read-only attribute differs from declaration, it will not be applied"
                );
            }

            if record.tags() == tags {
                return Ok(Outcome::Unchanged);
            }

            Action::Retag
        }
    };

    let begin = Instant::now();
    let result = match action {
        Action::Create => provider.create(record).await.map(|_| Outcome::Created),
        Action::Destroy => provider.destroy(record).await.map(|_| Outcome::Destroyed),
        Action::Retag => provider
            .set_tags(record, &tags)
            .await
            .map(Outcome::Retagged),
    };

    #[cfg(feature = "metrics")]
    RECONCILIATION_DURATION
        .with_label_values(&[&action.to_string(), "us"])
        .inc_by(begin.elapsed().as_micros() as f64);

    match result {
        Ok(outcome) => {
            info!(
                name = name.as_str(),
                action = %action,
                duration = begin.elapsed().as_micros() as u64,
                "Successfully reconcile instance"
            );

            #[cfg(feature = "metrics")]
            RECONCILIATION_SUCCESS
                .with_label_values(&[&action.to_string()])
                .inc();

            Ok(outcome)
        }
        Err(err) => {
            error!(
                name = name.as_str(),
                action = %action,
                error = %err,
                "Failed to reconcile instance"
            );

            #[cfg(feature = "metrics")]
            RECONCILIATION_FAILED
                .with_label_values(&[&action.to_string()])
                .inc();

            Err(Error::Provider(name, action, err))
        }
    }
}

/// prefetch the declared instances and apply each of them, a failure on one
/// instance or on the enumeration of one region does not prevent others from
/// being reconciled
#[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
pub async fn pass<P>(
    provider: &P,
    desired: Vec<DesiredResource>,
) -> BTreeMap<String, Result<Outcome, Error>>
where
    P: Provider + Sync + ?Sized,
{
    let records = provider.prefetch(desired).await;

    let mut report = BTreeMap::new();
    for (name, mut record) in records {
        let outcome = apply(provider, &mut record).await;
        report.insert(name, outcome);
    }

    report
}

//! # RDS provider
//!
//! A provider that reconciles declared relational database instances against
//! the live state reported by the cloud provider's management api. It lists
//! live instances across regions, pairs them with their declarations and
//! creates, destroys or re-tags them on behalf of a declarative engine.

pub mod logging;
pub mod svc;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to initialize logging system, {0}")]
    Logging(logging::Error),
    #[error("failed to load configuration, {0}")]
    Configuration(svc::cfg::Error),
    #[error("failed to enumerate live instances, {0}")]
    Enumeration(svc::rds::enumerator::Error),
    #[error("failed to reconcile instance, {0}")]
    Reconcile(svc::rds::reconciler::Error),
}

impl From<logging::Error> for Error {
    fn from(err: logging::Error) -> Self {
        Self::Logging(err)
    }
}

impl From<svc::cfg::Error> for Error {
    fn from(err: svc::cfg::Error) -> Self {
        Self::Configuration(err)
    }
}

impl From<svc::rds::enumerator::Error> for Error {
    fn from(err: svc::rds::enumerator::Error) -> Self {
        Self::Enumeration(err)
    }
}

impl From<svc::rds::reconciler::Error> for Error {
    fn from(err: svc::rds::reconciler::Error) -> Self {
        Self::Reconcile(err)
    }
}

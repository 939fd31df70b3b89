//! # AWS module
//!
//! This module provide the capability interface used to talk to the
//! relational database service and the identity service, the raw structures
//! they exchange and the classification of their failures.

use std::fmt::{self, Display, Formatter};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "aws")]
pub mod client;
pub mod memory;

// -----------------------------------------------------------------------------
// Constants

/// Error codes returned when the caller is not allowed to perform an action
const ACCESS_DENIED_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "UnauthorizedOperation",
];

/// Error codes returned when the resource to create already exists
const ALREADY_EXISTS_CODES: &[&str] = &[
    "DBInstanceAlreadyExists",
    "DBInstanceAlreadyExistsFault",
    "EntityAlreadyExists",
];

/// Error codes returned when the addressed resource does not exist
const NOT_FOUND_CODES: &[&str] = &[
    "DBInstanceNotFound",
    "DBInstanceNotFoundFault",
    "NoSuchEntity",
];

/// Error codes returned when the request rate is too high
const THROTTLING_CODES: &[&str] = &["Throttling", "ThrottlingException", "RequestLimitExceeded"];

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, PartialEq, Eq, Clone, Debug)]
pub enum Error {
    #[error("access denied, {message}")]
    AccessDenied { message: String },
    #[error("resource already exists, {message}")]
    AlreadyExists { message: String },
    #[error("resource not found, {message}")]
    NotFound { message: String },
    #[error("rate limit exceeded, {message}")]
    Throttled { message: String },
    #[error("failed to execute request ({}), {message}", code.as_deref().unwrap_or("<none>"))]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl Error {
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::AccessDenied { message }
            | Self::AlreadyExists { message }
            | Self::NotFound { message }
            | Self::Throttled { message }
            | Self::Sdk { message, .. } => message,
        }
    }
}

/// returns the [`Error`] matching the code and message reported by the api
pub fn classify(code: Option<&str>, message: Option<&str>) -> Error {
    let message = message.unwrap_or("unknown error").to_string();

    match code {
        Some(c) if ACCESS_DENIED_CODES.contains(&c) => Error::AccessDenied { message },
        Some(c) if ALREADY_EXISTS_CODES.contains(&c) => Error::AlreadyExists { message },
        Some(c) if NOT_FOUND_CODES.contains(&c) => Error::NotFound { message },
        Some(c) if THROTTLING_CODES.contains(&c) => Error::Throttled { message },
        _ => Error::Sdk {
            code: code.map(ToOwned::to_owned),
            message,
        },
    }
}

// -----------------------------------------------------------------------------
// Arn structure

/// Fully-qualified address of a resource
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Debug)]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account: String,
    pub resource: String,
}

impl Arn {
    /// returns the address of a database instance
    pub fn db_instance(partition: &str, region: &str, account: &str, identifier: &str) -> Self {
        Self {
            partition: partition.to_string(),
            service: "rds".to_string(),
            region: region.to_string(),
            account: account.to_string(),
            resource: format!("db:{identifier}"),
        }
    }
}

impl Display for Arn {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account, self.resource
        )
    }
}

// -----------------------------------------------------------------------------
// Tag structure

#[derive(Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Debug)]
pub struct Tag {
    #[serde(rename = "key")]
    pub key: String,
    #[serde(rename = "value")]
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

// -----------------------------------------------------------------------------
// DbInstance structure

/// Instance descriptor as reported by the api
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct DbInstance {
    #[serde(rename = "identifier")]
    pub identifier: Option<String>,
    #[serde(rename = "status")]
    pub status: Option<String>,
    #[serde(rename = "engine")]
    pub engine: Option<String>,
    #[serde(rename = "engineVersion")]
    pub engine_version: Option<String>,
    #[serde(rename = "dbInstanceClass")]
    pub db_instance_class: Option<String>,
    #[serde(rename = "masterUsername")]
    pub master_username: Option<String>,
    #[serde(rename = "dbName")]
    pub db_name: Option<String>,
    #[serde(rename = "allocatedStorage")]
    pub allocated_storage: Option<i32>,
    #[serde(rename = "storageType")]
    pub storage_type: Option<String>,
    #[serde(rename = "licenseModel")]
    pub license_model: Option<String>,
    #[serde(rename = "multiAz")]
    pub multi_az: Option<bool>,
    #[serde(rename = "iops")]
    pub iops: Option<i32>,
    #[serde(rename = "autoMinorVersionUpgrade")]
    pub auto_minor_version_upgrade: Option<bool>,
    #[serde(rename = "backupRetentionPeriod")]
    pub backup_retention_period: Option<i32>,
    #[serde(rename = "characterSetName")]
    pub character_set_name: Option<String>,
    #[serde(rename = "instanceCreateTime")]
    pub instance_create_time: Option<DateTime<Utc>>,
    #[serde(rename = "preferredBackupWindow")]
    pub preferred_backup_window: Option<String>,
    #[serde(rename = "vpcId")]
    pub vpc_id: Option<String>,
}

// -----------------------------------------------------------------------------
// Page structure

/// One page of the instance listing, `marker` is set when more pages remain
#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct Page {
    pub instances: Vec<DbInstance>,
    pub marker: Option<String>,
}

// -----------------------------------------------------------------------------
// Request structures

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct CreateDbInstance {
    #[serde(rename = "dbInstanceIdentifier")]
    pub db_instance_identifier: String,
    #[serde(rename = "dbName")]
    pub db_name: Option<String>,
    #[serde(rename = "dbInstanceClass")]
    pub db_instance_class: Option<String>,
    #[serde(rename = "vpcSecurityGroupIds")]
    pub vpc_security_group_ids: Vec<String>,
    #[serde(rename = "engine")]
    pub engine: Option<String>,
    #[serde(rename = "engineVersion")]
    pub engine_version: Option<String>,
    #[serde(rename = "licenseModel")]
    pub license_model: Option<String>,
    #[serde(rename = "storageType")]
    pub storage_type: Option<String>,
    #[serde(rename = "multiAz")]
    pub multi_az: Option<bool>,
    #[serde(rename = "allocatedStorage")]
    pub allocated_storage: Option<i32>,
    #[serde(rename = "iops")]
    pub iops: Option<i32>,
    #[serde(rename = "masterUsername")]
    pub master_username: Option<String>,
    #[serde(rename = "masterUserPassword", skip_serializing)]
    pub master_user_password: Option<String>,
    #[serde(rename = "dbSubnetGroupName")]
    pub db_subnet_group_name: Option<String>,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct DeleteDbInstance {
    #[serde(rename = "dbInstanceIdentifier")]
    pub db_instance_identifier: String,
    #[serde(rename = "skipFinalSnapshot")]
    pub skip_final_snapshot: bool,
    #[serde(rename = "finalDbSnapshotIdentifier")]
    pub final_db_snapshot_identifier: Option<String>,
}

// -----------------------------------------------------------------------------
// User structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct User {
    #[serde(rename = "arn")]
    pub arn: String,
}

// -----------------------------------------------------------------------------
// Api trait

/// Calls consumed from the relational database service and the identity
/// service. Implementations do not retry, failures are returned as is.
#[async_trait]
pub trait Api: Send + Sync {
    /// returns one page of the instances of the region, starting at `marker`
    async fn list_instances(&self, region: &str, marker: Option<String>) -> Result<Page, Error>;

    async fn list_tags(&self, arn: &Arn) -> Result<Vec<Tag>, Error>;

    async fn create_instance(
        &self,
        region: &str,
        request: &CreateDbInstance,
    ) -> Result<Option<DbInstance>, Error>;

    async fn delete_instance(
        &self,
        region: &str,
        request: &DeleteDbInstance,
    ) -> Result<Option<DbInstance>, Error>;

    /// add the tags to the resource, overwriting values of existing keys
    async fn add_tags(&self, arn: &Arn, tags: &[Tag]) -> Result<(), Error>;

    async fn delete_tags(&self, arn: &Arn, keys: &[String]) -> Result<(), Error>;

    /// returns the user behind the credentials used in the region
    async fn get_caller_identity(&self, region: &str) -> Result<User, Error>;
}

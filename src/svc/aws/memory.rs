//! # Memory module
//!
//! This module provide an in-memory implementation of the [`Api`] which keeps
//! instances and tags per region and records every call it receives. It is
//! used to rehearse a reconciliation pass without touching a real account.

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use tracing::trace;

use crate::svc::aws::{
    classify, Api, Arn, CreateDbInstance, DbInstance, DeleteDbInstance, Error, Page, Tag, User,
};

// -----------------------------------------------------------------------------
// Constants

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const DEFAULT_USER_ARN: &str = "arn:aws:iam::123456789012:user/memory";

// -----------------------------------------------------------------------------
// Operation enumeration

#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug)]
pub enum Operation {
    ListInstances,
    ListTags,
    CreateInstance,
    DeleteInstance,
    AddTags,
    DeleteTags,
    GetCallerIdentity,
}

// -----------------------------------------------------------------------------
// Call enumeration

/// A call received by the [`Memory`] api
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Call {
    ListInstances {
        region: String,
        marker: Option<String>,
    },
    ListTags {
        arn: String,
    },
    CreateInstance {
        region: String,
        request: CreateDbInstance,
    },
    DeleteInstance {
        region: String,
        request: DeleteDbInstance,
    },
    AddTags {
        arn: String,
        tags: Vec<Tag>,
    },
    DeleteTags {
        arn: String,
        keys: Vec<String>,
    },
    GetCallerIdentity {
        region: String,
    },
}

impl Call {
    pub fn operation(&self) -> Operation {
        match self {
            Self::ListInstances { .. } => Operation::ListInstances,
            Self::ListTags { .. } => Operation::ListTags,
            Self::CreateInstance { .. } => Operation::CreateInstance,
            Self::DeleteInstance { .. } => Operation::DeleteInstance,
            Self::AddTags { .. } => Operation::AddTags,
            Self::DeleteTags { .. } => Operation::DeleteTags,
            Self::GetCallerIdentity { .. } => Operation::GetCallerIdentity,
        }
    }

    /// returns true if the call changes the state of the account
    pub fn is_write(&self) -> bool {
        matches!(
            self.operation(),
            Operation::CreateInstance
                | Operation::DeleteInstance
                | Operation::AddTags
                | Operation::DeleteTags
        )
    }
}

// -----------------------------------------------------------------------------
// Identity enumeration

/// Answer given to identity queries
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Identity {
    User(String),
    Denied(String),
}

impl Default for Identity {
    fn default() -> Self {
        Self::User(DEFAULT_USER_ARN.to_string())
    }
}

// -----------------------------------------------------------------------------
// Failure structure

#[derive(PartialEq, Eq, Clone, Debug)]
struct Failure {
    operation: Operation,
    region: Option<String>,
    remaining: usize,
    code: String,
    message: String,
}

// -----------------------------------------------------------------------------
// State structure

/// tags are kept by region and instance identifier, whatever the partition and
/// account of the address used to reach them
#[derive(Default, Debug)]
struct State {
    instances: BTreeMap<String, Vec<DbInstance>>,
    tags: BTreeMap<(String, String), Vec<Tag>>,
    identity: Identity,
    failures: Vec<Failure>,
    journal: Vec<Call>,
}

impl State {
    fn find(&self, region: &str, identifier: &str) -> Option<&DbInstance> {
        self.instances
            .get(region)
            .and_then(|instances| {
                instances
                    .iter()
                    .find(|i| i.identifier.as_deref() == Some(identifier))
            })
    }

    fn tags_of(&self, arn: &Arn) -> Option<&Vec<Tag>> {
        self.tags.get(&tag_key(arn))
    }

    /// record the call and returns the injected failure if one is due
    fn record(&mut self, call: Call, region: &str) -> Result<(), Error> {
        let operation = call.operation();

        trace!(operation = ?operation, region = region, "Receive call on in-memory api");
        self.journal.push(call);

        let position = self.failures.iter().position(|f| {
            f.operation == operation && f.region.as_deref().map_or(true, |r| r == region)
        });

        if let Some(idx) = position {
            let failure = &mut self.failures[idx];
            if failure.remaining > 0 {
                failure.remaining -= 1;
                return Ok(());
            }

            let failure = self.failures.remove(idx);
            return Err(classify(Some(&failure.code), Some(&failure.message)));
        }

        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Memory structure

#[derive(Debug)]
pub struct Memory {
    page_size: usize,
    state: Mutex<State>,
}

impl Default for Memory {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            state: Mutex::default(),
        }
    }
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_identity(self, identity: Identity) -> Self {
        self.lock().identity = identity;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// add an instance and its tags to the region
    pub fn insert(&self, region: &str, instance: DbInstance, tags: Vec<Tag>) {
        let mut state = self.lock();

        if let Some(identifier) = &instance.identifier {
            state
                .tags
                .insert((region.to_string(), identifier.to_owned()), tags);
        }

        state
            .instances
            .entry(region.to_string())
            .or_default()
            .push(instance);
    }

    /// make the `after + 1`-th call of the operation fail with the given
    /// error code, optionally only for calls targeting the region
    pub fn fail(
        &self,
        operation: Operation,
        region: Option<&str>,
        after: usize,
        code: &str,
        message: &str,
    ) {
        self.lock().failures.push(Failure {
            operation,
            region: region.map(ToOwned::to_owned),
            remaining: after,
            code: code.to_string(),
            message: message.to_string(),
        });
    }

    /// returns every call received so far
    pub fn journal(&self) -> Vec<Call> {
        self.lock().journal.to_owned()
    }

    /// returns calls which changed the state of the account
    pub fn writes(&self) -> Vec<Call> {
        self.journal().into_iter().filter(Call::is_write).collect()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    pub fn instance(&self, region: &str, identifier: &str) -> Option<DbInstance> {
        self.lock().find(region, identifier).cloned()
    }

    /// set the status of an instance, e.g. to make it available once created
    pub fn set_status(&self, region: &str, identifier: &str, status: &str) {
        let mut state = self.lock();

        if let Some(instances) = state.instances.get_mut(region) {
            for instance in instances.iter_mut() {
                if instance.identifier.as_deref() == Some(identifier) {
                    instance.status = Some(status.to_string());
                }
            }
        }
    }

    /// returns the tags of the resource as a sorted map
    pub fn tags(&self, arn: &Arn) -> BTreeMap<String, String> {
        self.lock()
            .tags_of(arn)
            .map(|tags| {
                tags.iter()
                    .map(|t| (t.key.to_owned(), t.value.to_owned()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// returns the region and the instance identifier of a resource address
fn tag_key(arn: &Arn) -> (String, String) {
    (
        arn.region.to_owned(),
        arn.resource.trim_start_matches("db:").to_string(),
    )
}

#[async_trait]
impl Api for Memory {
    async fn list_instances(&self, region: &str, marker: Option<String>) -> Result<Page, Error> {
        let mut state = self.lock();
        state.record(
            Call::ListInstances {
                region: region.to_string(),
                marker: marker.to_owned(),
            },
            region,
        )?;

        let start = match &marker {
            None => 0,
            Some(marker) => marker.parse::<usize>().map_err(|_| Error::Sdk {
                code: Some("InvalidParameterValue".to_string()),
                message: format!("invalid marker '{marker}'"),
            })?,
        };

        let instances = state.instances.get(region).cloned().unwrap_or_default();
        let end = (start + self.page_size).min(instances.len());
        let page = instances.get(start..end).map(<[_]>::to_vec).unwrap_or_default();

        Ok(Page {
            instances: page,
            marker: (end < instances.len()).then(|| end.to_string()),
        })
    }

    async fn list_tags(&self, arn: &Arn) -> Result<Vec<Tag>, Error> {
        let mut state = self.lock();
        state.record(
            Call::ListTags {
                arn: arn.to_string(),
            },
            &arn.region,
        )?;

        let identifier = arn.resource.trim_start_matches("db:");
        if state.find(&arn.region, identifier).is_none() {
            return Err(Error::NotFound {
                message: format!("DBInstance {identifier} not found"),
            });
        }

        Ok(state.tags_of(arn).cloned().unwrap_or_default())
    }

    async fn create_instance(
        &self,
        region: &str,
        request: &CreateDbInstance,
    ) -> Result<Option<DbInstance>, Error> {
        let mut state = self.lock();
        state.record(
            Call::CreateInstance {
                region: region.to_string(),
                request: request.to_owned(),
            },
            region,
        )?;

        if state.find(region, &request.db_instance_identifier).is_some() {
            return Err(Error::AlreadyExists {
                message: "DB instance already exists".to_string(),
            });
        }

        let instance = DbInstance {
            identifier: Some(request.db_instance_identifier.to_owned()),
            status: Some("creating".to_string()),
            engine: request.engine.to_owned(),
            engine_version: request.engine_version.to_owned(),
            db_instance_class: request.db_instance_class.to_owned(),
            master_username: request.master_username.to_owned(),
            db_name: request.db_name.to_owned(),
            allocated_storage: request.allocated_storage,
            storage_type: request.storage_type.to_owned(),
            license_model: request.license_model.to_owned(),
            multi_az: request.multi_az,
            iops: request.iops,
            ..Default::default()
        };

        state
            .instances
            .entry(region.to_string())
            .or_default()
            .push(instance.to_owned());

        Ok(Some(instance))
    }

    async fn delete_instance(
        &self,
        region: &str,
        request: &DeleteDbInstance,
    ) -> Result<Option<DbInstance>, Error> {
        let mut state = self.lock();
        state.record(
            Call::DeleteInstance {
                region: region.to_string(),
                request: request.to_owned(),
            },
            region,
        )?;

        let identifier = request.db_instance_identifier.as_str();
        let instance = match state.find(region, identifier) {
            Some(instance) => instance.to_owned(),
            None => {
                return Err(Error::NotFound {
                    message: format!("DBInstance {identifier} not found"),
                })
            }
        };

        if instance.status.as_deref() == Some("creating") {
            return Err(Error::Sdk {
                code: Some("InvalidDBInstanceState".to_string()),
                message: format!("instance {identifier} is not in available state"),
            });
        }

        if let Some(instances) = state.instances.get_mut(region) {
            instances.retain(|i| i.identifier.as_deref() != Some(identifier));
        }

        state
            .tags
            .remove(&(region.to_string(), identifier.to_string()));

        Ok(Some(instance))
    }

    async fn add_tags(&self, arn: &Arn, tags: &[Tag]) -> Result<(), Error> {
        let mut state = self.lock();
        state.record(
            Call::AddTags {
                arn: arn.to_string(),
                tags: tags.to_vec(),
            },
            &arn.region,
        )?;

        let current = state.tags.entry(tag_key(arn)).or_default();
        for tag in tags {
            match current.iter_mut().find(|t| t.key == tag.key) {
                Some(existing) => existing.value = tag.value.to_owned(),
                None => current.push(tag.to_owned()),
            }
        }

        Ok(())
    }

    async fn delete_tags(&self, arn: &Arn, keys: &[String]) -> Result<(), Error> {
        let mut state = self.lock();
        state.record(
            Call::DeleteTags {
                arn: arn.to_string(),
                keys: keys.to_vec(),
            },
            &arn.region,
        )?;

        if let Some(current) = state.tags.get_mut(&tag_key(arn)) {
            current.retain(|t| !keys.contains(&t.key));
        }

        Ok(())
    }

    async fn get_caller_identity(&self, region: &str) -> Result<User, Error> {
        let mut state = self.lock();
        state.record(
            Call::GetCallerIdentity {
                region: region.to_string(),
            },
            region,
        )?;

        match &state.identity {
            Identity::User(arn) => Ok(User {
                arn: arn.to_owned(),
            }),
            Identity::Denied(message) => Err(Error::AccessDenied {
                message: message.to_owned(),
            }),
        }
    }
}

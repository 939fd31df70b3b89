//! # RDS module
//!
//! This module provide the declared and live representations of a database
//! instance, the record used to reconcile them and the components which
//! enumerate, match, create, destroy and re-tag instances.

use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::svc::aws::{CreateDbInstance, DbInstance, DeleteDbInstance};

pub use crate::svc::aws::{Arn, Tag};

pub mod attribute;
pub mod enumerator;
pub mod lifecycle;
pub mod matcher;
pub mod provider;
pub mod reconciler;
pub mod tags;

// -----------------------------------------------------------------------------
// Constants

/// Tag added on creation with the name of the instance as value
pub const NAME_TAG: &str = "Name";

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to parse status '{0}'")]
    ParseStatus(String),
    #[error("failed to parse ensure '{0}', available options are 'present' or 'absent'")]
    ParseEnsure(String),
    #[error("failed to deserialize declarations from yaml, {0}")]
    Yaml(serde_yaml::Error),
    #[error("failed to deserialize declarations from json, {0}")]
    Json(serde_json::Error),
}

// -----------------------------------------------------------------------------
// Status enumeration

/// Lifecycle status of an instance
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Debug)]
pub enum Status {
    Present,
    Creating,
    Available,
    Absent,
    Other(String),
}

impl Status {
    /// returns true if the instance is considered as existing
    pub fn exists(&self) -> bool {
        matches!(self, Self::Present | Self::Creating | Self::Available)
    }

    /// returns the status matching the instance status reported by the api
    pub fn from_provider(status: Option<&str>) -> Self {
        match status {
            None => Self::Present,
            Some("available") => Self::Available,
            Some("creating") => Self::Creating,
            Some("deleted") => Self::Absent,
            Some("deleting") => Self::Other("deleting".to_string()),
            Some(_) => Self::Present,
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present => write!(f, "present"),
            Self::Creating => write!(f, "creating"),
            Self::Available => write!(f, "available"),
            Self::Absent => write!(f, "absent"),
            Self::Other(status) => write!(f, "{status}"),
        }
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "present" => Self::Present,
            "creating" => Self::Creating,
            "available" => Self::Available,
            "absent" => Self::Absent,
            "" => return Err(Error::ParseStatus(s.to_string())),
            _ => Self::Other(s.to_string()),
        })
    }
}

// -----------------------------------------------------------------------------
// Ensure enumeration

/// Declared end-state of an instance
#[derive(Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug, Default)]
pub enum Ensure {
    #[serde(rename = "present")]
    #[default]
    Present,
    #[serde(rename = "absent")]
    Absent,
}

impl Display for Ensure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present => write!(f, "present"),
            Self::Absent => write!(f, "absent"),
        }
    }
}

impl FromStr for Ensure {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(Self::Present),
            "absent" => Ok(Self::Absent),
            _ => Err(Error::ParseEnsure(s.to_string())),
        }
    }
}

// -----------------------------------------------------------------------------
// SecurityGroups enumeration

/// Security groups declared either as a single identifier or as a list
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(untagged)]
pub enum SecurityGroups {
    One(String),
    Many(Vec<Option<String>>),
}

impl SecurityGroups {
    /// returns the identifiers as a list without null entries
    pub fn ids(&self) -> Vec<String> {
        match self {
            Self::One(id) => vec![id.to_owned()],
            Self::Many(ids) => ids.iter().flatten().cloned().collect(),
        }
    }
}

// -----------------------------------------------------------------------------
// DesiredResource structure

/// Declared state of an instance, identified by its name and region
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct DesiredResource {
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "region")]
    pub region: String,
    #[serde(rename = "ensure", default)]
    pub ensure: Ensure,
    #[serde(rename = "engine", default)]
    pub engine: Option<String>,
    #[serde(rename = "engine_version", default)]
    pub engine_version: Option<String>,
    #[serde(rename = "db_instance_class", default)]
    pub db_instance_class: Option<String>,
    #[serde(rename = "db_name", default)]
    pub db_name: Option<String>,
    #[serde(rename = "master_username", default)]
    pub master_username: Option<String>,
    #[serde(rename = "master_user_password", default, skip_serializing)]
    pub master_user_password: Option<String>,
    #[serde(rename = "allocated_storage", default)]
    pub allocated_storage: Option<i32>,
    #[serde(rename = "storage_type", default)]
    pub storage_type: Option<String>,
    #[serde(rename = "license_model", default)]
    pub license_model: Option<String>,
    #[serde(rename = "multi_az", default)]
    pub multi_az: Option<bool>,
    #[serde(rename = "iops", default)]
    pub iops: Option<i32>,
    #[serde(rename = "db_subnet_group_name", default)]
    pub db_subnet_group_name: Option<String>,
    #[serde(rename = "security_groups", default)]
    pub security_groups: Option<SecurityGroups>,
    #[serde(rename = "tags", default)]
    pub tags: BTreeMap<String, String>,
    #[serde(rename = "skip_final_snapshot", default)]
    pub skip_final_snapshot: bool,
    #[serde(rename = "final_db_snapshot_identifier", default)]
    pub final_db_snapshot_identifier: Option<String>,
}

impl DesiredResource {
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            ensure: Ensure::default(),
            engine: None,
            engine_version: None,
            db_instance_class: None,
            db_name: None,
            master_username: None,
            master_user_password: None,
            allocated_storage: None,
            storage_type: None,
            license_model: None,
            multi_az: None,
            iops: None,
            db_subnet_group_name: None,
            security_groups: None,
            tags: BTreeMap::new(),
            skip_final_snapshot: false,
            final_db_snapshot_identifier: None,
        }
    }

    pub fn security_group_ids(&self) -> Vec<String> {
        self.security_groups
            .as_ref()
            .map(SecurityGroups::ids)
            .unwrap_or_default()
    }
}

impl From<&DesiredResource> for CreateDbInstance {
    fn from(desired: &DesiredResource) -> Self {
        Self {
            db_instance_identifier: desired.name.to_owned(),
            db_name: desired.db_name.to_owned(),
            db_instance_class: desired.db_instance_class.to_owned(),
            vpc_security_group_ids: desired.security_group_ids(),
            engine: desired.engine.to_owned(),
            engine_version: desired.engine_version.to_owned(),
            license_model: desired.license_model.to_owned(),
            storage_type: desired.storage_type.to_owned(),
            multi_az: desired.multi_az,
            allocated_storage: desired.allocated_storage,
            iops: desired.iops,
            master_username: desired.master_username.to_owned(),
            master_user_password: desired.master_user_password.to_owned(),
            db_subnet_group_name: desired.db_subnet_group_name.to_owned(),
        }
    }
}

impl From<&DesiredResource> for DeleteDbInstance {
    fn from(desired: &DesiredResource) -> Self {
        Self {
            db_instance_identifier: desired.name.to_owned(),
            skip_final_snapshot: desired.skip_final_snapshot,
            final_db_snapshot_identifier: desired.final_db_snapshot_identifier.to_owned(),
        }
    }
}

/// returns declarations read from a yaml sequence
pub fn load_declarations_from_yaml(content: &str) -> Result<Vec<DesiredResource>, Error> {
    serde_yaml::from_str(content).map_err(Error::Yaml)
}

/// returns declarations read from a json array
pub fn load_declarations_from_json(content: &str) -> Result<Vec<DesiredResource>, Error> {
    serde_json::from_str(content).map_err(Error::Json)
}

// -----------------------------------------------------------------------------
// LiveInstanceRecord structure

/// Normalized form of an instance reported by the api
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct LiveInstanceRecord {
    pub name: String,
    pub region: String,
    pub status: Status,
    pub engine: Option<String>,
    pub db_instance_class: Option<String>,
    pub master_username: Option<String>,
    pub db_name: Option<String>,
    pub allocated_storage: Option<i32>,
    pub storage_type: Option<String>,
    pub license_model: Option<String>,
    pub multi_az: Option<bool>,
    pub iops: Option<i32>,
    pub auto_minor_version_upgrade: Option<bool>,
    pub backup_retention_period: Option<i32>,
    pub character_set_name: Option<String>,
    pub creation_date_time: Option<DateTime<Utc>>,
    pub backup_window: Option<String>,
    pub vpc_id: Option<String>,
    pub tags: Vec<Tag>,
}

impl LiveInstanceRecord {
    /// returns the record of a reported instance, `None` if it has no name
    pub fn new(region: &str, instance: DbInstance, tags: Vec<Tag>) -> Option<Self> {
        let name = instance.identifier.filter(|name| !name.is_empty())?;

        Some(Self {
            name,
            region: region.to_string(),
            status: Status::from_provider(instance.status.as_deref()),
            engine: instance.engine,
            db_instance_class: instance.db_instance_class,
            master_username: instance.master_username,
            db_name: instance.db_name,
            allocated_storage: instance.allocated_storage,
            storage_type: instance.storage_type,
            license_model: instance.license_model,
            multi_az: instance.multi_az,
            iops: instance.iops,
            auto_minor_version_upgrade: instance.auto_minor_version_upgrade,
            backup_retention_period: instance.backup_retention_period,
            character_set_name: instance.character_set_name,
            creation_date_time: instance.instance_create_time,
            backup_window: instance.preferred_backup_window,
            vpc_id: instance.vpc_id,
            tags,
        })
    }

    /// returns tags as a map, ignoring their order
    pub fn tag_map(&self) -> BTreeMap<String, String> {
        self.tags
            .iter()
            .map(|tag| (tag.key.to_owned(), tag.value.to_owned()))
            .collect()
    }
}

// -----------------------------------------------------------------------------
// ReconciliationRecord structure

/// State held for one instance during a reconciliation pass
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct ReconciliationRecord {
    name: String,
    region: String,
    status: Status,
    live: Option<LiveInstanceRecord>,
    desired: Option<DesiredResource>,
    failure: Option<enumerator::Error>,
}

impl From<LiveInstanceRecord> for ReconciliationRecord {
    fn from(live: LiveInstanceRecord) -> Self {
        Self {
            name: live.name.to_owned(),
            region: live.region.to_owned(),
            status: live.status.to_owned(),
            live: Some(live),
            desired: None,
            failure: None,
        }
    }
}

impl From<DesiredResource> for ReconciliationRecord {
    fn from(desired: DesiredResource) -> Self {
        Self {
            name: desired.name.to_owned(),
            region: desired.region.to_owned(),
            status: Status::Absent,
            live: None,
            desired: Some(desired),
            failure: None,
        }
    }
}

impl ReconciliationRecord {
    /// seed the record with the state of its live counterpart
    pub fn bind(&mut self, live: LiveInstanceRecord) {
        self.status = live.status.to_owned();
        self.live = Some(live);
    }

    pub fn is_bound(&self) -> bool {
        self.live.is_some()
    }

    /// returns the failure which prevented the enumeration of the region of
    /// the record, its live state is unknown in that case
    pub fn failure(&self) -> Option<&enumerator::Error> {
        self.failure.as_ref()
    }

    pub(crate) fn set_failure(&mut self, err: enumerator::Error) {
        self.failure = Some(err);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// returns the declared region if any, the live region otherwise
    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub(crate) fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    pub fn live(&self) -> Option<&LiveInstanceRecord> {
        self.live.as_ref()
    }

    pub fn desired(&self) -> Option<&DesiredResource> {
        self.desired.as_ref()
    }

    /// returns the last known tags of the instance
    pub fn tags(&self) -> BTreeMap<String, String> {
        self.live
            .as_ref()
            .map(LiveInstanceRecord::tag_map)
            .unwrap_or_default()
    }

    /// replace the cached live tags, an unbound record has none to replace
    pub(crate) fn set_tags(&mut self, tags: &BTreeMap<String, String>) {
        if let Some(live) = &mut self.live {
            live.tags = tags
                .iter()
                .map(|(key, value)| Tag::new(key, value))
                .collect();
        }
    }

    pub fn engine(&self) -> Option<&str> {
        self.live.as_ref().and_then(|l| l.engine.as_deref())
    }

    pub fn db_instance_class(&self) -> Option<&str> {
        self.live.as_ref().and_then(|l| l.db_instance_class.as_deref())
    }

    pub fn db_name(&self) -> Option<&str> {
        self.live.as_ref().and_then(|l| l.db_name.as_deref())
    }

    pub fn allocated_storage(&self) -> Option<i32> {
        self.live.as_ref().and_then(|l| l.allocated_storage)
    }

    pub fn storage_type(&self) -> Option<&str> {
        self.live.as_ref().and_then(|l| l.storage_type.as_deref())
    }

    // read-only attributes, only populated from the live instance

    pub fn auto_minor_version_upgrade(&self) -> Option<bool> {
        self.live.as_ref().and_then(|l| l.auto_minor_version_upgrade)
    }

    pub fn backup_retention_period(&self) -> Option<i32> {
        self.live.as_ref().and_then(|l| l.backup_retention_period)
    }

    pub fn character_set_name(&self) -> Option<&str> {
        self.live.as_ref().and_then(|l| l.character_set_name.as_deref())
    }

    pub fn creation_date_time(&self) -> Option<DateTime<Utc>> {
        self.live.as_ref().and_then(|l| l.creation_date_time)
    }

    pub fn iops(&self) -> Option<i32> {
        self.live.as_ref().and_then(|l| l.iops)
    }

    pub fn master_username(&self) -> Option<&str> {
        self.live.as_ref().and_then(|l| l.master_username.as_deref())
    }

    pub fn multi_az(&self) -> Option<bool> {
        self.live.as_ref().and_then(|l| l.multi_az)
    }

    pub fn backup_window(&self) -> Option<&str> {
        self.live.as_ref().and_then(|l| l.backup_window.as_deref())
    }

    pub fn vpc_id(&self) -> Option<&str> {
        self.live.as_ref().and_then(|l| l.vpc_id.as_deref())
    }

    pub fn license_model(&self) -> Option<&str> {
        self.live.as_ref().and_then(|l| l.license_model.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exists_for_every_status() {
        let statuses = [
            (Status::Present, true),
            (Status::Creating, true),
            (Status::Available, true),
            (Status::Absent, false),
            (Status::Other("deleting".into()), false),
            (Status::Other("modifying".into()), false),
            (Status::Other("failed".into()), false),
            (Status::Other("stopped".into()), false),
            (Status::Other("custom".into()), false),
        ];

        for (status, exists) in statuses {
            assert_eq!(status.exists(), exists, "unexpected presence for {status}");
        }
    }

    #[test]
    fn status_from_provider() {
        assert_eq!(Status::from_provider(None), Status::Present);
        assert_eq!(Status::from_provider(Some("available")), Status::Available);
        assert_eq!(Status::from_provider(Some("creating")), Status::Creating);
        assert_eq!(Status::from_provider(Some("backing-up")), Status::Present);
        assert_eq!(Status::from_provider(Some("deleted")), Status::Absent);
        assert!(!Status::from_provider(Some("deleting")).exists());
    }

    #[test]
    fn status_parse() {
        assert_eq!("present".parse::<Status>().unwrap(), Status::Present);
        assert_eq!(
            "rebooting".parse::<Status>().unwrap(),
            Status::Other("rebooting".into())
        );
        assert!("".parse::<Status>().is_err());
    }

    #[test]
    fn security_groups_are_normalized() {
        let mut desired = DesiredResource::new("db1", "us-east-1");
        assert!(desired.security_group_ids().is_empty());

        desired.security_groups = Some(SecurityGroups::One("sg-1".into()));
        assert_eq!(desired.security_group_ids(), vec!["sg-1"]);

        desired.security_groups = Some(SecurityGroups::Many(vec![
            Some("sg-1".into()),
            None,
            Some("sg-2".into()),
        ]));
        assert_eq!(desired.security_group_ids(), vec!["sg-1", "sg-2"]);
    }

    #[test]
    fn declarations_from_yaml() {
        let content = r#"
- name: db1
  region: us-east-1
  engine: postgres
  db_instance_class: db.t3.micro
  allocated_storage: 20
  master_username: admin
  master_user_password: secret
  security_groups: sg-1
  tags:
    env: prod
- name: db2
  region: eu-west-3
  ensure: absent
  security_groups: [sg-1, null, sg-2]
  skip_final_snapshot: true
"#;

        let declarations = load_declarations_from_yaml(content).unwrap();
        assert_eq!(declarations.len(), 2);

        let db1 = &declarations[0];
        assert_eq!(db1.ensure, Ensure::Present);
        assert_eq!(db1.allocated_storage, Some(20));
        assert_eq!(db1.security_group_ids(), vec!["sg-1"]);
        assert_eq!(db1.tags.get("env").map(String::as_str), Some("prod"));

        let db2 = &declarations[1];
        assert_eq!(db2.ensure, Ensure::Absent);
        assert!(db2.skip_final_snapshot);
        assert_eq!(db2.security_group_ids(), vec!["sg-1", "sg-2"]);
    }

    #[test]
    fn declarations_from_json() {
        let content = r#"[{"name": "db1", "region": "us-east-1", "security_groups": null}]"#;

        let declarations = load_declarations_from_json(content).unwrap();
        assert_eq!(declarations, vec![DesiredResource::new("db1", "us-east-1")]);
        assert!(load_declarations_from_json("{}").is_err());
    }

    #[test]
    fn password_is_never_serialized() {
        let mut desired = DesiredResource::new("db1", "us-east-1");
        desired.master_user_password = Some("secret".into());

        let request = CreateDbInstance::from(&desired);
        assert_eq!(request.master_user_password.as_deref(), Some("secret"));

        assert!(!serde_json::to_string(&desired).unwrap().contains("secret"));
        assert!(!serde_json::to_string(&request).unwrap().contains("secret"));
    }

    #[test]
    fn nameless_instances_are_dropped() {
        let instance = DbInstance {
            identifier: Some(String::new()),
            ..Default::default()
        };

        assert!(LiveInstanceRecord::new("us-east-1", instance, vec![]).is_none());
        assert!(LiveInstanceRecord::new("us-east-1", DbInstance::default(), vec![]).is_none());
    }

    #[test]
    fn record_region_prefers_declaration() {
        let live = LiveInstanceRecord::new(
            "us-east-1",
            DbInstance {
                identifier: Some("db1".into()),
                iops: Some(1000),
                ..Default::default()
            },
            vec![Tag::new("env", "prod")],
        )
        .unwrap();

        let record = ReconciliationRecord::from(live.to_owned());
        assert_eq!(record.region(), "us-east-1");
        assert_eq!(record.status(), &Status::Present);
        assert_eq!(record.iops(), Some(1000));
        assert!(record.desired().is_none());

        let mut record = ReconciliationRecord::from(DesiredResource::new("db1", "us-east-1"));
        assert_eq!(record.status(), &Status::Absent);
        assert!(record.tags().is_empty());

        record.bind(live);
        assert!(record.is_bound());
        assert_eq!(record.status(), &Status::Present);
        assert_eq!(record.tags().get("env").map(String::as_str), Some("prod"));
    }
}

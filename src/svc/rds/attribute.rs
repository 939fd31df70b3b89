//! # Attribute module
//!
//! This module classify the attributes reported for an instance. Read-only
//! attributes are accepted at creation and never applied afterwards, a
//! declared value which differs from the live one is only reported.

use std::fmt::{self, Display, Formatter};

use crate::svc::rds::{DesiredResource, ReconciliationRecord};

// -----------------------------------------------------------------------------
// Attribute enumeration

#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug)]
pub enum Attribute {
    Name,
    Region,
    Engine,
    EngineVersion,
    DbInstanceClass,
    DbName,
    AllocatedStorage,
    StorageType,
    SecurityGroups,
    SubnetGroup,
    Tags,
    AutoMinorVersionUpgrade,
    BackupRetentionPeriod,
    CharacterSetName,
    CreationDateTime,
    Iops,
    MasterUsername,
    MultiAz,
    BackupWindow,
    VpcId,
    LicenseModel,
}

/// Attributes populated only from the live instance
pub const READ_ONLY: &[Attribute] = &[
    Attribute::AutoMinorVersionUpgrade,
    Attribute::BackupRetentionPeriod,
    Attribute::CharacterSetName,
    Attribute::CreationDateTime,
    Attribute::Iops,
    Attribute::MasterUsername,
    Attribute::MultiAz,
    Attribute::BackupWindow,
    Attribute::VpcId,
    Attribute::LicenseModel,
];

impl Attribute {
    pub fn is_read_only(&self) -> bool {
        READ_ONLY.contains(self)
    }
}

impl Display for Attribute {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Name => "name",
            Self::Region => "region",
            Self::Engine => "engine",
            Self::EngineVersion => "engine_version",
            Self::DbInstanceClass => "db_instance_class",
            Self::DbName => "db_name",
            Self::AllocatedStorage => "allocated_storage",
            Self::StorageType => "storage_type",
            Self::SecurityGroups => "security_groups",
            Self::SubnetGroup => "db_subnet_group_name",
            Self::Tags => "tags",
            Self::AutoMinorVersionUpgrade => "auto_minor_version_upgrade",
            Self::BackupRetentionPeriod => "backup_retention_period",
            Self::CharacterSetName => "character_set_name",
            Self::CreationDateTime => "creation_date_time",
            Self::Iops => "iops",
            Self::MasterUsername => "master_username",
            Self::MultiAz => "multi_az",
            Self::BackupWindow => "backup_window",
            Self::VpcId => "vpc_id",
            Self::LicenseModel => "license_model",
        };

        write!(f, "{name}")
    }
}

/// returns read-only attributes declared with a value different from the live
/// one, attributes not declared or not reported are skipped
pub fn drift(desired: &DesiredResource, live: &ReconciliationRecord) -> Vec<Attribute> {
    fn differs<T: PartialEq + ?Sized>(desired: Option<&T>, live: Option<&T>) -> bool {
        matches!((desired, live), (Some(d), Some(l)) if d != l)
    }

    let mut attributes = vec![];

    if differs(desired.iops.as_ref(), live.iops().as_ref()) {
        attributes.push(Attribute::Iops);
    }

    if differs(desired.master_username.as_deref(), live.master_username()) {
        attributes.push(Attribute::MasterUsername);
    }

    if differs(desired.multi_az.as_ref(), live.multi_az().as_ref()) {
        attributes.push(Attribute::MultiAz);
    }

    if differs(desired.license_model.as_deref(), live.license_model()) {
        attributes.push(Attribute::LicenseModel);
    }

    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svc::{aws::DbInstance, rds::LiveInstanceRecord};

    fn record() -> ReconciliationRecord {
        let live = LiveInstanceRecord::new(
            "us-east-1",
            DbInstance {
                identifier: Some("db1".into()),
                status: Some("available".into()),
                iops: Some(1000),
                master_username: Some("admin".into()),
                multi_az: Some(false),
                license_model: Some("postgresql-license".into()),
                ..Default::default()
            },
            vec![],
        )
        .unwrap();

        ReconciliationRecord::from(live)
    }

    #[test]
    fn read_only_set() {
        assert_eq!(READ_ONLY.len(), 10);
        assert!(Attribute::Iops.is_read_only());
        assert!(Attribute::VpcId.is_read_only());
        assert!(!Attribute::Tags.is_read_only());
        assert!(!Attribute::Engine.is_read_only());
        assert_eq!(Attribute::MultiAz.to_string(), "multi_az");
    }

    #[test]
    fn drift_reports_changed_read_only_attributes() {
        let mut desired = DesiredResource::new("db1", "us-east-1");
        assert!(drift(&desired, &record()).is_empty());

        desired.iops = Some(1000);
        desired.master_username = Some("admin".into());
        assert!(drift(&desired, &record()).is_empty());

        desired.iops = Some(3000);
        desired.multi_az = Some(true);
        assert_eq!(
            drift(&desired, &record()),
            vec![Attribute::Iops, Attribute::MultiAz]
        );
    }

    #[test]
    fn drift_without_live_counterpart() {
        let mut desired = DesiredResource::new("db1", "us-east-1");
        desired.iops = Some(3000);

        let record = ReconciliationRecord::from(desired.to_owned());
        assert!(drift(&desired, &record).is_empty());
    }
}

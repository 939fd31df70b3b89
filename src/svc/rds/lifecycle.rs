//! # Lifecycle module
//!
//! This module check the presence of an instance, create and destroy it.

use std::collections::BTreeMap;

use tracing::info;

use crate::svc::{
    aws::{self, CreateDbInstance, DbInstance, DeleteDbInstance, Tag},
    identity,
    rds::{
        enumerator, provider::Context, LiveInstanceRecord, ReconciliationRecord, Status,
        NAME_TAG,
    },
};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to operate on instance '{0}', it has no declaration")]
    Undeclared(String),
    #[error("failed to create instance '{0}', its live state is unknown, {1}")]
    Unenumerated(String, enumerator::Error),
    #[error("failed to destroy instance '{0}', a final snapshot identifier is required unless the final snapshot is skipped")]
    FinalSnapshot(String),
    #[error("failed to create instance '{0}', {1}")]
    Create(String, aws::Error),
    #[error("failed to destroy instance '{0}', {1}")]
    Destroy(String, aws::Error),
    #[error("failed to resolve address of instance '{0}', {1}")]
    Identity(String, identity::Error),
    #[error("failed to tag instance '{0}', {1}")]
    Tags(String, aws::Error),
}

// -----------------------------------------------------------------------------
// helpers

/// returns true if the instance exists according to the last known status,
/// the api is not queried
pub fn exists(record: &ReconciliationRecord) -> bool {
    info!(
        name = record.name(),
        region = record.region(),
        status = %record.status(),
        "Check presence of instance in region"
    );

    record.status().exists()
}

/// create the declared instance, then tag it with its declared tags and its
/// name. An instance which already exists is reported as an api failure, an
/// instance of a region which failed to be enumerated is not created.
#[cfg_attr(feature = "trace", tracing::instrument(skip(ctx, record), fields(name = record.name(), region = record.region())))]
pub async fn create(ctx: &Context, record: &mut ReconciliationRecord) -> Result<(), Error> {
    let name = record.name().to_string();
    let region = record.region().to_string();
    let desired = record
        .desired()
        .ok_or_else(|| Error::Undeclared(name.to_owned()))?;

    if let Some(err) = record.failure() {
        return Err(Error::Unenumerated(name, err.to_owned()));
    }

    let request = CreateDbInstance::from(desired);
    let mut tags: BTreeMap<String, String> = desired.tags.to_owned();
    tags.insert(NAME_TAG.to_string(), name.to_owned());

    info!(
        name = name.as_str(),
        region = region.as_str(),
        engine = request.engine.as_deref().unwrap_or("<none>"),
        "Create instance"
    );

    let instance = ctx
        .api
        .create_instance(&region, &request)
        .await
        .map_err(|err| Error::Create(name.to_owned(), err))?
        .filter(|instance| instance.identifier.as_deref() == Some(name.as_str()))
        .unwrap_or_else(|| DbInstance {
            identifier: Some(name.to_owned()),
            ..Default::default()
        });

    if let Some(live) = LiveInstanceRecord::new(&region, instance, vec![]) {
        record.bind(live);
    }
    record.set_status(Status::Present);

    let arn = ctx
        .arn(&region, &name)
        .await
        .map_err(|err| Error::Identity(name.to_owned(), err))?;

    let payload: Vec<Tag> = tags
        .iter()
        .map(|(key, value)| Tag::new(key, value))
        .collect();

    ctx.api
        .add_tags(&arn, &payload)
        .await
        .map_err(|err| Error::Tags(name.to_owned(), err))?;

    record.set_tags(&tags);

    Ok(())
}

/// delete the instance using the destroy options of its declaration
#[cfg_attr(feature = "trace", tracing::instrument(skip(ctx, record), fields(name = record.name(), region = record.region())))]
pub async fn destroy(ctx: &Context, record: &mut ReconciliationRecord) -> Result<(), Error> {
    let name = record.name().to_string();
    let region = record.region().to_string();
    let desired = record
        .desired()
        .ok_or_else(|| Error::Undeclared(name.to_owned()))?;

    let request = DeleteDbInstance::from(desired);
    if !request.skip_final_snapshot && request.final_db_snapshot_identifier.is_none() {
        return Err(Error::FinalSnapshot(name));
    }

    info!(
        name = name.as_str(),
        region = region.as_str(),
        skip_final_snapshot = request.skip_final_snapshot,
        "Destroy instance"
    );

    ctx.api
        .delete_instance(&region, &request)
        .await
        .map_err(|err| Error::Destroy(name.to_owned(), err))?;

    record.set_status(Status::Absent);

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::svc::{
        aws::{
            memory::{Call, Memory, Operation},
            DbInstance,
        },
        cfg::Configuration,
        rds::{matcher, tags, DesiredResource, SecurityGroups},
    };

    fn context(api: Arc<Memory>) -> Context {
        Context::new(api, Arc::new(Configuration::default()))
    }

    #[test]
    fn exists_follows_status() {
        let mut record = ReconciliationRecord::from(DesiredResource::new("db1", "us-east-1"));
        assert!(!exists(&record));

        record.set_status(Status::Creating);
        assert!(exists(&record));

        record.set_status(Status::Other("deleting".into()));
        assert!(!exists(&record));
    }

    #[tokio::test]
    async fn create_submits_request_then_tags() {
        let api = Arc::new(Memory::new());
        let mut desired = DesiredResource::new("db1", "us-east-1");
        desired.engine = Some("postgres".into());
        desired.master_user_password = Some("secret".into());
        desired.security_groups = Some(SecurityGroups::Many(vec![Some("sg-1".into()), None]));
        desired.tags.insert("env".into(), "prod".into());

        let mut record = ReconciliationRecord::from(desired);
        create(&context(api.to_owned()), &mut record).await.unwrap();

        assert_eq!(record.status(), &Status::Present);
        assert!(record.is_bound());
        assert_eq!(record.engine(), Some("postgres"));
        assert_eq!(
            record.tags(),
            BTreeMap::from([
                ("Name".to_string(), "db1".to_string()),
                ("env".to_string(), "prod".to_string()),
            ])
        );

        let writes = api.writes();
        assert_eq!(writes.len(), 2);
        match &writes[0] {
            Call::CreateInstance { region, request } => {
                assert_eq!(region, "us-east-1");
                assert_eq!(request.db_instance_identifier, "db1");
                assert_eq!(request.vpc_security_group_ids, vec!["sg-1"]);
                assert_eq!(request.master_user_password.as_deref(), Some("secret"));
            }
            call => panic!("unexpected call {call:?}"),
        }
        assert_eq!(
            writes[1],
            Call::AddTags {
                arn: "arn:aws:rds:us-east-1:123456789012:db:db1".into(),
                tags: vec![Tag::new("Name", "db1"), Tag::new("env", "prod")],
            }
        );
    }

    #[tokio::test]
    async fn retag_after_create_updates_cached_tags() {
        let api = Arc::new(Memory::new());
        let ctx = context(api.to_owned());

        let mut desired = DesiredResource::new("db1", "us-east-1");
        desired.tags.insert("env".into(), "prod".into());
        let mut record = ReconciliationRecord::from(desired);
        create(&ctx, &mut record).await.unwrap();

        let declared = BTreeMap::from([("env".to_string(), "staging".to_string())]);
        tags::set_tags(&ctx, &mut record, &declared).await.unwrap();

        assert_eq!(record.tags(), declared);
    }

    #[tokio::test]
    async fn create_refuses_unenumerated_region() {
        let api = Arc::new(Memory::new());
        let mut records = matcher::prefetch(vec![DesiredResource::new("db1", "eu-west-1")], vec![]);
        matcher::mark_unenumerated(
            &mut records,
            &[enumerator::Error::List(
                "eu-west-1".to_string(),
                aws::Error::Throttled {
                    message: "Rate exceeded".to_string(),
                },
            )],
        );

        let record = records.get_mut("db1").unwrap();
        let err = create(&context(api.to_owned()), record).await.unwrap_err();

        assert!(matches!(err, Error::Unenumerated(_, _)));
        assert!(api.journal().is_empty());
    }

    #[tokio::test]
    async fn create_surfaces_already_exists() {
        let api = Arc::new(Memory::new());
        let ctx = context(api.to_owned());

        let mut record = ReconciliationRecord::from(DesiredResource::new("db1", "us-east-1"));
        create(&ctx, &mut record).await.unwrap();

        let mut record = ReconciliationRecord::from(DesiredResource::new("db1", "us-east-1"));
        let err = create(&ctx, &mut record).await.unwrap_err();

        assert!(matches!(err, Error::Create(_, aws::Error::AlreadyExists { .. })));
        assert_eq!(record.status(), &Status::Absent);
    }

    #[tokio::test]
    async fn create_without_declaration() {
        let live = LiveInstanceRecord::new(
            "us-east-1",
            DbInstance {
                identifier: Some("db1".into()),
                ..Default::default()
            },
            vec![],
        )
        .unwrap();
        let mut record = ReconciliationRecord::from(live);

        let api = Arc::new(Memory::new());
        let err = create(&context(api.to_owned()), &mut record)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Undeclared(_)));
        assert!(api.journal().is_empty());
    }

    #[tokio::test]
    async fn destroy_requires_a_final_snapshot() {
        let api = Arc::new(Memory::new());
        api.insert(
            "us-east-1",
            DbInstance {
                identifier: Some("db1".into()),
                status: Some("available".into()),
                ..Default::default()
            },
            vec![],
        );
        let ctx = context(api.to_owned());

        let mut record = ReconciliationRecord::from(DesiredResource::new("db1", "us-east-1"));
        record.set_status(Status::Available);
        assert!(matches!(
            destroy(&ctx, &mut record).await,
            Err(Error::FinalSnapshot(_))
        ));
        assert!(api.journal().is_empty());

        let mut desired = DesiredResource::new("db1", "us-east-1");
        desired.final_db_snapshot_identifier = Some("db1-final".into());
        let mut record = ReconciliationRecord::from(desired);
        record.set_status(Status::Available);

        destroy(&ctx, &mut record).await.unwrap();
        assert_eq!(record.status(), &Status::Absent);
        assert!(api.instance("us-east-1", "db1").is_none());
        assert!(matches!(
            &api.writes()[..],
            [Call::DeleteInstance { request, .. }]
                if !request.skip_final_snapshot
                    && request.final_db_snapshot_identifier.as_deref() == Some("db1-final")
        ));
    }

    #[tokio::test]
    async fn destroy_surfaces_provider_failures() {
        let api = Arc::new(Memory::new());
        let ctx = context(api.to_owned());

        let mut desired = DesiredResource::new("db1", "us-east-1");
        desired.skip_final_snapshot = true;

        let mut record = ReconciliationRecord::from(desired.to_owned());
        let err = destroy(&ctx, &mut record).await.unwrap_err();
        assert!(matches!(err, Error::Destroy(_, aws::Error::NotFound { .. })));

        let mut record = ReconciliationRecord::from(desired.to_owned());
        create(&ctx, &mut record).await.unwrap();
        let err = destroy(&ctx, &mut record).await.unwrap_err();
        assert!(matches!(err, Error::Destroy(_, aws::Error::Sdk { .. })));
        assert_eq!(record.status(), &Status::Present);

        api.fail(Operation::DeleteInstance, None, 0, "Throttling", "slow down");
        api.set_status("us-east-1", "db1", "available");
        let mut records = matcher::prefetch(vec![desired], vec![]);
        let record = records.get_mut("db1").unwrap();
        record.set_status(Status::Available);
        assert!(matches!(
            destroy(&ctx, record).await,
            Err(Error::Destroy(_, aws::Error::Throttled { .. }))
        ));
    }
}

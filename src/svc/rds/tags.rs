//! # Tags module
//!
//! This module move the tags of a live instance to the declared ones. The
//! whole declared mapping is sent as an add request, the api overwrites
//! existing keys, and keys which are no longer declared are deleted. Both
//! requests are independent, a failure of the second one leaves the instance
//! partially tagged until the next pass.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::svc::{
    aws::{self, Tag},
    identity,
    rds::{provider::Context, ReconciliationRecord},
};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to resolve address of instance '{0}', {1}")]
    Identity(String, identity::Error),
    #[error("failed to list tags of instance '{0}', {1}")]
    List(String, aws::Error),
    #[error("failed to add tags to instance '{0}', {1}")]
    Add(String, aws::Error),
    #[error("failed to delete tags of instance '{0}', {1}")]
    Delete(String, aws::Error),
}

// -----------------------------------------------------------------------------
// TagDiff structure

/// Requests needed to move a tag set to another
#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct TagDiff {
    pub add: BTreeMap<String, String>,
    pub remove: Vec<String>,
}

impl TagDiff {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// returns the add payload, which is the whole desired mapping, and the keys
/// of current tags which are not desired anymore
pub fn diff(current: &BTreeMap<String, String>, desired: &BTreeMap<String, String>) -> TagDiff {
    TagDiff {
        add: desired.to_owned(),
        remove: current
            .keys()
            .filter(|key| !desired.contains_key(*key))
            .cloned()
            .collect(),
    }
}

/// set the tags of the instance to the desired ones, current tags are read
/// from the api right before computing the requests
#[cfg_attr(feature = "trace", tracing::instrument(skip(ctx, record), fields(name = record.name(), region = record.region())))]
pub async fn set_tags(
    ctx: &Context,
    record: &mut ReconciliationRecord,
    desired: &BTreeMap<String, String>,
) -> Result<TagDiff, Error> {
    let name = record.name().to_string();
    let arn = ctx
        .arn(record.region(), &name)
        .await
        .map_err(|err| Error::Identity(name.to_owned(), err))?;

    let current: BTreeMap<String, String> = ctx
        .api
        .list_tags(&arn)
        .await
        .map_err(|err| Error::List(name.to_owned(), err))?
        .into_iter()
        .map(|tag| (tag.key, tag.value))
        .collect();

    let diff = diff(&current, desired);

    if !diff.add.is_empty() {
        let tags: Vec<Tag> = diff
            .add
            .iter()
            .map(|(key, value)| Tag::new(key, value))
            .collect();

        debug!(name = name.as_str(), count = tags.len(), "Add tags to instance");
        ctx.api
            .add_tags(&arn, &tags)
            .await
            .map_err(|err| Error::Add(name.to_owned(), err))?;
    }

    if !diff.remove.is_empty() {
        debug!(
            name = name.as_str(),
            keys = diff.remove.join(",").as_str(),
            "Delete tags of instance"
        );

        ctx.api
            .delete_tags(&arn, &diff.remove)
            .await
            .map_err(|err| Error::Delete(name.to_owned(), err))?;
    }

    info!(
        name = name.as_str(),
        added = diff.add.len(),
        removed = diff.remove.len(),
        "Update tags of instance"
    );

    record.set_tags(desired);
    Ok(diff)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::svc::{
        aws::{
            memory::{Call, Memory, Operation},
            Api, Arn, DbInstance,
        },
        cfg::Configuration,
        rds::{DesiredResource, LiveInstanceRecord},
    };

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn setup(tags: Vec<Tag>) -> (Arc<Memory>, Context, ReconciliationRecord) {
        let api = Arc::new(Memory::new());
        let instance = DbInstance {
            identifier: Some("db1".into()),
            status: Some("available".into()),
            ..Default::default()
        };
        api.insert("us-east-1", instance.to_owned(), tags.to_owned());

        let mut record = ReconciliationRecord::from(DesiredResource::new("db1", "us-east-1"));
        record.bind(LiveInstanceRecord::new("us-east-1", instance, tags).unwrap());

        let ctx = Context::new(api.to_owned(), Arc::new(Configuration::default()));
        (api, ctx, record)
    }

    fn arn() -> Arn {
        Arn::db_instance("aws", "us-east-1", "123456789012", "db1")
    }

    #[test]
    fn diff_computes_deletions() {
        let diff = diff(
            &map(&[("a", "1"), ("b", "2"), ("c", "3")]),
            &map(&[("b", "20"), ("d", "4")]),
        );

        assert_eq!(diff.add, map(&[("b", "20"), ("d", "4")]));
        assert_eq!(diff.remove, vec!["a", "c"]);
    }

    #[test]
    fn diff_of_empty_sets() {
        assert!(super::diff(&BTreeMap::new(), &BTreeMap::new()).is_empty());
        assert_eq!(
            super::diff(&map(&[("a", "1")]), &BTreeMap::new()).remove,
            vec!["a"]
        );
    }

    #[tokio::test]
    async fn retag_adds_and_deletes() {
        let (api, ctx, mut record) = setup(vec![
            Tag::new("env", "prod"),
            Tag::new("Name", "db1"),
            Tag::new("temp", "x"),
        ]);

        let desired = map(&[("env", "staging")]);
        set_tags(&ctx, &mut record, &desired).await.unwrap();

        assert_eq!(
            api.writes(),
            vec![
                Call::AddTags {
                    arn: arn().to_string(),
                    tags: vec![Tag::new("env", "staging")],
                },
                Call::DeleteTags {
                    arn: arn().to_string(),
                    keys: vec!["Name".to_string(), "temp".to_string()],
                },
            ]
        );
        assert_eq!(api.tags(&arn()), desired);
        assert_eq!(record.tags(), desired);
    }

    #[tokio::test]
    async fn retag_is_idempotent() {
        let (api, ctx, mut record) = setup(vec![Tag::new("a", "1"), Tag::new("b", "2")]);
        let desired = map(&[("b", "3"), ("c", "4")]);

        set_tags(&ctx, &mut record, &desired).await.unwrap();
        let once = api.tags(&arn());

        let diff = set_tags(&ctx, &mut record, &desired).await.unwrap();
        assert_eq!(api.tags(&arn()), once);
        assert_eq!(once, desired);
        assert!(diff.remove.is_empty());
    }

    #[tokio::test]
    async fn empty_sets_are_not_sent() {
        let (api, ctx, mut record) = setup(vec![]);

        set_tags(&ctx, &mut record, &BTreeMap::new()).await.unwrap();
        assert!(api.writes().is_empty());

        set_tags(&ctx, &mut record, &map(&[("env", "prod")])).await.unwrap();
        assert!(matches!(&api.writes()[..], [Call::AddTags { .. }]));
    }

    #[tokio::test]
    async fn current_tags_are_read_live() {
        let (api, ctx, mut record) = setup(vec![Tag::new("env", "prod")]);
        api.add_tags(&arn(), &[Tag::new("drift", "yes")]).await.unwrap();
        api.clear_journal();

        let diff = set_tags(&ctx, &mut record, &map(&[("env", "prod")]))
            .await
            .unwrap();

        assert_eq!(diff.remove, vec!["drift"]);
        assert!(api.tags(&arn()).get("drift").is_none());
    }

    #[tokio::test]
    async fn failed_delete_leaves_partial_update() {
        let (api, ctx, mut record) = setup(vec![Tag::new("env", "prod"), Tag::new("temp", "x")]);
        api.fail(Operation::DeleteTags, None, 0, "Throttling", "slow down");

        let err = set_tags(&ctx, &mut record, &map(&[("env", "staging")]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Delete(_, aws::Error::Throttled { .. })));
        assert_eq!(
            api.tags(&arn()),
            map(&[("env", "staging"), ("temp", "x")])
        );
    }
}

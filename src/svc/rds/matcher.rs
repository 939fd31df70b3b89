//! # Matcher module
//!
//! This module pair declared instances with live ones.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::svc::rds::{enumerator, DesiredResource, LiveInstanceRecord, ReconciliationRecord};

/// returns a record per declared instance, keyed by name. A declaration is
/// bound to the live instance of the same name only if both regions are
/// strictly equal, live instances without counterpart are ignored.
#[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
pub fn prefetch<D, L>(desired: D, live: L) -> BTreeMap<String, ReconciliationRecord>
where
    D: IntoIterator<Item = DesiredResource>,
    L: IntoIterator<Item = LiveInstanceRecord>,
{
    let mut records: BTreeMap<String, ReconciliationRecord> = BTreeMap::new();
    for resource in desired {
        if records.contains_key(&resource.name) {
            warn!(
                name = resource.name.as_str(),
                region = resource.region.as_str(),
                "Instance is declared more than once, keep the first declaration"
            );
            continue;
        }

        records.insert(resource.name.to_owned(), ReconciliationRecord::from(resource));
    }

    for instance in live {
        let record = match records.get_mut(&instance.name) {
            Some(record) => record,
            None => continue,
        };

        if record.is_bound() || record.region() != instance.region {
            debug!(
                name = instance.name.as_str(),
                region = instance.region.as_str(),
                "Ignore live instance outside of the declared region"
            );
            continue;
        }

        debug!(
            name = instance.name.as_str(),
            region = instance.region.as_str(),
            status = %instance.status,
            "Bind declared instance to live instance"
        );

        record.bind(instance);
    }

    records
}

/// attach the enumeration failure of their region to records which could not
/// be bound, their live state is unknown and must not be acted upon
pub fn mark_unenumerated(
    records: &mut BTreeMap<String, ReconciliationRecord>,
    failures: &[enumerator::Error],
) {
    for record in records.values_mut().filter(|record| !record.is_bound()) {
        if let Some(err) = failures.iter().find(|err| err.region() == record.region()) {
            warn!(
                name = record.name(),
                region = record.region(),
                "Live state of declared instance is unknown, its region failed to be enumerated"
            );

            record.set_failure(err.to_owned());
        }
    }
}

//! Annotation- and label-encoded policy, decoded once per reconcile.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use semver::Version;

use crate::{RECONCILIATION_POLICY_ANNOTATION, RESOURCE_POLICY_ANNOTATION, RESOURCE_VERSION_LABEL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcilePolicy {
    #[default]
    Reconcile,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourcePolicy {
    #[default]
    Delete,
    /// Deletion protection: unmanage instead of deleting externally.
    Keep,
}

/// Everything the engine reads from an object's annotations and labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPolicy {
    pub reconcile: ReconcilePolicy,
    pub resource: ResourcePolicy,
    pub resource_version: Option<String>,
}

impl ObjectPolicy {
    pub fn from_meta(meta: &ObjectMeta) -> Self {
        let empty = BTreeMap::new();
        let annotations = meta.annotations.as_ref().unwrap_or(&empty);
        let labels = meta.labels.as_ref().unwrap_or(&empty);
        let reconcile = match annotations.get(RECONCILIATION_POLICY_ANNOTATION).map(|s| s.trim()) {
            Some(v) if v.eq_ignore_ascii_case("skip") => ReconcilePolicy::Skip,
            _ => ReconcilePolicy::Reconcile,
        };
        let resource = match annotations.get(RESOURCE_POLICY_ANNOTATION).map(|s| s.trim()) {
            Some(v) if v.eq_ignore_ascii_case("keep") => ResourcePolicy::Keep,
            _ => ResourcePolicy::Delete,
        };
        Self { reconcile, resource, resource_version: labels.get(RESOURCE_VERSION_LABEL).cloned() }
    }

    pub fn skip(&self) -> bool {
        self.reconcile == ReconcilePolicy::Skip
    }

    /// Validate the resource-version label against the running operator.
    ///
    /// An absent label passes. A present label must be semver and must not be
    /// newer (major.minor) than the operator. Dev builds (`0.0.0*`) skip the
    /// comparison but still require a parseable label.
    pub fn check_resource_version(&self, operator: &Version) -> Result<(), String> {
        let Some(raw) = self.resource_version.as_deref() else {
            return Ok(());
        };
        let declared = Version::parse(raw.trim_start_matches('v'))
            .map_err(|e| format!("{RESOURCE_VERSION_LABEL} label {raw:?} is not a valid semver: {e}"))?;
        let dev = operator.major == 0 && operator.minor == 0 && operator.patch == 0;
        if !dev && (declared.major, declared.minor) > (operator.major, operator.minor) {
            return Err(format!(
                "resource version {declared} is newer than the operator version {operator}; upgrade the operator"
            ));
        }
        Ok(())
    }
}

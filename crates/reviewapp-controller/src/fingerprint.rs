//! Change detection between rendered artifacts and the last push
//!
//! [`DesiredFingerprint`] is computed on every reconcile and never stored.
//! [`LastAppliedFingerprint`] is read back from the status fields that only a
//! successful push writes, so a failed push keeps the old fingerprint and the
//! next reconcile retries the same diff.

use std::collections::BTreeMap;

use reviewapp_common::crd::ReviewAppStatus;

use crate::render::ApplicationIdentity;

/// What the infra repository should contain now
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesiredFingerprint {
    /// App repository head commit
    pub head_sha: String,
    /// Rendered Application descriptor, before annotation
    pub application: String,
    /// Name and namespace of the Application
    pub application_identity: ApplicationIdentity,
    /// Rendered manifests by file name
    pub manifests: BTreeMap<String, String>,
}

impl DesiredFingerprint {
    /// Create a fingerprint of freshly rendered artifacts
    pub fn new(
        application: impl Into<String>,
        application_identity: ApplicationIdentity,
        manifests: BTreeMap<String, String>,
        head_sha: impl Into<String>,
    ) -> Self {
        Self {
            head_sha: head_sha.into(),
            application: application.into(),
            application_identity,
            manifests,
        }
    }
}

/// What was last pushed to the infra repository
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LastAppliedFingerprint {
    /// App repository commit of the last push
    pub head_sha: Option<String>,
    /// Application descriptor of the last push
    pub application: String,
    /// Application identity of the last push
    pub application_identity: Option<ApplicationIdentity>,
    /// Manifests of the last push
    pub manifests: BTreeMap<String, String>,
}

impl LastAppliedFingerprint {
    /// Read the fingerprint from a status; `None` if nothing was pushed yet
    pub fn from_status(status: &ReviewAppStatus) -> Option<Self> {
        let cache = status.manifests_cache.as_ref()?;
        let sync = &status.sync;
        let application_identity = match (&sync.application_name, &sync.application_namespace) {
            (Some(name), Some(namespace)) => Some(ApplicationIdentity {
                name: name.clone(),
                namespace: namespace.clone(),
            }),
            _ => None,
        };
        Some(Self {
            head_sha: sync.app_repo_latest_commit_sha.clone(),
            application: cache.application.clone(),
            application_identity,
            manifests: cache.manifests.clone(),
        })
    }
}

/// Which parts of the desired state differ from the last push
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Head commit moved
    pub app_repo_commit: bool,
    /// Application identity or body differs
    pub application: bool,
    /// Manifest map differs
    pub manifests: bool,
}

impl ChangeSet {
    /// Compare desired against last applied; everything differs if nothing was applied
    pub fn between(desired: &DesiredFingerprint, last: Option<&LastAppliedFingerprint>) -> Self {
        let Some(last) = last else {
            return Self {
                app_repo_commit: true,
                application: true,
                manifests: true,
            };
        };
        Self {
            app_repo_commit: last.head_sha.as_deref() != Some(desired.head_sha.as_str()),
            application: last.application_identity.as_ref() != Some(&desired.application_identity)
                || last.application != desired.application,
            manifests: last.manifests != desired.manifests,
        }
    }

    /// True if a push is needed
    pub fn any(&self) -> bool {
        self.app_repo_commit || self.application || self.manifests
    }
}

impl std::fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<&str> = [
            (self.app_repo_commit, "app repository commit"),
            (self.application, "application"),
            (self.manifests, "manifests"),
        ]
        .iter()
        .filter(|(changed, _)| *changed)
        .map(|(_, name)| *name)
        .collect();
        if parts.is_empty() {
            write!(f, "no changes")
        } else {
            write!(f, "{} changed", parts.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reviewapp_common::crd::{ManifestsCache, SyncState};

    fn identity() -> ApplicationIdentity {
        ApplicationIdentity {
            name: "shop-42".to_string(),
            namespace: "argocd".to_string(),
        }
    }

    fn manifests(value: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("a.yaml".to_string(), value.to_string())])
    }

    fn applied(app: &str, m: BTreeMap<String, String>, sha: &str) -> ReviewAppStatus {
        ReviewAppStatus {
            sync: SyncState {
                application_name: Some("shop-42".to_string()),
                application_namespace: Some("argocd".to_string()),
                app_repo_latest_commit_sha: Some(sha.to_string()),
                ..Default::default()
            },
            manifests_cache: Some(ManifestsCache {
                application: app.to_string(),
                manifests: m,
            }),
            ..Default::default()
        }
    }

    fn changes(status: &ReviewAppStatus, desired: &DesiredFingerprint) -> ChangeSet {
        let last = LastAppliedFingerprint::from_status(status);
        ChangeSet::between(desired, last.as_ref())
    }

    #[test]
    fn identical_artifacts_need_no_push() {
        let status = applied("app", manifests("x"), "sha1");
        let desired = DesiredFingerprint::new("app", identity(), manifests("x"), "sha1");
        let set = changes(&status, &desired);
        assert!(!set.any());
        assert_eq!(set.to_string(), "no changes");
    }

    #[test]
    fn manifest_value_change_alone_triggers_a_push() {
        let status = applied("app", manifests("x"), "sha1");
        let desired = DesiredFingerprint::new("app", identity(), manifests("y"), "sha1");
        let set = changes(&status, &desired);
        assert_eq!(
            set,
            ChangeSet {
                app_repo_commit: false,
                application: false,
                manifests: true,
            }
        );
        assert!(set.any());
    }

    #[test]
    fn each_source_of_change_is_detected_independently() {
        let status = applied("app", manifests("x"), "sha1");

        let moved = DesiredFingerprint::new("app", identity(), manifests("x"), "sha2");
        assert!(changes(&status, &moved).app_repo_commit);

        let body = DesiredFingerprint::new("app v2", identity(), manifests("x"), "sha1");
        assert!(changes(&status, &body).application);

        let mut renamed = identity();
        renamed.namespace = "argocd-previews".to_string();
        let ident = DesiredFingerprint::new("app", renamed, manifests("x"), "sha1");
        let set = changes(&status, &ident);
        assert!(set.application && !set.manifests && !set.app_repo_commit);

        let mut added = manifests("x");
        added.insert("b.yaml".to_string(), "z".to_string());
        let keys = DesiredFingerprint::new("app", identity(), added, "sha1");
        assert!(changes(&status, &keys).manifests);
    }

    #[test]
    fn never_pushed_means_everything_changed() {
        let desired = DesiredFingerprint::new("app", identity(), BTreeMap::new(), "sha1");
        let set = changes(&ReviewAppStatus::default(), &desired);
        assert!(set.app_repo_commit && set.application && set.manifests);
    }
}

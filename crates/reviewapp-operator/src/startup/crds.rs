//! CRD installation utilities
//!
//! CRDs are installed with server-side apply on every start so an upgraded
//! operator brings its schema along.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use reviewapp_common::crd::{ApplicationTemplate, JobTemplate, ManifestsTemplate, ReviewApp};
use reviewapp_common::FIELD_MANAGER;

/// CRD definition with name and resource
struct CrdDef {
    name: &'static str,
    crd: CustomResourceDefinition,
}

fn review_app_crds() -> Vec<CrdDef> {
    vec![
        CrdDef {
            name: "reviewapps.reviewapp.dev",
            crd: ReviewApp::crd(),
        },
        CrdDef {
            name: "applicationtemplates.reviewapp.dev",
            crd: ApplicationTemplate::crd(),
        },
        CrdDef {
            name: "manifeststemplates.reviewapp.dev",
            crd: ManifestsTemplate::crd(),
        },
        CrdDef {
            name: "jobtemplates.reviewapp.dev",
            crd: JobTemplate::crd(),
        },
    ]
}

/// Install a set of CRDs using server-side apply
async fn install_crds(client: &Client, crds_to_install: Vec<CrdDef>) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for def in crds_to_install {
        tracing::info!("Installing {} CRD...", def.name);
        crds.patch(def.name, &params, &Patch::Apply(&def.crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }

    Ok(())
}

/// Ensure the ReviewApp and template CRDs are installed
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    tracing::info!("Installing Review App CRDs...");
    install_crds(client, review_app_crds()).await?;
    tracing::info!("Review App CRDs installed/updated");
    Ok(())
}

/// All CRDs as a multi-document YAML stream
pub fn crd_manifests() -> anyhow::Result<String> {
    let mut out = String::new();
    for def in review_app_crds() {
        let yaml = serde_yaml::to_string(&def.crd)
            .map_err(|e| anyhow::anyhow!("Failed to serialize {} CRD: {}", def.name, e))?;
        out.push_str("---\n");
        out.push_str(&yaml);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_names_match_generated_crds() {
        for def in review_app_crds() {
            assert_eq!(def.crd.metadata.name.as_deref(), Some(def.name));
        }
    }

    #[test]
    fn all_crds_are_namespaced() {
        for def in review_app_crds() {
            assert_eq!(def.crd.spec.scope, "Namespaced", "{}", def.name);
        }
    }

    #[test]
    fn manifests_contain_every_kind() {
        let yaml = crd_manifests().unwrap();
        assert_eq!(yaml.matches("---\n").count(), 4);
        for kind in ["ReviewApp", "ApplicationTemplate", "ManifestsTemplate", "JobTemplate"] {
            assert!(yaml.contains(&format!("kind: {kind}")), "missing {kind}");
        }
    }
}

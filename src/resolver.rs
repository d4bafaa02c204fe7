use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use crate::manifest::{KeyValue, ManifestReader};

/// Steamworks Common Redistributables. Shared by nearly every app and not
/// content in its own right, so it is never queued as a dependency.
pub const REDISTRIBUTABLES_APP_ID: &str = "228980";

/// Discovers the secondary apps a primary app pulls in, from its manifest.
#[derive(Clone)]
pub struct DependencyResolver {
    manifests: Arc<dyn ManifestReader>,
}

impl DependencyResolver {
    pub fn new(manifests: Arc<dyn ManifestReader>) -> Self {
        Self { manifests }
    }

    pub fn manifests(&self) -> &Arc<dyn ManifestReader> {
        &self.manifests
    }

    /// Missing or unreadable manifests resolve to an empty set.
    pub async fn resolve_dependencies(
        &self,
        install_directory: &Path,
        primary_app_id: &str,
    ) -> BTreeSet<String> {
        let steamapps = install_directory.join("steamapps");
        let Some(manifest) = self.manifests.read_manifest(&steamapps, primary_app_id).await else {
            tracing::debug!(
                "No manifest for app {primary_app_id} under {}, assuming no dependencies",
                steamapps.display()
            );
            return BTreeSet::new();
        };

        let mut deps = BTreeSet::new();

        // SharedDepots maps depot id -> owning app id.
        if let Some(shared) = manifest.section("SharedDepots") {
            deps.extend(shared.iter().filter_map(|(_, v)| v.as_str()).map(str::to_string));
        }

        // DependentApps is either an index -> app id list or app id -> { details }.
        if let Some(dependent) = manifest.section("DependentApps") {
            for (key, value) in dependent {
                match value {
                    KeyValue::Str(app) => deps.insert(app.clone()),
                    KeyValue::Section(_) => deps.insert(key.clone()),
                };
            }
        }

        deps.retain(|id| is_app_id(id) && id != REDISTRIBUTABLES_APP_ID && id != primary_app_id);

        if !deps.is_empty() {
            tracing::info!("App {primary_app_id} depends on {deps:?}");
        }
        deps
    }
}

fn is_app_id(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) && s != "0"
}

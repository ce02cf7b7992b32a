// src/core/config_api/mod.rs

//! The module-oriented configuration API: a facade over the version store
//! that resolves environment references, registers modules, answers dotted
//! value lookups and feature-flag queries, and exposes the administrative
//! version operations.

pub mod env_resolve;

pub use env_resolve::{resolve_str, resolve_tree};

use crate::config::Environment;
use crate::core::config_store::{
    CommitMeta, ConfigModule, ConfigSnapshot, ConfigVersionStore, ModuleMeta, VersionDiff,
    VersionMetadata, VersionPage,
};
use crate::core::errors::RefractError;
use crate::core::paths::get_path;
use crate::core::schema::{self, ValidationReport};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ConfigApi {
    store: Arc<ConfigVersionStore>,
    env: HashMap<String, String>,
    environment: Environment,
}

impl ConfigApi {
    pub fn new(
        store: Arc<ConfigVersionStore>,
        env: HashMap<String, String>,
        environment: Environment,
    ) -> Self {
        Self {
            store,
            env,
            environment,
        }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// The active snapshot with `${NAME}` references resolved in every
    /// module's config values. Metadata and schemas are left untouched.
    pub async fn get_current_resolved(&self) -> Result<Option<ConfigSnapshot>, RefractError> {
        let Some(current) = self.store.get_current().await? else {
            return Ok(None);
        };
        let mut snapshot = (*current).clone();
        for module in snapshot.modules.values_mut() {
            module.config = resolve_tree(&module.config, &self.env, self.environment);
        }
        Ok(Some(snapshot))
    }

    /// Reads one module with its config values resolved.
    pub async fn get_module(&self, name: &str) -> Result<Option<ConfigModule>, RefractError> {
        Ok(self.store.get_module(name).await?.map(|mut module| {
            module.config = resolve_tree(&module.config, &self.env, self.environment);
            module
        }))
    }

    /// Replaces one module's config as a new version. A `comment` is
    /// mandatory for the audit trail.
    pub async fn update_module(
        &self,
        name: &str,
        config: Value,
        meta: CommitMeta,
    ) -> Result<VersionMetadata, RefractError> {
        if meta.comment.trim().is_empty() {
            return Err(RefractError::InvalidRequest(
                "a non-empty 'comment' is required".to_string(),
            ));
        }
        self.store.update_module(name, config, meta).await
    }

    /// Registers a module: appends it to `activeModules`, installs its
    /// declared defaults as the initial config, and stores a new snapshot
    /// authored by the system. Re-registering is a no-op (`Ok(None)`).
    pub async fn register_module(
        &self,
        meta: ModuleMeta,
    ) -> Result<Option<VersionMetadata>, RefractError> {
        let mut snapshot = match self.store.get_current().await? {
            Some(current) => (*current).clone(),
            None => ConfigSnapshot::empty(),
        };

        let name = meta.name.clone();
        if snapshot.modules.contains_key(&name) {
            debug!(module = %name, "module already registered, ignoring");
            return Ok(None);
        }

        if !snapshot.meta.active_modules.contains(&name) {
            snapshot.meta.active_modules.push(name.clone());
        }
        let module = ConfigModule {
            config: meta.defaults.clone(),
            meta,
        };
        snapshot.modules.insert(name.clone(), module);

        let version = self
            .store
            .store(
                snapshot,
                CommitMeta {
                    author: "system".to_string(),
                    comment: format!("Register module '{name}'"),
                    modules: vec![name.clone()],
                    tags: None,
                },
            )
            .await?;
        info!(module = %name, version = %version.id, "module registered");
        Ok(Some(version))
    }

    /// Dotted lookup over the active snapshot tree. Any missing segment —
    /// or any backend failure — yields the default.
    pub async fn get_value(&self, path: &str, default: Value) -> Value {
        let snapshot = match self.store.get_current().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return default,
            Err(e) => {
                warn!(path, "config lookup failed, using default: {e}");
                return default;
            }
        };
        match get_path(&snapshot.to_value(), path) {
            Some(value) => resolve_tree(value, &self.env, self.environment),
            None => default,
        }
    }

    /// Feature-flag lookup: `core.features` first, then every other
    /// module's `features` object. Unknown flags are disabled.
    pub async fn is_feature_enabled(&self, name: &str) -> bool {
        let Ok(Some(snapshot)) = self.store.get_current().await else {
            return false;
        };

        let flag_in = |module: &ConfigModule| -> Option<bool> {
            module
                .config
                .get("features")
                .and_then(|features| features.get(name))
                .and_then(Value::as_bool)
        };

        if let Some(core) = snapshot.modules.get("core")
            && let Some(enabled) = flag_in(core)
        {
            return enabled;
        }
        snapshot
            .modules
            .iter()
            .filter(|(module_name, _)| module_name.as_str() != "core")
            .find_map(|(_, module)| flag_in(module))
            .unwrap_or(false)
    }

    /// Validates a candidate snapshot without storing it.
    pub fn validate_candidate(&self, snapshot: &ConfigSnapshot) -> ValidationReport {
        schema::validate_snapshot(snapshot)
    }

    // --- Version administration passthroughs ---

    pub async fn list_versions(
        &self,
        limit: usize,
        cursor: Option<String>,
    ) -> Result<VersionPage, RefractError> {
        self.store.list_versions(limit, cursor).await
    }

    pub async fn get_version(&self, id: &str) -> Result<Option<ConfigSnapshot>, RefractError> {
        self.store.get_version(id).await
    }

    pub async fn activate_version(&self, id: &str) -> Result<bool, RefractError> {
        self.store.activate(id).await
    }

    pub async fn compare_versions(&self, a: &str, b: &str) -> Result<VersionDiff, RefractError> {
        self.store.compare(a, b).await
    }
}

//! Registered mini-apps and their enable switches.

use std::collections::BTreeMap;

use neotool_core::{Store, store_key};
use serde::{Deserialize, Serialize};

use crate::error::EventError;

/// Store key (within the `neotool` namespace) of the persisted app data list.
pub const APP_DATA_KEY: &str = "appData";

const NAMESPACE: &str = "neotool";

/// Static description of an installed mini-app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Unique id
    pub id: String,
    /// Display name
    pub name: String,
    /// Install directory
    pub path: String,
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Entry page
    pub entry: String,
    /// Optional stylesheet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
}

/// User-controlled state of a mini-app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppData {
    /// App id
    pub id: String,
    /// Whether the app is enabled
    pub enable: bool,
}

/// Known apps and their data.
///
/// Apps without stored data are treated as disabled.
#[derive(Debug, Clone, Default)]
pub struct AppRegistry {
    configs: BTreeMap<String, AppConfig>,
    data: BTreeMap<String, AppData>,
}

impl AppRegistry {
    /// Build a registry from installed apps and previously stored data.
    /// Data for apps that are no longer installed is discarded.
    pub fn new(configs: Vec<AppConfig>, data: Vec<AppData>) -> Self {
        let configs: BTreeMap<_, _> = configs.into_iter().map(|c| (c.id.clone(), c)).collect();
        let data = data
            .into_iter()
            .filter(|d| configs.contains_key(&d.id))
            .map(|d| (d.id.clone(), d))
            .collect();
        Self { configs, data }
    }

    /// Config of `id`.
    pub fn config(&self, id: &str) -> Option<&AppConfig> {
        self.configs.get(id)
    }

    /// Data of `id`, defaulting to disabled for installed apps.
    pub fn data(&self, id: &str) -> Option<AppData> {
        if !self.configs.contains_key(id) {
            return None;
        }
        Some(
            self.data
                .get(id)
                .cloned()
                .unwrap_or_else(|| AppData { id: id.to_string(), enable: false }),
        )
    }

    /// Every stored data entry, ordered by id.
    pub fn data_list(&self) -> Vec<AppData> {
        self.data.values().cloned().collect()
    }

    /// Flip the switch of `id`.
    pub fn set_enabled(&mut self, id: &str, enable: bool) -> Result<AppData, EventError> {
        if !self.configs.contains_key(id) {
            return Err(EventError::UnknownApp(id.to_string()));
        }
        let data = AppData { id: id.to_string(), enable };
        self.data.insert(id.to_string(), data.clone());
        Ok(data)
    }
}

/// Load the persisted app data list; absent means none stored yet.
pub fn load_app_data(store: &dyn Store) -> Result<Vec<AppData>, EventError> {
    let Some(value) = store.load(&store_key(NAMESPACE, APP_DATA_KEY))? else {
        return Ok(Vec::new());
    };
    Ok(serde_json::from_value(value).map_err(neotool_core::StoreError::from)?)
}

pub(crate) fn save_app_data(store: &dyn Store, data: &[AppData]) -> Result<(), EventError> {
    let value = serde_json::to_value(data).map_err(neotool_core::StoreError::from)?;
    store.save(&store_key(NAMESPACE, APP_DATA_KEY), value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use neotool_core::MemoryStore;

    use super::*;

    fn config(id: &str) -> AppConfig {
        AppConfig {
            id: id.to_string(),
            name: id.to_string(),
            path: format!("apps/{id}"),
            description: None,
            entry: "index.html".to_string(),
            css: None,
        }
    }

    #[test]
    fn uninstalled_app_data_is_discarded() {
        let registry = AppRegistry::new(
            vec![config("sticker")],
            vec![
                AppData { id: "sticker".into(), enable: true },
                AppData { id: "gone".into(), enable: true },
            ],
        );

        assert_eq!(registry.data_list().len(), 1);
        assert_eq!(registry.data("gone"), None);
    }

    #[test]
    fn installed_app_without_data_is_disabled() {
        let registry = AppRegistry::new(vec![config("keyboard")], Vec::new());

        assert_eq!(registry.data("keyboard"), Some(AppData { id: "keyboard".into(), enable: false }));
    }

    #[test]
    fn enabling_unknown_app_fails() {
        let mut registry = AppRegistry::new(vec![config("keyboard")], Vec::new());

        assert_eq!(registry.set_enabled("nope", true), Err(EventError::UnknownApp("nope".into())));
    }

    #[test]
    fn app_data_persists_through_store() {
        let store = MemoryStore::new();
        assert!(load_app_data(&store).unwrap().is_empty());

        let data = vec![AppData { id: "sticker".into(), enable: true }];
        save_app_data(&store, &data).unwrap();

        assert_eq!(load_app_data(&store).unwrap(), data);
    }

    #[test]
    fn config_omits_absent_optionals() {
        let json = serde_json::to_value(config("chat")).unwrap();

        assert!(json.get("css").is_none());
        assert_eq!(json["entry"], "index.html");
    }
}

//! Plugin manifest definition
//!
//! Every plugin package carries a `plugin.json` at its root. Six keys are
//! required and must be non-empty; validation runs before the entry module
//! is ever resolved.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::application::errors::PluginError;

pub const MANIFEST_FILE: &str = "plugin.json";

const REQUIRED_KEYS: [&str; 6] = [
    "name",
    "description",
    "identifier",
    "version",
    "author",
    "loader",
];

/// Plugin metadata
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PluginManifest {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Globally unique bundle identifier, e.g. `acme.welcome`
    #[serde(default)]
    pub identifier: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub author: Author,

    /// Entry-point reference resolved by the module loader
    #[serde(default)]
    pub loader: String,

    /// Private storage schema attached while the plugin is loaded
    #[serde(default)]
    pub schema: Option<SchemaSpec>,

    /// Declared UI descriptor; must parse when present
    #[serde(default)]
    pub ui_file: Option<String>,

    /// File-backed settings blob
    #[serde(default)]
    pub save_file: Option<String>,
}

/// Author field, either a bare name or a publisher profile
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Author {
    Name(String),
    Profile {
        display: String,
        #[serde(default)]
        discord_id: Option<i64>,
        #[serde(default)]
        email: Option<String>,
    },
}

impl Default for Author {
    fn default() -> Self {
        Author::Name(String::new())
    }
}

impl Author {
    pub fn display_name(&self) -> &str {
        match self {
            Author::Name(name) => name,
            Author::Profile { display, .. } => display,
        }
    }

    pub fn discord_id(&self) -> Option<i64> {
        match self {
            Author::Name(_) => None,
            Author::Profile { discord_id, .. } => *discord_id,
        }
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            Author::Name(_) => None,
            Author::Profile { email, .. } => email.as_deref(),
        }
    }

    fn is_empty(&self) -> bool {
        self.display_name().is_empty()
    }
}

/// Private storage schema declaration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchemaSpec {
    pub database_file: String,
    pub name: String,
    pub creation: String,
}

impl PluginManifest {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PluginError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| {
            PluginError::Validation(format!("`{}` is missing a {}", path.display(), MANIFEST_FILE))
        })?;

        let manifest: PluginManifest = serde_json::from_str(&content)
            .map_err(|_| PluginError::Validation(format!("failed to parse the {}", MANIFEST_FILE)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Reject any missing or empty required key.
    pub fn validate(&self) -> Result<(), PluginError> {
        for key in REQUIRED_KEYS {
            let present = match key {
                "name" => !self.name.is_empty(),
                "description" => !self.description.is_empty(),
                "identifier" => !self.identifier.is_empty(),
                "version" => !self.version.is_empty(),
                "author" => !self.author.is_empty(),
                "loader" => !self.loader.is_empty(),
                _ => true,
            };
            if !present {
                return Err(PluginError::Validation(format!(
                    "{} :: missing or invalid {} key",
                    MANIFEST_FILE, key
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> serde_json::Value {
        serde_json::json!({
            "identifier": "a.b",
            "name": "T",
            "description": "d",
            "version": "1",
            "author": "x",
            "loader": "main"
        })
    }

    #[test]
    fn minimal_manifest_is_valid() {
        let manifest: PluginManifest = serde_json::from_value(minimal()).unwrap();
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.author.display_name(), "x");
    }

    #[test]
    fn each_required_key_is_enforced() {
        for key in ["identifier", "name", "description", "version", "author", "loader"] {
            let mut value = minimal();
            value.as_object_mut().unwrap().remove(key);
            let manifest: PluginManifest = serde_json::from_value(value).unwrap();
            let err = manifest.validate().unwrap_err();
            assert!(err.to_string().contains(key), "missing {} not reported", key);
        }
    }

    #[test]
    fn empty_required_key_is_rejected() {
        let mut value = minimal();
        value["version"] = serde_json::json!("");
        let manifest: PluginManifest = serde_json::from_value(value).unwrap();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn profile_author_parses() {
        let mut value = minimal();
        value["author"] = serde_json::json!({
            "display": "Acme",
            "discord_id": 123,
            "email": "a@b.c"
        });
        let manifest: PluginManifest = serde_json::from_value(value).unwrap();
        assert_eq!(manifest.author.display_name(), "Acme");
        assert_eq!(manifest.author.discord_id(), Some(123));
        assert_eq!(manifest.author.email(), Some("a@b.c"));
    }

    #[test]
    fn schema_block_parses() {
        let mut value = minimal();
        value["schema"] = serde_json::json!({
            "database_file": "data.db",
            "name": "welcome",
            "creation": "CREATE TABLE t(x)"
        });
        let manifest: PluginManifest = serde_json::from_value(value).unwrap();
        let schema = manifest.schema.unwrap();
        assert_eq!(schema.name, "welcome");
    }
}

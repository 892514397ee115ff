//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Validate configuration legality
//! - Generate `DispatchBlueprint`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let blueprint = ConfigLoader::load_from_path(Path::new("dispatch.toml")).unwrap();
//! println!("Destination: {}", blueprint.activation.destination);
//! ```

mod parser;
mod validator;

pub use contracts::DispatchBlueprint;
pub use parser::ConfigFormat;

use contracts::ContractError;
use std::path::Path;

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file path
    ///
    /// Automatically detects format from file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<DispatchBlueprint, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load configuration from string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<DispatchBlueprint, ContractError> {
        Self::parse_and_validate(content, format)
    }

    /// Non-fatal findings on an already valid blueprint
    pub fn warnings(blueprint: &DispatchBlueprint) -> Vec<String> {
        validator::warnings(blueprint)
    }

    /// Serialize DispatchBlueprint to TOML string
    pub fn to_toml(blueprint: &DispatchBlueprint) -> Result<String, ContractError> {
        toml::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize DispatchBlueprint to JSON string
    pub fn to_json(blueprint: &DispatchBlueprint) -> Result<String, ContractError> {
        serde_json::to_string_pretty(blueprint)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    /// Read configuration file content
    fn read_file(path: &Path) -> Result<String, ContractError> {
        Ok(std::fs::read_to_string(path)?)
    }

    /// Parse and validate configuration content
    fn parse_and_validate(
        content: &str,
        format: ConfigFormat,
    ) -> Result<DispatchBlueprint, ContractError> {
        let blueprint = parser::parse(content, format)?;
        validator::validate(&blueprint)?;
        Ok(blueprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::StrategyKind;
    use std::io::Write;

    const MINIMAL_TOML: &str = r#"
[activation]
destination = "orders"
messaging_engine = "ME01"
handler_id = "OrderListener"
session_id = 7
"#;

    const BATCH_TOML: &str = r#"
[activation]
destination = "orders"
messaging_engine = "ME01"
target_engine = "ME02"
handler_id = "OrderListener"

[delivery]
acknowledge_mode = "dups_ok_acknowledge"
max_batch_size = 50
sequential_failure_threshold = 3
"#;

    #[test]
    fn test_load_minimal_toml() {
        let result = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml);
        assert!(result.is_ok(), "Failed: {:?}", result.err());

        let bp = result.unwrap();
        assert_eq!(bp.activation.session_id, 7);
        assert_eq!(bp.activation.target_engine(), "ME01");
        assert_eq!(bp.strategy_kind(), StrategyKind::SingleDeletion);
        assert!(ConfigLoader::warnings(&bp).is_empty());
    }

    #[test]
    fn test_load_batch_toml() {
        let bp = ConfigLoader::load_from_str(BATCH_TOML, ConfigFormat::Toml).unwrap();
        assert_eq!(bp.strategy_kind(), StrategyKind::BatchDeletion);
        assert_eq!(bp.delivery.max_batch_size, 50);
        let config = bp.to_dispatcher_config();
        assert_eq!(config.sequential_failure_threshold, 3);
        assert_eq!(ConfigLoader::warnings(&bp).len(), 1);
    }

    #[test]
    fn test_validation_failure_surfaces_field() {
        let content = r#"
[activation]
destination = ""
messaging_engine = "ME01"
handler_id = "OrderListener"
"#;
        let err = ConfigLoader::load_from_str(content, ConfigFormat::Toml).unwrap_err();
        assert!(
            matches!(
                err,
                ContractError::ConfigValidation { ref field, .. }
                    if field == "activation.destination"
            ),
            "got: {err}"
        );
    }

    #[test]
    fn test_batch_size_out_of_range() {
        let content = r#"
[activation]
destination = "orders"
messaging_engine = "ME01"
handler_id = "OrderListener"

[delivery]
max_batch_size = 0
"#;
        let err = ConfigLoader::load_from_str(content, ConfigFormat::Toml).unwrap_err();
        assert!(err.to_string().contains("max_batch_size"), "got: {err}");
    }

    #[test]
    fn test_toml_roundtrip() {
        let bp = ConfigLoader::load_from_str(BATCH_TOML, ConfigFormat::Toml).unwrap();
        let toml_str = ConfigLoader::to_toml(&bp).unwrap();
        let bp2 = ConfigLoader::load_from_str(&toml_str, ConfigFormat::Toml).unwrap();
        assert_eq!(bp.activation.target_engine, bp2.activation.target_engine);
        assert_eq!(bp.delivery.max_batch_size, bp2.delivery.max_batch_size);
    }

    #[test]
    fn test_json_output_loads_back() {
        let bp = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&bp).unwrap();
        let bp2 = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(bp2.activation.handler_id, "OrderListener");
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(MINIMAL_TOML.as_bytes()).unwrap();
        let bp = ConfigLoader::load_from_path(file.path()).unwrap();
        assert_eq!(bp.activation.destination, "orders");
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let err = ConfigLoader::load_from_path(file.path()).unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }

    #[test]
    fn test_missing_file() {
        let err =
            ConfigLoader::load_from_path(Path::new("/nonexistent/dispatch.toml")).unwrap_err();
        assert!(matches!(err, ContractError::Io(_)));
    }
}

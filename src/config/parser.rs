//! Parser for settings files and templates.
//!
//! Settings come from a YAML file plus environment variables, with the
//! environment taking precedence. Templates are YAML or JSON documents; the
//! raw text is kept alongside the parsed form so it can be stored in state.

use crate::error::{ConfigError, OrgFormError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::settings::Settings;
use super::template::Template;

/// Environment variable naming the settings file.
pub const CONFIG_ENV_VAR: &str = "ORGFORM_CONFIG";

/// A template together with the text it was parsed from.
#[derive(Debug, Clone)]
pub struct LoadedTemplate {
    /// The parsed template.
    pub template: Template,
    /// The raw template text.
    pub text: String,
}

/// Parser for loading settings and templates.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Resolves a path relative to the base path.
    #[must_use]
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        match &self.base_path {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Loads settings from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Settings> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = read_file(path)?;
        self.parse_yaml(&content, Some(path))
    }

    /// Parses settings from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Settings> {
        debug!("Parsing YAML configuration");

        let settings: Settings = serde_yaml::from_str(content).map_err(|e| {
            OrgFormError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })?;

        debug!(
            "Parsed configuration with {} stack(s), template {}",
            settings.stacks.len(),
            settings.organization.template
        );
        Ok(settings)
    }

    /// Loads settings with environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<Settings> {
        let mut settings = self.load_file(path)?;
        Self::apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
        Ok(settings)
    }

    /// Applies `ORGFORM_STATE_*` overrides using the given variable lookup.
    pub fn apply_env_overrides<F>(settings: &mut Settings, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bucket) = lookup("ORGFORM_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            settings.state.bucket = Some(bucket);
        }

        if let Some(prefix) = lookup("ORGFORM_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            settings.state.prefix = Some(prefix);
        }

        if let Some(region) = lookup("ORGFORM_STATE_REGION") {
            debug!("Overriding state.region from environment");
            settings.state.region = Some(region);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self.resolve(".env");

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                OrgFormError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Loads a template file, resolved against the base path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_template(&self, path: impl AsRef<Path>) -> Result<LoadedTemplate> {
        let path = self.resolve(path);
        info!("Loading template from: {}", path.display());

        let text = read_file(&path)?;
        let template = Self::parse_template(&text, Some(&path))?;
        Ok(LoadedTemplate { template, text })
    }

    /// Parses a template from YAML or JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid template.
    pub fn parse_template(text: &str, source: Option<&Path>) -> Result<Template> {
        serde_yaml::from_str(text).map_err(|e| {
            OrgFormError::Config(ConfigError::ParseError {
                message: format!("Template parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })
    }
}

fn read_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(OrgFormError::Config(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        }));
    }

    std::fs::read_to_string(path).map_err(|e| {
        OrgFormError::Config(ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })
    })
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["orgform.yaml", "orgform.yml"];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(OrgFormError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FailurePolicy, StateBackend};
    use tempfile::TempDir;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
organization:
  template: organization.yml
";
        let settings = ConfigParser::new()
            .parse_yaml(yaml, None)
            .expect("should parse");

        assert_eq!(settings.organization.template, "organization.yml");
        assert_eq!(settings.state.backend, StateBackend::Local);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
organization:
  template: organization.yml
  close_accounts: true
  max_concurrent_tasks: 10
  failure_tolerance: 2

state:
  backend: s3
  bucket: orgform-state
  prefix: acme/prod
  region: eu-central-1

execution:
  failure_policy: skip-dependents

stacks:
  - stack_name: baseline-${CurrentRegion}
    template: stacks/baseline.yml
    role_name: OrganizationAccountAccessRole
    termination_protection: true
    max_concurrent_stacks: 5
    failed_stack_tolerance: 1
    parameters:
      Environment: prod
"#;
        let settings = ConfigParser::new()
            .parse_yaml(yaml, None)
            .expect("should parse");

        assert!(settings.organization.close_accounts);
        assert_eq!(settings.organization.max_concurrent_tasks, 10);
        assert_eq!(settings.state.bucket.as_deref(), Some("orgform-state"));
        assert_eq!(
            settings.execution.failure_policy,
            FailurePolicy::SkipDependents
        );
        assert_eq!(settings.stacks.len(), 1);
        assert_eq!(settings.stacks[0].max_concurrent_stacks, 5);
        assert!(settings.stacks[0].termination_protection);
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = ConfigParser::new()
            .parse_yaml("organization:\n  template: org.yml\n", None)
            .expect("should parse");

        ConfigParser::apply_env_overrides(&mut settings, |name| match name {
            "ORGFORM_STATE_BUCKET" => Some(String::from("override-bucket")),
            "ORGFORM_STATE_REGION" => Some(String::from("us-east-1")),
            _ => None,
        });

        assert_eq!(settings.state.bucket.as_deref(), Some("override-bucket"));
        assert_eq!(settings.state.region.as_deref(), Some("us-east-1"));
        assert!(settings.state.prefix.is_none());
    }

    #[test]
    fn test_load_template_relative_to_base() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(
            dir.path().join("org.yml"),
            "Organization:\n  Root:\n    Type: OC::ORG::OrganizationRoot\n",
        )
        .expect("write template");

        let loaded = ConfigParser::new()
            .with_base_path(dir.path())
            .load_template("org.yml")
            .expect("should load");

        assert_eq!(loaded.template.organization.len(), 1);
        assert!(loaded.text.contains("OrganizationRoot"));
    }

    #[test]
    fn test_missing_template() {
        let dir = TempDir::new().expect("temp dir");
        let result = ConfigParser::new()
            .with_base_path(dir.path())
            .load_template("missing.yml");

        assert!(matches!(
            result,
            Err(OrgFormError::Config(ConfigError::FileNotFound { .. }))
        ));
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("orgform.yaml"), "").expect("write config");
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("create dirs");

        let found = find_config_file(&nested).expect("should find");
        assert_eq!(found, dir.path().join("orgform.yaml"));
    }
}

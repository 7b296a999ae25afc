//! Configuration management for the footprint worker.
//!
//! Configuration is loaded from a TOML file. `${VAR_NAME}` placeholders are
//! replaced with environment variables before parsing; omitted keys fall
//! back to defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration for the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Claim/dispatch loop configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://footprint.db")
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// How long a writer waits for the database lock, in milliseconds
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

/// Claim/dispatch loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Seconds between two claim cycles.
    ///
    /// **Must be > 0** - Zero will cause a panic in tokio::time::interval.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Maximum number of pending changes claimed per cycle
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Seconds after which a `processing` entry is handed back to `pending`
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

impl WorkerConfig {
    /// Interval between claim cycles.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Lease duration of a claimed entry.
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            lease_ttl_secs: default_lease_ttl_secs(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_batch_size() -> u32 {
    100
}

fn default_lease_ttl_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables can be referenced using `${VAR_NAME}` syntax.
    /// For example: `url = "sqlite://${DATA_DIR}/footprint.db"`
    ///
    /// # Example
    /// ```no_run
    /// # use footprint_worker::config::Config;
    /// let config = Config::from_file("worker.toml")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let expanded = expand_env_vars(&contents)?;

        let config: Config = toml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML string (no environment expansion).
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml).context("Failed to parse TOML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be > 0");
        }
        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot exceed max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.worker.poll_interval_secs == 0 {
            anyhow::bail!("Worker poll_interval_secs must be > 0 (tokio interval cannot be zero)");
        }
        if self.worker.batch_size == 0 {
            anyhow::bail!("Worker batch_size must be > 0");
        }
        if self.worker.lease_ttl_secs == 0 {
            anyhow::bail!("Worker lease_ttl_secs must be > 0");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Logging level must be one of: {} (got '{}')",
                valid_levels.join(", "),
                self.logging.level
            );
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            anyhow::bail!(
                "Logging format must be one of: {} (got '{}')",
                valid_formats.join(", "),
                self.logging.format
            );
        }

        Ok(())
    }
}

/// Expand `${VAR_NAME}` placeholders line by line.
///
/// Anything after a `#` that is not inside a quoted string is a comment and
/// is copied verbatim. Referencing an unset variable is an error.
fn expand_env_vars(input: &str) -> Result<String> {
    let mut output = String::with_capacity(input.len());

    for (index, line) in input.split_inclusive('\n').enumerate() {
        let (code, comment) = split_comment(line);
        expand_line(code, index + 1, &mut output)?;
        output.push_str(comment);
    }

    Ok(output)
}

/// Split a line into the part before a comment and the comment itself.
fn split_comment(line: &str) -> (&str, &str) {
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, ch) in line.char_indices() {
        match quote {
            Some('"') if escaped => escaped = false,
            Some('"') if ch == '\\' => escaped = true,
            Some(open) if ch == open => quote = None,
            Some(_) => {}
            None if ch == '"' || ch == '\'' => quote = Some(ch),
            None if ch == '#' => return line.split_at(i),
            None => {}
        }
    }

    (line, "")
}

fn expand_line(code: &str, line_no: usize, output: &mut String) -> Result<()> {
    let mut rest = code;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find('}') else {
            anyhow::bail!("Unclosed environment variable placeholder on line {line_no}");
        };
        let name = &after[..end];
        if name.is_empty() {
            anyhow::bail!("Empty environment variable name on line {line_no}");
        }

        let value = std::env::var(name)
            .with_context(|| format!("Environment variable '{name}' is not set (line {line_no})"))?;
        output.push_str(&value);

        rest = &after[end + 1..];
    }

    output.push_str(rest);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
[database]
url = "sqlite://footprint.db"
"#;

    #[test]
    fn test_default_values() {
        let config = Config::from_toml_str(MINIMAL).unwrap();

        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.database.min_connections, 1);
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert_eq!(config.worker.poll_interval_secs, 5);
        assert_eq!(config.worker.batch_size, 100);
        assert_eq!(config.worker.lease_ttl_secs, 60);
        assert_eq!(config.worker.lease_ttl(), Duration::from_secs(60));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_toml_str(
            r#"
[database]
url = "sqlite:///var/lib/footprint/footprint.db"
max_connections = 8
min_connections = 2
busy_timeout_ms = 10000

[worker]
poll_interval_secs = 2
batch_size = 25
lease_ttl_secs = 300

[logging]
level = "debug"
format = "json"
"#,
        )
        .unwrap();

        assert_eq!(config.database.max_connections, 8);
        assert_eq!(config.worker.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.worker.batch_size, 25);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_validation_failures() {
        let cases = [
            ("[database]\nurl = \"\"", "Database URL"),
            (
                "[database]\nurl = \"sqlite://a.db\"\nmax_connections = 0",
                "max_connections",
            ),
            (
                "[database]\nurl = \"sqlite://a.db\"\nmax_connections = 2\nmin_connections = 3",
                "cannot exceed",
            ),
            (
                "[database]\nurl = \"sqlite://a.db\"\n[worker]\npoll_interval_secs = 0",
                "poll_interval_secs",
            ),
            (
                "[database]\nurl = \"sqlite://a.db\"\n[worker]\nbatch_size = 0",
                "batch_size",
            ),
            (
                "[database]\nurl = \"sqlite://a.db\"\n[worker]\nlease_ttl_secs = 0",
                "lease_ttl_secs",
            ),
            (
                "[database]\nurl = \"sqlite://a.db\"\n[logging]\nlevel = \"loud\"",
                "Logging level",
            ),
            (
                "[database]\nurl = \"sqlite://a.db\"\n[logging]\nformat = \"xml\"",
                "Logging format",
            ),
        ];

        for (toml, expected) in cases {
            let err = Config::from_toml_str(toml).unwrap_err();
            assert!(
                err.to_string().contains(expected),
                "expected '{expected}' in '{err}'"
            );
        }
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("FOOTPRINT_TEST_DIR", "/data");
        let expanded = expand_env_vars("url = \"sqlite://${FOOTPRINT_TEST_DIR}/f.db\"\n").unwrap();
        assert_eq!(expanded, "url = \"sqlite:///data/f.db\"\n");
    }

    #[test]
    fn test_expand_env_vars_undefined() {
        let err = expand_env_vars("url = \"${FOOTPRINT_TEST_SURELY_UNSET}\"").unwrap_err();
        assert!(err.to_string().contains("FOOTPRINT_TEST_SURELY_UNSET"));
    }

    #[test]
    fn test_expand_env_vars_malformed() {
        assert!(expand_env_vars("url = \"${}\"")
            .unwrap_err()
            .to_string()
            .contains("Empty"));
        assert!(expand_env_vars("url = \"${OPEN")
            .unwrap_err()
            .to_string()
            .contains("Unclosed"));
    }

    #[test]
    fn test_expand_env_vars_ignores_comments() {
        let input = "# url = \"${FOOTPRINT_TEST_SURELY_UNSET}\"\nlevel = \"info\" # ${ALSO_UNSET}\n";
        assert_eq!(expand_env_vars(input).unwrap(), input);
    }

    #[test]
    fn test_expand_env_vars_hash_in_string() {
        std::env::set_var("FOOTPRINT_TEST_NAME", "db");
        let expanded =
            expand_env_vars("url = \"sqlite://a#${FOOTPRINT_TEST_NAME}\" # note\n").unwrap();
        assert_eq!(expanded, "url = \"sqlite://a#db\" # note\n");

        let expanded = expand_env_vars("url = 'x#${FOOTPRINT_TEST_NAME}'\n").unwrap();
        assert_eq!(expanded, "url = 'x#db'\n");
    }

    #[test]
    fn test_config_from_file_with_env_vars() {
        std::env::set_var("FOOTPRINT_TEST_DB", "sqlite://env.db");
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "# Example: url = \"${{UNSET_IN_COMMENT}}\"\n[database]\nurl = \"${{FOOTPRINT_TEST_DB}}\"\n\n[worker]\nbatch_size = 10"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.database.url, "sqlite://env.db");
        assert_eq!(config.worker.batch_size, 10);
    }
}

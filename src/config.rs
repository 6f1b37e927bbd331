use anyhow::{anyhow, Result};
use config::Config;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Default database name (file stem of the SQLite database)
pub const DEFAULT_DATABASE: &str = "schemigrate";

/// Special address that selects an in-memory database
pub const MEMORY_ADDRESS: &str = ":memory:";

/// Where and how to reach the target database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionConfig {
    /// Directory holding the database file, or `:memory:`
    pub address: String,

    pub port: u16,

    pub user: String,

    #[serde(skip_serializing)]
    pub password: String,

    /// Database name; the SQLite file is `{address}/{database}.sqlite3`
    pub database: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: default_data_dir(),
            port: 5432,
            user: "postgres".to_string(),
            password: "gitops".to_string(),
            database: DEFAULT_DATABASE.to_string(),
        }
    }
}

impl ConnectionConfig {
    /// Configuration for a private in-memory database
    pub fn in_memory() -> Self {
        Self {
            address: MEMORY_ADDRESS.to_string(),
            ..Default::default()
        }
    }

    /// Configuration for a database file inside the given directory
    pub fn in_dir(dir: &str, database: &str) -> Self {
        Self {
            address: dir.to_string(),
            database: database.to_string(),
            ..Default::default()
        }
    }

    pub fn is_memory(&self) -> bool {
        self.address == MEMORY_ADDRESS
    }

    /// Path of the SQLite database file, `None` for in-memory targets
    pub fn sqlite_path(&self) -> Option<String> {
        if self.is_memory() {
            return None;
        }
        let dir = self.address.trim_end_matches('/');
        Some(format!("{}/{}.sqlite3", dir, self.database))
    }

    /// SQLite URI filename for this target
    ///
    /// Characters that SQLite's URI parser treats specially are percent-encoded
    /// so that directory names containing `?`, `#` or `%` survive intact.
    pub fn sqlite_uri(&self) -> String {
        match self.sqlite_path() {
            Some(path) => format!("file:{}?mode=rwc", encode_uri_path(&path)),
            None => "file::memory:".to_string(),
        }
    }

    /// Credential-bearing URL for this target
    ///
    /// The user and password are escaped so that base64 passwords containing
    /// `/`, `+` or `=` do not break URL parsing.
    pub fn url(&self) -> String {
        self.render_url(&urlencoding::encode(&self.password))
    }

    /// Same as [`url`](Self::url) with the password replaced by `***`
    pub fn redacted_url(&self) -> String {
        self.render_url("***")
    }

    fn render_url(&self, password: &str) -> String {
        format!(
            "sqlite://{}:{}@{}:{}/{}",
            urlencoding::encode(&self.user),
            password,
            self.address,
            self.port,
            self.database
        )
    }
}

/// Percent-encode the characters SQLite's URI filename parser interprets
fn encode_uri_path(input: &str) -> String {
    // '%' first, the other escapes introduce new '%' characters
    input
        .replace('%', "%25")
        .replace('?', "%3F")
        .replace('#', "%23")
        .replace(' ', "%20")
}

fn default_data_dir() -> String {
    let home_dir = dirs::home_dir()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|| ".".to_string());
    format!("{}/.schemigrate", home_dir)
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrateConfig {
    pub database: ConnectionConfig,

    /// Migration source locator (directory path or `file://` URL)
    pub migrations: Option<String>,

    /// How long to wait for the migration lock and for a busy database (default: 30s)
    pub lock_timeout_secs: u64,

    /// Upper bound for a single migration script, 0 disables the bound
    pub statement_timeout_secs: u64,
}

const EMPTY_CONFIG: &str = r#"### schemigrate configuration file

### directory that holds the database file (or ":memory:")
# address = "~/.schemigrate"

### database name, the file is {address}/{database}.sqlite3
# database = "schemigrate"

### connection credentials (DB_ADDR and DB_PASS override address and password)
# port = 5432
# user = "postgres"
# password = "gitops"

### migration directory containing {version}_{title}.up.sql / .down.sql files
# migrations = "./migrations"

### timeouts (in seconds)
# lock_timeout_secs = 30
# statement_timeout_secs = 0        # unbounded
"#;

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            database: ConnectionConfig::default(),
            migrations: None,
            lock_timeout_secs: 30,
            statement_timeout_secs: 0,
        }
    }
}

impl MigrateConfig {
    /// Function to create and initialize a new configuration
    pub fn new(path: &Option<String>) -> Result<MigrateConfig> {
        let mut builder = Config::builder();

        // Add in toml configuration file
        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    let path_str = path
                        .to_str()
                        .ok_or_else(|| anyhow!("Could not convert path to string"))?;
                    builder = builder.add_source(config::File::with_name(path_str));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                let dir = default_data_dir();
                std::fs::create_dir_all(dir.as_str())
                    .map_err(|e| anyhow!("Unable to create schemigrate directory: {}", e))?;
                let p = Self::config_file_path();
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.as_str(), e)
                    })?;
                }
            }
        }

        // Settings from the environment, e.g. `SCHEMIGRATE_DATABASE=app ./schemigrate up`
        builder = builder.add_source(config::Environment::with_prefix("SCHEMIGRATE"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let mut config = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        // DB_ADDR / DB_PASS take precedence over everything else
        if let Ok(addr) = std::env::var("DB_ADDR") {
            config.insert("address".to_string(), addr);
        }
        if let Ok(pass) = std::env::var("DB_PASS") {
            config.insert("password".to_string(), pass);
        }

        Self::from_map(&config)
    }

    /// Build a configuration from already-merged key/value settings
    pub fn from_map(config: &HashMap<String, String>) -> Result<MigrateConfig> {
        let defaults = MigrateConfig::default();
        let mut database = defaults.database;

        if let Some(address) = config.get("address") {
            database.address = expand_home(address);
        }
        if let Some(port) = config.get("port") {
            database.port = port
                .parse()
                .map_err(|e| anyhow!("Invalid port '{}': {}", port, e))?;
        }
        if let Some(user) = config.get("user") {
            database.user = user.clone();
        }
        if let Some(password) = config.get("password") {
            database.password = password.clone();
        }
        if let Some(name) = config.get("database") {
            if name.is_empty() || name.contains('/') {
                return Err(anyhow!("Invalid database name '{}'", name));
            }
            database.database = name.clone();
        }

        let lock_timeout_secs = config
            .get("lock_timeout_secs")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.lock_timeout_secs);

        let statement_timeout_secs = config
            .get("statement_timeout_secs")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.statement_timeout_secs);

        Ok(MigrateConfig {
            database,
            migrations: config.get("migrations").cloned(),
            lock_timeout_secs,
            statement_timeout_secs,
        })
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Statement timeout as Duration, `None` when unbounded
    pub fn statement_timeout(&self) -> Option<Duration> {
        match self.statement_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Address:            {}", self.database.address),
            format!("Database:           {}", self.database.database),
            format!("Connection URL:     {}", self.database.redacted_url()),
        ];
        if let Some(path) = self.database.sqlite_path() {
            lines.push(format!("SQLite Path:        {}", path));
        }
        lines.push(format!(
            "Migrations:         {}",
            self.migrations.as_deref().unwrap_or("(not set)")
        ));
        lines.push(format!("Lock Timeout:       {} seconds", self.lock_timeout_secs));
        lines.push(format!(
            "Statement Timeout:  {}",
            match self.statement_timeout_secs {
                0 => "unbounded".to_string(),
                s => format!("{} seconds", s),
            }
        ));
        lines.join("\n")
    }

    /// Get the config file path
    pub fn config_file_path() -> String {
        format!("{}/schemigrate.toml", default_data_dir())
    }
}

fn expand_home(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => format!("{}/{}", home.to_string_lossy(), rest),
            None => path.to_string(),
        },
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_escapes_credentials() {
        let conn = ConnectionConfig {
            address: "/var/db".to_string(),
            user: "ops@team".to_string(),
            password: "YWJj+ZA==".to_string(),
            ..Default::default()
        };
        assert_eq!(
            conn.url(),
            "sqlite://ops%40team:YWJj%2BZA%3D%3D@/var/db:5432/schemigrate"
        );
    }

    #[test]
    fn test_url_escapes_password() {
        let conn = ConnectionConfig {
            address: "/var/db".to_string(),
            password: "a/b".to_string(),
            ..Default::default()
        };
        assert_eq!(
            conn.url(),
            "sqlite://postgres:a%2Fb@/var/db:5432/schemigrate"
        );
        assert!(conn.redacted_url().contains(":***@"));
        assert!(!conn.redacted_url().contains("a%2Fb"));
    }

    #[test]
    fn test_sqlite_uri() {
        let conn = ConnectionConfig::in_dir("/tmp/what?#dir/", "app");
        assert_eq!(conn.sqlite_path().unwrap(), "/tmp/what?#dir/app.sqlite3");
        assert_eq!(
            conn.sqlite_uri(),
            "file:/tmp/what%3F%23dir/app.sqlite3?mode=rwc"
        );

        let spaced = ConnectionConfig::in_dir("/tmp/100% full", "app");
        assert_eq!(
            spaced.sqlite_uri(),
            "file:/tmp/100%25%20full/app.sqlite3?mode=rwc"
        );

        let mem = ConnectionConfig::in_memory();
        assert!(mem.is_memory());
        assert_eq!(mem.sqlite_path(), None);
    }

    #[test]
    fn test_from_map_defaults() {
        let config = MigrateConfig::from_map(&HashMap::new()).unwrap();
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.user, "postgres");
        assert_eq!(config.database.password, "gitops");
        assert_eq!(config.database.database, DEFAULT_DATABASE);
        assert_eq!(config.lock_timeout(), Duration::from_secs(30));
        assert_eq!(config.statement_timeout(), None);
        assert!(config.migrations.is_none());
    }

    #[test]
    fn test_from_map_overrides() {
        let mut map = HashMap::new();
        map.insert("address".to_string(), "/data".to_string());
        map.insert("port".to_string(), "6000".to_string());
        map.insert("password".to_string(), "s3cret/".to_string());
        map.insert("database".to_string(), "orders".to_string());
        map.insert("migrations".to_string(), "file://./migrations".to_string());
        map.insert("statement_timeout_secs".to_string(), "5".to_string());

        let config = MigrateConfig::from_map(&map).unwrap();
        assert_eq!(config.database.address, "/data");
        assert_eq!(config.database.port, 6000);
        assert_eq!(config.database.password, "s3cret/");
        assert_eq!(
            config.database.sqlite_path().as_deref(),
            Some("/data/orders.sqlite3")
        );
        assert_eq!(config.migrations.as_deref(), Some("file://./migrations"));
        assert_eq!(config.statement_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_from_map_rejects_bad_values() {
        let mut map = HashMap::new();
        map.insert("port".to_string(), "not-a-port".to_string());
        assert!(MigrateConfig::from_map(&map).is_err());

        let mut map = HashMap::new();
        map.insert("database".to_string(), "a/b".to_string());
        assert!(MigrateConfig::from_map(&map).is_err());
    }

    #[test]
    fn test_new_creates_template_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schemigrate.toml");
        let path_str = path.to_string_lossy().to_string();

        MigrateConfig::new(&Some(path_str.clone())).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("schemigrate configuration file"));
    }

    #[test]
    fn test_new_reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "database = \"inventory\"\nlock_timeout_secs = 7\nmigrations = \"./db\"\n",
        )
        .unwrap();

        let config = MigrateConfig::new(&Some(path.to_string_lossy().to_string())).unwrap();
        assert_eq!(config.database.database, "inventory");
        assert_eq!(config.lock_timeout_secs, 7);
        assert_eq!(config.migrations.as_deref(), Some("./db"));
    }
}

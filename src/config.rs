use ini::ini;
use std::{
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;

/// Default cap on the size of a single object-store shard.
pub const DEFAULT_MAX_OBJECT_SIZE: u64 = 100 * 1024 * 1024;

/// Default bound on a single SQL tick query.
pub const DEFAULT_SQL_QUERY_TIMEOUT: Duration = Duration::from_secs(300);

type IniMap = HashMap<String, HashMap<String, Option<String>>>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {0}: {1}")]
    Read(String, String),
    #[error("[{section}] missing required property {property}")]
    MissingProperty { section: String, property: String },
    #[error("[{section}] invalid value for {property}: {detail}")]
    InvalidValue {
        section: String,
        property: String,
        detail: String,
    },
    #[error("[{section}] unknown source type {value}")]
    UnknownSourceType { section: String, value: String },
    #[error("[{section}] unknown target type {value}")]
    UnknownTargetType { section: String, value: String },
    #[error("[{section}] access_key and secret_key must be provided together or not at all")]
    PartialCredentials { section: String },
    #[error("at least one target must be configured")]
    NoTargets,
}

/// A secret configuration value. Never rendered by Debug so that loggers
/// cannot leak it.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new<S: Into<String>>(value: S) -> Secret {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted>")
    }
}

/// Static credentials for an object store. Absence means anonymous access,
/// which is explicitly permitted for public buckets.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: Secret,
}

#[derive(Clone, Debug)]
pub struct ObjectStoreParams {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub credentials: Option<Credentials>,
    /// Date format used in object key prefixes for this family. Defaults to
    /// `%Y%m%d`; some file families use `%Y-%m-%d`.
    pub date_format: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SqlParams {
    pub url: String,
    pub user: String,
    pub password: Secret,
    pub template: String,
}

/// Type-specific parameters of a source, discriminated by the `type`
/// property in the INI section.
#[derive(Clone, Debug)]
pub enum SourceParams {
    ObjectStore(ObjectStoreParams),
    Sql(SqlParams),
}

impl SourceParams {
    pub fn type_name(&self) -> &'static str {
        match self {
            SourceParams::ObjectStore(_) => "object-store",
            SourceParams::Sql(_) => "sql",
        }
    }
}

/// One `[sourceN]` section: a named source with a category discriminator
/// that selects the concrete extractor.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    pub name: String,
    pub category: String,
    pub params: SourceParams,
}

/// One `[targetN]` section: a columnar store endpoint with credentials.
#[derive(Clone, Debug)]
pub struct TargetConfig {
    pub name: String,
    pub endpoint: Url,
    pub user: String,
    pub password: Secret,
}

#[derive(Clone, Debug)]
pub struct LoggingSettings {
    pub level: String,
    pub force_json: bool,
}

impl Default for LoggingSettings {
    fn default() -> LoggingSettings {
        LoggingSettings {
            level: "INFO".to_owned(),
            force_json: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ExtractSettings {
    /// Root of the per-day download directories,
    /// `{work_dir}/{YYYYMMDD}/{category}/`.
    pub work_dir: PathBuf,
    pub max_object_size: u64,
    pub sql_query_timeout: Duration,
}

impl Default for ExtractSettings {
    fn default() -> ExtractSettings {
        ExtractSettings {
            work_dir: std::env::temp_dir().join("mdetl"),
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
            sql_query_timeout: DEFAULT_SQL_QUERY_TIMEOUT,
        }
    }
}

/// The frozen configuration of one run: created before the workflow engine
/// starts, shared read-only across all components via the per-day context.
#[derive(Clone, Debug)]
pub struct Config {
    pub sources: Vec<SourceConfig>,
    pub targets: Vec<TargetConfig>,
    pub logging: LoggingSettings,
    pub extract: ExtractSettings,
}

fn get<'a>(map: &'a IniMap, section: &str, property: &str) -> Option<&'a str> {
    map.get(section)
        .and_then(|s| s.get(property))
        .and_then(|v| v.as_deref())
}

fn require<'a>(map: &'a IniMap, section: &str, property: &str) -> Result<&'a str, ConfigError> {
    get(map, section, property).ok_or_else(|| ConfigError::MissingProperty {
        section: section.to_owned(),
        property: property.to_owned(),
    })
}

fn parse_count(map: &IniMap, section: &str) -> Result<usize, ConfigError> {
    let raw = require(map, section, "count")?;
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        section: section.to_owned(),
        property: "count".to_owned(),
        detail: format!("{} is not a number", raw),
    })
}

fn parse_source(map: &IniMap, section: &str) -> Result<SourceConfig, ConfigError> {
    let name = require(map, section, "name")?.to_owned();
    let category = require(map, section, "category")?.to_owned();
    let source_type = require(map, section, "type")?;

    let params = match source_type {
        "object-store" => {
            let access_key = get(map, section, "access_key");
            let secret_key = get(map, section, "secret_key");
            let credentials = match (access_key, secret_key) {
                (Some(access), Some(secret)) => Some(Credentials {
                    access_key: access.to_owned(),
                    secret_key: Secret::new(secret),
                }),
                (None, None) => None,
                _ => {
                    return Err(ConfigError::PartialCredentials {
                        section: section.to_owned(),
                    })
                }
            };
            SourceParams::ObjectStore(ObjectStoreParams {
                endpoint: require(map, section, "endpoint")?.to_owned(),
                bucket: require(map, section, "bucket")?.to_owned(),
                region: require(map, section, "region")?.to_owned(),
                credentials,
                date_format: get(map, section, "date_format").map(str::to_owned),
            })
        }
        "sql" => SourceParams::Sql(SqlParams {
            url: require(map, section, "db.url")?.to_owned(),
            user: require(map, section, "db.user")?.to_owned(),
            password: Secret::new(require(map, section, "db.password")?),
            template: require(map, section, "sql.template")?.to_owned(),
        }),
        other => {
            return Err(ConfigError::UnknownSourceType {
                section: section.to_owned(),
                value: other.to_owned(),
            })
        }
    };

    Ok(SourceConfig {
        name,
        category,
        params,
    })
}

fn parse_target(map: &IniMap, section: &str) -> Result<TargetConfig, ConfigError> {
    let target_type = require(map, section, "type")?;
    if target_type != "columnar" {
        return Err(ConfigError::UnknownTargetType {
            section: section.to_owned(),
            value: target_type.to_owned(),
        });
    }
    let raw_endpoint = require(map, section, "endpoint")?;
    let endpoint = Url::parse(raw_endpoint).map_err(|e| ConfigError::InvalidValue {
        section: section.to_owned(),
        property: "endpoint".to_owned(),
        detail: e.to_string(),
    })?;
    Ok(TargetConfig {
        name: require(map, section, "name")?.to_owned(),
        endpoint,
        user: require(map, section, "user")?.to_owned(),
        password: Secret::new(require(map, section, "password")?),
    })
}

impl Config {
    /// Loads and validates an INI configuration file. Any missing or
    /// malformed property fails the whole load; a run never starts on a
    /// partially-valid configuration.
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let path_str = path.to_string_lossy().to_string();
        let map: IniMap =
            ini!(safe path_str.as_str()).map_err(|e| ConfigError::Read(path_str.clone(), e))?;

        let source_count = parse_count(&map, "sources")?;
        let mut sources = Vec::with_capacity(source_count);
        for i in 1..=source_count {
            sources.push(parse_source(&map, &format!("source{}", i))?);
        }

        let target_count = parse_count(&map, "targets")?;
        if target_count == 0 {
            return Err(ConfigError::NoTargets);
        }
        let mut targets = Vec::with_capacity(target_count);
        for i in 1..=target_count {
            targets.push(parse_target(&map, &format!("target{}", i))?);
        }

        let mut logging = LoggingSettings::default();
        if let Some(level) = get(&map, "logging", "level") {
            logging.level = level.to_owned();
        }
        if let Some(raw) = get(&map, "logging", "force_json") {
            logging.force_json = raw.parse().map_err(|_| ConfigError::InvalidValue {
                section: "logging".to_owned(),
                property: "force_json".to_owned(),
                detail: format!("{} is not a boolean", raw),
            })?;
        }

        let mut extract = ExtractSettings::default();
        if let Some(dir) = get(&map, "extract", "work_dir") {
            extract.work_dir = PathBuf::from(dir);
        }
        if let Some(raw) = get(&map, "extract", "max_object_size") {
            extract.max_object_size = raw.parse().map_err(|_| ConfigError::InvalidValue {
                section: "extract".to_owned(),
                property: "max_object_size".to_owned(),
                detail: format!("{} is not a number", raw),
            })?;
        }
        if let Some(raw) = get(&map, "extract", "sql_query_timeout_secs") {
            let secs: u64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                section: "extract".to_owned(),
                property: "sql_query_timeout_secs".to_owned(),
                detail: format!("{} is not a number", raw),
            })?;
            extract.sql_query_timeout = Duration::from_secs(secs);
        }

        Ok(Config {
            sources,
            targets,
            logging,
            extract,
        })
    }
}

#[cfg(test)]
impl Config {
    /// A minimal configuration for unit tests: no sources and one columnar
    /// target pointing nowhere.
    pub(crate) fn for_tests() -> Config {
        Config {
            sources: Vec::new(),
            targets: vec![TargetConfig {
                name: "test-target".to_owned(),
                endpoint: Url::parse("http://127.0.0.1:1").unwrap(),
                user: "etl".to_owned(),
                password: Secret::new("password"),
            }],
            logging: LoggingSettings::default(),
            extract: ExtractSettings {
                work_dir: std::env::temp_dir().join("mdetl-tests"),
                ..ExtractSettings::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const FULL_CONFIG: &str = r#"
[sources]
count = 2

[source1]
name = xbond-depth
type = object-store
category = AllPriceDepth
endpoint = http://127.0.0.1:9000
bucket = cfets-md
region = cn-north-1
access_key = AKIAEXAMPLE
secret_key = sekrit

[source2]
name = future-ticks
type = sql
category = BondFutureQuote
db.url = /var/lib/mdetl/ticks.db
db.user = reader
db.password = hunter2
sql.template = SELECT * FROM fut_ticks WHERE trade_date = {BUSINESS_DATE}

[targets]
count = 1

[target1]
name = research-store
type = columnar
endpoint = http://127.0.0.1:8848
user = etl
password = load-secret

[logging]
level = DEBUG
force_json = true

[extract]
work_dir = /var/tmp/mdetl
max_object_size = 1048576
sql_query_timeout_secs = 60
"#;

    #[test]
    fn full_config_parses() {
        let file = write_config(FULL_CONFIG);
        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].name, "xbond-depth");
        assert_eq!(config.sources[0].category, "AllPriceDepth");
        assert_matches!(
            &config.sources[0].params,
            SourceParams::ObjectStore(p) => {
                assert_eq!(p.bucket, "cfets-md");
                assert_eq!(p.region, "cn-north-1");
                let creds = p.credentials.as_ref().unwrap();
                assert_eq!(creds.access_key, "AKIAEXAMPLE");
                assert_eq!(creds.secret_key.expose(), "sekrit");
            }
        );
        assert_matches!(
            &config.sources[1].params,
            SourceParams::Sql(p) => {
                assert_eq!(p.user, "reader");
                assert!(p.template.contains("{BUSINESS_DATE}"));
            }
        );

        assert_eq!(config.targets.len(), 1);
        assert_eq!(config.targets[0].endpoint.as_str(), "http://127.0.0.1:8848/");

        assert_eq!(config.logging.level, "DEBUG");
        assert!(config.logging.force_json);
        assert_eq!(config.extract.max_object_size, 1_048_576);
        assert_eq!(config.extract.sql_query_timeout, Duration::from_secs(60));
    }

    #[test]
    fn anonymous_object_store_is_permitted() {
        let file = write_config(
            r#"
[sources]
count = 1
[source1]
name = public-depth
type = object-store
category = AllPriceDepth
endpoint = http://127.0.0.1:9000
bucket = public-md
region = cn-north-1
[targets]
count = 1
[target1]
name = store
type = columnar
endpoint = http://127.0.0.1:8848
user = etl
password = p
"#,
        );
        let config = Config::from_file(file.path()).unwrap();
        assert_matches!(
            &config.sources[0].params,
            SourceParams::ObjectStore(p) => assert!(p.credentials.is_none())
        );
    }

    #[test]
    fn partial_credentials_are_rejected() {
        let file = write_config(
            r#"
[sources]
count = 1
[source1]
name = broken
type = object-store
category = AllPriceDepth
endpoint = http://127.0.0.1:9000
bucket = md
region = cn-north-1
access_key = AKIAEXAMPLE
[targets]
count = 1
[target1]
name = store
type = columnar
endpoint = http://127.0.0.1:8848
user = etl
password = p
"#,
        );
        assert_matches!(
            Config::from_file(file.path()).unwrap_err(),
            ConfigError::PartialCredentials { .. }
        );
    }

    #[test]
    fn missing_category_is_rejected() {
        let file = write_config(
            r#"
[sources]
count = 1
[source1]
name = nameless
type = sql
db.url = /tmp/x.db
db.user = u
db.password = p
sql.template = SELECT 1
[targets]
count = 1
[target1]
name = store
type = columnar
endpoint = http://127.0.0.1:8848
user = etl
password = p
"#,
        );
        assert_matches!(
            Config::from_file(file.path()).unwrap_err(),
            ConfigError::MissingProperty { property, .. } => assert_eq!(property, "category")
        );
    }

    #[test]
    fn unknown_source_type_is_rejected() {
        let file = write_config(
            r#"
[sources]
count = 1
[source1]
name = odd
type = ftp
category = AllPriceDepth
[targets]
count = 1
[target1]
name = store
type = columnar
endpoint = http://127.0.0.1:8848
user = etl
password = p
"#,
        );
        assert_matches!(
            Config::from_file(file.path()).unwrap_err(),
            ConfigError::UnknownSourceType { value, .. } => assert_eq!(value, "ftp")
        );
    }

    #[test]
    fn zero_targets_are_rejected() {
        let file = write_config(
            r#"
[sources]
count = 0
[targets]
count = 0
"#,
        );
        assert_matches!(
            Config::from_file(file.path()).unwrap_err(),
            ConfigError::NoTargets
        );
    }

    #[test]
    fn defaults_are_applied() {
        let file = write_config(
            r#"
[sources]
count = 0
[targets]
count = 1
[target1]
name = store
type = columnar
endpoint = http://127.0.0.1:8848
user = etl
password = p
"#,
        );
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.logging.level, "INFO");
        assert!(!config.logging.force_json);
        assert_eq!(config.extract.max_object_size, DEFAULT_MAX_OBJECT_SIZE);
        assert_eq!(config.extract.sql_query_timeout, DEFAULT_SQL_QUERY_TIMEOUT);
    }

    #[test]
    fn secrets_do_not_debug_print() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{:?}", secret), "<redacted>");
        assert_eq!(secret.expose(), "hunter2");
    }
}

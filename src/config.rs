use anyhow::{Context, Result};
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::PathBuf;

use crate::manifest::LinePolicy;
use crate::sampling::{SamplingStrategy, SegmentDedup};

pub const CONFIG_NAME: &str = "filter_list_config";
pub const ENV_PREFIX: &str = "FILTER_LIST";

pub const DEFAULT_SEED: u64 = 1024;
pub const DEFAULT_SEGMENT_DELIMITER: char = '-';
pub const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Deserialize, Default)]
pub struct FilterConfig {
    pub vector_file: Option<String>,
    pub strict: Option<bool>,
    pub create_dirs: Option<bool>,
    pub parallel: Option<bool>,
    pub sampling: Option<String>,
    pub sample_size: Option<usize>,
    pub seed: Option<u64>,
    pub dedup_segments: Option<bool>,
    pub segment_delimiter: Option<char>,
    pub log_level: Option<String>,
}

impl FilterConfig {
    pub fn try_from(config: &Config) -> Result<Self, ConfigError> {
        Ok(FilterConfig {
            vector_file: optional(config, "vector_file")?,
            strict: optional(config, "strict")?,
            create_dirs: optional(config, "create_dirs")?,
            parallel: optional(config, "parallel")?,
            sampling: optional(config, "sampling")?,
            sample_size: optional(config, "sample_size")?,
            seed: optional(config, "seed")?,
            dedup_segments: optional(config, "dedup_segments")?,
            segment_delimiter: optional::<String>(config, "segment_delimiter")?
                .map(|s| single_char(&s))
                .transpose()?,
            log_level: optional(config, "log_level")?,
        })
    }
}

/// A missing key is `None`; a present key that does not convert is an error.
fn optional<'de, T: Deserialize<'de>>(
    config: &Config,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match config.get(key) {
        Ok(value) => Ok(Some(value)),
        Err(ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn single_char(s: &str) -> Result<char, ConfigError> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(ConfigError::Message(format!(
            "segment_delimiter must be a single character, got {:?}",
            s
        ))),
    }
}

/// Resolved settings for one invocation. Passed explicitly into the filter.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub vector_file: Option<PathBuf>,
    pub line_policy: LinePolicy,
    pub create_dirs: bool,
    pub parallel: bool,
    pub sampling: SamplingStrategy,
    pub log_level: String,
}

impl Default for State {
    fn default() -> Self {
        Self {
            vector_file: None,
            line_policy: LinePolicy::Permissive,
            create_dirs: false,
            parallel: true,
            sampling: SamplingStrategy::All,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl State {
    /// Loads `filter_list_config.*` (if present) and `FILTER_LIST_*` variables.
    pub fn new() -> Result<Self> {
        let config = Config::builder()
            .add_source(ConfigFile::with_name(CONFIG_NAME).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()
            .context("Failed to load filter_list configuration")?;

        Self::from_config(&config)
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let filter_config = FilterConfig::try_from(config)?;
        Self::resolve(filter_config)
    }

    pub fn resolve(filter_config: FilterConfig) -> Result<Self> {
        let line_policy = if filter_config.strict.unwrap_or(false) {
            LinePolicy::Strict
        } else {
            LinePolicy::Permissive
        };

        let sampling = match filter_config.sampling.as_deref().unwrap_or("all") {
            "all" => SamplingStrategy::All,
            "random" => {
                let sample_size = filter_config
                    .sample_size
                    .context("sampling=random requires sample_size")?;
                let dedup = filter_config
                    .dedup_segments
                    .unwrap_or(false)
                    .then(|| SegmentDedup {
                        delimiter: filter_config
                            .segment_delimiter
                            .unwrap_or(DEFAULT_SEGMENT_DELIMITER),
                    });
                SamplingStrategy::Random {
                    sample_size,
                    seed: filter_config.seed.unwrap_or(DEFAULT_SEED),
                    dedup,
                }
            }
            other => anyhow::bail!("Unknown sampling strategy: {}", other),
        };

        Ok(Self {
            vector_file: filter_config.vector_file.map(PathBuf::from),
            line_policy,
            create_dirs: filter_config.create_dirs.unwrap_or(false),
            parallel: filter_config.parallel.unwrap_or(true),
            sampling,
            log_level: filter_config
                .log_level
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        })
    }

    pub fn print_config(&self) {
        match &self.vector_file {
            Some(path) => println!("vector_file={}", path.display()),
            None => println!("vector_file="),
        }
        println!("strict={}", self.line_policy == LinePolicy::Strict);
        println!("create_dirs={}", self.create_dirs);
        println!("parallel={}", self.parallel);
        match &self.sampling {
            SamplingStrategy::All => println!("sampling=all"),
            SamplingStrategy::Random {
                sample_size,
                seed,
                dedup,
            } => {
                println!("sampling=random");
                println!("sample_size={}", sample_size);
                println!("seed={}", seed);
                println!("dedup_segments={}", dedup.is_some());
                if let Some(dedup) = dedup {
                    println!("segment_delimiter={}", dedup.delimiter);
                }
            }
        }
        println!("log_level={}", self.log_level);
    }
}

//! Reader configuration.
//!
//! Settings can be built programmatically, read from `FOLIO_*` environment
//! variables, or loaded from a flat `key = value` TOML file.

use crate::error::ConfigError;
use folio_cache::DEFAULT_MAX_CACHED_PAGES;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PREFETCH_PAGES: u32 = 5;
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_DEFAULT_WORKERS: usize = 4;

/// Tunables for one [`ReaderEngine`](crate::ReaderEngine).
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderConfig {
    /// Maximum number of decoded pages kept resident
    pub max_cached_pages: usize,
    /// Pages decoded ahead of and behind the current page
    pub prefetch_pages: u32,
    /// Quiet period before an observed viewport position is committed
    pub debounce: Duration,
    /// Time allowed from open until the page count is known
    pub load_timeout: Duration,
    /// Decode worker threads per open document
    pub decode_workers: usize,
    /// Pixels per PDF point when rasterizing PDF pages
    pub pdf_render_scale: f32,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            max_cached_pages: DEFAULT_MAX_CACHED_PAGES,
            prefetch_pages: DEFAULT_PREFETCH_PAGES,
            debounce: DEFAULT_DEBOUNCE,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            decode_workers: default_decode_workers(),
            pdf_render_scale: 1.0,
        }
    }
}

impl ReaderConfig {
    pub fn with_max_cached_pages(mut self, pages: usize) -> Self {
        self.max_cached_pages = pages;
        self
    }

    pub fn with_prefetch_pages(mut self, pages: u32) -> Self {
        self.prefetch_pages = pages;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    pub fn with_decode_workers(mut self, workers: usize) -> Self {
        self.decode_workers = workers;
        self
    }

    pub fn with_pdf_render_scale(mut self, scale: f32) -> Self {
        self.pdf_render_scale = scale;
        self
    }

    /// Number of pages one prefetch window spans.
    pub fn window_size(&self) -> usize {
        self.prefetch_pages as usize * 2 + 1
    }

    /// Prefetch radius the engine actually uses: the configured one, shrunk
    /// until a whole window fits in the cache.
    pub fn effective_prefetch_pages(&self) -> u32 {
        let fits = self.max_cached_pages.saturating_sub(1) / 2;
        self.prefetch_pages.min(u32::try_from(fits).unwrap_or(u32::MAX))
    }

    /// Reject settings the engine cannot honour.
    ///
    /// The prefetch window must fit in the cache, otherwise prefetching a
    /// window would evict the page being displayed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_cached_pages == 0 {
            return Err(ConfigError::InvalidValue("max_cached_pages".to_string()));
        }
        if self.window_size() > self.max_cached_pages {
            return Err(ConfigError::InvalidValue("prefetch_pages".to_string()));
        }
        if self.load_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("load_timeout_secs".to_string()));
        }
        if self.decode_workers == 0 {
            return Err(ConfigError::InvalidValue("decode_workers".to_string()));
        }
        if !(self.pdf_render_scale.is_finite() && self.pdf_render_scale > 0.0) {
            return Err(ConfigError::InvalidValue("pdf_render_scale".to_string()));
        }
        Ok(())
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `FOLIO_MAX_CACHED_PAGES` (default: 50)
    /// - `FOLIO_PREFETCH_PAGES` (default: 5)
    /// - `FOLIO_DEBOUNCE_MS` (default: 50)
    /// - `FOLIO_LOAD_TIMEOUT_SECS` (default: 10)
    /// - `FOLIO_DECODE_WORKERS` (default: available parallelism, at most 4)
    /// - `FOLIO_PDF_SCALE` (default: 1.0)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(pages) = env_value("FOLIO_MAX_CACHED_PAGES")? {
            config.max_cached_pages = pages;
        }
        if let Some(pages) = env_value("FOLIO_PREFETCH_PAGES")? {
            config.prefetch_pages = pages;
        }
        if let Some(ms) = env_value("FOLIO_DEBOUNCE_MS")? {
            config.debounce = Duration::from_millis(ms);
        }
        if let Some(secs) = env_value("FOLIO_LOAD_TIMEOUT_SECS")? {
            config.load_timeout = Duration::from_secs(secs);
        }
        if let Some(workers) = env_value("FOLIO_DECODE_WORKERS")? {
            config.decode_workers = workers;
        }
        if let Some(scale) = env_value("FOLIO_PDF_SCALE")? {
            config.pdf_render_scale = scale;
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format:
    /// ```toml
    /// max_cached_pages = 50
    /// prefetch_pages = 5
    /// debounce_ms = 50
    /// load_timeout_secs = 10
    /// decode_workers = 4
    /// pdf_render_scale = 1.0
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for line in toml_str.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"');

            match key {
                "max_cached_pages" => config.max_cached_pages = parse(key, value)?,
                "prefetch_pages" => config.prefetch_pages = parse(key, value)?,
                "debounce_ms" => config.debounce = Duration::from_millis(parse(key, value)?),
                "load_timeout_secs" => {
                    config.load_timeout = Duration::from_secs(parse(key, value)?)
                }
                "decode_workers" => config.decode_workers = parse(key, value)?,
                "pdf_render_scale" => config.pdf_render_scale = parse(key, value)?,
                _ => {} // Ignore unknown keys
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml())?;
        Ok(())
    }

    fn to_toml(&self) -> String {
        format!(
            "# Folio reader configuration\n\
             max_cached_pages = {}\n\
             prefetch_pages = {}\n\
             debounce_ms = {}\n\
             load_timeout_secs = {}\n\
             decode_workers = {}\n\
             pdf_render_scale = {:?}\n",
            self.max_cached_pages,
            self.prefetch_pages,
            self.debounce.as_millis(),
            self.load_timeout.as_secs(),
            self.decode_workers,
            self.pdf_render_scale,
        )
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn env_value<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => parse(name, value.trim()).map(Some),
        Err(_) => Ok(None),
    }
}

fn default_decode_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(MAX_DEFAULT_WORKERS)
        .min(MAX_DEFAULT_WORKERS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    const ENV_VARS: &[&str] = &[
        "FOLIO_MAX_CACHED_PAGES",
        "FOLIO_PREFETCH_PAGES",
        "FOLIO_DEBOUNCE_MS",
        "FOLIO_LOAD_TIMEOUT_SECS",
        "FOLIO_DECODE_WORKERS",
        "FOLIO_PDF_SCALE",
    ];

    // Restores the listed variables when dropped.
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| {
                    let saved = (name.to_string(), env::var(name).ok());
                    env::remove_var(name);
                    saved
                })
                .collect();
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = ReaderConfig::default();
        assert_eq!(config.max_cached_pages, 50);
        assert_eq!(config.prefetch_pages, 5);
        assert_eq!(config.debounce, Duration::from_millis(50));
        assert_eq!(config.load_timeout, Duration::from_secs(10));
        assert!((1..=MAX_DEFAULT_WORKERS).contains(&config.decode_workers));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_prefetch_radius_shrinks_to_fit_cache() {
        let config = ReaderConfig::default().with_max_cached_pages(3).with_prefetch_pages(5);
        assert_eq!(config.effective_prefetch_pages(), 1);

        let config = config.with_max_cached_pages(1);
        assert_eq!(config.effective_prefetch_pages(), 0);

        let config = config.with_max_cached_pages(50);
        assert_eq!(config.effective_prefetch_pages(), 5);
    }

    #[test]
    fn test_builder_methods() {
        let config = ReaderConfig::default()
            .with_max_cached_pages(20)
            .with_prefetch_pages(2)
            .with_debounce(Duration::from_millis(10))
            .with_load_timeout(Duration::from_secs(3))
            .with_decode_workers(1)
            .with_pdf_render_scale(2.0);

        assert_eq!(config.max_cached_pages, 20);
        assert_eq!(config.prefetch_pages, 2);
        assert_eq!(config.window_size(), 5);
        assert_eq!(config.debounce, Duration::from_millis(10));
        assert_eq!(config.load_timeout, Duration::from_secs(3));
        assert_eq!(config.decode_workers, 1);
        assert_eq!(config.pdf_render_scale, 2.0);
    }

    #[test]
    fn test_window_must_fit_in_cache() {
        let config = ReaderConfig::default().with_max_cached_pages(10).with_prefetch_pages(5);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(key)) if key == "prefetch_pages"
        ));

        assert!(ReaderConfig::default().with_max_cached_pages(11).with_prefetch_pages(5).validate().is_ok());
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(ReaderConfig::default().with_max_cached_pages(0).validate().is_err());
        assert!(ReaderConfig::default().with_decode_workers(0).validate().is_err());
        assert!(ReaderConfig::default().with_load_timeout(Duration::ZERO).validate().is_err());
        assert!(ReaderConfig::default().with_pdf_render_scale(0.0).validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(ENV_VARS);

        env::set_var("FOLIO_MAX_CACHED_PAGES", "30");
        env::set_var("FOLIO_PREFETCH_PAGES", "3");
        env::set_var("FOLIO_DEBOUNCE_MS", "80");
        env::set_var("FOLIO_LOAD_TIMEOUT_SECS", "4");
        env::set_var("FOLIO_DECODE_WORKERS", "2");
        env::set_var("FOLIO_PDF_SCALE", "1.5");

        let config = ReaderConfig::from_env().unwrap();
        assert_eq!(config.max_cached_pages, 30);
        assert_eq!(config.prefetch_pages, 3);
        assert_eq!(config.debounce, Duration::from_millis(80));
        assert_eq!(config.load_timeout, Duration::from_secs(4));
        assert_eq!(config.decode_workers, 2);
        assert_eq!(config.pdf_render_scale, 1.5);
    }

    #[test]
    #[serial]
    fn test_from_env_partial() {
        let _guard = EnvGuard::new(ENV_VARS);

        env::set_var("FOLIO_PREFETCH_PAGES", "2");

        let config = ReaderConfig::from_env().unwrap();
        assert_eq!(config.prefetch_pages, 2);
        assert_eq!(config.max_cached_pages, 50); // default
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(ENV_VARS);

        env::set_var("FOLIO_MAX_CACHED_PAGES", "lots");
        assert!(matches!(
            ReaderConfig::from_env(),
            Err(ConfigError::InvalidValue(key)) if key == "FOLIO_MAX_CACHED_PAGES"
        ));

        env::set_var("FOLIO_MAX_CACHED_PAGES", "0");
        assert!(ReaderConfig::from_env().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = ReaderConfig::default()
            .with_max_cached_pages(24)
            .with_prefetch_pages(3)
            .with_debounce(Duration::from_millis(75))
            .with_decode_workers(2)
            .with_pdf_render_scale(1.25);

        let parsed = ReaderConfig::from_toml(&config.to_toml()).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_from_toml_ignores_comments_and_unknown_keys() {
        let toml = r#"
            # reader settings
            max_cached_pages = 12
            theme = "dark"
            load_timeout_secs = "2"
        "#;

        let config = ReaderConfig::from_toml(toml).unwrap();
        assert_eq!(config.max_cached_pages, 12);
        assert_eq!(config.load_timeout, Duration::from_secs(2));
        assert_eq!(config.prefetch_pages, DEFAULT_PREFETCH_PAGES);
    }

    #[test]
    fn test_from_toml_invalid_number() {
        assert!(matches!(
            ReaderConfig::from_toml("debounce_ms = soon"),
            Err(ConfigError::InvalidValue(key)) if key == "debounce_ms"
        ));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("folio.toml");

        let config = ReaderConfig::default().with_max_cached_pages(40);
        config.save_to_file(&path).unwrap();

        assert_eq!(ReaderConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            ReaderConfig::from_file(dir.path().join("absent.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}

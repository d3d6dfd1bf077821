use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub results: ResultsConfig,
    pub shape: ShapeConfig,
    pub import: ImportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultsConfig {
    /// Directory holding persisted panel result files
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShapeConfig {
    /// Rows sampled during shape inference
    pub sample_size: usize,
    /// Byte cap when inferring a shape from a file too large to parse whole
    pub max_bytes_to_read: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportConfig {
    /// Capacity of the row channel between reader and batcher stages
    pub row_channel_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env first so its values are visible to the reads below
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("results.data_dir", "./results")?
            .set_default("shape.sample_size", 50)?
            .set_default("shape.max_bytes_to_read", 100_000)?
            .set_default("import.row_channel_capacity", 1000)?;

        // Load from environment variables
        if let Ok(data_dir) = env::var("PANELFED_DATA_DIR") {
            builder = builder.set_override("results.data_dir", data_dir)?;
        }

        if let Ok(sample_size) = env::var("PANELFED_SHAPE_SAMPLE_SIZE") {
            builder = builder.set_override(
                "shape.sample_size",
                sample_size.parse::<i64>().unwrap_or(50),
            )?;
        }

        if let Ok(max_bytes) = env::var("PANELFED_SHAPE_MAX_BYTES") {
            builder = builder.set_override(
                "shape.max_bytes_to_read",
                max_bytes.parse::<i64>().unwrap_or(100_000),
            )?;
        }

        if let Ok(capacity) = env::var("PANELFED_ROW_CHANNEL_CAPACITY") {
            builder = builder.set_override(
                "import.row_channel_capacity",
                capacity.parse::<i64>().unwrap_or(1000),
            )?;
        }

        builder.build()?.try_deserialize()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            results: ResultsConfig {
                data_dir: "./results".to_string(),
            },
            shape: ShapeConfig {
                sample_size: 50,
                max_bytes_to_read: 100_000,
            },
            import: ImportConfig {
                row_channel_capacity: 1000,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Defaults and overrides share one test because env vars are
    // process-global
    #[test]
    fn test_config_defaults_and_overrides() {
        env::remove_var("PANELFED_DATA_DIR");
        env::remove_var("PANELFED_SHAPE_SAMPLE_SIZE");
        env::remove_var("PANELFED_ROW_CHANNEL_CAPACITY");

        let config = Config::from_env().unwrap();
        assert_eq!(config.results.data_dir, "./results");
        assert_eq!(config.shape.sample_size, 50);
        assert_eq!(config.shape.max_bytes_to_read, 100_000);
        assert_eq!(config.import.row_channel_capacity, 1000);

        env::set_var("PANELFED_DATA_DIR", "/tmp/panel-results");
        env::set_var("PANELFED_ROW_CHANNEL_CAPACITY", "64");
        let config = Config::from_env().unwrap();
        assert_eq!(config.results.data_dir, "/tmp/panel-results");
        assert_eq!(config.import.row_channel_capacity, 64);

        env::remove_var("PANELFED_DATA_DIR");
        env::remove_var("PANELFED_ROW_CHANNEL_CAPACITY");
    }
}

//! Configuration validation rules.

use super::schema::Config;

/// Validate configuration and return aggregated validation errors.
pub fn validate_config(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    if config.spark.host_url.trim().is_empty() {
        errors.push("spark.host_url must not be empty".to_string());
    }
    if config.spark.domain.trim().is_empty() {
        errors.push("spark.domain must not be empty".to_string());
    }
    if !(0.0..=1.0).contains(&config.spark.temperature) {
        errors.push("spark.temperature must be in [0.0, 1.0]".to_string());
    }
    if config.spark.max_tokens == 0 {
        errors.push("spark.max_tokens must be > 0".to_string());
    }
    if config.spark.connect_timeout_secs == 0 {
        errors.push("spark.connect_timeout_secs must be > 0".to_string());
    }

    if config.history.max_chars == 0 {
        errors.push("history.max_chars must be > 0".to_string());
    }
    if config.history.evict_batch == 0 {
        errors.push("history.evict_batch must be > 0".to_string());
    }

    if config.gateway.sse_timeout_secs == 0 {
        errors.push("gateway.sse_timeout_secs must be > 0".to_string());
    }
    for origin in &config.gateway.allowed_origins {
        if origin.trim().is_empty() {
            errors.push("gateway.allowed_origins must not contain empty entries".to_string());
            break;
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Validation(errors.join("; ")))
    }
}

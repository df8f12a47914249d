use std::str::FromStr;

/// Knobs for a single generation run. Built once, read-only afterwards.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub model: String,
    pub max_output_tokens: u32,
    /// Sampling temperature, clamped to [0, 1].
    pub temperature: f32,
    /// Hard cap on image dimensions (width, height). Larger images are
    /// downscaled, smaller ones are left alone.
    pub max_image_size: (u32, u32),
    /// JPEG quality for the re-encoded image payload.
    pub image_quality: u8,
    /// Pause between batch items, in seconds. A throttle, not an optimization.
    pub batch_delay_secs: f64,
    /// How many extraction strategies may be tried per response.
    pub max_extraction_attempts: usize,
    /// Target word count for the generated description.
    pub description_words: u32,
    pub include_seo_keywords: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_output_tokens: 800,
            temperature: 0.7,
            max_image_size: (512, 512),
            image_quality: 85,
            batch_delay_secs: 1.0,
            max_extraction_attempts: 3,
            description_words: 150,
            include_seo_keywords: true,
        }
    }
}

impl GenerationOptions {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            model: std::env::var("LISTING_MODEL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.model),
            max_output_tokens: env_or("MAX_OUTPUT_TOKENS", defaults.max_output_tokens),
            temperature: env_or("TEMPERATURE", defaults.temperature).clamp(0.0, 1.0),
            max_image_size: (
                env_or("MAX_IMAGE_WIDTH", defaults.max_image_size.0).max(1),
                env_or("MAX_IMAGE_HEIGHT", defaults.max_image_size.1).max(1),
            ),
            image_quality: env_or("IMAGE_QUALITY", defaults.image_quality).clamp(1, 100),
            batch_delay_secs: env_or("BATCH_DELAY_SECS", defaults.batch_delay_secs).max(0.0),
            max_extraction_attempts: env_or(
                "MAX_EXTRACTION_ATTEMPTS",
                defaults.max_extraction_attempts,
            )
            .max(1),
            description_words: env_or("DESCRIPTION_WORDS", defaults.description_words).max(1),
            include_seo_keywords: env_bool("INCLUDE_SEO_KEYWORDS", defaults.include_seo_keywords),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

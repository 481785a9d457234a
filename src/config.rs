use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;

use crate::errors::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    DuckDuckGo,
    Wikipedia,
    SerpApi,
    GoogleCse,
    Tavily,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "duckduckgo" | "ddg" => Ok(BackendKind::DuckDuckGo),
            "wikipedia" | "wiki" => Ok(BackendKind::Wikipedia),
            "serpapi" => Ok(BackendKind::SerpApi),
            "google_cse" | "google" | "cse" => Ok(BackendKind::GoogleCse),
            "tavily" => Ok(BackendKind::Tavily),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingsKind {
    /// Local feature hashing, no network.
    Hashing,
    /// OpenAI-compatible `/embeddings` endpoint.
    Http,
    /// Keyword-only retrieval.
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorKind {
    Extractive,
    OpenAi,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub search_backends: Vec<BackendKind>,
    pub search_max_concurrent: usize,
    pub search_min_delay: Duration,
    pub serpapi_api_key: Option<String>,
    pub serpapi_gl: String,
    pub google_cse_key: Option<String>,
    pub google_cse_cx: Option<String>,
    pub tavily_api_key: Option<String>,

    pub scraper_max_attempts: u32,
    pub scraper_timeout: Duration,
    pub scraper_rate_limit: Duration,
    pub scraper_max_concurrent: usize,

    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_content_chars: usize,
    pub num_results: usize,

    pub embeddings: EmbeddingsKind,
    pub embedding_dim: usize,
    pub embedding_api_base: String,
    pub embedding_model: String,
    pub embedding_api_key: Option<String>,

    pub generator: GeneratorKind,
    pub llm_api_base: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,

    pub pipeline_timeout: Option<Duration>,
    pub index_file: Option<PathBuf>,
    pub mongo_uri: Option<String>,
    pub mongo_db_name: String,
    pub bind_addr: SocketAddr,
}

impl Config {
    /// Reads the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Config, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup. Empty values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let reader = Reader { get: &get };

        let search_backends = reader
            .string("SEARCH_BACKENDS", "duckduckgo,wikipedia")
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(BackendKind::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        if search_backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        let embeddings = match reader.string("EMBEDDINGS", "hashing").to_lowercase().as_str() {
            "hashing" => EmbeddingsKind::Hashing,
            "http" | "openai" => EmbeddingsKind::Http,
            "none" | "off" => EmbeddingsKind::Disabled,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "EMBEDDINGS".into(),
                    value: other.into(),
                });
            }
        };

        let generator = match reader.string("GENERATOR", "extractive").to_lowercase().as_str() {
            "extractive" => GeneratorKind::Extractive,
            "openai" | "http" => GeneratorKind::OpenAi,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "GENERATOR".into(),
                    value: other.into(),
                });
            }
        };

        let config = Config {
            search_backends,
            search_max_concurrent: reader.parse("SEARCH_MAX_CONCURRENT", 3)?,
            search_min_delay: Duration::from_millis(reader.parse("SEARCH_MIN_DELAY_MS", 1000)?),
            serpapi_api_key: get("SERPAPI_API_KEY"),
            serpapi_gl: reader.string("SERPAPI_GL", "in"),
            google_cse_key: get("GOOGLE_CSE_KEY"),
            google_cse_cx: get("GOOGLE_CSE_CX"),
            tavily_api_key: get("TAVILY_API_KEY"),

            scraper_max_attempts: reader.parse("SCRAPER_MAX_ATTEMPTS", 3)?,
            scraper_timeout: Duration::from_secs(reader.parse("SCRAPER_TIMEOUT_SECS", 30)?),
            scraper_rate_limit: Duration::from_millis(reader.parse("SCRAPER_RATE_LIMIT_MS", 1000)?),
            scraper_max_concurrent: reader.parse("SCRAPER_MAX_CONCURRENT", 5)?,

            chunk_size: reader.parse("RAG_CHUNK_SIZE", 500)?,
            chunk_overlap: reader.parse("RAG_CHUNK_OVERLAP", 50)?,
            min_content_chars: reader.parse("RAG_MIN_CONTENT_CHARS", 100)?,
            num_results: reader.parse("RAG_NUM_RESULTS", 8)?,

            embeddings,
            embedding_dim: reader.parse("EMBEDDING_DIM", 384)?,
            embedding_api_base: reader.string("EMBEDDING_API_BASE", "https://api.openai.com/v1"),
            embedding_model: reader.string("EMBEDDING_MODEL", "text-embedding-3-small"),
            embedding_api_key: get("EMBEDDING_API_KEY"),

            generator,
            llm_api_base: reader.string("LLM_API_BASE", "https://api.groq.com/openai/v1"),
            llm_model: reader.string("LLM_MODEL", "llama-3.1-8b-instant"),
            llm_api_key: get("LLM_API_KEY"),

            pipeline_timeout: reader
                .optional::<u64>("PIPELINE_TIMEOUT_SECS")?
                .map(Duration::from_secs),
            index_file: get("INDEX_FILE").map(PathBuf::from),
            mongo_uri: get("MONGO_URI"),
            mongo_db_name: reader.string("MONGO_DB_NAME", "glean"),
            bind_addr: reader.parse("BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000)))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks. Credentials are checked here so a misconfigured
    /// backend is reported before anything starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Zero("RAG_CHUNK_SIZE"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::InvalidChunkWindow {
                size: self.chunk_size,
                overlap: self.chunk_overlap,
            });
        }
        if self.search_max_concurrent == 0 {
            return Err(ConfigError::Zero("SEARCH_MAX_CONCURRENT"));
        }
        if self.scraper_max_concurrent == 0 {
            return Err(ConfigError::Zero("SCRAPER_MAX_CONCURRENT"));
        }
        if self.scraper_max_attempts == 0 {
            return Err(ConfigError::Zero("SCRAPER_MAX_ATTEMPTS"));
        }
        if self.num_results == 0 {
            return Err(ConfigError::Zero("RAG_NUM_RESULTS"));
        }
        if self.embeddings == EmbeddingsKind::Hashing && self.embedding_dim == 0 {
            return Err(ConfigError::Zero("EMBEDDING_DIM"));
        }
        for kind in &self.search_backends {
            match kind {
                BackendKind::SerpApi if self.serpapi_api_key.is_none() => {
                    return Err(ConfigError::MissingCredential("SERPAPI_API_KEY"));
                }
                BackendKind::GoogleCse if self.google_cse_key.is_none() => {
                    return Err(ConfigError::MissingCredential("GOOGLE_CSE_KEY"));
                }
                BackendKind::GoogleCse if self.google_cse_cx.is_none() => {
                    return Err(ConfigError::MissingCredential("GOOGLE_CSE_CX"));
                }
                BackendKind::Tavily if self.tavily_api_key.is_none() => {
                    return Err(ConfigError::MissingCredential("TAVILY_API_KEY"));
                }
                _ => {}
            }
        }
        if self.generator == GeneratorKind::OpenAi && self.llm_api_key.is_none() {
            return Err(ConfigError::MissingCredential("LLM_API_KEY"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            search_backends: vec![BackendKind::DuckDuckGo, BackendKind::Wikipedia],
            search_max_concurrent: 3,
            search_min_delay: Duration::from_secs(1),
            serpapi_api_key: None,
            serpapi_gl: "in".to_string(),
            google_cse_key: None,
            google_cse_cx: None,
            tavily_api_key: None,
            scraper_max_attempts: 3,
            scraper_timeout: Duration::from_secs(30),
            scraper_rate_limit: Duration::from_secs(1),
            scraper_max_concurrent: 5,
            chunk_size: 500,
            chunk_overlap: 50,
            min_content_chars: 100,
            num_results: 8,
            embeddings: EmbeddingsKind::Hashing,
            embedding_dim: 384,
            embedding_api_base: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_api_key: None,
            generator: GeneratorKind::Extractive,
            llm_api_base: "https://api.groq.com/openai/v1".to_string(),
            llm_model: "llama-3.1-8b-instant".to_string(),
            llm_api_key: None,
            pipeline_timeout: None,
            index_file: None,
            mongo_uri: None,
            mongo_db_name: "glean".to_string(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}

struct Reader<'a> {
    get: &'a dyn Fn(&str) -> Option<String>,
}

impl Reader<'_> {
    fn string(&self, key: &str, default: &str) -> String {
        (self.get)(key).unwrap_or_else(|| default.to_string())
    }

    fn optional<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match (self.get)(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: raw,
                }),
        }
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.optional(key)?.unwrap_or(default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(
            config.search_backends,
            vec![BackendKind::DuckDuckGo, BackendKind::Wikipedia]
        );
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.chunk_overlap, 50);
        assert_eq!(config.min_content_chars, 100);
        assert_eq!(config.num_results, 8);
        assert_eq!(config.embeddings, EmbeddingsKind::Hashing);
        assert_eq!(config.generator, GeneratorKind::Extractive);
        assert_eq!(config.search_min_delay, Duration::from_secs(1));
        assert_eq!(config.scraper_timeout, Duration::from_secs(30));
        assert_eq!(config.pipeline_timeout, None);
        assert_eq!(config.mongo_db_name, "glean");
        assert_eq!(config.bind_addr.port(), 3000);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("SEARCH_BACKENDS", "wikipedia, tavily"),
            ("TAVILY_API_KEY", "tvly-123"),
            ("RAG_CHUNK_SIZE", "200"),
            ("RAG_CHUNK_OVERLAP", "20"),
            ("EMBEDDINGS", "none"),
            ("PIPELINE_TIMEOUT_SECS", "90"),
            ("BIND_ADDR", "0.0.0.0:8080"),
        ])
        .unwrap();
        assert_eq!(
            config.search_backends,
            vec![BackendKind::Wikipedia, BackendKind::Tavily]
        );
        assert_eq!(config.chunk_size, 200);
        assert_eq!(config.embeddings, EmbeddingsKind::Disabled);
        assert_eq!(config.pipeline_timeout, Some(Duration::from_secs(90)));
        assert_eq!(config.bind_addr.port(), 8080);
    }

    #[test]
    fn test_invalid_chunk_window() {
        let err = config_from(&[("RAG_CHUNK_SIZE", "50"), ("RAG_CHUNK_OVERLAP", "50")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidChunkWindow { size: 50, overlap: 50 }
        ));
    }

    #[test]
    fn test_missing_credentials() {
        let err = config_from(&[("SEARCH_BACKENDS", "serpapi")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential("SERPAPI_API_KEY")));

        let err = config_from(&[("GENERATOR", "openai")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential("LLM_API_KEY")));
    }

    #[test]
    fn test_bad_values() {
        assert!(matches!(
            config_from(&[("SEARCH_BACKENDS", "altavista")]).unwrap_err(),
            ConfigError::UnknownBackend(_)
        ));
        assert!(matches!(
            config_from(&[("RAG_NUM_RESULTS", "lots")]).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
        assert!(matches!(
            config_from(&[("EMBEDDINGS", "magic")]).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }
}

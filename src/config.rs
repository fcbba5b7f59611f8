//! Configuration for coursecraft

use std::path::PathBuf;

/// Configuration for the content-generation engine
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for all storage
    pub data_dir: PathBuf,

    /// Embedding model name (for reference, actual model set in embedding.rs)
    pub embedding_model: String,

    /// Embedding dimensions (384 for all-MiniLM-L6-v2)
    pub embedding_dimensions: usize,

    /// Number of facts retrieved when drafting a section
    pub retrieval_k: usize,

    /// Hard cap on web search results per research call
    pub max_search_results: usize,

    /// Domains used when no allowlist entries are configured
    pub default_domains: Vec<String>,

    /// Chat-completions endpoint (OpenAI-compatible)
    pub llm_base_url: String,

    /// Model name for all LLM stages
    pub llm_model: String,

    /// Environment variable holding the LLM API key
    pub llm_api_key_env: String,

    /// Environment variable holding the search provider API key
    pub search_api_key_env: String,

    /// Temperature for factual stages (extraction, quiz generation)
    pub factual_temperature: f32,

    /// Temperature for drafting neutral prose
    pub draft_temperature: f32,

    /// Temperature for the style-transfer stage
    pub style_temperature: f32,

    /// Upper word bound for drafted and personalized content
    pub max_content_words: usize,

    /// Number of quiz questions generated per draft
    pub quiz_questions: usize,

    /// HTTP server port
    pub server_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("coursecraft");

        Self {
            data_dir,
            embedding_model: "all-MiniLM-L6-v2".to_string(),
            embedding_dimensions: 384, // MiniLM-L6-v2 outputs 384-dim vectors
            retrieval_k: 5,
            max_search_results: 3,
            default_domains: vec![
                "ctflife.com.hk".to_string(),
                "hkma.gov.hk".to_string(),
                "ifec.org.hk".to_string(),
                "mpfa.org.hk".to_string(),
            ],
            llm_base_url: "https://models.inference.ai.azure.com".to_string(),
            llm_model: "gpt-4o-mini".to_string(),
            llm_api_key_env: "LLM_API_KEY".to_string(),
            search_api_key_env: "TAVILY_API_KEY".to_string(),
            factual_temperature: 0.0,
            draft_temperature: 0.4,
            style_temperature: 0.7,
            max_content_words: 200,
            quiz_questions: 2,
            server_port: 8430,
        }
    }
}

impl Config {
    /// Create a new config with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("curriculum.db")
    }

    /// Get the path to the fact vector index
    pub fn fact_index_path(&self) -> PathBuf {
        self.data_dir.join("facts")
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.fact_index_path())?;
        Ok(())
    }
}

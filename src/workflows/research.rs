//! Research workflow: search allowed domains, extract facts, persist them

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::domains::resolve_domains;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::fact::{Fact, FactIndex};
use crate::llm::{complete_structured, LlmClient, LlmRequest};
use crate::search::SearchProvider;
use crate::storage::CurriculumStore;

const EXTRACTION_SYSTEM: &str = "You are a data curator for a financial education app. \
Read the provided raw content and extract key financial concepts, rules, rates and definitions. \
Ignore marketing fluff and promotional text. \
Respond with JSON: {\"facts\": [{\"fact\": \"...\", \"source_url\": \"...\"}]}.";

/// One fact as extracted by the LLM, before embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedFact {
    /// A concise rule, rate, concept or definition
    pub fact: String,

    /// The URL this fact came from
    pub source_url: String,
}

#[derive(Debug, Deserialize)]
struct FactList {
    facts: Vec<ExtractedFact>,
}

/// Result of one research run
#[derive(Debug, Clone, Serialize)]
pub struct ResearchReport {
    pub topic: String,
    pub facts_saved: usize,
    pub log: Vec<String>,
}

/// Pipeline state threaded through the stages
struct ResearchState {
    topic: String,
    allowed_domains: Vec<String>,
    raw_content: String,
    extracted: Vec<ExtractedFact>,
    log: Vec<String>,
}

/// The search → extract → save pipeline.
///
/// The allowed-domain set is resolved fresh on every run, never cached
/// across calls. Saving is append-only: repeated research on the same topic
/// accumulates facts.
pub struct ResearchWorkflow {
    config: Config,
    store: Arc<CurriculumStore>,
    search: Arc<dyn SearchProvider>,
    llm: Arc<dyn LlmClient>,
    embedder: Arc<dyn Embedder>,
    facts: Arc<dyn FactIndex>,
}

impl ResearchWorkflow {
    pub fn new(
        config: Config,
        store: Arc<CurriculumStore>,
        search: Arc<dyn SearchProvider>,
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn Embedder>,
        facts: Arc<dyn FactIndex>,
    ) -> Self {
        Self {
            config,
            store,
            search,
            llm,
            embedder,
            facts,
        }
    }

    /// Run the full pipeline for one topic
    pub async fn run(&self, topic: &str) -> Result<ResearchReport> {
        tracing::info!(topic, "Starting research");

        let mut state = ResearchState {
            topic: topic.to_string(),
            allowed_domains: Vec::new(),
            raw_content: String::new(),
            extracted: Vec::new(),
            log: Vec::new(),
        };

        self.resolve_domains_stage(&mut state)?;
        self.search_stage(&mut state).await?;
        self.extract_stage(&mut state).await?;
        let facts_saved = self.save_stage(&mut state).await?;

        Ok(ResearchReport {
            topic: state.topic,
            facts_saved,
            log: state.log,
        })
    }

    /// Stage 1: resolve the current allowed-domain set, defaults when empty
    fn resolve_domains_stage(&self, state: &mut ResearchState) -> Result<()> {
        let active = self.store.active_domains()?;
        state.allowed_domains = resolve_domains(&active, &self.config.default_domains);
        state.log.push(format!(
            "Resolved {} allowed domains",
            state.allowed_domains.len()
        ));
        Ok(())
    }

    /// Stage 2: bounded web search, hits concatenated into one raw buffer.
    /// Zero hits leaves the buffer empty; that is a valid outcome.
    async fn search_stage(&self, state: &mut ResearchState) -> Result<()> {
        let hits = self
            .search
            .search(
                &state.topic,
                &state.allowed_domains,
                self.config.max_search_results,
            )
            .await?;

        tracing::info!(topic = %state.topic, hits = hits.len(), "Search complete");
        state.log.push(format!("Search returned {} results", hits.len()));

        let mut combined = String::new();
        for hit in &hits {
            combined.push_str(&format!("Source: {}\nContent: {}\n\n", hit.url, hit.content));
        }
        state.raw_content = combined;
        Ok(())
    }

    /// Stage 3: structured fact extraction. The model is the sole filter;
    /// its output is trusted as-is. An empty buffer yields zero facts
    /// without calling the model.
    async fn extract_stage(&self, state: &mut ResearchState) -> Result<()> {
        if state.raw_content.trim().is_empty() {
            state.log.push("No raw content, skipping extraction".to_string());
            return Ok(());
        }

        let request = LlmRequest::new(
            EXTRACTION_SYSTEM,
            format!("RAW CONTENT:\n{}", state.raw_content),
            self.config.factual_temperature,
        );
        let response: FactList = complete_structured(self.llm.as_ref(), &request).await?;

        tracing::info!(topic = %state.topic, facts = response.facts.len(), "Extraction complete");
        state
            .log
            .push(format!("Extracted {} facts", response.facts.len()));
        state.extracted = response.facts;
        Ok(())
    }

    /// Stage 4: embed each fact and append it to the index. The index schema
    /// is fixed-size, so a wrong-width vector is rejected here with a clear
    /// error instead of deep inside the store.
    async fn save_stage(&self, state: &mut ResearchState) -> Result<usize> {
        let mut saved = 0;
        for item in &state.extracted {
            let embedding = self.embedder.embed(&item.fact).await?;
            if embedding.len() != self.embedder.dimensions() {
                return Err(Error::embedding(format!(
                    "Embedder returned {} dimensions, expected {}",
                    embedding.len(),
                    self.embedder.dimensions()
                )));
            }
            let fact = Fact::new(&state.topic, &item.fact, &item.source_url, embedding);
            self.facts.add(&fact).await?;
            saved += 1;
        }

        tracing::info!(topic = %state.topic, saved, "Research facts saved");
        state.log.push(format!("Saved {} facts", saved));
        Ok(saved)
    }
}

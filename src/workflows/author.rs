//! Authoring workflow: retrieve facts, draft neutral prose, derive a quiz

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::fact::FactIndex;
use crate::llm::{complete_structured, LlmClient, LlmRequest};

const NO_FACTS_PLACEHOLDER: &str = "No specific facts found.";

const DRAFT_SYSTEM: &str = "You are a financial course author for Hong Kong students. \
You write clear, neutral, professional educational prose in paragraphs.";

const QUIZ_SYSTEM: &str = "You generate multiple-choice questions strictly from the \
tutorial text you are given. Respond with JSON: {\"questions\": [{\"question\": \"...\", \
\"options\": [\"...\"], \"correct_answer\": \"...\", \"explanation\": \"...\"}]}.";

/// One generated multiple-choice question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizDraft {
    pub question: String,

    /// Exactly 4 options
    pub options: Vec<String>,

    /// The correct option text
    pub correct_answer: String,

    /// Why this answer is correct
    pub explanation: String,
}

#[derive(Debug, Deserialize)]
struct QuizDraftList {
    questions: Vec<QuizDraft>,
}

/// Result of one authoring run, ready for operator review
#[derive(Debug, Clone, Serialize)]
pub struct Draft {
    pub master_content: String,
    pub quiz: Vec<QuizDraft>,
    pub sources: Vec<String>,
}

/// Pipeline state threaded through the stages
struct AuthorState {
    query: String,
    retrieved_facts: String,
    sources: Vec<String>,
    master_content: String,
    quiz: Vec<QuizDraft>,
}

/// The retrieve → draft → quiz pipeline.
///
/// The quiz is derived from the drafted prose, not from the retrieved facts
/// directly, so questions never reference facts that fell out of the final
/// text.
pub struct AuthorWorkflow {
    config: Config,
    llm: Arc<dyn LlmClient>,
    embedder: Arc<dyn Embedder>,
    facts: Arc<dyn FactIndex>,
}

impl AuthorWorkflow {
    pub fn new(
        config: Config,
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn Embedder>,
        facts: Arc<dyn FactIndex>,
    ) -> Self {
        Self {
            config,
            llm,
            embedder,
            facts,
        }
    }

    /// Run the full pipeline for one search query
    pub async fn run(&self, query: &str) -> Result<Draft> {
        tracing::info!(query, "Starting authoring");

        let mut state = AuthorState {
            query: query.to_string(),
            retrieved_facts: String::new(),
            sources: Vec::new(),
            master_content: String::new(),
            quiz: Vec::new(),
        };

        self.retrieve_stage(&mut state).await?;
        self.draft_stage(&mut state).await?;
        self.quiz_stage(&mut state).await?;

        Ok(Draft {
            master_content: state.master_content,
            quiz: state.quiz,
            sources: state.sources,
        })
    }

    /// Stage 1: nearest-fact retrieval. An empty index degrades to a
    /// placeholder context rather than failing.
    async fn retrieve_stage(&self, state: &mut AuthorState) -> Result<()> {
        let query_vector = self.embedder.embed(&state.query).await?;
        let hits = self
            .facts
            .nearest(&query_vector, self.config.retrieval_k)
            .await?;

        tracing::info!(query = %state.query, facts = hits.len(), "Fact retrieval complete");

        if hits.is_empty() {
            state.retrieved_facts = NO_FACTS_PLACEHOLDER.to_string();
            return Ok(());
        }

        state.retrieved_facts = hits
            .iter()
            .map(|f| format!("- {}", f.text))
            .collect::<Vec<_>>()
            .join("\n");
        let sources: BTreeSet<String> = hits.into_iter().map(|f| f.source_url).collect();
        state.sources = sources.into_iter().collect();
        Ok(())
    }

    /// Stage 2: draft neutral prose constrained to the retrieved facts
    async fn draft_stage(&self, state: &mut AuthorState) -> Result<()> {
        let prompt = format!(
            "Write a clear, educational section about: \"{}\".\n\n\
             RULES:\n\
             1. Use ONLY these facts:\n{}\n\
             2. Length: 150-{} words.\n\
             3. Tone: neutral, professional, educational.\n\
             4. Formatting: use paragraphs.",
            state.query, state.retrieved_facts, self.config.max_content_words,
        );

        let request = LlmRequest::new(DRAFT_SYSTEM, prompt, self.config.draft_temperature);
        state.master_content = self.llm.complete(&request).await?;
        tracing::info!(query = %state.query, "Draft complete");
        Ok(())
    }

    /// Stage 3: derive multiple-choice questions strictly from the draft
    async fn quiz_stage(&self, state: &mut AuthorState) -> Result<()> {
        let prompt = format!(
            "Based STRICTLY on the tutorial text below, generate {} multiple choice questions.\n\n\
             TUTORIAL:\n\"{}\"\n\n\
             REQUIREMENTS:\n\
             - Questions must test understanding of concepts in the text.\n\
             - 4 options per question.\n\
             - Identify the correct answer and explain it.",
            self.config.quiz_questions, state.master_content,
        );

        let request = LlmRequest::new(QUIZ_SYSTEM, prompt, self.config.factual_temperature);
        let response: QuizDraftList = complete_structured(self.llm.as_ref(), &request).await?;

        tracing::info!(query = %state.query, questions = response.questions.len(), "Quiz complete");
        state.quiz = response.questions;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::fact::{Fact, InMemoryFactIndex};
    use crate::llm::ScriptedLlm;

    struct Harness {
        workflow: AuthorWorkflow,
        llm: Arc<ScriptedLlm>,
        facts: Arc<InMemoryFactIndex>,
        embedder: Arc<HashEmbedder>,
    }

    fn harness() -> Harness {
        let config = Config::default();
        let llm = Arc::new(ScriptedLlm::new());
        let facts = Arc::new(InMemoryFactIndex::new());
        let embedder = Arc::new(HashEmbedder::new(config.embedding_dimensions));
        let workflow = AuthorWorkflow::new(config, llm.clone(), embedder.clone(), facts.clone());
        Harness {
            workflow,
            llm,
            facts,
            embedder,
        }
    }

    async fn seed_fact(h: &Harness, topic: &str, text: &str, url: &str) {
        let embedding = h.embedder.embed(text).await.unwrap();
        h.facts
            .add(&Fact::new(topic, text, url, embedding))
            .await
            .unwrap();
    }

    const QUIZ_JSON: &str = r#"{"questions": [
        {"question": "What is the mandatory MPF contribution rate?",
         "options": ["5%", "10%", "1%", "15%"],
         "correct_answer": "5%",
         "explanation": "The text states contributions are 5% of income."},
        {"question": "What is the monthly contribution cap?",
         "options": ["HK$1,500", "HK$500", "HK$3,000", "HK$800"],
         "correct_answer": "HK$1,500",
         "explanation": "The text states the cap is HK$1,500."}
    ]}"#;

    #[tokio::test]
    async fn drafts_and_quizzes_from_retrieved_facts() {
        let h = harness();
        seed_fact(
            &h,
            "MPF",
            "Mandatory MPF contributions are 5% of relevant income.",
            "https://mpfa.org.hk/rates",
        )
        .await;
        seed_fact(
            &h,
            "MPF",
            "MPF contributions are capped at HK$1,500 per month.",
            "https://mpfa.org.hk/cap",
        )
        .await;

        let draft_text =
            "MPF contributions are 5% of relevant income, capped at HK$1,500 per month.";
        h.llm.push_response(draft_text);
        h.llm.push_response(QUIZ_JSON);

        let draft = h.workflow.run("MPF contributions").await.unwrap();
        assert_eq!(draft.master_content, draft_text);
        assert_eq!(draft.quiz.len(), 2);
        assert_eq!(draft.sources.len(), 2);

        // Each question references at least one concept token from the draft
        let content_lower = draft.master_content.to_lowercase();
        for question in &draft.quiz {
            let combined = format!(
                "{} {}",
                question.question.to_lowercase(),
                question.correct_answer.to_lowercase()
            );
            let references_draft = combined
                .split_whitespace()
                .any(|token| token.len() > 2 && content_lower.contains(token));
            assert!(references_draft, "question does not reference the draft");
        }
    }

    #[tokio::test]
    async fn empty_index_uses_placeholder_context() {
        let h = harness();
        h.llm.push_response("A general introduction with no grounding.");
        h.llm.push_response(
            r#"{"questions": [
                {"question": "What is this section about?",
                 "options": ["a", "b", "c", "d"],
                 "correct_answer": "a",
                 "explanation": "intro"},
                {"question": "Second?",
                 "options": ["a", "b", "c", "d"],
                 "correct_answer": "b",
                 "explanation": "intro"}
            ]}"#,
        );

        let draft = h.workflow.run("a topic nobody researched").await.unwrap();
        assert!(draft.sources.is_empty());
        assert!(!draft.master_content.is_empty());
    }

    #[tokio::test]
    async fn each_question_carries_four_options() {
        let h = harness();
        seed_fact(&h, "MPF", "Contributions are 5%.", "https://mpfa.org.hk").await;
        h.llm.push_response("Contributions are 5%.");
        h.llm.push_response(QUIZ_JSON);

        let draft = h.workflow.run("MPF").await.unwrap();
        for question in &draft.quiz {
            assert_eq!(question.options.len(), 4);
            assert!(question.options.contains(&question.correct_answer));
        }
    }
}

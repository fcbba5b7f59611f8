//! Prefetch coordinator: warms the per-user personalization cache for a
//! whole course

use std::sync::Arc;

use serde::Serialize;

use crate::course::{PersonalizedRecord, Section};
use crate::error::{Error, Result};
use crate::storage::CurriculumStore;
use crate::workflows::TutorWorkflow;

/// What happened to one section during a prefetch pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SectionStatus {
    /// New personalized content was generated and cached
    Generated,

    /// Cached content already existed; no LLM call was made
    Cached,

    /// The section has no published master content yet
    NoMasterContent,

    /// Generation failed; siblings were unaffected
    Failed(String),
}

/// Per-section result of a prefetch pass
#[derive(Debug, Clone, Serialize)]
pub struct SectionOutcome {
    pub section_id: i64,
    pub status: SectionStatus,
}

/// Decide whether a (user, section) pair needs regeneration.
///
/// Pure: a record with cached content never regenerates, a section without
/// published content cannot regenerate, everything else does.
pub fn should_regenerate(
    existing: Option<&PersonalizedRecord>,
    master_content: Option<&str>,
) -> bool {
    if existing.map(PersonalizedRecord::has_content).unwrap_or(false) {
        return false;
    }
    master_content
        .map(|c| !c.trim().is_empty())
        .unwrap_or(false)
}

/// Walks every section of a course for one user, personalizing the ones
/// that need it.
///
/// Per-section failures are captured in the outcome list and logged; they
/// never abort the remaining sections. Partial completion is normal — a
/// user revisiting an unready section re-triggers this same coordinator.
pub struct PrefetchCoordinator {
    store: Arc<CurriculumStore>,
    tutor: Arc<TutorWorkflow>,
}

impl PrefetchCoordinator {
    pub fn new(store: Arc<CurriculumStore>, tutor: Arc<TutorWorkflow>) -> Self {
        Self { store, tutor }
    }

    /// Process every section of `course_id` for `user_id`, returning one
    /// outcome per section
    pub async fn prefetch(&self, course_id: i64, user_id: i64) -> Result<Vec<SectionOutcome>> {
        let user = self
            .store
            .get_student(user_id)?
            .ok_or_else(|| Error::not_found(format!("Student {}", user_id)))?;
        self.store
            .get_course(course_id)?
            .ok_or_else(|| Error::not_found(format!("Course {}", course_id)))?;

        let interest = user.interest_or_default().to_string();
        let sections = self.store.list_sections(course_id)?;

        tracing::info!(course_id, user_id, sections = sections.len(), "Prefetch started");

        let mut outcomes = Vec::with_capacity(sections.len());
        for section in &sections {
            let status = match self.process_section(section, user_id, &interest).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(
                        section_id = section.id,
                        error = %e,
                        "Prefetch failed for section"
                    );
                    SectionStatus::Failed(e.to_string())
                }
            };
            outcomes.push(SectionOutcome {
                section_id: section.id,
                status,
            });
        }

        tracing::info!(course_id, user_id, "Prefetch finished");
        Ok(outcomes)
    }

    async fn process_section(
        &self,
        section: &Section,
        user_id: i64,
        interest: &str,
    ) -> Result<SectionStatus> {
        let existing = self.store.get_record(user_id, section.id)?;

        if !should_regenerate(existing.as_ref(), section.master_content.as_deref()) {
            // A published section only skips on a cache hit
            if section.has_master_content() {
                return Ok(SectionStatus::Cached);
            }
            tracing::info!(section_id = section.id, "Skipping section: no master content");
            return Ok(SectionStatus::NoMasterContent);
        }

        // should_regenerate never holds without published content
        let master_content = section.master_content.as_deref().unwrap_or_default();

        // The original publishes one reviewed question set; the tutor adapts
        // the first question for the user
        let master_quiz = self.store.list_quiz(section.id)?.into_iter().next();

        let result = self
            .tutor
            .run(master_content, master_quiz.as_ref(), interest)
            .await?;

        let mut record =
            existing.unwrap_or_else(|| PersonalizedRecord::empty(user_id, section.id));
        record.personalized_content = Some(result.personalized_content);
        record.personalized_quiz = result.personalized_quiz;
        self.store.upsert_record(&record)?;

        Ok(SectionStatus::Generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::course::QuizPayload;
    use crate::llm::ScriptedLlm;
    use serde_json::json;

    fn record_with_content(user_id: i64, section_id: i64) -> PersonalizedRecord {
        let mut record = PersonalizedRecord::empty(user_id, section_id);
        record.personalized_content = Some("Cached text with the 5% figure.".into());
        record
    }

    #[test]
    fn should_regenerate_decision_table() {
        let cached = record_with_content(1, 1);
        let empty = PersonalizedRecord::empty(1, 1);

        // Cached content wins over everything
        assert!(!should_regenerate(Some(&cached), Some("published")));
        // No source content, nothing to do
        assert!(!should_regenerate(None, None));
        assert!(!should_regenerate(None, Some("   ")));
        assert!(!should_regenerate(Some(&empty), None));
        // Empty record plus published content regenerates
        assert!(should_regenerate(Some(&empty), Some("published")));
        assert!(should_regenerate(None, Some("published")));
    }

    struct Harness {
        coordinator: PrefetchCoordinator,
        store: Arc<CurriculumStore>,
        llm: Arc<ScriptedLlm>,
        course_id: i64,
        user_id: i64,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());
        config.ensure_dirs().unwrap();

        let store = Arc::new(CurriculumStore::new(&config).unwrap());
        let llm = Arc::new(ScriptedLlm::new());
        let tutor = Arc::new(TutorWorkflow::new(config, llm.clone()));
        let coordinator = PrefetchCoordinator::new(store.clone(), tutor);

        let course = store.create_course("Finance 101", "", "Beginner").unwrap();
        let user = store.create_student("kit", Some("Biology")).unwrap();

        Harness {
            coordinator,
            store,
            llm,
            course_id: course.id,
            user_id: user.id,
            _dir: dir,
        }
    }

    fn published_section(h: &Harness, title: &str, order: i64) -> i64 {
        let section = h
            .store
            .create_section(h.course_id, title, order, &json!({}))
            .unwrap();
        h.store
            .publish_section(
                section.id,
                "Contributions are 5% of income.",
                &[QuizPayload {
                    question: "What is the rate?".into(),
                    correct_answer: "5%".into(),
                    options: vec!["5%".into(), "10%".into(), "1%".into(), "2%".into()],
                }],
            )
            .unwrap();
        section.id
    }

    fn personalized_response(llm: &ScriptedLlm) {
        llm.push_response("Like a cell storing 5% of its energy as ATP.");
        llm.push_response(
            r#"{"question": "How much energy does the cell store?",
                "options": ["5%", "10%", "1%", "2%"],
                "correct_answer": "5%",
                "explanation": "Same 5% rate as the contributions."}"#,
        );
    }

    #[tokio::test]
    async fn mixed_course_generates_only_where_needed() {
        let h = harness();
        let cached_id = published_section(&h, "Cached", 1);
        let bare = h
            .store
            .create_section(h.course_id, "Unpublished", 2, &json!({}))
            .unwrap();
        let fresh_id = published_section(&h, "Fresh", 3);

        h.store
            .upsert_record(&record_with_content(h.user_id, cached_id))
            .unwrap();
        personalized_response(&h.llm);

        let outcomes = h
            .coordinator
            .prefetch(h.course_id, h.user_id)
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        let by_id = |id: i64| {
            outcomes
                .iter()
                .find(|o| o.section_id == id)
                .unwrap()
                .status
                .clone()
        };
        assert_eq!(by_id(cached_id), SectionStatus::Cached);
        assert_eq!(by_id(bare.id), SectionStatus::NoMasterContent);
        assert_eq!(by_id(fresh_id), SectionStatus::Generated);

        // Only the fresh section reached the LLM (style + quiz = 2 calls)
        assert_eq!(h.llm.call_count(), 2);
        assert!(h
            .store
            .get_record(h.user_id, fresh_id)
            .unwrap()
            .unwrap()
            .has_content());
        // The unpublished section got no record at all
        assert!(h.store.get_record(h.user_id, bare.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn generation_matches_the_regeneration_decision() {
        let h = harness();
        let cached_id = published_section(&h, "Cached", 1);
        h.store
            .create_section(h.course_id, "Unpublished", 2, &json!({}))
            .unwrap();
        published_section(&h, "Fresh", 3);

        h.store
            .upsert_record(&record_with_content(h.user_id, cached_id))
            .unwrap();
        personalized_response(&h.llm);

        // Snapshot the pure decision for every section before the run
        let mut expected = std::collections::HashMap::new();
        for section in h.store.list_sections(h.course_id).unwrap() {
            let record = h.store.get_record(h.user_id, section.id).unwrap();
            expected.insert(
                section.id,
                should_regenerate(record.as_ref(), section.master_content.as_deref()),
            );
        }

        let outcomes = h
            .coordinator
            .prefetch(h.course_id, h.user_id)
            .await
            .unwrap();

        // The coordinator generates exactly where the decision says to
        for outcome in &outcomes {
            let generated = outcome.status == SectionStatus::Generated;
            assert_eq!(generated, expected[&outcome.section_id]);
        }
    }

    #[tokio::test]
    async fn second_run_is_idempotent_with_zero_llm_calls() {
        let h = harness();
        published_section(&h, "Only", 1);
        personalized_response(&h.llm);

        let first = h
            .coordinator
            .prefetch(h.course_id, h.user_id)
            .await
            .unwrap();
        assert_eq!(first[0].status, SectionStatus::Generated);
        let calls_after_first = h.llm.call_count();

        let second = h
            .coordinator
            .prefetch(h.course_id, h.user_id)
            .await
            .unwrap();
        assert_eq!(second[0].status, SectionStatus::Cached);
        assert_eq!(h.llm.call_count(), calls_after_first);
    }

    #[tokio::test]
    async fn per_section_failure_does_not_stop_siblings() {
        let h = harness();
        let first_id = published_section(&h, "First", 1);
        let second_id = published_section(&h, "Second", 2);

        // Scripted responses cover only the first section; the second
        // section's LLM call fails against an empty queue
        personalized_response(&h.llm);

        let outcomes = h
            .coordinator
            .prefetch(h.course_id, h.user_id)
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].section_id, first_id);
        assert_eq!(outcomes[0].status, SectionStatus::Generated);
        assert!(matches!(outcomes[1].status, SectionStatus::Failed(_)));
        // The failed section cached nothing; a later run can retry it
        assert!(h.store.get_record(h.user_id, second_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_course_or_user_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.coordinator.prefetch(999, h.user_id).await.unwrap_err(),
            Error::NotFound(_)
        ));
        assert!(matches!(
            h.coordinator.prefetch(h.course_id, 999).await.unwrap_err(),
            Error::NotFound(_)
        ));
    }
}

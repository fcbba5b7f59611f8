//! Curriculum domain types: courses, sections, quizzes, per-user records

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A course grouping ordered sections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub level: String,
}

/// One section of a course.
///
/// `master_content` stays empty until a draft is published; publishing
/// overwrites it wholesale, no history is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub order_index: i64,

    /// Neutral, fact-checked published text
    pub master_content: Option<String>,

    /// Free-form metadata saved at syllabus time, e.g. {"search_query": ...}
    pub key_facts: Value,
}

impl Section {
    /// Query used to retrieve facts when drafting: the saved search query
    /// when present, otherwise the section title
    pub fn search_query(&self) -> &str {
        self.key_facts
            .get("search_query")
            .and_then(Value::as_str)
            .unwrap_or(&self.title)
    }

    /// Whether the section has published content to personalize
    pub fn has_master_content(&self) -> bool {
        self.master_content
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false)
    }
}

/// A published, neutral multiple-choice question tied to a section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizItem {
    pub id: i64,
    pub section_id: i64,
    pub question: String,
    pub correct_answer: String,
    pub options: Vec<String>,
}

/// Quiz question as submitted on publish (no ids yet)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizPayload {
    pub question: String,
    pub correct_answer: String,
    pub options: Vec<String>,
}

impl QuizPayload {
    /// Reject malformed questions before anything is written
    pub fn validate(&self) -> Result<()> {
        if self.question.trim().is_empty() {
            return Err(Error::invalid_input("Quiz question cannot be empty"));
        }
        if self.correct_answer.trim().is_empty() {
            return Err(Error::invalid_input("Quiz correct answer cannot be empty"));
        }
        if self.options.len() < 2 {
            return Err(Error::invalid_input(
                "Quiz question needs at least 2 options",
            ));
        }
        Ok(())
    }
}

/// A quiz rewritten for one user's interest metaphor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalizedQuiz {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    pub explanation: String,
}

/// Cached per-user output for one section.
///
/// At most one record exists per (user, section); a non-empty
/// `personalized_content` marks a cache hit and suppresses regeneration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalizedRecord {
    pub user_id: i64,
    pub section_id: i64,
    pub personalized_content: Option<String>,
    pub personalized_quiz: Option<PersonalizedQuiz>,
    pub completed: bool,
    pub score: i64,
}

impl PersonalizedRecord {
    /// Empty record for a (user, section) pair, created lazily
    pub fn empty(user_id: i64, section_id: i64) -> Self {
        Self {
            user_id,
            section_id,
            personalized_content: None,
            personalized_quiz: None,
            completed: false,
            score: 0,
        }
    }

    /// Whether cached content exists for this record
    pub fn has_content(&self) -> bool {
        self.personalized_content
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Minimal student profile the personalization path needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentProfile {
    pub id: i64,
    pub username: String,
    pub interests: Option<String>,
}

impl StudentProfile {
    /// Interest string handed to the tutor workflow
    pub fn interest_or_default(&self) -> &str {
        self.interests
            .as_deref()
            .filter(|i| !i.trim().is_empty())
            .unwrap_or("General")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn search_query_prefers_key_facts() {
        let section = Section {
            id: 1,
            course_id: 1,
            title: "What is Interest?".into(),
            order_index: 1,
            master_content: None,
            key_facts: json!({"search_query": "interest rates hong kong"}),
        };
        assert_eq!(section.search_query(), "interest rates hong kong");
    }

    #[test]
    fn search_query_falls_back_to_title() {
        let section = Section {
            id: 1,
            course_id: 1,
            title: "What is Interest?".into(),
            order_index: 1,
            master_content: None,
            key_facts: json!({}),
        };
        assert_eq!(section.search_query(), "What is Interest?");
    }

    #[test]
    fn whitespace_master_content_does_not_count_as_published() {
        let mut section = Section {
            id: 1,
            course_id: 1,
            title: "t".into(),
            order_index: 1,
            master_content: Some("   ".into()),
            key_facts: json!({}),
        };
        assert!(!section.has_master_content());
        section.master_content = Some("MPF contributions are 5%.".into());
        assert!(section.has_master_content());
    }

    #[test]
    fn quiz_payload_validation() {
        let good = QuizPayload {
            question: "What is the MPF rate?".into(),
            correct_answer: "5%".into(),
            options: vec!["5%".into(), "10%".into(), "1%".into(), "2%".into()],
        };
        assert!(good.validate().is_ok());

        let no_question = QuizPayload {
            question: " ".into(),
            ..good.clone()
        };
        assert!(no_question.validate().is_err());

        let one_option = QuizPayload {
            options: vec!["5%".into()],
            ..good
        };
        assert!(one_option.validate().is_err());
    }

    #[test]
    fn interest_defaults_to_general() {
        let user = StudentProfile {
            id: 1,
            username: "kit".into(),
            interests: Some("  ".into()),
        };
        assert_eq!(user.interest_or_default(), "General");
    }
}

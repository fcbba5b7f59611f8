//! # Coursecraft
//!
//! A content-generation and personalization engine for adaptive courses.
//!
//! ## Architecture
//!
//! Three linear LLM pipelines over shared storage:
//! - **Research** - searches allowed domains, extracts facts, embeds and
//!   persists them in a vector index
//! - **Authoring** - retrieves the nearest facts for a topic, drafts neutral
//!   tutorial prose, derives a quiz from the draft
//! - **Tutoring** - rewrites published content and its quiz around one
//!   user's interest, preserving the numeric facts
//!
//! A prefetch coordinator walks a course's sections for one user, skipping
//! cached and unpublished sections, and caches whatever the tutor produces.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use coursecraft::{Config, CurriculumStore, ResearchWorkflow};
//!
//! let config = Config::default();
//! let store = Arc::new(CurriculumStore::new(&config)?);
//!
//! // Research a topic into the fact index
//! let report = research.run("MPF in Hong Kong").await?;
//!
//! // Draft a section from the accumulated facts
//! let draft = author.run("What is MPF?").await?;
//!
//! // Warm the personalization cache for one enrolled user
//! let outcomes = coordinator.prefetch(course_id, user_id).await?;
//! ```

pub mod config;
pub mod course;
pub mod domains;
pub mod embedding;
pub mod error;
pub mod fact;
pub mod llm;
pub mod prefetch;
pub mod search;
pub mod storage;
pub mod workflows;

pub use config::Config;
pub use course::{Course, PersonalizedRecord, QuizItem, Section, StudentProfile};
pub use domains::AllowedDomain;
pub use error::{Error, Result};
pub use fact::{Fact, FactIndex};
pub use prefetch::{PrefetchCoordinator, SectionOutcome, SectionStatus};
pub use storage::{CurriculumStore, LanceFactIndex};
pub use workflows::{AuthorWorkflow, ResearchWorkflow, TutorWorkflow};

//! SQLite storage for the curriculum: courses, sections, quizzes,
//! per-user records, and the research-domain allowlist

use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::course::{
    Course, PersonalizedRecord, QuizItem, QuizPayload, Section, StudentProfile,
};
use crate::domains::{normalize_domain, AllowedDomain};
use crate::error::{Error, Result};

/// SQLite-backed curriculum store
pub struct CurriculumStore {
    conn: Arc<Mutex<Connection>>,
}

impl CurriculumStore {
    /// Open the store and initialize the schema
    pub fn new(config: &Config) -> Result<Self> {
        let conn = Connection::open(config.sqlite_path())?;
        conn.execute_batch(include_str!("schema.sql"))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // --- Courses and sections ---

    /// Create a course
    pub fn create_course(
        &self,
        title: &str,
        description: &str,
        level: &str,
    ) -> Result<Course> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        conn.execute(
            "INSERT INTO courses (title, description, level) VALUES (?1, ?2, ?3)",
            params![title, description, level],
        )?;
        Ok(Course {
            id: conn.last_insert_rowid(),
            title: title.to_string(),
            description: description.to_string(),
            level: level.to_string(),
        })
    }

    /// Get a course by ID
    pub fn get_course(&self, id: i64) -> Result<Option<Course>> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        conn.query_row(
            "SELECT id, title, description, level FROM courses WHERE id = ?1",
            params![id],
            |row| {
                Ok(Course {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    description: row.get(2)?,
                    level: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    /// Create a section within a course
    pub fn create_section(
        &self,
        course_id: i64,
        title: &str,
        order_index: i64,
        key_facts: &serde_json::Value,
    ) -> Result<Section> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        conn.execute(
            r#"
            INSERT INTO sections (course_id, title, order_index, key_facts)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![course_id, title, order_index, serde_json::to_string(key_facts)?],
        )?;
        Ok(Section {
            id: conn.last_insert_rowid(),
            course_id,
            title: title.to_string(),
            order_index,
            master_content: None,
            key_facts: key_facts.clone(),
        })
    }

    /// Get a section by ID
    pub fn get_section(&self, id: i64) -> Result<Option<Section>> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        let result = conn
            .query_row(
                r#"
                SELECT id, course_id, title, order_index, master_content, key_facts
                FROM sections WHERE id = ?1
                "#,
                params![id],
                |row| SectionRow::from_row(row),
            )
            .optional()?;

        result.map(|row| row.into_section()).transpose()
    }

    /// List a course's sections in display order
    pub fn list_sections(&self, course_id: i64) -> Result<Vec<Section>> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, course_id, title, order_index, master_content, key_facts
            FROM sections WHERE course_id = ?1 ORDER BY order_index
            "#,
        )?;

        let rows = stmt.query_map(params![course_id], |row| SectionRow::from_row(row))?;

        let mut sections = Vec::new();
        for row in rows {
            sections.push(row?.into_section()?);
        }
        Ok(sections)
    }

    /// Publish reviewed content for a section: overwrite the master text and
    /// fully replace the quiz rows (delete-then-insert), in one transaction.
    ///
    /// Malformed quiz payloads are rejected before anything is written, so a
    /// failed publish leaves the prior state untouched.
    pub fn publish_section(
        &self,
        section_id: i64,
        master_content: &str,
        quiz: &[QuizPayload],
    ) -> Result<()> {
        for item in quiz {
            item.validate()?;
        }

        let mut conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE sections SET master_content = ?1 WHERE id = ?2",
            params![master_content, section_id],
        )?;
        if updated == 0 {
            return Err(Error::not_found(format!("Section {}", section_id)));
        }

        tx.execute(
            "DELETE FROM quiz_items WHERE section_id = ?1",
            params![section_id],
        )?;
        for item in quiz {
            tx.execute(
                r#"
                INSERT INTO quiz_items (section_id, question, correct_answer, options)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![
                    section_id,
                    item.question,
                    item.correct_answer,
                    serde_json::to_string(&item.options)?,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// List the published quiz items for a section
    pub fn list_quiz(&self, section_id: i64) -> Result<Vec<QuizItem>> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, section_id, question, correct_answer, options
            FROM quiz_items WHERE section_id = ?1 ORDER BY id
            "#,
        )?;

        let rows = stmt.query_map(params![section_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (id, section_id, question, correct_answer, options) = row?;
            items.push(QuizItem {
                id,
                section_id,
                question,
                correct_answer,
                options: serde_json::from_str(&options)?,
            });
        }
        Ok(items)
    }

    // --- Students ---

    /// Create a student profile
    pub fn create_student(&self, username: &str, interests: Option<&str>) -> Result<StudentProfile> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        conn.execute(
            "INSERT INTO students (username, interests) VALUES (?1, ?2)",
            params![username, interests],
        )?;
        Ok(StudentProfile {
            id: conn.last_insert_rowid(),
            username: username.to_string(),
            interests: interests.map(String::from),
        })
    }

    /// Get a student profile by ID
    pub fn get_student(&self, id: i64) -> Result<Option<StudentProfile>> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        conn.query_row(
            "SELECT id, username, interests FROM students WHERE id = ?1",
            params![id],
            |row| {
                Ok(StudentProfile {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    interests: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    // --- Personalized records ---

    /// Get the cached record for a (user, section) pair
    pub fn get_record(&self, user_id: i64, section_id: i64) -> Result<Option<PersonalizedRecord>> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        let result = conn
            .query_row(
                r#"
                SELECT user_id, section_id, personalized_content, personalized_quiz,
                       completed, score
                FROM personalized_records WHERE user_id = ?1 AND section_id = ?2
                "#,
                params![user_id, section_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;

        result
            .map(|(user_id, section_id, content, quiz, completed, score)| {
                Ok(PersonalizedRecord {
                    user_id,
                    section_id,
                    personalized_content: content,
                    personalized_quiz: quiz.map(|q| serde_json::from_str(&q)).transpose()?,
                    completed,
                    score,
                })
            })
            .transpose()
    }

    /// Insert or replace the record for (user, section); the primary key
    /// keeps at most one row per pair
    pub fn upsert_record(&self, record: &PersonalizedRecord) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        conn.execute(
            r#"
            INSERT INTO personalized_records (
                user_id, section_id, personalized_content, personalized_quiz,
                completed, score
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(user_id, section_id) DO UPDATE SET
                personalized_content = excluded.personalized_content,
                personalized_quiz = excluded.personalized_quiz,
                completed = excluded.completed,
                score = excluded.score
            "#,
            params![
                record.user_id,
                record.section_id,
                record.personalized_content,
                record
                    .personalized_quiz
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                record.completed,
                record.score,
            ],
        )?;
        Ok(())
    }

    // --- Research domains ---

    /// List all configured domains, active first
    pub fn list_domains(&self) -> Result<Vec<AllowedDomain>> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, domain, label, active, created_at
            FROM research_domains ORDER BY active DESC, domain ASC
            "#,
        )?;
        let rows = stmt.query_map([], |row| DomainRow::from_row(row))?;

        let mut domains = Vec::new();
        for row in rows {
            domains.push(row?.into_domain()?);
        }
        Ok(domains)
    }

    /// List the active domains, sorted by name
    pub fn active_domains(&self) -> Result<Vec<AllowedDomain>> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, domain, label, active, created_at
            FROM research_domains WHERE active = 1 ORDER BY domain ASC
            "#,
        )?;
        let rows = stmt.query_map([], |row| DomainRow::from_row(row))?;

        let mut domains = Vec::new();
        for row in rows {
            domains.push(row?.into_domain()?);
        }
        Ok(domains)
    }

    /// Add a domain to the allowlist.
    ///
    /// An existing inactive row is reactivated (label updated when supplied)
    /// instead of duplicated; an existing active row is an error.
    pub fn add_domain(&self, raw_domain: &str, label: Option<&str>) -> Result<AllowedDomain> {
        let domain = normalize_domain(raw_domain)?;
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;

        let existing = conn
            .query_row(
                "SELECT id, domain, label, active, created_at FROM research_domains WHERE domain = ?1",
                params![domain],
                |row| DomainRow::from_row(row),
            )
            .optional()?;

        if let Some(row) = existing {
            let record = row.into_domain()?;
            if record.active {
                return Err(Error::invalid_input(format!(
                    "Domain already exists: {}",
                    domain
                )));
            }
            conn.execute(
                "UPDATE research_domains SET active = 1, label = COALESCE(?1, label) WHERE id = ?2",
                params![label, record.id],
            )?;
            return Ok(AllowedDomain {
                active: true,
                label: label.map(String::from).or(record.label),
                ..record
            });
        }

        let created_at = chrono::Utc::now();
        conn.execute(
            r#"
            INSERT INTO research_domains (domain, label, active, created_at)
            VALUES (?1, ?2, 1, ?3)
            "#,
            params![domain, label, created_at.to_rfc3339()],
        )?;
        Ok(AllowedDomain {
            id: conn.last_insert_rowid(),
            domain,
            label: label.map(String::from),
            active: true,
            created_at,
        })
    }

    /// Remove a domain from the allowlist
    pub fn remove_domain(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| Error::storage(e.to_string()))?;
        let deleted = conn.execute("DELETE FROM research_domains WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(Error::not_found(format!("Domain {}", id)));
        }
        Ok(())
    }
}

/// Intermediate struct for reading sections from SQLite
struct SectionRow {
    id: i64,
    course_id: i64,
    title: String,
    order_index: i64,
    master_content: Option<String>,
    key_facts: String,
}

impl SectionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            course_id: row.get(1)?,
            title: row.get(2)?,
            order_index: row.get(3)?,
            master_content: row.get(4)?,
            key_facts: row.get(5)?,
        })
    }

    fn into_section(self) -> Result<Section> {
        Ok(Section {
            id: self.id,
            course_id: self.course_id,
            title: self.title,
            order_index: self.order_index,
            master_content: self.master_content,
            key_facts: serde_json::from_str(&self.key_facts)?,
        })
    }
}

/// Intermediate struct for reading domains from SQLite
struct DomainRow {
    id: i64,
    domain: String,
    label: Option<String>,
    active: bool,
    created_at: String,
}

impl DomainRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            domain: row.get(1)?,
            label: row.get(2)?,
            active: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_domain(self) -> Result<AllowedDomain> {
        Ok(AllowedDomain {
            id: self.id,
            domain: self.domain,
            label: self.label,
            active: self.active,
            created_at: chrono::DateTime::parse_from_rfc3339(&self.created_at)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .map_err(|e| Error::storage(e.to_string()))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::PersonalizedQuiz;
    use serde_json::json;

    fn test_store() -> (CurriculumStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());
        config.ensure_dirs().unwrap();
        (CurriculumStore::new(&config).unwrap(), dir)
    }

    fn sample_quiz(n: usize) -> Vec<QuizPayload> {
        (0..n)
            .map(|i| QuizPayload {
                question: format!("Question {}?", i),
                correct_answer: "5%".into(),
                options: vec!["5%".into(), "10%".into(), "1%".into(), "2%".into()],
            })
            .collect()
    }

    #[test]
    fn publish_fully_replaces_quiz_rows() {
        let (store, _dir) = test_store();
        let course = store.create_course("Finance 101", "", "Beginner").unwrap();
        let section = store
            .create_section(course.id, "Interest", 1, &json!({}))
            .unwrap();

        store
            .publish_section(section.id, "First version.", &sample_quiz(3))
            .unwrap();
        assert_eq!(store.list_quiz(section.id).unwrap().len(), 3);

        store
            .publish_section(section.id, "Second version.", &sample_quiz(2))
            .unwrap();
        let quiz = store.list_quiz(section.id).unwrap();
        assert_eq!(quiz.len(), 2);
        assert!(quiz.iter().all(|q| q.section_id == section.id));

        let section = store.get_section(section.id).unwrap().unwrap();
        assert_eq!(section.master_content.as_deref(), Some("Second version."));
    }

    #[test]
    fn malformed_publish_retains_prior_state() {
        let (store, _dir) = test_store();
        let course = store.create_course("Finance 101", "", "Beginner").unwrap();
        let section = store
            .create_section(course.id, "Interest", 1, &json!({}))
            .unwrap();
        store
            .publish_section(section.id, "Good version.", &sample_quiz(2))
            .unwrap();

        let mut bad = sample_quiz(1);
        bad[0].question = "  ".into();
        assert!(store
            .publish_section(section.id, "Bad version.", &bad)
            .is_err());

        let section = store.get_section(section.id).unwrap().unwrap();
        assert_eq!(section.master_content.as_deref(), Some("Good version."));
        assert_eq!(store.list_quiz(section.id).unwrap().len(), 2);
    }

    #[test]
    fn publish_to_unknown_section_is_not_found() {
        let (store, _dir) = test_store();
        let err = store.publish_section(999, "text", &sample_quiz(1)).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn adding_inactive_domain_reactivates_it() {
        let (store, _dir) = test_store();
        let added = store.add_domain("HKMA.gov.hk", Some("HKMA")).unwrap();
        assert_eq!(added.domain, "hkma.gov.hk");

        // Active duplicate is rejected
        assert!(store.add_domain("hkma.gov.hk", None).is_err());

        // Deactivate by hand, then re-add: same row comes back active
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "UPDATE research_domains SET active = 0 WHERE id = ?1",
                params![added.id],
            )
            .unwrap();
        }
        let revived = store.add_domain("hkma.gov.hk", None).unwrap();
        assert_eq!(revived.id, added.id);
        assert!(revived.active);
        assert_eq!(store.list_domains().unwrap().len(), 1);
    }

    #[test]
    fn record_upsert_keeps_one_row_per_pair() {
        let (store, _dir) = test_store();
        let user = store.create_student("kit", Some("Biology")).unwrap();
        let course = store.create_course("Finance 101", "", "Beginner").unwrap();
        let section = store
            .create_section(course.id, "Interest", 1, &json!({}))
            .unwrap();

        let mut record = PersonalizedRecord::empty(user.id, section.id);
        record.personalized_content = Some("Cells save 5% of their energy.".into());
        store.upsert_record(&record).unwrap();

        record.personalized_quiz = Some(PersonalizedQuiz {
            question: "How much energy does the cell save?".into(),
            options: vec!["5%".into(), "10%".into(), "1%".into(), "2%".into()],
            correct_answer: "5%".into(),
            explanation: "The 5% figure carries over.".into(),
        });
        store.upsert_record(&record).unwrap();

        let loaded = store.get_record(user.id, section.id).unwrap().unwrap();
        assert!(loaded.has_content());
        assert!(loaded.personalized_quiz.is_some());

        // Still exactly one row
        let conn = store.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM personalized_records WHERE user_id = ?1 AND section_id = ?2",
                params![user.id, section.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}

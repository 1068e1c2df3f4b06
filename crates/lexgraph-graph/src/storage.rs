//! Graph storage operations for SQLite.
//!
//! This module provides the `GraphStore` struct for persisting documents,
//! units, concepts, relations and triples, and for the lookups the query
//! pipeline depends on: fuzzy concept/relation candidates and bounded
//! star-pattern triple retrieval.

use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use crate::schema::{
    CandidateRole, Concept, Document, GraphStats, NewDocument, NewTriple, NewUnit, QueryCandidate,
    QueryStar, Relation, Resolved, Triple, TripleView, Unit, UnitTree,
};
use crate::similarity::{rank_candidates, score_concept, score_relation, trigrams};

/// Maximum concept candidates returned per term.
pub const CONCEPT_CANDIDATE_LIMIT: usize = 20;
/// Maximum relation candidates returned per term.
pub const RELATION_CANDIDATE_LIMIT: usize = 10;
/// Maximum triples returned per star.
pub const STAR_TRIPLE_LIMIT: usize = 50;

const DEFAULT_CONCEPT_TYPE: &str = "general";

type DocumentRow = (
    i64,
    String,
    String,
    Option<String>,
    Option<i32>,
    Option<String>,
    String,
    String,
    String,
);
type UnitRow = (i64, i64, String, Option<String>, String, Option<i64>, i32, String);
type ConceptRow = (i64, String, Option<String>, String, String, String, String);
type RelationRow = (i64, String, Option<String>, String, String, String);
type TripleRow = (
    i64,
    i64,
    i64,
    i64,
    i64,
    String,
    f64,
    Option<f64>,
    bool,
    Option<String>,
    String,
);

const DOCUMENT_COLUMNS: &str =
    "id, title, doc_type, number, year, authority, status, created_at, updated_at";
const UNIT_COLUMNS: &str = "id, document_id, level, code, text, parent_id, order_index, created_at";
const CONCEPT_COLUMNS: &str =
    "id, name, description, synonyms, keywords, concept_type, created_at";
const RELATION_COLUMNS: &str = "id, name, description, keywords, relation_type, created_at";
const TRIPLE_COLUMNS: &str = "id, subject_id, relation_id, object_id, unit_id, doc_ref, confidence, \
     tfidf, is_blacklisted, context, created_at";

/// Graph storage backed by SQLite.
#[derive(Clone)]
pub struct GraphStore {
    pool: SqlitePool,
}

impl GraphStore {
    /// Create a new GraphStore with an existing connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Initialize the graph schema (called during DB setup).
    #[instrument(skip_all)]
    pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                title_key TEXT NOT NULL,
                doc_type TEXT NOT NULL,
                number TEXT,
                number_key TEXT,
                year INTEGER,
                authority TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS units (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL REFERENCES documents(id),
                level TEXT NOT NULL,
                code TEXT,
                text TEXT NOT NULL,
                parent_id INTEGER REFERENCES units(id),
                order_index INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS concepts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                name_key TEXT NOT NULL,
                description TEXT,
                synonyms JSON NOT NULL DEFAULT '[]',
                keywords JSON NOT NULL DEFAULT '[]',
                concept_type TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        // Trigram index backing the similarity prefilter
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS concept_trigrams (
                concept_id INTEGER NOT NULL REFERENCES concepts(id),
                trigram TEXT NOT NULL,
                PRIMARY KEY (concept_id, trigram)
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS relations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                keywords JSON NOT NULL DEFAULT '[]',
                relation_type TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS triples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_id INTEGER NOT NULL REFERENCES concepts(id),
                relation_id INTEGER NOT NULL REFERENCES relations(id),
                object_id INTEGER NOT NULL REFERENCES concepts(id),
                unit_id INTEGER NOT NULL REFERENCES units(id),
                doc_ref TEXT NOT NULL,
                confidence REAL NOT NULL DEFAULT 1.0,
                tfidf REAL,
                is_blacklisted INTEGER NOT NULL DEFAULT 0,
                context TEXT,
                created_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_title ON documents(title_key)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_number ON documents(number_key)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_units_document ON units(document_id)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trigrams_trigram ON concept_trigrams(trigram)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_triples_subject ON triples(subject_id)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_triples_relation ON triples(relation_id)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_triples_object ON triples(object_id)")
            .execute(pool)
            .await?;

        Ok(())
    }

    // ---- Documents ----

    /// Create a document with status "active".
    #[instrument(skip(self, doc), fields(title = %doc.title))]
    pub async fn create_document(&self, doc: &NewDocument) -> Result<Document> {
        let now = now_ts();
        let number = normalize_number(doc.number.as_deref());

        let id = sqlx::query(
            "INSERT INTO documents (title, title_key, doc_type, number, number_key, year, authority, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'active', ?8, ?8)",
        )
        .bind(&doc.title)
        .bind(doc.title.to_lowercase())
        .bind(&doc.doc_type)
        .bind(number)
        .bind(number.map(str::to_lowercase))
        .bind(doc.year)
        .bind(&doc.authority)
        .bind(&now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.get_document(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("document {id} vanished after insert"))
    }

    /// Get a document by ID.
    pub async fn get_document(&self, id: i64) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(document_from_row))
    }

    /// Find an existing document whose title or number matches, case-insensitively.
    #[instrument(skip(self))]
    pub async fn find_document_by_metadata(
        &self,
        title: &str,
        number: Option<&str>,
    ) -> Result<Option<Document>> {
        let number_key = normalize_number(number).map(str::to_lowercase);

        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents
             WHERE title_key = ?1 OR (?2 IS NOT NULL AND number_key = ?2)
             ORDER BY id LIMIT 1"
        ))
        .bind(title.to_lowercase())
        .bind(number_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(document_from_row))
    }

    /// Update a document's metadata. Returns the stored row, or None if it does not exist.
    #[instrument(skip(self, doc), fields(id = doc.id))]
    pub async fn update_document(&self, doc: &Document) -> Result<Option<Document>> {
        let number = normalize_number(doc.number.as_deref());

        let result = sqlx::query(
            "UPDATE documents SET title = ?2, title_key = ?3, doc_type = ?4, number = ?5, number_key = ?6,
                year = ?7, authority = ?8, status = ?9, updated_at = ?10
             WHERE id = ?1",
        )
        .bind(doc.id)
        .bind(&doc.title)
        .bind(doc.title.to_lowercase())
        .bind(&doc.doc_type)
        .bind(number)
        .bind(number.map(str::to_lowercase))
        .bind(doc.year)
        .bind(&doc.authority)
        .bind(&doc.status)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_document(doc.id).await
    }

    // ---- Units ----

    #[instrument(skip(self, unit), fields(document_id = unit.document_id, code = ?unit.code))]
    pub async fn create_unit(&self, unit: &NewUnit) -> Result<Unit> {
        let id = sqlx::query(
            "INSERT INTO units (document_id, level, code, text, parent_id, order_index, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(unit.document_id)
        .bind(&unit.level)
        .bind(&unit.code)
        .bind(&unit.text)
        .bind(unit.parent_id)
        .bind(unit.order_index)
        .bind(now_ts())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.get_unit(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("unit {id} vanished after insert"))
    }

    pub async fn get_unit(&self, id: i64) -> Result<Option<Unit>> {
        let row = sqlx::query_as::<_, UnitRow>(&format!(
            "SELECT {UNIT_COLUMNS} FROM units WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(unit_from_row))
    }

    /// Get a unit together with the document that owns it.
    pub async fn get_unit_with_document(&self, id: i64) -> Result<Option<(Unit, Document)>> {
        let Some(unit) = self.get_unit(id).await? else {
            return Ok(None);
        };
        let document = self.get_document(unit.document_id).await?;
        Ok(document.map(|doc| (unit, doc)))
    }

    /// All units of a document ordered by order index.
    pub async fn units_by_document(&self, document_id: i64) -> Result<Vec<Unit>> {
        let rows = sqlx::query_as::<_, UnitRow>(&format!(
            "SELECT {UNIT_COLUMNS} FROM units WHERE document_id = ?1 ORDER BY order_index, id"
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(unit_from_row).collect())
    }

    /// Units of a document arranged as a forest following parent links.
    pub async fn unit_tree(&self, document_id: i64) -> Result<Vec<UnitTree>> {
        let units = self.units_by_document(document_id).await?;
        let ids: BTreeSet<i64> = units.iter().map(|u| u.id).collect();

        let mut by_parent: HashMap<Option<i64>, Vec<Unit>> = HashMap::new();
        for unit in units {
            // Parents outside this document are treated as roots
            let parent = unit.parent_id.filter(|p| ids.contains(p));
            by_parent.entry(parent).or_default().push(unit);
        }

        Ok(build_forest(None, &mut by_parent))
    }

    // ---- Concepts ----

    pub async fn get_concept(&self, id: i64) -> Result<Option<Concept>> {
        let row = sqlx::query_as::<_, ConceptRow>(&format!(
            "SELECT {CONCEPT_COLUMNS} FROM concepts WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(concept_from_row))
    }

    /// Exact, case-sensitive lookup by name.
    pub async fn get_concept_by_name(&self, name: &str) -> Result<Option<Concept>> {
        let row = sqlx::query_as::<_, ConceptRow>(&format!(
            "SELECT {CONCEPT_COLUMNS} FROM concepts WHERE name = ?1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(concept_from_row))
    }

    /// Return the concept with this exact name, creating it if absent. Never merges.
    #[instrument(skip(self))]
    pub async fn get_or_create_concept(&self, name: &str, concept_type: &str) -> Result<Resolved<Concept>> {
        if let Some(existing) = self.get_concept_by_name(name).await? {
            return Ok(Resolved { entity: existing, created: false });
        }
        let concept = self.insert_concept(name, &[], &[], concept_type, None).await?;
        Ok(Resolved { entity: concept, created: true })
    }

    /// Create a concept or merge synonyms/keywords into the existing one.
    ///
    /// Lists only grow; the row is written only when something new was added.
    /// Callers must serialize upserts of the same name.
    #[instrument(skip(self, synonyms, keywords, description))]
    pub async fn upsert_concept(
        &self,
        name: &str,
        synonyms: &[String],
        keywords: &[String],
        concept_type: &str,
        description: Option<&str>,
    ) -> Result<Resolved<Concept>> {
        let Some(mut existing) = self.get_concept_by_name(name).await? else {
            let concept_type = if concept_type.is_empty() { DEFAULT_CONCEPT_TYPE } else { concept_type };
            let concept = self
                .insert_concept(name, synonyms, keywords, concept_type, description)
                .await?;
            return Ok(Resolved { entity: concept, created: true });
        };

        let mut changed = merge_unique(&mut existing.synonyms, synonyms);
        changed |= merge_unique(&mut existing.keywords, keywords);
        if existing.description.is_none() {
            if let Some(d) = description.filter(|d| !d.is_empty()) {
                existing.description = Some(d.to_string());
                changed = true;
            }
        }

        if changed {
            debug!(concept = name, "merging concept lists");
            sqlx::query("UPDATE concepts SET synonyms = ?2, keywords = ?3, description = ?4 WHERE id = ?1")
                .bind(existing.id)
                .bind(serde_json::to_string(&existing.synonyms)?)
                .bind(serde_json::to_string(&existing.keywords)?)
                .bind(&existing.description)
                .execute(&self.pool)
                .await?;
        }

        Ok(Resolved { entity: existing, created: false })
    }

    async fn insert_concept(
        &self,
        name: &str,
        synonyms: &[String],
        keywords: &[String],
        concept_type: &str,
        description: Option<&str>,
    ) -> Result<Concept> {
        let synonyms = dedup(synonyms);
        let keywords = dedup(keywords);
        let now = now_ts();

        let mut tx = self.pool.begin().await?;
        let id = sqlx::query(
            "INSERT INTO concepts (name, name_key, description, synonyms, keywords, concept_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(name)
        .bind(name.to_lowercase())
        .bind(description)
        .bind(serde_json::to_string(&synonyms)?)
        .bind(serde_json::to_string(&keywords)?)
        .bind(concept_type)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for gram in trigrams(name) {
            sqlx::query("INSERT OR IGNORE INTO concept_trigrams (concept_id, trigram) VALUES (?1, ?2)")
                .bind(id)
                .bind(gram)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(Concept {
            id,
            name: name.to_string(),
            description: description.map(str::to_string),
            synonyms,
            keywords,
            concept_type: concept_type.to_string(),
            created_at: parse_ts(&now),
        })
    }

    // ---- Relations ----

    pub async fn get_relation(&self, id: i64) -> Result<Option<Relation>> {
        let row = sqlx::query_as::<_, RelationRow>(&format!(
            "SELECT {RELATION_COLUMNS} FROM relations WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(relation_from_row))
    }

    /// Exact, case-sensitive lookup by name.
    pub async fn get_relation_by_name(&self, name: &str) -> Result<Option<Relation>> {
        let row = sqlx::query_as::<_, RelationRow>(&format!(
            "SELECT {RELATION_COLUMNS} FROM relations WHERE name = ?1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(relation_from_row))
    }

    /// Return the relation with this exact name, creating it with `keywords` if absent.
    #[instrument(skip(self, keywords))]
    pub async fn get_or_create_relation(
        &self,
        name: &str,
        keywords: &[String],
        relation_type: &str,
    ) -> Result<Resolved<Relation>> {
        if let Some(existing) = self.get_relation_by_name(name).await? {
            return Ok(Resolved { entity: existing, created: false });
        }
        let relation = self.insert_relation(name, keywords, relation_type, None).await?;
        Ok(Resolved { entity: relation, created: true })
    }

    /// Create a relation or merge keywords into the existing one.
    #[instrument(skip(self, keywords, description))]
    pub async fn upsert_relation(
        &self,
        name: &str,
        keywords: &[String],
        relation_type: &str,
        description: Option<&str>,
    ) -> Result<Resolved<Relation>> {
        let Some(mut existing) = self.get_relation_by_name(name).await? else {
            let relation_type = if relation_type.is_empty() { DEFAULT_CONCEPT_TYPE } else { relation_type };
            let relation = self
                .insert_relation(name, keywords, relation_type, description)
                .await?;
            return Ok(Resolved { entity: relation, created: true });
        };

        let mut changed = merge_unique(&mut existing.keywords, keywords);
        if existing.description.is_none() {
            if let Some(d) = description.filter(|d| !d.is_empty()) {
                existing.description = Some(d.to_string());
                changed = true;
            }
        }

        if changed {
            sqlx::query("UPDATE relations SET keywords = ?2, description = ?3 WHERE id = ?1")
                .bind(existing.id)
                .bind(serde_json::to_string(&existing.keywords)?)
                .bind(&existing.description)
                .execute(&self.pool)
                .await?;
        }

        Ok(Resolved { entity: existing, created: false })
    }

    async fn insert_relation(
        &self,
        name: &str,
        keywords: &[String],
        relation_type: &str,
        description: Option<&str>,
    ) -> Result<Relation> {
        let keywords = dedup(keywords);
        let now = now_ts();

        let id = sqlx::query(
            "INSERT INTO relations (name, description, keywords, relation_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(name)
        .bind(description)
        .bind(serde_json::to_string(&keywords)?)
        .bind(relation_type)
        .bind(&now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Relation {
            id,
            name: name.to_string(),
            description: description.map(str::to_string),
            keywords,
            relation_type: relation_type.to_string(),
            created_at: parse_ts(&now),
        })
    }

    // ---- Triples ----

    /// Create a triple with no tfidf that is not blacklisted.
    #[instrument(skip(self, triple), fields(unit_id = triple.unit_id))]
    pub async fn create_triple(&self, triple: &NewTriple) -> Result<Triple> {
        let minimal = NewTriple {
            tfidf: None,
            is_blacklisted: false,
            ..triple.clone()
        };
        self.insert_triple(&minimal).await
    }

    /// Create a triple storing every supplied field.
    #[instrument(skip(self, triple), fields(unit_id = triple.unit_id))]
    pub async fn insert_triple(&self, triple: &NewTriple) -> Result<Triple> {
        let now = now_ts();

        let id = sqlx::query(
            "INSERT INTO triples (subject_id, relation_id, object_id, unit_id, doc_ref, confidence, tfidf, is_blacklisted, context, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(triple.subject_id)
        .bind(triple.relation_id)
        .bind(triple.object_id)
        .bind(triple.unit_id)
        .bind(&triple.doc_ref)
        .bind(triple.confidence as f64)
        .bind(triple.tfidf.map(|v| v as f64))
        .bind(triple.is_blacklisted)
        .bind(&triple.context)
        .bind(&now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Triple {
            id,
            subject_id: triple.subject_id,
            relation_id: triple.relation_id,
            object_id: triple.object_id,
            unit_id: triple.unit_id,
            doc_ref: triple.doc_ref.clone(),
            confidence: triple.confidence,
            tfidf: triple.tfidf,
            is_blacklisted: triple.is_blacklisted,
            context: triple.context.clone(),
            created_at: parse_ts(&now),
        })
    }

    pub async fn get_triple(&self, id: i64) -> Result<Option<Triple>> {
        let row = sqlx::query_as::<_, TripleRow>(&format!(
            "SELECT {TRIPLE_COLUMNS} FROM triples WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(triple_from_row))
    }

    /// Set the blacklist flag. Returns false if no such triple exists.
    #[instrument(skip(self))]
    pub async fn set_triple_blacklisted(&self, id: i64, blacklisted: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE triples SET is_blacklisted = ?2 WHERE id = ?1")
            .bind(id)
            .bind(blacklisted)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ---- Query surface ----

    /// Concepts matching `term`, scored exact > trigram > fuzzy.
    #[instrument(skip(self))]
    pub async fn find_concept_candidates(&self, term: &str) -> Result<Vec<QueryCandidate>> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return Ok(Vec::new());
        }

        // Anything with non-zero similarity shares a trigram; containment is covered by instr.
        let grams: Vec<String> = trigrams(&term).into_iter().collect();
        let mut sql = String::from("SELECT id, name FROM concepts WHERE instr(name_key, ?) > 0");
        if !grams.is_empty() {
            sql.push_str(" OR id IN (SELECT concept_id FROM concept_trigrams WHERE trigram IN (");
            sql.push_str(&placeholders(grams.len()));
            sql.push_str("))");
        }

        let mut query = sqlx::query_as::<_, (i64, String)>(&sql).bind(&term);
        for gram in &grams {
            query = query.bind(gram);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut candidates: Vec<QueryCandidate> = rows
            .into_iter()
            .filter_map(|(id, name)| {
                score_concept(&name, &term).map(|(score, match_kind)| QueryCandidate {
                    role: CandidateRole::Subject,
                    concept_id: Some(id),
                    relation_id: None,
                    name,
                    score,
                    match_kind,
                })
            })
            .collect();

        rank_candidates(&mut candidates, CONCEPT_CANDIDATE_LIMIT);
        Ok(candidates)
    }

    /// Relations matching `term`, scored exact > keyword > prefix > fuzzy.
    #[instrument(skip(self))]
    pub async fn find_relation_candidates(&self, term: &str) -> Result<Vec<QueryCandidate>> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, (i64, String, String)>("SELECT id, name, keywords FROM relations")
            .fetch_all(&self.pool)
            .await?;

        let mut candidates: Vec<QueryCandidate> = rows
            .into_iter()
            .filter_map(|(id, name, keywords)| {
                let keywords: Vec<String> = serde_json::from_str(&keywords).unwrap_or_default();
                score_relation(&name, &keywords, &term).map(|(score, match_kind)| QueryCandidate {
                    role: CandidateRole::Relation,
                    concept_id: None,
                    relation_id: Some(id),
                    name,
                    score,
                    match_kind,
                })
            })
            .collect();

        rank_candidates(&mut candidates, RELATION_CANDIDATE_LIMIT);
        Ok(candidates)
    }

    /// Non-blacklisted triples matching every non-empty role list of the star.
    ///
    /// At most [`STAR_TRIPLE_LIMIT`] rows, ordered by tfidf desc (nulls last),
    /// confidence desc, then newest first.
    #[instrument(skip(self, star))]
    pub async fn find_triples_by_star(&self, star: &QueryStar) -> Result<Vec<TripleView>> {
        let subjects = star.subject_ids();
        let relations = star.relation_ids();
        let objects = star.object_ids();

        let mut sql = String::from(
            "SELECT t.id, t.subject_id, t.relation_id, t.object_id, t.unit_id, t.doc_ref, t.confidence,
                    t.tfidf, t.is_blacklisted, t.context, t.created_at,
                    s.name AS subject_name, r.name AS relation_name, o.name AS object_name,
                    u.text AS unit_text, d.title AS document_title, d.id AS document_id
             FROM triples t
             JOIN concepts s ON s.id = t.subject_id
             JOIN relations r ON r.id = t.relation_id
             JOIN concepts o ON o.id = t.object_id
             JOIN units u ON u.id = t.unit_id
             JOIN documents d ON d.id = u.document_id
             WHERE t.is_blacklisted = 0",
        );
        for (column, ids) in [("t.subject_id", &subjects), ("t.relation_id", &relations), ("t.object_id", &objects)] {
            if !ids.is_empty() {
                sql.push_str(&format!(" AND {column} IN ({})", placeholders(ids.len())));
            }
        }
        sql.push_str(&format!(
            " ORDER BY t.tfidf IS NULL, t.tfidf DESC, t.confidence DESC, t.created_at DESC, t.id DESC LIMIT {STAR_TRIPLE_LIMIT}"
        ));

        let mut query = sqlx::query(&sql);
        for id in subjects.iter().chain(&relations).chain(&objects) {
            query = query.bind(*id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let views = rows.iter().map(triple_view_from_row).collect::<Result<Vec<_>>>()?;
        debug!(count = views.len(), "star retrieval");
        Ok(views)
    }

    /// Row counts per table.
    pub async fn stats(&self) -> Result<GraphStats> {
        let mut stats = GraphStats::default();
        for (table, slot) in [
            ("documents", &mut stats.documents),
            ("units", &mut stats.units),
            ("concepts", &mut stats.concepts),
            ("relations", &mut stats.relations),
            ("triples", &mut stats.triples),
        ] {
            *slot = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&self.pool)
                .await?;
        }
        Ok(stats)
    }
}

fn build_forest(parent: Option<i64>, by_parent: &mut HashMap<Option<i64>, Vec<Unit>>) -> Vec<UnitTree> {
    let Some(children) = by_parent.remove(&parent) else {
        return Vec::new();
    };
    children
        .into_iter()
        .map(|unit| {
            let children = build_forest(Some(unit.id), by_parent);
            UnitTree { unit, children }
        })
        .collect()
}

/// Append items not already present. Returns true if anything was added.
fn merge_unique(target: &mut Vec<String>, items: &[String]) -> bool {
    let mut changed = false;
    for item in items {
        if !target.contains(item) {
            target.push(item.clone());
            changed = true;
        }
    }
    changed
}

fn dedup(items: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(items.len());
    merge_unique(&mut out, items);
    out
}

fn normalize_number(number: Option<&str>) -> Option<&str> {
    number.map(str::trim).filter(|n| !n.is_empty())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn document_from_row(row: DocumentRow) -> Document {
    let (id, title, doc_type, number, year, authority, status, created_at, updated_at) = row;
    Document {
        id,
        title,
        doc_type,
        number,
        year,
        authority,
        status,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    }
}

fn unit_from_row(row: UnitRow) -> Unit {
    let (id, document_id, level, code, text, parent_id, order_index, created_at) = row;
    Unit {
        id,
        document_id,
        level,
        code,
        text,
        parent_id,
        order_index,
        created_at: parse_ts(&created_at),
    }
}

fn concept_from_row(row: ConceptRow) -> Concept {
    let (id, name, description, synonyms, keywords, concept_type, created_at) = row;
    Concept {
        id,
        name,
        description,
        synonyms: serde_json::from_str(&synonyms).unwrap_or_default(),
        keywords: serde_json::from_str(&keywords).unwrap_or_default(),
        concept_type,
        created_at: parse_ts(&created_at),
    }
}

fn relation_from_row(row: RelationRow) -> Relation {
    let (id, name, description, keywords, relation_type, created_at) = row;
    Relation {
        id,
        name,
        description,
        keywords: serde_json::from_str(&keywords).unwrap_or_default(),
        relation_type,
        created_at: parse_ts(&created_at),
    }
}

fn triple_from_row(row: TripleRow) -> Triple {
    let (id, subject_id, relation_id, object_id, unit_id, doc_ref, confidence, tfidf, is_blacklisted, context, created_at) =
        row;
    Triple {
        id,
        subject_id,
        relation_id,
        object_id,
        unit_id,
        doc_ref,
        confidence: confidence as f32,
        tfidf: tfidf.map(|v| v as f32),
        is_blacklisted,
        context,
        created_at: parse_ts(&created_at),
    }
}

fn triple_view_from_row(row: &SqliteRow) -> Result<TripleView> {
    let created_at: String = row.try_get("created_at")?;
    let confidence: f64 = row.try_get("confidence")?;
    let tfidf: Option<f64> = row.try_get("tfidf")?;

    Ok(TripleView {
        triple: Triple {
            id: row.try_get("id")?,
            subject_id: row.try_get("subject_id")?,
            relation_id: row.try_get("relation_id")?,
            object_id: row.try_get("object_id")?,
            unit_id: row.try_get("unit_id")?,
            doc_ref: row.try_get("doc_ref")?,
            confidence: confidence as f32,
            tfidf: tfidf.map(|v| v as f32),
            is_blacklisted: row.try_get("is_blacklisted")?,
            context: row.try_get("context")?,
            created_at: parse_ts(&created_at),
        },
        subject_name: row.try_get("subject_name")?,
        relation_name: row.try_get("relation_name")?,
        object_name: row.try_get("object_name")?,
        unit_text: row.try_get("unit_text")?,
        document_title: row.try_get("document_title")?,
        document_id: row.try_get("document_id")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MatchKind;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        GraphStore::init_schema(&pool).await.unwrap();
        pool
    }

    fn new_doc(title: &str, number: Option<&str>) -> NewDocument {
        NewDocument {
            title: title.to_string(),
            doc_type: "Law".to_string(),
            number: number.map(str::to_string),
            year: Some(2024),
            authority: None,
        }
    }

    async fn seed_unit(store: &GraphStore) -> Unit {
        let doc = store.create_document(&new_doc("Road Traffic Law", Some("23/2008"))).await.unwrap();
        store
            .create_unit(&NewUnit {
                document_id: doc.id,
                level: "article".to_string(),
                code: Some("Article 8".to_string()),
                text: "The driver must not run the red light.".to_string(),
                parent_id: None,
                order_index: 0,
            })
            .await
            .unwrap()
    }

    fn triple(s: i64, r: i64, o: i64, unit_id: i64, confidence: f32, tfidf: Option<f32>) -> NewTriple {
        NewTriple {
            subject_id: s,
            relation_id: r,
            object_id: o,
            unit_id,
            doc_ref: "Law 23/2008 2024 Article 8".to_string(),
            confidence,
            tfidf,
            is_blacklisted: false,
            context: None,
        }
    }

    fn star_of(subjects: &[i64], relations: &[i64], objects: &[i64]) -> QueryStar {
        let concept = |id: &i64, role| QueryCandidate {
            role,
            concept_id: Some(*id),
            relation_id: None,
            name: format!("c{id}"),
            score: 1.0,
            match_kind: MatchKind::Exact,
        };
        QueryStar::new(
            subjects.iter().map(|id| concept(id, CandidateRole::Subject)).collect(),
            relations
                .iter()
                .map(|id| QueryCandidate {
                    role: CandidateRole::Relation,
                    concept_id: None,
                    relation_id: Some(*id),
                    name: format!("r{id}"),
                    score: 1.0,
                    match_kind: MatchKind::Exact,
                })
                .collect(),
            objects.iter().map(|id| concept(id, CandidateRole::Object)).collect(),
        )
    }

    #[tokio::test]
    async fn test_document_dedup_is_case_insensitive() {
        let store = GraphStore::new(setup_test_db().await);
        let doc = store.create_document(&new_doc("Road Traffic Law", Some("23/2008/QH12"))).await.unwrap();
        assert_eq!(doc.status, "active");

        let by_title = store.find_document_by_metadata("road traffic LAW", None).await.unwrap();
        assert_eq!(by_title.map(|d| d.id), Some(doc.id));

        let by_number = store.find_document_by_metadata("Other", Some("23/2008/qh12")).await.unwrap();
        assert_eq!(by_number.map(|d| d.id), Some(doc.id));

        assert!(store.find_document_by_metadata("Other", Some("")).await.unwrap().is_none());
        assert!(store.find_document_by_metadata("Other", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_document() {
        let store = GraphStore::new(setup_test_db().await);
        let mut doc = store.create_document(&new_doc("Draft", None)).await.unwrap();
        doc.title = "Final".to_string();
        doc.status = "repealed".to_string();

        let updated = store.update_document(&doc).await.unwrap().unwrap();
        assert_eq!(updated.title, "Final");
        assert_eq!(updated.status, "repealed");
        assert!(store.find_document_by_metadata("final", None).await.unwrap().is_some());

        doc.id = 999;
        assert!(store.update_document(&doc).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unit_tree() {
        let store = GraphStore::new(setup_test_db().await);
        let doc = store.create_document(&new_doc("Decree", None)).await.unwrap();
        let unit = |code: &str, parent_id, order_index| NewUnit {
            document_id: doc.id,
            level: "article".to_string(),
            code: Some(code.to_string()),
            text: code.to_string(),
            parent_id,
            order_index,
        };

        let chapter = store.create_unit(&unit("Chapter I", None, 0)).await.unwrap();
        let second = store.create_unit(&unit("Article 2", Some(chapter.id), 2)).await.unwrap();
        store.create_unit(&unit("Article 1", Some(chapter.id), 1)).await.unwrap();
        store.create_unit(&unit("Clause 2.1", Some(second.id), 0)).await.unwrap();

        let tree = store.unit_tree(doc.id).await.unwrap();
        assert_eq!(tree.len(), 1);
        let codes: Vec<_> = tree[0].children.iter().map(|c| c.unit.code.clone().unwrap()).collect();
        assert_eq!(codes, vec!["Article 1", "Article 2"]);
        assert_eq!(tree[0].children[1].children.len(), 1);

        let (found, owner) = store.get_unit_with_document(second.id).await.unwrap().unwrap();
        assert_eq!(found.code.as_deref(), Some("Article 2"));
        assert_eq!(owner.id, doc.id);
    }

    #[tokio::test]
    async fn test_upsert_concept_is_idempotent() {
        let store = GraphStore::new(setup_test_db().await);
        let syn = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        let first = store
            .upsert_concept("driver", &syn(&["operator", "motorist"]), &[], "", None)
            .await
            .unwrap();
        assert!(first.created);
        assert_eq!(first.entity.concept_type, "general");

        for _ in 0..3 {
            let again = store
                .upsert_concept("driver", &syn(&["motorist", "chauffeur"]), &syn(&["vehicle"]), "entity", None)
                .await
                .unwrap();
            assert!(!again.created);
            assert_eq!(again.entity.id, first.entity.id);
        }

        let stored = store.get_concept_by_name("driver").await.unwrap().unwrap();
        assert_eq!(stored.synonyms, vec!["operator", "motorist", "chauffeur"]);
        assert_eq!(stored.keywords, vec!["vehicle"]);
        assert_eq!(stored.concept_type, "general");

        // Case-sensitive identity
        assert!(store.get_or_create_concept("Driver", "entity").await.unwrap().created);
        assert!(!store.get_or_create_concept("driver", "entity").await.unwrap().created);
    }

    #[tokio::test]
    async fn test_get_or_create_relation_seeds_keywords_once() {
        let store = GraphStore::new(setup_test_db().await);
        let kw = vec!["must not".to_string(), "cấm".to_string()];

        let created = store.get_or_create_relation("prohibition", &kw, "legal_rule").await.unwrap();
        assert!(created.created);
        assert_eq!(created.entity.keywords, kw);

        let again = store
            .get_or_create_relation("prohibition", &["forbidden".to_string()], "legal_rule")
            .await
            .unwrap();
        assert!(!again.created);
        assert_eq!(again.entity.keywords, kw);

        let merged = store
            .upsert_relation("prohibition", &["forbidden".to_string()], "", None)
            .await
            .unwrap();
        assert_eq!(merged.entity.keywords.len(), 3);
    }

    #[tokio::test]
    async fn test_find_concept_candidates() {
        let store = GraphStore::new(setup_test_db().await);
        for name in ["Helmet", "drivers", "motorbike helmet standards", "red light"] {
            store.get_or_create_concept(name, "entity").await.unwrap();
        }

        let helmet = store.find_concept_candidates("  HELMET ").await.unwrap();
        assert_eq!(helmet.len(), 2);
        assert_eq!(helmet[0].name, "Helmet");
        assert_eq!(helmet[0].match_kind, MatchKind::Exact);
        assert_eq!(helmet[1].match_kind, MatchKind::Fuzzy);

        let driver = store.find_concept_candidates("driver").await.unwrap();
        assert_eq!(driver.len(), 1);
        assert_eq!(driver[0].match_kind, MatchKind::Trigram);

        assert!(store.find_concept_candidates("tax").await.unwrap().is_empty());
        assert!(store.find_concept_candidates("   ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_concept_candidates_caps_at_limit() {
        let store = GraphStore::new(setup_test_db().await);
        for i in 0..25 {
            store.get_or_create_concept(&format!("vehicle class {i:02}"), "entity").await.unwrap();
        }
        let found = store.find_concept_candidates("vehicle").await.unwrap();
        assert_eq!(found.len(), CONCEPT_CANDIDATE_LIMIT);
        assert_eq!(found[0].name, "vehicle class 00");
    }

    #[tokio::test]
    async fn test_find_relation_candidates() {
        let store = GraphStore::new(setup_test_db().await);
        store
            .get_or_create_relation("prohibition", &["forbidden".to_string()], "legal_rule")
            .await
            .unwrap();
        store.get_or_create_relation("penalty", &[], "legal_rule").await.unwrap();

        let found = store.find_relation_candidates("Forbidden").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].match_kind, MatchKind::Keyword);
        assert_eq!(found[0].role, CandidateRole::Relation);

        let prefix = store.find_relation_candidates("pen").await.unwrap();
        assert_eq!(prefix[0].name, "penalty");
        assert_eq!(prefix[0].match_kind, MatchKind::Prefix);
    }

    #[tokio::test]
    async fn test_star_excludes_blacklisted_and_orders() {
        let store = GraphStore::new(setup_test_db().await);
        let unit = seed_unit(&store).await;
        let s = store.get_or_create_concept("driver", "entity").await.unwrap().entity.id;
        let o = store.get_or_create_concept("red light", "entity").await.unwrap().entity.id;
        let r = store.get_or_create_relation("prohibition", &[], "legal_rule").await.unwrap().entity.id;

        let low = store.insert_triple(&triple(s, r, o, unit.id, 0.9, Some(0.2))).await.unwrap();
        let high = store.insert_triple(&triple(s, r, o, unit.id, 0.5, Some(0.8))).await.unwrap();
        let untagged = store.create_triple(&triple(s, r, o, unit.id, 0.8, Some(0.9))).await.unwrap();
        assert_eq!(untagged.tfidf, None);
        let hidden = store.insert_triple(&triple(s, r, o, unit.id, 1.0, Some(1.0))).await.unwrap();
        assert!(store.set_triple_blacklisted(hidden.id, true).await.unwrap());
        assert!(!store.set_triple_blacklisted(9999, true).await.unwrap());

        let rows = store.find_triples_by_star(&star_of(&[s], &[r], &[])).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|v| v.triple.id).collect();
        assert_eq!(ids, vec![high.id, low.id, untagged.id]);
        assert_eq!(rows[0].subject_name, "driver");
        assert_eq!(rows[0].document_title, "Road Traffic Law");

        assert!(store.find_triples_by_star(&star_of(&[o], &[], &[])).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_star_caps_rows() {
        let store = GraphStore::new(setup_test_db().await);
        let unit = seed_unit(&store).await;
        let s = store.get_or_create_concept("driver", "entity").await.unwrap().entity.id;
        let o = store.get_or_create_concept("helmet", "entity").await.unwrap().entity.id;
        let r = store.get_or_create_relation("requirement", &[], "legal_rule").await.unwrap().entity.id;

        for i in 0..60 {
            let tfidf = if i % 3 == 0 { None } else { Some((i % 7) as f32 / 7.0) };
            store.insert_triple(&triple(s, r, o, unit.id, (i % 5) as f32 / 5.0, tfidf)).await.unwrap();
        }

        let rows = store.find_triples_by_star(&star_of(&[], &[r], &[o])).await.unwrap();
        assert_eq!(rows.len(), STAR_TRIPLE_LIMIT);
        for pair in rows.windows(2) {
            let (a, b) = (&pair[0].triple, &pair[1].triple);
            match (a.tfidf, b.tfidf) {
                (None, Some(_)) => panic!("null tfidf sorted before a value"),
                (Some(x), Some(y)) => assert!(x > y || (x == y && a.confidence >= b.confidence)),
                (None, None) => assert!(a.confidence >= b.confidence),
                (Some(_), None) => {}
            }
        }
    }

    #[tokio::test]
    async fn test_stats() {
        let store = GraphStore::new(setup_test_db().await);
        seed_unit(&store).await;
        store.get_or_create_concept("driver", "entity").await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(
            stats,
            GraphStats { documents: 1, units: 1, concepts: 1, relations: 0, triples: 0 }
        );
    }
}

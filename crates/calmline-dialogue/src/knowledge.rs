//! Practice knowledge base lookup.

use std::sync::Arc;

use calmline_db::DbPool;
use dashmap::DashMap;
use rusqlite::{params, Connection};

use crate::error::DialogueError;
use crate::text::{contains_phrase, normalize};

const KEYWORD_SCORE: i64 = 2;
const QUESTION_SCORE: i64 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeEntry {
    pub id: i64,
    pub question: String,
    pub keywords: Vec<String>,
    pub answer: String,
    pub category: String,
    pub priority: i64,
}

impl KnowledgeEntry {
    /// Relevance of this entry to an already-normalized utterance.
    ///
    /// Priority only breaks ties between entries that matched something.
    pub fn score(&self, normalized: &str) -> i64 {
        let mut score = self
            .keywords
            .iter()
            .filter(|keyword| contains_phrase(normalized, keyword))
            .count() as i64
            * KEYWORD_SCORE;

        let question = normalize(&self.question);
        if !question.is_empty()
            && !normalized.is_empty()
            && (question.contains(normalized) || normalized.contains(&question))
        {
            score += QUESTION_SCORE;
        }

        if score > 0 {
            score += self.priority;
        }
        score
    }
}

/// Loads active entries for a tenant in insertion order.
pub fn load_entries(conn: &Connection, tenant_id: &str) -> Result<Vec<KnowledgeEntry>, DialogueError> {
    let mut stmt = conn.prepare(
        "SELECT id, question, keywords, answer, category, priority
         FROM knowledge_entries
         WHERE tenant_id = ?1 AND active = 1
         ORDER BY id",
    )?;
    let rows = stmt.query_map(params![tenant_id], |row| {
        let keywords: String = row.get(2)?;
        Ok(KnowledgeEntry {
            id: row.get(0)?,
            question: row.get(1)?,
            keywords: keywords
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect(),
            answer: row.get(3)?,
            category: row.get(4)?,
            priority: row.get(5)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Best-scoring entry; the earliest entry wins a tie.
pub fn best_match<'a>(entries: &'a [KnowledgeEntry], text: &str) -> Option<&'a KnowledgeEntry> {
    let normalized = normalize(text);
    let mut best: Option<(&KnowledgeEntry, i64)> = None;
    for entry in entries {
        let score = entry.score(&normalized);
        if score <= 0 {
            continue;
        }
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((entry, score));
        }
    }
    best.map(|(entry, _)| entry)
}

/// Per-tenant knowledge entries, loaded on first use.
#[derive(Clone)]
pub struct KnowledgeCache {
    pool: DbPool,
    entries: Arc<DashMap<String, Arc<Vec<KnowledgeEntry>>>>,
}

impl KnowledgeCache {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            entries: Arc::new(DashMap::new()),
        }
    }

    pub async fn entries(&self, tenant_id: &str) -> Result<Arc<Vec<KnowledgeEntry>>, DialogueError> {
        if let Some(cached) = self.entries.get(tenant_id) {
            return Ok(Arc::clone(cached.value()));
        }

        let pool = self.pool.clone();
        let tenant = tenant_id.to_string();
        let loaded = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            load_entries(&conn, &tenant)
        })
        .await??;

        tracing::debug!(tenant_id, count = loaded.len(), "knowledge entries loaded");
        let loaded = Arc::new(loaded);
        Ok(self
            .entries
            .entry(tenant_id.to_string())
            .or_insert(loaded)
            .clone())
    }

    /// Answer for the best-matching entry, if any scored above zero.
    pub async fn lookup(&self, tenant_id: &str, text: &str) -> Result<Option<String>, DialogueError> {
        let entries = self.entries(tenant_id).await?;
        Ok(best_match(&entries, text).map(|entry| entry.answer.clone()))
    }

    pub fn invalidate(&self, tenant_id: &str) {
        self.entries.remove(tenant_id);
    }
}

//! Memory CRUD, soft delete and keyword search. Every query is scoped to a
//! tenant (`project_ref`).

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::*;
use crate::util::title_from;

/// Escape `\`, `%` and `_` for a `LIKE .. ESCAPE '\'` pattern.
fn like_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl MemoryDB {
    pub fn insert(&self, input: MemoryInput) -> Result<Memory, GhostError> {
        validate_input(&input)?;

        let now = now_ms();
        let id = Uuid::new_v4().to_string();
        let memory_type = match input.memory_type.as_deref() {
            Some(t) => t.parse()?,
            None => MemoryType::Knowledge,
        };
        let title = match input.title.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => title_from(&input.content, 80),
        };
        let tags = input.tags.unwrap_or_default();
        let tags_json = serde_json::to_string(&tags).unwrap_or_else(|_| "[]".into());
        let relevance = input.relevance_score.unwrap_or(0.5);
        let project_ref = input.project_ref.unwrap_or_else(|| DEFAULT_PROJECT.into());
        let topic_id = input.topic_id.filter(|t| !t.is_empty());

        if let Some(ref tid) = topic_id {
            if self.get_topic(tid, &project_ref)?.is_none() {
                return Err(GhostError::Validation(format!("topic {tid} does not exist")));
            }
        }

        self.conn()?.execute(
            "INSERT INTO memories \
             (id, title, content, summary, memory_type, tags, relevance_score, \
              access_count, project_ref, topic_id, status, created_at, updated_at, last_accessed) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,0,?8,?9,'active',?10,?10,?10)",
            params![
                id,
                title,
                input.content,
                input.summary,
                memory_type.as_str(),
                tags_json,
                relevance,
                project_ref,
                topic_id,
                now,
            ],
        )?;
        tracing::debug!(%id, %project_ref, memory_type = memory_type.as_str(), "memory stored");

        Ok(Memory {
            id,
            title,
            content: input.content,
            summary: input.summary,
            memory_type,
            tags,
            relevance_score: relevance,
            access_count: 0,
            project_ref,
            topic_id,
            status: MemoryStatus::Active,
            created_at: now,
            updated_at: now,
            last_accessed: now,
            deleted_at: None,
            has_embedding: false,
        })
    }

    /// Fetch a memory in the tenant, including soft-deleted ones.
    pub fn get(&self, id: &str, project_ref: &str) -> Result<Option<Memory>, GhostError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {MEMORY_COLS} FROM memories WHERE id = ?1 AND project_ref = ?2");
        let mem = conn
            .query_row(&sql, params![id, project_ref], row_to_memory)
            .optional()?;
        Ok(mem)
    }

    /// Bump access_count and last_accessed on each id. Ids that don't exist
    /// or are deleted are skipped.
    pub fn touch(&self, ids: &[String]) -> Result<(), GhostError> {
        if ids.is_empty() {
            return Ok(());
        }
        let now = now_ms();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE memories SET access_count = access_count + 1, last_accessed = ?1 \
                 WHERE id = ?2 AND status = 'active'",
            )?;
            for id in ids {
                stmt.execute(params![now, id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Newest first. Soft-deleted rows only appear with `include_deleted`.
    pub fn list_filtered(&self, project_ref: &str, filter: &ListFilter) -> Result<Vec<Memory>, GhostError> {
        let conn = self.conn()?;

        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(project_ref.to_string())];
        let mut clauses = vec!["project_ref = ?1".to_string()];

        if !filter.include_deleted {
            clauses.push("status = 'active'".into());
        }
        if let Some(t) = filter.memory_type {
            params_vec.push(Box::new(t.as_str()));
            clauses.push(format!("memory_type = ?{}", params_vec.len()));
        }
        if let Some(ref tag) = filter.tag {
            params_vec.push(Box::new(tag.clone()));
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM json_each(memories.tags) WHERE json_each.value = ?{})",
                params_vec.len()
            ));
        }
        if let Some(ref topic) = filter.topic_id {
            params_vec.push(Box::new(topic.clone()));
            clauses.push(format!("topic_id = ?{}", params_vec.len()));
        }

        params_vec.push(Box::new(filter.limit.max(1) as i64));
        let limit_idx = params_vec.len();
        params_vec.push(Box::new(filter.offset as i64));
        let offset_idx = params_vec.len();

        let sql = format!(
            "SELECT {MEMORY_COLS} FROM memories WHERE {} \
             ORDER BY created_at DESC LIMIT ?{limit_idx} OFFSET ?{offset_idx}",
            clauses.join(" AND ")
        );

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), row_to_memory)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Apply a partial update to an active memory. Returns `None` when the
    /// memory doesn't exist (or is deleted) in the tenant. A content change
    /// drops the stored embedding; the caller re-embeds.
    pub fn update(&self, id: &str, project_ref: &str, patch: &MemoryPatch) -> Result<Option<Memory>, GhostError> {
        match self.get(id, project_ref)? {
            Some(m) if m.status == MemoryStatus::Active => {}
            _ => return Ok(None),
        }

        if let Some(ref c) = patch.content {
            validate_content(c)?;
        }
        if let Some(ref t) = patch.title {
            if t.trim().is_empty() || t.chars().count() > MAX_TITLE_LEN {
                return Err(GhostError::Validation(format!("title must be 1-{MAX_TITLE_LEN} chars")));
            }
        }
        if let Some(ref s) = patch.summary {
            if s.chars().count() > MAX_SUMMARY_LEN {
                return Err(GhostError::Validation(format!("summary too long (max {MAX_SUMMARY_LEN})")));
            }
        }
        let memory_type = patch.memory_type.as_deref().map(str::parse::<MemoryType>).transpose()?;
        if let Some(ref tags) = patch.tags {
            validate_tags(tags)?;
        }
        if let Some(r) = patch.relevance_score {
            if !(0.0..=1.0).contains(&r) {
                return Err(GhostError::Validation("relevance_score must be within 0.0-1.0".into()));
            }
        }
        if let Some(ref tid) = patch.topic_id {
            if !tid.is_empty() && self.get_topic(tid, project_ref)?.is_none() {
                return Err(GhostError::Validation(format!("topic {tid} does not exist")));
            }
        }

        let mut set_clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref t) = patch.title {
            set_clauses.push("title=?");
            values.push(Box::new(t.trim().to_string()));
        }
        if let Some(ref c) = patch.content {
            set_clauses.push("content=?");
            values.push(Box::new(c.clone()));
            set_clauses.push("embedding=NULL");
        }
        if let Some(ref s) = patch.summary {
            set_clauses.push("summary=?");
            values.push(Box::new(s.clone()));
        }
        if let Some(t) = memory_type {
            set_clauses.push("memory_type=?");
            values.push(Box::new(t.as_str()));
        }
        if let Some(ref tags) = patch.tags {
            set_clauses.push("tags=?");
            values.push(Box::new(serde_json::to_string(tags).unwrap_or_else(|_| "[]".into())));
        }
        if let Some(r) = patch.relevance_score {
            set_clauses.push("relevance_score=?");
            values.push(Box::new(r));
        }
        if let Some(ref tid) = patch.topic_id {
            set_clauses.push("topic_id=?");
            values.push(Box::new(if tid.is_empty() { None } else { Some(tid.clone()) }));
        }

        if !set_clauses.is_empty() {
            set_clauses.push("updated_at=?");
            values.push(Box::new(now_ms()));
            values.push(Box::new(id.to_string()));
            let sql = format!("UPDATE memories SET {} WHERE id=?", set_clauses.join(", "));
            let params: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|v| v.as_ref()).collect();
            self.conn()?.execute(&sql, params.as_slice())?;
        }

        if patch.content.is_some() {
            self.drop_from_index(id);
        } else if let Some(t) = memory_type {
            self.retag_index(id, t);
        }

        self.get(id, project_ref)
    }

    /// Mark a memory deleted. Returns false when it doesn't exist or is
    /// already deleted.
    pub fn soft_delete(&self, id: &str, project_ref: &str) -> Result<bool, GhostError> {
        let now = now_ms();
        let n = self.conn()?.execute(
            "UPDATE memories SET status = 'deleted', deleted_at = ?1, updated_at = ?1 \
             WHERE id = ?2 AND project_ref = ?3 AND status = 'active'",
            params![now, id, project_ref],
        )?;
        if n > 0 {
            self.drop_from_index(id);
        }
        Ok(n > 0)
    }

    /// Undo a soft delete. The embedding (if any) goes back into the index.
    pub fn restore(&self, id: &str, project_ref: &str) -> Result<Option<Memory>, GhostError> {
        let n = self.conn()?.execute(
            "UPDATE memories SET status = 'active', deleted_at = NULL, updated_at = ?1 \
             WHERE id = ?2 AND project_ref = ?3 AND status = 'deleted'",
            params![now_ms(), id, project_ref],
        )?;
        if n == 0 {
            return Ok(None);
        }
        self.reindex_one(id)?;
        self.get(id, project_ref)
    }

    /// Hard-delete memories soft-deleted before `cutoff_ms`. Returns the
    /// number of rows removed.
    pub fn purge_deleted(&self, cutoff_ms: i64) -> Result<usize, GhostError> {
        let n = self.conn()?.execute(
            "DELETE FROM memories WHERE status = 'deleted' AND deleted_at IS NOT NULL AND deleted_at < ?1",
            params![cutoff_ms],
        )?;
        Ok(n)
    }

    /// Memory counts for the tenant, grouped by type.
    pub fn type_stats(&self, project_ref: &str) -> Result<TypeStats, GhostError> {
        let conn = self.conn()?;
        let mut stats = TypeStats::default();
        for t in MemoryType::ALL {
            stats.by_type.insert(t.as_str().to_string(), 0);
        }

        let mut stmt = conn.prepare(
            "SELECT memory_type, COUNT(*) FROM memories \
             WHERE project_ref = ?1 AND status = 'active' GROUP BY memory_type",
        )?;
        let rows = stmt.query_map([project_ref], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (t, n) = row?;
            stats.total += n as usize;
            *stats.by_type.entry(t).or_insert(0) += n as usize;
        }

        let (deleted, embedded): (i64, i64) = conn.query_row(
            "SELECT \
               COALESCE(SUM(CASE WHEN status = 'deleted' THEN 1 ELSE 0 END), 0), \
               COALESCE(SUM(CASE WHEN status = 'active' AND embedding IS NOT NULL THEN 1 ELSE 0 END), 0) \
             FROM memories WHERE project_ref = ?1",
            [project_ref],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        stats.deleted = deleted as usize;
        stats.embedded = embedded as usize;
        Ok(stats)
    }

    /// Substring search over title, content and summary. Used when no
    /// embedding is available. Every query word must appear somewhere in the
    /// row; the similarity field is the fraction of words found in the title.
    pub fn search_keyword(
        &self,
        query: &str,
        k: usize,
        project_ref: &str,
        memory_type: Option<MemoryType>,
    ) -> Result<Vec<MemoryMatch>, GhostError> {
        let words: Vec<String> = query
            .split_whitespace()
            .map(str::to_lowercase)
            .take(8)
            .collect();
        if words.is_empty() {
            return Err(GhostError::EmptyQuery);
        }

        let conn = self.conn()?;
        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(project_ref.to_string())];
        let mut clauses = vec!["project_ref = ?1".to_string(), "status = 'active'".to_string()];
        for w in &words {
            params_vec.push(Box::new(format!("%{}%", like_escape(w))));
            let i = params_vec.len();
            clauses.push(format!(
                "(LOWER(title) LIKE ?{i} ESCAPE '\\' OR LOWER(content) LIKE ?{i} ESCAPE '\\' \
                 OR LOWER(COALESCE(summary, '')) LIKE ?{i} ESCAPE '\\')"
            ));
        }
        if let Some(t) = memory_type {
            params_vec.push(Box::new(t.as_str()));
            clauses.push(format!("memory_type = ?{}", params_vec.len()));
        }
        params_vec.push(Box::new(k.max(1) as i64));
        let sql = format!(
            "SELECT {MEMORY_COLS} FROM memories WHERE {} \
             ORDER BY relevance_score DESC, last_accessed DESC LIMIT ?{}",
            clauses.join(" AND "),
            params_vec.len()
        );

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), row_to_memory)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|memory| {
                let title = memory.title.to_lowercase();
                let hits = words.iter().filter(|w| title.contains(w.as_str())).count();
                let similarity = hits as f64 / words.len() as f64;
                MemoryMatch { memory, similarity }
            })
            .collect())
    }
}

//! In-memory vector index and similarity search.

use rusqlite::{params, OptionalExtension};

use super::*;

impl MemoryDB {
    /// Load every active embedding into the in-memory index.
    pub(super) fn load_vec_index(&self) {
        let Ok(conn) = self.conn() else { return };
        let Ok(mut stmt) = conn.prepare(
            "SELECT id, project_ref, memory_type, embedding FROM memories \
             WHERE embedding IS NOT NULL AND status = 'active'",
        ) else {
            return;
        };

        let entries: Vec<(String, IndexedVec)> = stmt
            .query_map([], row_to_indexed)
            .map(|iter| iter.filter_map(|r| r.ok()).collect())
            .unwrap_or_default();

        if let Ok(mut idx) = self.vec_index.write() {
            idx.clear();
            let count = entries.len();
            idx.extend(entries);
            tracing::debug!(count, "loaded vector index");
        }
    }

    pub(super) fn drop_from_index(&self, id: &str) {
        if let Ok(mut idx) = self.vec_index.write() {
            idx.remove(id);
        }
    }

    pub(super) fn retag_index(&self, id: &str, memory_type: MemoryType) {
        if let Ok(mut idx) = self.vec_index.write() {
            if let Some(entry) = idx.get_mut(id) {
                entry.memory_type = memory_type;
            }
        }
    }

    /// Re-read one row and put it back in the index if it is active and
    /// embedded.
    pub(super) fn reindex_one(&self, id: &str) -> Result<(), GhostError> {
        let entry = self
            .conn()?
            .query_row(
                "SELECT id, project_ref, memory_type, embedding FROM memories \
                 WHERE id = ?1 AND embedding IS NOT NULL AND status = 'active'",
                [id],
                row_to_indexed,
            )
            .optional()?;
        if let (Some((id, v)), Ok(mut idx)) = (entry, self.vec_index.write()) {
            idx.insert(id, v);
        }
        Ok(())
    }

    /// Store an embedding for a memory and index it. Deleted memories keep
    /// the blob but stay out of the index until restored.
    pub fn set_embedding(&self, id: &str, embedding: &[f32]) -> Result<(), GhostError> {
        let bytes = crate::ai::embedding_to_bytes(embedding);
        let n = self.conn()?.execute(
            "UPDATE memories SET embedding = ?1 WHERE id = ?2",
            params![bytes, id],
        )?;
        if n == 0 {
            return Err(GhostError::NotFound);
        }
        self.reindex_one(id)
    }

    /// Number of vectors currently indexed.
    pub fn indexed_count(&self) -> usize {
        self.vec_index.read().map(|idx| idx.len()).unwrap_or(0)
    }

    /// Active memories in the tenant whose cosine similarity to `query_emb`
    /// is at least `threshold`, best first, at most `k`.
    pub fn match_memories(
        &self,
        query_emb: &[f32],
        threshold: f64,
        k: usize,
        project_ref: &str,
        memory_type: Option<MemoryType>,
    ) -> Result<Vec<MemoryMatch>, GhostError> {
        if k == 0 || query_emb.is_empty() {
            return Ok(vec![]);
        }

        let mut scored: Vec<(String, f64)> = {
            let idx = self
                .vec_index
                .read()
                .map_err(|_| GhostError::Internal("vector index lock poisoned".into()))?;
            idx.iter()
                .filter(|(_, v)| v.project_ref == project_ref)
                .filter(|(_, v)| memory_type.is_none_or(|t| v.memory_type == t))
                .map(|(id, v)| (id.clone(), crate::ai::cosine_similarity(query_emb, &v.embedding)))
                .filter(|(_, sim)| *sim >= threshold)
                .collect()
        };
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let mut out = Vec::with_capacity(scored.len());
        for (id, similarity) in scored {
            // Rows can vanish between the index read and here (purge).
            if let Some(memory) = self.get(&id, project_ref)? {
                if memory.status == MemoryStatus::Active {
                    out.push(MemoryMatch { memory, similarity });
                }
            }
        }
        Ok(out)
    }

    /// Active memories that still need an embedding, oldest first.
    pub fn list_missing_embeddings(&self, limit: usize) -> Result<Vec<(String, String)>, GhostError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, content FROM memories \
             WHERE embedding IS NULL AND status = 'active' ORDER BY created_at LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let title: String = row.get(1)?;
                let content: String = row.get(2)?;
                Ok((row.get::<_, String>(0)?, embed_text(&title, &content)))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Text fed to the embedding model for a memory.
pub fn embed_text(title: &str, content: &str) -> String {
    if title.is_empty() || content.starts_with(title.trim_end_matches('…')) {
        content.to_string()
    } else {
        format!("{title}\n\n{content}")
    }
}

fn row_to_indexed(row: &rusqlite::Row) -> rusqlite::Result<(String, IndexedVec)> {
    let id: String = row.get(0)?;
    let type_str: String = row.get(2)?;
    let blob: Vec<u8> = row.get(3)?;
    Ok((
        id,
        IndexedVec {
            project_ref: row.get(1)?,
            memory_type: type_str.parse().unwrap_or(MemoryType::Knowledge),
            embedding: crate::ai::bytes_to_embedding(&blob),
        },
    ))
}

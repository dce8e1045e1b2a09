//! Topic tree used to categorize memories.

use std::collections::{HashMap, HashSet};

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::*;

const MAX_TOPIC_NAME_LEN: usize = 80;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub project_ref: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicInput {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

/// `parent_id: Some("")` moves the topic to the root.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopicPatch {
    pub name: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopicNode {
    #[serde(flatten)]
    pub topic: Topic,
    pub memory_count: usize,
    pub children: Vec<TopicNode>,
}

fn validate_name(name: &str) -> Result<String, GhostError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_TOPIC_NAME_LEN {
        return Err(GhostError::Validation(format!(
            "topic name must be 1-{MAX_TOPIC_NAME_LEN} chars"
        )));
    }
    Ok(name.to_string())
}

fn row_to_topic(row: &rusqlite::Row) -> rusqlite::Result<Topic> {
    Ok(Topic {
        id: row.get("id")?,
        name: row.get("name")?,
        color: row.get("color")?,
        icon: row.get("icon")?,
        parent_id: row.get("parent_id")?,
        project_ref: row.get("project_ref")?,
        created_at: row.get("created_at")?,
    })
}

impl MemoryDB {
    pub fn create_topic(&self, project_ref: &str, input: TopicInput) -> Result<Topic, GhostError> {
        let name = validate_name(&input.name)?;
        let parent_id = input.parent_id.filter(|p| !p.is_empty());
        if let Some(ref pid) = parent_id {
            if self.get_topic(pid, project_ref)?.is_none() {
                return Err(GhostError::Validation(format!("parent topic {pid} does not exist")));
            }
        }

        let topic = Topic {
            id: Uuid::new_v4().to_string(),
            name,
            color: input.color,
            icon: input.icon,
            parent_id,
            project_ref: project_ref.to_string(),
            created_at: now_ms(),
        };
        self.conn()?.execute(
            "INSERT INTO memory_topics (id, name, color, icon, parent_id, project_ref, created_at) \
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                topic.id,
                topic.name,
                topic.color,
                topic.icon,
                topic.parent_id,
                topic.project_ref,
                topic.created_at
            ],
        )?;
        Ok(topic)
    }

    pub fn get_topic(&self, id: &str, project_ref: &str) -> Result<Option<Topic>, GhostError> {
        let topic = self
            .conn()?
            .query_row(
                "SELECT * FROM memory_topics WHERE id = ?1 AND project_ref = ?2",
                params![id, project_ref],
                row_to_topic,
            )
            .optional()?;
        Ok(topic)
    }

    pub fn list_topics(&self, project_ref: &str) -> Result<Vec<Topic>, GhostError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM memory_topics WHERE project_ref = ?1 ORDER BY name")?;
        let rows = stmt
            .query_map([project_ref], row_to_topic)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Nested view of the tenant's topics with active-memory counts.
    /// Topics whose parent is missing are shown at the root.
    pub fn topic_tree(&self, project_ref: &str) -> Result<Vec<TopicNode>, GhostError> {
        let topics = self.list_topics(project_ref)?;

        let counts: HashMap<String, usize> = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT topic_id, COUNT(*) FROM memories \
                 WHERE project_ref = ?1 AND status = 'active' AND topic_id IS NOT NULL GROUP BY topic_id",
            )?;
            let rows = stmt
                .query_map([project_ref], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as usize)))?
                .collect::<Result<HashMap<_, _>, _>>()?;
            rows
        };

        let ids: HashSet<&str> = topics.iter().map(|t| t.id.as_str()).collect();
        let mut children: HashMap<Option<String>, Vec<Topic>> = HashMap::new();
        for t in &topics {
            let parent = t.parent_id.clone().filter(|p| ids.contains(p.as_str()));
            children.entry(parent).or_default().push(t.clone());
        }

        fn build(
            parent: Option<String>,
            children: &mut HashMap<Option<String>, Vec<Topic>>,
            counts: &HashMap<String, usize>,
        ) -> Vec<TopicNode> {
            let Some(list) = children.remove(&parent) else { return vec![] };
            list.into_iter()
                .map(|topic| {
                    let kids = build(Some(topic.id.clone()), children, counts);
                    TopicNode {
                        memory_count: counts.get(&topic.id).copied().unwrap_or(0),
                        topic,
                        children: kids,
                    }
                })
                .collect()
        }

        Ok(build(None, &mut children, &counts))
    }

    /// Returns `None` when the topic doesn't exist in the tenant. Moving a
    /// topic under itself or one of its descendants is rejected.
    pub fn update_topic(&self, id: &str, project_ref: &str, patch: &TopicPatch) -> Result<Option<Topic>, GhostError> {
        let Some(mut topic) = self.get_topic(id, project_ref)? else {
            return Ok(None);
        };

        if let Some(ref name) = patch.name {
            topic.name = validate_name(name)?;
        }
        if let Some(ref c) = patch.color {
            topic.color = Some(c.clone()).filter(|c| !c.is_empty());
        }
        if let Some(ref i) = patch.icon {
            topic.icon = Some(i.clone()).filter(|i| !i.is_empty());
        }
        if let Some(ref pid) = patch.parent_id {
            if pid.is_empty() {
                topic.parent_id = None;
            } else {
                self.check_no_cycle(id, pid, project_ref)?;
                topic.parent_id = Some(pid.clone());
            }
        }

        self.conn()?.execute(
            "UPDATE memory_topics SET name = ?1, color = ?2, icon = ?3, parent_id = ?4 WHERE id = ?5",
            params![topic.name, topic.color, topic.icon, topic.parent_id, id],
        )?;
        Ok(Some(topic))
    }

    fn check_no_cycle(&self, id: &str, new_parent: &str, project_ref: &str) -> Result<(), GhostError> {
        let mut seen = HashSet::new();
        let mut cursor = Some(new_parent.to_string());
        while let Some(cur) = cursor {
            if cur == id {
                return Err(GhostError::Validation("topic cannot be its own ancestor".into()));
            }
            if !seen.insert(cur.clone()) {
                break;
            }
            let Some(t) = self.get_topic(&cur, project_ref)? else {
                if cur == new_parent {
                    return Err(GhostError::Validation(format!("parent topic {cur} does not exist")));
                }
                break;
            };
            cursor = t.parent_id;
        }
        Ok(())
    }

    /// Delete a topic. Its children move up to its parent and its memories
    /// lose their topic.
    pub fn delete_topic(&self, id: &str, project_ref: &str) -> Result<bool, GhostError> {
        let Some(topic) = self.get_topic(id, project_ref)? else {
            return Ok(false);
        };

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE memory_topics SET parent_id = ?1 WHERE parent_id = ?2 AND project_ref = ?3",
            params![topic.parent_id, id, project_ref],
        )?;
        tx.execute(
            "UPDATE memories SET topic_id = NULL WHERE topic_id = ?1 AND project_ref = ?2",
            params![id, project_ref],
        )?;
        tx.execute("DELETE FROM memory_topics WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(true)
    }
}

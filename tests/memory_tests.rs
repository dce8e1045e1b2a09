use ghost_protocol::db::*;
use ghost_protocol::error::GhostError;
use ghost_protocol::providers::ChatMessage;

fn test_db() -> MemoryDB {
    MemoryDB::open(":memory:").expect("in-memory db")
}

#[test]
fn insert_defaults() {
    let db = test_db();
    let mem = db.insert(MemoryInput::new("  first line\nsecond line")).unwrap();
    assert_eq!(mem.title, "first line");
    assert_eq!(mem.memory_type, MemoryType::Knowledge);
    assert_eq!(mem.project_ref, DEFAULT_PROJECT);
    assert_eq!(mem.status, MemoryStatus::Active);
    assert!((mem.relevance_score - 0.5).abs() < f64::EPSILON);
    assert!(!mem.has_embedding);

    let got = db.get(&mem.id, DEFAULT_PROJECT).unwrap().unwrap();
    assert_eq!(got.content, "  first line\nsecond line");
    assert!(db.get(&mem.id, "elsewhere").unwrap().is_none());
}

#[test]
fn insert_validation() {
    let db = test_db();
    assert!(matches!(db.insert(MemoryInput::new("")), Err(ghost_protocol::error::GhostError::EmptyContent)));
    assert!(matches!(
        db.insert(MemoryInput::new("x".repeat(40_000))),
        Err(ghost_protocol::error::GhostError::ContentTooLong)
    ));
    let too_many: Vec<String> = (0..21).map(|i| format!("t{i}")).collect();
    assert!(db.insert(MemoryInput::new("x").tags(too_many)).is_err());
    assert!(db.insert(MemoryInput::new("x").project("has space")).is_err());
    assert!(db.insert(MemoryInput::new("x").relevance(-0.1)).is_err());
}

#[test]
fn content_update_drops_embedding() {
    let db = test_db();
    let mem = db.insert(MemoryInput::new("original")).unwrap();
    db.set_embedding(&mem.id, &[1.0, 0.0]).unwrap();
    assert_eq!(db.indexed_count(), 1);

    let patch = MemoryPatch { tags: Some(vec!["kept".into()]), ..Default::default() };
    let m = db.update(&mem.id, DEFAULT_PROJECT, &patch).unwrap().unwrap();
    assert!(m.has_embedding);
    assert_eq!(m.tags, vec!["kept"]);

    let patch = MemoryPatch { content: Some("rewritten".into()), ..Default::default() };
    let m = db.update(&mem.id, DEFAULT_PROJECT, &patch).unwrap().unwrap();
    assert_eq!(m.content, "rewritten");
    assert!(!m.has_embedding);
    assert_eq!(db.indexed_count(), 0);
    assert_eq!(db.list_missing_embeddings(10).unwrap().len(), 1);
}

#[test]
fn update_missing_or_deleted_is_none() {
    let db = test_db();
    let patch = MemoryPatch { title: Some("t".into()), ..Default::default() };
    assert!(db.update("nope", DEFAULT_PROJECT, &patch).unwrap().is_none());

    let mem = db.insert(MemoryInput::new("x")).unwrap();
    assert!(db.soft_delete(&mem.id, DEFAULT_PROJECT).unwrap());
    assert!(db.update(&mem.id, DEFAULT_PROJECT, &patch).unwrap().is_none());
}

#[test]
fn match_respects_tenant_type_and_threshold() {
    let db = test_db();
    let a = db.insert(MemoryInput::new("alpha").memory_type(MemoryType::Project)).unwrap();
    let b = db.insert(MemoryInput::new("beta").memory_type(MemoryType::Context)).unwrap();
    let c = db.insert(MemoryInput::new("gamma").project("other")).unwrap();
    db.set_embedding(&a.id, &[1.0, 0.0]).unwrap();
    db.set_embedding(&b.id, &[0.8, 0.6]).unwrap();
    db.set_embedding(&c.id, &[1.0, 0.0]).unwrap();

    let hits = db.match_memories(&[1.0, 0.0], 0.7, 10, DEFAULT_PROJECT, None).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].memory.id, a.id);
    assert!((hits[1].similarity - 0.8).abs() < 1e-6);

    let hits = db.match_memories(&[1.0, 0.0], 0.9, 10, DEFAULT_PROJECT, None).unwrap();
    assert_eq!(hits.len(), 1);

    let hits = db.match_memories(&[1.0, 0.0], 0.0, 10, DEFAULT_PROJECT, Some(MemoryType::Context)).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].memory.id, b.id);

    let hits = db.match_memories(&[1.0, 0.0], 0.7, 1, DEFAULT_PROJECT, None).unwrap();
    assert_eq!(hits.len(), 1);
}

#[test]
fn deleted_memories_leave_the_index_until_restored() {
    let db = test_db();
    let m = db.insert(MemoryInput::new("x")).unwrap();
    db.set_embedding(&m.id, &[0.0, 1.0]).unwrap();
    db.soft_delete(&m.id, DEFAULT_PROJECT).unwrap();
    assert!(db.match_memories(&[0.0, 1.0], 0.5, 5, DEFAULT_PROJECT, None).unwrap().is_empty());
    assert!(db.restore(&m.id, DEFAULT_PROJECT).unwrap().is_some());
    assert_eq!(db.match_memories(&[0.0, 1.0], 0.5, 5, DEFAULT_PROJECT, None).unwrap().len(), 1);
    // restoring an active memory is a no-op
    assert!(db.restore(&m.id, DEFAULT_PROJECT).unwrap().is_none());
}

#[test]
fn index_reloads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ghost.db");
    let path = path.to_str().unwrap();
    let id = {
        let db = MemoryDB::open(path).unwrap();
        let m = db.insert(MemoryInput::new("persisted")).unwrap();
        db.set_embedding(&m.id, &[0.3, 0.4]).unwrap();
        m.id
    };
    let db = MemoryDB::open(path).unwrap();
    assert_eq!(db.indexed_count(), 1);
    let hits = db.match_memories(&[0.3, 0.4], 0.99, 5, DEFAULT_PROJECT, None).unwrap();
    assert_eq!(hits[0].memory.id, id);
    assert!(hits[0].memory.has_embedding);
}

#[test]
fn purge_only_old_deleted_rows() {
    let db = test_db();
    let keep = db.insert(MemoryInput::new("keep")).unwrap();
    let gone = db.insert(MemoryInput::new("gone")).unwrap();
    db.soft_delete(&gone.id, DEFAULT_PROJECT).unwrap();

    assert_eq!(db.purge_deleted(0).unwrap(), 0);
    assert_eq!(db.purge_deleted(now_ms() + 1).unwrap(), 1);
    assert!(db.get(&gone.id, DEFAULT_PROJECT).unwrap().is_none());
    assert!(db.get(&keep.id, DEFAULT_PROJECT).unwrap().is_some());
}

#[test]
fn keyword_search_requires_every_word() {
    let db = test_db();
    db.insert(MemoryInput::new("The quarterly budget review is on Monday").title("Budget review")).unwrap();
    db.insert(MemoryInput::new("Budget for snacks").title("Snacks")).unwrap();

    let hits = db.search_keyword("budget monday", 10, DEFAULT_PROJECT, None).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].memory.title, "Budget review");
    assert!((hits[0].similarity - 0.5).abs() < f64::EPSILON);

    assert_eq!(db.search_keyword("budget", 10, DEFAULT_PROJECT, None).unwrap().len(), 2);
    assert!(db.search_keyword("100%_", 10, DEFAULT_PROJECT, None).unwrap().is_empty());
    assert!(db.search_keyword("   ", 10, DEFAULT_PROJECT, None).is_err());
}

#[test]
fn keyword_search_treats_wildcards_literally() {
    let db = test_db();
    db.insert(MemoryInput::new("Uptime was 100% last month").title("Uptime")).unwrap();
    db.insert(MemoryInput::new("We shipped 1000 units").title("Units")).unwrap();
    db.insert(MemoryInput::new("config key max_retries").title("Retries")).unwrap();
    db.insert(MemoryInput::new("config key maxXretries").title("Other")).unwrap();

    let hits = db.search_keyword("100%", 10, DEFAULT_PROJECT, None).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].memory.title, "Uptime");

    let hits = db.search_keyword("max_retries", 10, DEFAULT_PROJECT, None).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].memory.title, "Retries");

    assert_eq!(db.search_keyword("%", 10, DEFAULT_PROJECT, None).unwrap().len(), 1);
    assert!(db.search_keyword("\\", 10, DEFAULT_PROJECT, None).unwrap().is_empty());
}

#[test]
fn tag_filter_matches_whole_tags() {
    let db = test_db();
    db.insert(MemoryInput::new("one").tags(vec!["a_b".into()])).unwrap();
    db.insert(MemoryInput::new("two").tags(vec!["axb".into()])).unwrap();
    db.insert(MemoryInput::new("three").tags(vec!["a_b_c".into(), "x".into()])).unwrap();

    let filter = |tag: &str| ListFilter { tag: Some(tag.into()), limit: 50, ..Default::default() };
    let got = db.list_filtered(DEFAULT_PROJECT, &filter("a_b")).unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].content, "one");

    assert_eq!(db.list_filtered(DEFAULT_PROJECT, &filter("a%")).unwrap().len(), 0);
    assert_eq!(db.list_filtered(DEFAULT_PROJECT, &filter("x")).unwrap().len(), 1);
}

#[test]
fn touch_bumps_access() {
    let db = test_db();
    let m = db.insert(MemoryInput::new("x")).unwrap();
    db.touch(&[m.id.clone(), m.id.clone(), "missing".into()]).unwrap();
    let got = db.get(&m.id, DEFAULT_PROJECT).unwrap().unwrap();
    assert_eq!(got.access_count, 2);
    assert!(got.last_accessed >= m.last_accessed);
}

#[test]
fn sessions_upsert_keeps_created_at() {
    let db = test_db();
    let s1 = db
        .upsert_session("s", "u", DEFAULT_PROJECT, &[ChatMessage::user("hi")], Some("openai:gpt-4o-mini"))
        .unwrap();
    let s2 = db
        .upsert_session(
            "s",
            "u",
            DEFAULT_PROJECT,
            &[ChatMessage::user("hi"), ChatMessage::assistant("hello")],
            None,
        )
        .unwrap();
    assert_eq!(s2.created_at, s1.created_at);
    assert_eq!(s2.messages.len(), 2);
    // a missing model keeps the previous one
    assert_eq!(s2.model.as_deref(), Some("openai:gpt-4o-mini"));

    assert!(db.upsert_session("s", "intruder", DEFAULT_PROJECT, &[], None).is_err());
    assert!(db.upsert_session("", "u", DEFAULT_PROJECT, &[], None).is_err());
    assert_eq!(db.list_sessions("u", DEFAULT_PROJECT, 10).unwrap().len(), 1);
    assert!(db.delete_session("s", "u", DEFAULT_PROJECT).unwrap());
    assert!(!db.delete_session("s", "u", DEFAULT_PROJECT).unwrap());
}

#[test]
fn profile_bootstrap_and_status() {
    let db = test_db();
    let admin = db.register_profile("first", Some("a@x.io")).unwrap();
    assert!(admin.is_admin() && admin.is_approved());
    let user = db.register_profile("second", None).unwrap();
    assert_eq!(user.role, Role::User);
    assert_eq!(user.status, ApprovalStatus::Pending);

    // re-registering doesn't reset anything
    db.set_profile_status("second", Some(ApprovalStatus::Approved), None).unwrap();
    let again = db.register_profile("second", None).unwrap();
    assert!(again.is_approved());

    let promoted = db.set_profile_status("second", None, Some(Role::Admin)).unwrap().unwrap();
    assert!(promoted.is_admin());
    assert!(db.set_profile_status("ghost", Some(ApprovalStatus::Rejected), None).unwrap().is_none());
    assert_eq!(db.list_profiles(Some(ApprovalStatus::Pending)).unwrap().len(), 0);
    assert_eq!(db.list_profiles(None).unwrap().len(), 2);
}

#[test]
fn topics_tree_hides_other_tenants() {
    let db = test_db();
    let root = db
        .create_topic(DEFAULT_PROJECT, TopicInput { name: "Root".into(), color: None, icon: None, parent_id: None })
        .unwrap();
    db.create_topic("other", TopicInput { name: "Elsewhere".into(), color: None, icon: None, parent_id: None })
        .unwrap();
    // a parent from another tenant isn't visible
    assert!(db
        .create_topic("other", TopicInput { name: "Child".into(), color: None, icon: None, parent_id: Some(root.id.clone()) })
        .is_err());

    let tree = db.topic_tree(DEFAULT_PROJECT).unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].topic.name, "Root");

    let moved = db
        .update_topic(&root.id, DEFAULT_PROJECT, &TopicPatch { name: Some("Renamed".into()), ..Default::default() })
        .unwrap()
        .unwrap();
    assert_eq!(moved.name, "Renamed");
    assert!(db
        .update_topic(&root.id, DEFAULT_PROJECT, &TopicPatch { parent_id: Some(root.id.clone()), ..Default::default() })
        .is_err());
}

fn topic(db: &MemoryDB, name: &str, parent: Option<&str>) -> Topic {
    db.create_topic(
        DEFAULT_PROJECT,
        TopicInput { name: name.into(), color: None, icon: None, parent_id: parent.map(String::from) },
    )
    .unwrap()
}

fn reparent(db: &MemoryDB, id: &str, parent: &str) -> Result<Option<Topic>, GhostError> {
    db.update_topic(id, DEFAULT_PROJECT, &TopicPatch { parent_id: Some(parent.into()), ..Default::default() })
}

#[test]
fn topic_moves_that_form_cycles_are_rejected() {
    let db = test_db();
    let root = topic(&db, "Root", None);
    let child = topic(&db, "Child", Some(&root.id));
    let grandchild = topic(&db, "Grandchild", Some(&child.id));

    for (id, parent) in [
        (&root.id, &root.id),
        (&root.id, &grandchild.id),
        (&child.id, &grandchild.id),
    ] {
        let err = reparent(&db, id, parent).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
    let err = reparent(&db, &child.id, "no-such-topic").unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    // nothing moved
    let tree = db.topic_tree(DEFAULT_PROJECT).unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].topic.id, root.id);
    assert_eq!(tree[0].children[0].topic.id, child.id);
    assert_eq!(tree[0].children[0].children[0].topic.id, grandchild.id);
    assert_eq!(db.get_topic(&root.id, DEFAULT_PROJECT).unwrap().unwrap().parent_id, None);

    // a legal move still works
    let moved = reparent(&db, &grandchild.id, &root.id).unwrap().unwrap();
    assert_eq!(moved.parent_id.as_deref(), Some(root.id.as_str()));
}

#[test]
fn claiming_another_users_session_is_forbidden() {
    let db = test_db();
    assert!(db.claim_session("s1", "alice", DEFAULT_PROJECT).unwrap().is_none());
    db.upsert_session("s1", "alice", DEFAULT_PROJECT, &[ChatMessage::user("hi")], None).unwrap();

    assert_eq!(db.claim_session("s1", "alice", DEFAULT_PROJECT).unwrap().unwrap().messages.len(), 1);
    assert_eq!(db.claim_session("s1", "bob", DEFAULT_PROJECT).unwrap_err().code(), "FORBIDDEN");
    assert_eq!(db.claim_session("s1", "alice", "other").unwrap_err().code(), "FORBIDDEN");
}

#[test]
fn tenant_stats_aggregate() {
    let db = test_db();
    db.insert(MemoryInput::new("a").relevance(0.2)).unwrap();
    db.insert(MemoryInput::new("b").relevance(0.4)).unwrap();
    db.upsert_session("s", "u", DEFAULT_PROJECT, &[], None).unwrap();
    let stats = db.tenant_stats(DEFAULT_PROJECT).unwrap();
    assert_eq!(stats.memories.total, 2);
    assert_eq!(stats.sessions, 1);
    assert!((stats.avg_relevance - 0.3).abs() < 1e-9);
    assert!(stats.last_memory_at.is_some());
}

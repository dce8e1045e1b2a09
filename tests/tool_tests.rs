use ghost_protocol::ai::EmbedConfig;
use ghost_protocol::db::{MemoryDB, DEFAULT_PROJECT};
use ghost_protocol::tools::{self, ClickUpConfig, PicaosConfig, TelegramConfig, ToolsConfig};
use ghost_protocol::AppState;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn state(tools: ToolsConfig) -> AppState {
    AppState::new(MemoryDB::open(":memory:").unwrap()).with_tools(tools)
}

#[tokio::test]
async fn clickup_create_task_uses_default_list() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/list/L42/task"))
        .and(header("authorization", "pk_token"))
        .and(body_json(json!({"name": "Write report", "priority": 2})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "t1", "name": "Write report", "url": "https://app.clickup.com/t/t1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let st = state(ToolsConfig {
        clickup: Some(ClickUpConfig { url: server.uri(), token: "pk_token".into(), default_list: Some("L42".into()) }),
        ..Default::default()
    });
    let out = tools::dispatch(&st, DEFAULT_PROJECT, "clickup_create_task", json!({"name": "Write report", "priority": 2}))
        .await
        .unwrap();
    assert_eq!(out["id"], "t1");
    assert_eq!(out["list_id"], "L42");
}

#[tokio::test]
async fn clickup_needs_a_list() {
    let st = state(ToolsConfig {
        clickup: Some(ClickUpConfig { url: "http://127.0.0.1:9".into(), token: "t".into(), default_list: None }),
        ..Default::default()
    });
    let err = tools::dispatch(&st, DEFAULT_PROJECT, "clickup_list_tasks", json!({})).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn clickup_list_tasks_summarizes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/list/L7/task"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tasks": [
                {"id": "a", "name": "One", "status": {"status": "open"}, "url": "u1", "extra": 1},
                {"id": "b", "name": "Two", "status": {"status": "done"}, "url": "u2"}
            ]
        })))
        .mount(&server)
        .await;
    let st = state(ToolsConfig {
        clickup: Some(ClickUpConfig { url: server.uri(), token: "t".into(), default_list: None }),
        ..Default::default()
    });
    let out = tools::dispatch(&st, DEFAULT_PROJECT, "clickup_list_tasks", json!({"list_id": "L7"})).await.unwrap();
    assert_eq!(out["count"], 2);
    assert_eq!(out["tasks"][1]["status"], "done");
    assert!(out["tasks"][0].get("extra").is_none());
}

#[tokio::test]
async fn telegram_send_and_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botBOT123/sendMessage"))
        .and(body_json(json!({"chat_id": "555", "text": "ping"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {"message_id": 9}})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/botBOT123/sendMessage"))
        .and(body_json(json!({"chat_id": "0", "text": "ping"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": false, "description": "chat not found"})))
        .mount(&server)
        .await;

    let st = state(ToolsConfig {
        telegram: Some(TelegramConfig { url: server.uri(), bot_token: "BOT123".into(), default_chat: Some("555".into()) }),
        ..Default::default()
    });
    let out = tools::dispatch(&st, DEFAULT_PROJECT, "telegram_send_message", json!({"text": "ping"})).await.unwrap();
    assert_eq!(out["sent"], true);
    assert_eq!(out["message_id"], 9);

    let err = tools::dispatch(&st, DEFAULT_PROJECT, "telegram_send_message", json!({"text": "ping", "chat_id": 0}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TOOL_EXECUTION_FAILED");
    assert!(err.to_string().contains("chat not found"));
}

#[tokio::test]
async fn zapier_posts_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/catch/1/abc"))
        .and(body_json(json!({"event": "lead", "score": 3})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
        .expect(1)
        .mount(&server)
        .await;
    let st = state(ToolsConfig {
        zapier_webhook: Some(format!("{}/hooks/catch/1/abc", server.uri())),
        ..Default::default()
    });
    let out = tools::dispatch(&st, DEFAULT_PROJECT, "zapier_trigger", json!({"payload": {"event": "lead", "score": 3}}))
        .await
        .unwrap();
    assert_eq!(out["triggered"], true);
}

#[tokio::test]
async fn zapier_http_error_is_tool_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(410).set_body_string("hook disabled"))
        .mount(&server)
        .await;
    let st = state(ToolsConfig { zapier_webhook: Some(server.uri()), ..Default::default() });
    let err = tools::dispatch(&st, DEFAULT_PROJECT, "zapier_trigger", json!({"payload": {}})).await.unwrap_err();
    assert_eq!(err.code(), "TOOL_EXECUTION_FAILED");
    assert!(err.to_string().contains("410"));
}

#[tokio::test]
async fn picaos_sends_secret_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .and(header("x-pica-secret", "pica-key"))
        .and(body_json(json!({"action": "gmail.send", "params": {"to": "a@b.c"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "run-1"})))
        .mount(&server)
        .await;
    let st = state(ToolsConfig {
        picaos: Some(PicaosConfig { url: server.uri(), key: "pica-key".into() }),
        ..Default::default()
    });
    let out = tools::dispatch(
        &st,
        DEFAULT_PROJECT,
        "picaos_execute",
        json!({"action": "gmail.send", "params": {"to": "a@b.c"}}),
    )
    .await
    .unwrap();
    assert_eq!(out["id"], "run-1");
}

#[tokio::test]
async fn save_then_search_in_tenant() {
    let st = state(ToolsConfig::default());
    let saved = tools::dispatch(
        &st,
        "team-a",
        "save_memory",
        json!({"title": "Standup", "content": "Standup moved to 9:30", "tags": ["meetings"]}),
    )
    .await
    .unwrap();
    assert_eq!(saved["embedded"], false);

    let found = tools::dispatch(&st, "team-a", "search_memories", json!({"query": "standup"})).await.unwrap();
    assert_eq!(found["count"], 1);
    assert_eq!(found["results"][0]["title"], "Standup");

    let other = tools::dispatch(&st, "team-b", "search_memories", json!({"query": "standup"})).await.unwrap();
    assert_eq!(other["count"], 0);
}

#[tokio::test]
async fn saved_memory_is_embedded_without_touching_query_cache() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"embedding": [0.1, 0.2, 0.3]}]})))
        .expect(1)
        .mount(&server)
        .await;
    let st = state(ToolsConfig::default()).with_embed(EmbedConfig {
        url: format!("{}/v1/embeddings", server.uri()),
        key: String::new(),
        model: "embed-test".into(),
    });

    let saved = tools::dispatch(
        &st,
        DEFAULT_PROJECT,
        "save_memory",
        json!({"title": "Long note", "content": "x".repeat(20_000)}),
    )
    .await
    .unwrap();
    assert_eq!(saved["embedded"], true);

    let mem = st.db.get(saved["id"].as_str().unwrap(), DEFAULT_PROJECT).unwrap().unwrap();
    assert!(mem.has_embedding);
    let (cached, _, _, _) = st.embed_cache.stats();
    assert_eq!(cached, 0);
}

//! The demonstration bot wired into `courier poll` and `courier webhook`.
//!
//! `/start` greets, `/count` bumps a per-chat counter kept in the session
//! store, `/reset` clears it, callback queries are echoed back, and anything
//! else is logged and ignored.

use {
    courier_routing::{Context, Error, Result, Router, handler_fn},
    courier_sessions::{SessionMiddleware, session_mut},
    futures::future::BoxFuture,
    serde::{Deserialize, Serialize},
    serde_json::json,
    tracing::info,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatState {
    pub count: u64,
}

pub fn demo_router(sessions: SessionMiddleware<ChatState>) -> Router {
    // Only the counter routes pay for a session load and save.
    let counter = Router::builder()
        .layer(sessions)
        .command("count", handler_fn(count))
        .command("reset", handler_fn(reset))
        .build();

    Router::builder()
        .command("start", handler_fn(start))
        .nest([], counter)
        .callback_query([], handler_fn(echo_callback))
        .any(handler_fn(log_unhandled))
        .build()
}

async fn reply(cx: &Context, text: &str) -> Result<()> {
    let chat = cx
        .chat()
        .ok_or_else(|| Error::message("update has no chat to reply to"))?;
    cx.call("sendMessage", json!({ "chat_id": chat.id, "text": text }))
        .await?;
    Ok(())
}

fn start(cx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let name = cx
            .sender()
            .map(|u| u.first_name.clone())
            .unwrap_or_else(|| "there".into());
        reply(
            cx,
            &format!("Hello {name}! Send /count to bump the counter, /reset to clear it."),
        )
        .await
    })
}

fn count(cx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let count = {
            let session = session_mut::<ChatState>(cx)
                .ok_or_else(|| Error::message("session not loaded"))?;
            session.state_mut().count += 1;
            session.state().count
        };
        reply(cx, &format!("count: {count}")).await
    })
}

fn reset(cx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        session_mut::<ChatState>(cx)
            .ok_or_else(|| Error::message("session not loaded"))?
            .reset();
        reply(cx, "counter cleared").await
    })
}

fn echo_callback(cx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let Some(query) = cx.callback_query() else {
            return Ok(());
        };
        let params = json!({
            "callback_query_id": query.id,
            "text": query.data.as_deref().unwrap_or_default(),
        });
        cx.call("answerCallbackQuery", params).await?;
        Ok(())
    })
}

fn log_unhandled(cx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        info!(
            update_id = cx.update_id(),
            kind = ?cx.tag(),
            origin = ?cx.origin(),
            "update ignored"
        );
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use {
        super::*,
        async_trait::async_trait,
        courier_common::{ApiClient, Update},
        courier_sessions::MemoryStore,
        serde_json::Value,
    };

    #[derive(Default)]
    struct RecordingClient {
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl RecordingClient {
        fn texts(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter_map(|(_, params)| params["text"].as_str().map(String::from))
                .collect()
        }
    }

    #[async_trait]
    impl ApiClient for RecordingClient {
        async fn call(&self, method: &str, params: Value) -> courier_common::Result<Value> {
            self.calls.lock().unwrap().push((method.to_string(), params));
            Ok(Value::Bool(true))
        }
    }

    fn text_update(id: i64, chat_id: i64, text: &str) -> Update {
        serde_json::from_value(json!({
            "update_id": id,
            "message": {
                "message_id": id,
                "date": 0,
                "chat": {"id": chat_id, "type": "private"},
                "from": {"id": chat_id, "is_bot": false, "first_name": "Ada"},
                "text": text
            }
        }))
        .unwrap()
    }

    async fn send(router: &Router, client: &Arc<RecordingClient>, update: Update) {
        let client: Arc<dyn ApiClient> = client.clone();
        let mut cx = Context::new(update, client);
        router.dispatch(&mut cx).await.unwrap();
    }

    fn router() -> Router {
        demo_router(SessionMiddleware::new(Arc::new(MemoryStore::new())))
    }

    #[tokio::test]
    async fn start_greets_by_name() {
        let client = Arc::new(RecordingClient::default());
        send(&router(), &client, text_update(1, 42, "/start")).await;
        let texts = client.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("Hello Ada!"), "{}", texts[0]);
    }

    #[tokio::test]
    async fn counter_is_per_chat_and_resets() {
        let router = router();
        let client = Arc::new(RecordingClient::default());

        send(&router, &client, text_update(1, 42, "/count")).await;
        send(&router, &client, text_update(2, 42, "/count")).await;
        send(&router, &client, text_update(3, 99, "/count")).await;
        send(&router, &client, text_update(4, 42, "/reset")).await;
        send(&router, &client, text_update(5, 42, "/count")).await;

        assert_eq!(client.texts(), [
            "count: 1",
            "count: 2",
            "count: 1",
            "counter cleared",
            "count: 1"
        ]);
    }

    #[tokio::test]
    async fn callback_data_is_echoed() {
        let client = Arc::new(RecordingClient::default());
        let update: Update = serde_json::from_value(json!({
            "update_id": 7,
            "callback_query": {
                "id": "cb-7",
                "from": {"id": 1, "is_bot": false, "first_name": "Ada"},
                "chat_instance": "ci",
                "data": "pressed"
            }
        }))
        .unwrap();

        send(&router(), &client, update).await;

        let calls = client.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "answerCallbackQuery");
        assert_eq!(calls[0].1["callback_query_id"], "cb-7");
        assert_eq!(calls[0].1["text"], "pressed");
    }

    #[tokio::test]
    async fn other_text_is_ignored() {
        let client = Arc::new(RecordingClient::default());
        send(&router(), &client, text_update(1, 42, "hello")).await;
        assert!(client.calls.lock().unwrap().is_empty());
    }
}

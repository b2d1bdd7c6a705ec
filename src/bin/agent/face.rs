use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use cua_agent::AgentEvent;
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

const FIRST_PORT: u16 = 3000;
const LAST_PORT: u16 = 3009;

fn to_sse_event(event: &AgentEvent) -> Event {
    let event_name = event.name();
    Event::default()
        .event(event_name)
        .json_data(event)
        .unwrap_or_else(|_| Event::default().event(event_name).data("{}"))
}

#[derive(Clone)]
pub struct AppState {
    pub cmd_tx: mpsc::Sender<String>,
    pub event_tx: broadcast::Sender<AgentEvent>,
}

#[derive(Deserialize)]
struct CommandPayload {
    command: String,
}

/// Serve the control page on the first free localhost port. Returns the
/// command receiver and the event sender the agent publishes on.
pub async fn start_server() -> Result<(mpsc::Receiver<String>, broadcast::Sender<AgentEvent>)> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<String>(1);
    let (event_tx, _) = broadcast::channel::<AgentEvent>(64);

    let state = Arc::new(AppState {
        cmd_tx,
        event_tx: event_tx.clone(),
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/command", post(command_handler))
        .route("/events", get(sse_handler))
        .route(
            "/favicon.ico",
            get(|| async { axum::http::StatusCode::NO_CONTENT }),
        )
        .with_state(state);

    let mut bound = None;
    for port in FIRST_PORT..=LAST_PORT {
        if let Ok(listener) = tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
            bound = Some((listener, port));
            break;
        }
    }
    let (listener, port) = bound.with_context(|| {
        format!("no free port in {FIRST_PORT}-{LAST_PORT}; is another agent running?")
    })?;

    tracing::info!("[Web] UI running at http://localhost:{}", port);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "[Web] server stopped");
        }
    });

    Ok((cmd_rx, event_tx))
}

async fn index_handler() -> Html<&'static str> {
    tracing::debug!("[Web] GET /");
    Html(INDEX_HTML)
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CommandPayload>,
) -> &'static str {
    tracing::info!(command = %payload.command, "[Web] POST /command");
    if state.cmd_tx.send(payload.command).await.is_err() {
        return "agent stopped";
    }
    "ok"
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Some(Ok::<_, Infallible>(to_sse_event(&event))),
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Computer-Use Agent</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #0b0d12;
    color: #dde1ea;
    font-family: system-ui, -apple-system, 'Segoe UI', sans-serif;
    height: 100vh;
    display: flex;
    flex-direction: column;
  }
  header {
    padding: 16px 24px;
    border-bottom: 1px solid #1c2030;
    display: flex;
    align-items: center;
    gap: 10px;
  }
  header h1 { font-size: 18px; font-weight: 600; color: #fff; }
  header a { margin-left: auto; color: #7c8cf8; font-size: 13px; }
  .dot { width: 8px; height: 8px; border-radius: 50%; background: #22c55e; }
  .dot.busy { background: #f59e0b; }
  .panes { flex: 1; display: flex; min-height: 0; }
  .live { flex: 3; border-right: 1px solid #1c2030; display: flex; }
  .live iframe { flex: 1; border: 0; background: #000; }
  .live .empty { margin: auto; color: #555b6e; font-size: 14px; }
  .side { flex: 2; display: flex; flex-direction: column; padding: 16px; gap: 12px; min-width: 320px; }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 6px; }
  .entry { padding: 8px 12px; border-radius: 6px; font-size: 13px; line-height: 1.45; word-break: break-word; }
  .entry.user { background: #171b2b; border-left: 3px solid #6366f1; }
  .entry.action { background: #10131b; border-left: 3px solid #3b82f6; font-family: ui-monospace, monospace; font-size: 12px; }
  .entry.reply { background: #10131b; border-left: 3px solid #a78bfa; }
  .entry.thinking { background: #10131b; border-left: 3px solid #f59e0b; color: #fcd34d; }
  .entry.error { background: #1b0c0c; border-left: 3px solid #ef4444; color: #fca5a5; }
  .entry.done { background: #0c1b10; border-left: 3px solid #22c55e; color: #86efac; }
  .input-area { display: flex; gap: 8px; }
  #cmd {
    flex: 1; background: #10131b; border: 1px solid #23283a; border-radius: 6px;
    padding: 10px 12px; color: #fff; font-size: 15px; outline: none;
  }
  #cmd:focus { border-color: #6366f1; }
  #cmd:disabled, button:disabled { opacity: 0.5; }
  button {
    background: #6366f1; color: #fff; border: none; border-radius: 6px;
    padding: 10px 18px; font-size: 14px; font-weight: 600; cursor: pointer;
  }
</style>
</head>
<body>
<header>
  <div class="dot" id="status-dot"></div>
  <h1>Computer-Use Agent</h1>
  <a id="live-link" target="_blank" hidden>open live view</a>
</header>
<div class="panes">
  <div class="live" id="live"><div class="empty">Live view appears once an instance is running.</div></div>
  <div class="side">
    <div id="log"></div>
    <div class="input-area">
      <input id="cmd" type="text" placeholder="What should the agent do?" autofocus>
      <button id="send" onclick="send()">Run</button>
    </div>
  </div>
</div>
<script>
  const log = document.getElementById('log');
  const cmd = document.getElementById('cmd');
  const sendBtn = document.getElementById('send');
  const dot = document.getElementById('status-dot');
  let busy = false;

  const esc = s => String(s).replace(/&/g, '&amp;').replace(/</g, '&lt;');

  function addEntry(cls, html) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.innerHTML = html;
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  }

  function setBusy(b) {
    busy = b;
    cmd.disabled = b;
    sendBtn.disabled = b;
    dot.className = b ? 'dot busy' : 'dot';
    if (!b) cmd.focus();
  }

  async function send() {
    const text = cmd.value.trim();
    if (!text || busy) return;
    cmd.value = '';
    addEntry('user', '<strong>You:</strong> ' + esc(text));
    setBusy(true);
    await fetch('/command', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({command: text}),
    });
  }

  cmd.addEventListener('keydown', e => { if (e.key === 'Enter') send(); });

  const es = new EventSource('/events');
  const on = (name, fn) => es.addEventListener(name, e => fn(JSON.parse(e.data)));

  on('live_view', d => {
    const live = document.getElementById('live');
    live.innerHTML = '';
    const frame = document.createElement('iframe');
    frame.src = d.url;
    live.appendChild(frame);
    const link = document.getElementById('live-link');
    link.href = d.url;
    link.hidden = false;
  });
  on('thinking', () => addEntry('thinking', 'Thinking...'));
  on('model_reply', d => addEntry('reply', esc(d.text)));
  on('action', d => addEntry('action', esc(d.description)));
  on('action_incomplete', d => addEntry('error', '<strong>Action failed:</strong> ' + esc(d.message)));
  on('task_complete', d => { addEntry('done', '<strong>Done:</strong> ' + esc(d.summary)); setBusy(false); });
  on('task_error', d => { addEntry('error', '<strong>Task failed:</strong> ' + esc(d.message)); setBusy(false); });
  on('ready', () => setBusy(false));

  addEntry('done', 'Agent ready. Type a task to begin.');
</script>
</body>
</html>
"##;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_event_has_a_page_listener() {
        let events = [
            AgentEvent::LiveView { url: "u".into() },
            AgentEvent::Thinking,
            AgentEvent::ModelReply { text: "t".into() },
            AgentEvent::Action {
                call_id: "c".into(),
                description: "d".into(),
            },
            AgentEvent::ActionIncomplete {
                call_id: "c".into(),
                message: "m".into(),
            },
            AgentEvent::TaskComplete { summary: "s".into() },
            AgentEvent::TaskError { message: "m".into() },
            AgentEvent::Ready,
        ];
        for event in events {
            assert!(
                INDEX_HTML.contains(&format!("on('{}'", event.name())),
                "no listener for {}",
                event.name()
            );
        }
    }
}

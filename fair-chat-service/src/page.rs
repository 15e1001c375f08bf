//! Server-rendered chat page.
//!
//! The page works as a plain HTML form; the inline script upgrades "Send" to a
//! streamed request that fills the in-progress region fragment by fragment and
//! reloads once the answer has been recorded.

use fair_chat::{ChatMessage, Role, SessionState};
use pulldown_cmark::{CowStr, Event, Parser, Tag, html};

pub const PAGE_TITLE: &str = "Secumetrix-Powered Chatbot";

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; max-width: 820px; margin: 2rem auto; padding: 0 1rem; color: #1f2933; }
h1 { font-size: 1.9rem; }
.message { margin-bottom: 0.9rem; line-height: 1.55; }
.message .label { font-weight: 700; }
.message .content > :first-child { display: inline; }
.message .content p { margin: 0.3rem 0; }
#in-progress .content { white-space: pre-wrap; }
form { display: flex; flex-wrap: wrap; gap: 0.5rem; align-items: center; }
form label { width: 100%; }
form input[name="text"] { flex: 1 1 60%; padding: 0.5rem; }
form button { padding: 0.5rem 1rem; }
"#;

const SCRIPT: &str = r#"
(function () {
  const root = document.querySelector('main[data-session-id]');
  const form = document.getElementById('chat-form');
  if (!root || !form || !window.fetch || !window.TextDecoder) return;
  const sessionId = root.dataset.sessionId;
  const log = document.getElementById('messages');
  const progress = document.getElementById('in-progress');
  const progressText = progress.querySelector('.content');

  function appendUserMessage(text) {
    const item = document.createElement('div');
    item.className = 'message user';
    const label = document.createElement('span');
    label.className = 'label';
    label.textContent = '\u{1F4AC} You: ';
    const content = document.createElement('span');
    content.className = 'content';
    content.textContent = text;
    item.append(label, content);
    log.appendChild(item);
  }

  function handleEvent(block) {
    let name = 'message';
    let data = '';
    for (const line of block.split('\n')) {
      if (line.startsWith('event:')) name = line.slice(6).trim();
      else if (line.startsWith('data:')) data += line.slice(5).trim();
    }
    if (!data) return;
    const payload = JSON.parse(data);
    if (name === 'status') progressText.textContent = payload.message;
    else if (name === 'fragment') progressText.textContent = payload.cumulative;
    else if (name === 'done' || name === 'error') progressText.textContent = payload.message;
  }

  form.addEventListener('submit', async function (event) {
    const action = event.submitter ? event.submitter.value : 'send';
    if (action !== 'send') return;
    event.preventDefault();

    const input = form.elements.text;
    const text = input.value;
    if (!text.trim()) return;
    input.value = '';
    for (const button of form.querySelectorAll('button')) button.disabled = true;

    appendUserMessage(text);
    progress.hidden = false;
    progressText.textContent = '';

    try {
      const response = await fetch('/api/sessions/' + encodeURIComponent(sessionId) + '/messages', {
        method: 'POST',
        headers: { 'Content-Type': 'application/json' },
        body: JSON.stringify({ text: text })
      });
      if (response.ok && response.body) {
        const reader = response.body.getReader();
        const decoder = new TextDecoder();
        let buffer = '';
        for (;;) {
          const { value, done } = await reader.read();
          if (done) break;
          buffer += decoder.decode(value, { stream: true });
          let boundary;
          while ((boundary = buffer.indexOf('\n\n')) >= 0) {
            handleEvent(buffer.slice(0, boundary));
            buffer = buffer.slice(boundary + 2);
          }
        }
      }
    } finally {
      window.location.reload();
    }
  });
})();
"#;

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Link and image targets allowed through: relative URLs and http, https, mailto.
fn is_safe_destination(destination: &str) -> bool {
    let normalized: String = destination
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();

    match normalized.find([':', '/', '?', '#']) {
        Some(end) if normalized[end..].starts_with(':') => {
            matches!(&normalized[..end], "http" | "https" | "mailto")
        }
        _ => true,
    }
}

fn sanitize_tag(tag: Tag<'_>) -> Tag<'_> {
    match tag {
        Tag::Link(kind, destination, title) if !is_safe_destination(&destination) => {
            Tag::Link(kind, CowStr::Borrowed(""), title)
        }
        Tag::Image(kind, destination, title) if !is_safe_destination(&destination) => {
            Tag::Image(kind, CowStr::Borrowed(""), title)
        }
        other => other,
    }
}

/// Markdown to HTML. Raw HTML in the source is shown as text and link or image
/// targets with other schemes (`javascript:`, `data:`) are emptied.
pub fn markdown_to_html(markdown: &str) -> String {
    let parser = Parser::new(markdown).map(|event| match event {
        Event::Html(raw) => Event::Text(raw),
        Event::Start(tag) => Event::Start(sanitize_tag(tag)),
        Event::End(tag) => Event::End(sanitize_tag(tag)),
        other => other,
    });
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

fn render_message(message: &ChatMessage) -> String {
    match message.role {
        Role::Bot => format!(
            r#"<div class="message bot"><span class="label">🤖 Bot: </span><div class="content">{}</div></div>"#,
            markdown_to_html(&message.text)
        ),
        Role::User => format!(
            r#"<div class="message user"><span class="label">💬 You: </span><span class="content">{}</span></div>"#,
            html_escape(&message.text)
        ),
    }
}

pub fn render_page(session: &SessionState) -> String {
    let messages: String = session.messages().iter().map(render_message).collect();
    let session_id = html_escape(&session.id);

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<style>{style}</style>
</head>
<body>
<main data-session-id="{session_id}" data-insurer-id="{insurer_id}">
<h1>{title}</h1>
<div id="messages">{messages}</div>
<div id="in-progress" class="message bot" hidden><span class="label">🤖 Bot: </span><span class="content"></span></div>
<hr>
<form id="chat-form" method="post" action="/chat/{session_id}">
<label for="chat-input">You:</label>
<input id="chat-input" name="text" type="text" autocomplete="off" value="{pending}">
<button type="submit" name="action" value="send">Send</button>
<button type="submit" name="action" value="clear">Clear History</button>
</form>
</main>
<script>{script}</script>
</body>
</html>"#,
        title = PAGE_TITLE,
        style = STYLE,
        session_id = session_id,
        insurer_id = html_escape(&session.insurer_id),
        messages = messages,
        pending = html_escape(&session.pending_input),
        script = SCRIPT,
    )
}

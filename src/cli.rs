//! Terminal surface: stdin lines in, rendered replies out.

use std::pin::Pin;

use futures::{Stream, stream};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::session::{ComposedBy, SessionReply};

/// Input lines, one item per non-blank line.
pub type LineStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Read stdin on a background task. The stream ends at EOF.
pub fn stdin_lines() -> LineStream {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        eprint!("> ");

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        eprint!("> ");
                        continue;
                    }
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Error reading stdin: {}", e);
                    break;
                }
            }
        }
    });

    Box::pin(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|line| (line, rx))
    }))
}

/// Text shown for one reply.
pub fn render(reply: &SessionReply) -> String {
    match reply {
        SessionReply::Response(response) => {
            let mut out = response.text.clone();
            if !response.unavailable.is_empty() {
                let roles: Vec<&str> = response.unavailable.iter().map(|r| r.as_str()).collect();
                out.push_str(&format!("\n  (unavailable: {})", roles.join(", ")));
            }
            for (role, error) in &response.errors {
                out.push_str(&format!("\n  ({role} failed: {error})"));
            }
            if response.composed_by == ComposedBy::Local && !response.served.is_empty() {
                out.push_str("\n  (composed locally)");
            }
            out
        }
        other => other.to_string(),
    }
}

/// Print a reply to stdout and re-prompt on stderr.
pub fn print_reply(reply: &SessionReply) {
    println!("\n{}\n", render(reply));
    if !matches!(reply, SessionReply::Goodbye) {
        eprint!("> ");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Role;
    use crate::session::Reply;

    fn reply(unavailable: Vec<Role>, composed_by: ComposedBy) -> SessionReply {
        SessionReply::Response(Reply {
            text: "Hello!".into(),
            served: vec![Role::Language],
            unavailable,
            errors: vec![],
            composed_by,
        })
    }

    #[test]
    fn worker_replies_render_plainly() {
        assert_eq!(render(&reply(vec![], ComposedBy::Worker)), "Hello!");
    }

    #[test]
    fn degraded_replies_say_so() {
        let text = render(&reply(vec![Role::Knowledge, Role::Response], ComposedBy::Local));
        assert_eq!(
            text,
            "Hello!\n  (unavailable: knowledge, response)\n  (composed locally)"
        );
    }

    #[test]
    fn other_replies_use_display() {
        assert_eq!(render(&SessionReply::Renamed("Ada".into())), "Nice to meet you, Ada.");
        assert_eq!(render(&SessionReply::Goodbye), "Goodbye.");
    }
}

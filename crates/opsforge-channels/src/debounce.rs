//! Mention debounce — time-window merging of follow-up messages.
//!
//! A bot-mention schedules dispatch after a short window. Follow-up messages
//! in the same chat extend the window (hard ceiling from the first mention),
//! get merged into the primary message in arrival order, and are also
//! delivered as passive messages for the conversation log. Attachment-only
//! placeholders (`[Image]`, `[File:…]`, `[media]`) extend the window and
//! contribute their attachments without polluting the merged text.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use opsforge_core::types::ImMessage;

use crate::platform::MessageHandlers;

/// Quiet period after the last message before dispatch.
const DEBOUNCE_WINDOW: Duration = Duration::from_secs(3);
/// Hard ceiling measured from the first mention.
const DEBOUNCE_CEILING: Duration = Duration::from_secs(15);

struct Pending {
    primary: ImMessage,
    followups: Vec<ImMessage>,
    first_at: Instant,
    deadline: Instant,
}

pub struct MentionDebouncer {
    pending: Mutex<HashMap<String, Pending>>,
}

impl Default for MentionDebouncer {
    fn default() -> Self {
        Self::new()
    }
}

impl MentionDebouncer {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// A bot-mention arrived: start (or restart) the window for its chat.
    pub fn on_mention(self: &Arc<Self>, msg: ImMessage, handlers: MessageHandlers) {
        let chat_key = msg.chat_id.as_str().to_string();
        let now = Instant::now();
        let deadline = now + DEBOUNCE_WINDOW;

        {
            let mut pending = self.pending.lock().unwrap();
            pending.insert(
                chat_key.clone(),
                Pending {
                    primary: msg,
                    followups: Vec::new(),
                    first_at: now,
                    deadline,
                },
            );
        }

        self.spawn_flush_timer(chat_key, deadline, handlers);
    }

    /// A non-mention message arrived while a window may be open. Returns
    /// true when it was absorbed as a follow-up; false means the caller
    /// should treat it as an ordinary passive message.
    pub fn on_followup(self: &Arc<Self>, msg: ImMessage, handlers: &MessageHandlers) -> bool {
        let chat_key = msg.chat_id.as_str().to_string();
        let now = Instant::now();

        let new_deadline = {
            let mut pending = self.pending.lock().unwrap();
            let Some(entry) = pending.get_mut(&chat_key) else {
                return false;
            };
            // Extend the quiet window, never past the ceiling.
            let ceiling = entry.first_at + DEBOUNCE_CEILING;
            entry.deadline = (now + DEBOUNCE_WINDOW).min(ceiling);
            entry.followups.push(msg);
            entry.deadline
        };

        self.spawn_flush_timer(chat_key, new_deadline, handlers.clone());
        true
    }

    fn spawn_flush_timer(
        self: &Arc<Self>,
        chat_key: String,
        deadline: Instant,
        handlers: MessageHandlers,
    ) {
        let debouncer = Arc::clone(self);
        tokio::spawn(async move {
            let mut wake_at = deadline;
            loop {
                tokio::time::sleep_until(wake_at).await;

                let ready = {
                    let mut pending = debouncer.pending.lock().unwrap();
                    let deadline = pending.get(&chat_key).map(|entry| entry.deadline);
                    match deadline {
                        // Deadline moved by a follow-up: this timer keeps
                        // watch (a newer timer exists too; only the one that
                        // actually removes the entry flushes).
                        Some(d) if d > Instant::now() => {
                            wake_at = d;
                            None
                        }
                        Some(_) => pending.remove(&chat_key),
                        None => return,
                    }
                };

                match ready {
                    Some(entry) => {
                        flush(entry, &handlers);
                        return;
                    }
                    None => continue,
                }
            }
        });
    }
}

/// Merge follow-ups into the primary message and deliver. Follow-ups are
/// also handed to the passive handler for conversation logging.
fn flush(entry: Pending, handlers: &MessageHandlers) {
    let Pending {
        mut primary,
        followups,
        ..
    } = entry;

    for followup in &followups {
        if !is_attachment_placeholder(&followup.text) && !followup.text.trim().is_empty() {
            if !primary.text.is_empty() {
                primary.text.push('\n');
            }
            primary.text.push_str(followup.text.trim());
        }
        primary.attachments.extend(followup.attachments.iter().cloned());
        primary.links.extend(followup.links.iter().cloned());
    }

    debug!(
        chat = %primary.chat_id,
        followups = followups.len(),
        "mention debounce flushed"
    );

    for followup in followups {
        (handlers.on_passive_message)(followup);
    }
    (handlers.on_message)(primary);
}

/// Placeholder text the platform substitutes for media-only messages.
pub fn is_attachment_placeholder(text: &str) -> bool {
    let t = text.trim();
    t == "[Image]" || t == "[media]" || t.starts_with("[File:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsforge_core::types::{Attachment, ChatId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn msg(chat: &str, id: &str, text: &str) -> ImMessage {
        ImMessage {
            chat_id: ChatId::from(chat),
            message_id: id.to_string(),
            sender_id: "u1".to_string(),
            sender_name: "alice".to_string(),
            text: text.to_string(),
            mentions: Vec::new(),
            attachments: Vec::new(),
            links: Vec::new(),
        }
    }

    struct Captured {
        messages: Mutex<Vec<ImMessage>>,
        passive: AtomicUsize,
    }

    fn handlers() -> (Arc<Captured>, MessageHandlers) {
        let captured = Arc::new(Captured {
            messages: Mutex::new(Vec::new()),
            passive: AtomicUsize::new(0),
        });
        let c1 = captured.clone();
        let c2 = captured.clone();
        let handlers = MessageHandlers {
            on_message: Arc::new(move |m| c1.messages.lock().unwrap().push(m)),
            on_passive_message: Arc::new(move |_| {
                c2.passive.fetch_add(1, Ordering::SeqCst);
            }),
        };
        (captured, handlers)
    }

    #[tokio::test(start_paused = true)]
    async fn single_mention_flushes_after_window() {
        let debouncer = Arc::new(MentionDebouncer::new());
        let (captured, handlers) = handlers();

        debouncer.on_mention(msg("c1", "m1", "please analyze"), handlers);

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert!(captured.messages.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let messages = captured.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "please analyze");
    }

    #[tokio::test(start_paused = true)]
    async fn followups_merge_in_order_and_go_passive() {
        let debouncer = Arc::new(MentionDebouncer::new());
        let (captured, handlers) = handlers();

        debouncer.on_mention(msg("c1", "m1", "please analyze"), handlers.clone());

        tokio::time::sleep(Duration::from_millis(500)).await;
        let mut image = msg("c1", "m2", "[Image]");
        image.attachments.push(Attachment {
            name: "design.png".into(),
            path: "/tmp/design.png".into(),
            mime_type: "image/png".into(),
        });
        assert!(debouncer.on_followup(image, &handlers));

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(debouncer.on_followup(msg("c1", "m3", "see the design"), &handlers));

        // Let the extended window elapse.
        tokio::time::sleep(Duration::from_secs(5)).await;

        let messages = captured.messages.lock().unwrap();
        assert_eq!(messages.len(), 1, "exactly one merged dispatch");
        let merged = &messages[0];
        assert_eq!(merged.text, "please analyze\nsee the design");
        assert_eq!(merged.attachments.len(), 1);
        assert_eq!(captured.passive.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_bounds_an_endless_burst() {
        let debouncer = Arc::new(MentionDebouncer::new());
        let (captured, handlers) = handlers();

        debouncer.on_mention(msg("c1", "m0", "start"), handlers.clone());

        // Keep sending attachment placeholders every second for 20 s; the
        // flush must still happen within the 15 s ceiling.
        for i in 0..20 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let flushed = !captured.messages.lock().unwrap().is_empty();
            if flushed {
                break;
            }
            debouncer.on_followup(msg("c1", &format!("f{i}"), "[Image]"), &handlers);
        }

        tokio::time::sleep(Duration::from_secs(4)).await;
        let messages = captured.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        // Placeholders never reach the merged text.
        assert_eq!(messages[0].text, "start");
    }

    #[tokio::test(start_paused = true)]
    async fn followup_without_open_window_is_not_absorbed() {
        let debouncer = Arc::new(MentionDebouncer::new());
        let (_captured, handlers) = handlers();
        assert!(!debouncer.on_followup(msg("c1", "m1", "hello"), &handlers));
    }

    #[test]
    fn placeholder_detection() {
        assert!(is_attachment_placeholder("[Image]"));
        assert!(is_attachment_placeholder(" [media] "));
        assert!(is_attachment_placeholder("[File:spec.pdf]"));
        assert!(!is_attachment_placeholder("see the [Image] above"));
    }
}

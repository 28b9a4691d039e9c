use serde_json::json;

/// Fire-and-forget change events. The core only queues; the transport loop
/// drains and emits after the response line, so an event is never mistaken
/// for a reply. Clients must re-query rather than trust the payload.
#[derive(Debug, Default)]
pub struct Notifier {
    queued: Vec<serde_json::Value>,
}

impl Notifier {
    pub fn schedule_changed(&mut self, user_ids: &[String]) {
        self.queued.push(json!({
            "event": "schedule.changed",
            "userIds": user_ids,
        }));
    }

    pub fn drain(&mut self) -> Vec<serde_json::Value> {
        std::mem::take(&mut self.queued)
    }
}

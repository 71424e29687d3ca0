//! In-process pub-sub for live check-in dashboards (spec.md §4.8 step 3).
//!
//! A plain `tokio::sync::broadcast` channel: every `GET /stats/stream`
//! subscriber gets its own receiver, and a check-in that happens with no
//! subscribers attached is simply dropped — there is no durability
//! requirement here, only "best-effort live view".

use registrar_core::CheckInEvent;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CheckInEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never errors on the caller's behalf: a send with no subscribers is a
    /// normal, expected outcome (`SendError` just means nobody's listening).
    pub fn publish(&self, event: CheckInEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CheckInEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(CheckInEvent {
            team_id: "HACK-001".into(),
            team_code: "TEAM-AB12CD".into(),
            team_name: "Byte Busters".into(),
            check_in_time: OffsetDateTime::now_utc(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.team_id, "HACK-001");
    }
}

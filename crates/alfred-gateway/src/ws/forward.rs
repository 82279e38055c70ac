//! Bus → WS event forwarding.
//!
//! The gateway subscribes to everything; each event is marshalled once and
//! offered to every connection's queue with a non-blocking send. A client
//! that stops reading loses events, never the bus.

use std::sync::{Arc, Weak};

use tracing::warn;

use alfred_bus::{EventType, SubscriptionHandle};
use alfred_protocol::Frame;

use crate::app::AppState;

/// Subscribe the forwarder. The returned handle unsubscribes on shutdown.
pub fn start(state: &Arc<AppState>) -> SubscriptionHandle {
    let weak: Weak<AppState> = Arc::downgrade(state);
    state.bus.subscribe_all(move |event| {
        let Some(state) = weak.upgrade() else { return };

        // The gateway's counters are fed from the event stream.
        match event.event_type {
            EventType::MessageReceived => state.metrics.record_message_received(),
            EventType::MessageSent => state.metrics.record_message_sent(),
            EventType::LlmCallStarted => state.metrics.record_llm_call(),
            EventType::ToolCallCompleted => state.metrics.record_tool_call(true),
            EventType::ToolCallFailed => state.metrics.record_tool_call(false),
            _ => {}
        }

        let Ok(payload) = serde_json::to_value(event) else {
            return;
        };
        let frame = Frame::event(payload);
        for entry in state.connections.iter() {
            if entry.value().try_send(frame.clone()).is_err() {
                warn!(conn_id = entry.key(), "slow consumer, dropping event frame");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::test_state;
    use alfred_bus::{Event, EventType};
    use alfred_protocol::FrameType;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn slow_consumer_never_stalls_others() {
        let (state, _dir) = test_state();
        let _forwarder = start(&state);

        let (fast_tx, mut fast_rx) = mpsc::channel(64);
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        // The slow client's queue is already full.
        slow_tx
            .try_send(Frame::event(serde_json::json!({"filler": true})))
            .unwrap();
        state.connections.insert(1, fast_tx);
        state.connections.insert(2, slow_tx);

        state.bus.publish(Event::new(
            EventType::MessageSent,
            serde_json::json!({"n": 1}),
        ));
        state.bus.close().await;

        let frame = fast_rx.try_recv().expect("fast client must receive the event");
        assert!(matches!(frame.frame_type, FrameType::Event));
        assert_eq!(
            state.metrics.stats.messages_sent.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }
}

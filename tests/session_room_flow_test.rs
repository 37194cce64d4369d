// Integration test: a caller driving both the room state machine and
// the session registry together, the way a coordinator process would
// — Room persists the message log, SessionRegistry fans it out live.

#[cfg(test)]
mod session_room_flow_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use masc::backend::Backend;
    use masc::room::Room;
    use masc::session::{Category, Role, SessionRegistry};

    #[tokio::test]
    async fn broadcast_is_persisted_by_room_and_delivered_live_by_session() {
        let room = Room::new(Arc::new(Backend::memory()), ".", Duration::from_secs(30));
        room.init().await.unwrap();

        let sessions = SessionRegistry::new();
        sessions.join("gemini-alpha", Role::Coordinator, false).unwrap();
        sessions.join("gemini-beta", Role::Worker, false).unwrap();

        room.join("gemini-alpha", vec![]).await.unwrap();
        room.join("gemini-beta", vec![]).await.unwrap();

        let seq = room.broadcast("gemini-alpha", "starting the sprint", None).await.unwrap();
        sessions.deliver("gemini-alpha", "starting the sprint", None);

        // The room keeps a durable, totally ordered record...
        assert!(seq > 0);
        // ...while the session registry fans it out live, excluding the sender.
        let delivered = sessions.wait("gemini-beta", Duration::from_millis(100)).await.unwrap();
        assert_eq!(delivered.unwrap().content, "starting the sprint");
        assert!(sessions.wait("gemini-alpha", Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rate_limited_agent_is_still_able_to_use_room_directly() {
        let sessions = SessionRegistry::new();
        sessions.join("gemini-alpha", Role::Worker, false).unwrap();

        // Exhaust the task_ops category's window.
        let mut admitted = 0;
        for _ in 0..200 {
            if sessions.check_rate_limit("gemini-alpha", Category::TaskOps).unwrap() {
                admitted += 1;
            } else {
                break;
            }
        }
        assert!(admitted > 0);

        // Rate limiting lives only in the session layer; Room itself has
        // no knowledge of it and still accepts the task mutation.
        let room = Room::new(Arc::new(Backend::memory()), ".", Duration::from_secs(30));
        room.init().await.unwrap();
        room.add_task("task-01", "keep working", 1).await.unwrap();
        room.claim("task-01", "gemini-alpha").await.unwrap();
    }
}

// Integration tests for the room coordination state machine end to end.

#[cfg(test)]
mod room_lifecycle_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use masc::backend::Backend;
    use masc::error::MascError;
    use masc::room::{Room, TaskStatus};

    fn test_room() -> Room {
        Room::new(Arc::new(Backend::memory()), ".", Duration::from_secs(30))
    }

    #[tokio::test]
    async fn full_task_workflow_from_add_to_archive() {
        let room = test_room();
        room.init().await.unwrap();

        room.join("gemini-alpha", vec!["rust".to_string()]).await.unwrap();
        room.join("gemini-beta", vec!["rust".to_string()]).await.unwrap();

        let task = room.add_task("task-01", "implement codec", 1).await.unwrap();
        assert!(matches!(task.status, TaskStatus::Todo));

        let claimed = room.claim("task-01", "gemini-alpha").await.unwrap();
        assert!(matches!(claimed.status, TaskStatus::Claimed { .. }));

        // A second agent cannot claim the same task.
        let err = room.claim("task-01", "gemini-beta").await.unwrap_err();
        assert!(matches!(err, MascError::AlreadyClaimed { by } if by == "gemini-alpha"));

        let started = room.start("task-01", "gemini-alpha").await.unwrap();
        assert!(matches!(started.status, TaskStatus::InProgress { .. }));

        let done = room.done("task-01", "gemini-alpha", "shipped the codec").await.unwrap();
        assert!(matches!(done.status, TaskStatus::Done { .. }));

        // Once terminal, the task leaves the live backlog for the archive.
        let err = room.release("task-01", "gemini-alpha").await.unwrap_err();
        assert!(matches!(err, MascError::TaskNotFound(_)));

        let archive = room.archived_tasks().await.unwrap();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive[0].id, "task-01");

        room.leave("gemini-alpha").await.unwrap();
        room.leave("gemini-beta").await.unwrap();
    }

    #[tokio::test]
    async fn release_returns_task_to_todo_for_another_agent_to_claim() {
        let room = test_room();
        room.init().await.unwrap();
        room.add_task("task-01", "x", 1).await.unwrap();

        room.claim("task-01", "gemini-alpha").await.unwrap();
        room.release("task-01", "gemini-alpha").await.unwrap();

        let claimed = room.claim("task-01", "gemini-beta").await.unwrap();
        assert!(matches!(claimed.status, TaskStatus::Claimed { by, .. } if by == "gemini-beta"));
    }

    #[tokio::test]
    async fn cancel_is_reachable_from_in_progress_and_archives() {
        let room = test_room();
        room.init().await.unwrap();
        room.add_task("task-01", "x", 1).await.unwrap();
        room.claim("task-01", "gemini-alpha").await.unwrap();
        room.start("task-01", "gemini-alpha").await.unwrap();

        room.cancel("task-01").await.unwrap();

        let archive = room.archived_tasks().await.unwrap();
        assert_eq!(archive.len(), 1);
        assert!(matches!(archive[0].status, TaskStatus::Cancelled));
    }

    #[tokio::test]
    async fn file_lock_then_broadcast_and_worktree_are_independent_flows() {
        let room = test_room();
        room.init().await.unwrap();
        room.join("gemini-alpha", vec![]).await.unwrap();

        room.lock("src/main.rs", "gemini-alpha").await.unwrap();
        let err = room.lock("src/main.rs", "gemini-beta").await.unwrap_err();
        assert!(matches!(err, MascError::FileLocked { .. }));

        let released = room.unlock("src/main.rs", "gemini-alpha").await.unwrap();
        assert!(released);

        let seq1 = room.broadcast("gemini-alpha", "starting work", None).await.unwrap();
        let seq2 = room
            .broadcast("gemini-alpha", "direct message", Some("gemini-beta"))
            .await
            .unwrap();
        assert!(seq2 > seq1);
    }
}

use context_gate::db::{Database, SessionStore};
use context_gate::models::*;
use speculate2::speculate;

fn rag_context() -> ProjectContext {
    ProjectContext::new(
        Complexity::Complex,
        "ai",
        Intent::NewFeature,
        vec!["rag".to_string(), "document".to_string(), "search".to_string()],
    )
}

fn web_context() -> ProjectContext {
    let mut context = rag_context();
    context.domain = "web".to_string();
    context.refined = true;
    context
}

speculate! {
    before {
        let db = Database::open_memory().expect("Failed to create in-memory database");
        db.migrate().expect("Failed to run migrations");
    }

    describe "get" {
        it "returns None for an unknown session" {
            let result = db.get("nobody").expect("Query failed");
            assert!(result.is_none());
        }

        it "returns what was put" {
            db.put("thread-1", &rag_context()).expect("Failed to put");

            let session = db.get("thread-1").expect("Query failed").expect("Session missing");
            assert_eq!(session.session_id, "thread-1");
            assert_eq!(session.context, rag_context());
            assert_eq!(session.history.len(), 1);
            assert_eq!(session.history[0].context, rag_context());
        }
    }

    describe "put" {
        it "overwrites the current context and appends history in order" {
            db.put("thread-1", &rag_context()).expect("Failed to put");
            db.put("thread-1", &web_context()).expect("Failed to put");

            let session = db.get("thread-1").expect("Query failed").unwrap();
            assert_eq!(session.context, web_context());
            assert_eq!(session.history.len(), 2);
            assert_eq!(session.history[0].context.domain, "ai");
            assert_eq!(session.history[1].context.domain, "web");
        }

        it "keeps created_at and advances updated_at" {
            let first = db.put("thread-1", &rag_context()).expect("Failed to put");
            let second = db.put("thread-1", &web_context()).expect("Failed to put");

            assert_eq!(second.created_at, first.created_at);
            assert!(second.updated_at >= first.updated_at);
        }

        it "does not extend history when re-approving an unchanged context" {
            db.put("thread-1", &rag_context()).expect("Failed to put");
            let session = db.put("thread-1", &rag_context()).expect("Failed to put");

            assert_eq!(session.history.len(), 1);
            assert_eq!(session.context, rag_context());
        }

        it "only compares against the latest history entry" {
            db.put("thread-1", &rag_context()).expect("Failed to put");
            db.put("thread-1", &web_context()).expect("Failed to put");
            let session = db.put("thread-1", &rag_context()).expect("Failed to put");

            assert_eq!(session.history.len(), 3);
        }

        it "treats the refined flag as part of the context" {
            let mut refined = rag_context();
            refined.refined = true;

            db.put("thread-1", &rag_context()).expect("Failed to put");
            let session = db.put("thread-1", &refined).expect("Failed to put");

            assert_eq!(session.history.len(), 2);
            assert!(session.context.refined);
        }

        it "treats the session id as opaque" {
            db.put(" thread-1 ", &rag_context()).expect("Failed to put");

            let padded = db.get(" thread-1 ").expect("Query failed").expect("Session missing");
            assert_eq!(padded.session_id, " thread-1 ");
            assert_eq!(padded.context, rag_context());
            assert!(db.get("thread-1").expect("Query failed").is_none());
        }

        it "stores the context exactly as given" {
            let mut mixed_case = rag_context();
            mixed_case.domain = "Web".to_string();

            let committed = db.put("thread-1", &mixed_case).expect("Failed to put");
            let session = db.get("thread-1").expect("Query failed").expect("Session missing");

            assert_eq!(committed.context, mixed_case);
            assert_eq!(session.context, mixed_case);
            assert_eq!(session.history[0].context, mixed_case);
        }

        it "rejects an empty session id" {
            assert!(db.put("  ", &rag_context()).is_err());
        }

        it "keeps sessions independent" {
            db.put("thread-1", &rag_context()).expect("Failed to put");
            db.put("thread-2", &web_context()).expect("Failed to put");

            assert_eq!(db.get("thread-1").unwrap().unwrap().context.domain, "ai");
            assert_eq!(db.get("thread-2").unwrap().unwrap().context.domain, "web");
        }
    }

    describe "get_history" {
        it "is empty for an unknown session" {
            let history = db.get_history("nobody").expect("Query failed");
            assert!(history.is_empty());
        }

        it "returns entries oldest first" {
            db.put("thread-1", &rag_context()).expect("Failed to put");
            db.put("thread-1", &web_context()).expect("Failed to put");

            let history = db.get_history("thread-1").expect("Query failed");
            let domains: Vec<&str> = history.iter().map(|h| h.context.domain.as_str()).collect();
            assert_eq!(domains, vec!["ai", "web"]);
        }
    }

    describe "list_sessions" {
        it "returns empty list when nothing is stored" {
            assert!(db.list_sessions().expect("Query failed").is_empty());
        }

        it "lists most recently updated first" {
            db.put("older", &rag_context()).expect("Failed to put");
            std::thread::sleep(std::time::Duration::from_millis(5));
            db.put("newer", &web_context()).expect("Failed to put");

            let sessions = db.list_sessions().expect("Query failed");
            let ids: Vec<&str> = sessions.iter().map(|s| s.session_id.as_str()).collect();
            assert_eq!(ids, vec!["newer", "older"]);
            assert_eq!(sessions[0].domain, "web");
            assert_eq!(sessions[0].history_len, 1);
        }
    }

    describe "delete_session" {
        it "removes the session and its history" {
            db.put("thread-1", &rag_context()).expect("Failed to put");

            assert!(db.delete_session("thread-1").expect("Delete failed"));
            assert!(db.get("thread-1").unwrap().is_none());
            assert!(db.get_history("thread-1").unwrap().is_empty());
        }

        it "returns false for an unknown session" {
            assert!(!db.delete_session("nobody").expect("Delete failed"));
        }
    }
}

#[test]
fn sessions_survive_reopening_the_database() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("nested").join("sessions.db");

    {
        let db = Database::open(path.clone()).expect("Failed to open");
        db.migrate().expect("Failed to migrate");
        db.put("thread-1", &rag_context()).expect("Failed to put");
    }

    let db = Database::open(path).expect("Failed to reopen");
    db.migrate().expect("Failed to migrate");
    let session = db.get("thread-1").expect("Query failed").expect("Session lost");
    assert_eq!(session.context, rag_context());
}

#[cfg(test)]
mod session_tests {
    use crate::client::{ConnectionManager, ConnectionStatus, ReconnectPolicy};
    use crate::config::Credentials;
    use crate::error::{CorrelationError, SessionError};
    use crate::session::{NoticeReceiver, Session, SessionNotice};
    use crate::transport::{event_channel, ConnectionEvent, EventReceiver, Transport};
    use assist_protocol::{
        decode, encode, encode_text, AskQuestionRequest, ChatMessage, ChatMessageNotification,
        Command, Envelope, Frame, GetOnlineUsersResponse, McpAskQuestionRequest,
        McpWorkReportRequest, OnlineUser, RequestCancelledNotification,
        UserConnectionStatusNotification, UserLoginResponse, WorkReportRequest,
    };
    use std::time::Duration;

    const ENDPOINT: &str = "ws://127.0.0.1:8080/ws";

    #[derive(Default)]
    struct MockTransport {
        opened: Vec<(String, u64)>,
        sent: Vec<Frame>,
        closes: usize,
    }

    impl MockTransport {
        fn sent_envelopes(&self) -> Vec<Envelope> {
            self.sent.iter().map(|f| decode(f).unwrap()).collect()
        }

        fn sent_commands(&self) -> Vec<String> {
            self.sent_envelopes().into_iter().map(|e| e.cmd).collect()
        }
    }

    impl Transport for MockTransport {
        fn open(&mut self, url: &str, generation: u64) -> Result<(), SessionError> {
            self.opened.push((url.to_string(), generation));
            Ok(())
        }

        fn send(&mut self, frame: Frame) -> Result<(), SessionError> {
            self.sent.push(frame);
            Ok(())
        }

        fn close(&mut self) {
            self.closes += 1;
        }
    }

    fn new_session(
        base_delay_ms: u64,
        max_attempts: u32,
    ) -> (Session<MockTransport>, EventReceiver, NoticeReceiver) {
        let (events, rx) = event_channel();
        let policy = ReconnectPolicy::new(Duration::from_millis(base_delay_ms), max_attempts);
        let link = ConnectionManager::new(MockTransport::default(), events, policy);
        let (session, notices) = Session::new(link);
        (session, rx, notices)
    }

    fn drain(notices: &mut NoticeReceiver) -> Vec<SessionNotice> {
        let mut seen = Vec::new();
        while let Ok(notice) = notices.try_recv() {
            seen.push(notice);
        }
        seen
    }

    fn deliver(session: &mut Session<MockTransport>, envelope: &Envelope) {
        let generation = session.connection().generation();
        session.handle_event(ConnectionEvent::Frame {
            generation,
            frame: Frame::Binary(encode(envelope)),
        });
    }

    fn open(session: &mut Session<MockTransport>) {
        let generation = session.connection().generation();
        session.handle_event(ConnectionEvent::Opened { generation });
    }

    fn close(session: &mut Session<MockTransport>) {
        let generation = session.connection().generation();
        session.handle_event(ConnectionEvent::Closed {
            generation,
            reason: None,
        });
    }

    fn fire_reconnect(session: &mut Session<MockTransport>) {
        let generation = session.connection().generation();
        session.handle_event(ConnectionEvent::ReconnectDue { generation });
    }

    fn login_response(client_id: &str, success: bool, error: &str) -> Envelope {
        Envelope {
            user_login_response: Some(UserLoginResponse {
                client_id: client_id.to_string(),
                success,
                error_message: error.to_string(),
            }),
            ..Envelope::new(Command::UserLogin)
        }
    }

    fn connect_and_login(session: &mut Session<MockTransport>) {
        let _ = session.connect(ENDPOINT, Credentials::new("secret", "Alice"));
        open(session);
        deliver(session, &login_response("me", true, ""));
    }

    fn ask_question(id: &str, question: &str) -> Envelope {
        Envelope {
            ask_question_request: Some(AskQuestionRequest {
                id: id.to_string(),
                user_token: "agent".to_string(),
                request: Some(McpAskQuestionRequest {
                    project_directory: "/repo".to_string(),
                    question: question.to_string(),
                    timeout: 600,
                }),
            }),
            ..Envelope::new(Command::AskQuestion)
        }
    }

    fn work_report(id: &str) -> Envelope {
        Envelope {
            work_report_request: Some(WorkReportRequest {
                id: id.to_string(),
                user_token: "agent".to_string(),
                request: Some(McpWorkReportRequest {
                    project_directory: "/repo".to_string(),
                    summary: "tests pass".to_string(),
                    timeout: 600,
                }),
            }),
            ..Envelope::new(Command::WorkReport)
        }
    }

    fn user(client_id: &str, nickname: &str) -> OnlineUser {
        OnlineUser {
            client_id: client_id.to_string(),
            nickname: nickname.to_string(),
            connected_at: 1_700_000_000,
        }
    }

    fn status_change(client_id: &str, status: &str) -> Envelope {
        Envelope {
            user_connection_status_notification: Some(UserConnectionStatusNotification {
                user: Some(user(client_id, client_id)),
                status: status.to_string(),
                timestamp: 1_700_000_000,
            }),
            ..Envelope::new(Command::UserConnectionStatusNotification)
        }
    }

    #[tokio::test]
    async fn test_login_is_sent_on_open() {
        let (mut session, _events, mut notices) = new_session(1000, 5);

        let handle = session.connect(ENDPOINT, Credentials::new("secret", "Alice"));
        assert_eq!(session.connection().status(), ConnectionStatus::Connecting);
        open(&mut session);
        assert!(handle.wait().await.is_ok());

        let sent = session.connection().transport().sent_envelopes();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].command(), Some(Command::UserLogin));
        assert_eq!(sent[0].str_param, "secret");
        assert_eq!(sent[0].nickname, "Alice");

        deliver(&mut session, &login_response("me", true, ""));
        let snapshot = session.snapshot();
        assert_eq!(snapshot.connection.status, ConnectionStatus::Connected);
        assert_eq!(snapshot.connection.self_client_id.as_deref(), Some("me"));
        assert_eq!(
            drain(&mut notices),
            vec![SessionNotice::Connected {
                client_id: "me".to_string()
            }]
        );

        // No open requests yet, so no validity check.
        assert_eq!(
            session.connection().transport().sent_commands(),
            vec!["UserLogin", "GetOnlineUsers", "GetPendingMessages"]
        );
    }

    #[tokio::test]
    async fn test_connect_while_connecting_is_noop() {
        let (mut session, _events, _notices) = new_session(1000, 5);

        let _ = session.connect(ENDPOINT, Credentials::new("secret", "Alice"));
        let second = session.connect(ENDPOINT, Credentials::new("secret", "Alice"));

        assert!(second.wait().await.is_ok());
        assert_eq!(session.connection().transport().opened.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_handle_rejects_on_transport_error() {
        let (mut session, _events, mut notices) = new_session(1000, 5);

        let handle = session.connect(ENDPOINT, Credentials::new("secret", "Alice"));
        let generation = session.connection().generation();
        session.handle_event(ConnectionEvent::Error {
            generation,
            message: "connection refused".to_string(),
        });

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(ref m) if m == "connection refused"));
        assert_eq!(
            drain(&mut notices),
            vec![SessionNotice::ConnectionError("connection refused".to_string())]
        );
        // The close handler owns the state transition.
        assert_eq!(session.connection().status(), ConnectionStatus::Connecting);
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_rejected() {
        let (mut session, _events, _notices) = new_session(1000, 5);

        let handle = session.connect("http://127.0.0.1:8080/ws", Credentials::new("secret", "Alice"));

        assert!(matches!(
            handle.wait().await,
            Err(SessionError::InvalidEndpoint { .. })
        ));
        assert!(session.connection().transport().opened.is_empty());
        assert!(session.snapshot().connection.last_error.is_some());
    }

    #[tokio::test]
    async fn test_reconnect_backoff_doubles_and_resets() {
        let (mut session, _events, _notices) = new_session(1000, 5);
        connect_and_login(&mut session);

        let mut delays = Vec::new();
        for _ in 0..3 {
            close(&mut session);
            assert_eq!(session.connection().status(), ConnectionStatus::Reconnecting);
            delays.push(session.connection().scheduled_delay().unwrap());
            fire_reconnect(&mut session);
        }

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000)
            ]
        );
        assert_eq!(session.connection().reconnect_attempt(), 3);
        assert_eq!(session.connection().transport().opened.len(), 4);

        open(&mut session);
        assert_eq!(session.connection().reconnect_attempt(), 0);
        assert_eq!(session.connection().status(), ConnectionStatus::Connected);

        close(&mut session);
        assert_eq!(
            session.connection().scheduled_delay(),
            Some(Duration::from_millis(1000))
        );
    }

    #[tokio::test]
    async fn test_reconnect_gives_up_after_budget() {
        let (mut session, _events, mut notices) = new_session(1000, 2);
        let _ = session.connect(ENDPOINT, Credentials::new("secret", "Alice"));

        close(&mut session);
        fire_reconnect(&mut session);
        close(&mut session);
        fire_reconnect(&mut session);
        close(&mut session);

        assert!(!session.connection().has_pending_reconnect());
        let snapshot = session.snapshot();
        assert_eq!(snapshot.connection.status, ConnectionStatus::Disconnected);
        assert!(snapshot.connection.last_error.is_some());
        assert!(drain(&mut notices).contains(&SessionNotice::ReconnectExhausted { attempts: 2 }));

        // An explicit connect starts over.
        let _ = session.connect(ENDPOINT, Credentials::new("secret", "Alice"));
        assert_eq!(session.connection().status(), ConnectionStatus::Connecting);
        assert_eq!(session.connection().reconnect_attempt(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_reconnect() {
        let (mut session, mut events, _notices) = new_session(20, 5);
        connect_and_login(&mut session);
        close(&mut session);
        assert!(session.connection().has_pending_reconnect());
        let stale_generation = session.connection().generation();

        session.disconnect();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(events.try_recv().is_err());
        session.handle_event(ConnectionEvent::ReconnectDue {
            generation: stale_generation,
        });

        assert_eq!(session.connection().transport().opened.len(), 1);
        assert_eq!(session.connection().transport().closes, 1);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.connection.status, ConnectionStatus::Disconnected);
        assert_eq!(snapshot.connection.self_client_id, None);
        assert_eq!(snapshot.connection.reconnect_attempt, 0);
    }

    #[tokio::test]
    async fn test_reconnect_timer_fires_event() {
        let (mut session, mut events, _notices) = new_session(10, 5);
        connect_and_login(&mut session);
        close(&mut session);

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            ConnectionEvent::ReconnectDue {
                generation: session.connection().generation()
            }
        );

        session.handle_event(event);
        assert_eq!(session.connection().transport().opened.len(), 2);
        assert_eq!(session.connection().status(), ConnectionStatus::Reconnecting);
    }

    #[tokio::test]
    async fn test_stale_generation_events_are_ignored() {
        let (mut session, _events, _notices) = new_session(1000, 5);
        connect_and_login(&mut session);
        let old = session.connection().generation();
        close(&mut session);
        fire_reconnect(&mut session);

        session.handle_event(ConnectionEvent::Frame {
            generation: old,
            frame: Frame::Binary(encode(&ask_question("Q1", "late?"))),
        });
        session.handle_event(ConnectionEvent::Closed {
            generation: old,
            reason: None,
        });

        assert!(session.requests().is_empty());
        assert_eq!(session.connection().reconnect_attempt(), 1);
    }

    #[tokio::test]
    async fn test_login_failure_stops_reconnecting() {
        let (mut session, _events, mut notices) = new_session(1000, 5);
        let _ = session.connect(ENDPOINT, Credentials::new("bad", "Alice"));
        open(&mut session);
        let generation = session.connection().generation();

        deliver(&mut session, &login_response("", false, "invalid token"));
        session.handle_event(ConnectionEvent::Closed {
            generation,
            reason: Some("bye".to_string()),
        });

        let snapshot = session.snapshot();
        assert_eq!(snapshot.connection.status, ConnectionStatus::Disconnected);
        assert_eq!(snapshot.connection.last_error.as_deref(), Some("invalid token"));
        assert!(!session.connection().has_pending_reconnect());
        assert_eq!(
            drain(&mut notices),
            vec![
                SessionNotice::Disconnected,
                SessionNotice::LoginFailed("invalid token".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_send_while_closed_is_not_queued() {
        let (mut session, _events, _notices) = new_session(1000, 5);

        assert!(matches!(
            session.refresh_presence(),
            Err(SessionError::NotConnected)
        ));
        assert!(session.connection().transport().sent.is_empty());
    }

    #[tokio::test]
    async fn test_question_reply_end_to_end() {
        let (mut session, _events, mut notices) = new_session(1000, 5);
        connect_and_login(&mut session);
        drain(&mut notices);

        deliver(&mut session, &ask_question("Q9", "continue?"));
        let snapshot = session.snapshot();
        assert_eq!(snapshot.pending_questions.len(), 1);
        assert_eq!(snapshot.pending_questions[0].project_context, "/repo");
        assert_eq!(snapshot.pending_questions[0].timeout_seconds, 600);

        session.reply("Q9", "go ahead").unwrap();

        let last = session
            .connection()
            .transport()
            .sent_envelopes()
            .pop()
            .unwrap();
        assert_eq!(last.command(), Some(Command::AskQuestionReply));
        assert_eq!(last.ask_question_request.unwrap().id, "Q9");
        assert!(session.snapshot().pending_questions.is_empty());

        assert_eq!(
            drain(&mut notices),
            vec![
                SessionNotice::QuestionReceived {
                    id: "Q9".to_string(),
                    project: "/repo".to_string(),
                    question: "continue?".to_string(),
                },
                SessionNotice::ReplySent {
                    id: "Q9".to_string(),
                    kind: assist_protocol::RequestKind::Question,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_question_creates_one_entry() {
        let (mut session, _events, mut notices) = new_session(1000, 5);
        connect_and_login(&mut session);
        drain(&mut notices);

        deliver(&mut session, &ask_question("Q2", "first"));
        deliver(&mut session, &ask_question("Q2", "first"));

        assert_eq!(session.requests().len(), 1);
        assert_eq!(drain(&mut notices).len(), 1);
    }

    #[tokio::test]
    async fn test_reply_to_task_report_is_a_kind_mismatch() {
        let (mut session, _events, mut notices) = new_session(1000, 5);
        connect_and_login(&mut session);
        deliver(&mut session, &work_report("T1"));
        drain(&mut notices);

        let err = session.reply("T1", "ok").unwrap_err();
        assert!(matches!(
            err,
            SessionError::Correlation(CorrelationError::KindMismatch { .. })
        ));
        assert!(matches!(drain(&mut notices).as_slice(), [SessionNotice::Warning(_)]));

        session.confirm("T1", None).unwrap();
        let last = session
            .connection()
            .transport()
            .sent_envelopes()
            .pop()
            .unwrap();
        assert_eq!(last.command(), Some(Command::WorkReportReply));
        assert!(session.snapshot().pending_tasks.is_empty());
    }

    #[tokio::test]
    async fn test_remote_answer_and_cancellation() {
        let (mut session, _events, mut notices) = new_session(1000, 5);
        connect_and_login(&mut session);
        deliver(&mut session, &ask_question("Q1", "?"));
        deliver(&mut session, &ask_question("Q2", "?"));
        drain(&mut notices);

        let answered = Envelope {
            ask_question_request: Some(AskQuestionRequest {
                id: "Q1".to_string(),
                ..Default::default()
            }),
            nickname: "Bob".to_string(),
            ..Envelope::new(Command::AskQuestionReplyNotification)
        };
        deliver(&mut session, &answered);

        let cancelled = Envelope {
            request_cancelled_notification: Some(RequestCancelledNotification {
                request_id: "Q2".to_string(),
                reason: "agent timed out".to_string(),
                message_type: "AskQuestion".to_string(),
            }),
            ..Envelope::new(Command::RequestCancelled)
        };
        deliver(&mut session, &cancelled);
        deliver(&mut session, &cancelled);

        let q1 = session.requests().get("Q1").unwrap();
        assert!(!q1.answered_locally);
        assert_eq!(q1.answered_by_display_name.as_deref(), Some("Bob"));
        let q2 = session.requests().get("Q2").unwrap();
        assert!(q2.cancelled && q2.answered);

        let seen = drain(&mut notices);
        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[0], SessionNotice::AnsweredElsewhere { ref id, .. } if id == "Q1"));
        assert!(matches!(seen[1], SessionNotice::Cancelled { ref id, .. } if id == "Q2"));

        let err = session.reply("Q1", "too late").unwrap_err();
        assert!(matches!(
            err,
            SessionError::Correlation(CorrelationError::AlreadyAnswered(_))
        ));
    }

    #[tokio::test]
    async fn test_relogin_checks_validity_of_open_requests() {
        let (mut session, _events, _notices) = new_session(1000, 5);
        connect_and_login(&mut session);
        deliver(&mut session, &ask_question("Q1", "?"));
        deliver(&mut session, &ask_question("Q2", "?"));

        close(&mut session);
        fire_reconnect(&mut session);
        open(&mut session);
        deliver(&mut session, &login_response("me-again", true, ""));

        let check = session
            .connection()
            .transport()
            .sent_envelopes()
            .into_iter()
            .find(|e| e.command() == Some(Command::CheckMessageValidity))
            .unwrap();
        assert_eq!(
            check.check_message_validity_request.unwrap().request_ids,
            vec!["Q1", "Q2"]
        );

        let report = Envelope {
            check_message_validity_response: Some(assist_protocol::CheckMessageValidityResponse {
                validity: [("Q1".to_string(), true), ("Q2".to_string(), false)]
                    .into_iter()
                    .collect(),
            }),
            ..Envelope::new(Command::CheckMessageValidity)
        };
        deliver(&mut session, &report);

        let pending: Vec<String> = session
            .snapshot()
            .pending_questions
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(pending, vec!["Q1"]);
    }

    #[tokio::test]
    async fn test_roster_excludes_self_and_tracks_changes() {
        let (mut session, _events, mut notices) = new_session(1000, 5);
        connect_and_login(&mut session);
        drain(&mut notices);

        let roster = Envelope {
            get_online_users_response: Some(GetOnlineUsersResponse {
                online_users: vec![user("me", "Alice"), user("bob", "Bob")],
                total_count: 2,
            }),
            ..Envelope::new(Command::GetOnlineUsers)
        };
        deliver(&mut session, &roster);
        deliver(&mut session, &status_change("me", "connected"));
        deliver(&mut session, &status_change("carol", "connected"));
        deliver(&mut session, &status_change("dave", "disconnected"));

        let ids: Vec<String> = session
            .snapshot()
            .peers
            .into_iter()
            .map(|p| p.client_id)
            .collect();
        assert_eq!(ids, vec!["bob", "carol"]);

        let seen = drain(&mut notices);
        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[0], SessionNotice::RosterUpdated(ref peers)
            if peers.len() == 1 && peers[0].client_id == "bob"));
        assert!(matches!(seen[1], SessionNotice::PeerJoined(ref p) if p.client_id == "carol"));
    }

    #[tokio::test]
    async fn test_peer_disconnect_clears_active_chat() {
        let (mut session, _events, _notices) = new_session(1000, 5);
        connect_and_login(&mut session);
        deliver(&mut session, &status_change("bob", "connected"));
        session.select_chat("bob").unwrap();
        assert_eq!(session.snapshot().active_chat.as_deref(), Some("bob"));

        deliver(&mut session, &status_change("bob", "disconnected"));

        assert_eq!(session.snapshot().active_chat, None);
        assert!(session.snapshot().peers.is_empty());
    }

    #[tokio::test]
    async fn test_logout_clears_roster_and_selection() {
        let (mut session, _events, mut notices) = new_session(1000, 5);
        connect_and_login(&mut session);
        deliver(&mut session, &status_change("bob", "connected"));
        session.select_chat("bob").unwrap();
        drain(&mut notices);

        session.disconnect();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.active_chat, None);
        assert!(snapshot.peers.is_empty());
        assert_eq!(drain(&mut notices), vec![SessionNotice::Disconnected]);
    }

    #[tokio::test]
    async fn test_connection_loss_forgets_roster_but_keeps_threads() {
        let (mut session, _events, mut notices) = new_session(1000, 0);
        connect_and_login(&mut session);
        deliver(&mut session, &status_change("bob", "connected"));
        session.select_chat("bob").unwrap();
        session.send_chat("bob", "still there?").unwrap();
        drain(&mut notices);

        close(&mut session);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.connection.status, ConnectionStatus::Disconnected);
        assert_eq!(snapshot.connection.self_client_id, None);
        assert_eq!(session.presence().self_id(), None);
        assert!(snapshot.peers.is_empty());
        assert_eq!(snapshot.active_chat, None);
        assert_eq!(session.chat().thread("bob").len(), 1);
        assert!(matches!(
            session.select_chat("bob"),
            Err(SessionError::UnknownPeer(_))
        ));
        assert!(drain(&mut notices).contains(&SessionNotice::ReconnectExhausted { attempts: 0 }));
    }

    #[tokio::test]
    async fn test_chat_echo_is_not_deduplicated() {
        let (mut session, _events, mut notices) = new_session(1000, 5);
        connect_and_login(&mut session);
        deliver(&mut session, &status_change("bob", "connected"));
        drain(&mut notices);

        session.send_chat("bob", "hello").unwrap();
        let relayed = Envelope {
            chat_message_notification: Some(ChatMessageNotification {
                chat_message: Some(ChatMessage {
                    message_id: "m-1".to_string(),
                    sender_client_id: "me".to_string(),
                    sender_nickname: "Alice".to_string(),
                    receiver_client_id: "bob".to_string(),
                    receiver_nickname: "Bob".to_string(),
                    content: "hello".to_string(),
                    sent_at: chrono::Utc::now().timestamp(),
                }),
            }),
            ..Envelope::new(Command::ChatMessageNotification)
        };
        deliver(&mut session, &relayed);

        let thread = session.chat().thread("bob");
        assert_eq!(thread.len(), 2);
        assert_eq!(thread.iter().filter(|e| e.local_echo).count(), 1);
        assert!(drain(&mut notices).is_empty());
    }

    #[tokio::test]
    async fn test_inbound_chat_counts_unread_until_selected() {
        let (mut session, _events, mut notices) = new_session(1000, 5);
        connect_and_login(&mut session);
        deliver(&mut session, &status_change("bob", "connected"));
        drain(&mut notices);

        let incoming = Envelope {
            chat_message_notification: Some(ChatMessageNotification {
                chat_message: Some(ChatMessage {
                    message_id: "m-2".to_string(),
                    sender_client_id: "bob".to_string(),
                    sender_nickname: "Bob".to_string(),
                    receiver_client_id: "me".to_string(),
                    receiver_nickname: "Alice".to_string(),
                    content: "ping".to_string(),
                    sent_at: 1_700_000_000,
                }),
            }),
            ..Envelope::new(Command::ChatMessageNotification)
        };
        deliver(&mut session, &incoming);

        assert_eq!(session.snapshot().unread.get("bob"), Some(&1));
        assert_eq!(
            drain(&mut notices),
            vec![SessionNotice::ChatReceived {
                peer_id: "bob".to_string(),
                from: "Bob".to_string(),
                content: "ping".to_string(),
            }]
        );

        session.select_chat("bob").unwrap();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.unread.get("bob"), None);
        assert_eq!(snapshot.active_thread.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_frames_keep_connection() {
        let (mut session, _events, mut notices) = new_session(1000, 5);
        connect_and_login(&mut session);
        drain(&mut notices);
        let generation = session.connection().generation();

        for frame in [
            Frame::Binary(vec![0xff, 0xff, 0xff]),
            Frame::Text("{not json".to_string()),
            Frame::Text(r#"{"Cmd":"SomethingNew"}"#.to_string()),
            Frame::Text(r#"{"Cmd":"AskQuestion"}"#.to_string()),
        ] {
            session.handle_event(ConnectionEvent::Frame { generation, frame });
        }

        assert_eq!(session.connection().status(), ConnectionStatus::Connected);
        assert!(session.requests().is_empty());
        assert!(drain(&mut notices).is_empty());

        // Text frames go through the same dispatch.
        session.handle_event(ConnectionEvent::Frame {
            generation,
            frame: Frame::Text(encode_text(&ask_question("Q5", "text?")).unwrap()),
        });
        assert!(session.requests().get("Q5").is_some());
    }
}

#[cfg(test)]
mod config_tests {
    use crate::config::{
        is_valid_token, validate_endpoint, ClientConfig, NicknameCache, DEFAULT_SERVER_URL,
    };
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_load_config_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("assist.toml");
        tokio::fs::write(
            &path,
            r#"
server_url = "wss://assist.example.com/ws"
token = "abc123"

[reconnect]
max_attempts = 3
"#,
        )
        .await
        .unwrap();

        let config = ClientConfig::load(&path).await.unwrap();

        assert_eq!(config.server_url, "wss://assist.example.com/ws");
        assert_eq!(config.token.as_deref(), Some("abc123"));
        assert_eq!(config.nickname, None);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.base_delay_ms, 1000);

        let policy = config.reconnect.policy();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn test_missing_config_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = ClientConfig::load_or_default(temp_dir.path().join("absent.toml"))
            .await
            .unwrap();

        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!(config.reconnect.max_attempts, 5);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.toml");
        std::fs::write(&path, "server_url = [").unwrap();

        assert_err!(tokio_test::block_on(ClientConfig::load(&path)));
    }

    #[tokio::test]
    async fn test_nickname_cache_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let cache = NicknameCache::new(temp_dir.path().join("nested").join("nickname"));

        assert_eq!(cache.load().await, None);
        cache.save("  Alice \n").await.unwrap();
        assert_eq!(cache.load().await.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_endpoint_and_token_validation() {
        assert_ok!(validate_endpoint("ws://127.0.0.1:8080/ws"));
        assert_ok!(validate_endpoint("wss://assist.example.com/ws"));
        assert_err!(validate_endpoint("https://assist.example.com/ws"));
        assert_err!(validate_endpoint("not a url"));

        assert!(is_valid_token("abc123"));
        assert!(!is_valid_token(""));
        assert!(!is_valid_token(" abc"));
    }
}

#[cfg(test)]
mod ws_tests {
    use crate::client::{ConnectionManager, ReconnectPolicy};
    use crate::config::Credentials;
    use crate::session::{Session, SessionNotice};
    use crate::transport::{event_channel, WsTransport};
    use assist_protocol::{
        decode, encode, encode_text, AskQuestionRequest, Command, Envelope, Frame,
        McpAskQuestionRequest, UserLoginResponse,
    };
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::{accept_async, tungstenite::Message};

    async fn mock_assist_server(listener: TcpListener, seen: mpsc::UnboundedSender<Envelope>) {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        while let Some(Ok(message)) = ws.next().await {
            let Message::Binary(data) = message else {
                continue;
            };
            let envelope = decode(&Frame::Binary(data)).unwrap();

            if envelope.command() == Some(Command::UserLogin) {
                let login = Envelope {
                    user_login_response: Some(UserLoginResponse {
                        client_id: "c-1".to_string(),
                        success: true,
                        error_message: String::new(),
                    }),
                    ..Envelope::new(Command::UserLogin)
                };
                ws.send(Message::Binary(encode(&login))).await.unwrap();

                let question = Envelope {
                    ask_question_request: Some(AskQuestionRequest {
                        id: "Q9".to_string(),
                        user_token: "agent".to_string(),
                        request: Some(McpAskQuestionRequest {
                            project_directory: "/repo".to_string(),
                            question: "continue?".to_string(),
                            timeout: 600,
                        }),
                    }),
                    ..Envelope::new(Command::AskQuestion)
                };
                ws.send(Message::Text(encode_text(&question).unwrap()))
                    .await
                    .unwrap();
            }

            let _ = seen.send(envelope);
        }
    }

    #[tokio::test]
    async fn test_websocket_session_end_to_end() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(mock_assist_server(listener, seen_tx));

        let (events, mut event_rx) = event_channel();
        let link = ConnectionManager::new(
            WsTransport::new(events.clone()),
            events,
            ReconnectPolicy::default(),
        );
        let (mut session, mut notices) = Session::new(link);
        let handle = session.connect(&url, Credentials::new("secret", "Alice"));

        tokio::time::timeout(Duration::from_secs(5), async {
            while session.requests().pending_questions().is_empty() {
                let event = event_rx.recv().await.unwrap();
                session.handle_event(event);
            }
        })
        .await
        .unwrap();
        assert!(handle.wait().await.is_ok());

        session.reply("Q9", "go ahead").unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let envelope = seen_rx.recv().await.unwrap();
                if envelope.command() == Some(Command::AskQuestionReply) {
                    return envelope;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(reply.ask_question_request.unwrap().id, "Q9");
        assert!(session.snapshot().pending_questions.is_empty());

        let mut received = Vec::new();
        while let Ok(notice) = notices.try_recv() {
            received.push(notice);
        }
        assert!(received.contains(&SessionNotice::Connected {
            client_id: "c-1".to_string()
        }));

        session.disconnect();
    }

    #[tokio::test]
    async fn test_refused_connection_schedules_retry() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        drop(listener);

        let (events, mut event_rx) = event_channel();
        let link = ConnectionManager::new(
            WsTransport::new(events.clone()),
            events,
            ReconnectPolicy::new(Duration::from_millis(500), 5),
        );
        let (mut session, mut notices) = Session::new(link);
        let _ = session.connect(&url, Credentials::new("secret", "Alice"));

        tokio::time::timeout(Duration::from_secs(5), async {
            while !session.connection().has_pending_reconnect() {
                let event = event_rx.recv().await.unwrap();
                session.handle_event(event);
            }
        })
        .await
        .unwrap();

        let mut received = Vec::new();
        while let Ok(notice) = notices.try_recv() {
            received.push(notice);
        }
        assert!(matches!(received[0], SessionNotice::ConnectionError(_)));
        assert!(matches!(
            received[1],
            SessionNotice::ConnectionLost {
                retry_in: Some(delay),
                ..
            } if delay == Duration::from_millis(500)
        ));

        session.disconnect();
    }
}

use assist_common::{ConnectionStatus, PendingRequest, SessionNotice, SessionSnapshot};
use assist_protocol::RequestKind;

pub fn print_notice(notice: &SessionNotice) {
    match notice {
        SessionNotice::Connected { client_id } => println!("Connected as {}", client_id),
        SessionNotice::ConnectionLost { reason, retry_in } => {
            let reason = reason.as_deref().unwrap_or("connection closed");
            match retry_in {
                Some(delay) => println!("Connection lost ({}), retrying in {}ms", reason, delay.as_millis()),
                None => println!("Connection lost ({})", reason),
            }
        }
        SessionNotice::ConnectionError(message) => eprintln!("Connection error: {}", message),
        SessionNotice::Disconnected => println!("Disconnected"),
        SessionNotice::ReconnectExhausted { attempts } => {
            eprintln!("Gave up after {} reconnect attempts; type 'connect' to retry", attempts)
        }
        SessionNotice::LoginFailed(message) => eprintln!("Login failed: {}", message),
        SessionNotice::QuestionReceived {
            id,
            project,
            question,
        } => println!("[question {}] {}\n    {}", id, project, question),
        SessionNotice::TaskReceived { id, project, summary } => {
            println!("[task {}] {}\n    {}", id, project, summary)
        }
        SessionNotice::ReplySent { id, kind } => match kind {
            RequestKind::Question => println!("Reply sent for {}", id),
            RequestKind::TaskReport => println!("Confirmation sent for {}", id),
        },
        SessionNotice::AnsweredElsewhere { id, by, text, .. } => println!(
            "{} answered by {}: {}",
            id,
            by.as_deref().unwrap_or("another operator"),
            text
        ),
        SessionNotice::Cancelled { id, kind, reason } => match reason {
            Some(reason) => println!("{} {} cancelled: {}", kind, id, reason),
            None => println!("{} {} cancelled", kind, id),
        },
        SessionNotice::RosterUpdated(peers) => {
            if peers.is_empty() {
                println!("No other operators online");
            }
            for peer in peers {
                println!("  {:<24} {}", peer.client_id, peer.display_name);
            }
        }
        SessionNotice::PeerJoined(peer) => {
            println!("{} ({}) is online", peer.display_name, peer.client_id)
        }
        SessionNotice::PeerLeft { client_id } => println!("{} went offline", client_id),
        SessionNotice::ChatReceived {
            peer_id,
            from,
            content,
        } => println!("<{}@{}> {}", from, peer_id, content),
        SessionNotice::Warning(message) => eprintln!("Warning: {}", message),
    }
}

pub fn print_status(snapshot: &SessionSnapshot) {
    let connection = &snapshot.connection;
    let status = match connection.status {
        ConnectionStatus::Disconnected => "disconnected",
        ConnectionStatus::Connecting => "connecting",
        ConnectionStatus::Connected => "connected",
        ConnectionStatus::Reconnecting => "reconnecting",
    };
    println!("Status: {}", status);
    if let Some(client_id) = &connection.self_client_id {
        println!("Client id: {}", client_id);
    }
    if connection.reconnect_attempt > 0 {
        println!("Reconnect attempt: {}", connection.reconnect_attempt);
    }
    if let Some(error) = &connection.last_error {
        println!("Last error: {}", error);
    }
    println!(
        "Pending: {} questions, {} task reports",
        snapshot.pending_questions.len(),
        snapshot.pending_tasks.len()
    );
}

pub fn print_pending(snapshot: &SessionSnapshot) {
    if snapshot.pending_questions.is_empty() && snapshot.pending_tasks.is_empty() {
        println!("Nothing pending");
        return;
    }
    for request in snapshot.pending_questions.iter().chain(&snapshot.pending_tasks) {
        print_request(request);
    }
}

pub fn print_history(snapshot: &SessionSnapshot) {
    for request in &snapshot.history {
        print_request(request);
        if request.cancelled {
            println!(
                "    cancelled{}",
                request
                    .cancel_reason
                    .as_deref()
                    .map(|r| format!(": {}", r))
                    .unwrap_or_default()
            );
        } else if let Some(answer) = &request.answer_text {
            let by = if request.answered_locally {
                "you"
            } else {
                request
                    .answered_by_display_name
                    .as_deref()
                    .unwrap_or("another operator")
            };
            println!("    answered by {}: {}", by, answer);
        }
    }
}

fn print_request(request: &PendingRequest) {
    println!(
        "{:<12} {:<24} {} [{}] timeout {}s",
        request.kind.to_string(),
        request.id,
        request.project_context,
        request.created_at.format("%H:%M:%S"),
        request.timeout_seconds
    );
    println!("    {}", request.payload);
}

pub fn print_peers(snapshot: &SessionSnapshot) {
    if snapshot.peers.is_empty() {
        println!("No other operators online");
        return;
    }
    for peer in &snapshot.peers {
        let marker = if snapshot.active_chat.as_deref() == Some(peer.client_id.as_str()) {
            "*"
        } else {
            " "
        };
        let unread = snapshot.unread.get(&peer.client_id).copied().unwrap_or(0);
        println!("{} {:<24} {} ({} unread)", marker, peer.client_id, peer.display_name, unread);
    }
}

pub fn print_thread(snapshot: &SessionSnapshot) {
    for entry in &snapshot.active_thread {
        println!(
            "[{}] {}: {}",
            entry.sent_at.format("%H:%M:%S"),
            entry.sender_display_name,
            entry.content
        );
    }
}

async fn stream_run(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, HttpApiError> {
    let initial_message = {
        let inner = state.inner.lock().await;
        let status = require_run(&inner, &run_id)?.status().clone();
        StreamMessage::run_status(&status)
    };

    Ok(ws.on_upgrade(move |socket| stream_socket(socket, state, run_id, initial_message)))
}

async fn stream_socket(
    mut socket: WebSocket,
    state: AppState,
    run_id: String,
    initial_message: StreamMessage,
) {
    if send_stream_message(&mut socket, &initial_message)
        .await
        .is_err()
    {
        return;
    }

    let mut rx = state.stream_tx.subscribe();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                        break;
                    }
                    _ => {}
                }
            }
            outgoing = rx.recv() => {
                match outgoing {
                    Ok(message) => {
                        if message.run_id != run_id {
                            continue;
                        }

                        if send_stream_message(&mut socket, &message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        let warning = StreamMessage::warning(
                            &run_id,
                            0,
                            format!("stream client lagged and skipped {skipped} message(s)"),
                        );

                        if send_stream_message(&mut socket, &warning).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        }
    }
}

async fn send_stream_message(
    socket: &mut WebSocket,
    message: &StreamMessage,
) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(message).map_err(axum::Error::new)?;
    socket.send(Message::Text(payload.into())).await
}

#[derive(Debug, Clone, Serialize)]
struct StreamMessage {
    schema_version: String,
    #[serde(rename = "type")]
    message_type: String,
    run_id: String,
    round: u32,
    reconnect_token: String,
    payload: Value,
}

impl StreamMessage {
    fn run_status(status: &RunStatus) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            message_type: "run.status".to_string(),
            run_id: status.run_id.clone(),
            round: status.current_round,
            reconnect_token: reconnect_token(status.current_round, "status"),
            payload: json!(status),
        }
    }

    fn round_committed(record: &RoundRecord) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            message_type: "round.committed".to_string(),
            run_id: record.run_id.clone(),
            round: record.round,
            reconnect_token: reconnect_token(record.round, "round"),
            payload: json!(record),
        }
    }

    fn warning(run_id: &str, round: u32, warning: String) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            message_type: "warning".to_string(),
            run_id: run_id.to_string(),
            round,
            reconnect_token: reconnect_token(round, "warning"),
            payload: json!({ "message": warning }),
        }
    }
}

#[derive(Clone)]
struct AppState {
    inner: std::sync::Arc<Mutex<ServerInner>>,
    stream_tx: broadcast::Sender<StreamMessage>,
}

impl AppState {
    fn new() -> Self {
        let (stream_tx, _) = broadcast::channel(4096);
        Self {
            inner: std::sync::Arc::new(Mutex::new(ServerInner::default())),
            stream_tx,
        }
    }
}

#[derive(Debug, Default)]
struct ServerInner {
    engine: Option<EngineApi>,
    emitted_round_count: usize,
}

fn require_run<'a>(inner: &'a ServerInner, run_id: &str) -> Result<&'a EngineApi, HttpApiError> {
    let Some(engine) = inner.engine.as_ref() else {
        return Err(HttpApiError::run_not_found(run_id, None));
    };

    if engine.run_id() != run_id {
        return Err(HttpApiError::run_not_found(run_id, Some(engine.run_id())));
    }

    Ok(engine)
}

fn require_run_mut<'a>(
    inner: &'a mut ServerInner,
    run_id: &str,
) -> Result<&'a mut EngineApi, HttpApiError> {
    let active_run_id = inner
        .engine
        .as_ref()
        .map(|engine| engine.run_id().to_string());
    let Some(engine) = inner.engine.as_mut() else {
        return Err(HttpApiError::run_not_found(run_id, None));
    };

    if engine.run_id() != run_id {
        return Err(HttpApiError::run_not_found(
            run_id,
            active_run_id.as_deref(),
        ));
    }

    Ok(engine)
}

fn collect_delta_messages(inner: &mut ServerInner) -> Vec<StreamMessage> {
    let mut messages = Vec::new();

    let Some(engine) = inner.engine.as_ref() else {
        return messages;
    };

    let new_rounds = &engine.rounds()[inner.emitted_round_count..];
    for record in new_rounds {
        messages.push(StreamMessage::round_committed(record));
    }
    inner.emitted_round_count = engine.rounds().len();

    messages.push(StreamMessage::run_status(engine.status()));

    if let Some(last_error) = engine.last_persistence_error() {
        messages.push(StreamMessage::warning(
            engine.run_id(),
            engine.status().current_round,
            last_error.to_string(),
        ));
    }

    messages
}

fn broadcast_messages(state: &AppState, messages: Vec<StreamMessage>) {
    for message in messages {
        let _ = state.stream_tx.send(message);
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CreateRunRequest {
    Setup(ScenarioSetup),
    WithOptions(CreateRunOptions),
}

#[derive(Debug, Deserialize)]
struct CreateRunOptions {
    setup: ScenarioSetup,
    auto_run: Option<bool>,
    sqlite_path: Option<String>,
    replace_existing: Option<bool>,
}

#[derive(Debug, Serialize)]
struct CreateRunResponse {
    schema_version: String,
    run_id: String,
    status: RunStatus,
    replaced_existing_run: bool,
    completed: bool,
}

#[derive(Debug, Deserialize)]
struct ListRunsQuery {
    page_size: Option<usize>,
    sqlite_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct ListRunsResponse {
    schema_version: String,
    active_run_id: Option<String>,
    runs: Vec<PersistedRunSummary>,
}

async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<ListRunsResponse>, HttpApiError> {
    let page_size = query.page_size.unwrap_or(200).max(1).min(MAX_PAGE_SIZE);

    let sqlite_path = query
        .sqlite_path
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(default_sqlite_path);

    let active_run_id = {
        let inner = state.inner.lock().await;
        inner
            .engine
            .as_ref()
            .map(|engine| engine.run_id().to_string())
    };

    let store = crate::persistence::SqliteRunStore::open(sqlite_path)
        .map_err(HttpApiError::from_persistence)?;
    let runs = store
        .list_runs(page_size)
        .map_err(HttpApiError::from_persistence)?;

    Ok(Json(ListRunsResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        active_run_id,
        runs,
    }))
}

async fn create_run(
    State(state): State<AppState>,
    Json(request): Json<CreateRunRequest>,
) -> Result<Json<CreateRunResponse>, HttpApiError> {
    let (setup, auto_run, sqlite_path, replace_existing) = match request {
        CreateRunRequest::Setup(setup) => (setup, false, Some(default_sqlite_path()), true),
        CreateRunRequest::WithOptions(options) => (
            options.setup,
            options.auto_run.unwrap_or(false),
            Some(
                options
                    .sqlite_path
                    .filter(|path| !path.trim().is_empty())
                    .unwrap_or_else(default_sqlite_path),
            ),
            options.replace_existing.unwrap_or(true),
        ),
    };

    let (response, messages) = {
        let mut inner = state.inner.lock().await;
        let replaced_existing_run = inner.engine.is_some();

        let mut engine = EngineApi::from_setup(setup).map_err(HttpApiError::from_scenario)?;
        if let Some(path) = sqlite_path {
            engine
                .attach_sqlite_store(path)
                .map_err(HttpApiError::from_persistence)?;
            engine
                .initialize_run_storage(replace_existing)
                .map_err(HttpApiError::from_persistence)?;
        }

        let completed = if auto_run {
            engine
                .run_to_completion()
                .map_err(HttpApiError::from_scenario)?;
            true
        } else {
            false
        };

        let status = engine.status().clone();
        inner.engine = Some(engine);
        inner.emitted_round_count = 0;

        let mut messages = Vec::new();
        if replaced_existing_run {
            messages.push(StreamMessage::warning(
                &status.run_id,
                status.current_round,
                "existing run state was replaced by POST /runs".to_string(),
            ));
        }
        messages.extend(collect_delta_messages(&mut inner));

        (
            CreateRunResponse {
                schema_version: SCHEMA_VERSION_V1.to_string(),
                run_id: status.run_id.clone(),
                status,
                replaced_existing_run,
                completed,
            },
            messages,
        )
    };

    broadcast_messages(&state, messages);
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SubmitActionRequest {
    Raw(Action),
    Wrapped { action: Action },
}

impl SubmitActionRequest {
    fn into_action(self) -> Action {
        match self {
            Self::Raw(action) => action,
            Self::Wrapped { action } => action,
        }
    }
}

#[derive(Debug, Serialize)]
struct SubmitActionResponse {
    schema_version: String,
    run_id: String,
    action_id: String,
    queued: bool,
    remaining_capital: u32,
    status: RunStatus,
}

async fn submit_action(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<SubmitActionRequest>,
) -> Result<Json<SubmitActionResponse>, HttpApiError> {
    let action = request.into_action();

    if action.run_id != run_id {
        return Err(HttpApiError::invalid_action(
            "action run_id does not match the addressed run",
            Some(format!(
                "action_run_id={} addressed_run_id={run_id}",
                action.run_id
            )),
        ));
    }
    if action.schema_version != SCHEMA_VERSION_V1 {
        return Err(HttpApiError::invalid_action(
            "unsupported action schema version",
            Some(format!("schema_version={}", action.schema_version)),
        ));
    }

    let (response, messages) = {
        let mut inner = state.inner.lock().await;
        let engine = require_run_mut(&mut inner, &run_id)?;

        let action_id = action.action_id.clone();
        let issuer = action.issuer.clone();
        let status = engine
            .queue_action(action)
            .map_err(HttpApiError::from_scenario)?;
        let remaining_capital = engine.remaining_capital(&issuer);

        let messages = collect_delta_messages(&mut inner);
        (
            SubmitActionResponse {
                schema_version: SCHEMA_VERSION_V1.to_string(),
                run_id: run_id.clone(),
                action_id,
                queued: true,
                remaining_capital,
                status,
            },
            messages,
        )
    };

    broadcast_messages(&state, messages);
    Ok(Json(response))
}

#[derive(Debug, Deserialize, Default)]
struct StepRequest {
    rounds: Option<u32>,
}

#[derive(Debug, Serialize)]
struct StepResponse {
    schema_version: String,
    run_id: String,
    committed: u32,
    status: RunStatus,
    latest_round: Option<RoundRecord>,
}

async fn step_run(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
    request: Option<Json<StepRequest>>,
) -> Result<Json<StepResponse>, HttpApiError> {
    let rounds = request
        .map(|Json(body)| body.rounds.unwrap_or(1))
        .unwrap_or(1)
        .max(1);

    let (response, messages) = {
        let mut inner = state.inner.lock().await;
        let engine = require_run_mut(&mut inner, &run_id)?;

        let (status, committed) = engine.step(rounds).map_err(HttpApiError::from_scenario)?;
        let latest_round = engine.rounds().last().cloned();

        let messages = collect_delta_messages(&mut inner);
        (
            StepResponse {
                schema_version: SCHEMA_VERSION_V1.to_string(),
                run_id: run_id.clone(),
                committed,
                status,
                latest_round,
            },
            messages,
        )
    };

    broadcast_messages(&state, messages);
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct RunToCompletionResponse {
    schema_version: String,
    run_id: String,
    status: RunStatus,
    outcome: contracts::Outcome,
}

async fn run_to_completion(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<RunToCompletionResponse>, HttpApiError> {
    let (response, messages) = {
        let mut inner = state.inner.lock().await;
        let engine = require_run_mut(&mut inner, &run_id)?;

        let (status, outcome) = engine
            .run_to_completion()
            .map_err(HttpApiError::from_scenario)?;

        let messages = collect_delta_messages(&mut inner);
        (
            RunToCompletionResponse {
                schema_version: SCHEMA_VERSION_V1.to_string(),
                run_id: run_id.clone(),
                status,
                outcome,
            },
            messages,
        )
    };

    broadcast_messages(&state, messages);
    Ok(Json(response))
}

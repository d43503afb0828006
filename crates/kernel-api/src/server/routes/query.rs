#[derive(Debug, Serialize)]
struct StatusResponse {
    schema_version: String,
    status: RunStatus,
    mean_support: f64,
    opinions: std::collections::BTreeMap<String, f64>,
}

async fn get_status(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, HttpApiError> {
    let inner = state.inner.lock().await;
    let engine = require_run(&inner, &run_id)?;

    let opinions = engine.opinions_by_id();
    let mean_support = if opinions.is_empty() {
        0.0
    } else {
        opinions.values().sum::<f64>() / opinions.len() as f64
    };

    Ok(Json(StatusResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        status: engine.status().clone(),
        mean_support,
        opinions,
    }))
}

#[derive(Debug, Deserialize, Default)]
struct PaginationQuery {
    cursor: Option<usize>,
    page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ActionLogPage {
    schema_version: String,
    run_id: String,
    cursor: usize,
    next_cursor: Option<usize>,
    entries: Vec<Action>,
}

async fn get_actions(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ActionLogPage>, HttpApiError> {
    let response = {
        let inner = state.inner.lock().await;
        let engine = require_run(&inner, &run_id)?;
        let entries = engine.action_log();
        let (start, end, next_cursor) = paginate(entries.len(), query.cursor, query.page_size)?;

        ActionLogPage {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: run_id.clone(),
            cursor: start,
            next_cursor,
            entries: entries[start..end].to_vec(),
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize, Default)]
struct RoundsQuery {
    from_round: Option<u32>,
    to_round: Option<u32>,
    cursor: Option<usize>,
    page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
struct RoundsPage {
    schema_version: String,
    run_id: String,
    cursor: usize,
    next_cursor: Option<usize>,
    rounds: Vec<RoundRecord>,
}

async fn get_rounds(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
    Query(query): Query<RoundsQuery>,
) -> Result<Json<RoundsPage>, HttpApiError> {
    let response = {
        let inner = state.inner.lock().await;
        let engine = require_run(&inner, &run_id)?;

        let current_round = engine.status().current_round;
        let from_round = query.from_round.unwrap_or(0);
        let to_round = query.to_round.unwrap_or(current_round);
        if to_round < from_round {
            return Err(HttpApiError::invalid_query(
                "to_round must be >= from_round",
                Some(format!("from_round={from_round} to_round={to_round}")),
            ));
        }

        let filtered: Vec<RoundRecord> = engine
            .rounds()
            .iter()
            .filter(|record| record.round >= from_round && record.round <= to_round)
            .cloned()
            .collect();
        let (start, end, next_cursor) = paginate(filtered.len(), query.cursor, query.page_size)?;

        RoundsPage {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: run_id.clone(),
            cursor: start,
            next_cursor,
            rounds: filtered[start..end].to_vec(),
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize, Default)]
struct TimelineQuery {
    from_round: Option<u32>,
    to_round: Option<u32>,
    #[serde(default)]
    event_types: Vec<String>,
    #[serde(rename = "event_types[]", default)]
    event_types_bracket: Vec<String>,
    subject_id: Option<String>,
    cursor: Option<usize>,
    page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
struct TimelinePage {
    schema_version: String,
    run_id: String,
    cursor: usize,
    next_cursor: Option<usize>,
    events: Vec<Event>,
}

async fn get_events(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
    Query(query): Query<TimelineQuery>,
) -> Result<Json<TimelinePage>, HttpApiError> {
    let response = {
        let inner = state.inner.lock().await;
        let engine = require_run(&inner, &run_id)?;

        let current_round = engine.status().current_round;
        let from_round = query.from_round.unwrap_or(0);
        let to_round = query.to_round.unwrap_or(current_round);
        if to_round < from_round {
            return Err(HttpApiError::invalid_query(
                "to_round must be >= from_round",
                Some(format!("from_round={from_round} to_round={to_round}")),
            ));
        }

        let mut requested_types = query.event_types;
        requested_types.extend(query.event_types_bracket);
        let event_type_filter = parse_event_type_filter(&requested_types)?;

        let mut filtered = Vec::new();
        for event in engine.events() {
            if event.round < from_round || event.round > to_round {
                continue;
            }
            if let Some(filter) = &event_type_filter {
                if !filter.contains(&event.event_type) {
                    continue;
                }
            }
            if let Some(subject_id) = &query.subject_id {
                if !event.subject_ids.iter().any(|id| id == subject_id) {
                    continue;
                }
            }
            filtered.push(event.clone());
        }

        let (start, end, next_cursor) = paginate(filtered.len(), query.cursor, query.page_size)?;

        TimelinePage {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            run_id: run_id.clone(),
            cursor: start,
            next_cursor,
            events: filtered[start..end].to_vec(),
        }
    };

    Ok(Json(response))
}

async fn get_influence(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<contracts::InfluenceReport>, HttpApiError> {
    let inner = state.inner.lock().await;
    let engine = require_run(&inner, &run_id)?;
    Ok(Json(engine.influence_report()))
}

#[derive(Debug, Deserialize, Default)]
struct ProbeQuery {
    max_steps: Option<u32>,
    tolerance: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ProbeResponse {
    schema_version: String,
    run_id: String,
    opinions: std::collections::BTreeMap<String, f64>,
    steps: u32,
    converged: bool,
}

async fn get_probe(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
    Query(query): Query<ProbeQuery>,
) -> Result<Json<ProbeResponse>, HttpApiError> {
    let inner = state.inner.lock().await;
    let engine = require_run(&inner, &run_id)?;

    let result = engine.probe(query.max_steps, query.tolerance);
    let opinions = engine
        .stakeholders()
        .iter()
        .map(|stakeholder| stakeholder.stakeholder_id.clone())
        .zip(result.opinions.iter().copied())
        .collect();

    Ok(Json(ProbeResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        run_id: run_id.clone(),
        opinions,
        steps: result.steps,
        converged: result.converged,
    }))
}

async fn get_export(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<contracts::SimulationRun>, HttpApiError> {
    let inner = state.inner.lock().await;
    let engine = require_run(&inner, &run_id)?;
    Ok(Json(engine.export_run()))
}

#[derive(Debug, Deserialize, Default)]
struct ReplayQuery {
    round: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ReplayResponse {
    schema_version: String,
    run_id: String,
    round: Option<RoundRecord>,
    events: Vec<Event>,
}

async fn get_replay(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
    Query(query): Query<ReplayQuery>,
) -> Result<Json<ReplayResponse>, HttpApiError> {
    let inner = state.inner.lock().await;
    let engine = require_run(&inner, &run_id)?;

    let round = query.round.unwrap_or(engine.status().current_round);
    let slice = engine
        .replay_at_round(&run_id, round)
        .map_err(HttpApiError::from_persistence)?;

    Ok(Json(ReplayResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        run_id: run_id.clone(),
        round: slice.round,
        events: slice.events,
    }))
}

use crate::commands::health::health;
use crate::error::AppError;
use crate::sniper::journal::{action_stats, recent_actions, ActionJournalEntry};
use crate::state::AppState;

const RECENT_ACTIONS_SHOWN: u32 = 5;
const HELP_TEXT: &str = "commands: start|stop|pause|resume <query-id|all>, status [query-id], health, stats, quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    Query(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Start(Target),
    Stop(Target),
    Pause(Target),
    Resume(Target),
    Status(Option<String>),
    Health,
    Stats,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleReply {
    Output(String),
    Quit,
}

fn parse_target(verb: &str, argument: Option<&str>) -> Result<Target, AppError> {
    match argument {
        Some("all") => Ok(Target::All),
        Some(query_id) => Ok(Target::Query(query_id.to_string())),
        None => Err(AppError::InvalidArgument(format!(
            "{verb} needs a query id or 'all'"
        ))),
    }
}

impl ControlCommand {
    pub fn parse(line: &str) -> Result<Self, AppError> {
        let mut words = line.split_whitespace();
        let verb = words
            .next()
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| AppError::InvalidArgument("empty command".to_string()))?;
        let argument = words.next();
        if words.next().is_some() {
            return Err(AppError::InvalidArgument(format!(
                "too many arguments for '{verb}'"
            )));
        }

        match verb.as_str() {
            "start" => Ok(Self::Start(parse_target(&verb, argument)?)),
            "stop" => Ok(Self::Stop(parse_target(&verb, argument)?)),
            "pause" => Ok(Self::Pause(parse_target(&verb, argument)?)),
            "resume" => Ok(Self::Resume(parse_target(&verb, argument)?)),
            "status" => Ok(Self::Status(argument.map(str::to_string))),
            "health" => Ok(Self::Health),
            "stats" => Ok(Self::Stats),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(AppError::InvalidArgument(format!(
                "unknown command '{other}'"
            ))),
        }
    }
}

fn summarize(verb: &str, query_ids: &[String]) -> String {
    if query_ids.is_empty() {
        format!("{verb}: nothing to do")
    } else {
        format!("{verb}: {}", query_ids.join(", "))
    }
}

fn status_lines(state: &AppState, query_id: Option<&str>) -> Result<String, AppError> {
    let queries = state.engine.queries();
    let mut lines = Vec::with_capacity(queries.len());
    for query in queries
        .iter()
        .filter(|query| query_id.map_or(true, |wanted| wanted == query.id))
    {
        let query_state = state.engine.query_state(&query.id);
        lines.push(format!(
            "{:<12} {:<8} {:<12} {}",
            query.id,
            query_state.status.as_str(),
            if query_state.connected {
                "connected"
            } else {
                "disconnected"
            },
            query.display_name
        ));
    }

    match query_id {
        Some(query_id) if lines.is_empty() => Err(AppError::UnknownQuery(query_id.to_string())),
        _ => Ok(lines.join("\n")),
    }
}

fn format_action(entry: &ActionJournalEntry) -> String {
    match (entry.success, entry.elapsed_ms, entry.failure_reason.as_deref()) {
        (true, Some(elapsed_ms), _) => format!(
            "  [{}] {} - {} claimed in {elapsed_ms}ms",
            entry.query_id, entry.item_name, entry.price
        ),
        (_, _, reason) => format!(
            "  [{}] {} - {} failed: {}",
            entry.query_id,
            entry.item_name,
            entry.price,
            reason.unwrap_or("unknown")
        ),
    }
}

pub async fn execute(state: &AppState, command: ControlCommand) -> Result<ConsoleReply, AppError> {
    let engine = &state.engine;
    let output = match command {
        ControlCommand::Start(Target::All) => summarize("started", &engine.start_all()),
        ControlCommand::Start(Target::Query(query_id)) => {
            let query_state = engine.start_query(&query_id)?;
            format!("{query_id}: {}", query_state.status.as_str())
        }
        ControlCommand::Stop(Target::All) => summarize("stopped", &engine.stop_all().await),
        ControlCommand::Stop(Target::Query(query_id)) => {
            let query_state = engine.stop_query(&query_id).await?;
            format!("{query_id}: {}", query_state.status.as_str())
        }
        ControlCommand::Pause(Target::All) => summarize("paused", &engine.pause_all()),
        ControlCommand::Pause(Target::Query(query_id)) => {
            let query_state = engine.pause_query(&query_id)?;
            format!("{query_id}: {}", query_state.status.as_str())
        }
        ControlCommand::Resume(Target::All) => summarize("resumed", &engine.resume_all()),
        ControlCommand::Resume(Target::Query(query_id)) => {
            let query_state = engine.resume_query(&query_id)?;
            format!("{query_id}: {}", query_state.status.as_str())
        }
        ControlCommand::Status(query_id) => status_lines(state, query_id.as_deref())?,
        ControlCommand::Health => simd_json::to_string(&health(state).await)?,
        ControlCommand::Stats => {
            let stats = action_stats(&state.db_pool).await?;
            let recent = recent_actions(&state.db_pool, RECENT_ACTIONS_SHOWN).await?;
            let mut lines = vec![simd_json::to_string(&stats)?];
            lines.extend(recent.iter().map(format_action));
            lines.join("\n")
        }
        ControlCommand::Help => HELP_TEXT.to_string(),
        ControlCommand::Quit => return Ok(ConsoleReply::Quit),
    };

    Ok(ConsoleReply::Output(output))
}

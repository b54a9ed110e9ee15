// Command handlers behind the terminal front end

use chrono::Local;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::SubmitError;
use crate::models::{AttachmentRef, Conversation, GroundingSource, Message, Sender};
use crate::orchestrator::SuggestedPrompt;
use crate::state::AppState;

pub const HELP_TEXT: &str = "\
Type a message to send it. Commands:
  /attach <path>         stage a file for the next message
  /detach <n>            unstage attachment number n
  /staged                list staged attachments
  /new                   start a new conversation
  /history               list saved conversations
  /open <id>             open a saved conversation (id prefix is enough)
  /delete <id>           delete a saved conversation
  /clear-history         delete every saved conversation
  /whoami                show the signed-in user
  /login <user> <pass>   sign in
  /logout                sign out
  /username <name>       change your username
  /password <cur> <new>  change your password
  /help                  show this help
  /quit                  exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Attach(PathBuf),
    Detach(usize),
    Staged,
    New,
    History,
    Open(String),
    Delete(String),
    ClearHistory,
    WhoAmI,
    Login { username: String, password: String },
    Logout,
    Username(String),
    Password { current: String, new: String },
    Help,
    Quit,
    Invalid(String),
}

pub enum Outcome {
    Output(String),
    Quit,
}

/// Parses one input line. Anything not starting with `/` is a message.
pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Send(line.to_string());
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let mut words = arg.split_whitespace();

    match (name, arg.is_empty()) {
        ("attach", false) => Command::Attach(PathBuf::from(arg)),
        ("detach", false) => match arg.parse::<usize>() {
            Ok(n) if n > 0 => Command::Detach(n),
            _ => Command::Invalid(format!("Not an attachment number: {}", arg)),
        },
        ("staged", _) => Command::Staged,
        ("new", _) => Command::New,
        ("history", _) => Command::History,
        ("open", false) => Command::Open(arg.to_string()),
        ("delete", false) => Command::Delete(arg.to_string()),
        ("clear-history", _) => Command::ClearHistory,
        ("whoami", _) => Command::WhoAmI,
        ("login", false) => match (words.next(), words.next()) {
            (Some(username), Some(password)) => Command::Login {
                username: username.to_string(),
                password: password.to_string(),
            },
            _ => Command::Invalid("Usage: /login <user> <password>".to_string()),
        },
        ("logout", _) => Command::Logout,
        ("username", false) => Command::Username(arg.to_string()),
        ("password", false) => match (words.next(), words.next()) {
            (Some(current), Some(new)) => Command::Password {
                current: current.to_string(),
                new: new.to_string(),
            },
            _ => Command::Invalid("Usage: /password <current> <new>".to_string()),
        },
        ("help", _) => Command::Help,
        ("quit" | "exit", _) => Command::Quit,
        (other, _) => Command::Invalid(format!("Unknown or incomplete command: /{} (try /help)", other)),
    }
}

pub async fn dispatch(state: &AppState, command: Command) -> Result<Outcome, String> {
    let output = match command {
        Command::Send(text) => {
            let reply = send_message(state, text).await?;
            let mut out = render_message(&reply);
            let prompts = suggested_prompts(state)?;
            if !prompts.is_empty() {
                out.push_str("\n\nYou could ask:");
                for prompt in prompts {
                    out.push_str(&format!("\n  * {}", prompt.text));
                }
            }
            out
        }
        Command::Attach(path) => {
            let attachment = attach_file(state, path).await?;
            format!("Attached {} ({})", attachment.name, attachment.mime_type)
        }
        Command::Detach(n) => {
            let removed = detach_file(state, n - 1)?;
            format!("Removed {}", removed.name)
        }
        Command::Staged => {
            let staged = list_staged(state)?;
            if staged.is_empty() {
                "No attachments staged.".to_string()
            } else {
                staged
                    .iter()
                    .enumerate()
                    .map(|(i, a)| format!("{}. {} ({})", i + 1, a.name, a.mime_type))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        Command::New => render_conversation(&new_conversation(state)?),
        Command::History => {
            let conversations = list_conversations(state).await?;
            if conversations.is_empty() {
                "No saved conversations.".to_string()
            } else {
                conversations.iter().map(render_history_entry).collect::<Vec<_>>().join("\n")
            }
        }
        Command::Open(id) => render_conversation(&open_conversation(state, id).await?),
        Command::Delete(id) => {
            let deleted = delete_conversation(state, id).await?;
            format!("Deleted conversation {}", deleted)
        }
        Command::ClearHistory => {
            clear_history(state).await?;
            "History cleared.".to_string()
        }
        Command::WhoAmI => whoami(state).await?,
        Command::Login { username, password } => {
            let user = login(state, username, password).await?;
            format!("Signed in as {} <{}>", user.username, user.email)
        }
        Command::Logout => {
            logout(state).await?;
            "Signed out.".to_string()
        }
        Command::Username(name) => {
            let user = update_username(state, name).await?;
            format!("Username changed to {}", user.username)
        }
        Command::Password { current, new } => {
            change_password(state, current, new).await?;
            "Password changed.".to_string()
        }
        Command::Help => HELP_TEXT.to_string(),
        Command::Quit => return Ok(Outcome::Quit),
        Command::Invalid(message) => return Err(message),
    };
    Ok(Outcome::Output(output))
}

fn busy(e: SubmitError) -> String {
    log::warn!("Command rejected: {}", e);
    e.to_string()
}

/// Sends one turn. On provider failure the error reply already sits in the
/// conversation log, and its text is what the caller gets back.
pub async fn send_message(state: &AppState, text: String) -> Result<Message, String> {
    log::info!("Submitting a turn ({} chars)", text.len());
    let mut orchestrator = state.try_orchestrator().map_err(busy)?;
    match orchestrator.submit(&text).await {
        Ok(reply) => Ok(reply),
        Err(SubmitError::Provider(e)) => {
            log::error!("Provider call failed: {:?}", e);
            let shown = orchestrator
                .conversation()
                .messages
                .last()
                .and_then(|m| m.text.clone())
                .unwrap_or_else(|| e.to_string());
            Err(shown)
        }
        Err(e) => {
            log::warn!("Turn not submitted: {}", e);
            Err(e.to_string())
        }
    }
}

pub fn suggested_prompts(state: &AppState) -> Result<Vec<SuggestedPrompt>, String> {
    let orchestrator = state.try_orchestrator().map_err(busy)?;
    Ok(orchestrator.suggested_prompts())
}

pub async fn attach_file(state: &AppState, path: PathBuf) -> Result<AttachmentRef, String> {
    log::info!("Attaching file: {}", path.display());
    let mut orchestrator = state.try_orchestrator().map_err(busy)?;
    let staged = orchestrator.stage_path(&path).await.map(AttachmentRef::clone);
    match staged {
        Ok(attachment) => Ok(attachment),
        Err(e) => {
            log::error!("Failed to attach {}: {:?}", path.display(), e);
            Err(e.localized(orchestrator.localizer()))
        }
    }
}

pub fn detach_file(state: &AppState, index: usize) -> Result<AttachmentRef, String> {
    let mut orchestrator = state.try_orchestrator().map_err(busy)?;
    orchestrator
        .remove_staged(index)
        .ok_or_else(|| format!("No staged attachment number {}", index + 1))
}

pub fn list_staged(state: &AppState) -> Result<Vec<AttachmentRef>, String> {
    let orchestrator = state.try_orchestrator().map_err(busy)?;
    Ok(orchestrator.staged().to_vec())
}

pub fn new_conversation(state: &AppState) -> Result<Conversation, String> {
    log::info!("Starting a new conversation");
    let mut orchestrator = state.try_orchestrator().map_err(busy)?;
    orchestrator.start_new();
    Ok(orchestrator.conversation().clone())
}

pub async fn list_conversations(state: &AppState) -> Result<Vec<Conversation>, String> {
    let user_id = state.try_orchestrator().map_err(busy)?.user_id().to_string();
    Ok(state.history.list(&user_id).await)
}

/// Resolves a full id or a unique prefix of one against the saved list.
async fn resolve_conversation_id(state: &AppState, user_id: &str, id: &str) -> Result<Uuid, String> {
    if let Ok(uuid) = Uuid::parse_str(id) {
        return Ok(uuid);
    }
    let matches: Vec<Uuid> = state
        .history
        .list(user_id)
        .await
        .iter()
        .map(|c| c.id)
        .filter(|uuid| uuid.to_string().starts_with(id))
        .collect();
    match matches.as_slice() {
        [only] => Ok(*only),
        [] => {
            let err_msg = format!("No saved conversation matches ID: {}", id);
            log::error!("{}", err_msg);
            Err(err_msg)
        }
        _ => Err(format!("ID prefix '{}' is ambiguous", id)),
    }
}

pub async fn open_conversation(state: &AppState, conversation_id: String) -> Result<Conversation, String> {
    log::info!("Requested to open conversation ID: {}", conversation_id);
    let mut orchestrator = state.try_orchestrator().map_err(busy)?;
    let user_id = orchestrator.user_id().to_string();
    let uuid = resolve_conversation_id(state, &user_id, &conversation_id).await?;
    if orchestrator.load(uuid).await {
        Ok(orchestrator.conversation().clone())
    } else {
        Err(format!("Conversation {} not found", uuid))
    }
}

pub async fn delete_conversation(state: &AppState, conversation_id: String) -> Result<Uuid, String> {
    log::warn!("Requested to delete conversation ID: {}", conversation_id);
    let user_id = state.try_orchestrator().map_err(busy)?.user_id().to_string();
    let uuid = resolve_conversation_id(state, &user_id, &conversation_id).await?;
    state.history.delete(&user_id, uuid).await;
    Ok(uuid)
}

pub async fn clear_history(state: &AppState) -> Result<(), String> {
    let user_id = state.try_orchestrator().map_err(busy)?.user_id().to_string();
    log::warn!("Clearing all saved conversations for '{}'", user_id);
    state.history.clear_all(&user_id).await;
    Ok(())
}

pub async fn whoami(state: &AppState) -> Result<String, String> {
    let user_id = state.try_orchestrator().map_err(busy)?.user_id().to_string();
    match state.identity.current().await {
        Ok(Some(user)) => Ok(format!("{} <{}> (history: {})", user.username, user.email, user_id)),
        Ok(None) => Ok(format!("Not signed in (history: {})", user_id)),
        Err(e) => {
            log::error!("Failed to read session: {:?}", e);
            Err(format!("Failed to read session: {}", e))
        }
    }
}

pub async fn login(
    state: &AppState,
    username: String,
    password: String,
) -> Result<crate::identity::UserIdentity, String> {
    state.identity.login(&username, &password).await.map_err(|e| {
        log::error!("Login failed for '{}': {:?}", username, e);
        e.to_string()
    })
}

pub async fn logout(state: &AppState) -> Result<(), String> {
    state.identity.logout().await.map_err(|e| {
        log::error!("Logout failed: {:?}", e);
        e.to_string()
    })
}

pub async fn update_username(state: &AppState, username: String) -> Result<crate::identity::UserIdentity, String> {
    state.identity.update_username(&username).await.map_err(|e| {
        log::error!("Failed to update username: {:?}", e);
        e.to_string()
    })
}

pub async fn change_password(state: &AppState, current: String, new: String) -> Result<(), String> {
    state.identity.change_password(&current, &new).await.map_err(|e| {
        log::error!("Failed to change password: {:?}", e);
        e.to_string()
    })
}

// --- Rendering ---

fn render_sources(sources: &[GroundingSource]) -> String {
    sources
        .iter()
        .map(|s| format!("\n  source: {} ({})", s.title, s.uri))
        .collect()
}

pub fn render_message(message: &Message) -> String {
    match message.sender {
        Sender::User => {
            let mut out = format!("you> {}", message.text.as_deref().unwrap_or_default());
            if !message.attachments.is_empty() {
                let names: Vec<&str> = message.attachments.iter().map(|a| a.name.as_str()).collect();
                out.push_str(&format!(" [{}]", names.join(", ")));
            }
            out
        }
        Sender::Ai => {
            let mut out = String::from("ai> ");
            if let Some(text) = message.trimmed_text() {
                out.push_str(text);
            }
            if let Some(analysis) = &message.analysis {
                if let Some(risk) = analysis.risk_level {
                    out.push_str(&format!("[{}] {}", risk.as_str(), analysis.explanation));
                    for suggestion in &analysis.suggestions {
                        out.push_str(&format!("\n  - {}", suggestion));
                    }
                }
                if let Some(sources) = &analysis.grounding_sources {
                    out.push_str(&render_sources(sources));
                }
            }
            out
        }
    }
}

pub fn render_conversation(conversation: &Conversation) -> String {
    conversation
        .messages
        .iter()
        .map(render_message)
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_history_entry(conversation: &Conversation) -> String {
    let id = conversation.id.to_string();
    format!(
        "{}  {}  ({})",
        &id[..8],
        conversation.name,
        conversation.last_activity_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisResult, RiskLevel};

    #[test]
    fn test_plain_text_is_a_message() {
        assert_eq!(parse_command("  is this legit?  "), Command::Send("is this legit?".to_string()));
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("/attach ~/My Files/a.png"), Command::Attach(PathBuf::from("~/My Files/a.png")));
        assert_eq!(parse_command("/detach 2"), Command::Detach(2));
        assert!(matches!(parse_command("/detach 0"), Command::Invalid(_)));
        assert!(matches!(parse_command("/attach"), Command::Invalid(_)));
        assert_eq!(parse_command("/open 1a2b"), Command::Open("1a2b".to_string()));
        assert_eq!(
            parse_command("/login testuser password123"),
            Command::Login {
                username: "testuser".to_string(),
                password: "password123".to_string()
            }
        );
        assert!(matches!(parse_command("/password onlyone"), Command::Invalid(_)));
        assert_eq!(parse_command("/quit"), Command::Quit);
        assert!(matches!(parse_command("/frobnicate"), Command::Invalid(_)));
    }

    #[test]
    fn test_render_analysis_message() {
        let mut analysis = AnalysisResult::unknown("Looks like phishing", vec!["Do not click".into()]);
        analysis.risk_level = Some(RiskLevel::High);
        analysis.grounding_sources = Some(vec![GroundingSource {
            uri: "https://a.example".into(),
            title: "A".into(),
        }]);
        let rendered = render_message(&Message::ai_analysis(3, analysis));
        assert_eq!(
            rendered,
            "ai> [HIGH] Looks like phishing\n  - Do not click\n  source: A (https://a.example)"
        );
    }
}

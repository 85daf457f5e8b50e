//! Per-chat game sessions and the Telegram rendering of game events.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use teloxide::prelude::*;
use teloxide::types::{ChatAction, KeyboardButton, KeyboardMarkup, ParseMode};
use teloxide::utils::html;
use tokio::sync::{mpsc, Mutex};

use crate::identity::{participant_for, IdentityStorage, StorageError};
use crate::quiz::ai_helper::QuizHelper;
use crate::quiz::Question;
use crate::room::controller::Resolution;
use crate::room::{GameEvent, ParticipantId, Phase, RoomController, RoomError, RoomStore};
use crate::{HandlerResult, QuizDialogue, State};

type Sessions = Arc<Mutex<HashMap<ChatId, Arc<RoomController>>>>;

pub const CREATE_ROOM: &str = "Create room";
pub const JOIN_ROOM: &str = "Join room";
pub const LEAVE: &str = "Leave";
pub const PLAY_AGAIN: &str = "Play again";
pub const BACK: &str = "Back";

const CHOICE_LETTERS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Everything handlers share: the rooms, who each chat is, and the
/// controller driving each chat's game. A chat only holds a session while
/// it is in a room, so there is at most one per chat in a room.
pub struct Services {
    rooms: Arc<RoomStore>,
    identities: IdentityStorage,
    helper: Option<Arc<QuizHelper>>,
    resolve_delay: Duration,
    sessions: Sessions,
}

impl Services {
    pub fn new(
        rooms: Arc<RoomStore>,
        identities: IdentityStorage,
        helper: Option<Arc<QuizHelper>>,
        resolve_delay: Duration,
    ) -> Self {
        Self {
            rooms,
            identities,
            helper,
            resolve_delay,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The chat's controller, started on first use together with the task
    /// that turns its events into messages.
    pub async fn controller(
        &self,
        bot: &Bot,
        dialogue: &QuizDialogue,
    ) -> Result<Arc<RoomController>, StorageError> {
        let chat = dialogue.chat_id();
        let mut sessions = self.sessions.lock().await;
        if let Some(controller) = sessions.get(&chat) {
            return Ok(controller.clone());
        }

        let me = participant_for(&self.identities, chat).await?;
        let (controller, events) = RoomController::new(self.rooms.clone(), me, self.resolve_delay);
        let controller = Arc::new(controller);
        tokio::spawn(forward_events(
            bot.clone(),
            dialogue.clone(),
            controller.participant().clone(),
            events,
            self.helper.clone(),
            self.sessions.clone(),
        ));
        sessions.insert(chat, controller.clone());
        debug!("Started session for chat {}", chat.0);
        Ok(controller)
    }

    /// Drops the chat's controller. Its forwarding task ends once the
    /// last pending event is delivered.
    pub async fn end_session(&self, chat: ChatId) {
        if self.sessions.lock().await.remove(&chat).is_some() {
            debug!("Ended session for chat {}", chat.0);
        }
    }
}

async fn forward_events(
    bot: Bot,
    dialogue: QuizDialogue,
    me: ParticipantId,
    mut events: mpsc::UnboundedReceiver<GameEvent>,
    helper: Option<Arc<QuizHelper>>,
    sessions: Sessions,
) {
    let mut phase = Phase::Lobby;
    while let Some(event) = events.recv().await {
        if event == GameEvent::RoomClosed {
            sessions.lock().await.remove(&dialogue.chat_id());
        }
        if let Err(err) = present(&bot, &dialogue, &me, helper.as_deref(), &mut phase, event).await {
            warn!(
                "Could not deliver game update to chat {}: {}",
                dialogue.chat_id().0,
                err
            );
        }
    }
}

async fn present(
    bot: &Bot,
    dialogue: &QuizDialogue,
    me: &ParticipantId,
    helper: Option<&QuizHelper>,
    phase: &mut Phase,
    event: GameEvent,
) -> HandlerResult {
    let chat = dialogue.chat_id();
    match event {
        GameEvent::PhaseChanged(next) => {
            let previous = std::mem::replace(phase, next);
            let Some(text) = phase_text(previous, next) else {
                return Ok(());
            };
            let keyboard = if next == Phase::GameOver {
                game_over_keyboard()
            } else {
                leave_keyboard()
            };
            bot.send_message(chat, text).reply_markup(keyboard).await?;
        }
        GameEvent::Question {
            index,
            total,
            question,
        } => {
            bot.send_message(chat, question_text(index, total, &question))
                .parse_mode(ParseMode::Html)
                .reply_markup(choice_keyboard(&question))
                .await?;
        }
        GameEvent::OpponentAnswered => {
            bot.send_message(chat, "Your opponent has answered.").await?;
        }
        GameEvent::Resolved(resolution) => {
            let note = match (&resolution.question, resolution.answers.get(me)) {
                (Some(question), Some(&chosen)) if !question.is_correct(chosen) => {
                    explain(bot, chat, helper, question, chosen).await
                }
                _ => None,
            };
            bot.send_message(chat, reveal_text(&resolution, me, note.as_deref()))
                .parse_mode(ParseMode::Html)
                .await?;
        }
        GameEvent::RoomClosed => {
            dialogue.update(State::Lobby).await?;
            bot.send_message(chat, "The room was closed. Create a new one or join another?")
                .reply_markup(lobby_keyboard())
                .await?;
        }
    }
    Ok(())
}

async fn explain(
    bot: &Bot,
    chat: ChatId,
    helper: Option<&QuizHelper>,
    question: &Question,
    chosen: usize,
) -> Option<String> {
    if let Some(rationale) = &question.rationale {
        return Some(rationale.clone());
    }
    let helper = helper?;
    // Only a courtesy, the explanation is sent either way.
    let _ = bot.send_chat_action(chat, ChatAction::Typing).await;
    match helper.explain_wrong_answer(question, chosen).await {
        Ok(explanation) => Some(explanation),
        Err(err) => {
            warn!("No explanation for {}: {}", question.id, err);
            None
        }
    }
}

/// Message for a phase transition. Transitions the handlers already
/// answer for (entering a room, leaving it) stay silent.
pub fn phase_text(previous: Phase, next: Phase) -> Option<&'static str> {
    match (previous, next) {
        (Phase::Playing | Phase::GameOver, Phase::Waiting) => {
            Some("Your opponent left. Waiting for someone else to join…")
        }
        (Phase::GameOver, Phase::Playing) => Some("New round! Scores are back to zero."),
        (_, Phase::Playing) => Some("Both players are here. Let's go!"),
        (_, Phase::GameOver) => Some("Game over! Play again or leave the room?"),
        _ => None,
    }
}

pub fn question_text(index: usize, total: usize, question: &Question) -> String {
    let choices = question
        .choices
        .iter()
        .enumerate()
        .map(|(i, choice)| choice_label(i, choice))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "<b>Question {}/{}</b> · {} · {}\n\n{}\n\n{}",
        index + 1,
        total,
        question.subject,
        question.difficulty,
        question.stem,
        choices
    )
}

fn choice_label(index: usize, choice: &str) -> String {
    match CHOICE_LETTERS.chars().nth(index) {
        Some(letter) => format!("{}) {}", letter, html::escape(choice)),
        None => html::escape(choice),
    }
}

/// Choice index picked by a keyboard button ("B) text") or a bare letter.
pub fn parse_choice(text: &str) -> Option<usize> {
    let text = text.trim();
    let mut chars = text.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    match chars.next() {
        None | Some(')') => CHOICE_LETTERS.find(letter),
        Some(_) => None,
    }
}

pub fn reveal_text(resolution: &Resolution, me: &ParticipantId, note: Option<&str>) -> String {
    let mut lines = Vec::new();
    let mine = resolution.is_correct(me);
    lines.push(if mine { "✅ Correct!" } else { "❌ Not quite." }.to_string());

    if let Some(question) = &resolution.question {
        if let Some((index, text)) = question.correct_choice() {
            if !mine {
                lines.push(format!("Correct answer: {}", choice_label(index, text)));
            }
        }
    }
    let opponent = resolution.answers.keys().find(|p| *p != me);
    if let Some(opponent) = opponent {
        let verdict = if resolution.is_correct(opponent) {
            "got it right"
        } else {
            "got it wrong"
        };
        lines.push(format!("Your opponent {}.", verdict));
    }
    if let Some(note) = note {
        lines.push(String::new());
        lines.push(format!("<i>{}</i>", html::escape(note)));
    }

    lines.push(String::new());
    let heading = if resolution.last { "Final score" } else { "Score" };
    lines.push(format!("<b>{}:</b> {}", heading, scoreboard(&resolution.scores, me)));
    lines.join("\n")
}

pub fn scoreboard(scores: &BTreeMap<ParticipantId, u32>, me: &ParticipantId) -> String {
    let mine = scores.get(me).copied().unwrap_or(0);
    match scores.iter().find(|(p, _)| *p != me) {
        Some((_, theirs)) => format!("you {} : {} opponent", mine, theirs),
        None => format!("you {}", mine),
    }
}

pub fn room_error_text(err: &RoomError) -> &'static str {
    match err {
        RoomError::NotFound | RoomError::InvalidCode => {
            "No room with that code. Check the code and try again."
        }
        RoomError::Full => "That room is full.",
        RoomError::NoMatchingQuestions => {
            "No questions match those choices. Try another subject or difficulty."
        }
        RoomError::AlreadyExists => "Could not find a free room code, please try again.",
        RoomError::NotConfigured => "Rooms are unavailable right now.",
        RoomError::NotMember | RoomError::Store(_) | RoomError::Malformed(_) => {
            "Something went wrong, please try again."
        }
    }
}

pub fn lobby_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![
        KeyboardButton::new(CREATE_ROOM),
        KeyboardButton::new(JOIN_ROOM),
    ]])
}

pub fn leave_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![KeyboardButton::new(LEAVE)]])
}

pub fn game_over_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![
        KeyboardButton::new(PLAY_AGAIN),
        KeyboardButton::new(LEAVE),
    ]])
}

pub fn choice_keyboard(question: &Question) -> KeyboardMarkup {
    let mut rows: Vec<Vec<KeyboardButton>> = question
        .choices
        .iter()
        .enumerate()
        .filter_map(|(i, choice)| {
            let letter = CHOICE_LETTERS.chars().nth(i)?;
            Some(vec![KeyboardButton::new(format!("{}) {}", letter, choice))])
        })
        .collect();
    rows.push(vec![KeyboardButton::new(LEAVE)]);
    KeyboardMarkup::new(rows)
}

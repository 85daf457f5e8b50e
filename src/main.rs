mod config;
mod identity;
mod quiz;
mod room;
mod session;
mod store;

use std::sync::Arc;

use dotenv::dotenv;
use log::{error, info, warn};
use teloxide::{
    dispatching::dialogue::{serializer::Json, InMemStorage, SqliteStorage, Storage},
    prelude::*,
    types::{KeyboardButton, KeyboardMarkup},
};

use config::{Config, StoreSetting};
use quiz::{ai_helper::QuizHelper, Catalog, Difficulty, Subject};
use room::{Phase, RoomCode, RoomConfig, RoomStore};
use session::{room_error_text, Services};
use store::MemoryStore;

type QuizDialogue = Dialogue<State, InMemStorage<State>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Clone, Default)]
pub enum State {
    #[default]
    Start,
    Lobby,
    ChooseSubject,
    ChooseDifficulty {
        modules: Vec<Subject>,
    },
    ChooseCount {
        modules: Vec<Subject>,
        difficulties: Vec<Difficulty>,
    },
    AwaitRoomCode,
    InRoom,
}

const ANY_SUBJECT: &str = "Mixed";
const ANY_DIFFICULTY: &str = "Any";

#[tokio::main]
async fn main() -> HandlerResult {
    dotenv().ok();
    pretty_env_logger::init();
    info!("Starting duel quiz bot...");

    let config = Config::from_env()?;

    let catalog = match &config.catalog_path {
        Some(path) => Catalog::open(path)?,
        None => Catalog::bundled()?,
    };
    if catalog.is_empty() {
        warn!("The question catalog is empty, no room can be created");
    }
    info!("Loaded {} questions", catalog.len());
    let catalog = Arc::new(catalog);

    let rooms = Arc::new(match &config.store {
        StoreSetting::Memory => RoomStore::new(Arc::new(MemoryStore::new()), catalog),
        StoreSetting::Unsupported(name) => {
            warn!("Unknown room store {:?}", name);
            RoomStore::unconfigured(catalog)
        }
    });

    let identities: identity::IdentityStorage =
        SqliteStorage::open(&config.identity_db, Json).await?.erase();
    info!("Participant identities are kept in {}", config.identity_db);

    let helper = match config.chatgpt_api_key.as_deref().map(|key| QuizHelper::connect(key)) {
        Some(Ok(helper)) => Some(Arc::new(helper)),
        Some(Err(err)) => {
            error!("Unable to connect with ChatGPT, explanations are off: {}", err);
            None
        }
        None => None,
    };

    let services = Arc::new(Services::new(
        rooms,
        identities,
        helper,
        config.resolve_delay,
    ));

    let bot = Bot::from_env();

    Dispatcher::builder(
        bot,
        Update::filter_message()
            .enter_dialogue::<Message, InMemStorage<State>, State>()
            .branch(dptree::case![State::Start].endpoint(start))
            .branch(dptree::case![State::Lobby].endpoint(receive_lobby_choice))
            .branch(dptree::case![State::ChooseSubject].endpoint(receive_subject))
            .branch(dptree::case![State::ChooseDifficulty { modules }].endpoint(receive_difficulty))
            .branch(
                dptree::case![State::ChooseCount {
                    modules,
                    difficulties
                }]
                .endpoint(receive_count),
            )
            .branch(dptree::case![State::AwaitRoomCode].endpoint(receive_room_code))
            .branch(dptree::case![State::InRoom].endpoint(in_room)),
    )
    .dependencies(dptree::deps![InMemStorage::<State>::new(), services])
    .enable_ctrlc_handler()
    .build()
    .dispatch()
    .await;
    Ok(())
}

const GREETING_TEXT: &str = "Hi! I run head-to-head practice quizzes for two players. \
Create a room and share its code, or join a friend's room.";
async fn start(bot: Bot, dialogue: QuizDialogue, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, GREETING_TEXT)
        .reply_markup(session::lobby_keyboard())
        .await?;

    dialogue.update(State::Lobby).await?;
    Ok(())
}

async fn receive_lobby_choice(bot: Bot, dialogue: QuizDialogue, msg: Message) -> HandlerResult {
    match msg.text() {
        Some(session::CREATE_ROOM) => {
            let mut rows: Vec<Vec<KeyboardButton>> = Subject::ALL
                .iter()
                .map(|subject| vec![KeyboardButton::new(subject.to_string())])
                .collect();
            rows.push(vec![KeyboardButton::new(ANY_SUBJECT)]);
            bot.send_message(msg.chat.id, "Pick a subject")
                .reply_markup(KeyboardMarkup::new(rows))
                .await?;
            dialogue.update(State::ChooseSubject).await?;
        }
        Some(session::JOIN_ROOM) => {
            bot.send_message(msg.chat.id, "Send me the four digit room code")
                .reply_markup(KeyboardMarkup::new(vec![vec![KeyboardButton::new(
                    session::BACK,
                )]]))
                .await?;
            dialogue.update(State::AwaitRoomCode).await?;
        }
        _ => {
            bot.send_message(msg.chat.id, "Please pick one of the options")
                .reply_markup(session::lobby_keyboard())
                .await?;
        }
    }
    Ok(())
}

async fn receive_subject(bot: Bot, dialogue: QuizDialogue, msg: Message) -> HandlerResult {
    let modules = match msg.text() {
        Some(ANY_SUBJECT) => Vec::new(),
        Some(text) => match Subject::parse(text) {
            Some(subject) => vec![subject],
            None => {
                bot.send_message(msg.chat.id, "Please pick one of the subjects")
                    .await?;
                return Ok(());
            }
        },
        None => {
            bot.send_message(msg.chat.id, "Please pick one of the subjects")
                .await?;
            return Ok(());
        }
    };

    let keyboard = KeyboardMarkup::new(vec![
        Difficulty::ALL
            .iter()
            .map(|difficulty| KeyboardButton::new(difficulty.to_string()))
            .collect(),
        vec![KeyboardButton::new(ANY_DIFFICULTY)],
    ]);
    bot.send_message(msg.chat.id, "Pick a difficulty")
        .reply_markup(keyboard)
        .await?;
    dialogue.update(State::ChooseDifficulty { modules }).await?;
    Ok(())
}

async fn receive_difficulty(
    bot: Bot,
    dialogue: QuizDialogue,
    modules: Vec<Subject>,
    msg: Message,
) -> HandlerResult {
    let difficulties = match msg.text() {
        Some(ANY_DIFFICULTY) => Vec::new(),
        Some(text) => match Difficulty::parse(text) {
            Some(difficulty) => vec![difficulty],
            None => {
                bot.send_message(msg.chat.id, "Please pick one of the difficulties")
                    .await?;
                return Ok(());
            }
        },
        None => {
            bot.send_message(msg.chat.id, "Please pick one of the difficulties")
                .await?;
            return Ok(());
        }
    };

    let keyboard = KeyboardMarkup::new(vec![
        vec![KeyboardButton::new("5")],
        vec![KeyboardButton::new("10")],
        vec![KeyboardButton::new("15")],
    ]);
    bot.send_message(msg.chat.id, "How many questions?")
        .reply_markup(keyboard)
        .await?;
    dialogue
        .update(State::ChooseCount {
            modules,
            difficulties,
        })
        .await?;
    Ok(())
}

async fn receive_count(
    bot: Bot,
    dialogue: QuizDialogue,
    services: Arc<Services>,
    (modules, difficulties): (Vec<Subject>, Vec<Difficulty>),
    msg: Message,
) -> HandlerResult {
    let Some(question_count) = msg.text().and_then(|text| text.trim().parse::<usize>().ok()) else {
        bot.send_message(msg.chat.id, "Please enter a number").await?;
        return Ok(());
    };
    if question_count == 0 {
        bot.send_message(msg.chat.id, "The number of questions can't be 0")
            .await?;
        return Ok(());
    }

    let controller = services.controller(&bot, &dialogue).await?;
    let config = RoomConfig {
        modules,
        difficulties,
        question_count,
    };
    match controller.create_room(None, Some(config)).await {
        Ok(code) => {
            bot.send_message(
                msg.chat.id,
                format!("Room {} is open. Share the code with your opponent and wait for them to join.", code),
            )
            .reply_markup(session::leave_keyboard())
            .await?;
            dialogue.update(State::InRoom).await?;
        }
        Err(err) => {
            if controller.phase().await == Phase::Lobby {
                services.end_session(msg.chat.id).await;
            }
            bot.send_message(msg.chat.id, room_error_text(&err))
                .reply_markup(session::lobby_keyboard())
                .await?;
            dialogue.update(State::Lobby).await?;
        }
    }
    Ok(())
}

async fn receive_room_code(
    bot: Bot,
    dialogue: QuizDialogue,
    services: Arc<Services>,
    msg: Message,
) -> HandlerResult {
    let Some(text) = msg.text() else {
        bot.send_message(msg.chat.id, "Please send the room code as text")
            .await?;
        return Ok(());
    };
    if text == session::BACK {
        bot.send_message(msg.chat.id, "Back to the lobby")
            .reply_markup(session::lobby_keyboard())
            .await?;
        dialogue.update(State::Lobby).await?;
        return Ok(());
    }

    let code = match RoomCode::parse(text) {
        Ok(code) => code,
        Err(err) => {
            bot.send_message(msg.chat.id, room_error_text(&err)).await?;
            return Ok(());
        }
    };

    let controller = services.controller(&bot, &dialogue).await?;
    match controller.join_room(code.clone()).await {
        Ok(()) => {
            bot.send_message(msg.chat.id, format!("Joined room {}.", code))
                .reply_markup(session::leave_keyboard())
                .await?;
            dialogue.update(State::InRoom).await?;
        }
        Err(err) => {
            if controller.phase().await == Phase::Lobby {
                services.end_session(msg.chat.id).await;
            }
            bot.send_message(msg.chat.id, room_error_text(&err)).await?;
        }
    }
    Ok(())
}

const STILL_WAITING: &str = "Still waiting for an opponent. Share the room code or leave the room.";
async fn in_room(
    bot: Bot,
    dialogue: QuizDialogue,
    services: Arc<Services>,
    msg: Message,
) -> HandlerResult {
    let controller = services.controller(&bot, &dialogue).await?;
    match msg.text() {
        Some(session::LEAVE) => {
            let score = controller
                .scores()
                .await
                .get(controller.participant())
                .copied()
                .unwrap_or(0);
            controller.leave().await;
            services.end_session(msg.chat.id).await;
            bot.send_message(msg.chat.id, format!("You left the room with {} points.", score))
                .reply_markup(session::lobby_keyboard())
                .await?;
            dialogue.update(State::Lobby).await?;
        }
        Some(session::PLAY_AGAIN) => {
            if !controller.play_again().await {
                bot.send_message(msg.chat.id, "The game isn't over yet.")
                    .await?;
            }
        }
        Some(text) => match session::parse_choice(text) {
            Some(choice) if controller.submit_answer(choice).await => {
                bot.send_message(msg.chat.id, "Answer locked in. Waiting for your opponent…").await?;
            }
            Some(_) => {
                bot.send_message(msg.chat.id, "That answer wasn't accepted.")
                    .await?;
            }
            None => {
                let text = if controller.phase().await == Phase::Waiting {
                    STILL_WAITING
                } else {
                    "Pick one of the answers, or leave the room."
                };
                bot.send_message(msg.chat.id, text).await?;
            }
        },
        None => {
            bot.send_message(msg.chat.id, "Pick one of the answers, or leave the room.")
                .await?;
        }
    }
    Ok(())
}

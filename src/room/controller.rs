//! One client's view of a room.
//!
//! The controller owns the subscription to its room document and turns
//! every snapshot into local bookkeeping (phase, per-question resolution,
//! score counters) plus a stream of [`GameEvent`]s for whoever renders the
//! game. Nothing here is authoritative: the shared document is, and the
//! controller only ever reacts to what it observes there.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::quiz::Question;
use crate::room::adapter::RoomSubscription;
use crate::room::{ParticipantId, Phase, Room, RoomCode, RoomConfig, RoomError, RoomStore};

const RANDOM_CODE_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    PhaseChanged(Phase),
    /// The room moved to a question this client has not shown yet.
    Question {
        index: usize,
        total: usize,
        question: Question,
    },
    OpponentAnswered,
    Resolved(Resolution),
    /// The room disappeared or this client was removed from it.
    RoomClosed,
}

/// Outcome of one question once both players answered.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub index: usize,
    pub question: Option<Question>,
    pub answers: BTreeMap<ParticipantId, usize>,
    /// Local counters after this question was scored.
    pub scores: BTreeMap<ParticipantId, u32>,
    pub last: bool,
}

impl Resolution {
    pub fn is_correct(&self, participant: &ParticipantId) -> bool {
        match (&self.question, self.answers.get(participant)) {
            (Some(question), Some(&choice)) => question.is_correct(choice),
            _ => false,
        }
    }
}

pub struct RoomController {
    shared: Arc<Shared>,
}

struct Shared {
    rooms: Arc<RoomStore>,
    me: ParticipantId,
    resolve_delay: Duration,
    state: Mutex<Local>,
    events: mpsc::UnboundedSender<GameEvent>,
}

#[derive(Default)]
struct Local {
    phase: Phase,
    code: Option<RoomCode>,
    room: Option<Room>,
    scores: BTreeMap<ParticipantId, u32>,
    /// Question indices already scored in this playthrough.
    resolved: HashSet<usize>,
    announced: Option<usize>,
    opponent_noticed: Option<usize>,
    /// Question index this client already submitted an answer for.
    submitted: Option<usize>,
    stop: Option<oneshot::Sender<()>>,
}

enum Observation {
    Continue,
    Resolve(Resolution),
    Closed,
}

impl RoomController {
    pub fn new(
        rooms: Arc<RoomStore>,
        me: ParticipantId,
        resolve_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<GameEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let shared = Shared {
            rooms,
            me,
            resolve_delay,
            state: Mutex::new(Local::default()),
            events,
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            receiver,
        )
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.shared.me
    }

    pub async fn phase(&self) -> Phase {
        self.shared.state.lock().await.phase
    }

    pub async fn room_code(&self) -> Option<RoomCode> {
        self.shared.state.lock().await.code.clone()
    }

    pub async fn scores(&self) -> BTreeMap<ParticipantId, u32> {
        self.shared.state.lock().await.scores.clone()
    }

    /// Creates a room and starts waiting for an opponent. Without a code a
    /// free one is picked at random. The current room, if any, is only left
    /// once the new one exists.
    pub async fn create_room(
        &self,
        code: Option<RoomCode>,
        config: Option<RoomConfig>,
    ) -> Result<RoomCode, RoomError> {
        let room = match code {
            Some(code) => {
                self.shared
                    .rooms
                    .create_room(&code, &self.shared.me, config)
                    .await?
            }
            None => self.create_with_random_code(config).await?,
        };
        info!("{} created room {}", self.shared.me, room.id);
        self.leave().await;
        self.enter(room.id.clone()).await?;
        Ok(room.id)
    }

    async fn create_with_random_code(&self, config: Option<RoomConfig>) -> Result<Room, RoomError> {
        for _ in 0..RANDOM_CODE_ATTEMPTS {
            let code = RoomCode::random();
            match self
                .shared
                .rooms
                .create_room(&code, &self.shared.me, config.clone())
                .await
            {
                Err(RoomError::AlreadyExists) => debug!("Room code {} is taken", code),
                result => return result,
            }
        }
        Err(RoomError::AlreadyExists)
    }

    pub async fn join_room(&self, code: RoomCode) -> Result<(), RoomError> {
        if self.room_code().await.as_ref() == Some(&code) {
            return Ok(());
        }
        self.shared.rooms.join_room(&code, &self.shared.me).await?;
        info!("{} joined room {}", self.shared.me, code);
        self.leave().await;
        self.enter(code).await
    }

    async fn enter(&self, code: RoomCode) -> Result<(), RoomError> {
        let subscription = match self.shared.rooms.subscribe(&code).await {
            Ok(subscription) => subscription,
            Err(err) => {
                if let Err(leave_err) = self.shared.rooms.leave_room(&code, &self.shared.me).await {
                    warn!("Could not back out of room {}: {}", code, leave_err);
                }
                return Err(err);
            }
        };

        let (stop, stopped) = oneshot::channel();
        {
            let mut local = self.shared.state.lock().await;
            *local = Local {
                phase: Phase::Waiting,
                code: Some(code.clone()),
                stop: Some(stop),
                ..Local::default()
            };
        }
        self.shared.emit(GameEvent::PhaseChanged(Phase::Waiting));
        tokio::spawn(watch_room(self.shared.clone(), code, subscription, stopped));
        Ok(())
    }

    /// Submits an answer to the current question. Returns whether it was recorded.
    pub async fn submit_answer(&self, choice: usize) -> bool {
        let (code, index) = {
            let mut local = self.shared.state.lock().await;
            let (Some(code), Some(room)) = (&local.code, &local.room) else {
                return false;
            };
            let index = room.current_question;
            if local.phase != Phase::Playing
                || local.submitted == Some(index)
                || room.answers.contains_key(&self.shared.me)
            {
                return false;
            }
            let valid_choice = room
                .current_question_id()
                .and_then(|id| self.shared.rooms.catalog().get(id))
                .map_or(false, |question| choice < question.choices.len());
            if !valid_choice {
                return false;
            }
            let code = code.clone();
            local.submitted = Some(index);
            (code, index)
        };

        match self
            .shared
            .rooms
            .submit_answer(&code, &self.shared.me, choice)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!("Answer of {} in room {} was not recorded: {}", self.shared.me, code, err);
                let mut local = self.shared.state.lock().await;
                if local.submitted == Some(index) {
                    local.submitted = None;
                }
                false
            }
        }
    }

    /// Starts the room over from the first question once the game ended.
    pub async fn play_again(&self) -> bool {
        let code = {
            let local = self.shared.state.lock().await;
            match (&local.code, local.phase) {
                (Some(code), Phase::GameOver) => code.clone(),
                _ => return false,
            }
        };
        match self.shared.rooms.restart_game(&code).await {
            Ok(()) => true,
            Err(err) => {
                warn!("Could not restart room {}: {}", code, err);
                false
            }
        }
    }

    /// Leaves the current room, if any, and goes back to the lobby.
    pub async fn leave(&self) {
        let code = {
            let mut local = self.shared.state.lock().await;
            if let Some(stop) = local.stop.take() {
                let _ = stop.send(());
            }
            let previous = std::mem::take(&mut *local);
            if previous.phase != Phase::Lobby {
                self.shared.emit(GameEvent::PhaseChanged(Phase::Lobby));
            }
            previous.code
        };

        if let Some(code) = code {
            match self.shared.rooms.leave_room(&code, &self.shared.me).await {
                Ok(()) => info!("{} left room {}", self.shared.me, code),
                Err(err) => warn!("Leaving room {} failed: {}", code, err),
            }
        }
    }
}

impl Drop for RoomController {
    fn drop(&mut self) {
        if let Ok(mut local) = self.shared.state.try_lock() {
            local.stop.take();
        }
    }
}

impl Shared {
    fn emit(&self, event: GameEvent) {
        if self.events.send(event).is_err() {
            debug!("No listener for events of {}", self.me);
        }
    }

    /// Folds one snapshot into local state.
    async fn observe(&self, code: &RoomCode, room: Option<Room>) -> Observation {
        let mut local = self.state.lock().await;
        if local.code.as_ref() != Some(code) {
            return Observation::Closed;
        }

        let previous = local.phase;
        let phase = previous.next(room.as_ref(), &self.me);
        if phase == Phase::Lobby {
            info!("Room {} closed for {}", code, self.me);
            *local = Local::default();
            self.emit(GameEvent::PhaseChanged(Phase::Lobby));
            self.emit(GameEvent::RoomClosed);
            return Observation::Closed;
        }
        if previous == Phase::GameOver && phase != Phase::GameOver {
            debug!("New playthrough in room {}", code);
            local.resolved.clear();
            local.announced = None;
            local.opponent_noticed = None;
            local.submitted = None;
            local.scores.values_mut().for_each(|score| *score = 0);
        }
        if previous == Phase::Waiting && phase == Phase::Playing {
            // A new opponent needs the current question, and so do we.
            local.announced = None;
            local.opponent_noticed = None;
        }
        if phase != previous {
            local.phase = phase;
            self.emit(GameEvent::PhaseChanged(phase));
        }
        local.room = room.clone();

        let Some(room) = room else {
            return Observation::Continue;
        };
        if phase != Phase::Playing {
            return Observation::Continue;
        }

        local.scores.retain(|participant, _| room.has_player(participant));
        for participant in &room.players {
            local.scores.entry(participant.clone()).or_insert(0);
        }

        let index = room.current_question;
        let question = room
            .current_question_id()
            .and_then(|id| self.rooms.catalog().get(id))
            .cloned();
        if local.announced != Some(index) {
            local.announced = Some(index);
            local.opponent_noticed = None;
            match &question {
                Some(question) => self.emit(GameEvent::Question {
                    index,
                    total: room.questions.len(),
                    question: question.clone(),
                }),
                None => warn!(
                    "Question {:?} of room {} is missing from the catalog",
                    room.current_question_id(),
                    code
                ),
            }
        }

        if let Some(opponent) = room.opponent_of(&self.me) {
            if room.answers.contains_key(opponent)
                && !room.answers.contains_key(&self.me)
                && local.opponent_noticed != Some(index)
            {
                local.opponent_noticed = Some(index);
                self.emit(GameEvent::OpponentAnswered);
            }
        }

        if !room.all_answered() || !local.resolved.insert(index) {
            return Observation::Continue;
        }

        for (participant, &choice) in &room.answers {
            let correct = question.as_ref().map_or(false, |q| q.is_correct(choice));
            if let (true, Some(score)) = (correct, local.scores.get_mut(participant)) {
                *score += 1;
            }
        }
        debug!("Resolved question {} of room {} for {}", index, code, self.me);

        Observation::Resolve(Resolution {
            index,
            question,
            answers: room.answers.clone(),
            scores: local.scores.clone(),
            last: index + 1 >= room.questions.len(),
        })
    }

    /// Publishes a resolved question, then moves the room on after the delay.
    async fn settle(&self, code: &RoomCode, resolution: Resolution) {
        let index = resolution.index;
        let last = resolution.last;
        let own = BTreeMap::from([(
            self.me.clone(),
            resolution.scores.get(&self.me).copied().unwrap_or(0),
        )]);
        self.emit(GameEvent::Resolved(resolution));

        if let Err(err) = self.rooms.update_scores(code, &own).await {
            warn!("Could not record score of {} in room {}: {}", self.me, code, err);
        }

        tokio::time::sleep(self.resolve_delay).await;
        if !self.is_playing_in(code).await {
            return;
        }

        // Past the last question the pointer lands on the finished marker.
        match self.rooms.advance_question_from(code, index, index + 1).await {
            Ok(true) => debug!("{} moved room {} to question {}", self.me, code, index + 1),
            Ok(false) => debug!("Room {} already moved past question {}", code, index),
            Err(err) => {
                warn!("Could not advance room {}: {}", code, err);
                return;
            }
        }

        if last {
            let mut local = self.state.lock().await;
            if local.code.as_ref() == Some(code) && local.phase == Phase::Playing {
                local.phase = Phase::GameOver;
                self.emit(GameEvent::PhaseChanged(Phase::GameOver));
            }
        }
    }

    async fn is_playing_in(&self, code: &RoomCode) -> bool {
        let local = self.state.lock().await;
        local.code.as_ref() == Some(code) && local.phase == Phase::Playing
    }
}

async fn watch_room(
    shared: Arc<Shared>,
    code: RoomCode,
    mut subscription: RoomSubscription,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let snapshot = tokio::select! {
            _ = &mut stop => break,
            snapshot = subscription.next() => snapshot,
        };
        let Some(room) = snapshot else {
            warn!("Subscription to room {} ended", code);
            break;
        };
        match shared.observe(&code, room).await {
            Observation::Continue => {}
            Observation::Resolve(resolution) => shared.settle(&code, resolution).await,
            Observation::Closed => break,
        }
    }
    subscription.unsubscribe();
    debug!("{} stopped watching room {}", shared.me, code);
}

//! Room operations expressed as reads and writes on the shared store.
//!
//! Each operation addresses the room document by its code and touches only
//! the fields it owns, so the two clients can write concurrently without
//! overwriting each other.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{error, warn};
use serde_json::{json, Map, Value};

use crate::quiz::Catalog;
use crate::room::{ParticipantId, Room, RoomCode, RoomConfig, RoomError, ROOM_CAPACITY};
use crate::store::{Store, Subscription};

pub struct RoomStore {
    backend: Option<Arc<dyn Store>>,
    catalog: Arc<Catalog>,
}

/// Live room snapshots. `Some(None)` means the room no longer exists.
pub struct RoomSubscription {
    inner: Subscription,
}

impl RoomSubscription {
    pub async fn next(&mut self) -> Option<Option<Room>> {
        loop {
            let value = self.inner.next().await?;
            match decode(value) {
                Ok(room) => return Some(room),
                Err(err) => warn!("Ignoring unreadable room snapshot: {}", err),
            }
        }
    }

    pub fn unsubscribe(self) {
        self.inner.unsubscribe();
    }
}

fn decode(value: Option<Value>) -> Result<Option<Room>, RoomError> {
    Ok(value.map(serde_json::from_value).transpose()?)
}

fn fields<const N: usize>(entries: [(String, Value); N]) -> Map<String, Value> {
    entries.into_iter().collect()
}

impl RoomStore {
    pub fn new(backend: Arc<dyn Store>, catalog: Arc<Catalog>) -> Self {
        Self {
            backend: Some(backend),
            catalog,
        }
    }

    /// An adapter with no store behind it. Every operation fails with
    /// [`RoomError::NotConfigured`].
    pub fn unconfigured(catalog: Arc<Catalog>) -> Self {
        error!("No room store configured, rooms cannot be created or joined");
        Self {
            backend: None,
            catalog,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn backend(&self) -> Result<&dyn Store, RoomError> {
        self.backend.as_deref().ok_or(RoomError::NotConfigured)
    }

    pub async fn subscribe(&self, code: &RoomCode) -> Result<RoomSubscription, RoomError> {
        let inner = self.backend()?.subscribe(&code.path()).await?;
        Ok(RoomSubscription { inner })
    }

    pub async fn read_room(&self, code: &RoomCode) -> Result<Option<Room>, RoomError> {
        decode(self.backend()?.read(&code.path()).await?)
    }

    async fn existing_room(&self, code: &RoomCode) -> Result<Room, RoomError> {
        self.read_room(code).await?.ok_or(RoomError::NotFound)
    }

    /// Draws the question sequence and writes the initial room document.
    pub async fn create_room(
        &self,
        code: &RoomCode,
        creator: &ParticipantId,
        config: Option<RoomConfig>,
    ) -> Result<Room, RoomError> {
        let store = self.backend()?;
        let filter = config.clone().unwrap_or_default();
        let questions = self.catalog.draw(
            &filter.modules,
            &filter.difficulties,
            filter.question_count,
            &mut rand::thread_rng(),
        );
        if questions.is_empty() {
            return Err(RoomError::NoMatchingQuestions);
        }

        let path = code.path();
        if store.read(&path).await?.is_some() {
            return Err(RoomError::AlreadyExists);
        }
        let room = Room::new(code.clone(), creator.clone(), questions, config);
        store.write(&path, serde_json::to_value(&room)?).await?;
        Ok(room)
    }

    /// Takes the second seat. Joining a room one is already in is a no-op.
    pub async fn join_room(
        &self,
        code: &RoomCode,
        participant: &ParticipantId,
    ) -> Result<(), RoomError> {
        let store = self.backend()?;
        let room = self.existing_room(code).await?;
        if room.has_player(participant) {
            return Ok(());
        }
        if room.players.len() >= ROOM_CAPACITY {
            return Err(RoomError::Full);
        }

        let mut players = room.players;
        players.push(participant.clone());
        let update = fields([
            ("players".to_string(), serde_json::to_value(&players)?),
            ("started".to_string(), json!(true)),
            (format!("scores/{}", participant), json!(0)),
        ]);
        store.merge(&code.path(), update).await?;
        Ok(())
    }

    /// Records `participant`'s choice for the current question. Correctness is
    /// left to the clients.
    pub async fn submit_answer(
        &self,
        code: &RoomCode,
        participant: &ParticipantId,
        choice: usize,
    ) -> Result<(), RoomError> {
        let store = self.backend()?;
        let room = self.existing_room(code).await?;
        if !room.has_player(participant) {
            return Err(RoomError::NotMember);
        }
        let update = fields([(participant.to_string(), json!(choice))]);
        store.merge(&format!("{}/answers", code.path()), update).await?;
        Ok(())
    }

    /// Moves the pointer and clears every answer in one update.
    pub async fn advance_question(&self, code: &RoomCode, index: usize) -> Result<(), RoomError> {
        let store = self.backend()?;
        self.existing_room(code).await?;
        store.merge(&code.path(), advance_fields(index)).await?;
        Ok(())
    }

    /// Like [`RoomStore::advance_question`], but only while the pointer still
    /// sits at `expected`. Returns whether anything was written.
    pub async fn advance_question_from(
        &self,
        code: &RoomCode,
        expected: usize,
        index: usize,
    ) -> Result<bool, RoomError> {
        let room = self.existing_room(code).await?;
        if room.current_question != expected {
            return Ok(false);
        }
        self.advance_question(code, index).await?;
        Ok(true)
    }

    /// Starts a new playthrough: pointer back to the first question, answers
    /// cleared and every score zeroed, all in one update.
    pub async fn restart_game(&self, code: &RoomCode) -> Result<(), RoomError> {
        let store = self.backend()?;
        let room = self.existing_room(code).await?;
        let mut update = advance_fields(0);
        for participant in &room.players {
            update.insert(format!("scores/{}", participant), json!(0));
        }
        store.merge(&code.path(), update).await?;
        Ok(())
    }

    /// Merges the given entries into the score map, leaving other players' scores alone.
    pub async fn update_scores(
        &self,
        code: &RoomCode,
        scores: &BTreeMap<ParticipantId, u32>,
    ) -> Result<(), RoomError> {
        if scores.is_empty() {
            return Ok(());
        }
        let store = self.backend()?;
        self.existing_room(code).await?;
        let update: Map<String, Value> = scores
            .iter()
            .map(|(participant, score)| (participant.to_string(), json!(score)))
            .collect();
        store.merge(&format!("{}/scores", code.path()), update).await?;
        Ok(())
    }

    /// Removes `participant`. The last one out deletes the room.
    pub async fn leave_room(
        &self,
        code: &RoomCode,
        participant: &ParticipantId,
    ) -> Result<(), RoomError> {
        let store = self.backend()?;
        let room = self.existing_room(code).await?;
        if !room.has_player(participant) {
            return Err(RoomError::NotMember);
        }

        let remaining: Vec<ParticipantId> = room
            .players
            .into_iter()
            .filter(|p| p != participant)
            .collect();
        if remaining.is_empty() {
            store.delete(&code.path()).await?;
            return Ok(());
        }
        let update = fields([
            ("players".to_string(), serde_json::to_value(&remaining)?),
            (format!("scores/{}", participant), Value::Null),
            (format!("answers/{}", participant), Value::Null),
        ]);
        store.merge(&code.path(), update).await?;
        Ok(())
    }
}

fn advance_fields(index: usize) -> Map<String, Value> {
    fields([
        ("currentQuestion".to_string(), json!(index)),
        ("answers".to_string(), Value::Null),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::{Difficulty, Subject};
    use crate::room::testing::{catalog, participant, room_code};
    use crate::store::MemoryStore;

    fn adapter() -> (RoomStore, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (RoomStore::new(store.clone(), Arc::new(catalog())), store)
    }

    fn config(modules: Vec<Subject>, difficulties: Vec<Difficulty>, count: usize) -> RoomConfig {
        RoomConfig {
            modules,
            difficulties,
            question_count: count,
        }
    }

    #[tokio::test]
    async fn create_room_writes_initial_document() {
        let (rooms, store) = adapter();
        let code = room_code("1234");
        let creator = participant("creator");

        rooms
            .create_room(
                &code,
                &creator,
                Some(config(vec![Subject::Math], vec![Difficulty::Easy], 1)),
            )
            .await
            .unwrap();

        let document = store.read("rooms/1234").await.unwrap().unwrap();
        assert_eq!(document["questions"], json!(["q7"]));
        assert_eq!(document["currentQuestion"], json!(0));
        assert_eq!(document["started"], json!(false));
        assert_eq!(document["players"], json!(["creator"]));
        assert_eq!(document["scores"], json!({"creator": 0}));
        assert!(document.get("answers").is_none());
    }

    #[tokio::test]
    async fn question_sequence_is_filtered_truncated_and_fixed() {
        let (rooms, _) = adapter();
        let code = room_code("0001");
        let room = rooms
            .create_room(
                &code,
                &participant("a"),
                Some(config(vec![Subject::Math], vec![], 3)),
            )
            .await
            .unwrap();

        assert_eq!(room.questions.len(), 3);
        for id in &room.questions {
            assert_eq!(rooms.catalog().get(id).unwrap().subject, Subject::Math);
        }

        let first = rooms.read_room(&code).await.unwrap().unwrap();
        let second = rooms.read_room(&code).await.unwrap().unwrap();
        assert_eq!(first.questions, room.questions);
        assert_eq!(second.questions, room.questions);
    }

    #[tokio::test]
    async fn question_count_is_capped_by_matches() {
        let (rooms, _) = adapter();
        let room = rooms
            .create_room(
                &room_code("0002"),
                &participant("a"),
                Some(config(vec![Subject::Reading], vec![], 50)),
            )
            .await
            .unwrap();
        assert_eq!(room.questions.len(), 2);
    }

    #[tokio::test]
    async fn create_fails_without_matching_questions() {
        let (rooms, store) = adapter();
        let result = rooms
            .create_room(
                &room_code("0003"),
                &participant("a"),
                Some(config(vec![Subject::Writing], vec![Difficulty::Hard], 5)),
            )
            .await;

        assert!(matches!(result, Err(RoomError::NoMatchingQuestions)));
        assert_eq!(store.read("rooms/0003").await.unwrap(), None);
    }

    #[tokio::test]
    async fn create_refuses_occupied_code() {
        let (rooms, _) = adapter();
        let code = room_code("0004");
        rooms.create_room(&code, &participant("a"), None).await.unwrap();

        let again = rooms.create_room(&code, &participant("b"), None).await;
        assert!(matches!(again, Err(RoomError::AlreadyExists)));
        let room = rooms.read_room(&code).await.unwrap().unwrap();
        assert_eq!(room.players, vec![participant("a")]);
    }

    #[tokio::test]
    async fn join_fills_second_seat_and_starts() {
        let (rooms, _) = adapter();
        let code = room_code("0005");
        rooms.create_room(&code, &participant("a"), None).await.unwrap();

        rooms.join_room(&code, &participant("b")).await.unwrap();

        let room = rooms.read_room(&code).await.unwrap().unwrap();
        assert_eq!(room.players, vec![participant("a"), participant("b")]);
        assert!(room.started);
        assert_eq!(room.scores.get(&participant("a")), Some(&0));
        assert_eq!(room.scores.get(&participant("b")), Some(&0));
    }

    #[tokio::test]
    async fn join_is_idempotent_for_members() {
        let (rooms, _) = adapter();
        let code = room_code("0006");
        rooms.create_room(&code, &participant("a"), None).await.unwrap();
        rooms.join_room(&code, &participant("b")).await.unwrap();

        rooms.join_room(&code, &participant("b")).await.unwrap();
        rooms.join_room(&code, &participant("a")).await.unwrap();

        let room = rooms.read_room(&code).await.unwrap().unwrap();
        assert_eq!(room.players.len(), 2);
    }

    #[tokio::test]
    async fn third_participant_is_rejected() {
        let (rooms, _) = adapter();
        let code = room_code("0007");
        rooms.create_room(&code, &participant("a"), None).await.unwrap();
        rooms.join_room(&code, &participant("b")).await.unwrap();
        let before = rooms.read_room(&code).await.unwrap();

        let result = rooms.join_room(&code, &participant("c")).await;

        assert!(matches!(result, Err(RoomError::Full)));
        assert_eq!(rooms.read_room(&code).await.unwrap(), before);
    }

    #[tokio::test]
    async fn join_unknown_room_fails() {
        let (rooms, _) = adapter();
        let result = rooms.join_room(&room_code("9999"), &participant("a")).await;
        assert!(matches!(result, Err(RoomError::NotFound)));
    }

    #[tokio::test]
    async fn submit_is_existence_and_membership_checked() {
        let (rooms, store) = adapter();
        let code = room_code("0008");

        let missing = rooms.submit_answer(&code, &participant("a"), 1).await;
        assert!(matches!(missing, Err(RoomError::NotFound)));
        assert_eq!(store.read("rooms/0008").await.unwrap(), None);

        rooms.create_room(&code, &participant("a"), None).await.unwrap();
        let outsider = rooms.submit_answer(&code, &participant("z"), 1).await;
        assert!(matches!(outsider, Err(RoomError::NotMember)));

        rooms.submit_answer(&code, &participant("a"), 1).await.unwrap();
        let room = rooms.read_room(&code).await.unwrap().unwrap();
        assert_eq!(room.answers.get(&participant("a")), Some(&1));
    }

    #[tokio::test]
    async fn advance_clears_every_answer() {
        let (rooms, _) = adapter();
        let code = room_code("0009");
        rooms.create_room(&code, &participant("a"), None).await.unwrap();
        rooms.join_room(&code, &participant("b")).await.unwrap();
        rooms.submit_answer(&code, &participant("a"), 0).await.unwrap();
        rooms.submit_answer(&code, &participant("b"), 2).await.unwrap();

        rooms.advance_question(&code, 1).await.unwrap();

        let room = rooms.read_room(&code).await.unwrap().unwrap();
        assert_eq!(room.current_question, 1);
        assert!(room.answers.is_empty());
    }

    #[tokio::test]
    async fn conditional_advance_skips_when_pointer_moved() {
        let (rooms, _) = adapter();
        let code = room_code("0010");
        rooms.create_room(&code, &participant("a"), None).await.unwrap();
        rooms.advance_question(&code, 1).await.unwrap();
        rooms.submit_answer(&code, &participant("a"), 3).await.unwrap();

        let written = rooms.advance_question_from(&code, 0, 1).await.unwrap();

        assert!(!written);
        let room = rooms.read_room(&code).await.unwrap().unwrap();
        assert_eq!(room.answers.get(&participant("a")), Some(&3));
        assert!(rooms.advance_question_from(&code, 1, 2).await.unwrap());
    }

    #[tokio::test]
    async fn score_updates_merge() {
        let (rooms, _) = adapter();
        let code = room_code("0011");
        rooms.create_room(&code, &participant("a"), None).await.unwrap();
        rooms.join_room(&code, &participant("b")).await.unwrap();

        rooms
            .update_scores(&code, &BTreeMap::from([(participant("a"), 2)]))
            .await
            .unwrap();
        rooms
            .update_scores(&code, &BTreeMap::from([(participant("b"), 1)]))
            .await
            .unwrap();

        let room = rooms.read_room(&code).await.unwrap().unwrap();
        assert_eq!(room.scores.get(&participant("a")), Some(&2));
        assert_eq!(room.scores.get(&participant("b")), Some(&1));
    }

    #[tokio::test]
    async fn restart_rewinds_and_zeroes_scores() {
        let (rooms, _) = adapter();
        let code = room_code("0016");
        rooms.create_room(&code, &participant("a"), None).await.unwrap();
        rooms.join_room(&code, &participant("b")).await.unwrap();
        rooms
            .update_scores(
                &code,
                &BTreeMap::from([(participant("a"), 3), (participant("b"), 2)]),
            )
            .await
            .unwrap();
        rooms.advance_question(&code, 4).await.unwrap();
        rooms.submit_answer(&code, &participant("a"), 1).await.unwrap();

        rooms.restart_game(&code).await.unwrap();

        let room = rooms.read_room(&code).await.unwrap().unwrap();
        assert_eq!(room.current_question, 0);
        assert!(room.answers.is_empty());
        assert!(room.scores.values().all(|score| *score == 0));
        assert_eq!(room.scores.len(), 2);
    }

    #[tokio::test]
    async fn last_one_out_deletes_the_room() {
        let (rooms, _) = adapter();
        let code = room_code("0012");
        rooms.create_room(&code, &participant("a"), None).await.unwrap();

        rooms.leave_room(&code, &participant("a")).await.unwrap();

        assert_eq!(rooms.read_room(&code).await.unwrap(), None);
    }

    #[tokio::test]
    async fn leaving_keeps_the_other_player() {
        let (rooms, _) = adapter();
        let code = room_code("0013");
        rooms.create_room(&code, &participant("a"), None).await.unwrap();
        rooms.join_room(&code, &participant("b")).await.unwrap();
        rooms
            .update_scores(&code, &BTreeMap::from([(participant("a"), 4)]))
            .await
            .unwrap();
        rooms.submit_answer(&code, &participant("b"), 1).await.unwrap();

        rooms.leave_room(&code, &participant("b")).await.unwrap();

        let room = rooms.read_room(&code).await.unwrap().unwrap();
        assert_eq!(room.players, vec![participant("a")]);
        assert_eq!(room.scores.get(&participant("a")), Some(&4));
        assert!(!room.scores.contains_key(&participant("b")));
        assert!(room.answers.is_empty());
    }

    #[tokio::test]
    async fn subscription_follows_the_room() {
        let (rooms, _) = adapter();
        let code = room_code("0014");
        let mut subscription = rooms.subscribe(&code).await.unwrap();
        assert_eq!(subscription.next().await, Some(None));

        rooms.create_room(&code, &participant("a"), None).await.unwrap();
        let created = subscription.next().await.unwrap().unwrap();
        assert_eq!(created.players, vec![participant("a")]);

        rooms.leave_room(&code, &participant("a")).await.unwrap();
        assert_eq!(subscription.next().await, Some(None));
        subscription.unsubscribe();
    }

    #[tokio::test]
    async fn unconfigured_store_fails_every_operation() {
        let rooms = RoomStore::unconfigured(Arc::new(catalog()));
        let code = room_code("0015");

        assert!(matches!(
            rooms.create_room(&code, &participant("a"), None).await,
            Err(RoomError::NotConfigured)
        ));
        assert!(matches!(
            rooms.join_room(&code, &participant("a")).await,
            Err(RoomError::NotConfigured)
        ));
        assert!(matches!(
            rooms.subscribe(&code).await,
            Err(RoomError::NotConfigured)
        ));
    }
}

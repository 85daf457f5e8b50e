//! Persistent participant identity, one per chat.
//!
//! The id is generated the first time a chat talks to the bot and reused
//! from then on, across restarts. It only tells the two seats of a room
//! apart and proves nothing about who is typing.

use std::sync::Arc;

use log::info;
use teloxide::dispatching::dialogue::{ErasedStorage, Storage};
use teloxide::types::ChatId;

use crate::room::ParticipantId;

pub type IdentityStorage = Arc<ErasedStorage<ParticipantId>>;
pub type StorageError = Box<dyn std::error::Error + Send + Sync>;

pub async fn participant_for(
    storage: &IdentityStorage,
    chat: ChatId,
) -> Result<ParticipantId, StorageError> {
    if let Some(id) = storage.clone().get_dialogue(chat).await? {
        return Ok(id);
    }
    let id = ParticipantId::generate();
    storage.clone().update_dialogue(chat, id.clone()).await?;
    info!("Chat {} is participant {}", chat.0, id);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::dispatching::dialogue::InMemStorage;

    #[tokio::test]
    async fn identity_is_generated_once_per_chat() {
        let storage = InMemStorage::<ParticipantId>::new().erase();

        let first = participant_for(&storage, ChatId(7)).await.unwrap();
        let again = participant_for(&storage, ChatId(7)).await.unwrap();
        let other = participant_for(&storage, ChatId(8)).await.unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
    }
}

use crate::room::{ParticipantId, Room};

/// Where one client is in the game.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Lobby,
    Waiting,
    Playing,
    GameOver,
}

impl Phase {
    /// The phase after observing `room` (or its absence) as `me`.
    ///
    /// `Lobby` is only left through an explicit create or join, so it
    /// ignores snapshots. Every other phase follows the document: a room
    /// that vanished or no longer lists `me` sends the client back to the
    /// lobby, the finished marker ends the game, and otherwise the client
    /// plays when both seats are filled and waits when they are not.
    pub fn next(self, room: Option<&Room>, me: &ParticipantId) -> Phase {
        if self == Phase::Lobby {
            return Phase::Lobby;
        }
        let Some(room) = room else {
            return Phase::Lobby;
        };
        if !room.has_player(me) {
            return Phase::Lobby;
        }
        if room.is_finished() {
            return Phase::GameOver;
        }
        if room.is_ready() {
            Phase::Playing
        } else {
            Phase::Waiting
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::testing::{participant, room_code};

    fn room(players: &[&str], started: bool, current: usize, total: usize) -> Room {
        let mut room = Room::new(
            room_code("0100"),
            participant(players[0]),
            (0..total).map(|i| format!("q{}", i)).collect(),
            None,
        );
        room.players = players.iter().map(|p| participant(p)).collect();
        room.started = started;
        room.current_question = current;
        room
    }

    #[test]
    fn lobby_ignores_snapshots() {
        let me = participant("a");
        let full = room(&["a", "b"], true, 0, 3);
        assert_eq!(Phase::Lobby.next(Some(&full), &me), Phase::Lobby);
        assert_eq!(Phase::Lobby.next(None, &me), Phase::Lobby);
    }

    #[test]
    fn waiting_until_second_player_starts() {
        let me = participant("a");
        let alone = room(&["a"], false, 0, 3);
        let full = room(&["a", "b"], true, 0, 3);

        assert_eq!(Phase::Waiting.next(Some(&alone), &me), Phase::Waiting);
        assert_eq!(Phase::Waiting.next(Some(&full), &me), Phase::Playing);
    }

    #[test]
    fn playing_loops_then_ends_on_finished_marker() {
        let me = participant("b");
        assert_eq!(
            Phase::Playing.next(Some(&room(&["a", "b"], true, 2, 3)), &me),
            Phase::Playing
        );
        assert_eq!(
            Phase::Playing.next(Some(&room(&["a", "b"], true, 3, 3)), &me),
            Phase::GameOver
        );
    }

    #[test]
    fn play_again_resumes_from_game_over() {
        let me = participant("a");
        let over = room(&["a", "b"], true, 1, 1);
        let reset = room(&["a", "b"], true, 0, 1);

        assert_eq!(Phase::GameOver.next(Some(&over), &me), Phase::GameOver);
        assert_eq!(Phase::GameOver.next(Some(&reset), &me), Phase::Playing);
    }

    #[test]
    fn opponent_leaving_mid_game_means_waiting() {
        let me = participant("a");
        assert_eq!(
            Phase::Playing.next(Some(&room(&["a"], true, 1, 3)), &me),
            Phase::Waiting
        );
    }

    #[test]
    fn vanished_room_or_membership_returns_to_lobby() {
        let me = participant("c");
        assert_eq!(Phase::Playing.next(None, &me), Phase::Lobby);
        assert_eq!(
            Phase::Waiting.next(Some(&room(&["a", "b"], true, 0, 2)), &me),
            Phase::Lobby
        );
        assert_eq!(Phase::GameOver.next(None, &me), Phase::Lobby);
    }
}

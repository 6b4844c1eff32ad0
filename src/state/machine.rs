//! Authoritative turn state machine.
//!
//! Owns the board, scores, revealed cards and the turn clock. All turn
//! changes funnel through [`GameStateMachine::switch_turn`], which resets the
//! clock and bumps the generation in one step.

use super::clock::{ExpiryCheck, TurnClock};
use crate::types::*;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

pub const BOARD_SIZE: usize = 25;
pub const WORDS_PER_TEAM: usize = 8;
pub const NEUTRAL_WORDS: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Game {
    pub id: GameId,
    pub cards: Vec<Card>,
    pub turn: TurnState,
    pub scores: Scores,
    /// Revealed words in reveal order
    pub revealed: Vec<Word>,
    pub clock: TurnClock,
    pub clue: Option<Clue>,
    pub config: GameConfig,
    pub created_at: DateTime<Utc>,
}

impl Game {
    pub fn card(&self, word: &str) -> Option<&Card> {
        self.cards.iter().find(|c| c.word.eq_ignore_ascii_case(word))
    }

    pub fn is_revealed(&self, word: &str) -> bool {
        self.revealed.iter().any(|w| w.eq_ignore_ascii_case(word))
    }

    pub fn assassin(&self) -> Option<&Word> {
        self.cards
            .iter()
            .find(|c| c.kind == CardKind::Assassin)
            .map(|c| &c.word)
    }

    pub fn words_remaining(&self, team: Team) -> usize {
        let kind = CardKind::of_team(team);
        self.cards
            .iter()
            .filter(|c| c.kind == kind && !self.is_revealed(&c.word))
            .count()
    }
}

/// What a guess did to the game
#[derive(Debug, Clone, PartialEq)]
pub struct GuessEffect {
    pub team: Team,
    pub word: Word,
    pub card: CardKind,
    pub outcome: GuessOutcome,
    /// Turn change caused by the guess, if any
    pub transition: Option<Transition>,
}

impl GuessEffect {
    /// The turn stays with the guessing team and a meta decision opens
    pub fn continues_turn(&self) -> bool {
        self.transition.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: TurnState,
    pub to: TurnState,
    pub cause: TurnChangeCause,
    pub generation: u64,
    pub at: DateTime<Utc>,
}

impl Transition {
    pub fn is_switch(&self) -> bool {
        self.from != self.to
    }
}

#[derive(Debug, Clone)]
pub struct GameStateMachine {
    game: Game,
}

impl GameStateMachine {
    /// Build a board from the given words. Requires at least 25 distinct words;
    /// 25 are drawn at random and dealt 8/8/8/1.
    pub fn new(
        id: GameId,
        words: &[String],
        config: GameConfig,
        now: DateTime<Utc>,
    ) -> GameResult<Self> {
        let mut seen = HashSet::new();
        let mut pool: Vec<Word> = words
            .iter()
            .map(|w| w.trim().to_uppercase())
            .filter(|w| !w.is_empty() && seen.insert(w.clone()))
            .collect();
        if pool.len() < BOARD_SIZE {
            return Err(GameError::invalid(format!(
                "Board needs {} distinct words, got {}",
                BOARD_SIZE,
                pool.len()
            )));
        }

        let mut rng = rand::rng();
        pool.shuffle(&mut rng);
        pool.truncate(BOARD_SIZE);

        let mut kinds = Vec::with_capacity(BOARD_SIZE);
        kinds.extend([CardKind::Red; WORDS_PER_TEAM]);
        kinds.extend([CardKind::Blue; WORDS_PER_TEAM]);
        kinds.extend([CardKind::Neutral; NEUTRAL_WORDS]);
        kinds.push(CardKind::Assassin);
        kinds.shuffle(&mut rng);

        let cards = pool
            .into_iter()
            .zip(kinds)
            .map(|(word, kind)| Card { word, kind })
            .collect();

        Ok(Self::from_cards(id, cards, config, now))
    }

    /// Build a game over a fixed layout
    pub fn from_cards(
        id: GameId,
        cards: Vec<Card>,
        config: GameConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let clock = TurnClock::new(Duration::from_secs(config.turn_seconds), now);
        Self {
            game: Game {
                id,
                cards,
                turn: TurnState::turn_of(config.starting_team),
                scores: Scores::default(),
                revealed: Vec::new(),
                clock,
                clue: None,
                config,
                created_at: now,
            },
        }
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn turn(&self) -> TurnState {
        self.game.turn
    }

    pub fn active_team(&self) -> Option<Team> {
        self.game.turn.active_team()
    }

    pub fn generation(&self) -> u64 {
        self.game.clock.generation()
    }

    pub fn clock(&self) -> &TurnClock {
        &self.game.clock
    }

    fn require_active(&self) -> GameResult<Team> {
        self.active_team()
            .ok_or_else(|| GameError::invalid("Game is over"))
    }

    pub fn set_clue(&mut self, clue: Clue) -> GameResult<()> {
        let team = self.require_active()?;
        if clue.team != team {
            return Err(GameError::invalid(format!("It is not {}'s turn", clue.team)));
        }
        if self.game.card(&clue.word).is_some() {
            return Err(GameError::invalid("Clue cannot be a word on the board"));
        }
        self.game.clue = Some(clue);
        Ok(())
    }

    /// Reveal a word for the active team
    pub fn guess_word(&mut self, word: &str, now: DateTime<Utc>) -> GameResult<GuessEffect> {
        let team = self.require_active()?;
        let card = self
            .game
            .card(word)
            .cloned()
            .ok_or_else(|| GameError::invalid(format!("{} is not on the board", word)))?;
        if self.game.is_revealed(&card.word) {
            return Err(GameError::invalid(format!("{} is already revealed", card.word)));
        }

        self.game.revealed.push(card.word.clone());
        let outcome = GuessOutcome::classify(card.kind, team);
        let word = card.word.clone();

        let transition = match outcome {
            GuessOutcome::Assassin => Some(self.finish(
                team.other(),
                TurnChangeCause::Assassin { word: word.clone() },
                now,
            )),
            GuessOutcome::OwnTeam => {
                self.game.scores.add(team);
                self.check_exhausted(team, now)
            }
            GuessOutcome::OpposingTeam => {
                self.game.scores.add(team.other());
                self.check_exhausted(team.other(), now).or_else(|| {
                    Some(self.switch_turn(TurnChangeCause::OpposingWord { word: word.clone() }, now))
                })
            }
            GuessOutcome::Neutral => {
                Some(self.switch_turn(TurnChangeCause::NeutralWord { word: word.clone() }, now))
            }
        };

        Ok(GuessEffect {
            team,
            word,
            card: card.kind,
            outcome,
            transition,
        })
    }

    /// Apply a resolved meta poll. `generation` is the turn generation the
    /// poll belonged to; a mismatch means the turn moved on and the decision
    /// no longer applies.
    pub fn resolve_meta_decision(
        &mut self,
        poll_id: &str,
        action: MetaAction,
        generation: u64,
        now: DateTime<Utc>,
    ) -> GameResult<Option<Transition>> {
        let team = self.require_active()?;
        if generation != self.generation() {
            return Err(GameError::StaleTimerFire {
                expected: generation,
                current: self.generation(),
            });
        }
        let transition = match action {
            MetaAction::Continue => {
                let generation = self.game.clock.reset(now);
                Some(Transition {
                    from: self.game.turn,
                    to: self.game.turn,
                    cause: TurnChangeCause::MetaContinue {
                        poll_id: poll_id.to_string(),
                    },
                    generation,
                    at: now,
                })
            }
            MetaAction::EndTurn => Some(self.switch_turn(
                TurnChangeCause::MetaEndTurn {
                    poll_id: poll_id.to_string(),
                },
                now,
            )),
            MetaAction::DiscussMore => None,
        };
        tracing::debug!(%team, %action, "Meta decision applied");
        Ok(transition)
    }

    /// Timer-driven (or host-forced) turn end. Only honoured when `generation`
    /// is the current one; with `require_due` the clock must also have run out.
    pub fn force_turn_expiry(
        &mut self,
        generation: u64,
        cause: TurnChangeCause,
        require_due: bool,
        now: DateTime<Utc>,
    ) -> GameResult<Transition> {
        self.require_active()?;
        match self.game.clock.check(generation, now) {
            ExpiryCheck::Stale { current } => Err(GameError::StaleTimerFire {
                expected: generation,
                current,
            }),
            ExpiryCheck::Stopped => Err(GameError::invalid("Turn clock is stopped")),
            ExpiryCheck::NotDue if require_due => {
                Err(GameError::invalid("Turn has time remaining"))
            }
            ExpiryCheck::NotDue | ExpiryCheck::Due => Ok(self.switch_turn(cause, now)),
        }
    }

    fn switch_turn(&mut self, cause: TurnChangeCause, now: DateTime<Utc>) -> Transition {
        let from = self.game.turn;
        let next = from
            .active_team()
            .map(|t| TurnState::turn_of(t.other()))
            .unwrap_or(from);
        self.game.turn = next;
        self.game.clue = None;
        let generation = self.game.clock.reset(now);
        Transition {
            from,
            to: next,
            cause,
            generation,
            at: now,
        }
    }

    fn check_exhausted(&mut self, team: Team, now: DateTime<Utc>) -> Option<Transition> {
        (self.game.words_remaining(team) == 0)
            .then(|| self.finish(team, TurnChangeCause::AllWordsFound, now))
    }

    fn finish(&mut self, winner: Team, cause: TurnChangeCause, now: DateTime<Utc>) -> Transition {
        let from = self.game.turn;
        self.game.turn = TurnState::win_for(winner);
        self.game.clue = None;
        self.game.clock.stop();
        Transition {
            from,
            to: self.game.turn,
            cause,
            generation: self.game.clock.generation(),
            at: now,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    /// Deterministic layout: R0..R7 red, B0..B7 blue, N0..N7 neutral, X assassin
    pub(crate) fn fixed_cards() -> Vec<Card> {
        let mut cards = Vec::new();
        for i in 0..8 {
            cards.push(Card {
                word: format!("R{}", i),
                kind: CardKind::Red,
            });
            cards.push(Card {
                word: format!("B{}", i),
                kind: CardKind::Blue,
            });
            cards.push(Card {
                word: format!("N{}", i),
                kind: CardKind::Neutral,
            });
        }
        cards.push(Card {
            word: "X".to_string(),
            kind: CardKind::Assassin,
        });
        cards
    }

    fn machine() -> GameStateMachine {
        GameStateMachine::from_cards("g".to_string(), fixed_cards(), GameConfig::default(), at(0))
    }

    #[test]
    fn test_new_deals_standard_layout() {
        let words: Vec<String> = (0..30).map(|i| format!("word{}", i)).collect();
        let m = GameStateMachine::new("g".into(), &words, GameConfig::default(), at(0)).unwrap();
        let cards = &m.game().cards;
        assert_eq!(cards.len(), BOARD_SIZE);
        let count = |k| cards.iter().filter(|c| c.kind == k).count();
        assert_eq!(count(CardKind::Red), 8);
        assert_eq!(count(CardKind::Blue), 8);
        assert_eq!(count(CardKind::Neutral), 8);
        assert_eq!(count(CardKind::Assassin), 1);
    }

    #[test]
    fn test_new_rejects_short_word_list() {
        let mut words: Vec<String> = (0..24).map(|i| format!("w{}", i)).collect();
        words.push("W0".to_string()); // duplicate after normalisation
        let result = GameStateMachine::new("g".into(), &words, GameConfig::default(), at(0));
        assert!(matches!(result, Err(GameError::InvalidAction(_))));
    }

    #[test]
    fn test_own_word_keeps_turn() {
        let mut m = machine();
        let generation = m.generation();
        let effect = m.guess_word("r0", at(5)).unwrap();
        assert_eq!(effect.outcome, GuessOutcome::OwnTeam);
        assert!(effect.continues_turn());
        assert_eq!(m.turn(), TurnState::RedTurn);
        assert_eq!(m.game().scores.red, 1);
        assert_eq!(m.generation(), generation);
    }

    #[test]
    fn test_opposing_word_scores_for_opponent_and_switches() {
        let mut m = machine();
        let effect = m.guess_word("B3", at(5)).unwrap();
        assert_eq!(effect.outcome, GuessOutcome::OpposingTeam);
        assert_eq!(m.game().scores.blue, 1);
        assert_eq!(m.turn(), TurnState::BlueTurn);
        let t = effect.transition.unwrap();
        assert_eq!(t.from, TurnState::RedTurn);
        assert_eq!(t.to, TurnState::BlueTurn);
        assert_eq!(m.clock().started_at(), at(5));
    }

    #[test]
    fn test_neutral_word_switches() {
        let mut m = machine();
        m.guess_word("N0", at(1)).unwrap();
        assert_eq!(m.turn(), TurnState::BlueTurn);
        assert_eq!(m.game().scores, Scores::default());
    }

    #[test]
    fn test_assassin_ends_game_for_opponent() {
        let mut m = machine();
        let effect = m.guess_word("X", at(1)).unwrap();
        assert_eq!(effect.outcome, GuessOutcome::Assassin);
        assert_eq!(m.turn(), TurnState::BlueWin);
        assert!(!m.clock().is_running());
        assert!(m.guess_word("R1", at(2)).is_err());
    }

    #[test]
    fn test_revealed_word_rejected() {
        let mut m = machine();
        m.guess_word("R0", at(1)).unwrap();
        let err = m.guess_word("r0", at(2)).unwrap_err();
        assert!(err.to_string().contains("already revealed"));
        assert_eq!(m.game().revealed.len(), 1);
    }

    #[test]
    fn test_finding_all_words_wins() {
        let mut m = machine();
        for i in 0..7 {
            m.guess_word(&format!("R{}", i), at(i)).unwrap();
        }
        let effect = m.guess_word("R7", at(10)).unwrap();
        assert_eq!(effect.transition.unwrap().cause, TurnChangeCause::AllWordsFound);
        assert_eq!(m.turn(), TurnState::RedWin);
    }

    #[test]
    fn test_meta_continue_resets_clock_without_switch() {
        let mut m = machine();
        let generation = m.generation();
        let t = m
            .resolve_meta_decision("p", MetaAction::Continue, generation, at(30))
            .unwrap()
            .unwrap();
        assert!(!t.is_switch());
        assert_eq!(m.turn(), TurnState::RedTurn);
        assert_eq!(m.generation(), generation + 1);
        assert_eq!(m.clock().started_at(), at(30));
    }

    #[test]
    fn test_meta_end_turn_switches_and_discuss_more_does_nothing() {
        let mut m = machine();
        let generation = m.generation();
        assert!(m
            .resolve_meta_decision("p", MetaAction::DiscussMore, generation, at(1))
            .unwrap()
            .is_none());
        assert_eq!(m.generation(), generation);

        let t = m
            .resolve_meta_decision("p", MetaAction::EndTurn, generation, at(2))
            .unwrap()
            .unwrap();
        assert!(t.is_switch());
        assert_eq!(m.turn(), TurnState::BlueTurn);
    }

    #[test]
    fn test_expiry_and_resolution_change_turn_at_most_once() {
        // expiry first: the resolution for the old generation is stale
        let mut m = machine();
        let generation = m.generation();
        m.force_turn_expiry(generation, TurnChangeCause::Expired, true, at(60))
            .unwrap();
        assert!(matches!(
            m.resolve_meta_decision("p", MetaAction::EndTurn, generation, at(60)),
            Err(GameError::StaleTimerFire { .. })
        ));
        assert_eq!(m.turn(), TurnState::BlueTurn);

        // resolution first: the timer fire for the old generation is stale
        let mut m = machine();
        let generation = m.generation();
        m.resolve_meta_decision("p", MetaAction::EndTurn, generation, at(59))
            .unwrap();
        assert!(matches!(
            m.force_turn_expiry(generation, TurnChangeCause::Expired, true, at(60)),
            Err(GameError::StaleTimerFire { .. })
        ));
        assert_eq!(m.turn(), TurnState::BlueTurn);
    }

    #[test]
    fn test_expiry_requires_due_clock_when_asked() {
        let mut m = machine();
        let generation = m.generation();
        assert!(m
            .force_turn_expiry(generation, TurnChangeCause::Expired, true, at(10))
            .is_err());
        let t = m
            .force_turn_expiry(
                generation,
                TurnChangeCause::Forced {
                    reason: "host".into(),
                },
                false,
                at(10),
            )
            .unwrap();
        assert_eq!(t.to, TurnState::BlueTurn);
    }

    #[test]
    fn test_clue_rules() {
        let mut m = machine();
        let clue = |team, word: &str| Clue {
            team,
            word: word.to_string(),
            number: 2,
            given_by: "sm".to_string(),
            at: at(0),
        };
        assert!(m.set_clue(clue(Team::Blue, "ocean")).is_err());
        assert!(m.set_clue(clue(Team::Red, "r1")).is_err());
        m.set_clue(clue(Team::Red, "ocean")).unwrap();
        assert!(m.game().clue.is_some());
        m.guess_word("N1", at(1)).unwrap();
        assert!(m.game().clue.is_none());
    }
}

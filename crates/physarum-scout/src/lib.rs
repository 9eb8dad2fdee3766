//! Default finite-state scouting agent.
//!
//! The colony manager drives scouters blindly through the [`Scouter`]
//! trait; this crate supplies the stock movement machine, a two-mode grid
//! walker that follows blob trails while exploring and lays a reinforced
//! trail for a while after finding food.

use physarum_core::{Board, Cell, Scouter, ScouterSpawner};
use rand::{Rng, RngCore};

/// Trail mass deposited after a normal exploration step.
const EXPLORE_DROP: f64 = 0.25;
/// Trail mass deposited while recruiting toward a food find.
const RECRUIT_DROP: f64 = 1.0;
/// Steps a scouter keeps recruiting after leaving a food cell.
const RECRUIT_SPAN: u8 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Exploring,
    Recruiting(u8),
}

/// Blob-following walker with an exploration mode and a time-limited
/// recruiting mode entered on every food arrival.
///
/// Movement is restricted to the four in-bounds neighbours, avoiding an
/// immediate backtrack whenever another option exists. A boxed-in scouter
/// stays put, which the colony manager classifies as dead.
#[derive(Debug)]
pub struct FsmScouter {
    at: Cell,
    came_from: Option<Cell>,
    mode: Mode,
}

impl FsmScouter {
    /// Place a fresh scouter in exploration mode.
    #[must_use]
    pub fn new(at: Cell) -> Self {
        Self {
            at,
            came_from: None,
            mode: Mode::Exploring,
        }
    }

    /// Factory handed to the colony manager.
    #[must_use]
    pub fn spawner() -> ScouterSpawner {
        Box::new(|cell, _rng| Box::new(Self::new(cell)))
    }

    fn neighbours(&self, board: &dyn Board) -> Vec<Cell> {
        let Cell { x, y } = self.at;
        let mut options = Vec::with_capacity(4);
        if x > 0 {
            options.push(Cell::new(x - 1, y));
        }
        if y > 0 {
            options.push(Cell::new(x, y - 1));
        }
        if x + 1 < board.width() {
            options.push(Cell::new(x + 1, y));
        }
        if y + 1 < board.height() {
            options.push(Cell::new(x, y + 1));
        }
        options
    }

    fn choose(&self, options: &[Cell], board: &dyn Board, rng: &mut dyn RngCore) -> Option<Cell> {
        if options.is_empty() {
            return None;
        }
        match self.mode {
            Mode::Exploring => {
                let weights: Vec<f64> = options
                    .iter()
                    .map(|cell| board.blob_at(cell.x, cell.y) + 1.0)
                    .collect();
                let total: f64 = weights.iter().sum();
                let draw = rng.random_range(0.0..total);
                let mut acc = 0.0;
                for (cell, weight) in options.iter().zip(&weights) {
                    acc += weight;
                    if draw < acc {
                        return Some(*cell);
                    }
                }
                options.last().copied()
            }
            Mode::Recruiting(_) => options
                .iter()
                .copied()
                .max_by(|a, b| board.blob_at(a.x, a.y).total_cmp(&board.blob_at(b.x, b.y))),
        }
    }
}

impl Scouter for FsmScouter {
    fn position(&self) -> Cell {
        self.at
    }

    fn step(&mut self, board: &dyn Board, rng: &mut dyn RngCore) {
        let mut options = self.neighbours(board);
        if options.len() > 1
            && let Some(back) = self.came_from
        {
            options.retain(|&cell| cell != back);
        }
        let Some(next) = self.choose(&options, board, rng) else {
            return;
        };
        self.came_from = Some(self.at);
        self.at = next;
        self.mode = if board.has_food(next.x, next.y) {
            Mode::Recruiting(RECRUIT_SPAN)
        } else {
            match self.mode {
                Mode::Recruiting(span) if span > 1 => Mode::Recruiting(span - 1),
                Mode::Recruiting(_) => Mode::Exploring,
                Mode::Exploring => Mode::Exploring,
            }
        };
    }

    fn update(&self, board: &mut dyn Board) {
        let amount = match self.mode {
            Mode::Exploring => EXPLORE_DROP,
            Mode::Recruiting(_) => RECRUIT_DROP,
        };
        board.drop_blob(self.at.x, self.at.y, amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use physarum_core::GridBoard;
    use rand::{SeedableRng, rngs::SmallRng};

    #[test]
    fn spawner_places_the_scouter() {
        let mut rng = SmallRng::seed_from_u64(0);
        let scouter = (FsmScouter::spawner())(Cell::new(2, 2), &mut rng);
        assert_eq!(scouter.position(), Cell::new(2, 2));
    }

    #[test]
    fn stays_in_bounds() {
        let board = GridBoard::new(5, 5).expect("board");
        let mut rng = SmallRng::seed_from_u64(31);
        let mut scouter = FsmScouter::new(Cell::new(2, 2));
        for _ in 0..200 {
            scouter.step(&board, &mut rng);
            let at = scouter.position();
            assert!(at.x < 5 && at.y < 5, "escaped to {at}");
        }
    }

    #[test]
    fn avoids_immediate_backtrack_when_possible() {
        let board = GridBoard::new(3, 1).expect("board");
        let mut rng = SmallRng::seed_from_u64(1);
        let mut scouter = FsmScouter::new(Cell::new(0, 0));

        scouter.step(&board, &mut rng);
        assert_eq!(scouter.position(), Cell::new(1, 0));
        scouter.step(&board, &mut rng);
        assert_eq!(
            scouter.position(),
            Cell::new(2, 0),
            "the corridor leaves only the forward cell"
        );
        scouter.step(&board, &mut rng);
        assert_eq!(
            scouter.position(),
            Cell::new(1, 0),
            "a dead end permits turning back"
        );
    }

    #[test]
    fn exploring_prefers_heavier_trails() {
        let mut board = GridBoard::new(3, 3).expect("board");
        board.drop_blob(2, 1, 50.0);
        let mut rng = SmallRng::seed_from_u64(77);

        let trials = 1_000;
        let mut heavy = 0;
        for _ in 0..trials {
            let mut scouter = FsmScouter::new(Cell::new(1, 1));
            scouter.step(&board, &mut rng);
            if scouter.position() == Cell::new(2, 1) {
                heavy += 1;
            }
        }
        // Weight 51 against three weight-1 alternatives.
        let observed = f64::from(heavy) / f64::from(trials);
        assert!(observed > 0.9, "observed frequency {observed}");
    }

    #[test]
    fn food_arrival_starts_recruiting() {
        let mut board = GridBoard::new(2, 1).expect("board");
        board.set_food(1, 0).expect("food");
        let mut rng = SmallRng::seed_from_u64(5);
        let mut scouter = FsmScouter::new(Cell::new(0, 0));

        scouter.step(&board, &mut rng);
        assert_eq!(scouter.position(), Cell::new(1, 0));
        assert_eq!(scouter.mode, Mode::Recruiting(RECRUIT_SPAN));

        scouter.update(&mut board);
        assert_eq!(board.blob_at(1, 0), RECRUIT_DROP);
    }

    #[test]
    fn recruiting_expires_back_to_exploring() {
        let board = GridBoard::new(20, 1).expect("board");
        let mut rng = SmallRng::seed_from_u64(9);
        let mut scouter = FsmScouter::new(Cell::new(5, 0));
        scouter.mode = Mode::Recruiting(1);

        scouter.step(&board, &mut rng);
        assert_eq!(scouter.mode, Mode::Exploring);
    }

    #[test]
    fn recruiting_climbs_the_trail_gradient() {
        let mut board = GridBoard::new(3, 1).expect("board");
        board.drop_blob(0, 0, 4.0);
        let mut rng = SmallRng::seed_from_u64(2);
        let mut scouter = FsmScouter::new(Cell::new(1, 0));
        scouter.mode = Mode::Recruiting(5);

        scouter.step(&board, &mut rng);
        assert_eq!(
            scouter.position(),
            Cell::new(0, 0),
            "recruiting walks toward the heaviest neighbour"
        );
    }
}

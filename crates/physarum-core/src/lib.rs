//! Colony-level foraging logic for the physarum simulation.
//!
//! The crate owns the colony manager: the component that decides, every
//! simulation tick, how many scouting agents exist, where new ones spawn,
//! and how food discoveries update shared colony knowledge. Boards and
//! scouter behaviours are consumed through narrow traits so alternative
//! substrates and movement machines can be plugged in from other crates.

use rand::{Rng, RngCore, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Grid coordinate addressed by the colony.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub x: u32,
    pub y: u32,
}

impl Cell {
    /// Construct a new coordinate.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Substrate the colony spreads over.
///
/// The manager only queries cells and aggregates, instructs a global decay
/// once per tick, and never mutates cells directly; scouters deposit trail
/// through [`Board::drop_blob`] after a successful move.
pub trait Board {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Whether the cell currently bears food. Out-of-bounds cells do not.
    fn has_food(&self, x: u32, y: u32) -> bool;

    /// Whether the cell has ever carried blob mass.
    fn is_touched(&self, x: u32, y: u32) -> bool;

    /// Blob mass currently on the cell, zero when out of bounds.
    fn blob_at(&self, x: u32, y: u32) -> f64;

    /// Total blob mass over the whole board.
    fn blob_total(&self) -> f64;

    /// Number of cells currently holding positive blob mass.
    fn cover(&self) -> u32;

    /// Deposit blob mass on a cell, marking it touched.
    fn drop_blob(&mut self, x: u32, y: u32, amount: f64);

    /// Apply one tick of global decay, retaining at least `min_on_food`
    /// on touched food cells.
    fn decay(&mut self, global_decrease: f64, min_on_food: f64);
}

/// Errors raised when constructing or seeding a board.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BoardError {
    #[error("board dimensions must be non-zero")]
    ZeroDimensions,
    #[error("cell {0} lies outside the board")]
    OutOfBounds(Cell),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
struct BoardCell {
    blob: f64,
    food: bool,
    touched: bool,
}

/// Dense fixed-size grid implementation of [`Board`].
///
/// The touched flag is monotone: it is set the first time a cell receives
/// positive blob mass and never cleared, so historical coverage survives
/// decay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridBoard {
    width: u32,
    height: u32,
    cells: Vec<BoardCell>,
}

impl GridBoard {
    /// Construct an empty board with `width * height` cells.
    pub fn new(width: u32, height: u32) -> Result<Self, BoardError> {
        if width == 0 || height == 0 {
            return Err(BoardError::ZeroDimensions);
        }
        Ok(Self {
            width,
            height,
            cells: vec![BoardCell::default(); (width as usize) * (height as usize)],
        })
    }

    /// Build a board from the masks produced by upstream image analysis:
    /// the food regions and the initial blob footprint.
    pub fn from_masks(
        width: u32,
        height: u32,
        food: &[Cell],
        blob: &[Cell],
        initial_blob: f64,
    ) -> Result<Self, BoardError> {
        let mut board = Self::new(width, height)?;
        for &cell in food {
            board.set_food(cell.x, cell.y)?;
        }
        for &cell in blob {
            if cell.x >= width || cell.y >= height {
                return Err(BoardError::OutOfBounds(cell));
            }
            board.drop_blob(cell.x, cell.y, initial_blob);
        }
        Ok(board)
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + (x as usize)
    }

    fn cell(&self, x: u32, y: u32) -> Option<&BoardCell> {
        if x < self.width && y < self.height {
            Some(&self.cells[self.offset(x, y)])
        } else {
            None
        }
    }

    fn cell_mut(&mut self, x: u32, y: u32) -> Option<&mut BoardCell> {
        if x < self.width && y < self.height {
            let idx = self.offset(x, y);
            Some(&mut self.cells[idx])
        } else {
            None
        }
    }

    /// Mark a cell as food-bearing.
    pub fn set_food(&mut self, x: u32, y: u32) -> Result<(), BoardError> {
        match self.cell_mut(x, y) {
            Some(cell) => {
                cell.food = true;
                Ok(())
            }
            None => Err(BoardError::OutOfBounds(Cell::new(x, y))),
        }
    }

    /// Remove the food marker from a cell.
    pub fn clear_food(&mut self, x: u32, y: u32) -> Result<(), BoardError> {
        match self.cell_mut(x, y) {
            Some(cell) => {
                cell.food = false;
                Ok(())
            }
            None => Err(BoardError::OutOfBounds(Cell::new(x, y))),
        }
    }
}

impl Board for GridBoard {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn has_food(&self, x: u32, y: u32) -> bool {
        self.cell(x, y).is_some_and(|cell| cell.food)
    }

    fn is_touched(&self, x: u32, y: u32) -> bool {
        self.cell(x, y).is_some_and(|cell| cell.touched)
    }

    fn blob_at(&self, x: u32, y: u32) -> f64 {
        self.cell(x, y).map_or(0.0, |cell| cell.blob)
    }

    fn blob_total(&self) -> f64 {
        self.cells.iter().map(|cell| cell.blob).sum()
    }

    fn cover(&self) -> u32 {
        self.cells.iter().filter(|cell| cell.blob > 0.0).count() as u32
    }

    fn drop_blob(&mut self, x: u32, y: u32, amount: f64) {
        if let Some(cell) = self.cell_mut(x, y) {
            cell.blob += amount.max(0.0);
            if cell.blob > 0.0 {
                cell.touched = true;
            }
        }
    }

    fn decay(&mut self, global_decrease: f64, min_on_food: f64) {
        for cell in &mut self.cells {
            cell.blob -= global_decrease * cell.blob;
            if cell.food && cell.touched {
                cell.blob = cell.blob.max(min_on_food);
            }
        }
    }
}

/// Errors raised when loading, validating, or persisting [`Knowledge`].
#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("failed to read knowledge file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed knowledge file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid knowledge: {0}")]
    Invalid(&'static str),
    #[error("failed to serialize knowledge: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Weights blended into the population target formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputingFactors {
    /// Weight of total blob mass.
    #[serde(rename = "Blob Size Factor")]
    pub blob_size: f64,
    /// Weight of covered area.
    #[serde(rename = "Covering Factor")]
    pub covering: f64,
    /// Overall scale factor, combined with the board area.
    #[serde(rename = "Global Factor")]
    pub global: f64,
    /// Weight of the known-food count.
    #[serde(rename = "Known Foods Factor")]
    pub known_foods: f64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Population bounds for the scouter pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScouterLimits {
    /// Floor on the population target, at least one.
    #[serde(rename = "Min")]
    pub min: u32,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Persisted colony parameters.
///
/// Loaded once at construction and saved verbatim; the derived runtime
/// state (known food, population target) lives in [`ColonyState`] and
/// never reaches disk. Keys not modelled here, such as tunables consumed
/// by scouter implementations, ride along in the flattened maps so a
/// load/save cycle is lossless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Knowledge {
    #[serde(rename = "Computing")]
    pub computing: ComputingFactors,
    /// Per-tick decay rate applied board-wide, in `[0, 1]`.
    #[serde(rename = "Global Decrease")]
    pub global_decrease: f64,
    /// Minimum blob value retained on touched food cells after decay.
    #[serde(rename = "Remaining Blob on Food")]
    pub remaining_blob_on_food: f64,
    #[serde(rename = "Scouters")]
    pub scouters: ScouterLimits,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Knowledge {
    /// Load and validate a knowledge file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KnowledgeError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| KnowledgeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let knowledge: Self =
            serde_json::from_str(&raw).map_err(|source| KnowledgeError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        knowledge.validate()?;
        Ok(knowledge)
    }

    /// Ensure every parameter is usable before a colony is built on it.
    pub fn validate(&self) -> Result<(), KnowledgeError> {
        if self.scouters.min == 0 {
            return Err(KnowledgeError::Invalid("Scouters.Min must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.global_decrease) {
            return Err(KnowledgeError::Invalid(
                "Global Decrease must lie within [0, 1]",
            ));
        }
        if !self.remaining_blob_on_food.is_finite() || self.remaining_blob_on_food < 0.0 {
            return Err(KnowledgeError::Invalid(
                "Remaining Blob on Food must be finite and non-negative",
            ));
        }
        let factors = [
            self.computing.blob_size,
            self.computing.covering,
            self.computing.global,
            self.computing.known_foods,
        ];
        if factors.iter().any(|factor| !factor.is_finite()) {
            return Err(KnowledgeError::Invalid("Computing factors must be finite"));
        }
        Ok(())
    }

    /// Serialize with stable key order and four-space indentation.
    ///
    /// Routing through [`serde_json::Value`] sorts object keys, so the
    /// same knowledge always produces byte-identical output regardless of
    /// the key order it was loaded with.
    pub fn to_json(&self) -> Result<String, KnowledgeError> {
        let value = serde_json::to_value(self)?;
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        value.serialize(&mut serializer)?;
        Ok(String::from_utf8(out).expect("serde_json emits UTF-8"))
    }
}

/// Returns a generator for the requested seed, drawing one from entropy
/// when absent.
#[must_use]
pub fn seeded_rng(seed: Option<u64>) -> SmallRng {
    match seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::seed_from_u64(rand::random()),
    }
}

/// One mobile scouting agent, driven by its own movement machine.
///
/// The manager treats implementations as opaque: it records the position
/// before and after [`Scouter::step`] and classifies an unmoved scouter as
/// dead. All randomness a scouter needs must come from the generator it is
/// handed so whole-tick runs stay replayable from one seed.
pub trait Scouter {
    /// Current grid position.
    fn position(&self) -> Cell;

    /// Attempt one step according to the scouter's own logic.
    fn step(&mut self, board: &dyn Board, rng: &mut dyn RngCore);

    /// Record the post-move side effect, typically a trail deposit.
    fn update(&self, board: &mut dyn Board);
}

/// Factory producing a scouter at a spawn coordinate.
pub type ScouterSpawner = Box<dyn Fn(Cell, &mut dyn RngCore) -> Box<dyn Scouter> + Send + Sync>;

/// Derived colony state, recomputed or maintained at runtime and never
/// persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColonyState {
    food: Vec<Cell>,
    max_scouters: usize,
}

impl ColonyState {
    /// Coordinates known to bear food, in discovery order.
    #[must_use]
    pub fn known_food(&self) -> &[Cell] {
        &self.food
    }

    /// Current population target.
    #[must_use]
    pub fn max_scouters(&self) -> usize {
        self.max_scouters
    }

    fn knows(&self, cell: Cell) -> bool {
        self.food.contains(&cell)
    }

    /// Insert a food coordinate, returning whether it was new.
    fn discover(&mut self, cell: Cell) -> bool {
        if self.knows(cell) {
            return false;
        }
        self.food.push(cell);
        true
    }

    fn forget(&mut self, cell: Cell) -> bool {
        match self.food.iter().position(|&food| food == cell) {
            Some(idx) => {
                self.food.remove(idx);
                true
            }
            None => false,
        }
    }
}

/// Events emitted after processing one colony tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TickReport {
    /// Population target recomputed this tick.
    pub target: usize,
    /// Whether the target differs from the previous tick.
    pub target_changed: bool,
    /// Food coordinates discovered by moving scouters.
    pub discovered: usize,
    /// Scouters spawned by the grow pass.
    pub spawned: usize,
    /// Scouters culled by the shrink pass.
    pub culled: usize,
    /// Dead scouters removed and replaced one for one.
    pub replaced: usize,
}

struct ActiveScouter {
    agent: Box<dyn Scouter>,
    dead: bool,
}

/// Owner of the scouter pool and the colony's shared knowledge.
///
/// Execution is strictly turn-based: one [`ColonyManager::step`] runs to
/// completion before the next begins, and every random draw comes from the
/// single generator handed over at construction, in tick order. Two
/// managers built from the same knowledge, board, and seed therefore
/// produce identical trajectories.
pub struct ColonyManager {
    knowledge: Knowledge,
    state: ColonyState,
    scouters: Vec<ActiveScouter>,
    spawner: ScouterSpawner,
    rng: SmallRng,
}

impl fmt::Debug for ColonyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColonyManager")
            .field("knowledge", &self.knowledge)
            .field("state", &self.state)
            .field("scouters", &self.scouters.len())
            .finish()
    }
}

impl ColonyManager {
    /// Spawn coordinate used when the board offers nothing better.
    pub const DEFAULT_SPAWN: Cell = Cell::new(0, 0);

    /// Build a colony over `board`, validating `knowledge` first.
    ///
    /// Scans the whole board once for cells that are simultaneously
    /// food-bearing and touched, seeds the known-food set with them,
    /// computes the initial population target, and spawns up to it.
    pub fn new(
        board: &dyn Board,
        knowledge: Knowledge,
        spawner: ScouterSpawner,
        rng: SmallRng,
    ) -> Result<Self, KnowledgeError> {
        knowledge.validate()?;
        let mut manager = Self {
            knowledge,
            state: ColonyState::default(),
            scouters: Vec::new(),
            spawner,
            rng,
        };
        for x in 0..board.width() {
            for y in 0..board.height() {
                if board.has_food(x, y) && board.is_touched(x, y) {
                    manager.state.discover(Cell::new(x, y));
                }
            }
        }
        manager.state.max_scouters = manager.compute_max_scouters(board);
        while manager.scouters.len() < manager.state.max_scouters {
            manager.add_scouter(board);
        }
        info!(
            scouters = manager.scouters.len(),
            known_food = manager.state.food.len(),
            "colony initialised"
        );
        Ok(manager)
    }

    /// Build a colony from a knowledge file on disk.
    pub fn from_path(
        board: &dyn Board,
        path: impl AsRef<Path>,
        spawner: ScouterSpawner,
        rng: SmallRng,
    ) -> Result<Self, KnowledgeError> {
        let knowledge = Knowledge::load(path)?;
        Self::new(board, knowledge, spawner, rng)
    }

    /// Persistable snapshot of the colony's knowledge.
    ///
    /// Derived state is excluded by construction; the output is the only
    /// durable artefact the colony produces.
    pub fn save(&self) -> Result<String, KnowledgeError> {
        self.knowledge.to_json()
    }

    /// Run one simulation tick.
    ///
    /// The order of operations is fixed and observable through the random
    /// draw sequence: move every scouter, recompute the population target,
    /// grow or shrink to it, replace scouters that failed to move, then
    /// instruct the board to decay.
    pub fn step(&mut self, board: &mut dyn Board) -> TickReport {
        let mut report = TickReport::default();

        for idx in 0..self.scouters.len() {
            let before = self.scouters[idx].agent.position();
            self.scouters[idx].agent.step(&*board, &mut self.rng);
            let after = self.scouters[idx].agent.position();
            if before == after {
                self.scouters[idx].dead = true;
                continue;
            }
            if board.has_food(after.x, after.y) && self.state.discover(after) {
                debug!(x = after.x, y = after.y, "food discovered");
                report.discovered += 1;
            }
            self.scouters[idx].agent.update(&mut *board);
        }

        let target = self.compute_max_scouters(&*board);
        report.target = target;
        report.target_changed = target != self.state.max_scouters;
        if report.target_changed {
            info!(scouters = target, "population target changed");
        }
        self.state.max_scouters = target;

        let current = self.scouters.len();
        if current < target {
            for _ in 0..target - current {
                self.add_scouter(&*board);
            }
            report.spawned = target - current;
        } else if current > target {
            for _ in 0..current - target {
                self.remove_scouter();
            }
            report.culled = current - target;
        }

        // The shrink pass may already have culled a dead scouter; only the
        // dead entries still present are replaced.
        let mut idx = 0;
        while idx < self.scouters.len() {
            if self.scouters[idx].dead {
                self.scouters.remove(idx);
                self.add_scouter(&*board);
                report.replaced += 1;
            } else {
                idx += 1;
            }
        }

        board.decay(
            self.knowledge.global_decrease,
            self.knowledge.remaining_blob_on_food,
        );
        report
    }

    /// Population target derived from current board state and knowledge.
    ///
    /// Recomputed fresh on every call; the result is floored and clamped
    /// to the configured minimum.
    #[must_use]
    pub fn compute_max_scouters(&self, board: &dyn Board) -> usize {
        let computing = &self.knowledge.computing;
        let mut total = computing.blob_size * board.blob_total()
            + computing.covering * f64::from(board.cover())
            + computing.known_foods * self.state.food.len() as f64;
        total *= computing.global
            * (f64::from(board.height()) * f64::from(board.width()) / 100_000.0);
        let floor = total.floor().max(0.0) as usize;
        floor.max(self.knowledge.scouters.min as usize)
    }

    /// Spawn one scouter unless the population target is already met.
    ///
    /// The spawn coordinate is a uniformly random known-food cell when any
    /// exist, otherwise a blob-weighted touched cell, otherwise
    /// [`Self::DEFAULT_SPAWN`].
    pub fn add_scouter(&mut self, board: &dyn Board) {
        if self.scouters.len() >= self.state.max_scouters {
            debug!("population target already reached");
            return;
        }
        let cell = if self.state.food.is_empty() {
            self.find_blob_square(board)
        } else {
            let idx = self.rng.random_range(0..self.state.food.len());
            self.state.food[idx]
        };
        let agent = (self.spawner)(cell, &mut self.rng);
        self.scouters.push(ActiveScouter { agent, dead: false });
    }

    /// Cull one scouter chosen uniformly at random.
    ///
    /// # Panics
    ///
    /// Panics when the colony has no scouters. The tick algorithm keeps
    /// the pool above the configured minimum, so an empty cull is a
    /// caller bug rather than a runtime condition.
    pub fn remove_scouter(&mut self) {
        assert!(
            !self.scouters.is_empty(),
            "cannot cull a scouter from an empty colony"
        );
        let idx = self.rng.random_range(0..self.scouters.len());
        self.scouters.remove(idx);
    }

    /// Pick a touched cell with probability proportional to its blob mass
    /// plus one, so zero-mass touched cells stay reachable.
    ///
    /// Falls back to [`Self::DEFAULT_SPAWN`] when nothing is touched.
    pub fn find_blob_square(&mut self, board: &dyn Board) -> Cell {
        let mut squares = Vec::new();
        let mut total = 0.0_f64;
        for x in 0..board.width() {
            for y in 0..board.height() {
                if board.is_touched(x, y) {
                    let weight = board.blob_at(x, y) + 1.0;
                    total += weight;
                    squares.push((Cell::new(x, y), weight));
                }
            }
        }
        let Some(&(last, _)) = squares.last() else {
            return Self::DEFAULT_SPAWN;
        };

        let draw = self.rng.random_range(0.0..total);
        let mut acc = 0.0;
        for (square, weight) in squares {
            acc += weight;
            if draw < acc {
                return square;
            }
        }
        // Accumulation error can leave the draw at the running total.
        last
    }

    /// Remove every scouter at `(x, y)`; when the cell is known food,
    /// forget it and decrement the cached target by one.
    pub fn reset(&mut self, x: u32, y: u32) {
        let cell = Cell::new(x, y);
        self.scouters
            .retain(|scouter| scouter.agent.position() != cell);
        if self.state.forget(cell) {
            self.state.max_scouters = self.state.max_scouters.saturating_sub(1);
            debug!(x, y, "food position reset");
        }
    }

    /// Record a food coordinate. Inserting an already-known coordinate
    /// leaves the set unchanged.
    pub fn food_discovered(&mut self, x: u32, y: u32) {
        if self.state.discover(Cell::new(x, y)) {
            debug!(x, y, "food discovered");
        }
    }

    /// Forget a food coordinate.
    ///
    /// # Panics
    ///
    /// Panics when the coordinate is not currently known; destroying
    /// untracked food indicates corrupted bookkeeping upstream.
    pub fn food_destroyed(&mut self, x: u32, y: u32) {
        let cell = Cell::new(x, y);
        if !self.state.forget(cell) {
            panic!("food at {cell} is not known to the colony");
        }
    }

    /// The colony's persisted parameters.
    #[must_use]
    pub fn knowledge(&self) -> &Knowledge {
        &self.knowledge
    }

    /// The colony's derived runtime state.
    #[must_use]
    pub fn state(&self) -> &ColonyState {
        &self.state
    }

    /// Number of active scouters.
    #[must_use]
    pub fn scouter_count(&self) -> usize {
        self.scouters.len()
    }

    /// Positions of all active scouters, in pool order.
    #[must_use]
    pub fn scouter_positions(&self) -> Vec<Cell> {
        self.scouters
            .iter()
            .map(|scouter| scouter.agent.position())
            .collect()
    }
}

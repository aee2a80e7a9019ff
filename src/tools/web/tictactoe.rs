//! Tic-tac-toe board model and perfect-play move search.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    X,
    O,
}

impl Mark {
    pub fn opponent(self) -> Mark {
        match self {
            Mark::X => Mark::O,
            Mark::O => Mark::X,
        }
    }

    /// Read a mark from cell text or an aria-label. Sites use `0` for `O` too.
    pub fn from_cell_text(text: &str) -> Option<Mark> {
        let t = text.trim().to_ascii_uppercase();
        if t == "X" || t.ends_with(" X") || t.contains("CROSS") {
            Some(Mark::X)
        } else if t == "O" || t == "0" || t.ends_with(" O") || t.contains("NOUGHT") || t.contains("CIRCLE") {
            Some(Mark::O)
        } else {
            None
        }
    }
}

const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

/// Cells in row-major order, 0 = top-left.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Board {
    pub cells: [Option<Mark>; 9],
}

impl Board {
    pub fn winner(&self) -> Option<Mark> {
        LINES.iter().find_map(|[a, b, c]| match self.cells[*a] {
            Some(m) if self.cells[*b] == Some(m) && self.cells[*c] == Some(m) => Some(m),
            _ => None,
        })
    }

    pub fn is_full(&self) -> bool {
        self.cells.iter().all(Option::is_some)
    }

    pub fn empty_cells(&self) -> impl Iterator<Item = usize> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_none())
            .map(|(i, _)| i)
    }

    pub fn count(&self, mark: Mark) -> usize {
        self.cells.iter().filter(|c| **c == Some(mark)).count()
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..3 {
            let line: String = (0..3)
                .map(|col| match self.cells[row * 3 + col] {
                    Some(Mark::X) => 'X',
                    Some(Mark::O) => 'O',
                    None => '.',
                })
                .collect();
            if row > 0 {
                f.write_str("/")?;
            }
            f.write_str(&line)?;
        }
        Ok(())
    }
}

/// Score from `me`'s perspective; faster wins and slower losses score higher.
fn minimax(board: &mut Board, me: Mark, to_move: Mark, depth: i32) -> i32 {
    if let Some(w) = board.winner() {
        return if w == me { 10 - depth } else { depth - 10 };
    }
    if board.is_full() {
        return 0;
    }

    let maximizing = to_move == me;
    let mut best = if maximizing { i32::MIN } else { i32::MAX };
    for i in 0..9 {
        if board.cells[i].is_some() {
            continue;
        }
        board.cells[i] = Some(to_move);
        let score = minimax(board, me, to_move.opponent(), depth + 1);
        board.cells[i] = None;
        best = if maximizing { best.max(score) } else { best.min(score) };
    }
    best
}

/// Optimal move for `me`, lowest index on ties. `None` when the game is over.
pub fn best_move(board: &Board, me: Mark) -> Option<usize> {
    if board.winner().is_some() || board.is_full() {
        return None;
    }
    let mut scratch = *board;
    let mut best: Option<(usize, i32)> = None;
    for i in 0..9 {
        if scratch.cells[i].is_some() {
            continue;
        }
        scratch.cells[i] = Some(me);
        let score = minimax(&mut scratch, me, me.opponent(), 1);
        scratch.cells[i] = None;
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| i)
}

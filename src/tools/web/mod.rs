//! Browser-driven tic-tac-toe.
//!
//! Opens a headless WebDriver session, plays X with perfect play until the
//! game ends, and reports the outcome. On a win the page is searched for a
//! 14-digit secret, which becomes the answer.

pub mod browser;
pub mod tictactoe;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::json;

use self::browser::{BrowserDriver, BrowserError, ElementId, SessionGuard};
use self::tictactoe::{best_move, Board, Mark};
use super::{Capability, CapabilityResult, Tool, ToolError};
use crate::request::Request;

pub const DEFAULT_GAME_URL: &str = "https://playtictactoe.org/";

/// Upper bound on our own moves; a real game needs at most five.
const MAX_MOVES: usize = 20;

const GAME_KEYWORDS: [&str; 5] = [
    "tic-tac-toe",
    "tictactoe",
    "tic tac toe",
    "noughts and crosses",
    "ttt",
];

/// Selectors tried in order; the first yielding nine elements wins.
const CELL_SELECTORS: [&str; 12] = [
    "button.square",
    "button.cell",
    "[role=\"gridcell\"]",
    ".cell",
    ".square",
    "td.cell",
    "td.square",
    "div.cell",
    "div.square",
    "button[data-cell]",
    "button[data-square]",
    "button",
];

impl From<BrowserError> for ToolError {
    fn from(e: BrowserError) -> Self {
        ToolError::Automation(e.to_string())
    }
}

/// Delays that give the page time to react.
#[derive(Debug, Clone, Copy)]
pub struct GamePacing {
    pub page_load: Duration,
    pub missing_cells: Duration,
    pub after_move: Duration,
    pub opponent: Duration,
    pub result: Duration,
}

impl Default for GamePacing {
    fn default() -> Self {
        Self {
            page_load: Duration::from_millis(1000),
            missing_cells: Duration::from_millis(500),
            after_move: Duration::from_millis(500),
            opponent: Duration::from_millis(1000),
            result: Duration::from_millis(2000),
        }
    }
}

impl GamePacing {
    pub fn none() -> Self {
        Self {
            page_load: Duration::ZERO,
            missing_cells: Duration::ZERO,
            after_move: Duration::ZERO,
            opponent: Duration::ZERO,
            result: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GameOutcome {
    Win,
    Loss,
    Draw,
    Incomplete,
}

impl GameOutcome {
    fn of(board: &Board, me: Mark) -> Self {
        match board.winner() {
            Some(w) if w == me => GameOutcome::Win,
            Some(_) => GameOutcome::Loss,
            None if board.is_full() => GameOutcome::Draw,
            None => GameOutcome::Incomplete,
        }
    }

    fn summary(&self) -> &'static str {
        match self {
            GameOutcome::Win => "I won the game!",
            GameOutcome::Loss => "I lost the game.",
            GameOutcome::Draw => "The game ended in a draw.",
            GameOutcome::Incomplete => "The game did not complete.",
        }
    }
}

#[derive(Debug, Clone)]
struct GameReport {
    outcome: GameOutcome,
    board: Board,
    moves: Vec<usize>,
    secret: Option<String>,
}

pub fn is_game_request(text: &str) -> bool {
    let lower = text.to_lowercase();
    GAME_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// First http(s) URL in the text, without trailing punctuation or slash.
pub fn extract_url(text: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"https?://[^\s]+").expect("valid url regex"));
    re.find(text).map(|m| {
        m.as_str()
            .trim_end_matches(['.', ',', ')', '"', '\''])
            .trim_end_matches('/')
            .to_string()
    })
}

fn find_secret(page: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\b\d{14}\b").expect("valid secret regex"));
    re.find(page).map(|m| m.as_str().to_string())
}

/// Plays tic-tac-toe on a web page as X.
pub struct WebGame {
    driver: Arc<dyn BrowserDriver>,
    default_url: String,
    pacing: GamePacing,
}

impl WebGame {
    pub fn new(driver: Arc<dyn BrowserDriver>, default_url: impl Into<String>) -> Self {
        Self {
            driver,
            default_url: default_url.into(),
            pacing: GamePacing::default(),
        }
    }

    pub fn with_pacing(mut self, pacing: GamePacing) -> Self {
        self.pacing = pacing;
        self
    }

    async fn find_cells(&self, session: &str) -> Result<Vec<ElementId>, BrowserError> {
        for selector in CELL_SELECTORS {
            let mut elements = self.driver.find_elements(session, selector).await?;
            if elements.len() >= 9 {
                tracing::debug!(selector, count = elements.len(), "Found game cells");
                elements.truncate(9);
                return Ok(elements);
            }
        }
        Ok(Vec::new())
    }

    async fn read_cell(&self, session: &str, cell: &ElementId) -> Result<Option<Mark>, BrowserError> {
        let text = self.driver.element_text(session, cell).await?;
        if let Some(mark) = Mark::from_cell_text(&text) {
            return Ok(Some(mark));
        }
        let label = self.driver.element_attribute(session, cell, "aria-label").await?;
        Ok(label.as_deref().and_then(Mark::from_cell_text))
    }

    async fn read_board(&self, session: &str, cells: &[ElementId]) -> Board {
        let mut board = Board::default();
        for (i, cell) in cells.iter().enumerate().take(9) {
            match self.read_cell(session, cell).await {
                Ok(mark) => board.cells[i] = mark,
                Err(e) => tracing::debug!(cell = i, error = %e, "Could not read cell"),
            }
        }
        board
    }

    async fn play(&self, session: &str, url: &str) -> Result<GameReport, BrowserError> {
        let me = Mark::X;
        self.driver.navigate(session, url).await?;
        tokio::time::sleep(self.pacing.page_load).await;

        let mut board = Board::default();
        let mut moves = Vec::new();
        let mut board_seen = false;
        for _ in 0..MAX_MOVES {
            let cells = self.find_cells(session).await?;
            if cells.len() < 9 {
                tracing::warn!(url, "Could not find 9 game cells");
                tokio::time::sleep(self.pacing.missing_cells).await;
                continue;
            }
            board_seen = true;

            board = self.read_board(session, &cells).await;
            tracing::debug!(board = %board, "Board state");
            let Some(index) = best_move(&board, me) else {
                break;
            };

            tracing::info!(cell = index, "Making move");
            self.driver.click(session, &cells[index]).await?;
            moves.push(index);
            tokio::time::sleep(self.pacing.after_move).await;

            board = self.read_board(session, &cells).await;
            if board.winner().is_some() || board.is_full() {
                break;
            }
            tokio::time::sleep(self.pacing.opponent).await;
        }
        if !board_seen {
            return Err(BrowserError::BoardNotFound(url.to_string()));
        }

        let outcome = GameOutcome::of(&board, me);
        let secret = if outcome == GameOutcome::Win {
            tokio::time::sleep(self.pacing.result).await;
            let source = self.driver.page_source(session).await?;
            find_secret(&source)
        } else {
            None
        };

        Ok(GameReport {
            outcome,
            board,
            moves,
            secret,
        })
    }
}

#[async_trait]
impl Tool for WebGame {
    fn capability(&self) -> Capability {
        Capability::WebGame
    }

    fn description(&self) -> &str {
        "Browse to a web page and play tic-tac-toe (tic-tac-toe, tictactoe, noughts and crosses, game URLs)"
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(90))
    }

    async fn execute(&self, request: &Request) -> Result<CapabilityResult, ToolError> {
        let text = request.text_content();
        if !is_game_request(&text) {
            return Err(ToolError::NeedsInput(
                "I can currently only play Tic-tac-toe. Please ask me to play Tic-tac-toe!"
                    .to_string(),
            ));
        }
        let url = extract_url(&text).unwrap_or_else(|| self.default_url.clone());

        // Dropping this future at any await (timeout, cancel) still closes the session.
        let guard = SessionGuard::open(Arc::clone(&self.driver)).await?;
        let result = self.play(guard.id(), &url).await;
        guard.close().await;
        let report = result?;

        tracing::info!(url = %url, outcome = ?report.outcome, moves = report.moves.len(), "Game finished");
        let answer = report
            .secret
            .clone()
            .unwrap_or_else(|| report.outcome.summary().to_string());
        Ok(CapabilityResult::text(answer).with_metadata(json!({
            "url": url,
            "outcome": report.outcome,
            "board": report.board.to_string(),
            "moves": report.moves,
            "secret": report.secret,
            "ourMarks": report.board.count(Mark::X),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// In-memory game page: clicking a cell places X, then the opponent replies.
    struct FakePage {
        board: Mutex<Board>,
        optimal_opponent: bool,
        secret: &'static str,
        closed: Mutex<Vec<String>>,
        visited: Mutex<Vec<String>>,
        fail_click: bool,
        board_missing: bool,
        open_delay: Duration,
        click_delay: Duration,
    }

    impl FakePage {
        fn new(optimal_opponent: bool) -> Self {
            Self {
                board: Mutex::new(Board::default()),
                optimal_opponent,
                secret: "Congratulations! Your code is 12345678901234.",
                closed: Mutex::new(Vec::new()),
                visited: Mutex::new(Vec::new()),
                fail_click: false,
                board_missing: false,
                open_delay: Duration::ZERO,
                click_delay: Duration::ZERO,
            }
        }

        fn closed(&self) -> Vec<String> {
            self.closed.lock().expect("closed").clone()
        }
    }

    #[async_trait]
    impl BrowserDriver for FakePage {
        async fn open_session(&self) -> Result<String, BrowserError> {
            tokio::time::sleep(self.open_delay).await;
            Ok("session-1".to_string())
        }

        async fn navigate(&self, _session: &str, url: &str) -> Result<(), BrowserError> {
            self.visited.lock().expect("visited").push(url.to_string());
            Ok(())
        }

        async fn find_elements(&self, _session: &str, css: &str) -> Result<Vec<ElementId>, BrowserError> {
            if css == ".cell" && !self.board_missing {
                Ok((0..9).map(|i| ElementId(i.to_string())).collect())
            } else {
                Ok(Vec::new())
            }
        }

        async fn element_text(&self, _session: &str, element: &ElementId) -> Result<String, BrowserError> {
            let index: usize = element.0.parse().unwrap_or_default();
            let board = self.board.lock().expect("board");
            Ok(match board.cells[index] {
                Some(Mark::X) => "X".to_string(),
                Some(Mark::O) => "O".to_string(),
                None => String::new(),
            })
        }

        async fn element_attribute(
            &self,
            _session: &str,
            _element: &ElementId,
            _name: &str,
        ) -> Result<Option<String>, BrowserError> {
            Ok(None)
        }

        async fn click(&self, _session: &str, element: &ElementId) -> Result<(), BrowserError> {
            tokio::time::sleep(self.click_delay).await;
            if self.fail_click {
                return Err(BrowserError::Command {
                    command: "click".to_string(),
                    message: "element not interactable".to_string(),
                });
            }
            let index: usize = element.0.parse().unwrap_or_default();
            let mut board = self.board.lock().expect("board");
            if board.cells[index].is_some() {
                return Ok(());
            }
            board.cells[index] = Some(Mark::X);
            if board.winner().is_none() && !board.is_full() {
                let reply = if self.optimal_opponent {
                    best_move(&board, Mark::O)
                } else {
                    board.empty_cells().next()
                };
                if let Some(i) = reply {
                    board.cells[i] = Some(Mark::O);
                }
            }
            Ok(())
        }

        async fn page_source(&self, _session: &str) -> Result<String, BrowserError> {
            Ok(format!("<html><body><p>{}</p></body></html>", self.secret))
        }

        async fn close_session(&self, session: &str) -> Result<(), BrowserError> {
            self.closed.lock().expect("closed").push(session.to_string());
            Ok(())
        }
    }

    fn game(page: Arc<FakePage>) -> WebGame {
        WebGame::new(page, DEFAULT_GAME_URL).with_pacing(GamePacing::none())
    }

    #[tokio::test]
    async fn test_win_returns_secret_and_closes_session() {
        let page = Arc::new(FakePage::new(false));
        let result = game(page.clone())
            .execute(&Request::text("Play tic-tac-toe at https://ttt.example.com/"))
            .await
            .expect("play");

        assert_eq!(result.text, "12345678901234");
        let metadata = result.metadata.expect("metadata");
        assert_eq!(metadata["outcome"], "win");
        assert_eq!(*page.visited.lock().expect("visited"), vec!["https://ttt.example.com"]);
        assert_eq!(*page.closed.lock().expect("closed"), vec!["session-1"]);
    }

    #[tokio::test]
    async fn test_perfect_opponent_draws() {
        let page = Arc::new(FakePage::new(true));
        let result = game(page.clone())
            .execute(&Request::text("Let's play noughts and crosses"))
            .await
            .expect("play");

        assert_eq!(result.text, "The game ended in a draw.");
        assert_eq!(*page.visited.lock().expect("visited"), vec![DEFAULT_GAME_URL]);
    }

    #[tokio::test]
    async fn test_automation_failure_still_closes_session() {
        let mut fake = FakePage::new(false);
        fake.fail_click = true;
        let page = Arc::new(fake);
        let err = game(page.clone())
            .execute(&Request::text("play tictactoe"))
            .await
            .expect_err("click fails");

        assert!(matches!(err, ToolError::Automation(_)));
        assert_eq!(*page.closed.lock().expect("closed"), vec!["session-1"]);
    }

    #[tokio::test]
    async fn test_page_without_board_is_an_automation_error() {
        let mut fake = FakePage::new(false);
        fake.board_missing = true;
        let page = Arc::new(fake);
        let err = game(page.clone())
            .execute(&Request::text("play tic-tac-toe at https://blank.example.com"))
            .await
            .expect_err("no board");

        assert!(matches!(err, ToolError::Automation(ref m) if m.contains("blank.example.com")));
        assert_eq!(page.closed(), vec!["session-1"]);
    }

    #[tokio::test]
    async fn test_dropping_a_game_mid_move_closes_session() {
        let mut fake = FakePage::new(false);
        fake.click_delay = Duration::from_secs(30);
        let page = Arc::new(fake);
        let game = game(page.clone());

        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            game.execute(&Request::text("play tictactoe")),
        )
        .await;
        assert!(outcome.is_err(), "game should still be waiting on the click");

        // The guard's drop spawns the close; let it run.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(page.closed(), vec!["session-1"]);
    }

    #[tokio::test]
    async fn test_dropping_a_game_while_opening_still_closes_session() {
        let mut fake = FakePage::new(false);
        fake.open_delay = Duration::from_millis(100);
        let page = Arc::new(fake);
        let game = game(page.clone());

        let outcome = tokio::time::timeout(
            Duration::from_millis(10),
            game.execute(&Request::text("play tictactoe")),
        )
        .await;
        assert!(outcome.is_err(), "game should still be opening the session");
        assert!(page.closed().is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(page.closed(), vec!["session-1"]);
        assert!(page.visited.lock().expect("visited").is_empty());
    }

    #[tokio::test]
    async fn test_other_browsing_needs_input() {
        let page = Arc::new(FakePage::new(false));
        let err = game(page.clone())
            .execute(&Request::text("Open https://example.com and read the news"))
            .await
            .expect_err("not a game");
        assert!(matches!(err, ToolError::NeedsInput(_)));
        assert!(page.visited.lock().expect("visited").is_empty());
    }

    #[test]
    fn test_extract_url_trims_trailing_slash() {
        assert_eq!(
            extract_url("play at https://ttt.puppy9.com/."),
            Some("https://ttt.puppy9.com".to_string())
        );
        assert_eq!(extract_url("no link here"), None);
    }

    #[test]
    fn test_find_secret_needs_exactly_fourteen_digits() {
        assert_eq!(find_secret("code 12345678901234!"), Some("12345678901234".to_string()));
        assert_eq!(find_secret("code 123456789012345"), None);
    }
}

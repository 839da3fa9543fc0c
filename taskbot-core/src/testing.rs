//! In-memory collaborators for tests (enabled by the `testing` feature).

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::{Result, TaskbotError};
use crate::llm::LanguageModel;
use crate::sheet::SheetBackend;

/// A grid addressed in A1 notation, one per worksheet name.
///
/// Reads trim trailing blank cells and rows the way the Sheets API does.
#[derive(Debug, Default)]
pub struct MemoryGrid {
    sheets: Mutex<HashMap<String, Vec<Vec<String>>>>,
    unavailable: AtomicBool,
    writes: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rect {
    top: u32,
    left: u32,
    // None: open-ended (whole column).
    bottom: Option<u32>,
    right: u32,
}

fn parse_cell(s: &str) -> Option<(u32, Option<u32>)> {
    let split = s.find(|c: char| c.is_ascii_digit()).unwrap_or(s.len());
    let (letters, digits) = s.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let col = letters
        .to_ascii_uppercase()
        .bytes()
        .fold(0u32, |acc, b| acc * 26 + u32::from(b - b'A' + 1));
    let row = if digits.is_empty() {
        None
    } else {
        Some(digits.parse().ok()?)
    };
    Some((col, row))
}

fn parse_range(range: &str) -> Result<(String, Rect)> {
    let bad = || TaskbotError::storage(format!("bad range: {range}"));
    let (sheet, cells) = match range.rfind('!') {
        Some(i) => {
            let name = range[..i].trim_matches('\'').replace("''", "'");
            (name, &range[i + 1..])
        }
        None => (String::new(), range),
    };
    let (a, b) = cells.split_once(':').unwrap_or((cells, cells));
    let (left, top) = parse_cell(a).ok_or_else(bad)?;
    let (right, bottom) = parse_cell(b).ok_or_else(bad)?;
    Ok((
        sheet,
        Rect {
            top: top.unwrap_or(1),
            left,
            bottom,
            right,
        },
    ))
}

fn trim_trailing(mut rows: Vec<Vec<String>>) -> Vec<Vec<String>> {
    for row in rows.iter_mut() {
        while row.last().is_some_and(|v| v.is_empty()) {
            row.pop();
        }
    }
    while rows.last().is_some_and(|r| r.is_empty()) {
        rows.pop();
    }
    rows
}

impl MemoryGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `StorageUnavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful `update_values` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Seed a row on the default sheet starting at `col`.
    pub fn set_row(&self, row: u32, col: u32, values: &[&str]) {
        let mut sheets = self.sheets.lock().unwrap_or_else(|e| e.into_inner());
        let grid = sheets.entry(String::new()).or_default();
        for (i, v) in values.iter().enumerate() {
            put(grid, row, col + i as u32, v.to_string());
        }
    }

    pub fn cell(&self, row: u32, col: u32) -> String {
        self.cell_in(None, row, col)
    }

    pub fn cell_in(&self, sheet: Option<&str>, row: u32, col: u32) -> String {
        let sheets = self.sheets.lock().unwrap_or_else(|e| e.into_inner());
        sheets
            .get(sheet.unwrap_or(""))
            .and_then(|g| g.get(row as usize - 1))
            .and_then(|r| r.get(col as usize - 1))
            .cloned()
            .unwrap_or_default()
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TaskbotError::storage("backend offline"));
        }
        Ok(())
    }

    fn read(&self, range: &str) -> Result<Vec<Vec<String>>> {
        self.check()?;
        let (sheet, rect) = parse_range(range)?;
        let sheets = self.sheets.lock().unwrap_or_else(|e| e.into_inner());
        let Some(grid) = sheets.get(&sheet) else {
            return Ok(vec![]);
        };
        let bottom = rect.bottom.unwrap_or(grid.len() as u32);
        let mut out = Vec::new();
        for r in rect.top..=bottom {
            let row = grid.get(r as usize - 1);
            let values = (rect.left..=rect.right)
                .map(|c| {
                    row.and_then(|row| row.get(c as usize - 1))
                        .cloned()
                        .unwrap_or_default()
                })
                .collect();
            out.push(values);
        }
        Ok(trim_trailing(out))
    }

    fn write(&self, range: &str, values: Vec<Vec<String>>) -> Result<()> {
        self.check()?;
        let (sheet, rect) = parse_range(range)?;
        let mut sheets = self.sheets.lock().unwrap_or_else(|e| e.into_inner());
        let grid = sheets.entry(sheet).or_default();
        for (i, row) in values.into_iter().enumerate() {
            for (j, v) in row.into_iter().enumerate() {
                put(grid, rect.top + i as u32, rect.left + j as u32, v);
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn put(grid: &mut Vec<Vec<String>>, row: u32, col: u32, value: String) {
    let (r, c) = (row as usize - 1, col as usize - 1);
    if grid.len() <= r {
        grid.resize(r + 1, Vec::new());
    }
    if grid[r].len() <= c {
        grid[r].resize(c + 1, String::new());
    }
    grid[r][c] = value;
}

impl SheetBackend for MemoryGrid {
    fn get_values(&self, range: &str) -> impl Future<Output = Result<Vec<Vec<String>>>> + Send {
        let out = self.read(range);
        async move { out }
    }

    fn update_values(
        &self,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> impl Future<Output = Result<()>> + Send {
        let out = self.write(range, values);
        async move { out }
    }
}

/// A language model that replays canned responses in order and records prompts.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()));
        self
    }

    pub fn fail(self, err: TaskbotError) -> Self {
        self.push(Err(err));
        self
    }

    pub fn push(&self, response: Result<String>) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    fn next(&self, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(TaskbotError::call("no scripted response left")))
    }
}

impl LanguageModel for ScriptedModel {
    fn complete(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send {
        let out = self.next(prompt);
        async move { out }
    }
}

//! RowStore adapter: typed (row, column) access to the task sheet.
//!
//! All positions are 1-based. The backend speaks A1 notation; this module owns
//! the translation and the table layout:
//!
//! - header row at `header_row` (3 by default), data from the next row down;
//! - eight task fields in consecutive columns starting at `first_column`
//!   (status, task, category, responsible, created-at, deadline, priority,
//!   comments);
//! - the last non-blank cell in `anchor_column` bounds the table and gives the
//!   append point.
//!
//! Columns left of `first_column` (e.g. a numbering formula) are never written.

use std::future::Future;
use std::sync::Arc;

use chrono::DateTime;
use chrono_tz::Tz;
use serde_json::{Map, Value};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::error::{Result, TaskbotError};
use crate::task::{StatusGlyph, TaskCandidate};
use crate::time::format_timestamp;

/// Number of task field columns.
pub const FIELD_COUNT: u32 = 8;

/// Grid access in A1 notation (`C4:J4`, `'Tasks'!C:C`).
pub trait SheetBackend: Send + Sync {
    /// Values in the range, row-major. Trailing blank cells and rows may be omitted.
    fn get_values(&self, range: &str) -> impl Future<Output = Result<Vec<Vec<String>>>> + Send;

    fn update_values(
        &self,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> impl Future<Output = Result<()>> + Send;
}

impl<T: SheetBackend> SheetBackend for std::sync::Arc<T> {
    fn get_values(&self, range: &str) -> impl Future<Output = Result<Vec<Vec<String>>>> + Send {
        (**self).get_values(range)
    }

    fn update_values(
        &self,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> impl Future<Output = Result<()>> + Send {
        (**self).update_values(range, values)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetLayout {
    pub header_row: u32,
    pub first_column: u32,
    pub anchor_column: u32,
}

impl Default for SheetLayout {
    fn default() -> Self {
        Self {
            header_row: 3,
            first_column: 2,
            anchor_column: 3,
        }
    }
}

impl SheetLayout {
    pub fn last_column(&self) -> u32 {
        self.first_column + FIELD_COUNT - 1
    }

    pub fn first_data_row(&self) -> u32 {
        self.header_row + 1
    }
}

/// One data row, keyed by the live header names in sheet order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRow {
    pub row: u32,
    pub cells: Vec<(String, String)>,
}

impl SheetRow {
    fn from_values(row: u32, headers: &[String], values: &[String]) -> Self {
        let cells = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), values.get(i).cloned().unwrap_or_default()))
            .collect();
        Self { row, cells }
    }

    pub fn get(&self, header: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.as_str())
    }

    /// `{"sheet_row": N, "<header>": "<value>", ...}` in sheet order.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("sheet_row".to_string(), Value::from(self.row));
        for (h, v) in &self.cells {
            obj.insert(h.clone(), Value::String(v.clone()));
        }
        Value::Object(obj)
    }
}

/// Header row plus all data rows down to the last filled anchor row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<SheetRow>,
}

impl Table {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Column number to letters: 1 -> A, 26 -> Z, 27 -> AA.
pub fn column_letter(col: u32) -> String {
    let mut n = col;
    let mut out = Vec::new();
    while n > 0 {
        let r = (n - 1) % 26;
        out.push(char::from(b'A' + r as u8));
        n = (n - 1) / 26;
    }
    out.iter().rev().collect()
}

fn sheet_prefix(sheet: Option<&str>) -> String {
    match sheet {
        Some(name) if !name.is_empty() => format!("'{}'!", name.replace('\'', "''")),
        _ => String::new(),
    }
}

/// `[sheet!]C4:J9`
pub fn a1_range(sheet: Option<&str>, top: u32, left: u32, bottom: u32, right: u32) -> String {
    format!(
        "{}{}{}:{}{}",
        sheet_prefix(sheet),
        column_letter(left),
        top,
        column_letter(right),
        bottom
    )
}

fn a1_column(sheet: Option<&str>, col: u32) -> String {
    let letter = column_letter(col);
    format!("{}{letter}:{letter}", sheet_prefix(sheet))
}

fn a1_cell(sheet: Option<&str>, row: u32, col: u32) -> String {
    format!("{}{}{}", sheet_prefix(sheet), column_letter(col), row)
}

#[derive(Debug, Clone)]
pub struct TaskSheet<B> {
    backend: B,
    layout: SheetLayout,
    worksheet: Option<String>,
    /// Held from reading the append point until the new row is written.
    append_lock: Arc<AsyncMutex<()>>,
}

impl<B: SheetBackend> TaskSheet<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            layout: SheetLayout::default(),
            worksheet: None,
            append_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    pub fn with_layout(mut self, layout: SheetLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Default worksheet; `None` means the spreadsheet's first sheet.
    pub fn with_worksheet(mut self, worksheet: Option<String>) -> Self {
        self.worksheet = worksheet.filter(|w| !w.trim().is_empty());
        self
    }

    pub fn layout(&self) -> SheetLayout {
        self.layout
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn sheet<'a>(&'a self, sheet: Option<&'a str>) -> Option<&'a str> {
        sheet.or(self.worksheet.as_deref())
    }

    /// 1-based index of the last non-blank cell in `col`, or 0 when the column is empty.
    pub async fn last_filled_row(&self, col: u32, sheet: Option<&str>) -> Result<u32> {
        let values = self
            .backend
            .get_values(&a1_column(self.sheet(sheet), col))
            .await?;
        let last = values
            .iter()
            .rposition(|row| row.first().is_some_and(|v| !v.trim().is_empty()))
            .map(|i| i as u32 + 1)
            .unwrap_or(0);
        Ok(last)
    }

    /// Values of a rectangle. Empty when `bottom` is above the header row.
    pub async fn read_range(
        &self,
        top: u32,
        bottom: u32,
        left: u32,
        right: u32,
        sheet: Option<&str>,
    ) -> Result<Vec<Vec<String>>> {
        if bottom < self.layout.header_row || bottom < top {
            return Ok(vec![]);
        }
        self.backend
            .get_values(&a1_range(self.sheet(sheet), top, left, bottom, right))
            .await
    }

    pub async fn write_row(
        &self,
        row: u32,
        start_col: u32,
        values: Vec<String>,
        sheet: Option<&str>,
    ) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let end_col = start_col + values.len() as u32 - 1;
        let range = a1_range(self.sheet(sheet), row, start_col, row, end_col);
        debug!(%range, "writing row");
        self.backend.update_values(&range, vec![values]).await
    }

    pub async fn write_cell(
        &self,
        row: u32,
        col: u32,
        value: impl Into<String>,
        sheet: Option<&str>,
    ) -> Result<()> {
        let range = a1_cell(self.sheet(sheet), row, col);
        self.backend
            .update_values(&range, vec![vec![value.into()]])
            .await
    }

    /// Blank `from..=to` on one row. The row itself stays.
    pub async fn clear_row(
        &self,
        row: u32,
        from_col: u32,
        to_col: u32,
        sheet: Option<&str>,
    ) -> Result<()> {
        if to_col < from_col {
            return Err(TaskbotError::validation(format!(
                "empty column span {from_col}..={to_col}"
            )));
        }
        let blanks = vec![String::new(); (to_col - from_col + 1) as usize];
        self.write_row(row, from_col, blanks, sheet).await
    }

    /// Blank the task field span of one data row.
    pub async fn clear_task_row(&self, row: u32, sheet: Option<&str>) -> Result<()> {
        if row < self.layout.first_data_row() {
            return Err(TaskbotError::validation(format!(
                "row {row} is not a data row"
            )));
        }
        self.clear_row(row, self.layout.first_column, self.layout.last_column(), sheet)
            .await
    }

    /// Live header names, trimmed, in sheet order.
    pub async fn headers(&self, sheet: Option<&str>) -> Result<Vec<String>> {
        let h = self.layout.header_row;
        let raw = self
            .read_range(h, h, self.layout.first_column, self.layout.last_column(), sheet)
            .await?;
        Ok(raw
            .into_iter()
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.trim().to_string())
            .collect())
    }

    /// Header row plus every data row down to the last filled anchor cell.
    pub async fn scan_table(&self, sheet: Option<&str>) -> Result<Table> {
        let last = self.last_filled_row(self.layout.anchor_column, sheet).await?;
        let raw = self
            .read_range(
                self.layout.header_row,
                last,
                self.layout.first_column,
                self.layout.last_column(),
                sheet,
            )
            .await?;
        let mut it = raw.into_iter();
        let Some(header_values) = it.next() else {
            return Ok(Table::default());
        };
        let headers: Vec<String> = header_values.iter().map(|s| s.trim().to_string()).collect();
        let rows = it
            .enumerate()
            .map(|(i, values)| {
                SheetRow::from_values(self.layout.first_data_row() + i as u32, &headers, &values)
            })
            .collect();
        Ok(Table { headers, rows })
    }

    /// Current values of one row, keyed by `headers`.
    pub async fn row_snapshot(
        &self,
        row: u32,
        headers: &[String],
        sheet: Option<&str>,
    ) -> Result<Option<SheetRow>> {
        let raw = self
            .read_range(row, row, self.layout.first_column, self.layout.last_column(), sheet)
            .await?;
        match raw.into_iter().next() {
            Some(values) if !values.is_empty() => {
                Ok(Some(SheetRow::from_values(row, headers, &values)))
            }
            _ => Ok(None),
        }
    }

    /// Append a task below the last filled row and return the row it landed on.
    ///
    /// Concurrent inserts through the same `TaskSheet` (or its clones) land on
    /// distinct rows.
    pub async fn insert_task(
        &self,
        task: &TaskCandidate,
        now: &DateTime<Tz>,
        sheet: Option<&str>,
    ) -> Result<u32> {
        let _append = self.append_lock.lock().await;
        let last = self.last_filled_row(self.layout.anchor_column, sheet).await?;
        let row = last.max(self.layout.header_row) + 1;
        let values = vec![
            StatusGlyph::InProgress.as_str().to_string(),
            task.task.trim().to_string(),
            task.category.clone().unwrap_or_default(),
            task.responsible.clone().unwrap_or_default(),
            format_timestamp(now),
            task.deadline.clone().unwrap_or_default(),
            task.priority.map(|p| p.as_str().to_string()).unwrap_or_default(),
            task.comments.clone().unwrap_or_default(),
        ];
        self.write_row(row, self.layout.first_column, values, sheet)
            .await?;
        Ok(row)
    }

    /// Write `changes` into `row`, one cell per known header. Unknown headers are skipped.
    ///
    /// Returns the number of cells written.
    pub async fn apply_changes(
        &self,
        row: u32,
        changes: &[(String, String)],
        sheet: Option<&str>,
    ) -> Result<usize> {
        if row < self.layout.first_data_row() {
            return Err(TaskbotError::validation(format!(
                "row {row} is not a data row"
            )));
        }
        let headers = self.headers(sheet).await?;
        if headers.is_empty() {
            return Err(TaskbotError::validation("header row is empty"));
        }
        let mut written = 0;
        for (name, value) in changes {
            let Some(idx) = headers.iter().position(|h| h == name) else {
                debug!(header = %name, "skipping unknown column");
                continue;
            };
            self.write_cell(row, self.layout.first_column + idx as u32, value.clone(), sheet)
                .await?;
            written += 1;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryGrid;
    use crate::time::parse_timezone;
    use chrono::TimeZone;

    fn sheet_with_header() -> TaskSheet<MemoryGrid> {
        let grid = MemoryGrid::new();
        grid.set_row(
            3,
            2,
            &[
                "Статус",
                "Задача",
                "Категория",
                "Ответственный",
                "Дата",
                "Срок",
                "Приоритет",
                "Комментарии / Подзадачи",
            ],
        );
        TaskSheet::new(grid)
    }

    #[test]
    fn column_letters() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(3), "C");
        assert_eq!(column_letter(26), "Z");
        assert_eq!(column_letter(27), "AA");
        assert_eq!(column_letter(702), "ZZ");
        assert_eq!(a1_range(None, 4, 3, 4, 10), "C4:J4");
        assert_eq!(a1_range(Some("Объект 1"), 3, 2, 9, 9), "'Объект 1'!B3:I9");
    }

    #[tokio::test]
    async fn last_filled_row_is_stable_without_writes() {
        let s = sheet_with_header();
        s.backend().set_row(4, 2, &["🔄", "Отчёт"]);
        s.backend().set_row(6, 2, &["✅", "  "]);
        let a = s.last_filled_row(3, None).await.unwrap();
        let b = s.last_filled_row(3, None).await.unwrap();
        assert_eq!(a, 4);
        assert_eq!(a, b);
        assert_eq!(s.last_filled_row(11, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn read_range_above_header_is_empty() {
        let s = sheet_with_header();
        assert!(s.read_range(1, 2, 2, 9, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_row_then_read_back() {
        let s = sheet_with_header();
        let values: Vec<String> = ["🔄", "Позвонить", "", "Иван"]
            .iter()
            .map(|v| v.to_string())
            .collect();
        s.write_row(4, 2, values, None).await.unwrap();
        let got = s.read_range(4, 4, 2, 5, None).await.unwrap();
        assert_eq!(got, vec![vec!["🔄", "Позвонить", "", "Иван"]]);
    }

    #[tokio::test]
    async fn insert_appends_after_last_row_with_blank_optionals() {
        let s = sheet_with_header();
        s.backend().set_row(4, 2, &["🔄", "Старая задача"]);
        let tz = parse_timezone("Europe/Moscow").unwrap();
        let now = tz.with_ymd_and_hms(2026, 10, 18, 9, 5, 0).unwrap();
        let task = TaskCandidate::new("Прислать отчёт").with_deadline("20.10.2026");

        let row = s.insert_task(&task, &now, None).await.unwrap();
        assert_eq!(row, 5);
        let got = s.read_range(5, 5, 2, 9, None).await.unwrap();
        assert_eq!(
            got[0],
            vec!["🔄", "Прислать отчёт", "", "", "18.10.2026 09:05", "20.10.2026"]
        );
        assert_eq!(s.backend().cell(5, 8), "");
        assert_eq!(s.backend().cell(5, 1), "");
    }

    #[tokio::test]
    async fn insert_into_sheet_without_header_starts_below_header_row() {
        let s = TaskSheet::new(MemoryGrid::new());
        let tz = parse_timezone("Europe/Moscow").unwrap();
        let now = tz.with_ymd_and_hms(2026, 10, 18, 9, 5, 0).unwrap();
        let row = s
            .insert_task(&TaskCandidate::new("Задача"), &now, None)
            .await
            .unwrap();
        assert_eq!(row, 4);
    }

    #[tokio::test]
    async fn clear_row_keeps_helper_column() {
        let s = sheet_with_header();
        s.backend().set_row(4, 1, &["1", "🔄", "Отчёт", "Финансы"]);
        s.clear_task_row(4, None).await.unwrap();
        assert_eq!(s.backend().cell(4, 1), "1");
        assert_eq!(s.backend().cell(4, 3), "");
        assert!(s.clear_task_row(3, None).await.is_err());
    }

    #[tokio::test]
    async fn scan_table_tags_rows_with_sheet_index() {
        let s = sheet_with_header();
        s.backend().set_row(4, 2, &["🔄", "Отчёт"]);
        s.backend().set_row(5, 2, &["✅", "Зал", "", "Петров"]);
        let table = s.scan_table(None).await.unwrap();
        assert_eq!(table.headers.len(), 8);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1].row, 5);
        assert_eq!(table.rows[1].get("Ответственный"), Some("Петров"));
        assert_eq!(table.rows[0].get("Приоритет"), Some(""));
    }

    #[tokio::test]
    async fn apply_changes_skips_unknown_headers() {
        let s = sheet_with_header();
        s.backend().set_row(4, 2, &["🔄", "Отчёт"]);
        let changes = vec![
            ("Статус".to_string(), "✅".to_string()),
            ("Бюджет".to_string(), "100".to_string()),
        ];
        let written = s.apply_changes(4, &changes, None).await.unwrap();
        assert_eq!(written, 1);
        assert_eq!(s.backend().cell(4, 2), "✅");
    }

    #[tokio::test]
    async fn worksheet_name_is_carried_into_ranges() {
        let s = sheet_with_header().with_worksheet(Some("Объект".to_string()));
        s.write_cell(4, 3, "x", None).await.unwrap();
        assert_eq!(s.backend().cell_in(Some("Объект"), 4, 3), "x");
        assert_eq!(s.backend().cell(4, 3), "");
    }
}

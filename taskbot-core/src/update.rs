//! Update-command resolver: free text to target row(s) and a change set.
//!
//! Resolution only reads. Writing is [`apply_update`], a separate call. Nothing
//! guards the gap between the two: a row edited by someone else in between is
//! overwritten.

use chrono::NaiveDate;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, TaskbotError};
use crate::llm::{LanguageModel, decode_json};
use crate::sheet::{SheetBackend, SheetRow, Table, TaskSheet};
use crate::task::StatusGlyph;
use crate::time::format_date;

/// Key the model uses for its confirmation sentence.
const CHAT_REPLY_KEY: &str = "Ответ в чате";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateResolution {
    /// Sheet rows the command refers to; the first one is the write target.
    pub matched_rows: Vec<u32>,
    /// Header name to new cell value, known headers only.
    pub changes: Vec<(String, String)>,
    pub chat_reply: String,
    /// Values of the first matched row before any change, for undo.
    pub revert_row: Option<SheetRow>,
}

impl UpdateResolution {
    pub fn target_row(&self) -> Option<u32> {
        self.matched_rows.first().copied()
    }
}

pub fn update_prompt(table: &Table, command: &str, today: NaiveDate) -> String {
    let rows: Vec<Value> = table.rows.iter().map(SheetRow::to_json).collect();
    let table_json =
        serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string());
    let glyphs: Vec<String> = StatusGlyph::ALL
        .iter()
        .map(|g| format!("{} — {}", g.as_str(), g.meaning()))
        .collect();
    format!(
        r#"Сегодняшняя дата: {today}

Таблица задач (каждая строка с полем sheet_row — номер строки на листе):

{table_json}

Колонки таблицы (названия используй точно): {headers}

Пользователь написал: «{command}»

Сделай три шага:
1) Определи, какая задача (или какие) имеется в виду — верни их sheet_row в массиве matched_rows.
2) Определи, что именно пользователь хочет изменить: в объекте changes укажи только те колонки, которые нужно обновить. Ключ — точное название колонки из списка выше, значение — новое значение для ячейки.
3) Обязательно заполни поле "{reply_key}" — одну короткую фразу для пользователя в чате: что именно сделано. Укажи название задачи в кавычках и суть изменения. Примеры: "Перенёс срок по задаче «Отчёт по продажам» на 15.02.2025"; "Поменял статус по задаче «Связаться с подрядчиком» на Выполнено"; "Назначил ответственным по задаче «Подготовить зал» Петрова".

Примеры changes:
- «задача егорова по отчету выполнена» → changes: {{"Статус": "✅"}}
- «перенести срок на 15.02.2025» → changes: {{"Срок": "15.02.2025"}}
- «добавить в комментарий: согласовано с директором» → changes: {{"Комментарии / Подзадачи": "согласовано с директором"}}
- «сделай петрова ответственным по этой задаче» → changes: {{"Ответственный": "Петров"}}
Если пользователь не просит ничего менять — верни changes: {{}}.

Важно: если изменение касается статуса задачи, используй только эти обозначения вместо текста:
{glyphs}

Формат ответа — только один JSON с тремя полями:
{{"matched_rows": [4], "changes": {{"Заголовок": "Изменение"}}, "{reply_key}": "Перенёс срок по задаче «Название» на 15.02.2025"}}
Только JSON, без markdown и пояснений."#,
        today = format_date(today),
        headers = table.headers.join(", "),
        command = command.trim(),
        reply_key = CHAT_REPLY_KEY,
        glyphs = glyphs.join("\n"),
    )
}

fn row_number(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// List, scalar, or nothing; non-numeric entries dropped.
fn coerce_rows(v: Option<&Value>) -> Vec<u32> {
    match v {
        Some(Value::Array(items)) => items.iter().filter_map(row_number).collect(),
        Some(other) => row_number(other).into_iter().collect(),
        None => vec![],
    }
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Keep only keys naming a live header. The status column (first header)
/// only takes a status glyph.
fn coerce_changes(v: Option<&Value>, headers: &[String]) -> Vec<(String, String)> {
    let Some(Value::Object(map)) = v else {
        return vec![];
    };
    let status_header = headers.first();
    map.iter()
        .filter_map(|(k, v)| {
            if !headers.iter().any(|h| h == k) {
                debug!(column = %k, "dropping change for unknown column");
                return None;
            }
            let value = stringify(v);
            if status_header != Some(k) {
                return Some((k.clone(), value));
            }
            match StatusGlyph::parse(&value) {
                Some(glyph) => Some((k.clone(), glyph.as_str().to_string())),
                None => {
                    debug!(value = %value, "dropping status change that is not a glyph");
                    None
                }
            }
        })
        .collect()
}

fn interpret(data: &Value, table: &Table) -> UpdateResolution {
    let known_rows: Vec<u32> = table.rows.iter().map(|r| r.row).collect();
    let matched_rows = coerce_rows(data.get("matched_rows"))
        .into_iter()
        .filter(|r| known_rows.contains(r))
        .collect();
    let chat_reply = data
        .get(CHAT_REPLY_KEY)
        .or_else(|| data.get("chat_reply"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    UpdateResolution {
        matched_rows,
        changes: coerce_changes(data.get("changes"), &table.headers),
        chat_reply,
        revert_row: None,
    }
}

/// Find the rows `command` refers to and the changes it asks for.
///
/// An empty table short-circuits without calling the model.
pub async fn resolve_update<L: LanguageModel, B: SheetBackend>(
    model: &L,
    sheet: &TaskSheet<B>,
    command: &str,
    today: NaiveDate,
    worksheet: Option<&str>,
) -> Result<UpdateResolution> {
    let table = sheet.scan_table(worksheet).await?;
    if table.is_empty() {
        return Ok(UpdateResolution::default());
    }

    let response = model
        .complete(&update_prompt(&table, command, today))
        .await?;
    let data: Value = decode_json(&response)?;
    if !data.is_object() {
        return Err(TaskbotError::decode("expected a JSON object"));
    }
    let mut resolution = interpret(&data, &table);

    if let Some(row) = resolution.target_row() {
        resolution.revert_row = match sheet.row_snapshot(row, &table.headers, worksheet).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(row, error = %e, "could not snapshot row; undo unavailable");
                None
            }
        };
    }
    Ok(resolution)
}

/// Write the resolution's changes into its first matched row.
///
/// Returns the row written. Fails with `ValidationFailed` when none of the
/// changed columns is in the header row any more.
pub async fn apply_update<B: SheetBackend>(
    sheet: &TaskSheet<B>,
    resolution: &UpdateResolution,
    worksheet: Option<&str>,
) -> Result<u32> {
    let Some(row) = resolution.target_row() else {
        return Err(TaskbotError::validation("no matched row to update"));
    };
    if resolution.changes.is_empty() {
        return Err(TaskbotError::validation("no changes to apply"));
    }
    let written = sheet
        .apply_changes(row, &resolution.changes, worksheet)
        .await?;
    if written == 0 {
        return Err(TaskbotError::validation(format!(
            "no changed column left in the header row of row {row}"
        )));
    }
    Ok(row)
}

/// Write a captured snapshot back into its row.
pub async fn revert_update<B: SheetBackend>(
    sheet: &TaskSheet<B>,
    snapshot: &SheetRow,
    worksheet: Option<&str>,
) -> Result<usize> {
    sheet
        .apply_changes(snapshot.row, &snapshot.cells, worksheet)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryGrid, ScriptedModel};
    use serde_json::json;

    const HEADERS: [&str; 8] = [
        "Статус",
        "Задача",
        "Категория",
        "Ответственный",
        "Дата",
        "Срок",
        "Приоритет",
        "Комментарии / Подзадачи",
    ];

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    fn table() -> Table {
        Table {
            headers: HEADERS.iter().map(|h| h.to_string()).collect(),
            rows: vec![SheetRow {
                row: 4,
                cells: vec![("Статус".to_string(), "🔄".to_string())],
            }],
        }
    }

    #[test]
    fn scalar_and_string_rows_are_coerced() {
        assert_eq!(coerce_rows(Some(&json!(4))), vec![4]);
        assert_eq!(coerce_rows(Some(&json!(["4", 5, "x", -1]))), vec![4, 5]);
        assert_eq!(coerce_rows(Some(&json!(null))), Vec::<u32>::new());
        assert_eq!(coerce_rows(Some(&json!(false))), Vec::<u32>::new());
        assert_eq!(coerce_rows(None), Vec::<u32>::new());
    }

    #[test]
    fn unknown_columns_are_dropped_and_values_stringified() {
        let data = json!({
            "matched_rows": 4,
            "changes": {"Статус": "✅", "Бюджет": "100", "Приоритет": null, "Срок": 15},
            "Ответ в чате": " Готово "
        });
        let r = interpret(&data, &table());
        assert_eq!(r.matched_rows, vec![4]);
        assert_eq!(
            r.changes,
            vec![
                ("Статус".to_string(), "✅".to_string()),
                ("Приоритет".to_string(), String::new()),
                ("Срок".to_string(), "15".to_string()),
            ]
        );
        assert_eq!(r.chat_reply, "Готово");
        for (k, _) in &r.changes {
            assert!(HEADERS.contains(&k.as_str()));
        }
    }

    #[test]
    fn status_changes_must_be_glyphs() {
        let data = json!({"matched_rows": [4], "changes": {"Статус": "Выполнено", "Срок": "01.11.2026"}});
        let r = interpret(&data, &table());
        assert_eq!(r.changes, vec![("Срок".to_string(), "01.11.2026".to_string())]);

        let data = json!({"matched_rows": [4], "changes": {"Статус": " ⚠ "}});
        let r = interpret(&data, &table());
        assert_eq!(r.changes, vec![("Статус".to_string(), "⚠️".to_string())]);
    }

    #[test]
    fn rows_outside_the_table_are_ignored() {
        let data = json!({"matched_rows": [2, 4, 40], "changes": []});
        let r = interpret(&data, &table());
        assert_eq!(r.matched_rows, vec![4]);
        assert!(r.changes.is_empty());
    }

    #[test]
    fn prompt_lists_headers_rows_and_glyphs() {
        let p = update_prompt(&table(), "отметь выполненной", today());
        assert!(p.contains("\"sheet_row\": 4"));
        assert!(p.contains("Статус, Задача, Категория"));
        assert!(p.contains("✅ — Выполнено"));
        assert!(p.contains("⚠️ — Высокий приоритет / Контроль"));
        assert!(p.contains("«отметь выполненной»"));
    }

    fn seeded_sheet() -> TaskSheet<MemoryGrid> {
        let grid = MemoryGrid::new();
        grid.set_row(3, 2, &HEADERS);
        grid.set_row(4, 2, &["🔄", "Прислать отчёт", "", "Егоров"]);
        TaskSheet::new(grid)
    }

    #[tokio::test]
    async fn empty_table_skips_the_model() {
        let grid = MemoryGrid::new();
        grid.set_row(3, 2, &HEADERS);
        let sheet = TaskSheet::new(grid);
        let model = ScriptedModel::new();
        let r = resolve_update(&model, &sheet, "отметь выполненной", today(), None)
            .await
            .unwrap();
        assert!(r.matched_rows.is_empty());
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn mark_done_matches_the_row_and_keeps_a_snapshot() {
        let sheet = seeded_sheet();
        let model = ScriptedModel::new().reply(
            r#"{"matched_rows": [4], "changes": {"Статус": "✅"}, "Ответ в чате": "Поменял статус по задаче «Прислать отчёт» на Выполнено"}"#,
        );
        let r = resolve_update(&model, &sheet, "mark it done", today(), None)
            .await
            .unwrap();
        assert_eq!(r.matched_rows, vec![4]);
        assert_eq!(r.changes, vec![("Статус".to_string(), "✅".to_string())]);
        let snap = r.revert_row.clone().unwrap();
        assert_eq!(snap.get("Статус"), Some("🔄"));
        assert_eq!(snap.get("Ответственный"), Some("Егоров"));

        // resolution alone never writes
        assert_eq!(sheet.backend().write_count(), 0);
        assert_eq!(sheet.backend().cell(4, 2), "🔄");

        assert_eq!(apply_update(&sheet, &r, None).await.unwrap(), 4);
        assert_eq!(sheet.backend().cell(4, 2), "✅");

        revert_update(&sheet, &snap, None).await.unwrap();
        assert_eq!(sheet.backend().cell(4, 2), "🔄");
    }

    #[tokio::test]
    async fn decode_failure_prevents_any_write() {
        let sheet = seeded_sheet();
        let model = ScriptedModel::new().reply("[4]");
        let err = resolve_update(&model, &sheet, "готово", today(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskbotError::ResponseDecodeFailed(_)));
        assert_eq!(sheet.backend().write_count(), 0);
    }

    #[tokio::test]
    async fn apply_requires_a_row_and_changes() {
        let sheet = seeded_sheet();
        let mut r = UpdateResolution {
            matched_rows: vec![],
            changes: vec![("Статус".to_string(), "✅".to_string())],
            ..Default::default()
        };
        assert!(apply_update(&sheet, &r, None).await.is_err());
        r.matched_rows = vec![4];
        r.changes.clear();
        assert!(apply_update(&sheet, &r, None).await.is_err());
        assert_eq!(sheet.backend().write_count(), 0);
    }

    #[tokio::test]
    async fn apply_fails_when_the_column_disappeared() {
        let sheet = seeded_sheet();
        let r = UpdateResolution {
            matched_rows: vec![4],
            changes: vec![("Бюджет".to_string(), "100".to_string())],
            ..Default::default()
        };
        let err = apply_update(&sheet, &r, None).await.unwrap_err();
        assert!(matches!(err, TaskbotError::ValidationFailed(_)));
        assert_eq!(sheet.backend().write_count(), 0);
    }
}

use anyhow::{Context, Result};
use google_sheets4::Sheets;
use google_sheets4::api::{Scope, ValueRange};
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use taskbot_core::{SheetBackend, TaskbotError};
use tracing::debug;

// IMPORTANT: use the oauth2 version re-exported by google-sheets4 to avoid version mismatches.
use google_sheets4::oauth2;

/// `SheetBackend` over the Sheets v4 values API, authenticated as a service account.
///
/// The spreadsheet must be shared with the service account's e-mail.
pub struct GoogleSheets {
    hub: Sheets<HttpsConnector<HttpConnector>>,
    spreadsheet_id: String,
}

impl GoogleSheets {
    pub async fn connect(credentials_path: &Path, spreadsheet_id: &str) -> Result<Self> {
        let key = oauth2::read_service_account_key(credentials_path)
            .await
            .with_context(|| format!("read service account key {}", credentials_path.display()))?;
        let auth = oauth2::ServiceAccountAuthenticator::builder(key)
            .build()
            .await
            .context("building service account authenticator")?;

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let hub = Sheets::new(hyper::Client::builder().build(connector), auth);
        Ok(Self {
            hub,
            spreadsheet_id: spreadsheet_id.to_string(),
        })
    }

    async fn read(&self, range: &str) -> taskbot_core::Result<Vec<Vec<String>>> {
        let (_, vr) = self
            .hub
            .spreadsheets()
            .values_get(&self.spreadsheet_id, range)
            .value_render_option("FORMATTED_VALUE")
            .add_scope(Scope::Spreadsheet)
            .doit()
            .await
            .map_err(|e| TaskbotError::storage(format!("read {range}: {e}")))?;
        let rows = vr.values.unwrap_or_default();
        debug!(range, rows = rows.len(), "sheet read");
        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn write(&self, range: &str, values: Vec<Vec<String>>) -> taskbot_core::Result<()> {
        let req = ValueRange {
            range: Some(range.to_string()),
            major_dimension: Some("ROWS".to_string()),
            values: Some(
                values
                    .into_iter()
                    .map(|row| row.into_iter().map(Value::String).collect())
                    .collect(),
            ),
        };
        self.hub
            .spreadsheets()
            .values_update(req, &self.spreadsheet_id, range)
            .value_input_option("USER_ENTERED")
            .add_scope(Scope::Spreadsheet)
            .doit()
            .await
            .map_err(|e| TaskbotError::storage(format!("write {range}: {e}")))?;
        debug!(range, "sheet written");
        Ok(())
    }
}

impl SheetBackend for GoogleSheets {
    fn get_values(
        &self,
        range: &str,
    ) -> impl Future<Output = taskbot_core::Result<Vec<Vec<String>>>> + Send {
        self.read(range)
    }

    fn update_values(
        &self,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> impl Future<Output = taskbot_core::Result<()>> + Send {
        self.write(range, values)
    }
}

/// Formatted values arrive as strings; anything else is rendered as JSON text.
fn cell_text(v: Value) -> String {
    match v {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_cells_as_text() {
        assert_eq!(cell_text(json!("✅")), "✅");
        assert_eq!(cell_text(json!(null)), "");
        assert_eq!(cell_text(json!(12)), "12");
        assert_eq!(cell_text(json!(true)), "true");
    }
}

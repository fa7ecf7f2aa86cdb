//! Static export of the mirrored questions.

use qnaplus_sync_store::Store;
use tracing::info;

use crate::error::{Result, SyncError};
use crate::notify::{Exporter, EXPORT_FILE_NAME};

/// Serialise every stored question and hand it to `exporter`.
///
/// Returns the number of questions exported.
pub async fn export_questions(store: &dyn Store, exporter: &dyn Exporter) -> Result<usize> {
    let questions = store.all_questions().await?;
    let contents = serde_json::to_vec(&questions)?;
    let bytes = contents.len();
    exporter
        .export(EXPORT_FILE_NAME, contents)
        .await
        .map_err(|message| SyncError::Collaborator {
            collaborator: "exporter",
            message,
        })?;
    info!(questions = questions.len(), bytes, "exported questions");
    Ok(questions.len())
}

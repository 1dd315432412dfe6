//! Work line catalog
//!
//! Work lines are created on first use. Lookups go by unique name, and a
//! concurrent insert of the same name resolves to the record that won.

use tracing::debug;

use crate::db::schemas::{Metadata, WorkLineDoc};
use crate::store::{Sequence, Store};
use crate::types::{ConvenioError, Result};

/// Return the work line with `name`, creating it when missing
///
/// New work lines use the name as their description.
pub async fn find_or_create(store: &dyn Store, name: &str) -> Result<WorkLineDoc> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ConvenioError::BadRequest(
            "Work line (lineaTrabajo) is required".into(),
        ));
    }

    if let Some(existing) = store.find_work_line_by_name(name).await? {
        return Ok(existing);
    }

    let work_line = WorkLineDoc {
        id: store.next_id(Sequence::WorkLines).await?,
        metadata: Metadata::new(),
        name: name.to_string(),
        description: name.to_string(),
    };

    match store.insert_work_line(work_line.clone()).await {
        Ok(()) => {
            debug!(id = work_line.id, name, "Created work line");
            Ok(work_line)
        }
        Err(ConvenioError::Conflict(_)) => store
            .find_work_line_by_name(name)
            .await?
            .ok_or_else(|| ConvenioError::Internal(format!("Work line '{name}' vanished"))),
        Err(e) => Err(e),
    }
}

use leadflow_core::{Identity, RowPayload};
use leadflow_storage::RecordStore;

pub mod archive;
pub mod batches;
pub mod directory;
pub mod distribution;
mod error;
pub mod lifecycle;
pub mod reassign;
pub mod sheet;

pub use archive::{ArchiveEntry, ExportFile, ForwardReport, PurgeReport};
pub use batches::BatchView;
pub use directory::{AgentLoad, NewAgent};
pub use distribution::{plan_chunks, DistributionReport};
pub use error::EngineError;
pub use reassign::{ReassignReport, ReassignRequest};
pub use sheet::{read_csv_rows, CsvSheetWriter, SheetWriter};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// File stem of the administrator's full archive export.
    pub archive_export_stem: String,
    /// Prefix of an agent's per-batch export file name.
    pub agent_export_prefix: String,
    /// chrono format for the human-readable archived-on column.
    pub archived_on_format: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            archive_export_stem: "Master_Logs_Export".to_string(),
            agent_export_prefix: "Leads_".to_string(),
            archived_on_format: "%Y-%m-%d %H:%M:%S UTC".to_string(),
        }
    }
}

/// Lead distribution and lifecycle operations over a [`RecordStore`].
///
/// The engine holds no per-request state. Every operation takes the caller's
/// [`Identity`] explicitly and composes single-call store operations; see the
/// individual modules for how each multi-step operation tolerates a crash
/// between steps.
pub struct LeadEngine<S> {
    store: S,
    config: EngineConfig,
    sheet: Box<dyn SheetWriter>,
}

impl<S: RecordStore> LeadEngine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            sheet: Box::new(CsvSheetWriter),
        }
    }

    pub fn with_sheet_writer(mut self, sheet: Box<dyn SheetWriter>) -> Self {
        self.sheet = sheet;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn export_file(&self, stem: &str, rows: &[RowPayload]) -> Result<ExportFile, EngineError> {
        let bytes = self.sheet.write_rows(rows)?;
        Ok(ExportFile {
            filename: format!("{stem}.{}", self.sheet.extension()),
            content_type: self.sheet.content_type(),
            bytes,
        })
    }
}

fn require_admin(ctx: &Identity) -> Result<(), EngineError> {
    if ctx.is_admin() {
        Ok(())
    } else {
        Err(EngineError::Forbidden)
    }
}

/// Trims and rejects blank values.
fn required<'a>(value: Option<&'a str>) -> Option<&'a str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

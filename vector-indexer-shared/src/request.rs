//! Run request types accepted by the orchestrator.

use serde::{Deserialize, Serialize};

use crate::item::Datapoint;
use crate::run::{IngestionPath, SourceDescriptor, UpdateMode, UpdateType};

/// Where the datapoints of a run come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatapointSource {
    /// Rows of a table matching a filter predicate; embedded by the pipeline.
    ByQuery { table: String, filter: String },
    /// Pre-embedded newline-delimited datapoints under an object-store prefix.
    ByGcsPrefix { prefix: String },
    /// Pre-embedded datapoints supplied inline.
    ByApiPayload { datapoints: Vec<Datapoint> },
}

impl DatapointSource {
    /// Whether the records still need to go through the embedding model.
    pub fn needs_embedding(&self) -> bool {
        matches!(self, DatapointSource::ByQuery { .. })
    }

    /// Number of records, when known up front.
    pub fn known_len(&self) -> Option<usize> {
        match self {
            DatapointSource::ByApiPayload { datapoints } => Some(datapoints.len()),
            _ => None,
        }
    }

    /// Payload-free description kept on the run record.
    pub fn describe(&self) -> SourceDescriptor {
        match self {
            DatapointSource::ByQuery { table, filter } => SourceDescriptor::Query {
                table: table.clone(),
                filter: filter.clone(),
            },
            DatapointSource::ByGcsPrefix { prefix } => SourceDescriptor::GcsPrefix {
                prefix: prefix.clone(),
            },
            DatapointSource::ByApiPayload { datapoints } => SourceDescriptor::ApiPayload {
                datapoints: datapoints.len(),
            },
        }
    }
}

/// Request to start a run.
///
/// Fields are optional at the type level so that missing values surface as
/// validation errors at the orchestrator boundary instead of decode failures.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunRequest {
    /// Caller-supplied run identifier.
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub update_type: UpdateType,
    #[serde(default)]
    pub source: Option<DatapointSource>,
    /// Object-store prefix the run writes under (`gs://bucket/path`).
    #[serde(default)]
    pub output_prefix: Option<String>,
    #[serde(default)]
    pub mode: Option<UpdateMode>,
    /// Generate sparse vectors alongside dense ones; falls back to configuration.
    #[serde(default)]
    pub hybrid: Option<bool>,
    /// Forces the ingestion path instead of letting the orchestrator decide.
    #[serde(default)]
    pub ingestion: Option<IngestionPath>,
}

impl RunRequest {
    /// Upsert the rows of `table` matching `filter`.
    pub fn from_query(
        table: impl Into<String>,
        filter: impl Into<String>,
        output_prefix: impl Into<String>,
    ) -> Self {
        Self {
            source: Some(DatapointSource::ByQuery {
                table: table.into(),
                filter: filter.into(),
            }),
            output_prefix: Some(output_prefix.into()),
            mode: Some(UpdateMode::Upsert),
            ..Default::default()
        }
    }

    /// Ingest pre-embedded datapoints supplied inline.
    pub fn from_datapoints(datapoints: Vec<Datapoint>, output_prefix: impl Into<String>) -> Self {
        Self {
            source: Some(DatapointSource::ByApiPayload { datapoints }),
            output_prefix: Some(output_prefix.into()),
            mode: Some(UpdateMode::Upsert),
            ..Default::default()
        }
    }

    /// Set the run identifier.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Set the update mode.
    pub fn with_mode(mut self, mode: UpdateMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set the update type.
    pub fn with_update_type(mut self, update_type: UpdateType) -> Self {
        self.update_type = update_type;
        self
    }

    /// Enable or disable sparse vectors for this run.
    pub fn with_hybrid(mut self, hybrid: bool) -> Self {
        self.hybrid = Some(hybrid);
        self
    }

    /// Force the ingestion path.
    pub fn with_ingestion(mut self, ingestion: IngestionPath) -> Self {
        self.ingestion = Some(ingestion);
        self
    }
}

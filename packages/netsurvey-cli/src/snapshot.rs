//! Offline query client backed by recorded responses.
//!
//! Layout: `<root>/<device>/<request name>.json`. A file holding
//! `{"error": {"kind": ..., "message": ..., "details": ...}}` replays a
//! transport error instead of a response.

use netsurvey_core::{Device, QueryClient, QueryError, QueryRequest};
use serde::Deserialize;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Deserialize)]
struct RecordedError {
    #[serde(default = "default_kind")]
    kind: String,
    message: String,
    #[serde(default)]
    details: Option<String>,
}

fn default_kind() -> String {
    "GRPC_ERROR".to_string()
}

pub struct SnapshotClient {
    root: PathBuf,
}

impl SnapshotClient {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn snapshot_path(&self, device: &Device, request: &QueryRequest) -> PathBuf {
        let file: String = request
            .name
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
            .collect();
        self.root.join(&device.name).join(format!("{}.json", file))
    }
}

impl QueryClient for SnapshotClient {
    async fn send(&self, device: &Device, request: &QueryRequest) -> Result<Value, QueryError> {
        let path = self.snapshot_path(device, request);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(QueryError::FeatureNotAvailable {
                    feature: request.name.clone(),
                    message: format!(
                        "No recorded {} response for {} ({})",
                        request.name,
                        device.name,
                        path.display()
                    ),
                });
            }
            Err(e) => {
                return Err(QueryError::transport(
                    &device.name,
                    "IO_ERROR",
                    format!("{}: {}", path.display(), e),
                ));
            }
        };

        let value: Value = serde_json::from_str(&content).map_err(|e| {
            QueryError::Other(format!("Invalid snapshot {}: {}", path.display(), e))
        })?;

        if let Some(error) = value.get("error") {
            let recorded = RecordedError::deserialize(error).map_err(|e| {
                QueryError::Other(format!("Invalid recorded error in {}: {}", path.display(), e))
            })?;
            return Err(QueryError::from_transport(
                &device.name,
                &recorded.kind,
                recorded.message,
                recorded.details,
            ));
        }

        tracing::debug!("Replayed {} for {} from {:?}", request.name, device.name, path);
        Ok(value)
    }
}

//! The OS file-pick dialog is an external collaborator: the gateway only
//! knows its interface. The desktop shell supplies a real implementation;
//! headless embeddings and tests use the ones here.

use std::path::PathBuf;

use async_trait::async_trait;

#[async_trait]
pub trait ModelFilePicker: Send + Sync {
    /// Present a model-file chooser. `None` means the user cancelled.
    async fn pick_model_file(&self) -> Option<PathBuf>;
}

/// Picker for headless deployments: every pick is a cancellation.
pub struct NoPicker;

#[async_trait]
impl ModelFilePicker for NoPicker {
    async fn pick_model_file(&self) -> Option<PathBuf> {
        None
    }
}

/// Picker that always chooses the same file, useful for testing and
/// development.
pub struct FixedPicker {
    path: PathBuf,
}

impl FixedPicker {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ModelFilePicker for FixedPicker {
    async fn pick_model_file(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }
}

use crate::{coordinator::Artifact, error::Result};

/// An editable status message.
#[async_trait::async_trait]
pub trait StatusSink: Send + Sync {
    /// Replace the status text with a transient (progress) update.
    async fn edit(&self, text: &str) -> Result<()>;

    /// Replace the status text with the terminal outcome of the operation.
    async fn finish(&self, text: &str) -> Result<()> {
        self.edit(text).await
    }
}

/// Delivers a finished artifact to the user.
#[async_trait::async_trait]
pub trait FileSender: Send + Sync {
    async fn send_file(&self, artifact: &Artifact) -> Result<()>;
}

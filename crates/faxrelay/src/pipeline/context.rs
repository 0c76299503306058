use crate::processor::DocumentArtifact;
use crate::recognition::RecognitionResult;
use crate::worker::job::Job;

pub struct PipelineContext {
    pub job: Job,

    // Set by the conversion stage; dropped (file removed) when the job ends.
    pub artifact: Option<DocumentArtifact>,

    // Set by the recognition stage
    pub result: Option<RecognitionResult>,
}

impl PipelineContext {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            artifact: None,
            result: None,
        }
    }

    pub fn file_name(&self) -> String {
        self.job.handle.file_name()
    }

    /// Removes the temporary artifact, if any.
    pub fn release_artifact(&mut self) {
        if let Some(artifact) = self.artifact.take() {
            if let Err(e) = artifact.discard() {
                tracing::warn!(error = %e, "failed to remove temporary artifact");
            }
        }
    }
}

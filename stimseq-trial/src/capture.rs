use stimseq_core::Response;

/// Holds the first qualifying response of a trial; later writes are rejected.
#[derive(Debug, Clone, Default)]
pub struct ResponseCapture {
    recorded: Option<Response>,
}

impl ResponseCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `candidate` if nothing is recorded yet. Returns whether it was kept.
    pub fn try_record(&mut self, candidate: Response) -> bool {
        if self.recorded.is_some() {
            return false;
        }
        self.recorded = Some(candidate);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.recorded.is_none()
    }

    /// `None` while no response has been recorded.
    pub fn value(&self) -> Option<&Response> {
        self.recorded.as_ref()
    }
}

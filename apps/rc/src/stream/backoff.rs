use std::time::Duration;

/// Reconnect delays indexed by attempt, saturating at the last step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    steps: Vec<Duration>,
}

impl BackoffSchedule {
    /// An empty list degenerates to "retry immediately".
    pub fn new(steps: Vec<Duration>) -> Self {
        Self { steps }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let index = (attempt as usize).min(self.steps.len().saturating_sub(1));
        self.steps.get(index).copied().unwrap_or(Duration::ZERO)
    }

    pub fn steps(&self) -> &[Duration] {
        &self.steps
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::new(
            [500, 1_000, 2_000, 5_000]
                .into_iter()
                .map(Duration::from_millis)
                .collect(),
        )
    }
}

/// The processor lifecycle's state DAG:
/// `Inactive -> Setup -> (Running <-> Broken) -> Cleanup -> Inactive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorState {
    Inactive,
    Setup,
    Running,
    Broken,
    Cleanup,
}

impl ProcessorState {
    /// `true` for the two states that are reachable from `Setup` once a
    /// processor has been instantiated, i.e. the ones `process_block` must
    /// special-case.
    pub fn is_live(self) -> bool {
        matches!(self, ProcessorState::Running | ProcessorState::Broken)
    }
}

impl Default for ProcessorState {
    fn default() -> Self {
        ProcessorState::Inactive
    }
}

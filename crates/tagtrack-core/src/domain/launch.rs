use std::path::PathBuf;

/// How to start a backend's external trainer.
///
/// The composed training arguments are appended after `leading_args`, so an
/// interpreter plus script (`python -u train.py`) and a bare executable are
/// both expressible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainerLaunch {
    pub program: PathBuf,
    pub leading_args: Vec<String>,
}

impl TrainerLaunch {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }
}

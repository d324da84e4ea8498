use std::path::PathBuf;

/// A fully composed process launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Added on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Value following `flag`, if present.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|pos| self.args.get(pos + 1))
            .map(String::as_str)
    }

    /// Shell-like rendering for logs. Not meant to be re-parsed.
    pub fn display(&self) -> String {
        let quote = |arg: &str| {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("{arg:?}")
            } else {
                arg.to_string()
            }
        };
        self.env
            .iter()
            .map(|(key, value)| format!("{key}={}", quote(value)))
            .chain(std::iter::once(quote(&self.program.to_string_lossy())))
            .chain(self.args.iter().map(|arg| quote(arg)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_quotes_spaces() {
        let spec = CommandSpec::new("python3")
            .args(["-u", "train.py", "--sample-prompt", "a red fox"])
            .env("CUDA_VISIBLE_DEVICES", "1");
        assert_eq!(
            spec.display(),
            "CUDA_VISIBLE_DEVICES=1 python3 -u train.py --sample-prompt \"a red fox\""
        );
    }

    #[test]
    fn test_flag_value() {
        let spec = CommandSpec::new("t").args(["--epochs", "3", "--lr"]);
        assert_eq!(spec.flag_value("--epochs"), Some("3"));
        assert_eq!(spec.flag_value("--lr"), None);
        assert_eq!(spec.flag_value("--gpu"), None);
    }
}

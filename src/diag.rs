use thiserror::Error;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Severity {
    Warning,
    Error,
}

/// Queryable record of noteworthy runtime events. User-program mistakes
/// are warnings and execution continues with a safe default; faults end
/// the current run.
#[derive(Error, Clone, PartialEq, Debug)]
pub enum Diagnostic {
    #[error("infinite loop detected after {dispatches} dispatches without suspending")]
    InfiniteLoop { dispatches: u32 },
    #[error("malformed block: {0}")]
    MalformedBlock(String),
    #[error("unknown costume \"{0}\"")]
    UnknownCostume(String),
    #[error("unknown backdrop \"{0}\"")]
    UnknownBackdrop(String),
    #[error("unknown sound \"{0}\"")]
    UnknownSound(String),
    #[error("unknown sprite \"{0}\"")]
    UnknownSprite(String),
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        match self {
            Diagnostic::InfiniteLoop { .. } | Diagnostic::MalformedBlock(_) => Severity::Error,
            _ => Severity::Warning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severities() {
        assert_eq!(
            Diagnostic::InfiniteLoop { dispatches: 10 }.severity(),
            Severity::Error
        );
        assert_eq!(
            Diagnostic::UnknownCostume("x".to_string()).severity(),
            Severity::Warning
        );
    }

    #[test]
    fn display_text() {
        let d = Diagnostic::UnknownSound("meow".to_string());
        assert_eq!(d.to_string(), "unknown sound \"meow\"");
    }
}

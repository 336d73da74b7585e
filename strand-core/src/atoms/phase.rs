//! Consumer-visible lifecycle of an asynchronous value.

use crate::error::AtomError;

/// Where an async producer currently stands.
///
/// One-shot producers move `Pending -> Running -> Success | Failure` and stay
/// there until refreshed. Continuous producers move between `Running` and a
/// terminal phase as elements arrive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Phase<T> {
    /// Never started.
    #[default]
    Pending,
    /// Started, no result yet.
    Running,
    Success(T),
    Failure(AtomError),
}

impl<T> Phase<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Whether the phase holds a result, successful or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success(_) | Self::Failure(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&AtomError> {
        match self {
            Self::Failure(error) => Some(error),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Phase<U> {
        match self {
            Self::Pending => Phase::Pending,
            Self::Running => Phase::Running,
            Self::Success(value) => Phase::Success(f(value)),
            Self::Failure(error) => Phase::Failure(error),
        }
    }
}

impl<T> From<Result<T, AtomError>> for Phase<T> {
    fn from(result: Result<T, AtomError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) => Self::Failure(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_conversion() {
        let ok: Phase<u8> = Ok(3).into();
        assert_eq!(ok.value(), Some(&3));
        assert!(ok.is_terminal());

        let err: Phase<u8> = Err(AtomError::Exhausted).into();
        assert_eq!(err.error(), Some(&AtomError::Exhausted));
        assert!(err.value().is_none());
    }

    #[test]
    fn map_keeps_non_success_phases() {
        assert_eq!(Phase::<u8>::Running.map(|v| v * 2), Phase::Running);
        assert_eq!(Phase::Success(4_u8).map(|v| v * 2), Phase::Success(8));
        assert!(Phase::<u8>::default().is_pending());
    }
}

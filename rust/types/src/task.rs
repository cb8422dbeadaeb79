use thiserror::Error;

/// Lifecycle of a scheduler task. Persisted to the meta KV as a decimal
/// string, so the discriminants are frozen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum TaskState {
    Undo = 0,
    Doing = 1,
    Done = 2,
    Expired = 3,
    Failed = 4,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Expired | TaskState::Failed)
    }
}

#[derive(Debug, Error)]
#[error("invalid task state: {0}")]
pub struct InvalidTaskState(pub String);

impl TryFrom<i32> for TaskState {
    type Error = InvalidTaskState;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TaskState::Undo),
            1 => Ok(TaskState::Doing),
            2 => Ok(TaskState::Done),
            3 => Ok(TaskState::Expired),
            4 => Ok(TaskState::Failed),
            other => Err(InvalidTaskState(other.to_string())),
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = InvalidTaskState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i32 = s.parse().map_err(|_| InvalidTaskState(s.to_string()))?;
        TaskState::try_from(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_state_round_trip() {
        for state in [
            TaskState::Undo,
            TaskState::Doing,
            TaskState::Done,
            TaskState::Expired,
            TaskState::Failed,
        ] {
            let encoded = (state as i32).to_string();
            let decoded: TaskState = encoded.parse().unwrap();
            assert_eq!(decoded, state);
        }
        assert!("5".parse::<TaskState>().is_err());
        assert!("doing".parse::<TaskState>().is_err());
    }
}

use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// 업데이트 대상
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateTarget {
    Launcher,
    App(Uuid),
}

impl fmt::Display for UpdateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateTarget::Launcher => write!(f, "launcher"),
            UpdateTarget::App(id) => write!(f, "app {}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    Idle,
    CheckingForUpdate,
    UpToDate,
    UpdateAvailable,
    Downloading,
    Installing,
    VersionCommitted,
    Relaunching,
    Failed,
}

impl UpdatePhase {
    /// 작업이 진행 중인 단계
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            UpdatePhase::CheckingForUpdate | UpdatePhase::Downloading | UpdatePhase::Installing
        )
    }

    fn is_settled(&self) -> bool {
        matches!(
            self,
            UpdatePhase::Idle
                | UpdatePhase::UpToDate
                | UpdatePhase::UpdateAvailable
                | UpdatePhase::VersionCommitted
                | UpdatePhase::Failed
        )
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition for {0}: {1:?} -> {2:?}")]
    InvalidTransition(UpdateTarget, UpdatePhase, UpdatePhase),
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    pub target: UpdateTarget,
    pub phase: UpdatePhase,
}

impl StateMachine {
    pub fn new(target: UpdateTarget) -> Self {
        Self { target, phase: UpdatePhase::Idle }
    }

    pub fn can_transition(&self, to: UpdatePhase) -> bool {
        use UpdatePhase::*;
        match (self.phase, to) {
            (from, CheckingForUpdate) | (from, Downloading) if from.is_settled() => true,
            (from, Failed) if from.is_busy() => true,
            _ => matches!(
                (self.phase, to),
                (CheckingForUpdate, UpToDate)
                    | (CheckingForUpdate, UpdateAvailable)
                    | (Downloading, Installing)
                    | (Installing, VersionCommitted)
                    | (VersionCommitted, Relaunching)
            ),
        }
    }

    pub fn transition(&mut self, to: UpdatePhase) -> Result<(), TransitionError> {
        if self.can_transition(to) {
            tracing::debug!("[State] {}: {:?} -> {:?}", self.target, self.phase, to);
            self.phase = to;
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition(self.target, self.phase, to))
        }
    }

    /// 설치 디렉터리 삭제 등으로 이력이 무의미해졌을 때
    pub fn reset(&mut self) {
        self.phase = UpdatePhase::Idle;
    }
}

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Structured failure detail handed back to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperateError {
    pub code: String,
    pub description: String,
}

/// Outcome of a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishResult {
    Success,
    Failed {
        error: TransportError,
        detail: OperateError,
    },
}

impl PublishResult {
    pub fn failed(error: TransportError) -> Self {
        let detail = OperateError {
            code: error.code().to_string(),
            description: error.description(),
        };
        PublishResult::Failed { error, detail }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PublishResult::Success)
    }

    pub fn error(&self) -> Option<&TransportError> {
        match self {
            PublishResult::Success => None,
            PublishResult::Failed { error, .. } => Some(error),
        }
    }

    pub fn detail(&self) -> Option<&OperateError> {
        match self {
            PublishResult::Success => None,
            PublishResult::Failed { detail, .. } => Some(detail),
        }
    }

    pub fn into_result(self) -> Result<(), TransportError> {
        match self {
            PublishResult::Success => Ok(()),
            PublishResult::Failed { error, .. } => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerError;

    #[test]
    fn failed_carries_native_detail() {
        let result = PublishResult::failed(TransportError::PublishFailed(BrokerError::new(
            "-7",
            "destination full",
        )));

        assert!(!result.is_success());
        assert_eq!(
            result.detail(),
            Some(&OperateError {
                code: "-7".into(),
                description: "destination full".into(),
            })
        );
        assert!(matches!(
            result.into_result(),
            Err(TransportError::PublishFailed(_))
        ));
    }

    #[test]
    fn success_has_no_error() {
        assert!(PublishResult::Success.is_success());
        assert!(PublishResult::Success.error().is_none());
        assert!(PublishResult::Success.into_result().is_ok());
    }
}

use gpu_interop::PixelFormat;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Bad arguments from the caller. Nothing was attempted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("proxy is not initialized")]
    NotInitialized,

    /// Required proxy object (device, context, swapchain) is missing.
    #[error("proxy {0} unavailable")]
    NotReady(&'static str),

    #[error("proxy device creation failed: {0:#}")]
    DeviceCreation(anyhow::Error),

    #[error("shared resource setup failed: {0:#}")]
    SharedResource(anyhow::Error),

    /// Source swapchain or its backbuffer could not be read.
    #[error("source unavailable: {0:#}")]
    SourceUnavailable(anyhow::Error),

    /// The source backbuffer is in a format no proxy swapchain can take.
    #[error("source format {0:?} cannot be presented by the proxy")]
    UnsupportedFormat(PixelFormat),

    #[error("completion fence not signaled after {polls} polls")]
    FenceTimeout { polls: u64 },

    #[error("present failed: {0:#}")]
    Present(anyhow::Error),

    #[error("color space rejected: {0}")]
    ColorSpace(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller passed something unusable.
    CallerError,
    /// The call failed; state is torn down or untouched. Retrying with the
    /// same inputs fails the same way.
    Fatal,
    /// A best-effort step fell back; the operation carried on.
    Degraded,
    /// Only this frame is lost; the next call retries.
    Transient,
}

impl ProxyError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidArgument(_) => ErrorClass::CallerError,
            Self::DeviceCreation(_) | Self::SharedResource(_) | Self::UnsupportedFormat(_) => {
                ErrorClass::Fatal
            }
            Self::ColorSpace(_) => ErrorClass::Degraded,
            Self::NotInitialized
            | Self::NotReady(_)
            | Self::SourceUnavailable(_)
            | Self::FenceTimeout { .. }
            | Self::Present(_)
            | Self::Backend(_) => ErrorClass::Transient,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(ProxyError::InvalidArgument("x".into()).class(), ErrorClass::CallerError);
        assert_eq!(
            ProxyError::DeviceCreation(anyhow::anyhow!("no adapter")).class(),
            ErrorClass::Fatal
        );
        assert!(ProxyError::FenceTimeout { polls: 3 }.is_retryable());
        assert!(ProxyError::from(anyhow::anyhow!("lost")).is_retryable());
        assert!(!ProxyError::SharedResource(anyhow::anyhow!("export")).is_retryable());
        assert!(!ProxyError::UnsupportedFormat(PixelFormat::Other(87)).is_retryable());
        assert_eq!(
            ProxyError::ColorSpace("not supported".into()).class(),
            ErrorClass::Degraded
        );
    }

    #[test]
    fn display_keeps_context_chain() {
        let inner = anyhow::anyhow!("E_INVALIDARG").context("OpenSharedResource failed");
        let msg = ProxyError::SharedResource(inner).to_string();
        assert!(msg.contains("OpenSharedResource failed"));
        assert!(msg.contains("E_INVALIDARG"));
    }
}

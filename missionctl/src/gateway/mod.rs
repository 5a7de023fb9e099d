//! Gateway between the client and the mission control server.
//!
//! The [`TaskGateway`] trait is the seam the board logic talks through.
//! [`remote::RemoteGateway`] implements it over a WebSocket connection;
//! tests substitute recording doubles.

pub mod remote;

use missionctl_proto::rpc::{ErrorKind, Request, Response, RpcError};
use missionctl_proto::task::{TaskId, TaskStatus};

/// Errors that can occur while talking to the server.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The connection to the server has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// No reply arrived within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// The server could not be reached.
    #[error("server {0} is unreachable")]
    Unreachable(String),

    /// An underlying I/O error occurred.
    #[error("gateway I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server rejected the request.
    #[error("{}: {}", .0.kind, .0.message)]
    Rpc(#[from] RpcError),

    /// The server answered with a response of the wrong shape.
    #[error("unexpected response to {0}")]
    UnexpectedResponse(&'static str),
}

impl GatewayError {
    /// Returns the server-side error category, if the server rejected the
    /// request.
    #[must_use]
    pub const fn rpc_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Rpc(e) => Some(e.kind),
            _ => None,
        }
    }
}

/// Async request channel to the mission control server.
pub trait TaskGateway: Send + Sync {
    /// Runs one request and waits for its reply.
    fn call(
        &self,
        request: Request,
    ) -> impl std::future::Future<Output = Result<Response, GatewayError>> + Send;

    /// Moves a task to another column.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Rpc`] with [`ErrorKind::NotFound`] if the task
    /// no longer exists, or any transport error.
    fn move_task(
        &self,
        id: TaskId,
        status: TaskStatus,
    ) -> impl std::future::Future<Output = Result<(), GatewayError>> + Send {
        async move {
            let response = self.call(Request::MoveTask { id, status }).await?;
            expect_done(response, "tasks.move")
        }
    }
}

impl<T: TaskGateway> TaskGateway for std::sync::Arc<T> {
    fn call(
        &self,
        request: Request,
    ) -> impl std::future::Future<Output = Result<Response, GatewayError>> + Send {
        (**self).call(request)
    }
}

/// Checks that a mutation was acknowledged with [`Response::Done`].
///
/// # Errors
///
/// Returns [`GatewayError::UnexpectedResponse`] for any other response.
pub fn expect_done(response: Response, op: &'static str) -> Result<(), GatewayError> {
    match response {
        Response::Done => Ok(()),
        _ => Err(GatewayError::UnexpectedResponse(op)),
    }
}

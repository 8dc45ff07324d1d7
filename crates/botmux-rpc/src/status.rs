//! gRPC status classification for the retry layer.

use tonic::{Code, Status};

/// Whether the status means the server is temporarily unreachable.
pub fn is_unavailable(status: &Status) -> bool {
    status.code() == Code::Unavailable
}

/// Whether the status means the call ended because somebody hung up rather
/// than because something broke.
pub fn is_canceled(status: &Status) -> bool {
    matches!(status.code(), Code::Cancelled | Code::DeadlineExceeded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable() {
        assert!(is_unavailable(&Status::unavailable("down")));
        assert!(!is_unavailable(&Status::internal("broken")));
    }

    #[test]
    fn test_canceled() {
        assert!(is_canceled(&Status::cancelled("bye")));
        assert!(is_canceled(&Status::deadline_exceeded("slow")));
        assert!(!is_canceled(&Status::unavailable("down")));
    }
}

//! Mapping of transport failures onto peer problems

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{AuthMethodResult, PeerError};
use crate::ssh::{ResponderReport, TransportError};

/// Generic message for authentication failures without a more specific cause
pub const AUTHENTICATION_FAILED: &str = "authentication-failed";

/// Turn a failed login into exactly one [`PeerError`]
///
/// `report` is what the responder observed during the attempt; `private`
/// and `password_held` describe the peer that made it.
pub fn classify_failure(
    err: TransportError,
    report: &ResponderReport,
    private: bool,
    password_held: bool,
) -> PeerError {
    match err {
        TransportError::Io(e) => PeerError::NoHost {
            message: e.to_string(),
        },

        TransportError::HostKey { changed } => {
            // Only a sighting lets the front-end show which key to accept
            let identity = report.hostkeys_seen.first().map(|s| s.identity());
            let error = if changed {
                PeerError::InvalidHostkey { identity }
            } else if private {
                PeerError::UnknownHostkey { identity }
            } else {
                PeerError::UnknownHost
            };
            debug!(
                "Host key failure (changed: {}, private: {}, sightings: {}) -> {}",
                changed,
                private,
                report.hostkeys_seen.len(),
                error.problem()
            );
            error
        }

        TransportError::Authentication { methods } => {
            let mut results: BTreeMap<String, AuthMethodResult> = methods
                .into_iter()
                .map(|method| (method, AuthMethodResult::NotProvided))
                .collect();

            if password_held {
                if let Some(result) = results.get_mut("password") {
                    *result = if report.password_attempts == 0 {
                        AuthMethodResult::NotTried
                    } else {
                        AuthMethodResult::Denied
                    };
                }
            }

            PeerError::AuthenticationFailed {
                error: report
                    .error_message
                    .clone()
                    .unwrap_or_else(|| AUTHENTICATION_FAILED.to_string()),
                auth_method_results: results,
            }
        }

        TransportError::Other(message) => PeerError::InternalError { message },
    }
}

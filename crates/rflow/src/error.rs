//! 🏷️ The error taxonomy: every way a pass can go sideways, each with a name tag.
//!
//! Everything in this crate speaks `anyhow::Result` with `.context(...)` layered on
//! like sediment. That's great for humans reading logs at 3am. It's less great for the
//! code that has to decide "do I retry this?" or "do I write TIMED_OUT or FAILED?".
//! So at the seams where somebody has to *classify*, we stash a [`FlowError`] at the
//! bottom of the context chain and fish it back out with [`classify`]. 🎣
//!
//! 🦆 The duck is transient. The duck will be retried.

use std::fmt;

/// 🏷️ The closed set of failure classes the pipeline knows how to react to.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// 🔄 Server said 5xx, the socket said nope, or the whole batch face-planted.
    /// Retry policy territory.
    #[error("transient failure: {0}")]
    Transient(String),

    /// 🧩 A payload didn't look like what it claimed to be.
    #[error("decode failure: {0}")]
    Decode(String),

    /// 📝 A request on disk is missing something, or a build arrived empty.
    #[error("invalid input: {0}")]
    Input(String),

    /// ⏰ The watchdog ran out of patience.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// 📬 The final acknowledgement did not land.
    #[error("acknowledgement failed: {0}")]
    Ack(String),

    /// 🛑 The cancellation scope fired while a transport call was in flight.
    #[error("cancelled while {0}")]
    Cancelled(String),

    /// 💀 A transport failure that retrying will not fix (4xx and friends).
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// 🧱 A row could not be turned into the warehouse wire shape.
    #[error("serialization failure: {0}")]
    Serialization(String),
}

impl FlowError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FlowError::Transient(_))
    }

    /// ⏰ Both flavours of "we ran out of time" end up as `TIMED_OUT`.
    pub fn is_deadline(&self) -> bool {
        matches!(self, FlowError::DeadlineExceeded(_) | FlowError::Cancelled(_))
    }

    pub(crate) fn decode(what: impl fmt::Display) -> Self {
        FlowError::Decode(what.to_string())
    }

    pub(crate) fn input(what: impl fmt::Display) -> Self {
        FlowError::Input(what.to_string())
    }
}

/// 🎣 Walk the anyhow context chain and return the first [`FlowError`] buried in it.
pub fn classify(err: &anyhow::Error) -> Option<&FlowError> {
    err.chain().find_map(|cause| cause.downcast_ref::<FlowError>())
}

/// 🔄 True when somewhere in the chain a transport told us "try again later".
pub fn is_transient(err: &anyhow::Error) -> bool {
    classify(err).is_some_and(FlowError::is_transient)
}

/// ⏰ True when the chain ends in a deadline or a cancellation.
pub fn is_deadline(err: &anyhow::Error) -> bool {
    classify(err).is_some_and(FlowError::is_deadline)
}

/// 📡 Turn an HTTP status into the right bucket. 5xx is transient, everything else is
/// somebody's config being wrong, which no amount of retrying will fix.
pub(crate) fn classify_status(status: reqwest::StatusCode, what: &str, body: &str) -> FlowError {
    let detail = format!("{what} returned {status}: {body}");
    if status.is_server_error() {
        FlowError::Transient(detail)
    } else {
        FlowError::Permanent(detail)
    }
}

/// 📡 Connection refused, timeouts, resets: the network is having a moment, try again.
pub(crate) fn classify_reqwest(err: &reqwest::Error, what: &str) -> FlowError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        FlowError::Transient(format!("{what}: {err}"))
    } else {
        FlowError::Permanent(format!("{what}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn the_one_where_context_layers_dont_hide_the_classification() {
        // 🧪 bury a transient error under two layers of context, then dig it back up
        let err: anyhow::Result<()> = Err(FlowError::Transient("503".into()).into());
        let err = err
            .context("insertAll for table p.d.t")
            .context("dispatching batch")
            .unwrap_err();

        assert!(is_transient(&err));
        assert!(!is_deadline(&err));
        assert!(matches!(classify(&err), Some(FlowError::Transient(_))));
    }

    #[test]
    fn the_one_where_plain_anyhow_errors_stay_unclassified() {
        let err = anyhow::anyhow!("just vibes, no taxonomy");
        assert!(classify(&err).is_none());
        assert!(!is_transient(&err));
    }

    #[test]
    fn the_one_where_5xx_is_transient_and_4xx_is_not() {
        let five = classify_status(reqwest::StatusCode::SERVICE_UNAVAILABLE, "pull", "");
        let four = classify_status(reqwest::StatusCode::FORBIDDEN, "pull", "nope");
        assert!(five.is_transient());
        assert!(!four.is_transient());
        assert!(four.to_string().contains("403"));
    }

    #[test]
    fn the_one_where_cancellation_counts_as_running_out_of_time() {
        let err: anyhow::Error = FlowError::Cancelled("pulling messages".into()).into();
        assert!(is_deadline(&err));
    }
}

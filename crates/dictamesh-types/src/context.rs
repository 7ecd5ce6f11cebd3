use std::time::{Duration, Instant};

use crate::event::TraceContext;

/// Per-request context threaded through every runtime and gateway call.
/// Carries correlation identity and the cancellation deadline; the deadline
/// is the outer bound, internal stages consume budget from it.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub principal: Option<String>,
    pub tenant: Option<String>,
    pub trace: TraceContext,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            principal: None,
            tenant: None,
            trace: TraceContext::root(),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.with_deadline(deadline)
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Remaining budget, `None` when no deadline was set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn expired(&self) -> bool {
        matches!(self.remaining(), Some(r) if r.is_zero())
    }

    /// A child context for one unit of downstream work: same request
    /// identity and deadline, new span.
    pub fn child(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            principal: self.principal.clone(),
            tenant: self.tenant.clone(),
            trace: self.trace.child(),
            deadline: self.deadline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_deadline_means_no_budget_tracking() {
        let ctx = RequestContext::new("req-1");
        assert_eq!(ctx.remaining(), None);
        assert!(!ctx.expired());
    }

    #[test]
    fn elapsed_deadline_reports_expired() {
        let ctx = RequestContext::new("req-1").with_deadline(Instant::now());
        assert!(ctx.expired());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn child_keeps_request_identity_and_deadline() {
        let ctx = RequestContext::new("req-1").with_timeout(Duration::from_secs(5));
        let child = ctx.child();
        assert_eq!(child.request_id, ctx.request_id);
        assert_eq!(child.deadline(), ctx.deadline());
        assert_eq!(child.trace.trace_id, ctx.trace.trace_id);
        assert_ne!(child.trace.span_id, ctx.trace.span_id);
    }
}

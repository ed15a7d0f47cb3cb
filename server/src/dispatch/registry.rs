//! Pending Registry
//!
//! Per-user FIFO of registered requests. The head of a user's queue is the
//! one being executed; everything behind it is pending. All mutation goes
//! through one owner so registration order is arrival order.

use std::collections::{HashMap, VecDeque};

use super::error::DispatchError;
use super::types::{QueryRequest, QueryStatus, RequestId, Submission};

#[derive(Debug, Default)]
pub struct PendingRegistry {
    queues: HashMap<String, VecDeque<QueryRequest>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request, rejecting it when the user already holds `depth`
    /// requests (the in-flight one included).
    pub fn register(
        &mut self,
        user_id: &str,
        text: &str,
        depth: usize,
    ) -> Result<Submission, DispatchError> {
        let queue = self.queues.entry(user_id.to_string()).or_default();
        if queue.len() >= depth.max(1) {
            return Err(DispatchError::UserBusy {
                user_id: user_id.to_string(),
            });
        }

        let request = QueryRequest::new(user_id, text);
        let submission = Submission {
            request_id: request.id,
            needs_worker: queue.is_empty(),
        };
        queue.push_back(request);
        Ok(submission)
    }

    /// Mark the head of the user's queue in flight and return a copy of it.
    pub fn begin_next(&mut self, user_id: &str) -> Option<QueryRequest> {
        let head = self.queues.get_mut(user_id)?.front_mut()?;
        head.status = QueryStatus::InFlight;
        Some(head.clone())
    }

    /// Retire the head request with its terminal `status`. Returns whether
    /// more requests are waiting for this user.
    ///
    /// A mismatched `request_id` leaves the queue untouched.
    pub fn complete(&mut self, user_id: &str, request_id: RequestId, status: QueryStatus) -> bool {
        debug_assert!(status.is_terminal());
        let Some(queue) = self.queues.get_mut(user_id) else {
            return false;
        };
        if queue.front().is_some_and(|head| head.id == request_id) {
            queue.pop_front();
        }
        if queue.is_empty() {
            self.queues.remove(user_id);
            false
        } else {
            true
        }
    }

    pub fn in_flight(&self, user_id: &str) -> Option<&QueryRequest> {
        self.queues
            .get(user_id)?
            .front()
            .filter(|head| head.status == QueryStatus::InFlight)
    }

    /// Requests registered for the user, in-flight one included.
    pub fn registered(&self, user_id: &str) -> usize {
        self.queues.get(user_id).map_or(0, VecDeque::len)
    }

    /// Users with at least one registered request.
    pub fn active_users(&self) -> usize {
        self.queues.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_needs_worker() {
        let mut registry = PendingRegistry::new();
        let submission = registry.register("u1", "hello", 1).unwrap();
        assert!(submission.needs_worker);
        assert_eq!(registry.registered("u1"), 1);
        // Registered but not started
        assert!(registry.in_flight("u1").is_none());

        let started = registry.begin_next("u1").unwrap();
        assert_eq!(started.id, submission.request_id);
        assert_eq!(started.status, QueryStatus::InFlight);
    }

    #[test]
    fn test_second_request_rejected_at_depth_one() {
        let mut registry = PendingRegistry::new();
        let first = registry.register("u1", "first", 1).unwrap();
        registry.begin_next("u1").unwrap();

        let err = registry.register("u1", "second", 1).unwrap_err();
        assert!(matches!(err, DispatchError::UserBusy { .. }));

        // The in-flight request is untouched
        let head = registry.in_flight("u1").unwrap();
        assert_eq!(head.id, first.request_id);
        assert_eq!(head.text, "first");
        assert_eq!(head.status, QueryStatus::InFlight);
        assert_eq!(registry.registered("u1"), 1);
    }

    #[test]
    fn test_deeper_queue_preserves_fifo() {
        let mut registry = PendingRegistry::new();
        let a = registry.register("u1", "a", 3).unwrap();
        let b = registry.register("u1", "b", 3).unwrap();
        let c = registry.register("u1", "c", 3).unwrap();
        assert!(a.needs_worker);
        assert!(!b.needs_worker);
        assert!(!c.needs_worker);
        assert!(registry.register("u1", "d", 3).is_err());

        let mut order = Vec::new();
        while let Some(request) = registry.begin_next("u1") {
            order.push(request.text.clone());
            if !registry.complete("u1", request.id, QueryStatus::Succeeded) {
                break;
            }
        }
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(registry.active_users(), 0);
    }

    #[test]
    fn test_users_are_independent() {
        let mut registry = PendingRegistry::new();
        registry.register("u1", "a", 1).unwrap();
        let other = registry.register("u2", "b", 1).unwrap();
        assert!(other.needs_worker);
        assert_eq!(registry.active_users(), 2);
    }

    #[test]
    fn test_complete_ignores_unknown_request() {
        let mut registry = PendingRegistry::new();
        registry.register("u1", "a", 1).unwrap();
        assert!(registry.complete("u1", uuid::Uuid::now_v7(), QueryStatus::Failed));
        assert_eq!(registry.registered("u1"), 1);
        assert!(!registry.complete("nobody", uuid::Uuid::now_v7(), QueryStatus::Failed));
    }

    #[test]
    fn test_user_can_submit_again_after_completion() {
        let mut registry = PendingRegistry::new();
        let first = registry.register("u1", "a", 1).unwrap();
        registry.begin_next("u1");
        assert!(!registry.complete("u1", first.request_id, QueryStatus::TimedOut));

        let again = registry.register("u1", "b", 1).unwrap();
        assert!(again.needs_worker);
    }
}

//! Followers the leader talks to in tests.
//!
//! [`DelayedFollower`] holds every request back until the test delivers it with
//! [`DelayedFollower::run_async_append_entries`], so a test decides exactly when each follower answers.
//! [`FailingFollower`] forwards requests while healthy and fails them, like an unreachable peer, otherwise.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use replog_rs::log::follower::{AbstractFollower, AppendEntriesFuture, FollowerError, LogFollower};
use replog_rs::log::messages::{AppendEntriesRequest, AppendEntriesResult};
use replog_rs::promise::{self, Future, Promise};
use replog_rs::types::ParticipantId;

type PendingRequest = (AppendEntriesRequest, Promise<Result<AppendEntriesResult, FollowerError>>);

pub(crate) struct DelayedFollower {
    participant_id: ParticipantId,
    follower: Mutex<Arc<LogFollower>>,
    pending: Mutex<VecDeque<PendingRequest>>,
}

impl DelayedFollower {
    pub(crate) fn new(follower: Arc<LogFollower>) -> Arc<DelayedFollower> {
        Arc::new(DelayedFollower {
            participant_id: follower.participant_id().clone(),
            follower: Mutex::new(follower),
            pending: Mutex::new(VecDeque::new()),
        })
    }

    /// Deliver requests to a new follower instance, e.g. after the follower restarted.
    pub(crate) fn replace_follower(&self, follower: Arc<LogFollower>) {
        *self.follower.lock().unwrap() = follower;
    }

    pub(crate) fn has_pending_append_entries(&self) -> bool {
        !self.pending.lock().unwrap().is_empty()
    }

    pub(crate) fn num_pending_append_entries(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Deliver the requests that are pending right now. Returns how many were delivered.
    pub(crate) fn run_async_append_entries(&self) -> usize {
        let pending: Vec<PendingRequest> = self.pending.lock().unwrap().drain(..).collect();
        let num_delivered = pending.len();
        for (request, promise) in pending {
            let follower = self.follower.lock().unwrap().clone();
            promise.fulfil(follower.handle_append_entries(request));
        }
        num_delivered
    }

    /// Deliver requests until none are pending, or `max_rounds` rounds have run.
    pub(crate) fn run_until_idle(&self, max_rounds: usize) {
        for _ in 0..max_rounds {
            if self.run_async_append_entries() == 0 {
                return;
            }
        }
    }

    /// Fail the pending requests as if the network dropped them.
    pub(crate) fn drop_pending_append_entries(&self) -> usize {
        let pending: Vec<PendingRequest> = self.pending.lock().unwrap().drain(..).collect();
        let num_dropped = pending.len();
        for (_, promise) in pending {
            promise.fulfil(Err(FollowerError::Unreachable("request dropped".to_string())));
        }
        num_dropped
    }
}

impl AbstractFollower for DelayedFollower {
    fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    fn append_entries(&self, request: AppendEntriesRequest) -> AppendEntriesFuture {
        let (promise, future) = promise::channel();
        self.pending.lock().unwrap().push_back((request, promise));
        future
    }
}

pub(crate) struct FailingFollower {
    participant_id: ParticipantId,
    follower: Arc<LogFollower>,
    failing: AtomicBool,
    num_requests: AtomicUsize,
}

impl FailingFollower {
    pub(crate) fn new(follower: Arc<LogFollower>) -> Arc<FailingFollower> {
        Arc::new(FailingFollower {
            participant_id: follower.participant_id().clone(),
            follower,
            failing: AtomicBool::new(false),
            num_requests: AtomicUsize::new(0),
        })
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst)
    }

    pub(crate) fn num_requests(&self) -> usize {
        self.num_requests.load(Ordering::SeqCst)
    }
}

impl AbstractFollower for FailingFollower {
    fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    fn append_entries(&self, request: AppendEntriesRequest) -> AppendEntriesFuture {
        self.num_requests.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Future::ready(Err(FollowerError::Unreachable(format!(
                "{} is unreachable",
                self.participant_id
            ))))
        } else {
            Future::ready(self.follower.handle_append_entries(request))
        }
    }
}
